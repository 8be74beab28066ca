//! `wordhoard policy`: list, add and remove policy tuples, and persist the
//! live state.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;
use wordhoard_authz::api::proto::{
    ListPoliciesRequest, PersistRequest, PolicyRequest, PolicyTuple,
};

use super::subject_arg;
use crate::client::{AdminClient, ClientError};
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// List policy tuples
    List {
        /// Only tuples held by this subject
        #[arg(short, long)]
        subject: Option<String>,

        /// Include tuples inherited through roles (needs --subject)
        #[arg(short, long, requires = "subject")]
        implicit: bool,
    },

    /// Grant a subject an action on a resource
    Add {
        subject: String,
        resource: String,
        action: String,
    },

    /// Remove a tuple
    Remove {
        subject: String,
        resource: String,
        action: String,
    },

    /// Save the live policy state again after a change was not persisted
    Persist,
}

#[derive(Debug, Serialize, Tabled)]
struct PolicyRow {
    #[tabled(rename = "Subject")]
    subject: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
}

impl From<PolicyTuple> for PolicyRow {
    fn from(tuple: PolicyTuple) -> Self {
        Self {
            subject: tuple.subject,
            resource: tuple.resource,
            action: tuple.action,
        }
    }
}

fn tuple(subject: &str, resource: String, action: String) -> Result<PolicyTuple> {
    Ok(PolicyTuple {
        subject: subject_arg(subject)?,
        resource,
        action,
    })
}

pub async fn execute(cmd: PolicyCommands, client: &mut AdminClient, format: OutputFormat) -> Result<()> {
    match cmd {
        PolicyCommands::List { subject, implicit } => {
            let request = ListPoliciesRequest {
                subject: subject.as_deref().map(subject_arg).transpose()?,
                implicit,
            };
            let policies = client
                .list_policies(request)
                .await
                .map_err(ClientError::from)?
                .into_inner()
                .policies;
            let rows: Vec<PolicyRow> = policies.into_iter().map(PolicyRow::from).collect();
            output::print_list(&rows, format)?;
        }

        PolicyCommands::Add { subject, resource, action } => {
            let policy = tuple(&subject, resource, action)?;
            let what = format!("add {} {}:{}", policy.subject, policy.resource, policy.action);
            let changed = client
                .add_policy(PolicyRequest { policy: Some(policy) })
                .await
                .map_err(ClientError::from)?
                .into_inner()
                .changed;
            output::print_mutation(&what, changed, format)?;
        }

        PolicyCommands::Remove { subject, resource, action } => {
            let policy = tuple(&subject, resource, action)?;
            let what = format!("remove {} {}:{}", policy.subject, policy.resource, policy.action);
            let changed = client
                .remove_policy(PolicyRequest { policy: Some(policy) })
                .await
                .map_err(ClientError::from)?
                .into_inner()
                .changed;
            output::print_mutation(&what, changed, format)?;
        }

        PolicyCommands::Persist => {
            let saved = client
                .persist(PersistRequest {})
                .await
                .map_err(ClientError::from)?
                .into_inner();
            match format {
                OutputFormat::Table => output::print_success(&format!(
                    "persisted {} tuples and {} role edges",
                    saved.rules, saved.role_edges
                )),
                _ => output::print_item(&saved, format)?,
            }
        }
    }

    Ok(())
}
