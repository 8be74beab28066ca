//! `wordhoard role`: the role graph and user assignments.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;
use wordhoard_authz::api::proto::{ListRolesRequest, RoleAssignmentRequest, RoleEdgeRequest};

use super::subject_arg;
use crate::client::{AdminClient, ClientError};
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum RoleCommands {
    /// List roles: all of them with edges, those of a subject, or the members of a role
    List {
        /// Roles held by this subject
        #[arg(short, long, conflicts_with = "members")]
        subject: Option<String>,

        /// Include roles reached through inheritance (needs --subject)
        #[arg(short, long, requires = "subject")]
        implicit: bool,

        /// Direct members of this role
        #[arg(short, long)]
        members: Option<String>,
    },

    /// Give a user a role
    Assign { user_id: u64, role: String },

    /// Take a role away from a user
    Revoke { user_id: u64, role: String },

    /// Make CHILD inherit everything PARENT is granted
    Inherit { child: String, parent: String },

    /// Remove an inheritance edge
    Disinherit { child: String, parent: String },
}

#[derive(Debug, Serialize, Tabled)]
struct RoleRow {
    #[tabled(rename = "Role")]
    role: String,
}

#[derive(Debug, Serialize, Tabled)]
struct EdgeRow {
    #[tabled(rename = "Child")]
    child: String,
    #[tabled(rename = "Inherits From")]
    parent: String,
}

#[derive(Debug, Serialize, Tabled)]
struct MemberRow {
    #[tabled(rename = "Member")]
    member: String,
}

fn role_rows(roles: Vec<String>) -> Vec<RoleRow> {
    roles.into_iter().map(|role| RoleRow { role }).collect()
}

pub async fn execute(cmd: RoleCommands, client: &mut AdminClient, format: OutputFormat) -> Result<()> {
    match cmd {
        RoleCommands::List { subject, implicit, members } => {
            let request = ListRolesRequest {
                subject: subject.as_deref().map(subject_arg).transpose()?,
                implicit,
                role: members.clone(),
            };
            let response = client
                .list_roles(request.clone())
                .await
                .map_err(ClientError::from)?
                .into_inner();

            if request.role.is_some() {
                let rows: Vec<MemberRow> = response
                    .members
                    .into_iter()
                    .map(|member| MemberRow { member })
                    .collect();
                return output::print_list(&rows, format);
            }
            if request.subject.is_some() {
                return output::print_list(&role_rows(response.roles), format);
            }

            match format {
                OutputFormat::Table => {
                    output::print_header("Roles");
                    output::print_list(&role_rows(response.roles), format)?;
                    output::print_header("Inheritance");
                    let edges: Vec<EdgeRow> = response
                        .edges
                        .into_iter()
                        .map(|e| EdgeRow { child: e.child, parent: e.parent })
                        .collect();
                    output::print_list(&edges, format)?;
                }
                _ => output::print_item(&response, format)?,
            }
        }

        RoleCommands::Assign { user_id, role } => {
            let what = format!("assign {} to u:{}", role, user_id);
            let changed = client
                .assign_role(RoleAssignmentRequest { user_id, role })
                .await
                .map_err(ClientError::from)?
                .into_inner()
                .changed;
            output::print_mutation(&what, changed, format)?;
        }

        RoleCommands::Revoke { user_id, role } => {
            let what = format!("revoke {} from u:{}", role, user_id);
            let changed = client
                .revoke_role(RoleAssignmentRequest { user_id, role })
                .await
                .map_err(ClientError::from)?
                .into_inner()
                .changed;
            output::print_mutation(&what, changed, format)?;
        }

        RoleCommands::Inherit { child, parent } => {
            let request = RoleEdgeRequest {
                child: subject_arg(&child)?,
                parent: subject_arg(&parent)?,
            };
            let what = format!("{} inherits {}", request.child, request.parent);
            let changed = client
                .add_role_edge(request)
                .await
                .map_err(ClientError::from)?
                .into_inner()
                .changed;
            output::print_mutation(&what, changed, format)?;
        }

        RoleCommands::Disinherit { child, parent } => {
            let request = RoleEdgeRequest {
                child: subject_arg(&child)?,
                parent: subject_arg(&parent)?,
            };
            let what = format!("{} no longer inherits {}", request.child, request.parent);
            let changed = client
                .remove_role_edge(request)
                .await
                .map_err(ClientError::from)?
                .into_inner()
                .changed;
            output::print_mutation(&what, changed, format)?;
        }
    }

    Ok(())
}
