//! `wordhoard check`: ask the server for a decision.

use anyhow::Result;
use clap::Args;
use wordhoard_authz::api::proto::CheckRequest;

use super::subject_arg;
use crate::client::{AdminClient, ClientError};
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct CheckArgs {
    /// Subject (u:42, r:user, or a bare id / role name)
    subject: String,
    /// Resource, e.g. course
    resource: String,
    /// Action, e.g. read
    action: String,
}

pub async fn execute(args: CheckArgs, client: &mut AdminClient, format: OutputFormat) -> Result<()> {
    let request = CheckRequest {
        subject: subject_arg(&args.subject)?,
        resource: args.resource,
        action: args.action,
    };
    let allowed = client
        .check(request.clone())
        .await
        .map_err(ClientError::from)?
        .into_inner()
        .allowed;

    match format {
        OutputFormat::Table => println!(
            "{}  {} {}:{}",
            output::verdict(allowed),
            request.subject,
            request.resource,
            request.action
        ),
        _ => output::print_item(
            &serde_json::json!({
                "subject": request.subject,
                "resource": request.resource,
                "action": request.action,
                "allowed": allowed,
            }),
            format,
        )?,
    }
    Ok(())
}
