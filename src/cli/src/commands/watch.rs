//! `wordhoard watch`: follow policy changes as they happen.

use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::*;
use wordhoard_authz::api::proto::{PolicyChange, WatchPolicyChangesRequest};

use crate::client::{AdminClient, ClientError};
use crate::output::{self, OutputFormat};

fn describe(change: &PolicyChange) -> String {
    let when = DateTime::<Utc>::from_timestamp_millis(change.timestamp_ms)
        .map(|t| t.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| "-".to_string());

    let detail = match (&change.policy, &change.edge) {
        (Some(p), _) => format!("{} {}:{}", p.subject, p.resource, p.action),
        (None, Some(e)) => format!("{} -> {}", e.child, e.parent),
        (None, None) => String::new(),
    };

    let mut line = format!("{} {:<18} {}", when.dimmed(), change.kind.bold(), detail);
    if !change.persisted {
        line.push_str(&format!(" {}", "(not persisted)".yellow()));
    }
    line
}

pub async fn execute(client: &mut AdminClient, format: OutputFormat) -> Result<()> {
    let mut stream = client
        .watch_policy_changes(WatchPolicyChangesRequest {})
        .await
        .map_err(ClientError::from)?
        .into_inner();

    if format == OutputFormat::Table {
        output::print_info("Watching policy changes (Ctrl+C to stop)");
    }

    while let Some(change) = stream.message().await.map_err(ClientError::from)? {
        output::print_event(&describe(&change), &change, format)?;
    }

    if format == OutputFormat::Table {
        output::print_info("Server closed the stream");
    }
    Ok(())
}
