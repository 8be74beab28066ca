//! Subcommand implementations.

pub mod check;
pub mod config;
pub mod policy;
pub mod role;
pub mod watch;

use anyhow::Result;
use wordhoard_authz::rbac::Subject;

/// Accept `u:42`, `r:user`, a bare user id or a bare role name; send the
/// tagged form.
pub fn subject_arg(raw: &str) -> Result<String> {
    Ok(Subject::infer(raw)?.to_string())
}
