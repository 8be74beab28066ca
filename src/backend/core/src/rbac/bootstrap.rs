//! Built-in roles and the startup bootstrapper.
//!
//! wordhoard ships with three roles:
//!
//! | Role              | Inherits          | Description                               |
//! |-------------------|-------------------|-------------------------------------------|
//! | `admin`           | `content_manager` | Full access, bypasses per-resource checks |
//! | `content_manager` | `user`            | Manage courses, words and questions       |
//! | `user`            |                   | Learn: read content, track own progress   |
//!
//! The bootstrapper seeds the role edges and baseline tuples of a
//! [`PolicyCatalog`] into the engine, skipping anything already present.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use super::engine::PolicyEngine;
use super::models::{PolicyRule, RoleEdge, Subject};
use crate::error::{AuthzError, ErrorCode, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Built-in roles
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinRole {
    Admin,
    ContentManager,
    User,
}

impl BuiltinRole {
    pub fn id(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::ContentManager => "content_manager",
            Self::User => "user",
        }
    }

    /// The role this one inherits from, if any.
    pub fn parent(&self) -> Option<BuiltinRole> {
        match self {
            Self::Admin => Some(Self::ContentManager),
            Self::ContentManager => Some(Self::User),
            Self::User => None,
        }
    }

    /// Directly granted `(resource, action)` pairs.
    pub fn permissions(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            // Covered by the admin short-circuit for users; the tuple makes
            // the role itself pass checks too.
            Self::Admin => &[("*", "*")],
            Self::ContentManager => &[
                ("course", "*"),
                ("word", "*"),
                ("question", "*"),
                ("user", "read"),
            ],
            Self::User => &[
                ("course", "read"),
                ("word", "read"),
                ("question", "read"),
                ("question", "answer"),
                ("progress", "read"),
                ("progress", "update"),
                ("profile", "read"),
                ("profile", "update"),
            ],
        }
    }

    pub fn subject(&self) -> Subject {
        Subject::role(self.id())
    }

    pub fn all() -> Vec<BuiltinRole> {
        vec![Self::Admin, Self::ContentManager, Self::User]
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Catalog
// ═══════════════════════════════════════════════════════════════════════════════

/// `child` inherits from `parent`; both are role names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEdge {
    pub child: String,
    pub parent: String,
}

/// The role edges and baseline tuples seeded at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyCatalog {
    #[serde(default)]
    pub inherits: Vec<CatalogEdge>,
    #[serde(default)]
    pub policies: Vec<PolicyRule>,
}

impl PolicyCatalog {
    /// The built-in three-role catalog.
    pub fn builtin() -> Self {
        let inherits = BuiltinRole::all()
            .into_iter()
            .filter_map(|role| {
                role.parent().map(|parent| CatalogEdge {
                    child: role.id().to_string(),
                    parent: parent.id().to_string(),
                })
            })
            .collect();

        let policies = BuiltinRole::all()
            .into_iter()
            .flat_map(|role| {
                role.permissions()
                    .iter()
                    .map(move |(resource, action)| PolicyRule::new(role.subject(), *resource, *action))
            })
            .collect();

        Self { inherits, policies }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let catalog: Self = toml::from_str(raw)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AuthzError::with_internal(
                ErrorCode::ConfigurationError,
                "Policy catalog could not be read",
                format!("{}: {}", path.display(), e),
            )
            .with_source(e)
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        for edge in &self.inherits {
            let child = Subject::role(&edge.child);
            let parent = Subject::role(&edge.parent);
            RoleEdge::new(child, parent).validate()?;
        }
        for rule in &self.policies {
            rule.validate()?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Bootstrapper
// ═══════════════════════════════════════════════════════════════════════════════

/// Counts from one bootstrap run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub edges_added: usize,
    pub edges_present: usize,
    pub policies_added: usize,
    pub policies_present: usize,
}

impl BootstrapReport {
    /// Whether the run changed nothing.
    pub fn is_noop(&self) -> bool {
        self.edges_added == 0 && self.policies_added == 0
    }
}

/// Brings an engine to the catalog baseline.
///
/// Runs before request serving starts. Existence is checked before every
/// write so repeated runs cause no store saves.
#[derive(Debug, Clone)]
pub struct Bootstrapper {
    catalog: PolicyCatalog,
}

impl Bootstrapper {
    pub fn new(catalog: PolicyCatalog) -> Self {
        Self { catalog }
    }

    pub fn builtin() -> Self {
        Self::new(PolicyCatalog::builtin())
    }

    pub fn catalog(&self) -> &PolicyCatalog {
        &self.catalog
    }

    /// Seed the catalog. The first error aborts the run.
    pub async fn run(&self, engine: &PolicyEngine) -> Result<BootstrapReport> {
        let mut report = BootstrapReport::default();

        for edge in &self.catalog.inherits {
            let child = Subject::role(&edge.child);
            let parent = Subject::role(&edge.parent);

            let present = engine
                .has_role(&child, &parent)
                .await
                .map_err(|e| abort("role edge check", &format!("{} -> {}", child, parent), e))?;
            if present {
                debug!(%child, %parent, "Role edge already present");
                report.edges_present += 1;
                continue;
            }

            engine
                .add_role_edge(child.clone(), parent.clone())
                .await
                .map_err(|e| abort("add role edge", &format!("{} -> {}", child, parent), e))?;
            info!(%child, %parent, "Seeded role edge");
            report.edges_added += 1;
        }

        for rule in &self.catalog.policies {
            let existing = engine
                .permissions_of(&rule.subject)
                .await
                .map_err(|e| abort("policy check", &rule.to_string(), e))?;
            if existing.iter().any(|r| r == rule) {
                debug!(%rule, "Policy already present");
                report.policies_present += 1;
                continue;
            }

            engine
                .add_policy(rule.clone())
                .await
                .map_err(|e| abort("add policy", &rule.to_string(), e))?;
            info!(%rule, "Seeded policy");
            report.policies_added += 1;
        }

        info!(
            edges_added = report.edges_added,
            edges_present = report.edges_present,
            policies_added = report.policies_added,
            policies_present = report.policies_present,
            "Policy bootstrap complete"
        );
        Ok(report)
    }
}

fn abort(step: &'static str, item: &str, cause: AuthzError) -> AuthzError {
    AuthzError::with_internal(
        ErrorCode::BootstrapFailed,
        "Policy bootstrap failed",
        format!("{} failed for {}: {}", step, item, cause),
    )
    .with_context("step", step)
    .with_context("item", item)
    .with_source(cause)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
