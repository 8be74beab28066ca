//! Role-based access control core.
//!
//! This module provides:
//! - **Models**: tagged subjects, permissions, policy tuples and role edges
//! - **Store**: load/save of the full policy state (memory, JSON file, PostgreSQL)
//! - **Engine**: the in-memory role graph and the allow/deny decision
//! - **Bootstrap**: the built-in roles and idempotent startup seeding
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wordhoard_authz::config::EngineConfig;
//! use wordhoard_authz::rbac::{Bootstrapper, MemoryStore, PolicyEngine, Subject};
//!
//! let engine = PolicyEngine::load(Arc::new(MemoryStore::new()), &EngineConfig::default()).await?;
//! Bootstrapper::builtin().run(&engine).await?;
//!
//! engine.assign_role(42, "user").await?;
//! assert!(engine.check(&Subject::user(42), "course", "read").await?);
//! ```

pub mod bootstrap;
pub mod engine;
pub mod models;
pub mod postgres;
pub mod store;

pub use bootstrap::{BootstrapReport, Bootstrapper, BuiltinRole, CatalogEdge, PolicyCatalog};
pub use engine::{PolicyEngine, PolicyEvent};
pub use models::{Permission, PolicyRule, RoleEdge, Subject, ADMIN_ROLE, WILDCARD};
pub use postgres::PostgresStore;
pub use store::{open_store, FileStore, MemoryStore, PolicySnapshot, PolicyStore};
