#![allow(clippy::result_large_err)]
//! # Wordhoard Authz
//!
//! Role-based access control for the Wordhoard learning platform.
//!
//! ## Architecture
//!
//! - **RBAC**: policy tuples, the role graph, and the decision procedure
//! - **Stores**: memory, JSON file, and PostgreSQL persistence of the policy set
//! - **Bootstrap**: idempotent seeding of the built-in role catalog
//! - **Gateway**: per-call enforcement in front of every gRPC method
//! - **API**: the `PolicyAdmin` gRPC service
//! - **Observability**: structured logging, OTLP tracing, Prometheus metrics

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod observability;
pub mod rbac;

pub use error::{AuthzError, ErrorCode, ErrorContext, ErrorSeverity, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{AuthzError, ErrorCode, ErrorContext, Result};
    pub use crate::gateway::{
        AuthorizationGateway, AuthorizationLayer, CallerIdentity, MethodPermissionMap,
        UnmappedPolicy,
    };
    pub use crate::rbac::{
        Bootstrapper, MemoryStore, Permission, PolicyEngine, PolicyEvent, PolicyRule,
        PolicyStore, RoleEdge, Subject,
    };
}
