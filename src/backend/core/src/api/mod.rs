//! RPC surface of the authorization core.
//!
//! The `PolicyAdmin` gRPC service exposes checks, policy and role
//! management, and a stream of policy changes. Every call passes through
//! the [`AuthorizationLayer`](crate::gateway::AuthorizationLayer) first.

pub mod grpc;

pub use grpc::{proto, start_grpc_server, PolicyAdminService};
