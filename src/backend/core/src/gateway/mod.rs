//! Authorization gateway: request-time enforcement in front of the RPC handlers.
//!
//! - **Methods**: operation → `(resource, action)` table plus whitelist
//! - **Identity**: where the caller's user id comes from
//! - **Interceptor**: the per-request proceed / reject decision
//! - **Layer**: `tower` plumbing applying it to every gRPC call

pub mod identity;
pub mod interceptor;
pub mod layer;
pub mod methods;

pub use identity::{
    resolver_from_config, CallerIdentity, IdentityResolver, JwtResolver, TrustedHeaderResolver,
};
pub use interceptor::{AuthorizationContext, AuthorizationGateway, GatewayOutcome, UnmappedPolicy};
pub use layer::{AuthorizationLayer, AuthorizationService};
pub use methods::{MethodPermissionMap, MethodRequirement};
