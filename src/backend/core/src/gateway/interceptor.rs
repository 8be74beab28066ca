//! Per-request authorization procedure.

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::identity::CallerIdentity;
use super::methods::{MethodPermissionMap, MethodRequirement};
use crate::error::{AuthzError, ErrorCode, Result};
use crate::observability::metrics::GATEWAY_REQUESTS;
use crate::rbac::{Permission, PolicyEngine, Subject};

/// Treatment of operations that are neither whitelisted nor mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmappedPolicy {
    /// Proceed with a warning.
    #[default]
    FailOpen,
    /// Reject as permission denied.
    FailClosed,
}

/// Why a request was allowed to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    Whitelisted,
    Allowed,
    UnmappedAllowed,
}

impl GatewayOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Whitelisted => "whitelisted",
            Self::Allowed => "allowed",
            Self::UnmappedAllowed => "unmapped_allowed",
        }
    }
}

/// Inserted into request extensions for downstream handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationContext {
    pub operation: String,
    pub caller: Option<CallerIdentity>,
    pub permission: Option<Permission>,
    pub outcome: GatewayOutcome,
}

/// Decides proceed / unauthenticated / forbidden / internal for each call.
#[derive(Debug)]
pub struct AuthorizationGateway {
    engine: Arc<PolicyEngine>,
    methods: Arc<MethodPermissionMap>,
    unmapped: UnmappedPolicy,
}

impl AuthorizationGateway {
    pub fn new(
        engine: Arc<PolicyEngine>,
        methods: MethodPermissionMap,
        unmapped: UnmappedPolicy,
    ) -> Self {
        Self {
            engine,
            methods: Arc::new(methods),
            unmapped,
        }
    }

    pub fn methods(&self) -> &MethodPermissionMap {
        &self.methods
    }

    pub fn unmapped_policy(&self) -> UnmappedPolicy {
        self.unmapped
    }

    /// Run the procedure for one call.
    ///
    /// Errors carry `Unauthenticated`, `PermissionDenied` or `InternalError`.
    pub async fn authorize(
        &self,
        operation: &str,
        caller: Option<CallerIdentity>,
    ) -> Result<AuthorizationContext> {
        let result = self.decide(operation, caller).await;

        let label = match &result {
            Ok(ctx) => ctx.outcome.as_str(),
            Err(e) => match e.code() {
                ErrorCode::Unauthenticated => "unauthenticated",
                ErrorCode::PermissionDenied => "denied",
                _ => "error",
            },
        };
        counter!(GATEWAY_REQUESTS, "outcome" => label).increment(1);

        result
    }

    async fn decide(
        &self,
        operation: &str,
        caller: Option<CallerIdentity>,
    ) -> Result<AuthorizationContext> {
        let permission = match self.methods.lookup(operation) {
            MethodRequirement::Whitelisted => {
                debug!(operation, "Whitelisted operation");
                return Ok(context(operation, caller, None, GatewayOutcome::Whitelisted));
            }
            MethodRequirement::Requires(permission) => Some(permission.clone()),
            MethodRequirement::Unmapped => None,
        };

        let Some(identity) = caller else {
            warn!(operation, "Request without caller identity");
            return Err(AuthzError::unauthenticated("Caller identity is required")
                .with_context("operation", operation));
        };

        let Some(permission) = permission else {
            return match self.unmapped {
                UnmappedPolicy::FailOpen => {
                    warn!(
                        operation,
                        user_id = identity.user_id,
                        "No permission mapped for operation, allowing"
                    );
                    Ok(context(operation, caller, None, GatewayOutcome::UnmappedAllowed))
                }
                UnmappedPolicy::FailClosed => {
                    warn!(
                        operation,
                        user_id = identity.user_id,
                        "No permission mapped for operation, rejecting"
                    );
                    Err(AuthzError::permission_denied("Operation is not permitted")
                        .with_context("operation", operation))
                }
            };
        };

        let subject = Subject::user(identity.user_id);
        let allowed = self
            .engine
            .check(&subject, &permission.resource, &permission.action)
            .await
            .map_err(|e| {
                AuthzError::with_internal(
                    ErrorCode::InternalError,
                    "Authorization check failed",
                    format!("{} on {}: {}", subject, operation, e),
                )
                .with_source(e)
            })?;

        if !allowed {
            return Err(AuthzError::permission_denied(format!(
                "Permission {} is required",
                permission
            ))
            .with_context("operation", operation));
        }

        Ok(context(
            operation,
            caller,
            Some(permission),
            GatewayOutcome::Allowed,
        ))
    }
}

fn context(
    operation: &str,
    caller: Option<CallerIdentity>,
    permission: Option<Permission>,
    outcome: GatewayOutcome,
) -> AuthorizationContext {
    AuthorizationContext {
        operation: operation.to_string(),
        caller,
        permission,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::rbac::{Bootstrapper, MemoryStore, PolicyRule};

    const LIST_COURSES: &str = "/wordhoard.v1.CourseService/ListCourses";
    const DELETE_COURSE: &str = "/wordhoard.v1.CourseService/DeleteCourse";
    const UNMAPPED: &str = "/wordhoard.v1.CourseService/ArchiveCourse";

    async fn gateway(unmapped: UnmappedPolicy) -> AuthorizationGateway {
        let engine = PolicyEngine::load(Arc::new(MemoryStore::new()), &EngineConfig::default())
            .await
            .unwrap();
        Bootstrapper::builtin().run(&engine).await.unwrap();
        engine.assign_role(42, "user").await.unwrap();
        engine.assign_role(1, "admin").await.unwrap();

        AuthorizationGateway::new(
            Arc::new(engine),
            MethodPermissionMap::with_defaults().unwrap(),
            unmapped,
        )
    }

    #[tokio::test]
    async fn test_allow_and_deny() {
        let gw = gateway(UnmappedPolicy::FailOpen).await;
        let caller = Some(CallerIdentity::new(42));

        let ctx = gw.authorize(LIST_COURSES, caller).await.unwrap();
        assert_eq!(ctx.outcome, GatewayOutcome::Allowed);
        assert_eq!(ctx.permission, Some(Permission::new("course", "read")));

        let err = gw.authorize(DELETE_COURSE, caller).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PermissionDenied);

        let admin = Some(CallerIdentity::new(1));
        assert!(gw.authorize(DELETE_COURSE, admin).await.is_ok());
    }

    #[tokio::test]
    async fn test_whitelist_skips_identity() {
        let gw = gateway(UnmappedPolicy::FailClosed).await;
        let ctx = gw
            .authorize("/grpc.health.v1.Health/Check", None)
            .await
            .unwrap();
        assert_eq!(ctx.outcome, GatewayOutcome::Whitelisted);
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthenticated() {
        let gw = gateway(UnmappedPolicy::FailOpen).await;
        let err = gw.authorize(LIST_COURSES, None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unauthenticated);

        // Also for unmapped operations.
        let err = gw.authorize(UNMAPPED, None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unauthenticated);
    }

    #[tokio::test]
    async fn test_unmapped_policy() {
        let caller = Some(CallerIdentity::new(42));

        let open = gateway(UnmappedPolicy::FailOpen).await;
        let ctx = open.authorize(UNMAPPED, caller).await.unwrap();
        assert_eq!(ctx.outcome, GatewayOutcome::UnmappedAllowed);
        assert_eq!(ctx.permission, None);

        let closed = gateway(UnmappedPolicy::FailClosed).await;
        let err = closed.authorize(UNMAPPED, caller).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn test_engine_failure_is_internal() {
        let config = EngineConfig {
            max_hierarchy_depth: 1,
            ..EngineConfig::default()
        };
        let engine = PolicyEngine::load(Arc::new(MemoryStore::new()), &config)
            .await
            .unwrap();
        engine
            .add_role_edge(Subject::role("a"), Subject::role("b"))
            .await
            .unwrap();
        engine.assign_role(5, "a").await.unwrap();
        engine
            .add_policy(PolicyRule::parse("r:b", "course", "read").unwrap())
            .await
            .unwrap();

        let gw = AuthorizationGateway::new(
            Arc::new(engine),
            MethodPermissionMap::with_defaults().unwrap(),
            UnmappedPolicy::FailOpen,
        );
        let err = gw
            .authorize(LIST_COURSES, Some(CallerIdentity::new(5)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InternalError);
    }
}
