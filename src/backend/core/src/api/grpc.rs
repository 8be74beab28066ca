//! gRPC implementation of the `PolicyAdmin` service defined in wordhoard.proto.

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{AuthzError, ErrorCode, Result};
use crate::gateway::{AuthorizationContext, AuthorizationLayer};
use crate::rbac::{PolicyEngine, PolicyEvent, PolicyRule, RoleEdge, Subject};

// Include the generated protobuf code
pub mod proto {
    tonic::include_proto!("wordhoard.v1");
}

use proto::policy_admin_server::{PolicyAdmin, PolicyAdminServer};
use proto::*;

// ═══════════════════════════════════════════════════════════════════════════════
// Type Conversions
// ═══════════════════════════════════════════════════════════════════════════════

fn to_proto_tuple(rule: &PolicyRule) -> PolicyTuple {
    let [subject, resource, action] = rule.to_triple();
    PolicyTuple {
        subject,
        resource,
        action,
    }
}

fn from_proto_tuple(tuple: Option<PolicyTuple>) -> std::result::Result<PolicyRule, Status> {
    let tuple = tuple.ok_or_else(|| Status::invalid_argument("policy is required"))?;
    Ok(PolicyRule::parse(&tuple.subject, &tuple.resource, &tuple.action)?)
}

fn to_proto_edge(edge: &RoleEdge) -> proto::RoleEdge {
    proto::RoleEdge {
        child: edge.child.to_string(),
        parent: edge.parent.to_string(),
    }
}

fn to_proto_change(event: &PolicyEvent) -> PolicyChange {
    let (policy, edge, persisted) = match event {
        PolicyEvent::PolicyAdded { rule, persisted }
        | PolicyEvent::PolicyRemoved { rule, persisted } => {
            (Some(to_proto_tuple(rule)), None, *persisted)
        }
        PolicyEvent::RoleEdgeAdded { edge, persisted }
        | PolicyEvent::RoleEdgeRemoved { edge, persisted } => {
            (None, Some(to_proto_edge(edge)), *persisted)
        }
        PolicyEvent::Reloaded { .. } => (None, None, true),
    };

    PolicyChange {
        kind: event.kind().to_string(),
        policy,
        edge,
        persisted,
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
    }
}

fn parse_subject(raw: &str) -> std::result::Result<Subject, Status> {
    Ok(Subject::parse(raw)?)
}

fn role_names(subjects: Vec<Subject>) -> Vec<String> {
    subjects
        .into_iter()
        .filter_map(|s| s.role_name().map(str::to_string))
        .collect()
}

/// User id the gateway authorized this call for, if any.
fn caller<T>(request: &Request<T>) -> Option<u64> {
    request
        .extensions()
        .get::<AuthorizationContext>()
        .and_then(|ctx| ctx.caller)
        .map(|c| c.user_id)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Admin API over a shared [`PolicyEngine`].
#[derive(Debug, Clone)]
pub struct PolicyAdminService {
    engine: Arc<PolicyEngine>,
}

impl PolicyAdminService {
    pub fn new(engine: Arc<PolicyEngine>) -> Self {
        Self { engine }
    }

    fn mutation(changed: bool) -> Response<MutationResponse> {
        Response::new(MutationResponse { changed })
    }
}

#[tonic::async_trait]
impl PolicyAdmin for PolicyAdminService {
    async fn check(
        &self,
        request: Request<CheckRequest>,
    ) -> std::result::Result<Response<CheckResponse>, Status> {
        let req = request.into_inner();
        let subject = parse_subject(&req.subject)?;
        let allowed = self
            .engine
            .check(&subject, &req.resource, &req.action)
            .await?;
        Ok(Response::new(CheckResponse { allowed }))
    }

    async fn list_policies(
        &self,
        request: Request<ListPoliciesRequest>,
    ) -> std::result::Result<Response<ListPoliciesResponse>, Status> {
        let req = request.into_inner();
        let rules = match (req.subject.as_deref(), req.implicit) {
            (None, false) => self.engine.policies().await,
            (None, true) => {
                return Err(Status::invalid_argument("implicit listing requires a subject"));
            }
            (Some(raw), false) => self.engine.permissions_of(&parse_subject(raw)?).await?,
            (Some(raw), true) => {
                self.engine
                    .implicit_permissions_of(&parse_subject(raw)?)
                    .await?
            }
        };

        Ok(Response::new(ListPoliciesResponse {
            policies: rules.iter().map(to_proto_tuple).collect(),
        }))
    }

    async fn add_policy(
        &self,
        request: Request<PolicyRequest>,
    ) -> std::result::Result<Response<MutationResponse>, Status> {
        let by = caller(&request);
        let rule = from_proto_tuple(request.into_inner().policy)?;
        info!(caller = ?by, %rule, "AddPolicy");
        Ok(Self::mutation(self.engine.add_policy(rule).await?))
    }

    async fn remove_policy(
        &self,
        request: Request<PolicyRequest>,
    ) -> std::result::Result<Response<MutationResponse>, Status> {
        let by = caller(&request);
        let rule = from_proto_tuple(request.into_inner().policy)?;
        info!(caller = ?by, %rule, "RemovePolicy");
        Ok(Self::mutation(self.engine.remove_policy(rule).await?))
    }

    async fn add_role_edge(
        &self,
        request: Request<RoleEdgeRequest>,
    ) -> std::result::Result<Response<MutationResponse>, Status> {
        let by = caller(&request);
        let req = request.into_inner();
        let (child, parent) = (parse_subject(&req.child)?, parse_subject(&req.parent)?);
        info!(caller = ?by, %child, %parent, "AddRoleEdge");
        Ok(Self::mutation(self.engine.add_role_edge(child, parent).await?))
    }

    async fn remove_role_edge(
        &self,
        request: Request<RoleEdgeRequest>,
    ) -> std::result::Result<Response<MutationResponse>, Status> {
        let by = caller(&request);
        let req = request.into_inner();
        let (child, parent) = (parse_subject(&req.child)?, parse_subject(&req.parent)?);
        info!(caller = ?by, %child, %parent, "RemoveRoleEdge");
        Ok(Self::mutation(
            self.engine.remove_role_edge(child, parent).await?,
        ))
    }

    async fn assign_role(
        &self,
        request: Request<RoleAssignmentRequest>,
    ) -> std::result::Result<Response<MutationResponse>, Status> {
        let by = caller(&request);
        let req = request.into_inner();
        info!(caller = ?by, user_id = req.user_id, role = %req.role, "AssignRole");
        Ok(Self::mutation(
            self.engine.assign_role(req.user_id, &req.role).await?,
        ))
    }

    async fn revoke_role(
        &self,
        request: Request<RoleAssignmentRequest>,
    ) -> std::result::Result<Response<MutationResponse>, Status> {
        let by = caller(&request);
        let req = request.into_inner();
        info!(caller = ?by, user_id = req.user_id, role = %req.role, "RevokeRole");
        Ok(Self::mutation(
            self.engine.revoke_role(req.user_id, &req.role).await?,
        ))
    }

    async fn list_roles(
        &self,
        request: Request<ListRolesRequest>,
    ) -> std::result::Result<Response<ListRolesResponse>, Status> {
        let req = request.into_inner();
        let mut response = ListRolesResponse::default();

        if let Some(raw) = req.subject.as_deref() {
            let subject = parse_subject(raw)?;
            let roles = if req.implicit {
                self.engine.implicit_roles_of(&subject).await?
            } else {
                self.engine.roles_of(&subject).await?
            };
            response.roles = role_names(roles);
        }

        if let Some(role) = req.role.as_deref() {
            response.members = self
                .engine
                .subjects_of(&Subject::role(role))
                .await?
                .iter()
                .map(|s| s.to_string())
                .collect();
        }

        if req.subject.is_none() && req.role.is_none() {
            response.roles = self.engine.roles().await;
            response.edges = self.engine.role_edges().await.iter().map(to_proto_edge).collect();
        }

        Ok(Response::new(response))
    }

    async fn persist(
        &self,
        request: Request<PersistRequest>,
    ) -> std::result::Result<Response<PersistResponse>, Status> {
        let by = caller(&request);
        info!(caller = ?by, "Persist");
        self.engine.persist().await?;

        Ok(Response::new(PersistResponse {
            rules: self.engine.policies().await.len() as u32,
            role_edges: self.engine.role_edges().await.len() as u32,
        }))
    }

    type WatchPolicyChangesStream =
        Pin<Box<dyn Stream<Item = std::result::Result<PolicyChange, Status>> + Send>>;

    async fn watch_policy_changes(
        &self,
        request: Request<WatchPolicyChangesRequest>,
    ) -> std::result::Result<Response<Self::WatchPolicyChangesStream>, Status> {
        let by = caller(&request);
        let rx = self.engine.subscribe();

        let stream = BroadcastStream::new(rx).filter_map(|result| match result {
            Ok(event) => Some(Ok(to_proto_change(&event))),
            Err(lagged) => {
                warn!(error = %lagged, "Policy change watcher lagged, events dropped");
                None
            }
        });

        info!(caller = ?by, "Client subscribed to policy changes");
        Ok(Response::new(Box::pin(stream)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Server
// ═══════════════════════════════════════════════════════════════════════════════

/// Serve the admin API behind the authorization layer until `shutdown`
/// resolves.
pub async fn start_grpc_server(
    config: &ServerConfig,
    addr: std::net::SocketAddr,
    engine: Arc<PolicyEngine>,
    layer: AuthorizationLayer,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let service = PolicyAdminServer::new(PolicyAdminService::new(engine))
        .max_decoding_message_size(config.max_message_bytes)
        .max_encoding_message_size(config.max_message_bytes);

    info!(addr = %addr, "Starting wordhoard gRPC server");

    tonic::transport::Server::builder()
        .http2_keepalive_interval(Some(Duration::from_secs(config.keepalive_secs)))
        .layer(layer)
        .add_service(service)
        .serve_with_shutdown(addr, shutdown)
        .await
        .map_err(|e| {
            AuthzError::with_internal(
                ErrorCode::InternalError,
                "gRPC server failed",
                e.to_string(),
            )
            .with_source(e)
        })?;

    info!("gRPC server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::rbac::MemoryStore;

    async fn service_with(store: Arc<MemoryStore>) -> PolicyAdminService {
        let engine = PolicyEngine::load(store, &EngineConfig::default())
            .await
            .unwrap();
        PolicyAdminService::new(Arc::new(engine))
    }

    async fn service() -> PolicyAdminService {
        service_with(Arc::new(MemoryStore::new())).await
    }

    fn tuple(subject: &str, resource: &str, action: &str) -> PolicyTuple {
        PolicyTuple {
            subject: subject.into(),
            resource: resource.into(),
            action: action.into(),
        }
    }

    #[tokio::test]
    async fn test_add_policy_then_check() {
        let svc = service().await;

        let added = svc
            .add_policy(Request::new(PolicyRequest {
                policy: Some(tuple("r:user", "course", "read")),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(added.changed);

        svc.assign_role(Request::new(RoleAssignmentRequest {
            user_id: 42,
            role: "user".into(),
        }))
        .await
        .unwrap();

        let check = |action: &str| CheckRequest {
            subject: "u:42".into(),
            resource: "course".into(),
            action: action.into(),
        };
        assert!(svc.check(Request::new(check("read"))).await.unwrap().into_inner().allowed);
        assert!(!svc.check(Request::new(check("delete"))).await.unwrap().into_inner().allowed);
    }

    #[tokio::test]
    async fn test_invalid_input_maps_to_invalid_argument() {
        let svc = service().await;

        let status = svc
            .add_policy(Request::new(PolicyRequest {
                policy: Some(tuple("user", "course", "read")),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status = svc
            .add_policy(Request::new(PolicyRequest { policy: None }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status = svc
            .list_policies(Request::new(ListPoliciesRequest {
                subject: None,
                implicit: true,
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_list_roles_views() {
        let svc = service().await;
        svc.add_role_edge(Request::new(RoleEdgeRequest {
            child: "r:content_manager".into(),
            parent: "r:user".into(),
        }))
        .await
        .unwrap();
        svc.assign_role(Request::new(RoleAssignmentRequest {
            user_id: 3,
            role: "content_manager".into(),
        }))
        .await
        .unwrap();

        let all = svc
            .list_roles(Request::new(ListRolesRequest::default()))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(all.roles, vec!["content_manager", "user"]);
        assert_eq!(all.edges.len(), 2);

        let implicit = svc
            .list_roles(Request::new(ListRolesRequest {
                subject: Some("u:3".into()),
                implicit: true,
                role: None,
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(implicit.roles, vec!["content_manager", "user"]);

        let members = svc
            .list_roles(Request::new(ListRolesRequest {
                subject: None,
                implicit: false,
                role: Some("user".into()),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(members.members, vec!["r:content_manager"]);
    }

    #[tokio::test]
    async fn test_persist_recovers_unsaved_change() {
        let store = Arc::new(MemoryStore::new());
        let svc = service_with(store.clone()).await;
        let request = || {
            Request::new(PolicyRequest {
                policy: Some(tuple("r:user", "word", "read")),
            })
        };

        store.set_fail_saves(true);
        let status = svc.add_policy(request()).await.unwrap_err();
        assert_eq!(
            status
                .metadata()
                .get(crate::error::ERROR_CODE_METADATA)
                .and_then(|v| v.to_str().ok()),
            Some("PersistUnconfirmed")
        );

        // Resending the mutation is a no-op and saves nothing.
        store.set_fail_saves(false);
        assert!(!svc.add_policy(request()).await.unwrap().into_inner().changed);
        assert!(store.snapshot().is_empty());

        let persisted = svc
            .persist(Request::new(PersistRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(persisted.rules, 1);
        assert_eq!(persisted.role_edges, 0);
        assert_eq!(store.snapshot().rules.len(), 1);
    }

    #[tokio::test]
    async fn test_persist_failure_is_unavailable() {
        let store = Arc::new(MemoryStore::new());
        let svc = service_with(store.clone()).await;

        store.set_fail_saves(true);
        let status = svc.persist(Request::new(PersistRequest {})).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }

    #[tokio::test]
    async fn test_watch_streams_changes() {
        let svc = service().await;
        let mut stream = svc
            .watch_policy_changes(Request::new(WatchPolicyChangesRequest {}))
            .await
            .unwrap()
            .into_inner();

        svc.add_policy(Request::new(PolicyRequest {
            policy: Some(tuple("r:user", "word", "read")),
        }))
        .await
        .unwrap();

        let change = stream.next().await.unwrap().unwrap();
        assert_eq!(change.kind, "policy_added");
        assert!(change.persisted);
        assert_eq!(change.policy, Some(tuple("r:user", "word", "read")));
    }
}
