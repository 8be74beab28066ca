//! Tower layer running the authorization gateway in front of every gRPC call.
//!
//! The operation identifier is the request path, so unary and streaming
//! methods are handled alike. Rejections are returned as gRPC status
//! responses without reaching the inner service.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::body::BoxBody;
use tonic::codegen::http::{Request, Response};
use tower::{Layer, Service};

use super::identity::{CallerIdentity, IdentityResolver};
use super::interceptor::AuthorizationGateway;

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// Layer that wraps services with the authorization gateway.
///
/// # Example
///
/// ```rust,ignore
/// Server::builder()
///     .layer(AuthorizationLayer::new(gateway, resolver))
///     .add_service(PolicyAdminServer::new(admin))
///     .serve(addr)
///     .await?;
/// ```
#[derive(Clone)]
pub struct AuthorizationLayer {
    gateway: Arc<AuthorizationGateway>,
    resolver: Arc<dyn IdentityResolver>,
}

impl AuthorizationLayer {
    pub fn new(gateway: Arc<AuthorizationGateway>, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self { gateway, resolver }
    }
}

impl<S> Layer<S> for AuthorizationLayer {
    type Service = AuthorizationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthorizationService {
            inner,
            gateway: self.gateway.clone(),
            resolver: self.resolver.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Service
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct AuthorizationService<S> {
    inner: S,
    gateway: Arc<AuthorizationGateway>,
    resolver: Arc<dyn IdentityResolver>,
}

impl<S, B> Service<Request<B>> for AuthorizationService<S>
where
    S: Service<Request<B>, Response = Response<BoxBody>> + Clone + Send + 'static,
    S::Future: Send,
    B: Send + 'static,
{
    type Response = Response<BoxBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<B>) -> Self::Future {
        let gateway = self.gateway.clone();
        // Keep the instance that was polled ready; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let operation = request.uri().path().to_string();
        let caller = request
            .extensions()
            .get::<CallerIdentity>()
            .copied()
            .or_else(|| self.resolver.resolve(request.headers()));

        Box::pin(async move {
            match gateway.authorize(&operation, caller).await {
                Ok(ctx) => {
                    request.extensions_mut().insert(ctx);
                    inner.call(request).await
                }
                Err(e) => Ok(tonic::Status::from(e).to_http()),
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
