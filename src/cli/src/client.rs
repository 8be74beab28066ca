//! gRPC client for the Wordhoard policy admin API.

use std::time::Duration;
use tonic::metadata::errors::InvalidMetadataValue;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, MetadataMap};
use tonic::service::interceptor::InterceptedService;
use tonic::service::Interceptor;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};

use wordhoard_authz::api::proto::policy_admin_client::PolicyAdminClient;
use wordhoard_authz::error::{APPLIED_METADATA, ERROR_CODE_METADATA};

/// Failure of a CLI → server call.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid server address {0}: {1}")]
    InvalidAddress(String, String),

    #[error("failed to connect to {0}: {1}")]
    Connect(String, #[source] tonic::transport::Error),

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("{}", describe(.code, .error_code, .message, .applied))]
    Rpc {
        code: tonic::Code,
        error_code: Option<String>,
        message: String,
        applied: Option<bool>,
    },
}

fn describe(
    code: &tonic::Code,
    error_code: &Option<String>,
    message: &str,
    applied: &Option<bool>,
) -> String {
    let label = error_code
        .clone()
        .unwrap_or_else(|| format!("{:?}", code));
    match applied {
        Some(true) => format!(
            "{}: {} (the change is live but was not saved; run `wordhoard policy persist`)",
            label, message
        ),
        Some(false) => format!("{}: {} (nothing changed)", label, message),
        None => format!("{}: {}", label, message),
    }
}

fn metadata_str(metadata: &MetadataMap, key: &str) -> Option<String> {
    metadata
        .get(key)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

impl From<Status> for ClientError {
    fn from(status: Status) -> Self {
        let metadata = status.metadata();
        Self::Rpc {
            code: status.code(),
            error_code: metadata_str(metadata, ERROR_CODE_METADATA),
            applied: metadata_str(metadata, APPLIED_METADATA).map(|v| v == "true"),
            message: status.message().to_string(),
        }
    }
}

/// Who the CLI calls as.
#[derive(Debug, Clone, Default)]
pub enum Credential {
    #[default]
    Anonymous,
    /// Trusted identity header, for deployments behind an authenticating proxy
    UserId { header: String, user_id: u64 },
    /// `authorization: Bearer <token>`
    Bearer(String),
}

/// Attaches the credential to every outgoing call.
#[derive(Debug, Clone)]
pub struct CredentialInterceptor {
    entry: Option<(AsciiMetadataKey, AsciiMetadataValue)>,
}

impl CredentialInterceptor {
    fn new(credential: &Credential) -> Result<Self, ClientError> {
        let entry = match credential {
            Credential::Anonymous => None,
            Credential::UserId { header, user_id } => {
                let key = AsciiMetadataKey::from_bytes(header.to_ascii_lowercase().as_bytes())
                    .map_err(|e| ClientError::InvalidCredential(e.to_string()))?;
                Some((key, ascii_value(user_id.to_string())?))
            }
            Credential::Bearer(token) => Some((
                AsciiMetadataKey::from_static("authorization"),
                ascii_value(format!("Bearer {}", token))?,
            )),
        };
        Ok(Self { entry })
    }
}

fn ascii_value(raw: String) -> Result<AsciiMetadataValue, ClientError> {
    raw.parse()
        .map_err(|e: InvalidMetadataValue| ClientError::InvalidCredential(e.to_string()))
}

impl Interceptor for CredentialInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        if let Some((key, value)) = &self.entry {
            request.metadata_mut().insert(key.clone(), value.clone());
        }
        Ok(request)
    }
}

pub type AdminClient = PolicyAdminClient<InterceptedService<Channel, CredentialInterceptor>>;

/// Connect to the admin API at `server`.
pub async fn connect(server: &str, credential: &Credential) -> Result<AdminClient, ClientError> {
    let endpoint = Endpoint::from_shared(server.to_string())
        .map_err(|e| ClientError::InvalidAddress(server.to_string(), e.to_string()))?
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(30));

    let channel = endpoint
        .connect()
        .await
        .map_err(|e| ClientError::Connect(server.to_string(), e))?;

    let interceptor = CredentialInterceptor::new(credential)?;
    Ok(PolicyAdminClient::with_interceptor(channel, interceptor))
}
