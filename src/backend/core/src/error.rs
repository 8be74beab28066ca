//! Error handling for the authorization core.
//!
//! This module provides:
//! - A single error type carrying a stable, machine-readable code
//! - User-safe messages kept apart from internal diagnostics
//! - gRPC status mapping for the request layer
//! - Error logging with tracing integration and an error counter
//!
//! # Usage
//!
//! ```rust,ignore
//! use wordhoard_authz::error::{AuthzError, Result, ErrorContext};
//!
//! fn load_catalog(path: &str) -> Result<String> {
//!     std::fs::read_to_string(path).context("Failed to read catalog file")
//! }
//! ```

use metrics::counter;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

/// A specialized Result type for authorization operations.
pub type Result<T> = std::result::Result<T, AuthzError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be matched on by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Policy model errors (1000-1099)
    InvalidSubject,
    InvalidPolicy,
    HierarchyTooDeep,

    // Store errors (2000-2099)
    StoreUnavailable,
    StoreLoadFailed,
    PersistUnconfirmed,
    SerializationError,

    // Authentication/Authorization (4000-4099)
    Unauthenticated,
    PermissionDenied,

    // Configuration and startup (5000-5099)
    ConfigurationError,
    BootstrapFailed,

    // Internal errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::InvalidSubject => 1000,
            Self::InvalidPolicy => 1001,
            Self::HierarchyTooDeep => 1002,

            Self::StoreUnavailable => 2000,
            Self::StoreLoadFailed => 2001,
            Self::PersistUnconfirmed => 2002,
            Self::SerializationError => 2003,

            Self::Unauthenticated => 4000,
            Self::PermissionDenied => 4001,

            Self::ConfigurationError => 5000,
            Self::BootstrapFailed => 5001,

            Self::InternalError => 9000,
        }
    }

    /// Get the gRPC status code for this error.
    pub const fn grpc_code(&self) -> tonic::Code {
        match self {
            Self::InvalidSubject | Self::InvalidPolicy => tonic::Code::InvalidArgument,
            Self::Unauthenticated => tonic::Code::Unauthenticated,
            Self::PermissionDenied => tonic::Code::PermissionDenied,
            Self::StoreUnavailable => tonic::Code::Unavailable,
            Self::HierarchyTooDeep
            | Self::StoreLoadFailed
            | Self::PersistUnconfirmed
            | Self::SerializationError
            | Self::ConfigurationError
            | Self::BootstrapFailed
            | Self::InternalError => tonic::Code::Internal,
        }
    }

    /// Check if a caller may reasonably retry the failed operation.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable | Self::PersistUnconfirmed)
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "policy",
            2000..=2099 => "store",
            4000..=4099 => "authorization",
            5000..=5099 => "configuration",
            _ => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors and expected rejections
    Low,
    /// Operational issues
    Medium,
    /// Failures that leave state unconfirmed or stop startup
    High,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::InvalidSubject
            | ErrorCode::InvalidPolicy
            | ErrorCode::Unauthenticated
            | ErrorCode::PermissionDenied => Self::Low,

            ErrorCode::HierarchyTooDeep
            | ErrorCode::StoreUnavailable
            | ErrorCode::SerializationError
            | ErrorCode::ConfigurationError => Self::Medium,

            ErrorCode::StoreLoadFailed
            | ErrorCode::PersistUnconfirmed
            | ErrorCode::BootstrapFailed
            | ErrorCode::InternalError => Self::High,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The error type for the authorization core.
///
/// A denied check is not an error; `PermissionDenied` only appears once the
/// gateway turns a `false` decision into a request rejection.
#[derive(Error, Debug)]
pub struct AuthzError {
    code: ErrorCode,

    /// Safe to expose to clients
    user_message: Cow<'static, str>,

    /// For logs only
    internal_message: Option<String>,

    context: HashMap<String, serde_json::Value>,

    /// Set on `PersistUnconfirmed`: the changed flag of the in-memory mutation
    /// that was applied before persistence failed.
    applied: Option<bool>,

    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for AuthzError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl AuthzError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            context: HashMap::new(),
            applied: None,
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    pub fn invalid_subject(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidSubject, message)
    }

    pub fn invalid_policy(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidPolicy, message)
    }

    pub fn unauthenticated(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Unauthenticated, message)
    }

    pub fn permission_denied(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::PermissionDenied, message)
    }

    /// Role graph traversal exceeded the configured depth.
    pub fn hierarchy_too_deep(subject: impl fmt::Display, max_depth: usize) -> Self {
        Self::new(
            ErrorCode::HierarchyTooDeep,
            format!(
                "Role hierarchy of {} exceeds the maximum depth of {}",
                subject, max_depth
            ),
        )
        .with_context("max_depth", max_depth)
    }

    /// An in-memory mutation took effect but the store did not confirm it.
    pub fn persist_unconfirmed(applied: bool, source: AuthzError) -> Self {
        let mut error = Self::with_internal(
            ErrorCode::PersistUnconfirmed,
            "Policy change applied but not durably confirmed",
            source.to_string(),
        )
        .with_source(source);
        error.applied = Some(applied);
        error
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add a context key-value pair.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn context(&self) -> &HashMap<String, serde_json::Value> {
        &self.context
    }

    /// For `PersistUnconfirmed`, whether the mutation changed in-memory state.
    pub fn applied(&self) -> Option<bool> {
        self.applied
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    applied = ?self.applied,
                    context = ?self.context,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            crate::observability::metrics::ERRORS,
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// gRPC Integration
// ═══════════════════════════════════════════════════════════════════════════════

/// Metadata key carrying the stable [`ErrorCode`] name.
pub const ERROR_CODE_METADATA: &str = "x-wordhoard-error-code";

/// Metadata key carrying the `applied` flag of `PersistUnconfirmed` errors.
pub const APPLIED_METADATA: &str = "x-wordhoard-applied";

impl From<AuthzError> for tonic::Status {
    fn from(err: AuthzError) -> Self {
        err.log();
        let mut status = tonic::Status::new(err.code.grpc_code(), err.user_message.to_string());
        if let Ok(value) = err.code.to_string().parse() {
            status.metadata_mut().insert(ERROR_CODE_METADATA, value);
        }
        if let Some(applied) = err.applied {
            let value = if applied { "true" } else { "false" };
            status
                .metadata_mut()
                .insert(APPLIED_METADATA, tonic::metadata::MetadataValue::from_static(value));
        }
        status
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Wrap the error as an internal error with a message.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| AuthzError::internal(message.into()).with_source(e))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<std::io::Error> for AuthzError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, user_msg) = match error.kind() {
            ErrorKind::NotFound => (ErrorCode::StoreLoadFailed, "Policy file not found"),
            ErrorKind::PermissionDenied => {
                (ErrorCode::StoreUnavailable, "Policy file is not accessible")
            }
            _ => (ErrorCode::StoreUnavailable, "A policy store I/O error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for AuthzError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::SerializationError,
            "Failed to process policy data",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<toml::de::Error> for AuthzError {
    fn from(error: toml::de::Error) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Policy catalog is invalid",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<sqlx::Error> for AuthzError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => (
                ErrorCode::StoreUnavailable,
                "Unable to connect to the policy database",
            ),
            _ => (ErrorCode::StoreUnavailable, "A policy database error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<config::ConfigError> for AuthzError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Configuration error occurred",
            error.to_string(),
        )
        .with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
