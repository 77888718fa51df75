/// Unified error types for Aurora Gate
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A single field-level validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Operation kinds covered by the self-operation invariant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfOperationKind {
    Suspend,
    Delete,
    RoleDowngrade,
}

impl SelfOperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelfOperationKind::Suspend => "suspend",
            SelfOperationKind::Delete => "delete",
            SelfOperationKind::RoleDowngrade => "role_downgrade",
        }
    }
}

/// Main error type for the identity server
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Malformed or missing input
    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    /// No credential presented, or the owner can no longer authenticate
    #[error("Unauthenticated")]
    Unauthenticated,

    /// Bearer token malformed, unknown, expired or mismatched
    #[error("Invalid token")]
    InvalidToken,

    /// Bad login; identical whether the principal or the password was wrong
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Role requires a verified email and the account has none
    #[error("Email address is not verified")]
    EmailNotVerified,

    /// Role too low for the operation
    #[error("Forbidden")]
    Forbidden,

    /// Role sufficient but the named capability is missing
    #[error("Insufficient privileges: {0}")]
    InsufficientPrivileges(String),

    /// Acting account targeted itself with a destructive operation
    #[error("Operation not permitted on your own account: {}", .0.as_str())]
    SelfOperationForbidden(SelfOperationKind),

    #[error("Account is already suspended")]
    AlreadySuspended,

    #[error("Account is not suspended")]
    NotSuspended,

    #[error("New password must differ from the current password")]
    SamePassword,

    #[error("Current password is incorrect")]
    CurrentPasswordIncorrect,

    /// Signed link failed signature, expiry or binding checks
    #[error("Invalid or expired verification link")]
    InvalidLink,

    /// Password reset token missing, mismatched, consumed or expired
    #[error("Invalid or expired password reset token")]
    InvalidOrExpiredToken,

    /// Reset flow: email matches no account
    #[error("No account found for this email address")]
    AccountNotFound,

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict errors (e.g., duplicate username)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Too many attempts within the window
    #[error("Too many attempts, retry after {} seconds", .retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IdentityError {
    /// Build a validation error for a single field
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        IdentityError::Validation(vec![FieldError::new(field, message)])
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            IdentityError::Validation(_) => "VALIDATION_ERROR",
            IdentityError::Unauthenticated => "UNAUTHENTICATED",
            IdentityError::InvalidToken => "INVALID_TOKEN",
            IdentityError::InvalidCredentials => "INVALID_CREDENTIALS",
            IdentityError::EmailNotVerified => "EMAIL_NOT_VERIFIED",
            IdentityError::Forbidden => "FORBIDDEN",
            IdentityError::InsufficientPrivileges(_) => "INSUFFICIENT_PRIVILEGES",
            IdentityError::SelfOperationForbidden(_) => "SELF_OPERATION_FORBIDDEN",
            IdentityError::AlreadySuspended => "ALREADY_SUSPENDED",
            IdentityError::NotSuspended => "NOT_SUSPENDED",
            IdentityError::SamePassword => "SAME_PASSWORD",
            IdentityError::CurrentPasswordIncorrect => "CURRENT_PASSWORD_INCORRECT",
            IdentityError::InvalidLink => "INVALID_VERIFICATION_LINK",
            IdentityError::InvalidOrExpiredToken => "INVALID_OR_EXPIRED_TOKEN",
            IdentityError::AccountNotFound => "ACCOUNT_NOT_FOUND",
            IdentityError::NotFound(_) => "NOT_FOUND",
            IdentityError::Conflict(_) => "CONFLICT",
            IdentityError::RateLimited { .. } => "TOO_MANY_ATTEMPTS",
            IdentityError::Database(_) | IdentityError::Internal(_) | IdentityError::Io(_) => {
                "INTERNAL_SERVER_ERROR"
            }
        }
    }

    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            IdentityError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            IdentityError::Unauthenticated
            | IdentityError::InvalidToken
            | IdentityError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            IdentityError::EmailNotVerified
            | IdentityError::Forbidden
            | IdentityError::InsufficientPrivileges(_) => StatusCode::FORBIDDEN,
            IdentityError::SelfOperationForbidden(SelfOperationKind::RoleDowngrade) => {
                StatusCode::BAD_REQUEST
            }
            IdentityError::SelfOperationForbidden(_) => StatusCode::FORBIDDEN,
            IdentityError::AlreadySuspended | IdentityError::NotSuspended => StatusCode::CONFLICT,
            IdentityError::SamePassword
            | IdentityError::CurrentPasswordIncorrect
            | IdentityError::InvalidLink
            | IdentityError::InvalidOrExpiredToken
            | IdentityError::AccountNotFound => StatusCode::BAD_REQUEST,
            IdentityError::NotFound(_) => StatusCode::NOT_FOUND,
            IdentityError::Conflict(_) => StatusCode::CONFLICT,
            IdentityError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            IdentityError::Database(_) | IdentityError::Internal(_) | IdentityError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether this is an infrastructure failure rather than a domain outcome
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IdentityError::Database(_) | IdentityError::Internal(_) | IdentityError::Io(_)
        )
    }

    /// Client-safe message; infrastructure details never leave the process
    pub fn client_message(&self) -> String {
        if self.is_fatal() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Convert IdentityError to HTTP response
impl IntoResponse for IdentityError {
    fn into_response(self) -> Response {
        if self.is_fatal() {
            tracing::error!(error = %self, "request failed with internal error");
        }

        let status = self.status();
        let retry_after = match &self {
            IdentityError::RateLimited { retry_after } => Some(retry_after.as_secs().max(1)),
            _ => None,
        };
        let body = ErrorResponse {
            error: self.code().to_string(),
            message: self.client_message(),
            errors: match self {
                IdentityError::Validation(errors) => errors,
                _ => Vec::new(),
            },
            retry_after,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result type alias for identity operations
pub type IdentityResult<T> = Result<T, IdentityError>;
