use std::fmt;

use thiserror::Error;

use crate::domain::entity::{EntityReference, EntityType};
use crate::domain::token::Provider;

/// Input problems caught before any network call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required {entity} fields: {}", .fields.join(", "))]
    MissingFields { entity: EntityType, fields: Vec<String> },
    #[error("no fields provided to update on the {entity}")]
    NoUpdateFields { entity: EntityType },
    #[error("a {entity} id or name is required")]
    MissingTarget { entity: EntityType },
    #[error("search text for {entity} must not be blank")]
    BlankSearch { entity: EntityType },
    #[error("unknown record type `{0}`")]
    UnknownEntity(String),
    #[error("`{field}` is invalid: {reason}")]
    InvalidField { field: String, reason: String },
    #[error("{0}")]
    NotAllowed(String),
}

/// Why a provider session can no longer be used.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthFailure {
    NoToken,
    NoRefreshToken,
    RefreshRejected(String),
    RejectedAfterRefresh,
    MissingInstanceUrl,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoToken => f.write_str("not connected"),
            Self::NoRefreshToken => f.write_str("session expired and no refresh token is available"),
            Self::RefreshRejected(message) => write!(f, "token refresh was rejected: {message}"),
            Self::RejectedAfterRefresh => f.write_str("request rejected even after a token refresh"),
            Self::MissingInstanceUrl => f.write_str("stored session has no instance URL"),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CrmError {
    #[error("{provider} authentication required: {reason}")]
    AuthenticationRequired { provider: Provider, reason: AuthFailure },
    #[error("no {entity} matches `{fragment}`")]
    NotFound { entity: EntityType, fragment: String },
    #[error("{count} {entity} records match `{fragment}`", count = .candidates.len())]
    AmbiguousMatch { entity: EntityType, fragment: String, candidates: Vec<EntityReference> },
    #[error("{provider} request failed: {message}")]
    Upstream { provider: Provider, status: Option<u16>, code: Option<String>, message: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl CrmError {
    pub fn auth_required(provider: Provider, reason: AuthFailure) -> Self {
        Self::AuthenticationRequired { provider, reason }
    }

    pub fn upstream(provider: Provider, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Upstream { provider, status, code: None, message: message.into() }
    }

    /// Short label used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthenticationRequired { .. } => "authentication_required",
            Self::NotFound { .. } => "not_found",
            Self::AmbiguousMatch { .. } => "ambiguous_match",
            Self::Upstream { .. } => "upstream",
            Self::Validation(_) => "validation",
            Self::Persistence(_) => "persistence",
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let message = self.to_string();
        match self {
            Self::Validation(_) | Self::NotFound { .. } | Self::AmbiguousMatch { .. } => {
                InterfaceError::BadRequest { message, correlation_id }
            }
            Self::AuthenticationRequired { .. } => {
                InterfaceError::Unauthorized { message, correlation_id }
            }
            Self::Upstream { .. } | Self::Persistence(_) => {
                InterfaceError::ServiceUnavailable { message, correlation_id }
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Unauthorized { .. } => "Sign-in is required before this request can run.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 400,
            Self::Unauthorized { .. } => 401,
            Self::ServiceUnavailable { .. } => 503,
            Self::Internal { .. } => 500,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Unauthorized { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}
