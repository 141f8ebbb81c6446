//! HTTP surface of the bot.
//!
//! - `POST /api/messages`       - Bot Framework activities from Teams
//! - `GET  /salesforce/callback` - Salesforce OAuth redirect
//! - `GET  /outlook/callback`    - Microsoft identity OAuth redirect
//! - `GET  /health`              - readiness probe

use std::sync::Arc;

use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tera::Tera;

use teamsforce_core::audit::AuditSink;
use teamsforce_core::conversation::SessionStore;
use teamsforce_core::errors::InterfaceError;
use teamsforce_crm::CrmServices;
use teamsforce_db::{AuthStateRepository, DbPool};
use teamsforce_teams::{ActivityDispatcher, ConnectorClient};

use crate::{health, messages, oauth};

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<ActivityDispatcher>,
    pub connector: Arc<dyn ConnectorClient>,
    pub services: CrmServices,
    pub auth_states: Arc<dyn AuthStateRepository>,
    pub sessions: SessionStore,
    pub audit: Arc<dyn AuditSink>,
    pub templates: Arc<Tera>,
}

pub fn router(state: AppState, db_pool: DbPool) -> Router {
    Router::new()
        .route("/api/messages", post(messages::receive))
        .route("/salesforce/callback", get(oauth::salesforce_callback))
        .route("/outlook/callback", get(oauth::outlook_callback))
        .with_state(state)
        .merge(health::router(db_pool))
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub correlation_id: String,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

/// JSON error response carrying the public message, never the internal one.
pub fn api_error(error: &InterfaceError) -> ApiError {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let label = match error {
        InterfaceError::BadRequest { .. } => "bad_request",
        InterfaceError::Unauthorized { .. } => "unauthorized",
        InterfaceError::ServiceUnavailable { .. } => "service_unavailable",
        InterfaceError::Internal { .. } => "internal",
    };
    (
        status,
        Json(ErrorBody {
            error: label,
            message: error.user_message().to_string(),
            correlation_id: error.correlation_id().to_string(),
        }),
    )
}
