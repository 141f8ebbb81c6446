use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{info, warn};
use uuid::Uuid;

use teamsforce_core::errors::InterfaceError;
use teamsforce_teams::{
    Activity, ActivityHandlerError, HandlerResult, ReplyMessage, TurnContext,
};

use crate::routes::{api_error, ApiError, AppState};

/// `POST /api/messages`: dispatch one activity and deliver the reply.
///
/// Replies go out through the connector when the activity names a service
/// URL; otherwise the reply activity is returned in the response body.
pub async fn receive(
    State(state): State<AppState>,
    Json(activity): Json<Activity>,
) -> Result<Response, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let chat_id = activity.chat_id().map(|chat| chat.to_string()).unwrap_or_else(|| "-".to_owned());
    info!(
        event_name = "teams.activity.received",
        correlation_id = %correlation_id,
        chat_id = %chat_id,
        activity_kind = ?activity.kind(),
        "activity received"
    );

    let ctx = TurnContext { correlation_id: correlation_id.clone() };
    match state.dispatcher.dispatch(&activity, &ctx).await {
        Ok(HandlerResult::Responded(reply)) => deliver(&state, &activity, &reply, &correlation_id).await,
        Ok(HandlerResult::Processed | HandlerResult::Ignored) => Ok(StatusCode::OK.into_response()),
        Err(error) => {
            warn!(
                event_name = "teams.activity.rejected",
                correlation_id = %correlation_id,
                error = %error,
                "activity handler failed"
            );
            let message = error.to_string();
            let interface = match error {
                ActivityHandlerError::MissingField(_) => {
                    InterfaceError::BadRequest { message, correlation_id }
                }
                ActivityHandlerError::Message(_) => InterfaceError::Internal { message, correlation_id },
            };
            Err(api_error(&interface))
        }
    }
}

async fn deliver(
    state: &AppState,
    activity: &Activity,
    reply: &ReplyMessage,
    correlation_id: &str,
) -> Result<Response, ApiError> {
    let Some(reference) = activity.conversation_reference() else {
        return Ok((StatusCode::OK, Json(reply.to_activity())).into_response());
    };

    if let Err(error) = state.connector.send(&reference, reply).await {
        warn!(
            event_name = "teams.reply.failed",
            correlation_id = %correlation_id,
            conversation_id = %reference.conversation.id,
            error = %error,
            "reply delivery failed"
        );
        return Err(api_error(&InterfaceError::ServiceUnavailable {
            message: error.to_string(),
            correlation_id: correlation_id.to_owned(),
        }));
    }
    Ok(StatusCode::ACCEPTED.into_response())
}
