//! OAuth redirect targets for Salesforce and Outlook sign-in.
//!
//! The `state` parameter is the base64url blob minted by the login card. Its
//! nonce is consumed before the code exchange, so a replayed redirect fails
//! even when the provider would accept the code.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Html,
};
use chrono::Utc;
use serde::Deserialize;
use tera::{Context, Tera};
use tracing::{error, info, warn};

use teamsforce_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use teamsforce_core::domain::token::{Provider, TokenRecord};
use teamsforce_teams::cards::connected_message;
use teamsforce_teams::AuthStateBlob;

use crate::routes::AppState;

const CALLBACK_TEMPLATE: &str = "callback.html";

pub fn callback_templates() -> Result<Tera, tera::Error> {
    let mut tera = Tera::default();
    tera.add_raw_template(
        CALLBACK_TEMPLATE,
        include_str!("../../../templates/oauth/callback.html"),
    )?;
    Ok(tera)
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

pub type CallbackResponse = (StatusCode, Html<String>);

pub async fn salesforce_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> CallbackResponse {
    complete_login(&state, Provider::Salesforce, query).await
}

pub async fn outlook_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> CallbackResponse {
    complete_login(&state, Provider::Outlook, query).await
}

async fn complete_login(state: &AppState, provider: Provider, query: CallbackQuery) -> CallbackResponse {
    let name = provider.display_name();

    if let Some(code) = query.error.as_deref().filter(|code| !code.is_empty()) {
        let description = query.error_description.as_deref().unwrap_or(code);
        warn!(
            event_name = "auth.callback.provider_error",
            provider = provider.as_str(),
            error_code = code,
            "provider returned an authorization error"
        );
        return page(state, StatusCode::BAD_REQUEST, &format!("{name} sign-in failed"), description);
    }

    let (Some(code), Some(raw_state)) = (
        query.code.as_deref().filter(|code| !code.trim().is_empty()),
        query.state.as_deref().filter(|state| !state.trim().is_empty()),
    ) else {
        return page(state, StatusCode::BAD_REQUEST, "Sign-in failed", "Missing code or state");
    };

    if !state.services.oauth.is_enabled(provider) {
        return page(
            state,
            StatusCode::BAD_REQUEST,
            "Sign-in failed",
            &format!("{name} is not enabled for this bot."),
        );
    }

    let Ok(blob) = AuthStateBlob::decode(raw_state) else {
        return page(state, StatusCode::BAD_REQUEST, "Sign-in failed", "Invalid state parameter");
    };
    let chat_id = blob.chat_id();
    let correlation_id = format!("oauth-{}", blob.nonce.chars().take(8).collect::<String>());

    let issued = match state.auth_states.consume(&blob.nonce, provider, Utc::now()).await {
        Ok(Some(issued)) if issued.chat_id == chat_id => issued,
        Ok(_) => {
            warn!(
                event_name = "auth.callback.state_rejected",
                correlation_id = %correlation_id,
                provider = provider.as_str(),
                chat_id = %chat_id,
                "login state unknown, expired, reused or issued to another chat"
            );
            return page(
                state,
                StatusCode::BAD_REQUEST,
                "Sign-in link expired",
                "This sign-in link has expired or was already used. Ask the bot for a new one.",
            );
        }
        Err(repository_error) => {
            error!(
                event_name = "auth.callback.state_lookup_failed",
                correlation_id = %correlation_id,
                error = %repository_error,
                "login state lookup failed"
            );
            return page(
                state,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Sign-in failed",
                "Could not verify the sign-in request. Please try again.",
            );
        }
    };

    let grant = match state.services.exchanger.exchange_code(provider, code).await {
        Ok(grant) => grant,
        Err(exchange_error) => {
            error!(
                event_name = "auth.callback.exchange_failed",
                correlation_id = %correlation_id,
                provider = provider.as_str(),
                chat_id = %chat_id,
                error = %exchange_error,
                "authorization code exchange failed"
            );
            state.audit.emit(
                AuditEvent::new(
                    Some(chat_id.clone()),
                    correlation_id.clone(),
                    "auth.token.exchange_failed",
                    AuditCategory::Auth,
                    issued.user_id.clone(),
                    AuditOutcome::Failed,
                )
                .with_metadata("provider", provider.as_str()),
            );
            return page(
                state,
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("{name} sign-in failed"),
                &format!("{name} did not accept the sign-in. Please try again."),
            );
        }
    };

    let now = Utc::now();
    let record =
        TokenRecord::from_grant(chat_id.clone(), provider, grant, None, state.services.token_ttl(provider), now);
    if let Err(repository_error) = state.services.tokens.save(record).await {
        error!(
            event_name = "auth.callback.token_save_failed",
            correlation_id = %correlation_id,
            error = %repository_error,
            "token could not be stored"
        );
        return page(
            state,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Sign-in failed",
            "Your sign-in could not be saved. Please try again.",
        );
    }

    state.sessions.update(&chat_id, |session| session.set_authenticated(provider, true));
    state.audit.emit(
        AuditEvent::new(
            Some(chat_id.clone()),
            correlation_id.clone(),
            "auth.token.issued",
            AuditCategory::Auth,
            issued.user_id.clone(),
            AuditOutcome::Success,
        )
        .with_metadata("provider", provider.as_str()),
    );
    info!(
        event_name = "auth.callback.completed",
        correlation_id = %correlation_id,
        provider = provider.as_str(),
        chat_id = %chat_id,
        "oauth login completed"
    );

    if let Some(reference) = &blob.conversation_reference {
        if let Err(send_error) = state.connector.send(reference, &connected_message(provider)).await {
            warn!(
                event_name = "auth.callback.notify_failed",
                correlation_id = %correlation_id,
                error = %send_error,
                "connected message could not be delivered"
            );
        }
    }

    page(
        state,
        StatusCode::OK,
        &format!("Connected to {name}"),
        &format!("You are now signed in to {name}."),
    )
}

fn page(state: &AppState, status: StatusCode, title: &str, message: &str) -> CallbackResponse {
    let mut context = Context::new();
    context.insert("title", title);
    context.insert("message", message);
    context.insert("success", &status.is_success());

    match state.templates.render(CALLBACK_TEMPLATE, &context) {
        Ok(html) => (status, Html(html)),
        Err(render_error) => {
            error!(
                event_name = "auth.callback.render_failed",
                error = %render_error,
                "callback template failed to render"
            );
            (status, Html(format!("<h1>{title}</h1><p>{message}</p>")))
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use chrono::{Duration, Utc};
    use tower::ServiceExt;

    use teamsforce_core::domain::token::{ChatId, Provider};
    use teamsforce_db::{AuthStateRepository, IssuedAuthState, TokenRepository};
    use teamsforce_teams::{AuthStateBlob, ConversationAccount, ConversationReference};

    use crate::test_support::{TestApp, CHAT};

    fn reference() -> ConversationReference {
        ConversationReference {
            conversation: ConversationAccount { id: "a:1".to_owned(), ..Default::default() },
            channel_id: "msteams".to_owned(),
            service_url: "https://smba.trafficmanager.net/amer/".to_owned(),
            ..Default::default()
        }
    }

    async fn issue(app: &TestApp, nonce: &str, provider: Provider, ttl: Duration) -> String {
        let now = Utc::now();
        app.auth_states
            .issue(IssuedAuthState {
                nonce: nonce.to_owned(),
                chat_id: ChatId::from(CHAT),
                provider,
                user_id: "29:ada".to_owned(),
                issued_at: now,
                expires_at: now + ttl,
            })
            .await
            .expect("issue state");
        AuthStateBlob {
            user_id: "29:ada".to_owned(),
            teams_chat_id: Some(CHAT.to_owned()),
            nonce: nonce.to_owned(),
            conversation_reference: Some(reference()),
        }
        .encode()
        .expect("encode state")
    }

    async fn get(app: &TestApp, uri: &str) -> (StatusCode, String) {
        let response = app
            .router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, String::from_utf8(bytes.to_vec()).expect("utf8 body"))
    }

    #[tokio::test]
    async fn successful_callback_stores_token_and_notifies_chat() {
        let app = TestApp::new(vec![]).await;
        let state = issue(&app, "nonce-1", Provider::Salesforce, Duration::minutes(10)).await;

        let (status, html) =
            get(&app, &format!("/salesforce/callback?code=auth-code&state={state}")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("You can close this tab"));

        let stored = app
            .tokens
            .find(&ChatId::from(CHAT), Provider::Salesforce)
            .await
            .expect("find token")
            .expect("token stored");
        assert_eq!(stored.access_token, "exchanged-token");
        assert_eq!(stored.instance_url.as_deref(), Some("https://acme.my.salesforce.com"));

        let sent = app.connector.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.text.contains("connected to Salesforce"));
        assert!(app.sessions().load(&ChatId::from(CHAT)).is_authenticated(Provider::Salesforce));
        assert!(app.audit.events().iter().any(|event| event.event_type == "auth.token.issued"));
    }

    #[tokio::test]
    async fn reused_state_is_rejected() {
        let app = TestApp::new(vec![]).await;
        let state = issue(&app, "nonce-2", Provider::Salesforce, Duration::minutes(10)).await;
        let uri = format!("/salesforce/callback?code=auth-code&state={state}");

        let (first, _) = get(&app, &uri).await;
        let (second, html) = get(&app, &uri).await;

        assert_eq!(first, StatusCode::OK);
        assert_eq!(second, StatusCode::BAD_REQUEST);
        assert!(html.contains("expired or was already used"));
        assert_eq!(app.exchange_calls(), 1);
    }

    #[tokio::test]
    async fn expired_state_is_rejected_without_exchange() {
        let app = TestApp::new(vec![]).await;
        let state = issue(&app, "nonce-3", Provider::Salesforce, Duration::minutes(-1)).await;

        let (status, _) = get(&app, &format!("/salesforce/callback?code=auth-code&state={state}")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(app.exchange_calls(), 0);
    }

    #[tokio::test]
    async fn missing_parameters_and_bad_state_are_bad_requests() {
        let app = TestApp::new(vec![]).await;

        let (status, html) = get(&app, "/salesforce/callback?code=auth-code").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(html.contains("Missing code or state"));

        let (status, html) = get(&app, "/salesforce/callback?code=auth-code&state=not*base64").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(html.contains("Invalid state parameter"));
    }

    #[tokio::test]
    async fn provider_error_is_shown_to_the_user() {
        let app = TestApp::new(vec![]).await;

        let (status, html) = get(
            &app,
            "/salesforce/callback?error=access_denied&error_description=end-user+denied+authorization",
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(html.contains("end-user denied authorization"));
        assert_eq!(app.exchange_calls(), 0);
    }

    #[tokio::test]
    async fn failed_exchange_is_a_server_error() {
        let app = TestApp::rejecting_exchange().await;
        let state = issue(&app, "nonce-4", Provider::Salesforce, Duration::minutes(10)).await;

        let (status, _) = get(&app, &format!("/salesforce/callback?code=bad-code&state={state}")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(app.connector.sent().is_empty());
        assert!(app
            .tokens
            .find(&ChatId::from(CHAT), Provider::Salesforce)
            .await
            .expect("find token")
            .is_none());
    }

    #[tokio::test]
    async fn outlook_callback_is_refused_when_outlook_is_disabled() {
        let app = TestApp::new(vec![]).await;
        let state = issue(&app, "nonce-5", Provider::Outlook, Duration::minutes(10)).await;

        let (status, html) = get(&app, &format!("/outlook/callback?code=auth-code&state={state}")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(html.contains("not enabled"));
    }
}
