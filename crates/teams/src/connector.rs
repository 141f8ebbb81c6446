//! Outbound messages to Teams through the Bot Framework connector.

use std::sync::Mutex;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use teamsforce_core::config::TeamsConfig;
use teamsforce_core::domain::token::bounded_lifetime;

use crate::activity::ConversationReference;
use crate::cards::ReplyMessage;

const BOT_FRAMEWORK_SCOPE: &str = "https://api.botframework.com/.default";
const BOT_FRAMEWORK_TENANT: &str = "botframework.com";
/// Cached bot tokens are replaced this long before they expire.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("bot token request failed: {0}")]
    Token(String),
    #[error("connector request failed: {0}")]
    Request(String),
    #[error("connector returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait ConnectorClient: Send + Sync {
    /// Posts `reply` into the referenced conversation.
    async fn send(
        &self,
        reference: &ConversationReference,
        reply: &ReplyMessage,
    ) -> Result<(), ConnectorError>;
}

#[derive(Deserialize)]
struct BotTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

struct CachedToken {
    value: String,
    refresh_after: DateTime<Utc>,
}

pub struct BotConnector {
    http: reqwest::Client,
    app_id: String,
    app_password: SecretString,
    token_url: String,
    token: RwLock<Option<CachedToken>>,
}

impl BotConnector {
    pub fn new(config: &TeamsConfig, timeout: StdDuration) -> Result<Self, ConnectorError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ConnectorError::Request(error.to_string()))?;
        let tenant = config
            .tenant_id
            .as_deref()
            .map(str::trim)
            .filter(|tenant| !tenant.is_empty())
            .unwrap_or(BOT_FRAMEWORK_TENANT);

        Ok(Self {
            http,
            app_id: config.app_id.clone(),
            app_password: config.app_password.clone(),
            token_url: format!("https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token"),
            token: RwLock::new(None),
        })
    }

    async fn bot_token(&self) -> Result<String, ConnectorError> {
        let now = Utc::now();
        if let Some(cached) = self.token.read().await.as_ref() {
            if cached.refresh_after > now {
                return Ok(cached.value.clone());
            }
        }

        let mut slot = self.token.write().await;
        if let Some(cached) = slot.as_ref() {
            if cached.refresh_after > now {
                return Ok(cached.value.clone());
            }
        }

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.app_id.as_str()),
                ("client_secret", self.app_password.expose_secret()),
                ("scope", BOT_FRAMEWORK_SCOPE),
            ])
            .send()
            .await
            .map_err(|error| ConnectorError::Token(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectorError::Token(format!("HTTP {}: {body}", status.as_u16())));
        }
        let token: BotTokenResponse =
            response.json().await.map_err(|error| ConnectorError::Token(error.to_string()))?;

        *slot = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_after: refresh_deadline(now, token.expires_in),
        });
        debug!(event_name = "teams.connector.token_refreshed", "bot framework token refreshed");
        Ok(token.access_token)
    }
}

#[async_trait]
impl ConnectorClient for BotConnector {
    async fn send(
        &self,
        reference: &ConversationReference,
        reply: &ReplyMessage,
    ) -> Result<(), ConnectorError> {
        let token = self.bot_token().await?;
        let url = activities_url(&reference.service_url, &reference.conversation.id);

        let mut activity = reply.to_activity();
        if let Some(bot) = &reference.bot {
            activity["from"] = serde_json::json!(bot);
        }
        activity["conversation"] = serde_json::json!(reference.conversation);

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&activity)
            .send()
            .await
            .map_err(|error| ConnectorError::Request(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                event_name = "teams.connector.rejected",
                status = status.as_u16(),
                conversation_id = %reference.conversation.id,
                "connector rejected proactive message"
            );
            return Err(ConnectorError::Rejected { status: status.as_u16(), body });
        }
        Ok(())
    }
}

/// When a freshly issued bot token should be replaced. Missing lifetimes
/// count as one hour.
fn refresh_deadline(now: DateTime<Utc>, expires_in: Option<i64>) -> DateTime<Utc> {
    let lifetime = expires_in.unwrap_or(3600).saturating_sub(TOKEN_EXPIRY_MARGIN_SECS);
    now.checked_add_signed(bounded_lifetime(lifetime)).unwrap_or(now)
}

/// `{serviceUrl}/v3/conversations/{id}/activities`, with the id path-escaped.
pub fn activities_url(service_url: &str, conversation_id: &str) -> String {
    let mut escaped = String::with_capacity(conversation_id.len());
    for byte in conversation_id.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b':' | b'@' => {
                escaped.push(char::from(byte))
            }
            other => escaped.push_str(&format!("%{other:02X}")),
        }
    }
    format!("{}/v3/conversations/{escaped}/activities", service_url.trim_end_matches('/'))
}

/// Records messages instead of sending them.
#[derive(Default)]
pub struct InMemoryConnector {
    sent: Mutex<Vec<(ConversationReference, ReplyMessage)>>,
}

impl InMemoryConnector {
    pub fn sent(&self) -> Vec<(ConversationReference, ReplyMessage)> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ConnectorClient for InMemoryConnector {
    async fn send(
        &self,
        reference: &ConversationReference,
        reply: &ReplyMessage,
    ) -> Result<(), ConnectorError> {
        let mut sent = match self.sent.lock() {
            Ok(sent) => sent,
            Err(poisoned) => poisoned.into_inner(),
        };
        sent.push((reference.clone(), reply.clone()));
        Ok(())
    }
}
