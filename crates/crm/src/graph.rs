//! Microsoft Graph mail access for the signed-in Outlook user.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use teamsforce_core::domain::email::EmailMessage;
use teamsforce_core::domain::token::{ChatId, Provider};
use teamsforce_core::errors::{CrmError, ValidationError};

use crate::client::AuthorizedClient;
use crate::transport::{encode_path_segment, ApiRequest};

pub const MAX_EMAIL_LIMIT: u32 = 25;
const MESSAGE_FIELDS: &str = "id,subject,from,receivedDateTime,bodyPreview";

pub struct GraphClient {
    client: Arc<AuthorizedClient>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    from: Option<GraphRecipient>,
    #[serde(default)]
    received_date_time: Option<String>,
    #[serde(default)]
    body_preview: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient {
    email_address: Option<GraphEmailAddress>,
}

#[derive(Deserialize)]
struct GraphEmailAddress {
    name: Option<String>,
    address: Option<String>,
}

impl GraphClient {
    pub fn new(client: Arc<AuthorizedClient>) -> Self {
        Self { client }
    }

    /// Newest messages in the mailbox, `limit` clamped to `1..=25`.
    pub async fn recent_messages(
        &self,
        chat_id: &ChatId,
        limit: u32,
    ) -> Result<Vec<EmailMessage>, CrmError> {
        let request = ApiRequest::get("/me/messages")
            .with_query("$orderby", "receivedDateTime desc")
            .with_query("$top", limit.clamp(1, MAX_EMAIL_LIMIT).to_string())
            .with_query("$select", MESSAGE_FIELDS);
        let response = self.client.execute(chat_id, &request).await?;

        let items = response
            .body
            .as_ref()
            .and_then(|body| body.get("value"))
            .and_then(Value::as_array)
            .ok_or_else(|| {
                CrmError::upstream(
                    Provider::Outlook,
                    Some(response.status),
                    "mail response had no value array",
                )
            })?;

        items.iter().map(parse_message).collect()
    }

    pub async fn message(&self, chat_id: &ChatId, message_id: &str) -> Result<EmailMessage, CrmError> {
        if !is_message_id(message_id) {
            return Err(ValidationError::InvalidField {
                field: "messageId".to_owned(),
                reason: "not a Graph message id".to_owned(),
            }
            .into());
        }

        let request = ApiRequest::get(format!("/me/messages/{}", encode_path_segment(message_id)))
            .with_query("$select", MESSAGE_FIELDS);
        let response = self.client.execute(chat_id, &request).await?;
        let body = response.body.ok_or_else(|| {
            CrmError::upstream(Provider::Outlook, Some(response.status), "empty message response")
        })?;
        parse_message(&body)
    }
}

fn parse_message(value: &Value) -> Result<EmailMessage, CrmError> {
    let message: GraphMessage = serde_json::from_value(value.clone()).map_err(|error| {
        CrmError::upstream(Provider::Outlook, None, format!("unreadable message: {error}"))
    })?;
    let sender = message.from.and_then(|from| from.email_address);

    Ok(EmailMessage {
        id: message.id,
        subject: message
            .subject
            .filter(|subject| !subject.trim().is_empty())
            .unwrap_or_else(|| "(no subject)".to_owned()),
        from_name: sender.as_ref().and_then(|sender| sender.name.clone()),
        from_address: sender.and_then(|sender| sender.address),
        received_at: message
            .received_date_time
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|value| value.with_timezone(&Utc)),
        body_preview: message.body_preview.unwrap_or_default(),
    })
}

/// Graph ids are base64-ish: letters, digits and `-_=+/`.
fn is_message_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 512
        && value.chars().all(|ch| ch.is_ascii_alphanumeric() || "-_=+/".contains(ch))
        && !value.contains("..")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use teamsforce_core::domain::token::{ChatId, Provider};
    use teamsforce_core::errors::CrmError;

    use super::GraphClient;
    use crate::client::testing::{repo_with, stored_token, FakeExchanger, ScriptedTransport, CHAT};
    use crate::client::{AuthorizedClient, BaseUrl};
    use crate::transport::ApiResponse;

    async fn graph(responses: Vec<ApiResponse>) -> (GraphClient, Arc<ScriptedTransport>) {
        let tokens =
            repo_with(vec![stored_token(Provider::Outlook, Some("refresh"), Duration::hours(1))]).await;
        let transport = Arc::new(ScriptedTransport::new(tokens.clone(), Provider::Outlook, responses));
        let client = AuthorizedClient::new(
            Provider::Outlook,
            BaseUrl::Fixed("https://graph.microsoft.com/v1.0".to_owned()),
            Duration::hours(1),
            tokens,
            Arc::new(FakeExchanger::granting("unused")),
            transport.clone(),
        );
        (GraphClient::new(Arc::new(client)), transport)
    }

    #[tokio::test]
    async fn recent_messages_are_parsed() {
        let (client, transport) = graph(vec![ApiResponse::new(
            200,
            Some(json!({"value": [{
                "id": "AAMkAD1",
                "subject": "Pricing for 40 seats",
                "from": {"emailAddress": {"name": "Grace Hopper", "address": "grace@navy-labs.com"}},
                "receivedDateTime": "2026-03-02T09:30:00Z",
                "bodyPreview": "Could you send a quote?"
            }]})),
        )])
        .await;

        let messages = client.recent_messages(&ChatId::from(CHAT), 100).await.expect("messages");

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].from_address.as_deref(), Some("grace@navy-labs.com"));
        assert_eq!(
            messages[0].received_at,
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).single()
        );
        let sent = transport.sent();
        assert_eq!(sent[0].base_url, "https://graph.microsoft.com/v1.0");
        assert!(sent[0].request.query.contains(&("$top".to_owned(), "25".to_owned())));
    }

    #[tokio::test]
    async fn message_id_slashes_stay_inside_one_path_segment() {
        let (client, transport) = graph(vec![ApiResponse::new(
            200,
            Some(json!({"id": "AAMk/AD1=", "subject": "Renewal"})),
        )])
        .await;

        let message =
            client.message(&ChatId::from(CHAT), "AAMk/AD1=").await.expect("message");
        assert_eq!(message.subject, "Renewal");
        let sent = transport.sent();
        assert_eq!(sent[0].request.path, "/me/messages/AAMk%2FAD1%3D");

        client.message(&ChatId::from(CHAT), "X/attachments").await.ok();
        assert_eq!(transport.sent()[1].request.path, "/me/messages/X%2Fattachments");
    }

    #[tokio::test]
    async fn malformed_message_id_is_rejected_without_a_call() {
        let (client, transport) = graph(Vec::new()).await;

        let error = client
            .message(&ChatId::from(CHAT), "../me/mailFolders")
            .await
            .expect_err("invalid id");
        assert!(matches!(error, CrmError::Validation(_)));
        assert!(transport.sent().is_empty());
    }
}
