//! Sign-in cards backed by a persisted single-use nonce.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::info;

use teamsforce_core::domain::token::{ChatId, Provider};
use teamsforce_core::errors::CrmError;
use teamsforce_crm::OAuthClients;
use teamsforce_db::{AuthStateRepository, IssuedAuthState};
use teamsforce_teams::cards::login_card;
use teamsforce_teams::{Activity, AuthStateBlob, ReplyMessage};

/// How long a sign-in link stays valid.
pub const LOGIN_STATE_TTL_MINUTES: i64 = 10;
const NONCE_LEN: usize = 32;

pub struct LoginService {
    oauth: OAuthClients,
    states: Arc<dyn AuthStateRepository>,
}

impl LoginService {
    pub fn new(oauth: OAuthClients, states: Arc<dyn AuthStateRepository>) -> Self {
        Self { oauth, states }
    }

    pub fn is_enabled(&self, provider: Provider) -> bool {
        self.oauth.is_enabled(provider)
    }

    /// Issues a nonce for `chat_id` and returns the provider's sign-in card.
    pub async fn login_card(
        &self,
        provider: Provider,
        chat_id: &ChatId,
        activity: &Activity,
    ) -> Result<ReplyMessage, CrmError> {
        let client = self.oauth.get(provider).map_err(|error| {
            CrmError::upstream(provider, None, error.to_string())
        })?;

        let nonce: String =
            rand::thread_rng().sample_iter(&Alphanumeric).take(NONCE_LEN).map(char::from).collect();
        let user_id =
            activity.user_id().map(str::to_owned).unwrap_or_else(|| chat_id.as_str().to_owned());
        let now = Utc::now();

        self.states
            .issue(IssuedAuthState {
                nonce: nonce.clone(),
                chat_id: chat_id.clone(),
                provider,
                user_id: user_id.clone(),
                issued_at: now,
                expires_at: now + Duration::minutes(LOGIN_STATE_TTL_MINUTES),
            })
            .await
            .map_err(|error| CrmError::Persistence(error.to_string()))?;

        let state = AuthStateBlob {
            user_id,
            teams_chat_id: Some(chat_id.as_str().to_owned()),
            nonce,
            conversation_reference: activity.conversation_reference(),
        }
        .encode()
        .map_err(|error| CrmError::Persistence(error.to_string()))?;
        let url = client
            .authorization_url(&state)
            .map_err(|error| CrmError::upstream(provider, None, error.to_string()))?;

        info!(
            event_name = "agent.login.issued",
            chat_id = %chat_id,
            provider = %provider,
            "sign-in link issued"
        );
        Ok(login_card(provider, &url))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use serde_json::json;

    use super::LoginService;
    use teamsforce_core::config::AppConfig;
    use teamsforce_core::domain::token::{ChatId, Provider};
    use teamsforce_crm::OAuthClients;
    use teamsforce_db::{AuthStateRepository, InMemoryAuthStateRepository};
    use teamsforce_teams::{Activity, AuthStateBlob};

    fn activity() -> Activity {
        serde_json::from_value(json!({
            "type": "message",
            "id": "act-1",
            "serviceUrl": "https://smba.trafficmanager.net/amer/",
            "from": {"id": "29:ada", "name": "Ada"},
            "recipient": {"id": "28:bot"},
            "conversation": {"id": "a:1"},
            "channelData": {"teamsChatId": "19:chat@thread.v2"}
        }))
        .expect("activity")
    }

    #[tokio::test]
    async fn login_card_carries_decodable_single_use_state() {
        let config = AppConfig::default();
        let states = Arc::new(InMemoryAuthStateRepository::default());
        let service = LoginService::new(
            OAuthClients::from_config(&config.salesforce, &config.outlook),
            states.clone(),
        );
        let chat = ChatId::from("19:chat@thread.v2");

        let reply =
            service.login_card(Provider::Salesforce, &chat, &activity()).await.expect("card");
        let url = reply.text.split_whitespace().last().expect("url in fallback text");
        assert!(url.starts_with("https://login.salesforce.com/services/oauth2/authorize?"));

        let parsed = reqwest::Url::parse(url).expect("url");
        let state = parsed
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
            .expect("state param");
        let blob = AuthStateBlob::decode(&state).expect("blob");
        assert_eq!(blob.chat_id(), chat);
        assert_eq!(blob.user_id, "29:ada");
        assert!(blob.conversation_reference.is_some());

        let now = Utc::now() + Duration::minutes(1);
        let issued = states.consume(&blob.nonce, Provider::Salesforce, now).await.expect("consume");
        assert_eq!(issued.map(|state| state.chat_id), Some(chat));
        let reused = states.consume(&blob.nonce, Provider::Salesforce, now).await.expect("consume");
        assert!(reused.is_none());
    }

    #[tokio::test]
    async fn disabled_outlook_has_no_card() {
        let config = AppConfig::default();
        let service = LoginService::new(
            OAuthClients::from_config(&config.salesforce, &config.outlook),
            Arc::new(InMemoryAuthStateRepository::default()),
        );
        assert!(!service.is_enabled(Provider::Outlook));
        let result = service
            .login_card(Provider::Outlook, &ChatId::from("19:chat@thread.v2"), &activity())
            .await;
        assert!(result.is_err());
    }
}
