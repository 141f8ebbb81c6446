use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use teamsforce_core::domain::token::{ChatId, Provider, TokenRecord};

use super::{AuthStateRepository, IssuedAuthState, RepositoryError, TokenRepository};

#[derive(Default)]
pub struct InMemoryTokenRepository {
    tokens: RwLock<HashMap<(ChatId, Provider), TokenRecord>>,
}

impl InMemoryTokenRepository {
    pub async fn with_records(records: impl IntoIterator<Item = TokenRecord>) -> Self {
        let repo = Self::default();
        {
            let mut tokens = repo.tokens.write().await;
            for record in records {
                tokens.insert((record.chat_id.clone(), record.provider), record);
            }
        }
        repo
    }
}

#[async_trait::async_trait]
impl TokenRepository for InMemoryTokenRepository {
    async fn find(
        &self,
        chat_id: &ChatId,
        provider: Provider,
    ) -> Result<Option<TokenRecord>, RepositoryError> {
        let tokens = self.tokens.read().await;
        Ok(tokens.get(&(chat_id.clone(), provider)).cloned())
    }

    async fn save(&self, record: TokenRecord) -> Result<(), RepositoryError> {
        let mut tokens = self.tokens.write().await;
        tokens.insert((record.chat_id.clone(), record.provider), record);
        Ok(())
    }

    async fn delete(&self, chat_id: &ChatId, provider: Provider) -> Result<bool, RepositoryError> {
        let mut tokens = self.tokens.write().await;
        Ok(tokens.remove(&(chat_id.clone(), provider)).is_some())
    }

    async fn list_for_chat(&self, chat_id: &ChatId) -> Result<Vec<TokenRecord>, RepositoryError> {
        let tokens = self.tokens.read().await;
        let mut records: Vec<TokenRecord> =
            tokens.values().filter(|record| &record.chat_id == chat_id).cloned().collect();
        records.sort_by_key(|record| record.provider);
        Ok(records)
    }
}

#[derive(Default)]
pub struct InMemoryAuthStateRepository {
    states: RwLock<HashMap<String, (IssuedAuthState, bool)>>,
}

#[async_trait::async_trait]
impl AuthStateRepository for InMemoryAuthStateRepository {
    async fn issue(&self, state: IssuedAuthState) -> Result<(), RepositoryError> {
        let mut states = self.states.write().await;
        states.insert(state.nonce.clone(), (state, false));
        Ok(())
    }

    async fn consume(
        &self,
        nonce: &str,
        provider: Provider,
        now: DateTime<Utc>,
    ) -> Result<Option<IssuedAuthState>, RepositoryError> {
        let mut states = self.states.write().await;
        let Some((state, used)) = states.get_mut(nonce) else { return Ok(None) };
        if *used || state.provider != provider || state.expires_at <= now {
            return Ok(None);
        }
        *used = true;
        Ok(Some(state.clone()))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut states = self.states.write().await;
        let before = states.len();
        states.retain(|_, (state, used)| !*used && state.expires_at > now);
        Ok((before - states.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use teamsforce_core::domain::token::{ChatId, Provider, TokenRecord};

    use crate::repositories::{
        AuthStateRepository, InMemoryAuthStateRepository, InMemoryTokenRepository, IssuedAuthState,
        TokenRepository,
    };

    fn record(chat: &str, provider: Provider) -> TokenRecord {
        let now = Utc::now();
        TokenRecord {
            chat_id: ChatId::from(chat),
            provider,
            access_token: "access".to_owned(),
            refresh_token: Some("refresh".to_owned()),
            instance_url: None,
            token_type: "Bearer".to_owned(),
            scope: None,
            expires_at: now + Duration::hours(1),
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn in_memory_token_repo_round_trip() {
        let repo = InMemoryTokenRepository::with_records([
            record("19:a", Provider::Outlook),
            record("19:a", Provider::Salesforce),
            record("19:b", Provider::Salesforce),
        ])
        .await;
        let chat = ChatId::from("19:a");

        let listed = repo.list_for_chat(&chat).await.expect("list");
        assert_eq!(
            listed.iter().map(|record| record.provider).collect::<Vec<_>>(),
            vec![Provider::Salesforce, Provider::Outlook]
        );

        assert!(repo.delete(&chat, Provider::Outlook).await.expect("delete"));
        assert_eq!(repo.find(&chat, Provider::Outlook).await.expect("find"), None);
        assert!(repo.find(&chat, Provider::Salesforce).await.expect("find").is_some());
    }

    #[tokio::test]
    async fn in_memory_auth_state_is_single_use() {
        let repo = InMemoryAuthStateRepository::default();
        let now = Utc::now();
        repo.issue(IssuedAuthState {
            nonce: "n-1".to_owned(),
            chat_id: ChatId::from("19:a"),
            provider: Provider::Salesforce,
            user_id: "29:u".to_owned(),
            issued_at: now,
            expires_at: now + Duration::minutes(10),
        })
        .await
        .expect("issue");

        assert!(repo.consume("n-1", Provider::Salesforce, now).await.expect("consume").is_some());
        assert!(repo.consume("n-1", Provider::Salesforce, now).await.expect("consume").is_none());
        assert_eq!(repo.purge_expired(now).await.expect("purge"), 1);
    }
}
