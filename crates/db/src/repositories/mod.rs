use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use teamsforce_core::domain::token::{ChatId, Provider, TokenRecord};

pub mod auth_state;
pub mod memory;
pub mod token;

pub use auth_state::SqlAuthStateRepository;
pub use memory::{InMemoryAuthStateRepository, InMemoryTokenRepository};
pub use token::SqlTokenRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Persisted OAuth sessions keyed by `(chat_id, provider)`.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn find(
        &self,
        chat_id: &ChatId,
        provider: Provider,
    ) -> Result<Option<TokenRecord>, RepositoryError>;

    /// Inserts or overwrites the record for its `(chat_id, provider)`.
    async fn save(&self, record: TokenRecord) -> Result<(), RepositoryError>;

    /// Returns whether a record existed.
    async fn delete(&self, chat_id: &ChatId, provider: Provider) -> Result<bool, RepositoryError>;

    async fn list_for_chat(&self, chat_id: &ChatId) -> Result<Vec<TokenRecord>, RepositoryError>;
}

/// A login nonce handed out in an OAuth `state` parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedAuthState {
    pub nonce: String,
    pub chat_id: ChatId,
    pub provider: Provider,
    pub user_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait AuthStateRepository: Send + Sync {
    async fn issue(&self, state: IssuedAuthState) -> Result<(), RepositoryError>;

    /// Marks the nonce used and returns it, or `None` when it is unknown,
    /// expired, already used, or issued for another provider.
    async fn consume(
        &self,
        nonce: &str,
        provider: Provider,
        now: DateTime<Utc>,
    ) -> Result<Option<IssuedAuthState>, RepositoryError>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

/// Fixed-width UTC timestamps so text comparison in SQL matches time order.
pub(crate) fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

pub(crate) fn parse_provider(raw: &str) -> Result<Provider, RepositoryError> {
    Provider::parse(raw).ok_or_else(|| RepositoryError::Decode(format!("unknown provider `{raw}`")))
}
