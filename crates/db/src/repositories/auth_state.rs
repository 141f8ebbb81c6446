use chrono::{DateTime, Utc};
use sqlx::Row;

use teamsforce_core::domain::token::{ChatId, Provider};

use super::{
    parse_provider, parse_timestamp, timestamp, AuthStateRepository, IssuedAuthState,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlAuthStateRepository {
    pool: DbPool,
}

impl SqlAuthStateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_state(row: &sqlx::sqlite::SqliteRow) -> Result<IssuedAuthState, RepositoryError> {
    let decode = |error: sqlx::Error| RepositoryError::Decode(error.to_string());

    let nonce: String = row.try_get("nonce").map_err(decode)?;
    let chat_id: String = row.try_get("chat_id").map_err(decode)?;
    let provider: String = row.try_get("provider").map_err(decode)?;
    let user_id: String = row.try_get("user_id").map_err(decode)?;
    let issued_at: String = row.try_get("issued_at").map_err(decode)?;
    let expires_at: String = row.try_get("expires_at").map_err(decode)?;

    Ok(IssuedAuthState {
        nonce,
        chat_id: ChatId(chat_id),
        provider: parse_provider(&provider)?,
        user_id,
        issued_at: parse_timestamp("issued_at", &issued_at)?,
        expires_at: parse_timestamp("expires_at", &expires_at)?,
    })
}

#[async_trait::async_trait]
impl AuthStateRepository for SqlAuthStateRepository {
    async fn issue(&self, state: IssuedAuthState) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO oauth_state (nonce, chat_id, provider, user_id, issued_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&state.nonce)
        .bind(state.chat_id.as_str())
        .bind(state.provider.as_str())
        .bind(&state.user_id)
        .bind(timestamp(state.issued_at))
        .bind(timestamp(state.expires_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn consume(
        &self,
        nonce: &str,
        provider: Provider,
        now: DateTime<Utc>,
    ) -> Result<Option<IssuedAuthState>, RepositoryError> {
        // The conditional UPDATE is the reservation; only one caller can flip `used`.
        let reserved = sqlx::query(
            "UPDATE oauth_state SET used = 1
             WHERE nonce = ? AND provider = ? AND used = 0 AND expires_at > ?",
        )
        .bind(nonce)
        .bind(provider.as_str())
        .bind(timestamp(now))
        .execute(&self.pool)
        .await?;

        if reserved.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query(
            "SELECT nonce, chat_id, provider, user_id, issued_at, expires_at
             FROM oauth_state WHERE nonce = ?",
        )
        .bind(nonce)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_state).transpose()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM oauth_state WHERE expires_at <= ? OR used = 1")
            .bind(timestamp(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, SubsecRound, Utc};

    use teamsforce_core::domain::token::{ChatId, Provider};

    use super::SqlAuthStateRepository;
    use crate::connect_with_settings;
    use crate::migrations::run_pending;
    use crate::repositories::{AuthStateRepository, IssuedAuthState};

    async fn repo() -> SqlAuthStateRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");
        SqlAuthStateRepository::new(pool)
    }

    fn issued(nonce: &str, provider: Provider) -> IssuedAuthState {
        let now = Utc::now().trunc_subsecs(6);
        IssuedAuthState {
            nonce: nonce.to_owned(),
            chat_id: ChatId::from("19:chat"),
            provider,
            user_id: "29:user".to_owned(),
            issued_at: now,
            expires_at: now + Duration::minutes(10),
        }
    }

    #[tokio::test]
    async fn nonce_is_single_use() {
        let repo = repo().await;
        let state = issued("nonce-1", Provider::Salesforce);
        repo.issue(state.clone()).await.expect("issue");

        let first = repo.consume("nonce-1", Provider::Salesforce, Utc::now()).await.expect("consume");
        assert_eq!(first, Some(state));

        let second = repo.consume("nonce-1", Provider::Salesforce, Utc::now()).await.expect("consume");
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn expired_or_wrong_provider_nonce_is_rejected() {
        let repo = repo().await;
        repo.issue(issued("nonce-2", Provider::Outlook)).await.expect("issue");

        let wrong_provider =
            repo.consume("nonce-2", Provider::Salesforce, Utc::now()).await.expect("consume");
        assert_eq!(wrong_provider, None);

        let later = Utc::now() + Duration::minutes(11);
        let expired = repo.consume("nonce-2", Provider::Outlook, later).await.expect("consume");
        assert_eq!(expired, None);

        assert_eq!(repo.purge_expired(later).await.expect("purge"), 1);
    }
}
