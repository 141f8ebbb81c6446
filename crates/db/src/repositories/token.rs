use chrono::Utc;
use sqlx::Row;

use teamsforce_core::domain::token::{ChatId, Provider, TokenRecord};

use super::{parse_provider, parse_timestamp, timestamp, RepositoryError, TokenRepository};
use crate::DbPool;

pub struct SqlTokenRepository {
    pool: DbPool,
}

impl SqlTokenRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "SELECT chat_id, provider, access_token, refresh_token, instance_url,
        token_type, scope, expires_at, updated_at
 FROM oauth_token";

fn row_to_token(row: &sqlx::sqlite::SqliteRow) -> Result<TokenRecord, RepositoryError> {
    let decode = |error: sqlx::Error| RepositoryError::Decode(error.to_string());

    let chat_id: String = row.try_get("chat_id").map_err(decode)?;
    let provider: String = row.try_get("provider").map_err(decode)?;
    let access_token: String = row.try_get("access_token").map_err(decode)?;
    let refresh_token: Option<String> = row.try_get("refresh_token").map_err(decode)?;
    let instance_url: Option<String> = row.try_get("instance_url").map_err(decode)?;
    let token_type: String = row.try_get("token_type").map_err(decode)?;
    let scope: Option<String> = row.try_get("scope").map_err(decode)?;
    let expires_at: String = row.try_get("expires_at").map_err(decode)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode)?;

    Ok(TokenRecord {
        chat_id: ChatId(chat_id),
        provider: parse_provider(&provider)?,
        access_token,
        refresh_token,
        instance_url,
        token_type,
        scope,
        expires_at: parse_timestamp("expires_at", &expires_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl TokenRepository for SqlTokenRepository {
    async fn find(
        &self,
        chat_id: &ChatId,
        provider: Provider,
    ) -> Result<Option<TokenRecord>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE chat_id = ? AND provider = ?"))
            .bind(chat_id.as_str())
            .bind(provider.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_token).transpose()
    }

    async fn save(&self, record: TokenRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO oauth_token (chat_id, provider, access_token, refresh_token, instance_url,
                                      token_type, scope, expires_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(chat_id, provider) DO UPDATE SET
                 access_token = excluded.access_token,
                 refresh_token = excluded.refresh_token,
                 instance_url = excluded.instance_url,
                 token_type = excluded.token_type,
                 scope = excluded.scope,
                 expires_at = excluded.expires_at,
                 updated_at = excluded.updated_at",
        )
        .bind(record.chat_id.as_str())
        .bind(record.provider.as_str())
        .bind(&record.access_token)
        .bind(record.refresh_token.as_deref())
        .bind(record.instance_url.as_deref())
        .bind(&record.token_type)
        .bind(record.scope.as_deref())
        .bind(timestamp(record.expires_at))
        .bind(timestamp(Utc::now()))
        .bind(timestamp(record.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, chat_id: &ChatId, provider: Provider) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM oauth_token WHERE chat_id = ? AND provider = ?")
            .bind(chat_id.as_str())
            .bind(provider.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_for_chat(&self, chat_id: &ChatId) -> Result<Vec<TokenRecord>, RepositoryError> {
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} WHERE chat_id = ? ORDER BY provider"))
            .bind(chat_id.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_token).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, SubsecRound, Utc};

    use teamsforce_core::domain::token::{ChatId, Provider, TokenRecord};

    use super::SqlTokenRepository;
    use crate::migrations::run_pending;
    use crate::repositories::TokenRepository;
    use crate::{connect_with_settings, DbPool};

    async fn pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");
        pool
    }

    fn record(chat: &str, provider: Provider, access: &str, refresh: Option<&str>) -> TokenRecord {
        let now = Utc::now().trunc_subsecs(6);
        TokenRecord {
            chat_id: ChatId::from(chat),
            provider,
            access_token: access.to_owned(),
            refresh_token: refresh.map(str::to_owned),
            instance_url: Some("https://acme.my.salesforce.com".to_owned()),
            token_type: "Bearer".to_owned(),
            scope: Some("api refresh_token".to_owned()),
            expires_at: now + Duration::hours(2),
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn save_overwrites_record_for_same_chat_and_provider() {
        let repo = SqlTokenRepository::new(pool().await);
        let chat = ChatId::from("19:chat");

        repo.save(record("19:chat", Provider::Salesforce, "access-1", Some("refresh-1")))
            .await
            .expect("first save");
        let refreshed = record("19:chat", Provider::Salesforce, "access-2", Some("refresh-1"));
        repo.save(refreshed.clone()).await.expect("second save");

        let found = repo.find(&chat, Provider::Salesforce).await.expect("find");
        assert_eq!(found, Some(refreshed));
        assert_eq!(repo.list_for_chat(&chat).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn providers_are_stored_independently() {
        let repo = SqlTokenRepository::new(pool().await);
        let chat = ChatId::from("19:chat");

        repo.save(record("19:chat", Provider::Salesforce, "sf", None)).await.expect("save sf");
        repo.save(record("19:chat", Provider::Outlook, "graph", Some("r"))).await.expect("save graph");

        assert!(repo.delete(&chat, Provider::Salesforce).await.expect("delete"));
        assert!(!repo.delete(&chat, Provider::Salesforce).await.expect("second delete"));
        assert_eq!(repo.find(&chat, Provider::Salesforce).await.expect("find"), None);

        let outlook = repo.find(&chat, Provider::Outlook).await.expect("find").expect("present");
        assert_eq!(outlook.access_token, "graph");
        assert_eq!(outlook.refresh_token.as_deref(), Some("r"));
    }
}
