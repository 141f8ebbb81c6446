//! Token refresh client: runs provider calls with the stored access token and
//! recovers from an expired session with one refresh and one retry.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use teamsforce_core::domain::token::{ChatId, Provider, TokenRecord};
use teamsforce_core::errors::{AuthFailure, CrmError};
use teamsforce_db::{RepositoryError, TokenRepository};

use crate::classify::classify_failure;
use crate::oauth::TokenExchanger;
use crate::transport::{ApiRequest, ApiResponse, ApiTransport};

/// Where request paths are resolved against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BaseUrl {
    /// The `instance_url` stored with the token (Salesforce).
    Instance,
    Fixed(String),
}

pub struct AuthorizedClient {
    provider: Provider,
    base_url: BaseUrl,
    fallback_ttl: Duration,
    tokens: Arc<dyn TokenRepository>,
    exchanger: Arc<dyn TokenExchanger>,
    transport: Arc<dyn ApiTransport>,
}

impl AuthorizedClient {
    pub fn new(
        provider: Provider,
        base_url: BaseUrl,
        fallback_ttl: Duration,
        tokens: Arc<dyn TokenRepository>,
        exchanger: Arc<dyn TokenExchanger>,
        transport: Arc<dyn ApiTransport>,
    ) -> Self {
        Self { provider, base_url, fallback_ttl, tokens, exchanger, transport }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Runs `request` for `chat_id`.
    ///
    /// At most one refresh happens per call, and the refreshed token is
    /// persisted before the retry is sent.
    pub async fn execute(
        &self,
        chat_id: &ChatId,
        request: &ApiRequest,
    ) -> Result<ApiResponse, CrmError> {
        let mut record = self
            .tokens
            .find(chat_id, self.provider)
            .await
            .map_err(persistence)?
            .ok_or_else(|| CrmError::auth_required(self.provider, AuthFailure::NoToken))?;

        let mut refreshed = false;
        if record.is_expired(Utc::now()) {
            debug!(
                event_name = "crm.token.expired",
                provider = self.provider.as_str(),
                chat_id = %chat_id,
                "stored token is past its expiry, refreshing before the call"
            );
            record = self.refresh(record).await?;
            refreshed = true;
        }

        let response = self.send(&record, request).await?;
        if !response.is_unauthorized() {
            return self.finish(response);
        }

        if refreshed {
            return Err(self.rejected_after_refresh(chat_id));
        }

        record = self.refresh(record).await?;
        let retried = self.send(&record, request).await?;
        if retried.is_unauthorized() {
            return Err(self.rejected_after_refresh(chat_id));
        }
        self.finish(retried)
    }

    async fn refresh(&self, current: TokenRecord) -> Result<TokenRecord, CrmError> {
        let Some(refresh_token) = current.refresh_token.clone().filter(|token| !token.is_empty())
        else {
            warn!(
                event_name = "crm.token.refresh_unavailable",
                provider = self.provider.as_str(),
                chat_id = %current.chat_id,
                "no refresh token stored"
            );
            return Err(CrmError::auth_required(self.provider, AuthFailure::NoRefreshToken));
        };

        let grant = match self.exchanger.refresh(self.provider, &refresh_token).await {
            Ok(grant) => grant,
            Err(error) => {
                warn!(
                    event_name = "crm.token.refresh_failed",
                    provider = self.provider.as_str(),
                    chat_id = %current.chat_id,
                    error = %error,
                    "token refresh failed"
                );
                return Err(CrmError::auth_required(
                    self.provider,
                    AuthFailure::RefreshRejected(error.to_string()),
                ));
            }
        };

        let updated = TokenRecord::from_grant(
            current.chat_id.clone(),
            self.provider,
            grant,
            Some(&current),
            self.fallback_ttl,
            Utc::now(),
        );
        self.tokens.save(updated.clone()).await.map_err(persistence)?;

        info!(
            event_name = "crm.token.refreshed",
            provider = self.provider.as_str(),
            chat_id = %updated.chat_id,
            "access token refreshed"
        );
        Ok(updated)
    }

    async fn send(
        &self,
        record: &TokenRecord,
        request: &ApiRequest,
    ) -> Result<ApiResponse, CrmError> {
        let base_url = match &self.base_url {
            BaseUrl::Fixed(url) => url.as_str(),
            BaseUrl::Instance => {
                record.instance_url.as_deref().filter(|url| !url.is_empty()).ok_or_else(|| {
                    CrmError::auth_required(self.provider, AuthFailure::MissingInstanceUrl)
                })?
            }
        };

        let response = self
            .transport
            .send(base_url, &record.access_token, request)
            .await
            .map_err(|error| CrmError::upstream(self.provider, None, error.to_string()))?;

        debug!(
            event_name = "crm.request.completed",
            provider = self.provider.as_str(),
            method = request.method.as_str(),
            path = %request.path,
            status = response.status,
            "provider request completed"
        );
        Ok(response)
    }

    fn finish(&self, response: ApiResponse) -> Result<ApiResponse, CrmError> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(classify_failure(self.provider, &response))
        }
    }

    fn rejected_after_refresh(&self, chat_id: &ChatId) -> CrmError {
        warn!(
            event_name = "crm.token.rejected_after_refresh",
            provider = self.provider.as_str(),
            chat_id = %chat_id,
            "provider rejected the refreshed token"
        );
        CrmError::auth_required(self.provider, AuthFailure::RejectedAfterRefresh)
    }
}

fn persistence(error: RepositoryError) -> CrmError {
    CrmError::Persistence(error.to_string())
}
