//! OAuth2 authorization-code and refresh-token grants for Salesforce and
//! Microsoft identity.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use teamsforce_core::config::{OutlookConfig, SalesforceConfig};
use teamsforce_core::domain::token::{bounded_lifetime, Provider, TokenGrant, MAX_TOKEN_TTL_SECS};

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("{0} is not configured")]
    NotConfigured(Provider),
    #[error("invalid oauth url `{0}`")]
    InvalidUrl(String),
    #[error("token request failed: {0}")]
    Request(String),
    #[error("token endpoint returned {status}: {description}")]
    Rejected { status: u16, error: Option<String>, description: String },
    #[error("failed to decode token response: {0}")]
    Decode(String),
    #[error("token endpoint returned an empty access token")]
    EmptyAccessToken,
}

/// Client registration and endpoints for one provider.
#[derive(Clone, Debug)]
pub struct OAuthClientConfig {
    pub provider: Provider,
    pub authorize_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
    pub scope: String,
    /// Lifetime assumed when the token response has no `expires_in`.
    pub fallback_ttl: Duration,
}

impl OAuthClientConfig {
    pub fn salesforce(config: &SalesforceConfig) -> Self {
        let login_url = config.login_url.trim_end_matches('/');
        Self {
            provider: Provider::Salesforce,
            authorize_url: format!("{login_url}/services/oauth2/authorize"),
            token_url: format!("{login_url}/services/oauth2/token"),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scope: normalize_scope(&config.scope),
            fallback_ttl: bounded_lifetime(
                i64::try_from(config.session_ttl_secs).unwrap_or(MAX_TOKEN_TTL_SECS),
            ),
        }
    }

    pub fn outlook(config: &OutlookConfig) -> Self {
        let authority = format!(
            "{}/{}/oauth2/v2.0",
            config.authority_url.trim_end_matches('/'),
            config.tenant.trim()
        );
        Self {
            provider: Provider::Outlook,
            authorize_url: format!("{authority}/authorize"),
            token_url: format!("{authority}/token"),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scope: normalize_scope(&config.scopes),
            fallback_ttl: Duration::hours(1),
        }
    }

    /// URL the user opens to grant access; `state` comes back on the callback.
    pub fn authorization_url(&self, state: &str) -> Result<String, OAuthError> {
        let mut params = vec![
            ("response_type", "code"),
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("scope", self.scope.as_str()),
            ("state", state),
        ];
        if self.provider == Provider::Outlook {
            params.push(("response_mode", "query"));
        }

        reqwest::Url::parse_with_params(&self.authorize_url, &params)
            .map(String::from)
            .map_err(|_| OAuthError::InvalidUrl(self.authorize_url.clone()))
    }
}

/// Registered providers. Outlook is absent when disabled in config.
#[derive(Clone, Debug)]
pub struct OAuthClients {
    pub salesforce: OAuthClientConfig,
    pub outlook: Option<OAuthClientConfig>,
}

impl OAuthClients {
    pub fn from_config(salesforce: &SalesforceConfig, outlook: &OutlookConfig) -> Self {
        Self {
            salesforce: OAuthClientConfig::salesforce(salesforce),
            outlook: outlook.enabled.then(|| OAuthClientConfig::outlook(outlook)),
        }
    }

    pub fn get(&self, provider: Provider) -> Result<&OAuthClientConfig, OAuthError> {
        match provider {
            Provider::Salesforce => Ok(&self.salesforce),
            Provider::Outlook => self.outlook.as_ref().ok_or(OAuthError::NotConfigured(provider)),
        }
    }

    pub fn is_enabled(&self, provider: Provider) -> bool {
        self.get(provider).is_ok()
    }
}

/// Token endpoint operations, behind a trait so the refresh flow can be faked.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange_code(&self, provider: Provider, code: &str) -> Result<TokenGrant, OAuthError>;

    async fn refresh(&self, provider: Provider, refresh_token: &str)
        -> Result<TokenGrant, OAuthError>;
}

pub struct HttpTokenExchanger {
    http: reqwest::Client,
    clients: OAuthClients,
}

#[derive(Deserialize)]
struct TokenErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

impl HttpTokenExchanger {
    pub fn new(clients: OAuthClients, timeout: StdDuration) -> Result<Self, OAuthError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| OAuthError::Request(error.to_string()))?;
        Ok(Self { http, clients })
    }

    pub fn clients(&self) -> &OAuthClients {
        &self.clients
    }

    async fn post_form(
        &self,
        client: &OAuthClientConfig,
        form: &[(&str, &str)],
    ) -> Result<TokenGrant, OAuthError> {
        let response = self
            .http
            .post(&client.token_url)
            .form(form)
            .send()
            .await
            .map_err(|error| OAuthError::Request(error.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|error| OAuthError::Request(error.to_string()))?;

        if !status.is_success() {
            let parsed = serde_json::from_str::<TokenErrorBody>(&body).ok();
            let error = parsed.as_ref().and_then(|body| body.error.clone());
            let description = parsed
                .and_then(|body| body.error_description)
                .or_else(|| error.clone())
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(OAuthError::Rejected { status: status.as_u16(), error, description });
        }

        let grant: TokenGrant =
            serde_json::from_str(&body).map_err(|error| OAuthError::Decode(error.to_string()))?;
        if grant.access_token.is_empty() {
            return Err(OAuthError::EmptyAccessToken);
        }
        Ok(grant)
    }
}

#[async_trait]
impl TokenExchanger for HttpTokenExchanger {
    async fn exchange_code(&self, provider: Provider, code: &str) -> Result<TokenGrant, OAuthError> {
        let client = self.clients.get(provider)?;
        let secret = client.client_secret.expose_secret();
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", client.client_id.as_str()),
            ("client_secret", secret),
            ("redirect_uri", client.redirect_uri.as_str()),
        ];
        if provider == Provider::Outlook {
            form.push(("scope", client.scope.as_str()));
        }

        let result = self.post_form(client, &form).await;
        match &result {
            Ok(_) => info!(
                event_name = "oauth.code.exchanged",
                provider = provider.as_str(),
                "authorization code exchanged"
            ),
            Err(error) => warn!(
                event_name = "oauth.code.exchange_failed",
                provider = provider.as_str(),
                error = %error,
                "authorization code exchange failed"
            ),
        }
        result
    }

    async fn refresh(
        &self,
        provider: Provider,
        refresh_token: &str,
    ) -> Result<TokenGrant, OAuthError> {
        let client = self.clients.get(provider)?;
        let secret = client.client_secret.expose_secret();
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client.client_id.as_str()),
            ("client_secret", secret),
        ];
        if provider == Provider::Outlook {
            form.push(("scope", client.scope.as_str()));
        }

        self.post_form(client, &form).await
    }
}

fn normalize_scope(raw: &str) -> String {
    raw.split(|ch: char| ch == ',' || ch.is_whitespace())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
