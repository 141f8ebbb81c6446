use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;

use teamsforce_core::config::AppConfig;
use teamsforce_core::domain::token::Provider;
use teamsforce_db::TokenRepository;

use crate::client::{AuthorizedClient, BaseUrl};
use crate::graph::GraphClient;
use crate::oauth::{HttpTokenExchanger, OAuthClients, OAuthError, TokenExchanger};
use crate::resolver::EntityResolver;
use crate::salesforce::SalesforceClient;
use crate::transport::{ApiTransport, ReqwestTransport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum ServicesError {
    #[error(transparent)]
    OAuth(#[from] OAuthError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Provider clients sharing one token store.
#[derive(Clone)]
pub struct CrmServices {
    pub oauth: OAuthClients,
    pub exchanger: Arc<dyn TokenExchanger>,
    pub tokens: Arc<dyn TokenRepository>,
    pub salesforce: Arc<SalesforceClient>,
    pub resolver: Arc<EntityResolver>,
    /// `None` when Outlook is disabled.
    pub graph: Option<Arc<GraphClient>>,
}

impl CrmServices {
    pub fn from_config(
        config: &AppConfig,
        tokens: Arc<dyn TokenRepository>,
    ) -> Result<Self, ServicesError> {
        let oauth = OAuthClients::from_config(&config.salesforce, &config.outlook);
        let exchanger: Arc<dyn TokenExchanger> = Arc::new(HttpTokenExchanger::new(
            oauth.clone(),
            StdDuration::from_secs(config.salesforce.timeout_secs),
        )?);
        let transport: Arc<dyn ApiTransport> =
            Arc::new(ReqwestTransport::new(StdDuration::from_secs(config.salesforce.timeout_secs))?);

        Ok(Self::assemble(config, oauth, tokens, exchanger, transport))
    }

    /// Wires the clients over caller-supplied seams.
    pub fn assemble(
        config: &AppConfig,
        oauth: OAuthClients,
        tokens: Arc<dyn TokenRepository>,
        exchanger: Arc<dyn TokenExchanger>,
        transport: Arc<dyn ApiTransport>,
    ) -> Self {
        let salesforce_session = Arc::new(AuthorizedClient::new(
            Provider::Salesforce,
            BaseUrl::Instance,
            oauth.salesforce.fallback_ttl,
            tokens.clone(),
            exchanger.clone(),
            transport.clone(),
        ));
        let salesforce =
            Arc::new(SalesforceClient::new(salesforce_session, config.salesforce.api_version.clone()));
        let resolver = Arc::new(EntityResolver::new(salesforce.clone()));

        let graph = oauth.outlook.as_ref().map(|outlook| {
            Arc::new(GraphClient::new(Arc::new(AuthorizedClient::new(
                Provider::Outlook,
                BaseUrl::Fixed(config.outlook.graph_base_url.clone()),
                outlook.fallback_ttl,
                tokens.clone(),
                exchanger.clone(),
                transport.clone(),
            ))))
        });

        Self { oauth, exchanger, tokens, salesforce, resolver, graph }
    }

    pub fn token_ttl(&self, provider: Provider) -> Duration {
        match provider {
            Provider::Salesforce => self.oauth.salesforce.fallback_ttl,
            Provider::Outlook => {
                self.oauth.outlook.as_ref().map(|client| client.fallback_ttl).unwrap_or(Duration::hours(1))
            }
        }
    }
}
