//! Route-level fixtures: the real router over in-memory repositories and
//! scripted provider seams.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::Router;

use teamsforce_agent::LlmClient;
use teamsforce_core::audit::InMemoryAuditSink;
use teamsforce_core::config::AppConfig;
use teamsforce_core::conversation::SessionStore;
use teamsforce_core::domain::token::{Provider, TokenGrant};
use teamsforce_crm::{
    ApiRequest, ApiResponse, ApiTransport, CrmServices, OAuthClients, OAuthError, TokenExchanger,
    TransportError,
};
use teamsforce_db::{connect_with_settings, DbPool, InMemoryAuthStateRepository, InMemoryTokenRepository};
use teamsforce_teams::InMemoryConnector;

use crate::bootstrap::app_state;
use crate::routes::{self, AppState};

pub const CHAT: &str = "19:chat@thread.v2";

pub struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .expect("llm lock")
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted plan left"))
    }
}

pub struct FakeExchanger {
    accept: bool,
    calls: AtomicUsize,
}

#[async_trait]
impl TokenExchanger for FakeExchanger {
    async fn exchange_code(&self, _provider: Provider, _code: &str) -> Result<TokenGrant, OAuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.accept {
            return Err(OAuthError::Rejected {
                status: 400,
                error: Some("invalid_grant".to_owned()),
                description: "authentication failure".to_owned(),
            });
        }
        Ok(TokenGrant {
            access_token: "exchanged-token".to_owned(),
            refresh_token: Some("refresh-token".to_owned()),
            instance_url: Some("https://acme.my.salesforce.com".to_owned()),
            token_type: Some("Bearer".to_owned()),
            scope: None,
            expires_in: None,
        })
    }

    async fn refresh(&self, _provider: Provider, _token: &str) -> Result<TokenGrant, OAuthError> {
        Err(OAuthError::Request("refresh not scripted".to_owned()))
    }
}

struct OfflineTransport;

#[async_trait]
impl ApiTransport for OfflineTransport {
    async fn send(
        &self,
        _base_url: &str,
        _bearer_token: &str,
        _request: &ApiRequest,
    ) -> Result<ApiResponse, TransportError> {
        Err(TransportError::Request("network disabled in tests".to_owned()))
    }
}

pub struct TestApp {
    pub state: AppState,
    pub db_pool: DbPool,
    pub connector: Arc<InMemoryConnector>,
    pub tokens: Arc<InMemoryTokenRepository>,
    pub auth_states: Arc<InMemoryAuthStateRepository>,
    pub audit: InMemoryAuditSink,
    llm: Arc<ScriptedLlm>,
    exchanger: Arc<FakeExchanger>,
}

impl TestApp {
    pub async fn new(plans: Vec<&str>) -> Self {
        Self::build(plans, true).await
    }

    pub async fn rejecting_exchange() -> Self {
        Self::build(vec![], false).await
    }

    async fn build(plans: Vec<&str>, accept: bool) -> Self {
        let config = AppConfig::default();
        let connector = Arc::new(InMemoryConnector::default());
        let tokens = Arc::new(InMemoryTokenRepository::default());
        let auth_states = Arc::new(InMemoryAuthStateRepository::default());
        let audit = InMemoryAuditSink::default();
        let llm = Arc::new(ScriptedLlm {
            replies: Mutex::new(plans.into_iter().map(str::to_owned).collect()),
            calls: AtomicUsize::new(0),
        });
        let exchanger = Arc::new(FakeExchanger { accept, calls: AtomicUsize::new(0) });

        let services = CrmServices::assemble(
            &config,
            OAuthClients::from_config(&config.salesforce, &config.outlook),
            tokens.clone(),
            exchanger.clone(),
            Arc::new(OfflineTransport),
        );
        let state = app_state(
            &config,
            services,
            auth_states.clone(),
            llm.clone(),
            connector.clone(),
            Arc::new(audit.clone()),
        )
        .expect("app state");
        let db_pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");

        Self { state, db_pool, connector, tokens, auth_states, audit, llm, exchanger }
    }

    pub fn router(&self) -> Router {
        routes::router(self.state.clone(), self.db_pool.clone())
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.state.sessions
    }

    pub fn llm_calls(&self) -> usize {
        self.llm.calls.load(Ordering::SeqCst)
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchanger.calls.load(Ordering::SeqCst)
    }
}
