use std::sync::Arc;
use std::time::Duration;

use teamsforce_agent::{
    ActionHandlers, AgentRuntime, ChatCompletionsClient, GuardrailPolicy, LlmClient, LoginService,
    Planner, PromptError,
};
use teamsforce_core::audit::{AuditSink, TracingAuditSink};
use teamsforce_core::config::{AppConfig, ConfigError, LoadOptions};
use teamsforce_core::conversation::SessionStore;
use teamsforce_crm::services::ServicesError;
use teamsforce_crm::CrmServices;
use teamsforce_db::{
    connect_with_settings, migrations, AuthStateRepository, DbPool, SqlAuthStateRepository,
    SqlTokenRepository, TokenRepository,
};
use teamsforce_teams::{
    ActivityDispatcher, BotConnector, ConnectorClient, ConnectorError, WelcomeHandler,
};
use thiserror::Error;
use tracing::info;

use crate::oauth::callback_templates;
use crate::routes::AppState;

const CONNECTOR_TIMEOUT_SECS: u64 = 15;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("crm clients failed to initialize: {0}")]
    Services(#[from] ServicesError),
    #[error("llm client failed to initialize: {0}")]
    Llm(String),
    #[error("planner prompt failed to load: {0}")]
    Prompt(#[from] PromptError),
    #[error("callback templates failed to load: {0}")]
    Templates(#[from] tera::Error),
    #[error("bot connector failed to initialize: {0}")]
    Connector(#[from] ConnectorError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let tokens: Arc<dyn TokenRepository> = Arc::new(SqlTokenRepository::new(db_pool.clone()));
    let auth_states: Arc<dyn AuthStateRepository> =
        Arc::new(SqlAuthStateRepository::new(db_pool.clone()));
    let services = CrmServices::from_config(&config, tokens)?;
    let llm: Arc<dyn LlmClient> = Arc::new(
        ChatCompletionsClient::from_config(&config.llm)
            .map_err(|error| BootstrapError::Llm(format!("{error:#}")))?,
    );
    let connector: Arc<dyn ConnectorClient> =
        Arc::new(BotConnector::new(&config.teams, Duration::from_secs(CONNECTOR_TIMEOUT_SECS))?);

    let state =
        app_state(&config, services, auth_states, llm, connector, Arc::new(TracingAuditSink))?;
    info!(
        event_name = "system.bootstrap.services_ready",
        correlation_id = "bootstrap",
        outlook_enabled = state.services.graph.is_some(),
        llm_provider = ?config.llm.provider,
        "agent runtime and crm clients ready"
    );

    Ok(Application { config, db_pool, state })
}

/// Wires the agent runtime and the route state over the given seams.
pub fn app_state(
    config: &AppConfig,
    services: CrmServices,
    auth_states: Arc<dyn AuthStateRepository>,
    llm: Arc<dyn LlmClient>,
    connector: Arc<dyn ConnectorClient>,
    audit: Arc<dyn AuditSink>,
) -> Result<AppState, BootstrapError> {
    let sessions = SessionStore::new();
    let planner = Planner::new(llm, services.graph.is_some())?;
    let login = LoginService::new(services.oauth.clone(), auth_states.clone());
    let handlers = ActionHandlers::new(
        services.clone(),
        GuardrailPolicy::from(&config.guardrails),
        audit.clone(),
    );
    let runtime = AgentRuntime::new(sessions.clone(), planner, handlers, login, audit.clone());

    let mut dispatcher = ActivityDispatcher::new();
    dispatcher.register(runtime);
    dispatcher.register(WelcomeHandler);

    Ok(AppState {
        dispatcher: Arc::new(dispatcher),
        connector,
        services,
        auth_states,
        sessions,
        audit,
        templates: Arc::new(callback_templates()?),
    })
}
