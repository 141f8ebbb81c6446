use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::token::MAX_TOKEN_TTL_SECS;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub teams: TeamsConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub salesforce: SalesforceConfig,
    pub outlook: OutlookConfig,
    pub guardrails: GuardrailConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Bot Framework registration used to authenticate outbound replies.
#[derive(Clone, Debug)]
pub struct TeamsConfig {
    pub app_id: String,
    pub app_password: SecretString,
    pub tenant_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    /// Model name, or the deployment name for Azure OpenAI.
    pub model: String,
    pub api_version: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub public_base_url: Option<String>,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SalesforceConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
    pub login_url: String,
    pub api_version: String,
    pub scope: String,
    /// Lifetime assumed for access tokens when the token endpoint omits `expires_in`.
    pub session_ttl_secs: u64,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct OutlookConfig {
    pub enabled: bool,
    pub client_id: String,
    pub client_secret: SecretString,
    pub tenant: String,
    pub authority_url: String,
    pub redirect_uri: String,
    pub scopes: String,
    pub graph_base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct GuardrailConfig {
    pub deletes_enabled: bool,
    pub default_list_limit: u32,
    pub max_list_limit: u32,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    AzureOpenAi,
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub teams_app_id: Option<String>,
    pub teams_app_password: Option<String>,
    pub server_port: Option<u16>,
    pub salesforce_client_id: Option<String>,
    pub salesforce_client_secret: Option<String>,
    pub outlook_enabled: Option<bool>,
    pub outlook_client_id: Option<String>,
    pub outlook_client_secret: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://teamsforce.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            teams: TeamsConfig {
                app_id: String::new(),
                app_password: String::new().into(),
                tenant_id: None,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                api_version: "2024-06-01".to_string(),
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 3978,
                public_base_url: None,
                graceful_shutdown_secs: 15,
            },
            salesforce: SalesforceConfig {
                client_id: String::new(),
                client_secret: String::new().into(),
                redirect_uri: "http://localhost:3978/salesforce/callback".to_string(),
                login_url: "https://login.salesforce.com".to_string(),
                api_version: "v60.0".to_string(),
                scope: "api refresh_token".to_string(),
                session_ttl_secs: 7200,
                timeout_secs: 30,
            },
            outlook: OutlookConfig {
                enabled: false,
                client_id: String::new(),
                client_secret: String::new().into(),
                tenant: "common".to_string(),
                authority_url: "https://login.microsoftonline.com".to_string(),
                redirect_uri: "http://localhost:3978/outlook/callback".to_string(),
                scopes: "offline_access User.Read Mail.Read".to_string(),
                graph_base_url: "https://graph.microsoft.com/v1.0".to_string(),
                timeout_secs: 30,
            },
            guardrails: GuardrailConfig {
                deletes_enabled: true,
                default_list_limit: 20,
                max_list_limit: 200,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "azure_openai" | "azure" => Ok(Self::AzureOpenAi),
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected azure_openai|openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("teamsforce.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(teams) = patch.teams {
            if let Some(app_id) = teams.app_id {
                self.teams.app_id = app_id;
            }
            if let Some(app_password) = teams.app_password {
                self.teams.app_password = secret_value(app_password);
            }
            if let Some(tenant_id) = teams.tenant_id {
                self.teams.tenant_id = Some(tenant_id);
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(api_version) = llm.api_version {
                self.llm.api_version = api_version;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(public_base_url) = server.public_base_url {
                self.server.public_base_url = Some(public_base_url);
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(salesforce) = patch.salesforce {
            if let Some(client_id) = salesforce.client_id {
                self.salesforce.client_id = client_id;
            }
            if let Some(client_secret) = salesforce.client_secret {
                self.salesforce.client_secret = secret_value(client_secret);
            }
            if let Some(redirect_uri) = salesforce.redirect_uri {
                self.salesforce.redirect_uri = redirect_uri;
            }
            if let Some(login_url) = salesforce.login_url {
                self.salesforce.login_url = login_url;
            }
            if let Some(api_version) = salesforce.api_version {
                self.salesforce.api_version = api_version;
            }
            if let Some(scope) = salesforce.scope {
                self.salesforce.scope = scope;
            }
            if let Some(session_ttl_secs) = salesforce.session_ttl_secs {
                self.salesforce.session_ttl_secs = session_ttl_secs;
            }
            if let Some(timeout_secs) = salesforce.timeout_secs {
                self.salesforce.timeout_secs = timeout_secs;
            }
        }

        if let Some(outlook) = patch.outlook {
            if let Some(enabled) = outlook.enabled {
                self.outlook.enabled = enabled;
            }
            if let Some(client_id) = outlook.client_id {
                self.outlook.client_id = client_id;
            }
            if let Some(client_secret) = outlook.client_secret {
                self.outlook.client_secret = secret_value(client_secret);
            }
            if let Some(tenant) = outlook.tenant {
                self.outlook.tenant = tenant;
            }
            if let Some(authority_url) = outlook.authority_url {
                self.outlook.authority_url = authority_url;
            }
            if let Some(redirect_uri) = outlook.redirect_uri {
                self.outlook.redirect_uri = redirect_uri;
            }
            if let Some(scopes) = outlook.scopes {
                self.outlook.scopes = scopes;
            }
            if let Some(graph_base_url) = outlook.graph_base_url {
                self.outlook.graph_base_url = graph_base_url;
            }
            if let Some(timeout_secs) = outlook.timeout_secs {
                self.outlook.timeout_secs = timeout_secs;
            }
        }

        if let Some(guardrails) = patch.guardrails {
            if let Some(deletes_enabled) = guardrails.deletes_enabled {
                self.guardrails.deletes_enabled = deletes_enabled;
            }
            if let Some(default_list_limit) = guardrails.default_list_limit {
                self.guardrails.default_list_limit = default_list_limit;
            }
            if let Some(max_list_limit) = guardrails.max_list_limit {
                self.guardrails.max_list_limit = max_list_limit;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TEAMSFORCE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TEAMSFORCE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("TEAMSFORCE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TEAMSFORCE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("TEAMSFORCE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TEAMSFORCE_TEAMS_APP_ID") {
            self.teams.app_id = value;
        }
        if let Some(value) = read_env("TEAMSFORCE_TEAMS_APP_PASSWORD") {
            self.teams.app_password = secret_value(value);
        }
        if let Some(value) = read_env("TEAMSFORCE_TEAMS_TENANT_ID") {
            self.teams.tenant_id = Some(value);
        }

        if let Some(value) = read_env("TEAMSFORCE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("TEAMSFORCE_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("TEAMSFORCE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("TEAMSFORCE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("TEAMSFORCE_LLM_API_VERSION") {
            self.llm.api_version = value;
        }
        if let Some(value) = read_env("TEAMSFORCE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("TEAMSFORCE_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TEAMSFORCE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        let port = read_env("TEAMSFORCE_SERVER_PORT").or_else(|| read_env("PORT"));
        if let Some(value) = port {
            self.server.port = parse_u16("TEAMSFORCE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("TEAMSFORCE_SERVER_PUBLIC_BASE_URL") {
            self.server.public_base_url = Some(value);
        }
        if let Some(value) = read_env("TEAMSFORCE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("TEAMSFORCE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("TEAMSFORCE_SALESFORCE_CLIENT_ID") {
            self.salesforce.client_id = value;
        }
        if let Some(value) = read_env("TEAMSFORCE_SALESFORCE_CLIENT_SECRET") {
            self.salesforce.client_secret = secret_value(value);
        }
        if let Some(value) = read_env("TEAMSFORCE_SALESFORCE_REDIRECT_URI") {
            self.salesforce.redirect_uri = value;
        }
        if let Some(value) = read_env("TEAMSFORCE_SALESFORCE_LOGIN_URL") {
            self.salesforce.login_url = value;
        }
        if let Some(value) = read_env("TEAMSFORCE_SALESFORCE_API_VERSION") {
            self.salesforce.api_version = value;
        }
        if let Some(value) = read_env("TEAMSFORCE_SALESFORCE_SESSION_TTL_SECS") {
            self.salesforce.session_ttl_secs =
                parse_u64("TEAMSFORCE_SALESFORCE_SESSION_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("TEAMSFORCE_OUTLOOK_ENABLED") {
            self.outlook.enabled = parse_bool("TEAMSFORCE_OUTLOOK_ENABLED", &value)?;
        }
        if let Some(value) = read_env("TEAMSFORCE_OUTLOOK_CLIENT_ID") {
            self.outlook.client_id = value;
        }
        if let Some(value) = read_env("TEAMSFORCE_OUTLOOK_CLIENT_SECRET") {
            self.outlook.client_secret = secret_value(value);
        }
        if let Some(value) = read_env("TEAMSFORCE_OUTLOOK_TENANT") {
            self.outlook.tenant = value;
        }
        if let Some(value) = read_env("TEAMSFORCE_OUTLOOK_REDIRECT_URI") {
            self.outlook.redirect_uri = value;
        }

        if let Some(value) = read_env("TEAMSFORCE_GUARDRAILS_DELETES_ENABLED") {
            self.guardrails.deletes_enabled =
                parse_bool("TEAMSFORCE_GUARDRAILS_DELETES_ENABLED", &value)?;
        }

        let log_level =
            read_env("TEAMSFORCE_LOGGING_LEVEL").or_else(|| read_env("TEAMSFORCE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TEAMSFORCE_LOGGING_FORMAT").or_else(|| read_env("TEAMSFORCE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(app_id) = overrides.teams_app_id {
            self.teams.app_id = app_id;
        }
        if let Some(app_password) = overrides.teams_app_password {
            self.teams.app_password = secret_value(app_password);
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(client_id) = overrides.salesforce_client_id {
            self.salesforce.client_id = client_id;
        }
        if let Some(client_secret) = overrides.salesforce_client_secret {
            self.salesforce.client_secret = secret_value(client_secret);
        }
        if let Some(enabled) = overrides.outlook_enabled {
            self.outlook.enabled = enabled;
        }
        if let Some(client_id) = overrides.outlook_client_id {
            self.outlook.client_id = client_id;
        }
        if let Some(client_secret) = overrides.outlook_client_secret {
            self.outlook.client_secret = secret_value(client_secret);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_teams(&self.teams)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_salesforce(&self.salesforce)?;
        validate_outlook(&self.outlook)?;
        validate_guardrails(&self.guardrails)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("teamsforce.toml"), PathBuf::from("config/teamsforce.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_teams(teams: &TeamsConfig) -> Result<(), ConfigError> {
    let app_id = teams.app_id.trim();
    if app_id.is_empty() {
        return Err(ConfigError::Validation(
            "teams.app_id is required. Find it in Azure Portal > Azure Bot > Configuration > Microsoft App ID".to_string(),
        ));
    }
    if uuid::Uuid::parse_str(app_id).is_err() {
        return Err(ConfigError::Validation(format!(
            "teams.app_id must be a GUID (got `{app_id}`). Copy the Microsoft App ID, not the bot handle"
        )));
    }

    if teams.app_password.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "teams.app_password is required. Create a client secret under Azure Portal > App registrations > Certificates & secrets".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "llm.model is required (deployment name for azure_openai)".to_string(),
        ));
    }

    let missing_key =
        llm.api_key.as_ref().map(|value| value.expose_secret().trim().is_empty()).unwrap_or(true);
    let missing_base_url =
        llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);

    match llm.provider {
        LlmProvider::AzureOpenAi => {
            if missing_key || missing_base_url {
                return Err(ConfigError::Validation(
                    "llm.api_key and llm.base_url (resource endpoint) are required for azure_openai"
                        .to_string(),
                ));
            }
        }
        LlmProvider::OpenAi => {
            if missing_key {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            if missing_base_url {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    if let Some(base_url) = &server.public_base_url {
        ensure_http_url("server.public_base_url", base_url)?;
    }

    Ok(())
}

fn validate_salesforce(salesforce: &SalesforceConfig) -> Result<(), ConfigError> {
    if salesforce.client_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "salesforce.client_id is required. Use the Consumer Key of your Connected App"
                .to_string(),
        ));
    }
    if salesforce.client_secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "salesforce.client_secret is required. Use the Consumer Secret of your Connected App"
                .to_string(),
        ));
    }
    ensure_http_url("salesforce.redirect_uri", &salesforce.redirect_uri)?;
    ensure_http_url("salesforce.login_url", &salesforce.login_url)?;

    if !salesforce.api_version.starts_with('v') {
        return Err(ConfigError::Validation(
            "salesforce.api_version must look like `v60.0`".to_string(),
        ));
    }
    if salesforce.session_ttl_secs < 60 || salesforce.session_ttl_secs > MAX_TOKEN_TTL_SECS as u64 {
        return Err(ConfigError::Validation(format!(
            "salesforce.session_ttl_secs must be in range 60..={MAX_TOKEN_TTL_SECS}"
        )));
    }
    if salesforce.timeout_secs == 0 || salesforce.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "salesforce.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_outlook(outlook: &OutlookConfig) -> Result<(), ConfigError> {
    if !outlook.enabled {
        return Ok(());
    }

    if outlook.client_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "outlook.enabled is true but outlook.client_id is missing".to_string(),
        ));
    }
    if outlook.client_secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "outlook.enabled is true but outlook.client_secret is missing".to_string(),
        ));
    }
    if outlook.tenant.trim().is_empty() {
        return Err(ConfigError::Validation(
            "outlook.tenant must not be empty (use `common` for multi-tenant apps)".to_string(),
        ));
    }
    ensure_http_url("outlook.redirect_uri", &outlook.redirect_uri)?;
    ensure_http_url("outlook.authority_url", &outlook.authority_url)?;
    ensure_http_url("outlook.graph_base_url", &outlook.graph_base_url)?;

    if outlook.timeout_secs == 0 || outlook.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "outlook.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_guardrails(guardrails: &GuardrailConfig) -> Result<(), ConfigError> {
    if guardrails.max_list_limit == 0 || guardrails.max_list_limit > 2000 {
        return Err(ConfigError::Validation(
            "guardrails.max_list_limit must be in range 1..=2000".to_string(),
        ));
    }
    if guardrails.default_list_limit == 0
        || guardrails.default_list_limit > guardrails.max_list_limit
    {
        return Err(ConfigError::Validation(
            "guardrails.default_list_limit must be in range 1..=max_list_limit".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn ensure_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{key} must start with http:// or https://")))
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    teams: Option<TeamsPatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    salesforce: Option<SalesforcePatch>,
    outlook: Option<OutlookPatch>,
    guardrails: Option<GuardrailPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TeamsPatch {
    app_id: Option<String>,
    app_password: Option<String>,
    tenant_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    api_version: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    public_base_url: Option<String>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SalesforcePatch {
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_uri: Option<String>,
    login_url: Option<String>,
    api_version: Option<String>,
    scope: Option<String>,
    session_ttl_secs: Option<u64>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct OutlookPatch {
    enabled: Option<bool>,
    client_id: Option<String>,
    client_secret: Option<String>,
    tenant: Option<String>,
    authority_url: Option<String>,
    redirect_uri: Option<String>,
    scopes: Option<String>,
    graph_base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GuardrailPatch {
    deletes_enabled: Option<bool>,
    default_list_limit: Option<u32>,
    max_list_limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
