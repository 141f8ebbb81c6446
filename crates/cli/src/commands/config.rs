use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use teamsforce_core::config::{AppConfig, LoadOptions};
use toml::Value;

use crate::commands::{CommandResult, EXIT_CONFIG};

/// One reported setting: dotted key, display value, environment override.
struct Entry {
    key: &'static str,
    value: String,
    env_key: &'static str,
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::text(EXIT_CONFIG, format!("config validation failed: {error}"))
        }
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for entry in entries(&config) {
        let source = field_source(
            entry.key,
            Some(entry.env_key),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(entry.key, &entry.value, source));
    }

    CommandResult::text(0, lines.join("\n"))
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    let entry = |key, value: String, env_key| Entry { key, value, env_key };
    vec![
        entry("database.url", config.database.url.clone(), "TEAMSFORCE_DATABASE_URL"),
        entry(
            "database.max_connections",
            config.database.max_connections.to_string(),
            "TEAMSFORCE_DATABASE_MAX_CONNECTIONS",
        ),
        entry("teams.app_id", config.teams.app_id.clone(), "TEAMSFORCE_TEAMS_APP_ID"),
        entry(
            "teams.app_password",
            redact_secret(&config.teams.app_password),
            "TEAMSFORCE_TEAMS_APP_PASSWORD",
        ),
        entry(
            "teams.tenant_id",
            config.teams.tenant_id.clone().unwrap_or_else(|| "<unset>".to_string()),
            "TEAMSFORCE_TEAMS_TENANT_ID",
        ),
        entry("llm.provider", format!("{:?}", config.llm.provider), "TEAMSFORCE_LLM_PROVIDER"),
        entry("llm.model", config.llm.model.clone(), "TEAMSFORCE_LLM_MODEL"),
        entry(
            "llm.base_url",
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            "TEAMSFORCE_LLM_BASE_URL",
        ),
        entry(
            "llm.api_key",
            config.llm.api_key.as_ref().map(redact_secret).unwrap_or_else(|| "<unset>".to_string()),
            "TEAMSFORCE_LLM_API_KEY",
        ),
        entry("server.bind_address", config.server.bind_address.clone(), "TEAMSFORCE_SERVER_BIND_ADDRESS"),
        entry("server.port", config.server.port.to_string(), "TEAMSFORCE_SERVER_PORT"),
        entry("salesforce.client_id", config.salesforce.client_id.clone(), "TEAMSFORCE_SALESFORCE_CLIENT_ID"),
        entry(
            "salesforce.client_secret",
            redact_secret(&config.salesforce.client_secret),
            "TEAMSFORCE_SALESFORCE_CLIENT_SECRET",
        ),
        entry(
            "salesforce.redirect_uri",
            config.salesforce.redirect_uri.clone(),
            "TEAMSFORCE_SALESFORCE_REDIRECT_URI",
        ),
        entry("salesforce.login_url", config.salesforce.login_url.clone(), "TEAMSFORCE_SALESFORCE_LOGIN_URL"),
        entry(
            "salesforce.api_version",
            config.salesforce.api_version.clone(),
            "TEAMSFORCE_SALESFORCE_API_VERSION",
        ),
        entry("outlook.enabled", config.outlook.enabled.to_string(), "TEAMSFORCE_OUTLOOK_ENABLED"),
        entry("outlook.client_id", config.outlook.client_id.clone(), "TEAMSFORCE_OUTLOOK_CLIENT_ID"),
        entry(
            "outlook.client_secret",
            redact_secret(&config.outlook.client_secret),
            "TEAMSFORCE_OUTLOOK_CLIENT_SECRET",
        ),
        entry("outlook.tenant", config.outlook.tenant.clone(), "TEAMSFORCE_OUTLOOK_TENANT"),
        entry(
            "guardrails.deletes_enabled",
            config.guardrails.deletes_enabled.to_string(),
            "TEAMSFORCE_GUARDRAILS_DELETES_ENABLED",
        ),
        entry("logging.level", config.logging.level.clone(), "TEAMSFORCE_LOGGING_LEVEL"),
        entry("logging.format", format!("{:?}", config.logging.format), "TEAMSFORCE_LOGGING_FORMAT"),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("teamsforce.toml"), PathBuf::from("config/teamsforce.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Shows that a secret is set without revealing any of it.
fn redact_secret(secret: &SecretString) -> String {
    if secret.expose_secret().trim().is_empty() {
        "<empty>".to_string()
    } else {
        "<redacted>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, redact_secret};

    #[test]
    fn nested_keys_are_found_in_the_config_file() {
        let doc: Value = "[salesforce]\nclient_id = \"abc\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "salesforce.client_id"));
        assert!(!contains_path(&doc, "salesforce.client_secret"));
        assert!(!contains_path(&doc, "outlook.client_id"));
    }

    #[test]
    fn secrets_are_never_echoed() {
        assert_eq!(redact_secret(&"sf-consumer-secret".to_string().into()), "<redacted>");
        assert_eq!(redact_secret(&"  ".to_string().into()), "<empty>");
    }
}
