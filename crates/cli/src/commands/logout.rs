//! Operator-side revocation of stored sessions, for chats that cannot run
//! `/logout` themselves.

use teamsforce_core::config::{AppConfig, LoadOptions};
use teamsforce_core::domain::token::{ChatId, Provider};
use teamsforce_db::{connect_with_config, SqlTokenRepository, TokenRepository};

use crate::commands::{runtime, CommandResult, EXIT_CONFIG, EXIT_DATABASE, EXIT_RUNTIME, EXIT_STORE};

pub fn run(chat: &str, provider: Option<&str>) -> CommandResult {
    let chat = chat.trim();
    if chat.is_empty() {
        return CommandResult::failure("logout", "invalid_argument", "--chat must not be empty", EXIT_CONFIG);
    }
    let providers = match provider {
        Some(raw) => match Provider::parse(raw) {
            Some(provider) => vec![provider],
            None => {
                return CommandResult::failure(
                    "logout",
                    "invalid_argument",
                    format!("unknown provider `{raw}` (expected salesforce|outlook)"),
                    EXIT_CONFIG,
                );
            }
        },
        None => Provider::ALL.to_vec(),
    };

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "logout",
                "config_validation",
                format!("configuration issue: {error}"),
                EXIT_CONFIG,
            );
        }
    };
    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "logout",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                EXIT_RUNTIME,
            );
        }
    };

    let chat_id = ChatId::from(chat);
    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), EXIT_DATABASE))?;
        let tokens = SqlTokenRepository::new(pool.clone());

        let mut removed = Vec::new();
        for provider in &providers {
            let existed = tokens
                .delete(&chat_id, *provider)
                .await
                .map_err(|error| ("token_store", error.to_string(), EXIT_STORE))?;
            if existed {
                removed.push(provider.as_str());
            }
        }
        pool.close().await;
        Ok::<Vec<&'static str>, (&'static str, String, u8)>(removed)
    });

    match result {
        Ok(removed) if removed.is_empty() => {
            CommandResult::success("logout", format!("no stored tokens for chat `{chat}`"))
        }
        Ok(removed) => CommandResult::success(
            "logout",
            format!("removed {} token(s) for chat `{chat}`", removed.join(", ")),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("logout", error_class, message, exit_code)
        }
    }
}
