use serde::Serialize;
use teamsforce_agent::ChatCompletionsClient;
use teamsforce_core::config::{AppConfig, LoadOptions};
use teamsforce_core::domain::token::Provider;
use teamsforce_crm::OAuthClients;
use teamsforce_db::{connect_with_config, migrations};

use crate::commands::{runtime, CommandResult};

const EXIT_NOT_READY: u8 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { EXIT_NOT_READY };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult::text(exit_code, output);
    }

    CommandResult::text(exit_code, render_human(&report))
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.push(check_llm_endpoint(&config));
            checks.push(check_oauth_redirects(&config));
            checks.push(check_token_store(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.push(DoctorCheck::skipped("llm_endpoint"));
            checks.push(DoctorCheck::skipped("oauth_redirects"));
            checks.push(DoctorCheck::skipped("token_store"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_llm_endpoint(config: &AppConfig) -> DoctorCheck {
    match ChatCompletionsClient::from_config(&config.llm) {
        Ok(client) => DoctorCheck::pass(
            "llm_endpoint",
            format!("{:?} planner calls `{}`", config.llm.provider, client.chat_url()),
        ),
        Err(error) => DoctorCheck::fail("llm_endpoint", format!("{error:#}")),
    }
}

fn check_oauth_redirects(config: &AppConfig) -> DoctorCheck {
    let clients = OAuthClients::from_config(&config.salesforce, &config.outlook);
    let mut registered = Vec::new();
    for provider in Provider::ALL {
        let Ok(client) = clients.get(provider) else {
            continue;
        };
        if let Err(error) = client.authorization_url("doctor") {
            return DoctorCheck::fail("oauth_redirects", format!("{provider}: {error}"));
        }
        registered.push(format!("{} -> {}", provider.as_str(), client.redirect_uri));
    }
    DoctorCheck::pass("oauth_redirects", registered.join("; "))
}

fn check_token_store(config: &AppConfig) -> DoctorCheck {
    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck::fail(
                "token_store",
                format!("failed to initialize async runtime: {error}"),
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;
        let pending = migrations::pending(&pool)
            .await
            .map_err(|error| format!("failed to read migration state: {error}"));
        pool.close().await;
        pending
    });

    match result {
        Ok(0) => DoctorCheck::pass("token_store", format!("connected using `{}`", config.database.url)),
        Ok(pending) => DoctorCheck::fail(
            "token_store",
            format!("{pending} migration(s) pending; run `teamsforce migrate`"),
        ),
        Err(error) => DoctorCheck::fail("token_store", error),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
