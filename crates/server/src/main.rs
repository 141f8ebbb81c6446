mod bootstrap;
mod health;
mod messages;
mod oauth;
mod routes;
#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use teamsforce_core::config::{AppConfig, LoadOptions};
use teamsforce_core::conversation::SessionStore;
use teamsforce_db::AuthStateRepository;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// How often expired login nonces and idle chats are swept.
const SWEEP_INTERVAL_SECS: u64 = 600;
/// Chats without a turn for this long lose their conversation state.
const SESSION_IDLE_HOURS: i64 = 24;

fn init_logging(config: &AppConfig) {
    use teamsforce_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging comes up before bootstrap so startup failures are visible.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    spawn_sweeper(app.state.auth_states.clone(), app.state.sessions.clone());

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let router = routes::router(app.state.clone(), app.db_pool.clone());

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });

    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "teamsforce-server listening"
    );
    wait_for_shutdown().await?;
    info!(event_name = "system.server.stopping", correlation_id = "shutdown", "teamsforce-server stopping");

    let _ = stop_tx.send(());
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, server).await {
        Ok(joined) => joined??,
        Err(_) => warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "in-flight requests did not finish before the grace period"
        ),
    }

    app.db_pool.close().await;
    Ok(())
}

fn spawn_sweeper(states: Arc<dyn AuthStateRepository>, sessions: SessionStore) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            sweep(states.as_ref(), &sessions, Utc::now()).await;
        }
    });
}

/// Removes expired login nonces and conversation state of idle chats.
async fn sweep(states: &dyn AuthStateRepository, sessions: &SessionStore, now: DateTime<Utc>) {
    match states.purge_expired(now).await {
        Ok(0) => {}
        Ok(purged) => info!(
            event_name = "auth.state.purged",
            correlation_id = "sweeper",
            purged,
            "expired login states removed"
        ),
        Err(error) => warn!(
            event_name = "auth.state.purge_failed",
            correlation_id = "sweeper",
            error = %error,
            "expired login states could not be removed"
        ),
    }

    let evicted = sessions.purge_idle(now - ChronoDuration::hours(SESSION_IDLE_HOURS));
    if evicted > 0 {
        info!(
            event_name = "conversation.sessions.evicted",
            correlation_id = "sweeper",
            evicted,
            remaining = sessions.len(),
            "idle conversation state removed"
        );
    }
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
