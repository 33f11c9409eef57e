//! Mailway relay - SMTP listener that turns incoming mail into signed
//! webhook calls.

use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use tokio::runtime::Handle;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relay::{server, Config, MailHandler, Pipeline};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("relay_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        listen_addr = %config.listen_addr,
        instance_hostname = %config.instance_hostname,
        maildb_root = %config.maildb_root.display(),
        status_url = %config.status_url,
        server_jwt_set = !config.server_jwt.is_empty(),
        webhook_max_attempts = config.webhook_max_attempts,
        webhook_timeout_ms = config.webhook_timeout_ms,
        "config_loaded"
    );

    let pipeline: Arc<dyn MailHandler> =
        Arc::new(Pipeline::from_config(&config).context("Failed to build pipeline")?);

    // mailin serves connections on blocking threads; keep it off the runtime
    let (done_tx, done_rx) = oneshot::channel();
    let runtime = Handle::current();
    let server_config = config.clone();
    thread::Builder::new()
        .name("smtp-server".to_string())
        .spawn(move || {
            let result = server::run(&server_config, pipeline, runtime);
            let _ = done_tx.send(result);
        })
        .context("Failed to start SMTP server thread")?;

    tokio::select! {
        result = done_rx => {
            match result {
                Ok(Ok(())) => info!("smtp_server_stopped"),
                Ok(Err(e)) => {
                    error!(error = %e, "smtp_server_failed");
                    return Err(e);
                }
                Err(_) => error!("smtp_server_thread_exited"),
            }
        }
        _ = shutdown_signal() => {}
    }

    info!("relay_shutdown_complete");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("relay_stopping");
}
