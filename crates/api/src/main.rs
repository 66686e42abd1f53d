use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use ratewatch_api::app::{self, services};
use ratewatch_api::scheduler;
use ratewatch_infra::config::AppConfig;
use ratewatch_infra::workers::WorkerHandle;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ratewatch_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let runtime = services::build_runtime(&config).await?;

    let shutdown = CancellationToken::new();
    let notifier = Arc::clone(&runtime.services.notifier);
    let notify_at = config.notify_at;

    let publisher = runtime.publisher;
    let consumer = runtime.consumer;
    let workers = [
        WorkerHandle::spawn("publisher", &shutdown, |cancel| publisher.run(cancel)),
        WorkerHandle::spawn("consumer", &shutdown, |cancel| consumer.run(cancel)),
        WorkerHandle::spawn("scheduler", &shutdown, move |cancel| {
            scheduler::run_daily(notifier, notify_at, cancel)
        }),
    ];

    let app = app::build_app(runtime.services);
    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    tokio::spawn(wait_for_signal(shutdown.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .context("http server failed")?;

    for worker in workers {
        worker.shutdown().await;
    }
    tracing::info!("shutdown complete");
    Ok(())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
    shutdown.cancel();
}
