//! Remote assembler served over HTTP.
//!
//! The assembler runs next to the NAS volume. Clients reach it through the
//! routes in [`Operation::path`](crate::protocol::Operation::path); each
//! request is independent, so any number of server processes can share one
//! temp root.

pub mod destination;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::protocol::Operation;

pub use destination::{resolve_destination, Destination};
pub use session::{AssemblerConfig, RemoteAssembler, SessionState};

/// How often expired sessions are swept while serving.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Build the assembler router.
///
/// Request bodies larger than `max_body_bytes` are rejected with 413.
pub fn router(assembler: Arc<RemoteAssembler>, max_body_bytes: usize) -> Router {
    Router::new()
        .route(Operation::Stat.path(), get(handlers::stat))
        .route(Operation::Negotiate.path(), get(handlers::negotiate))
        .route(Operation::UploadChunk.path(), post(handlers::upload_chunk))
        .route(Operation::Merge.path(), post(handlers::merge))
        .route(Operation::UnzipBatch.path(), post(handlers::unzip))
        .route(Operation::Clean.path(), post(handlers::clean))
        .route(Operation::Version.path(), get(handlers::version))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(assembler)
}

/// Serve the assembler until Ctrl+C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the temp root
/// cannot be created.
pub async fn serve(config: &ServerConfig) -> Result<()> {
    tokio::fs::create_dir_all(&config.temp_root).await?;

    let assembler = Arc::new(RemoteAssembler::new(AssemblerConfig::from(config)));
    if let Err(e) = assembler.expire_sessions().await {
        tracing::warn!(error = %e, "Initial session sweep failed");
    }

    let sweeper = Arc::clone(&assembler);
    let sweep = tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = sweeper.expire_sessions().await {
                tracing::warn!(error = %e, "Session sweep failed");
            }
        }
    });

    let app = router(assembler, config.max_chunk_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .map_err(|e| Error::Io(std::io::Error::new(e.kind(), format!("bind {}: {e}", config.bind))))?;
    let addr = listener.local_addr()?;

    tracing::info!(
        %addr,
        temp_root = %config.temp_root.display(),
        backend = ?config.extract_backend,
        "Assembler listening"
    );

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    sweep.abort();
    result?;

    tracing::info!("Assembler shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
