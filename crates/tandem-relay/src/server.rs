use crate::routes::{health_routes, topic_routes};
use crate::topics::Topics;
use crate::{RelayError, Result};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub use tandem_config::RelayConfig;

/// Shared by every request handler.
#[derive(Debug, Clone)]
pub struct RelayState {
    pub config: Arc<RelayConfig>,
    pub topics: Arc<Topics>,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        let topics = Topics::new(config.subscriber_buffer);
        Self {
            config: Arc::new(config),
            topics: Arc::new(topics),
        }
    }
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .merge(topic_routes())
        .with_state(state)
        .merge(health_routes())
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: RelayState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(RelayError::Io)
}

pub async fn start_server(config: &RelayConfig) -> Result<()> {
    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .map_err(|e| RelayError::Config(format!("Invalid address: {e}")))?;

    let listener = TcpListener::bind(addr).await.map_err(RelayError::Io)?;
    tracing::info!("Starting relay on ws://{}", addr);

    serve(listener, RelayState::new(config.clone()), shutdown_signal()).await?;

    tracing::info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
