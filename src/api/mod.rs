//! Worker-local health and metrics endpoint

pub mod handlers;
pub mod routes;

pub use routes::*;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::shutdown::ShutdownCoordinator;
use crate::supervisor::ConnectionStateHandle;

/// Shared health endpoint state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ShutdownCoordinator>,
    pub broker: ConnectionStateHandle,
    pub store: ConnectionStateHandle,
}

impl AppState {
    pub fn new(
        coordinator: Arc<ShutdownCoordinator>,
        broker: ConnectionStateHandle,
        store: ConnectionStateHandle,
    ) -> Self {
        Self {
            coordinator,
            broker,
            store,
        }
    }
}

/// Serve health and metrics until `shutdown` is cancelled
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Health server listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
