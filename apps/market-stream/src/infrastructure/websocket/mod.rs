//! Push Channel
//!
//! WebSocket server through which subscribers receive `marketUpdate` and
//! `marketStatus` messages. The upgrade is accepted on `/` and `/ws`; each
//! connection is served by one session task registered with the
//! [`BroadcastHub`](crate::infrastructure::broadcast::BroadcastHub).

pub mod heartbeat;
mod session;

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use self::heartbeat::HeartbeatConfig;
use crate::application::services::scheduler::RefreshTrigger;
use crate::infrastructure::broadcast::SharedBroadcastHub;

/// State shared by every session.
#[derive(Clone)]
pub(crate) struct PushState {
    hub: SharedBroadcastHub,
    trigger: Option<RefreshTrigger>,
    heartbeat: HeartbeatConfig,
    cancel: CancellationToken,
}

/// WebSocket push-channel server.
pub struct PushServer {
    port: u16,
    state: PushState,
}

impl std::fmt::Debug for PushServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushServer")
            .field("port", &self.port)
            .field("heartbeat", &self.state.heartbeat)
            .finish_non_exhaustive()
    }
}

impl PushServer {
    /// Create a server.
    #[must_use]
    pub const fn new(
        port: u16,
        hub: SharedBroadcastHub,
        heartbeat: HeartbeatConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            port,
            state: PushState {
                hub,
                trigger: None,
                heartbeat,
                cancel,
            },
        }
    }

    /// Route client `refresh` requests to `trigger`.
    #[must_use]
    pub fn with_trigger(mut self, trigger: RefreshTrigger) -> Self {
        self.state.trigger = Some(trigger);
        self
    }

    /// Router serving the upgrade on `/` and `/ws`.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(upgrade_handler))
            .route("/ws", get(upgrade_handler))
            .with_state(self.state.clone())
    }

    /// Bind the configured port and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `PushServerError` if binding fails or the server stops with an error.
    pub async fn run(self) -> Result<(), PushServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| PushServerError::BindFailed(self.port, e.to_string()))?;
        self.run_with_listener(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `PushServerError` if the server stops with an error.
    pub async fn run_with_listener(self, listener: TcpListener) -> Result<(), PushServerError> {
        let local = listener.local_addr().ok();
        tracing::info!(addr = ?local, "Push channel listening");

        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(self.state.cancel.clone().cancelled_owned())
            .await
            .map_err(|e| PushServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Push channel stopped");
        Ok(())
    }
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<PushState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::run(socket, state))
}

/// Push-channel server errors.
#[derive(Debug, thiserror::Error)]
pub enum PushServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::infrastructure::broadcast::BroadcastHub;

    #[test]
    fn trigger_is_optional() {
        let server = PushServer::new(
            0,
            Arc::new(BroadcastHub::with_defaults()),
            HeartbeatConfig::default(),
            CancellationToken::new(),
        );
        assert!(server.state.trigger.is_none());
        let _router = server.router();
    }
}
