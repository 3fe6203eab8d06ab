//! UIServer: the WebSocket (`ui0.0.1`) + HTTP control-plane endpoint, per
//! spec.md §4.6. Translates external requests into `ControlBus` requests
//! and answers `LIST_CHARGING_STATIONS` locally from the fleet registry.

mod auth;
mod dispatch;
mod http;
mod router;
mod ws;

use std::net::SocketAddr;

use tracing::info;

use crate::config::UiServerConfig;
use crate::control_bus::SharedControlBus;
use crate::support::shutdown::ShutdownSignal;
use crate::worker::SharedFleetRegistry;

/// Shared axum state: a handle to the control bus plus the fleet registry
/// it needs for fan-out targets and `LIST_CHARGING_STATIONS`.
#[derive(Clone)]
pub struct UiServerState {
    pub control_bus: SharedControlBus,
    pub fleet: SharedFleetRegistry,
    pub auth_username: Option<String>,
    pub auth_password: Option<String>,
}

pub struct UiServer {
    config: UiServerConfig,
    state: UiServerState,
}

impl UiServer {
    pub fn new(config: UiServerConfig, control_bus: SharedControlBus, fleet: SharedFleetRegistry) -> Self {
        let state = UiServerState {
            control_bus,
            fleet,
            auth_username: config.auth_username.clone(),
            auth_password: config.auth_password.clone(),
        };
        Self { config, state }
    }

    /// Serve until `shutdown` fires, per spec.md §4.7 `start()`/`stop()`.
    pub async fn run(self, shutdown: ShutdownSignal) -> std::io::Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], self.config.port)));

        let app = router::build_router(self.state);
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!(%addr, subprotocol = ws::UI_SUBPROTOCOL, "ui server listening");

        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await
    }
}
