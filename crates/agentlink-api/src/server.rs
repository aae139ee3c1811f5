//! Bridge server: boots the kernel, serves the RPC front door and tears
//! both down in order.

use crate::routes::{self, AppState};
use agentlink_kernel::{
    BridgeError, BridgeKernel, BridgeResult, ShutdownCoordinator, ShutdownPhase, ShutdownStatus,
};
use agentlink_types::{build_agent_card, BridgeConfig, BridgeIdentity};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Largest accepted request body.
pub const MAX_REQUEST_BODY: usize = 1024 * 1024;

/// Build the axum router for the RPC front door.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", post(routes::rpc))
        .route("/.well-known/agent.json", get(routes::agent_card))
        .route("/health", get(routes::health))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub struct BridgeServer;

impl BridgeServer {
    /// Boot the messaging side, then bind and serve the RPC listener.
    ///
    /// The messaging node is up before the first RPC call can arrive. If the
    /// HTTP bind fails the kernel is stopped again before returning.
    pub async fn start(
        config: BridgeConfig,
        identity: Arc<BridgeIdentity>,
    ) -> BridgeResult<RunningBridge> {
        let drain_timeout = config.drain_timeout;
        let kernel = BridgeKernel::boot(config, identity).await?;

        let (host, port) = (kernel.config().host.clone(), kernel.config().rpc_port);
        let bound = match TcpListener::bind((host.as_str(), port)).await {
            Ok(listener) => listener.local_addr().map(|addr| (listener, addr)),
            Err(e) => Err(e),
        };
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                kernel.stop().await;
                return Err(BridgeError::Startup(format!(
                    "RPC listener on {host}:{port}: {e}"
                )));
            }
        };

        let base_url = format!("http://{}:{}", host, local_addr.port());
        let card = build_agent_card(kernel.config(), &base_url);
        let state = Arc::new(AppState::from_kernel(&kernel, card));
        let app = build_router(state);

        let (http_stop, mut stop_rx) = watch::channel(false);
        let http_task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = stop_rx.wait_for(|stop| *stop).await;
            });
            if let Err(e) = server.await {
                error!("RPC server error: {e}");
            }
        });

        info!(
            rpc = %local_addr,
            messaging = %kernel.node().local_addr(),
            bridge = %kernel.address(),
            target = %kernel.config().target_agent_address,
            "Bridge listening on {base_url}/"
        );

        Ok(RunningBridge {
            kernel,
            local_addr,
            base_url,
            http_stop,
            http_task,
            coordinator: ShutdownCoordinator::new(drain_timeout),
        })
    }
}

/// Handle to a started bridge.
pub struct RunningBridge {
    kernel: Arc<BridgeKernel>,
    local_addr: SocketAddr,
    base_url: String,
    http_stop: watch::Sender<bool>,
    http_task: JoinHandle<()>,
    coordinator: ShutdownCoordinator,
}

impl RunningBridge {
    pub fn kernel(&self) -> &Arc<BridgeKernel> {
        &self.kernel
    }

    /// Bound address of the RPC listener.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Base URL of the RPC front door, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Address of the bridge on the messaging network.
    pub fn bridge_address(&self) -> &str {
        self.kernel.address()
    }

    /// Drain and stop. Calls still waiting when the drain timeout runs out
    /// complete as timeouts.
    pub async fn shutdown(self) -> ShutdownStatus {
        let coord = &self.coordinator;
        coord.initiate();
        coord.advance_phase(ShutdownPhase::Draining, true, None);

        self.kernel.begin_drain();
        let _ = self.http_stop.send(true);
        coord.advance_phase(ShutdownPhase::WaitingForCalls, true, None);

        let idle = self.kernel.wait_for_idle(coord.drain_timeout()).await;
        if idle {
            coord.advance_phase(ShutdownPhase::ClosingRpc, true, None);
        } else {
            let pending = self.kernel.correlation().len();
            coord.advance_phase(
                ShutdownPhase::ClosingRpc,
                false,
                Some(format!("{pending} call(s) still pending after drain timeout")),
            );
        }

        self.kernel.expire_in_flight();
        let http_ok = match self.http_task.await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "RPC server task ended abnormally");
                false
            }
        };
        coord.advance_phase(ShutdownPhase::ClosingMessaging, http_ok, None);

        self.kernel.stop().await;
        coord.advance_phase(ShutdownPhase::Complete, true, None);

        info!(bridge = %self.kernel.address(), "Bridge stopped");
        coord.status()
    }
}

/// Run a bridge until `shutdown` resolves, then tear it down.
pub async fn run_bridge<F>(
    config: BridgeConfig,
    identity: Arc<BridgeIdentity>,
    shutdown: F,
) -> BridgeResult<()>
where
    F: Future<Output = ()> + Send,
{
    let running = BridgeServer::start(config, identity).await?;
    shutdown.await;
    running.shutdown().await;
    Ok(())
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
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
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
