//! Service lifecycle: bind, serve, shut down.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::client::{ServerEvent, NORMAL_CLOSURE};
use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::logging::Logger;
use crate::server::Server;
use crate::websocket::ws_handler;

const SHUTDOWN_REASON: &str = "Server shutting down";

/// HTTP surface: two DevTools discovery endpoints, and a socket on every
/// other path.
pub fn router(server: Arc<Server>) -> Router {
    Router::new()
        .route("/json/version", get(version_handler))
        .route("/json/list", get(list_handler))
        .fallback(ws_handler)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(server)
}

async fn version_handler(State(server): State<Arc<Server>>) -> impl IntoResponse {
    Json(json!({
        "Browser": "Adobe UXP/1.0.0",
        "Protocol-Version": "1.3",
        "User-Agent": "Adobe UXP UDT CLI 1.0.0",
        "V8-Version": "8.3",
        "webSocketDebuggerUrl": format!("{}/socket/browser_cdt/", server.local_socket_url()),
    }))
}

async fn list_handler() -> impl IntoResponse {
    Json(json!({}))
}

/// A running service.
pub struct ServiceHandle {
    server: Arc<Server>,
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<io::Result<()>>,
}

impl ServiceHandle {
    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Tell host applications the service is going away, close every socket
    /// and wait for the listener to stop.
    pub async fn close(mut self) -> Result<(), ServiceError> {
        self.server.broadcast(ServerEvent::AppQuit);
        self.server.close_all_clients(NORMAL_CLOSURE, SHUTDOWN_REASON);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        let result = match self.task.await {
            Ok(result) => result.map_err(ServiceError::from),
            Err(err) => Err(ServiceError::Io(io::Error::other(err))),
        };
        info!(
            component = "service",
            event = "service.stopped",
            port = self.local_addr.port(),
            "Service stopped"
        );
        result
    }
}

/// Bind the configured address and start serving in the background.
pub async fn start(config: ServiceConfig, logger: Logger) -> Result<ServiceHandle, ServiceError> {
    let addr = SocketAddr::new(config.host, config.port);
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) if err.kind() == io::ErrorKind::AddrInUse => {
            let err = ServiceError::PortInUse(config.port);
            logger.error(&err);
            return Err(err);
        }
        Err(err) => {
            logger.error(format_args!("Service failed with Websocket error: {err}"));
            return Err(ServiceError::Io(err));
        }
    };
    let local_addr = listener.local_addr()?;

    let server = Server::new(config, logger);
    server.set_port(local_addr.port());

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let app = router(Arc::clone(&server));
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    info!(
        component = "service",
        event = "service.started",
        addr = %local_addr,
        "Service listening"
    );

    Ok(ServiceHandle {
        server,
        local_addr,
        shutdown: Some(shutdown_tx),
        task,
    })
}
