use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{
        ConnectInfo, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderValue, header::InvalidHeaderValue},
    response::IntoResponse,
    routing::get,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde::Serialize;
use thiserror::Error;
use tokio::{net::TcpListener, select, sync::mpsc, sync::oneshot};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::{
    hub::{ConnectionId, Hub, Registration},
    protocol::{ClientEvent, DecodeError, ServerEvent},
    ticker,
};

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const STATUS_BANNER: &str = "Broadcast hub running";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Empty, or containing `*`, means every origin is accepted.
    pub allowed_origins: Vec<String>,
    pub queue_capacity: usize,
    pub update_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 5000)),
            allowed_origins: Vec::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            update_interval: ticker::DEFAULT_UPDATE_INTERVAL,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid allowed origin {origin:?}")]
    InvalidOrigin {
        origin: String,
        #[source]
        source: InvalidHeaderValue,
    },
    #[error("update interval must be greater than zero")]
    ZeroUpdateInterval,
}

pub struct Server {
    listener: TcpListener,
    hub: Arc<Hub>,
    router: Router,
    update_interval: Duration,
}

impl Server {
    pub fn new(listener: TcpListener, config: &ServerConfig) -> Result<Self, ConfigError> {
        if config.update_interval.is_zero() {
            return Err(ConfigError::ZeroUpdateInterval);
        }
        let hub = Arc::new(Hub::new(config.queue_capacity));
        let cors = cors_layer(&config.allowed_origins)?;
        Ok(Self {
            listener,
            router: router(Arc::clone(&hub), cors),
            hub,
            update_interval: config.update_interval,
        })
    }

    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("failed to bind {}", config.listen))?;
        Ok(Self::new(listener, config)?)
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> Arc<Hub> {
        Arc::clone(&self.hub)
    }

    /// Serves HTTP and WebSocket traffic and drives periodic updates until
    /// `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Server {
            listener,
            hub,
            router,
            update_interval,
        } = self;

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let updates = tokio::spawn(ticker::run_until(hub, update_interval, async move {
            let _ = stop_rx.await;
        }));

        // Stop the ticker as soon as shutdown starts, not after the last
        // connection drains.
        let shutdown = async move {
            shutdown.await;
            info!("server shutting down");
            let _ = stop_tx.send(());
        };

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .context("server terminated with error")?;

        updates.await.context("periodic update task failed")?;
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

#[derive(Clone)]
struct AppState {
    hub: Arc<Hub>,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

pub fn router(hub: Arc<Hub>, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/ws", get(upgrade))
        .with_state(AppState { hub })
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub fn cors_layer(origins: &[String]) -> Result<CorsLayer, ConfigError> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return Ok(layer.allow_origin(Any));
    }

    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|source| ConfigError::InvalidOrigin {
                origin: origin.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(layer.allow_origin(AllowOrigin::list(origins)))
}

async fn status() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: STATUS_BANNER,
    })
}

async fn upgrade(
    ws: WebSocketUpgrade,
    peer: Option<ConnectInfo<SocketAddr>>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let peer = peer.map(|ConnectInfo(addr)| addr);
    ws.on_upgrade(move |socket| run_session(socket, peer, state.hub))
}

/// Drives one client for its whole lifetime. Whichever half finishes first
/// (client closed, read error, failed write) ends the session, and the
/// connection is deregistered exactly once.
async fn run_session(socket: WebSocket, peer: Option<SocketAddr>, hub: Arc<Hub>) {
    let Registration { id, outbound, .. } = hub.connect(peer).await;
    let (sink, stream) = socket.split();

    let mut writer = tokio::spawn(forward_outbound(id, sink, outbound));
    let mut reader = tokio::spawn(read_inbound(id, stream, Arc::clone(&hub)));

    select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    hub.disconnect(id).await;
}

async fn forward_outbound(
    id: ConnectionId,
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerEvent>,
) {
    while let Some(event) = outbound.recv().await {
        let frame = match event.encode() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(conn_id = %id, error = ?err, "failed to encode event");
                continue;
            }
        };
        if let Err(err) = sink.send(Message::Text(frame)).await {
            debug!(conn_id = %id, error = ?err, "failed to deliver message to client");
            return;
        }
    }
}

async fn read_inbound(id: ConnectionId, mut stream: SplitStream<WebSocket>, hub: Arc<Hub>) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_frame(&hub, id, &text).await,
            Ok(Message::Binary(_)) => reject(&hub, id, DecodeError::Binary).await,
            Ok(Message::Close(_)) => return,
            // ping/pong are answered by the transport
            Ok(_) => {}
            Err(err) => {
                debug!(conn_id = %id, error = ?err, "websocket read failed");
                return;
            }
        }
    }
}

async fn handle_frame(hub: &Hub, id: ConnectionId, frame: &str) {
    match ClientEvent::decode(frame) {
        Ok(ClientEvent::ClientMessage(chat)) => {
            let relayed = hub.relay_chat(id, &chat.text).await;
            debug!(conn_id = %id, relayed, "chat message routed");
        }
        Err(err) => reject(hub, id, err).await,
    }
}

async fn reject(hub: &Hub, id: ConnectionId, err: DecodeError) {
    warn!(conn_id = %id, error = %err, "dropping malformed client message");
    hub.send_to(id, ServerEvent::error(err.to_string())).await;
}
