//! WebSocket session lifecycle: handles a single connected client from
//! upgrade through disconnect.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientConnection, ConnectionId};
use super::table::ConnectionTable;
use crate::config::ServerConfig;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};
use crate::rpc::dispatcher::Dispatcher;
use crate::rpc::types::ConnectionEstablished;

/// How long the writer gets to flush a Close frame on exit.
const WRITER_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Lower bound for the ping interval.
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

/// Per-session tunables.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Interval between server-initiated Ping frames.
    pub heartbeat_interval: Duration,
    /// Disconnect a client silent for longer than this.
    pub heartbeat_timeout: Duration,
    /// Capacity of the outbound queue.
    pub send_queue_capacity: usize,
}

impl From<&ServerConfig> for SessionConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
            send_queue_capacity: config.send_queue_capacity,
        }
    }
}

/// Run a WebSocket session for a freshly upgraded client.
///
/// 1. Registers the connection in the table
/// 2. Sends a `connection.established` frame with the connection id
/// 3. Dispatches inbound text frames one at a time, in arrival order, while
///    still reading control frames during each dispatch
/// 4. Forwards queued responses and pushes, pinging every heartbeat interval
/// 5. Removes the connection on close, heartbeat timeout or shutdown
pub async fn run_ws_session(
    ws: WebSocket,
    table: Arc<ConnectionTable>,
    dispatcher: Arc<Dispatcher>,
    config: SessionConfig,
    shutdown: CancellationToken,
) {
    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(config.send_queue_capacity.max(1));
    let connection = match table.add(ConnectionId::generate(), send_tx) {
        Ok(connection) => connection,
        Err(err) => {
            warn!(error = %err, "rejecting websocket session");
            return;
        }
    };
    serve_connection(ws, connection, send_rx, &table, &dispatcher, config, shutdown).await;
}

#[instrument(skip_all, fields(conn_id = %connection.id()))]
async fn serve_connection(
    ws: WebSocket,
    connection: Arc<ClientConnection>,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    table: &ConnectionTable,
    dispatcher: &Dispatcher,
    config: SessionConfig,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let session_token = shutdown.child_token();

    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    match serde_json::to_string(&ConnectionEstablished::new(connection.id().as_str())) {
        Ok(json) => {
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                debug!("client went away before connection.established");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize connection.established"),
    }

    // Outbound writer with periodic Ping frames.
    let writer_conn = Arc::clone(&connection);
    let writer_token = session_token.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval =
            tokio::time::interval(config.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL));
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if !writer_conn.check_alive()
                        && writer_conn.last_pong_elapsed() > config.heartbeat_timeout
                    {
                        warn!(timeout = ?config.heartbeat_timeout, "client unresponsive, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                () = writer_token.cancelled() => break,
            }
        }
        writer_token.cancel();
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    // Frames that arrive while a dispatch is in flight wait here so
    // invocations still run one at a time in arrival order.
    let mut pending: VecDeque<String> = VecDeque::new();
    let mut closing = false;

    loop {
        if session_token.is_cancelled() {
            debug!("session cancelled");
            break;
        }
        let text = match pending.pop_front() {
            Some(text) => text,
            None if closing => break,
            None => {
                let frame = tokio::select! {
                    frame = ws_rx.next() => frame,
                    () = session_token.cancelled() => {
                        debug!("session cancelled");
                        break;
                    }
                };
                match read_frame(frame, &connection) {
                    Inbound::Invocation(text) => text,
                    Inbound::Control => continue,
                    Inbound::Closed => break,
                }
            }
        };

        // Keep reading while the handler runs so Pong frames still count
        // as liveness.
        let dispatch = dispatcher.dispatch(&text, &connection);
        tokio::pin!(dispatch);
        loop {
            tokio::select! {
                _ = &mut dispatch => break,
                frame = ws_rx.next(), if !closing => match read_frame(frame, &connection) {
                    Inbound::Invocation(next) => pending.push_back(next),
                    Inbound::Control => {}
                    Inbound::Closed => closing = true,
                },
            }
        }
    }

    session_token.cancel();
    let _ = table.remove(connection.id());
    let writer_abort = writer.abort_handle();
    if tokio::time::timeout(WRITER_SHUTDOWN_GRACE, writer).await.is_err() {
        debug!("writer did not stop in time, aborting");
        writer_abort.abort();
    }

    info!(dropped = connection.drop_count(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
}

/// What the inbound loop should do with one frame.
#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    /// A frame to dispatch.
    Invocation(String),
    /// Ping, Pong or an undecodable binary frame.
    Control,
    /// Close frame, read error or end of stream.
    Closed,
}

/// Classify a frame, marking the connection alive for anything received.
fn read_frame(frame: Option<Result<Message, axum::Error>>, connection: &ClientConnection) -> Inbound {
    let Some(Ok(msg)) = frame else {
        return Inbound::Closed;
    };
    connection.mark_alive();

    match msg {
        Message::Text(t) => Inbound::Invocation(t.as_str().to_owned()),
        Message::Binary(data) => match String::from_utf8(data.to_vec()) {
            Ok(s) => Inbound::Invocation(s),
            Err(_) => {
                debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                Inbound::Control
            }
        },
        Message::Close(_) => {
            info!("client sent close frame");
            Inbound::Closed
        }
        Message::Ping(_) | Message::Pong(_) => Inbound::Control,
    }
}
