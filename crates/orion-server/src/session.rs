//! WebSocket sessions.
//!
//! Each upgraded socket becomes one session task. The task registers the
//! connection through the hub (which sends the bootstrap snapshot) and then
//! races two loops: a reader whose only job is to notice the peer going
//! away, and a keepalive that pings on a fixed period. Whichever ends first
//! ends the session. The registration guard is dropped on the way out, so
//! the registry forgets the connection however the task exits.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::future::BoxFuture;
use futures::stream::SplitSink;
use futures::{SinkExt, Stream, StreamExt};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use orion_shared::Role;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::hub::RelayHub;
use crate::registry::{Connection, FrameSink, SinkError};

/// Liveness timing for a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionTiming {
    pub ping_period: Duration,
    pub pong_wait: Duration,
    pub write_timeout: Duration,
}

impl From<&ServerConfig> for SessionTiming {
    fn from(config: &ServerConfig) -> Self {
        Self {
            ping_period: config.ping_period,
            pong_wait: config.pong_wait,
            write_timeout: config.write_timeout,
        }
    }
}

#[derive(Debug)]
enum SessionEnd {
    PeerClosed,
    ReadError(String),
    IdleTimeout,
    PingFailed(SinkError),
    Dropped,
}

struct WsSink(SplitSink<WebSocket, Message>);

impl FrameSink for WsSink {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<(), SinkError>> {
        Box::pin(async move {
            self.0
                .send(Message::Text(text))
                .await
                .map_err(|e| SinkError::Transport(e.to_string()))
        })
    }

    fn send_ping(&mut self) -> BoxFuture<'_, Result<(), SinkError>> {
        Box::pin(async move {
            self.0
                .send(Message::Ping(Vec::new()))
                .await
                .map_err(|e| SinkError::Transport(e.to_string()))
        })
    }
}

pub async fn desktop_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    upgrade(ws, state, Role::Desktop)
}

pub async fn mobile_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    upgrade(ws, state, Role::Mobile)
}

fn upgrade(ws: WebSocketUpgrade, state: AppState, role: Role) -> Response {
    debug!(%role, "WebSocket connection requested");
    let timing = SessionTiming::from(state.config.as_ref());
    ws.on_upgrade(move |socket| run_session(socket, role, state, timing))
}

async fn run_session(socket: WebSocket, role: Role, state: AppState, timing: SessionTiming) {
    let (sink, stream) = socket.split();
    let conn = Connection::new(WsSink(sink), timing.write_timeout);
    serve_connection(state.hub, role, conn, stream, timing).await;
}

/// Bootstrap `conn` and keep it alive until the peer goes away, a ping
/// fails, or the registry drops it. Returns `None` when the bootstrap
/// itself failed.
async fn serve_connection<S, E>(
    hub: RelayHub,
    role: Role,
    conn: Arc<Connection>,
    stream: S,
    timing: SessionTiming,
) -> Option<SessionEnd>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let registration = match hub.attach(role, conn.clone()).await {
        Ok(registration) => registration,
        Err(e) => {
            warn!(conn = %conn.id(), %role, error = %e, "Failed to bootstrap connection");
            return None;
        }
    };
    info!(
        conn = %conn.id(),
        %role,
        peers = hub.registry().count(registration.handle().role),
        "Session established"
    );

    let end = tokio::select! {
        end = read_loop(stream, &conn, timing.pong_wait) => end,
        end = keepalive(&conn, timing.ping_period) => end,
        _ = conn.closed() => SessionEnd::Dropped,
    };

    conn.close();
    drop(registration);
    info!(
        conn = %conn.id(),
        %role,
        reason = ?end,
        idle = ?conn.last_seen().elapsed(),
        "Session ended"
    );
    Some(end)
}

/// Consume inbound frames until the peer goes away or stops answering
/// pings. Application messages are ignored.
async fn read_loop<S, E>(mut stream: S, conn: &Connection, pong_wait: Duration) -> SessionEnd
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut deadline = Instant::now() + pong_wait;
    loop {
        let frame = match tokio::time::timeout_at(deadline, stream.next()).await {
            Err(_) => return SessionEnd::IdleTimeout,
            Ok(None) => return SessionEnd::PeerClosed,
            Ok(Some(Err(e))) => return SessionEnd::ReadError(e.to_string()),
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Pong(_) => {
                conn.touch();
                deadline = Instant::now() + pong_wait;
            }
            Message::Close(_) => return SessionEnd::PeerClosed,
            _ => {}
        }
    }
}

async fn keepalive(conn: &Connection, period: Duration) -> SessionEnd {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = conn.send_ping().await {
            return SessionEnd::PingFailed(e);
        }
    }
}
