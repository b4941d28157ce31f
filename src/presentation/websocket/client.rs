//! Connection read and write loops.
//!
//! Each socket is split in two: the read loop decodes client frames,
//! applies the per-connection limiters and submits to the hub; the write
//! loop drains the outbound queue the hub fills. The read loop owns the
//! registration and unregisters on exit.

use std::fmt::Display;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes};
use futures::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use governor::DefaultDirectRateLimiter;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::hub::{HubClosed, HubHandle, Submission, SubmissionKind};
use super::messages::{ClientFrame, ServerEvent};
use crate::config::ChatSettings;
use crate::infrastructure::metrics;
use crate::shared::quota;

/// Authenticated identity and hub wiring of one socket.
#[derive(Debug, Clone)]
pub struct Connection {
    pub conn_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub hub: HubHandle,
    pub cancel: CancellationToken,
}

/// Per-connection limiter state.
struct Limits {
    message: DefaultDirectRateLimiter,
    typing: DefaultDirectRateLimiter,
    penalty: Duration,
    max_content_len: usize,
    last_warned: Option<Instant>,
}

impl Limits {
    fn new(settings: &ChatSettings) -> Self {
        Self {
            message: quota::direct(settings.message_burst, settings.message_window()),
            typing: quota::direct(settings.typing_burst, settings.typing_window()),
            penalty: settings.penalty(),
            max_content_len: settings.max_content_len,
            last_warned: None,
        }
    }

    fn in_penalty(&self) -> bool {
        self.last_warned
            .is_some_and(|warned| warned.elapsed() < self.penalty)
    }
}

/// Unregisters from the hub however the read loop ends.
struct UnregisterGuard<'a> {
    conn: &'a Connection,
}

impl Drop for UnregisterGuard<'_> {
    fn drop(&mut self) {
        self.conn.hub.unregister(self.conn.user_id, self.conn.conn_id);
    }
}

/// Read client frames until the peer goes away, the read deadline passes
/// or the connection is cancelled.
pub async fn read_loop<S>(mut stream: S, conn: &Connection, settings: &ChatSettings)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let _guard = UnregisterGuard { conn };
    let mut limits = Limits::new(settings);
    let pong_wait = settings.pong_wait();

    loop {
        let next = tokio::select! {
            _ = conn.cancel.cancelled() => break,
            next = timeout(pong_wait, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                debug!(connection_id = %conn.conn_id, "Read deadline exceeded");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(connection_id = %conn.conn_id, error = %e, "Socket read failed");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                if handle_text(text.as_str(), conn, &mut limits).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            // Pings are answered by the socket itself; any frame resets the deadline
            _ => {}
        }
    }

    debug!(connection_id = %conn.conn_id, user_id = %conn.user_id, "Read loop finished");
}

async fn handle_text(text: &str, conn: &Connection, limits: &mut Limits) -> Result<(), HubClosed> {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(connection_id = %conn.conn_id, error = %e, "Dropping undecodable frame");
            return Ok(());
        }
    };

    if frame.is_typing() {
        if limits.typing.check().is_err() {
            metrics::record_rate_limited("typing");
            return Ok(());
        }
        return submit(conn, SubmissionKind::Typing).await;
    }

    if frame.content.trim().is_empty() || frame.content.chars().count() > limits.max_content_len {
        return Ok(());
    }

    if limits.in_penalty() {
        return Ok(());
    }

    if limits.message.check().is_err() {
        limits.last_warned = Some(Instant::now());
        metrics::record_rate_limited("message");
        debug!(connection_id = %conn.conn_id, user_id = %conn.user_id, "Message rate limit exceeded");
        return submit(
            conn,
            SubmissionKind::RateLimitNotice {
                retry_after_secs: limits.penalty.as_secs(),
            },
        )
        .await;
    }

    submit(
        conn,
        SubmissionKind::Message {
            content: frame.content,
        },
    )
    .await
}

async fn submit(conn: &Connection, kind: SubmissionKind) -> Result<(), HubClosed> {
    conn.hub
        .submit(Submission {
            conn_id: conn.conn_id,
            user_id: conn.user_id,
            username: conn.username.clone(),
            kind,
        })
        .await
}

/// Drain the outbound queue into the socket, pinging on `ping_period`.
///
/// Queue closure ends the socket with a normal close; cancellation with a
/// going-away close, also while a write is in flight. A write that fails or
/// exceeds `write_timeout` cancels the connection.
pub async fn write_loop<W>(
    mut sink: W,
    mut rx: mpsc::Receiver<ServerEvent>,
    cancel: CancellationToken,
    write_timeout: Duration,
    ping_period: Duration,
) where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut ping = interval_at(Instant::now() + ping_period, ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                going_away(&mut sink);
                break;
            }
            event = rx.recv() => {
                let Some(event) = event else {
                    let _ = write(&mut sink, close(close_code::NORMAL, ""), write_timeout, &cancel).await;
                    break;
                };
                match serde_json::to_string(&event) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        warn!(kind = event.kind(), error = %e, "Failed to serialize event");
                        continue;
                    }
                }
            }
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };

        match write(&mut sink, frame, write_timeout, &cancel).await {
            Ok(()) => {}
            Err(WriteStop::Cancelled) => {
                going_away(&mut sink);
                break;
            }
            Err(WriteStop::Failed) => {
                cancel.cancel();
                break;
            }
        }
    }
}

enum WriteStop {
    Failed,
    Cancelled,
}

fn close(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    }))
}

/// Best-effort going-away close; never waits on a stalled peer.
fn going_away<W>(sink: &mut W)
where
    W: Sink<Message> + Unpin,
{
    let _ = sink.send(close(close_code::AWAY, "going away")).now_or_never();
}

async fn write<W>(
    sink: &mut W,
    message: Message,
    write_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), WriteStop>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let sent = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(WriteStop::Cancelled),
        sent = timeout(write_timeout, sink.send(message)) => sent,
    };

    match sent {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(error = %e, "Socket write failed");
            Err(WriteStop::Failed)
        }
        Err(_) => {
            warn!("Socket write timed out");
            Err(WriteStop::Failed)
        }
    }
}
