//! Chat Hub
//!
//! Single task that owns the registry of connected clients and drives the
//! message pipeline: sanitize, persist, publish, fan out. Everything else
//! talks to it through the channels behind [`HubHandle`], so no lock guards
//! the registry and broadcast order is the order submissions are dequeued.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::messages::{ChatMessage, ServerEvent};
use crate::domain::MessageRepository;
use crate::infrastructure::bus::{Delivery, MessageBus};
use crate::infrastructure::metrics;
use crate::shared::sanitize::sanitize_message;

/// Idempotency keys remembered for bus deduplication
const RECENT_KEYS: usize = 4096;

/// The hub side of one live connection.
#[derive(Debug)]
pub struct ClientHandle {
    pub conn_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    /// Outbound queue; dropping the last sender closes it
    pub tx: mpsc::Sender<ServerEvent>,
    /// Cancelled when the connection is displaced or the hub shuts down
    pub cancel: CancellationToken,
}

/// A connection plus the signal the hub fires once it is registered.
#[derive(Debug)]
pub struct Registration {
    pub client: ClientHandle,
    pub done: oneshot::Sender<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unregister {
    pub user_id: Uuid,
    pub conn_id: Uuid,
}

/// Work submitted by a connection's read loop. Identity comes from the
/// authenticated connection, never from the client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub conn_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub kind: SubmissionKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionKind {
    Message { content: String },
    Typing,
    RateLimitNotice { retry_after_secs: u64 },
}

/// Payload carried on the message bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEnvelope {
    /// Instance that persisted and locally broadcast the message
    pub origin: Uuid,
    pub key: String,
    pub message: ChatMessage,
}

#[derive(Debug, thiserror::Error)]
#[error("hub is not running")]
pub struct HubClosed;

/// Cloneable sender side of the hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::UnboundedSender<Unregister>,
    submit_tx: mpsc::Sender<Submission>,
    connected: Arc<AtomicUsize>,
}

impl HubHandle {
    /// Register a client and wait until the hub has made it visible.
    pub async fn register(&self, client: ClientHandle) -> Result<(), HubClosed> {
        let (done, registered) = oneshot::channel();
        self.register_tx
            .send(Registration { client, done })
            .await
            .map_err(|_| HubClosed)?;
        registered.await.map_err(|_| HubClosed)
    }

    /// Never blocks, so it is safe to call from a drop guard.
    pub fn unregister(&self, user_id: Uuid, conn_id: Uuid) {
        let _ = self.unregister_tx.send(Unregister { user_id, conn_id });
    }

    pub async fn submit(&self, submission: Submission) -> Result<(), HubClosed> {
        self.submit_tx.send(submission).await.map_err(|_| HubClosed)
    }

    /// Number of registered clients as of the hub's last registry change.
    pub fn connected(&self) -> usize {
        self.connected.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub instance_id: Uuid,
    pub subject: String,
    pub inbound_capacity: usize,
}

/// Bounded memory of recently seen idempotency keys.
#[derive(Debug, Default)]
struct RecentKeys {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

impl RecentKeys {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Returns false if the key was already present.
    fn insert(&mut self, key: &str) -> bool {
        if self.seen.contains(key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(key.to_string());
        self.seen.insert(key.to_string());
        true
    }
}

pub struct Hub {
    clients: HashMap<Uuid, ClientHandle>,
    messages: Arc<dyn MessageRepository>,
    bus: Option<Arc<dyn MessageBus>>,
    config: HubConfig,
    recent: RecentKeys,
    tasks: TaskTracker,
    connected: Arc<AtomicUsize>,
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::UnboundedReceiver<Unregister>,
    submit_rx: mpsc::Receiver<Submission>,
}

impl Hub {
    /// Build a hub and its handle. Bus publishes are spawned on `tasks` so
    /// shutdown can wait for them.
    pub fn new(
        config: HubConfig,
        messages: Arc<dyn MessageRepository>,
        bus: Option<Arc<dyn MessageBus>>,
        tasks: TaskTracker,
    ) -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::channel(64);
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (submit_tx, submit_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let connected = Arc::new(AtomicUsize::new(0));

        let handle = HubHandle {
            register_tx,
            unregister_tx,
            submit_tx,
            connected: connected.clone(),
        };

        let hub = Self {
            clients: HashMap::new(),
            messages,
            bus,
            config,
            recent: RecentKeys::new(RECENT_KEYS),
            tasks,
            connected,
            register_rx,
            unregister_rx,
            submit_rx,
        };

        (hub, handle)
    }

    /// Run until `shutdown` fires.
    pub async fn run(
        mut self,
        mut bus_rx: Option<mpsc::Receiver<Delivery>>,
        shutdown: CancellationToken,
    ) {
        info!(instance_id = %self.config.instance_id, "Hub started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(registration) = self.register_rx.recv() => {
                    self.handle_register(registration);
                }
                Some(unregister) = self.unregister_rx.recv() => {
                    self.handle_unregister(unregister);
                }
                Some(submission) = self.submit_rx.recv() => {
                    self.handle_submit(submission).await;
                }
                Some(delivery) = next_delivery(&mut bus_rx) => {
                    self.handle_delivery(delivery);
                }
                else => break,
            }
        }

        for (_, client) in self.clients.drain() {
            client.cancel.cancel();
        }
        self.connected.store(0, Ordering::Relaxed);
        metrics::set_connected_clients(0);
        info!("Hub stopped");
    }

    fn handle_register(&mut self, registration: Registration) {
        let Registration { client, done } = registration;
        let user_id = client.user_id;
        let conn_id = client.conn_id;

        // Last registration wins; the displaced connection is told to go away
        if let Some(previous) = self.clients.insert(user_id, client) {
            info!(
                user_id = %user_id,
                previous_conn = %previous.conn_id,
                conn_id = %conn_id,
                "Replacing existing connection"
            );
            previous.cancel.cancel();
        }

        debug!(user_id = %user_id, conn_id = %conn_id, "Client registered");
        self.registry_changed();
        let _ = done.send(());
    }

    fn handle_unregister(&mut self, unregister: Unregister) {
        let current = self
            .clients
            .get(&unregister.user_id)
            .is_some_and(|client| client.conn_id == unregister.conn_id);

        // Stale unregister from a displaced connection
        if !current {
            return;
        }

        self.clients.remove(&unregister.user_id);
        debug!(
            user_id = %unregister.user_id,
            conn_id = %unregister.conn_id,
            "Client unregistered"
        );
        self.registry_changed();
    }

    fn registry_changed(&mut self) {
        let count = self.clients.len();
        self.connected.store(count, Ordering::Relaxed);
        metrics::set_connected_clients(count);
        self.broadcast(&ServerEvent::PresenceCount { count });
    }

    async fn handle_submit(&mut self, submission: Submission) {
        match submission.kind {
            SubmissionKind::Message { content } => {
                self.handle_message(submission.user_id, submission.username, content)
                    .await;
            }
            SubmissionKind::Typing => {
                self.broadcast(&ServerEvent::Typing {
                    user_id: submission.user_id,
                    username: submission.username,
                });
            }
            SubmissionKind::RateLimitNotice { retry_after_secs } => {
                let event = ServerEvent::RateLimitNotice { retry_after_secs };
                match self.clients.get(&submission.user_id) {
                    Some(client) if client.conn_id == submission.conn_id => {
                        deliver(client, event);
                    }
                    _ => debug!(conn_id = %submission.conn_id, "Notice for departed connection"),
                }
            }
        }
    }

    async fn handle_message(&mut self, user_id: Uuid, username: String, content: String) {
        let content = sanitize_message(&content);

        let receipt = match self.messages.create(user_id, &content, Utc::now()).await {
            Ok(receipt) => receipt,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to persist message, dropping");
                metrics::MESSAGES_DROPPED_TOTAL.inc();
                return;
            }
        };
        metrics::MESSAGES_PERSISTED_TOTAL.inc();

        let message = ChatMessage {
            id: receipt.id,
            user_id,
            username,
            content,
            created_at: receipt.created_at,
        };

        self.publish(&message);
        self.broadcast(&ServerEvent::Message(message));
    }

    fn publish(&mut self, message: &ChatMessage) {
        let Some(bus) = self.bus.clone() else {
            return;
        };

        let key = format!("msg-{}", message.id);
        self.recent.insert(&key);

        let envelope = BusEnvelope {
            origin: self.config.instance_id,
            key: key.clone(),
            message: message.clone(),
        };
        let payload = match serde_json::to_vec(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode bus envelope");
                return;
            }
        };

        let subject = self.config.subject.clone();
        self.tasks.spawn(async move {
            if let Err(e) = bus.publish(&subject, payload, &key).await {
                warn!(key = %key, error = %e, "Bus publish failed");
                metrics::BUS_PUBLISH_FAILURES_TOTAL.inc();
            }
        });
    }

    fn handle_delivery(&mut self, delivery: Delivery) {
        let envelope: BusEnvelope = match serde_json::from_slice(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(id = %delivery.id, error = %e, "Malformed bus payload");
                delivery.term();
                return;
            }
        };

        // Local fan-out already happened on the publishing instance
        if envelope.origin == self.config.instance_id {
            delivery.ack();
            return;
        }

        if !self.recent.insert(&envelope.key) {
            debug!(key = %envelope.key, "Duplicate bus delivery");
            metrics::BUS_DUPLICATES_TOTAL.inc();
            delivery.ack();
            return;
        }

        self.broadcast(&ServerEvent::Message(envelope.message));
        delivery.ack();
    }

    fn broadcast(&self, event: &ServerEvent) {
        for client in self.clients.values() {
            deliver(client, event.clone());
        }
    }
}

/// Non-blocking enqueue; a full queue drops the incoming event.
fn deliver(client: &ClientHandle, event: ServerEvent) {
    match client.tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            warn!(
                user_id = %client.user_id,
                conn_id = %client.conn_id,
                kind = event.kind(),
                "Outbound queue full, dropping event"
            );
            metrics::DELIVERIES_DROPPED_TOTAL.inc();
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(conn_id = %client.conn_id, "Outbound queue closed");
        }
    }
}

async fn next_delivery(rx: &mut Option<mpsc::Receiver<Delivery>>) -> Option<Delivery> {
    match rx {
        Some(rx) => rx.recv().await,
        None => None,
    }
}

/// Raw receiving ends of a handle, for driving a connection without a hub.
#[cfg(test)]
pub(crate) struct HubInbox {
    pub register_rx: mpsc::Receiver<Registration>,
    pub unregister_rx: mpsc::UnboundedReceiver<Unregister>,
    pub submit_rx: mpsc::Receiver<Submission>,
}

#[cfg(test)]
pub(crate) fn detached_handle(capacity: usize) -> (HubHandle, HubInbox) {
    let (register_tx, register_rx) = mpsc::channel(capacity);
    let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
    let (submit_tx, submit_rx) = mpsc::channel(capacity);
    (
        HubHandle {
            register_tx,
            unregister_tx,
            submit_tx,
            connected: Arc::new(AtomicUsize::new(0)),
        },
        HubInbox {
            register_rx,
            unregister_rx,
            submit_rx,
        },
    )
}
