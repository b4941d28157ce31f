//! Redis Streams implementation of the message bus.
//!
//! - publish: `SET NX EX` on a dedup key, then `XADD`
//! - subscribe: consumer group read with `XREADGROUP`, explicit `XACK`,
//!   stale pending entries reclaimed with `XCLAIM` after the ack wait
//!
//! Every instance needs its own consumer group to see every message; a
//! shared group load-balances entries between its consumers.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, Client};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{BusError, Delivery, MessageBus, Outcome, Settlement};
use crate::config::{BusSettings, RedisSettings};

const READ_BATCH: usize = 64;
const DELIVERY_BUFFER: usize = 256;

/// Creates a Redis connection manager with automatic reconnection.
#[instrument(skip(settings), fields(url = %settings.url))]
pub async fn create_redis_client(
    settings: &RedisSettings,
) -> Result<ConnectionManager, redis::RedisError> {
    info!("Connecting to Redis...");
    let client = Client::open(settings.url.as_str())?;
    let manager = ConnectionManager::new(client).await?;
    info!("Redis connection established");
    Ok(manager)
}

#[derive(Clone)]
pub struct RedisStreamBus {
    conn: ConnectionManager,
    settings: BusSettings,
    consumer: String,
}

impl RedisStreamBus {
    /// `consumer` names this instance inside the consumer group.
    pub fn new(conn: ConnectionManager, settings: BusSettings, consumer: String) -> Self {
        Self {
            conn,
            settings,
            consumer,
        }
    }

    pub async fn connect(
        redis: &RedisSettings,
        settings: BusSettings,
        consumer: String,
    ) -> Result<Self, BusError> {
        let conn = create_redis_client(redis).await?;
        Ok(Self::new(conn, settings, consumer))
    }

    fn dedup_key(&self, idempotency_key: &str) -> String {
        format!("{}:dedup:{}", self.settings.stream, idempotency_key)
    }

    async fn ensure_group(&self) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let created: Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(&self.settings.stream, &self.settings.consumer_group, "$")
            .await;

        match created {
            Ok(()) => {
                info!(
                    stream = %self.settings.stream,
                    group = %self.settings.consumer_group,
                    "Consumer group created"
                );
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn settle(&self, conn: &mut ConnectionManager, settlement: Settlement) {
        if settlement.outcome == Outcome::Term {
            warn!(id = %settlement.id, "Bus delivery terminated");
        }
        let acked: Result<i64, redis::RedisError> = conn
            .xack(
                &self.settings.stream,
                &self.settings.consumer_group,
                &[&settlement.id],
            )
            .await;
        if let Err(e) = acked {
            error!(id = %settlement.id, error = %e, "Failed to acknowledge bus delivery");
        }
    }

    /// Claim pending entries idle past the ack wait. Entries already
    /// delivered `max_deliver` times are acknowledged and dropped.
    async fn reclaim(
        &self,
        conn: &mut ConnectionManager,
        settle_tx: &mpsc::UnboundedSender<Settlement>,
    ) -> Result<Vec<Delivery>, BusError> {
        let pending: StreamPendingCountReply = conn
            .xpending_count(
                &self.settings.stream,
                &self.settings.consumer_group,
                "-",
                "+",
                READ_BATCH,
            )
            .await?;

        let min_idle_ms = self.settings.ack_wait().as_millis() as usize;
        let mut attempts = HashMap::new();
        let mut exhausted = Vec::new();

        for entry in pending.ids {
            if entry.last_delivered_ms < min_idle_ms {
                continue;
            }
            if entry.times_delivered as u64 >= self.settings.max_deliver {
                exhausted.push(entry.id);
            } else {
                attempts.insert(entry.id, entry.times_delivered as u64 + 1);
            }
        }

        if !exhausted.is_empty() {
            warn!(count = exhausted.len(), "Dropping bus entries past max deliveries");
            let _: i64 = conn
                .xack(&self.settings.stream, &self.settings.consumer_group, &exhausted)
                .await?;
        }

        if attempts.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&String> = attempts.keys().collect();
        let claimed: StreamClaimReply = conn
            .xclaim(
                &self.settings.stream,
                &self.settings.consumer_group,
                &self.consumer,
                min_idle_ms,
                &ids,
            )
            .await?;

        Ok(claimed
            .ids
            .into_iter()
            .map(|entry| {
                let attempt = attempts.get(&entry.id).copied().unwrap_or(2);
                to_delivery(entry, attempt, settle_tx)
            })
            .collect())
    }

    async fn read_new(
        &self,
        conn: &mut ConnectionManager,
        settle_tx: &mpsc::UnboundedSender<Settlement>,
    ) -> Result<Vec<Delivery>, BusError> {
        let options = StreamReadOptions::default()
            .group(&self.settings.consumer_group, &self.consumer)
            .count(READ_BATCH);

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.settings.stream], &[">"], &options)
            .await?;

        Ok(reply
            .into_iter()
            .flat_map(|reply| reply.keys)
            .flat_map(|key| key.ids)
            .map(|entry| to_delivery(entry, 1, settle_tx))
            .collect())
    }

    async fn poll(
        &self,
        conn: &mut ConnectionManager,
        settle_tx: &mpsc::UnboundedSender<Settlement>,
    ) -> Result<Vec<Delivery>, BusError> {
        let mut batch = self.reclaim(conn, settle_tx).await?;
        batch.extend(self.read_new(conn, settle_tx).await?);
        Ok(batch)
    }

    async fn consume(
        self,
        deliveries: mpsc::Sender<Delivery>,
        shutdown: CancellationToken,
    ) {
        let (settle_tx, mut settle_rx) = mpsc::unbounded_channel();
        let mut conn = self.conn.clone();
        let mut ticker = tokio::time::interval(self.settings.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(settlement) = settle_rx.recv() => {
                    self.settle(&mut conn, settlement).await;
                }
                _ = ticker.tick() => {
                    let batch = match self.poll(&mut conn, &settle_tx).await {
                        Ok(batch) => batch,
                        Err(e) => {
                            error!(error = %e, "Bus poll failed");
                            continue;
                        }
                    };
                    for delivery in batch {
                        if deliveries.send(delivery).await.is_err() {
                            debug!("Bus subscriber dropped, stopping consumer");
                            return;
                        }
                    }
                }
            }
        }

        info!("Bus consumer stopped");
    }
}

fn to_delivery(
    entry: StreamId,
    attempt: u64,
    settle_tx: &mpsc::UnboundedSender<Settlement>,
) -> Delivery {
    // Entries without a payload field are handed over empty and get terminated
    let payload: Vec<u8> = entry.get("payload").unwrap_or_default();
    Delivery::new(entry.id, payload, attempt, settle_tx.clone())
}

#[async_trait]
impl MessageBus for RedisStreamBus {
    #[instrument(skip(self, payload), fields(stream = %self.settings.stream))]
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        idempotency_key: &str,
    ) -> Result<String, BusError> {
        let mut conn = self.conn.clone();
        let dedup_key = self.dedup_key(idempotency_key);

        let fresh: Option<String> = redis::cmd("SET")
            .arg(&dedup_key)
            .arg("")
            .arg("NX")
            .arg("EX")
            .arg(self.settings.dedup_ttl_secs)
            .query_async(&mut conn)
            .await?;

        if fresh.is_none() {
            let seq: Option<String> = conn.get(&dedup_key).await?;
            debug!(key = %idempotency_key, "Duplicate publish suppressed");
            return Ok(seq.unwrap_or_default());
        }

        let seq: String = redis::cmd("XADD")
            .arg(&self.settings.stream)
            .arg("*")
            .arg("subject")
            .arg(subject)
            .arg("key")
            .arg(idempotency_key)
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await?;

        // Record the sequence so a duplicate publish can report it
        let _: Option<String> = redis::cmd("SET")
            .arg(&dedup_key)
            .arg(&seq)
            .arg("XX")
            .arg("KEEPTTL")
            .query_async(&mut conn)
            .await?;

        debug!(seq = %seq, "Published to bus");
        Ok(seq)
    }

    async fn subscribe(
        &self,
        shutdown: CancellationToken,
    ) -> Result<mpsc::Receiver<Delivery>, BusError> {
        self.ensure_group().await?;

        let (tx, rx) = mpsc::channel(DELIVERY_BUFFER);
        info!(
            stream = %self.settings.stream,
            group = %self.settings.consumer_group,
            consumer = %self.consumer,
            "Bus consumer started"
        );
        tokio::spawn(self.clone().consume(tx, shutdown));

        Ok(rx)
    }
}
