//! Message Bus
//!
//! At-least-once publish/subscribe used to fan chat messages out across
//! server instances. Publishes carry an idempotency key; subscribers
//! settle every delivery explicitly with `ack` or `term`. A delivery that
//! is dropped unsettled is redelivered after the ack wait, up to the
//! configured maximum.

mod redis_streams;

pub use redis_streams::RedisStreamBus;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Message bus errors
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Bus closed")]
    Closed,
}

/// How a delivery was settled by its consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Processed; do not redeliver.
    Ack,
    /// Unprocessable (e.g. malformed); do not redeliver.
    Term,
}

/// Settlement report sent back to the subscription that produced a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub id: String,
    pub outcome: Outcome,
}

/// One message handed to a subscriber.
#[derive(Debug)]
pub struct Delivery {
    pub id: String,
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery
    pub attempt: u64,
    settle: mpsc::UnboundedSender<Settlement>,
}

impl Delivery {
    pub fn new(
        id: String,
        payload: Vec<u8>,
        attempt: u64,
        settle: mpsc::UnboundedSender<Settlement>,
    ) -> Self {
        Self {
            id,
            payload,
            attempt,
            settle,
        }
    }

    pub fn ack(self) {
        self.finish(Outcome::Ack);
    }

    pub fn term(self) {
        self.finish(Outcome::Term);
    }

    fn finish(self, outcome: Outcome) {
        // Subscription already gone: the entry stays pending and is reclaimed later
        let _ = self.settle.send(Settlement {
            id: self.id,
            outcome,
        });
    }
}

/// Publish/subscribe contract of the cross-instance bus.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` on `subject`. Publishing twice with the same
    /// `idempotency_key` within the dedup window stores the message once.
    /// Returns the sequence id assigned by the bus.
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        idempotency_key: &str,
    ) -> Result<String, BusError>;

    /// Start the durable consumer. Deliveries stop when `shutdown` fires.
    async fn subscribe(
        &self,
        shutdown: CancellationToken,
    ) -> Result<mpsc::Receiver<Delivery>, BusError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_reports_settlement() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        Delivery::new("1-0".into(), b"{}".to_vec(), 1, tx.clone()).ack();
        Delivery::new("2-0".into(), b"bad".to_vec(), 1, tx).term();

        assert_eq!(
            rx.try_recv().unwrap(),
            Settlement {
                id: "1-0".into(),
                outcome: Outcome::Ack
            }
        );
        assert_eq!(rx.try_recv().unwrap().outcome, Outcome::Term);
    }

    #[test]
    fn test_settle_after_subscription_closed_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        Delivery::new("1-0".into(), Vec::new(), 1, tx).ack();
    }
}
