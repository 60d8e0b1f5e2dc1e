//! In-memory envelope bus for tests and embedded deployments.

use std::sync::{Mutex, mpsc};

use thiserror::Error;

use crate::bus::{EventBus, Subscription};
use crate::envelope::EventEnvelope;

#[derive(Debug, Error)]
pub enum InMemoryBusError {
    /// The subscriber list lock was poisoned by a panicking thread.
    #[error("event bus lock poisoned")]
    Poisoned,
}

/// Broadcast envelope bus over std channels.
///
/// Every subscriber gets its own channel and receives a copy of every
/// published envelope. A subscriber whose receiving end has been dropped is
/// pruned the next time the list is touched, so abandoned subscriptions do
/// not accumulate. Publication never blocks on consumers (the channels are
/// unbounded) and never fails on their behalf; the only failure mode is a
/// poisoned lock.
#[derive(Debug)]
pub struct InMemoryEventBus<E> {
    senders: Mutex<Vec<mpsc::Sender<EventEnvelope<E>>>>,
}

impl<E> Default for InMemoryEventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> InMemoryEventBus<E> {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Number of registered subscriptions.
    ///
    /// Dropped subscriptions linger until the next publish prunes them, so
    /// the count is an upper bound between publishes.
    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().map(|senders| senders.len()).unwrap_or(0)
    }
}

impl<E> EventBus<E> for InMemoryEventBus<E>
where
    E: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, envelope: EventEnvelope<E>) -> Result<(), Self::Error> {
        let mut senders = self.senders.lock().map_err(|_| InMemoryBusError::Poisoned)?;

        // A failed send means the subscription was dropped; prune it here.
        senders.retain(|tx| tx.send(envelope.clone()).is_ok());
        Ok(())
    }

    fn subscribe(&self) -> Subscription<E> {
        let (tx, rx) = mpsc::channel();

        // On a poisoned lock the subscription is still returned; it simply
        // never receives anything, mirroring a bus that died mid-flight.
        if let Ok(mut senders) = self.senders.lock() {
            senders.push(tx);
        }

        Subscription::new(rx)
    }
}
