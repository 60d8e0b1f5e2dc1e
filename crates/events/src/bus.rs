//! Envelope publication and subscription.
//!
//! The bus is the transport leg of the write path, after durability:
//!
//! ```text
//! Command → Event Store (append) → Event Bus (publish) → Consumers
//!                                                          ├─ Projections
//!                                                          └─ External (notifications, reporting)
//! ```
//!
//! Only committed [`EventEnvelope`]s travel on the bus; there is no raw or
//! unpersisted message shape. Because the facts are already durable when
//! publication happens, a publish failure is retryable and delivery is
//! at-least-once; consumers must be idempotent. No ordering is promised
//! across streams, only whatever an implementation preserves within one.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use crate::envelope::EventEnvelope;

/// The receiving end of one envelope subscription.
///
/// Broadcast semantics: each subscription sees a copy of every envelope
/// published after it was opened. Built for single-threaded consumption;
/// give each consumer thread its own.
#[derive(Debug)]
pub struct Subscription<E> {
    receiver: Receiver<EventEnvelope<E>>,
}

impl<E> Subscription<E> {
    pub fn new(receiver: Receiver<EventEnvelope<E>>) -> Self {
        Self { receiver }
    }

    /// Block until the next envelope arrives.
    pub fn recv(&self) -> Result<EventEnvelope<E>, RecvError> {
        self.receiver.recv()
    }

    /// Take the next envelope if one is already queued.
    pub fn try_recv(&self) -> Result<EventEnvelope<E>, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for the next envelope.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<EventEnvelope<E>, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// The publishing side, generic over the payload type `E` an envelope
/// wraps (infra publishes JSON payloads; tests use whatever is handy).
///
/// A publish failure surfaces to the caller and may be retried: the
/// envelope's events are already in the store, so the worst case is a
/// duplicate delivery, which idempotent consumers absorb. Implementations
/// are shared across the dispatcher and workers (`Send + Sync`).
pub trait EventBus<E>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    /// Deliver one committed envelope to every current subscriber.
    fn publish(&self, envelope: EventEnvelope<E>) -> Result<(), Self::Error>;

    /// Open a subscription over everything published from now on.
    fn subscribe(&self) -> Subscription<E>;
}

impl<E, B> EventBus<E> for Arc<B>
where
    B: EventBus<E> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, envelope: EventEnvelope<E>) -> Result<(), Self::Error> {
        (**self).publish(envelope)
    }

    fn subscribe(&self) -> Subscription<E> {
        (**self).subscribe()
    }
}
