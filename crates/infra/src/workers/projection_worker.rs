use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::warn;

use hemobank_core::FacilityId;
use hemobank_events::{EventBus, EventEnvelope, Subscription};

/// How long the loop waits for an envelope before re-checking for shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// Handle to a spawned worker: request shutdown and join it.
#[derive(Debug)]
pub struct WorkerHandle {
    stop: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Ask the worker to stop and wait until it has.
    ///
    /// Envelopes already received are handled before the thread exits;
    /// envelopes still on the bus are not (they get replayed on the next
    /// start, which idempotent handlers absorb).
    pub fn shutdown(mut self) {
        let _ = self.stop.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Background bus consumer feeding the read-model projections.
///
/// The worker subscribes before its thread starts, so no envelope published
/// after `spawn` returns can be missed. Handler failures are logged and the
/// envelope is dropped; the read model self-heals on the next rebuild since
/// the event store, not the projection, is the source of truth.
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    /// Spawn a named worker thread over a bus subscription.
    ///
    /// When `pinned_facility` is set, envelopes from any other facility are
    /// skipped without touching the handler. This is the worker-level layer
    /// of the facility isolation the store and projections also enforce.
    pub fn spawn<E, B, H, Err>(
        name: &'static str,
        bus: B,
        pinned_facility: Option<FacilityId>,
        mut handler: H,
    ) -> WorkerHandle
    where
        E: Send + 'static,
        B: EventBus<E> + Send + Sync + 'static,
        H: FnMut(EventEnvelope<E>) -> Result<(), Err> + Send + 'static,
        Err: core::fmt::Debug + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let subscription: Subscription<E> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                consume(name, &subscription, &stop_rx, pinned_facility, &mut handler);
            })
            .expect("failed to spawn projection worker thread");

        WorkerHandle {
            stop: stop_tx,
            join: Some(join),
        }
    }
}

fn consume<E, H, Err>(
    name: &'static str,
    subscription: &Subscription<E>,
    stop_rx: &mpsc::Receiver<()>,
    pinned_facility: Option<FacilityId>,
    handler: &mut H,
) where
    H: FnMut(EventEnvelope<E>) -> Result<(), Err>,
    Err: core::fmt::Debug,
{
    // Stop on an explicit signal, and also when the handle was dropped
    // without one (the channel disconnects).
    while matches!(stop_rx.try_recv(), Err(mpsc::TryRecvError::Empty)) {
        let envelope = match subscription.recv_timeout(SHUTDOWN_POLL) {
            Ok(envelope) => envelope,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if pinned_facility.is_some_and(|pinned| envelope.facility_id() != pinned) {
            continue;
        }

        if let Err(err) = handler(envelope) {
            warn!(worker = name, error = ?err, "projection handler failed; envelope dropped");
        }
    }
}
