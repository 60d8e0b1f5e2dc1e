//! Application services: the synchronous operation surface callers invoke.
//!
//! Each service front-loads validation, dispatches commands through the
//! shared pipeline, and reads authoritative state back by rehydrating the
//! touched aggregates. Controllers, schedulers, and notification senders
//! live outside this workspace and call in through these types.

pub mod donation;
pub mod emergency;
pub mod inventory;

use std::sync::Arc;

use serde_json::Value as JsonValue;

use hemobank_donation::DonationId;
use hemobank_emergency::RequestId;
use hemobank_events::{EventEnvelope, InMemoryEventBus};
use hemobank_inventory::BloodUnitId;

use crate::command_dispatcher::CommandDispatcher;
use crate::event_store::InMemoryEventStore;
use crate::projections::{
    CampaignDonationLog, DonationLogProjection, DonationResultReadModel,
    DonationResultsProjection, EmergencyBoardProjection, EmergencyLogProjection,
    EmergencyRequestLog, RequestReadModel, UnitActionLog, UnitActionsProjection,
    UnitLedgerProjection, UnitReadModel,
};
use crate::read_model::InMemoryFacilityStore;
use crate::workers::{ProjectionWorker, WorkerHandle};

pub use donation::DonationService;
pub use emergency::{BulkRejectOutcome, EmergencyService};
pub use inventory::{InventoryService, SeparationOutcome, SeparationRequest, UnitSearchFilter};

/// Stream type identifiers, one per aggregate.
pub const UNIT_AGGREGATE: &str = "inventory.unit";
pub const DONOR_AGGREGATE: &str = "inventory.donor";
pub const DONATION_AGGREGATE: &str = "donation.campaign_donation";
pub const REQUEST_AGGREGATE: &str = "emergency.request";

type Envelope = EventEnvelope<JsonValue>;
type InMemoryBus = Arc<InMemoryEventBus<JsonValue>>;
type InMemoryStore = Arc<InMemoryEventStore>;

pub type InMemoryDispatcher = CommandDispatcher<InMemoryStore, InMemoryBus>;
pub type InMemoryUnitLedger =
    UnitLedgerProjection<Arc<InMemoryFacilityStore<BloodUnitId, UnitReadModel>>>;
pub type InMemoryUnitActions =
    UnitActionsProjection<Arc<InMemoryFacilityStore<BloodUnitId, UnitActionLog>>>;
pub type InMemoryDonationLog =
    DonationLogProjection<Arc<InMemoryFacilityStore<DonationId, CampaignDonationLog>>>;
pub type InMemoryDonationResults =
    DonationResultsProjection<Arc<InMemoryFacilityStore<DonationId, DonationResultReadModel>>>;
pub type InMemoryEmergencyLog =
    EmergencyLogProjection<Arc<InMemoryFacilityStore<RequestId, EmergencyRequestLog>>>;
pub type InMemoryEmergencyBoard =
    EmergencyBoardProjection<Arc<InMemoryFacilityStore<RequestId, RequestReadModel>>>;

/// Fully wired in-memory core: store, bus, projections, services, and the
/// background worker feeding the projections.
///
/// Used by tests and embedded deployments; a production wiring swaps in a
/// transactional store and durable bus behind the same traits.
pub struct CoreServices {
    pub event_store: InMemoryStore,
    pub event_bus: InMemoryBus,
    pub dispatcher: Arc<InMemoryDispatcher>,

    pub unit_ledger: Arc<InMemoryUnitLedger>,
    pub unit_actions: Arc<InMemoryUnitActions>,
    pub donation_log: Arc<InMemoryDonationLog>,
    pub donation_results: Arc<InMemoryDonationResults>,
    pub emergency_log: Arc<InMemoryEmergencyLog>,
    pub emergency_board: Arc<InMemoryEmergencyBoard>,

    pub inventory: InventoryService<
        InMemoryStore,
        InMemoryBus,
        Arc<InMemoryFacilityStore<BloodUnitId, UnitReadModel>>,
    >,
    pub donation: DonationService<InMemoryStore, InMemoryBus>,
    pub emergency: EmergencyService<
        InMemoryStore,
        InMemoryBus,
        Arc<InMemoryFacilityStore<RequestId, RequestReadModel>>,
    >,

    worker: Option<WorkerHandle>,
}

impl CoreServices {
    /// Wire the full in-memory pipeline: store + bus + dispatcher +
    /// projections + one worker routing published envelopes by stream type.
    pub fn in_memory() -> Self {
        let event_store: InMemoryStore = Arc::new(InMemoryEventStore::new());
        let event_bus: InMemoryBus = Arc::new(InMemoryEventBus::new());
        let dispatcher = Arc::new(CommandDispatcher::new(event_store.clone(), event_bus.clone()));

        let unit_ledger = Arc::new(UnitLedgerProjection::new(Arc::new(
            InMemoryFacilityStore::new(),
        )));
        let unit_actions = Arc::new(UnitActionsProjection::new(Arc::new(
            InMemoryFacilityStore::new(),
        )));
        let donation_log = Arc::new(DonationLogProjection::new(Arc::new(
            InMemoryFacilityStore::new(),
        )));
        let donation_results = Arc::new(DonationResultsProjection::new(Arc::new(
            InMemoryFacilityStore::new(),
        )));
        let emergency_log = Arc::new(EmergencyLogProjection::new(Arc::new(
            InMemoryFacilityStore::new(),
        )));
        let emergency_board = Arc::new(EmergencyBoardProjection::new(Arc::new(
            InMemoryFacilityStore::new(),
        )));

        // Single worker: route each published envelope to the projections
        // interested in its stream type. Handlers are idempotent, so
        // at-least-once delivery is safe.
        let worker = {
            let unit_ledger = unit_ledger.clone();
            let unit_actions = unit_actions.clone();
            let donation_log = donation_log.clone();
            let donation_results = donation_results.clone();
            let emergency_log = emergency_log.clone();
            let emergency_board = emergency_board.clone();

            ProjectionWorker::spawn(
                "core-projections",
                event_bus.clone(),
                None,
                move |env: Envelope| -> Result<(), anyhow::Error> {
                    match env.aggregate_type() {
                        UNIT_AGGREGATE => {
                            unit_ledger
                                .apply_envelope(&env)
                                .map_err(anyhow::Error::new)?;
                            unit_actions
                                .apply_envelope(&env)
                                .map_err(anyhow::Error::new)?;
                        }
                        DONATION_AGGREGATE => {
                            donation_log
                                .apply_envelope(&env)
                                .map_err(anyhow::Error::new)?;
                            donation_results
                                .apply_envelope(&env)
                                .map_err(anyhow::Error::new)?;
                        }
                        REQUEST_AGGREGATE => {
                            emergency_log
                                .apply_envelope(&env)
                                .map_err(anyhow::Error::new)?;
                            emergency_board
                                .apply_envelope(&env)
                                .map_err(anyhow::Error::new)?;
                        }
                        // Donor record streams have no read model yet.
                        _ => {}
                    }
                    Ok(())
                },
            )
        };

        let inventory = InventoryService::new(dispatcher.clone(), unit_ledger.clone());
        let donation = DonationService::new(dispatcher.clone());
        let emergency = EmergencyService::new(dispatcher.clone(), emergency_board.clone());

        Self {
            event_store,
            event_bus,
            dispatcher,
            unit_ledger,
            unit_actions,
            donation_log,
            donation_results,
            emergency_log,
            emergency_board,
            inventory,
            donation,
            emergency,
            worker: Some(worker),
        }
    }

    /// Stop the projection worker and wait for it to drain.
    pub fn shutdown(mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}
