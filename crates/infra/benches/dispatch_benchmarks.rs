use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::{Duration, Utc};

use hemobank_core::{Actor, AggregateId, FacilityId, StaffId};
use hemobank_events::InMemoryEventBus;
use hemobank_infra::command_dispatcher::CommandDispatcher;
use hemobank_infra::event_store::InMemoryEventStore;
use hemobank_inventory::{
    BloodUnit, BloodUnitCommand, BloodUnitId, CollectWholeBlood, DeductVolume,
};
use hemobank_typing::BloodType;
use std::sync::Arc;

type Dispatcher =
    CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<serde_json::Value>>>;

fn setup() -> (Dispatcher, FacilityId, Actor) {
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Arc<InMemoryEventBus<serde_json::Value>> =
        Arc::new(InMemoryEventBus::new());
    (
        CommandDispatcher::new(store, bus),
        FacilityId::new(),
        Actor::Staff(StaffId::new()),
    )
}

fn collect_unit(
    dispatcher: &Dispatcher,
    facility_id: FacilityId,
    actor: Actor,
    volume_ml: u32,
) -> BloodUnitId {
    let unit_id = BloodUnitId::new(AggregateId::new());
    let now = Utc::now();
    let blood_type: BloodType = "O+".parse().unwrap();

    dispatcher
        .dispatch(
            facility_id,
            unit_id.0,
            "inventory.unit",
            BloodUnitCommand::CollectWholeBlood(CollectWholeBlood {
                facility_id,
                unit_id,
                donor_id: hemobank_core::DonorId::new(),
                blood_type,
                volume_ml,
                expires_at: now + Duration::days(35),
                actor,
                occurred_at: now,
            }),
            |_, id| BloodUnit::empty(BloodUnitId::new(id)),
        )
        .expect("collect should succeed");

    unit_id
}

/// Latency of a single intake dispatch (empty stream).
fn bench_intake_latency(c: &mut Criterion) {
    c.bench_function("dispatch/collect_whole_blood", |b| {
        let (dispatcher, facility_id, actor) = setup();
        b.iter(|| {
            let unit_id = collect_unit(&dispatcher, facility_id, actor, 450);
            black_box(unit_id);
        });
    });
}

/// Deduction latency as the unit's history grows: each dispatch replays the
/// stream before deciding, so this measures rehydration cost.
fn bench_deduct_with_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch/deduct_volume");

    for history_len in [1u32, 10, 100] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::from_parameter(history_len),
            &history_len,
            |b, &history_len| {
                let (dispatcher, facility_id, actor) = setup();
                // One large unit, pre-drained by `history_len` deductions.
                let unit_id = collect_unit(&dispatcher, facility_id, actor, u32::MAX);
                let now = Utc::now();
                for _ in 0..history_len {
                    dispatcher
                        .dispatch(
                            facility_id,
                            unit_id.0,
                            "inventory.unit",
                            BloodUnitCommand::DeductVolume(DeductVolume {
                                facility_id,
                                unit_id,
                                amount_ml: 1,
                                actor,
                                occurred_at: now,
                            }),
                            |_, id| BloodUnit::empty(BloodUnitId::new(id)),
                        )
                        .expect("warmup deduct should succeed");
                }

                b.iter(|| {
                    let committed = dispatcher
                        .dispatch(
                            facility_id,
                            unit_id.0,
                            "inventory.unit",
                            BloodUnitCommand::DeductVolume(DeductVolume {
                                facility_id,
                                unit_id,
                                amount_ml: 1,
                                actor,
                                occurred_at: now,
                            }),
                            |_, id| BloodUnit::empty(BloodUnitId::new(id)),
                        )
                        .expect("deduct should succeed");
                    black_box(committed);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_intake_latency, bench_deduct_with_history);
criterion_main!(benches);
