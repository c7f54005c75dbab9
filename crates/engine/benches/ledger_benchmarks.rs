use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::Utc;
use rust_decimal_macros::dec;
use std::sync::Arc;

use facturo_core::{AggregateId, ExpectedVersion};
use facturo_engine::command_dispatcher::CommandDispatcher;
use facturo_engine::event_store::{EventStore, InMemoryEventStore, UncommittedEvent};
use facturo_events::{EventEnvelope, InMemoryEventBus};
use facturo_stock::{
    MovementPosted, PostMovement, ProductId, Stock, StockCommand, StockEvent, StockKey,
    StockMovementType, WarehouseId,
};

fn setup_dispatcher() -> (
    CommandDispatcher<InMemoryEventStore, Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>>,
    StockKey,
) {
    let store = InMemoryEventStore::new();
    let bus: Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>> =
        Arc::new(InMemoryEventBus::new());
    let dispatcher = CommandDispatcher::new(store, bus);
    let key = StockKey::new(
        ProductId::new(AggregateId::new()),
        WarehouseId::new(AggregateId::new()),
    );
    (dispatcher, key)
}

fn purchase_command(key: &StockKey) -> StockCommand {
    StockCommand::PostMovement(PostMovement {
        product_id: key.product_id,
        warehouse_id: key.warehouse_id,
        movement_type: StockMovementType::Purchase,
        quantity: dec!(5),
        reason: None,
        reference_id: None,
        actor: None,
        related_warehouse_id: None,
        occurred_at: Utc::now(),
    })
}

fn bench_command_execution_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_execution_latency");
    group.sample_size(1000);

    // First movement on a fresh stream, no history to fold.
    group.bench_function("post_movement_fresh", |b| {
        let (dispatcher, _) = setup_dispatcher();
        b.iter(|| {
            let key = StockKey::new(
                ProductId::new(AggregateId::new()),
                WarehouseId::new(AggregateId::new()),
            );
            dispatcher
                .dispatch(
                    key.stream_id(),
                    "stock.ledger",
                    black_box(purchase_command(&key)),
                    Stock::empty,
                )
                .unwrap();
        });
    });

    // Movements on a stream that keeps growing; latency includes the
    // rehydration fold over the accumulated history.
    group.bench_function("post_movement_with_history", |b| {
        let (dispatcher, key) = setup_dispatcher();
        dispatcher
            .dispatch(
                key.stream_id(),
                "stock.ledger",
                purchase_command(&key),
                Stock::empty,
            )
            .unwrap();

        b.iter(|| {
            dispatcher
                .dispatch(
                    key.stream_id(),
                    "stock.ledger",
                    black_box(purchase_command(&key)),
                    Stock::empty,
                )
                .unwrap();
        });
    });

    group.finish();
}

fn stored_movement(key: &StockKey, sequence: u64) -> StockEvent {
    StockEvent::MovementPosted(MovementPosted {
        product_id: key.product_id,
        warehouse_id: key.warehouse_id,
        movement_type: StockMovementType::Purchase,
        quantity: dec!(1),
        previous_quantity: sequence.into(),
        new_quantity: (sequence + 1).into(),
        reason: None,
        reference_id: None,
        actor: None,
        related_warehouse_id: None,
        occurred_at: Utc::now(),
    })
}

fn bench_event_append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_append_throughput");

    for batch_size in [1u64, 10, 100, 1000] {
        group.throughput(Throughput::Elements(batch_size));
        group.bench_with_input(
            BenchmarkId::new("batch_append", batch_size),
            &batch_size,
            |b, &size| {
                let store = InMemoryEventStore::new();
                let key = StockKey::new(
                    ProductId::new(AggregateId::new()),
                    WarehouseId::new(AggregateId::new()),
                );

                b.iter(|| {
                    let events: Vec<UncommittedEvent> = (0..size)
                        .map(|i| {
                            UncommittedEvent::from_typed(
                                key.stream_id(),
                                "stock.ledger",
                                uuid::Uuid::now_v7(),
                                &stored_movement(&key, i),
                            )
                            .unwrap()
                        })
                        .collect();

                    black_box(store.append(events, ExpectedVersion::Any).unwrap());
                });
            },
        );
    }

    group.finish();
}

fn bench_stream_rehydration(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_rehydration");

    for event_count in [10u64, 100, 1000, 10000] {
        group.bench_with_input(
            BenchmarkId::new("fold_stock_stream", event_count),
            &event_count,
            |b, &count| {
                let store = InMemoryEventStore::new();
                let bus: Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>> =
                    Arc::new(InMemoryEventBus::new());
                let key = StockKey::new(
                    ProductId::new(AggregateId::new()),
                    WarehouseId::new(AggregateId::new()),
                );

                for i in 0..count {
                    let uncommitted = UncommittedEvent::from_typed(
                        key.stream_id(),
                        "stock.ledger",
                        uuid::Uuid::now_v7(),
                        &stored_movement(&key, i),
                    )
                    .unwrap();
                    store
                        .append(vec![uncommitted], ExpectedVersion::Exact(i))
                        .unwrap();
                }

                let dispatcher = CommandDispatcher::new(store, bus);
                b.iter(|| {
                    let stock = dispatcher
                        .load(black_box(key.stream_id()), Stock::empty)
                        .unwrap();
                    black_box(stock.quantity());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_command_execution_latency,
    bench_event_append_throughput,
    bench_stream_rehydration
);
criterion_main!(benches);
