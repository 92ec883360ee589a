//! Integration tests for the full event-sourced pipeline.
//!
//! Tests: Command → EventStore → EventBus → Projections → ReadModels
//!
//! Verifies:
//! - Commands produce events that update read models correctly
//! - Clinic isolation is preserved
//! - Concurrent movements on one product cannot oversell
//! - Duplicate request ids are applied once, even when concurrent
//! - Out-of-order envelope delivery is refused until the gap fills
//! - Read models rebuild identically from the stream

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use std::sync::{Arc, Barrier};
    use uuid::Uuid;

    use clinistock_core::{ActorId, AggregateId, ClinicId};
    use clinistock_events::{EventBus, EventEnvelope, InMemoryEventBus};
    use clinistock_inventory::{
        AdjustStock, CreateProduct, IssueStock, MovementKind, MovementReason, Product,
        ProductCategory, ProductCommand, ProductId, ReceiveStock, StockStatus,
    };

    use crate::command_dispatcher::{CommandDispatcher, DispatchError};
    use crate::event_store::{EventQuery, EventStore, InMemoryEventStore};
    use crate::projections::{
        MovementHistoryProjection, MovementQuery, ProductReadModel, StockLevelsProjection,
        summarize,
    };
    use crate::read_model::InMemoryClinicStore;

    type TestBus = Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>;
    type TestDispatcher = Arc<CommandDispatcher<Arc<InMemoryEventStore>, TestBus>>;
    type TestLevels =
        Arc<StockLevelsProjection<Arc<InMemoryClinicStore<ProductId, ProductReadModel>>>>;

    fn test_clinic_id() -> ClinicId {
        ClinicId::new()
    }

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    struct Harness {
        dispatcher: TestDispatcher,
        levels: TestLevels,
        history: Arc<MovementHistoryProjection>,
        store: Arc<InMemoryEventStore>,
    }

    fn setup() -> Harness {
        let store = Arc::new(InMemoryEventStore::new());
        let bus: TestBus = Arc::new(InMemoryEventBus::new());
        let dispatcher = Arc::new(CommandDispatcher::new(store.clone(), bus.clone()));
        let levels: TestLevels =
            Arc::new(StockLevelsProjection::new(Arc::new(InMemoryClinicStore::new())));
        let history = Arc::new(MovementHistoryProjection::new());

        // Subscribe to the bus BEFORE any events are published.
        let levels_clone = levels.clone();
        let history_clone = history.clone();
        let bus_clone = bus.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
        std::thread::spawn(move || {
            let sub = bus_clone.subscribe();
            let _ = ready_tx.send(());
            while let Ok(env) = sub.recv() {
                if let Err(e) = levels_clone.apply_envelope(&env) {
                    eprintln!("Failed to apply envelope to stock levels: {:?}", e);
                }
                if let Err(e) = history_clone.apply_envelope(&env) {
                    eprintln!("Failed to apply envelope to movement history: {:?}", e);
                }
            }
        });
        // Ensure subscriber is ready before returning (prevents missing early events).
        let _ = ready_rx.recv_timeout(std::time::Duration::from_secs(1));

        Harness {
            dispatcher,
            levels,
            history,
            store,
        }
    }

    /// Helper: wait a short time for the subscriber thread to catch up.
    fn wait_for_processing() {
        std::thread::sleep(std::time::Duration::from_millis(50));
    }

    fn create_cmd(
        clinic_id: ClinicId,
        product_id: ProductId,
        min_stock: i64,
        opening_stock: i64,
    ) -> ProductCommand {
        ProductCommand::CreateProduct(CreateProduct {
            clinic_id,
            product_id,
            name: "Nitrile Gloves M".to_string(),
            description: None,
            category: ProductCategory::MedicalSupply,
            supplier: Some("MedSupplies Co".to_string()),
            unit_of_measure: "box".to_string(),
            unit_price: Some(899),
            barcode: None,
            min_stock,
            opening_stock,
            recorded_by: ActorId::new(),
            occurred_at: Utc::now(),
        })
    }

    fn receive_cmd(clinic_id: ClinicId, product_id: ProductId, quantity: u64) -> ProductCommand {
        ProductCommand::ReceiveStock(ReceiveStock {
            clinic_id,
            product_id,
            quantity,
            reason: MovementReason::Purchase,
            description: None,
            reference_number: None,
            unit_cost: Some(850),
            recorded_by: ActorId::new(),
            occurred_at: Utc::now(),
        })
    }

    fn issue_cmd(clinic_id: ClinicId, product_id: ProductId, quantity: u64) -> ProductCommand {
        ProductCommand::IssueStock(IssueStock {
            clinic_id,
            product_id,
            quantity,
            reason: MovementReason::Usage,
            description: None,
            reference_number: None,
            unit_cost: None,
            recorded_by: ActorId::new(),
            occurred_at: Utc::now(),
        })
    }

    fn dispatch(
        dispatcher: &TestDispatcher,
        clinic_id: ClinicId,
        product_id: ProductId,
        command: ProductCommand,
        request_id: Option<Uuid>,
    ) -> Result<Vec<crate::event_store::StoredEvent>, DispatchError> {
        dispatcher.dispatch(
            clinic_id,
            product_id.0,
            "inventory.product",
            command,
            request_id,
            |_, id| Product::empty(ProductId::new(id)),
        )
    }

    #[test]
    fn create_with_opening_stock_updates_read_models() {
        let h = setup();
        let clinic_id = test_clinic_id();
        let product_id = test_product_id();

        let stored = dispatch(
            &h.dispatcher,
            clinic_id,
            product_id,
            create_cmd(clinic_id, product_id, 5, 20),
            None,
        )
        .unwrap();
        // ProductCreated + opening adjustment.
        assert_eq!(stored.len(), 2);

        wait_for_processing();

        let rm = h.levels.get(clinic_id, &product_id).unwrap();
        assert_eq!(rm.name, "Nitrile Gloves M");
        assert_eq!(rm.current_stock, 20);
        assert_eq!(rm.status(), StockStatus::Normal);

        let page = h.history.list(clinic_id, &MovementQuery::default());
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].kind, MovementKind::Adjustment);
        assert_eq!(page.records[0].delta, 20);
    }

    #[test]
    fn movements_flow_through_to_read_models() {
        let h = setup();
        let clinic_id = test_clinic_id();
        let product_id = test_product_id();

        dispatch(
            &h.dispatcher,
            clinic_id,
            product_id,
            create_cmd(clinic_id, product_id, 5, 0),
            None,
        )
        .unwrap();
        dispatch(
            &h.dispatcher,
            clinic_id,
            product_id,
            receive_cmd(clinic_id, product_id, 30),
            None,
        )
        .unwrap();
        dispatch(
            &h.dispatcher,
            clinic_id,
            product_id,
            issue_cmd(clinic_id, product_id, 12),
            None,
        )
        .unwrap();

        wait_for_processing();

        let rm = h.levels.get(clinic_id, &product_id).unwrap();
        assert_eq!(rm.current_stock, 18);

        // Newest first.
        let page = h.history.list(clinic_id, &MovementQuery::default());
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].delta, -12);
        assert_eq!(page.records[0].resulting_stock, 18);
        assert_eq!(page.records[1].delta, 30);
        assert_eq!(page.records[1].resulting_stock, 30);
    }

    #[test]
    fn clinic_isolation_preserved() {
        let h = setup();
        let clinic1 = test_clinic_id();
        let clinic2 = test_clinic_id();
        let product1 = test_product_id();
        let product2 = test_product_id();

        dispatch(
            &h.dispatcher,
            clinic1,
            product1,
            create_cmd(clinic1, product1, 5, 10),
            None,
        )
        .unwrap();
        dispatch(
            &h.dispatcher,
            clinic2,
            product2,
            create_cmd(clinic2, product2, 5, 3),
            None,
        )
        .unwrap();

        wait_for_processing();

        let clinic1_products = h.levels.list(clinic1);
        assert_eq!(clinic1_products.len(), 1);
        assert_eq!(clinic1_products[0].product_id, product1);

        assert!(h.levels.get(clinic1, &product2).is_none());
        assert!(h.levels.get(clinic2, &product1).is_none());

        let page = h.history.list(clinic1, &MovementQuery::default());
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].product_id, product1);
    }

    #[test]
    fn insufficient_stock_rejected_and_nothing_published() {
        let h = setup();
        let clinic_id = test_clinic_id();
        let product_id = test_product_id();

        dispatch(
            &h.dispatcher,
            clinic_id,
            product_id,
            create_cmd(clinic_id, product_id, 5, 4),
            None,
        )
        .unwrap();
        wait_for_processing();

        let err = dispatch(
            &h.dispatcher,
            clinic_id,
            product_id,
            issue_cmd(clinic_id, product_id, 9),
            None,
        )
        .unwrap_err();
        match err {
            DispatchError::InsufficientStock {
                requested,
                available,
            } => {
                assert_eq!(requested, 9);
                assert_eq!(available, 4);
            }
            e => panic!("Expected InsufficientStock, got: {:?}", e),
        }

        wait_for_processing();

        // Read model unchanged, no extra movement rows.
        let rm = h.levels.get(clinic_id, &product_id).unwrap();
        assert_eq!(rm.current_stock, 4);
        let page = h.history.list(clinic_id, &MovementQuery::default());
        assert_eq!(page.records.len(), 1);
    }

    #[test]
    fn concurrent_issues_cannot_oversell() {
        let h = setup();
        let clinic_id = test_clinic_id();
        let product_id = test_product_id();

        dispatch(
            &h.dispatcher,
            clinic_id,
            product_id,
            create_cmd(clinic_id, product_id, 0, 5),
            None,
        )
        .unwrap();

        // Two writers race to issue 3 each against stock 5. Whatever the
        // interleaving, at most one can succeed.
        let barrier = Arc::new(Barrier::new(2));
        let mut handles = Vec::new();
        for _ in 0..2 {
            let dispatcher = h.dispatcher.clone();
            let barrier = barrier.clone();
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                dispatch(
                    &dispatcher,
                    clinic_id,
                    product_id,
                    issue_cmd(clinic_id, product_id, 3),
                    None,
                )
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        for r in results {
            if let Err(e) = r {
                assert!(
                    matches!(e, DispatchError::InsufficientStock { .. }),
                    "loser should be rejected by the stock rule, got: {:?}",
                    e
                );
            }
        }

        wait_for_processing();
        let rm = h.levels.get(clinic_id, &product_id).unwrap();
        assert_eq!(rm.current_stock, 2);
    }

    #[test]
    fn out_of_order_delivery_is_rejected_until_the_gap_fills() {
        let h = setup();
        let clinic_id = test_clinic_id();
        let product_id = test_product_id();

        // Stream: created(1), opening adjustment(2), receive(3).
        dispatch(
            &h.dispatcher,
            clinic_id,
            product_id,
            create_cmd(clinic_id, product_id, 5, 10),
            None,
        )
        .unwrap();
        dispatch(
            &h.dispatcher,
            clinic_id,
            product_id,
            receive_cmd(clinic_id, product_id, 5),
            None,
        )
        .unwrap();

        let envelopes: Vec<_> = h
            .store
            .load_clinic(clinic_id)
            .unwrap()
            .iter()
            .map(|e| e.to_envelope())
            .collect();
        assert_eq!(envelopes.len(), 3);

        let fresh: TestLevels =
            Arc::new(StockLevelsProjection::new(Arc::new(InMemoryClinicStore::new())));
        let fresh_history = MovementHistoryProjection::new();

        // A later sequence arriving first must be refused, never absorbed as
        // the stream's starting point.
        assert!(fresh.apply_envelope(&envelopes[2]).is_err());
        assert!(fresh.apply_envelope(&envelopes[1]).is_err());
        assert!(fresh.get(clinic_id, &product_id).is_none());
        assert!(fresh_history.apply_envelope(&envelopes[2]).is_err());

        // Once delivery catches up, the previously refused event applies.
        fresh.apply_envelope(&envelopes[0]).unwrap();
        fresh.apply_envelope(&envelopes[1]).unwrap();
        fresh.apply_envelope(&envelopes[2]).unwrap();
        fresh_history.apply_envelope(&envelopes[0]).unwrap();
        fresh_history.apply_envelope(&envelopes[1]).unwrap();
        fresh_history.apply_envelope(&envelopes[2]).unwrap();

        let rm = fresh.get(clinic_id, &product_id).unwrap();
        assert_eq!(rm.current_stock, 15);
        let page = fresh_history.list(clinic_id, &MovementQuery::default());
        assert_eq!(page.records.len(), 2);
    }

    #[test]
    fn concurrent_retries_with_one_request_id_commit_once() {
        let h = setup();
        let clinic_id = test_clinic_id();
        let product_id = test_product_id();
        let request_id = Uuid::now_v7();

        dispatch(
            &h.dispatcher,
            clinic_id,
            product_id,
            create_cmd(clinic_id, product_id, 5, 0),
            None,
        )
        .unwrap();

        // A caller retrying a timed-out request while the original is still
        // in flight: both carry the same key, only one may append.
        let barrier = Arc::new(Barrier::new(2));
        let mut handles = Vec::new();
        for _ in 0..2 {
            let dispatcher = h.dispatcher.clone();
            let barrier = barrier.clone();
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                dispatch(
                    &dispatcher,
                    clinic_id,
                    product_id,
                    receive_cmd(clinic_id, product_id, 10),
                    Some(request_id),
                )
            }));
        }

        let results: Vec<_> = handles
            .into_iter()
            .map(|t| t.join().unwrap().unwrap())
            .collect();
        assert_eq!(results[0], results[1]);

        // Created + exactly one movement.
        let stream = h.store.load_stream(clinic_id, product_id.0).unwrap();
        assert_eq!(stream.len(), 2);

        wait_for_processing();
        let rm = h.levels.get(clinic_id, &product_id).unwrap();
        assert_eq!(rm.current_stock, 10);
        let page = h.history.list(clinic_id, &MovementQuery::default());
        assert_eq!(page.records.len(), 1);
    }

    #[test]
    fn duplicate_request_id_is_applied_once() {
        let h = setup();
        let clinic_id = test_clinic_id();
        let product_id = test_product_id();
        let request_id = Uuid::now_v7();

        dispatch(
            &h.dispatcher,
            clinic_id,
            product_id,
            create_cmd(clinic_id, product_id, 5, 0),
            None,
        )
        .unwrap();

        let first = dispatch(
            &h.dispatcher,
            clinic_id,
            product_id,
            receive_cmd(clinic_id, product_id, 10),
            Some(request_id),
        )
        .unwrap();
        let second = dispatch(
            &h.dispatcher,
            clinic_id,
            product_id,
            receive_cmd(clinic_id, product_id, 10),
            Some(request_id),
        )
        .unwrap();

        // Retry returned the original commit, not a second movement.
        assert_eq!(first, second);

        wait_for_processing();
        let rm = h.levels.get(clinic_id, &product_id).unwrap();
        assert_eq!(rm.current_stock, 10);
        let page = h.history.list(clinic_id, &MovementQuery::default());
        assert_eq!(page.records.len(), 1);
    }

    #[test]
    fn rebuild_reproduces_read_models() {
        let h = setup();
        let clinic_id = test_clinic_id();
        let product_id = test_product_id();

        dispatch(
            &h.dispatcher,
            clinic_id,
            product_id,
            create_cmd(clinic_id, product_id, 5, 20),
            None,
        )
        .unwrap();
        dispatch(
            &h.dispatcher,
            clinic_id,
            product_id,
            issue_cmd(clinic_id, product_id, 16),
            None,
        )
        .unwrap();
        dispatch(
            &h.dispatcher,
            clinic_id,
            product_id,
            ProductCommand::AdjustStock(AdjustStock {
                clinic_id,
                product_id,
                new_quantity: 7,
                reason: MovementReason::Adjustment,
                description: Some("monthly count".to_string()),
                reference_number: None,
                recorded_by: ActorId::new(),
                occurred_at: Utc::now(),
            }),
            None,
        )
        .unwrap();
        wait_for_processing();

        let live = h.levels.get(clinic_id, &product_id).unwrap();
        let live_page = h.history.list(clinic_id, &MovementQuery::default());

        // Replay the stream into fresh projections.
        let envelopes: Vec<_> = h
            .store
            .load_clinic(clinic_id)
            .unwrap()
            .iter()
            .map(|e| e.to_envelope())
            .collect();

        let rebuilt_levels: TestLevels =
            Arc::new(StockLevelsProjection::new(Arc::new(InMemoryClinicStore::new())));
        let rebuilt_history = MovementHistoryProjection::new();
        rebuilt_levels
            .rebuild_from_scratch(envelopes.clone())
            .unwrap();
        rebuilt_history.rebuild_from_scratch(envelopes).unwrap();

        assert_eq!(rebuilt_levels.get(clinic_id, &product_id).unwrap(), live);
        let rebuilt_page = rebuilt_history.list(clinic_id, &MovementQuery::default());
        assert_eq!(rebuilt_page.records, live_page.records);
    }

    #[test]
    fn movement_history_pagination_and_filtering() {
        let h = setup();
        let clinic_id = test_clinic_id();
        let product1 = test_product_id();
        let product2 = test_product_id();

        dispatch(
            &h.dispatcher,
            clinic_id,
            product1,
            create_cmd(clinic_id, product1, 5, 0),
            None,
        )
        .unwrap();
        dispatch(
            &h.dispatcher,
            clinic_id,
            product2,
            create_cmd(clinic_id, product2, 5, 0),
            None,
        )
        .unwrap();
        for _ in 0..3 {
            dispatch(
                &h.dispatcher,
                clinic_id,
                product1,
                receive_cmd(clinic_id, product1, 5),
                None,
            )
            .unwrap();
        }
        dispatch(
            &h.dispatcher,
            clinic_id,
            product2,
            receive_cmd(clinic_id, product2, 8),
            None,
        )
        .unwrap();
        wait_for_processing();

        // Product filter.
        let page = h.history.list(
            clinic_id,
            &MovementQuery {
                product_id: Some(product2),
                ..Default::default()
            },
        );
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].delta, 8);

        // Pagination walks the full trail newest-first, no gaps or repeats.
        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = h.history.list(
                clinic_id,
                &MovementQuery {
                    product_id: None,
                    before: cursor,
                    limit: Some(2),
                },
            );
            seen.extend(page.records);
            match page.next_cursor {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        assert_eq!(seen.len(), 4);
        let positions: Vec<u64> = seen.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![4, 3, 2, 1]);
    }

    #[test]
    fn summary_reflects_stock_state() {
        let h = setup();
        let clinic_id = test_clinic_id();
        let healthy = test_product_id();
        let low = test_product_id();
        let empty = test_product_id();

        dispatch(
            &h.dispatcher,
            clinic_id,
            healthy,
            create_cmd(clinic_id, healthy, 5, 20),
            None,
        )
        .unwrap();
        dispatch(&h.dispatcher, clinic_id, low, create_cmd(clinic_id, low, 5, 3), None).unwrap();
        dispatch(
            &h.dispatcher,
            clinic_id,
            empty,
            create_cmd(clinic_id, empty, 5, 0),
            None,
        )
        .unwrap();
        wait_for_processing();

        let summary = summarize(&h.levels, &h.history, clinic_id, Utc::now());
        assert_eq!(summary.total_products, 3);
        assert_eq!(summary.low_stock_count, 1);
        assert_eq!(summary.out_of_stock_count, 1);
        // 23 units at 899 cents each.
        assert_eq!(summary.total_stock_value, 23 * 899);
        assert_eq!(summary.recent_movement_count, 2);
    }
}
