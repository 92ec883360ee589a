use std::sync::Arc;

use chrono::Utc;

use clinistock_core::{AggregateId, ClinicId, DomainError};
use clinistock_events::{EventBus, EventEnvelope, InMemoryEventBus};
use clinistock_infra::{
    command_dispatcher::{CommandDispatcher, DispatchError},
    event_store::{InMemoryEventStore, StoredEvent},
    projections::{
        MovementHistoryProjection, MovementPage, MovementQuery, ProductReadModel,
        StockLevelsProjection, StockSummary, summarize,
    },
    read_model::InMemoryClinicStore,
};
use clinistock_inventory::ProductId;

type InMemoryDispatcher = CommandDispatcher<
    Arc<InMemoryEventStore>,
    Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>,
>;

type LevelsProjection = StockLevelsProjection<Arc<InMemoryClinicStore<ProductId, ProductReadModel>>>;

/// Wired application services: dispatcher on the write side, projections on
/// the read side, connected by the event bus.
pub struct AppServices {
    dispatcher: Arc<InMemoryDispatcher>,
    stock_levels: Arc<LevelsProjection>,
    movement_history: Arc<MovementHistoryProjection>,
}

pub fn build_services() -> AppServices {
    // In-memory infra wiring: store + bus + projections.
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>> =
        Arc::new(InMemoryEventBus::new());

    let rm_store: Arc<InMemoryClinicStore<ProductId, ProductReadModel>> =
        Arc::new(InMemoryClinicStore::new());
    let stock_levels: Arc<LevelsProjection> = Arc::new(StockLevelsProjection::new(rm_store));
    let movement_history = Arc::new(MovementHistoryProjection::new());

    // Background subscriber: bus -> projections.
    {
        let sub = bus.subscribe();
        let stock_levels = stock_levels.clone();
        let movement_history = movement_history.clone();
        tokio::task::spawn_blocking(move || {
            while let Ok(env) = sub.recv() {
                if env.aggregate_type() != "inventory.product" {
                    continue;
                }
                if let Err(e) = stock_levels.apply_envelope(&env) {
                    tracing::warn!("stock levels projection apply failed: {e}");
                }
                if let Err(e) = movement_history.apply_envelope(&env) {
                    tracing::warn!("movement history projection apply failed: {e}");
                }
            }
        });
    }

    let dispatcher: Arc<InMemoryDispatcher> = Arc::new(CommandDispatcher::new(store, bus));
    AppServices {
        dispatcher,
        stock_levels,
        movement_history,
    }
}

impl AppServices {
    pub fn dispatch<A>(
        &self,
        clinic_id: ClinicId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        request_id: Option<uuid::Uuid>,
        make_aggregate: impl Fn(ClinicId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: clinistock_core::Aggregate<Error = DomainError>,
        A::Event: clinistock_events::Event + serde::Serialize + serde::de::DeserializeOwned,
    {
        self.dispatcher.dispatch::<A>(
            clinic_id,
            aggregate_id,
            aggregate_type,
            command,
            request_id,
            make_aggregate,
        )
    }

    pub fn product_get(
        &self,
        clinic_id: ClinicId,
        product_id: &ProductId,
    ) -> Option<ProductReadModel> {
        self.stock_levels.get(clinic_id, product_id)
    }

    pub fn products_list(&self, clinic_id: ClinicId) -> Vec<ProductReadModel> {
        self.stock_levels.list(clinic_id)
    }

    pub fn movements_list(&self, clinic_id: ClinicId, query: &MovementQuery) -> MovementPage {
        self.movement_history.list(clinic_id, query)
    }

    pub fn summary(&self, clinic_id: ClinicId) -> StockSummary {
        summarize(&*self.stock_levels, &self.movement_history, clinic_id, Utc::now())
    }
}
