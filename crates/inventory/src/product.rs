use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clinistock_core::{Aggregate, AggregateId, AggregateRoot, ActorId, ClinicId, DomainError};
use clinistock_events::Event;

use crate::movement::{MovementKind, MovementReason, StockStatus, stock_status};

/// Product identifier (clinic-scoped via `clinic_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// What kind of supply a product is.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductCategory {
    Medication,
    MedicalSupply,
    Equipment,
    Consumable,
    Instrument,
    Other,
}

/// Aggregate root: Product.
///
/// Owns the catalog attributes and the materialized stock value. The stock
/// value is only ever changed by applying `StockMovementRecorded` events, so
/// it always equals the sum of the signed deltas in the product's stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    clinic_id: Option<ClinicId>,
    name: String,
    description: Option<String>,
    category: ProductCategory,
    supplier: Option<String>,
    unit_of_measure: String,
    unit_price: Option<u64>,
    barcode: Option<String>,
    min_stock: i64,
    current_stock: i64,
    active: bool,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            clinic_id: None,
            name: String::new(),
            description: None,
            category: ProductCategory::Other,
            supplier: None,
            unit_of_measure: String::new(),
            unit_price: None,
            barcode: None,
            min_stock: 0,
            current_stock: 0,
            active: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn clinic_id(&self) -> Option<ClinicId> {
        self.clinic_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> ProductCategory {
        self.category
    }

    pub fn unit_price(&self) -> Option<u64> {
        self.unit_price
    }

    pub fn min_stock(&self) -> i64 {
        self.min_stock
    }

    pub fn current_stock(&self) -> i64 {
        self.current_stock
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Derived stock health. Never stored.
    pub fn stock_status(&self) -> StockStatus {
        stock_status(self.current_stock, self.min_stock)
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProduct.
///
/// `opening_stock > 0` is recorded as an explicit opening adjustment
/// movement so the ledger fully explains the materialized stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub clinic_id: ClinicId,
    pub product_id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub category: ProductCategory,
    pub supplier: Option<String>,
    pub unit_of_measure: String,
    pub unit_price: Option<u64>,
    pub barcode: Option<String>,
    pub min_stock: i64,
    pub opening_stock: i64,
    pub recorded_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateProduct (non-stock attributes only).
///
/// `None` fields are left unchanged. Stock is deliberately absent: the only
/// way to change it is to record a movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProduct {
    pub clinic_id: ClinicId,
    pub product_id: ProductId,
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<ProductCategory>,
    pub supplier: Option<String>,
    pub unit_of_measure: Option<String>,
    pub unit_price: Option<u64>,
    pub barcode: Option<String>,
    pub min_stock: Option<i64>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeactivateProduct (soft delete; history remains queryable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateProduct {
    pub clinic_id: ClinicId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveStock (movement kind `in`, delta = +quantity).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub clinic_id: ClinicId,
    pub product_id: ProductId,
    pub quantity: u64,
    pub reason: MovementReason,
    pub description: Option<String>,
    pub reference_number: Option<String>,
    pub unit_cost: Option<u64>,
    pub recorded_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: IssueStock (movement kind `out`, delta = -quantity).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueStock {
    pub clinic_id: ClinicId,
    pub product_id: ProductId,
    pub quantity: u64,
    pub reason: MovementReason,
    pub description: Option<String>,
    pub reference_number: Option<String>,
    pub unit_cost: Option<u64>,
    pub recorded_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustStock — `new_quantity` is the absolute target after an
/// inventory count; the implied delta is computed here, never by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub clinic_id: ClinicId,
    pub product_id: ProductId,
    pub new_quantity: i64,
    pub reason: MovementReason,
    pub description: Option<String>,
    pub reference_number: Option<String>,
    pub recorded_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    UpdateProduct(UpdateProduct),
    DeactivateProduct(DeactivateProduct),
    ReceiveStock(ReceiveStock),
    IssueStock(IssueStock),
    AdjustStock(AdjustStock),
}

/// Event: ProductCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub clinic_id: ClinicId,
    pub product_id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub category: ProductCategory,
    pub supplier: Option<String>,
    pub unit_of_measure: String,
    pub unit_price: Option<u64>,
    pub barcode: Option<String>,
    pub min_stock: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductUpdated (only the changed attributes are present).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductUpdated {
    pub clinic_id: ClinicId,
    pub product_id: ProductId,
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<ProductCategory>,
    pub supplier: Option<String>,
    pub unit_of_measure: Option<String>,
    pub unit_price: Option<u64>,
    pub barcode: Option<String>,
    pub min_stock: Option<i64>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductDeactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDeactivated {
    pub clinic_id: ClinicId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockMovementRecorded — the ledger row.
///
/// Immutable once appended; corrections are new entries. `delta` is the
/// signed effect on stock (so the stream replays as pure deltas) and
/// `resulting_stock` is the materialized value right after this movement,
/// kept for audit display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovementRecorded {
    pub clinic_id: ClinicId,
    pub product_id: ProductId,
    pub kind: MovementKind,
    /// Caller-supplied value: amount moved for `in`/`out`, absolute target
    /// for `adjustment`.
    pub quantity: u64,
    pub delta: i64,
    pub resulting_stock: i64,
    pub reason: MovementReason,
    pub description: Option<String>,
    pub reference_number: Option<String>,
    pub unit_cost: Option<u64>,
    pub recorded_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated(ProductCreated),
    ProductUpdated(ProductUpdated),
    ProductDeactivated(ProductDeactivated),
    StockMovementRecorded(StockMovementRecorded),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "inventory.product.created",
            ProductEvent::ProductUpdated(_) => "inventory.product.updated",
            ProductEvent::ProductDeactivated(_) => "inventory.product.deactivated",
            ProductEvent::StockMovementRecorded(_) => "inventory.stock.movement_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductCreated(e) => e.occurred_at,
            ProductEvent::ProductUpdated(e) => e.occurred_at,
            ProductEvent::ProductDeactivated(e) => e.occurred_at,
            ProductEvent::StockMovementRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated(e) => {
                self.id = e.product_id;
                self.clinic_id = Some(e.clinic_id);
                self.name = e.name.clone();
                self.description = e.description.clone();
                self.category = e.category;
                self.supplier = e.supplier.clone();
                self.unit_of_measure = e.unit_of_measure.clone();
                self.unit_price = e.unit_price;
                self.barcode = e.barcode.clone();
                self.min_stock = e.min_stock;
                self.current_stock = 0;
                self.active = true;
                self.created = true;
            }
            ProductEvent::ProductUpdated(e) => {
                if let Some(name) = &e.name {
                    self.name = name.clone();
                }
                if let Some(description) = &e.description {
                    self.description = Some(description.clone());
                }
                if let Some(category) = e.category {
                    self.category = category;
                }
                if let Some(supplier) = &e.supplier {
                    self.supplier = Some(supplier.clone());
                }
                if let Some(unit) = &e.unit_of_measure {
                    self.unit_of_measure = unit.clone();
                }
                if let Some(price) = e.unit_price {
                    self.unit_price = Some(price);
                }
                if let Some(barcode) = &e.barcode {
                    self.barcode = Some(barcode.clone());
                }
                if let Some(min_stock) = e.min_stock {
                    self.min_stock = min_stock;
                }
            }
            ProductEvent::ProductDeactivated(_) => {
                self.active = false;
            }
            ProductEvent::StockMovementRecorded(e) => {
                // Materialized stock is a fold of the signed deltas.
                self.current_stock += e.delta;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::UpdateProduct(cmd) => self.handle_update(cmd),
            ProductCommand::DeactivateProduct(cmd) => self.handle_deactivate(cmd),
            ProductCommand::ReceiveStock(cmd) => self.handle_receive(cmd),
            ProductCommand::IssueStock(cmd) => self.handle_issue(cmd),
            ProductCommand::AdjustStock(cmd) => self.handle_adjust(cmd),
        }
    }
}

impl Product {
    fn ensure_clinic(&self, clinic_id: ClinicId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.clinic_id != Some(clinic_id) {
            return Err(DomainError::conflict("clinic mismatch"));
        }
        Ok(())
    }

    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.id != product_id {
            return Err(DomainError::conflict("product_id mismatch"));
        }
        Ok(())
    }

    /// Movements require an existing, active product.
    fn ensure_movable(&self, clinic_id: ClinicId, product_id: ProductId) -> Result<(), DomainError> {
        if !self.created || !self.active {
            return Err(DomainError::not_found());
        }
        self.ensure_clinic(clinic_id)?;
        self.ensure_product_id(product_id)
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.unit_of_measure.trim().is_empty() {
            return Err(DomainError::validation("unit_of_measure cannot be empty"));
        }
        if cmd.min_stock < 0 {
            return Err(DomainError::validation("min_stock cannot be negative"));
        }
        if cmd.opening_stock < 0 {
            return Err(DomainError::validation("opening stock cannot be negative"));
        }

        let mut events = vec![ProductEvent::ProductCreated(ProductCreated {
            clinic_id: cmd.clinic_id,
            product_id: cmd.product_id,
            name: cmd.name.clone(),
            description: cmd.description.clone(),
            category: cmd.category,
            supplier: cmd.supplier.clone(),
            unit_of_measure: cmd.unit_of_measure.clone(),
            unit_price: cmd.unit_price,
            barcode: cmd.barcode.clone(),
            min_stock: cmd.min_stock,
            occurred_at: cmd.occurred_at,
        })];

        // The opening quantity is itself a ledger entry, so replaying the
        // stream always reproduces the materialized stock.
        if cmd.opening_stock > 0 {
            events.push(ProductEvent::StockMovementRecorded(StockMovementRecorded {
                clinic_id: cmd.clinic_id,
                product_id: cmd.product_id,
                kind: MovementKind::Adjustment,
                quantity: cmd.opening_stock as u64,
                delta: cmd.opening_stock,
                resulting_stock: cmd.opening_stock,
                reason: MovementReason::Adjustment,
                description: Some("opening stock".to_string()),
                reference_number: None,
                unit_cost: None,
                recorded_by: cmd.recorded_by,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_update(&self, cmd: &UpdateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_clinic(cmd.clinic_id)?;
        self.ensure_product_id(cmd.product_id)?;

        if let Some(name) = &cmd.name {
            if name.trim().is_empty() {
                return Err(DomainError::validation("name cannot be empty"));
            }
        }
        if let Some(min_stock) = cmd.min_stock {
            if min_stock < 0 {
                return Err(DomainError::validation("min_stock cannot be negative"));
            }
        }

        let no_changes = cmd.name.is_none()
            && cmd.description.is_none()
            && cmd.category.is_none()
            && cmd.supplier.is_none()
            && cmd.unit_of_measure.is_none()
            && cmd.unit_price.is_none()
            && cmd.barcode.is_none()
            && cmd.min_stock.is_none();
        if no_changes {
            return Ok(vec![]);
        }

        Ok(vec![ProductEvent::ProductUpdated(ProductUpdated {
            clinic_id: cmd.clinic_id,
            product_id: cmd.product_id,
            name: cmd.name.clone(),
            description: cmd.description.clone(),
            category: cmd.category,
            supplier: cmd.supplier.clone(),
            unit_of_measure: cmd.unit_of_measure.clone(),
            unit_price: cmd.unit_price,
            barcode: cmd.barcode.clone(),
            min_stock: cmd.min_stock,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(&self, cmd: &DeactivateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_clinic(cmd.clinic_id)?;
        self.ensure_product_id(cmd.product_id)?;

        if !self.active {
            return Err(DomainError::conflict("product is already deactivated"));
        }

        Ok(vec![ProductEvent::ProductDeactivated(ProductDeactivated {
            clinic_id: cmd.clinic_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReceiveStock) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_movable(cmd.clinic_id, cmd.product_id)?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        let delta = i64::try_from(cmd.quantity)
            .map_err(|_| DomainError::validation("quantity too large"))?;
        let resulting = self
            .current_stock
            .checked_add(delta)
            .ok_or_else(|| DomainError::validation("quantity too large"))?;

        Ok(vec![self.movement_event(
            cmd.clinic_id,
            MovementKind::In,
            cmd.quantity,
            delta,
            resulting,
            cmd.reason,
            cmd.description.clone(),
            cmd.reference_number.clone(),
            cmd.unit_cost,
            cmd.recorded_by,
            cmd.occurred_at,
        )])
    }

    fn handle_issue(&self, cmd: &IssueStock) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_movable(cmd.clinic_id, cmd.product_id)?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        let delta = i64::try_from(cmd.quantity)
            .map_err(|_| DomainError::validation("quantity too large"))?;

        if delta > self.current_stock {
            return Err(DomainError::insufficient_stock(
                cmd.quantity,
                self.current_stock,
            ));
        }

        Ok(vec![self.movement_event(
            cmd.clinic_id,
            MovementKind::Out,
            cmd.quantity,
            -delta,
            self.current_stock - delta,
            cmd.reason,
            cmd.description.clone(),
            cmd.reference_number.clone(),
            cmd.unit_cost,
            cmd.recorded_by,
            cmd.occurred_at,
        )])
    }

    fn handle_adjust(&self, cmd: &AdjustStock) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_movable(cmd.clinic_id, cmd.product_id)?;

        if cmd.new_quantity < 0 {
            // Rejected as invalid input, never silently clamped.
            return Err(DomainError::validation(
                "adjustment target cannot be negative",
            ));
        }

        // A zero-delta adjustment is still recorded: an inventory count that
        // confirms the stock is an auditable fact in its own right.
        let delta = cmd.new_quantity - self.current_stock;

        Ok(vec![self.movement_event(
            cmd.clinic_id,
            MovementKind::Adjustment,
            cmd.new_quantity as u64,
            delta,
            cmd.new_quantity,
            cmd.reason,
            cmd.description.clone(),
            cmd.reference_number.clone(),
            None,
            cmd.recorded_by,
            cmd.occurred_at,
        )])
    }

    #[allow(clippy::too_many_arguments)]
    fn movement_event(
        &self,
        clinic_id: ClinicId,
        kind: MovementKind,
        quantity: u64,
        delta: i64,
        resulting_stock: i64,
        reason: MovementReason,
        description: Option<String>,
        reference_number: Option<String>,
        unit_cost: Option<u64>,
        recorded_by: ActorId,
        occurred_at: DateTime<Utc>,
    ) -> ProductEvent {
        ProductEvent::StockMovementRecorded(StockMovementRecorded {
            clinic_id,
            product_id: self.id,
            kind,
            quantity,
            delta,
            resulting_stock,
            reason,
            description,
            reference_number,
            unit_cost,
            recorded_by,
            occurred_at,
        })
    }
}
