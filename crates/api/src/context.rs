use uuid::Uuid;

use clinistock_core::{ActorId, ClinicId};

/// Clinic context for a request.
///
/// This is immutable and must be present for all clinic-scoped routes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ClinicContext {
    clinic_id: ClinicId,
}

impl ClinicContext {
    pub fn new(clinic_id: ClinicId) -> Self {
        Self { clinic_id }
    }

    pub fn clinic_id(&self) -> ClinicId {
        self.clinic_id
    }
}

/// Actor context for a request (the staff member movements are attributed
/// to). Authentication happens upstream; this layer only carries identity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ActorContext {
    actor_id: ActorId,
}

impl ActorContext {
    pub fn new(actor_id: ActorId) -> Self {
        Self { actor_id }
    }

    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }
}

/// Optional caller-supplied request id (`Idempotency-Key` header), used to
/// make command dispatch idempotent across transport retries.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IdempotencyKey(Option<Uuid>);

impl IdempotencyKey {
    pub fn new(request_id: Option<Uuid>) -> Self {
        Self(request_id)
    }

    pub fn request_id(&self) -> Option<Uuid> {
        self.0
    }
}
