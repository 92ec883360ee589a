use std::sync::Arc;

use clinistock_core::ClinicId;

use super::r#trait::{EventStoreError, StoredEvent};

/// Bulk read access to stored events, beyond the single-stream loads the
/// write side needs. Used for projection rebuilds and audit export.
pub trait EventQuery: Send + Sync {
    /// Load every stored event for a clinic, ordered by aggregate then
    /// sequence number.
    fn load_clinic(&self, clinic_id: ClinicId) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<Q> EventQuery for Arc<Q>
where
    Q: EventQuery + ?Sized,
{
    fn load_clinic(&self, clinic_id: ClinicId) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_clinic(clinic_id)
    }
}
