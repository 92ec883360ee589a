mod in_memory;
mod query;
mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use query::EventQuery;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
