//! Event plumbing: the `Event` contract, stream envelopes, and the pub/sub
//! bus abstraction that distributes committed events to projections.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::InMemoryEventBus;
