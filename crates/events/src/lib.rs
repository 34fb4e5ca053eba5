//! Notification plumbing: typed events, tenant-scoped envelopes and a pub/sub bus.
//!
//! The ledger publishes "balance changed", "reserve changed" and audit records
//! through an [`EventBus`]; cached-balance refreshers and audit shippers subscribe.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod tenant;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use tenant::TenantScoped;
