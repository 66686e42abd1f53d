//! `ratewatch-events`: outbox, broker and saga mechanics.
//!
//! Everything here is IO-free: record types that the stores persist, the
//! broker contracts the publisher and consumer talk to, an in-memory broker
//! for tests/dev, and the persisted saga state machine.

pub mod broker;
pub mod event;
pub mod in_memory_broker;
pub mod saga;

pub use broker::{BrokerError, BrokerMessage, MessageReader, MessageWriter};
pub use event::{ConsumedEvent, Event, EventData, Offset};
pub use in_memory_broker::{InMemoryBroker, InMemoryReader};
pub use saga::{SagaState, SagaStatus};
