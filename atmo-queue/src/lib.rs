pub mod command;
pub mod memory;
pub mod pump;
pub mod queue;
pub mod sqlite;
pub mod transport;

pub use command::{CancelOutcome, CommandKind, ExecutionOutcome, QueuedCommand};
pub use memory::{MemoryCommandQueue, MemoryQueueError};
pub use pump::{DeliveryPump, PumpConfig, PumpError};
pub use queue::CommandQueue;
pub use sqlite::{SqliteCommandQueue, SqliteQueueError};
pub use transport::{InMemoryQueueTransport, QueueReceipt, QueueTransport, TransportError};
