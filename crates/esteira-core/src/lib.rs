pub mod clock;
pub mod config;
pub mod dead_letter;
pub mod error;
pub mod event;
pub mod fingerprint;
pub mod message;
pub mod metrics;
pub mod migration;
pub mod queue;
pub mod storage;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::QueueOptions;
pub use dead_letter::{DeadLetterQueue, DeadMessageHandler};
pub use error::{QueueError, QueueResult, StorageError, StorageResult};
pub use event::{EventSink, QueueEvent};
pub use fingerprint::{fingerprint, Fingerprint};
pub use message::{Attributes, Message};
pub use metrics::QueueMetrics;
pub use migration::{MigrationError, PayloadMigrator};
pub use queue::{AckHandle, Queue, QueueState, Sweeper};
pub use storage::{
    LeaseOutcome, LeaseRequest, LeasedMessage, MemoryStore, RocksDbStore, Store, StoreCounts,
    StoreOp,
};
