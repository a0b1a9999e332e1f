pub mod keys;
pub mod memory;
pub mod rocksdb;
pub mod traits;

pub use memory::MemoryStore;
pub use rocksdb::RocksDbStore;
pub use traits::{LeaseOutcome, LeaseRequest, LeasedMessage, Store, StoreCounts, StoreOp};
