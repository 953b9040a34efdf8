#![forbid(unsafe_code)]

pub mod broadcast;
pub mod capacity;
pub mod error;
pub mod events;
pub mod history;

pub use broadcast::{BroadcastFabric, BroadcastSubscription, InMemoryBroadcast, RedisBroadcast};
pub use capacity::{CapacityStore, CapacityUpdate, InMemoryCapacityStore, RedisCapacityStore};
pub use error::StoreError;
pub use events::{EventLog, InMemoryEventLog, LogRecord, RedisEventLog};
pub use history::{HistoryBuffer, InMemoryHistoryBuffer, RedisHistoryBuffer};

#[cfg(test)]
mod capacity_tests;
