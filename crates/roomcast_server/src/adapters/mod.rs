#![forbid(unsafe_code)]

pub mod memory;
pub mod null;

use async_trait::async_trait;
use roomcast_domain::{RoomId, UserSummary};
use roomcast_protocol::ChatMessage;

pub use memory::{InMemoryHistoryPersistence, InMemoryRoomStore, InMemoryUserDirectory};
pub use null::{NullHistoryPersistence, NullRoomStore, NullUserDirectory};

/// Durable room record owned by an external system of record.
///
/// Membership applies are driven by the event reconciler and must be
/// idempotent; delivery from the event log is at-least-once.
#[async_trait]
pub trait RoomStore: Send + Sync {
	/// Username of the room's creator, if the room exists.
	async fn room_creator(&self, room: &RoomId) -> anyhow::Result<Option<String>>;

	/// Mirror the live occupancy into the durable room record.
	async fn update_current_capacity(&self, room: &RoomId, value: u32) -> anyhow::Result<()>;

	/// Record that `user` is present in `room`. Upsert keyed by room+user;
	/// re-applying an existing membership is a no-op.
	async fn apply_join(&self, room: &RoomId, user: &str) -> anyhow::Result<()>;

	/// Record that `user` has left `room`. Already-left is a no-op, not an
	/// error.
	async fn apply_leave(&self, room: &RoomId, user: &str) -> anyhow::Result<()>;

	/// Usernames currently recorded as present in `room`.
	async fn members(&self, room: &RoomId) -> anyhow::Result<Vec<String>>;
}

/// Lookup of user profiles for membership snapshots.
#[async_trait]
pub trait UserDirectory: Send + Sync {
	async fn user_by_name(&self, username: &str) -> anyhow::Result<Option<UserSummary>>;
}

/// Long-term chat archive fed by the bounded persistence worker.
#[async_trait]
pub trait HistoryPersistence: Send + Sync {
	async fn persist(&self, message: &ChatMessage) -> anyhow::Result<()>;
}
