#![forbid(unsafe_code)]

use async_trait::async_trait;
use roomcast_domain::{RoomId, UserSummary};
use roomcast_protocol::ChatMessage;
use tracing::debug;

use super::{HistoryPersistence, RoomStore, UserDirectory};

/// No-op room store for deployments where the durable record lives in
/// another service that is not wired up yet.
#[derive(Default)]
pub struct NullRoomStore;

impl NullRoomStore {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl RoomStore for NullRoomStore {
	async fn room_creator(&self, _room: &RoomId) -> anyhow::Result<Option<String>> {
		Ok(None)
	}

	async fn update_current_capacity(&self, room: &RoomId, value: u32) -> anyhow::Result<()> {
		debug!(room = %room, value, "room store disabled, capacity mirror dropped");
		Ok(())
	}

	async fn apply_join(&self, _room: &RoomId, _user: &str) -> anyhow::Result<()> {
		Ok(())
	}

	async fn apply_leave(&self, _room: &RoomId, _user: &str) -> anyhow::Result<()> {
		Ok(())
	}

	async fn members(&self, _room: &RoomId) -> anyhow::Result<Vec<String>> {
		Ok(Vec::new())
	}
}

/// Directory that knows nobody; membership snapshots stay empty.
#[derive(Default)]
pub struct NullUserDirectory;

impl NullUserDirectory {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl UserDirectory for NullUserDirectory {
	async fn user_by_name(&self, _username: &str) -> anyhow::Result<Option<UserSummary>> {
		Ok(None)
	}
}

/// Archive sink that drops everything.
#[derive(Default)]
pub struct NullHistoryPersistence;

impl NullHistoryPersistence {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl HistoryPersistence for NullHistoryPersistence {
	async fn persist(&self, _message: &ChatMessage) -> anyhow::Result<()> {
		Ok(())
	}
}
