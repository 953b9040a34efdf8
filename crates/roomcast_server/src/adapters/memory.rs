#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use roomcast_domain::{RoomId, UserSummary};
use roomcast_protocol::ChatMessage;
use tokio::sync::Mutex;

use super::{HistoryPersistence, RoomStore, UserDirectory};

#[derive(Default)]
struct RoomRecord {
	creator: Option<String>,
	current_capacity: u32,
	/// Sorted so membership snapshots come out in a stable order.
	members: BTreeSet<String>,
}

/// In-process room records for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryRoomStore {
	rooms: Mutex<HashMap<RoomId, RoomRecord>>,
}

impl InMemoryRoomStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Seed a room record, optionally with a creator username.
	pub async fn insert_room(&self, room: RoomId, creator: Option<&str>) {
		let mut rooms = self.rooms.lock().await;
		rooms.insert(
			room,
			RoomRecord {
				creator: creator.map(str::to_string),
				..RoomRecord::default()
			},
		);
	}

	pub async fn current_capacity(&self, room: &RoomId) -> Option<u32> {
		let rooms = self.rooms.lock().await;
		rooms.get(room).map(|r| r.current_capacity)
	}
}

#[async_trait]
impl RoomStore for InMemoryRoomStore {
	async fn room_creator(&self, room: &RoomId) -> anyhow::Result<Option<String>> {
		let rooms = self.rooms.lock().await;
		Ok(rooms.get(room).and_then(|r| r.creator.clone()))
	}

	async fn update_current_capacity(&self, room: &RoomId, value: u32) -> anyhow::Result<()> {
		let mut rooms = self.rooms.lock().await;
		rooms.entry(room.clone()).or_default().current_capacity = value;
		Ok(())
	}

	async fn apply_join(&self, room: &RoomId, user: &str) -> anyhow::Result<()> {
		let mut rooms = self.rooms.lock().await;
		rooms.entry(room.clone()).or_default().members.insert(user.to_string());
		Ok(())
	}

	async fn apply_leave(&self, room: &RoomId, user: &str) -> anyhow::Result<()> {
		let mut rooms = self.rooms.lock().await;
		if let Some(record) = rooms.get_mut(room) {
			record.members.remove(user);
		}
		Ok(())
	}

	async fn members(&self, room: &RoomId) -> anyhow::Result<Vec<String>> {
		let rooms = self.rooms.lock().await;
		Ok(rooms.get(room).map(|r| r.members.iter().cloned().collect()).unwrap_or_default())
	}
}

/// Fixed user table for tests.
#[derive(Default)]
pub struct InMemoryUserDirectory {
	users: Mutex<HashMap<String, UserSummary>>,
}

impl InMemoryUserDirectory {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn insert_user(&self, user: UserSummary) {
		let mut users = self.users.lock().await;
		users.insert(user.user_name.clone(), user);
	}
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
	async fn user_by_name(&self, username: &str) -> anyhow::Result<Option<UserSummary>> {
		let users = self.users.lock().await;
		Ok(users.get(username).cloned())
	}
}

/// Collects persisted messages so tests can assert on them.
#[derive(Default)]
pub struct InMemoryHistoryPersistence {
	persisted: Mutex<Vec<ChatMessage>>,
}

impl InMemoryHistoryPersistence {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn persisted(&self) -> Vec<ChatMessage> {
		self.persisted.lock().await.clone()
	}
}

#[async_trait]
impl HistoryPersistence for InMemoryHistoryPersistence {
	async fn persist(&self, message: &ChatMessage) -> anyhow::Result<()> {
		self.persisted.lock().await.push(message.clone());
		Ok(())
	}
}
