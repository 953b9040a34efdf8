#![forbid(unsafe_code)]

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use redis::AsyncCommands as _;
use roomcast_domain::RoomId;
use roomcast_protocol::ChatMessage;
use tokio::sync::Mutex;

use crate::error::StoreError;

/// Default retained history per room.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Bounded per-room buffer of recent chat messages, replayed to newly
/// admitted connections.
///
/// `recent` always yields oldest-first, regardless of how the backing store
/// orders its entries internally.
#[async_trait]
pub trait HistoryBuffer: Send + Sync {
	/// Append a message, discarding the oldest entries beyond the cap.
	async fn push(&self, message: &ChatMessage) -> Result<(), StoreError>;

	/// The retained messages for a room, oldest first.
	async fn recent(&self, room: &RoomId) -> Result<Vec<ChatMessage>, StoreError>;
}

fn history_key(room: &RoomId) -> String {
	format!("chat_history:{room}")
}

/// Redis list per room: left-push then trim, so index 0 is the newest entry
/// and the read path reverses into chronological order.
#[derive(Clone)]
pub struct RedisHistoryBuffer {
	conn: redis::aio::ConnectionManager,
	capacity: usize,
}

impl RedisHistoryBuffer {
	pub fn new(conn: redis::aio::ConnectionManager, capacity: usize) -> Self {
		Self { conn, capacity }
	}
}

#[async_trait]
impl HistoryBuffer for RedisHistoryBuffer {
	async fn push(&self, message: &ChatMessage) -> Result<(), StoreError> {
		let key = history_key(&message.room_id);
		let payload = roomcast_protocol::encode(message);

		let mut conn = self.conn.clone();
		let () = conn.lpush(&key, payload).await?;
		let () = conn.ltrim(&key, 0, self.capacity as isize - 1).await?;
		Ok(())
	}

	async fn recent(&self, room: &RoomId) -> Result<Vec<ChatMessage>, StoreError> {
		let mut conn = self.conn.clone();
		let raw: Vec<String> = conn.lrange(history_key(room), 0, -1).await?;

		let mut messages = Vec::with_capacity(raw.len());
		// Newest-first in storage; walk backwards for chronological order.
		for payload in raw.iter().rev() {
			messages.push(roomcast_protocol::decode(payload)?);
		}
		Ok(messages)
	}
}

/// In-process buffer with the same push-then-trim behavior.
pub struct InMemoryHistoryBuffer {
	rooms: Mutex<HashMap<RoomId, VecDeque<ChatMessage>>>,
	capacity: usize,
}

impl InMemoryHistoryBuffer {
	pub fn new(capacity: usize) -> Self {
		Self {
			rooms: Mutex::new(HashMap::new()),
			capacity,
		}
	}
}

#[async_trait]
impl HistoryBuffer for InMemoryHistoryBuffer {
	async fn push(&self, message: &ChatMessage) -> Result<(), StoreError> {
		let mut rooms = self.rooms.lock().await;
		let buf = rooms.entry(message.room_id.clone()).or_default();

		buf.push_back(message.clone());
		while buf.len() > self.capacity {
			buf.pop_front();
		}
		Ok(())
	}

	async fn recent(&self, room: &RoomId) -> Result<Vec<ChatMessage>, StoreError> {
		let rooms = self.rooms.lock().await;
		Ok(rooms.get(room).map(|buf| buf.iter().cloned().collect()).unwrap_or_default())
	}
}
