#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use roomcast_domain::RoomId;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;
use uuid::Uuid;

/// Frame queued for a connection's write task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
	/// Serialized message to deliver as a text frame.
	Deliver(String),

	/// Close the connection with the given status code.
	Close { code: u16, reason: &'static str },
}

/// A live local connection as seen by the fanout path.
#[derive(Debug, Clone)]
pub struct RegisteredConnection {
	pub id: Uuid,
	/// Set once the connection's JOIN has been handled.
	pub username: Option<String>,
	pub outbound: mpsc::UnboundedSender<OutboundFrame>,
}

/// Live connections grouped by room, scoped to this process.
///
/// Cross-process visibility is the broadcast fabric's job; the registry only
/// routes fabric deliveries to local connections. Constructed per server
/// instance so tests can run several isolated registries side by side.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
	rooms: Arc<Mutex<HashMap<RoomId, HashMap<Uuid, RegisteredConnection>>>>,
}

impl ConnectionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn register(&self, room: &RoomId, connection: RegisteredConnection) {
		let mut rooms = self.rooms.lock().await;
		let entry = rooms.entry(room.clone()).or_default();
		entry.retain(|_, c| !c.outbound.is_closed());
		debug!(room = %room, id = %connection.id, peers = entry.len(), "registered connection");
		entry.insert(connection.id, connection);
	}

	pub async fn unregister(&self, room: &RoomId, id: Uuid) {
		let mut rooms = self.rooms.lock().await;
		if let Some(entry) = rooms.get_mut(room) {
			entry.remove(&id);
			if entry.is_empty() {
				rooms.remove(room);
			}
		}
	}

	/// Attach the username carried by the connection's JOIN, or clear it
	/// after a client-initiated LEAVE.
	pub async fn set_username(&self, room: &RoomId, id: Uuid, username: Option<String>) {
		let mut rooms = self.rooms.lock().await;
		if let Some(connection) = rooms.get_mut(room).and_then(|e| e.get_mut(&id)) {
			connection.username = username;
		}
	}

	/// Snapshot of a room's live connections; safe to iterate while other
	/// tasks register and unregister.
	pub async fn snapshot(&self, room: &RoomId) -> Vec<RegisteredConnection> {
		let mut rooms = self.rooms.lock().await;
		let Some(entry) = rooms.get_mut(room) else {
			return Vec::new();
		};
		entry.retain(|_, c| !c.outbound.is_closed());
		entry.values().cloned().collect()
	}

	pub async fn room_count(&self, room: &RoomId) -> usize {
		let rooms = self.rooms.lock().await;
		rooms.get(room).map(HashMap::len).unwrap_or(0)
	}
}
