#![forbid(unsafe_code)]

pub mod admission;
pub mod connection;
pub mod fanout;
pub mod health;
pub mod persist;
pub mod reconciler;
pub mod registry;


#[cfg(test)]
mod fanout_tests;



use std::sync::Arc;

use roomcast_domain::MessageType;
use roomcast_protocol::ChatMessage;
use roomcast_store::{BroadcastFabric, EventLog, HistoryBuffer};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::{RoomStore, UserDirectory};
use crate::server::admission::AdmissionController;
use crate::server::persist::PersistHandle;
use crate::server::registry::ConnectionRegistry;

/// Everything a connection or background task needs, wired once in `main`
/// (or directly in tests, with in-memory backends).
pub struct ServerContext {
	pub registry: ConnectionRegistry,
	pub admission: AdmissionController,
	pub fabric: Arc<dyn BroadcastFabric>,
	pub history: Arc<dyn HistoryBuffer>,
	pub events: Arc<dyn EventLog>,
	pub rooms: Arc<dyn RoomStore>,
	pub users: Arc<dyn UserDirectory>,
	pub persist: PersistHandle,
}

impl ServerContext {
	/// Publish a message: fabric fanout, history append, membership events
	/// into the event log, chat into the archive queue.
	///
	/// The fabric publish is the one step that matters for delivery; the
	/// rest is best-effort and only logged on failure.
	pub async fn publish(&self, message: &ChatMessage) {
		if let Err(e) = self.fabric.publish(message).await {
			warn!(room = %message.room_id, error = %e, "broadcast publish failed, message lost");
			return;
		}

		if let Err(e) = self.history.push(message).await {
			warn!(room = %message.room_id, error = %e, "history append failed");
		}

		if message.kind.is_membership_event() {
			match self.events.append(message).await {
				Ok(id) => debug!(room = %message.room_id, kind = %message.kind, id, "membership event logged"),
				Err(e) => warn!(room = %message.room_id, error = %e, "membership event append failed"),
			}
		}

		if message.kind == MessageType::Chat {
			self.persist.offer(message);
		}
	}
}

/// Accept loop: one spawned task per inbound connection.
pub async fn serve(listener: TcpListener, ctx: Arc<ServerContext>) -> anyhow::Result<()> {
	loop {
		let (stream, remote) = listener.accept().await?;

		let conn_id = Uuid::new_v4();
		metrics::counter!("roomcast_server_connections_total").increment(1);

		let ctx = Arc::clone(&ctx);
		tokio::spawn(async move {
			info!(%conn_id, %remote, "accepted connection");
			if let Err(e) = connection::handle_connection(conn_id, stream, ctx).await {
				warn!(%conn_id, error = %e, "connection handler exited with error");
			}
		});
	}
}
