#![forbid(unsafe_code)]

use std::sync::Arc;

use roomcast_domain::{MessageType, RoomId, UserSummary};
use roomcast_protocol::ChatMessage;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::server::ServerContext;
use crate::server::connection::CLOSE_KICKED;
use crate::server::registry::OutboundFrame;

/// Consume the broadcast fabric and deliver to this process's connections.
pub fn spawn_fanout(ctx: Arc<ServerContext>) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut subscription = match ctx.fabric.subscribe().await {
			Ok(sub) => sub,
			Err(e) => {
				error!(error = %e, "broadcast subscribe failed, fanout disabled");
				return;
			}
		};

		while let Some(payload) = subscription.recv().await {
			match roomcast_protocol::decode(&payload) {
				Ok(message) => deliver(&ctx, message).await,
				Err(e) => {
					metrics::counter!("roomcast_server_decode_errors_total").increment(1);
					warn!(error = %e, "malformed payload on broadcast fabric, dropped");
				}
			}
		}

		warn!("broadcast subscription closed, fanout stopped");
	})
}

/// Deliver one fabric message to every local connection in its room.
///
/// JOIN and LEAVE notices are enriched with a membership snapshot before
/// delivery; a KICK additionally closes the target's connection if this
/// process owns it.
pub(crate) async fn deliver(ctx: &ServerContext, message: ChatMessage) {
	let message = match message.kind {
		MessageType::Join | MessageType::Leave => match membership_snapshot(ctx, &message.room_id).await {
			Some(users) => message.with_user_list(users),
			None => message,
		},
		_ => message,
	};

	let encoded = roomcast_protocol::encode(&message);
	let targets = ctx.registry.snapshot(&message.room_id).await;

	for target in &targets {
		if target.outbound.send(OutboundFrame::Deliver(encoded.clone())).is_ok() {
			metrics::counter!("roomcast_server_fanout_delivered_total").increment(1);
		}
	}

	if message.kind == MessageType::Kick {
		// The target's username rides in `content`.
		for target in &targets {
			if target.username.as_deref() == Some(message.content.as_str()) {
				debug!(room = %message.room_id, target = %message.content, id = %target.id, "closing kicked connection");
				let _ = target.outbound.send(OutboundFrame::Close {
					code: CLOSE_KICKED,
					reason: "kicked from room",
				});
			}
		}
	}
}

/// Membership snapshot for JOIN/LEAVE enrichment; eventually consistent with
/// the reconciler's view, absent entirely if the room store is unreachable.
async fn membership_snapshot(ctx: &ServerContext, room: &RoomId) -> Option<Vec<UserSummary>> {
	let names = match ctx.rooms.members(room).await {
		Ok(names) => names,
		Err(e) => {
			warn!(room = %room, error = %e, "membership lookup failed, snapshot omitted");
			return None;
		}
	};

	let mut users = Vec::with_capacity(names.len());
	for name in &names {
		match ctx.users.user_by_name(name).await {
			Ok(Some(user)) => users.push(user),
			Ok(None) => debug!(room = %room, name, "member missing from user directory"),
			Err(e) => warn!(room = %room, name, error = %e, "user lookup failed"),
		}
	}
	Some(users)
}
