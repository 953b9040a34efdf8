#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context as _;
use futures::stream::SplitSink;
use futures::{SinkExt as _, StreamExt as _};
use roomcast_domain::{MessageType, RoomId};
use roomcast_protocol::ChatMessage;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::server::ServerContext;
use crate::server::admission::AdmissionError;
use crate::server::registry::{OutboundFrame, RegisteredConnection};

/// Library close code sent when the room is at capacity.
pub const CLOSE_ROOM_FULL: u16 = 4001;

/// Policy-violation close code sent to a kicked connection.
pub const CLOSE_KICKED: u16 = 1008;

/// Try-again-later close code sent when the capacity store is unreachable.
/// Distinct from a full room so clients know a retry can succeed.
pub const CLOSE_TRY_AGAIN: u16 = 1013;

/// Full lifecycle of one WebSocket connection: handshake, admission, history
/// replay, inbound handling, disconnect.
pub async fn handle_connection(conn_id: Uuid, stream: TcpStream, ctx: Arc<ServerContext>) -> anyhow::Result<()> {
	let mut room_param: Option<RoomId> = None;

	let mut ws = accept_hdr_async(stream, |req: &Request, resp: Response| match room_id_from_request(req) {
		Ok(room) => {
			room_param = Some(room);
			Ok(resp)
		}
		Err(reason) => {
			metrics::counter!("roomcast_server_handshake_rejected_total").increment(1);
			Err(reject_handshake(reason))
		}
	})
	.await
	.context("websocket handshake")?;

	let room = room_param.context("handshake accepted without a room")?;

	let occupancy = match ctx.admission.admit(&room).await {
		Ok(occupancy) => occupancy,
		Err(e) => {
			info!(%conn_id, room = %room, error = %e, "admission rejected, closing");
			let (code, reason) = match e {
				AdmissionError::RoomFull(_) => (CLOSE_ROOM_FULL, "room full"),
				AdmissionError::Unavailable(_) => (CLOSE_TRY_AGAIN, "service unavailable, try again"),
			};
			let _ = ws
				.close(Some(CloseFrame {
					code: code.into(),
					reason: reason.into(),
				}))
				.await;
			return Ok(());
		}
	};
	debug!(%conn_id, room = %room, occupancy, "admitted");
	metrics::gauge!("roomcast_server_active_connections").increment(1.0);

	let (ws_tx, mut ws_rx) = ws.split();
	let (out_tx, out_rx) = mpsc::unbounded_channel();
	let write_task = tokio::spawn(write_loop(ws_tx, out_rx));

	ctx.registry
		.register(
			&room,
			RegisteredConnection {
				id: conn_id,
				username: None,
				outbound: out_tx.clone(),
			},
		)
		.await;

	replay_history(&ctx, &room, &out_tx).await;

	let disconnected = AtomicBool::new(false);
	let mut username: Option<String> = None;

	while let Some(frame) = ws_rx.next().await {
		match frame {
			Ok(Message::Text(text)) => {
				metrics::counter!("roomcast_server_messages_in_total").increment(1);
				match roomcast_protocol::decode(text.as_str()) {
					Ok(message) => handle_inbound(&ctx, &room, conn_id, &mut username, message).await,
					Err(e) => {
						// One bad frame never takes the connection down.
						metrics::counter!("roomcast_server_decode_errors_total").increment(1);
						warn!(%conn_id, error = %e, "dropping malformed message");
					}
				}
			}
			Ok(Message::Close(_)) => break,
			Ok(_) => {}
			Err(e) => {
				debug!(%conn_id, error = %e, "read error, closing");
				break;
			}
		}
	}

	disconnect(&ctx, &room, conn_id, username.take(), &disconnected).await;

	drop(out_tx);
	let _ = write_task.await;
	Ok(())
}

fn room_id_from_request(req: &Request) -> Result<RoomId, &'static str> {
	let query = req.uri().query().ok_or("missing roomId query parameter")?;
	let raw = query
		.split('&')
		.find_map(|pair| pair.strip_prefix("roomId="))
		.ok_or("missing roomId query parameter")?;

	RoomId::new(raw).map_err(|_| "roomId must be non-empty")
}

fn reject_handshake(reason: &'static str) -> ErrorResponse {
	let mut resp = ErrorResponse::new(Some(reason.to_string()));
	*resp.status_mut() = StatusCode::BAD_REQUEST;
	resp
}

async fn write_loop(
	mut ws_tx: SplitSink<WebSocketStream<TcpStream>, Message>,
	mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
) {
	while let Some(frame) = rx.recv().await {
		match frame {
			OutboundFrame::Deliver(text) => {
				if ws_tx.send(Message::text(text)).await.is_err() {
					break;
				}
			}
			OutboundFrame::Close { code, reason } => {
				let _ = ws_tx
					.send(Message::Close(Some(CloseFrame {
						code: code.into(),
						reason: reason.into(),
					})))
					.await;
				break;
			}
		}
	}
	let _ = ws_tx.close().await;
}

/// Queue the room's retained history, oldest first, ahead of live traffic.
async fn replay_history(ctx: &ServerContext, room: &RoomId, out: &mpsc::UnboundedSender<OutboundFrame>) {
	match ctx.history.recent(room).await {
		Ok(messages) => {
			debug!(room = %room, count = messages.len(), "replaying history");
			for message in &messages {
				let _ = out.send(OutboundFrame::Deliver(roomcast_protocol::encode(message)));
			}
		}
		Err(e) => warn!(room = %room, error = %e, "history replay failed"),
	}
}

async fn handle_inbound(
	ctx: &ServerContext,
	room: &RoomId,
	conn_id: Uuid,
	username: &mut Option<String>,
	message: ChatMessage,
) {
	if message.room_id != *room {
		warn!(%conn_id, claimed = %message.room_id, room = %room, "message for another room dropped");
		return;
	}

	match message.kind {
		MessageType::Join => {
			*username = Some(message.sender.clone());
			ctx.registry.set_username(room, conn_id, username.clone()).await;
			ctx.publish(&ChatMessage::join_notice(&message.sender, room.clone())).await;
		}
		MessageType::Leave => {
			// Client-initiated leave; the close that follows must not
			// synthesize a second LEAVE.
			let Some(name) = username.take() else {
				return;
			};
			ctx.registry.set_username(room, conn_id, None).await;
			ctx.publish(&ChatMessage::leave_notice(&name, room.clone())).await;
		}
		MessageType::Chat => ctx.publish(&message).await,
		MessageType::Kick => handle_kick(ctx, room, conn_id, username.as_deref(), &message).await,
	}
}

/// Only the room's creator may kick; everyone else's KICK is dropped.
async fn handle_kick(ctx: &ServerContext, room: &RoomId, conn_id: Uuid, kicker: Option<&str>, message: &ChatMessage) {
	let Some(kicker) = kicker else {
		warn!(%conn_id, room = %room, "kick from a connection without a join, dropped");
		return;
	};

	match ctx.rooms.room_creator(room).await {
		Ok(Some(creator)) if creator == kicker => {
			ctx.publish(&ChatMessage::kick_notice(kicker, &message.content, room.clone())).await;
		}
		Ok(_) => {
			metrics::counter!("roomcast_server_kick_denied_total").increment(1);
			warn!(%conn_id, room = %room, kicker, "kick denied, sender is not the room creator");
		}
		Err(e) => warn!(%conn_id, room = %room, error = %e, "room creator lookup failed, kick dropped"),
	}
}

/// The disconnect sequence runs exactly once per connection, whichever of
/// the close paths observes the end first.
async fn disconnect(ctx: &ServerContext, room: &RoomId, conn_id: Uuid, username: Option<String>, guard: &AtomicBool) {
	if guard.swap(true, Ordering::SeqCst) {
		return;
	}

	ctx.registry.unregister(room, conn_id).await;
	let occupancy = ctx.admission.release(room).await;
	metrics::gauge!("roomcast_server_active_connections").decrement(1.0);
	debug!(%conn_id, room = %room, ?occupancy, "connection closed");

	if let Some(name) = username {
		ctx.publish(&ChatMessage::leave_notice(&name, room.clone())).await;
	}
}
