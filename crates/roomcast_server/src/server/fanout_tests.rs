#![forbid(unsafe_code)]

use std::sync::Arc;

use roomcast_domain::{MessageType, RoomId, UserSummary};
use roomcast_protocol::ChatMessage;
use roomcast_store::{InMemoryBroadcast, InMemoryCapacityStore, InMemoryEventLog, InMemoryHistoryBuffer};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::adapters::{InMemoryHistoryPersistence, InMemoryRoomStore, InMemoryUserDirectory, RoomStore as _};
use crate::server::admission::AdmissionController;
use crate::server::connection::CLOSE_KICKED;
use crate::server::fanout::deliver;
use crate::server::persist::spawn_persist_worker;
use crate::server::registry::{ConnectionRegistry, OutboundFrame, RegisteredConnection};
use crate::server::ServerContext;

fn room(id: &str) -> RoomId {
	RoomId::new(id).expect("valid RoomId")
}

struct Fixture {
	ctx: Arc<ServerContext>,
	rooms: Arc<InMemoryRoomStore>,
	users: Arc<InMemoryUserDirectory>,
}

fn fixture() -> Fixture {
	let rooms = Arc::new(InMemoryRoomStore::new());
	let users = Arc::new(InMemoryUserDirectory::new());
	let (persist, _task) = spawn_persist_worker(Arc::new(InMemoryHistoryPersistence::new()), 16);

	let ctx = Arc::new(ServerContext {
		registry: ConnectionRegistry::new(),
		admission: AdmissionController::new(Arc::new(InMemoryCapacityStore::new()), rooms.clone()),
		fabric: Arc::new(InMemoryBroadcast::new()),
		history: Arc::new(InMemoryHistoryBuffer::new(100)),
		events: Arc::new(InMemoryEventLog::new()),
		rooms: rooms.clone(),
		users: users.clone(),
		persist,
	});

	Fixture { ctx, rooms, users }
}

async fn attach(
	ctx: &ServerContext,
	room: &RoomId,
	username: Option<&str>,
) -> (Uuid, mpsc::UnboundedReceiver<OutboundFrame>) {
	let (tx, rx) = mpsc::unbounded_channel();
	let id = Uuid::new_v4();
	ctx.registry
		.register(
			room,
			RegisteredConnection {
				id,
				username: username.map(str::to_string),
				outbound: tx,
			},
		)
		.await;
	(id, rx)
}

fn next_delivery(rx: &mut mpsc::UnboundedReceiver<OutboundFrame>) -> ChatMessage {
	match rx.try_recv().expect("a frame was delivered") {
		OutboundFrame::Deliver(text) => roomcast_protocol::decode(&text).expect("decode"),
		other => panic!("expected a delivery, got {other:?}"),
	}
}

#[tokio::test]
async fn chat_reaches_every_connection_in_the_room_only() {
	let f = fixture();
	let room_42 = room("42");
	let (_, mut rx_a) = attach(&f.ctx, &room_42, Some("alice")).await;
	let (_, mut rx_b) = attach(&f.ctx, &room_42, Some("bob")).await;
	let (_, mut rx_other) = attach(&f.ctx, &room("7"), Some("carol")).await;

	let message = ChatMessage::new(MessageType::Chat, "alice", "hello", room_42);
	deliver(&f.ctx, message.clone()).await;

	assert_eq!(next_delivery(&mut rx_a), message);
	assert_eq!(next_delivery(&mut rx_b), message);
	assert!(rx_other.try_recv().is_err());
}

#[tokio::test]
async fn join_carries_a_membership_snapshot() {
	let f = fixture();
	let room = room("42");

	f.rooms.apply_join(&room, "alice").await.expect("join");
	f.rooms.apply_join(&room, "bob").await.expect("join");
	f.users
		.insert_user(UserSummary {
			user_id: 1,
			user_name: "alice".to_string(),
			user_role: "MANAGER".to_string(),
		})
		.await;
	f.users
		.insert_user(UserSummary {
			user_id: 2,
			user_name: "bob".to_string(),
			user_role: "USER".to_string(),
		})
		.await;

	let (_, mut rx) = attach(&f.ctx, &room, Some("alice")).await;
	deliver(&f.ctx, ChatMessage::join_notice("bob", room)).await;

	let delivered = next_delivery(&mut rx);
	let users = delivered.current_user_list.expect("snapshot attached");
	let names: Vec<&str> = users.iter().map(|u| u.user_name.as_str()).collect();
	assert_eq!(names, ["alice", "bob"]);
}

#[tokio::test]
async fn chat_is_not_enriched() {
	let f = fixture();
	let room = room("42");
	f.rooms.apply_join(&room, "alice").await.expect("join");

	let (_, mut rx) = attach(&f.ctx, &room, Some("alice")).await;
	deliver(&f.ctx, ChatMessage::new(MessageType::Chat, "alice", "hi", room)).await;

	assert!(next_delivery(&mut rx).current_user_list.is_none());
}

#[tokio::test]
async fn kick_closes_the_target_connection() {
	let f = fixture();
	let room = room("42");
	let (_, mut rx_target) = attach(&f.ctx, &room, Some("mallory")).await;
	let (_, mut rx_bystander) = attach(&f.ctx, &room, Some("bob")).await;

	deliver(&f.ctx, ChatMessage::kick_notice("owner", "mallory", room)).await;

	// Everyone sees the kick notice.
	assert_eq!(next_delivery(&mut rx_target).kind, MessageType::Kick);
	assert_eq!(next_delivery(&mut rx_bystander).kind, MessageType::Kick);

	// Only the target is told to close.
	match rx_target.try_recv().expect("close frame") {
		OutboundFrame::Close { code, .. } => assert_eq!(code, CLOSE_KICKED),
		other => panic!("expected close, got {other:?}"),
	}
	assert!(rx_bystander.try_recv().is_err());
}
