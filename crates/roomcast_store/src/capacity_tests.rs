#![forbid(unsafe_code)]

use std::sync::Arc;

use roomcast_domain::RoomId;

use crate::capacity::{CapacityStore, CapacityUpdate, InMemoryCapacityStore};

fn room(id: &str) -> RoomId {
	RoomId::new(id).expect("valid RoomId")
}

#[tokio::test]
async fn admits_until_max_then_rejects() {
	let store = InMemoryCapacityStore::new();
	let room = room("42");
	store.create(&room, 2).await.expect("create");

	assert_eq!(store.adjust(&room, 1).await.expect("adjust"), CapacityUpdate::Updated(1));
	assert_eq!(store.adjust(&room, 1).await.expect("adjust"), CapacityUpdate::Updated(2));
	assert_eq!(store.adjust(&room, 1).await.expect("adjust"), CapacityUpdate::Rejected);

	let allowance = store.read(&room).await.expect("read").expect("exists");
	assert_eq!(allowance.current_capacity, 2);
}

#[tokio::test]
async fn departure_frees_a_slot() {
	let store = InMemoryCapacityStore::new();
	let room = room("42");
	store.create(&room, 1).await.expect("create");

	assert_eq!(store.adjust(&room, 1).await.expect("adjust"), CapacityUpdate::Updated(1));
	assert_eq!(store.adjust(&room, 1).await.expect("adjust"), CapacityUpdate::Rejected);
	assert_eq!(store.adjust(&room, -1).await.expect("adjust"), CapacityUpdate::Updated(0));
	assert_eq!(store.adjust(&room, 1).await.expect("adjust"), CapacityUpdate::Updated(1));
}

#[tokio::test]
async fn decrement_clamps_at_zero() {
	let store = InMemoryCapacityStore::new();
	let room = room("42");
	store.create(&room, 3).await.expect("create");

	assert_eq!(store.adjust(&room, -1).await.expect("adjust"), CapacityUpdate::Updated(0));
	let allowance = store.read(&room).await.expect("read").expect("exists");
	assert_eq!(allowance.current_capacity, 0);
}

#[tokio::test]
async fn concurrent_admissions_never_exceed_max() {
	let store = Arc::new(InMemoryCapacityStore::new());
	let room = room("busy");
	let max = 5u32;
	store.create(&room, max).await.expect("create");

	let mut tasks = Vec::new();
	for _ in 0..(max * 2) {
		let store = Arc::clone(&store);
		let room = room.clone();
		tasks.push(tokio::spawn(async move { store.adjust(&room, 1).await.expect("adjust") }));
	}

	let mut admitted = 0;
	let mut rejected = 0;
	for task in tasks {
		match task.await.expect("join") {
			CapacityUpdate::Updated(_) => admitted += 1,
			CapacityUpdate::Rejected => rejected += 1,
		}
	}

	assert_eq!(admitted, max);
	assert_eq!(rejected, max);
	let allowance = store.read(&room).await.expect("read").expect("exists");
	assert_eq!(allowance.current_capacity, max);
}

#[tokio::test]
async fn set_max_keeps_current_count() {
	let store = InMemoryCapacityStore::new();
	let room = room("42");
	store.create(&room, 2).await.expect("create");
	store.adjust(&room, 1).await.expect("adjust");

	store.set_max(&room, 10).await.expect("set_max");
	let allowance = store.read(&room).await.expect("read").expect("exists");
	assert_eq!(allowance.current_capacity, 1);
	assert_eq!(allowance.max_capacity, 10);
}

#[tokio::test]
async fn deleted_room_reads_as_absent() {
	let store = InMemoryCapacityStore::new();
	let room = room("42");
	store.create(&room, 2).await.expect("create");
	store.delete(&room).await.expect("delete");
	assert!(store.read(&room).await.expect("read").is_none());
}
