#![forbid(unsafe_code)]

use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands as _;
use roomcast_domain::{RoomAllowance, RoomId};
use tokio::sync::Mutex;

use crate::error::StoreError;

/// Outcome of an atomic capacity adjustment.
///
/// Saturation is data, not an error: callers must handle `Rejected`
/// explicitly instead of catching an exception thrown across layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityUpdate {
	/// The counter moved; carries the post-adjustment occupancy.
	Updated(u32),

	/// The room is at capacity and the counter is unchanged.
	Rejected,
}

/// Per-room occupancy counters with one atomic increment-if-below-max
/// primitive.
///
/// The room's allowance key is the only resource needing cross-process
/// mutual exclusion in the whole system; `adjust` is that exclusion.
#[async_trait]
pub trait CapacityStore: Send + Sync {
	/// Create the allowance record for a new room (`currentCapacity = 0`).
	async fn create(&self, room: &RoomId, max_capacity: u32) -> Result<(), StoreError>;

	/// Update a room's maximum capacity without touching the current count.
	async fn set_max(&self, room: &RoomId, max_capacity: u32) -> Result<(), StoreError>;

	/// Drop the allowance record when the room is deleted.
	async fn delete(&self, room: &RoomId) -> Result<(), StoreError>;

	/// Atomically apply `delta` to the room's occupancy.
	///
	/// Positive deltas are bounds-checked (`Rejected` when already at max);
	/// negative deltas always apply and clamp at zero.
	async fn adjust(&self, room: &RoomId, delta: i64) -> Result<CapacityUpdate, StoreError>;

	/// Read the current allowance, if the room exists.
	async fn read(&self, room: &RoomId) -> Result<Option<RoomAllowance>, StoreError>;
}

fn allowance_key(room: &RoomId) -> String {
	format!("room:allowance:{room}")
}

const SENTINEL_FULL: i64 = -1;

// Increments are admitted only below max; decrements skip the bound check
// and clamp at zero. Runs server-side so the read-check-write is one step
// relative to every other caller of the same key.
const ADJUST_SCRIPT: &str = r"
local curr = tonumber(redis.call('HGET', KEYS[1], 'currentCapacity')) or 0
local max  = tonumber(redis.call('HGET', KEYS[1], 'maxCapacity')) or 0
local delta = tonumber(ARGV[1])
if delta > 0 then
  if curr < max then
    return redis.call('HINCRBY', KEYS[1], 'currentCapacity', delta)
  end
  return -1
end
local after = curr + delta
if after < 0 then
  after = 0
end
redis.call('HSET', KEYS[1], 'currentCapacity', after)
return after
";

/// Redis-backed capacity store; counters live in a per-room hash keyed
/// `room:allowance:<roomId>` with string-encoded `currentCapacity` and
/// `maxCapacity` fields.
#[derive(Clone)]
pub struct RedisCapacityStore {
	conn: redis::aio::ConnectionManager,
	script: redis::Script,
}

impl RedisCapacityStore {
	pub fn new(conn: redis::aio::ConnectionManager) -> Self {
		Self {
			conn,
			script: redis::Script::new(ADJUST_SCRIPT),
		}
	}
}

#[async_trait]
impl CapacityStore for RedisCapacityStore {
	async fn create(&self, room: &RoomId, max_capacity: u32) -> Result<(), StoreError> {
		let mut conn = self.conn.clone();
		let () = conn
			.hset_multiple(
				allowance_key(room),
				&[("currentCapacity", 0u32), ("maxCapacity", max_capacity)],
			)
			.await?;
		Ok(())
	}

	async fn set_max(&self, room: &RoomId, max_capacity: u32) -> Result<(), StoreError> {
		let mut conn = self.conn.clone();
		let () = conn.hset(allowance_key(room), "maxCapacity", max_capacity).await?;
		Ok(())
	}

	async fn delete(&self, room: &RoomId) -> Result<(), StoreError> {
		let mut conn = self.conn.clone();
		let () = conn.del(allowance_key(room)).await?;
		Ok(())
	}

	async fn adjust(&self, room: &RoomId, delta: i64) -> Result<CapacityUpdate, StoreError> {
		let mut conn = self.conn.clone();
		let after: i64 = self.script.key(allowance_key(room)).arg(delta).invoke_async(&mut conn).await?;

		if after == SENTINEL_FULL {
			Ok(CapacityUpdate::Rejected)
		} else {
			Ok(CapacityUpdate::Updated(after.max(0) as u32))
		}
	}

	async fn read(&self, room: &RoomId) -> Result<Option<RoomAllowance>, StoreError> {
		let mut conn = self.conn.clone();
		let fields: (Option<u32>, Option<u32>) = conn
			.hget(allowance_key(room), &["currentCapacity", "maxCapacity"])
			.await?;

		match fields {
			(Some(current_capacity), Some(max_capacity)) => Ok(Some(RoomAllowance {
				current_capacity,
				max_capacity,
			})),
			_ => Ok(None),
		}
	}
}

/// In-process capacity store mirroring the scripted semantics, for tests and
/// single-process deployments.
#[derive(Default)]
pub struct InMemoryCapacityStore {
	rooms: Mutex<HashMap<RoomId, RoomAllowance>>,
}

impl InMemoryCapacityStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl CapacityStore for InMemoryCapacityStore {
	async fn create(&self, room: &RoomId, max_capacity: u32) -> Result<(), StoreError> {
		let mut rooms = self.rooms.lock().await;
		rooms.insert(room.clone(), RoomAllowance::empty(max_capacity));
		Ok(())
	}

	async fn set_max(&self, room: &RoomId, max_capacity: u32) -> Result<(), StoreError> {
		let mut rooms = self.rooms.lock().await;
		rooms.entry(room.clone()).or_insert(RoomAllowance::empty(0)).max_capacity = max_capacity;
		Ok(())
	}

	async fn delete(&self, room: &RoomId) -> Result<(), StoreError> {
		let mut rooms = self.rooms.lock().await;
		rooms.remove(room);
		Ok(())
	}

	async fn adjust(&self, room: &RoomId, delta: i64) -> Result<CapacityUpdate, StoreError> {
		let mut rooms = self.rooms.lock().await;
		let allowance = rooms.entry(room.clone()).or_insert(RoomAllowance::empty(0));

		if delta > 0 && allowance.current_capacity >= allowance.max_capacity {
			return Ok(CapacityUpdate::Rejected);
		}

		allowance.current_capacity = (i64::from(allowance.current_capacity) + delta).max(0) as u32;
		Ok(CapacityUpdate::Updated(allowance.current_capacity))
	}

	async fn read(&self, room: &RoomId) -> Result<Option<RoomAllowance>, StoreError> {
		let rooms = self.rooms.lock().await;
		Ok(rooms.get(room).copied())
	}
}
