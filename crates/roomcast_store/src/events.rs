#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands as _;
use redis::streams::{StreamReadOptions, StreamReadReply};
use roomcast_protocol::ChatMessage;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StoreError;

/// Stream key shared by every server process in a deployment.
pub const EVENT_STREAM_KEY: &str = "room:events";

/// Field under which the serialized message rides in each stream entry.
const PAYLOAD_FIELD: &str = "payload";

/// A durably logged membership intent plus the log-assigned id used for
/// acknowledgment.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
	pub id: String,
	pub message: ChatMessage,
}

/// Append-only, replayable log of JOIN/LEAVE/KICK intents, consumed by
/// competing consumers in a shared group.
///
/// Delivery is at-least-once and in log order per group; consumers must apply
/// records idempotently.
#[async_trait]
pub trait EventLog: Send + Sync {
	/// Append an event; returns the log-assigned record id.
	async fn append(&self, message: &ChatMessage) -> Result<String, StoreError>;

	/// Create the consumer group if it does not exist yet. Calling this for
	/// an existing group is a no-op, never an error.
	async fn ensure_group(&self, group: &str) -> Result<(), StoreError>;

	/// Read up to `max_count` records for `consumer`: this consumer's
	/// unacknowledged records first, then new entries, blocking up to
	/// `block_timeout` for the latter.
	async fn read_next(
		&self,
		group: &str,
		consumer: &str,
		max_count: usize,
		block_timeout: Duration,
	) -> Result<Vec<LogRecord>, StoreError>;

	/// Mark a record consumed for the group.
	async fn acknowledge(&self, group: &str, record_id: &str) -> Result<(), StoreError>;
}

/// Redis Streams implementation over the fixed `room:events` key.
#[derive(Clone)]
pub struct RedisEventLog {
	conn: redis::aio::ConnectionManager,
}

impl RedisEventLog {
	pub fn new(conn: redis::aio::ConnectionManager) -> Self {
		Self { conn }
	}

	// A bad entry is skipped, never fatal: failing the whole read would stall
	// every record behind it. Skipped entries stay unacknowledged.
	fn collect_records(reply: StreamReadReply, out: &mut Vec<LogRecord>) {
		for key in reply.keys {
			for entry in key.ids {
				let Some(payload) = entry.get::<String>(PAYLOAD_FIELD) else {
					debug!(id = %entry.id, "stream entry without payload field, skipping");
					continue;
				};
				match roomcast_protocol::decode(&payload) {
					Ok(message) => out.push(LogRecord {
						id: entry.id.clone(),
						message,
					}),
					Err(e) => warn!(id = %entry.id, error = %e, "undecodable stream entry, skipping"),
				}
			}
		}
	}
}

#[async_trait]
impl EventLog for RedisEventLog {
	async fn append(&self, message: &ChatMessage) -> Result<String, StoreError> {
		let mut conn = self.conn.clone();
		let id: String = conn
			.xadd(EVENT_STREAM_KEY, "*", &[(PAYLOAD_FIELD, roomcast_protocol::encode(message))])
			.await?;
		Ok(id)
	}

	async fn ensure_group(&self, group: &str) -> Result<(), StoreError> {
		let mut conn = self.conn.clone();
		match conn.xgroup_create_mkstream::<_, _, _, ()>(EVENT_STREAM_KEY, group, "$").await {
			Ok(()) => Ok(()),
			Err(e) if e.code() == Some("BUSYGROUP") => {
				debug!(group, "consumer group already exists");
				Ok(())
			}
			Err(e) => Err(e.into()),
		}
	}

	async fn read_next(
		&self,
		group: &str,
		consumer: &str,
		max_count: usize,
		block_timeout: Duration,
	) -> Result<Vec<LogRecord>, StoreError> {
		let mut conn = self.conn.clone();
		let mut records = Vec::new();

		// Records delivered to this consumer but never acknowledged come
		// back first, so an apply failure is retried on the next tick.
		let pending_opts = StreamReadOptions::default().group(group, consumer).count(max_count);
		let pending: StreamReadReply = conn.xread_options(&[EVENT_STREAM_KEY], &["0"], &pending_opts).await?;
		Self::collect_records(pending, &mut records);

		if records.len() < max_count {
			let fresh_opts = StreamReadOptions::default()
				.group(group, consumer)
				.count(max_count - records.len())
				.block(block_timeout.as_millis() as usize);
			let fresh: StreamReadReply = conn.xread_options(&[EVENT_STREAM_KEY], &[">"], &fresh_opts).await?;
			Self::collect_records(fresh, &mut records);
		}

		Ok(records)
	}

	async fn acknowledge(&self, group: &str, record_id: &str) -> Result<(), StoreError> {
		let mut conn = self.conn.clone();
		let _acked: i64 = conn.xack(EVENT_STREAM_KEY, group, &[record_id]).await?;
		Ok(())
	}
}

#[derive(Default)]
struct GroupState {
	/// Index of the next log entry not yet delivered to the group.
	next: usize,
	/// Delivered-but-unacknowledged entries, by sequence number.
	pending: BTreeMap<u64, usize>,
}

/// In-process event log with consumer-group semantics, for tests and
/// single-process deployments.
#[derive(Default)]
pub struct InMemoryEventLog {
	inner: Mutex<InMemoryLogInner>,
}

#[derive(Default)]
struct InMemoryLogInner {
	entries: Vec<ChatMessage>,
	groups: HashMap<String, GroupState>,
}

impl InMemoryEventLog {
	pub fn new() -> Self {
		Self::default()
	}

	fn record_id(seq: u64) -> String {
		format!("{seq}-0")
	}

	fn parse_id(id: &str) -> Option<u64> {
		id.split_once('-').and_then(|(seq, _)| seq.parse().ok())
	}
}

#[async_trait]
impl EventLog for InMemoryEventLog {
	async fn append(&self, message: &ChatMessage) -> Result<String, StoreError> {
		let mut inner = self.inner.lock().await;
		inner.entries.push(message.clone());
		Ok(Self::record_id(inner.entries.len() as u64 - 1))
	}

	async fn ensure_group(&self, group: &str) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		let tail = inner.entries.len();
		inner.groups.entry(group.to_string()).or_insert(GroupState {
			next: tail,
			pending: BTreeMap::new(),
		});
		Ok(())
	}

	async fn read_next(
		&self,
		group: &str,
		_consumer: &str,
		max_count: usize,
		_block_timeout: Duration,
	) -> Result<Vec<LogRecord>, StoreError> {
		let mut inner = self.inner.lock().await;
		let total = inner.entries.len();
		let Some(state) = inner.groups.get_mut(group) else {
			return Ok(Vec::new());
		};

		let mut picked: Vec<(u64, usize)> = state.pending.iter().map(|(seq, idx)| (*seq, *idx)).take(max_count).collect();

		while picked.len() < max_count && state.next < total {
			let idx = state.next;
			let seq = idx as u64;
			state.pending.insert(seq, idx);
			picked.push((seq, idx));
			state.next += 1;
		}

		Ok(picked
			.into_iter()
			.map(|(seq, idx)| LogRecord {
				id: Self::record_id(seq),
				message: inner.entries[idx].clone(),
			})
			.collect())
	}

	async fn acknowledge(&self, group: &str, record_id: &str) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		if let (Some(state), Some(seq)) = (inner.groups.get_mut(group), Self::parse_id(record_id)) {
			state.pending.remove(&seq);
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use redis::Value;
	use redis::streams::{StreamId, StreamKey, StreamReadReply};
	use roomcast_domain::RoomId;

	use super::*;

	fn entry(id: &str, payload: Option<&str>) -> StreamId {
		let mut map = HashMap::new();
		if let Some(payload) = payload {
			map.insert(PAYLOAD_FIELD.to_string(), Value::BulkString(payload.as_bytes().to_vec()));
		}
		StreamId {
			id: id.to_string(),
			map,
		}
	}

	#[test]
	fn bad_stream_entries_do_not_block_the_batch() {
		let good = roomcast_protocol::encode(&ChatMessage::join_notice(
			"alice",
			RoomId::new("42").expect("valid RoomId"),
		));
		let reply = StreamReadReply {
			keys: vec![StreamKey {
				key: EVENT_STREAM_KEY.to_string(),
				ids: vec![entry("1-0", Some("not json")), entry("2-0", None), entry("3-0", Some(&good))],
			}],
		};

		let mut records = Vec::new();
		RedisEventLog::collect_records(reply, &mut records);

		// The undecodable and payload-less entries are skipped, everything
		// behind them still flows.
		assert_eq!(records.len(), 1);
		assert_eq!(records[0].id, "3-0");
		assert_eq!(records[0].message.sender, "alice");
	}
}
