#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use roomcast_domain::MessageType;
use roomcast_protocol::ChatMessage;
use roomcast_store::{EventLog, StoreError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapters::RoomStore;
use crate::config::EventSettings;

/// Background consumer draining the membership event log into the durable
/// room record.
///
/// Each process joins the deployment-wide consumer group under a random
/// consumer id, so processes share the read workload without double-applying
/// a record. Delivery is at-least-once; applies are idempotent.
pub struct Reconciler {
	events: Arc<dyn EventLog>,
	rooms: Arc<dyn RoomStore>,
	cfg: EventSettings,
	consumer: String,
}

impl Reconciler {
	pub fn new(events: Arc<dyn EventLog>, rooms: Arc<dyn RoomStore>, cfg: EventSettings) -> Self {
		Self {
			events,
			rooms,
			cfg,
			consumer: Uuid::new_v4().to_string(),
		}
	}

	pub async fn ensure_group(&self) -> Result<(), StoreError> {
		self.events.ensure_group(&self.cfg.group).await
	}

	/// One tick: read a bounded batch and apply it in record order.
	///
	/// A record is acknowledged when its apply did not fail; a no-op apply
	/// still counts as consumed. A failed apply skips the ack so the record
	/// is redelivered on a later tick. Returns the number applied.
	pub async fn drain_once(&self) -> usize {
		let records = match self
			.events
			.read_next(&self.cfg.group, &self.consumer, self.cfg.batch_size, self.cfg.block_timeout)
			.await
		{
			Ok(records) => records,
			Err(e) => {
				warn!(error = %e, "event log read failed, retrying next tick");
				return 0;
			}
		};

		let mut applied = 0;
		for record in records {
			match self.apply(&record.message).await {
				Ok(()) => {
					metrics::counter!("roomcast_server_events_applied_total").increment(1);
					applied += 1;
					if let Err(e) = self.events.acknowledge(&self.cfg.group, &record.id).await {
						warn!(id = %record.id, error = %e, "acknowledge failed, record will be redelivered");
					}
				}
				Err(e) => {
					metrics::counter!("roomcast_server_events_apply_errors_total").increment(1);
					warn!(id = %record.id, error = %e, "membership apply failed, record left pending");
				}
			}
		}
		applied
	}

	async fn apply(&self, message: &ChatMessage) -> anyhow::Result<()> {
		match message.kind {
			MessageType::Join => self.rooms.apply_join(&message.room_id, &message.sender).await,
			MessageType::Leave => self.rooms.apply_leave(&message.room_id, &message.sender).await,
			// Membership changes from a kick arrive as the LEAVE synthesized
			// when the kicked connection closes.
			MessageType::Kick | MessageType::Chat => Ok(()),
		}
	}

	/// Run the periodic loop forever; processing errors never stop it.
	pub fn spawn(self) -> JoinHandle<()> {
		tokio::spawn(async move {
			let mut backoff = Duration::from_secs(1);
			while let Err(e) = self.ensure_group().await {
				warn!(group = %self.cfg.group, error = %e, "consumer group setup failed, backing off");
				tokio::time::sleep(backoff).await;
				backoff = (backoff * 2).min(Duration::from_secs(30));
			}
			debug!(group = %self.cfg.group, consumer = %self.consumer, "reconciler started");

			let mut ticker = tokio::time::interval(self.cfg.poll_interval);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				ticker.tick().await;
				self.drain_once().await;
			}
		})
	}
}
