#![forbid(unsafe_code)]

use std::sync::Arc;

use roomcast_domain::RoomId;
use roomcast_store::{CapacityStore, CapacityUpdate, StoreError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use crate::adapters::RoomStore;

/// Why a connection attempt was not admitted.
///
/// A store failure is a rejection too: admission fails closed rather than
/// letting a room overfill while the capacity store is unreachable.
#[derive(Debug, Error)]
pub enum AdmissionError {
	#[error("room {0} is at capacity")]
	RoomFull(RoomId),

	#[error("capacity store unavailable: {0}")]
	Unavailable(#[from] StoreError),
}

/// Reserves and releases capacity slots around the connection lifecycle.
///
/// The atomic store call must happen before registry admission so a race for
/// the last slot is resolved by the store, never by in-process locking. The
/// durable room record is mirrored asynchronously by a single worker that
/// applies updates in reservation order, so the record settles on the latest
/// occupancy rather than whichever write lands last.
#[derive(Clone)]
pub struct AdmissionController {
	capacity: Arc<dyn CapacityStore>,
	mirror_tx: mpsc::UnboundedSender<(RoomId, u32)>,
}

impl AdmissionController {
	pub fn new(capacity: Arc<dyn CapacityStore>, rooms: Arc<dyn RoomStore>) -> Self {
		let (mirror_tx, mut mirror_rx) = mpsc::unbounded_channel::<(RoomId, u32)>();
		tokio::spawn(async move {
			while let Some((room, occupancy)) = mirror_rx.recv().await {
				if let Err(e) = rooms.update_current_capacity(&room, occupancy).await {
					warn!(room = %room, occupancy, error = %e, "durable capacity mirror failed");
				}
			}
		});
		Self { capacity, mirror_tx }
	}

	/// Reserve one slot; returns the post-admission occupancy.
	pub async fn admit(&self, room: &RoomId) -> Result<u32, AdmissionError> {
		match self.capacity.adjust(room, 1).await {
			Ok(CapacityUpdate::Updated(occupancy)) => {
				self.mirror_capacity(room, occupancy);
				Ok(occupancy)
			}
			Ok(CapacityUpdate::Rejected) => {
				metrics::counter!("roomcast_server_admission_rejected_total").increment(1);
				Err(AdmissionError::RoomFull(room.clone()))
			}
			Err(e) => {
				metrics::counter!("roomcast_server_admission_rejected_total").increment(1);
				warn!(room = %room, error = %e, "capacity store unreachable, admission failed closed");
				Err(e.into())
			}
		}
	}

	/// Release one slot on disconnect; clamped at zero by the store.
	pub async fn release(&self, room: &RoomId) -> Option<u32> {
		match self.capacity.adjust(room, -1).await {
			Ok(CapacityUpdate::Updated(occupancy)) => {
				self.mirror_capacity(room, occupancy);
				Some(occupancy)
			}
			// Negative deltas are never bounds-checked.
			Ok(CapacityUpdate::Rejected) => None,
			Err(e) => {
				warn!(room = %room, error = %e, "capacity release failed, counter may drift until reconciled");
				None
			}
		}
	}

	fn mirror_capacity(&self, room: &RoomId, occupancy: u32) {
		// Dropped only when the worker is gone, i.e. at shutdown.
		let _ = self.mirror_tx.send((room.clone(), occupancy));
	}
}
