#![forbid(unsafe_code)]

use std::sync::Arc;

use roomcast_protocol::ChatMessage;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::adapters::HistoryPersistence;

/// Handle for offering messages to the persistence worker.
///
/// `offer` never awaits: a slow archive backend must not back-pressure the
/// delivery path, so a full queue drops the message and counts the drop.
#[derive(Clone)]
pub struct PersistHandle {
	tx: mpsc::Sender<ChatMessage>,
}

impl PersistHandle {
	pub fn offer(&self, message: &ChatMessage) {
		match self.tx.try_send(message.clone()) {
			Ok(()) => {}
			Err(mpsc::error::TrySendError::Full(_)) => {
				metrics::counter!("roomcast_server_persist_dropped_total").increment(1);
				debug!(room = %message.room_id, "persistence queue full, message dropped");
			}
			Err(mpsc::error::TrySendError::Closed(_)) => {
				debug!("persistence worker stopped, message dropped");
			}
		}
	}
}

/// Start the bounded fire-and-forget worker feeding the archive backend.
pub fn spawn_persist_worker(
	backend: Arc<dyn HistoryPersistence>,
	queue_capacity: usize,
) -> (PersistHandle, JoinHandle<()>) {
	let (tx, mut rx) = mpsc::channel(queue_capacity);

	let task = tokio::spawn(async move {
		while let Some(message) = rx.recv().await {
			if let Err(e) = backend.persist(&message).await {
				metrics::counter!("roomcast_server_persist_errors_total").increment(1);
				warn!(error = %e, "history persistence failed");
			}
		}
	});

	(PersistHandle { tx }, task)
}
