#![forbid(unsafe_code)]

use thiserror::Error;

/// Failures talking to the remote store.
///
/// Callers on the admission path treat `Unavailable` as a rejection (fail
/// closed); the fanout and reconciler paths log and retry.
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("store unavailable: {0}")]
	Unavailable(#[from] redis::RedisError),

	#[error("malformed stored payload: {0}")]
	Payload(#[from] roomcast_protocol::DecodeError),

	#[error("subscription closed")]
	SubscriptionClosed,
}
