#![forbid(unsafe_code)]

use thiserror::Error;

use crate::message::ChatMessage;

#[derive(Debug, Error)]
pub enum DecodeError {
	#[error("invalid chat message payload: {0}")]
	Invalid(#[from] serde_json::Error),
}

/// Serialize a message to its JSON wire form.
pub fn encode(message: &ChatMessage) -> String {
	// ChatMessage contains no map keys or non-string-keyed data, so
	// serialization cannot fail.
	serde_json::to_string(message).unwrap_or_default()
}

/// Deserialize a wire payload into a `ChatMessage`.
///
/// Some publishers hand us the message once-escaped: a JSON string whose
/// contents are themselves an encoded JSON object. Direct decode is attempted
/// first; on failure the payload is unwrapped as a string and decoded again.
pub fn decode(payload: &str) -> Result<ChatMessage, DecodeError> {
	match serde_json::from_str::<ChatMessage>(payload) {
		Ok(message) => Ok(message),
		Err(direct_err) => {
			let Ok(unwrapped) = serde_json::from_str::<String>(payload) else {
				return Err(DecodeError::Invalid(direct_err));
			};
			Ok(serde_json::from_str::<ChatMessage>(&unwrapped)?)
		}
	}
}
