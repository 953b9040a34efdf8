#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
	Chat,
	Join,
	Leave,
	Kick,
}

impl MessageType {
	/// Stable string identifier, matching the wire encoding.
	pub const fn as_str(self) -> &'static str {
		match self {
			MessageType::Chat => "CHAT",
			MessageType::Join => "JOIN",
			MessageType::Leave => "LEAVE",
			MessageType::Kick => "KICK",
		}
	}

	/// Whether this kind is recorded in the membership event log.
	pub const fn is_membership_event(self) -> bool {
		matches!(self, MessageType::Join | MessageType::Leave | MessageType::Kick)
	}
}

impl fmt::Display for MessageType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
}

/// Logical chat room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
	/// Create a non-empty `RoomId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for RoomId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for RoomId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		RoomId::new(s.to_string())
	}
}

/// Directory view of a user, carried on JOIN/LEAVE broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
	pub user_id: i64,
	pub user_name: String,
	pub user_role: String,
}

/// Per-room occupancy record held by the capacity store.
///
/// `current_capacity <= max_capacity` holds after every successful admission;
/// the store enforces this atomically and no writer may bypass it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomAllowance {
	pub current_capacity: u32,
	pub max_capacity: u32,
}

impl RoomAllowance {
	/// A fresh allowance for a newly created room.
	pub const fn empty(max_capacity: u32) -> Self {
		Self {
			current_capacity: 0,
			max_capacity,
		}
	}
}
