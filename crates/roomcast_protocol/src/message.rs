#![forbid(unsafe_code)]

use roomcast_domain::{MessageType, RoomId, UserSummary};
use serde::{Deserialize, Serialize};

/// A single wire message: client chat input, a presence notice, or a kick.
///
/// Instances are immutable once built; system notices derived from an inbound
/// message are fresh values (`join_notice` and friends), never mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
	#[serde(rename = "type")]
	pub kind: MessageType,

	pub sender: String,

	pub content: String,

	pub room_id: RoomId,

	/// Refreshed membership snapshot, attached only when fanning out
	/// JOIN/LEAVE notices.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub current_user_list: Option<Vec<UserSummary>>,
}

impl ChatMessage {
	/// Build a plain message without a membership snapshot.
	pub fn new(kind: MessageType, sender: impl Into<String>, content: impl Into<String>, room_id: RoomId) -> Self {
		Self {
			kind,
			sender: sender.into(),
			content: content.into(),
			room_id,
			current_user_list: None,
		}
	}

	/// JOIN notice announcing `sender` to the room.
	pub fn join_notice(sender: &str, room_id: RoomId) -> Self {
		Self::new(MessageType::Join, sender, format!("{sender} joined the room"), room_id)
	}

	/// LEAVE notice announcing `sender`'s departure.
	pub fn leave_notice(sender: &str, room_id: RoomId) -> Self {
		Self::new(MessageType::Leave, sender, format!("{sender} left the room"), room_id)
	}

	/// KICK notice for `target`, issued by `kicker`.
	///
	/// The target's username rides in `content` so that the process owning the
	/// target's connection can find and close it.
	pub fn kick_notice(kicker: &str, target: &str, room_id: RoomId) -> Self {
		Self {
			kind: MessageType::Kick,
			sender: kicker.to_string(),
			content: target.to_string(),
			room_id,
			current_user_list: None,
		}
	}

	/// Copy-on-transform: the same message carrying a membership snapshot.
	pub fn with_user_list(&self, users: Vec<UserSummary>) -> Self {
		let mut out = self.clone();
		out.current_user_list = Some(users);
		out
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn room(id: &str) -> RoomId {
		RoomId::new(id).expect("valid RoomId")
	}

	#[test]
	fn join_notice_names_the_sender() {
		let notice = ChatMessage::join_notice("alice", room("42"));
		assert_eq!(notice.kind, MessageType::Join);
		assert_eq!(notice.sender, "alice");
		assert!(notice.content.contains("alice"));
		assert!(notice.current_user_list.is_none());
	}

	#[test]
	fn kick_notice_carries_target_in_content() {
		let notice = ChatMessage::kick_notice("owner", "mallory", room("42"));
		assert_eq!(notice.kind, MessageType::Kick);
		assert_eq!(notice.sender, "owner");
		assert_eq!(notice.content, "mallory");
	}

	#[test]
	fn with_user_list_leaves_original_untouched() {
		let original = ChatMessage::leave_notice("bob", room("7"));
		let enriched = original.with_user_list(Vec::new());
		assert!(original.current_user_list.is_none());
		assert_eq!(enriched.current_user_list.as_deref(), Some(&[][..]));
	}
}
