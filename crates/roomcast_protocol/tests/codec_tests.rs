#![forbid(unsafe_code)]

use proptest::prelude::*;
use roomcast_domain::{MessageType, RoomId, UserSummary};
use roomcast_protocol::{ChatMessage, decode, encode};

fn room(id: &str) -> RoomId {
	RoomId::new(id).expect("valid RoomId")
}

#[test]
fn wire_format_field_names() {
	let message = ChatMessage::new(MessageType::Chat, "alice", "hi there", room("42"));
	let value: serde_json::Value = serde_json::from_str(&encode(&message)).expect("valid json");

	assert_eq!(value["type"], "CHAT");
	assert_eq!(value["sender"], "alice");
	assert_eq!(value["content"], "hi there");
	assert_eq!(value["roomId"], "42");
	assert!(value.get("currentUserList").is_none(), "absent list must be omitted");
}

#[test]
fn user_list_serializes_when_present() {
	let message = ChatMessage::join_notice("alice", room("42")).with_user_list(vec![UserSummary {
		user_id: 1,
		user_name: "alice".to_string(),
		user_role: "MEMBER".to_string(),
	}]);

	let value: serde_json::Value = serde_json::from_str(&encode(&message)).expect("valid json");
	assert_eq!(value["currentUserList"][0]["userName"], "alice");
}

#[test]
fn decode_accepts_direct_object() {
	let decoded = decode(r#"{"type":"JOIN","sender":"bob","content":"","roomId":"7"}"#).expect("decodes");
	assert_eq!(decoded.kind, MessageType::Join);
	assert_eq!(decoded.sender, "bob");
	assert_eq!(decoded.room_id.as_str(), "7");
}

#[test]
fn decode_accepts_double_encoded_payload() {
	let original = ChatMessage::new(MessageType::Chat, "carol", "quoted \"text\"", room("42"));
	let wrapped = serde_json::to_string(&encode(&original)).expect("wrap as json string");

	let decoded = decode(&wrapped).expect("decodes after unwrap");
	assert_eq!(decoded, original);
}

#[test]
fn decode_rejects_garbage() {
	assert!(decode("not json at all").is_err());
	assert!(decode("\"a plain string, not an object\"").is_err());
	assert!(decode(r#"{"type":"SHOUT","sender":"x","content":"","roomId":"1"}"#).is_err());
}

proptest! {
	#[test]
	fn roundtrip_direct_and_double_encoded(sender in ".{0,32}", content in ".{0,256}") {
		let message = ChatMessage::new(MessageType::Chat, sender, content, room("42"));

		let direct = decode(&encode(&message)).expect("direct roundtrip");
		prop_assert_eq!(&direct, &message);

		let wrapped = serde_json::to_string(&encode(&message)).expect("wrap");
		let unwrapped = decode(&wrapped).expect("double-encoded roundtrip");
		prop_assert_eq!(&unwrapped, &message);
	}
}
