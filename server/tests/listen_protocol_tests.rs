//! Integration tests for the listen WebSocket protocol envelope.

use serde_json::json;

use emberbase::realtime::websocket::{ListenMessage, subscribe_params_from_payload};
use emberbase::realtime::{EventType, RealtimeBus};

#[test]
fn test_listen_message_parsing() {
	let msg = ListenMessage::new(
		"subscribe",
		json!({
			"subscriptionId": "s1",
			"firestorePath": "projects/p/databases/(default)/documents/users/u1",
		}),
	);
	assert_eq!(msg.msg_type, "subscribe");
	assert_eq!(msg.payload.get("subscriptionId").and_then(|v| v.as_str()), Some("s1"));
}

#[test]
fn test_listen_message_roundtrip() {
	let msg = ListenMessage::new(
		"subscribe",
		json!({ "firestorePath": "projects/p/databases/(default)/documents/users" }),
	);
	let encoded = serde_json::to_string(&msg).expect("encode");
	let decoded: ListenMessage = serde_json::from_str(&encoded).expect("decode");
	assert_eq!(decoded.msg_type, "subscribe");
	assert_eq!(decoded.payload.get("firestorePath"), msg.payload.get("firestorePath"));
	assert_eq!(decoded.id, msg.id);
}

#[test]
fn test_listen_response_echoes_id() {
	let msg = ListenMessage::response(
		json!("msg-42"),
		"subscribeResult",
		json!({ "subscriptionId": "s1" }),
	);
	assert_eq!(msg.id, json!("msg-42"));
	assert_eq!(msg.msg_type, "subscribeResult");
}

#[test]
fn test_listen_error_carries_status() {
	let err = emberbase::error::Error::ResourceExhausted("subscription limit".into());
	let msg = ListenMessage::error(json!(7), &err);
	assert_eq!(msg.msg_type, "error");
	assert_eq!(msg.payload.get("code").and_then(|v| v.as_u64()), Some(429));
	assert_eq!(
		msg.payload.get("status").and_then(|v| v.as_str()),
		Some("RESOURCE_EXHAUSTED")
	);
}

/// A subscribe message keyed by `firestorePath` carries through to a live
/// bus subscription.
#[tokio::test]
async fn test_firestore_path_keyed_subscribe_works() {
	const DOC: &str = "projects/p/databases/(default)/documents/docs/doc1";

	let msg: ListenMessage = serde_json::from_value(json!({
		"id": "msg-1",
		"type": "subscribe",
		"subscriptionId": "s1",
		"firestorePath": DOC,
	}))
	.expect("parse subscribe message");

	let (tx, mut rx) = tokio::sync::mpsc::channel(16);
	let params =
		subscribe_params_from_payload("conn-1", &msg.payload, tx).expect("subscribe params");
	assert_eq!(params.path.as_ref(), DOC);
	assert_eq!(params.subscription_id.as_ref(), "s1");

	let bus = RealtimeBus::new();
	bus.subscribe(params).expect("subscribe");
	bus.publish(EventType::Added, DOC, Some(json!({ "name": DOC })), None);

	let event = rx.recv().await.expect("delivered event");
	assert_eq!(event.event_type, EventType::Added);
	assert_eq!(event.full_path.as_ref(), DOC);
}

#[test]
fn test_realtime_event_wire_shape() {
	let event = emberbase::realtime::RealtimeEvent {
		event_type: emberbase::realtime::EventType::Added,
		full_path: "projects/p/databases/(default)/documents/users/u1".into(),
		data: Some(json!({ "name": "projects/p/databases/(default)/documents/users/u1" })),
		old_data: None,
		sequence: 7,
		resume_token: format!("{:020}", 7).into(),
		timestamp: None,
	};
	let encoded = serde_json::to_value(&event).expect("encode");
	assert_eq!(encoded["type"], "added");
	assert_eq!(encoded["sequence"], 7);
	assert_eq!(encoded["resumeToken"], format!("{:020}", 7));
	// Absent oldData is omitted, not null
	assert!(encoded.get("oldData").is_none());
}

// vim: ts=4
