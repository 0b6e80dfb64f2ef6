//! Realtime subscription bus.
//!
//! In-process pub/sub keyed by resource path. Every published event gets a
//! process-wide monotonic sequence number and a resume token that is
//! lexicographically monotone with it; per-path ring buffers keep the last
//! 1000 events for client-driven recovery. Publishers never block:
//! subscriber channels are bounded and overflow drops the event for that
//! subscriber, with the resume-token replay path as the recovery mechanism.

pub mod bus;
pub mod filter;
pub mod store;
pub mod websocket;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::types::Timestamp;

pub use bus::{RealtimeBus, SubscribeParams};

/// Kind of a realtime event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
	Added,
	Modified,
	Removed,
	Heartbeat,
}

/// A published change event as delivered to subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeEvent {
	#[serde(rename = "type")]
	pub event_type: EventType,
	pub full_path: Box<str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<Json>,
	/// Previous document image on Modified events, when the subscription
	/// asked for it.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub old_data: Option<Json>,
	pub sequence: u64,
	pub resume_token: Box<str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub timestamp: Option<Timestamp>,
}

/// Per-subscription delivery options.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionOptions {
	/// Attach sequence timestamps to delivered events.
	pub include_metadata: bool,
	/// Deliver the previous document image on Modified events.
	pub include_old_data: bool,
	/// Per-connection heartbeat interval override, seconds.
	pub heartbeat_interval: Option<u64>,
}

impl Default for SubscriptionOptions {
	fn default() -> Self {
		Self { include_metadata: true, include_old_data: false, heartbeat_interval: None }
	}
}

// vim: ts=4
