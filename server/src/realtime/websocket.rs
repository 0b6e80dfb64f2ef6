//! WebSocket listen channel.
//!
//! Clients connect to `/v1/listen` and drive subscriptions over a
//! message-oriented protocol:
//!
//! ```json
//! {
//!   "id": "msg-123",
//!   "type": "subscribe|unsubscribe|heartbeat|eventsSince|ping",
//!   "subscriptionId": "...", "firestorePath": "...", "resumeToken": "...",
//!   "query": { ... }, "options": { ... }
//! }
//! ```
//!
//! Each subscription gets its own bounded channel into the bus; a
//! per-subscription forwarding task wraps events with the subscription id
//! and funnels them into the connection's aggregated channel. Dropping a
//! subscription drops its sender, which ends the forwarder. On disconnect
//! every subscription of the connection is reaped.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value as Json, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};

use crate::prelude::*;
use crate::query::StructuredQuery;

use super::{RealtimeEvent, SubscribeParams, SubscriptionOptions};

/// Bounded capacity of each subscription's event channel.
pub const SUBSCRIPTION_CHANNEL_CAPACITY: usize = 1000;

/// A message on the listen protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenMessage {
	/// Message id echoed on responses; string or number.
	pub id: Json,

	#[serde(rename = "type")]
	pub msg_type: String,

	/// Remaining fields (path, subscriptionId, query, ...) flattened.
	#[serde(flatten)]
	pub payload: serde_json::Map<String, Json>,
}

impl ListenMessage {
	pub fn new(msg_type: impl Into<String>, payload: Json) -> Self {
		let map = match payload {
			Json::Object(map) => map,
			_ => serde_json::Map::new(),
		};
		Self {
			id: Json::String(uuid::Uuid::new_v4().to_string()),
			msg_type: msg_type.into(),
			payload: map,
		}
	}

	pub fn response(id: Json, msg_type: impl Into<String>, payload: Json) -> Self {
		let map = match payload {
			Json::Object(map) => map,
			_ => serde_json::Map::new(),
		};
		Self { id, msg_type: msg_type.into(), payload: map }
	}

	pub fn error(id: Json, err: &Error) -> Self {
		Self::response(
			id,
			"error",
			json!({ "code": err.code(), "status": err.status(), "message": err.to_string() }),
		)
	}

	pub fn to_ws_message(&self) -> Result<Message, serde_json::Error> {
		let encoded = serde_json::to_string(self)?;
		Ok(Message::Text(encoded.into()))
	}

	pub fn from_ws_message(msg: &Message) -> Result<Option<Self>, serde_json::Error> {
		match msg {
			Message::Text(text) => Ok(Some(serde_json::from_str(text)?)),
			Message::Close(_) | Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {
				Ok(None)
			}
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenParams {
	pub subscriber_id: Option<String>,
}

struct ListenConnection {
	subscriber_id: Box<str>,
	aggregated_tx: mpsc::UnboundedSender<(Box<str>, RealtimeEvent)>,
	ping_interval_secs: AtomicU64,
}

/// `GET /v1/listen` upgrade handler.
pub async fn listen_handler(
	State(app): State<App>,
	Query(params): Query<ListenParams>,
	ws: WebSocketUpgrade,
) -> Response {
	let subscriber_id = params
		.subscriber_id
		.unwrap_or_else(|| format!("conn-{}", uuid::Uuid::new_v4()));
	ws.on_upgrade(move |socket| handle_listen_connection(socket, app, subscriber_id))
}

async fn handle_listen_connection(ws: WebSocket, app: App, subscriber_id: String) {
	info!("listen connection opened: {}", subscriber_id);

	let (aggregated_tx, mut aggregated_rx) =
		mpsc::unbounded_channel::<(Box<str>, RealtimeEvent)>();
	let conn = Arc::new(ListenConnection {
		subscriber_id: subscriber_id.clone().into(),
		aggregated_tx,
		ping_interval_secs: AtomicU64::new(app.settings.heartbeat_interval_secs),
	});

	let (ws_tx, mut ws_rx) = ws.split();
	let ws_tx = Arc::new(Mutex::new(ws_tx));

	// Ping task keeps the socket alive; the interval honors the
	// per-connection heartbeat override.
	let ws_tx_ping = Arc::clone(&ws_tx);
	let conn_ping = Arc::clone(&conn);
	let ping_task = tokio::spawn(async move {
		loop {
			let secs = conn_ping.ping_interval_secs.load(Ordering::Relaxed).max(1);
			tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
			let mut tx = ws_tx_ping.lock().await;
			if tx.send(Message::Ping(vec![].into())).await.is_err() {
				return;
			}
		}
	});

	// Receive task: protocol commands
	let app_recv = app.clone();
	let conn_recv = Arc::clone(&conn);
	let ws_tx_recv = Arc::clone(&ws_tx);
	let recv_task = tokio::spawn(async move {
		while let Some(msg) = ws_rx.next().await {
			let msg = match msg {
				Ok(msg) => msg,
				Err(err) => {
					warn!("listen connection error: {}", err);
					break;
				}
			};
			let msg = match ListenMessage::from_ws_message(&msg) {
				Ok(Some(msg)) => msg,
				Ok(None) => continue,
				Err(err) => {
					warn!("unparseable listen message: {}", err);
					continue;
				}
			};

			let response = handle_listen_command(&app_recv, &conn_recv, &msg).await;
			if let Ok(encoded) = response.to_ws_message() {
				let mut tx = ws_tx_recv.lock().await;
				if tx.send(encoded).await.is_err() {
					break;
				}
			}
		}
	});

	// Forward task: subscription events to the socket
	let ws_tx_fwd = Arc::clone(&ws_tx);
	let forward_task = tokio::spawn(async move {
		while let Some((subscription_id, event)) = aggregated_rx.recv().await {
			let msg = ListenMessage::new(
				"event",
				json!({
					"subscriptionId": subscription_id,
					"event": event,
				}),
			);
			if let Ok(encoded) = msg.to_ws_message() {
				let mut tx = ws_tx_fwd.lock().await;
				if tx.send(encoded).await.is_err() {
					return;
				}
			}
		}
	});

	tokio::select! {
		_ = recv_task => debug!("listen receive task ended"),
		_ = forward_task => debug!("listen forward task ended"),
	}
	ping_task.abort();

	let reaped = app.bus.unsubscribe_all(&subscriber_id);
	info!("listen connection closed: {} ({} subscriptions reaped)", subscriber_id, reaped);
}

/// Build bus subscribe parameters from a subscribe message payload. The
/// target path travels as `firestorePath` on the wire.
pub fn subscribe_params_from_payload(
	subscriber_id: &str,
	payload: &serde_json::Map<String, Json>,
	channel: mpsc::Sender<RealtimeEvent>,
) -> EbResult<SubscribeParams> {
	let subscription_id = payload
		.get("subscriptionId")
		.and_then(Json::as_str)
		.map_or_else(|| format!("sub-{}", uuid::Uuid::new_v4()), ToString::to_string);
	let path = payload.get("firestorePath").and_then(Json::as_str).unwrap_or("");
	let resume_token = payload.get("resumeToken").and_then(Json::as_str).map(Into::into);
	let query: Option<StructuredQuery> = match payload.get("query") {
		Some(raw) => Some(
			serde_json::from_value(raw.clone())
				.map_err(|err| Error::InvalidArgument(format!("invalid query: {}", err)))?,
		),
		None => None,
	};
	let options: SubscriptionOptions = payload
		.get("options")
		.and_then(|raw| serde_json::from_value(raw.clone()).ok())
		.unwrap_or_default();

	Ok(SubscribeParams {
		subscriber_id: subscriber_id.into(),
		subscription_id: subscription_id.into(),
		path: path.into(),
		channel,
		resume_token,
		query,
		options,
	})
}

async fn handle_listen_command(
	app: &App,
	conn: &Arc<ListenConnection>,
	msg: &ListenMessage,
) -> ListenMessage {
	match msg.msg_type.as_str() {
		"subscribe" => {
			// Per-subscription channel; the forwarder tags events with the
			// subscription id for the client.
			let (tx, mut rx) = mpsc::channel::<RealtimeEvent>(SUBSCRIPTION_CHANNEL_CAPACITY);
			let params =
				match subscribe_params_from_payload(&conn.subscriber_id, &msg.payload, tx) {
					Ok(params) => params,
					Err(err) => return ListenMessage::error(msg.id.clone(), &err),
				};
			if let Some(interval) = params.options.heartbeat_interval {
				conn.ping_interval_secs.store(interval.max(1), Ordering::Relaxed);
			}

			let subscription_id = params.subscription_id.to_string();
			match app.bus.subscribe(params) {
				Ok(()) => {
					let aggregated = conn.aggregated_tx.clone();
					let sub_id: Box<str> = subscription_id.clone().into();
					tokio::spawn(async move {
						while let Some(event) = rx.recv().await {
							if aggregated.send((sub_id.clone(), event)).is_err() {
								break;
							}
						}
					});
					ListenMessage::response(
						msg.id.clone(),
						"subscribeResult",
						json!({ "subscriptionId": subscription_id }),
					)
				}
				Err(err) => ListenMessage::error(msg.id.clone(), &err),
			}
		}

		"unsubscribe" => {
			let subscription_id =
				msg.payload.get("subscriptionId").and_then(Json::as_str).unwrap_or("");
			// Idempotent: absent subscriptions unsubscribe silently
			app.bus.unsubscribe(&conn.subscriber_id, subscription_id);
			ListenMessage::response(msg.id.clone(), "unsubscribeResult", json!({}))
		}

		"heartbeat" => {
			let subscription_id =
				msg.payload.get("subscriptionId").and_then(Json::as_str).unwrap_or("");
			match app.bus.update_last_heartbeat(&conn.subscriber_id, subscription_id) {
				Ok(()) => ListenMessage::response(
					msg.id.clone(),
					"heartbeatResult",
					json!({ "timestamp": Timestamp::now().to_rfc3339() }),
				),
				Err(err) => ListenMessage::error(msg.id.clone(), &err),
			}
		}

		"eventsSince" => {
			let path =
				msg.payload.get("firestorePath").and_then(Json::as_str).unwrap_or("");
			let token = msg.payload.get("resumeToken").and_then(Json::as_str).unwrap_or("");
			let events = app.bus.events_since(path, token);
			ListenMessage::response(msg.id.clone(), "eventsSinceResult", json!({ "events": events }))
		}

		"ping" => ListenMessage::response(msg.id.clone(), "pong", json!({})),

		other => {
			warn!("unknown listen command: {}", other);
			ListenMessage::error(
				msg.id.clone(),
				&Error::InvalidArgument(format!("unknown command: {}", other)),
			)
		}
	}
}

// vim: ts=4
