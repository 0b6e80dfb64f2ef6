//! The subscription bus.
//!
//! Two maps (subscriber -> subscriptions, path -> subscribers) live behind a
//! single read-write lock; reads take the shared lock, mutations the
//! exclusive one. Sequence and subscription counters are lock-free. Send
//! sites are non-blocking: a full subscriber channel drops the event for
//! that subscriber and the publisher carries on.

use parking_lot::RwLock;
use serde_json::Value as Json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use super::store::EventStore;
use super::{EventType, RealtimeEvent, SubscriptionOptions, filter};
use crate::path::ResourcePath;
use crate::prelude::*;
use crate::query::StructuredQuery;

/// Subscription cap per subscriber.
pub const MAX_SUBSCRIPTIONS_PER_SUBSCRIBER: usize = 100;

/// Subscription request.
pub struct SubscribeParams {
	pub subscriber_id: Box<str>,
	pub subscription_id: Box<str>,
	pub path: Box<str>,
	pub channel: mpsc::Sender<RealtimeEvent>,
	/// Non-empty token triggers an async replay of buffered events with
	/// strictly greater tokens before live events flow.
	pub resume_token: Option<Box<str>>,
	pub query: Option<StructuredQuery>,
	pub options: SubscriptionOptions,
}

struct SubscriptionEntry {
	path: Box<str>,
	channel: mpsc::Sender<RealtimeEvent>,
	query: Option<StructuredQuery>,
	options: SubscriptionOptions,
	last_heartbeat: Instant,
	/// Inactive subscriptions are ignored by publish and reaped later.
	active: bool,
}

#[derive(Default)]
struct BusMaps {
	/// subscriber -> subscription id -> entry
	by_subscriber: HashMap<Box<str>, HashMap<Box<str>, SubscriptionEntry>>,
	/// path -> subscriber -> subscription ids
	by_path: HashMap<Box<str>, HashMap<Box<str>, HashSet<Box<str>>>>,
}

pub struct RealtimeBus {
	maps: RwLock<BusMaps>,
	store: EventStore,
	sequence: AtomicU64,
	events_published: AtomicU64,
	total_subscriptions: AtomicU64,
}

impl Default for RealtimeBus {
	fn default() -> Self {
		Self::new()
	}
}

impl RealtimeBus {
	pub fn new() -> Self {
		Self {
			maps: RwLock::new(BusMaps::default()),
			store: EventStore::new(),
			sequence: AtomicU64::new(0),
			events_published: AtomicU64::new(0),
			total_subscriptions: AtomicU64::new(0),
		}
	}

	/// Register a subscription. Rejects empty ids, invalid paths, the
	/// per-subscriber cap, and duplicate subscription ids.
	pub fn subscribe(&self, params: SubscribeParams) -> EbResult<()> {
		if params.subscriber_id.is_empty() || params.subscription_id.is_empty() {
			return Err(Error::InvalidArgument(
				"subscriber and subscription ids must be non-empty".into(),
			));
		}
		ResourcePath::parse(&params.path)?;
		if let Some(query) = &params.query {
			query.validate()?;
		}

		{
			let mut maps = self.maps.write();
			let subs = maps.by_subscriber.entry(params.subscriber_id.clone()).or_default();
			if subs.len() >= MAX_SUBSCRIPTIONS_PER_SUBSCRIBER {
				return Err(Error::ResourceExhausted(format!(
					"subscriber {} reached the {} subscription limit",
					params.subscriber_id, MAX_SUBSCRIPTIONS_PER_SUBSCRIBER
				)));
			}
			if subs.contains_key(&params.subscription_id) {
				return Err(Error::AlreadyExists(format!(
					"duplicate subscription id: {}",
					params.subscription_id
				)));
			}

			subs.insert(
				params.subscription_id.clone(),
				SubscriptionEntry {
					path: params.path.clone(),
					channel: params.channel.clone(),
					query: params.query.clone(),
					options: params.options,
					last_heartbeat: Instant::now(),
					active: true,
				},
			);
			maps.by_path
				.entry(params.path.clone())
				.or_default()
				.entry(params.subscriber_id.clone())
				.or_default()
				.insert(params.subscription_id.clone());
		}
		self.total_subscriptions.fetch_add(1, AtomicOrdering::Relaxed);
		debug!(
			"subscribed {}/{} to {}",
			params.subscriber_id, params.subscription_id, params.path
		);

		// Replay buffered events after the resume token, off the caller's
		// back. Live events may interleave; tokens let the client reorder.
		if let Some(token) = params.resume_token.filter(|t| !t.is_empty()) {
			let replay = self.store.events_since(&params.path, &token);
			if !replay.is_empty() {
				let channel = params.channel;
				tokio::spawn(async move {
					for event in replay {
						if channel.send(event).await.is_err() {
							break;
						}
					}
				});
			}
		}

		Ok(())
	}

	/// Remove one subscription. Removing an absent subscription succeeds
	/// silently.
	pub fn unsubscribe(&self, subscriber_id: &str, subscription_id: &str) {
		let mut maps = self.maps.write();
		let removed = maps
			.by_subscriber
			.get_mut(subscriber_id)
			.and_then(|subs| subs.remove(subscription_id));
		if let Some(entry) = removed {
			detach_path(&mut maps, &entry.path, subscriber_id, subscription_id);
			debug!("unsubscribed {}/{}", subscriber_id, subscription_id);
		}
	}

	/// Reap every subscription of a subscriber (connection teardown).
	pub fn unsubscribe_all(&self, subscriber_id: &str) -> usize {
		let mut maps = self.maps.write();
		let Some(subs) = maps.by_subscriber.remove(subscriber_id) else { return 0 };
		let count = subs.len();
		for (subscription_id, entry) in subs {
			detach_path(&mut maps, &entry.path, subscriber_id, &subscription_id);
		}
		debug!("unsubscribed all ({}) for {}", count, subscriber_id);
		count
	}

	/// Publish a change event: assign the next sequence number and a
	/// lexicographically monotone resume token, buffer it, and fan out to
	/// exact-path subscribers, parent-collection subscribers (for document
	/// paths), and descendant-scoped ancestors. Never blocks.
	pub fn publish(
		&self,
		event_type: EventType,
		full_path: &str,
		data: Option<Json>,
		old_data: Option<Json>,
	) -> RealtimeEvent {
		let sequence = self.sequence.fetch_add(1, AtomicOrdering::SeqCst) + 1;
		let event = RealtimeEvent {
			event_type,
			full_path: full_path.into(),
			data,
			old_data,
			sequence,
			resume_token: resume_token(sequence).into(),
			timestamp: Some(Timestamp::now()),
		};
		self.events_published.fetch_add(1, AtomicOrdering::Relaxed);
		self.store.push(event.clone());

		let parent_path = ResourcePath::parse(full_path)
			.ok()
			.filter(ResourcePath::is_document)
			.and_then(|p| p.parent())
			.map(|p| p.format());

		// Collect matching delivery targets under the shared lock, send
		// after dropping it.
		let mut targets: Vec<(Box<str>, Box<str>, mpsc::Sender<RealtimeEvent>, RealtimeEvent)> =
			Vec::new();
		let mut dead: Vec<(Box<str>, Box<str>)> = Vec::new();
		{
			let maps = self.maps.read();
			for (path, subscribers) in &maps.by_path {
				let exact = path.as_ref() == full_path;
				let parent = parent_path.as_deref() == Some(path.as_ref());
				let ancestor = filter::path_has_prefix(full_path, path);
				if !exact && !parent && !ancestor {
					continue;
				}

				for (subscriber_id, subscription_ids) in subscribers {
					let Some(subs) = maps.by_subscriber.get(subscriber_id) else { continue };
					for subscription_id in subscription_ids {
						let Some(entry) = subs.get(subscription_id) else { continue };
						if !entry.active {
							continue;
						}
						// Ancestor-only matches require a descendant-scoped query
						if !exact && !parent {
							let descendant_scoped = entry
								.query
								.as_ref()
								.and_then(|q| q.from.first())
								.is_some_and(|sel| sel.all_descendants);
							if !descendant_scoped {
								continue;
							}
						}
						if let Some(query) = &entry.query {
							if !filter::event_matches(&entry.path, query, &event) {
								continue;
							}
						}
						targets.push((
							subscriber_id.clone(),
							subscription_id.clone(),
							entry.channel.clone(),
							shape_for(&event, entry),
						));
					}
				}
			}
		}

		for (subscriber_id, subscription_id, channel, shaped) in targets {
			match channel.try_send(shaped) {
				Ok(()) => {}
				Err(mpsc::error::TrySendError::Full(_)) => {
					// Dropped for this subscriber; resume tokens cover recovery
					warn!(
						"dropping event seq={} for {}/{}: channel full",
						sequence, subscriber_id, subscription_id
					);
				}
				Err(mpsc::error::TrySendError::Closed(_)) => {
					dead.push((subscriber_id, subscription_id));
				}
			}
		}
		if !dead.is_empty() {
			let mut maps = self.maps.write();
			for (subscriber_id, subscription_id) in dead {
				if let Some(entry) = maps
					.by_subscriber
					.get_mut(&subscriber_id)
					.and_then(|subs| subs.get_mut(&subscription_id))
				{
					entry.active = false;
				}
			}
		}

		event
	}

	/// Broadcast a heartbeat to every active subscription, best-effort.
	pub fn send_heartbeat(&self) {
		let sequence = self.sequence.fetch_add(1, AtomicOrdering::SeqCst) + 1;
		let token: Box<str> = resume_token(sequence).into();

		let mut targets: Vec<(mpsc::Sender<RealtimeEvent>, RealtimeEvent)> = Vec::new();
		{
			let maps = self.maps.read();
			for subs in maps.by_subscriber.values() {
				for entry in subs.values() {
					if !entry.active {
						continue;
					}
					targets.push((
						entry.channel.clone(),
						RealtimeEvent {
							event_type: EventType::Heartbeat,
							full_path: entry.path.clone(),
							data: None,
							old_data: None,
							sequence,
							resume_token: token.clone(),
							timestamp: Some(Timestamp::now()),
						},
					));
				}
			}
		}
		for (channel, event) in targets {
			let _ = channel.try_send(event);
		}
	}

	/// Record client liveness for a subscription.
	pub fn update_last_heartbeat(
		&self,
		subscriber_id: &str,
		subscription_id: &str,
	) -> EbResult<()> {
		let mut maps = self.maps.write();
		let entry = maps
			.by_subscriber
			.get_mut(subscriber_id)
			.and_then(|subs| subs.get_mut(subscription_id))
			.ok_or_else(|| {
				Error::NotFound(format!(
					"subscription not found: {}/{}",
					subscriber_id, subscription_id
				))
			})?;
		entry.last_heartbeat = Instant::now();
		Ok(())
	}

	/// Unsubscribe subscriptions whose last heartbeat is older than
	/// `timeout`, plus any left inactive. Returns the number reaped.
	pub fn cleanup_stale_connections(&self, timeout: Duration) -> usize {
		let now = Instant::now();
		let mut reaped = 0;
		let mut maps = self.maps.write();

		let stale: Vec<(Box<str>, Box<str>)> = maps
			.by_subscriber
			.iter()
			.flat_map(|(subscriber_id, subs)| {
				subs.iter()
					.filter(|(_, entry)| {
						!entry.active
							|| now.duration_since(entry.last_heartbeat) > timeout
					})
					.map(|(subscription_id, _)| (subscriber_id.clone(), subscription_id.clone()))
					.collect::<Vec<_>>()
			})
			.collect();

		for (subscriber_id, subscription_id) in stale {
			let removed = maps
				.by_subscriber
				.get_mut(&subscriber_id)
				.and_then(|subs| subs.remove(&subscription_id));
			if let Some(entry) = removed {
				detach_path(&mut maps, &entry.path, &subscriber_id, &subscription_id);
				reaped += 1;
			}
		}
		maps.by_subscriber.retain(|_, subs| !subs.is_empty());

		if reaped > 0 {
			info!("reaped {} stale subscriptions", reaped);
		}
		reaped
	}

	/// Buffered events for a path with strictly greater resume tokens.
	pub fn events_since(&self, path: &str, resume_token: &str) -> Vec<RealtimeEvent> {
		self.store.events_since(path, resume_token)
	}

	/// Currently registered subscriptions.
	pub fn active_subscriptions(&self) -> usize {
		self.maps.read().by_subscriber.values().map(HashMap::len).sum()
	}

	/// Lifetime subscription count.
	pub fn total_subscriptions(&self) -> u64 {
		self.total_subscriptions.load(AtomicOrdering::Relaxed)
	}

	/// Lifetime published event count.
	pub fn events_published(&self) -> u64 {
		self.events_published.load(AtomicOrdering::Relaxed)
	}
}

/// Copy an event with per-subscription shaping applied.
fn shape_for(event: &RealtimeEvent, entry: &SubscriptionEntry) -> RealtimeEvent {
	let mut shaped = event.clone();
	if !entry.options.include_old_data {
		shaped.old_data = None;
	}
	if !entry.options.include_metadata {
		shaped.timestamp = None;
	}
	if let (Some(query), Some(data)) = (&entry.query, shaped.data.as_mut()) {
		filter::apply_projection(data, query);
	}
	shaped
}

fn detach_path(maps: &mut BusMaps, path: &str, subscriber_id: &str, subscription_id: &str) {
	if let Some(subscribers) = maps.by_path.get_mut(path) {
		if let Some(ids) = subscribers.get_mut(subscriber_id) {
			ids.remove(subscription_id);
			if ids.is_empty() {
				subscribers.remove(subscriber_id);
			}
		}
		if subscribers.is_empty() {
			maps.by_path.remove(path);
		}
	}
}

fn resume_token(sequence: u64) -> String {
	// Zero-padded decimal keeps lexicographic order aligned with numeric
	format!("{:020}", sequence)
}

#[cfg(test)]
mod tests {
	use super::*;

	const DOC1: &str = "projects/p/databases/(default)/documents/docs/doc1";
	const COLL: &str = "projects/p/databases/(default)/documents/docs";

	fn params(
		subscriber: &str,
		subscription: &str,
		path: &str,
		tx: mpsc::Sender<RealtimeEvent>,
	) -> SubscribeParams {
		SubscribeParams {
			subscriber_id: subscriber.into(),
			subscription_id: subscription.into(),
			path: path.into(),
			channel: tx,
			resume_token: None,
			query: None,
			options: SubscriptionOptions::default(),
		}
	}

	#[tokio::test]
	async fn test_publish_delivers_in_order_with_monotonic_tokens() {
		let bus = RealtimeBus::new();
		let (tx, mut rx) = mpsc::channel(16);
		assert!(bus.subscribe(params("sub", "s1", DOC1, tx)).is_ok());

		let e1 = bus.publish(EventType::Added, DOC1, Some(serde_json::json!({"v": 1})), None);
		let e2 = bus.publish(EventType::Modified, DOC1, Some(serde_json::json!({"v": 2})), None);
		assert!(e2.resume_token > e1.resume_token);

		let got1 = rx.recv().await;
		let got2 = rx.recv().await;
		assert_eq!(got1.map(|e| e.sequence), Some(e1.sequence));
		assert_eq!(got2.map(|e| e.sequence), Some(e2.sequence));
	}

	#[tokio::test]
	async fn test_parent_collection_subscribers_get_document_events() {
		let bus = RealtimeBus::new();
		let (tx, mut rx) = mpsc::channel(16);
		assert!(bus.subscribe(params("sub", "s1", COLL, tx)).is_ok());

		bus.publish(EventType::Added, DOC1, Some(serde_json::json!({})), None);
		let got = rx.recv().await;
		assert_eq!(got.map(|e| e.full_path), Some(DOC1.into()));
	}

	#[tokio::test]
	async fn test_resume_token_replay_skips_already_seen() {
		let bus = RealtimeBus::new();
		let e1 = bus.publish(EventType::Added, DOC1, Some(serde_json::json!({"v": 1})), None);
		let e2 = bus.publish(EventType::Modified, DOC1, Some(serde_json::json!({"v": 2})), None);

		let (tx, mut rx) = mpsc::channel(16);
		let mut p = params("late", "s1", DOC1, tx);
		p.resume_token = Some(e1.resume_token.clone());
		assert!(bus.subscribe(p).is_ok());

		let replayed = rx.recv().await;
		assert_eq!(replayed.map(|e| e.sequence), Some(e2.sequence));
	}

	#[tokio::test]
	async fn test_subscription_cap() {
		let bus = RealtimeBus::new();
		let (tx, _rx) = mpsc::channel(16);
		for i in 0..MAX_SUBSCRIPTIONS_PER_SUBSCRIBER {
			let p = params("sub", &format!("s{}", i), DOC1, tx.clone());
			assert!(bus.subscribe(p).is_ok());
		}
		let over = bus.subscribe(params("sub", "s-over", DOC1, tx));
		assert!(matches!(over, Err(Error::ResourceExhausted(_))));
	}

	#[tokio::test]
	async fn test_duplicate_subscription_rejected() {
		let bus = RealtimeBus::new();
		let (tx, _rx) = mpsc::channel(16);
		assert!(bus.subscribe(params("sub", "s1", DOC1, tx.clone())).is_ok());
		let dup = bus.subscribe(params("sub", "s1", DOC1, tx));
		assert!(matches!(dup, Err(Error::AlreadyExists(_))));
	}

	#[tokio::test]
	async fn test_unsubscribe_is_idempotent() {
		let bus = RealtimeBus::new();
		let (tx, _rx) = mpsc::channel(16);
		assert!(bus.subscribe(params("sub", "s1", DOC1, tx)).is_ok());
		bus.unsubscribe("sub", "s1");
		bus.unsubscribe("sub", "s1");
		bus.unsubscribe("nobody", "nothing");
		assert_eq!(bus.active_subscriptions(), 0);
	}

	#[tokio::test]
	async fn test_full_channel_drops_without_blocking() {
		let bus = RealtimeBus::new();
		let (tx, mut rx) = mpsc::channel(1);
		assert!(bus.subscribe(params("slow", "s1", DOC1, tx)).is_ok());

		bus.publish(EventType::Added, DOC1, Some(serde_json::json!({"v": 1})), None);
		// Channel is now full; this one is dropped for the subscriber
		bus.publish(EventType::Modified, DOC1, Some(serde_json::json!({"v": 2})), None);

		let first = rx.recv().await;
		assert_eq!(first.as_ref().map(|e| e.event_type), Some(EventType::Added));
		// Both events remain buffered for token-based recovery
		assert_eq!(bus.events_since(DOC1, "").len(), 2);
	}

	#[tokio::test]
	async fn test_cleanup_stale_connections() {
		let bus = RealtimeBus::new();
		let (tx, _rx) = mpsc::channel(16);
		assert!(bus.subscribe(params("sub", "s1", DOC1, tx)).is_ok());

		assert_eq!(bus.cleanup_stale_connections(Duration::from_secs(60)), 0);
		assert_eq!(bus.cleanup_stale_connections(Duration::from_secs(0)), 1);
		assert_eq!(bus.active_subscriptions(), 0);
	}

	#[tokio::test]
	async fn test_heartbeat_broadcast() {
		let bus = RealtimeBus::new();
		let (tx, mut rx) = mpsc::channel(16);
		assert!(bus.subscribe(params("sub", "s1", DOC1, tx)).is_ok());

		bus.send_heartbeat();
		let got = rx.recv().await;
		assert_eq!(got.map(|e| e.event_type), Some(EventType::Heartbeat));
	}
}

// vim: ts=4
