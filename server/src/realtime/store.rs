//! Per-path event ring buffers.
//!
//! Each path keeps its most recent events (bounded, FIFO eviction) so
//! clients can replay everything after a resume token. The store owns the
//! events; subscribers only ever see clones.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

use super::RealtimeEvent;

/// Maximum buffered events per path; overflow evicts oldest first.
pub const EVENT_BUFFER_CAPACITY: usize = 1000;

#[derive(Debug, Default)]
pub struct EventStore {
	buffers: RwLock<HashMap<Box<str>, VecDeque<RealtimeEvent>>>,
}

impl EventStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Append an event to its path's ring buffer.
	pub fn push(&self, event: RealtimeEvent) {
		let mut buffers = self.buffers.write();
		let buffer = buffers.entry(event.full_path.clone()).or_default();
		if buffer.len() >= EVENT_BUFFER_CAPACITY {
			buffer.pop_front();
		}
		buffer.push_back(event);
	}

	/// Buffered events for `path` with resume token strictly greater than
	/// `token`. An empty token returns everything buffered.
	pub fn events_since(&self, path: &str, token: &str) -> Vec<RealtimeEvent> {
		let buffers = self.buffers.read();
		match buffers.get(path) {
			Some(buffer) => buffer
				.iter()
				.filter(|event| event.resume_token.as_ref() > token)
				.cloned()
				.collect(),
			None => Vec::new(),
		}
	}

	/// Number of buffered events for a path.
	pub fn len(&self, path: &str) -> usize {
		self.buffers.read().get(path).map_or(0, VecDeque::len)
	}

	pub fn is_empty(&self, path: &str) -> bool {
		self.len(path) == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::realtime::EventType;

	fn event(path: &str, seq: u64) -> RealtimeEvent {
		RealtimeEvent {
			event_type: EventType::Added,
			full_path: path.into(),
			data: None,
			old_data: None,
			sequence: seq,
			resume_token: format!("{:020}", seq).into(),
			timestamp: None,
		}
	}

	#[test]
	fn test_events_since_is_strictly_greater() {
		let store = EventStore::new();
		for seq in 1..=5 {
			store.push(event("p", seq));
		}
		let replayed = store.events_since("p", &format!("{:020}", 3));
		let sequences: Vec<u64> = replayed.iter().map(|e| e.sequence).collect();
		assert_eq!(sequences, vec![4, 5]);

		assert_eq!(store.events_since("p", "").len(), 5);
		assert!(store.events_since("other", "").is_empty());
	}

	#[test]
	fn test_ring_buffer_evicts_oldest() {
		let store = EventStore::new();
		for seq in 1..=(EVENT_BUFFER_CAPACITY as u64 + 10) {
			store.push(event("p", seq));
		}
		assert_eq!(store.len("p"), EVENT_BUFFER_CAPACITY);
		let all = store.events_since("p", "");
		assert_eq!(all.first().map(|e| e.sequence), Some(11));
		assert_eq!(all.last().map(|e| e.sequence), Some(EVENT_BUFFER_CAPACITY as u64 + 10));
	}
}

// vim: ts=4
