//! Emberbase: a wire-compatible document database engine.
//!
//! The engine is layered: the path router resolves wire paths into
//! structured identity, the rules engine authorizes, and the operation
//! layer executes against a pluggable document store, emitting change
//! events to the realtime bus. Backends implement
//! [`store_adapter::StoreAdapter`]; the binary wires one up and calls
//! [`run`].

pub mod core;
pub mod document;
pub mod error;
pub mod path;
pub mod prelude;
pub mod query;
pub mod realtime;
pub mod routes;
pub mod rules;
pub mod store_adapter;
pub mod tenancy;
pub mod types;
pub mod value;
pub mod writes;

use std::sync::Arc;
use std::time::Duration;

use crate::core::app::AppState;
use crate::core::settings::Settings;
use crate::prelude::*;
use crate::store_adapter::StoreAdapter;

pub struct EmberbaseOpts {
	pub store_adapter: Arc<dyn StoreAdapter>,
	pub settings: Settings,
}

/// Build the application state without serving (tests, embedding).
pub fn build_app(opts: EmberbaseOpts) -> App {
	AppState::build(opts.store_adapter, opts.settings)
}

/// Run the engine: HTTP + WebSocket surface, heartbeats, and the
/// stale-subscription / idle-transaction reaper.
pub async fn run(opts: EmberbaseOpts) -> EbResult<()> {
	let app = build_app(opts);

	spawn_heartbeat_task(&app);
	spawn_reaper_task(&app);

	let router = routes::init_routes(app.clone());
	let listener = tokio::net::TcpListener::bind(app.settings.listen.as_ref()).await?;
	info!("emberbase {} listening on {}", core::app::VERSION, app.settings.listen);
	axum::serve(listener, router).await?;
	Ok(())
}

fn spawn_heartbeat_task(app: &App) {
	let app = app.clone();
	let interval = Duration::from_secs(app.settings.heartbeat_interval_secs.max(1));
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(interval);
		loop {
			ticker.tick().await;
			app.bus.send_heartbeat();
		}
	});
}

fn spawn_reaper_task(app: &App) {
	let app = app.clone();
	let interval = Duration::from_secs(app.settings.reap_interval_secs.max(1));
	let stale_timeout = Duration::from_secs(app.settings.stale_timeout_secs);
	let txn_timeout = Duration::from_secs(app.settings.txn_idle_timeout_secs);
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(interval);
		loop {
			ticker.tick().await;
			let reaped = app.bus.cleanup_stale_connections(stale_timeout);
			let expired = app.transactions.expire_idle(txn_timeout);
			if reaped > 0 || expired > 0 {
				debug!("reaper: {} subscriptions, {} transactions", reaped, expired);
			}
		}
	});
}

// vim: ts=4
