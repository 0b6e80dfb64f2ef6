//! Environment-driven engine settings.

use crate::tenancy::NamingStrategy;

/// Engine settings with hosted-service defaults. Every knob reads from the
/// environment once at startup.
#[derive(Clone, Debug)]
pub struct Settings {
	/// HTTP/WebSocket listen address (`EMBERBASE_LISTEN`).
	pub listen: Box<str>,
	/// Backend DSN (`MONGODB_URI`).
	pub store_uri: Box<str>,
	/// Metadata database name override (`DATABASE_NAME`).
	pub meta_database: Option<Box<str>>,
	/// Reject writes to non-existent parents instead of auto-creating them
	/// (`EMBERBASE_STRICT`).
	pub strict_mode: bool,
	/// Container naming strategy (`EMBERBASE_NAMING`: `direct` | `optimized`).
	pub naming_strategy: NamingStrategy,
	/// HMAC secret for bearer JWT verification (`EMBERBASE_JWT_SECRET`).
	/// Unset means unauthenticated requests only carry `auth = null`.
	pub jwt_secret: Option<Box<str>>,
	/// Realtime heartbeat broadcast interval, seconds.
	pub heartbeat_interval_secs: u64,
	/// Subscriptions without a heartbeat for this long are reaped.
	pub stale_timeout_secs: u64,
	/// Reaper period, seconds.
	pub reap_interval_secs: u64,
	/// Idle transactions expire after this long.
	pub txn_idle_timeout_secs: u64,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			listen: "127.0.0.1:8080".into(),
			store_uri: "mongodb://127.0.0.1:27017".into(),
			meta_database: None,
			strict_mode: false,
			naming_strategy: NamingStrategy::Direct,
			jwt_secret: None,
			heartbeat_interval_secs: 30,
			stale_timeout_secs: 300,
			reap_interval_secs: 60,
			txn_idle_timeout_secs: 60,
		}
	}
}

impl Settings {
	pub fn from_env() -> Self {
		let defaults = Self::default();
		Self {
			listen: env_or("EMBERBASE_LISTEN", &defaults.listen),
			store_uri: env_or("MONGODB_URI", &defaults.store_uri),
			meta_database: std::env::var("DATABASE_NAME").ok().map(Into::into),
			strict_mode: env_flag("EMBERBASE_STRICT"),
			naming_strategy: match std::env::var("EMBERBASE_NAMING").as_deref() {
				Ok("optimized") => NamingStrategy::OptimizedPrefix,
				_ => NamingStrategy::Direct,
			},
			jwt_secret: std::env::var("EMBERBASE_JWT_SECRET").ok().map(Into::into),
			heartbeat_interval_secs: env_u64(
				"EMBERBASE_HEARTBEAT_SECS",
				defaults.heartbeat_interval_secs,
			),
			stale_timeout_secs: env_u64("EMBERBASE_STALE_SECS", defaults.stale_timeout_secs),
			reap_interval_secs: env_u64("EMBERBASE_REAP_SECS", defaults.reap_interval_secs),
			txn_idle_timeout_secs: env_u64(
				"EMBERBASE_TXN_IDLE_SECS",
				defaults.txn_idle_timeout_secs,
			),
		}
	}
}

fn env_or(name: &str, default: &str) -> Box<str> {
	std::env::var(name).map_or_else(|_| default.into(), Into::into)
}

fn env_flag(name: &str) -> bool {
	matches!(std::env::var(name).as_deref(), Ok("1") | Ok("true") | Ok("yes"))
}

fn env_u64(name: &str, default: u64) -> u64 {
	std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

// vim: ts=4
