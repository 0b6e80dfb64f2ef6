//! Common types used throughout the engine.

use serde::{Deserialize, Serialize};

use crate::prelude::*;

// ProjectId //
//***********//

/// Validated project identifier: `[A-Za-z0-9_-]`, 1..=1500 chars.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ProjectId(Box<str>);

impl ProjectId {
	pub fn parse(s: &str) -> EbResult<Self> {
		if s.is_empty() || s.len() > 1500 {
			return Err(Error::InvalidArgument(format!(
				"invalid project id length: {}",
				s.len()
			)));
		}
		if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
			return Err(Error::InvalidArgument(format!("invalid project id: {}", s)));
		}
		Ok(ProjectId(s.into()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for ProjectId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl Serialize for ProjectId {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.0)
	}
}

impl<'de> Deserialize<'de> for ProjectId {
	fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		ProjectId::parse(&s).map_err(serde::de::Error::custom)
	}
}

// DatabaseId //
//************//

/// Database identifier within a project. The empty string normalizes to the
/// reserved default id `(default)`.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct DatabaseId(Box<str>);

pub const DEFAULT_DATABASE_ID: &str = "(default)";

impl DatabaseId {
	pub fn parse(s: &str) -> EbResult<Self> {
		if s.is_empty() {
			return Ok(DatabaseId(DEFAULT_DATABASE_ID.into()));
		}
		if s == DEFAULT_DATABASE_ID {
			return Ok(DatabaseId(s.into()));
		}
		if s.len() > 64 || !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
			return Err(Error::InvalidArgument(format!("invalid database id: {}", s)));
		}
		Ok(DatabaseId(s.into()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn is_default(&self) -> bool {
		self.0.as_ref() == DEFAULT_DATABASE_ID
	}
}

impl std::fmt::Display for DatabaseId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl Serialize for DatabaseId {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.0)
	}
}

impl<'de> Deserialize<'de> for DatabaseId {
	fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		DatabaseId::parse(&s).map_err(serde::de::Error::custom)
	}
}

// Timestamp //
//***********//

/// UTC wall-clock timestamp, RFC 3339 on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(pub chrono::DateTime<chrono::Utc>);

impl Timestamp {
	/// Current wall time, truncated to millisecond precision so values
	/// survive the backend's datetime representation unchanged.
	pub fn now() -> Timestamp {
		let now = chrono::Utc::now();
		Timestamp(
			chrono::DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now),
		)
	}

	pub fn to_rfc3339(&self) -> String {
		self.0.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
	}

	pub fn parse_rfc3339(s: &str) -> EbResult<Timestamp> {
		let dt = chrono::DateTime::parse_from_rfc3339(s)
			.map_err(|_| Error::InvalidArgument(format!("invalid timestamp: {}", s)))?;
		Ok(Timestamp(dt.with_timezone(&chrono::Utc)))
	}

	pub fn to_bson(&self) -> bson::Bson {
		bson::Bson::DateTime(bson::DateTime::from_chrono(self.0))
	}

	pub fn from_bson_datetime(dt: bson::DateTime) -> Timestamp {
		Timestamp(dt.to_chrono())
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.to_rfc3339())
	}
}

impl Serialize for Timestamp {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_rfc3339())
	}
}

impl<'de> Deserialize<'de> for Timestamp {
	fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		Timestamp::parse_rfc3339(&s).map_err(serde::de::Error::custom)
	}
}

// AuthContext //
//*************//

/// Authenticated caller identity decoded from the bearer JWT.
/// Absent for anonymous requests (`auth` is null in rules evaluation).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
	pub uid: Box<str>,
	/// Remaining token claims, exposed to rules as `auth.token`.
	#[serde(default)]
	pub token: serde_json::Value,
}

// ErrorResponse //
//***************//

/// JSON error body: `{"error": {"code": 404, "status": "NOT_FOUND", "message": "..."}}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
	pub error: ErrorBody,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
	pub code: u16,
	pub status: String,
	pub message: String,
}

impl ErrorResponse {
	pub fn new(code: u16, status: impl Into<String>, message: impl Into<String>) -> Self {
		Self { error: ErrorBody { code, status: status.into(), message: message.into() } }
	}
}


// vim: ts=4
