//! Error handling subsystem. Implements the engine-wide Error type.
//!
//! The taxonomy is transport-neutral; the `IntoResponse` impl maps it onto
//! HTTP for the JSON surface. Server-side failures (5xx) never expose their
//! message to the caller.

use axum::{Json, http::StatusCode, response::IntoResponse};

use crate::prelude::*;
use crate::types::ErrorResponse;

pub type EbResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	// Request validation
	InvalidArgument(String), // 400 - malformed path, bad mask, type mismatch, limits
	FailedPrecondition(String), // 400 - unaddressable mask path, stale transaction

	// Resource state
	NotFound(String),      // 404 - project/database/collection/document absent
	AlreadyExists(String), // 409 - create-on-existing, duplicate subscription
	Aborted(String),       // 409 - transaction conflict, retryable

	// Access
	Unauthenticated,          // 401 - missing/invalid bearer
	PermissionDenied(String), // 403 - rules evaluation denied

	// Capacity
	ResourceExhausted(String), // 429 - subscription cap reached

	// System
	Store(String),    // backend document store failure
	Parse(String),    // serialization/deserialization failure
	Internal(String), // internal invariant violations, for debugging
	Timeout,

	// externals
	Io(std::io::Error),
}

impl Error {
	/// Canonical status name carried on the wire (vendor-compatible).
	pub fn status(&self) -> &'static str {
		match self {
			Error::InvalidArgument(_) => "INVALID_ARGUMENT",
			Error::FailedPrecondition(_) => "FAILED_PRECONDITION",
			Error::NotFound(_) => "NOT_FOUND",
			Error::AlreadyExists(_) => "ALREADY_EXISTS",
			Error::Aborted(_) => "ABORTED",
			Error::Unauthenticated => "UNAUTHENTICATED",
			Error::PermissionDenied(_) => "PERMISSION_DENIED",
			Error::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
			Error::Timeout => "DEADLINE_EXCEEDED",
			Error::Store(_) | Error::Parse(_) | Error::Internal(_) | Error::Io(_) => "INTERNAL",
		}
	}

	/// Numeric code matching the status, as used in the error JSON body.
	pub fn code(&self) -> u16 {
		match self {
			Error::InvalidArgument(_) | Error::FailedPrecondition(_) => 400,
			Error::Unauthenticated => 401,
			Error::PermissionDenied(_) => 403,
			Error::NotFound(_) => 404,
			Error::AlreadyExists(_) | Error::Aborted(_) => 409,
			Error::ResourceExhausted(_) => 429,
			Error::Timeout => 504,
			Error::Store(_) | Error::Parse(_) | Error::Internal(_) | Error::Io(_) => 500,
		}
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		warn!("io error: {}", err);
		Self::Io(err)
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		warn!("json error: {}", err);
		Error::Parse(format!("invalid JSON: {}", err))
	}
}

impl From<bson::ser::Error> for Error {
	fn from(err: bson::ser::Error) -> Self {
		warn!("bson encode error: {}", err);
		Error::Parse("BSON encoding failed".into())
	}
}

impl From<bson::de::Error> for Error {
	fn from(err: bson::de::Error) -> Self {
		warn!("bson decode error: {}", err);
		Error::Parse("BSON decoding failed".into())
	}
}

impl From<tokio::task::JoinError> for Error {
	fn from(err: tokio::task::JoinError) -> Self {
		warn!("tokio join error: {}", err);
		Error::Internal("task execution failed".into())
	}
}

impl From<jsonwebtoken::errors::Error> for Error {
	fn from(err: jsonwebtoken::errors::Error) -> Self {
		warn!("jwt error: {}", err);
		Error::Unauthenticated
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Error::InvalidArgument(msg)
			| Error::FailedPrecondition(msg)
			| Error::NotFound(msg)
			| Error::AlreadyExists(msg)
			| Error::Aborted(msg)
			| Error::PermissionDenied(msg)
			| Error::ResourceExhausted(msg)
			| Error::Store(msg)
			| Error::Parse(msg)
			| Error::Internal(msg) => write!(f, "{}: {}", self.status(), msg),
			Error::Unauthenticated | Error::Timeout => write!(f, "{}", self.status()),
			Error::Io(err) => write!(f, "INTERNAL: {}", err),
		}
	}
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
	fn into_response(self) -> axum::response::Response {
		let code = self.code();
		let status_name = self.status();
		let message = match self {
			Error::InvalidArgument(msg)
			| Error::FailedPrecondition(msg)
			| Error::NotFound(msg)
			| Error::AlreadyExists(msg)
			| Error::Aborted(msg)
			| Error::PermissionDenied(msg)
			| Error::ResourceExhausted(msg) => msg,
			Error::Unauthenticated => "Authentication required or invalid token".to_string(),
			Error::Timeout => "Request timeout".to_string(),
			// Server errors (5xx) - no message exposure for security
			Error::Store(msg) => {
				warn!("store error: {}", msg);
				"Internal server error".to_string()
			}
			Error::Parse(msg) => {
				warn!("parse error: {}", msg);
				"Internal server error".to_string()
			}
			Error::Internal(msg) => {
				warn!("internal error: {}", msg);
				"Internal server error".to_string()
			}
			Error::Io(err) => {
				warn!("io error: {}", err);
				"Internal server error".to_string()
			}
		};

		let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
		(status, Json(ErrorResponse::new(code, status_name, message))).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_status_names_match_codes() {
		assert_eq!(Error::InvalidArgument("x".into()).code(), 400);
		assert_eq!(Error::InvalidArgument("x".into()).status(), "INVALID_ARGUMENT");
		assert_eq!(Error::NotFound("x".into()).code(), 404);
		assert_eq!(Error::Aborted("x".into()).code(), 409);
		assert_eq!(Error::Aborted("x".into()).status(), "ABORTED");
		assert_eq!(Error::ResourceExhausted("x".into()).code(), 429);
		assert_eq!(Error::Store("x".into()).status(), "INTERNAL");
	}

	#[test]
	fn test_display_includes_status() {
		let err = Error::PermissionDenied("no read access".into());
		assert_eq!(err.to_string(), "PERMISSION_DENIED: no read access");
	}
}

// vim: ts=4
