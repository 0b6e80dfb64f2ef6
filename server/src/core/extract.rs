//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};

use crate::prelude::*;
use crate::types::AuthContext;

/// Optional bearer identity. Missing or unverifiable tokens yield `None`
/// (anonymous); malformed Authorization headers are rejected.
pub struct MaybeAuth(pub Option<AuthContext>);

impl FromRequestParts<App> for MaybeAuth {
	type Rejection = Error;

	async fn from_request_parts(parts: &mut Parts, app: &App) -> Result<Self, Self::Rejection> {
		let Some(header) = parts.headers.get(header::AUTHORIZATION) else {
			return Ok(Self(None));
		};
		let value = header.to_str().map_err(|_| Error::Unauthenticated)?;
		let Some(token) = value.strip_prefix("Bearer ") else {
			return Err(Error::Unauthenticated);
		};
		let Some(secret) = &app.settings.jwt_secret else {
			// No verification key configured; treat callers as anonymous
			debug!("bearer token ignored: no JWT secret configured");
			return Ok(Self(None));
		};

		let mut validation = Validation::new(Algorithm::HS256);
		validation.validate_exp = false;
		validation.required_spec_claims.clear();
		let decoded = jsonwebtoken::decode::<serde_json::Value>(
			token,
			&DecodingKey::from_secret(secret.as_bytes()),
			&validation,
		)?;

		let claims = decoded.claims;
		let uid = claims
			.get("uid")
			.or_else(|| claims.get("sub"))
			.or_else(|| claims.get("user_id"))
			.and_then(|v| v.as_str())
			.ok_or(Error::Unauthenticated)?;
		Ok(Self(Some(AuthContext { uid: uid.into(), token: claims })))
	}
}

/// `X-Organization-ID` header, recorded on auto-created projects.
pub fn organization_id(parts: &axum::http::HeaderMap) -> Option<String> {
	parts
		.get("x-organization-id")
		.and_then(|v| v.to_str().ok())
		.map(ToString::to_string)
}

// vim: ts=4
