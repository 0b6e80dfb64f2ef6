//! Access evaluation.
//!
//! For a request, the applicable rules are the ones whose pattern unifies
//! with the request path (binding pattern variables). They evaluate highest
//! priority first; within a rule the deny expression for the operation runs
//! before the allow expression, so deny dominates allow on the same match.
//! When no rule concludes, the request is denied.

use serde_json::Value as Json;
use std::collections::HashMap;
use std::time::Instant;

use crate::prelude::*;
use crate::types::AuthContext;

use super::expr::EvalContext;
use super::parser::PatternSegment;
use super::translate::{CompiledRule, RuleOp};

/// One access request against a (project, database).
pub struct AccessRequest<'a> {
	pub project_id: &'a ProjectId,
	pub database_id: &'a DatabaseId,
	/// Path segments relative to the documents root.
	pub segments: Vec<Box<str>>,
	pub op: RuleOp,
	pub auth: Option<&'a AuthContext>,
	/// Plain data of the existing stored document, when loaded.
	pub resource_data: Option<Json>,
	/// Plain incoming data for create/update requests.
	pub request_data: Option<Json>,
}

/// Evaluation outcome, with timing for observability.
#[derive(Clone, Debug)]
pub enum AccessDecision {
	Allowed { allowed_by: Box<str>, eval_ms: f64 },
	Denied { denied_by: Option<Box<str>>, reason: Box<str>, eval_ms: f64 },
}

impl AccessDecision {
	pub fn is_allowed(&self) -> bool {
		matches!(self, AccessDecision::Allowed { .. })
	}
}

/// Evaluate a request against a prioritized rule list.
pub async fn evaluate(
	app: Option<&App>,
	rules: &[CompiledRule],
	request: &AccessRequest<'_>,
) -> AccessDecision {
	let started = Instant::now();

	// Rules match against databases/{db}/documents/<segments>
	let mut path: Vec<Box<str>> = Vec::with_capacity(request.segments.len() + 3);
	path.push("databases".into());
	path.push(request.database_id.as_str().into());
	path.push("documents".into());
	path.extend(request.segments.iter().cloned());

	let auth_json = match request.auth {
		Some(auth) => serde_json::json!({ "uid": auth.uid, "token": auth.token }),
		None => Json::Null,
	};
	let resource = match &request.resource_data {
		Some(data) => serde_json::json!({ "data": data }),
		None => Json::Null,
	};
	let request_json = serde_json::json!({
		"auth": auth_json,
		"time": Timestamp::now().to_rfc3339(),
		"data": request.request_data.clone().unwrap_or(Json::Null),
		"resource": { "data": request.request_data.clone().unwrap_or(Json::Null) },
	});

	let mut failed_allow: Option<Box<str>> = None;
	for rule in rules {
		let Some(bindings) = match_pattern(&rule.pattern, &path) else { continue };
		let ctx = EvalContext {
			app,
			project_id: request.project_id,
			auth: auth_json.clone(),
			bindings: &bindings,
			resource: resource.clone(),
			request: request_json.clone(),
		};

		if let Some(deny) = rule.deny.get(&request.op) {
			if ctx.eval_truthy(deny).await {
				return AccessDecision::Denied {
					denied_by: Some(rule.source_pattern.clone()),
					reason: format!(
						"deny rule for '{}' matched at {}",
						request.op.as_str(),
						rule.source_pattern
					)
					.into(),
					eval_ms: elapsed_ms(started),
				};
			}
		}
		if let Some(allow) = rule.allow.get(&request.op) {
			if ctx.eval_truthy(allow).await {
				return AccessDecision::Allowed {
					allowed_by: rule.source_pattern.clone(),
					eval_ms: elapsed_ms(started),
				};
			}
			failed_allow.get_or_insert_with(|| rule.source_pattern.clone());
		}
	}

	// Default deny
	let reason = match &failed_allow {
		Some(pattern) => {
			format!("allow expression for '{}' evaluated to false at {}", request.op.as_str(), pattern)
		}
		None => format!("no rule allows '{}'", request.op.as_str()),
	};
	AccessDecision::Denied {
		denied_by: failed_allow,
		reason: reason.into(),
		eval_ms: elapsed_ms(started),
	}
}

/// Unify a pattern with a concrete path, binding variables. A recursive
/// wildcard binds the (possibly empty) remaining path.
pub fn match_pattern(
	pattern: &[PatternSegment],
	path: &[Box<str>],
) -> Option<HashMap<Box<str>, Json>> {
	let mut bindings = HashMap::new();
	let mut i = 0;
	for (p, segment) in pattern.iter().enumerate() {
		match segment {
			PatternSegment::RecursiveVariable(name) => {
				// Must be last; binds everything left
				if p != pattern.len() - 1 {
					return None;
				}
				let rest: Vec<&str> = path[i..].iter().map(AsRef::as_ref).collect();
				bindings.insert(name.clone(), Json::String(rest.join("/")));
				return Some(bindings);
			}
			PatternSegment::Literal(expected) => {
				if path.get(i).map(AsRef::as_ref) != Some(expected.as_ref()) {
					return None;
				}
				i += 1;
			}
			PatternSegment::Variable(name) => {
				let value = path.get(i)?;
				bindings.insert(name.clone(), Json::String(value.to_string()));
				i += 1;
			}
		}
	}
	if i == path.len() { Some(bindings) } else { None }
}

fn elapsed_ms(started: Instant) -> f64 {
	started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::rules::parser::parse_rules;
	use crate::rules::translate::translate;

	fn rules(source: &str) -> Vec<CompiledRule> {
		match parse_rules(source) {
			Ok(file) => translate(&file),
			Err(errors) => panic!("parse failed: {:?}", errors),
		}
	}

	fn ids() -> (ProjectId, DatabaseId) {
		let project = match ProjectId::parse("p1") {
			Ok(p) => p,
			Err(err) => panic!("bad project id: {}", err),
		};
		let database = match DatabaseId::parse("") {
			Ok(d) => d,
			Err(err) => panic!("bad database id: {}", err),
		};
		(project, database)
	}

	fn auth(uid: &str) -> AuthContext {
		AuthContext { uid: uid.into(), token: Json::Null }
	}

	fn request<'a>(
		project: &'a ProjectId,
		database: &'a DatabaseId,
		segments: &[&str],
		op: RuleOp,
		auth: Option<&'a AuthContext>,
	) -> AccessRequest<'a> {
		AccessRequest {
			project_id: project,
			database_id: database,
			segments: segments.iter().map(|s| Box::from(*s)).collect(),
			op,
			auth,
			resource_data: None,
			request_data: None,
		}
	}

	const OWNER_RULES: &str = r"
rules_version = '2';
service cloud.firestore {
	match /databases/{database}/documents {
		match /users/{uid} {
			allow read: if auth.uid == uid;
		}
	}
}
";

	#[tokio::test]
	async fn test_owner_can_read_own_document() {
		let compiled = rules(OWNER_RULES);
		let (project, database) = ids();
		let caller = auth("u1");
		let decision = evaluate(
			None,
			&compiled,
			&request(&project, &database, &["users", "u1"], RuleOp::Read, Some(&caller)),
		)
		.await;
		assert!(decision.is_allowed());
	}

	#[tokio::test]
	async fn test_other_user_is_denied_with_rule_match() {
		let compiled = rules(OWNER_RULES);
		let (project, database) = ids();
		let caller = auth("u2");
		let decision = evaluate(
			None,
			&compiled,
			&request(&project, &database, &["users", "u1"], RuleOp::Read, Some(&caller)),
		)
		.await;
		match decision {
			AccessDecision::Denied { denied_by, reason, eval_ms } => {
				assert_eq!(denied_by.as_deref(), Some("/users/{uid}"));
				assert!(reason.contains("allow expression"));
				assert!(eval_ms >= 0.0);
			}
			AccessDecision::Allowed { .. } => panic!("expected denial"),
		}
	}

	#[tokio::test]
	async fn test_deny_dominates_allow_at_higher_priority() {
		// The deny carries more literal segments, so it outranks the broad
		// allow and wins
		let compiled = rules(r"
rules_version = '2';
service cloud.firestore {
	match /databases/{db}/documents {
		match /admin/secrets/{doc} {
			deny read: if true;
		}
		match /{document=**} {
			allow read: if true;
		}
	}
}
");
		let (project, database) = ids();
		let caller = auth("u1");

		let denied = evaluate(
			None,
			&compiled,
			&request(
				&project,
				&database,
				&["admin", "secrets", "s1"],
				RuleOp::Read,
				Some(&caller),
			),
		)
		.await;
		assert!(!denied.is_allowed());

		let allowed = evaluate(
			None,
			&compiled,
			&request(&project, &database, &["public", "x"], RuleOp::Read, Some(&caller)),
		)
		.await;
		assert!(allowed.is_allowed());
	}

	#[tokio::test]
	async fn test_unmatched_path_defaults_to_deny() {
		let compiled = rules(OWNER_RULES);
		let (project, database) = ids();
		let caller = auth("u1");
		let decision = evaluate(
			None,
			&compiled,
			&request(&project, &database, &["orders", "o1"], RuleOp::Read, Some(&caller)),
		)
		.await;
		match decision {
			AccessDecision::Denied { denied_by, .. } => assert!(denied_by.is_none()),
			AccessDecision::Allowed { .. } => panic!("expected default deny"),
		}
	}

	#[tokio::test]
	async fn test_write_expansion_covers_delete() {
		let compiled = rules(r"
rules_version = '2';
service cloud.firestore {
	match /databases/{db}/documents {
		match /notes/{note} {
			allow write: if auth.uid == 'editor';
		}
	}
}
");
		let (project, database) = ids();
		let editor = auth("editor");
		let decision = evaluate(
			None,
			&compiled,
			&request(&project, &database, &["notes", "n1"], RuleOp::Delete, Some(&editor)),
		)
		.await;
		assert!(decision.is_allowed());
	}

	#[test]
	fn test_match_pattern_bindings() {
		let compiled = rules(OWNER_RULES);
		let path: Vec<Box<str>> = ["databases", "(default)", "documents", "users", "u7"]
			.iter()
			.map(|s| Box::from(*s))
			.collect();
		let bindings = match_pattern(&compiled[0].pattern, &path);
		assert_eq!(
			bindings.and_then(|b| b.get("uid").cloned()),
			Some(Json::String("u7".to_string()))
		);
	}
}

// vim: ts=4
