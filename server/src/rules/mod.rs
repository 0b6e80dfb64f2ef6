//! Security rules: parsing, translation, persistence, and evaluation.
//!
//! Deployment workflow: parse -> translate -> validate -> persist ->
//! invalidate cache. Rulesets persist per (project, database); a
//! translation cache keyed by (project, database, version, contentHash)
//! short-circuits repeated translations. An errorful parse blocks
//! deployment and surfaces the `ParseError{line, message}` list.

pub mod engine;
pub mod expr;
pub mod handler;
pub mod parser;
pub mod translate;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::prelude::*;
use crate::store_adapter::{ContainerRef, StoreAdapter};
use crate::tenancy::META_DATABASE;

pub use engine::{AccessDecision, AccessRequest};
pub use parser::ParseError;
pub use translate::{CompiledRule, RuleOp};

const RULES_CONTAINER: &str = "security_rules";
const RULESET_CACHE_SIZE: usize = 256;
const TRANSLATION_CACHE_SIZE: usize = 256;

/// A deployed, compiled ruleset.
pub struct RuleSet {
	pub version: Box<str>,
	pub content_hash: Box<str>,
	pub rules: Arc<Vec<CompiledRule>>,
}

/// Deployment outcome: either live, or rejected with diagnostics.
pub enum DeployResult {
	Deployed { version: Box<str>, content_hash: Box<str>, rule_count: usize },
	Rejected(Vec<ParseError>),
}

/// Persisted rules record.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RulesRecord {
	/// `{project}/{database}` composite key.
	#[serde(rename = "_id")]
	key: String,
	source: String,
	version: String,
	content_hash: String,
	updated_at: Timestamp,
}

pub struct RulesService {
	adapter: Arc<dyn StoreAdapter>,
	rulesets: Mutex<LruCache<Box<str>, Arc<RuleSet>>>,
	translations: Mutex<LruCache<Box<str>, Arc<Vec<CompiledRule>>>>,
}

impl RulesService {
	pub fn new(adapter: Arc<dyn StoreAdapter>) -> Self {
		let ruleset_cap = NonZeroUsize::new(RULESET_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
		let translation_cap =
			NonZeroUsize::new(TRANSLATION_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
		Self {
			adapter,
			rulesets: Mutex::new(LruCache::new(ruleset_cap)),
			translations: Mutex::new(LruCache::new(translation_cap)),
		}
	}

	/// Deploy rules source for a database: parse, translate, validate,
	/// persist, invalidate.
	pub async fn deploy(
		&self,
		project_id: &ProjectId,
		database_id: &DatabaseId,
		source: &str,
	) -> EbResult<DeployResult> {
		let file = match parser::parse_rules(source) {
			Ok(file) => file,
			Err(errors) => return Ok(DeployResult::Rejected(errors)),
		};
		let rules = translate::translate(&file);
		translate::validate_rules(&rules)?;

		let content_hash = content_hash(source);
		let record = RulesRecord {
			key: ruleset_key(project_id, database_id).to_string(),
			source: source.to_string(),
			version: file.version.to_string(),
			content_hash: content_hash.clone(),
			updated_at: Timestamp::now(),
		};
		let container = ContainerRef::new(META_DATABASE, RULES_CONTAINER);
		self.adapter
			.replace(&container, &record.key, bson::to_document(&record)?, true)
			.await?;

		let key = ruleset_key(project_id, database_id);
		let rules = Arc::new(rules);
		self.translations.lock().put(
			translation_key(project_id, database_id, &file.version, &content_hash),
			Arc::clone(&rules),
		);
		// Deploy invalidates; the next evaluation reloads
		self.rulesets.lock().pop(&key);

		info!(
			"deployed ruleset for {}/{} ({} rules, hash {})",
			project_id,
			database_id,
			rules.len(),
			content_hash
		);
		Ok(DeployResult::Deployed {
			version: file.version,
			content_hash: content_hash.into(),
			rule_count: rules.len(),
		})
	}

	/// Stored rules source, if any.
	pub async fn get_source(
		&self,
		project_id: &ProjectId,
		database_id: &DatabaseId,
	) -> EbResult<Option<String>> {
		let container = ContainerRef::new(META_DATABASE, RULES_CONTAINER);
		match self.adapter.get(&container, &ruleset_key(project_id, database_id)).await? {
			Some(doc) => {
				let record: RulesRecord = bson::from_document(doc)?;
				Ok(Some(record.source))
			}
			None => Ok(None),
		}
	}

	/// Load the compiled ruleset, cache-backed.
	pub async fn load(
		&self,
		project_id: &ProjectId,
		database_id: &DatabaseId,
	) -> EbResult<Option<Arc<RuleSet>>> {
		let key = ruleset_key(project_id, database_id);
		if let Some(cached) = self.rulesets.lock().get(&key) {
			return Ok(Some(Arc::clone(cached)));
		}

		let container = ContainerRef::new(META_DATABASE, RULES_CONTAINER);
		let Some(doc) = self.adapter.get(&container, &key).await? else {
			return Ok(None);
		};
		let record: RulesRecord = bson::from_document(doc)?;

		let tkey = translation_key(
			project_id,
			database_id,
			&record.version,
			&record.content_hash,
		);
		let rules = {
			let cached = self.translations.lock().get(&tkey).map(Arc::clone);
			match cached {
				Some(rules) => rules,
				None => {
					let file = parser::parse_rules(&record.source).map_err(|errors| {
						error!(
							"stored ruleset for {} no longer parses: {:?}",
							key, errors
						);
						Error::Internal("stored ruleset does not parse".into())
					})?;
					let rules = Arc::new(translate::translate(&file));
					self.translations.lock().put(tkey, Arc::clone(&rules));
					rules
				}
			}
		};

		let ruleset = Arc::new(RuleSet {
			version: record.version.into(),
			content_hash: record.content_hash.into(),
			rules,
		});
		self.rulesets.lock().put(key, Arc::clone(&ruleset));
		Ok(Some(ruleset))
	}

	/// Evaluate an access request. Databases without a deployed ruleset
	/// run open (the explicit default-deny starts with the first deploy).
	pub async fn authorize(
		&self,
		app: &App,
		request: &AccessRequest<'_>,
	) -> EbResult<AccessDecision> {
		match self.load(request.project_id, request.database_id).await? {
			Some(ruleset) => Ok(engine::evaluate(Some(app), &ruleset.rules, request).await),
			None => Ok(AccessDecision::Allowed { allowed_by: "open".into(), eval_ms: 0.0 }),
		}
	}

	/// Authorize or fail with `PermissionDenied`. Rule details are only
	/// reported to authenticated callers.
	pub async fn enforce(&self, app: &App, request: &AccessRequest<'_>) -> EbResult<()> {
		match self.authorize(app, request).await? {
			AccessDecision::Allowed { .. } => Ok(()),
			AccessDecision::Denied { denied_by, reason, eval_ms } => {
				debug!(
					"denied {} on /{} ({}ms): {}",
					request.op.as_str(),
					request.segments.join("/"),
					eval_ms,
					reason
				);
				if request.auth.is_some() {
					let rule_match = denied_by.as_deref().unwrap_or("-");
					Err(Error::PermissionDenied(format!(
						"ruleMatch={}: {}",
						rule_match, reason
					)))
				} else {
					Err(Error::PermissionDenied("permission denied".into()))
				}
			}
		}
	}
}

fn ruleset_key(project_id: &ProjectId, database_id: &DatabaseId) -> Box<str> {
	format!("{}/{}", project_id, database_id).into()
}

fn translation_key(
	project_id: &ProjectId,
	database_id: &DatabaseId,
	version: &str,
	content_hash: &str,
) -> Box<str> {
	format!("{}/{}@{}:{}", project_id, database_id, version, content_hash).into()
}

fn content_hash(source: &str) -> String {
	let mut hasher = Sha256::new();
	hasher.update(source.as_bytes());
	let digest = hasher.finalize();
	let mut out = String::with_capacity(64);
	for byte in digest {
		out.push_str(&format!("{:02x}", byte));
	}
	out
}


// vim: ts=4
