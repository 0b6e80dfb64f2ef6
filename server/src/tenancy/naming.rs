//! Physical naming strategies.
//!
//! Tenancy lives in physical names, never in document ids: each
//! (organization, project, database) triple maps to one backend database,
//! and each logical collection path maps to one container inside it. Both
//! derivations are pure functions so backups and ACLs line up with physical
//! namespaces.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{DatabaseId, ProjectId};

/// Backend database names must stay short; longer derivations fall back to
/// a digest.
const MAX_DATABASE_NAME_LEN: usize = 60;
const MAX_CONTAINER_NAME_LEN: usize = 200;

/// Container naming strategy for logical collections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NamingStrategy {
	/// `docs_{project}_{database}_{collectionPath}` with path separators
	/// flattened. Readable, but repeats the tenant prefix per container.
	#[default]
	Direct,
	/// Digest-prefixed short names: `c{digest12}_{lastSegment}`. Keeps
	/// namespaces within backend length limits for deep subcollections.
	OptimizedPrefix,
}

impl NamingStrategy {
	/// Derive the physical container name for a logical collection path.
	/// Pure function of the (project, database, collectionPath) triple.
	pub fn container_name(
		&self,
		project_id: &ProjectId,
		database_id: &DatabaseId,
		collection_path: &str,
	) -> String {
		match self {
			NamingStrategy::Direct => {
				let name = format!(
					"docs_{}_{}_{}",
					sanitize(project_id.as_str()),
					database_label(database_id),
					sanitize(collection_path)
				);
				if name.len() <= MAX_CONTAINER_NAME_LEN {
					name
				} else {
					digest_container(project_id, database_id, collection_path)
				}
			}
			NamingStrategy::OptimizedPrefix => {
				digest_container(project_id, database_id, collection_path)
			}
		}
	}
}

/// Derive the physical database name for a tenant.
pub fn physical_database(
	organization_id: Option<&str>,
	project_id: &ProjectId,
	database_id: &DatabaseId,
) -> String {
	let name = match organization_id {
		Some(org) if !org.is_empty() => format!(
			"ebdb_{}_{}_{}",
			sanitize(org),
			sanitize(project_id.as_str()),
			database_label(database_id)
		),
		_ => format!("ebdb_{}_{}", sanitize(project_id.as_str()), database_label(database_id)),
	};
	if name.len() <= MAX_DATABASE_NAME_LEN {
		name
	} else {
		let mut hasher = Sha256::new();
		hasher.update(organization_id.unwrap_or_default().as_bytes());
		hasher.update(b"/");
		hasher.update(project_id.as_str().as_bytes());
		hasher.update(b"/");
		hasher.update(database_id.as_str().as_bytes());
		format!("ebdb_{}", hex_prefix(&hasher.finalize(), 24))
	}
}

fn digest_container(
	project_id: &ProjectId,
	database_id: &DatabaseId,
	collection_path: &str,
) -> String {
	let mut hasher = Sha256::new();
	hasher.update(project_id.as_str().as_bytes());
	hasher.update(b"/");
	hasher.update(database_id.as_str().as_bytes());
	hasher.update(b"/");
	hasher.update(collection_path.as_bytes());
	let digest = hex_prefix(&hasher.finalize(), 12);

	let last = collection_path.rsplit('/').next().unwrap_or(collection_path);
	let mut suffix = sanitize(last);
	suffix.truncate(40);
	format!("c{}_{}", digest, suffix)
}

/// `(default)` is not a legal backend name component.
fn database_label(database_id: &DatabaseId) -> String {
	if database_id.is_default() { "default".to_string() } else { sanitize(database_id.as_str()) }
}

fn sanitize(s: &str) -> String {
	s.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}

fn hex_prefix(digest: &[u8], len: usize) -> String {
	let mut out = String::with_capacity(len);
	for byte in digest {
		out.push_str(&format!("{:02x}", byte));
		if out.len() >= len {
			break;
		}
	}
	out.truncate(len);
	out
}


// vim: ts=4
