//! Resource path router.
//!
//! Parses the canonical wire path
//! `projects/{project}/databases/{database}/documents/{c1}/{d1}/...` into a
//! structured identity. This is the only place that understands the wire
//! path shape; everything downstream works on `ResourcePath` values.
//!
//! Segments after `documents/` alternate collection/document. An even,
//! non-zero segment count addresses a document; an odd count addresses a
//! collection; zero segments address the database documents root.

use crate::prelude::*;

/// Maximum length of a single path segment (document or collection id).
const MAX_SEGMENT_LEN: usize = 1500;

/// Structured identity of a document, collection, or documents-root path.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ResourcePath {
	project_id: ProjectId,
	database_id: DatabaseId,
	segments: Vec<Box<str>>,
}

impl ResourcePath {
	/// Parse a full resource path. Rejects malformed paths with
	/// `InvalidArgument`.
	pub fn parse(path: &str) -> EbResult<Self> {
		let mut parts = path.split('/');

		match parts.next() {
			Some("projects") => {}
			_ => {
				return Err(Error::InvalidArgument(format!(
					"path must start with 'projects/': {}",
					path
				)));
			}
		}
		let project_id = ProjectId::parse(
			parts.next().ok_or_else(|| Error::InvalidArgument("missing project id".into()))?,
		)?;

		match parts.next() {
			Some("databases") => {}
			_ => {
				return Err(Error::InvalidArgument(format!(
					"expected 'databases' segment: {}",
					path
				)));
			}
		}
		let database_id = DatabaseId::parse(
			parts.next().ok_or_else(|| Error::InvalidArgument("missing database id".into()))?,
		)?;

		match parts.next() {
			Some("documents") => {}
			None => {
				// Bare database path: projects/P/databases/D
				return Ok(Self { project_id, database_id, segments: Vec::new() });
			}
			_ => {
				return Err(Error::InvalidArgument(format!(
					"expected 'documents' segment: {}",
					path
				)));
			}
		}

		let mut segments = Vec::new();
		for segment in parts {
			validate_segment(segment)?;
			segments.push(segment.into());
		}

		Ok(Self { project_id, database_id, segments })
	}

	/// Build a path from parts. Segments are validated.
	pub fn from_segments(
		project_id: ProjectId,
		database_id: DatabaseId,
		segments: impl IntoIterator<Item = impl AsRef<str>>,
	) -> EbResult<Self> {
		let mut validated = Vec::new();
		for segment in segments {
			validate_segment(segment.as_ref())?;
			validated.push(segment.as_ref().into());
		}
		Ok(Self { project_id, database_id, segments: validated })
	}

	/// The documents root of a database.
	pub fn root(project_id: ProjectId, database_id: DatabaseId) -> Self {
		Self { project_id, database_id, segments: Vec::new() }
	}

	pub fn project_id(&self) -> &ProjectId {
		&self.project_id
	}

	pub fn database_id(&self) -> &DatabaseId {
		&self.database_id
	}

	pub fn segments(&self) -> &[Box<str>] {
		&self.segments
	}

	/// True iff the path addresses a document (even segment count, >= 2).
	pub fn is_document(&self) -> bool {
		!self.segments.is_empty() && self.segments.len() % 2 == 0
	}

	/// True iff the path addresses a collection (odd segment count).
	pub fn is_collection(&self) -> bool {
		self.segments.len() % 2 == 1
	}

	/// True iff the path is the documents root of a database.
	pub fn is_root(&self) -> bool {
		self.segments.is_empty()
	}

	/// Canonical wire form. `format(parse(p)) == p` for every legal `p`
	/// containing a `documents` component.
	pub fn format(&self) -> String {
		let mut out = format!(
			"projects/{}/databases/{}/documents",
			self.project_id, self.database_id
		);
		for segment in &self.segments {
			out.push('/');
			out.push_str(segment);
		}
		out
	}

	/// Slash-joined segments relative to the documents root.
	pub fn relative_path(&self) -> String {
		self.segments.join("/")
	}

	/// The logical collection path: for a collection this is all segments,
	/// for a document it is the parent collection's segments.
	pub fn collection_path(&self) -> EbResult<String> {
		if self.is_collection() {
			Ok(self.segments.join("/"))
		} else if self.is_document() {
			Ok(self.segments[..self.segments.len() - 1].join("/"))
		} else {
			Err(Error::InvalidArgument("documents root has no collection path".into()))
		}
	}

	/// Document id (last segment) when the path addresses a document.
	pub fn document_id(&self) -> Option<&str> {
		if self.is_document() { self.segments.last().map(AsRef::as_ref) } else { None }
	}

	/// Trailing segment, used as the `collectionID` of a collection-group
	/// query.
	pub fn collection_id(&self) -> Option<&str> {
		if self.is_collection() { self.segments.last().map(AsRef::as_ref) } else { None }
	}

	/// Parent path (drops the last segment). None at the documents root.
	pub fn parent(&self) -> Option<ResourcePath> {
		if self.segments.is_empty() {
			return None;
		}
		let mut segments = self.segments.clone();
		segments.pop();
		Some(Self {
			project_id: self.project_id.clone(),
			database_id: self.database_id.clone(),
			segments,
		})
	}

	/// Child path: subcollection of a document, or document of a collection.
	pub fn child(&self, segment: &str) -> EbResult<ResourcePath> {
		validate_segment(segment)?;
		let mut segments = self.segments.clone();
		segments.push(segment.into());
		Ok(Self {
			project_id: self.project_id.clone(),
			database_id: self.database_id.clone(),
			segments,
		})
	}

	/// True if `self` is a strict prefix of `other` on a segment boundary.
	pub fn is_ancestor_of(&self, other: &ResourcePath) -> bool {
		self.project_id == other.project_id
			&& self.database_id == other.database_id
			&& self.segments.len() < other.segments.len()
			&& other.segments[..self.segments.len()] == self.segments[..]
	}
}

impl std::fmt::Display for ResourcePath {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.format())
	}
}

/// Scope of a structured query: a parent path plus the addressed collection.
/// With `all_descendants` set, the query targets every collection whose
/// trailing path segment equals `collection_id` under the parent.
#[derive(Clone, Debug)]
pub struct QueryScope {
	pub parent: ResourcePath,
	pub collection_id: Box<str>,
	pub all_descendants: bool,
}

impl QueryScope {
	pub fn new(parent: ResourcePath, collection_id: &str, all_descendants: bool) -> EbResult<Self> {
		if parent.is_collection() {
			return Err(Error::InvalidArgument(
				"query parent must be a document path or the documents root".into(),
			));
		}
		validate_segment(collection_id)?;
		Ok(Self { parent, collection_id: collection_id.into(), all_descendants })
	}

	/// The single target collection when `all_descendants` is false.
	pub fn target_collection(&self) -> EbResult<ResourcePath> {
		self.parent.child(&self.collection_id)
	}
}

fn validate_segment(segment: &str) -> EbResult<()> {
	if segment.is_empty() {
		return Err(Error::InvalidArgument("empty path segment".into()));
	}
	if segment.len() > MAX_SEGMENT_LEN {
		return Err(Error::InvalidArgument(format!(
			"path segment exceeds {} bytes",
			MAX_SEGMENT_LEN
		)));
	}
	if segment == "." || segment == ".." {
		return Err(Error::InvalidArgument(format!("invalid path segment: {}", segment)));
	}
	if segment.starts_with("__") && segment.ends_with("__") {
		return Err(Error::InvalidArgument(format!("reserved path segment: {}", segment)));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(p: &str) -> ResourcePath {
		match ResourcePath::parse(p) {
			Ok(path) => path,
			Err(err) => panic!("parse failed for {}: {}", p, err),
		}
	}

	#[test]
	fn test_parse_document_path() {
		let path = parse("projects/p1/databases/(default)/documents/users/u1");
		assert_eq!(path.project_id().as_str(), "p1");
		assert_eq!(path.database_id().as_str(), "(default)");
		assert!(path.is_document());
		assert!(!path.is_collection());
		assert_eq!(path.document_id(), Some("u1"));
		assert_eq!(path.collection_path().ok(), Some("users".to_string()));
	}

	#[test]
	fn test_parse_collection_path() {
		let path = parse("projects/p1/databases/(default)/documents/users");
		assert!(path.is_collection());
		assert!(!path.is_document());
		assert_eq!(path.collection_id(), Some("users"));
	}

	#[test]
	fn test_parse_nested_subcollection() {
		let path = parse("projects/p1/databases/(default)/documents/users/u1/posts/p9");
		assert!(path.is_document());
		assert_eq!(path.collection_path().ok(), Some("users/u1/posts".to_string()));

		let sub = path.child("comments").map(|p| p.format()).ok();
		assert_eq!(
			sub,
			Some(
				"projects/p1/databases/(default)/documents/users/u1/posts/p9/comments"
					.to_string()
			)
		);
	}

	#[test]
	fn test_format_roundtrip() {
		for p in [
			"projects/p1/databases/(default)/documents",
			"projects/p1/databases/(default)/documents/users",
			"projects/p1/databases/db-2/documents/users/u1",
			"projects/p1/databases/(default)/documents/a/b/c/d/e",
		] {
			assert_eq!(parse(p).format(), p);
		}
	}

	#[test]
	fn test_documents_root() {
		let path = parse("projects/p1/databases/(default)/documents");
		assert!(path.is_root());
		assert!(!path.is_document());
		assert!(!path.is_collection());
		assert!(path.parent().is_none());
	}

	#[test]
	fn test_rejects_malformed() {
		assert!(ResourcePath::parse("databases/(default)/documents").is_err());
		assert!(ResourcePath::parse("projects//databases/d/documents").is_err());
		assert!(ResourcePath::parse("projects/p/database/d/documents").is_err());
		assert!(ResourcePath::parse("projects/p/databases/(default)/documents/users//x").is_err());
		assert!(ResourcePath::parse("projects/p/databases/(default)/documents/__bad__").is_err());
	}

	#[test]
	fn test_ancestor() {
		let doc = parse("projects/p1/databases/(default)/documents/users/u1");
		let sub = parse("projects/p1/databases/(default)/documents/users/u1/posts/p2");
		assert!(doc.is_ancestor_of(&sub));
		assert!(!sub.is_ancestor_of(&doc));
		assert!(!doc.is_ancestor_of(&doc));
	}

	#[test]
	fn test_query_scope() {
		let root = parse("projects/p1/databases/(default)/documents");
		let scope = QueryScope::new(root, "posts", true);
		assert!(scope.is_ok());

		let coll = parse("projects/p1/databases/(default)/documents/users");
		assert!(QueryScope::new(coll, "posts", false).is_err());
	}
}

// vim: ts=4
