//! Shared test infrastructure.
//!
//! `MemoryStoreAdapter` is an in-process stand-in for the backend document
//! store: it executes the same filter documents and the pipeline-stage
//! subset the engine's planner emits ($match, $addFields, $sort, $skip,
//! $limit, $unset, $group, $project), so engine scenarios run end to end
//! without a running backend.

use async_trait::async_trait;
use bson::{Bson, Document};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use emberbase::core::settings::Settings;
use emberbase::error::{EbResult, Error};
use emberbase::prelude::App;
use emberbase::store_adapter::{
	ContainerRef, FindOptions, KEY_ID, StoreAdapter, StoreTransaction,
};
use emberbase::{EmberbaseOpts, build_app};

type Containers = HashMap<(Box<str>, Box<str>), BTreeMap<String, Document>>;

#[derive(Debug, Default)]
pub struct MemoryStoreAdapter {
	containers: Arc<Mutex<Containers>>,
}

impl MemoryStoreAdapter {
	pub fn new() -> Self {
		Self::default()
	}
}

/// Build an engine instance backed by the memory adapter.
pub fn test_app() -> App {
	build_app(EmberbaseOpts {
		store_adapter: Arc::new(MemoryStoreAdapter::new()),
		settings: Settings::default(),
	})
}

/// Optional tracing output for test debugging.
pub fn setup_test_logging() {
	let _ = tracing_subscriber::fmt()
		.with_test_writer()
		.with_max_level(tracing::Level::DEBUG)
		.try_init();
}

fn key(container: &ContainerRef) -> (Box<str>, Box<str>) {
	(container.database.clone(), container.container.clone())
}

#[async_trait]
impl StoreAdapter for MemoryStoreAdapter {
	async fn get(&self, container: &ContainerRef, doc_id: &str) -> EbResult<Option<Document>> {
		let containers = self.containers.lock();
		Ok(containers.get(&key(container)).and_then(|docs| docs.get(doc_id)).cloned())
	}

	async fn insert(&self, container: &ContainerRef, doc: Document) -> EbResult<()> {
		let doc_id = doc
			.get_str(KEY_ID)
			.map_err(|_| Error::InvalidArgument("document without _id".into()))?
			.to_string();
		let mut containers = self.containers.lock();
		let docs = containers.entry(key(container)).or_default();
		if docs.contains_key(&doc_id) {
			return Err(Error::AlreadyExists(format!("document already exists: {}", doc_id)));
		}
		docs.insert(doc_id, doc);
		Ok(())
	}

	async fn replace(
		&self,
		container: &ContainerRef,
		doc_id: &str,
		doc: Document,
		upsert: bool,
	) -> EbResult<bool> {
		let mut containers = self.containers.lock();
		let docs = containers.entry(key(container)).or_default();
		let matched = docs.contains_key(doc_id);
		if matched || upsert {
			docs.insert(doc_id.to_string(), doc);
		}
		Ok(matched)
	}

	async fn update_fields(
		&self,
		container: &ContainerRef,
		doc_id: &str,
		set: Document,
		unset: &[String],
	) -> EbResult<bool> {
		let mut containers = self.containers.lock();
		let Some(doc) =
			containers.get_mut(&key(container)).and_then(|docs| docs.get_mut(doc_id))
		else {
			return Ok(false);
		};
		for (path, value) in set {
			set_dotted(doc, &path, value);
		}
		for path in unset {
			unset_dotted(doc, path);
		}
		Ok(true)
	}

	async fn delete(&self, container: &ContainerRef, doc_id: &str) -> EbResult<bool> {
		let mut containers = self.containers.lock();
		Ok(containers
			.get_mut(&key(container))
			.is_some_and(|docs| docs.remove(doc_id).is_some()))
	}

	async fn find(
		&self,
		container: &ContainerRef,
		filter: Document,
		opts: FindOptions,
	) -> EbResult<Vec<Document>> {
		let mut results: Vec<Document> = {
			let containers = self.containers.lock();
			containers
				.get(&key(container))
				.map(|docs| {
					docs.values().filter(|doc| matches_filter(doc, &filter)).cloned().collect()
				})
				.unwrap_or_default()
		};
		if let Some(sort) = &opts.sort {
			sort_documents(&mut results, sort);
		}
		let skip = usize::try_from(opts.skip.unwrap_or(0)).unwrap_or(0);
		let mut results: Vec<Document> = results.into_iter().skip(skip).collect();
		if let Some(limit) = opts.limit {
			results.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
		}
		Ok(results)
	}

	async fn aggregate(
		&self,
		container: &ContainerRef,
		pipeline: Vec<Document>,
	) -> EbResult<Vec<Document>> {
		let docs: Vec<Document> = {
			let containers = self.containers.lock();
			containers
				.get(&key(container))
				.map(|docs| docs.values().cloned().collect())
				.unwrap_or_default()
		};
		run_pipeline(docs, &pipeline)
	}

	async fn transaction(&self, _database: &str) -> EbResult<Box<dyn StoreTransaction>> {
		Ok(Box::new(MemoryTransaction {
			containers: Arc::clone(&self.containers),
			overlay: HashMap::new(),
			finished: false,
		}))
	}
}

// --- Transaction ---

type OverlayKey = (Box<str>, Box<str>, String);

pub struct MemoryTransaction {
	containers: Arc<Mutex<Containers>>,
	/// Buffered writes: Some = upserted document, None = deleted.
	overlay: HashMap<OverlayKey, Option<Document>>,
	finished: bool,
}

impl MemoryTransaction {
	fn overlay_key(container: &ContainerRef, doc_id: &str) -> OverlayKey {
		(container.database.clone(), container.container.clone(), doc_id.to_string())
	}
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
	async fn get(&mut self, container: &ContainerRef, doc_id: &str) -> EbResult<Option<Document>> {
		if let Some(buffered) = self.overlay.get(&Self::overlay_key(container, doc_id)) {
			return Ok(buffered.clone());
		}
		let containers = self.containers.lock();
		Ok(containers.get(&key(container)).and_then(|docs| docs.get(doc_id)).cloned())
	}

	async fn insert(&mut self, container: &ContainerRef, doc: Document) -> EbResult<()> {
		let doc_id = doc
			.get_str(KEY_ID)
			.map_err(|_| Error::InvalidArgument("document without _id".into()))?
			.to_string();
		if self.get(container, &doc_id).await?.is_some() {
			return Err(Error::AlreadyExists(format!("document already exists: {}", doc_id)));
		}
		self.overlay.insert(Self::overlay_key(container, &doc_id), Some(doc));
		Ok(())
	}

	async fn replace(
		&mut self,
		container: &ContainerRef,
		doc_id: &str,
		doc: Document,
		upsert: bool,
	) -> EbResult<bool> {
		let matched = self.get(container, doc_id).await?.is_some();
		if matched || upsert {
			self.overlay.insert(Self::overlay_key(container, doc_id), Some(doc));
		}
		Ok(matched)
	}

	async fn delete(&mut self, container: &ContainerRef, doc_id: &str) -> EbResult<bool> {
		let matched = self.get(container, doc_id).await?.is_some();
		if matched {
			self.overlay.insert(Self::overlay_key(container, doc_id), None);
		}
		Ok(matched)
	}

	async fn commit(&mut self) -> EbResult<()> {
		if self.finished {
			return Err(Error::FailedPrecondition("transaction already finished".into()));
		}
		self.finished = true;
		let mut containers = self.containers.lock();
		for ((database, container, doc_id), buffered) in self.overlay.drain() {
			let docs = containers.entry((database, container)).or_default();
			match buffered {
				Some(doc) => {
					docs.insert(doc_id, doc);
				}
				None => {
					docs.remove(&doc_id);
				}
			}
		}
		Ok(())
	}

	async fn rollback(&mut self) -> EbResult<()> {
		self.finished = true;
		self.overlay.clear();
		Ok(())
	}
}

// --- Filter evaluation ---

fn matches_filter(doc: &Document, filter: &Document) -> bool {
	filter.iter().all(|(field, condition)| match field.as_str() {
		"$and" => match condition.as_array() {
			Some(parts) => parts.iter().all(|part| {
				part.as_document().is_some_and(|inner| matches_filter(doc, inner))
			}),
			None => false,
		},
		"$or" => match condition.as_array() {
			Some(parts) => parts.iter().any(|part| {
				part.as_document().is_some_and(|inner| matches_filter(doc, inner))
			}),
			None => false,
		},
		"$expr" => eval_expr(doc, condition) == Bson::Boolean(true),
		path => match condition {
			Bson::Document(ops) if ops.keys().any(|k| k.starts_with('$')) => {
				ops.iter().all(|(op, operand)| {
					apply_field_op(get_dotted(doc, path), op, operand, doc, path)
				})
			}
			expected => get_dotted(doc, path) == Some(expected),
		},
	})
}

fn apply_field_op(
	actual: Option<&Bson>,
	op: &str,
	operand: &Bson,
	_doc: &Document,
	_path: &str,
) -> bool {
	match op {
		"$exists" => {
			let wanted = operand.as_bool().unwrap_or(true);
			actual.is_some() == wanted
		}
		"$ne" => actual != Some(operand),
		"$eq" => actual == Some(operand),
		"$gt" | "$gte" | "$lt" | "$lte" => {
			let Some(actual) = actual else { return false };
			match bson_compare(actual, operand) {
				Some(ord) => match op {
					"$gt" => ord == Ordering::Greater,
					"$gte" => ord != Ordering::Less,
					"$lt" => ord == Ordering::Less,
					_ => ord != Ordering::Greater,
				},
				None => false,
			}
		}
		"$in" => match (actual, operand.as_array()) {
			(Some(actual), Some(allowed)) => allowed.contains(actual),
			_ => false,
		},
		"$elemMatch" => match (actual, operand.as_document()) {
			(Some(Bson::Array(items)), Some(condition)) => items.iter().any(|item| {
				condition.iter().all(|(op, operand)| {
					apply_field_op(Some(item), op, operand, _doc, _path)
				})
			}),
			_ => false,
		},
		other => {
			panic!("memory adapter: unsupported filter operator {}", other);
		}
	}
}

// --- Expression evaluation (the planner's $expr / $addFields subset) ---

fn eval_expr(doc: &Document, expr: &Bson) -> Bson {
	match expr {
		Bson::String(s) if s.starts_with('$') => {
			get_dotted(doc, &s[1..]).cloned().unwrap_or(Bson::Null)
		}
		Bson::Document(inner) => {
			if inner.len() == 1 {
				let (op, args) = match inner.iter().next() {
					Some(entry) => entry,
					None => return Bson::Null,
				};
				match op.as_str() {
					"$ifNull" => {
						let parts = args.as_array().cloned().unwrap_or_default();
						for part in &parts {
							let value = eval_expr(doc, part);
							if value != Bson::Null {
								return value;
							}
						}
						Bson::Null
					}
					"$convert" => {
						let spec = args.as_document().cloned().unwrap_or_default();
						let input = spec.get("input").map(|i| eval_expr(doc, i));
						match input {
							Some(Bson::String(s)) => s
								.parse::<f64>()
								.map_or(Bson::Null, Bson::Double),
							Some(Bson::Double(d)) => Bson::Double(d),
							Some(Bson::Int32(n)) => Bson::Double(f64::from(n)),
							Some(Bson::Int64(n)) => Bson::Double(n as f64),
							_ => Bson::Null,
						}
					}
					"$and" => {
						let parts = args.as_array().cloned().unwrap_or_default();
						Bson::Boolean(
							parts.iter().all(|p| eval_expr(doc, p) == Bson::Boolean(true)),
						)
					}
					"$or" => {
						let parts = args.as_array().cloned().unwrap_or_default();
						Bson::Boolean(
							parts.iter().any(|p| eval_expr(doc, p) == Bson::Boolean(true)),
						)
					}
					"$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
						let parts = args.as_array().cloned().unwrap_or_default();
						if parts.len() != 2 {
							return Bson::Boolean(false);
						}
						let left = eval_expr(doc, &parts[0]);
						let right = eval_expr(doc, &parts[1]);
						Bson::Boolean(compare_expr(op, &left, &right))
					}
					_ => Bson::Document(inner.clone()),
				}
			} else {
				Bson::Document(inner.clone())
			}
		}
		other => other.clone(),
	}
}

fn compare_expr(op: &str, left: &Bson, right: &Bson) -> bool {
	// Aggregation comparisons order null below everything
	let ord = match (left, right) {
		(Bson::Null, Bson::Null) => Some(Ordering::Equal),
		(Bson::Null, _) => Some(Ordering::Less),
		(_, Bson::Null) => Some(Ordering::Greater),
		_ => bson_compare(left, right),
	};
	match ord {
		Some(ord) => match op {
			"$eq" => ord == Ordering::Equal,
			"$ne" => ord != Ordering::Equal,
			"$gt" => ord == Ordering::Greater,
			"$gte" => ord != Ordering::Less,
			"$lt" => ord == Ordering::Less,
			"$lte" => ord != Ordering::Greater,
			_ => false,
		},
		None => op == "$ne",
	}
}

// --- Pipeline ---

fn run_pipeline(mut docs: Vec<Document>, pipeline: &[Document]) -> EbResult<Vec<Document>> {
	for stage in pipeline {
		let (name, spec) = stage
			.iter()
			.next()
			.ok_or_else(|| Error::InvalidArgument("empty pipeline stage".into()))?;
		match name.as_str() {
			"$match" => {
				let filter = spec
					.as_document()
					.ok_or_else(|| Error::InvalidArgument("bad $match".into()))?;
				docs.retain(|doc| matches_filter(doc, filter));
			}
			"$addFields" => {
				let fields = spec
					.as_document()
					.ok_or_else(|| Error::InvalidArgument("bad $addFields".into()))?;
				for doc in &mut docs {
					for (field, expr) in fields {
						let value = eval_expr(doc, expr);
						doc.insert(field.clone(), value);
					}
				}
			}
			"$sort" => {
				let sort = spec
					.as_document()
					.ok_or_else(|| Error::InvalidArgument("bad $sort".into()))?;
				sort_documents(&mut docs, sort);
			}
			"$skip" => {
				let skip = bson_as_usize(spec).unwrap_or(0);
				docs = docs.into_iter().skip(skip).collect();
			}
			"$limit" => {
				let limit = bson_as_usize(spec).unwrap_or(usize::MAX);
				docs.truncate(limit);
			}
			"$unset" => {
				let names: Vec<String> = match spec {
					Bson::String(name) => vec![name.clone()],
					Bson::Array(names) => names
						.iter()
						.filter_map(|n| n.as_str().map(ToString::to_string))
						.collect(),
					_ => Vec::new(),
				};
				for doc in &mut docs {
					for name in &names {
						doc.remove(name);
					}
				}
			}
			"$group" => {
				let spec = spec
					.as_document()
					.ok_or_else(|| Error::InvalidArgument("bad $group".into()))?;
				docs = run_group(&docs, spec)?;
			}
			"$project" => {
				let spec = spec
					.as_document()
					.ok_or_else(|| Error::InvalidArgument("bad $project".into()))?;
				docs = docs.iter().map(|doc| run_project(doc, spec)).collect();
			}
			other => {
				return Err(Error::InvalidArgument(format!(
					"memory adapter: unsupported stage {}",
					other
				)));
			}
		}
	}
	Ok(docs)
}

fn run_group(docs: &[Document], spec: &Document) -> EbResult<Vec<Document>> {
	let id_expr = spec.get("_id").cloned().unwrap_or(Bson::Null);

	// Group key -> (_id value, accumulator states)
	let mut groups: BTreeMap<String, Document> = BTreeMap::new();
	let mut counts: BTreeMap<String, HashMap<String, (f64, i64, bool)>> = BTreeMap::new();

	for doc in docs {
		let id_value = match &id_expr {
			Bson::Document(fields) => {
				let mut id = Document::new();
				for (name, expr) in fields {
					id.insert(name.clone(), eval_expr(doc, expr));
				}
				Bson::Document(id)
			}
			other => eval_expr(doc, other),
		};
		let group_key = format!("{:?}", id_value);

		let entry = groups.entry(group_key.clone()).or_insert_with(|| {
			let mut row = Document::new();
			row.insert("_id", id_value.clone());
			row
		});
		let states = counts.entry(group_key).or_default();

		for (alias, accumulator) in spec {
			if alias == "_id" {
				continue;
			}
			let accumulator = accumulator
				.as_document()
				.ok_or_else(|| Error::InvalidArgument("bad accumulator".into()))?;
			let (op, arg) = accumulator
				.iter()
				.next()
				.ok_or_else(|| Error::InvalidArgument("empty accumulator".into()))?;
			let state = states.entry(alias.clone()).or_insert((0.0, 0, false));

			match op.as_str() {
				"$sum" => {
					// Integer literal 1 is a count; expressions sum as doubles
					if matches!(arg, Bson::Int32(1) | Bson::Int64(1)) {
						state.1 += 1;
						entry.insert(alias.clone(), Bson::Int64(state.1));
					} else {
						if let Some(n) = bson_as_f64(&eval_expr(doc, arg)) {
							state.0 += n;
						}
						entry.insert(alias.clone(), Bson::Double(state.0));
					}
				}
				"$avg" => {
					if let Some(n) = bson_as_f64(&eval_expr(doc, arg)) {
						state.0 += n;
						state.1 += 1;
					}
					if state.1 > 0 {
						entry.insert(alias.clone(), Bson::Double(state.0 / state.1 as f64));
					} else {
						entry.insert(alias.clone(), Bson::Null);
					}
				}
				"$min" => {
					if let Some(n) = bson_as_f64(&eval_expr(doc, arg)) {
						if !state.2 || n < state.0 {
							state.0 = n;
							state.2 = true;
						}
					}
					entry.insert(
						alias.clone(),
						if state.2 { Bson::Double(state.0) } else { Bson::Null },
					);
				}
				"$max" => {
					if let Some(n) = bson_as_f64(&eval_expr(doc, arg)) {
						if !state.2 || n > state.0 {
							state.0 = n;
							state.2 = true;
						}
					}
					entry.insert(
						alias.clone(),
						if state.2 { Bson::Double(state.0) } else { Bson::Null },
					);
				}
				other => {
					return Err(Error::InvalidArgument(format!(
						"memory adapter: unsupported accumulator {}",
						other
					)));
				}
			}
		}
	}

	Ok(groups.into_values().collect())
}

fn run_project(doc: &Document, spec: &Document) -> Document {
	let mut out = Document::new();
	let keep_id = spec.get("_id").is_none_or(|v| bson_as_f64(v) == Some(1.0));
	if keep_id {
		if let Some(id) = doc.get("_id") {
			out.insert("_id", id.clone());
		}
	}
	for (field, value) in spec {
		if field == "_id" {
			continue;
		}
		match value {
			Bson::String(path) if path.starts_with('$') => {
				out.insert(field.clone(), eval_expr(doc, value));
			}
			other if bson_as_f64(other) == Some(1.0) => {
				if let Some(existing) = doc.get(field) {
					out.insert(field.clone(), existing.clone());
				}
			}
			_ => {}
		}
	}
	out
}

// --- Helpers ---

fn get_dotted<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
	let mut current: &Bson = doc.get(path.split('.').next()?)?;
	for part in path.split('.').skip(1) {
		current = current.as_document()?.get(part)?;
	}
	Some(current)
}

fn set_dotted(doc: &mut Document, path: &str, value: Bson) {
	let parts: Vec<&str> = path.split('.').collect();
	let mut current = doc;
	for part in &parts[..parts.len() - 1] {
		let entry = current
			.entry((*part).to_string())
			.or_insert_with(|| Bson::Document(Document::new()));
		match entry.as_document_mut() {
			Some(inner) => current = inner,
			None => return,
		}
	}
	if let Some(last) = parts.last() {
		current.insert((*last).to_string(), value);
	}
}

fn unset_dotted(doc: &mut Document, path: &str) {
	let parts: Vec<&str> = path.split('.').collect();
	let mut current = doc;
	for part in &parts[..parts.len() - 1] {
		match current.get_mut(*part).and_then(Bson::as_document_mut) {
			Some(inner) => current = inner,
			None => return,
		}
	}
	if let Some(last) = parts.last() {
		current.remove(*last);
	}
}

fn sort_documents(docs: &mut [Document], sort: &Document) {
	docs.sort_by(|a, b| {
		for (field, direction) in sort {
			let descending = bson_as_f64(direction) == Some(-1.0);
			let va = get_dotted(a, field);
			let vb = get_dotted(b, field);
			let ord = match (va, vb) {
				(None, None) => Ordering::Equal,
				(None, Some(_)) => Ordering::Less,
				(Some(_), None) => Ordering::Greater,
				(Some(x), Some(y)) => bson_compare(x, y).unwrap_or(Ordering::Equal),
			};
			let ord = if descending { ord.reverse() } else { ord };
			if ord != Ordering::Equal {
				return ord;
			}
		}
		Ordering::Equal
	});
}

fn bson_compare(a: &Bson, b: &Bson) -> Option<Ordering> {
	match (a, b) {
		(Bson::String(a), Bson::String(b)) => Some(a.cmp(b)),
		(Bson::Boolean(a), Bson::Boolean(b)) => Some(a.cmp(b)),
		(Bson::DateTime(a), Bson::DateTime(b)) => Some(a.cmp(b)),
		(Bson::Null, Bson::Null) => Some(Ordering::Equal),
		(Bson::Null, _) => Some(Ordering::Less),
		(_, Bson::Null) => Some(Ordering::Greater),
		_ => match (bson_as_f64(a), bson_as_f64(b)) {
			(Some(a), Some(b)) => a.partial_cmp(&b),
			_ => None,
		},
	}
}

fn bson_as_f64(value: &Bson) -> Option<f64> {
	match value {
		Bson::Double(d) => Some(*d),
		Bson::Int32(n) => Some(f64::from(*n)),
		Bson::Int64(n) => Some(*n as f64),
		_ => None,
	}
}

fn bson_as_usize(value: &Bson) -> Option<usize> {
	bson_as_f64(value).and_then(|f| usize::try_from(f as i64).ok())
}

// vim: ts=4
