//! Atomic field operators, batch writes, and transactions.
//!
//! Operators apply as read-modify-write inside one backend transaction, so
//! concurrent callers serialize on the document. A missing field is the
//! operator's identity: increment starts from 0, union/remove from the
//! empty array, server-timestamp sets a fresh value.

pub mod batch;
pub mod handler;
pub mod txn;

use crate::document::mask::{get_at_path, set_at_path, split_field_path};
use crate::document::{StoredDocument, decode_stored, validate_document_size};
use crate::path::ResourcePath;
use crate::prelude::*;
use crate::realtime::EventType;
use crate::value::{FieldMap, FieldValue};

/// Single-document atomic operator.
#[derive(Clone, Debug)]
pub enum FieldOperator {
	/// Numeric increment; the field stays numeric.
	Increment(FieldValue),
	/// Append elements not already present, by deep equality on the typed
	/// value.
	ArrayUnion(Vec<FieldValue>),
	/// Drop all occurrences of each element, by deep equality.
	ArrayRemove(Vec<FieldValue>),
	/// Set the field to the server wall time at apply moment.
	ServerTimestamp,
}

impl FieldOperator {
	fn validate(&self) -> EbResult<()> {
		match self {
			FieldOperator::Increment(delta) if !delta.is_numeric() => Err(
				Error::InvalidArgument("increment delta must be an integer or double".into()),
			),
			FieldOperator::ArrayUnion(elements) | FieldOperator::ArrayRemove(elements)
				if elements.is_empty() =>
			{
				Err(Error::InvalidArgument("elements must be non-empty".into()))
			}
			_ => Ok(()),
		}
	}
}

/// Apply an operator to one field of one document and return the new field
/// value. The document is created when absent.
pub async fn apply_field_operator(
	app: &App,
	path: &ResourcePath,
	field_path: &str,
	operator: FieldOperator,
) -> EbResult<FieldValue> {
	operator.validate()?;
	if !path.is_document() {
		return Err(Error::InvalidArgument(format!("not a document path: {}", path)));
	}
	let doc_id = path
		.document_id()
		.ok_or_else(|| Error::Internal("document path without id".into()))?;
	let parts = split_field_path(field_path)?;

	let container = app
		.catalog
		.resolve_for_write(path.project_id(), path.database_id(), &path.collection_path()?)
		.await?;

	let mut store_txn = app.store_adapter.transaction(&container.database).await?;
	let existing = match store_txn.get(&container, doc_id).await? {
		Some(doc) => Some(decode_stored(&doc)?),
		None => None,
	};
	let old_wire = existing.as_ref().map(StoredDocument::to_wire);

	let now = Timestamp::now();
	let (mut fields, create_time, event_type) = match existing {
		Some(current) => (current.fields, current.create_time, EventType::Modified),
		None => (FieldMap::new(), now, EventType::Added),
	};

	let current = get_at_path(&fields, &parts).cloned();
	let new_value = apply_operator(current, &operator, now)?;
	set_at_path(&mut fields, &parts, new_value.clone())?;
	validate_document_size(&fields)?;

	let stored =
		StoredDocument { path: path.clone(), fields, create_time, update_time: now };
	store_txn.replace(&container, doc_id, stored.to_stored_bson()?, true).await?;
	store_txn.commit().await?;

	app.bus.publish(event_type, &stored.path.format(), Some(stored.to_wire()), old_wire);
	Ok(new_value)
}

/// Pure operator application over the current typed value.
pub fn apply_operator(
	current: Option<FieldValue>,
	operator: &FieldOperator,
	now: Timestamp,
) -> EbResult<FieldValue> {
	match operator {
		FieldOperator::Increment(delta) => {
			let base = match current {
				Some(value @ (FieldValue::Integer(_) | FieldValue::Double(_))) => value,
				// Missing or non-numeric field: increment from zero
				_ => FieldValue::Integer(0),
			};
			Ok(match (base, delta) {
				(FieldValue::Integer(a), FieldValue::Integer(b)) => {
					FieldValue::Integer(a.wrapping_add(*b))
				}
				(FieldValue::Integer(a), FieldValue::Double(b)) => {
					FieldValue::Double(a as f64 + b)
				}
				(FieldValue::Double(a), FieldValue::Integer(b)) => {
					FieldValue::Double(a + *b as f64)
				}
				(FieldValue::Double(a), FieldValue::Double(b)) => FieldValue::Double(a + b),
				_ => return Err(Error::Internal("non-numeric increment state".into())),
			})
		}
		FieldOperator::ArrayUnion(elements) => {
			let mut items = match current {
				Some(FieldValue::Array(items)) => items,
				_ => Vec::new(),
			};
			for element in elements {
				if !items.contains(element) {
					items.push(element.clone());
				}
			}
			Ok(FieldValue::Array(items))
		}
		FieldOperator::ArrayRemove(elements) => {
			let items = match current {
				Some(FieldValue::Array(items)) => items,
				_ => Vec::new(),
			};
			Ok(FieldValue::Array(
				items.into_iter().filter(|item| !elements.contains(item)).collect(),
			))
		}
		FieldOperator::ServerTimestamp => Ok(FieldValue::Timestamp(now)),
	}
}


// vim: ts=4
