//! Typed field values.
//!
//! Every stored field is a tagged variant carried on the wire as
//! `{typeTag: encoded}` (`stringValue`, `integerValue` as a base-10 string,
//! `doubleValue`, `booleanValue`, `timestampValue` as RFC 3339, `nullValue`,
//! `bytesValue` as base64, `referenceValue`, `geoPointValue`,
//! `arrayValue{values}`, `mapValue{fields}`). The same tagged shape is kept
//! in backend storage so decode(encode(F)) preserves array order and tags
//! exactly.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde_json::Value as Json;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::prelude::*;

/// Field map of a document, keyed by top-level field name.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A typed document field value.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
	Null,
	Boolean(bool),
	Integer(i64),
	Double(f64),
	Timestamp(Timestamp),
	String(String),
	Bytes(Vec<u8>),
	Reference(String),
	GeoPoint { latitude: f64, longitude: f64 },
	Array(Vec<FieldValue>),
	Map(FieldMap),
}

impl FieldValue {
	/// Decode a single wire value (`{typeTag: encoded}`).
	pub fn from_wire(value: &Json) -> EbResult<FieldValue> {
		let obj = value.as_object().ok_or_else(|| {
			Error::InvalidArgument(format!("field value must be a typed object, got: {}", value))
		})?;
		if obj.len() != 1 {
			return Err(Error::InvalidArgument(format!(
				"field value must carry exactly one type tag, got {} keys",
				obj.len()
			)));
		}
		let (tag, inner) = match obj.iter().next() {
			Some(entry) => entry,
			None => return Err(Error::InvalidArgument("empty field value".into())),
		};

		match tag.as_str() {
			"nullValue" => Ok(FieldValue::Null),
			"booleanValue" => inner
				.as_bool()
				.map(FieldValue::Boolean)
				.ok_or_else(|| type_mismatch(tag, inner)),
			"integerValue" => match inner {
				Json::String(s) => s
					.parse::<i64>()
					.map(FieldValue::Integer)
					.map_err(|_| type_mismatch(tag, inner)),
				Json::Number(n) => {
					n.as_i64().map(FieldValue::Integer).ok_or_else(|| type_mismatch(tag, inner))
				}
				_ => Err(type_mismatch(tag, inner)),
			},
			"doubleValue" => {
				inner.as_f64().map(FieldValue::Double).ok_or_else(|| type_mismatch(tag, inner))
			}
			"timestampValue" => {
				let s = inner.as_str().ok_or_else(|| type_mismatch(tag, inner))?;
				Ok(FieldValue::Timestamp(Timestamp::parse_rfc3339(s)?))
			}
			"stringValue" => inner
				.as_str()
				.map(|s| FieldValue::String(s.to_string()))
				.ok_or_else(|| type_mismatch(tag, inner)),
			"bytesValue" => {
				let s = inner.as_str().ok_or_else(|| type_mismatch(tag, inner))?;
				BASE64
					.decode(s.as_bytes())
					.map(FieldValue::Bytes)
					.map_err(|_| type_mismatch(tag, inner))
			}
			"referenceValue" => inner
				.as_str()
				.map(|s| FieldValue::Reference(s.to_string()))
				.ok_or_else(|| type_mismatch(tag, inner)),
			"geoPointValue" => {
				let latitude = inner
					.get("latitude")
					.and_then(Json::as_f64)
					.ok_or_else(|| type_mismatch(tag, inner))?;
				let longitude = inner
					.get("longitude")
					.and_then(Json::as_f64)
					.ok_or_else(|| type_mismatch(tag, inner))?;
				Ok(FieldValue::GeoPoint { latitude, longitude })
			}
			"arrayValue" => {
				let mut values = Vec::new();
				if let Some(items) = inner.get("values").and_then(Json::as_array) {
					for item in items {
						values.push(FieldValue::from_wire(item)?);
					}
				}
				Ok(FieldValue::Array(values))
			}
			"mapValue" => {
				let mut fields = FieldMap::new();
				if let Some(map) = inner.get("fields").and_then(Json::as_object) {
					for (name, item) in map {
						fields.insert(name.clone(), FieldValue::from_wire(item)?);
					}
				}
				Ok(FieldValue::Map(fields))
			}
			other => Err(Error::InvalidArgument(format!("unknown value type tag: {}", other))),
		}
	}

	/// Encode to the wire form.
	pub fn to_wire(&self) -> Json {
		match self {
			FieldValue::Null => serde_json::json!({ "nullValue": Json::Null }),
			FieldValue::Boolean(b) => serde_json::json!({ "booleanValue": b }),
			FieldValue::Integer(n) => serde_json::json!({ "integerValue": n.to_string() }),
			FieldValue::Double(d) => serde_json::json!({ "doubleValue": d }),
			FieldValue::Timestamp(ts) => serde_json::json!({ "timestampValue": ts.to_rfc3339() }),
			FieldValue::String(s) => serde_json::json!({ "stringValue": s }),
			FieldValue::Bytes(b) => serde_json::json!({ "bytesValue": BASE64.encode(b) }),
			FieldValue::Reference(r) => serde_json::json!({ "referenceValue": r }),
			FieldValue::GeoPoint { latitude, longitude } => {
				serde_json::json!({ "geoPointValue": { "latitude": latitude, "longitude": longitude } })
			}
			FieldValue::Array(values) => {
				let items: Vec<Json> = values.iter().map(FieldValue::to_wire).collect();
				serde_json::json!({ "arrayValue": { "values": items } })
			}
			FieldValue::Map(fields) => {
				let mut map = serde_json::Map::new();
				for (name, value) in fields {
					map.insert(name.clone(), value.to_wire());
				}
				serde_json::json!({ "mapValue": { "fields": map } })
			}
		}
	}

	/// Encode to the tagged storage form.
	pub fn to_bson(&self) -> bson::Bson {
		use bson::Bson;
		match self {
			FieldValue::Null => bson::bson!({ "nullValue": Bson::Null }),
			FieldValue::Boolean(b) => bson::bson!({ "booleanValue": *b }),
			FieldValue::Integer(n) => bson::bson!({ "integerValue": n.to_string() }),
			FieldValue::Double(d) => bson::bson!({ "doubleValue": *d }),
			FieldValue::Timestamp(ts) => bson::bson!({ "timestampValue": ts.to_bson() }),
			FieldValue::String(s) => bson::bson!({ "stringValue": s.as_str() }),
			FieldValue::Bytes(b) => bson::bson!({ "bytesValue": Bson::Binary(bson::Binary {
				subtype: bson::spec::BinarySubtype::Generic,
				bytes: b.clone(),
			}) }),
			FieldValue::Reference(r) => bson::bson!({ "referenceValue": r.as_str() }),
			FieldValue::GeoPoint { latitude, longitude } => {
				bson::bson!({ "geoPointValue": { "latitude": *latitude, "longitude": *longitude } })
			}
			FieldValue::Array(values) => {
				let items: Vec<Bson> = values.iter().map(FieldValue::to_bson).collect();
				bson::bson!({ "arrayValue": { "values": items } })
			}
			FieldValue::Map(fields) => {
				let mut doc = bson::Document::new();
				for (name, value) in fields {
					doc.insert(name.clone(), value.to_bson());
				}
				bson::bson!({ "mapValue": { "fields": doc } })
			}
		}
	}

	/// Decode the tagged storage form. Array structure (ordered, each value
	/// typed) is preserved exactly; scalars round-trip by tag.
	pub fn from_bson(value: &bson::Bson) -> EbResult<FieldValue> {
		use bson::Bson;
		let doc = match value {
			Bson::Document(doc) => doc,
			other => {
				return Err(Error::Parse(format!(
					"stored field value must be a tagged document, got: {}",
					other
				)));
			}
		};
		if doc.len() != 1 {
			return Err(Error::Parse(format!(
				"stored field value must carry exactly one type tag, got {} keys",
				doc.len()
			)));
		}
		let (tag, inner) = match doc.iter().next() {
			Some(entry) => entry,
			None => return Err(Error::Parse("empty stored field value".into())),
		};

		match (tag.as_str(), inner) {
			("nullValue", _) => Ok(FieldValue::Null),
			("booleanValue", Bson::Boolean(b)) => Ok(FieldValue::Boolean(*b)),
			("integerValue", Bson::String(s)) => s
				.parse::<i64>()
				.map(FieldValue::Integer)
				.map_err(|_| Error::Parse(format!("bad stored integer: {}", s))),
			("doubleValue", Bson::Double(d)) => Ok(FieldValue::Double(*d)),
			("doubleValue", Bson::Int32(n)) => Ok(FieldValue::Double(f64::from(*n))),
			("doubleValue", Bson::Int64(n)) => Ok(FieldValue::Double(*n as f64)),
			("timestampValue", Bson::DateTime(dt)) => {
				Ok(FieldValue::Timestamp(Timestamp::from_bson_datetime(*dt)))
			}
			("stringValue", Bson::String(s)) => Ok(FieldValue::String(s.clone())),
			("bytesValue", Bson::Binary(bin)) => Ok(FieldValue::Bytes(bin.bytes.clone())),
			("referenceValue", Bson::String(s)) => Ok(FieldValue::Reference(s.clone())),
			("geoPointValue", Bson::Document(geo)) => {
				let latitude = geo
					.get_f64("latitude")
					.map_err(|_| Error::Parse("bad stored geo point".into()))?;
				let longitude = geo
					.get_f64("longitude")
					.map_err(|_| Error::Parse("bad stored geo point".into()))?;
				Ok(FieldValue::GeoPoint { latitude, longitude })
			}
			("arrayValue", Bson::Document(arr)) => {
				let mut values = Vec::new();
				if let Ok(items) = arr.get_array("values") {
					for item in items {
						values.push(FieldValue::from_bson(item)?);
					}
				}
				Ok(FieldValue::Array(values))
			}
			("mapValue", Bson::Document(map)) => {
				let mut fields = FieldMap::new();
				if let Ok(inner_fields) = map.get_document("fields") {
					for (name, item) in inner_fields {
						fields.insert(name.clone(), FieldValue::from_bson(item)?);
					}
				}
				Ok(FieldValue::Map(fields))
			}
			(tag, other) => {
				Err(Error::Parse(format!("bad stored value for tag {}: {}", tag, other)))
			}
		}
	}

	/// Untyped projection for rules-expression evaluation
	/// (`resource.data.age > 18` compares plain values).
	pub fn to_plain_json(&self) -> Json {
		match self {
			FieldValue::Null => Json::Null,
			FieldValue::Boolean(b) => Json::Bool(*b),
			FieldValue::Integer(n) => Json::from(*n),
			FieldValue::Double(d) => {
				serde_json::Number::from_f64(*d).map_or(Json::Null, Json::Number)
			}
			FieldValue::Timestamp(ts) => Json::String(ts.to_rfc3339()),
			FieldValue::String(s) => Json::String(s.clone()),
			FieldValue::Bytes(b) => Json::String(BASE64.encode(b)),
			FieldValue::Reference(r) => Json::String(r.clone()),
			FieldValue::GeoPoint { latitude, longitude } => {
				serde_json::json!({ "latitude": latitude, "longitude": longitude })
			}
			FieldValue::Array(values) => {
				Json::Array(values.iter().map(FieldValue::to_plain_json).collect())
			}
			FieldValue::Map(fields) => {
				let mut map = serde_json::Map::new();
				for (name, value) in fields {
					map.insert(name.clone(), value.to_plain_json());
				}
				Json::Object(map)
			}
		}
	}

	pub fn is_numeric(&self) -> bool {
		matches!(self, FieldValue::Integer(_) | FieldValue::Double(_))
	}

	/// Type bracket for cross-type ordering: null < bool < number <
	/// timestamp < string < bytes < reference < geo < array < map.
	fn type_order(&self) -> u8 {
		match self {
			FieldValue::Null => 0,
			FieldValue::Boolean(_) => 1,
			FieldValue::Integer(_) | FieldValue::Double(_) => 2,
			FieldValue::Timestamp(_) => 3,
			FieldValue::String(_) => 4,
			FieldValue::Bytes(_) => 5,
			FieldValue::Reference(_) => 6,
			FieldValue::GeoPoint { .. } => 7,
			FieldValue::Array(_) => 8,
			FieldValue::Map(_) => 9,
		}
	}

	/// Total order over typed values. Integers and doubles compare
	/// numerically within the shared number bracket.
	pub fn compare(&self, other: &FieldValue) -> Ordering {
		let bracket = self.type_order().cmp(&other.type_order());
		if bracket != Ordering::Equal {
			return bracket;
		}

		match (self, other) {
			(FieldValue::Null, FieldValue::Null) => Ordering::Equal,
			(FieldValue::Boolean(a), FieldValue::Boolean(b)) => a.cmp(b),
			(FieldValue::Integer(a), FieldValue::Integer(b)) => a.cmp(b),
			(FieldValue::Integer(a), FieldValue::Double(b)) => (*a as f64).total_cmp(b),
			(FieldValue::Double(a), FieldValue::Integer(b)) => a.total_cmp(&(*b as f64)),
			(FieldValue::Double(a), FieldValue::Double(b)) => a.total_cmp(b),
			(FieldValue::Timestamp(a), FieldValue::Timestamp(b)) => a.cmp(b),
			(FieldValue::String(a), FieldValue::String(b)) => a.cmp(b),
			(FieldValue::Bytes(a), FieldValue::Bytes(b)) => a.cmp(b),
			(FieldValue::Reference(a), FieldValue::Reference(b)) => a.cmp(b),
			(
				FieldValue::GeoPoint { latitude: alat, longitude: alng },
				FieldValue::GeoPoint { latitude: blat, longitude: blng },
			) => alat.total_cmp(blat).then_with(|| alng.total_cmp(blng)),
			(FieldValue::Array(a), FieldValue::Array(b)) => {
				for (x, y) in a.iter().zip(b.iter()) {
					let ord = x.compare(y);
					if ord != Ordering::Equal {
						return ord;
					}
				}
				a.len().cmp(&b.len())
			}
			(FieldValue::Map(a), FieldValue::Map(b)) => {
				for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
					let ord = ka.cmp(kb).then_with(|| va.compare(vb));
					if ord != Ordering::Equal {
						return ord;
					}
				}
				a.len().cmp(&b.len())
			}
			// Brackets already matched above
			_ => Ordering::Equal,
		}
	}
}

fn type_mismatch(tag: &str, value: &Json) -> Error {
	Error::InvalidArgument(format!("type mismatch for {}: {}", tag, value))
}

/// Decode a wire `fields` object into a typed field map.
pub fn decode_fields(fields: &Json) -> EbResult<FieldMap> {
	let obj = fields
		.as_object()
		.ok_or_else(|| Error::InvalidArgument("'fields' must be an object".into()))?;
	let mut map = FieldMap::new();
	for (name, value) in obj {
		validate_field_name(name)?;
		map.insert(name.clone(), FieldValue::from_wire(value)?);
	}
	Ok(map)
}

/// Encode a typed field map to the wire `fields` object.
pub fn encode_fields(fields: &FieldMap) -> Json {
	let mut map = serde_json::Map::new();
	for (name, value) in fields {
		map.insert(name.clone(), value.to_wire());
	}
	Json::Object(map)
}

/// Encode a typed field map to the stored `fields` document.
pub fn fields_to_bson(fields: &FieldMap) -> bson::Document {
	let mut doc = bson::Document::new();
	for (name, value) in fields {
		doc.insert(name.clone(), value.to_bson());
	}
	doc
}

/// Decode the stored `fields` document back into a typed field map.
pub fn fields_from_bson(doc: &bson::Document) -> EbResult<FieldMap> {
	let mut map = FieldMap::new();
	for (name, value) in doc {
		map.insert(name.clone(), FieldValue::from_bson(value)?);
	}
	Ok(map)
}

/// Untyped projection of a whole field map, for rules evaluation.
pub fn fields_to_plain(fields: &FieldMap) -> Json {
	let mut map = serde_json::Map::new();
	for (name, value) in fields {
		map.insert(name.clone(), value.to_plain_json());
	}
	Json::Object(map)
}

/// Reject reserved field names (`__name__` style) at the write boundary.
pub fn validate_field_name(name: &str) -> EbResult<()> {
	if name.is_empty() {
		return Err(Error::InvalidArgument("empty field name".into()));
	}
	if name.starts_with("__") && name.ends_with("__") {
		return Err(Error::InvalidArgument(format!("reserved field name: {}", name)));
	}
	Ok(())
}


// vim: ts=4
