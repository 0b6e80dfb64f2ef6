//! Rule expression evaluation.
//!
//! Expressions reference `auth`, bound match variables, `resource.data`,
//! `request.data` / `request.resource.data`, and `request.time`, compose
//! with `&&` / `||` / `!`, compare with the usual six operators, and read
//! other documents through `get()` / `exists()`. Evaluation errors make the
//! expression false rather than failing the request.

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value as Json;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::path::ResourcePath;
use crate::prelude::*;
use crate::value::fields_from_bson;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
	Eq,
	Ne,
	Lt,
	Le,
	Gt,
	Ge,
}

#[derive(Clone, Debug)]
pub enum Expr {
	Literal(Json),
	Ident(Box<str>),
	Field(Box<Expr>, Box<str>),
	Not(Box<Expr>),
	And(Box<Expr>, Box<Expr>),
	Or(Box<Expr>, Box<Expr>),
	Compare(CmpOp, Box<Expr>, Box<Expr>),
	Get(PathTemplate),
	Exists(PathTemplate),
}

pub type PathTemplate = Vec<PathPart>;

#[derive(Clone, Debug)]
pub enum PathPart {
	Literal(Box<str>),
	Interp(Expr),
}

/// Evaluation context for one access request.
pub struct EvalContext<'a> {
	/// Engine handle for cross-document reads; absent in pure evaluation.
	pub app: Option<&'a App>,
	pub project_id: &'a ProjectId,
	/// `auth`: null for anonymous callers, else `{uid, token}`.
	pub auth: Json,
	/// Variables bound by the rule's match pattern.
	pub bindings: &'a HashMap<Box<str>, Json>,
	/// `resource`: null or `{data}` for the existing stored document.
	pub resource: Json,
	/// `request`: `{auth, time, data?, resource?}`.
	pub request: Json,
}

impl EvalContext<'_> {
	/// Truthiness of an expression; evaluation errors count as false.
	pub async fn eval_truthy(&self, expr: &Expr) -> bool {
		match self.eval(expr).await {
			Ok(value) => value == Json::Bool(true),
			Err(err) => {
				debug!("rule expression error: {}", err);
				false
			}
		}
	}

	pub fn eval<'b>(&'b self, expr: &'b Expr) -> BoxFuture<'b, EbResult<Json>> {
		async move {
			match expr {
				Expr::Literal(value) => Ok(value.clone()),
				Expr::Ident(name) => Ok(self.resolve_ident(name)),
				Expr::Field(base, name) => {
					let base = self.eval(base).await?;
					Ok(base.get(name.as_ref()).cloned().unwrap_or(Json::Null))
				}
				Expr::Not(inner) => {
					let value = self.eval(inner).await?;
					Ok(Json::Bool(value != Json::Bool(true)))
				}
				Expr::And(left, right) => {
					// Short-circuit
					if self.eval(left).await? != Json::Bool(true) {
						return Ok(Json::Bool(false));
					}
					Ok(Json::Bool(self.eval(right).await? == Json::Bool(true)))
				}
				Expr::Or(left, right) => {
					if self.eval(left).await? == Json::Bool(true) {
						return Ok(Json::Bool(true));
					}
					Ok(Json::Bool(self.eval(right).await? == Json::Bool(true)))
				}
				Expr::Compare(op, left, right) => {
					let left = self.eval(left).await?;
					let right = self.eval(right).await?;
					Ok(Json::Bool(compare_json(*op, &left, &right)))
				}
				Expr::Get(template) => {
					let path = self.render_path(template).await?;
					match self.fetch(&path).await? {
						Some(doc) => Ok(doc),
						None => Ok(Json::Null),
					}
				}
				Expr::Exists(template) => {
					let path = self.render_path(template).await?;
					Ok(Json::Bool(self.fetch(&path).await?.is_some()))
				}
			}
		}
		.boxed()
	}

	fn resolve_ident(&self, name: &str) -> Json {
		match name {
			"auth" => self.auth.clone(),
			"request" => self.request.clone(),
			"resource" => self.resource.clone(),
			other => self
				.bindings
				.get(other)
				.cloned()
				.unwrap_or(Json::Null),
		}
	}

	/// Render a `get()`/`exists()` path template into a full resource path
	/// within the requesting project.
	async fn render_path(&self, template: &PathTemplate) -> EbResult<String> {
		let mut segments = Vec::with_capacity(template.len());
		for part in template {
			match part {
				PathPart::Literal(s) => segments.push(s.to_string()),
				PathPart::Interp(expr) => {
					let value = self.eval(expr).await?;
					match value {
						Json::String(s) => segments.push(s),
						Json::Number(n) => segments.push(n.to_string()),
						other => {
							return Err(Error::InvalidArgument(format!(
								"path interpolation is not a string: {}",
								other
							)));
						}
					}
				}
			}
		}
		let joined = segments.join("/");
		if joined.starts_with("projects/") {
			Ok(joined)
		} else {
			Ok(format!("projects/{}/{}", self.project_id, joined))
		}
	}

	/// Cross-document read: `{id, data}` of the referenced document.
	async fn fetch(&self, full_path: &str) -> EbResult<Option<Json>> {
		let Some(app) = self.app else { return Ok(None) };
		let path = ResourcePath::parse(full_path)?;
		if !path.is_document() {
			return Err(Error::InvalidArgument(format!("not a document path: {}", full_path)));
		}
		let doc_id = path
			.document_id()
			.ok_or_else(|| Error::Internal("document path without id".into()))?;
		let container =
			app.catalog.resolve(path.project_id(), path.database_id(), &path.collection_path()?);

		match app.store_adapter.get(&container, doc_id).await? {
			Some(doc) => {
				let fields = match doc.get_document(crate::store_adapter::KEY_FIELDS) {
					Ok(inner) => fields_from_bson(inner)?,
					Err(_) => crate::value::FieldMap::new(),
				};
				let data = crate::value::fields_to_plain(&fields);
				Ok(Some(serde_json::json!({ "id": doc_id, "data": data })))
			}
			None => Ok(None),
		}
	}
}

fn compare_json(op: CmpOp, left: &Json, right: &Json) -> bool {
	match op {
		CmpOp::Eq => json_equals(left, right),
		CmpOp::Ne => !json_equals(left, right),
		CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => match json_order(left, right) {
			Some(ord) => match op {
				CmpOp::Lt => ord == Ordering::Less,
				CmpOp::Le => ord != Ordering::Greater,
				CmpOp::Gt => ord == Ordering::Greater,
				CmpOp::Ge => ord != Ordering::Less,
				_ => false,
			},
			None => false,
		},
	}
}

/// Equality with numeric cross-type tolerance (ints and floats compare by
/// value).
pub fn json_equals(left: &Json, right: &Json) -> bool {
	match (left, right) {
		(Json::Number(a), Json::Number(b)) => match (a.as_f64(), b.as_f64()) {
			(Some(a), Some(b)) => a == b,
			_ => a == b,
		},
		_ => left == right,
	}
}

/// Partial order for rule comparisons: numbers and strings only.
pub fn json_order(left: &Json, right: &Json) -> Option<Ordering> {
	match (left, right) {
		(Json::Number(a), Json::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
		(Json::String(a), Json::String(b)) => Some(a.cmp(b)),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn context<'a>(
		project_id: &'a ProjectId,
		bindings: &'a HashMap<Box<str>, Json>,
		auth: Json,
	) -> EvalContext<'a> {
		EvalContext {
			app: None,
			project_id,
			auth,
			bindings,
			resource: Json::Null,
			request: serde_json::json!({ "time": "2026-01-01T00:00:00Z" }),
		}
	}

	fn project() -> ProjectId {
		match ProjectId::parse("p1") {
			Ok(p) => p,
			Err(err) => panic!("bad project id: {}", err),
		}
	}

	#[tokio::test]
	async fn test_auth_uid_matches_binding() {
		let project = project();
		let mut bindings = HashMap::new();
		bindings.insert("uid".into(), Json::String("u1".to_string()));
		let ctx = context(&project, &bindings, serde_json::json!({ "uid": "u1" }));

		// auth.uid == uid
		let expr = Expr::Compare(
			CmpOp::Eq,
			Box::new(Expr::Field(Box::new(Expr::Ident("auth".into())), "uid".into())),
			Box::new(Expr::Ident("uid".into())),
		);
		assert!(ctx.eval_truthy(&expr).await);

		let mut other = HashMap::new();
		other.insert("uid".into(), Json::String("u2".to_string()));
		let ctx = context(&project, &other, serde_json::json!({ "uid": "u1" }));
		assert!(!ctx.eval_truthy(&expr).await);
	}

	#[tokio::test]
	async fn test_anonymous_auth_is_null() {
		let project = project();
		let bindings = HashMap::new();
		let ctx = context(&project, &bindings, Json::Null);

		// auth.uid on null auth resolves to null, so equality is false
		let expr = Expr::Compare(
			CmpOp::Eq,
			Box::new(Expr::Field(Box::new(Expr::Ident("auth".into())), "uid".into())),
			Box::new(Expr::Literal(Json::String("u1".to_string()))),
		);
		assert!(!ctx.eval_truthy(&expr).await);
	}

	#[tokio::test]
	async fn test_boolean_composition_short_circuits() {
		let project = project();
		let bindings = HashMap::new();
		let ctx = context(&project, &bindings, Json::Null);

		let truthy = Expr::Or(
			Box::new(Expr::Literal(Json::Bool(true))),
			// Never evaluated: Or short-circuits on the first true arm
			Box::new(Expr::Get(vec![])),
		);
		assert!(ctx.eval_truthy(&truthy).await);

		let falsy = Expr::And(
			Box::new(Expr::Literal(Json::Bool(false))),
			Box::new(Expr::Literal(Json::Bool(true))),
		);
		assert!(!ctx.eval_truthy(&falsy).await);
	}

	#[tokio::test]
	async fn test_numeric_comparison() {
		let project = project();
		let bindings = HashMap::new();
		let mut ctx = context(&project, &bindings, Json::Null);
		ctx.resource = serde_json::json!({ "data": { "age": 21 } });

		let expr = Expr::Compare(
			CmpOp::Ge,
			Box::new(Expr::Field(
				Box::new(Expr::Field(Box::new(Expr::Ident("resource".into())), "data".into())),
				"age".into(),
			)),
			Box::new(Expr::Literal(serde_json::json!(18))),
		);
		assert!(ctx.eval_truthy(&expr).await);
	}

	#[test]
	fn test_json_equals_numeric_tolerance() {
		assert!(json_equals(&serde_json::json!(2), &serde_json::json!(2.0)));
		assert!(!json_equals(&serde_json::json!("2"), &serde_json::json!(2)));
	}
}

// vim: ts=4
