//! Rules translator.
//!
//! Flattens the parsed match tree into an internal prioritized rule list.
//! Nested match blocks compose their path patterns; `read` expands to
//! get+list and `write` to create+update+delete. Priorities come from
//! pattern specificity (literals over single variables over recursive
//! wildcards), with declaration order breaking ties.

use std::collections::HashMap;

use crate::prelude::*;

use super::expr::Expr;
use super::parser::{
	AllowStatement, Effect, MatchBlock, PatternSegment, RulesFile, SourceOp,
};

/// Operations an access request can carry. `write` exists only in source
/// form and expands during translation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuleOp {
	Read,
	List,
	Create,
	Update,
	Delete,
}

impl RuleOp {
	pub fn as_str(&self) -> &'static str {
		match self {
			RuleOp::Read => "read",
			RuleOp::List => "list",
			RuleOp::Create => "create",
			RuleOp::Update => "update",
			RuleOp::Delete => "delete",
		}
	}
}

/// One flattened, prioritized rule.
#[derive(Clone, Debug)]
pub struct CompiledRule {
	pub pattern: Vec<PatternSegment>,
	/// Rendered pattern for diagnostics (`/users/{uid}`).
	pub source_pattern: Box<str>,
	pub priority: i32,
	pub allow: HashMap<RuleOp, Expr>,
	pub deny: HashMap<RuleOp, Expr>,
	pub line: u32,
}

/// Flatten a parsed rules file into the evaluation-ordered rule list
/// (highest priority first, declaration order on ties).
pub fn translate(file: &RulesFile) -> Vec<CompiledRule> {
	let mut rules = Vec::new();
	for block in &file.matches {
		walk(block, &[], &mut rules);
	}
	// Stable sort keeps declaration order within equal priorities
	rules.sort_by_key(|rule| std::cmp::Reverse(rule.priority));
	rules
}

/// Structural rule invariants checked before deployment.
pub fn validate_rules(rules: &[CompiledRule]) -> EbResult<()> {
	if rules.is_empty() {
		return Err(Error::InvalidArgument(
			"ruleset contains no allow or deny statements".into(),
		));
	}
	for rule in rules {
		if rule.pattern.is_empty() {
			return Err(Error::InvalidArgument(format!(
				"rule at line {} has an empty match pattern",
				rule.line
			)));
		}
		for (i, segment) in rule.pattern.iter().enumerate() {
			if matches!(segment, PatternSegment::RecursiveVariable(_))
				&& i != rule.pattern.len() - 1
			{
				return Err(Error::InvalidArgument(format!(
					"recursive wildcard must be the last segment in {}",
					rule.source_pattern
				)));
			}
		}
		if rule.allow.is_empty() && rule.deny.is_empty() {
			return Err(Error::InvalidArgument(format!(
				"rule {} grants or denies nothing",
				rule.source_pattern
			)));
		}
	}
	Ok(())
}

fn walk(block: &MatchBlock, prefix: &[PatternSegment], out: &mut Vec<CompiledRule>) {
	let mut pattern = prefix.to_vec();
	pattern.extend(block.pattern.iter().cloned());

	if !block.statements.is_empty() {
		out.push(compile_block(&pattern, &block.statements, block.line));
	}
	for child in &block.children {
		walk(child, &pattern, out);
	}
}

fn compile_block(
	pattern: &[PatternSegment],
	statements: &[AllowStatement],
	line: u32,
) -> CompiledRule {
	let mut allow: HashMap<RuleOp, Expr> = HashMap::new();
	let mut deny: HashMap<RuleOp, Expr> = HashMap::new();

	for statement in statements {
		let target = match statement.effect {
			Effect::Allow => &mut allow,
			Effect::Deny => &mut deny,
		};
		for source_op in &statement.ops {
			for op in expand_op(*source_op) {
				match target.remove(op) {
					// Several statements on the same op grant if any does
					Some(existing) => {
						target.insert(
							*op,
							Expr::Or(
								Box::new(existing),
								Box::new(statement.condition.clone()),
							),
						);
					}
					None => {
						target.insert(*op, statement.condition.clone());
					}
				}
			}
		}
	}

	CompiledRule {
		pattern: pattern.to_vec(),
		source_pattern: render_pattern(pattern),
		priority: specificity(pattern),
		allow,
		deny,
		line,
	}
}

fn expand_op(op: SourceOp) -> &'static [RuleOp] {
	match op {
		SourceOp::Read => &[RuleOp::Read, RuleOp::List],
		SourceOp::Get => &[RuleOp::Read],
		SourceOp::List => &[RuleOp::List],
		SourceOp::Write => &[RuleOp::Create, RuleOp::Update, RuleOp::Delete],
		SourceOp::Create => &[RuleOp::Create],
		SourceOp::Update => &[RuleOp::Update],
		SourceOp::Delete => &[RuleOp::Delete],
	}
}

/// Specificity score: literals dominate single variables, recursive
/// wildcards add nothing.
fn specificity(pattern: &[PatternSegment]) -> i32 {
	pattern
		.iter()
		.map(|segment| match segment {
			PatternSegment::Literal(_) => 10,
			PatternSegment::Variable(_) => 5,
			PatternSegment::RecursiveVariable(_) => 0,
		})
		.sum()
}

fn render_pattern(pattern: &[PatternSegment]) -> Box<str> {
	let mut out = String::new();
	// The canonical databases/{db}/documents prefix stays implicit in
	// diagnostics
	let visible: &[PatternSegment] = if pattern.len() >= 3
		&& pattern[0] == PatternSegment::Literal("databases".into())
		&& pattern[2] == PatternSegment::Literal("documents".into())
	{
		&pattern[3..]
	} else {
		pattern
	};
	for segment in visible {
		out.push('/');
		match segment {
			PatternSegment::Literal(s) => out.push_str(s),
			PatternSegment::Variable(v) => {
				out.push('{');
				out.push_str(v);
				out.push('}');
			}
			PatternSegment::RecursiveVariable(v) => {
				out.push('{');
				out.push_str(v);
				out.push_str("=**}");
			}
		}
	}
	if out.is_empty() {
		out.push('/');
	}
	out.into()
}


// vim: ts=4
