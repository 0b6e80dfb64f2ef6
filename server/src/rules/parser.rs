//! Rules language parser.
//!
//! Parses the declarative rules text (`rules_version = '2'; service ... {
//! match /path/{var} { allow op[,op]: if EXPR; } }`) into an AST. Nested
//! match blocks compose path patterns; `{var}` binds one segment and
//! `{var=**}` binds the remaining path recursively. Errors are reported as
//! a `ParseError{line, message}` list and block deployment.

use serde::Serialize;

use super::expr::{CmpOp, Expr, PathPart, PathTemplate};

/// One parse diagnostic.
#[derive(Clone, Debug, Serialize)]
pub struct ParseError {
	pub line: u32,
	pub message: String,
}

impl ParseError {
	fn new(line: u32, message: impl Into<String>) -> Self {
		Self { line, message: message.into() }
	}
}

#[derive(Clone, Debug)]
pub struct RulesFile {
	pub version: Box<str>,
	pub service: Box<str>,
	pub matches: Vec<MatchBlock>,
}

#[derive(Clone, Debug)]
pub struct MatchBlock {
	pub pattern: Vec<PatternSegment>,
	pub line: u32,
	pub statements: Vec<AllowStatement>,
	pub children: Vec<MatchBlock>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatternSegment {
	Literal(Box<str>),
	/// `{var}`: binds exactly one path segment.
	Variable(Box<str>),
	/// `{var=**}`: binds the remaining path, possibly empty.
	RecursiveVariable(Box<str>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
	Allow,
	Deny,
}

/// Operations as written in the source. `read` expands to get+list and
/// `write` to create+update+delete during translation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceOp {
	Read,
	Get,
	List,
	Write,
	Create,
	Update,
	Delete,
}

#[derive(Clone, Debug)]
pub struct AllowStatement {
	pub effect: Effect,
	pub ops: Vec<SourceOp>,
	pub condition: Expr,
	pub line: u32,
}

// --- Lexer ---

#[derive(Clone, Debug, PartialEq)]
enum TokenKind {
	Ident(String),
	Str(String),
	Int(i64),
	Float(f64),
	/// Raw path literal starting with `/`, braces and `$()` kept verbatim.
	PathLit(String),
	Sym(&'static str),
	Eof,
}

#[derive(Clone, Debug)]
struct Token {
	kind: TokenKind,
	line: u32,
}

struct Lexer {
	chars: Vec<char>,
	pos: usize,
	line: u32,
}

impl Lexer {
	fn new(source: &str) -> Self {
		Self { chars: source.chars().collect(), pos: 0, line: 1 }
	}

	fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
		let mut tokens = Vec::new();
		loop {
			let token = self.next_token()?;
			let done = token.kind == TokenKind::Eof;
			tokens.push(token);
			if done {
				return Ok(tokens);
			}
		}
	}

	fn peek(&self) -> Option<char> {
		self.chars.get(self.pos).copied()
	}

	fn peek_at(&self, offset: usize) -> Option<char> {
		self.chars.get(self.pos + offset).copied()
	}

	fn bump(&mut self) -> Option<char> {
		let c = self.peek()?;
		self.pos += 1;
		if c == '\n' {
			self.line += 1;
		}
		Some(c)
	}

	fn skip_trivia(&mut self) {
		loop {
			match self.peek() {
				Some(c) if c.is_whitespace() => {
					self.bump();
				}
				Some('/') if self.peek_at(1) == Some('/') => {
					while let Some(c) = self.peek() {
						if c == '\n' {
							break;
						}
						self.bump();
					}
				}
				_ => return,
			}
		}
	}

	fn next_token(&mut self) -> Result<Token, ParseError> {
		self.skip_trivia();
		let line = self.line;
		let Some(c) = self.peek() else {
			return Ok(Token { kind: TokenKind::Eof, line });
		};

		if c.is_ascii_alphabetic() || c == '_' {
			let mut ident = String::new();
			while let Some(c) = self.peek() {
				if c.is_ascii_alphanumeric() || c == '_' {
					ident.push(c);
					self.bump();
				} else {
					break;
				}
			}
			return Ok(Token { kind: TokenKind::Ident(ident), line });
		}

		if c == '\'' || c == '"' {
			let quote = c;
			self.bump();
			let mut value = String::new();
			loop {
				match self.bump() {
					None => return Err(ParseError::new(line, "unterminated string literal")),
					Some('\\') => match self.bump() {
						None => {
							return Err(ParseError::new(line, "unterminated string literal"));
						}
						Some(escaped) => value.push(escaped),
					},
					Some(c) if c == quote => break,
					Some(c) => value.push(c),
				}
			}
			return Ok(Token { kind: TokenKind::Str(value), line });
		}

		if c.is_ascii_digit() || (c == '-' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()))
		{
			let mut text = String::new();
			if c == '-' {
				text.push(c);
				self.bump();
			}
			let mut is_float = false;
			while let Some(c) = self.peek() {
				if c.is_ascii_digit() {
					text.push(c);
					self.bump();
				} else if c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) {
					is_float = true;
					text.push(c);
					self.bump();
				} else {
					break;
				}
			}
			let kind = if is_float {
				TokenKind::Float(text.parse().map_err(|_| {
					ParseError::new(line, format!("invalid number: {}", text))
				})?)
			} else {
				TokenKind::Int(text.parse().map_err(|_| {
					ParseError::new(line, format!("invalid number: {}", text))
				})?)
			};
			return Ok(Token { kind, line });
		}

		if c == '/' {
			// Path literal: runs until whitespace, `,`, `;`, or an
			// unbalanced `)`; `$()` interpolations may nest parens.
			let mut raw = String::new();
			let mut depth = 0usize;
			while let Some(c) = self.peek() {
				if c.is_whitespace() || c == ',' || c == ';' {
					break;
				}
				if c == '(' {
					depth += 1;
				}
				if c == ')' {
					if depth == 0 {
						break;
					}
					depth -= 1;
				}
				raw.push(c);
				self.bump();
			}
			return Ok(Token { kind: TokenKind::PathLit(raw), line });
		}

		for sym in ["==", "!=", "<=", ">=", "&&", "||"] {
			if self.matches_sym(sym) {
				self.bump();
				self.bump();
				return Ok(Token { kind: TokenKind::Sym(sym), line });
			}
		}
		for sym in ["{", "}", "(", ")", ";", ":", ",", ".", "=", "!", "<", ">", "*", "$"] {
			if self.matches_sym(sym) {
				self.bump();
				return Ok(Token { kind: TokenKind::Sym(sym), line });
			}
		}

		Err(ParseError::new(line, format!("unexpected character: {}", c)))
	}

	fn matches_sym(&self, sym: &str) -> bool {
		sym.chars()
			.enumerate()
			.all(|(i, expected)| self.peek_at(i) == Some(expected))
	}
}

// --- Parser ---

struct Parser {
	tokens: Vec<Token>,
	pos: usize,
	errors: Vec<ParseError>,
}

/// Parse rules source into an AST, or the full list of diagnostics.
pub fn parse_rules(source: &str) -> Result<RulesFile, Vec<ParseError>> {
	let tokens = match Lexer::new(source).tokenize() {
		Ok(tokens) => tokens,
		Err(err) => return Err(vec![err]),
	};
	let mut parser = Parser { tokens, pos: 0, errors: Vec::new() };
	let file = parser.parse_file();
	match file {
		Some(file) if parser.errors.is_empty() => Ok(file),
		_ => {
			if parser.errors.is_empty() {
				parser.errors.push(ParseError::new(1, "invalid rules source"));
			}
			Err(parser.errors)
		}
	}
}

impl Parser {
	fn peek(&self) -> &Token {
		&self.tokens[self.pos.min(self.tokens.len() - 1)]
	}

	fn bump(&mut self) -> Token {
		let token = self.peek().clone();
		if self.pos < self.tokens.len() - 1 {
			self.pos += 1;
		}
		token
	}

	fn error(&mut self, line: u32, message: impl Into<String>) {
		self.errors.push(ParseError::new(line, message));
	}

	fn expect_sym(&mut self, sym: &str) -> bool {
		if matches!(&self.peek().kind, TokenKind::Sym(s) if *s == sym) {
			self.bump();
			true
		} else {
			let token = self.peek().clone();
			self.error(token.line, format!("expected '{}', found {:?}", sym, token.kind));
			false
		}
	}

	fn expect_ident(&mut self, expected: &str) -> bool {
		match &self.peek().kind {
			TokenKind::Ident(name) if name == expected => {
				self.bump();
				true
			}
			other => {
				let line = self.peek().line;
				let found = format!("{:?}", other);
				self.error(line, format!("expected '{}', found {}", expected, found));
				false
			}
		}
	}

	/// Skip ahead to the next statement boundary after an error.
	fn sync(&mut self) {
		loop {
			match &self.peek().kind {
				TokenKind::Eof | TokenKind::Sym("}") => return,
				TokenKind::Sym(";") => {
					self.bump();
					return;
				}
				_ => {
					self.bump();
				}
			}
		}
	}

	fn parse_file(&mut self) -> Option<RulesFile> {
		// rules_version = '2';
		if !self.expect_ident("rules_version") {
			return None;
		}
		self.expect_sym("=");
		let version = match self.bump() {
			Token { kind: TokenKind::Str(v), .. } => v,
			token => {
				self.error(token.line, "expected a version string");
				return None;
			}
		};
		self.expect_sym(";");

		// service cloud.firestore { ... }
		if !self.expect_ident("service") {
			return None;
		}
		let mut service = String::new();
		loop {
			match self.bump() {
				Token { kind: TokenKind::Ident(part), .. } => service.push_str(&part),
				token => {
					self.error(token.line, "expected a service name");
					return None;
				}
			}
			if self.peek().kind == TokenKind::Sym(".") {
				self.bump();
				service.push('.');
			} else {
				break;
			}
		}
		self.expect_sym("{");

		let mut matches = Vec::new();
		while self.peek().kind != TokenKind::Sym("}") && self.peek().kind != TokenKind::Eof {
			if let Some(block) = self.parse_match() {
				matches.push(block);
			} else {
				self.sync();
			}
		}
		self.expect_sym("}");

		Some(RulesFile { version: version.into(), service: service.into(), matches })
	}

	fn parse_match(&mut self) -> Option<MatchBlock> {
		let line = self.peek().line;
		if !self.expect_ident("match") {
			return None;
		}
		let pattern = match self.bump() {
			Token { kind: TokenKind::PathLit(raw), line } => match parse_pattern(&raw, line) {
				Ok(pattern) => pattern,
				Err(err) => {
					self.errors.push(err);
					return None;
				}
			},
			token => {
				self.error(token.line, "expected a match path");
				return None;
			}
		};
		if !self.expect_sym("{") {
			return None;
		}

		let mut statements = Vec::new();
		let mut children = Vec::new();
		loop {
			match &self.peek().kind {
				TokenKind::Sym("}") => {
					self.bump();
					break;
				}
				TokenKind::Eof => {
					let line = self.peek().line;
					self.error(line, "unterminated match block");
					break;
				}
				TokenKind::Ident(name) if name == "match" => {
					if let Some(child) = self.parse_match() {
						children.push(child);
					} else {
						self.sync();
					}
				}
				TokenKind::Ident(name) if name == "allow" || name == "deny" => {
					if let Some(statement) = self.parse_allow() {
						statements.push(statement);
					} else {
						self.sync();
					}
				}
				other => {
					let line = self.peek().line;
					let found = format!("{:?}", other);
					self.error(line, format!("expected 'match', 'allow', or 'deny', found {}", found));
					self.sync();
				}
			}
		}

		Some(MatchBlock { pattern, line, statements, children })
	}

	fn parse_allow(&mut self) -> Option<AllowStatement> {
		let line = self.peek().line;
		let effect = match self.bump() {
			Token { kind: TokenKind::Ident(name), .. } if name == "allow" => Effect::Allow,
			Token { kind: TokenKind::Ident(name), .. } if name == "deny" => Effect::Deny,
			token => {
				self.error(token.line, "expected 'allow' or 'deny'");
				return None;
			}
		};

		let mut ops = Vec::new();
		loop {
			match self.bump() {
				Token { kind: TokenKind::Ident(name), line } => match parse_op(&name) {
					Some(op) => ops.push(op),
					None => {
						self.error(line, format!("unknown operation: {}", name));
						return None;
					}
				},
				token => {
					self.error(token.line, "expected an operation name");
					return None;
				}
			}
			if self.peek().kind == TokenKind::Sym(",") {
				self.bump();
			} else {
				break;
			}
		}

		// `allow read;` is an unconditional grant
		let condition = if self.peek().kind == TokenKind::Sym(";") {
			self.bump();
			Expr::Literal(serde_json::Value::Bool(true))
		} else {
			if !self.expect_sym(":") {
				return None;
			}
			if !self.expect_ident("if") {
				return None;
			}
			let expr = self.parse_expr()?;
			self.expect_sym(";");
			expr
		};

		Some(AllowStatement { effect, ops, condition, line })
	}

	fn parse_expr(&mut self) -> Option<Expr> {
		self.parse_or()
	}

	fn parse_or(&mut self) -> Option<Expr> {
		let mut left = self.parse_and()?;
		while self.peek().kind == TokenKind::Sym("||") {
			self.bump();
			let right = self.parse_and()?;
			left = Expr::Or(Box::new(left), Box::new(right));
		}
		Some(left)
	}

	fn parse_and(&mut self) -> Option<Expr> {
		let mut left = self.parse_cmp()?;
		while self.peek().kind == TokenKind::Sym("&&") {
			self.bump();
			let right = self.parse_cmp()?;
			left = Expr::And(Box::new(left), Box::new(right));
		}
		Some(left)
	}

	fn parse_cmp(&mut self) -> Option<Expr> {
		let left = self.parse_unary()?;
		let op = match &self.peek().kind {
			TokenKind::Sym("==") => Some(CmpOp::Eq),
			TokenKind::Sym("!=") => Some(CmpOp::Ne),
			TokenKind::Sym("<") => Some(CmpOp::Lt),
			TokenKind::Sym("<=") => Some(CmpOp::Le),
			TokenKind::Sym(">") => Some(CmpOp::Gt),
			TokenKind::Sym(">=") => Some(CmpOp::Ge),
			_ => None,
		};
		match op {
			Some(op) => {
				self.bump();
				let right = self.parse_unary()?;
				Some(Expr::Compare(op, Box::new(left), Box::new(right)))
			}
			None => Some(left),
		}
	}

	fn parse_unary(&mut self) -> Option<Expr> {
		if self.peek().kind == TokenKind::Sym("!") {
			self.bump();
			let inner = self.parse_unary()?;
			return Some(Expr::Not(Box::new(inner)));
		}
		self.parse_primary()
	}

	fn parse_primary(&mut self) -> Option<Expr> {
		let token = self.bump();
		let mut expr = match token.kind {
			TokenKind::Str(s) => Expr::Literal(serde_json::Value::String(s)),
			TokenKind::Int(n) => Expr::Literal(serde_json::Value::from(n)),
			TokenKind::Float(f) => Expr::Literal(
				serde_json::Number::from_f64(f)
					.map_or(serde_json::Value::Null, serde_json::Value::Number),
			),
			TokenKind::Sym("(") => {
				let inner = self.parse_expr()?;
				self.expect_sym(")");
				inner
			}
			TokenKind::Ident(name) if name == "true" => {
				Expr::Literal(serde_json::Value::Bool(true))
			}
			TokenKind::Ident(name) if name == "false" => {
				Expr::Literal(serde_json::Value::Bool(false))
			}
			TokenKind::Ident(name) if name == "null" => Expr::Literal(serde_json::Value::Null),
			TokenKind::Ident(name) if name == "get" || name == "exists" => {
				if !self.expect_sym("(") {
					return None;
				}
				let template = match self.bump() {
					Token { kind: TokenKind::PathLit(raw), line } => {
						match parse_path_template(&raw, line) {
							Ok(template) => template,
							Err(err) => {
								self.errors.push(err);
								return None;
							}
						}
					}
					token => {
						self.error(token.line, "expected a document path");
						return None;
					}
				};
				self.expect_sym(")");
				if name == "get" { Expr::Get(template) } else { Expr::Exists(template) }
			}
			TokenKind::Ident(name) => Expr::Ident(name.into()),
			other => {
				self.error(token.line, format!("unexpected token in expression: {:?}", other));
				return None;
			}
		};

		while self.peek().kind == TokenKind::Sym(".") {
			self.bump();
			match self.bump() {
				Token { kind: TokenKind::Ident(field), .. } => {
					expr = Expr::Field(Box::new(expr), field.into());
				}
				token => {
					self.error(token.line, "expected a field name after '.'");
					return None;
				}
			}
		}
		Some(expr)
	}
}

fn parse_op(name: &str) -> Option<SourceOp> {
	match name {
		"read" => Some(SourceOp::Read),
		"get" => Some(SourceOp::Get),
		"list" => Some(SourceOp::List),
		"write" => Some(SourceOp::Write),
		"create" => Some(SourceOp::Create),
		"update" => Some(SourceOp::Update),
		"delete" => Some(SourceOp::Delete),
		_ => None,
	}
}

/// `/users/{uid}/posts/{post=**}` -> pattern segments.
fn parse_pattern(raw: &str, line: u32) -> Result<Vec<PatternSegment>, ParseError> {
	let mut segments = Vec::new();
	for part in raw.split('/') {
		if part.is_empty() {
			continue;
		}
		if let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
			if let Some(name) = inner.strip_suffix("=**") {
				if name.is_empty() {
					return Err(ParseError::new(line, "recursive wildcard needs a name"));
				}
				segments.push(PatternSegment::RecursiveVariable(name.into()));
			} else if inner.is_empty() {
				return Err(ParseError::new(line, "empty pattern variable"));
			} else {
				segments.push(PatternSegment::Variable(inner.into()));
			}
		} else if part.contains('{') || part.contains('}') {
			return Err(ParseError::new(line, format!("malformed pattern segment: {}", part)));
		} else {
			segments.push(PatternSegment::Literal(part.into()));
		}
	}
	if segments.is_empty() {
		return Err(ParseError::new(line, "empty match pattern"));
	}
	Ok(segments)
}

/// `/databases/$(db)/documents/users/$(uid)` -> path template with
/// interpolated variable references.
fn parse_path_template(raw: &str, line: u32) -> Result<PathTemplate, ParseError> {
	let mut parts = Vec::new();
	for part in raw.split('/') {
		if part.is_empty() {
			continue;
		}
		if let Some(inner) = part.strip_prefix("$(").and_then(|p| p.strip_suffix(')')) {
			let mut expr: Option<Expr> = None;
			for field in inner.split('.') {
				if field.is_empty() {
					return Err(ParseError::new(
						line,
						format!("malformed interpolation: {}", part),
					));
				}
				expr = Some(match expr {
					None => Expr::Ident(field.into()),
					Some(base) => Expr::Field(Box::new(base), field.into()),
				});
			}
			match expr {
				Some(expr) => parts.push(PathPart::Interp(expr)),
				None => {
					return Err(ParseError::new(line, "empty interpolation"));
				}
			}
		} else if part.contains('$') {
			return Err(ParseError::new(line, format!("malformed interpolation: {}", part)));
		} else {
			parts.push(PathPart::Literal(part.into()));
		}
	}
	if parts.is_empty() {
		return Err(ParseError::new(line, "empty document path"));
	}
	Ok(parts)
}

#[cfg(test)]
mod tests {
	use super::*;

	const BASIC: &str = r"
rules_version = '2';
service cloud.firestore {
	match /databases/{database}/documents {
		match /users/{uid} {
			allow read: if auth.uid == uid;
			allow write: if false;
		}
	}
}
";

	fn parse(source: &str) -> RulesFile {
		match parse_rules(source) {
			Ok(file) => file,
			Err(errors) => panic!("parse failed: {:?}", errors),
		}
	}

	#[test]
	fn test_parses_basic_file() {
		let file = parse(BASIC);
		assert_eq!(file.version.as_ref(), "2");
		assert_eq!(file.service.as_ref(), "cloud.firestore");
		assert_eq!(file.matches.len(), 1);

		let outer = &file.matches[0];
		assert_eq!(outer.pattern, vec![
			PatternSegment::Literal("databases".into()),
			PatternSegment::Variable("database".into()),
			PatternSegment::Literal("documents".into()),
		]);
		assert_eq!(outer.children.len(), 1);
		let users = &outer.children[0];
		assert_eq!(users.statements.len(), 2);
		assert_eq!(users.statements[0].ops, vec![SourceOp::Read]);
	}

	#[test]
	fn test_recursive_wildcard_and_op_lists() {
		let file = parse(r"
rules_version = '2';
service cloud.firestore {
	match /databases/{db}/documents {
		match /{document=**} {
			allow read, write: if false;
		}
	}
}
");
		let inner = &file.matches[0].children[0];
		assert_eq!(inner.pattern, vec![PatternSegment::RecursiveVariable("document".into())]);
		assert_eq!(inner.statements[0].ops, vec![SourceOp::Read, SourceOp::Write]);
	}

	#[test]
	fn test_get_call_with_interpolation() {
		let file = parse(r"
rules_version = '2';
service cloud.firestore {
	match /databases/{db}/documents {
		match /posts/{post} {
			allow read: if get(/databases/$(db)/documents/users/$(auth.uid)).data.role == 'admin';
		}
	}
}
");
		let statement = &file.matches[0].children[0].statements[0];
		let rendered = format!("{:?}", statement.condition);
		assert!(rendered.contains("Get"));
		assert!(rendered.contains("Interp"));
	}

	#[test]
	fn test_unconditional_allow() {
		let file = parse(r"
rules_version = '2';
service cloud.firestore {
	match /databases/{db}/documents {
		match /public/{doc} {
			allow read;
		}
	}
}
");
		let statement = &file.matches[0].children[0].statements[0];
		assert!(matches!(
			statement.condition,
			Expr::Literal(serde_json::Value::Bool(true))
		));
	}

	#[test]
	fn test_errors_carry_line_numbers() {
		let errors = match parse_rules(r"
rules_version = '2';
service cloud.firestore {
	match /databases/{db}/documents {
		match /users/{uid} {
			allow frobnicate: if true;
		}
	}
}
") {
			Ok(_) => panic!("expected parse errors"),
			Err(errors) => errors,
		};
		assert!(!errors.is_empty());
		assert_eq!(errors[0].line, 6);
		assert!(errors[0].message.contains("frobnicate"));
	}

	#[test]
	fn test_missing_version_is_an_error() {
		assert!(parse_rules("service cloud.firestore {}").is_err());
	}
}

// vim: ts=4
