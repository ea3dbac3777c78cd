//! Sandboxed condition expressions.
//!
//! Conditions are small boolean expressions over the run scope, exposed as
//! the identifier `ctx`:
//!
//! ```text
//! ctx.enabled
//! ctx["inputs.skip_second"] !== true
//! ctx.inputs.count >= 3 && (ctx.mode == 'long' || !ctx.draft)
//! ```
//!
//! Expressions are lexed and parsed into an [`Expr`] tree and evaluated
//! against a read-only [`VariableScope`]. Nothing is executed beyond
//! property access, comparison, and boolean logic. [`evaluate`] turns every
//! lex, parse, or evaluation error into `false`.
//!
//! `length` on an array or string yields its item count or UTF-16 length,
//! so `ctx.drafts.length > 1` works after a fan-out step. Comparisons do not
//! chain: `a == b == c` is a parse error rather than JavaScript's
//! left-to-right `(a == b) == c`. Nesting of `!`, `-`, and parentheses is
//! limited to [`MAX_DEPTH`] levels.

use super::variables::navigate;
use super::VariableScope;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// The identifier bound to the scope inside expressions.
pub const ROOT_IDENT: &str = "ctx";

/// Maximum nesting of unary operators and parentheses.
pub const MAX_DEPTH: usize = 64;

/// Errors produced while parsing or evaluating a condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    /// A character that cannot start any token.
    #[error("Unexpected character '{ch}' at position {pos}")]
    UnexpectedChar {
        /// The character.
        ch: char,
        /// Byte offset in the expression.
        pos: usize,
    },

    /// A string literal without a closing quote.
    #[error("Unterminated string literal")]
    UnterminatedString,

    /// A token that does not fit the grammar.
    #[error("Unexpected token {0}")]
    UnexpectedToken(String),

    /// The expression ended early.
    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    /// An identifier other than `ctx`.
    #[error("Unknown identifier '{0}'")]
    UnknownIdentifier(String),

    /// Property access on `undefined` or `null`.
    #[error("Cannot read property '{0}' of undefined")]
    UndefinedAccess(String),

    /// Nesting deeper than [`MAX_DEPTH`].
    #[error("Expression nests deeper than {0} levels")]
    TooDeep(usize),
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `==`
    LooseEq,
    /// `!=`
    LooseNe,
    /// `===`
    StrictEq,
    /// `!==`
    StrictNe,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::LooseEq => "==",
            Self::LooseNe => "!=",
            Self::StrictEq => "===",
            Self::StrictNe => "!==",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        f.write_str(symbol)
    }
}

/// A parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal; `None` is `undefined`.
    Literal(Option<Value>),
    /// `ctx` followed by property accesses.
    Path(Vec<String>),
    /// `!expr`
    Not(Box<Expr>),
    /// `-expr`
    Neg(Box<Expr>),
    /// `a && b && ...`, at least two operands.
    And(Vec<Expr>),
    /// `a || b || ...`, at least two operands.
    Or(Vec<Expr>),
    /// `a <op> b`
    Compare(Box<Expr>, CmpOp, Box<Expr>),
}

/// Evaluates an expression, failing closed.
///
/// Returns `false` on any parse or evaluation error.
#[must_use]
pub fn evaluate(expression: &str, scope: &VariableScope) -> bool {
    match parse(expression).and_then(|expr| expr.evaluate(scope)) {
        Ok(result) => result,
        Err(e) => {
            debug!(expression, error = %e, "Condition failed to evaluate, treating as false");
            false
        }
    }
}

/// Parses an expression without evaluating it.
///
/// # Errors
///
/// Returns a [`ConditionError`] if the expression is not well formed.
pub fn parse(expression: &str) -> Result<Expr, ConditionError> {
    let tokens = lex(expression)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.or()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(ConditionError::UnexpectedToken(token.to_string())),
    }
}

impl Expr {
    /// Evaluates the expression to a boolean using JavaScript truthiness.
    ///
    /// # Errors
    ///
    /// Returns a [`ConditionError`] on property access through `undefined`.
    pub fn evaluate(&self, scope: &VariableScope) -> Result<bool, ConditionError> {
        Ok(truthy(self.value(scope)?.as_ref()))
    }

    fn value(&self, scope: &VariableScope) -> Result<Option<Value>, ConditionError> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Path(segments) => lookup(scope, segments),
            Self::Not(inner) => Ok(Some(Value::Bool(!truthy(inner.value(scope)?.as_ref())))),
            Self::Neg(inner) => {
                let n = to_number(inner.value(scope)?.as_ref());
                Ok(Some(number_value(-n)))
            }
            Self::And(operands) => {
                let mut last = None;
                for operand in operands {
                    last = operand.value(scope)?;
                    if !truthy(last.as_ref()) {
                        break;
                    }
                }
                Ok(last)
            }
            Self::Or(operands) => {
                let mut last = None;
                for operand in operands {
                    last = operand.value(scope)?;
                    if truthy(last.as_ref()) {
                        break;
                    }
                }
                Ok(last)
            }
            Self::Compare(left, op, right) => {
                let l = left.value(scope)?;
                let r = right.value(scope)?;
                Ok(Some(Value::Bool(compare(l.as_ref(), *op, r.as_ref()))))
            }
        }
    }
}

fn lookup(scope: &VariableScope, segments: &[String]) -> Result<Option<Value>, ConditionError> {
    if segments.is_empty() {
        let all = scope
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<serde_json::Map<_, _>>();
        return Ok(Some(Value::Object(all)));
    }
    if let Some(found) = scope.lookup_segments(segments) {
        return Ok(Some(found.clone()));
    }
    let (last, parent) = segments
        .split_last()
        .ok_or(ConditionError::UnexpectedEnd)?;
    if parent.is_empty() {
        return Ok(None);
    }
    match scope.lookup_segments(parent) {
        Some(value) if !value.is_null() => Ok(property(value, last)),
        _ => Err(ConditionError::UndefinedAccess(last.clone())),
    }
}

fn property(value: &Value, name: &str) -> Option<Value> {
    if let Some(found) = navigate(value, &[name]) {
        return Some(found.clone());
    }
    let length = match (value, name) {
        (Value::Array(items), "length") => items.len(),
        (Value::String(s), "length") => s.encode_utf16().count(),
        _ => return None,
    };
    Some(Value::from(length))
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_) | Value::Object(_)) => true,
    }
}

fn to_number(value: Option<&Value>) -> f64 {
    match value {
        None => f64::NAN,
        Some(Value::Null) => 0.0,
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse().unwrap_or(f64::NAN)
            }
        }
        Some(Value::Array(_) | Value::Object(_)) => f64::NAN,
    }
}

fn number_value(n: f64) -> Value {
    serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
}

fn strict_eq(l: Option<&Value>, r: Option<&Value>) -> bool {
    match (l, r) {
        (None, None) => true,
        (Some(Value::Number(a)), Some(Value::Number(b))) => a.as_f64() == b.as_f64(),
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn loose_eq(l: Option<&Value>, r: Option<&Value>) -> bool {
    let nullish = |v: Option<&Value>| matches!(v, None | Some(Value::Null));
    if nullish(l) || nullish(r) {
        return nullish(l) && nullish(r);
    }
    match (l, r) {
        (Some(Value::String(a)), Some(Value::String(b))) => a == b,
        (Some(a @ (Value::Array(_) | Value::Object(_))), Some(b))
        | (Some(b), Some(a @ (Value::Array(_) | Value::Object(_)))) => a == b,
        _ => to_number(l) == to_number(r),
    }
}

fn compare(l: Option<&Value>, op: CmpOp, r: Option<&Value>) -> bool {
    match op {
        CmpOp::StrictEq => strict_eq(l, r),
        CmpOp::StrictNe => !strict_eq(l, r),
        CmpOp::LooseEq => loose_eq(l, r),
        CmpOp::LooseNe => !loose_eq(l, r),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ordering = match (l, r) {
                (Some(Value::String(a)), Some(Value::String(b))) => Some(a.cmp(b)),
                _ => to_number(l).partial_cmp(&to_number(r)),
            };
            match ordering {
                None => false,
                Some(ordering) => match op {
                    CmpOp::Lt => ordering == Ordering::Less,
                    CmpOp::Le => ordering != Ordering::Greater,
                    CmpOp::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                },
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Bang,
    Minus,
    AndAnd,
    OrOr,
    Cmp(CmpOp),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "'{name}'"),
            Self::Str(s) => write!(f, "\"{s}\""),
            Self::Num(n) => write!(f, "{n}"),
            Self::Dot => f.write_str("'.'"),
            Self::LBracket => f.write_str("'['"),
            Self::RBracket => f.write_str("']'"),
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
            Self::Bang => f.write_str("'!'"),
            Self::Minus => f.write_str("'-'"),
            Self::AndAnd => f.write_str("'&&'"),
            Self::OrOr => f.write_str("'||'"),
            Self::Cmp(op) => write!(f, "'{op}'"),
        }
    }
}

fn lex(input: &str) -> Result<Vec<Token>, ConditionError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let next_is = |i: usize, c: char| chars.get(i).is_some_and(|&(_, ch)| ch == c);

    while let Some(&(pos, ch)) = chars.get(i) {
        match ch {
            c if c.is_whitespace() => i += 1,
            '.' if !chars.get(i + 1).is_some_and(|&(_, c)| c.is_ascii_digit()) => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '&' if next_is(i + 1, '&') => {
                tokens.push(Token::AndAnd);
                i += 2;
            }
            '|' if next_is(i + 1, '|') => {
                tokens.push(Token::OrOr);
                i += 2;
            }
            '=' if next_is(i + 1, '=') => {
                if next_is(i + 2, '=') {
                    tokens.push(Token::Cmp(CmpOp::StrictEq));
                    i += 3;
                } else {
                    tokens.push(Token::Cmp(CmpOp::LooseEq));
                    i += 2;
                }
            }
            '!' => {
                if next_is(i + 1, '=') {
                    if next_is(i + 2, '=') {
                        tokens.push(Token::Cmp(CmpOp::StrictNe));
                        i += 3;
                    } else {
                        tokens.push(Token::Cmp(CmpOp::LooseNe));
                        i += 2;
                    }
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '<' | '>' => {
                let or_equal = next_is(i + 1, '=');
                let op = match (ch, or_equal) {
                    ('<', false) => CmpOp::Lt,
                    ('<', true) => CmpOp::Le,
                    ('>', false) => CmpOp::Gt,
                    _ => CmpOp::Ge,
                };
                tokens.push(Token::Cmp(op));
                i += if or_equal { 2 } else { 1 };
            }
            '"' | '\'' => {
                let quote = ch;
                let mut value = String::new();
                i += 1;
                loop {
                    let Some(&(_, c)) = chars.get(i) else {
                        return Err(ConditionError::UnterminatedString);
                    };
                    i += 1;
                    if c == quote {
                        break;
                    }
                    if c == '\\' {
                        let Some(&(_, escaped)) = chars.get(i) else {
                            return Err(ConditionError::UnterminatedString);
                        };
                        i += 1;
                        value.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                    } else {
                        value.push(c);
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while chars
                    .get(i)
                    .is_some_and(|&(_, c)| c.is_ascii_digit() || c == '.')
                {
                    i += 1;
                }
                let end = chars.get(i).map_or(input.len(), |&(p, _)| p);
                let text = &input[chars[start].0..end];
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ConditionError::UnexpectedToken(text.to_string()))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while chars
                    .get(i)
                    .is_some_and(|&(_, c)| c.is_alphanumeric() || c == '_' || c == '$')
                {
                    i += 1;
                }
                let end = chars.get(i).map_or(input.len(), |&(p, _)| p);
                tokens.push(Token::Ident(input[chars[start].0..end].to_string()));
            }
            other => return Err(ConditionError::UnexpectedChar { ch: other, pos }),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Result<Token, ConditionError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ConditionError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ConditionError> {
        let token = self.advance()?;
        if &token == expected {
            Ok(())
        } else {
            Err(ConditionError::UnexpectedToken(token.to_string()))
        }
    }

    /// Runs `f` one nesting level deeper.
    fn nested(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<Expr, ConditionError>,
    ) -> Result<Expr, ConditionError> {
        if self.depth >= MAX_DEPTH {
            return Err(ConditionError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn or(&mut self) -> Result<Expr, ConditionError> {
        let mut operands = vec![self.and()?];
        while self.peek() == Some(&Token::OrOr) {
            self.pos += 1;
            operands.push(self.and()?);
        }
        Ok(if operands.len() == 1 {
            operands.remove(0)
        } else {
            Expr::Or(operands)
        })
    }

    fn and(&mut self) -> Result<Expr, ConditionError> {
        let mut operands = vec![self.comparison()?];
        while self.peek() == Some(&Token::AndAnd) {
            self.pos += 1;
            operands.push(self.comparison()?);
        }
        Ok(if operands.len() == 1 {
            operands.remove(0)
        } else {
            Expr::And(operands)
        })
    }

    fn comparison(&mut self) -> Result<Expr, ConditionError> {
        let left = self.unary()?;
        if let Some(Token::Cmp(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.unary()?;
            return Ok(Expr::Compare(Box::new(left), op, Box::new(right)));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ConditionError> {
        match self.peek() {
            Some(Token::Bang) => {
                self.pos += 1;
                let inner = self.nested(Self::unary)?;
                Ok(Expr::Not(Box::new(inner)))
            }
            Some(Token::Minus) => {
                self.pos += 1;
                let inner = self.nested(Self::unary)?;
                Ok(Expr::Neg(Box::new(inner)))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, ConditionError> {
        match self.advance()? {
            Token::Num(n) => Ok(Expr::Literal(Some(number_value(n)))),
            Token::Str(s) => Ok(Expr::Literal(Some(Value::String(s)))),
            Token::LParen => {
                let inner = self.nested(Self::or)?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Some(Value::Bool(true)))),
                "false" => Ok(Expr::Literal(Some(Value::Bool(false)))),
                "null" => Ok(Expr::Literal(Some(Value::Null))),
                "undefined" => Ok(Expr::Literal(None)),
                ROOT_IDENT => self.path(),
                _ => Err(ConditionError::UnknownIdentifier(name)),
            },
            other => Err(ConditionError::UnexpectedToken(other.to_string())),
        }
    }

    fn path(&mut self) -> Result<Expr, ConditionError> {
        let mut segments = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    match self.advance()? {
                        Token::Ident(name) => segments.push(name),
                        other => return Err(ConditionError::UnexpectedToken(other.to_string())),
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    match self.advance()? {
                        Token::Str(key) => segments.push(key),
                        Token::Num(n) if n >= 0.0 && n.fract() == 0.0 => {
                            segments.push(format!("{n}"));
                        }
                        other => return Err(ConditionError::UnexpectedToken(other.to_string())),
                    }
                    self.expect(&Token::RBracket)?;
                }
                _ => return Ok(Expr::Path(segments)),
            }
        }
    }
}
