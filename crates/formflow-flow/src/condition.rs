//! Boolean conditions over the answer set.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! expr       := and ( ("||" | "or") and )*
//! and        := unary ( ("&&" | "and") unary )*
//! unary      := ("!" | "not") unary | comparison
//! comparison := operand ( OP operand )?
//! OP         := "==" | "!=" | ">" | ">=" | "<" | "<=" | "contains" | "in"
//! operand    := FIELD | STRING | NUMBER | true | false | null
//!             | "[" operand ("," operand)* "]" | "(" expr ")"
//! ```
//!
//! A bare operand is tested for truthiness. Field references resolve against
//! the answer set only; unknown fields are `null`. There is no other access.

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;
use tracing::warn;

use formflow_core::config::ConditionPolicy;
use formflow_core::types::{AnswerSet, AnswerValue};

/// A malformed condition expression.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("invalid condition at offset {offset}: {message}")]
pub struct ConditionError {
    pub offset: usize,
    pub message: String,
}

impl ConditionError {
    fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

// ── Lexer ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    And,
    Or,
    Not,
    Contains,
    In,
    True,
    False,
    Null,
    End,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "'{}'", s),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::Num(n) => write!(f, "{}", n),
            Token::End => write!(f, "end of expression"),
            other => write!(f, "{:?}", other),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, ConditionError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let two = |t: Token| (pos, t);
        match (c, next) {
            ('=', Some('=')) => {
                tokens.push(two(Token::Eq));
                i += 2;
            }
            ('!', Some('=')) => {
                tokens.push(two(Token::Ne));
                i += 2;
            }
            ('>', Some('=')) => {
                tokens.push(two(Token::Ge));
                i += 2;
            }
            ('<', Some('=')) => {
                tokens.push(two(Token::Le));
                i += 2;
            }
            ('&', Some('&')) => {
                tokens.push(two(Token::And));
                i += 2;
            }
            ('|', Some('|')) => {
                tokens.push(two(Token::Or));
                i += 2;
            }
            ('>', _) => {
                tokens.push((pos, Token::Gt));
                i += 1;
            }
            ('<', _) => {
                tokens.push((pos, Token::Lt));
                i += 1;
            }
            ('!', _) => {
                tokens.push((pos, Token::Not));
                i += 1;
            }
            ('(', _) => {
                tokens.push((pos, Token::LParen));
                i += 1;
            }
            (')', _) => {
                tokens.push((pos, Token::RParen));
                i += 1;
            }
            ('[', _) => {
                tokens.push((pos, Token::LBracket));
                i += 1;
            }
            (']', _) => {
                tokens.push((pos, Token::RBracket));
                i += 1;
            }
            (',', _) => {
                tokens.push((pos, Token::Comma));
                i += 1;
            }
            ('"' | '\'', _) => {
                let quote = c;
                let mut value = String::new();
                let mut j = i + 1;
                let mut closed = false;
                while j < chars.len() {
                    let ch = chars[j].1;
                    if ch == '\\' {
                        if let Some((_, escaped)) = chars.get(j + 1) {
                            value.push(*escaped);
                            j += 2;
                            continue;
                        }
                    }
                    if ch == quote {
                        closed = true;
                        break;
                    }
                    value.push(ch);
                    j += 1;
                }
                if !closed {
                    return Err(ConditionError::new(pos, "unterminated string literal"));
                }
                tokens.push((pos, Token::Str(value)));
                i = j + 1;
            }
            _ if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let mut j = i + 1;
                while j < chars.len() && (chars[j].1.is_ascii_digit() || chars[j].1 == '.') {
                    j += 1;
                }
                let end = chars.get(j).map(|(p, _)| *p).unwrap_or(input.len());
                let text = &input[pos..end];
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ConditionError::new(pos, format!("invalid number '{}'", text)))?;
                tokens.push((pos, Token::Num(n)));
                i = j;
            }
            _ if c.is_alphabetic() || c == '_' => {
                let mut j = i + 1;
                while j < chars.len() {
                    let ch = chars[j].1;
                    if ch.is_alphanumeric() || matches!(ch, '_' | '-' | '.') {
                        j += 1;
                    } else {
                        break;
                    }
                }
                let end = chars.get(j).map(|(p, _)| *p).unwrap_or(input.len());
                let word = &input[pos..end];
                let token = match word {
                    "and" | "AND" => Token::And,
                    "or" | "OR" => Token::Or,
                    "not" | "NOT" => Token::Not,
                    "contains" | "includes" => Token::Contains,
                    "in" => Token::In,
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(strip_scope(word).to_string()),
                };
                tokens.push((pos, token));
                i = j;
            }
            _ => {
                return Err(ConditionError::new(
                    pos,
                    format!("unexpected character '{}'", c),
                ));
            }
        }
    }

    tokens.push((input.len(), Token::End));
    Ok(tokens)
}

/// `answers.q1` and `formData.q1` both name field `q1`.
fn strip_scope(word: &str) -> &str {
    word.strip_prefix("answers.")
        .or_else(|| word.strip_prefix("formData."))
        .unwrap_or(word)
}

// ── AST ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    In,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Field(String),
    List(Vec<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// Runtime value during evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Text(s) => !s.trim().is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => AnswerValue::Number(*n).stringify(),
            Value::Text(s) => s.clone(),
            Value::List(items) => items.join(","),
        }
    }

    fn loosely_equals(&self, other: &Value) -> bool {
        if let (Value::List(a), Value::List(b)) = (self, other) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return a == b;
        }
        self.as_text() == other.as_text()
    }

    fn contains(&self, needle: &Value) -> bool {
        let needle = needle.as_text();
        match self {
            Value::Null => false,
            Value::List(items) => items.iter().any(|item| *item == needle),
            other => other.as_text().contains(&needle),
        }
    }
}

impl From<&AnswerValue> for Value {
    fn from(answer: &AnswerValue) -> Self {
        match answer {
            AnswerValue::Text(s) => Value::Text(s.clone()),
            AnswerValue::Number(n) => Value::Number(*n),
            AnswerValue::Many(items) => Value::List(items.clone()),
        }
    }
}

// ── Parser ──────────────────────────────────────────────────────

/// Deepest expression tree the parser builds. Evaluation recurses over the
/// tree, so this also bounds the evaluator's stack use.
const MAX_DEPTH: usize = 64;

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].1
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].0
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn descend(&mut self) -> Result<(), ConditionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ConditionError::new(
                self.offset(),
                "expression nested too deeply",
            ));
        }
        Ok(())
    }

    fn expect(&mut self, expected: Token) -> Result<(), ConditionError> {
        if *self.peek() == expected {
            self.bump();
            Ok(())
        } else {
            Err(ConditionError::new(
                self.offset(),
                format!("expected {}, found {}", expected, self.peek()),
            ))
        }
    }

    // Chains nest to the left, one level per operator.
    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let base = self.depth;
        let mut left = self.parse_and()?;
        while *self.peek() == Token::Or {
            self.bump();
            self.descend()?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let base = self.depth;
        let mut left = self.parse_unary()?;
        while *self.peek() == Token::And {
            self.bump();
            self.descend()?;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if *self.peek() == Token::Not {
            self.bump();
            self.descend()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ConditionError> {
        let left = self.parse_operand()?;
        let op = match self.peek() {
            Token::Eq => CompareOp::Eq,
            Token::Ne => CompareOp::Ne,
            Token::Gt => CompareOp::Gt,
            Token::Ge => CompareOp::Ge,
            Token::Lt => CompareOp::Lt,
            Token::Le => CompareOp::Le,
            Token::Contains => CompareOp::Contains,
            Token::In => CompareOp::In,
            _ => return Ok(left),
        };
        self.bump();
        let right = self.parse_operand()?;
        Ok(Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_operand(&mut self) -> Result<Expr, ConditionError> {
        let offset = self.offset();
        match self.bump() {
            Token::Ident(name) => Ok(Expr::Field(name)),
            Token::Str(s) => Ok(Expr::Literal(Value::Text(s))),
            Token::Num(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::LParen => {
                self.descend()?;
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            Token::LBracket => {
                self.descend()?;
                let mut items = Vec::new();
                if *self.peek() != Token::RBracket {
                    loop {
                        items.push(self.parse_operand()?);
                        if *self.peek() == Token::Comma {
                            self.bump();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(Token::RBracket)?;
                self.depth -= 1;
                Ok(Expr::List(items))
            }
            other => Err(ConditionError::new(
                offset,
                format!("expected a value, found {}", other),
            )),
        }
    }
}

/// A parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    expr: Expr,
}

impl Condition {
    pub fn parse(input: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        if *parser.peek() == Token::End {
            return Err(ConditionError::new(0, "empty expression"));
        }
        let expr = parser.parse_or()?;
        if *parser.peek() != Token::End {
            return Err(ConditionError::new(
                parser.offset(),
                format!("unexpected {}", parser.peek()),
            ));
        }
        Ok(Self { expr })
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn eval(&self, answers: &AnswerSet) -> bool {
        eval_bool(&self.expr, answers)
    }

    /// Every field id the condition reads.
    pub fn fields(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        collect_fields(&self.expr, &mut out);
        out
    }
}

fn collect_fields(expr: &Expr, out: &mut BTreeSet<String>) {
    match expr {
        Expr::Field(name) => {
            out.insert(name.clone());
        }
        Expr::List(items) => items.iter().for_each(|e| collect_fields(e, out)),
        Expr::Not(inner) => collect_fields(inner, out),
        Expr::And(l, r) | Expr::Or(l, r) => {
            collect_fields(l, out);
            collect_fields(r, out);
        }
        Expr::Compare { left, right, .. } => {
            collect_fields(left, out);
            collect_fields(right, out);
        }
        Expr::Literal(_) => {}
    }
}

fn resolve(expr: &Expr, answers: &AnswerSet) -> Value {
    match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Field(name) => answers.get(name).map(Value::from).unwrap_or(Value::Null),
        Expr::List(items) => Value::List(
            items
                .iter()
                .map(|item| resolve(item, answers).as_text())
                .collect(),
        ),
        other => Value::Bool(eval_bool(other, answers)),
    }
}

fn eval_bool(expr: &Expr, answers: &AnswerSet) -> bool {
    match expr {
        Expr::Not(inner) => !eval_bool(inner, answers),
        Expr::And(l, r) => eval_bool(l, answers) && eval_bool(r, answers),
        Expr::Or(l, r) => eval_bool(l, answers) || eval_bool(r, answers),
        Expr::Compare { op, left, right } => {
            let l = resolve(left, answers);
            let r = resolve(right, answers);
            match op {
                CompareOp::Eq => l.loosely_equals(&r),
                CompareOp::Ne => !l.loosely_equals(&r),
                CompareOp::Contains => l.contains(&r),
                CompareOp::In => r.contains(&l),
                CompareOp::Gt | CompareOp::Ge | CompareOp::Lt | CompareOp::Le => {
                    match (l.as_number(), r.as_number()) {
                        (Some(a), Some(b)) => match op {
                            CompareOp::Gt => a > b,
                            CompareOp::Ge => a >= b,
                            CompareOp::Lt => a < b,
                            _ => a <= b,
                        },
                        _ => false,
                    }
                }
            }
        }
        other => resolve(other, answers).truthy(),
    }
}

/// Decides whether a gated action should run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator {
    policy: ConditionPolicy,
}

impl ConditionEvaluator {
    pub fn new(policy: ConditionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ConditionPolicy {
        self.policy
    }

    /// Result used in place of a malformed condition.
    pub fn fallback(&self) -> bool {
        matches!(self.policy, ConditionPolicy::FailOpen)
    }

    /// Evaluate without applying the failure policy.
    /// Absent or blank expressions pass.
    pub fn try_evaluate(
        &self,
        expression: Option<&str>,
        answers: &AnswerSet,
    ) -> Result<bool, ConditionError> {
        match expression.map(str::trim) {
            None | Some("") => Ok(true),
            Some(expr) => Condition::parse(expr).map(|c| c.eval(answers)),
        }
    }

    /// Evaluate, falling back to the policy result on a malformed expression.
    pub fn evaluate(&self, expression: Option<&str>, answers: &AnswerSet) -> bool {
        match self.try_evaluate(expression, answers) {
            Ok(passed) => passed,
            Err(e) => {
                let fallback = self.fallback();
                warn!(
                    expression = expression.unwrap_or_default(),
                    error = %e,
                    fallback,
                    "Malformed condition"
                );
                fallback
            }
        }
    }
}
