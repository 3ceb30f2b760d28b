//! Selection predicates over resource dimensions
//!
//! A selection is a boolean expression such as
//! `type="Light" and (group="A/B" or not interface=*)`. Parsing produces a
//! [`Predicate`] tree; its leaves render to canonical strings that double as
//! input keys for incremental matching.
//!
//! Grammar:
//!
//! ```text
//! predicate ::= term ( 'or' term )*
//! term      ::= factor ( 'and' factor )*
//! factor    ::= property | '(' predicate ')' | 'not' factor
//! property  ::= ('interface' | 'group' | 'type' | 'id') '=' ( '*' | json-string )
//! ```
//!
//! A chain of `and` or `or` operands is folded into a balanced tree, so a
//! selection listing thousands of ids stays shallow. Two or three operands
//! nest to the right. Parentheses and `not` may nest at most
//! [`MAX_NESTING`] levels deep.

use crate::error::{Result, TrellisError};
use crate::types::Dimension;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Deepest nesting of parentheses and `not` a selection may use
pub const MAX_NESTING: usize = 64;

/// Parsed selection expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    /// `dimension="value"`
    Exact { dimension: Dimension, value: String },
    /// `dimension=*`
    Any { dimension: Dimension },
}

impl Predicate {
    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    pub fn exact(dimension: Dimension, value: impl Into<String>) -> Self {
        Predicate::Exact {
            dimension,
            value: value.into(),
        }
    }

    pub fn any(dimension: Dimension) -> Self {
        Predicate::Any { dimension }
    }

    /// Operands in left-to-right order; empty for leaves.
    pub fn children(&self) -> Vec<&Predicate> {
        match self {
            Predicate::And(left, right) | Predicate::Or(left, right) => {
                vec![left.as_ref(), right.as_ref()]
            }
            Predicate::Not(operand) => vec![operand.as_ref()],
            Predicate::Exact { .. } | Predicate::Any { .. } => Vec::new(),
        }
    }

    /// The leaf test if this node is one.
    pub fn as_leaf(&self) -> Option<Leaf> {
        match self {
            Predicate::Exact { dimension, value } => Some(Leaf::exact(*dimension, value.clone())),
            Predicate::Any { dimension } => Some(Leaf::any(*dimension)),
            _ => None,
        }
    }

    /// Whether a `not` appears anywhere in the tree.
    pub fn contains_negation(&self) -> bool {
        match self {
            Predicate::Not(_) => true,
            other => other.children().iter().any(|c| c.contains_negation()),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::And(left, right) => write!(f, "({} and {})", left, right),
            Predicate::Or(left, right) => write!(f, "({} or {})", left, right),
            Predicate::Not(operand) => write!(f, "(not {})", operand),
            Predicate::Exact { dimension, value } => {
                write!(f, "{}", Leaf::exact(*dimension, value.clone()))
            }
            Predicate::Any { dimension } => write!(f, "{}", Leaf::any(*dimension)),
        }
    }
}

/// A single dimension test: exact value or wildcard
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Leaf {
    pub dimension: Dimension,
    /// `None` for the wildcard form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Leaf {
    pub fn exact(dimension: Dimension, value: impl Into<String>) -> Self {
        Self {
            dimension,
            value: Some(value.into()),
        }
    }

    pub fn any(dimension: Dimension) -> Self {
        Self {
            dimension,
            value: None,
        }
    }

    /// Canonical string used to index subscriptions by this condition.
    pub fn input_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            // serde_json gives a quoted, escaped literal the parser reads back
            Some(value) => match serde_json::to_string(value) {
                Ok(quoted) => write!(f, "{}={}", self.dimension, quoted),
                Err(_) => Err(fmt::Error),
            },
            None => write!(f, "{}=*", self.dimension),
        }
    }
}

/// Parse a selection string.
pub fn parse(selection: &str) -> Result<Predicate> {
    let tokens = tokenize(selection)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: selection.len(),
        depth: 0,
    };

    if parser.peek().is_none() {
        return Err(TrellisError::parse(0, "empty selection"));
    }

    let predicate = parser.predicate()?;

    if let Some(token) = parser.peek() {
        return Err(TrellisError::parse(
            token.offset,
            format!("unexpected trailing token {:?}", token.kind),
        ));
    }

    Ok(predicate)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    And,
    Or,
    Not,
    LParen,
    RParen,
    Equals,
    Star,
    Property(Dimension),
    Str(String),
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let offset = i;
        let kind = match c {
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'=' => TokenKind::Equals,
            b'*' => TokenKind::Star,
            b'"' => {
                let close = find_string_end(bytes, i)
                    .ok_or_else(|| TrellisError::parse(offset, "unterminated string"))?;
                let literal = &input[i..=close];
                let value: String = serde_json::from_str(literal)
                    .map_err(|e| TrellisError::parse(offset, format!("invalid string: {}", e)))?;
                i = close + 1;
                tokens.push(Token {
                    kind: TokenKind::Str(value),
                    offset,
                });
                continue;
            }
            c if c.is_ascii_alphabetic() => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                    i += 1;
                }
                let word = &input[start..i];
                let kind = match word {
                    "and" => TokenKind::And,
                    "or" => TokenKind::Or,
                    "not" => TokenKind::Not,
                    "id" => TokenKind::Property(Dimension::Id),
                    "type" => TokenKind::Property(Dimension::Type),
                    "interface" => TokenKind::Property(Dimension::Interface),
                    "group" => TokenKind::Property(Dimension::Group),
                    other => {
                        return Err(TrellisError::parse(
                            start,
                            format!("unknown word '{}'", other),
                        ))
                    }
                };
                tokens.push(Token {
                    kind,
                    offset: start,
                });
                continue;
            }
            _ => return Err(TrellisError::parse(offset, "invalid token")),
        };

        tokens.push(Token { kind, offset });
        i += 1;
    }

    Ok(tokens)
}

/// Index of the closing quote of the string literal opening at `start`.
fn find_string_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Fold operands into a tree of logarithmic depth.
fn balance(
    mut operands: Vec<Predicate>,
    join: fn(Predicate, Predicate) -> Predicate,
) -> Option<Predicate> {
    if operands.len() <= 1 {
        return operands.pop();
    }
    let right = operands.split_off(operands.len() / 2);
    Some(join(balance(operands, join)?, balance(right, join)?))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
    /// Open parentheses and `not`s around the current position
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next_is(&self, kind: &TokenKind) -> bool {
        self.peek().is_some_and(|t| &t.kind == kind)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.peek().map(|t| t.offset).unwrap_or(self.end)
    }

    fn predicate(&mut self) -> Result<Predicate> {
        let offset = self.offset();
        let mut terms = vec![self.term()?];
        while self.next_is(&TokenKind::Or) {
            self.bump();
            terms.push(self.term()?);
        }
        balance(terms, Predicate::or)
            .ok_or_else(|| TrellisError::parse(offset, "expected an expression"))
    }

    fn term(&mut self) -> Result<Predicate> {
        let offset = self.offset();
        let mut factors = vec![self.factor()?];
        while self.next_is(&TokenKind::And) {
            self.bump();
            factors.push(self.factor()?);
        }
        balance(factors, Predicate::and)
            .ok_or_else(|| TrellisError::parse(offset, "expected an expression"))
    }

    fn factor(&mut self) -> Result<Predicate> {
        let offset = self.offset();
        match self.bump().map(|t| t.kind) {
            Some(TokenKind::LParen) => {
                let inner = self.nested(offset, Self::predicate)?;
                let close = self.offset();
                match self.bump().map(|t| t.kind) {
                    Some(TokenKind::RParen) => Ok(inner),
                    _ => Err(TrellisError::parse(close, "expected ')'")),
                }
            }
            Some(TokenKind::Not) => Ok(self.nested(offset, Self::factor)?.not()),
            Some(TokenKind::Property(dimension)) => self.property(dimension),
            Some(other) => Err(TrellisError::parse(
                offset,
                format!("expected property, '(' or 'not', found {:?}", other),
            )),
            None => Err(TrellisError::parse(offset, "unexpected end of selection")),
        }
    }

    /// Run `rule` one nesting level deeper.
    fn nested(
        &mut self,
        offset: usize,
        rule: fn(&mut Self) -> Result<Predicate>,
    ) -> Result<Predicate> {
        if self.depth >= MAX_NESTING {
            return Err(TrellisError::parse(
                offset,
                format!("selection nests deeper than {} levels", MAX_NESTING),
            ));
        }
        self.depth += 1;
        let result = rule(self);
        self.depth -= 1;
        result
    }

    fn property(&mut self, dimension: Dimension) -> Result<Predicate> {
        let offset = self.offset();
        if !self.next_is(&TokenKind::Equals) {
            return Err(TrellisError::parse(offset, "expected '='"));
        }
        self.bump();

        let offset = self.offset();
        match self.bump().map(|t| t.kind) {
            Some(TokenKind::Star) => Ok(Predicate::any(dimension)),
            Some(TokenKind::Str(value)) => Ok(Predicate::exact(dimension, value)),
            _ => Err(TrellisError::parse(
                offset,
                "expected '*' or a string value",
            )),
        }
    }
}
