//! Sandboxed arithmetic for `unit_conversion` transformations.
//!
//! Rules documents come from users, so formulas are never handed to a general
//! evaluator. The grammar is closed:
//!
//! ```text
//! expr    := term (("+" | "-") term)*
//! term    := unary (("*" | "/") unary)*
//! unary   := "-" unary | "+" unary | primary
//! primary := NUMBER | "value" | "(" expr ")"
//! ```
//!
//! Nesting and expression height are capped at [`MAX_DEPTH`], so a hostile
//! document cannot exhaust the stack while parsing or evaluating.
//!
//! ```rust,ignore
//! let f = Formula::parse("value / 1000")?;
//! assert_eq!(f.eval(5000.0)?, 5.0);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::FormulaError;

/// The single variable a formula may reference.
pub const VARIABLE: &str = "value";

/// Deepest nesting (parentheses, signs, operator chains) a formula may have.
pub const MAX_DEPTH: usize = 64;

/// A parsed formula. Serialized as its source text; deserializing parses it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Formula {
    source: String,
    expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Value,
    Neg(Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

impl Formula {
    /// Parse formula text.
    pub fn parse(text: &str) -> Result<Self, FormulaError> {
        let tokens = tokenize(text)?;
        if tokens.is_empty() {
            return Err(FormulaError::Empty);
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let (expr, _) = parser.expr()?;
        if parser.pos < parser.tokens.len() {
            return Err(FormulaError::TrailingInput(parser.pos));
        }
        Ok(Self {
            source: text.trim().to_string(),
            expr,
        })
    }

    /// The formula text as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluate with `value` bound to the given number.
    pub fn eval(&self, value: f64) -> Result<f64, FormulaError> {
        let result = self.expr.eval(value);
        if result.is_finite() {
            Ok(result)
        } else {
            Err(FormulaError::NonFinite)
        }
    }
}

impl TryFrom<String> for Formula {
    type Error = FormulaError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        Self::parse(&text)
    }
}

impl From<Formula> for String {
    fn from(formula: Formula) -> Self {
        formula.source
    }
}

impl Expr {
    fn eval(&self, value: f64) -> f64 {
        match self {
            Expr::Number(n) => *n,
            Expr::Value => value,
            Expr::Neg(inner) => -inner.eval(value),
            Expr::Binary(lhs, op, rhs) => {
                let (a, b) = (lhs.eval(value), rhs.eval(value));
                match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                }
            }
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, FormulaError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(c));
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
            c if c.is_ascii_digit()
                || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // exponent part: 1e3, 2.5E-4
                if i < chars.len() && matches!(chars[i], 'e' | 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && matches!(chars[j], '+' | '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        while j < chars.len() && chars[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let n = literal
                    .parse::<f64>()
                    .map_err(|_| FormulaError::InvalidNumber(literal.clone()))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(FormulaError::UnexpectedChar { ch: other, pos: i }),
        }
    }

    Ok(tokens)
}

/// Parsed expression and the height of its tree.
type Parsed = (Expr, usize);

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<Parsed, FormulaError> {
        let (mut lhs, mut height) = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek() {
            let op = if *op == '+' { BinOp::Add } else { BinOp::Sub };
            self.pos += 1;
            let (rhs, rhs_height) = self.term()?;
            height = grow(height.max(rhs_height))?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok((lhs, height))
    }

    fn term(&mut self) -> Result<Parsed, FormulaError> {
        let (mut lhs, mut height) = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek() {
            let op = if *op == '*' { BinOp::Mul } else { BinOp::Div };
            self.pos += 1;
            let (rhs, rhs_height) = self.unary()?;
            height = grow(height.max(rhs_height))?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok((lhs, height))
    }

    // Every recursive path passes through here.
    fn unary(&mut self) -> Result<Parsed, FormulaError> {
        self.depth = grow(self.depth)?;
        let parsed = match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                let (inner, height) = self.unary()?;
                (Expr::Neg(Box::new(inner)), grow(height)?)
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()?
            }
            _ => self.primary()?,
        };
        self.depth -= 1;
        Ok(parsed)
    }

    fn primary(&mut self) -> Result<Parsed, FormulaError> {
        let pos = self.pos;
        match self.next() {
            Some(Token::Number(n)) => Ok((Expr::Number(n), 1)),
            Some(Token::Ident(name)) if name == VARIABLE => Ok((Expr::Value, 1)),
            Some(Token::Ident(name)) => Err(FormulaError::UnknownVariable(name)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(_) => Err(FormulaError::TrailingInput(self.pos - 1)),
                    None => Err(FormulaError::UnexpectedEnd),
                }
            }
            Some(_) => Err(FormulaError::TrailingInput(pos)),
            None => Err(FormulaError::UnexpectedEnd),
        }
    }
}

fn grow(level: usize) -> Result<usize, FormulaError> {
    if level >= MAX_DEPTH {
        Err(FormulaError::TooDeep(MAX_DEPTH))
    } else {
        Ok(level + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(text: &str, value: f64) -> Result<f64, FormulaError> {
        Formula::parse(text)?.eval(value)
    }

    #[test]
    fn test_unit_conversions() {
        assert_eq!(eval("value / 1000", 5000.0).unwrap(), 5.0);
        assert_eq!(eval("value / 10", 125.0).unwrap(), 12.5);
        assert_eq!(eval("value * 1000", 1.5).unwrap(), 1500.0);
        assert_eq!(eval(".5 * value", 3.0).unwrap(), 1.5);
    }

    #[test]
    fn test_precedence_and_parens() {
        assert_eq!(eval("1 + value * 2", 3.0).unwrap(), 7.0);
        assert_eq!(eval("(1 + value) * 2", 3.0).unwrap(), 8.0);
        assert_eq!(eval("value - 1 - 1", 3.0).unwrap(), 1.0);
        assert_eq!(eval("value / 2 / 2", 8.0).unwrap(), 2.0);
        assert_eq!(eval("-value + 10", 4.0).unwrap(), 6.0);
        assert_eq!(eval("value * 1e3", 2.0).unwrap(), 2000.0);
    }

    #[test]
    fn test_division_by_zero_is_error() {
        assert_eq!(eval("value / 0", 1.0), Err(FormulaError::NonFinite));
    }

    #[test]
    fn test_rejects_code() {
        assert_eq!(
            Formula::parse("process.exit(1)"),
            Err(FormulaError::UnexpectedChar { ch: '.', pos: 7 })
        );
        assert_eq!(
            Formula::parse("x / 1000"),
            Err(FormulaError::UnknownVariable("x".into()))
        );
        assert!(matches!(
            Formula::parse("value; 1"),
            Err(FormulaError::UnexpectedChar { ch: ';', .. })
        ));
    }

    #[test]
    fn test_malformed() {
        assert_eq!(Formula::parse("  "), Err(FormulaError::Empty));
        assert_eq!(Formula::parse("value /"), Err(FormulaError::UnexpectedEnd));
        assert_eq!(Formula::parse("(value"), Err(FormulaError::UnexpectedEnd));
        assert!(matches!(Formula::parse("value value"), Err(FormulaError::TrailingInput(1))));
        assert!(matches!(Formula::parse("1..2"), Err(FormulaError::InvalidNumber(_))));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let parens = format!("{}value{}", "(".repeat(10_000), ")".repeat(10_000));
        assert_eq!(Formula::parse(&parens), Err(FormulaError::TooDeep(MAX_DEPTH)));

        let signs = format!("{}value", "-".repeat(10_000));
        assert_eq!(Formula::parse(&signs), Err(FormulaError::TooDeep(MAX_DEPTH)));

        let chain = format!("value{}", " + 1".repeat(10_000));
        assert_eq!(Formula::parse(&chain), Err(FormulaError::TooDeep(MAX_DEPTH)));
    }

    #[test]
    fn test_moderate_nesting_is_accepted() {
        let parens = format!("{}value{} / 10", "(".repeat(20), ")".repeat(20));
        assert_eq!(eval(&parens, 50.0).unwrap(), 5.0);
        assert_eq!(eval("--value", 3.0).unwrap(), 3.0);
    }

    #[test]
    fn test_serde_uses_source_text() {
        let formula: Formula = serde_json::from_str(r#""value / 1000""#).unwrap();
        assert_eq!(formula.as_str(), "value / 1000");
        assert_eq!(serde_json::to_string(&formula).unwrap(), r#""value / 1000""#);

        let err = serde_json::from_str::<Formula>(r#""valeu / 1000""#).unwrap_err();
        assert!(err.to_string().contains("valeu"));
    }
}
