//! Rule compiler
//!
//! ```text
//! rule       := level ":" expr (logical_op expr)*
//! level      := "critical" | "warning" | "normal"
//! expr       := comparator (["-"] number unit? | "historical") (arith_op number)?
//! logical_op := "AND" | "OR"
//! arith_op   := "*" | "/" | "+" | "-"
//! ```
//!
//! AND and OR have equal precedence and fold left to right.

use std::fmt;
use std::str::FromStr;

use super::lexer::{tokenize, Token};
use super::RuleSyntaxError;
use crate::alerts::Level;
use crate::units::from_format;

const HISTORICAL: &str = "historical";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl Comparator {
    fn from_symbol(symbol: &str) -> Option<Self> {
        let op = match symbol {
            ">" => Comparator::Gt,
            ">=" => Comparator::Ge,
            "<" => Comparator::Lt,
            "<=" => Comparator::Le,
            "==" => Comparator::Eq,
            "!=" => Comparator::Ne,
            _ => return None,
        };
        Some(op)
    }

    /// `value <op> threshold`
    pub fn apply(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Gt => value > threshold,
            Comparator::Ge => value >= threshold,
            Comparator::Lt => value < threshold,
            Comparator::Le => value <= threshold,
            Comparator::Eq => value == threshold,
            Comparator::Ne => value != threshold,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
        }
    }
}

/// Right-hand side of an expression
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Threshold {
    /// Literal, already converted to base units
    Value(f64),
    /// Mean of the target's retained history, resolved at evaluation time
    Historical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Mul,
    Div,
    Add,
    Sub,
}

impl ArithOp {
    fn from_char(c: char) -> Option<Self> {
        let op = match c {
            '*' => ArithOp::Mul,
            '/' => ArithOp::Div,
            '+' => ArithOp::Add,
            '-' => ArithOp::Sub,
            _ => return None,
        };
        Some(op)
    }
}

/// Adjustment applied to a resolved threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Modifier {
    Identity,
    Arith(ArithOp, f64),
}

impl Modifier {
    pub fn apply(self, threshold: f64) -> f64 {
        match self {
            Modifier::Identity => threshold,
            Modifier::Arith(ArithOp::Mul, rhs) => threshold * rhs,
            Modifier::Arith(ArithOp::Div, rhs) => threshold / rhs,
            Modifier::Arith(ArithOp::Add, rhs) => threshold + rhs,
            Modifier::Arith(ArithOp::Sub, rhs) => threshold - rhs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    pub fn apply(self, lhs: bool, rhs: bool) -> bool {
        match self {
            LogicalOp::And => lhs && rhs,
            LogicalOp::Or => lhs || rhs,
        }
    }
}

/// A single comparison, e.g. `> historical * 1.2`
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    comparator: Comparator,
    threshold: Threshold,
    modifier: Modifier,
}

impl Expression {
    pub fn comparator(&self) -> Comparator {
        self.comparator
    }

    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    pub fn modifier(&self) -> Modifier {
        self.modifier
    }
}

/// A compiled rule. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    level: Level,
    expressions: Vec<Expression>,
    connectors: Vec<LogicalOp>,
    raw: String,
}

impl Rule {
    pub fn parse(raw: &str) -> Result<Rule, RuleSyntaxError> {
        let tokens = tokenize(raw)?;
        Parser {
            raw,
            tokens,
            pos: 0,
        }
        .rule()
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn expressions(&self) -> &[Expression] {
        &self.expressions
    }

    /// Connectors between consecutive expressions; one fewer than expressions
    pub fn connectors(&self) -> &[LogicalOp] {
        &self.connectors
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl FromStr for Rule {
    type Err = RuleSyntaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rule::parse(s)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Sort rules most severe first, keeping source order within a level
pub fn sort_by_severity(rules: &mut [Rule]) {
    rules.sort_by_key(|rule| rule.level.rank());
}

struct Parser<'a> {
    raw: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: impl Into<String>) -> RuleSyntaxError {
        RuleSyntaxError::new(self.raw, reason)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn rule(mut self) -> Result<Rule, RuleSyntaxError> {
        let level = match self.next() {
            Some(Token::Word(word)) => match word.as_str() {
                "critical" => Level::Critical,
                "warning" => Level::Warning,
                "normal" => Level::Normal,
                _ => return Err(self.error(format!("unknown level {word:?}"))),
            },
            _ => return Err(self.error("rule must start with a level")),
        };

        if self.next() != Some(Token::Colon) {
            return Err(self.error("expected ':' after the level"));
        }

        let mut expressions = vec![self.expression()?];
        let mut connectors = Vec::new();

        while let Some(token) = self.next() {
            let connector = match token {
                Token::Word(word) if word == "AND" => LogicalOp::And,
                Token::Word(word) if word == "OR" => LogicalOp::Or,
                other => return Err(self.error(format!("expected AND or OR, found {other:?}"))),
            };
            connectors.push(connector);
            expressions.push(self.expression()?);
        }

        Ok(Rule {
            level,
            expressions,
            connectors,
            raw: self.raw.to_string(),
        })
    }

    fn expression(&mut self) -> Result<Expression, RuleSyntaxError> {
        let comparator = match self.next() {
            Some(Token::Comparator(symbol)) => Comparator::from_symbol(symbol)
                .ok_or_else(|| self.error(format!("unknown comparator {symbol:?}")))?,
            other => return Err(self.error(format!("expected a comparator, found {other:?}"))),
        };

        let threshold = match self.peek() {
            Some(Token::Word(word)) if word == HISTORICAL => {
                self.pos += 1;
                Threshold::Historical
            }
            _ => Threshold::Value(self.magnitude()?),
        };

        let modifier = match self.peek() {
            Some(Token::Arith(c)) => {
                let op = ArithOp::from_char(*c)
                    .ok_or_else(|| self.error(format!("unknown operator {c:?}")))?;
                self.pos += 1;
                Modifier::Arith(op, self.signed_number()?)
            }
            _ => Modifier::Identity,
        };

        Ok(Expression {
            comparator,
            threshold,
            modifier,
        })
    }

    fn signed_number(&mut self) -> Result<f64, RuleSyntaxError> {
        let negative = matches!(self.peek(), Some(Token::Arith('-')));
        if negative {
            self.pos += 1;
        }
        match self.next() {
            Some(Token::Number(value)) => Ok(if negative { -value } else { value }),
            other => Err(self.error(format!("expected a number, found {other:?}"))),
        }
    }

    /// A number with an optional magnitude suffix, converted to base units
    fn magnitude(&mut self) -> Result<f64, RuleSyntaxError> {
        let value = self.signed_number()?;

        let unit = match self.peek() {
            Some(Token::Word(word)) if word != "AND" && word != "OR" => word.clone(),
            _ => return Ok(value),
        };
        self.pos += 1;

        from_format(value, &unit).ok_or_else(|| self.error(format!("unknown unit {unit:?}")))
    }
}
