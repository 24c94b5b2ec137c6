//! Conjunctive tag search: `tag op operand (AND tag op operand)*`.

use std::fmt;

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

pub mod compiler;
pub mod height;
mod parser;

pub use self::parser::parse;

pub const TX_HEIGHT_TAG: &str = "tx.height";
pub const TX_HASH_TAG: &str = "tx.hash";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Lt,
    Leq,
    Gt,
    Geq,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Lt => "<",
            Operator::Leq => "<=",
            Operator::Gt => ">",
            Operator::Geq => ">=",
        }
    }

    pub fn is_range(&self) -> bool {
        !matches!(self, Operator::Eq)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Number(BigDecimal),
    String(String),
    Time(DateTime<Utc>),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Number(n) => write!(f, "{}", n),
            Operand::String(s) => write!(f, "'{}'", s),
            Operand::Time(t) => write!(f, "TIME {}", t.to_rfc3339()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub tag: String,
    pub op: Operator,
    pub arg: Operand,
}

impl Condition {
    pub fn new(tag: impl Into<String>, op: Operator, arg: Operand) -> Self {
        Condition {
            tag: tag.into(),
            op,
            arg,
        }
    }

    pub fn is_height(&self) -> bool {
        self.tag == TX_HEIGHT_TAG
    }

    /// Integer value of a `tx.height` operand.
    pub fn height_value(&self) -> Result<i64> {
        let invalid = || {
            Error::InvalidQuery(format!(
                "{} {} {}: height must be an integer",
                self.tag, self.op, self.arg
            ))
        };

        match &self.arg {
            Operand::Number(n) if n.with_scale(0) == *n => n.to_i64().ok_or_else(invalid),
            Operand::String(s) => s.trim().parse::<i64>().map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.tag, self.op, self.arg)
    }
}
