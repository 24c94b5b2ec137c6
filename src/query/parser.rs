use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use super::{Condition, Operand, Operator};
use crate::error::{Error, Result};

lazy_static! {
    static ref TOKEN: Regex =
        Regex::new(r"^\s*(?:'(?P<string>[^']*)'|(?P<op><=|>=|=|<|>)|(?P<word>[^\s'<>=]+))")
            .expect("token regex");
    static ref NUMBER: Regex = Regex::new(r"^-?[0-9]+(\.[0-9]+)?$").expect("number regex");
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    String(&'a str),
    Op(Operator),
    Word(&'a str),
}

fn tokenize(query: &str) -> Result<Vec<Token<'_>>> {
    let mut tokens = vec![];
    let mut rest = query;

    while !rest.trim_start().is_empty() {
        let caps = TOKEN.captures(rest).ok_or_else(|| {
            let at = rest.trim_start();
            if at.starts_with('\'') {
                Error::InvalidQuery(format!("unterminated string: {}", at))
            } else {
                Error::InvalidQuery(format!("unexpected input: {}", at))
            }
        })?;

        let token = if let Some(s) = caps.name("string") {
            Token::String(s.as_str())
        } else if let Some(op) = caps.name("op") {
            Token::Op(match op.as_str() {
                "=" => Operator::Eq,
                "<" => Operator::Lt,
                "<=" => Operator::Leq,
                ">" => Operator::Gt,
                _ => Operator::Geq,
            })
        } else if let Some(word) = caps.name("word") {
            Token::Word(word.as_str())
        } else {
            return Err(Error::InvalidQuery(format!("unexpected input: {}", rest)));
        };

        tokens.push(token);
        rest = &rest[caps.get(0).map(|m| m.end()).unwrap_or(rest.len())..];
    }

    Ok(tokens)
}

fn is_keyword(word: &str) -> bool {
    matches!(
        word.to_ascii_uppercase().as_str(),
        "AND" | "OR" | "NOT" | "CONTAINS" | "EXISTS" | "TIME" | "DATE"
    )
}

/// Parses a query string into its list of conditions.
///
/// An empty (or whitespace-only) query yields no conditions.
pub fn parse(query: &str) -> Result<Vec<Condition>> {
    let tokens = tokenize(query)?;
    let mut tokens = tokens.into_iter().peekable();
    let mut conditions = vec![];

    loop {
        let tag = match tokens.next() {
            None if conditions.is_empty() => return Ok(conditions),
            None => return Err(Error::InvalidQuery("query ends with AND".to_owned())),
            Some(Token::Word(word)) if !is_keyword(word) => word,
            Some(other) => {
                return Err(Error::InvalidQuery(format!(
                    "expected a tag, found {:?}",
                    other
                )))
            }
        };

        let op = match tokens.next() {
            Some(Token::Op(op)) => op,
            Some(Token::Word(word))
                if word.eq_ignore_ascii_case("CONTAINS") || word.eq_ignore_ascii_case("EXISTS") =>
            {
                return Err(Error::InvalidQuery(format!(
                    "operator {} is not supported (tag {})",
                    word.to_ascii_uppercase(),
                    tag
                )))
            }
            Some(other) => {
                return Err(Error::InvalidQuery(format!(
                    "expected an operator after {}, found {:?}",
                    tag, other
                )))
            }
            None => {
                return Err(Error::InvalidQuery(format!(
                    "missing operator after {}",
                    tag
                )))
            }
        };

        let arg = match tokens.next() {
            Some(Token::String(s)) => Operand::String(s.to_owned()),
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("TIME") => {
                Operand::Time(parse_time(tag, tokens.next())?)
            }
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("DATE") => {
                Operand::Time(parse_date(tag, tokens.next())?)
            }
            Some(Token::Word(word)) if NUMBER.is_match(word) => {
                Operand::Number(BigDecimal::from_str(word).map_err(|_| {
                    Error::InvalidQuery(format!("invalid number {} for tag {}", word, tag))
                })?)
            }
            Some(other) => {
                return Err(Error::InvalidQuery(format!(
                    "invalid operand for {} {}: {:?}",
                    tag, op, other
                )))
            }
            None => {
                return Err(Error::InvalidQuery(format!(
                    "missing operand for {} {}",
                    tag, op
                )))
            }
        };

        conditions.push(Condition::new(tag, op, arg));

        match tokens.next() {
            None => return Ok(conditions),
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("AND") => continue,
            Some(Token::Word(word))
                if word.eq_ignore_ascii_case("OR") || word.eq_ignore_ascii_case("NOT") =>
            {
                return Err(Error::InvalidQuery(format!(
                    "{} is not supported, conditions can only be joined with AND",
                    word.to_ascii_uppercase()
                )))
            }
            Some(other) => {
                return Err(Error::InvalidQuery(format!(
                    "expected AND, found {:?}",
                    other
                )))
            }
        }
    }
}

fn parse_time(tag: &str, token: Option<Token<'_>>) -> Result<DateTime<Utc>> {
    match token {
        Some(Token::Word(value)) => DateTime::parse_from_rfc3339(value)
            .map(|time| time.with_timezone(&Utc))
            .map_err(|e| Error::InvalidQuery(format!("invalid TIME {} for {}: {}", value, tag, e))),
        _ => Err(Error::InvalidQuery(format!("TIME needs a value for {}", tag))),
    }
}

fn parse_date(tag: &str, token: Option<Token<'_>>) -> Result<DateTime<Utc>> {
    let invalid = |value: &str| Error::InvalidQuery(format!("invalid DATE {} for {}", value, tag));
    match token {
        Some(Token::Word(value)) => {
            let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| invalid(value))?;
            let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| invalid(value))?;
            Ok(Utc.from_utc_datetime(&midnight))
        }
        _ => Err(Error::InvalidQuery(format!("DATE needs a value for {}", tag))),
    }
}
