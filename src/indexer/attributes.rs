//! Which event attributes are persisted, and in what form.

use std::fmt;

use crate::abci::{Event, EventAttribute};

/// Longest attribute value (in characters, after sanitation) that is stored.
pub const MAX_ATTRIBUTE_VALUE_LEN: usize = 8191;

const EXCLUDED_COMPOSITE_KEYS: &[&str] = &["block_bloom.bloom"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
    Excluded,
    TooLong(usize),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Excluded => write!(f, "excluded key"),
            DropReason::TooLong(len) => write!(
                f,
                "value length {} exceeds {}",
                len, MAX_ATTRIBUTE_VALUE_LEN
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedAttribute {
    pub key: String,
    pub composite_key: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttributeDecision {
    Index(PreparedAttribute),
    NotIndexed,
    Drop {
        composite_key: String,
        reason: DropReason,
    },
}

pub fn composite_key(event_type: &str, key: &str) -> String {
    format!("{}.{}", event_type, key)
}

fn is_printable(c: char) -> bool {
    !(c.is_control() || (c.is_whitespace() && c != ' '))
}

/// Hex-encodes values that contain non-printable characters, so that they
/// can be stored as text and decoded back to the original bytes.
pub fn sanitize_value(value: &str) -> String {
    if value.chars().all(is_printable) {
        value.to_owned()
    } else {
        hex::encode(value.as_bytes())
    }
}

pub fn prepare(event_type: &str, attribute: &EventAttribute) -> AttributeDecision {
    if !attribute.index {
        return AttributeDecision::NotIndexed;
    }

    let composite_key = composite_key(event_type, &attribute.key);
    if EXCLUDED_COMPOSITE_KEYS.contains(&composite_key.as_str()) {
        return AttributeDecision::Drop {
            composite_key,
            reason: DropReason::Excluded,
        };
    }

    let value = sanitize_value(&attribute.value);
    let len = value.chars().count();
    if len > MAX_ATTRIBUTE_VALUE_LEN {
        return AttributeDecision::Drop {
            composite_key,
            reason: DropReason::TooLong(len),
        };
    }

    AttributeDecision::Index(PreparedAttribute {
        key: attribute.key.clone(),
        composite_key,
        value,
    })
}

/// Builds a single-attribute event from `type.key`.
///
/// A composite key without a dot yields an event with no attributes.
pub fn make_indexed_event(composite_key: &str, value: impl Into<String>) -> Event {
    match composite_key.split_once('.') {
        Some((event_type, key)) => {
            Event::new(event_type, vec![EventAttribute::indexed(key, value)])
        }
        None => Event::new(composite_key, vec![]),
    }
}
