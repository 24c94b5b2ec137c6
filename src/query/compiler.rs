//! Turns a condition list into a [`CompiledQuery`] and renders it as SQL.
//!
//! The generated text only ever contains table aliases, fixed column names
//! and operator keywords from [`Operator`]; every value (tags, operands,
//! heights and limits) is passed as a bound parameter.

use std::fmt::Write;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use itertools::Itertools;

use super::height::{dedup_height, look_for_height_range, HeightRange};
use super::{Condition, Operand, Operator};
use crate::error::Result;

pub const HARD_SEARCH_LIMIT: u32 = 100_000;

const NUMERIC_PATTERN: &str = r"^-?[0-9]+(\.[0-9]+)?$";
const TIMESTAMP_PATTERN: &str =
    r"^[0-9]{4}-[0-9]{2}-[0-9]{2}([T ][0-9]{2}:[0-9]{2}:[0-9]{2}(\.[0-9]+)?(Z|[+-][0-9]{2}:?[0-9]{2})?)?$";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeightFilter {
    Range(HeightRange),
    Exact(i64),
    /// Cursor fallback: everything at or below the chain tip seen at query time.
    AtOrBelow(i64),
}

impl HeightFilter {
    pub fn contains(&self, height: i64) -> bool {
        match self {
            HeightFilter::Range(range) => range.contains(height),
            HeightFilter::Exact(h) => height == *h,
            HeightFilter::AtOrBelow(tip) => height <= *tip,
        }
    }
}

/// One derived table of transaction ids matching a single condition.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateTable {
    pub alias: String,
    pub composite_key: String,
    pub op: Operator,
    pub arg: Operand,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledQuery {
    pub height: HeightFilter,
    /// Intersected; empty means the height filter alone selects the result.
    pub candidates: Vec<CandidateTable>,
    pub limit: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BindValue {
    BigInt(i64),
    Text(String),
    Numeric(BigDecimal),
    Timestamp(DateTime<Utc>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SqlStatement {
    pub text: String,
    pub binds: Vec<BindValue>,
}

#[derive(Clone, Copy, Debug)]
pub struct CompileOptions {
    pub limit: u32,
    /// Heights below the tip covered by an empty query.
    pub default_window_heights: i64,
}

pub fn effective_limit(requested: Option<u32>) -> u32 {
    requested
        .unwrap_or(HARD_SEARCH_LIMIT)
        .min(HARD_SEARCH_LIMIT)
}

/// Compiles `conditions`.
///
/// `latest_height` is only called when the query has no explicit height
/// constraint. Returns `None` when such a query runs against an empty store.
pub fn compile<F>(
    conditions: Vec<Condition>,
    options: &CompileOptions,
    latest_height: F,
) -> Result<Option<CompiledQuery>>
where
    F: FnOnce() -> Result<Option<i64>>,
{
    let limit = options.limit.min(HARD_SEARCH_LIMIT);

    if conditions.is_empty() {
        let tip = match latest_height()? {
            Some(tip) => tip,
            None => return Ok(None),
        };
        let lower = tip.saturating_sub(options.default_window_heights).max(0);
        return Ok(Some(CompiledQuery {
            height: HeightFilter::Range(HeightRange {
                lower: Some(super::height::HeightBound {
                    value: lower,
                    inclusive: true,
                }),
                upper: Some(super::height::HeightBound {
                    value: tip,
                    inclusive: true,
                }),
            }),
            candidates: vec![],
            limit,
        }));
    }

    let (conditions, mut height_info) = dedup_height(conditions)?;
    height_info.set_range(look_for_height_range(&conditions)?);

    let height = if height_info.has_range() {
        HeightFilter::Range(height_info.range)
    } else if height_info.has_height() {
        HeightFilter::Exact(height_info.height)
    } else {
        match latest_height()? {
            Some(tip) => HeightFilter::AtOrBelow(tip),
            None => return Ok(None),
        }
    };

    let candidates = conditions
        .into_iter()
        .filter(|c| !c.is_height())
        .enumerate()
        .map(|(i, c)| CandidateTable {
            alias: format!("ftea{}", i + 1),
            composite_key: c.tag,
            op: c.op,
            arg: c.arg,
        })
        .collect();

    Ok(Some(CompiledQuery {
        height,
        candidates,
        limit,
    }))
}

struct Binder {
    binds: Vec<BindValue>,
}

impl Binder {
    fn push(&mut self, value: BindValue) -> String {
        self.binds.push(value);
        format!("${}", self.binds.len())
    }
}

fn render_candidate(candidate: &CandidateTable, binder: &mut Binder) -> String {
    let alias = &candidate.alias;
    let key = binder.push(BindValue::Text(candidate.composite_key.clone()));
    let (value_expr, bind) = match &candidate.arg {
        // text ranges order bytewise
        Operand::String(s) if candidate.op.is_range() => (
            format!("{}.value COLLATE \"C\"", alias),
            BindValue::Text(s.clone()),
        ),
        Operand::String(s) => (format!("{}.value", alias), BindValue::Text(s.clone())),
        Operand::Number(n) => (
            format!(
                "(CASE WHEN {a}.value ~ '{p}' THEN {a}.value::numeric END)",
                a = alias,
                p = NUMERIC_PATTERN
            ),
            BindValue::Numeric(n.clone()),
        ),
        Operand::Time(t) => (
            format!(
                "(CASE WHEN {a}.value ~ '{p}' THEN {a}.value::timestamptz END)",
                a = alias,
                p = TIMESTAMP_PATTERN
            ),
            BindValue::Timestamp(*t),
        ),
    };
    let value = binder.push(bind);

    format!(
        "    SELECT DISTINCT {a}.tx_id FROM filtered_tx_event_attributes {a} \
         WHERE {a}.composite_key = {k} AND {v} {op} {val}\n",
        a = alias,
        k = key,
        v = value_expr,
        op = candidate.op.as_sql(),
        val = value
    )
}

impl CompiledQuery {
    pub fn to_sql(&self) -> SqlStatement {
        let mut binder = Binder { binds: vec![] };
        let mut sql = String::with_capacity(1024);

        let height_clause = match &self.height {
            HeightFilter::Range(range) => {
                let mut parts = vec![];
                if let Some(lower) = range.lower {
                    let op = if lower.inclusive { ">=" } else { ">" };
                    let p = binder.push(BindValue::BigInt(lower.value));
                    parts.push(format!("tr.height {} {}", op, p));
                }
                if let Some(upper) = range.upper {
                    let op = if upper.inclusive { "<=" } else { "<" };
                    let p = binder.push(BindValue::BigInt(upper.value));
                    parts.push(format!("tr.height {} {}", op, p));
                }
                parts.join(" AND ")
            }
            HeightFilter::Exact(height) => {
                format!("tr.height = {}", binder.push(BindValue::BigInt(*height)))
            }
            HeightFilter::AtOrBelow(tip) => {
                format!("tr.height <= {}", binder.push(BindValue::BigInt(*tip)))
            }
        };
        let limit = binder.push(BindValue::BigInt(self.limit as i64));

        // write! into a String cannot fail
        let _ = write!(
            sql,
            "WITH filtered_heights AS (\n\
             \x20   SELECT DISTINCT tr.rowid, tr.height\n\
             \x20   FROM tx_results tr\n\
             \x20   WHERE {}\n\
             \x20   ORDER BY tr.height DESC, tr.rowid DESC\n\
             \x20   LIMIT {}\n\
             ),\n\
             filtered_tx_event_attributes AS (\n\
             \x20   SELECT events.tx_id, attributes.composite_key, attributes.value\n\
             \x20   FROM events\n\
             \x20   JOIN filtered_heights fh ON fh.rowid = events.tx_id\n\
             \x20   JOIN attributes ON attributes.event_id = events.rowid\n\
             \x20   WHERE events.tx_id IS NOT NULL\n\
             ),\n\
             filtered_tx_ids AS (\n",
            height_clause, limit
        );

        if self.candidates.is_empty() {
            sql.push_str("    SELECT DISTINCT ftea.tx_id FROM filtered_tx_event_attributes ftea\n");
        }

        let selects = self
            .candidates
            .iter()
            .map(|candidate| render_candidate(candidate, &mut binder))
            .join("    INTERSECT\n");
        sql.push_str(&selects);

        let final_limit = binder.push(BindValue::BigInt(self.limit as i64));
        let _ = write!(
            sql,
            ")\n\
             SELECT tr.rowid, tr.height, tr.created_at, tr.tx_hash, tr.tx_result\n\
             FROM filtered_tx_ids ftx\n\
             JOIN tx_results tr ON tr.rowid = ftx.tx_id\n\
             ORDER BY ftx.tx_id DESC\n\
             LIMIT {}",
            final_limit
        );

        SqlStatement {
            text: sql,
            binds: binder.binds,
        }
    }
}
