//! Isolation of the `tx.height` constraint from the remaining conditions.

use super::{Condition, Operator};
use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeightBound {
    pub value: i64,
    pub inclusive: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeightRange {
    pub lower: Option<HeightBound>,
    pub upper: Option<HeightBound>,
}

impl HeightRange {
    pub fn is_empty(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }

    pub fn contains(&self, height: i64) -> bool {
        let above = match self.lower {
            Some(b) if b.inclusive => height >= b.value,
            Some(b) => height > b.value,
            None => true,
        };
        let below = match self.upper {
            Some(b) if b.inclusive => height <= b.value,
            Some(b) => height < b.value,
            None => true,
        };
        above && below
    }

    fn tighten_lower(&mut self, bound: HeightBound) {
        self.lower = Some(match self.lower {
            Some(cur) if cur.value > bound.value => cur,
            Some(cur) if cur.value == bound.value => HeightBound {
                value: cur.value,
                inclusive: cur.inclusive && bound.inclusive,
            },
            _ => bound,
        });
    }

    fn tighten_upper(&mut self, bound: HeightBound) {
        self.upper = Some(match self.upper {
            Some(cur) if cur.value < bound.value => cur,
            Some(cur) if cur.value == bound.value => HeightBound {
                value: cur.value,
                inclusive: cur.inclusive && bound.inclusive,
            },
            _ => bound,
        });
    }
}

/// Extracted height constraint. `height == 0` means no equality is set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeightInfo {
    pub height: i64,
    pub range: HeightRange,
}

impl HeightInfo {
    pub fn set_range(&mut self, range: HeightRange) {
        self.range = range;
        if !range.is_empty() {
            self.height = 0;
        }
    }

    pub fn has_range(&self) -> bool {
        !self.range.is_empty()
    }

    pub fn has_height(&self) -> bool {
        self.height != 0
    }
}

/// Splits off the height equality.
///
/// Height range conditions stay in the returned list for [`look_for_height_range`];
/// when any of them is present every height equality is discarded. Otherwise
/// the first height equality becomes `HeightInfo::height`.
pub fn dedup_height(conditions: Vec<Condition>) -> Result<(Vec<Condition>, HeightInfo)> {
    let has_range = conditions.iter().any(|c| c.is_height() && c.op.is_range());

    let mut info = HeightInfo::default();
    let mut found_equality = false;
    let mut remaining = Vec::with_capacity(conditions.len());

    for condition in conditions {
        if !condition.is_height() {
            remaining.push(condition);
            continue;
        }

        if condition.op.is_range() {
            remaining.push(condition);
        } else if !has_range && !found_equality {
            info.height = condition.height_value()?;
            found_equality = true;
        }
    }

    Ok((remaining, info))
}

/// Folds every height range condition into one range, keeping the tightest
/// bound on each side.
pub fn look_for_height_range(conditions: &[Condition]) -> Result<HeightRange> {
    let mut range = HeightRange::default();

    for condition in conditions.iter().filter(|c| c.is_height()) {
        let value = condition.height_value()?;
        match condition.op {
            Operator::Gt => range.tighten_lower(HeightBound {
                value,
                inclusive: false,
            }),
            Operator::Geq => range.tighten_lower(HeightBound {
                value,
                inclusive: true,
            }),
            Operator::Lt => range.tighten_upper(HeightBound {
                value,
                inclusive: false,
            }),
            Operator::Leq => range.tighten_upper(HeightBound {
                value,
                inclusive: true,
            }),
            Operator::Eq => {}
        }
    }

    Ok(range)
}
