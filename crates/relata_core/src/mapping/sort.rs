//! Sort expressions for many-valued relations.
//!
//! Syntax: comma-separated `Property [asc|desc]` items, e.g. `"Name, Number desc"`.

use crate::model::value::Value;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

static SORT_ITEM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*([A-Za-z_][A-Za-z0-9_]*)(?:\s+(asc|desc|ascending|descending))?\s*$")
        .expect("valid sort item regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpecification {
    pub property: String,
    pub direction: SortDirection,
}

/// Parsed sort expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortExpression {
    specifications: Vec<SortSpecification>,
}

impl SortExpression {
    /// Parses an expression. Returns `None` for empty or malformed input.
    pub fn parse(expression: &str) -> Option<Self> {
        if expression.trim().is_empty() {
            return None;
        }

        let mut specifications = Vec::new();
        for item in expression.split(',') {
            let captures = SORT_ITEM_RE.captures(item)?;
            let property = captures.get(1)?.as_str().to_string();
            let direction = match captures.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
                Some(value) if value.starts_with("desc") => SortDirection::Descending,
                _ => SortDirection::Ascending,
            };
            specifications.push(SortSpecification {
                property,
                direction,
            });
        }

        Some(Self { specifications })
    }

    pub fn specifications(&self) -> &[SortSpecification] {
        &self.specifications
    }

    /// Compares two rows by their scalar values. Missing values compare as `Null`.
    pub fn compare(&self, left: &BTreeMap<String, Value>, right: &BTreeMap<String, Value>) -> Ordering {
        for spec in &self.specifications {
            let lhs = left.get(&spec.property).unwrap_or(&Value::Null);
            let rhs = right.get(&spec.property).unwrap_or(&Value::Null);
            let ordering = match spec.direction {
                SortDirection::Ascending => lhs.sort_cmp(rhs),
                SortDirection::Descending => rhs.sort_cmp(lhs),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

impl Display for SortExpression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let rendered = self
            .specifications
            .iter()
            .map(|spec| match spec.direction {
                SortDirection::Ascending => format!("{} asc", spec.property),
                SortDirection::Descending => format!("{} desc", spec.property),
            })
            .collect::<Vec<_>>()
            .join(", ");
        f.write_str(&rendered)
    }
}
