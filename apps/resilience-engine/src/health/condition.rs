//! Recovery-plan trigger conditions.
//!
//! A condition compares named health-check values against constants:
//!
//! ```text
//! network_connectivity < 60
//! error_rate > 50 or filesystem_health <= 40
//! error_rate >= 20 and network_connectivity < 80
//! ```
//!
//! `and` binds tighter than `or`. A comparison naming a check with no value
//! in the current cycle is false.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ResilienceError;

static COMPARISON: OnceLock<Regex> = OnceLock::new();
static OR_SPLIT: OnceLock<Regex> = OnceLock::new();
static AND_SPLIT: OnceLock<Regex> = OnceLock::new();

#[allow(clippy::expect_used)] // constant patterns
fn comparison_regex() -> &'static Regex {
    COMPARISON.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*(>=|<=|>|<)\s*(-?\d+(?:\.\d+)?)\s*$")
            .expect("comparison regex is valid")
    })
}

#[allow(clippy::expect_used)]
fn or_regex() -> &'static Regex {
    OR_SPLIT.get_or_init(|| Regex::new(r"(?i)\s+or\s+").expect("or regex is valid"))
}

#[allow(clippy::expect_used)]
fn and_regex() -> &'static Regex {
    AND_SPLIT.get_or_init(|| Regex::new(r"(?i)\s+and\s+").expect("and regex is valid"))
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// `>`
    Greater,
    /// `>=`
    GreaterOrEqual,
    /// `<`
    Less,
    /// `<=`
    LessOrEqual,
}

impl Comparator {
    fn parse(op: &str) -> Option<Self> {
        match op {
            ">" => Some(Self::Greater),
            ">=" => Some(Self::GreaterOrEqual),
            "<" => Some(Self::Less),
            "<=" => Some(Self::LessOrEqual),
            _ => None,
        }
    }

    fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Greater => value > threshold,
            Self::GreaterOrEqual => value >= threshold,
            Self::Less => value < threshold,
            Self::LessOrEqual => value <= threshold,
        }
    }
}

/// `check comparator threshold`.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    /// Health check name.
    pub check: String,
    /// Operator.
    pub comparator: Comparator,
    /// Constant compared against.
    pub threshold: f64,
}

impl Comparison {
    fn evaluate(&self, values: &BTreeMap<String, f64>) -> bool {
        values
            .get(&self.check)
            .is_some_and(|value| self.comparator.holds(*value, self.threshold))
    }
}

/// Parsed trigger condition in disjunctive normal form.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerCondition {
    source: String,
    any_of: Vec<Vec<Comparison>>,
}

impl TriggerCondition {
    /// Parse `source`.
    pub fn parse(source: &str) -> Result<Self, ResilienceError> {
        let invalid = |reason: String| ResilienceError::InvalidTriggerCondition {
            condition: source.to_string(),
            reason,
        };

        if source.trim().is_empty() {
            return Err(invalid("empty condition".to_string()));
        }

        let mut any_of = Vec::new();
        for disjunct in or_regex().split(source.trim()) {
            let mut all_of = Vec::new();
            for term in and_regex().split(disjunct) {
                let captures = comparison_regex()
                    .captures(term)
                    .ok_or_else(|| invalid(format!("cannot parse comparison `{}`", term.trim())))?;
                let comparator = Comparator::parse(&captures[2])
                    .ok_or_else(|| invalid(format!("unknown operator `{}`", &captures[2])))?;
                let threshold = captures[3]
                    .parse::<f64>()
                    .map_err(|e| invalid(format!("bad number `{}`: {e}", &captures[3])))?;
                all_of.push(Comparison {
                    check: captures[1].to_string(),
                    comparator,
                    threshold,
                });
            }
            any_of.push(all_of);
        }

        Ok(Self {
            source: source.trim().to_string(),
            any_of,
        })
    }

    /// Whether the condition holds for the given check values.
    #[must_use]
    pub fn evaluate(&self, values: &BTreeMap<String, f64>) -> bool {
        self.any_of
            .iter()
            .any(|all_of| all_of.iter().all(|c| c.evaluate(values)))
    }

    /// Check names referenced by the condition.
    #[must_use]
    pub fn checks(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .any_of
            .iter()
            .flatten()
            .map(|c| c.check.as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// The condition as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Display for TriggerCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for TriggerCondition {
    type Err = ResilienceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
