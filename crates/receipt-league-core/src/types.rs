//! Shared types between the league service and its clients

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::CoreError;

/// How a competition is decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompetitionMode {
    /// The first team(s) to reach `threshold` points win immediately
    Goal { threshold: u64 },
    /// The highest total wins once the end date has passed
    NoGoal,
}

impl CompetitionMode {
    pub fn threshold(&self) -> Option<u64> {
        match self {
            Self::Goal { threshold } => Some(*threshold),
            Self::NoGoal => None,
        }
    }

    pub fn has_goal(&self) -> bool {
        matches!(self, Self::Goal { .. })
    }
}

/// Who a competition belongs to, a school or a free-form group (never both)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Scope {
    School { name: String },
    Group { name: String },
}

impl Scope {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::School { .. } => "school",
            Self::Group { .. } => "group",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::School { name } | Self::Group { name } => name,
        }
    }

    pub fn from_parts(kind: &str, name: String) -> Result<Self, CoreError> {
        match kind {
            "school" => Ok(Self::School { name }),
            "group" => Ok(Self::Group { name }),
            other => Err(CoreError::UnknownVariant {
                kind: "scope",
                value: other.to_string(),
            }),
        }
    }
}

/// Persisted competition status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionStatusKind {
    Active,
    Completed,
}

impl CompetitionStatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for CompetitionStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CompetitionStatusKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(CoreError::UnknownVariant {
                kind: "competition status",
                value: other.to_string(),
            }),
        }
    }
}

/// Review state of a stored receipt; only approved receipts count toward team totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Approved,
    Pending,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Pending => "pending",
        }
    }
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReceiptStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(Self::Approved),
            "pending" => Ok(Self::Pending),
            other => Err(CoreError::UnknownVariant {
                kind: "receipt status",
                value: other.to_string(),
            }),
        }
    }
}

/// How sure the vision model is about the total it read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
    None,
    /// Total typed in by the submitter instead of read from the image
    Manual,
}

impl Confidence {
    /// Low and none readings are treated as failed extractions
    pub fn is_acceptable(&self) -> bool {
        matches!(self, Self::High | Self::Medium)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::None => "none",
            Self::Manual => "manual",
        }
    }
}

impl FromStr for Confidence {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            "none" => Ok(Self::None),
            "manual" => Ok(Self::Manual),
            other => Err(CoreError::UnknownVariant {
                kind: "confidence",
                value: other.to_string(),
            }),
        }
    }
}

/// A positive purchase amount held in mills (thousandths of a dollar).
///
/// Serialized as a dollar number (`12.34`) so clients keep the natural format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Amount(i64);

const MILLS_PER_DOLLAR: i64 = 1000;
const MILLS_PER_CENT: i64 = 10;

impl Amount {
    pub fn from_mills(mills: i64) -> Result<Self, CoreError> {
        if mills <= 0 {
            return Err(CoreError::InvalidAmount(format!(
                "amount must be greater than zero, got {} mills",
                mills
            )));
        }
        Ok(Self(mills))
    }

    pub fn from_cents(cents: i64) -> Result<Self, CoreError> {
        let mills = cents.checked_mul(MILLS_PER_CENT).ok_or_else(|| {
            CoreError::InvalidAmount(format!("{} cents is out of range", cents))
        })?;
        Self::from_mills(mills)
    }

    /// Digits past the third decimal place are dropped, never rounded up.
    pub fn from_dollars(dollars: f64) -> Result<Self, CoreError> {
        if !dollars.is_finite() {
            return Err(CoreError::InvalidAmount(format!("{} is not a number", dollars)));
        }
        // the shortest round-trip form keeps 12.345 as "12.345" rather than 12.3449999...
        let mills = parse_mills(&dollars.to_string(), Fraction::Truncate).ok_or_else(|| {
            CoreError::InvalidAmount(format!("{} is not a valid amount", dollars))
        })?;
        Self::from_mills(mills)
    }

    pub fn mills(&self) -> i64 {
        self.0
    }

    pub fn cents(&self) -> i64 {
        self.0 / MILLS_PER_CENT
    }

    pub fn as_dollars(&self) -> f64 {
        self.0 as f64 / MILLS_PER_DOLLAR as f64
    }

    /// Distance between two amounts in mills
    pub fn mills_apart(&self, other: &Amount) -> u64 {
        self.0.abs_diff(other.0)
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Fraction {
    Strict,
    Truncate,
}

/// Decimal dollars to mills without going through floats. `Strict` rejects
/// more than three fractional digits, `Truncate` drops them.
fn parse_mills(s: &str, fraction_mode: Fraction) -> Option<i64> {
    let (whole, fraction) = s.split_once('.').unwrap_or((s, ""));

    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if fraction.len() > 3 && fraction_mode == Fraction::Strict {
        return None;
    }

    let dollars: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let kept = &fraction[..fraction.len().min(3)];
    let mills: i64 = if kept.is_empty() {
        0
    } else {
        format!("{:0<3}", kept).parse().ok()?
    };

    dollars.checked_mul(MILLS_PER_DOLLAR)?.checked_add(mills)
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dollars = self.0 / MILLS_PER_DOLLAR;
        let mills = self.0 % MILLS_PER_DOLLAR;
        if mills % MILLS_PER_CENT == 0 {
            write!(f, "${}.{:02}", dollars, mills / MILLS_PER_CENT)
        } else {
            write!(f, "${}.{:03}", dollars, mills)
        }
    }
}

impl TryFrom<f64> for Amount {
    type Error = CoreError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::from_dollars(value)
    }
}

impl From<Amount> for f64 {
    fn from(value: Amount) -> Self {
        value.as_dollars()
    }
}

impl FromStr for Amount {
    type Err = CoreError;

    /// Parses user input such as `12`, `12.3`, `$12.345`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('$').unwrap_or(trimmed);
        let mills = parse_mills(trimmed, Fraction::Strict)
            .ok_or_else(|| CoreError::InvalidAmount(format!("'{}' is not a valid amount", s)))?;
        Self::from_mills(mills)
    }
}
