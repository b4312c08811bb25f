//! `FieldValue` is the tagged union described as `ValueCell` in spec.md §3:
//! ten typed data variants plus the two data-carrying sentinels `Invalid`
//! and `Missing` (the third sentinel, `Unknown`, belongs to three-valued
//! predicate logic and lives in `Truth` below — it is never stored as field
//! data, only produced as the *result* of evaluating a predicate).

use chrono::{Duration as ChronoDur, NaiveDate};
use std::{
    fmt::{self, Display},
    hash::{Hash, Hasher},
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The epoch a `dateDaysSince[Y]` / `dateTimeSecondsSince[Y]` dataType counts
/// from, `Y` ∈ {0, 1960, 1970, 1980} per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Epoch {
    Year0,
    Year1960,
    Year1970,
    Year1980,
}

impl Epoch {
    /// The proleptic-Gregorian calendar date this epoch counts from.
    ///
    /// Year 0 in the proleptic Gregorian calendar is `NaiveDate`'s year `0`;
    /// spec.md §9 disallows arithmetic on years before 1, so `Year0` is only
    /// ever used as a counting origin, never dereferenced to a wall date
    /// earlier than year 1.
    pub fn base_date(self) -> NaiveDate {
        match self {
            Epoch::Year0 => NaiveDate::from_ymd_opt(0, 1, 1).unwrap(),
            Epoch::Year1960 => NaiveDate::from_ymd_opt(1960, 1, 1).unwrap(),
            Epoch::Year1970 => NaiveDate::from_ymd_opt(1970, 1, 1).unwrap(),
            Epoch::Year1980 => NaiveDate::from_ymd_opt(1980, 1, 1).unwrap(),
        }
    }

    /// Days since this epoch for a given proleptic-Gregorian date.
    /// `None` if `date` is before proleptic year 1 (disallowed, spec.md §9).
    pub fn days_since(self, date: NaiveDate) -> Option<i64> {
        if date.year() < 1 {
            return None;
        }
        Some((date - self.base_date()).num_days())
    }

    pub fn date_from_days(self, days: i64) -> Option<NaiveDate> {
        let date = self.base_date() + ChronoDur::days(days);
        if date.year() < 1 { None } else { Some(date) }
    }
}

use chrono::Datelike;

/// The tagged union of everything a resolved field can hold, plus the two
/// data-flow sentinels. See spec.md §3 "Sentinels" and "ValueCell".
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    /// Days since the field's configured epoch.
    Date(i64),
    /// Seconds since midnight.
    Time(i64),
    /// Seconds since the field's configured epoch.
    DateTime(i64),
    /// A cyclic ordinal integer: arithmetic wraps within `[first, last]`.
    CyclicInt(i64),
    /// A cyclic continuous value: arithmetic reduces modulo the interval's
    /// `(upper - lower)` period.
    CyclicFloat(f64),
    /// An ordinal string: the text value plus its zero-based rank in the
    /// enumerated value list (comparison is by rank, equality is by text).
    Ordinal(String, usize),
    /// Input violated the field's type, interval, or enumeration.
    Invalid,
    /// Absent at source, or mapped to missing by mining-schema treatment.
    Missing,
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        use FieldValue::*;
        match (self, other) {
            (String(a), String(b)) => a.trim_end() == b.trim_end(),
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Double(a), Double(b)) => a == b,
            (Boolean(a), Boolean(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (Time(a), Time(b)) => a == b,
            (DateTime(a), DateTime(b)) => a == b,
            (CyclicInt(a), CyclicInt(b)) => a == b,
            (CyclicFloat(a), CyclicFloat(b)) => a == b,
            (Ordinal(a, _), Ordinal(b, _)) => a.trim_end() == b.trim_end(),
            (Invalid, Invalid) => true,
            (Missing, Missing) => true,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl Hash for FieldValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        use FieldValue::*;
        match self {
            String(s) => s.trim_end().hash(state),
            Integer(i) => i.hash(state),
            Float(f) => f.to_bits().hash(state),
            Double(d) => d.to_bits().hash(state),
            Boolean(b) => b.hash(state),
            Date(d) => d.hash(state),
            Time(t) => t.hash(state),
            DateTime(dt) => dt.hash(state),
            CyclicInt(i) => i.hash(state),
            CyclicFloat(f) => f.to_bits().hash(state),
            Ordinal(s, _) => s.trim_end().hash(state),
            Invalid => state.write_u8(254),
            Missing => state.write_u8(255),
        }
    }
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::String(s) => write!(f, "{s}"),
            FieldValue::Integer(i) => write!(f, "{i}"),
            FieldValue::Float(x) => write!(f, "{x}"),
            FieldValue::Double(x) => write!(f, "{x}"),
            FieldValue::Boolean(b) => write!(f, "{b}"),
            FieldValue::Date(d) => write!(f, "Date({d})"),
            FieldValue::Time(t) => write!(f, "Time({t})"),
            FieldValue::DateTime(dt) => write!(f, "DateTime({dt})"),
            FieldValue::CyclicInt(i) => write!(f, "{i}"),
            FieldValue::CyclicFloat(x) => write!(f, "{x}"),
            FieldValue::Ordinal(s, _) => write!(f, "{s}"),
            FieldValue::Invalid => write!(f, "Invalid"),
            FieldValue::Missing => write!(f, "Missing"),
        }
    }
}

impl FieldValue {
    pub fn is_valid(&self) -> bool {
        !matches!(self, FieldValue::Invalid | FieldValue::Missing)
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, FieldValue::Invalid)
    }

    /// Best-effort coercion to `f64`, used by numeric builtins and by
    /// NormContinuous/Discretize interpolation. Returns `None` for sentinels
    /// and for variants with no natural numeric reading.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Float(x) => Some(*x as f64),
            FieldValue::Double(x) => Some(*x),
            FieldValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            FieldValue::Date(d) => Some(*d as f64),
            FieldValue::Time(t) => Some(*t as f64),
            FieldValue::DateTime(dt) => Some(*dt as f64),
            FieldValue::CyclicInt(i) => Some(*i as f64),
            FieldValue::CyclicFloat(x) => Some(*x),
            FieldValue::Ordinal(_, rank) => Some(*rank as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            FieldValue::Ordinal(s, _) => Some(s),
            _ => None,
        }
    }
}

/// Three-valued truth, used by the predicate evaluator (spec.md §4.6).
/// `Unknown` realizes the third process-wide sentinel for the boolean
/// domain: it is produced exactly when a predicate needed to inspect a
/// `Missing` (or, for some primitives, `Invalid`) input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    pub fn from_bool(b: bool) -> Self {
        if b { Truth::True } else { Truth::False }
    }

    pub fn not(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }

    /// Kleene `and`: `False` dominates, then `Unknown`, then `True`.
    pub fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::Unknown, _) | (_, Truth::Unknown) => Truth::Unknown,
            (Truth::True, Truth::True) => Truth::True,
        }
    }

    /// Kleene `or`: dual of `and`.
    pub fn or(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::Unknown, _) | (_, Truth::Unknown) => Truth::Unknown,
            (Truth::False, Truth::False) => Truth::False,
        }
    }

    /// `xor` is `Unknown` if either side is `Unknown`, else boolean parity.
    pub fn xor(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::Unknown, _) | (_, Truth::Unknown) => Truth::Unknown,
            (a, b) => Truth::from_bool((a == Truth::True) != (b == Truth::True)),
        }
    }

    pub fn is_unknown(self) -> bool {
        matches!(self, Truth::Unknown)
    }
}

impl Display for Truth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Truth::True => "true",
            Truth::False => "false",
            Truth::Unknown => "unknown",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_short_circuits_on_false() {
        assert_eq!(Truth::False.and(Truth::Unknown), Truth::False);
        assert_eq!(Truth::Unknown.and(Truth::False), Truth::False);
    }

    #[test]
    fn or_short_circuits_on_true() {
        assert_eq!(Truth::True.or(Truth::Unknown), Truth::True);
    }

    #[test]
    fn xor_propagates_unknown() {
        assert_eq!(Truth::True.xor(Truth::Unknown), Truth::Unknown);
        assert_eq!(Truth::True.xor(Truth::False), Truth::True);
    }

    #[test]
    fn string_equality_ignores_trailing_whitespace() {
        assert_eq!(
            FieldValue::String("foo  ".into()),
            FieldValue::String("foo".into())
        );
    }

    #[test]
    fn epoch_disallows_year_zero_proleptic_underflow() {
        let before_year_1 = NaiveDate::from_ymd_opt(-1, 1, 1);
        assert!(before_year_1.is_none() || before_year_1.unwrap().year() < 1);
    }
}
