//! `FieldType` — spec.md §3/§4.1: optype + dataType + interval/value
//! constraints, plus the pure, total `cast` operation.

use pmml_common::{Epoch, FieldValue};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    Categorical,
    Ordinal,
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    String,
    Integer,
    Float,
    Double,
    Boolean,
    Date,
    Time,
    DateTime,
    DateDaysSince(EpochYear),
    TimeSeconds,
    DateTimeSecondsSince(EpochYear),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EpochYear {
    Y0,
    Y1960,
    Y1970,
    Y1980,
}

impl EpochYear {
    pub fn to_epoch(self) -> Epoch {
        match self {
            EpochYear::Y0 => Epoch::Year0,
            EpochYear::Y1960 => Epoch::Year1960,
            EpochYear::Y1970 => Epoch::Year1970,
            EpochYear::Y1980 => Epoch::Year1980,
        }
    }
}

/// A closed, open, or half-open bound, per PMML's `Interval closure`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Closure {
    OpenOpen,
    OpenClosed,
    ClosedOpen,
    ClosedClosed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    pub closure: Closure,
    pub left: Option<f64>,
    pub right: Option<f64>,
}

impl Interval {
    pub fn contains(&self, v: f64) -> bool {
        let lower_ok = match self.left {
            None => true,
            Some(l) => match self.closure {
                Closure::ClosedOpen | Closure::ClosedClosed => v >= l,
                Closure::OpenOpen | Closure::OpenClosed => v > l,
            },
        };
        let upper_ok = match self.right {
            None => true,
            Some(r) => match self.closure {
                Closure::OpenClosed | Closure::ClosedClosed => v <= r,
                Closure::OpenOpen | Closure::ClosedOpen => v < r,
            },
        };
        lower_ok && upper_ok
    }
}

/// `optype` + `dataType` + interval/value constraints + cyclic flag, as
/// specified in spec.md §3.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldType {
    pub optype: OpType,
    pub data_type: DataType,
    /// Ordered enumerated values (ordinal strings: list order is the
    /// ranking; continuous: a finite allow-list instead of/alongside
    /// intervals).
    pub enumerated_values: Vec<String>,
    pub intervals: Vec<Interval>,
    pub is_cyclic: bool,
}

impl FieldType {
    pub fn categorical_string() -> Self {
        FieldType {
            optype: OpType::Categorical,
            data_type: DataType::String,
            enumerated_values: Vec::new(),
            intervals: Vec::new(),
            is_cyclic: false,
        }
    }

    pub fn continuous(data_type: DataType) -> Self {
        FieldType {
            optype: OpType::Continuous,
            data_type,
            enumerated_values: Vec::new(),
            intervals: Vec::new(),
            is_cyclic: false,
        }
    }

    pub fn ordinal_string(values: Vec<String>) -> Self {
        FieldType {
            optype: OpType::Ordinal,
            data_type: DataType::String,
            enumerated_values: values,
            intervals: Vec::new(),
            is_cyclic: false,
        }
    }

    /// Cyclic ordinal integer: the enumerated values give `[first, last]`
    /// (spec.md §3 "Cyclic ordinal integer").
    pub fn cyclic_ordinal_int(first: i64, last: i64) -> Self {
        FieldType {
            optype: OpType::Ordinal,
            data_type: DataType::Integer,
            enumerated_values: vec![first.to_string(), last.to_string()],
            intervals: Vec::new(),
            is_cyclic: true,
        }
    }

    /// Cyclic continuous: exactly one finite interval defines the period.
    pub fn cyclic_continuous(data_type: DataType, interval: Interval) -> Self {
        FieldType {
            optype: OpType::Continuous,
            data_type,
            enumerated_values: Vec::new(),
            intervals: vec![interval],
            is_cyclic: true,
        }
    }

    fn cyclic_bounds(&self) -> Option<(f64, f64)> {
        if !self.is_cyclic {
            return None;
        }
        if self.optype == OpType::Ordinal && self.data_type == DataType::Integer {
            let first: f64 = self.enumerated_values.first()?.parse().ok()?;
            let last: f64 = self.enumerated_values.get(1)?.parse().ok()?;
            Some((first, last))
        } else {
            let iv = self.intervals.first()?;
            Some((iv.left?, iv.right?))
        }
    }

    /// Reduce `v` modulo the cyclic period, wrapping into `[first, last]`.
    pub fn wrap_cyclic(&self, v: f64) -> f64 {
        match self.cyclic_bounds() {
            Some((first, last)) => {
                let period = last - first + if self.data_type == DataType::Integer { 1.0 } else { 0.0 };
                if period <= 0.0 {
                    return v;
                }
                let offset = (v - first).rem_euclid(period);
                first + offset
            }
            None => v,
        }
    }

    /// Parses a raw input string, producing a typed `FieldValue` or
    /// `FieldValue::Invalid`. Pure and total (spec.md §4.1).
    pub fn cast(&self, raw: &str) -> FieldValue {
        let raw = raw.trim_end();
        match self.data_type {
            DataType::String => self.validate_categorical_or_ordinal(raw, FieldValue::String(raw.to_string())),
            DataType::Boolean => match raw.trim() {
                "true" | "1" | "TRUE" => FieldValue::Boolean(true),
                "false" | "0" | "FALSE" => FieldValue::Boolean(false),
                _ => FieldValue::Invalid,
            },
            DataType::Integer => match raw.trim().parse::<i64>() {
                Ok(i) => self.validate_numeric(i as f64, || {
                    if self.is_cyclic {
                        FieldValue::CyclicInt(self.wrap_cyclic(i as f64) as i64)
                    } else {
                        FieldValue::Integer(i)
                    }
                }),
                Err(_) => FieldValue::Invalid,
            },
            DataType::Float => match raw.trim().parse::<f32>() {
                Ok(f) if f.is_finite() => self.validate_numeric(f as f64, || FieldValue::Float(f)),
                _ => FieldValue::Invalid,
            },
            DataType::Double => match raw.trim().parse::<f64>() {
                Ok(d) if d.is_finite() => self.validate_numeric(d, || {
                    if self.is_cyclic {
                        FieldValue::CyclicFloat(self.wrap_cyclic(d))
                    } else {
                        FieldValue::Double(d)
                    }
                }),
                _ => FieldValue::Invalid,
            },
            DataType::Date => self.cast_date(raw, Epoch::Year0),
            DataType::DateDaysSince(y) => self.cast_date(raw, y.to_epoch()),
            DataType::Time | DataType::TimeSeconds => self.cast_time(raw),
            DataType::DateTime => self.cast_datetime(raw, Epoch::Year0),
            DataType::DateTimeSecondsSince(y) => self.cast_datetime(raw, y.to_epoch()),
        }
    }

    fn validate_categorical_or_ordinal(&self, raw: &str, value: FieldValue) -> FieldValue {
        if self.optype == OpType::Ordinal {
            match self.enumerated_values.iter().position(|v| v.trim_end() == raw) {
                Some(rank) => FieldValue::Ordinal(raw.to_string(), rank),
                None => FieldValue::Invalid,
            }
        } else if !self.enumerated_values.is_empty() {
            if self.enumerated_values.iter().any(|v| v.trim_end() == raw) {
                value
            } else {
                FieldValue::Invalid
            }
        } else {
            value
        }
    }

    fn validate_numeric(&self, v: f64, make: impl FnOnce() -> FieldValue) -> FieldValue {
        if self.is_cyclic {
            return make();
        }
        if !self.intervals.is_empty() {
            if self.intervals.iter().any(|iv| iv.contains(v)) {
                return make();
            }
            return FieldValue::Invalid;
        }
        if !self.enumerated_values.is_empty() {
            let matches = self
                .enumerated_values
                .iter()
                .any(|s| s.parse::<f64>().map(|n| n == v).unwrap_or(false));
            if !matches {
                return FieldValue::Invalid;
            }
        }
        make()
    }

    fn cast_date(&self, raw: &str, epoch: Epoch) -> FieldValue {
        use chrono::NaiveDate;
        let date = match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(d) => d,
            Err(_) => return FieldValue::Invalid,
        };
        match epoch.days_since(date) {
            Some(days) => FieldValue::Date(days),
            None => FieldValue::Invalid,
        }
    }

    fn cast_time(&self, raw: &str) -> FieldValue {
        use chrono::NaiveTime;
        let fmt = if raw.matches(':').count() == 2 { "%H:%M:%S" } else { "%H:%M" };
        match NaiveTime::parse_from_str(raw, fmt) {
            Ok(t) => FieldValue::Time(t.num_seconds_from_midnight() as i64),
            Err(_) => FieldValue::Invalid,
        }
    }

    fn cast_datetime(&self, raw: &str, epoch: Epoch) -> FieldValue {
        use chrono::NaiveDateTime;
        let dt = match NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        {
            Ok(dt) => dt,
            Err(_) => return FieldValue::Invalid,
        };
        match epoch.days_since(dt.date()) {
            Some(days) => FieldValue::DateTime(days * 86_400 + dt.time().num_seconds_from_midnight() as i64),
            None => FieldValue::Invalid,
        }
    }

    /// `format` is the inverse of `cast` for dateTime subtypes: `cast(x);
    /// format(cast(x))` is the identity on representable values (spec.md
    /// §4.1).
    pub fn format(&self, value: &FieldValue) -> Option<String> {
        use chrono::NaiveTime;
        match (self.data_type, value) {
            (DataType::Date, FieldValue::Date(days)) => {
                Epoch::Year0.date_from_days(*days).map(|d| d.format("%Y-%m-%d").to_string())
            }
            (DataType::DateDaysSince(y), FieldValue::Date(days)) => y
                .to_epoch()
                .date_from_days(*days)
                .map(|d| d.format("%Y-%m-%d").to_string()),
            (DataType::Time, FieldValue::Time(secs)) | (DataType::TimeSeconds, FieldValue::Time(secs)) => {
                NaiveTime::from_num_seconds_from_midnight_opt((*secs).rem_euclid(86_400) as u32, 0)
                    .map(|t| t.format("%H:%M:%S").to_string())
            }
            (DataType::DateTime, FieldValue::DateTime(secs)) => format_datetime(Epoch::Year0, *secs),
            (DataType::DateTimeSecondsSince(y), FieldValue::DateTime(secs)) => format_datetime(y.to_epoch(), *secs),
            _ => None,
        }
    }

    /// Defined for all ordinal and continuous types; ordinal strings compare
    /// by enumerated-list position, cyclic types refuse comparison (the
    /// caller must use arithmetic instead, spec.md §4.1).
    pub fn compare(&self, a: &FieldValue, b: &FieldValue) -> Option<std::cmp::Ordering> {
        if self.is_cyclic {
            return None;
        }
        match (a, b) {
            (FieldValue::Ordinal(_, ra), FieldValue::Ordinal(_, rb)) => ra.partial_cmp(rb),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        }
    }
}

use chrono::Timelike;

fn format_datetime(epoch: Epoch, secs: i64) -> Option<String> {
    let days = secs.div_euclid(86_400);
    let rem = secs.rem_euclid(86_400);
    let date = epoch.date_from_days(days)?;
    let time = chrono::NaiveTime::from_num_seconds_from_midnight_opt(rem as u32, 0)?;
    Some(format!("{}T{}", date.format("%Y-%m-%d"), time.format("%H:%M:%S")))
}

/// Mapping: field name → FieldType, i.e. the global schema (spec.md §3
/// "DataDictionary").
#[derive(Debug, Clone, Default)]
pub struct DataDictionary {
    fields: HashMap<String, FieldType>,
}

impl DataDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, ty: FieldType) {
        self.fields.insert(name.into(), ty);
    }

    pub fn get(&self, name: &str) -> Option<&FieldType> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cast_is_total_and_exclusive() {
        let ft = FieldType::continuous(DataType::Double);
        for raw in ["1.5", "abc", "NaN", "inf", ""] {
            let v = ft.cast(raw);
            assert!(v.is_valid() ^ matches!(v, FieldValue::Invalid));
        }
    }

    #[test]
    fn nan_and_inf_are_invalid() {
        let ft = FieldType::continuous(DataType::Double);
        assert_eq!(ft.cast("NaN"), FieldValue::Invalid);
        assert_eq!(ft.cast("Infinity"), FieldValue::Invalid);
    }

    #[test]
    fn continuous_interval_validates_closure() {
        let mut ft = FieldType::continuous(DataType::Double);
        ft.intervals.push(Interval {
            closure: Closure::ClosedOpen,
            left: Some(0.0),
            right: Some(10.0),
        });
        assert_eq!(ft.cast("0"), FieldValue::Double(0.0));
        assert_eq!(ft.cast("10"), FieldValue::Invalid);
        assert_eq!(ft.cast("9.999"), FieldValue::Double(9.999));
    }

    #[test]
    fn ordinal_string_orders_by_list_position() {
        let ft = FieldType::ordinal_string(vec!["low".into(), "medium".into(), "high".into()]);
        let low = ft.cast("low");
        let high = ft.cast("high");
        assert_eq!(ft.compare(&low, &high), Some(std::cmp::Ordering::Less));
    }

    #[test]
    fn cyclic_ordinal_int_wraps_last_plus_one_to_first() {
        let ft = FieldType::cyclic_ordinal_int(1, 12);
        assert_eq!(ft.wrap_cyclic(13.0), 1.0);
        assert_eq!(ft.wrap_cyclic(0.0), 12.0);
    }

    #[test]
    fn cyclic_continuous_reduces_modulo_period() {
        let ft = FieldType::cyclic_continuous(
            DataType::Double,
            Interval {
                closure: Closure::ClosedOpen,
                left: Some(0.0),
                right: Some(360.0),
            },
        );
        assert_eq!(ft.wrap_cyclic(370.0), 10.0);
    }

    #[test]
    fn date_cast_format_round_trips() {
        let ft = FieldType::continuous(DataType::Date);
        let v = ft.cast("2020-03-01");
        assert_eq!(ft.format(&v).as_deref(), Some("2020-03-01"));
    }

    #[test]
    fn date_days_since_epoch_round_trips() {
        let ft = FieldType::continuous(DataType::DateDaysSince(EpochYear::Y1970));
        let v = ft.cast("1970-01-02");
        assert_eq!(v, FieldValue::Date(1));
    }
}
