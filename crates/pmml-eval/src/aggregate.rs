//! The `Aggregate` expression's lazy reduction (spec.md §4.5): an
//! accumulator keyed by `groupField` value (or a single accumulator when
//! there is none), incremented once per event and read on demand.

use pmml_document::AggregateFn;
use pmml_common::FieldValue;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Accumulator {
    fn increment(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    fn reduce(&self, function: AggregateFn) -> f64 {
        match function {
            AggregateFn::Count => self.count as f64,
            AggregateFn::Sum => self.sum,
            AggregateFn::Average => self.sum / self.count as f64,
            AggregateFn::Min => self.min,
            AggregateFn::Max => self.max,
        }
    }
}

/// One accumulator set per named Aggregate-backed derived field, itself
/// keyed by groupField value. `None` is the key used when there is no
/// groupField (a single running accumulator).
#[derive(Debug, Default)]
pub struct AggregateTable {
    fields: FxHashMap<String, FxHashMap<Option<FieldValue>, Accumulator>>,
}

impl AggregateTable {
    pub fn increment(&mut self, field_name: &str, group_key: Option<FieldValue>, value: f64) {
        self.fields
            .entry(field_name.to_string())
            .or_default()
            .entry(group_key)
            .or_default()
            .increment(value);
    }

    /// `None` means the group is empty — spec.md §4.5: "evaluate returns
    /// INVALID when the group is empty", which the caller maps to Invalid.
    pub fn evaluate(&self, field_name: &str, function: AggregateFn, group_key: Option<FieldValue>) -> Option<FieldValue> {
        let acc = self.fields.get(field_name)?.get(&group_key)?;
        Some(FieldValue::Double(acc.reduce(function)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_group_has_no_accumulator() {
        let table = AggregateTable::default();
        assert_eq!(table.evaluate("total", AggregateFn::Sum, None), None);
    }

    #[test]
    fn sum_accumulates_across_increments() {
        let mut table = AggregateTable::default();
        table.increment("total", Some(FieldValue::String("a".into())), 1.0);
        table.increment("total", Some(FieldValue::String("a".into())), 2.0);
        assert_eq!(
            table.evaluate("total", AggregateFn::Sum, Some(FieldValue::String("a".into()))),
            Some(FieldValue::Double(3.0))
        );
    }

    #[test]
    fn average_divides_by_count() {
        let mut table = AggregateTable::default();
        table.increment("m", None, 2.0);
        table.increment("m", None, 4.0);
        assert_eq!(table.evaluate("m", AggregateFn::Average, None), Some(FieldValue::Double(3.0)));
    }
}
