//! The per-model, per-event field resolver (spec.md §3/§4.3 "DataContext").

use crate::aggregate::AggregateTable;
use crate::expr_eval::{eval_expression, EvalOutcome};
use pmml_document::{
    DataDictionary, DerivedField, Expression, FieldType, FunctionTable, LocalTransformations, MiningSchema,
    TransformationDictionary,
};
use pmml_common::FieldValue;
use rustc_hash::FxHashMap;
use std::cell::RefCell;

/// Raw, untreated input for one event: field name → the text that arrived
/// on the wire. The context casts and treats it lazily, on first `get`.
pub trait RawInputProvider {
    fn raw(&self, name: &str) -> Option<&str>;
}

impl RawInputProvider for FxHashMap<String, String> {
    fn raw(&self, name: &str) -> Option<&str> {
        self.get(name).map(|s| s.as_str())
    }
}

/// Best-effort `FieldValue` reading of a raw field, bypassing
/// `DataDictionary`/`MiningField` casting and treatment entirely. Used by
/// code that reads events ahead of or alongside any one model's own
/// `DataContext` — segment routing and producer training both key off the
/// wire value directly (spec.md §4.9/§6: routing and training signals are
/// untreated reads, not the model's own cast/treat chain).
pub fn raw_field_value(input: &dyn RawInputProvider, name: &str) -> FieldValue {
    match input.raw(name) {
        None => FieldValue::Missing,
        Some(s) if s.is_empty() => FieldValue::Missing,
        Some(s) => s.parse::<f64>().map(FieldValue::Double).unwrap_or_else(|_| FieldValue::String(s.to_string())),
    }
}

struct Override {
    map: FxHashMap<String, FieldValue>,
    cache_enabled: bool,
}

/// Per-event state, reset by `clear`.
struct Inner {
    cache: FxHashMap<String, FieldValue>,
    overrides: Vec<Override>,
}

/// One model body's field resolver. Holds non-owning references to the
/// dictionaries it was bound against (spec.md §3 "Ownership": "DataContext
/// holds only non-owning references to dictionaries; it owns the per-event
/// cache"). Aggregate accumulators outlive individual events — they are
/// incremented by [`DataContext::increment_aggregates`] and read by `get`,
/// independent of the per-event cache (spec.md §4.5).
pub struct DataContext<'doc> {
    parent: Option<&'doc DataContext<'doc>>,
    data_dictionary: &'doc DataDictionary,
    mining_schema: &'doc MiningSchema,
    transformation_dictionary: &'doc TransformationDictionary,
    local_transformations: &'doc LocalTransformations,
    function_table: &'doc FunctionTable,
    inner: RefCell<Inner>,
    aggregates: RefCell<AggregateTable>,
}

impl<'doc> DataContext<'doc> {
    pub fn new(
        data_dictionary: &'doc DataDictionary,
        mining_schema: &'doc MiningSchema,
        transformation_dictionary: &'doc TransformationDictionary,
        local_transformations: &'doc LocalTransformations,
        function_table: &'doc FunctionTable,
        parent: Option<&'doc DataContext<'doc>>,
    ) -> Self {
        DataContext {
            parent,
            data_dictionary,
            mining_schema,
            transformation_dictionary,
            local_transformations,
            function_table,
            inner: RefCell::new(Inner {
                cache: FxHashMap::default(),
                overrides: Vec::new(),
            }),
            aggregates: RefCell::new(AggregateTable::default()),
        }
    }

    pub fn function_table(&self) -> &'doc FunctionTable {
        self.function_table
    }

    pub fn field_type(&self, name: &str) -> Option<&'doc FieldType> {
        self.data_dictionary.get(name)
    }

    /// Empties cache and override stack; re-enables caching. Called once per
    /// event before scoring (spec.md §4.3). Aggregate accumulators are
    /// untouched — they span the whole event stream, not one event.
    pub fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.cache.clear();
        inner.overrides.clear();
    }

    /// Pushes a name→value map that subsequent `get` calls consult first.
    /// `cache_flag = false` suppresses cache writes while this override is
    /// active (used by Aggregate-group evaluation, spec.md §4.5).
    pub fn push_override(&self, map: FxHashMap<String, FieldValue>, cache_flag: bool) {
        self.inner.borrow_mut().overrides.push(Override {
            map,
            cache_enabled: cache_flag,
        });
    }

    pub fn pop_override(&self) {
        self.inner.borrow_mut().overrides.pop();
    }

    fn cache_enabled(&self) -> bool {
        self.inner
            .borrow()
            .overrides
            .last()
            .map(|o| o.cache_enabled)
            .unwrap_or(true)
    }

    fn derived_field(&self, name: &str) -> Option<&'doc DerivedField> {
        self.local_transformations
            .derived_fields
            .get(name)
            .or_else(|| self.transformation_dictionary.derived_fields.get(name))
    }

    /// Walks every Aggregate-backed derived field reachable from this scope
    /// and feeds it the current event (spec.md §4.5 `increment`). Called by
    /// the scoring pipeline once per event, before `get` is used to read any
    /// aggregate-derived value.
    pub fn increment_aggregates(&self, input: &dyn RawInputProvider) {
        let fields: Vec<&'doc DerivedField> = self
            .local_transformations
            .derived_fields
            .values()
            .chain(self.transformation_dictionary.derived_fields.values())
            .collect();
        for field in fields {
            if let Expression::Aggregate {
                field: source,
                function: _,
                group_field,
                sql_where,
            } = &field.expression
            {
                let passes = match sql_where {
                    Some(clause) => crate::expr_eval::eval_sql_where(clause, self, input),
                    None => true,
                };
                if !passes {
                    continue;
                }
                let group_key = match group_field {
                    Some(g) => match self.get(g, input) {
                        EvalOutcome::Value(v) if v.is_valid() => Some(v),
                        _ => continue,
                    },
                    None => None,
                };
                if let EvalOutcome::Value(v) = self.get(source, input) {
                    if v.is_valid() {
                        if let Some(n) = v.as_f64() {
                            self.aggregates.borrow_mut().increment(&field.name, group_key, n);
                        }
                    }
                }
            }
        }
        if let Some(parent) = self.parent {
            parent.increment_aggregates(input);
        }
    }

    /// Resolves `name` through, in order: override → cache → derived field →
    /// parent/raw input; then applies cast and mining-schema treatment if
    /// `name` is in the treatment map (spec.md §4.3 steps 1-6).
    ///
    /// A name reachable nowhere resolves to `MISSING`, never an error
    /// (spec.md §4.3 "Error semantics").
    pub fn get(&self, name: &str, input: &dyn RawInputProvider) -> EvalOutcome {
        {
            let inner = self.inner.borrow();
            for ov in inner.overrides.iter().rev() {
                if let Some(v) = ov.map.get(name) {
                    return EvalOutcome::Value(v.clone());
                }
            }
            if self.cache_enabled() {
                if let Some(v) = inner.cache.get(name) {
                    return EvalOutcome::Value(v.clone());
                }
            }
        }

        let resolved = if let Some(df) = self.derived_field(name) {
            self.apply_treatment_if_untreated(name, self.eval_derived(df, input))
        } else if let Some(parent) = self.parent {
            self.apply_treatment_if_untreated(name, parent.get(name, input))
        } else {
            match input.raw(name) {
                // `cast_and_treat` already ran the full cast/invalid/missing/
                // outlier chain for this field; running it again here would
                // apply the composition twice (spec.md §4.2: applied exactly
                // once).
                Some(raw) => EvalOutcome::Value(self.cast_and_treat(name, raw)),
                None => EvalOutcome::Value(FieldValue::Missing),
            }
        };

        if self.cache_enabled() {
            if let EvalOutcome::Value(v) = &resolved {
                self.inner.borrow_mut().cache.insert(name.to_string(), v.clone());
            }
        }
        resolved
    }

    /// Direct accumulator read, for an `Aggregate` expression nested inside
    /// another expression rather than sitting at the top of a derived field
    /// (the common case is handled by `eval_derived` before `eval_expression`
    /// is ever reached).
    pub(crate) fn read_aggregate(
        &self,
        field_name: &str,
        function: pmml_document::AggregateFn,
        group_key: Option<FieldValue>,
    ) -> Option<FieldValue> {
        self.aggregates.borrow().evaluate(field_name, function, group_key)
    }

    fn eval_derived(&self, field: &'doc DerivedField, input: &dyn RawInputProvider) -> EvalOutcome {
        if let Expression::Aggregate {
            function, group_field, ..
        } = &field.expression
        {
            let group_key = match group_field {
                Some(g) => match self.get(g, input) {
                    EvalOutcome::Value(v) if v.is_valid() => Some(v),
                    EvalOutcome::Value(_) => return EvalOutcome::Value(FieldValue::Missing),
                    EvalOutcome::Invalid => return EvalOutcome::Value(FieldValue::Missing),
                },
                None => None,
            };
            return match self.aggregates.borrow().evaluate(&field.name, *function, group_key) {
                Some(v) => EvalOutcome::Value(v),
                None => EvalOutcome::Value(FieldValue::Invalid),
            };
        }
        eval_expression(&field.expression, self, input)
    }

    fn cast_and_treat(&self, name: &str, raw: &str) -> FieldValue {
        let Some(ft) = self.field_type(name) else {
            return FieldValue::Missing;
        };
        match self.mining_schema.get(name) {
            Some(field) => match field.treatment().apply(ft, raw) {
                Ok(v) => v,
                Err(_) => FieldValue::Invalid, // returnInvalid: caller sees Invalid, raises at Apply/Output boundary
            },
            None => ft.cast(raw),
        }
    }

    /// Derived-field and parent-resolved values are already typed but have
    /// not gone through *this* context's own MiningField treatment (a
    /// derived field can still be a MiningSchema entry with its own
    /// outlier/invalid policy). Applies it if present.
    fn apply_treatment_if_untreated(&self, name: &str, outcome: EvalOutcome) -> EvalOutcome {
        let EvalOutcome::Value(v) = &outcome else {
            return outcome;
        };
        match self.mining_schema.get(name) {
            Some(field) if self.data_dictionary.contains(name) => match field.treatment().apply_cast(v.clone()) {
                Ok(treated) => EvalOutcome::Value(treated),
                Err(_) => EvalOutcome::Invalid,
            },
            _ => outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmml_document::{AggregateFn, DataType, MiningField};

    struct Fixture {
        dd: DataDictionary,
        ms: MiningSchema,
        td: TransformationDictionary,
        lt: LocalTransformations,
        ft: FunctionTable,
    }

    fn fixture() -> Fixture {
        Fixture {
            dd: DataDictionary::new(),
            ms: MiningSchema::default(),
            td: TransformationDictionary::default(),
            lt: LocalTransformations::default(),
            ft: FunctionTable::default(),
        }
    }

    #[test]
    fn unreachable_field_resolves_to_missing() {
        let f = fixture();
        let ctx = DataContext::new(&f.dd, &f.ms, &f.td, &f.lt, &f.ft, None);
        let input = FxHashMap::default();
        assert_eq!(ctx.get("ghost", &input), EvalOutcome::Value(FieldValue::Missing));
    }

    #[test]
    fn override_shadows_raw_input() {
        let f = fixture();
        let ctx = DataContext::new(&f.dd, &f.ms, &f.td, &f.lt, &f.ft, None);
        let mut map = FxHashMap::default();
        map.insert("x".to_string(), FieldValue::Double(42.0));
        ctx.push_override(map, true);
        let input = FxHashMap::default();
        assert_eq!(ctx.get("x", &input), EvalOutcome::Value(FieldValue::Double(42.0)));
        ctx.pop_override();
    }

    #[test]
    fn clear_empties_cache_and_overrides() {
        let f = fixture();
        let ctx = DataContext::new(&f.dd, &f.ms, &f.td, &f.lt, &f.ft, None);
        let mut map = FxHashMap::default();
        map.insert("x".to_string(), FieldValue::Double(1.0));
        ctx.push_override(map, true);
        ctx.clear();
        let input = FxHashMap::default();
        assert_eq!(ctx.get("x", &input), EvalOutcome::Value(FieldValue::Missing));
    }

    #[test]
    fn derived_field_evaluates_through_get() {
        let mut f = fixture();
        f.dd.insert("x", FieldType::continuous(DataType::Double));
        f.ms = MiningSchema::new(vec![MiningField::active("x")]);
        f.td.derived_fields.insert(
            "doubled".to_string(),
            DerivedField {
                name: "doubled".to_string(),
                expression: Expression::Constant(FieldValue::Double(7.0)),
                optype: None,
                data_type: None,
            },
        );
        let ctx = DataContext::new(&f.dd, &f.ms, &f.td, &f.lt, &f.ft, None);
        let input = FxHashMap::default();
        assert_eq!(ctx.get("doubled", &input), EvalOutcome::Value(FieldValue::Double(7.0)));
    }

    #[test]
    fn aggregate_sum_groups_by_field() {
        let mut f = fixture();
        f.dd.insert("x", FieldType::continuous(DataType::Double));
        f.dd.insert("g", FieldType::categorical_string());
        f.ms = MiningSchema::new(vec![MiningField::active("x"), MiningField::active("g")]);
        f.td.derived_fields.insert(
            "total".to_string(),
            DerivedField {
                name: "total".to_string(),
                expression: Expression::Aggregate {
                    field: "x".to_string(),
                    function: AggregateFn::Sum,
                    group_field: Some("g".to_string()),
                    sql_where: None,
                },
                optype: None,
                data_type: None,
            },
        );
        let ctx = DataContext::new(&f.dd, &f.ms, &f.td, &f.lt, &f.ft, None);

        for (x, g) in [("1", "a"), ("2", "a"), ("10", "b")] {
            let mut input = FxHashMap::default();
            input.insert("x".to_string(), x.to_string());
            input.insert("g".to_string(), g.to_string());
            ctx.clear();
            ctx.increment_aggregates(&input);
        }

        let mut input_a = FxHashMap::default();
        input_a.insert("g".to_string(), "a".to_string());
        ctx.clear();
        assert_eq!(ctx.get("total", &input_a), EvalOutcome::Value(FieldValue::Double(3.0)));

        let mut input_b = FxHashMap::default();
        input_b.insert("g".to_string(), "b".to_string());
        ctx.clear();
        assert_eq!(ctx.get("total", &input_b), EvalOutcome::Value(FieldValue::Double(10.0)));

        let mut input_c = FxHashMap::default();
        input_c.insert("g".to_string(), "c".to_string());
        ctx.clear();
        assert_eq!(ctx.get("total", &input_c), EvalOutcome::Value(FieldValue::Invalid));
    }
}
