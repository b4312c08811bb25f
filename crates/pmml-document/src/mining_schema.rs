//! `MiningField`/`MiningSchema` and the treatment-function contract from
//! spec.md §3/§4.2.

use crate::field_type::FieldType;
use pmml_common::FieldValue;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageType {
    Active,
    Predicted,
    Supplementary,
    Group,
    Order,
    FrequencyWeight,
    AnalysisWeight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidValueTreatment {
    AsIs,
    AsMissing,
    ReturnInvalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlierTreatment {
    AsIs,
    AsMissingValues,
    AsExtremeValues,
}

#[derive(Debug, Clone)]
pub struct MiningField {
    pub name: String,
    pub usage_type: UsageType,
    pub invalid_value_treatment: InvalidValueTreatment,
    pub missing_value_replacement: Option<FieldValue>,
    pub outliers: OutlierTreatment,
    pub low_value: Option<f64>,
    pub high_value: Option<f64>,
}

impl MiningField {
    pub fn active(name: impl Into<String>) -> Self {
        MiningField {
            name: name.into(),
            usage_type: UsageType::Active,
            invalid_value_treatment: InvalidValueTreatment::AsIs,
            missing_value_replacement: None,
            outliers: OutlierTreatment::AsIs,
            low_value: None,
            high_value: None,
        }
    }

    /// Assembles the `cast ∘ invalid → ∘ missing → ∘ outlier →` composition
    /// once, at bind time (spec.md §4.2). Returns a closure taking the raw
    /// string and the field's `FieldType`, so the MiningSchema can bind this
    /// once per field regardless of how many events flow through.
    pub fn treatment(&self) -> Treatment<'_> {
        Treatment { field: self }
    }
}

/// A deterministic, side-effect-free function `treat(cast(raw)) -> value |
/// Missing | Invalid`, composed in the fixed order spec.md §4.2 demands.
pub struct Treatment<'a> {
    field: &'a MiningField,
}

/// Result of `Treatment::apply` when `invalidValueTreatment = returnInvalid`:
/// the caller (DataContext) must raise, not silently substitute.
pub struct ReturnInvalidRaised;

impl<'a> Treatment<'a> {
    pub fn apply(&self, field_type: &FieldType, raw: &str) -> Result<FieldValue, ReturnInvalidRaised> {
        let cast = field_type.cast(raw);
        self.apply_cast(cast)
    }

    /// Applies the policy chain starting from an already-cast value (used
    /// when the value came from a derived-field expression rather than raw
    /// input text).
    pub fn apply_cast(&self, cast: FieldValue) -> Result<FieldValue, ReturnInvalidRaised> {
        let after_invalid = if cast.is_invalid() {
            match self.field.invalid_value_treatment {
                InvalidValueTreatment::AsIs => FieldValue::Invalid,
                InvalidValueTreatment::AsMissing => FieldValue::Missing,
                InvalidValueTreatment::ReturnInvalid => return Err(ReturnInvalidRaised),
            }
        } else {
            cast
        };

        let after_missing = if after_invalid.is_missing() {
            match &self.field.missing_value_replacement {
                Some(v) => v.clone(),
                None => FieldValue::Missing,
            }
        } else {
            after_invalid
        };

        let after_outlier = match self.field.outliers {
            OutlierTreatment::AsIs => after_missing,
            OutlierTreatment::AsMissingValues | OutlierTreatment::AsExtremeValues => {
                self.apply_outlier(after_missing)
            }
        };

        Ok(after_outlier)
    }

    fn apply_outlier(&self, value: FieldValue) -> FieldValue {
        let (Some(low), Some(high)) = (self.field.low_value, self.field.high_value) else {
            return value;
        };
        let Some(n) = value.as_f64() else {
            return value;
        };
        if n >= low && n <= high {
            return value;
        }
        match self.field.outliers {
            OutlierTreatment::AsMissingValues => FieldValue::Missing,
            OutlierTreatment::AsExtremeValues => {
                let clamped = n.clamp(low, high);
                match value {
                    FieldValue::Integer(_) => FieldValue::Integer(clamped as i64),
                    FieldValue::Float(_) => FieldValue::Float(clamped as f32),
                    FieldValue::Double(_) => FieldValue::Double(clamped),
                    other => other,
                }
            }
            OutlierTreatment::AsIs => value,
        }
    }
}

/// Per-model list of mining fields. Invariant (spec.md §3): field names in
/// MiningSchema, TransformationDictionary, and LocalTransformations are
/// pairwise disjoint — checked by `MiningSchema::disjoint_from`.
#[derive(Debug, Clone, Default)]
pub struct MiningSchema {
    pub fields: Vec<MiningField>,
}

impl MiningSchema {
    pub fn new(fields: Vec<MiningField>) -> Self {
        MiningSchema { fields }
    }

    pub fn get(&self, name: &str) -> Option<&MiningField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn active_fields(&self) -> impl Iterator<Item = &MiningField> {
        self.fields.iter().filter(|f| f.usage_type == UsageType::Active)
    }

    pub fn predicted_fields(&self) -> impl Iterator<Item = &MiningField> {
        self.fields.iter().filter(|f| f.usage_type == UsageType::Predicted)
    }

    pub fn names(&self) -> HashSet<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn disjoint_from(&self, other_names: &HashSet<&str>) -> bool {
        self.names().is_disjoint(other_names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_type::DataType;

    #[test]
    fn composition_order_is_cast_invalid_missing_outlier() {
        let mut field = MiningField::active("x");
        field.invalid_value_treatment = InvalidValueTreatment::AsMissing;
        field.missing_value_replacement = Some(FieldValue::Double(0.0));
        let ft = FieldType::continuous(DataType::Double);
        let treated = field.treatment().apply(&ft, "not-a-number").unwrap();
        assert_eq!(treated, FieldValue::Double(0.0));
    }

    #[test]
    fn return_invalid_raises() {
        let mut field = MiningField::active("x");
        field.invalid_value_treatment = InvalidValueTreatment::ReturnInvalid;
        let ft = FieldType::continuous(DataType::Double);
        assert!(field.treatment().apply(&ft, "nope").is_err());
    }

    #[test]
    fn outlier_clamps_to_extreme_values() {
        let mut field = MiningField::active("x");
        field.outliers = OutlierTreatment::AsExtremeValues;
        field.low_value = Some(0.0);
        field.high_value = Some(10.0);
        let ft = FieldType::continuous(DataType::Double);
        let treated = field.treatment().apply(&ft, "99").unwrap();
        assert_eq!(treated, FieldValue::Double(10.0));
    }

    #[test]
    fn outlier_as_missing_values() {
        let mut field = MiningField::active("x");
        field.outliers = OutlierTreatment::AsMissingValues;
        field.low_value = Some(0.0);
        field.high_value = Some(10.0);
        let ft = FieldType::continuous(DataType::Double);
        let treated = field.treatment().apply(&ft, "-5").unwrap();
        assert_eq!(treated, FieldValue::Missing);
    }
}
