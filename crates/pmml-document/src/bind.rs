//! Binds a generic [`crate::xml::XmlElement`] tree into the typed
//! [`ModelDocument`]. Schema validation happens here, once, at load time —
//! everything downstream of `bind` works on already-typed structure and
//! never re-examines raw text (design note §9).

use crate::expression::{
    AggregateFn, ApplyInvalidTreatment, BuiltinFn, DerivedField, DiscretizeBin, Expression, Function,
    FunctionTable, LinearNorm, LocalTransformations, MapValuesTable, OutlierTreatmentExpr, SqlWhere,
    TransformationDictionary, UserFunction,
};
use crate::field_type::{Closure, DataDictionary, DataType, EpochYear, FieldType, Interval, OpType};
use crate::mining_schema::{InvalidValueTreatment, MiningField, MiningSchema, OutlierTreatment, UsageType};
use crate::model::{
    FunctionName, Header, ModelBody, ModelContent, ModelDocument, OpaqueModelBody, RuleSetModelBody,
    TreeModelBody, SUPPORTED_VERSION_MAJOR,
};
use crate::output::{DecisionRow, OutputFeature, OutputField};
use crate::predicate::{CompoundOp, Predicate, SetOp, SimpleOp};
use crate::tree::{
    MissingValueStrategy, Node, NoTrueChildStrategy, Rule, RuleSelectionCriterion, RuleSet, ScoreDistribution,
    SimpleRule,
};
use crate::xml::{parse_tree, XmlElement};
use pmml_common::{FieldValue, ModelError};

pub fn parse_model_document(xml: &str) -> Result<ModelDocument, ModelError> {
    let root = parse_tree(xml)?;
    if root.name != "PMML" {
        return Err(ModelError::schema(format!("expected root element PMML, found {}", root.name)));
    }
    bind_document(&root)
}

fn bind_document(root: &XmlElement) -> Result<ModelDocument, ModelError> {
    let version = root.attr("version").unwrap_or_default().to_string();
    let major = version.split('.').next().unwrap_or_default();
    if major != SUPPORTED_VERSION_MAJOR {
        return Err(ModelError::schema(format!(
            "unsupported PMML version {version}, only {SUPPORTED_VERSION_MAJOR}.x is accepted"
        )));
    }

    let header = root.child("Header").map(bind_header).unwrap_or_default();

    let dd_elem = root
        .child("DataDictionary")
        .ok_or_else(|| ModelError::schema("PMML document missing DataDictionary"))?;
    let data_dictionary = bind_data_dictionary(dd_elem)?;

    let function_table = root
        .child("TransformationDictionary")
        .map(|td| bind_function_table(td))
        .transpose()?
        .unwrap_or_default();

    let transformation_dictionary = root
        .child("TransformationDictionary")
        .map(|td| bind_transformation_dictionary(td, &data_dictionary))
        .transpose()?
        .unwrap_or_default();

    let mut models = Vec::new();
    for child in &root.children {
        if let Some(body) = bind_model_body(child, &data_dictionary)? {
            models.push(body);
        }
    }

    Ok(ModelDocument {
        version,
        header,
        data_dictionary,
        transformation_dictionary,
        function_table,
        models,
    })
}

fn bind_header(elem: &XmlElement) -> Header {
    Header {
        copyright: elem.attr("copyright").map(str::to_string),
        description: elem.attr("description").map(str::to_string),
        application_name: elem.child("Application").and_then(|a| a.attr("name")).map(str::to_string),
        application_version: elem.child("Application").and_then(|a| a.attr("version")).map(str::to_string),
    }
}

// ---------------------------------------------------------------------
// DataDictionary / FieldType
// ---------------------------------------------------------------------

fn bind_data_dictionary(elem: &XmlElement) -> Result<DataDictionary, ModelError> {
    let mut dict = DataDictionary::new();
    for field_elem in elem.children_named("DataField") {
        let name = required_attr(field_elem, "name")?;
        let ty = bind_field_type(field_elem)?;
        dict.insert(name, ty);
    }
    Ok(dict)
}

fn bind_optype(raw: &str) -> Result<OpType, ModelError> {
    match raw {
        "categorical" => Ok(OpType::Categorical),
        "ordinal" => Ok(OpType::Ordinal),
        "continuous" => Ok(OpType::Continuous),
        other => Err(ModelError::schema(format!("unknown optype {other}"))),
    }
}

fn bind_epoch_year(raw: &str) -> Result<EpochYear, ModelError> {
    match raw {
        "dateDaysSince[0]" | "dateTimeSecondsSince[0]" => Ok(EpochYear::Y0),
        "dateDaysSince[1960]" | "dateTimeSecondsSince[1960]" => Ok(EpochYear::Y1960),
        "dateDaysSince[1970]" | "dateTimeSecondsSince[1970]" => Ok(EpochYear::Y1970),
        "dateDaysSince[1980]" | "dateTimeSecondsSince[1980]" => Ok(EpochYear::Y1980),
        other => Err(ModelError::schema(format!("unknown epoch-qualified dataType {other}"))),
    }
}

fn bind_data_type(raw: &str) -> Result<DataType, ModelError> {
    Ok(match raw {
        "string" => DataType::String,
        "integer" => DataType::Integer,
        "float" => DataType::Float,
        "double" => DataType::Double,
        "boolean" => DataType::Boolean,
        "date" => DataType::Date,
        "time" => DataType::Time,
        "dateTime" => DataType::DateTime,
        other if other.starts_with("dateDaysSince") => DataType::DateDaysSince(bind_epoch_year(other)?),
        other if other.starts_with("dateTimeSecondsSince") => {
            DataType::DateTimeSecondsSince(bind_epoch_year(other)?)
        }
        "timeSeconds" => DataType::TimeSeconds,
        other => return Err(ModelError::schema(format!("unknown dataType {other}"))),
    })
}

fn bind_closure(raw: &str) -> Result<Closure, ModelError> {
    match raw {
        "openOpen" => Ok(Closure::OpenOpen),
        "openClosed" => Ok(Closure::OpenClosed),
        "closedOpen" => Ok(Closure::ClosedOpen),
        "closedClosed" => Ok(Closure::ClosedClosed),
        other => Err(ModelError::schema(format!("unknown Interval closure {other}"))),
    }
}

fn parse_opt_f64(raw: Option<&str>) -> Result<Option<f64>, ModelError> {
    raw.map(|s| s.parse::<f64>().map_err(|_| ModelError::schema(format!("not a number: {s}"))))
        .transpose()
}

fn bind_field_type(elem: &XmlElement) -> Result<FieldType, ModelError> {
    let optype = bind_optype(&required_attr(elem, "optype")?)?;
    let data_type = bind_data_type(&required_attr(elem, "dataType")?)?;

    let mut enumerated_values = Vec::new();
    for value_elem in elem.children_named("Value") {
        if let Some(v) = value_elem.attr("value") {
            enumerated_values.push(v.to_string());
        }
    }

    let mut intervals = Vec::new();
    for iv_elem in elem.children_named("Interval") {
        let closure = bind_closure(&required_attr(iv_elem, "closure")?)?;
        let left = parse_opt_f64(iv_elem.attr("leftMargin"))?;
        let right = parse_opt_f64(iv_elem.attr("rightMargin"))?;
        intervals.push(Interval { closure, left, right });
    }

    let is_cyclic = elem.attr("isCyclic") == Some("1") || elem.attr("isCyclic") == Some("true");

    Ok(FieldType {
        optype,
        data_type,
        enumerated_values,
        intervals,
        is_cyclic,
    })
}

// ---------------------------------------------------------------------
// MiningSchema
// ---------------------------------------------------------------------

fn bind_usage_type(raw: Option<&str>) -> UsageType {
    match raw {
        Some("predicted") => UsageType::Predicted,
        Some("supplementary") => UsageType::Supplementary,
        Some("group") => UsageType::Group,
        Some("order") => UsageType::Order,
        Some("frequencyWeight") => UsageType::FrequencyWeight,
        Some("analysisWeight") => UsageType::AnalysisWeight,
        _ => UsageType::Active,
    }
}

fn bind_invalid_value_treatment(raw: Option<&str>) -> InvalidValueTreatment {
    match raw {
        Some("asMissing") => InvalidValueTreatment::AsMissing,
        Some("returnInvalid") => InvalidValueTreatment::ReturnInvalid,
        _ => InvalidValueTreatment::AsIs,
    }
}

fn bind_outlier_treatment(raw: Option<&str>) -> OutlierTreatment {
    match raw {
        Some("asMissingValues") => OutlierTreatment::AsMissingValues,
        Some("asExtremeValues") => OutlierTreatment::AsExtremeValues,
        _ => OutlierTreatment::AsIs,
    }
}

fn bind_mining_schema(elem: &XmlElement, dict: &DataDictionary) -> Result<MiningSchema, ModelError> {
    let mut fields = Vec::new();
    for field_elem in elem.children_named("MiningField") {
        let name = required_attr(field_elem, "name")?;
        let field_type = dict
            .get(&name)
            .ok_or_else(|| ModelError::schema(format!("MiningField {name} not in DataDictionary")))?;

        let missing_value_replacement = field_elem
            .attr("missingValueReplacement")
            .map(|raw| field_type.cast(raw));

        fields.push(MiningField {
            name,
            usage_type: bind_usage_type(field_elem.attr("usageType")),
            invalid_value_treatment: bind_invalid_value_treatment(field_elem.attr("invalidValueTreatment")),
            missing_value_replacement,
            outliers: bind_outlier_treatment(field_elem.attr("outliers")),
            low_value: parse_opt_f64(field_elem.attr("lowValue"))?,
            high_value: parse_opt_f64(field_elem.attr("highValue"))?,
        });
    }
    Ok(MiningSchema::new(fields))
}

// ---------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------

const EXPRESSION_TAGS: &[&str] = &[
    "Constant",
    "FieldRef",
    "NormContinuous",
    "NormDiscrete",
    "Discretize",
    "MapValues",
    "Aggregate",
    "Apply",
];

fn bind_field_value_literal(raw: &str, dict: &DataDictionary, field: Option<&str>) -> FieldValue {
    match field.and_then(|f| dict.get(f)) {
        Some(ft) => ft.cast(raw),
        None => match raw.parse::<f64>() {
            Ok(v) => FieldValue::Double(v),
            Err(_) => FieldValue::String(raw.to_string()),
        },
    }
}

fn bind_expression(elem: &XmlElement, dict: &DataDictionary) -> Result<Expression, ModelError> {
    match elem.name.as_str() {
        "Constant" => Ok(Expression::Constant(bind_field_value_literal(&elem.text, dict, None))),
        "FieldRef" => Ok(Expression::FieldRef {
            field: required_attr(elem, "field")?,
            map_missing_to: elem.attr("mapMissingTo").map(|r| FieldValue::String(r.to_string())),
        }),
        "NormContinuous" => bind_norm_continuous(elem),
        "NormDiscrete" => bind_norm_discrete(elem, dict),
        "Discretize" => bind_discretize(elem, dict),
        "MapValues" => bind_map_values(elem, dict),
        "Aggregate" => bind_aggregate(elem),
        "Apply" => bind_apply(elem, dict),
        other => Err(ModelError::schema(format!("unknown expression element {other}"))),
    }
}

fn bind_norm_continuous(elem: &XmlElement) -> Result<Expression, ModelError> {
    let field = required_attr(elem, "field")?;
    let mut knots = Vec::new();
    for ln in elem.children_named("LinearNorm") {
        let orig: f64 = required_attr(ln, "orig")?
            .parse()
            .map_err(|_| ModelError::schema("LinearNorm orig must be numeric"))?;
        let norm: f64 = required_attr(ln, "norm")?
            .parse()
            .map_err(|_| ModelError::schema("LinearNorm norm must be numeric"))?;
        knots.push(LinearNorm { orig, norm });
    }
    let outliers = match elem.attr("outliers") {
        Some("asMissingValues") => OutlierTreatmentExpr::AsMissingValues,
        Some("asExtremeValues") => OutlierTreatmentExpr::AsExtremeValues,
        _ => OutlierTreatmentExpr::AsIs,
    };
    Ok(Expression::NormContinuous {
        field,
        knots,
        map_missing_to: parse_opt_f64(elem.attr("mapMissingTo"))?.map(FieldValue::Double),
        outliers,
    })
}

fn bind_norm_discrete(elem: &XmlElement, dict: &DataDictionary) -> Result<Expression, ModelError> {
    let field = required_attr(elem, "field")?;
    let value = required_attr(elem, "value")?;
    Ok(Expression::NormDiscrete {
        field: field.clone(),
        value: bind_field_value_literal(&value, dict, Some(&field)),
        map_missing_to: parse_opt_f64(elem.attr("mapMissingTo"))?.map(FieldValue::Double),
    })
}

fn bind_discretize(elem: &XmlElement, dict: &DataDictionary) -> Result<Expression, ModelError> {
    let field = required_attr(elem, "field")?;
    let mut bins = Vec::new();
    for bin in elem.children_named("DiscretizeBin") {
        let iv = bin
            .child("Interval")
            .ok_or_else(|| ModelError::schema("DiscretizeBin missing Interval"))?;
        let left = parse_opt_f64(iv.attr("leftMargin"))?;
        let right = parse_opt_f64(iv.attr("rightMargin"))?;
        let value = bind_field_value_literal(&required_attr(bin, "binValue")?, dict, None);
        bins.push(DiscretizeBin { left, right, value });
    }
    Ok(Expression::Discretize {
        field,
        bins,
        map_missing_to: elem.attr("mapMissingTo").map(|r| FieldValue::String(r.to_string())),
        default_value: elem.attr("defaultValue").map(|r| FieldValue::String(r.to_string())),
    })
}

fn bind_map_values(elem: &XmlElement, dict: &DataDictionary) -> Result<Expression, ModelError> {
    let mut field_columns = Vec::new();
    for fcp in elem.children_named("FieldColumnPair") {
        field_columns.push((required_attr(fcp, "field")?, required_attr(fcp, "column")?));
    }
    let inline = elem
        .child("InlineTable")
        .ok_or_else(|| ModelError::schema("MapValues missing InlineTable"))?;
    let output_column = required_attr(elem, "outputColumn")?;
    let mut table = MapValuesTable::default();
    for row in inline.children_named("row") {
        let mut cols = Vec::with_capacity(field_columns.len());
        for (_, column) in &field_columns {
            let cell = row
                .child(column)
                .ok_or_else(|| ModelError::schema(format!("InlineTable row missing column {column}")))?;
            cols.push(FieldValue::String(cell.text.clone()));
        }
        let out = row
            .child(&output_column)
            .ok_or_else(|| ModelError::schema("InlineTable row missing output column"))?;
        table.rows.push((cols, FieldValue::String(out.text.clone())));
    }
    Ok(Expression::MapValues {
        field_columns,
        table,
        map_missing_to: elem.attr("mapMissingTo").map(|r| FieldValue::String(r.to_string())),
        default_value: elem.attr("defaultValue").map(|r| FieldValue::String(r.to_string())),
    })
}

fn bind_aggregate(elem: &XmlElement) -> Result<Expression, ModelError> {
    let function = match required_attr(elem, "function")?.as_str() {
        "count" => AggregateFn::Count,
        "sum" => AggregateFn::Sum,
        "average" => AggregateFn::Average,
        "min" => AggregateFn::Min,
        "max" => AggregateFn::Max,
        other => return Err(ModelError::schema(format!("unknown Aggregate function {other}"))),
    };
    let sql_where = elem.attr("sqlWhere").map(|w| parse_sql_where(w)).transpose()?;
    Ok(Expression::Aggregate {
        field: required_attr(elem, "field")?,
        function,
        group_field: elem.attr("groupField").map(str::to_string),
        sql_where,
    })
}

/// Recursive-descent over the small `sqlWhere` grammar (design note §9):
///
/// ```text
/// clause := compare | between | like | in
/// compare := FIELD OP LITERAL
/// between := FIELD "BETWEEN" LITERAL "AND" LITERAL
/// like    := FIELD "LIKE" LITERAL
/// in      := FIELD "IN" "(" LITERAL ("," LITERAL)* ")"
/// ```
fn parse_sql_where(raw: &str) -> Result<SqlWhere, ModelError> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    if tokens.len() >= 4 && tokens[1].eq_ignore_ascii_case("BETWEEN") && tokens[3].eq_ignore_ascii_case("AND") {
        let field = tokens[0].to_string();
        let low = parse_sql_literal(tokens[2])?;
        let high = parse_sql_literal(tokens.get(4).copied().unwrap_or(""))?;
        return Ok(SqlWhere::Between { field, low, high });
    }
    if tokens.len() >= 3 && tokens[1].eq_ignore_ascii_case("LIKE") {
        return Ok(SqlWhere::Like {
            field: tokens[0].to_string(),
            pattern: strip_quotes(tokens[2]),
        });
    }
    if tokens.len() >= 3 && tokens[1].eq_ignore_ascii_case("IN") {
        let rest = raw.splitn(2, |c: char| c == '(').nth(1).unwrap_or("");
        let inner = rest.trim_end_matches(')');
        let values = inner
            .split(',')
            .map(|t| parse_sql_literal(t.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(SqlWhere::In {
            field: tokens[0].to_string(),
            values,
        });
    }
    if tokens.len() >= 3 {
        let op = match tokens[1] {
            "=" => SimpleOp::Equal,
            "<>" | "!=" => SimpleOp::NotEqual,
            "<" => SimpleOp::LessThan,
            "<=" => SimpleOp::LessOrEqual,
            ">" => SimpleOp::GreaterThan,
            ">=" => SimpleOp::GreaterOrEqual,
            other => return Err(ModelError::schema(format!("unknown sqlWhere operator {other}"))),
        };
        return Ok(SqlWhere::Compare {
            field: tokens[0].to_string(),
            op,
            literal: parse_sql_literal(tokens[2])?,
        });
    }
    Err(ModelError::schema(format!("unrecognized sqlWhere clause: {raw}")))
}

fn strip_quotes(s: &str) -> String {
    s.trim_matches(|c| c == '\'' || c == '"').to_string()
}

fn parse_sql_literal(raw: &str) -> Result<FieldValue, ModelError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ModelError::schema("empty sqlWhere literal"));
    }
    if (trimmed.starts_with('\'') && trimmed.ends_with('\'')) || (trimmed.starts_with('"') && trimmed.ends_with('"'))
    {
        return Ok(FieldValue::String(strip_quotes(trimmed)));
    }
    match trimmed.parse::<f64>() {
        Ok(v) => Ok(FieldValue::Double(v)),
        Err(_) => Ok(FieldValue::String(trimmed.to_string())),
    }
}

fn bind_builtin(name: &str) -> Option<BuiltinFn> {
    Some(match name {
        "+" => BuiltinFn::Add,
        "-" => BuiltinFn::Subtract,
        "*" => BuiltinFn::Multiply,
        "/" => BuiltinFn::Divide,
        "and" => BuiltinFn::And,
        "or" => BuiltinFn::Or,
        "not" => BuiltinFn::Not,
        "equal" => BuiltinFn::Equal,
        "notEqual" => BuiltinFn::NotEqual,
        "lessThan" => BuiltinFn::LessThan,
        "lessOrEqual" => BuiltinFn::LessOrEqual,
        "greaterThan" => BuiltinFn::GreaterThan,
        "greaterOrEqual" => BuiltinFn::GreaterOrEqual,
        "log10" => BuiltinFn::Log10,
        "ln" => BuiltinFn::Ln,
        "sqrt" => BuiltinFn::Sqrt,
        "abs" => BuiltinFn::Abs,
        "exp" => BuiltinFn::Exp,
        "pow" => BuiltinFn::Pow,
        "threshold" => BuiltinFn::Threshold,
        "floor" => BuiltinFn::Floor,
        "ceil" => BuiltinFn::Ceil,
        "round" => BuiltinFn::Round,
        "isMissing" => BuiltinFn::IsMissing,
        "isNotMissing" => BuiltinFn::IsNotMissing,
        "min" => BuiltinFn::Min,
        "max" => BuiltinFn::Max,
        "sum" => BuiltinFn::Sum,
        "avg" => BuiltinFn::Avg,
        "isIn" => BuiltinFn::IsIn,
        "isNotIn" => BuiltinFn::IsNotIn,
        "lowercase" => BuiltinFn::Lowercase,
        "uppercase" => BuiltinFn::Uppercase,
        "substring" => BuiltinFn::Substring,
        "trimBlanks" => BuiltinFn::TrimBlanks,
        "formatNumber" => BuiltinFn::FormatNumber,
        "formatDatetime" => BuiltinFn::FormatDatetime,
        "dateDaysSinceYear" => BuiltinFn::DateDaysSinceYear,
        "dateSecondsSinceYear" => BuiltinFn::DateSecondsSinceYear,
        "dateSecondsSinceMidnight" => BuiltinFn::DateSecondsSinceMidnight,
        "if" => BuiltinFn::If,
        _ => return None,
    })
}

fn bind_apply(elem: &XmlElement, dict: &DataDictionary) -> Result<Expression, ModelError> {
    let name = required_attr(elem, "function")?;
    let function = match bind_builtin(&name) {
        Some(b) => Function::Builtin(b),
        None => Function::UserDefined(usize::MAX), // patched by bind_document's caller below
    };
    let mut args = Vec::new();
    for child in &elem.children {
        if EXPRESSION_TAGS.contains(&child.name.as_str()) {
            args.push(bind_expression(child, dict)?);
        }
    }
    if let Function::Builtin(b) = &function {
        let (min, max) = b.arity();
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            return Err(ModelError::schema(format!(
                "function {name} takes {} arguments, got {}",
                match max {
                    Some(max) if max == min => format!("exactly {min}"),
                    Some(max) => format!("{min}..={max}"),
                    None => format!("at least {min}"),
                },
                args.len()
            )));
        }
    }
    let invalid_value_treatment = match elem.attr("invalidValueTreatment") {
        Some("returnInvalid") => ApplyInvalidTreatment::ReturnInvalid,
        Some("asMissing") => ApplyInvalidTreatment::AsMissing,
        _ => ApplyInvalidTreatment::AsIs,
    };
    Ok(Expression::Apply {
        function,
        args,
        map_missing_to: elem.attr("mapMissingTo").map(|r| FieldValue::String(r.to_string())),
        invalid_value_treatment,
    })
}

/// Re-resolves `Function::UserDefined(usize::MAX)` placeholders left by
/// [`bind_apply`] (which doesn't have the function table in scope) against
/// the now-complete table. Schema error if the name is neither a builtin
/// nor in the table.
fn resolve_user_functions(expr: &mut Expression, elem: &XmlElement, table: &FunctionTable) -> Result<(), ModelError> {
    if let Expression::Apply { function, args, .. } = expr {
        if matches!(function, Function::UserDefined(i) if *i == usize::MAX) {
            let name = elem.attr("function").unwrap_or_default();
            let idx = table
                .find_by_name(name)
                .ok_or_else(|| ModelError::schema(format!("unknown function {name}")))?;
            *function = Function::UserDefined(idx);
        }
        let mut child_idx = 0;
        for child in &elem.children {
            if EXPRESSION_TAGS.contains(&child.name.as_str()) {
                if let Some(arg_expr) = args.get_mut(child_idx) {
                    resolve_user_functions(arg_expr, child, table)?;
                }
                child_idx += 1;
            }
        }
    }
    Ok(())
}

fn bind_function_table(td: &XmlElement) -> Result<FunctionTable, ModelError> {
    let mut table = FunctionTable::default();
    for fn_elem in td.children_named("DefineFunction") {
        let name = required_attr(fn_elem, "name")?;
        let parameters: Vec<String> = fn_elem
            .children_named("ParameterField")
            .filter_map(|p| p.attr("name").map(str::to_string))
            .collect();
        let body_elem = fn_elem
            .first_child_in(EXPRESSION_TAGS)
            .ok_or_else(|| ModelError::schema(format!("DefineFunction {name} missing body expression")))?;
        let empty_dict = DataDictionary::new();
        let body = bind_expression(body_elem, &empty_dict)?;
        table.functions.push(UserFunction { name, parameters, body });
    }
    // second pass: resolve nested user-function calls now that the whole table exists
    for (fn_elem, user_fn) in td.children_named("DefineFunction").zip(table.functions.iter_mut()) {
        if let Some(body_elem) = fn_elem.first_child_in(EXPRESSION_TAGS) {
            resolve_user_functions(&mut user_fn.body, body_elem, &table_snapshot(&table))?;
        }
    }
    Ok(table)
}

// cloning the table for the second resolution pass avoids a double-mutable-borrow
fn table_snapshot(table: &FunctionTable) -> FunctionTable {
    table.clone()
}

fn bind_derived_field(elem: &XmlElement, dict: &DataDictionary, table: &FunctionTable) -> Result<DerivedField, ModelError> {
    let name = required_attr(elem, "name")?;
    let expr_elem = elem
        .first_child_in(EXPRESSION_TAGS)
        .ok_or_else(|| ModelError::schema(format!("DerivedField {name} missing expression")))?;
    let mut expression = bind_expression(expr_elem, dict)?;
    resolve_user_functions(&mut expression, expr_elem, table)?;
    Ok(DerivedField {
        name,
        expression,
        optype: elem.attr("optype").map(bind_optype).transpose()?,
        data_type: elem.attr("dataType").map(bind_data_type).transpose()?,
    })
}

fn bind_transformation_dictionary(
    elem: &XmlElement,
    dict: &DataDictionary,
) -> Result<TransformationDictionary, ModelError> {
    let table = bind_function_table(elem)?;
    let mut out = TransformationDictionary::default();
    for df_elem in elem.children_named("DerivedField") {
        let df = bind_derived_field(df_elem, dict, &table)?;
        out.derived_fields.insert(df.name.clone(), df);
    }
    Ok(out)
}

fn bind_local_transformations(
    elem: &XmlElement,
    dict: &DataDictionary,
    table: &FunctionTable,
) -> Result<LocalTransformations, ModelError> {
    let mut out = LocalTransformations::default();
    for df_elem in elem.children_named("DerivedField") {
        let df = bind_derived_field(df_elem, dict, table)?;
        out.derived_fields.insert(df.name.clone(), df);
    }
    Ok(out)
}

// ---------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------

const PREDICATE_TAGS: &[&str] = &["SimplePredicate", "CompoundPredicate", "SimpleSetPredicate", "True", "False"];

fn bind_predicate(elem: &XmlElement, dict: &DataDictionary) -> Result<Predicate, ModelError> {
    match elem.name.as_str() {
        "True" => Ok(Predicate::True),
        "False" => Ok(Predicate::False),
        "SimplePredicate" => {
            let field = required_attr(elem, "field")?;
            let op = match required_attr(elem, "operator")?.as_str() {
                "equal" => SimpleOp::Equal,
                "notEqual" => SimpleOp::NotEqual,
                "lessThan" => SimpleOp::LessThan,
                "lessOrEqual" => SimpleOp::LessOrEqual,
                "greaterThan" => SimpleOp::GreaterThan,
                "greaterOrEqual" => SimpleOp::GreaterOrEqual,
                "isMissing" => SimpleOp::IsMissing,
                "isNotMissing" => SimpleOp::IsNotMissing,
                other => return Err(ModelError::schema(format!("unknown SimplePredicate operator {other}"))),
            };
            let value = if matches!(op, SimpleOp::IsMissing | SimpleOp::IsNotMissing) {
                None
            } else {
                let raw = required_attr(elem, "value")?;
                Some(bind_field_value_literal(&raw, dict, Some(&field)))
            };
            Ok(Predicate::SimplePredicate { field, op, value })
        }
        "CompoundPredicate" => {
            let op = match required_attr(elem, "booleanOperator")?.as_str() {
                "and" => CompoundOp::And,
                "or" => CompoundOp::Or,
                "xor" => CompoundOp::Xor,
                "surrogate" => CompoundOp::Surrogate,
                other => return Err(ModelError::schema(format!("unknown CompoundPredicate operator {other}"))),
            };
            let mut children = Vec::new();
            for child in &elem.children {
                if PREDICATE_TAGS.contains(&child.name.as_str()) {
                    children.push(bind_predicate(child, dict)?);
                }
            }
            if children.len() < 2 {
                return Err(ModelError::schema("CompoundPredicate needs at least two children"));
            }
            Ok(Predicate::CompoundPredicate { op, children })
        }
        "SimpleSetPredicate" => {
            let field = required_attr(elem, "field")?;
            let op = match required_attr(elem, "booleanOperator")?.as_str() {
                "isIn" => SetOp::IsIn,
                "isNotIn" => SetOp::IsNotIn,
                other => return Err(ModelError::schema(format!("unknown SimpleSetPredicate operator {other}"))),
            };
            let array_elem = elem
                .child("Array")
                .ok_or_else(|| ModelError::schema("SimpleSetPredicate missing Array"))?;
            let parsed = pmml_common::array::parse(pmml_common::ArrayType::String, None, &array_elem.text)?;
            let tokens = match parsed {
                pmml_common::ArrayValue::String(tokens) => tokens,
                _ => unreachable!("ArrayType::String always parses to ArrayValue::String"),
            };
            let array = tokens
                .into_iter()
                .map(|t| bind_field_value_literal(&t, dict, Some(&field)))
                .collect();
            Ok(Predicate::SimpleSetPredicate { field, op, array })
        }
        other => Err(ModelError::schema(format!("unknown predicate element {other}"))),
    }
}

// ---------------------------------------------------------------------
// Tree / Node
// ---------------------------------------------------------------------

fn bind_node(elem: &XmlElement, dict: &DataDictionary) -> Result<Node, ModelError> {
    let id = elem.attr("id").unwrap_or_default().to_string();
    let predicate_elem = elem
        .first_child_in(PREDICATE_TAGS)
        .ok_or_else(|| ModelError::schema(format!("Node {id} missing predicate")))?;
    let predicate = bind_predicate(predicate_elem, dict)?;

    let mut score_distribution = Vec::new();
    for sd in elem.children_named("ScoreDistribution") {
        let record_count: f64 = required_attr(sd, "recordCount")?
            .parse()
            .map_err(|_| ModelError::schema("ScoreDistribution recordCount must be numeric"))?;
        let probability = parse_opt_f64(sd.attr("confidence"))?;
        score_distribution.push(ScoreDistribution {
            value: required_attr(sd, "value")?,
            record_count,
            probability,
        });
    }

    let regression = elem.first_child_in(EXPRESSION_TAGS).map(|e| bind_expression(e, dict)).transpose()?;

    let mut children = Vec::new();
    for child in elem.children_named("Node") {
        children.push(bind_node(child, dict)?);
    }

    let mut node = Node {
        id,
        score: elem.attr("score").map(str::to_string),
        predicate,
        children,
        score_distribution,
        default_child: elem.attr("defaultChild").map(str::to_string),
        regression,
    };
    node.normalize_score_distribution();
    Ok(node)
}

fn bind_tree_model(elem: &XmlElement, dict: &DataDictionary) -> Result<TreeModelBody, ModelError> {
    let root_elem = elem
        .child("Node")
        .ok_or_else(|| ModelError::schema("TreeModel missing root Node"))?;
    let root = bind_node(root_elem, dict)?;
    let missing_value_strategy = match elem.attr("missingValueStrategy") {
        Some("lastPrediction") => MissingValueStrategy::LastPrediction,
        Some("defaultChild") => MissingValueStrategy::DefaultChild,
        Some("none") | None => MissingValueStrategy::None,
        Some("nullPrediction") => MissingValueStrategy::NullPrediction,
        Some("weightedConfidence") => MissingValueStrategy::WeightedConfidence,
        Some("aggregateNodes") => MissingValueStrategy::AggregateNodes,
        Some(other) => return Err(ModelError::schema(format!("unknown missingValueStrategy {other}"))),
    };
    if matches!(
        missing_value_strategy,
        MissingValueStrategy::WeightedConfidence | MissingValueStrategy::AggregateNodes
    ) {
        return Err(ModelError::not_implemented(
            "missingValueStrategy weightedConfidence/aggregateNodes is not implemented",
        ));
    }
    let no_true_child_strategy = match elem.attr("noTrueChildStrategy") {
        Some("returnLastPrediction") => NoTrueChildStrategy::ReturnLastPrediction,
        _ => NoTrueChildStrategy::ReturnNullPrediction,
    };
    Ok(TreeModelBody {
        root,
        missing_value_strategy,
        no_true_child_strategy,
        missing_value_penalty: parse_opt_f64(elem.attr("missingValuePenalty"))?,
    })
}

// ---------------------------------------------------------------------
// RuleSet
// ---------------------------------------------------------------------

const RULE_TAGS: &[&str] = &["SimpleRule", "CompoundRule"];

fn bind_rule(elem: &XmlElement, dict: &DataDictionary) -> Result<Rule, ModelError> {
    let predicate_elem = elem
        .first_child_in(PREDICATE_TAGS)
        .ok_or_else(|| ModelError::schema("Rule missing predicate"))?;
    let predicate = bind_predicate(predicate_elem, dict)?;
    match elem.name.as_str() {
        "SimpleRule" => {
            let mut score_distribution = Vec::new();
            for sd in elem.children_named("ScoreDistribution") {
                let record_count: f64 = required_attr(sd, "recordCount")?
                    .parse()
                    .map_err(|_| ModelError::schema("ScoreDistribution recordCount must be numeric"))?;
                score_distribution.push(ScoreDistribution {
                    value: required_attr(sd, "value")?,
                    record_count,
                    probability: parse_opt_f64(sd.attr("confidence"))?,
                });
            }
            Ok(Rule::Simple(SimpleRule {
                predicate,
                score: required_attr(elem, "score")?,
                weight: parse_opt_f64(elem.attr("weight"))?.unwrap_or(1.0),
                score_distribution,
            }))
        }
        "CompoundRule" => {
            let mut children = Vec::new();
            for child in &elem.children {
                if RULE_TAGS.contains(&child.name.as_str()) {
                    children.push(bind_rule(child, dict)?);
                }
            }
            Ok(Rule::Compound(crate::tree::CompoundRule { predicate, children }))
        }
        other => Err(ModelError::schema(format!("unknown rule element {other}"))),
    }
}

fn bind_rule_set_model(elem: &XmlElement, dict: &DataDictionary) -> Result<RuleSetModelBody, ModelError> {
    let rs_elem = elem
        .child("RuleSet")
        .ok_or_else(|| ModelError::schema("RuleSetModel missing RuleSet"))?;
    let criterion = match rs_elem.attr("ruleSelectionCriterion") {
        Some("weightedMax") => RuleSelectionCriterion::WeightedMax,
        Some("weightedSum") => RuleSelectionCriterion::WeightedSum,
        _ => RuleSelectionCriterion::FirstHit,
    };
    let mut rules = Vec::new();
    for child in &rs_elem.children {
        if RULE_TAGS.contains(&child.name.as_str()) {
            rules.push(bind_rule(child, dict)?);
        }
    }
    Ok(RuleSetModelBody {
        rule_set: RuleSet {
            criterion,
            rules,
            default_score: rs_elem.attr("defaultScore").map(str::to_string),
            default_confidence: parse_opt_f64(rs_elem.attr("defaultConfidence"))?,
        },
    })
}

// ---------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------

fn bind_output_feature(raw: &str) -> Result<OutputFeature, ModelError> {
    Ok(match raw {
        "predictedValue" => OutputFeature::PredictedValue,
        "predictedDisplayValue" => OutputFeature::PredictedDisplayValue,
        "transformedValue" => OutputFeature::TransformedValue,
        "decision" => OutputFeature::Decision,
        "probability" => OutputFeature::Probability,
        "affinity" => OutputFeature::Affinity,
        "residual" => OutputFeature::Residual,
        "standardError" => OutputFeature::StandardError,
        "clusterId" => OutputFeature::ClusterId,
        "clusterAffinity" => OutputFeature::ClusterAffinity,
        "entityId" => OutputFeature::EntityId,
        "entityAffinity" => OutputFeature::EntityAffinity,
        "warning" => OutputFeature::Warning,
        "ruleValue" => OutputFeature::RuleValue,
        "reasonCode" => OutputFeature::ReasonCode,
        other => return Err(ModelError::schema(format!("unknown output feature {other}"))),
    })
}

fn bind_output(elem: &XmlElement, dict: &DataDictionary) -> Result<Vec<OutputField>, ModelError> {
    let mut fields = Vec::new();
    for of_elem in elem.children_named("OutputField") {
        let feature = bind_output_feature(of_elem.attr("feature").unwrap_or("predictedValue"))?;
        let expression = of_elem.first_child_in(EXPRESSION_TAGS).map(|e| bind_expression(e, dict)).transpose()?;
        let mut decisions = Vec::new();
        if let Some(decisions_elem) = of_elem.child("Decisions") {
            for d in decisions_elem.children_named("Decision") {
                let value = required_attr(d, "value")?;
                let decision = d.attr("displayValue").map(str::to_string).unwrap_or_else(|| value.clone());
                decisions.push(DecisionRow { value, decision });
            }
        }
        fields.push(OutputField {
            name: required_attr(of_elem, "name")?,
            display_name: of_elem.attr("displayName").map(str::to_string),
            feature,
            expression,
            decisions,
            value_filter: of_elem.attr("value").map(str::to_string),
            rank: of_elem.attr("rank").and_then(|r| r.parse().ok()),
        });
    }
    Ok(fields)
}

// ---------------------------------------------------------------------
// ModelBody dispatch
// ---------------------------------------------------------------------

const MODEL_ELEMENT_NAMES: &[&str] = &[
    "TreeModel",
    "RuleSetModel",
    "RegressionModel",
    "GeneralRegressionModel",
    "NaiveBayesModel",
    "ClusteringModel",
    "NeuralNetwork",
    "SupportVectorMachineModel",
    "AssociationModel",
    "SequenceModel",
    "TimeSeriesModel",
    "MiningModel",
    "Scorecard",
    "BaselineModel",
    "TextModel",
];

fn bind_function_name(raw: &str) -> Result<FunctionName, ModelError> {
    Ok(match raw {
        "associationRules" => FunctionName::AssociationRules,
        "sequences" => FunctionName::Sequences,
        "classification" => FunctionName::Classification,
        "regression" => FunctionName::Regression,
        "clustering" => FunctionName::Clustering,
        "timeSeries" => FunctionName::TimeSeries,
        "mixed" => FunctionName::Mixed,
        other => return Err(ModelError::schema(format!("unknown functionName {other}"))),
    })
}

fn bind_model_body(elem: &XmlElement, dict: &DataDictionary) -> Result<Option<ModelBody>, ModelError> {
    if !MODEL_ELEMENT_NAMES.contains(&elem.name.as_str()) {
        return Ok(None);
    }

    let mining_schema_elem = elem
        .child("MiningSchema")
        .ok_or_else(|| ModelError::schema(format!("{} missing MiningSchema", elem.name)))?;
    let mining_schema = bind_mining_schema(mining_schema_elem, dict)?;

    let local_table = FunctionTable::default();
    let local_transformations = match elem.child("LocalTransformations") {
        Some(lt) => bind_local_transformations(lt, dict, &local_table)?,
        None => LocalTransformations::default(),
    };

    let active_names = mining_schema.names();
    let local_names: std::collections::HashSet<&str> =
        local_transformations.derived_fields.keys().map(|s| s.as_str()).collect();
    if !active_names.is_disjoint(&local_names) {
        return Err(ModelError::schema(format!(
            "{} MiningSchema and LocalTransformations field names overlap",
            elem.name
        )));
    }

    let output = match elem.child("Output") {
        Some(o) => bind_output(o, dict)?,
        None => Vec::new(),
    };

    let function_name = bind_function_name(elem.attr("functionName").unwrap_or("mixed"))?;
    let is_scorable = elem.attr("isScorable").map(|v| v != "false").unwrap_or(true);
    let model_name = elem.attr("modelName").map(str::to_string);

    let content = match elem.name.as_str() {
        "TreeModel" => ModelContent::TreeModel(bind_tree_model(elem, dict)?),
        "RuleSetModel" => ModelContent::RuleSetModel(bind_rule_set_model(elem, dict)?),
        other => ModelContent::Opaque(OpaqueModelBody {
            element_name: other.to_string(),
        }),
    };

    Ok(Some(ModelBody {
        model_name,
        function_name,
        is_scorable,
        mining_schema,
        output,
        local_transformations,
        content,
    }))
}

fn required_attr(elem: &XmlElement, key: &str) -> Result<String, ModelError> {
    elem.attr(key)
        .map(str::to_string)
        .ok_or_else(|| ModelError::schema(format!("{} missing required attribute {key}", elem.name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_TREE: &str = r#"
        <PMML version="4.4">
          <DataDictionary>
            <DataField name="age" optype="continuous" dataType="double"/>
            <DataField name="outcome" optype="categorical" dataType="string">
              <Value value="yes"/>
              <Value value="no"/>
            </DataField>
          </DataDictionary>
          <TreeModel functionName="classification" missingValueStrategy="none" noTrueChildStrategy="returnNullPrediction">
            <MiningSchema>
              <MiningField name="age"/>
              <MiningField name="outcome" usageType="predicted"/>
            </MiningSchema>
            <Node id="1" score="no">
              <True/>
              <Node id="2" score="yes">
                <SimplePredicate field="age" operator="greaterThan" value="30"/>
              </Node>
            </Node>
          </TreeModel>
        </PMML>
    "#;

    #[test]
    fn binds_simple_tree_model() {
        let doc = parse_model_document(SIMPLE_TREE).unwrap();
        assert_eq!(doc.models.len(), 1);
        match &doc.models[0].content {
            ModelContent::TreeModel(body) => {
                assert_eq!(body.root.id, "1");
                assert_eq!(body.root.children.len(), 1);
            }
            _ => panic!("expected TreeModel"),
        }
    }

    #[test]
    fn rejects_unsupported_version() {
        let xml = SIMPLE_TREE.replace("4.4", "3.2");
        let err = parse_model_document(&xml).unwrap_err();
        assert_eq!(err.kind, pmml_common::ModelErrorKind::SchemaValidation);
    }

    #[test]
    fn rejects_weighted_confidence_strategy() {
        let xml = SIMPLE_TREE.replace("missingValueStrategy=\"none\"", "missingValueStrategy=\"weightedConfidence\"");
        let err = parse_model_document(&xml).unwrap_err();
        assert_eq!(err.kind, pmml_common::ModelErrorKind::NotImplemented);
    }

    #[test]
    fn rejects_apply_with_too_few_arguments() {
        let xml = SIMPLE_TREE.replace(
            "<MiningSchema>",
            r#"<LocalTransformations>
                <DerivedField name="bad" optype="continuous" dataType="double">
                    <Apply function="sqrt"/>
                </DerivedField>
            </LocalTransformations>
            <MiningSchema>"#,
        );
        let err = parse_model_document(&xml).unwrap_err();
        assert_eq!(err.kind, pmml_common::ModelErrorKind::SchemaValidation);
    }

    #[test]
    fn rejects_apply_with_too_many_arguments() {
        let xml = SIMPLE_TREE.replace(
            "<MiningSchema>",
            r#"<LocalTransformations>
                <DerivedField name="bad" optype="continuous" dataType="double">
                    <Apply function="sqrt">
                        <FieldRef field="age"/>
                        <FieldRef field="age"/>
                    </Apply>
                </DerivedField>
            </LocalTransformations>
            <MiningSchema>"#,
        );
        let err = parse_model_document(&xml).unwrap_err();
        assert_eq!(err.kind, pmml_common::ModelErrorKind::SchemaValidation);
    }
}
