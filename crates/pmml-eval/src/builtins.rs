//! Built-in `Apply` functions (spec.md §4.4). Every function here receives
//! already-resolved, non-`Missing`/non-`Invalid` arguments except
//! `isMissing`/`isNotMissing`, the two "missing-allowed" primitives, whose
//! single argument may legitimately be `Missing` — see
//! [`pmml_document::BuiltinFn::is_missing_allowed`].
//!
//! `and`/`or`/`not` operate on plain booleans, not three-valued logic:
//! `Truth::Unknown` is produced only by predicate evaluation (`predicate_eval`)
//! and never stored in a `FieldValue`, so a `Missing` operand to a logical
//! builtin is caught by the generic Apply-level missing handling before it
//! ever reaches here.

use pmml_common::{Epoch, FieldValue};
use pmml_document::BuiltinFn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinInvalid;

type R = Result<FieldValue, BuiltinInvalid>;

fn num(v: &FieldValue) -> Result<f64, BuiltinInvalid> {
    v.as_f64().ok_or(BuiltinInvalid)
}

fn int(v: &FieldValue) -> Result<i64, BuiltinInvalid> {
    match v {
        FieldValue::Integer(i) | FieldValue::CyclicInt(i) => Ok(*i),
        _ => Err(BuiltinInvalid),
    }
}

fn boolean(v: &FieldValue) -> Result<bool, BuiltinInvalid> {
    match v {
        FieldValue::Boolean(b) => Ok(*b),
        _ => Err(BuiltinInvalid),
    }
}

fn str_of(v: &FieldValue) -> Result<&str, BuiltinInvalid> {
    v.as_str().ok_or(BuiltinInvalid)
}

/// `+ - * /` preserve integer type when both operands are integer, except
/// `/` which is integer division only in that case; any float operand
/// promotes the whole expression to `Double` (spec.md §4.4 "Integer-divide
/// is distinct from true-divide").
fn arith2(a: &FieldValue, b: &FieldValue, f_i: impl Fn(i64, i64) -> i64, f_f: impl Fn(f64, f64) -> f64) -> R {
    match (int(a), int(b)) {
        (Ok(x), Ok(y)) => Ok(FieldValue::Integer(f_i(x, y))),
        _ => Ok(FieldValue::Double(f_f(num(a)?, num(b)?))),
    }
}

pub fn call(f: BuiltinFn, args: &[FieldValue]) -> R {
    match f {
        BuiltinFn::Add => arith2(&args[0], &args[1], |x, y| x + y, |x, y| x + y),
        BuiltinFn::Subtract => arith2(&args[0], &args[1], |x, y| x - y, |x, y| x - y),
        BuiltinFn::Multiply => arith2(&args[0], &args[1], |x, y| x * y, |x, y| x * y),
        BuiltinFn::Divide => match (int(&args[0]), int(&args[1])) {
            (Ok(x), Ok(y)) if y != 0 => Ok(FieldValue::Integer(x.div_euclid(y))),
            _ => {
                let y = num(&args[1])?;
                if y == 0.0 {
                    return Err(BuiltinInvalid);
                }
                Ok(FieldValue::Double(num(&args[0])? / y))
            }
        },
        BuiltinFn::And => Ok(FieldValue::Boolean(boolean(&args[0])? && boolean(&args[1])?)),
        BuiltinFn::Or => Ok(FieldValue::Boolean(boolean(&args[0])? || boolean(&args[1])?)),
        BuiltinFn::Not => Ok(FieldValue::Boolean(!boolean(&args[0])?)),
        BuiltinFn::Equal => Ok(FieldValue::Boolean(args[0] == args[1])),
        BuiltinFn::NotEqual => Ok(FieldValue::Boolean(args[0] != args[1])),
        BuiltinFn::LessThan => Ok(FieldValue::Boolean(num(&args[0])? < num(&args[1])?)),
        BuiltinFn::LessOrEqual => Ok(FieldValue::Boolean(num(&args[0])? <= num(&args[1])?)),
        BuiltinFn::GreaterThan => Ok(FieldValue::Boolean(num(&args[0])? > num(&args[1])?)),
        BuiltinFn::GreaterOrEqual => Ok(FieldValue::Boolean(num(&args[0])? >= num(&args[1])?)),
        BuiltinFn::Log10 => finite(num(&args[0])?.log10()),
        BuiltinFn::Ln => finite(num(&args[0])?.ln()),
        BuiltinFn::Sqrt => finite(num(&args[0])?.sqrt()),
        BuiltinFn::Abs => Ok(FieldValue::Double(num(&args[0])?.abs())),
        BuiltinFn::Exp => finite(num(&args[0])?.exp()),
        BuiltinFn::Pow => finite(num(&args[0])?.powf(num(&args[1])?)),
        BuiltinFn::Threshold => Ok(FieldValue::Boolean(num(&args[0])? > num(&args[1])?)),
        BuiltinFn::Floor => Ok(FieldValue::Double(num(&args[0])?.floor())),
        BuiltinFn::Ceil => Ok(FieldValue::Double(num(&args[0])?.ceil())),
        BuiltinFn::Round => Ok(FieldValue::Double(num(&args[0])?.round())),
        BuiltinFn::IsMissing => Ok(FieldValue::Boolean(args[0].is_missing())),
        BuiltinFn::IsNotMissing => Ok(FieldValue::Boolean(!args[0].is_missing())),
        BuiltinFn::Min => reduce_numeric(args, f64::min),
        BuiltinFn::Max => reduce_numeric(args, f64::max),
        BuiltinFn::Sum => {
            let mut total = 0.0;
            for a in args {
                total += num(a)?;
            }
            Ok(FieldValue::Double(total))
        }
        BuiltinFn::Avg => {
            let mut total = 0.0;
            for a in args {
                total += num(a)?;
            }
            Ok(FieldValue::Double(total / args.len() as f64))
        }
        BuiltinFn::IsIn => Ok(FieldValue::Boolean(args[1..].iter().any(|a| a == &args[0]))),
        BuiltinFn::IsNotIn => Ok(FieldValue::Boolean(!args[1..].iter().any(|a| a == &args[0]))),
        BuiltinFn::Lowercase => Ok(FieldValue::String(str_of(&args[0])?.to_lowercase())),
        BuiltinFn::Uppercase => Ok(FieldValue::String(str_of(&args[0])?.to_uppercase())),
        BuiltinFn::Substring => substring(args),
        BuiltinFn::TrimBlanks => Ok(FieldValue::String(str_of(&args[0])?.trim().to_string())),
        BuiltinFn::FormatNumber => Ok(FieldValue::String(format_number(num(&args[0])?, str_of(&args[1])?))),
        BuiltinFn::FormatDatetime => Ok(FieldValue::String(format_datetime(&args[0], str_of(&args[1])?)?)),
        BuiltinFn::DateDaysSinceYear => date_days_since_year(&args[0], &args[1]),
        BuiltinFn::DateSecondsSinceYear => date_seconds_since_year(&args[0], &args[1]),
        BuiltinFn::DateSecondsSinceMidnight => date_seconds_since_midnight(&args[0]),
        BuiltinFn::If => {
            if boolean(&args[0])? {
                Ok(args[1].clone())
            } else {
                args.get(2).cloned().ok_or(BuiltinInvalid)
            }
        }
    }
}

fn finite(v: f64) -> R {
    if v.is_finite() {
        Ok(FieldValue::Double(v))
    } else {
        Err(BuiltinInvalid)
    }
}

fn reduce_numeric(args: &[FieldValue], f: impl Fn(f64, f64) -> f64) -> R {
    let mut it = args.iter();
    let first = num(it.next().ok_or(BuiltinInvalid)?)?;
    let mut acc = first;
    for a in it {
        acc = f(acc, num(a)?);
    }
    Ok(FieldValue::Double(acc))
}

/// 1-based start, PMML semantics (spec.md §4.4 "substring with 1-based start
/// and length").
fn substring(args: &[FieldValue]) -> R {
    let s = str_of(&args[0])?;
    let start = int(&args[1])?;
    let len = int(&args[2])?;
    if start < 1 || len < 0 {
        return Err(BuiltinInvalid);
    }
    let chars: Vec<char> = s.chars().collect();
    let start0 = (start - 1) as usize;
    if start0 > chars.len() {
        return Ok(FieldValue::String(String::new()));
    }
    let end = (start0 + len as usize).min(chars.len());
    Ok(FieldValue::String(chars[start0..end].iter().collect()))
}

/// A deliberately small subset of printf-style patterns (`%d`, `%.<N>f`):
/// enough for the common PMML `formatNumber` usages without a full C
/// formatter.
fn format_number(value: f64, pattern: &str) -> String {
    if pattern == "%d" {
        return format!("{}", value.round() as i64);
    }
    if let Some(rest) = pattern.strip_prefix("%.").and_then(|r| r.strip_suffix('f')) {
        if let Ok(precision) = rest.parse::<usize>() {
            return format!("{value:.precision$}");
        }
    }
    value.to_string()
}

fn format_datetime(value: &FieldValue, pattern: &str) -> Result<String, BuiltinInvalid> {
    let secs = match value {
        FieldValue::DateTime(s) => *s,
        FieldValue::Date(d) => d * 86_400,
        FieldValue::Time(t) => *t,
        _ => return Err(BuiltinInvalid),
    };
    let date = Epoch::Year0.date_from_days(secs.div_euclid(86_400)).ok_or(BuiltinInvalid)?;
    let time = chrono::NaiveTime::from_num_seconds_from_midnight_opt(secs.rem_euclid(86_400) as u32, 0)
        .ok_or(BuiltinInvalid)?;
    let dt = chrono::NaiveDateTime::new(date, time);
    Ok(dt.format(pattern).to_string())
}

fn date_days_since_year(value: &FieldValue, year: &FieldValue) -> R {
    let days = match value {
        FieldValue::Date(d) => *d,
        FieldValue::DateTime(s) => s.div_euclid(86_400),
        _ => return Err(BuiltinInvalid),
    };
    let y = int(year)?;
    let reference = chrono::NaiveDate::from_ymd_opt(y as i32, 1, 1).ok_or(BuiltinInvalid)?;
    let base = Epoch::Year0.days_since(reference).ok_or(BuiltinInvalid)?;
    Ok(FieldValue::Integer(days - base))
}

fn date_seconds_since_year(value: &FieldValue, year: &FieldValue) -> R {
    let secs = match value {
        FieldValue::DateTime(s) => *s,
        FieldValue::Date(d) => d * 86_400,
        _ => return Err(BuiltinInvalid),
    };
    let y = int(year)?;
    let reference = chrono::NaiveDate::from_ymd_opt(y as i32, 1, 1).ok_or(BuiltinInvalid)?;
    let base_days = Epoch::Year0.days_since(reference).ok_or(BuiltinInvalid)?;
    Ok(FieldValue::Integer(secs - base_days * 86_400))
}

fn date_seconds_since_midnight(value: &FieldValue) -> R {
    match value {
        FieldValue::Time(t) => Ok(FieldValue::Integer(t.rem_euclid(86_400))),
        FieldValue::DateTime(s) => Ok(FieldValue::Integer(s.rem_euclid(86_400))),
        _ => Err(BuiltinInvalid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_divide_truncates_toward_negative_infinity() {
        let r = call(BuiltinFn::Divide, &[FieldValue::Integer(7), FieldValue::Integer(2)]).unwrap();
        assert_eq!(r, FieldValue::Integer(3));
    }

    #[test]
    fn mixed_divide_is_true_division() {
        let r = call(BuiltinFn::Divide, &[FieldValue::Integer(7), FieldValue::Double(2.0)]).unwrap();
        assert_eq!(r, FieldValue::Double(3.5));
    }

    #[test]
    fn divide_by_zero_is_invalid() {
        assert!(call(BuiltinFn::Divide, &[FieldValue::Integer(1), FieldValue::Integer(0)]).is_err());
    }

    #[test]
    fn substring_is_one_based() {
        let r = call(
            BuiltinFn::Substring,
            &[FieldValue::String("hello".into()), FieldValue::Integer(2), FieldValue::Integer(3)],
        )
        .unwrap();
        assert_eq!(r, FieldValue::String("ell".into()));
    }

    #[test]
    fn string_equal_ignores_trailing_whitespace() {
        let r = call(
            BuiltinFn::Equal,
            &[FieldValue::String("foo ".into()), FieldValue::String("foo".into())],
        )
        .unwrap();
        assert_eq!(r, FieldValue::Boolean(true));
    }

    #[test]
    fn format_number_fixed_precision() {
        assert_eq!(format_number(3.14159, "%.2f"), "3.14");
    }
}
