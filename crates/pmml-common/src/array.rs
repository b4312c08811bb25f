//! Whitespace-separated `Array`/`Matrix` text per spec.md §6: "Arrays carry a
//! `type` ∈ {int, real, string} and an optional `n`; their whitespace-
//! separated text is parsed accordingly." `format`/`parse` round-trip modulo
//! whitespace (spec.md §8).

use crate::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayType {
    Int,
    Real,
    String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    Int(Vec<i64>),
    Real(Vec<f64>),
    /// Double-quoted tokens are unescaped (`\"` → `"`, `\\` → `\`); bare
    /// tokens are taken verbatim.
    String(Vec<String>),
}

impl ArrayValue {
    pub fn len(&self) -> usize {
        match self {
            ArrayValue::Int(v) => v.len(),
            ArrayValue::Real(v) => v.len(),
            ArrayValue::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Splits on whitespace, honoring double-quoted tokens that may themselves
/// contain escaped whitespace or quotes (PMML's `Array` text grammar for
/// `type="string"`).
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            let mut tok = String::new();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(&next) = chars.peek() {
                            tok.push(next);
                            chars.next();
                        }
                    }
                    '"' => break,
                    other => tok.push(other),
                }
            }
            tokens.push(tok);
        } else {
            let mut tok = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                tok.push(c);
                chars.next();
            }
            tokens.push(tok);
        }
    }
    tokens
}

fn quote_string_token(s: &str) -> String {
    if s.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\') {
        let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    } else {
        s.to_string()
    }
}

pub fn parse(ty: ArrayType, n: Option<usize>, text: &str) -> Result<ArrayValue, ModelError> {
    let tokens = tokenize(text);
    if let Some(n) = n {
        if tokens.len() != n {
            return Err(ModelError::schema(format!(
                "Array declares n={n} but contains {} tokens",
                tokens.len()
            )));
        }
    }
    match ty {
        ArrayType::Int => tokens
            .iter()
            .map(|t| {
                t.parse::<i64>()
                    .map_err(|_| ModelError::schema(format!("'{t}' is not a valid int")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(ArrayValue::Int),
        ArrayType::Real => tokens
            .iter()
            .map(|t| {
                t.parse::<f64>()
                    .map_err(|_| ModelError::schema(format!("'{t}' is not a valid real")))
                    .and_then(|v| {
                        if v.is_finite() {
                            Ok(v)
                        } else {
                            Err(ModelError::schema(format!("'{t}' is not finite")))
                        }
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(ArrayValue::Real),
        ArrayType::String => Ok(ArrayValue::String(tokens)),
    }
}

pub fn format(value: &ArrayValue) -> String {
    match value {
        ArrayValue::Int(v) => v
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(" "),
        ArrayValue::Real(v) => v
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>()
            .join(" "),
        ArrayValue::String(v) => v
            .iter()
            .map(|s| quote_string_token(s))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// `Matrix` shapes from spec.md §6. `diagonal` stores only the diagonal,
/// `symmetric` the lower (or upper) triangle, `any` the full rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixKind {
    Diagonal,
    Symmetric,
    Any,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    pub kind: MatrixKind,
    pub n_rows: usize,
    pub n_cols: usize,
    /// Dense values as stored in the document (before triangle expansion).
    pub rows: Vec<Vec<f64>>,
}

impl Matrix {
    /// Resolves `(row, col)` regardless of `kind`, expanding diagonal and
    /// symmetric storage into the full rectangle on demand.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        match self.kind {
            MatrixKind::Any => self.rows[row][col],
            MatrixKind::Diagonal => {
                if row == col {
                    self.rows[row][0]
                } else {
                    0.0
                }
            }
            MatrixKind::Symmetric => {
                let (r, c) = if row <= col { (col, row) } else { (row, col) };
                self.rows[r][c]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_array_round_trips() {
        let v = parse(ArrayType::Int, Some(3), "1 2 3").unwrap();
        assert_eq!(format(&v), "1 2 3");
    }

    #[test]
    fn real_array_round_trips_modulo_whitespace() {
        let v = parse(ArrayType::Real, None, "1.5   2.25\t3.0").unwrap();
        assert_eq!(v, ArrayValue::Real(vec![1.5, 2.25, 3.0]));
    }

    #[test]
    fn quoted_string_tokens_with_embedded_space() {
        let v = parse(ArrayType::String, None, r#""hello world" plain"#).unwrap();
        assert_eq!(
            v,
            ArrayValue::String(vec!["hello world".to_string(), "plain".to_string()])
        );
        assert_eq!(format(&v), r#""hello world" plain"#);
    }

    #[test]
    fn n_mismatch_is_a_schema_error() {
        assert!(parse(ArrayType::Int, Some(5), "1 2 3").is_err());
    }

    #[test]
    fn nan_and_inf_reals_are_rejected() {
        assert!(parse(ArrayType::Real, None, "NaN").is_err());
        assert!(parse(ArrayType::Real, None, "inf").is_err());
    }

    #[test]
    fn symmetric_matrix_mirrors_across_diagonal() {
        let m = Matrix {
            kind: MatrixKind::Symmetric,
            n_rows: 2,
            n_cols: 2,
            rows: vec![vec![1.0], vec![2.0, 3.0]],
        };
        assert_eq!(m.get(0, 1), m.get(1, 0));
        assert_eq!(m.get(1, 1), 3.0);
    }
}
