use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::DataType;

/// A single scalar value flowing through a tuple sink or an intermediate result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Text(String),
    Bytea(Vec<u8>),
}

impl Datum {
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Datum::Null => None,
            Datum::Boolean(_) => Some(DataType::Boolean),
            Datum::Int32(_) => Some(DataType::Int32),
            Datum::Int64(_) => Some(DataType::Int64),
            Datum::Float64(_) => Some(DataType::Float64),
            Datum::Text(_) => Some(DataType::Text),
            Datum::Bytea(_) => Some(DataType::Bytea),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// Bytes this value occupies in the text copy format: the payload plus a
    /// one-byte delimiter.
    pub fn encoded_len(&self) -> usize {
        let payload = match self {
            Datum::Null => 2, // "\N"
            Datum::Boolean(_) => 1,
            Datum::Int32(v) => v.to_string().len(),
            Datum::Int64(v) => v.to_string().len(),
            Datum::Float64(v) => v.to_string().len(),
            Datum::Text(s) => s.len(),
            // "\x" prefix + two hex chars per byte
            Datum::Bytea(b) => 2 + b.len() * 2,
        };
        payload + 1
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "NULL"),
            Datum::Boolean(b) => write!(f, "{}", if *b { "t" } else { "f" }),
            Datum::Int32(v) => write!(f, "{v}"),
            Datum::Int64(v) => write!(f, "{v}"),
            Datum::Float64(v) => write!(f, "{v}"),
            Datum::Text(s) => write!(f, "{s}"),
            Datum::Bytea(b) => {
                write!(f, "\\x")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OwnedRow {
    pub values: Vec<Datum>,
}

impl OwnedRow {
    pub fn new(values: Vec<Datum>) -> Self {
        Self { values }
    }

    pub fn get(&self, idx: usize) -> Option<&Datum> {
        self.values.get(idx)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Approximate wire size of this row, used to enforce the intermediate
    /// result size limit.
    pub fn encoded_len(&self) -> usize {
        // Trailing newline replaces the last delimiter; keep the byte anyway.
        self.values.iter().map(Datum::encoded_len).sum::<usize>().max(1)
    }
}

impl fmt::Display for OwnedRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, ")")
    }
}

/// Bound parameters of the statement being executed.
///
/// Local tasks are re-parsed from their query text, so the parser needs the
/// parameter types up front; a NULL value carries no type and is left for the
/// parser to infer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamList {
    values: Vec<Datum>,
}

impl ParamList {
    pub fn new(values: Vec<Datum>) -> Self {
        Self { values }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Datum] {
        &self.values
    }

    /// One entry per parameter, `None` where the bound value is NULL.
    pub fn param_types(&self) -> Vec<Option<DataType>> {
        self.values.iter().map(Datum::data_type).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_types_skip_nulls() {
        let params = ParamList::new(vec![
            Datum::Int64(7),
            Datum::Null,
            Datum::Text("x".into()),
        ]);
        assert_eq!(
            params.param_types(),
            vec![Some(DataType::Int64), None, Some(DataType::Text)]
        );
    }

    #[test]
    fn test_empty_param_list_has_no_types() {
        assert!(ParamList::empty().param_types().is_empty());
    }

    #[test]
    fn test_row_encoded_len() {
        let row = OwnedRow::new(vec![Datum::Int32(123), Datum::Text("abcd".into())]);
        // "123" + delim, "abcd" + delim
        assert_eq!(row.encoded_len(), 4 + 5);
        let bytes = OwnedRow::new(vec![Datum::Bytea(vec![0xde, 0xad])]);
        assert_eq!(bytes.encoded_len(), 2 + 4 + 1);
    }

    #[test]
    fn test_row_display() {
        let row = OwnedRow::new(vec![Datum::Boolean(true), Datum::Null, Datum::Bytea(vec![1])]);
        assert_eq!(row.to_string(), "(t, NULL, \\x01)");
    }
}
