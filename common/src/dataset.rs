use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::{collections::HashSet, fmt};
use thiserror::Error;

/* =========================
   Valores escalares
   ========================= */

/// Valor de una celda. Se serializa como el valor JSON natural
/// (null, bool, número o string).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    /// Convierte un valor JSON en escalar. Arrays y objetos no son escalares.
    pub fn from_json(value: &Value) -> Option<Scalar> {
        match value {
            Value::Null => Some(Scalar::Null),
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Scalar::Int(i)),
                None => n.as_f64().map(Scalar::Float),
            },
            Value::String(s) => Some(Scalar::Str(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Int(i) => Value::Number((*i).into()),
            // NaN / infinito no existen en JSON
            Scalar::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            Scalar::Str(s) => Value::String(s.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Valor numérico si la celda es Int o Float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::Null => "null",
            Scalar::Bool(_) => "bool",
            Scalar::Int(_) => "int",
            Scalar::Float(_) => "float",
            Scalar::Str(_) => "string",
        }
    }
}

/// Forma textual de la celda: la que usan `concat`, `contains` y la salida CSV.
/// Null se escribe como cadena vacía; un float entero conserva el ".0".
impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => Ok(()),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) if x.is_finite() && x.fract() == 0.0 => {
                write!(f, "{:.1}", x)
            }
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Str(s.to_string())
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Int(i)
    }
}

impl From<f64> for Scalar {
    fn from(f: f64) -> Self {
        Scalar::Float(f)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

/* =========================
   Dataset tabular en memoria
   ========================= */

#[derive(Debug, Error, PartialEq)]
pub enum DatasetError {
    #[error("duplicate column: '{0}'")]
    DuplicateColumn(String),

    #[error("row {row} has {found} cells, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// Filas ordenadas sobre columnas con nombre único.
/// Invariante: cada fila tiene exactamente `columns.len()` celdas,
/// alineadas por posición con `columns`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Scalar>>,
}

impl Dataset {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Scalar>>) -> Result<Self, DatasetError> {
        let mut seen = HashSet::new();
        for c in &columns {
            if !seen.insert(c.as_str()) {
                return Err(DatasetError::DuplicateColumn(c.clone()));
            }
        }

        for (idx, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(DatasetError::RowWidth {
                    row: idx,
                    expected: columns.len(),
                    found: row.len(),
                });
            }
        }

        Ok(Self { columns, rows })
    }

    /// Construcción interna cuando el llamador ya garantiza el invariante.
    pub(crate) fn from_parts(columns: Vec<String>, rows: Vec<Vec<Scalar>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == columns.len()));
        Self { columns, rows }
    }

    pub(crate) fn into_parts(self) -> (Vec<String>, Vec<Vec<Scalar>>) {
        (self.columns, self.rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn row(&self, idx: usize) -> Option<RowView<'_>> {
        self.rows.get(idx).map(|cells| RowView {
            columns: &self.columns,
            cells,
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = RowView<'_>> + '_ {
        self.rows.iter().map(move |cells| RowView {
            columns: &self.columns,
            cells,
        })
    }

    /// Todos los valores de una columna, en orden de filas.
    pub fn column_values(&self, name: &str) -> Option<Vec<&Scalar>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }
}

/// Vista inmutable de una fila: nombre de columna -> valor.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    columns: &'a [String],
    cells: &'a [Scalar],
}

impl<'a> RowView<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Scalar> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.cells[idx])
    }

    pub fn cells(&self) -> &'a [Scalar] {
        self.cells
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a Scalar)> + 'a {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.cells.iter())
    }

    /// Snapshot de la fila como objeto JSON, con las claves en orden de columnas.
    pub fn to_json_map(&self) -> Map<String, Value> {
        self.iter()
            .map(|(k, v)| (k.to_string(), v.to_json()))
            .collect()
    }
}
