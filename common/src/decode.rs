use std::{collections::HashSet, io::Cursor, path::Path};

use calamine::{open_workbook_auto_from_rs, Data, Reader};

use crate::dataset::{Dataset, DatasetError, Scalar};
use crate::error::{DecodeError, PreconditionError};

/// Formatos tabulares aceptados como entrada.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv,
    Xlsx,
    Xls,
}

pub const SUPPORTED_EXTENSIONS: &[&str] = &[".csv", ".xls", ".xlsx"];

impl InputFormat {
    /// Deduce el formato por la extensión del nombre de archivo (sin distinguir mayúsculas).
    pub fn from_file_name(name: &str) -> Result<Self, PreconditionError> {
        let ext = Path::new(name)
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| format!(".{}", s.to_ascii_lowercase()))
            .unwrap_or_default();

        match ext.as_str() {
            ".csv" => Ok(InputFormat::Csv),
            ".xlsx" => Ok(InputFormat::Xlsx),
            ".xls" => Ok(InputFormat::Xls),
            _ => Err(PreconditionError::UnsupportedFileType { extension: ext }),
        }
    }
}

/// Decodifica el contenido de un archivo a un Dataset.
pub fn decode(format: InputFormat, bytes: &[u8]) -> Result<Dataset, DecodeError> {
    match format {
        InputFormat::Csv => decode_csv(bytes),
        InputFormat::Xlsx | InputFormat::Xls => decode_excel(bytes),
    }
}

/* =========================
   CSV
   ========================= */

pub fn decode_csv(bytes: &[u8]) -> Result<Dataset, DecodeError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        // Limpia BOM por si viene de Excel/Windows
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(DecodeError::EmptyInput);
    }

    let width = headers.len();
    let mut raw_rows: Vec<Vec<String>> = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() > width {
            return Err(DatasetError::RowWidth {
                row: idx,
                expected: width,
                found: record.len(),
            }
            .into());
        }
        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        // filas cortas se completan con vacío
        row.resize(width, String::new());
        raw_rows.push(row);
    }

    let columns_out: Vec<Vec<Scalar>> = (0..width)
        .map(|c| {
            let raws: Vec<&str> = raw_rows.iter().map(|r| r[c].as_str()).collect();
            infer_column(&raws)
        })
        .collect();

    let rows = (0..raw_rows.len())
        .map(|r| columns_out.iter().map(|col| col[r].clone()).collect())
        .collect();

    Ok(Dataset::new(dedupe_headers(headers), rows)?)
}

#[derive(Clone, Copy)]
enum ColumnKind {
    Int,
    Float,
    Bool,
    Text,
}

/// Inferencia por columna a partir de lo que trae el CSV:
/// enteros, luego floats, luego booleanos; si no, texto. Vacío = null.
fn infer_column(raws: &[&str]) -> Vec<Scalar> {
    let filled: Vec<&str> = raws
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    let kind = if filled.is_empty() {
        ColumnKind::Text
    } else if filled.iter().all(|s| s.parse::<i64>().is_ok()) {
        ColumnKind::Int
    } else if filled.iter().all(|s| s.parse::<f64>().is_ok()) {
        ColumnKind::Float
    } else if filled.iter().all(|s| parse_bool(s).is_some()) {
        ColumnKind::Bool
    } else {
        ColumnKind::Text
    };

    raws.iter()
        .map(|raw| {
            let t = raw.trim();
            if t.is_empty() {
                return Scalar::Null;
            }
            match kind {
                ColumnKind::Int => t.parse().map(Scalar::Int).unwrap_or(Scalar::Null),
                ColumnKind::Float => t.parse().map(Scalar::Float).unwrap_or(Scalar::Null),
                ColumnKind::Bool => parse_bool(t).map(Scalar::Bool).unwrap_or(Scalar::Null),
                ColumnKind::Text => Scalar::Str(raw.to_string()),
            }
        })
        .collect()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "true" | "True" | "TRUE" => Some(true),
        "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

/// Encabezados repetidos reciben sufijo: a, a.1, a.2 ...
fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    headers
        .into_iter()
        .map(|h| {
            let mut candidate = h.clone();
            let mut n = 0;
            while seen.contains(&candidate) {
                n += 1;
                candidate = format!("{h}.{n}");
            }
            seen.insert(candidate.clone());
            candidate
        })
        .collect()
}

/* =========================
   Excel (.xlsx / .xls)
   ========================= */

/// Lee la primera hoja; la primera fila son los encabezados.
pub fn decode_excel(bytes: &[u8]) -> Result<Dataset, DecodeError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let range = workbook.worksheet_range_at(0).ok_or(DecodeError::NoSheet)??;

    let mut rows_iter = range.rows();
    let Some(header_row) = rows_iter.next() else {
        return Err(DecodeError::EmptyInput);
    };

    let headers: Vec<String> = header_row
        .iter()
        .enumerate()
        .map(|(i, cell)| match cell {
            Data::Empty => format!("Unnamed: {i}"),
            other => other.to_string(),
        })
        .collect();

    let rows = rows_iter
        .map(|r| r.iter().map(excel_cell).collect())
        .collect();

    Ok(Dataset::new(dedupe_headers(headers), rows)?)
}

fn excel_cell(cell: &Data) -> Scalar {
    match cell {
        Data::Empty | Data::Error(_) => Scalar::Null,
        Data::Int(i) => Scalar::Int(*i),
        // Excel guarda todo número como float; los enteros vuelven a ser Int
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Scalar::Int(*f as i64),
        Data::Float(f) => Scalar::Float(*f),
        Data::Bool(b) => Scalar::Bool(*b),
        Data::String(s) => Scalar::Str(s.clone()),
        other => Scalar::Str(other.to_string()),
    }
}
