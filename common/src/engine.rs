use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
};

use tracing::debug;

use crate::config::{ComputedFieldSpec, FilterOp, FilterSpec, PipelineConfig, TransformStep};
use crate::dataset::{Dataset, Scalar};
use crate::error::TransformError;
use crate::expr;

/* =========================
   Operadores sobre columnas
   ========================= */

/// column_mapping: renombra columnas {viejo -> nuevo}.
/// Todas las columnas viejas deben existir.
pub fn op_column_mapping(
    input: Dataset,
    renames: &[(String, String)],
) -> Result<Dataset, TransformError> {
    let missing: Vec<&str> = renames
        .iter()
        .map(|(old, _)| old.as_str())
        .filter(|old| !input.has_column(old))
        .collect();
    if !missing.is_empty() {
        return Err(TransformError::missing_columns(
            "column_mapping references columns not in data",
            missing,
        ));
    }

    let lookup: HashMap<&str, &str> = renames
        .iter()
        .map(|(old, new)| (old.as_str(), new.as_str()))
        .collect();

    let (columns, rows) = input.into_parts();
    let columns: Vec<String> = columns
        .into_iter()
        .map(|c| match lookup.get(c.as_str()) {
            Some(new) => new.to_string(),
            None => c,
        })
        .collect();

    ensure_unique("column_mapping", &columns)?;
    Ok(Dataset::from_parts(columns, rows))
}

/// column_selection: deja sólo las columnas listadas, en ese orden.
pub fn op_column_selection(input: Dataset, selected: &[String]) -> Result<Dataset, TransformError> {
    let missing: Vec<&str> = selected
        .iter()
        .map(String::as_str)
        .filter(|c| !input.has_column(c))
        .collect();
    if !missing.is_empty() {
        return Err(TransformError::missing_columns(
            "column_selection references missing columns",
            missing,
        ));
    }
    ensure_unique("column_selection", selected)?;

    let indices: Vec<usize> = selected
        .iter()
        .filter_map(|c| input.column_index(c))
        .collect();

    let (_, rows) = input.into_parts();
    let rows = rows
        .into_iter()
        .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
        .collect();

    Ok(Dataset::from_parts(selected.to_vec(), rows))
}

/// drop_columns: elimina las columnas listadas; las que no existen se ignoran.
pub fn op_drop_columns(input: Dataset, dropped: &[String]) -> Dataset {
    let dropped: HashSet<&str> = dropped.iter().map(String::as_str).collect();
    let (columns, rows) = input.into_parts();

    let keep: Vec<bool> = columns.iter().map(|c| !dropped.contains(c.as_str())).collect();
    if keep.iter().all(|k| *k) {
        return Dataset::from_parts(columns, rows);
    }

    let columns = columns
        .into_iter()
        .zip(&keep)
        .filter_map(|(c, k)| k.then_some(c))
        .collect();
    let rows = rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .zip(&keep)
                .filter_map(|(v, k)| k.then_some(v))
                .collect()
        })
        .collect();

    Dataset::from_parts(columns, rows)
}

fn ensure_unique(step: &'static str, columns: &[String]) -> Result<(), TransformError> {
    let mut seen = HashSet::new();
    for c in columns {
        if !seen.insert(c.as_str()) {
            return Err(TransformError::DuplicateColumn {
                step,
                column: c.clone(),
            });
        }
    }
    Ok(())
}

/* =========================
   Filtros de filas
   ========================= */

/// filter: deja pasar las filas que cumplen el filtro, en su orden original.
/// Las posiciones de las filas quedan contiguas desde 0.
pub fn op_filter(input: Dataset, spec: &FilterSpec) -> Result<Dataset, TransformError> {
    let Some(idx) = input.column_index(&spec.column) else {
        return Err(TransformError::missing_columns(
            "Filter references missing column",
            [spec.column.as_str()],
        ));
    };

    let (columns, rows) = input.into_parts();
    let mut out = Vec::with_capacity(rows.len());
    for row in rows.into_iter() {
        if row_matches(&row[idx], spec)? {
            out.push(row);
        }
    }

    Ok(Dataset::from_parts(columns, out))
}

fn row_matches(cell: &Scalar, spec: &FilterSpec) -> Result<bool, TransformError> {
    if cell.is_null() || spec.value.is_null() {
        return Ok(false);
    }

    match spec.operator {
        FilterOp::Eq => Ok(scalar_eq(cell, &spec.value)),
        FilterOp::Contains => Ok(cell.to_string().contains(&spec.value.to_string())),
        FilterOp::Gt => Ok(compare(cell, spec)? == Ordering::Greater),
        FilterOp::Lt => Ok(compare(cell, spec)? == Ordering::Less),
    }
}

fn scalar_eq(a: &Scalar, b: &Scalar) -> bool {
    match (a, b) {
        (Scalar::Int(x), Scalar::Int(y)) => x == y,
        (Scalar::Str(x), Scalar::Str(y)) => x == y,
        (Scalar::Bool(x), Scalar::Bool(y)) => x == y,
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

fn compare(cell: &Scalar, spec: &FilterSpec) -> Result<Ordering, TransformError> {
    let ord = match (cell, &spec.value) {
        (Scalar::Int(x), Scalar::Int(y)) => Some(x.cmp(y)),
        (Scalar::Str(x), Scalar::Str(y)) => Some(x.cmp(y)),
        (a, b) => match (a.as_f64(), b.as_f64()) {
            // NaN no es ni mayor ni menor
            (Some(x), Some(y)) => Some(x.partial_cmp(&y).unwrap_or(Ordering::Equal)),
            _ => None,
        },
    };

    ord.ok_or_else(|| TransformError::TypeMismatch {
        column: spec.column.clone(),
        operator: spec.operator.as_str(),
        left: cell.type_name(),
        right: spec.value.type_name(),
    })
}

/* =========================
   Campos calculados
   ========================= */

/// computed_fields: agrega columnas en orden de declaración.
/// Cada campo ve las columnas existentes en ese momento, incluidas las
/// calculadas antes que él.
pub fn op_computed_fields(
    input: Dataset,
    fields: &[ComputedFieldSpec],
) -> Result<Dataset, TransformError> {
    let mut current = input;

    for field in fields {
        let missing: Vec<&str> = field
            .expression
            .column_refs()
            .filter(|c| !current.has_column(c))
            .collect();
        if !missing.is_empty() {
            return Err(TransformError::missing_columns(
                &format!("Computed field '{}' references missing column(s)", field.name),
                missing,
            ));
        }
        if !field.expression.is_supported() {
            return Err(TransformError::InvalidExpression(format!(
                "Unsupported function: '{}'",
                field.expression.name
            )));
        }

        // un valor nuevo por fila, a partir de la vista inmutable de la fila
        let values = current
            .rows()
            .map(|row| expr::evaluate(&field.expression, &row))
            .collect::<Result<Vec<Scalar>, _>>()?;

        let target = current.column_index(&field.name);
        let (mut columns, mut rows) = current.into_parts();
        match target {
            // mismo nombre que una columna existente: se reemplaza en su lugar
            Some(idx) => {
                for (row, v) in rows.iter_mut().zip(values) {
                    row[idx] = v;
                }
            }
            None => {
                columns.push(field.name.clone());
                for (row, v) in rows.iter_mut().zip(values) {
                    row.push(v);
                }
            }
        }
        current = Dataset::from_parts(columns, rows);
    }

    Ok(current)
}

/* =========================
   Pipeline completo
   ========================= */

fn apply_step(input: Dataset, step: TransformStep<'_>) -> Result<Dataset, TransformError> {
    match step {
        TransformStep::ColumnMapping(renames) => op_column_mapping(input, renames),
        TransformStep::ColumnSelection(columns) => op_column_selection(input, columns),
        TransformStep::Filters(filters) => filters.iter().try_fold(input, op_filter),
        TransformStep::ComputedFields(fields) => op_computed_fields(input, fields),
        TransformStep::DropColumns(columns) => Ok(op_drop_columns(input, columns)),
    }
}

/// Aplica todos los pasos configurados en el orden fijo:
/// 1. column_mapping  2. column_selection  3. filters
/// 4. computed_fields  5. drop_columns
///
/// Si un paso falla, el dataset se descarta y no queda ningún estado parcial.
pub fn run_transforms(input: Dataset, config: &PipelineConfig) -> Result<Dataset, TransformError> {
    let mut current = input;

    for step in config.steps() {
        let rows_before = current.len();
        current = apply_step(current, step)?;
        debug!(
            step = step.name(),
            rows_before,
            rows_after = current.len(),
            columns = current.columns().len(),
            "paso aplicado"
        );
    }

    Ok(current)
}
