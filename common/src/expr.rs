use std::fmt;

use crate::dataset::{RowView, Scalar};
use crate::error::TransformError;

/// Funciones disponibles para campos calculados.
pub const SUPPORTED_FUNCTIONS: &[&str] = &["add", "concat"];

/// Argumento de una llamada: literal entre comillas simples o referencia a columna.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Literal(String),
    ColumnRef(String),
}

/// `name(arg, arg, ...)` de un solo nivel (sin llamadas anidadas).
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<Arg>,
}

impl FunctionCall {
    /// Columnas referenciadas por la expresión, en orden de aparición.
    pub fn column_refs(&self) -> impl Iterator<Item = &str> + '_ {
        self.args.iter().filter_map(|a| match a {
            Arg::ColumnRef(c) => Some(c.as_str()),
            Arg::Literal(_) => None,
        })
    }

    pub fn is_supported(&self) -> bool {
        SUPPORTED_FUNCTIONS.contains(&self.name.as_str())
    }
}

impl fmt::Display for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match arg {
                Arg::Literal(s) => write!(f, "'{}'", s)?,
                Arg::ColumnRef(c) => f.write_str(c)?,
            }
        }
        f.write_str(")")
    }
}

/* =========================
   Parser
   ========================= */

fn invalid(text: &str) -> TransformError {
    TransformError::InvalidExpression(format!("Cannot parse expression: '{text}'"))
}

/// Parsea `name(args)`. El texto completo (sin espacios en los bordes) debe
/// calzar con la gramática; las comas dentro de comillas no separan argumentos.
pub fn parse(text: &str) -> Result<FunctionCall, TransformError> {
    let trimmed = text.trim();

    let open = trimmed.find('(').ok_or_else(|| invalid(text))?;
    let name = &trimmed[..open];
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(invalid(text));
    }

    // lo que sigue al '(' debe terminar en ')' y tener al menos un carácter dentro
    let rest = &trimmed[open + 1..];
    let inner = rest.strip_suffix(')').ok_or_else(|| invalid(text))?;
    if inner.is_empty() {
        return Err(invalid(text));
    }

    let args = split_args(inner)
        .ok_or_else(|| invalid(text))?
        .into_iter()
        .map(|raw| {
            if raw.is_empty() {
                Err(TransformError::InvalidExpression(format!(
                    "Empty argument in expression: '{text}'"
                )))
            } else {
                Ok(classify_arg(raw))
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FunctionCall {
        name: name.to_string(),
        args,
    })
}

/// Separa por comas respetando los literales entre comillas simples.
/// Devuelve None si queda una comilla sin cerrar.
fn split_args(raw: &str) -> Option<Vec<&str>> {
    let mut out = Vec::new();
    let mut in_quote = false;
    let mut start = 0;

    for (idx, ch) in raw.char_indices() {
        match ch {
            '\'' => in_quote = !in_quote,
            ',' if !in_quote => {
                out.push(raw[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }

    if in_quote {
        return None;
    }
    out.push(raw[start..].trim());
    Some(out)
}

fn classify_arg(raw: &str) -> Arg {
    match raw
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
    {
        Some(lit) if raw.len() >= 2 => Arg::Literal(lit.to_string()),
        _ => Arg::ColumnRef(raw.to_string()),
    }
}

/* =========================
   Evaluación
   ========================= */

fn resolve(arg: &Arg, row: &RowView<'_>) -> Result<Scalar, TransformError> {
    match arg {
        Arg::Literal(s) => Ok(Scalar::Str(s.clone())),
        Arg::ColumnRef(c) => row
            .get(c)
            .cloned()
            .ok_or_else(|| TransformError::missing_columns("Expression references missing column", [c.as_str()])),
    }
}

/// Evalúa la llamada sobre una fila.
pub fn evaluate(call: &FunctionCall, row: &RowView<'_>) -> Result<Scalar, TransformError> {
    let values = call
        .args
        .iter()
        .map(|a| resolve(a, row))
        .collect::<Result<Vec<_>, _>>()?;

    match call.name.as_str() {
        "concat" => Ok(Scalar::Str(
            values.iter().map(ToString::to_string).collect::<String>(),
        )),
        "add" => add(call, &values),
        other => Err(TransformError::InvalidExpression(format!(
            "Unsupported function: '{other}'"
        ))),
    }
}

/// Suma numérica estricta: no convierte strings ni booleanos.
fn add(call: &FunctionCall, values: &[Scalar]) -> Result<Scalar, TransformError> {
    let [left, right] = values else {
        return Err(TransformError::InvalidExpression(format!(
            "add() takes exactly 2 arguments, got {} in '{call}'",
            values.len()
        )));
    };

    match (left, right) {
        (Scalar::Null, _) | (_, Scalar::Null) => Ok(Scalar::Null),
        (Scalar::Int(a), Scalar::Int(b)) => a.checked_add(*b).map(Scalar::Int).ok_or_else(|| {
            TransformError::InvalidExpression(format!("Integer overflow in '{call}'"))
        }),
        (l, r) => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => Ok(Scalar::Float(a + b)),
            _ => {
                let bad = if l.as_f64().is_none() { l } else { r };
                Err(TransformError::InvalidExpression(format!(
                    "add() requires numeric arguments, got {} {:?} in '{call}'",
                    bad.type_name(),
                    bad.to_string()
                )))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;

    fn one_row(cols: &[&str], cells: Vec<Scalar>) -> Dataset {
        Dataset::new(cols.iter().map(|c| c.to_string()).collect(), vec![cells]).unwrap()
    }

    #[test]
    fn parse_respeta_comas_dentro_de_literales() {
        let call = parse("concat('Hello, ', name)").unwrap();
        assert_eq!(call.name, "concat");
        assert_eq!(
            call.args,
            vec![
                Arg::Literal("Hello, ".into()),
                Arg::ColumnRef("name".into())
            ]
        );
    }

    #[test]
    fn parse_rechaza_textos_fuera_de_gramatica() {
        for bad in ["", "concat", "concat()", "(a)", "con cat(a)", "concat(a", "concat('a, b)", "concat(a,,b)"] {
            let err = parse(bad).unwrap_err();
            assert!(
                matches!(err, TransformError::InvalidExpression(_)),
                "debería fallar: {bad}"
            );
        }
    }

    #[test]
    fn parse_acepta_espacios_en_los_bordes() {
        let call = parse("  add( a , b )  ").unwrap();
        assert_eq!(call.args, vec![Arg::ColumnRef("a".into()), Arg::ColumnRef("b".into())]);
        assert_eq!(call.to_string(), "add(a, b)");
    }

    #[test]
    fn concat_une_literales_y_columnas() {
        let ds = one_row(&["name"], vec!["Alice".into()]);
        let call = parse("concat('Hello, ', name)").unwrap();
        let out = evaluate(&call, &ds.row(0).unwrap()).unwrap();
        assert_eq!(out, Scalar::Str("Hello, Alice".into()));
    }

    #[test]
    fn add_suma_numeros_y_no_concatena() {
        let ds = one_row(&["a", "b"], vec![Scalar::Int(2), Scalar::Int(3)]);
        let call = parse("add(a, b)").unwrap();
        assert_eq!(evaluate(&call, &ds.row(0).unwrap()).unwrap(), Scalar::Int(5));
    }

    #[test]
    fn add_mezcla_int_y_float() {
        let ds = one_row(&["a", "b"], vec![Scalar::Int(2), Scalar::Float(0.5)]);
        let call = parse("add(a, b)").unwrap();
        assert_eq!(evaluate(&call, &ds.row(0).unwrap()).unwrap(), Scalar::Float(2.5));
    }

    #[test]
    fn add_rechaza_strings_en_vez_de_coercionar() {
        let ds = one_row(&["a", "b"], vec!["2".into(), Scalar::Int(3)]);
        let call = parse("add(a, b)").unwrap();
        let err = evaluate(&call, &ds.row(0).unwrap()).unwrap_err();
        assert!(matches!(err, TransformError::InvalidExpression(_)));

        let lit = parse("add('1', b)").unwrap();
        assert!(evaluate(&lit, &ds.row(0).unwrap()).is_err());
    }

    #[test]
    fn add_exige_dos_argumentos() {
        let ds = one_row(&["a"], vec![Scalar::Int(1)]);
        let call = parse("add(a)").unwrap();
        assert!(matches!(
            evaluate(&call, &ds.row(0).unwrap()),
            Err(TransformError::InvalidExpression(_))
        ));
    }

    #[test]
    fn add_detecta_overflow() {
        let ds = one_row(&["a", "b"], vec![Scalar::Int(i64::MAX), Scalar::Int(1)]);
        let call = parse("add(a, b)").unwrap();
        assert!(evaluate(&call, &ds.row(0).unwrap()).is_err());
    }

    #[test]
    fn columna_inexistente_es_column_mismatch() {
        let ds = one_row(&["a"], vec![Scalar::Int(1)]);
        let call = parse("concat(a, nope)").unwrap();
        let err = evaluate(&call, &ds.row(0).unwrap()).unwrap_err();
        assert!(matches!(err, TransformError::ColumnMismatch(ref m) if m.contains("nope")));
    }

    #[test]
    fn funcion_desconocida_es_invalid_expression() {
        let ds = one_row(&["a"], vec![Scalar::Int(1)]);
        let call = parse("upper(a)").unwrap();
        assert!(!call.is_supported());
        assert!(matches!(
            evaluate(&call, &ds.row(0).unwrap()),
            Err(TransformError::InvalidExpression(_))
        ));
    }
}
