//! Configuración de pipeline: validación estructural y parseo a pasos tipados.
//!
//! El JSON se recorre una sola vez; de ese recorrido salen tanto los errores
//! por campo (para rechazar la creación del pipeline) como los pasos tipados
//! que consume el motor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dataset::Scalar;
use crate::error::TransformError;
use crate::expr::{self, FunctionCall, SUPPORTED_FUNCTIONS};

pub const SUPPORTED_FILTER_OPERATORS: &[&str] = &["contains", "eq", "gt", "lt"];

/// Error de validación asociado a un campo de la configuración.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gt,
    Lt,
    Contains,
}

impl FilterOp {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "eq" => Some(FilterOp::Eq),
            "gt" => Some(FilterOp::Gt),
            "lt" => Some(FilterOp::Lt),
            "contains" => Some(FilterOp::Contains),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Gt => "gt",
            FilterOp::Lt => "lt",
            FilterOp::Contains => "contains",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    pub column: String,
    pub operator: FilterOp,
    pub value: Scalar,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputedFieldSpec {
    pub name: String,
    pub expression: FunctionCall,
}

/// Configuración tipada. Cada tipo de paso aparece a lo sumo una vez.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineConfig {
    /// Pares (viejo, nuevo) en el orden del documento.
    pub column_mapping: Option<Vec<(String, String)>>,
    pub column_selection: Option<Vec<String>>,
    pub filters: Option<Vec<FilterSpec>>,
    pub computed_fields: Option<Vec<ComputedFieldSpec>>,
    pub drop_columns: Option<Vec<String>>,
}

/// Un paso listo para ejecutar, prestado de la configuración.
#[derive(Debug, Clone, Copy)]
pub enum TransformStep<'a> {
    ColumnMapping(&'a [(String, String)]),
    ColumnSelection(&'a [String]),
    Filters(&'a [FilterSpec]),
    ComputedFields(&'a [ComputedFieldSpec]),
    DropColumns(&'a [String]),
}

impl TransformStep<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            TransformStep::ColumnMapping(_) => "column_mapping",
            TransformStep::ColumnSelection(_) => "column_selection",
            TransformStep::Filters(_) => "filters",
            TransformStep::ComputedFields(_) => "computed_fields",
            TransformStep::DropColumns(_) => "drop_columns",
        }
    }
}

impl PipelineConfig {
    /// Pasos presentes en el orden fijo de ejecución:
    /// mapping -> selection -> filters -> computed_fields -> drop_columns.
    pub fn steps(&self) -> Vec<TransformStep<'_>> {
        let mut out = Vec::new();
        if let Some(m) = &self.column_mapping {
            out.push(TransformStep::ColumnMapping(m));
        }
        if let Some(s) = &self.column_selection {
            out.push(TransformStep::ColumnSelection(s));
        }
        if let Some(f) = &self.filters {
            out.push(TransformStep::Filters(f));
        }
        if let Some(c) = &self.computed_fields {
            out.push(TransformStep::ComputedFields(c));
        }
        if let Some(d) = &self.drop_columns {
            out.push(TransformStep::DropColumns(d));
        }
        out
    }

    /// Parsea y valida; devuelve todos los errores encontrados.
    pub fn parse(config: &Value) -> Result<Self, Vec<FieldError>> {
        let (parsed, issues) = ConfigParser::run(config);
        if issues.is_empty() {
            Ok(parsed)
        } else {
            Err(issues.into_iter().map(|i| i.error).collect())
        }
    }

    /// Parseo en tiempo de ejecución, para configuraciones que pudieron
    /// guardarse sin pasar por el validador. Clasifica el primer problema.
    pub fn compile(config: &Value) -> Result<Self, TransformError> {
        let (parsed, issues) = ConfigParser::run(config);
        match issues.into_iter().next() {
            None => Ok(parsed),
            Some(Issue {
                kind: IssueKind::Operator(op),
                ..
            }) => Err(TransformError::UnsupportedOperator(op)),
            Some(Issue {
                kind: IssueKind::Expression(msg),
                ..
            }) => Err(TransformError::InvalidExpression(msg)),
            Some(Issue {
                kind: IssueKind::Structure,
                error,
            }) => Err(TransformError::InvalidConfiguration {
                field: error.field,
                message: error.message,
            }),
        }
    }
}

/// Valida la forma de la configuración. Lista vacía = válida.
pub fn validate(config: &Value) -> Vec<FieldError> {
    match PipelineConfig::parse(config) {
        Ok(_) => Vec::new(),
        Err(errors) => errors,
    }
}

/* =========================
   Recorrido del JSON
   ========================= */

#[derive(Debug)]
enum IssueKind {
    Structure,
    Operator(String),
    Expression(String),
}

#[derive(Debug)]
struct Issue {
    kind: IssueKind,
    error: FieldError,
}

#[derive(Default)]
struct ConfigParser {
    issues: Vec<Issue>,
}

const ROOT: &str = "configuration";

impl ConfigParser {
    fn run(config: &Value) -> (PipelineConfig, Vec<Issue>) {
        let mut p = ConfigParser::default();

        let Some(obj) = config.as_object() else {
            p.structure(ROOT.to_string(), "Must be a JSON object.");
            return (PipelineConfig::default(), p.issues);
        };

        let parsed = PipelineConfig {
            column_mapping: present(obj, "column_mapping").and_then(|v| p.column_mapping(v)),
            column_selection: present(obj, "column_selection").and_then(|v| p.column_selection(v)),
            filters: present(obj, "filters").and_then(|v| p.filters(v)),
            computed_fields: present(obj, "computed_fields").and_then(|v| p.computed_fields(v)),
            drop_columns: present(obj, "drop_columns").and_then(|v| p.drop_columns(v)),
        };

        (parsed, p.issues)
    }

    fn structure(&mut self, field: String, message: &str) {
        self.issues.push(Issue {
            kind: IssueKind::Structure,
            error: FieldError {
                field,
                message: message.to_string(),
            },
        });
    }

    fn string_at(&mut self, field: String, v: &Value) -> Option<String> {
        match v.as_str() {
            Some(s) => Some(s.to_string()),
            None => {
                self.structure(field, "Must be a string.");
                None
            }
        }
    }

    fn column_mapping(&mut self, v: &Value) -> Option<Vec<(String, String)>> {
        let field = format!("{ROOT}.column_mapping");
        let Some(obj) = v.as_object() else {
            self.structure(field, "Must be an object.");
            return None;
        };

        let mut out = Vec::with_capacity(obj.len());
        for (old, new) in obj {
            if let Some(new) = self.string_at(format!("{field}.{old}"), new) {
                out.push((old.clone(), new));
            }
        }
        Some(out)
    }

    fn column_selection(&mut self, v: &Value) -> Option<Vec<String>> {
        let field = format!("{ROOT}.column_selection");
        let items = match v.as_array() {
            Some(items) if !items.is_empty() => items,
            _ => {
                self.structure(field, "Must be a non-empty list.");
                return None;
            }
        };

        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            if let Some(s) = self.string_at(format!("{field}[{i}]"), item) {
                out.push(s);
            }
        }
        Some(out)
    }

    fn filters(&mut self, v: &Value) -> Option<Vec<FilterSpec>> {
        let field = format!("{ROOT}.filters");
        let Some(items) = v.as_array() else {
            self.structure(field, "Must be a list.");
            return None;
        };

        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let prefix = format!("{field}[{i}]");
            let Some(f) = item.as_object() else {
                self.structure(prefix, "Must be an object.");
                continue;
            };

            // se revisan las tres claves sin cortar en el primer error
            for key in ["column", "operator", "value"] {
                if !f.contains_key(key) {
                    self.structure(format!("{prefix}.{key}"), "Required.");
                }
            }

            let column = f
                .get("column")
                .and_then(|c| self.string_at(format!("{prefix}.column"), c));

            let operator = f.get("operator").and_then(|op| {
                let found = FilterOp::from_name(op.as_str().unwrap_or_default());
                if found.is_none() {
                    let shown = op.as_str().map(str::to_string).unwrap_or_else(|| op.to_string());
                    self.issues.push(Issue {
                        kind: IssueKind::Operator(shown),
                        error: FieldError {
                            field: format!("{prefix}.operator"),
                            message: format!(
                                "Unsupported. Allowed: {:?}.",
                                SUPPORTED_FILTER_OPERATORS
                            ),
                        },
                    });
                }
                found
            });

            let value = f.get("value").and_then(|val| {
                let scalar = Scalar::from_json(val);
                if scalar.is_none() {
                    self.structure(format!("{prefix}.value"), "Must be a scalar value.");
                }
                scalar
            });

            if let (Some(column), Some(operator), Some(value)) = (column, operator, value) {
                out.push(FilterSpec {
                    column,
                    operator,
                    value,
                });
            }
        }
        Some(out)
    }

    fn computed_fields(&mut self, v: &Value) -> Option<Vec<ComputedFieldSpec>> {
        let field = format!("{ROOT}.computed_fields");
        let Some(items) = v.as_array() else {
            self.structure(field, "Must be a list.");
            return None;
        };

        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let prefix = format!("{field}[{i}]");
            let Some(cf) = item.as_object() else {
                self.structure(prefix, "Must be an object.");
                continue;
            };

            let name = match cf.get("name") {
                Some(n) => self.string_at(format!("{prefix}.name"), n),
                None => {
                    self.structure(format!("{prefix}.name"), "Required.");
                    None
                }
            };

            let expression = match cf.get("expression") {
                Some(e) => self.expression(format!("{prefix}.expression"), e),
                None => {
                    self.structure(format!("{prefix}.expression"), "Required.");
                    None
                }
            };

            if let (Some(name), Some(expression)) = (name, expression) {
                out.push(ComputedFieldSpec { name, expression });
            }
        }
        Some(out)
    }

    fn expression(&mut self, field: String, v: &Value) -> Option<FunctionCall> {
        let text = self.string_at(field.clone(), v)?;

        let (message, runtime) = match expr::parse(&text) {
            Ok(call) if call.is_supported() => return Some(call),
            Ok(call) => (
                format!("Unsupported function: '{}'.", call.name),
                format!(
                    "Unsupported function: '{}'. Allowed: {:?}",
                    call.name, SUPPORTED_FUNCTIONS
                ),
            ),
            Err(e) => (format!("Cannot parse: '{text}'."), e.to_string()),
        };

        self.issues.push(Issue {
            kind: IssueKind::Expression(runtime),
            error: FieldError { field, message },
        });
        None
    }

    fn drop_columns(&mut self, v: &Value) -> Option<Vec<String>> {
        let Some(items) = v.as_array() else {
            self.structure(format!("{ROOT}.drop_columns"), "Must be a list.");
            return None;
        };
        // los elementos no se revisan: un nombre que no es string no puede
        // coincidir con ninguna columna y se ignora igual que uno inexistente
        Some(
            items
                .iter()
                .filter_map(|c| c.as_str().map(str::to_string))
                .collect(),
        )
    }
}

/// Clave presente y distinta de null.
fn present<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Arg;
    use serde_json::json;

    fn fields(errors: &[FieldError]) -> Vec<&str> {
        errors.iter().map(|e| e.field.as_str()).collect()
    }

    #[test]
    fn configuracion_que_no_es_objeto() {
        let errors = validate(&json!([1, 2]));
        assert_eq!(
            errors,
            vec![FieldError {
                field: "configuration".into(),
                message: "Must be a JSON object.".into()
            }]
        );
    }

    #[test]
    fn configuracion_vacia_es_valida() {
        assert!(validate(&json!({})).is_empty());
        assert_eq!(PipelineConfig::parse(&json!({})).unwrap(), PipelineConfig::default());
    }

    #[test]
    fn claves_desconocidas_se_ignoran() {
        let cfg = json!({
            "source_type": "csv",
            "destination_type": "csv",
            "destination_filename": "result.csv",
            "filters": [{"column": "value", "operator": "gt", "value": 100}]
        });
        assert!(validate(&cfg).is_empty());
    }

    #[test]
    fn filters_que_no_es_lista_da_error_en_filters() {
        for bad in [json!("x"), json!(3), json!({"column": "a"}), json!(true)] {
            let errors = validate(&json!({ "filters": bad }));
            assert!(!errors.is_empty());
            assert!(errors.iter().all(|e| e.field.starts_with("configuration.filters")));
        }
    }

    #[test]
    fn filtros_acumulan_todos_los_errores() {
        let cfg = json!({
            "filters": [
                {"operator": "between"},
                "no soy objeto",
                {"column": "a", "operator": "eq", "value": 1}
            ]
        });
        let errors = validate(&cfg);
        assert_eq!(
            fields(&errors),
            vec![
                "configuration.filters[0].column",
                "configuration.filters[0].value",
                "configuration.filters[0].operator",
                "configuration.filters[1]",
            ]
        );
        assert_eq!(
            errors[2].message,
            r#"Unsupported. Allowed: ["contains", "eq", "gt", "lt"]."#
        );
    }

    #[test]
    fn column_selection_vacia_o_no_lista() {
        for bad in [json!([]), json!("id")] {
            let errors = validate(&json!({ "column_selection": bad }));
            assert_eq!(fields(&errors), vec!["configuration.column_selection"]);
        }
    }

    #[test]
    fn column_mapping_debe_ser_objeto_de_strings() {
        let errors = validate(&json!({"column_mapping": ["a"]}));
        assert_eq!(fields(&errors), vec!["configuration.column_mapping"]);

        let errors = validate(&json!({"column_mapping": {"a": 1}}));
        assert_eq!(fields(&errors), vec!["configuration.column_mapping.a"]);
    }

    #[test]
    fn computed_fields_revisa_nombre_y_expresion() {
        let cfg = json!({
            "computed_fields": [
                {"expression": "concat(a, b)"},
                {"name": "x", "expression": "concat(a"},
                {"name": "y", "expression": "upper(a)"},
                {"name": "z"}
            ]
        });
        let errors = validate(&cfg);
        assert_eq!(
            fields(&errors),
            vec![
                "configuration.computed_fields[0].name",
                "configuration.computed_fields[1].expression",
                "configuration.computed_fields[2].expression",
                "configuration.computed_fields[3].expression",
            ]
        );
        assert_eq!(errors[1].message, "Cannot parse: 'concat(a'.");
        assert_eq!(errors[2].message, "Unsupported function: 'upper'.");
        assert_eq!(errors[3].message, "Required.");
    }

    #[test]
    fn drop_columns_debe_ser_lista() {
        let errors = validate(&json!({"drop_columns": "a"}));
        assert_eq!(fields(&errors), vec!["configuration.drop_columns"]);
        assert!(validate(&json!({"drop_columns": ["a", 3]})).is_empty());
    }

    #[test]
    fn parse_produce_pasos_tipados_en_orden_fijo() {
        // las claves vienen en orden inverso al de ejecución
        let cfg = json!({
            "drop_columns": ["tmp"],
            "computed_fields": [{"name": "greet", "expression": "concat('Hi ', name)"}],
            "filters": [{"column": "age", "operator": "gt", "value": 18}],
            "column_selection": ["name", "age", "tmp"],
            "column_mapping": {"nombre": "name"}
        });
        let parsed = PipelineConfig::parse(&cfg).unwrap();
        let names: Vec<&str> = parsed.steps().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec!["column_mapping", "column_selection", "filters", "computed_fields", "drop_columns"]
        );

        let filters = parsed.filters.as_ref().unwrap();
        assert_eq!(filters[0].operator, FilterOp::Gt);
        assert_eq!(filters[0].value, Scalar::Int(18));

        let cf = &parsed.computed_fields.as_ref().unwrap()[0];
        assert_eq!(cf.expression.args[0], Arg::Literal("Hi ".into()));
    }

    #[test]
    fn compile_clasifica_operador_no_soportado() {
        let cfg = json!({"filters": [{"column": "a", "operator": "between", "value": 1}]});
        assert_eq!(
            PipelineConfig::compile(&cfg).unwrap_err(),
            TransformError::UnsupportedOperator("between".into())
        );
    }

    #[test]
    fn compile_clasifica_expresion_invalida() {
        let cfg = json!({"computed_fields": [{"name": "x", "expression": "upper(a)"}]});
        assert!(matches!(
            PipelineConfig::compile(&cfg).unwrap_err(),
            TransformError::InvalidExpression(_)
        ));
    }

    #[test]
    fn compile_clasifica_errores_de_estructura() {
        let err = PipelineConfig::compile(&json!({"filters": "x"})).unwrap_err();
        assert_eq!(
            err,
            TransformError::InvalidConfiguration {
                field: "configuration.filters".into(),
                message: "Must be a list.".into()
            }
        );
    }
}
