use thiserror::Error;

/// Errores de dominio del motor de transformaciones.
/// Todos terminan el run como `Failed` con el mensaje tal cual.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransformError {
    /// Un paso referencia columnas que no existen en ese punto del pipeline.
    /// El mensaje ya incluye las columnas faltantes ordenadas.
    #[error("{0}")]
    ColumnMismatch(String),

    #[error("{0}")]
    InvalidExpression(String),

    #[error("Unsupported filter operator: '{0}'")]
    UnsupportedOperator(String),

    #[error("{step} would produce duplicate column: '{column}'")]
    DuplicateColumn { step: &'static str, column: String },

    #[error("Filter on '{column}' cannot compare {left} with {right} using '{operator}'")]
    TypeMismatch {
        column: String,
        operator: &'static str,
        left: &'static str,
        right: &'static str,
    },

    /// Configuración guardada sin pasar por el validador.
    #[error("Invalid configuration at {field}: {message}")]
    InvalidConfiguration { field: String, message: String },
}

impl TransformError {
    /// Construye el ColumnMismatch con la lista de columnas ordenada.
    pub fn missing_columns<I, S>(context: &str, missing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cols: Vec<String> = missing.into_iter().map(Into::into).collect();
        cols.sort();
        cols.dedup();
        TransformError::ColumnMismatch(format!("{context}: {cols:?}"))
    }
}

/// Errores al decodificar el archivo de entrada.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to read CSV input: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to read Excel input: {0}")]
    Excel(#[from] calamine::Error),

    #[error("Excel workbook has no worksheets")]
    NoSheet,

    #[error("Input file has no header row")]
    EmptyInput,

    #[error("Invalid input data: {0}")]
    Dataset(#[from] crate::dataset::DatasetError),
}

/// Fallas de precondición: se rechazan antes de crear el run.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PreconditionError {
    #[error("File type '{extension}' is not supported. Allowed: {:?}", crate::decode::SUPPORTED_EXTENSIONS)]
    UnsupportedFileType { extension: String },

    #[error("Destination '{0}' is not supported. Allowed: [\"csv\", \"database\"]")]
    UnsupportedDestination(String),
}

impl PreconditionError {
    pub fn code(&self) -> &'static str {
        match self {
            PreconditionError::UnsupportedFileType { .. } => "UNSUPPORTED_FILE_TYPE",
            PreconditionError::UnsupportedDestination(_) => "UNSUPPORTED_DESTINATION",
        }
    }
}
