use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::config::{validate, FieldError};
use crate::error::PreconditionError;

pub type PipelineId = String;
pub type RunId = String;

/* --------- Pipelines --------- */

/// Pipeline con nombre y su configuración JSON (ya validada al crearse).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pipeline {
    pub id: PipelineId,
    pub name: String,
    pub configuration: Value,
    pub created_at: DateTime<Utc>,
}

impl Pipeline {
    /// Crea el pipeline sólo si la configuración es válida.
    pub fn new(name: impl Into<String>, configuration: Value) -> Result<Self, Vec<FieldError>> {
        let errors = validate(&configuration);
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(Self::new_unchecked(name, configuration))
    }

    /// Sin validar: así llegan configuraciones guardadas por otras vías.
    pub fn new_unchecked(name: impl Into<String>, configuration: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            configuration,
            created_at: Utc::now(),
        }
    }
}

/* --------- Destino de salida --------- */

/// Se elige en cada ejecución, no en la configuración.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    #[default]
    Csv,
    Database,
}

impl FromStr for Destination {
    type Err = PreconditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv" => Ok(Destination::Csv),
            "database" => Ok(Destination::Database),
            other => Err(PreconditionError::UnsupportedDestination(other.to_string())),
        }
    }
}

impl Destination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::Csv => "csv",
            Destination::Database => "database",
        }
    }
}

/// Archivo subido por el operador.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/* --------- Runs --------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending)
    }
}

/// Una ejecución de un pipeline sobre una entrada concreta.
/// Nace `Pending` y pasa una sola vez a `Completed` o `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub id: RunId,
    #[serde(rename = "pipeline")]
    pub pipeline_id: PipelineId,
    pub input_file: String,
    pub output_file: Option<String>,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Run {
    pub fn pending(pipeline_id: &str, input_file: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pipeline_id: pipeline_id.to_string(),
            input_file: input_file.into(),
            output_file: None,
            status: RunStatus::Pending,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    /// Estado final exitoso; `output_file` se fija en la misma transición.
    pub(crate) fn completed(mut self, output_file: Option<String>) -> Self {
        debug_assert_eq!(self.status, RunStatus::Pending);
        self.status = RunStatus::Completed;
        self.output_file = output_file;
        self
    }

    pub(crate) fn failed(mut self, message: impl Into<String>) -> Self {
        debug_assert_eq!(self.status, RunStatus::Pending);
        self.status = RunStatus::Failed;
        self.error_message = Some(message.into());
        self
    }
}
