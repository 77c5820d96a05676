pub mod config;
pub mod dataset;
pub mod decode;
pub mod engine;
pub mod error;
pub mod expr;
pub mod orchestrator;
pub mod output;
pub mod results;
pub mod run;
pub mod store;

pub use config::{validate, FieldError, PipelineConfig};
pub use dataset::{Dataset, Scalar};
pub use error::{DecodeError, PreconditionError, TransformError};
pub use orchestrator::{OrchestratorError, RunFailure, RunOrchestrator};
pub use results::OutputRecord;
pub use run::{Destination, Pipeline, PipelineId, Run, RunId, RunStatus, Upload};
pub use store::{FileStore, LocalFileStore, MemoryRunStore, RunStore};

/* --------- Cuerpos de la API HTTP compartidos con el cliente --------- */

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePipelineRequest {
    pub name: String,
    pub configuration: Value,
}

/// Cuerpo de error uniforme: `{"error": {"code", "message", "details"}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}
