use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::run::RunId;

/// Una fila de salida persistida para el destino `database`.
/// `data` conserva el orden de las columnas.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputRecord {
    pub id: String,
    pub run_id: RunId,
    pub data: Map<String, Value>,
}

impl OutputRecord {
    pub fn new(run_id: &str, data: Map<String, Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            data,
        }
    }
}
