// master/src/state.rs

use common::{LocalFileStore, MemoryRunStore, Pipeline, PipelineId, RunOrchestrator};
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
};

#[derive(Clone)]
pub struct AppState {
    pub pipelines: Arc<Mutex<HashMap<PipelineId, Pipeline>>>,
    pub runs: Arc<MemoryRunStore>,
    // uploads/ y outputs/ bajo DATA_DIR
    pub files: Arc<LocalFileStore>,
    pub orchestrator: RunOrchestrator,
}

impl AppState {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let runs = Arc::new(MemoryRunStore::new());
        let files = Arc::new(LocalFileStore::new(data_dir));
        let orchestrator = RunOrchestrator::new(runs.clone(), files.clone());

        Self {
            pipelines: Arc::new(Mutex::new(HashMap::new())),
            runs,
            files,
            orchestrator,
        }
    }
}
