use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    path::Path,
    sync::Arc,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::decode::{decode, InputFormat};
use crate::engine::run_transforms;
use crate::error::{DecodeError, PreconditionError, TransformError};
use crate::output::{to_csv_bytes, to_records};
use crate::run::{Destination, Pipeline, Run, Upload};
use crate::store::{FileStore, RunStore};

/// Por qué terminó `Failed` un run. El texto de `Display` es el
/// `error_message` que queda guardado.
#[derive(Debug, Error)]
pub enum RunFailure {
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Failed to write output: {0:#}")]
    Write(anyhow::Error),

    #[error("Unexpected error: {0}")]
    Panic(String),
}

impl RunFailure {
    /// Errores de dominio esperables (columnas, expresiones, filtros).
    pub fn is_expected(&self) -> bool {
        matches!(self, RunFailure::Transform(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RunFailure::Transform(_) => "transform",
            RunFailure::Decode(_) => "decode",
            RunFailure::Write(_) => "write",
            RunFailure::Panic(_) => "panic",
        }
    }
}

/// Lo único que llega al llamador: rechazos previos al run o fallas
/// del almacenamiento de runs/archivos.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error("Storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Ejecuta un pipeline sobre un archivo subido, de punta a punta.
#[derive(Clone)]
pub struct RunOrchestrator {
    runs: Arc<dyn RunStore>,
    files: Arc<dyn FileStore>,
}

impl RunOrchestrator {
    pub fn new(runs: Arc<dyn RunStore>, files: Arc<dyn FileStore>) -> Self {
        Self { runs, files }
    }

    /// Valida destino y extensión, guarda la entrada, crea el run `Pending`
    /// y lo lleva a `Completed` o `Failed`.
    ///
    /// Las fallas del pipeline quedan en el run devuelto; sólo las
    /// precondiciones y el almacenamiento devuelven `Err`.
    pub fn run_pipeline(
        &self,
        pipeline: &Pipeline,
        upload: Upload,
        destination: &str,
    ) -> Result<Run, OrchestratorError> {
        let destination: Destination = destination.parse()?;
        let format = InputFormat::from_file_name(&upload.file_name)?;

        let base_name = Path::new(&upload.file_name)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("upload");
        let stored_name = format!("{}_{}", uuid::Uuid::new_v4(), base_name);
        let input_ref = self.files.save_input(&stored_name, &upload.bytes)?;

        let run = Run::pending(&pipeline.id, input_ref);
        self.runs.insert_run(&run)?;
        info!(
            run_id = %run.id,
            pipeline_id = %pipeline.id,
            destination = destination.as_str(),
            input = %run.input_file,
            "run creado"
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.execute(pipeline, &run, format, &upload.bytes, destination)
        }))
        .unwrap_or_else(|payload| Err(RunFailure::Panic(panic_message(payload))));

        let pending = run.clone();
        let finished = match outcome {
            Ok(output_file) => {
                info!(
                    run_id = %run.id,
                    pipeline_id = %pipeline.id,
                    output = output_file.as_deref().unwrap_or("-"),
                    "run completado"
                );
                run.completed(output_file)
            }
            Err(failure) => {
                if failure.is_expected() {
                    warn!(run_id = %run.id, pipeline_id = %pipeline.id, kind = failure.kind(), error = %failure, "run fallido");
                } else {
                    error!(run_id = %run.id, pipeline_id = %pipeline.id, kind = failure.kind(), error = %failure, "run fallido por error inesperado");
                }
                run.failed(failure.to_string())
            }
        };

        if let Err(err) = self.runs.update_run(&finished) {
            error!(run_id = %finished.id, status = ?finished.status, "no se pudo guardar el estado final del run: {err:#}");
            // un intento de dejarlo Failed para que no quede Pending
            let fallback = pending.failed(format!("Failed to store run result: {err:#}"));
            if let Err(again) = self.runs.update_run(&fallback) {
                error!(run_id = %fallback.id, "el run queda sin estado final: {again:#}");
            }
            return Err(OrchestratorError::Storage(err));
        }
        Ok(finished)
    }

    /// Cuerpo del run. Devuelve la referencia del CSV de salida, si hubo.
    fn execute(
        &self,
        pipeline: &Pipeline,
        run: &Run,
        format: InputFormat,
        bytes: &[u8],
        destination: Destination,
    ) -> Result<Option<String>, RunFailure> {
        let config = PipelineConfig::compile(&pipeline.configuration)?;
        let input = decode(format, bytes)?;
        let rows_in = input.len();

        let output = run_transforms(input, &config)?;
        debug!(
            run_id = %run.id,
            rows_in,
            rows_out = output.len(),
            columns = ?output.columns(),
            "transformaciones aplicadas"
        );

        match destination {
            Destination::Csv => {
                let bytes = to_csv_bytes(&output).map_err(|e| RunFailure::Write(e.into()))?;
                let name = format!("pipeline_{}_run_{}.csv", pipeline.id, run.id);
                let reference = self
                    .files
                    .save_output(&name, &bytes)
                    .map_err(RunFailure::Write)?;
                Ok(Some(reference))
            }
            Destination::Database => {
                let inserted = self
                    .runs
                    .insert_output_records(&run.id, to_records(&output))
                    .map_err(RunFailure::Write)?;
                debug!(run_id = %run.id, inserted, "filas guardadas");
                Ok(None)
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic without message".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::RunStatus;
    use crate::store::{LocalFileStore, MemoryRunStore};
    use serde_json::{json, Value};
    use std::{fs, path::PathBuf};

    const PEOPLE_CSV: &[u8] = b"id,name,value\n1,Alice,50\n2,Bob,200\n3,Charlie,300\n";

    fn temp_dir(sub: &str) -> PathBuf {
        let base = std::env::temp_dir()
            .join("databridge_orchestrator_tests")
            .join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn setup(sub: &str) -> (RunOrchestrator, Arc<MemoryRunStore>, Arc<LocalFileStore>) {
        let runs = Arc::new(MemoryRunStore::new());
        let files = Arc::new(LocalFileStore::new(temp_dir(sub)));
        let orchestrator = RunOrchestrator::new(runs.clone(), files.clone());
        (orchestrator, runs, files)
    }

    fn pipeline(configuration: Value) -> Pipeline {
        Pipeline::new("test", configuration).unwrap()
    }

    fn upload(name: &str, bytes: &[u8]) -> Upload {
        Upload {
            file_name: name.to_string(),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn run_csv_filtra_y_guarda_la_salida() {
        let (orch, runs, files) = setup("csv");
        let p = pipeline(json!({
            "filters": [{"column": "value", "operator": "gt", "value": 100}]
        }));

        let run = orch.run_pipeline(&p, upload("input.csv", PEOPLE_CSV), "csv").unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.error_message, None);
        let reference = run.output_file.clone().unwrap();
        assert_eq!(reference, format!("outputs/pipeline_{}_run_{}.csv", p.id, run.id));

        let text = String::from_utf8(files.read(&reference).unwrap()).unwrap();
        assert_eq!(text, "id,name,value\n2,Bob,200\n3,Charlie,300\n");

        // lo guardado coincide con lo devuelto
        assert_eq!(runs.get_run(&run.id).unwrap(), Some(run.clone()));
        assert!(run.input_file.starts_with("uploads/"));
        assert!(run.input_file.ends_with("_input.csv"));
        assert_eq!(files.read(&run.input_file).unwrap(), PEOPLE_CSV);
    }

    #[test]
    fn run_database_guarda_una_fila_por_registro() {
        let (orch, runs, _) = setup("database");
        let p = pipeline(json!({
            "filters": [{"column": "age", "operator": "gt", "value": 18}]
        }));
        let csv = b"name,age\nAlice,25\nBob,15\nCharlie,30\n";

        let run = orch.run_pipeline(&p, upload("people.CSV", csv), "database").unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.output_file, None);
        let records = runs.output_records(&run.id).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(Value::Object(records[0].data.clone()), json!({"name": "Alice", "age": 25}));
        assert_eq!(records[1].data["name"], json!("Charlie"));
    }

    #[test]
    fn run_con_columna_inexistente_queda_failed() {
        let (orch, runs, files) = setup("missing_column");
        let p = pipeline(json!({"column_selection": ["id", "nonexistent_column"]}));

        let run = orch.run_pipeline(&p, upload("input.csv", PEOPLE_CSV), "csv").unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.output_file, None);
        let message = run.error_message.clone().unwrap();
        assert_eq!(
            message,
            r#"column_selection references missing columns: ["nonexistent_column"]"#
        );
        assert_eq!(runs.get_run(&run.id).unwrap().unwrap().status, RunStatus::Failed);
        assert!(!files.root().join("outputs").exists());
    }

    #[test]
    fn extension_no_soportada_no_crea_run() {
        let (orch, _, files) = setup("bad_extension");
        let p = pipeline(json!({}));

        let err = orch
            .run_pipeline(&p, upload("notes.txt", b"hola"), "csv")
            .unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::Precondition(PreconditionError::UnsupportedFileType { ref extension })
                if extension == ".txt"
        ));
        // ni siquiera se guarda la entrada
        assert!(!files.root().join("uploads").exists());
    }

    #[test]
    fn destino_desconocido_no_crea_run() {
        let (orch, _, files) = setup("bad_destination");
        let p = pipeline(json!({}));

        let err = orch
            .run_pipeline(&p, upload("input.csv", PEOPLE_CSV), "parquet")
            .unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::Precondition(PreconditionError::UnsupportedDestination(_))
        ));
        assert!(!files.root().join("uploads").exists());
    }

    #[test]
    fn excel_corrupto_termina_failed() {
        let (orch, _, _) = setup("bad_excel");
        let p = pipeline(json!({}));

        let run = orch
            .run_pipeline(&p, upload("data.xlsx", b"no soy un zip"), "csv")
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert!(run
            .error_message
            .unwrap()
            .starts_with("Failed to read Excel input"));
    }

    #[test]
    fn run_database_desde_xlsx() {
        let (orch, runs, _) = setup("database_xlsx");
        let p = pipeline(json!({
            "filters": [{"column": "age", "operator": "gt", "value": 18}]
        }));
        let xlsx = include_bytes!("../fixtures/people.xlsx");

        let run = orch
            .run_pipeline(&p, upload("people.xlsx", xlsx), "database")
            .unwrap();

        assert_eq!(run.status, RunStatus::Completed, "{:?}", run.error_message);
        let records = runs.output_records(&run.id).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(Value::Object(records[0].data.clone()), json!({"name": "Alice", "age": 25}));
        assert_eq!(records[1].data["name"], json!("Charlie"));
    }

    #[test]
    fn configuracion_guardada_sin_validar_falla_el_run() {
        let (orch, _, _) = setup("unvalidated");
        let p = Pipeline::new_unchecked(
            "raw",
            json!({"filters": [{"column": "value", "operator": "between", "value": 1}]}),
        );

        let run = orch.run_pipeline(&p, upload("input.csv", PEOPLE_CSV), "csv").unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(
            run.error_message.as_deref(),
            Some("Unsupported filter operator: 'between'")
        );
    }

    #[test]
    fn transformaciones_completas_de_punta_a_punta() {
        let (orch, _, files) = setup("full");
        let p = pipeline(json!({
            "column_mapping": {"name": "customer"},
            "filters": [{"column": "value", "operator": "lt", "value": 250}],
            "computed_fields": [
                {"name": "greeting", "expression": "concat('Hello, ', customer)"},
                {"name": "double", "expression": "add(value, value)"}
            ],
            "drop_columns": ["id"]
        }));

        let run = orch.run_pipeline(&p, upload("input.csv", PEOPLE_CSV), "csv").unwrap();

        let text = String::from_utf8(files.read(run.output_file.as_deref().unwrap()).unwrap())
            .unwrap();
        assert_eq!(
            text,
            "customer,value,greeting,double\n\
             Alice,50,\"Hello, Alice\",100\n\
             Bob,200,\"Hello, Bob\",400\n"
        );
    }

    /// Falla al guardar runs `Completed`; el resto lo delega.
    #[derive(Default)]
    struct FailingCompletedRuns {
        inner: MemoryRunStore,
        last_run: std::sync::Mutex<Option<String>>,
    }

    impl RunStore for FailingCompletedRuns {
        fn insert_run(&self, run: &Run) -> anyhow::Result<()> {
            *self.last_run.lock().unwrap() = Some(run.id.clone());
            self.inner.insert_run(run)
        }

        fn update_run(&self, run: &Run) -> anyhow::Result<()> {
            if run.status == RunStatus::Completed {
                anyhow::bail!("disco lleno");
            }
            self.inner.update_run(run)
        }

        fn get_run(&self, id: &str) -> anyhow::Result<Option<Run>> {
            self.inner.get_run(id)
        }

        fn insert_output_records(
            &self,
            run_id: &str,
            rows: Vec<serde_json::Map<String, Value>>,
        ) -> anyhow::Result<usize> {
            self.inner.insert_output_records(run_id, rows)
        }

        fn output_records(&self, run_id: &str) -> anyhow::Result<Vec<crate::OutputRecord>> {
            self.inner.output_records(run_id)
        }
    }

    #[test]
    fn falla_al_guardar_completed_deja_el_run_failed() {
        let runs = Arc::new(FailingCompletedRuns::default());
        let files = Arc::new(LocalFileStore::new(temp_dir("store_failure")));
        let orch = RunOrchestrator::new(runs.clone(), files);
        let p = pipeline(json!({}));

        let err = orch
            .run_pipeline(&p, upload("input.csv", PEOPLE_CSV), "csv")
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Storage(_)));

        let run_id = runs.last_run.lock().unwrap().clone().unwrap();
        let stored = runs.get_run(&run_id).unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.output_file, None);
        assert_eq!(
            stored.error_message.as_deref(),
            Some("Failed to store run result: disco lleno")
        );
    }

    struct PanickingFiles(LocalFileStore);

    impl FileStore for PanickingFiles {
        fn save_input(&self, file_name: &str, bytes: &[u8]) -> anyhow::Result<String> {
            self.0.save_input(file_name, bytes)
        }

        fn save_output(&self, _: &str, _: &[u8]) -> anyhow::Result<String> {
            panic!("disco roto")
        }

        fn read(&self, reference: &str) -> anyhow::Result<Vec<u8>> {
            self.0.read(reference)
        }
    }

    #[test]
    fn panic_dentro_del_run_queda_como_failed() {
        let runs = Arc::new(MemoryRunStore::new());
        let files = Arc::new(PanickingFiles(LocalFileStore::new(temp_dir("panic"))));
        let orch = RunOrchestrator::new(runs.clone(), files);
        let p = pipeline(json!({}));

        let run = orch.run_pipeline(&p, upload("input.csv", PEOPLE_CSV), "csv").unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("Unexpected error: disco roto"));
        assert_eq!(runs.get_run(&run.id).unwrap().unwrap().status, RunStatus::Failed);
    }
}
