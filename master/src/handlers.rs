use anyhow::anyhow;
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use common::{
    CreatePipelineRequest, Destination, ErrorBody, ErrorDetail, FileStore, OrchestratorError,
    OutputRecord, Pipeline, PipelineId, Run, RunStore, Upload,
};
use serde_json::{json, Map, Value};
use std::{collections::HashMap, sync::MutexGuard};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::state::AppState;

pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/pipelines", post(create_pipeline))
        .route("/api/v1/pipelines/:id", get(get_pipeline))
        .route("/api/v1/pipelines/:id/run", post(run_pipeline))
        .route("/api/v1/runs/:id", get(get_run))
        .route("/api/v1/runs/:id/download", get(download_run))
        .route("/api/v1/runs/:id/rows", get(run_rows))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .with_state(state)
}

/* ---------------- errores de la API ---------------- */

/// Error HTTP con el cuerpo `{"error": {"code", "message", "details"}}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Value,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: Value::Null,
        }
    }

    fn not_found(what: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", format!("{what} not found."))
    }

    fn validation(message: &str, details: Value) -> Self {
        Self {
            details,
            ..Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        error!("error interno: {err:#}");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "Internal server error.",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
                details: self.details,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Precondition(p) => {
                warn!(code = p.code(), error = %p, "run rechazado antes de empezar");
                ApiError::new(StatusCode::BAD_REQUEST, p.code(), p.to_string())
            }
            OrchestratorError::Storage(e) => ApiError::internal(e),
        }
    }
}

const PAYLOAD_INVALID: &str = "Request payload failed validation.";
const PARAMS_INVALID: &str = "Invalid request parameters.";

/// Rechazo de un cuerpo ilegible. 413 se conserva; el resto es 400.
fn rejected_body(status: StatusCode, message: &str, field: &str, reason: String) -> ApiError {
    let status = if status == StatusCode::PAYLOAD_TOO_LARGE {
        status
    } else {
        StatusCode::BAD_REQUEST
    };
    let mut details = Map::new();
    details.insert(field.to_string(), json!([reason]));
    ApiError {
        status,
        ..ApiError::validation(message, Value::Object(details))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        rejected_body(rejection.status(), PAYLOAD_INVALID, "body", rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        rejected_body(rejection.status(), PARAMS_INVALID, "file", rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        rejected_body(err.status(), PARAMS_INVALID, "file", err.body_text())
    }
}

/// Campos requeridos de `{name, configuration}` con su error por campo.
fn parse_create_request(body: Value) -> Result<CreatePipelineRequest, ApiError> {
    let Value::Object(fields) = &body else {
        return Err(ApiError::validation(
            PAYLOAD_INVALID,
            json!({"body": ["Expected a JSON object."]}),
        ));
    };

    let mut details = Map::new();
    match fields.get("name") {
        None | Some(Value::Null) => {
            details.insert("name".into(), json!(["This field is required."]));
        }
        Some(Value::String(n)) if n.trim().is_empty() => {
            details.insert("name".into(), json!(["This field may not be blank."]));
        }
        Some(Value::String(_)) => {}
        Some(_) => {
            details.insert("name".into(), json!(["Not a valid string."]));
        }
    }
    if matches!(fields.get("configuration"), None | Some(Value::Null)) {
        details.insert("configuration".into(), json!(["This field is required."]));
    }
    if !details.is_empty() {
        return Err(ApiError::validation(PAYLOAD_INVALID, Value::Object(details)));
    }

    serde_json::from_value(body).map_err(|e| {
        ApiError::validation(PAYLOAD_INVALID, json!({"body": [e.to_string()]}))
    })
}

fn lock_pipelines(
    state: &AppState,
) -> Result<MutexGuard<'_, HashMap<PipelineId, Pipeline>>, ApiError> {
    state
        .pipelines
        .lock()
        .map_err(|_| ApiError::internal(anyhow!("pipelines lock poisoned")))
}

fn find_run(state: &AppState, id: &str) -> Result<Run, ApiError> {
    state
        .runs
        .get_run(id)
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("Run"))
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Crea un pipeline si la configuración es válida y el nombre no está tomado
async fn create_pipeline(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<Pipeline>), ApiError> {
    let Json(body) = payload?;
    let req = parse_create_request(body)?;
    let name = req.name.trim().to_string();

    let pipeline = Pipeline::new(name, req.configuration)
        .map_err(|errors| ApiError::validation(PAYLOAD_INVALID, json!({ "configuration": errors })))?;

    let mut pipelines = lock_pipelines(&state)?;
    if pipelines.values().any(|p| p.name == pipeline.name) {
        return Err(ApiError::validation(
            PAYLOAD_INVALID,
            json!({"name": ["pipeline with this name already exists."]}),
        ));
    }
    pipelines.insert(pipeline.id.clone(), pipeline.clone());

    info!(pipeline_id = %pipeline.id, name = %pipeline.name, "pipeline creado");
    Ok((StatusCode::CREATED, Json(pipeline)))
}

async fn get_pipeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Pipeline>, ApiError> {
    let pipelines = lock_pipelines(&state)?;
    pipelines
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Pipeline"))
}

// Recibe el archivo (multipart: file + destination) y ejecuta el pipeline
async fn run_pipeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Run>, ApiError> {
    let mut multipart = multipart?;
    let pipeline = lock_pipelines(&state)?
        .get(&id)
        .cloned()
        .ok_or_else(|| ApiError::not_found("Pipeline"))?;

    let mut upload: Option<Upload> = None;
    let mut destination = Destination::default().as_str().to_string();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await?;
                upload = Some(Upload {
                    file_name,
                    bytes: bytes.to_vec(),
                });
            }
            "destination" => destination = field.text().await?.trim().to_string(),
            _ => {}
        }
    }

    let mut details = Map::new();
    match &upload {
        None => {
            details.insert("file".into(), json!(["No file was submitted."]));
        }
        Some(u) if u.bytes.is_empty() => {
            details.insert("file".into(), json!(["The submitted file is empty."]));
        }
        Some(_) => {}
    }
    if destination.parse::<Destination>().is_err() {
        details.insert(
            "destination".into(),
            json!([format!("\"{destination}\" is not a valid choice.")]),
        );
    }
    let upload = match upload {
        Some(u) if details.is_empty() => u,
        _ => {
            return Err(ApiError::validation(
                PARAMS_INVALID,
                Value::Object(details),
            ))
        }
    };

    info!(
        pipeline_id = %pipeline.id,
        file = %upload.file_name,
        bytes = upload.bytes.len(),
        destination = %destination,
        "run solicitado"
    );

    // el run es síncrono; se saca del runtime async
    let orchestrator = state.orchestrator.clone();
    let run = tokio::task::spawn_blocking(move || {
        orchestrator.run_pipeline(&pipeline, upload, &destination)
    })
    .await
    .map_err(|e| ApiError::internal(e.into()))??;

    Ok(Json(run))
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Run>, ApiError> {
    find_run(&state, &id).map(Json)
}

// Devuelve el CSV de salida como adjunto
async fn download_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let run = find_run(&state, &id)?;
    let Some(reference) = run.output_file else {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NO_OUTPUT",
            "This run has no output file.",
        ));
    };

    let bytes = state.files.read(&reference).map_err(ApiError::internal)?;
    let file_name = reference.rsplit('/').next().unwrap_or(&reference);

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

// Filas guardadas por un run con destino `database`
async fn run_rows(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<OutputRecord>>, ApiError> {
    let run = find_run(&state, &id)?;
    let records = state
        .runs
        .output_records(&run.id)
        .map_err(ApiError::internal)?;
    Ok(Json(records))
}
