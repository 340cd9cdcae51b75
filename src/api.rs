use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use neo4rs::query;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::spawn;
use tracing::{error, info};
use url::Url;

use crate::{
    app_state::AppState,
    error::{AiError, AnalystError},
    ingest::{self, SubmitOutcome, SubmitWarning},
    models::{AnalysisRequest, AnalysisStatus, CanonicalReportView, RawAnalysis, StoredAnalysisRecord},
    normalizer,
};

type ApiError = (StatusCode, Json<Value>);

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct FileSubmitPayload {
    filename: String,
    /// Data URL (`data:<mime>;base64,...`) o base64 sin envoltorio.
    data: String,
}

#[derive(Deserialize)]
pub struct TextSubmitPayload {
    title: String,
    body: String,
}

#[derive(Serialize)]
pub struct SubmitResponse {
    record_id: String,
    status: AnalysisStatus,
    original_document_url: Option<String>,
    analysis: RawAnalysis,
    report: CanonicalReportView,
    warnings: Vec<SubmitWarning>,
}

impl From<SubmitOutcome> for SubmitResponse {
    fn from(outcome: SubmitOutcome) -> Self {
        let report = normalizer::normalize(&outcome.analysis);
        Self {
            record_id: outcome.record.id,
            status: outcome.record.status,
            original_document_url: outcome.record.original_document_url,
            analysis: outcome.analysis,
            report,
            warnings: outcome.warnings,
        }
    }
}

/// Fila del historial tal y como se lista en el frontend.
#[derive(Debug, Serialize, PartialEq)]
pub struct AnalysisSummary {
    id: String,
    title: String,
    status: AnalysisStatus,
    analyzed_at: DateTime<Utc>,
    original_document_url: Option<String>,
}

impl From<&StoredAnalysisRecord> for AnalysisSummary {
    fn from(record: &StoredAnalysisRecord) -> Self {
        Self {
            id: record.id.clone(),
            title: normalizer::normalize(record).title,
            status: record.status,
            analyzed_at: record.analyzed_at,
            original_document_url: record.original_document_url.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct ReportResponse {
    record: StoredAnalysisRecord,
    report: CanonicalReportView,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/analyses", get(list_analyses_handler))
        .route("/api/analyses/file", post(submit_file_handler))
        .route("/api/analyses/text", post(submit_text_handler))
        .route("/api/analyses/refresh", post(refresh_handler))
        .route("/api/analyses/:id/report", get(report_handler))
        .route("/api/report/normalize", post(normalize_handler))
        .route("/api/status", get(status_handler))
        .route("/api/neo4j-info", get(neo4j_info_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn submit_file_handler(
    State(state): State<AppState>,
    Json(payload): Json<FileSubmitPayload>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let bytes = ingest::decode_data_url(&payload.data).map_err(analyst_error)?;
    let request = AnalysisRequest::File {
        bytes,
        filename: payload.filename,
    };
    run_submission(state, request).await
}

#[axum::debug_handler]
async fn submit_text_handler(
    State(state): State<AppState>,
    Json(payload): Json<TextSubmitPayload>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let request = AnalysisRequest::Text {
        title: payload.title,
        body: payload.body,
    };
    run_submission(state, request).await
}

/// Marca el envío en curso y lo ejecuta en una tarea propia: si el cliente
/// se desconecta, el pipeline termina igualmente y libera el indicador.
async fn run_submission(
    state: AppState,
    request: AnalysisRequest,
) -> Result<Json<SubmitResponse>, ApiError> {
    {
        let mut status = state.status.lock().await;
        if status.is_busy {
            return Err(api_error(
                StatusCode::CONFLICT,
                "Ya hay un análisis en curso. Espera a que termine.",
            ));
        }
        status.is_busy = true;
        status.message = format!("Analizando '{}'...", request.label());
    }

    let task_state = state.clone();
    let handle = spawn(async move {
        let result = task_state.orchestrator.submit(request).await;

        let mut status = task_state.status.lock().await;
        status.is_busy = false;
        status.message = match &result {
            Ok(outcome) => format!("¡Análisis completado! {}", outcome.record.title),
            Err(err) => {
                error!("Error en el análisis: {}", err);
                err.to_string()
            }
        };
        result
    });

    match handle.await {
        Ok(result) => result
            .map(|outcome| Json(SubmitResponse::from(outcome)))
            .map_err(analyst_error),
        Err(join_err) => {
            error!("La tarea de análisis terminó de forma inesperada: {}", join_err);
            let mut status = state.status.lock().await;
            status.is_busy = false;
            status.message = "Error interno en el análisis.".to_string();
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "Error interno en el análisis."))
        }
    }
}

#[axum::debug_handler]
async fn list_analyses_handler(State(state): State<AppState>) -> Json<Vec<AnalysisSummary>> {
    let history = state.orchestrator.history().await;
    Json(history.iter().map(AnalysisSummary::from).collect())
}

#[axum::debug_handler]
async fn refresh_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<AnalysisSummary>>, ApiError> {
    let records = state.orchestrator.refresh().await.map_err(analyst_error)?;
    Ok(Json(records.iter().map(AnalysisSummary::from).collect()))
}

#[axum::debug_handler]
async fn report_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReportResponse>, ApiError> {
    let record = state.orchestrator.find(&id).await.ok_or_else(|| {
        api_error(StatusCode::NOT_FOUND, &format!("No existe el análisis '{id}'."))
    })?;
    let report = normalizer::normalize(&record);
    Ok(Json(ReportResponse { record, report }))
}

#[axum::debug_handler]
async fn normalize_handler(body: Option<Json<Value>>) -> Json<CanonicalReportView> {
    let value = body.map(|Json(value)| value);
    Json(normalizer::normalize(&value))
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<crate::app_state::Status> {
    Json(state.status.lock().await.clone())
}

#[axum::debug_handler]
async fn neo4j_info_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, StatusCode> {
    let browser_url = neo4j_browser_url(&state.config.neo4j_uri);

    match state.graph.run(query("RETURN 1")).await {
        Ok(_) => Ok(Json(json!({ "status": "ok", "browser_url": browser_url }))),
        Err(e) => {
            error!("Error en el health check de Neo4j: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Neo4j Browser en el host de la URI bolt (`bolt://`, `neo4j://`, ...).
fn neo4j_browser_url(neo4j_uri: &str) -> String {
    let host = Url::parse(neo4j_uri)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| "localhost".to_string());
    format!("http://{host}:7474")
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().await.take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}

// --- Errores ---

fn api_error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({ "error": message })))
}

fn analyst_error(err: AnalystError) -> ApiError {
    api_error(status_for(&err), &err.to_string())
}

fn status_for(err: &AnalystError) -> StatusCode {
    match err {
        AnalystError::Validation(_) => StatusCode::BAD_REQUEST,
        AnalystError::Ai(AiError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        AnalystError::Ai(AiError::EmptyContent | AiError::UnsupportedDocument(_)) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AnalystError::Ai(_) => StatusCode::BAD_GATEWAY,
        AnalystError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
