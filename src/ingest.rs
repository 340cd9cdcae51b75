//! Ingesta de una idea: análisis con IA → subida del documento → URL pública
//! → inserción de la fila → refresco del historial.
//!
//! Política de fallos parciales:
//!   - La validación se hace antes de cualquier llamada de red.
//!   - Un fallo de la IA o de la inserción aborta el envío.
//!   - Un fallo de la subida NO aborta: la fila se guarda como `degraded`, sin
//!     URL del documento, y el resultado lleva un aviso.
//!   - No hay reintentos automáticos.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    config::PipelineTimeouts,
    error::{AiError, AnalystError, AnalystResult},
    llm::AnalysisEngine,
    models::{AnalysisRequest, AnalysisStatus, RawAnalysis, StoredAnalysisRecord},
    persistence::PersistenceClient,
};

/// Aviso no fatal de un envío que, aun así, terminó bien.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum SubmitWarning {
    /// El documento original no se pudo guardar; el análisis sí.
    UploadFailed(String),
    /// La fila se insertó pero el historial no se pudo volver a leer.
    HistoryStale(String),
}

/// Resultado de un envío completado.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub analysis: RawAnalysis,
    pub record: StoredAnalysisRecord,
    pub warnings: Vec<SubmitWarning>,
}

/// Orquestador del pipeline. Se construye una vez al arrancar.
pub struct Orchestrator {
    engine: Arc<dyn AnalysisEngine>,
    store: Arc<dyn PersistenceClient>,
    timeouts: PipelineTimeouts,
    // Sólo se sustituye entera, tras una lectura completa correcta.
    history: RwLock<Vec<StoredAnalysisRecord>>,
    // Un refresco a la vez: una lectura lenta y antigua no puede pisar a una posterior.
    refresh_lock: Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        engine: Arc<dyn AnalysisEngine>,
        store: Arc<dyn PersistenceClient>,
        timeouts: PipelineTimeouts,
    ) -> Self {
        Self {
            engine,
            store,
            timeouts,
            history: RwLock::new(Vec::new()),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Ejecuta un envío de principio a fin.
    pub async fn submit(&self, request: AnalysisRequest) -> AnalystResult<SubmitOutcome> {
        validate(&request)?;
        info!("Iniciando análisis de '{}'.", request.label());

        // 1) Análisis con IA
        let analysis = match tokio::time::timeout(self.timeouts.ai, self.engine.analyze(&request)).await {
            Ok(result) => result?,
            Err(_) => return Err(AiError::Timeout(self.timeouts.ai).into()),
        };

        // 2) Subida del documento original (no fatal)
        let mut warnings = Vec::new();
        let mut document_url = None;
        if let AnalysisRequest::File { bytes, .. } = &request {
            let path = document_object_path(request.extension().as_deref());
            match with_timeout(self.timeouts.upload, self.store.upload(&path, bytes)).await {
                Ok(uploaded) => {
                    let url = self.store.public_url(&uploaded.path);
                    info!("Documento subido ({} bytes): {}", uploaded.size_bytes, url);
                    document_url = Some(url);
                }
                Err(e) => {
                    warn!("No se pudo subir '{}': {}. Se guarda el análisis sin documento.", request.label(), e);
                    warnings.push(SubmitWarning::UploadFailed(e.to_string()));
                }
            }
        }

        // 3) Inserción de la fila (fatal)
        let status = if warnings.is_empty() {
            AnalysisStatus::Completed
        } else {
            AnalysisStatus::Degraded
        };
        let mut record = StoredAnalysisRecord::from_raw(
            Uuid::new_v4().to_string(),
            &analysis,
            document_url,
            status,
            Utc::now(),
        );
        match with_timeout(self.timeouts.insert, self.store.insert(&record)).await {
            Ok(id) => record.id = id,
            Err(e) => {
                error!("Error guardando el análisis de '{}': {}", request.label(), e);
                return Err(AnalystError::Persistence(e.to_string()));
            }
        }

        // 4) Refresco completo del historial
        if let Err(e) = self.refresh().await {
            warn!("Análisis {} guardado, pero el historial no se pudo refrescar: {}", record.id, e);
            warnings.push(SubmitWarning::HistoryStale(e.to_string()));
        }

        info!("Análisis de '{}' completado ({}).", request.label(), record.status.as_str());
        Ok(SubmitOutcome {
            analysis,
            record,
            warnings,
        })
    }

    /// Vuelve a leer todas las filas y sustituye el historial en memoria.
    /// Si la lectura falla, el historial anterior se conserva intacto.
    pub async fn refresh(&self) -> AnalystResult<Vec<StoredAnalysisRecord>> {
        let _guard = self.refresh_lock.lock().await;
        let mut records = with_timeout(self.timeouts.list, self.store.list())
            .await
            .map_err(|e| AnalystError::Persistence(e.to_string()))?;
        sort_most_recent_first(&mut records);

        *self.history.write().await = records.clone();
        info!("Historial refrescado: {} análisis.", records.len());
        Ok(records)
    }

    pub async fn history(&self) -> Vec<StoredAnalysisRecord> {
        self.history.read().await.clone()
    }

    pub async fn find(&self, id: &str) -> Option<StoredAnalysisRecord> {
        self.history.read().await.iter().find(|r| r.id == id).cloned()
    }
}

/// Rechaza la entrada incompleta antes de tocar la red.
pub fn validate(request: &AnalysisRequest) -> AnalystResult<()> {
    match request {
        AnalysisRequest::File { bytes, filename } => {
            if filename.trim().is_empty() {
                return Err(AnalystError::Validation("el fichero no tiene nombre".to_string()));
            }
            if bytes.is_empty() {
                return Err(AnalystError::Validation(format!("el fichero '{filename}' está vacío")));
            }
        }
        AnalysisRequest::Text { title, body } => {
            if title.trim().is_empty() {
                return Err(AnalystError::Validation("el título está vacío".to_string()));
            }
            if body.trim().is_empty() {
                return Err(AnalystError::Validation("el texto de la idea está vacío".to_string()));
            }
        }
    }
    Ok(())
}

/// Decodifica el fichero recibido como data URL (`data:<mime>;base64,<datos>`)
/// o como base64 sin envoltorio.
pub fn decode_data_url(payload: &str) -> AnalystResult<Vec<u8>> {
    let payload = payload.trim();
    let encoded = match payload.strip_prefix("data:") {
        Some(rest) => match rest.split_once(',') {
            Some((header, data)) if header.ends_with(";base64") => data,
            _ => {
                return Err(AnalystError::Validation(
                    "el fichero debe enviarse como data URL en base64".to_string(),
                ))
            }
        },
        None => payload,
    };

    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| AnalystError::Validation(format!("contenido base64 no válido: {e}")))
}

/// Ruta aleatoria del documento: UUID v4 + extensión original.
pub fn document_object_path(extension: Option<&str>) -> String {
    match extension {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
        None => Uuid::new_v4().to_string(),
    }
}

pub fn sort_most_recent_first(records: &mut [StoredAnalysisRecord]) {
    records.sort_by(|a, b| b.analyzed_at.cmp(&a.analyzed_at));
}

async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("sin respuesta en {}s", limit.as_secs())),
    }
}
