//! Abstracción sobre Rig para pedir el análisis estratégico de una idea.
//! Se implementan OpenAI y Gemini; Ollama se acepta en la configuración pero
//! se rechaza al construir el gestor.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use mime_guess::mime;
use rig::completion::Prompt;
use tracing::{info, warn};

use crate::{
    config::{AppConfig, LlmProvider},
    error::AiError,
    models::{AnalysisRequest, RawAnalysis},
};

/// Límite de caracteres del documento que se envían al modelo.
const MAX_DOCUMENT_CHARS: usize = 120_000;

const ANALYSIS_PREAMBLE: &str = r#"
Eres un analista estratégico de innovación. Evalúas ideas y propuestas con rigor
desde cuatro perspectivas: médica, de ingeniería, financiera y legal.

Aplica un análisis DAFO (fortalezas, debilidades, oportunidades, amenazas) e
identifica de forma explícita las incoherencias del documento y los huecos de
información que impiden una evaluación completa.

La salida DEBE ser un único objeto JSON válido con exactamente esta estructura:
{
  "title": "título breve de la idea",
  "executiveSummary": "resumen ejecutivo",
  "decision": "AVANZAR | PIVOTAR | DESCARTAR",
  "viabilityScore": 0,
  "strategicJustification": "por qué esa decisión",
  "conceptualFile": {
    "problem": "", "solution": "", "target": "",
    "businessModel": "", "valueProposition": "", "criticalRisks": ""
  },
  "scoringMatrix": {
    "problemRelevance": {"score": 0, "justification": ""},
    "technicalFeasibility": {"score": 0, "justification": ""},
    "marketPotential": {"score": 0, "justification": ""},
    "financialViability": {"score": 0, "justification": ""},
    "strategicAlignment": {"score": 0, "justification": ""}
  },
  "consistencyAnalysis": {
    "synthesis": "",
    "perspectives": {"medical": "", "engineering": "", "financial": "", "legal": ""}
  },
  "strategicAnalysis": {
    "swot": {"strengths": [], "weaknesses": [], "opportunities": [], "threats": []},
    "viability": "",
    "strategicAlignment": ""
  },
  "functionalGaps": ["hueco de información o incoherencia detectada"],
  "kpis": [{"name": "", "value": ""}],
  "conclusions": [""]
}

Cada criterio de "scoringMatrix" se puntúa de 0 a 5 y "viabilityScore" es la suma
de los cinco (0 a 25). Responde en español. No incluyas explicaciones, solo el JSON.
"#;

/// Colaborador de IA: recibe la petición y devuelve el análisis estructurado.
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<RawAnalysis, AiError>;
}

/// Gestor del modelo de chat, construido explícitamente a partir de la configuración.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub chat_model: String,
    api_key: String,
}

impl LlmManager {
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        if cfg.llm_provider == LlmProvider::Ollama {
            return Err(anyhow!(
                "El proveedor LLM {:?} aún no está implementado para análisis",
                cfg.llm_provider
            ));
        }
        if cfg.llm_api_key.trim().is_empty() {
            return Err(anyhow!("La clave del proveedor LLM está vacía"));
        }
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            api_key: cfg.llm_api_key.clone(),
        })
    }

    async fn complete(&self, prompt: &str) -> Result<String, AiError> {
        use rig::client::CompletionClient as _;

        let response = match self.provider {
            LlmProvider::OpenAI => {
                use rig::providers::openai;
                let client = openai::Client::new(&self.api_key);
                let agent = client.agent(&self.chat_model).preamble(ANALYSIS_PREAMBLE).build();
                agent.prompt(prompt).await
            }
            LlmProvider::Gemini => {
                use rig::providers::gemini;
                let client = gemini::Client::new(&self.api_key);
                let agent = client.agent(&self.chat_model).preamble(ANALYSIS_PREAMBLE).build();
                agent.prompt(prompt).await
            }
            ref other => {
                return Err(AiError::Provider(format!(
                    "Proveedor LLM {:?} aún no implementado para análisis",
                    other
                )))
            }
        };

        response.map_err(|e| AiError::Provider(e.to_string()))
    }
}

#[async_trait]
impl AnalysisEngine for LlmManager {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<RawAnalysis, AiError> {
        let prompt = build_user_prompt(request).await?;
        info!(
            "Solicitando análisis de '{}' a {:?} ({})",
            request.label(),
            self.provider,
            self.chat_model
        );
        let response = self.complete(&prompt).await?;
        parse_analysis_response(&response)
    }
}

/// Mensaje de usuario: el texto del documento o el título y la descripción.
pub async fn build_user_prompt(request: &AnalysisRequest) -> Result<String, AiError> {
    match request {
        AnalysisRequest::File { bytes, filename } => {
            let text = extract_document_text(bytes, filename).await?;
            Ok(format!("Documento: {filename}\n\n{text}"))
        }
        AnalysisRequest::Text { title, body } => {
            if body.trim().is_empty() {
                return Err(AiError::EmptyContent);
            }
            Ok(format!("Título de la idea: {}\n\nDescripción:\n{}", title.trim(), body.trim()))
        }
    }
}

/// Extrae el texto de un PDF o de un fichero de texto; el resto de tipos se rechaza.
async fn extract_document_text(bytes: &[u8], filename: &str) -> Result<String, AiError> {
    let guessed = mime_guess::from_path(filename).first_or_octet_stream();

    let text = if guessed.subtype() == mime::PDF {
        extract_pdf_text(bytes.to_vec(), filename).await?
    } else if guessed.type_() == mime::TEXT
        || guessed.subtype() == mime::JSON
        || guessed.subtype() == mime::XML
    {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        return Err(AiError::UnsupportedDocument(format!("{filename} ({guessed})")));
    };

    let text = text.trim();
    if text.is_empty() {
        return Err(AiError::EmptyContent);
    }

    if text.chars().count() > MAX_DOCUMENT_CHARS {
        warn!(
            "Documento '{}' truncado a {} caracteres para el análisis.",
            filename, MAX_DOCUMENT_CHARS
        );
        return Ok(text.chars().take(MAX_DOCUMENT_CHARS).collect());
    }
    Ok(text.to_string())
}

/// `pdf-extract` es síncrono y costoso: corre en el pool bloqueante para que
/// el timeout de la IA pueda cortar la espera.
async fn extract_pdf_text(bytes: Vec<u8>, filename: &str) -> Result<String, AiError> {
    let extracted = tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem(&bytes).map_err(|e| e.to_string())
    })
    .await;

    match extracted {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(AiError::UnsupportedDocument(format!("{filename}: {e}"))),
        Err(join_err) => {
            warn!("La extracción del PDF '{}' terminó de forma inesperada: {}", filename, join_err);
            Err(AiError::UnsupportedDocument(format!("{filename}: PDF ilegible")))
        }
    }
}

/// Convierte la respuesta del modelo en `RawAnalysis`.
///
/// Primero se intenta el texto tal cual; si falla, se quitan las vallas de
/// markdown (```json ... ```) y se reintenta una vez.
pub fn parse_analysis_response(response: &str) -> Result<RawAnalysis, AiError> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(AiError::EmptyResponse);
    }

    let first_error = match serde_json::from_str::<RawAnalysis>(trimmed) {
        Ok(analysis) => return Ok(analysis),
        Err(e) => e,
    };

    let unfenced = strip_code_fences(trimmed);
    serde_json::from_str::<RawAnalysis>(unfenced).map_err(|e| {
        warn!(
            "No se pudo parsear el JSON del análisis. Error: {}. Respuesta LLM: '{}'",
            first_error, response
        );
        AiError::MalformedResponse(e.to_string())
    })
}

/// Quita la primera valla de código (con o sin etiqueta `json`) y su cierre.
fn strip_code_fences(text: &str) -> &str {
    let Some(start) = text.find("```") else {
        return text;
    };
    let after = &text[start + 3..];
    let after = after
        .strip_prefix("json")
        .or_else(|| after.strip_prefix("JSON"))
        .unwrap_or(after);
    let body = match after.rfind("```") {
        Some(end) => &after[..end],
        None => after,
    };
    body.trim()
}
