//! Modelos de dominio: peticiones de análisis, salida de la IA, filas
//! persistidas y la vista canónica del informe.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

/// Texto por defecto para cualquier campo libre ausente.
pub const NOT_AVAILABLE: &str = "N/A";
/// Justificación por defecto de los criterios de la matriz.
pub const PENDING_JUSTIFICATION: &str = "Pendiente";
pub const MAX_CRITERION_SCORE: u8 = 5;
/// Cinco criterios de 0 a 5.
pub const MAX_VIABILITY_SCORE: u8 = 25;

// --- Entrada ---

/// Petición de análisis. Se construye al enviar y se descarta al terminar el pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisRequest {
    File { bytes: Vec<u8>, filename: String },
    Text { title: String, body: String },
}

impl AnalysisRequest {
    /// Nombre legible para logs: el fichero o el título.
    pub fn label(&self) -> &str {
        match self {
            Self::File { filename, .. } => filename,
            Self::Text { title, .. } => title,
        }
    }

    /// Extensión original del fichero, en minúsculas. `None` para texto.
    pub fn extension(&self) -> Option<String> {
        match self {
            Self::File { filename, .. } => Path::new(filename)
                .extension()
                .and_then(std::ffi::OsStr::to_str)
                .filter(|ext| !ext.is_empty())
                .map(str::to_lowercase),
            Self::Text { .. } => None,
        }
    }
}

// --- Salida de la IA ---

/// Acepta `null` como valor por defecto: la IA no siempre omite los campos vacíos.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Análisis estructurado tal y como lo devuelve el modelo.
///
/// Los campos del informe que no forman parte del esquema base (decisión,
/// matriz de puntuación, ficha conceptual...) se conservan en `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAnalysis {
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub executive_summary: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub strategic_analysis: StrategicAnalysis,
    #[serde(default, deserialize_with = "null_as_default")]
    pub functional_gaps: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub kpis: Vec<Kpi>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub conclusions: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategicAnalysis {
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub swot: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub viability: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub strategic_alignment: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kpi {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

// --- Persistencia ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Completed,
    #[default]
    Pending,
    Failed,
    /// Análisis guardado sin el documento original (falló la subida).
    Degraded,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Pending => "pending",
            Self::Failed => "failed",
            Self::Degraded => "degraded",
        }
    }

    /// Interpreta el estado guardado. Los valores desconocidos quedan como `Pending`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "degraded" => Self::Degraded,
            _ => Self::Pending,
        }
    }
}

/// Fila persistida de un análisis. Inmutable tras la inserción.
///
/// `strategic_analysis` es opaco: su forma cambia entre versiones del esquema.
/// Las columnas heredadas que no reconocemos se guardan en `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAnalysisRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub original_document_url: Option<String>,
    #[serde(default)]
    pub executive_summary: String,
    #[serde(default)]
    pub strategic_analysis: Value,
    #[serde(default)]
    pub risks_and_mitigation: Value,
    #[serde(default)]
    pub resource_projections: Value,
    #[serde(default)]
    pub status: AnalysisStatus,
    pub analyzed_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StoredAnalysisRecord {
    /// Construye la fila a partir de la salida de la IA.
    ///
    /// Los campos del informe que la IA dejó en la raíz se pliegan dentro de
    /// `strategic_analysis`; si la misma clave existe anidada, gana la anidada.
    pub fn from_raw(
        id: String,
        raw: &RawAnalysis,
        original_document_url: Option<String>,
        status: AnalysisStatus,
        analyzed_at: DateTime<Utc>,
    ) -> Self {
        let mut strategic = match serde_json::to_value(&raw.strategic_analysis) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for (key, value) in &raw.extra {
            strategic.entry(key.clone()).or_insert_with(|| value.clone());
        }
        if !raw.conclusions.is_empty() {
            strategic
                .entry("conclusions")
                .or_insert_with(|| json!(raw.conclusions));
        }

        Self {
            id,
            title: raw.title.clone(),
            original_document_url,
            executive_summary: raw.executive_summary.clone(),
            strategic_analysis: Value::Object(strategic),
            risks_and_mitigation: json!({ "functionalGaps": raw.functional_gaps }),
            resource_projections: json!({ "kpis": raw.kpis }),
            status,
            analyzed_at,
            extra: Map::new(),
        }
    }
}

// --- Vista canónica ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Avanzar,
    Pivotar,
    Descartar,
    #[default]
    Pendiente,
}

impl Decision {
    /// Interpreta una decisión escrita por la IA o guardada en una fila antigua.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "AVANZAR" | "ADVANCE" | "GO" => Some(Self::Avanzar),
            "PIVOTAR" | "PIVOT" => Some(Self::Pivotar),
            "DESCARTAR" | "DISCARD" | "KILL" => Some(Self::Descartar),
            "PENDIENTE" | "PENDING" => Some(Self::Pendiente),
            _ => None,
        }
    }
}

/// Modelo listo para mostrar. Todos los campos tienen valor por defecto.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalReportView {
    pub title: String,
    pub decision: Decision,
    pub viability_score: u8,
    pub strategic_justification: String,
    pub conceptual_file: ConceptualFile,
    pub scoring_matrix: ScoringMatrix,
    pub consistency_analysis: ConsistencyAnalysis,
}

impl Default for CanonicalReportView {
    fn default() -> Self {
        Self {
            title: NOT_AVAILABLE.to_string(),
            decision: Decision::Pendiente,
            viability_score: 0,
            strategic_justification: NOT_AVAILABLE.to_string(),
            conceptual_file: ConceptualFile::default(),
            scoring_matrix: ScoringMatrix::default(),
            consistency_analysis: ConsistencyAnalysis::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptualFile {
    pub problem: String,
    pub solution: String,
    pub target: String,
    pub business_model: String,
    pub value_proposition: String,
    pub critical_risks: String,
}

impl Default for ConceptualFile {
    fn default() -> Self {
        Self {
            problem: NOT_AVAILABLE.to_string(),
            solution: NOT_AVAILABLE.to_string(),
            target: NOT_AVAILABLE.to_string(),
            business_model: NOT_AVAILABLE.to_string(),
            value_proposition: NOT_AVAILABLE.to_string(),
            critical_risks: NOT_AVAILABLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub score: u8,
    pub justification: String,
}

impl Default for Criterion {
    fn default() -> Self {
        Self {
            score: 0,
            justification: PENDING_JUSTIFICATION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringMatrix {
    pub problem_relevance: Criterion,
    pub technical_feasibility: Criterion,
    pub market_potential: Criterion,
    pub financial_viability: Criterion,
    pub strategic_alignment: Criterion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyAnalysis {
    pub synthesis: String,
    pub perspectives: Perspectives,
}

impl Default for ConsistencyAnalysis {
    fn default() -> Self {
        Self {
            synthesis: NOT_AVAILABLE.to_string(),
            perspectives: Perspectives::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Perspectives {
    pub medical: String,
    pub engineering: String,
    pub financial: String,
    pub legal: String,
}

impl Default for Perspectives {
    fn default() -> Self {
        Self {
            medical: NOT_AVAILABLE.to_string(),
            engineering: NOT_AVAILABLE.to_string(),
            financial: NOT_AVAILABLE.to_string(),
            legal: NOT_AVAILABLE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_analysis_tolerates_nulls_and_missing_fields() {
        let raw: RawAnalysis = serde_json::from_str(
            r#"{"title": "Idea", "functionalGaps": null, "kpis": [{"name": "CAC", "value": 12}]}"#,
        )
        .unwrap();

        assert_eq!(raw.title, "Idea");
        assert!(raw.functional_gaps.is_empty());
        assert_eq!(raw.kpis[0].value, json!(12));
        assert!(raw.executive_summary.is_empty());
    }

    #[test]
    fn raw_analysis_keeps_report_fields_in_extra() {
        let raw: RawAnalysis = serde_json::from_str(
            r#"{"title": "Idea", "decision": "AVANZAR", "strategicAnalysis": {"swot": {}, "viabilityScore": 18}}"#,
        )
        .unwrap();

        assert_eq!(raw.extra.get("decision"), Some(&json!("AVANZAR")));
        assert_eq!(raw.strategic_analysis.extra.get("viabilityScore"), Some(&json!(18)));
    }

    #[test]
    fn record_from_raw_maps_gaps_kpis_and_folds_report_fields() {
        let raw: RawAnalysis = serde_json::from_value(json!({
            "title": "Plataforma de telemedicina",
            "executiveSummary": "Resumen",
            "strategicAnalysis": {"swot": {"strengths": ["equipo"]}, "decision": "PIVOTAR"},
            "functionalGaps": ["integración HIS"],
            "kpis": [{"name": "MAU", "value": "10k"}],
            "conclusions": ["validar con pilotos"],
            "decision": "AVANZAR",
            "scoringMatrix": {"marketPotential": {"score": 4, "justification": "amplio"}}
        }))
        .unwrap();

        let record = StoredAnalysisRecord::from_raw(
            "id-1".to_string(),
            &raw,
            None,
            AnalysisStatus::Completed,
            Utc::now(),
        );

        assert_eq!(record.risks_and_mitigation, json!({"functionalGaps": ["integración HIS"]}));
        assert_eq!(record.resource_projections, json!({"kpis": [{"name": "MAU", "value": "10k"}]}));
        assert_eq!(record.strategic_analysis["decision"], json!("PIVOTAR"));
        assert_eq!(record.strategic_analysis["scoringMatrix"]["marketPotential"]["score"], json!(4));
        assert_eq!(record.strategic_analysis["conclusions"], json!(["validar con pilotos"]));
        assert_eq!(record.status, AnalysisStatus::Completed);
        assert!(record.original_document_url.is_none());
    }

    #[test]
    fn request_extension_is_lowercase_and_optional() {
        let file = AnalysisRequest::File {
            bytes: vec![1],
            filename: "Propuesta.PDF".to_string(),
        };
        let bare = AnalysisRequest::File {
            bytes: vec![1],
            filename: "README".to_string(),
        };
        let text = AnalysisRequest::Text {
            title: "t".to_string(),
            body: "b".to_string(),
        };

        assert_eq!(file.extension().as_deref(), Some("pdf"));
        assert_eq!(bare.extension(), None);
        assert_eq!(text.extension(), None);
    }

    #[test]
    fn status_and_decision_parsing_is_lenient() {
        assert_eq!(AnalysisStatus::parse("COMPLETED"), AnalysisStatus::Completed);
        assert_eq!(AnalysisStatus::parse("archived"), AnalysisStatus::Pending);
        assert_eq!(Decision::parse(" avanzar "), Some(Decision::Avanzar));
        assert_eq!(Decision::parse("pivot"), Some(Decision::Pivotar));
        assert_eq!(Decision::parse("quizás"), None);
    }

    #[test]
    fn default_view_serializes_with_camel_case_and_uppercase_decision() {
        let value = serde_json::to_value(CanonicalReportView::default()).unwrap();

        assert_eq!(value["decision"], json!("PENDIENTE"));
        assert_eq!(value["viabilityScore"], json!(0));
        assert_eq!(value["conceptualFile"]["businessModel"], json!("N/A"));
        assert_eq!(value["scoringMatrix"]["technicalFeasibility"]["justification"], json!("Pendiente"));
    }
}
