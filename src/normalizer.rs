//! Normalizador de resultados.
//!
//! Proyecta cualquier objeto "tipo análisis" hacia `CanonicalReportView`:
//!   - la salida fresca de la IA (`RawAnalysis`),
//!   - una fila guardada (`StoredAnalysisRecord`) de cualquier versión del esquema,
//!   - JSON libre (`serde_json::Value`), incluido `null`.
//!
//! Precedencia por campo: objeto de análisis → misma clave en la raíz de la
//! fila → valor por defecto. Las claves se buscan en camelCase y snake_case.
//! Es una función pura y total: nunca falla ni hace E/S.

use serde_json::{Map, Value};

use crate::models::{
    CanonicalReportView, ConceptualFile, ConsistencyAnalysis, Criterion, Decision, Perspectives,
    RawAnalysis, ScoringMatrix, StoredAnalysisRecord, MAX_CRITERION_SCORE, MAX_VIABILITY_SCORE,
    NOT_AVAILABLE, PENDING_JUSTIFICATION,
};

/// Modelo de lectura común a las distintas formas de un análisis.
///
/// Los adaptadores sólo indican dónde está cada capa; los accesores con
/// valor por defecto hacen la coalescencia.
pub trait AnalysisLike {
    /// Clave del objeto de análisis (capa preferente).
    fn analysis_field(&self, key: &str) -> Option<&Value>;

    /// Clave en la raíz de la fila (capa de respaldo).
    fn record_field(&self, key: &str) -> Option<&Value>;

    /// Valores no nulos encontrados en `path`, por orden de precedencia.
    fn candidates(&self, path: &[&str]) -> Vec<&Value> {
        let Some((first, rest)) = path.split_first() else {
            return Vec::new();
        };
        [self.analysis_field(first), self.record_field(first)]
            .into_iter()
            .flatten()
            .filter_map(|value| descend(value, rest))
            .filter(|value| !value.is_null())
            .collect()
    }

    fn text(&self, path: &[&str]) -> Option<String> {
        self.candidates(path).into_iter().find_map(text_of)
    }

    fn title(&self) -> Option<String> {
        self.text(&["title"])
    }

    fn decision(&self) -> Option<Decision> {
        self.candidates(&["decision"])
            .into_iter()
            .find_map(|value| value.as_str().and_then(Decision::parse))
    }

    fn viability_score(&self) -> Option<u8> {
        self.candidates(&["viabilityScore"])
            .into_iter()
            .find_map(|value| score_of(value, MAX_VIABILITY_SCORE))
    }

    /// Criterio de la matriz: admite `{score, justification}` o un número suelto.
    fn criterion(&self, key: &str) -> Criterion {
        let found = self.candidates(&["scoringMatrix", key]);
        let score = found.iter().copied().find_map(|value| match value {
            Value::Object(_) => lookup(value, "score").and_then(|s| score_of(s, MAX_CRITERION_SCORE)),
            other => score_of(other, MAX_CRITERION_SCORE),
        });
        let justification = found
            .iter()
            .copied()
            .filter_map(|value| lookup(value, "justification"))
            .find_map(text_of);

        Criterion {
            score: score.unwrap_or(0),
            justification: justification.unwrap_or_else(|| PENDING_JUSTIFICATION.to_string()),
        }
    }
}

/// Proyecta cualquier análisis a la vista canónica, con todos los campos rellenos.
pub fn normalize<A: AnalysisLike + ?Sized>(source: &A) -> CanonicalReportView {
    let text = |path: &[&str]| source.text(path).unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let conceptual = |key: &str| text(&["conceptualFile", key]);
    let perspective = |key: &str| text(&["consistencyAnalysis", "perspectives", key]);

    CanonicalReportView {
        title: source.title().unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        decision: source.decision().unwrap_or_default(),
        viability_score: source.viability_score().unwrap_or(0),
        strategic_justification: text(&["strategicJustification"]),
        conceptual_file: ConceptualFile {
            problem: conceptual("problem"),
            solution: conceptual("solution"),
            target: conceptual("target"),
            business_model: conceptual("businessModel"),
            value_proposition: conceptual("valueProposition"),
            critical_risks: conceptual("criticalRisks"),
        },
        scoring_matrix: ScoringMatrix {
            problem_relevance: source.criterion("problemRelevance"),
            technical_feasibility: source.criterion("technicalFeasibility"),
            market_potential: source.criterion("marketPotential"),
            financial_viability: source.criterion("financialViability"),
            strategic_alignment: source.criterion("strategicAlignment"),
        },
        consistency_analysis: ConsistencyAnalysis {
            synthesis: text(&["consistencyAnalysis", "synthesis"]),
            perspectives: Perspectives {
                medical: perspective("medical"),
                engineering: perspective("engineering"),
                financial: perspective("financial"),
                legal: perspective("legal"),
            },
        },
    }
}

// --- Adaptadores ---

impl AnalysisLike for RawAnalysis {
    fn analysis_field(&self, key: &str) -> Option<&Value> {
        map_lookup(&self.strategic_analysis.extra, key)
    }

    fn record_field(&self, key: &str) -> Option<&Value> {
        map_lookup(&self.extra, key)
    }

    fn title(&self) -> Option<String> {
        self.text(&["title"]).or_else(|| non_blank(&self.title))
    }
}

impl AnalysisLike for StoredAnalysisRecord {
    fn analysis_field(&self, key: &str) -> Option<&Value> {
        lookup(&self.strategic_analysis, key)
    }

    fn record_field(&self, key: &str) -> Option<&Value> {
        map_lookup(&self.extra, key)
    }

    fn title(&self) -> Option<String> {
        self.text(&["title"]).or_else(|| non_blank(&self.title))
    }
}

/// JSON libre: si trae `strategic_analysis` (o `strategicAnalysis`) como
/// objeto, esa es la capa de análisis; si no, el propio objeto.
impl AnalysisLike for Value {
    fn analysis_field(&self, key: &str) -> Option<&Value> {
        let nested = lookup(self, "strategicAnalysis").filter(|v| v.is_object());
        lookup(nested.unwrap_or(self), key)
    }

    fn record_field(&self, key: &str) -> Option<&Value> {
        lookup(self, key)
    }
}

impl<T: AnalysisLike> AnalysisLike for Option<T> {
    fn analysis_field(&self, key: &str) -> Option<&Value> {
        self.as_ref().and_then(|inner| inner.analysis_field(key))
    }

    fn record_field(&self, key: &str) -> Option<&Value> {
        self.as_ref().and_then(|inner| inner.record_field(key))
    }

    fn title(&self) -> Option<String> {
        self.as_ref().and_then(T::title)
    }
}

// --- Utilidades de acceso y coerción ---

fn lookup<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.as_object().and_then(|map| map_lookup(map, key))
}

fn map_lookup<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key).or_else(|| map.get(&to_snake_case(key)))
}

fn descend<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| lookup(current, key))
}

fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_uppercase() {
            out.push('_');
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Texto mostrable: cadenas no vacías, números, o listas de cadenas unidas con "; ".
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_blank(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(text_of).collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        _ => None,
    }
}

/// Puntuación entera acotada a `[0, max]`. Acepta números y cadenas como "4" o "4/5".
fn score_of(value: &Value, max: u8) -> Option<u8> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            let end = s
                .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
                .unwrap_or(s.len());
            s[..end].parse::<f64>().ok()?
        }
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    Some(raw.round().clamp(0.0, f64::from(max)) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisStatus, StoredAnalysisRecord};
    use chrono::Utc;
    use serde_json::json;

    fn full_report() -> Value {
        json!({
            "decision": "AVANZAR",
            "viabilityScore": 19,
            "strategicJustification": "Mercado en crecimiento y equipo sólido",
            "conceptualFile": {
                "problem": "Listas de espera",
                "solution": "Triaje remoto",
                "target": "Hospitales comarcales",
                "businessModel": "SaaS por cama",
                "valueProposition": "Menos visitas innecesarias",
                "criticalRisks": ["Regulación MDR", "Integración HIS"]
            },
            "scoringMatrix": {
                "problemRelevance": {"score": 5, "justification": "Problema crítico"},
                "technicalFeasibility": {"score": 4, "justification": "Tecnología madura"},
                "marketPotential": {"score": 4, "justification": "Mercado amplio"},
                "financialViability": {"score": 3, "justification": "Ciclo de venta largo"},
                "strategicAlignment": {"score": 3, "justification": "Encaja a medias"}
            },
            "consistencyAnalysis": {
                "synthesis": "Coherente salvo en costes",
                "perspectives": {
                    "medical": "Validación clínica pendiente",
                    "engineering": "Viable",
                    "financial": "Costes subestimados",
                    "legal": "Requiere marcado CE"
                }
            }
        })
    }

    fn assert_all_defaults(view: &CanonicalReportView) {
        assert_eq!(view, &CanonicalReportView::default());
        assert_eq!(view.title, "N/A");
        assert_eq!(view.decision, Decision::Pendiente);
        assert_eq!(view.viability_score, 0);
        assert_eq!(view.conceptual_file.value_proposition, "N/A");
        assert_eq!(view.scoring_matrix.market_potential.score, 0);
        assert_eq!(view.scoring_matrix.market_potential.justification, "Pendiente");
        assert_eq!(view.consistency_analysis.perspectives.legal, "N/A");
    }

    #[test]
    fn null_and_empty_inputs_yield_every_default() {
        assert_all_defaults(&normalize(&Value::Null));
        assert_all_defaults(&normalize(&json!({})));
        assert_all_defaults(&normalize(&None::<Value>));
        assert_all_defaults(&normalize(&json!([1, 2, 3])));
        assert_all_defaults(&normalize(&json!("texto suelto")));
    }

    #[test]
    fn nested_strategic_analysis_wins_over_top_level() {
        let row = json!({
            "decision": "DESCARTAR",
            "viability_score": 3,
            "strategic_analysis": {"decision": "PIVOTAR", "viabilityScore": 14}
        });

        let view = normalize(&row);

        assert_eq!(view.decision, Decision::Pivotar);
        assert_eq!(view.viability_score, 14);
    }

    #[test]
    fn top_level_fills_what_the_analysis_object_lacks() {
        let row = json!({
            "title": "Idea heredada",
            "decision": "descartar",
            "strategic_justification": "Sin mercado",
            "strategic_analysis": {"swot": {"strengths": []}}
        });

        let view = normalize(&row);

        assert_eq!(view.title, "Idea heredada");
        assert_eq!(view.decision, Decision::Descartar);
        assert_eq!(view.strategic_justification, "Sin mercado");
    }

    #[test]
    fn unusable_nested_value_falls_back_to_the_next_layer() {
        let row = json!({
            "decision": "AVANZAR",
            "strategic_analysis": {"decision": "tal vez", "viabilityScore": "n/d"},
            "viabilityScore": 20
        });

        let view = normalize(&row);

        assert_eq!(view.decision, Decision::Avanzar);
        assert_eq!(view.viability_score, 20);
    }

    #[test]
    fn full_report_is_projected_field_by_field() {
        let view = normalize(&full_report());

        assert_eq!(view.decision, Decision::Avanzar);
        assert_eq!(view.viability_score, 19);
        assert_eq!(view.conceptual_file.critical_risks, "Regulación MDR; Integración HIS");
        assert_eq!(view.scoring_matrix.problem_relevance.score, 5);
        assert_eq!(view.scoring_matrix.financial_viability.justification, "Ciclo de venta largo");
        assert_eq!(view.consistency_analysis.perspectives.medical, "Validación clínica pendiente");
        assert_eq!(view.title, "N/A");
    }

    #[test]
    fn scores_are_clamped_and_coerced() {
        let row = json!({
            "viabilityScore": 99,
            "scoringMatrix": {
                "problemRelevance": {"score": -2},
                "technicalFeasibility": {"score": "4/5", "justification": "  "},
                "marketPotential": 3.6,
                "financialViability": {"score": 12},
                "strategicAlignment": "2"
            }
        });

        let view = normalize(&row);

        assert_eq!(view.viability_score, MAX_VIABILITY_SCORE);
        assert_eq!(view.scoring_matrix.problem_relevance.score, 0);
        assert_eq!(view.scoring_matrix.technical_feasibility.score, 4);
        assert_eq!(view.scoring_matrix.technical_feasibility.justification, "Pendiente");
        assert_eq!(view.scoring_matrix.market_potential.score, 4);
        assert_eq!(view.scoring_matrix.financial_viability.score, MAX_CRITERION_SCORE);
        assert_eq!(view.scoring_matrix.strategic_alignment.score, 2);
    }

    #[test]
    fn snake_case_legacy_keys_are_recognised() {
        let row = json!({
            "strategic_analysis": {
                "conceptual_file": {"business_model": "Licencias", "value_proposition": "Ahorro"},
                "scoring_matrix": {"market_potential": {"score": 2, "justification": "Nicho"}}
            }
        });

        let view = normalize(&row);

        assert_eq!(view.conceptual_file.business_model, "Licencias");
        assert_eq!(view.conceptual_file.value_proposition, "Ahorro");
        assert_eq!(view.scoring_matrix.market_potential.justification, "Nicho");
    }

    #[test]
    fn normalizing_is_deterministic() {
        let input = full_report();
        assert_eq!(normalize(&input), normalize(&input));
    }

    #[test]
    fn raw_to_stored_round_trip_preserves_report_fields() {
        let mut raw_json = full_report();
        raw_json["title"] = json!("Triaje remoto");
        raw_json["strategicAnalysis"] = json!({"swot": {"threats": ["competencia"]}});
        let raw: RawAnalysis = serde_json::from_value(raw_json).unwrap();

        let record = StoredAnalysisRecord::from_raw(
            "id".to_string(),
            &raw,
            None,
            AnalysisStatus::Completed,
            Utc::now(),
        );

        let from_raw = normalize(&raw);
        let from_record = normalize(&record);

        assert_eq!(from_record, from_raw);
        assert_eq!(from_record.title, "Triaje remoto");
        assert_eq!(from_record.decision, Decision::Avanzar);
        assert_eq!(from_record.scoring_matrix.problem_relevance.score, 5);
        assert_eq!(from_record.conceptual_file.solution, "Triaje remoto");
    }

    #[test]
    fn round_trip_of_a_bare_analysis_gives_defaults() {
        let raw = RawAnalysis {
            title: "Sólo título".to_string(),
            ..Default::default()
        };
        let record = StoredAnalysisRecord::from_raw(
            "id".to_string(),
            &raw,
            None,
            AnalysisStatus::Completed,
            Utc::now(),
        );

        let view = normalize(&record);

        assert_eq!(view.title, "Sólo título");
        assert_eq!(view.decision, Decision::Pendiente);
        assert_eq!(view.scoring_matrix, ScoringMatrix::default());
        assert_eq!(view.conceptual_file, ConceptualFile::default());
    }

    #[test]
    fn legacy_record_with_string_strategic_analysis_never_fails() {
        let record = StoredAnalysisRecord {
            id: "old".to_string(),
            title: String::new(),
            original_document_url: None,
            executive_summary: "antiguo".to_string(),
            strategic_analysis: json!("texto plano de una versión anterior"),
            risks_and_mitigation: Value::Null,
            resource_projections: Value::Null,
            status: AnalysisStatus::Completed,
            analyzed_at: Utc::now(),
            extra: json!({"decision": "AVANZAR"}).as_object().cloned().unwrap(),
        };

        let view = normalize(&record);

        assert_eq!(view.title, "N/A");
        assert_eq!(view.decision, Decision::Avanzar);
        assert_eq!(view.viability_score, 0);
    }
}
