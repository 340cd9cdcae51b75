//! Colaborador de persistencia: documentos originales y filas de análisis.
//!
//! API pública:
//!   - `PersistenceClient` (subir, URL pública, insertar, listar).
//!   - `DocumentBucket`: bucket de documentos en disco, servido en `/storage`.
//!   - `Neo4jPersistence`: filas `:Analysis` en Neo4j + `DocumentBucket`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use neo4rs::{query, Graph, Node};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};
use url::Url;

use crate::config::AppConfig;
use crate::models::{AnalysisStatus, StoredAnalysisRecord};

/// Ruta HTTP bajo la que se sirve el directorio de almacenamiento.
pub const PUBLIC_STORAGE_ROUTE: &str = "/storage";

/// Propiedades de `:Analysis` con columna propia; el resto va a `extra`.
const KNOWN_COLUMNS: [&str; 10] = [
    "id",
    "title",
    "original_document_url",
    "executive_summary",
    "strategic_analysis",
    "risks_and_mitigation",
    "resource_projections",
    "extra_fields",
    "status",
    "analyzed_at",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedObject {
    pub path: String,
    pub size_bytes: u64,
}

/// Operaciones atómicas de red; no hay transacción entre llamadas.
#[async_trait]
pub trait PersistenceClient: Send + Sync {
    /// Guarda `bytes` en `path` dentro del bucket de documentos.
    async fn upload(&self, path: &str, bytes: &[u8]) -> Result<UploadedObject>;

    /// URL pública de un objeto del bucket.
    fn public_url(&self, path: &str) -> String;

    /// Inserta la fila y devuelve su identificador.
    async fn insert(&self, record: &StoredAnalysisRecord) -> Result<String>;

    /// Todas las filas, de la más reciente a la más antigua.
    async fn list(&self) -> Result<Vec<StoredAnalysisRecord>>;
}

// --- Bucket de documentos ---

#[derive(Debug, Clone)]
pub struct DocumentBucket {
    root: PathBuf,
    bucket: String,
    public_base_url: Url,
}

impl DocumentBucket {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>, mut public_base_url: Url) -> Self {
        // Sin barra final, `Url::join` sustituiría el último segmento.
        if !public_base_url.path().ends_with('/') {
            let path = format!("{}/", public_base_url.path());
            public_base_url.set_path(&path);
        }
        Self {
            root: root.into(),
            bucket: bucket.into(),
            public_base_url,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.storage_dir.clone(),
            cfg.documents_bucket.clone(),
            cfg.public_base_url.clone(),
        )
    }

    /// Directorio raíz que se sirve en `PUBLIC_STORAGE_ROUTE`.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, path: &str) -> Result<PathBuf> {
        let valid = !path.is_empty()
            && !path.starts_with('/')
            && !path.contains('\\')
            && path
                .split('/')
                .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
        if !valid {
            return Err(anyhow!("Ruta de objeto no válida: '{path}'"));
        }
        Ok(self.root.join(&self.bucket).join(path))
    }

    pub async fn write(&self, path: &str, bytes: &[u8]) -> Result<UploadedObject> {
        let target = self.object_path(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("No se pudo crear {}", parent.display()))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .with_context(|| format!("No se pudo escribir {}", target.display()))?;

        Ok(UploadedObject {
            path: path.to_string(),
            size_bytes: bytes.len() as u64,
        })
    }

    pub fn public_url(&self, path: &str) -> String {
        let relative = format!(
            "{}/{}/{}",
            PUBLIC_STORAGE_ROUTE.trim_start_matches('/'),
            self.bucket,
            path
        );
        match self.public_base_url.join(&relative) {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}{}", self.public_base_url, relative),
        }
    }
}

// --- Neo4j ---

/// Filas `:Analysis` en Neo4j. Las columnas anidadas se guardan como JSON en texto.
#[derive(Clone)]
pub struct Neo4jPersistence {
    graph: Arc<Graph>,
    documents: DocumentBucket,
}

impl Neo4jPersistence {
    pub fn new(graph: Arc<Graph>, documents: DocumentBucket) -> Self {
        Self { graph, documents }
    }
}

#[async_trait]
impl PersistenceClient for Neo4jPersistence {
    async fn upload(&self, path: &str, bytes: &[u8]) -> Result<UploadedObject> {
        self.documents.write(path, bytes).await
    }

    fn public_url(&self, path: &str) -> String {
        self.documents.public_url(path)
    }

    async fn insert(&self, record: &StoredAnalysisRecord) -> Result<String> {
        let extra_fields = Value::Object(record.extra.clone());

        self.graph
            .run(
                query(
                    "CREATE (a:Analysis {id: $id})
                     SET a.title = $title,
                         a.original_document_url = CASE WHEN $document_url = '' THEN null ELSE $document_url END,
                         a.executive_summary = $executive_summary,
                         a.strategic_analysis = $strategic_analysis,
                         a.risks_and_mitigation = $risks_and_mitigation,
                         a.resource_projections = $resource_projections,
                         a.extra_fields = $extra_fields,
                         a.status = $status,
                         a.analyzed_at = datetime($analyzed_at)",
                )
                .param("id", record.id.clone())
                .param("title", record.title.clone())
                .param("document_url", record.original_document_url.clone().unwrap_or_default())
                .param("executive_summary", record.executive_summary.clone())
                .param("strategic_analysis", serde_json::to_string(&record.strategic_analysis)?)
                .param("risks_and_mitigation", serde_json::to_string(&record.risks_and_mitigation)?)
                .param("resource_projections", serde_json::to_string(&record.resource_projections)?)
                .param("extra_fields", serde_json::to_string(&extra_fields)?)
                .param("status", record.status.as_str())
                .param("analyzed_at", record.analyzed_at.to_rfc3339()),
            )
            .await?;

        info!("Análisis {} guardado en Neo4j.", record.id);
        Ok(record.id.clone())
    }

    async fn list(&self) -> Result<Vec<StoredAnalysisRecord>> {
        let mut cursor = self
            .graph
            .execute(query(
                "MATCH (a:Analysis)
                 RETURN a.id AS id, a.title AS title,
                        a.original_document_url AS original_document_url,
                        a.executive_summary AS executive_summary,
                        a.strategic_analysis AS strategic_analysis,
                        a.risks_and_mitigation AS risks_and_mitigation,
                        a.resource_projections AS resource_projections,
                        a.extra_fields AS extra_fields,
                        a.status AS status,
                        toString(a.analyzed_at) AS analyzed_at,
                        a AS node, keys(a) AS keys
                 ORDER BY a.analyzed_at DESC",
            ))
            .await?;

        let mut records = Vec::new();
        while let Some(row) = cursor.next().await? {
            let Some(id) = row.get::<String>("id") else {
                warn!("Fila :Analysis sin 'id' ignorada.");
                continue;
            };
            let legacy = match (row.get::<Node>("node"), row.get::<Vec<String>>("keys")) {
                (Some(node), Some(keys)) => legacy_properties(&node, &keys),
                _ => Map::new(),
            };
            records.push(record_from_columns(RecordColumns {
                id,
                title: row.get("title"),
                original_document_url: row.get("original_document_url"),
                executive_summary: row.get("executive_summary"),
                strategic_analysis: row.get("strategic_analysis"),
                risks_and_mitigation: row.get("risks_and_mitigation"),
                resource_projections: row.get("resource_projections"),
                extra_fields: row.get("extra_fields"),
                status: row.get("status"),
                analyzed_at: row.get("analyzed_at"),
                legacy,
            }));
        }

        Ok(records)
    }
}

/// Columnas crudas de una fila; cualquiera puede faltar en filas antiguas.
#[derive(Debug, Default)]
struct RecordColumns {
    id: String,
    title: Option<String>,
    original_document_url: Option<String>,
    executive_summary: Option<String>,
    strategic_analysis: Option<String>,
    risks_and_mitigation: Option<String>,
    resource_projections: Option<String>,
    extra_fields: Option<String>,
    status: Option<String>,
    analyzed_at: Option<String>,
    /// Propiedades del nodo sin columna propia (filas de versiones anteriores).
    legacy: Map<String, Value>,
}

fn record_from_columns(columns: RecordColumns) -> StoredAnalysisRecord {
    // `extra_fields` lo escribe esta versión: pisa a las propiedades sueltas.
    let mut extra = columns.legacy;
    if let Value::Object(map) = json_column(columns.extra_fields) {
        extra.extend(map);
    }

    StoredAnalysisRecord {
        title: columns.title.unwrap_or_default(),
        original_document_url: columns.original_document_url.filter(|url| !url.is_empty()),
        executive_summary: columns.executive_summary.unwrap_or_default(),
        strategic_analysis: json_column(columns.strategic_analysis),
        risks_and_mitigation: json_column(columns.risks_and_mitigation),
        resource_projections: json_column(columns.resource_projections),
        status: columns
            .status
            .as_deref()
            .map(AnalysisStatus::parse)
            .unwrap_or_default(),
        analyzed_at: parse_timestamp(&columns.id, columns.analyzed_at.as_deref()),
        id: columns.id,
        extra,
    }
}

/// Propiedades del nodo que no son columnas conocidas, convertidas a JSON.
fn legacy_properties(node: &Node, keys: &[String]) -> Map<String, Value> {
    keys.iter()
        .filter(|key| !KNOWN_COLUMNS.contains(&key.as_str()))
        .filter_map(|key| match property_value(node, key) {
            Some(value) => Some((key.clone(), value)),
            None => {
                warn!("Propiedad '{}' de tipo no soportado ignorada.", key);
                None
            }
        })
        .collect()
}

fn property_value(node: &Node, key: &str) -> Option<Value> {
    node.get::<String>(key)
        .map(|text| json_column(Some(text)))
        .or_else(|| node.get::<i64>(key).map(Value::from))
        .or_else(|| node.get::<f64>(key).map(Value::from))
        .or_else(|| node.get::<bool>(key).map(Value::from))
        .or_else(|| {
            node.get::<DateTime<FixedOffset>>(key)
                .map(|dt| Value::String(dt.to_rfc3339()))
        })
        .or_else(|| node.get::<Vec<String>>(key).map(Value::from))
        .or_else(|| node.get::<Vec<i64>>(key).map(Value::from))
        .or_else(|| node.get::<Vec<f64>>(key).map(Value::from))
        .or_else(|| node.get::<Vec<bool>>(key).map(Value::from))
}

/// JSON guardado como texto. El texto que no es JSON (filas antiguas) se conserva como cadena.
fn json_column(raw: Option<String>) -> Value {
    match raw {
        Some(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        None => Value::Null,
    }
}

fn parse_timestamp(id: &str, raw: Option<&str>) -> DateTime<Utc> {
    // Neo4j puede añadir la zona con nombre: "2024-05-01T10:00:00Z[UTC]".
    let parsed = raw
        .map(|s| s.split('[').next().unwrap_or(s))
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    parsed.unwrap_or_else(|| {
        warn!("Fecha de análisis no válida en {id}: {:?}", raw);
        DateTime::<Utc>::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn bucket(root: &Path, base: &str) -> DocumentBucket {
        DocumentBucket::new(root, "documents", Url::parse(base).unwrap())
    }

    #[tokio::test]
    async fn writes_objects_under_the_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let documents = bucket(dir.path(), "http://127.0.0.1:3322");

        let uploaded = assert_ok!(documents.write("abc/propuesta.pdf", b"%PDF-1.4").await);

        assert_eq!(uploaded.size_bytes, 8);
        let stored = std::fs::read(dir.path().join("documents/abc/propuesta.pdf")).unwrap();
        assert_eq!(stored, b"%PDF-1.4");
    }

    #[tokio::test]
    async fn rejects_paths_that_escape_the_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let documents = bucket(dir.path(), "http://127.0.0.1:3322");

        for path in ["../fuera.pdf", "/etc/passwd", "a//b.pdf", "", "a\\b.pdf", "./x.pdf"] {
            assert_err!(documents.write(path, b"x").await, "{path}");
        }
    }

    #[test]
    fn public_urls_point_at_the_storage_route() {
        let dir = Path::new("/tmp/no-usado");
        assert_eq!(
            bucket(dir, "http://127.0.0.1:3322").public_url("f.pdf"),
            "http://127.0.0.1:3322/storage/documents/f.pdf"
        );
        assert_eq!(
            bucket(dir, "https://ideas.example.com/analista").public_url("f.pdf"),
            "https://ideas.example.com/analista/storage/documents/f.pdf"
        );
    }

    #[test]
    fn current_rows_are_read_back_faithfully() {
        let record = record_from_columns(RecordColumns {
            id: "a1".to_string(),
            title: Some("Triaje".to_string()),
            original_document_url: Some("http://h/storage/documents/x.pdf".to_string()),
            executive_summary: Some("Resumen".to_string()),
            strategic_analysis: Some(r#"{"decision":"AVANZAR"}"#.to_string()),
            risks_and_mitigation: Some(r#"{"functionalGaps":["precios"]}"#.to_string()),
            resource_projections: Some(r#"{"kpis":[]}"#.to_string()),
            extra_fields: Some("{}".to_string()),
            status: Some("degraded".to_string()),
            analyzed_at: Some("2025-03-01T09:30:00.123Z".to_string()),
            legacy: Map::new(),
        });

        assert_eq!(record.strategic_analysis, json!({"decision": "AVANZAR"}));
        assert_eq!(record.risks_and_mitigation["functionalGaps"], json!(["precios"]));
        assert_eq!(record.status, AnalysisStatus::Degraded);
        assert_eq!(record.analyzed_at.to_rfc3339(), "2025-03-01T09:30:00.123+00:00");
        assert!(record.extra.is_empty());
    }

    #[test]
    fn legacy_rows_fall_back_to_defaults() {
        let record = record_from_columns(RecordColumns {
            id: "viejo".to_string(),
            strategic_analysis: Some("texto libre de la v1".to_string()),
            extra_fields: Some(r#"{"decision":"PIVOTAR"}"#.to_string()),
            original_document_url: Some(String::new()),
            analyzed_at: Some("2024-05-01T10:00:00Z[UTC]".to_string()),
            ..Default::default()
        });

        assert_eq!(record.strategic_analysis, json!("texto libre de la v1"));
        assert_eq!(record.risks_and_mitigation, Value::Null);
        assert_eq!(record.extra.get("decision"), Some(&json!("PIVOTAR")));
        assert_eq!(record.status, AnalysisStatus::Pending);
        assert!(record.original_document_url.is_none());
        assert_eq!(record.analyzed_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");

        let undated = record_from_columns(RecordColumns {
            id: "sin-fecha".to_string(),
            ..Default::default()
        });
        assert_eq!(undated.analyzed_at, DateTime::<Utc>::default());
    }

    #[test]
    fn stray_node_properties_reach_the_report() {
        let mut legacy = Map::new();
        legacy.insert("decision".to_string(), json!("AVANZAR"));
        legacy.insert("viability_score".to_string(), json!(18));
        legacy.insert("origen".to_string(), json!("hoja de cálculo"));

        let record = record_from_columns(RecordColumns {
            id: "x".to_string(),
            extra_fields: Some(r#"{"origen":"formulario"}"#.to_string()),
            analyzed_at: Some("2024-05-01T10:00:00Z".to_string()),
            legacy,
            ..Default::default()
        });

        assert_eq!(record.strategic_analysis, Value::Null);
        assert_eq!(record.extra.get("decision"), Some(&json!("AVANZAR")));
        assert_eq!(record.extra.get("origen"), Some(&json!("formulario")));

        let report = crate::normalizer::normalize(&record);
        assert_eq!(report.decision, crate::models::Decision::Avanzar);
        assert_eq!(report.viability_score, 18);
    }
}
