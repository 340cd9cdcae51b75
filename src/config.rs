//! Carga y gestión de configuración de la aplicación (Neo4j + LLM + almacenamiento).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }

    fn default_chat_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Gemini => "gemini-2.0-flash",
            Self::Ollama => "llama3.1",
        }
    }

    fn api_key_var(&self) -> Option<&'static str> {
        match self {
            Self::OpenAI => Some("OPENAI_API_KEY"),
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::Ollama => None,
        }
    }
}

/// Tiempos máximos de cada llamada externa del pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineTimeouts {
    pub ai: Duration,
    pub upload: Duration,
    pub insert: Duration,
    pub list: Duration,
}

impl Default for PipelineTimeouts {
    fn default() -> Self {
        Self {
            ai: Duration::from_secs(120),
            upload: Duration::from_secs(30),
            insert: Duration::from_secs(15),
            list: Duration::from_secs(15),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub server_addr: String,
    /// Base de las URLs públicas de los documentos subidos.
    pub public_base_url: Url,
    pub open_browser: bool,
    pub frontend_dir: PathBuf,

    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,
    pub llm_api_key: String,

    pub storage_dir: PathBuf,
    pub documents_bucket: String,
    pub timeouts: PipelineTimeouts,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env`, pero leyendo de cualquier fuente clave → valor.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| var(key).ok_or_else(|| anyhow!("Falta {key} en el entorno"));

        let neo4j_uri = required("NEO4J_URI")?;
        let neo4j_user = required("NEO4J_USER")?;
        let neo4j_password = required("NEO4J_PASSWORD")?;

        let server_addr = var("SERVER_ADDR").unwrap_or_else(|| "127.0.0.1:3322".to_string());
        let public_base_url = var("PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://{server_addr}"));
        let public_base_url = Url::parse(&public_base_url)
            .with_context(|| format!("PUBLIC_BASE_URL no es una URL válida: {public_base_url}"))?;

        let open_browser = match var("OPEN_BROWSER") {
            Some(v) => parse_bool(&v).ok_or_else(|| anyhow!("OPEN_BROWSER no es un booleano: {v}"))?,
            None => true,
        };
        let frontend_dir = PathBuf::from(var("FRONTEND_DIR").unwrap_or_else(|| "frontend".to_string()));

        let llm_provider_str = var("LLM_PROVIDER").unwrap_or_else(|| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;
        let llm_chat_model = var("LLM_CHAT_MODEL")
            .unwrap_or_else(|| llm_provider.default_chat_model().to_string());

        let llm_api_key = var("LLM_API_KEY")
            .or_else(|| llm_provider.api_key_var().and_then(|key| var(key)))
            .ok_or_else(|| {
                anyhow!(
                    "Falta LLM_API_KEY (o {}) en el entorno",
                    llm_provider.api_key_var().unwrap_or("la clave del proveedor")
                )
            })?;

        let storage_dir = var("STORAGE_DIR").map(PathBuf::from).unwrap_or_else(default_storage_dir);
        let documents_bucket = var("DOCUMENTS_BUCKET").unwrap_or_else(|| "documents".to_string());
        if documents_bucket.contains(['/', '\\']) || documents_bucket.contains("..") {
            return Err(anyhow!("DOCUMENTS_BUCKET no puede contener rutas: {documents_bucket}"));
        }

        let defaults = PipelineTimeouts::default();
        let secs = |key: &str, default: Duration| -> Result<Duration> {
            match var(key) {
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .with_context(|| format!("{key} debe ser un número de segundos: {v}")),
                None => Ok(default),
            }
        };
        let timeouts = PipelineTimeouts {
            ai: secs("AI_TIMEOUT_SECS", defaults.ai)?,
            upload: secs("UPLOAD_TIMEOUT_SECS", defaults.upload)?,
            insert: secs("INSERT_TIMEOUT_SECS", defaults.insert)?,
            list: secs("LIST_TIMEOUT_SECS", defaults.list)?,
        };

        Ok(Self {
            neo4j_uri,
            neo4j_user,
            neo4j_password,
            server_addr,
            public_base_url,
            open_browser,
            frontend_dir,
            llm_provider,
            llm_chat_model,
            llm_api_key,
            storage_dir,
            documents_bucket,
            timeouts,
        })
    }
}

fn default_storage_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("idea-analyst").join("storage"))
        .unwrap_or_else(|| PathBuf::from("storage"))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "si" | "sí" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
