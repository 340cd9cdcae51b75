// Módulos de la aplicación
mod api;
mod app_state;
mod config;
mod error;
mod ingest;
mod llm;
mod models;
mod neo4j_client;
mod normalizer;
mod persistence;

use crate::app_state::{AppState, Status};
use crate::persistence::{DocumentBucket, Neo4jPersistence, PUBLIC_STORAGE_ROUTE};
use anyhow::Context;
use axum::{extract::DefaultBodyLimit, Router};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Los documentos llegan en base64 dentro del JSON (≈ 4/3 del tamaño original).
const MAX_REQUEST_BYTES: usize = 32 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Conectar a Neo4j y asegurar esquema
    let graph = Arc::new(
        neo4j_client::connect_from_config(&cfg)
            .await
            .context("Error conectando a Neo4j")?,
    );
    neo4j_client::ensure_schema(&graph)
        .await
        .context("Error asegurando el esquema de Neo4j")?;

    // 4. Colaboradores y orquestador
    let llm_manager = llm::LlmManager::from_config(&cfg).context("Error inicializando LLM Manager")?;
    let documents = DocumentBucket::from_config(&cfg);
    let storage_root = documents.root().to_path_buf();
    let persistence = Neo4jPersistence::new(graph.clone(), documents);
    let orchestrator = Arc::new(ingest::Orchestrator::new(
        Arc::new(llm_manager),
        Arc::new(persistence),
        cfg.timeouts.clone(),
    ));

    if let Err(e) = orchestrator.refresh().await {
        warn!("No se pudo cargar el historial inicial: {}", e);
    }

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        graph,
        orchestrator,
        status: Arc::new(Mutex::new(Status {
            is_busy: false,
            message: "Servidor listo.".to_string(),
        })),
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 6. Router de la API, documentos publicados y frontend estático
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .nest_service(PUBLIC_STORAGE_ROUTE, ServeDir::new(storage_root))
        .fallback_service(ServeDir::new(&cfg.frontend_dir))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    let server_url = format!("http://{}", server_addr);
    info!("🚀 Servidor escuchando en {}", &server_url);

    if app_state.config.open_browser && webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
