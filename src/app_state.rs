use std::sync::Arc;

use neo4rs::Graph;
use tokio::sync::{oneshot, Mutex};

use crate::{config::AppConfig, ingest::Orchestrator};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub graph: Arc<Graph>,
    pub orchestrator: Arc<Orchestrator>,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

/// `is_busy` es el indicador de envío en curso: sólo se admite uno a la vez.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
}
