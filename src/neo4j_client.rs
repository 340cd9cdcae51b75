use crate::config::AppConfig;
use anyhow::Result;
use neo4rs::{query, Graph};
use tracing::info;
use url::Url;

pub async fn connect_from_config(cfg: &AppConfig) -> Result<Graph> {
    let url = Url::parse(&cfg.neo4j_uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, &cfg.neo4j_user, &cfg.neo4j_password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Crea el constraint de unicidad de :Analysis y el índice usado para
/// listar por fecha de análisis.
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    let statements = [
        // Analysis.id único
        "CREATE CONSTRAINT analysis_id IF NOT EXISTS
         FOR (a:Analysis)
         REQUIRE a.id IS UNIQUE",
        // Listado por recencia
        "CREATE INDEX analysis_analyzed_at IF NOT EXISTS
         FOR (a:Analysis)
         ON (a.analyzed_at)",
    ];

    for stmt in statements {
        graph.run(query(stmt)).await?;
    }

    info!("Esquema de Neo4j asegurado (constraint e índice de :Analysis).");
    Ok(())
}
