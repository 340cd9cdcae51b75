//! Tipos de error del dominio. La fontanería de arranque y de los colaboradores
//! sigue usando `anyhow`; aquí sólo viven los errores que ve quien envía un análisis.

use std::time::Duration;

use thiserror::Error;

/// Fallos del colaborador de IA.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AiError {
    #[error("la IA no respondió en {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("error del proveedor de IA: {0}")]
    Provider(String),

    #[error("el documento no contiene texto analizable")]
    EmptyContent,

    #[error("tipo de documento no soportado: {0}")]
    UnsupportedDocument(String),

    #[error("la IA devolvió una respuesta vacía")]
    EmptyResponse,

    #[error("la respuesta de la IA no es un JSON válido: {0}")]
    MalformedResponse(String),
}

/// Error fatal de una operación del orquestador.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalystError {
    /// Entrada rechazada antes de cualquier llamada de red.
    #[error("Entrada no válida: {0}")]
    Validation(String),

    #[error("Error en el análisis: {0}")]
    Ai(#[from] AiError),

    #[error("Error de persistencia: {0}")]
    Persistence(String),
}

pub type AnalystResult<T> = std::result::Result<T, AnalystError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_human_readable() {
        let err = AnalystError::from(AiError::Timeout(Duration::from_secs(120)));
        assert_eq!(err.to_string(), "Error en el análisis: la IA no respondió en 120s");

        let err = AnalystError::Validation("el título está vacío".to_string());
        assert_eq!(err.to_string(), "Entrada no válida: el título está vacío");
    }
}
