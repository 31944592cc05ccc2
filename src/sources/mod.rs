pub mod autoplay;
pub mod ytdlp;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use autoplay::{AutoplayStrategy, SearchAutoplay};
pub use ytdlp::YtDlpResolver;

/// Usuario que pidió un track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub id: u64,
    pub name: String,
}

impl Requester {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Representa un track ya resuelto y listo para reproducirse.
///
/// Es inmutable: se crea al resolver la query y se mueve entre la cola,
/// `current` y `previous` sin modificarse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    title: String,
    uri: String,
    source_page: String,
    duration_seconds: u64,
    uploader: String,
    requester: Requester,
    requested_at: DateTime<Utc>,
}

impl Track {
    pub fn new(title: impl Into<String>, uri: impl Into<String>, requester: Requester) -> Self {
        Self {
            title: title.into(),
            uri: uri.into(),
            source_page: DEFAULT_SOURCE_PAGE.to_string(),
            duration_seconds: 0,
            uploader: UNKNOWN_UPLOADER.to_string(),
            requester,
            requested_at: Utc::now(),
        }
    }

    // Getters
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn source_page(&self) -> &str {
        &self.source_page
    }

    pub fn duration_seconds(&self) -> u64 {
        self.duration_seconds
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_seconds)
    }

    pub fn uploader(&self) -> &str {
        &self.uploader
    }

    pub fn requester(&self) -> &Requester {
        &self.requester
    }

    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }

    // Builders
    pub fn with_source_page(mut self, page: impl Into<String>) -> Self {
        self.source_page = page.into();
        self
    }

    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration_seconds = seconds;
        self
    }

    pub fn with_uploader(mut self, uploader: impl Into<String>) -> Self {
        self.uploader = uploader.into();
        self
    }
}

pub const DEFAULT_SOURCE_PAGE: &str = "https://youtube.com";
pub const UNKNOWN_UPLOADER: &str = "Unknown";

/// Errores al convertir una query en un [`Track`]
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("no se encontraron resultados para: {0}")]
    NoResults(String),

    #[error("la resolución excedió el tiempo límite de {0}s")]
    Timeout(u64),

    #[error("metadatos inválidos: {0}")]
    Malformed(String),

    #[error("el resolvedor falló: {0}")]
    Process(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Fuente que convierte texto libre o una URL en un track reproducible.
///
/// Implementaciones deben poder llamarse concurrentemente desde varias sesiones.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, query: &str, requester: Requester) -> Result<Track, ResolutionError>;
}

/// Verifica si la query es una URL en lugar de texto de búsqueda
pub fn is_url(query: &str) -> bool {
    match url::Url::parse(query.trim()) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https"),
        Err(_) => false,
    }
}
