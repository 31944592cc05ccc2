use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{ResolutionError, Resolver, Track};

/// Estrategia para elegir la siguiente canción cuando la cola se vacía
#[async_trait]
pub trait AutoplayStrategy: Send + Sync {
    async fn next_after(&self, seed: &Track) -> Result<Track, ResolutionError>;
}

/// Busca el título del track actual y toma el primer resultado
pub struct SearchAutoplay {
    resolver: Arc<dyn Resolver>,
}

impl SearchAutoplay {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl AutoplayStrategy for SearchAutoplay {
    async fn next_after(&self, seed: &Track) -> Result<Track, ResolutionError> {
        debug!("🔄 Autoplay buscando a partir de: {}", seed.title());
        self.resolver
            .resolve(seed.title(), seed.requester().clone())
            .await
    }
}
