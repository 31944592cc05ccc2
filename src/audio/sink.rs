use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use super::registry::SessionId;

/// Cómo terminó un stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Reproducción completa
    Finished,
    /// Detenido con stop()
    Interrupted,
    /// Falló durante la reproducción
    Errored,
}

/// Señal de fin de stream, etiquetada con su generación
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEnded {
    pub session: SessionId,
    pub generation: u64,
    pub status: StreamStatus,
}

/// Callback de un solo uso que el sink invoca cuando termina el stream.
///
/// Consumir `notify` garantiza como máximo una señal por stream. La señal
/// viaja por un canal hacia el motor, que la procesa bajo el lock de la sesión.
#[derive(Debug)]
pub struct CompletionNotifier {
    session: SessionId,
    generation: u64,
    tx: mpsc::UnboundedSender<StreamEnded>,
}

impl CompletionNotifier {
    pub(crate) fn new(session: SessionId, generation: u64, tx: mpsc::UnboundedSender<StreamEnded>) -> Self {
        Self {
            session,
            generation,
            tx,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn notify(self, status: StreamStatus) {
        // El motor pudo haberse apagado; no hay nada que avisar
        let _ = self.tx.send(StreamEnded {
            session: self.session,
            generation: self.generation,
            status,
        });
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("no hay conexión de voz activa")]
    NotConnected,

    #[error("no se pudo iniciar el stream: {0}")]
    Start(String),

    #[error("error de control del stream: {0}")]
    Control(String),
}

/// Salida de audio de una sesión.
///
/// Cada sesión tiene su propio sink; nunca se comparte entre guilds.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Inicia un stream. `on_complete` debe invocarse exactamente una vez al terminar.
    async fn start(&self, uri: &str, volume: f32, on_complete: CompletionNotifier) -> Result<(), SinkError>;

    async fn stop(&self) -> Result<(), SinkError>;

    async fn pause(&self) -> Result<(), SinkError>;

    async fn resume(&self) -> Result<(), SinkError>;

    async fn set_volume(&self, volume: f32) -> Result<(), SinkError>;

    fn is_active(&self) -> bool;

    /// Detiene todo y libera la conexión (salir del canal de voz)
    async fn release(&self) -> Result<(), SinkError>;
}

/// Crea el sink de una sesión nueva
pub trait SinkFactory: Send + Sync {
    fn create(&self, session: SessionId) -> Arc<dyn Sink>;
}
