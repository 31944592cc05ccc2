use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use songbird::{
    error::ControlError,
    input::{HttpRequest, Input},
    tracks::TrackHandle,
    Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{num::NonZeroU64, sync::Arc};
use tracing::{debug, error, info};

use super::{
    registry::SessionId,
    sink::{CompletionNotifier, Sink, SinkError, SinkFactory, StreamStatus},
};

type SharedNotifier = Arc<Mutex<Option<CompletionNotifier>>>;

/// Avisa al motor cuando Songbird termina o falla un track.
///
/// End y Error comparten el mismo notifier; el primero que llega lo consume.
struct StreamEndHandler {
    guild_id: GuildId,
    status: StreamStatus,
    notifier: SharedNotifier,
}

#[async_trait]
impl VoiceEventHandler for StreamEndHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        if self.status == StreamStatus::Errored {
            if let EventContext::Track(track_list) = ctx {
                for (state, _handle) in *track_list {
                    error!(
                        "❌ Error en track para guild {}: {:?}",
                        self.guild_id, state.playing
                    );
                }
            }
        }

        if let Some(notifier) = self.notifier.lock().take() {
            debug!("🎵 Track terminó en guild {}: {:?}", self.guild_id, self.status);
            notifier.notify(self.status);
        }

        None
    }
}

struct ActiveTrack {
    handle: TrackHandle,
    notifier: SharedNotifier,
}

/// Sink de una guild sobre la llamada de voz de Songbird.
///
/// El bot debe haberse unido al canal antes de iniciar un stream.
pub struct SongbirdSink {
    manager: Arc<Songbird>,
    guild_id: Option<GuildId>,
    http: reqwest::Client,
    current: Mutex<Option<ActiveTrack>>,
}

impl SongbirdSink {
    pub fn new(manager: Arc<Songbird>, session: SessionId, http: reqwest::Client) -> Self {
        Self {
            manager,
            guild_id: NonZeroU64::new(session.0).map(GuildId::from),
            http,
            current: Mutex::new(None),
        }
    }

    fn guild(&self) -> Result<GuildId, SinkError> {
        self.guild_id.ok_or(SinkError::NotConnected)
    }

    /// Corta el track activo avisando `Interrupted` antes que Songbird emita End
    fn stop_current(&self) -> Result<(), SinkError> {
        let Some(active) = self.current.lock().take() else {
            return Ok(());
        };

        if let Some(notifier) = active.notifier.lock().take() {
            notifier.notify(StreamStatus::Interrupted);
        }

        match active.handle.stop() {
            Ok(()) | Err(ControlError::Finished) => Ok(()),
            Err(e) => Err(SinkError::Control(format!("{:?}", e))),
        }
    }

    fn with_handle(&self, f: impl FnOnce(&TrackHandle) -> Result<(), ControlError>) -> Result<(), SinkError> {
        let current = self.current.lock();
        let active = current
            .as_ref()
            .ok_or_else(|| SinkError::Control("no hay stream activo".to_string()))?;
        f(&active.handle).map_err(|e| SinkError::Control(format!("{:?}", e)))
    }
}

#[async_trait]
impl Sink for SongbirdSink {
    async fn start(&self, uri: &str, volume: f32, on_complete: CompletionNotifier) -> Result<(), SinkError> {
        let guild_id = self.guild()?;
        let call = self.manager.get(guild_id).ok_or(SinkError::NotConnected)?;

        // Nunca dos streams en la misma llamada
        self.stop_current()?;

        let input: Input = HttpRequest::new(self.http.clone(), uri.to_string()).into();
        let handle = {
            let mut call_lock = call.lock().await;
            call_lock.play_input(input)
        };

        let notifier: SharedNotifier = Arc::new(Mutex::new(Some(on_complete)));
        let setup = handle
            .set_volume(volume)
            .and_then(|_| {
                handle.add_event(
                    VoiceEvent::Track(TrackEvent::End),
                    StreamEndHandler {
                        guild_id,
                        status: StreamStatus::Finished,
                        notifier: notifier.clone(),
                    },
                )
            })
            .and_then(|_| {
                handle.add_event(
                    VoiceEvent::Track(TrackEvent::Error),
                    StreamEndHandler {
                        guild_id,
                        status: StreamStatus::Errored,
                        notifier: notifier.clone(),
                    },
                )
            });

        if let Err(e) = setup {
            // El stream no llegó a quedar bajo control: no debe avisar nada
            notifier.lock().take();
            if let Err(stop_err) = handle.stop() {
                debug!("No se pudo detener track sin control en guild {}: {:?}", guild_id, stop_err);
            }
            return Err(SinkError::Start(format!("{:?}", e)));
        }

        *self.current.lock() = Some(ActiveTrack { handle, notifier });
        debug!("▶️ Stream iniciado en guild {}", guild_id);
        Ok(())
    }

    async fn stop(&self) -> Result<(), SinkError> {
        self.stop_current()
    }

    async fn pause(&self) -> Result<(), SinkError> {
        self.with_handle(TrackHandle::pause)
    }

    async fn resume(&self) -> Result<(), SinkError> {
        self.with_handle(TrackHandle::play)
    }

    async fn set_volume(&self, volume: f32) -> Result<(), SinkError> {
        self.with_handle(|handle| handle.set_volume(volume))
    }

    fn is_active(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|active| active.notifier.lock().is_some())
    }

    async fn release(&self) -> Result<(), SinkError> {
        self.stop_current()?;

        let guild_id = self.guild()?;
        if self.manager.get(guild_id).is_some() {
            if let Err(e) = self.manager.remove(guild_id).await {
                return Err(SinkError::Control(format!("{:?}", e)));
            }
            info!("👋 Desconectado del canal de voz en guild {}", guild_id);
        }
        Ok(())
    }
}

/// Crea un [`SongbirdSink`] por guild compartiendo el manager y el cliente HTTP
pub struct SongbirdSinkFactory {
    manager: Arc<Songbird>,
    http: reqwest::Client,
}

impl SongbirdSinkFactory {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self {
            manager,
            http: reqwest::Client::new(),
        }
    }
}

impl SinkFactory for SongbirdSinkFactory {
    fn create(&self, session: SessionId) -> Arc<dyn Sink> {
        Arc::new(SongbirdSink::new(self.manager.clone(), session, self.http.clone()))
    }
}
