use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};
use thiserror::Error;
use tokio::sync::{mpsc, MutexGuard};
use tracing::{debug, error, info, warn};

use super::{
    queue::{PlaybackStatus, Selection, SessionSnapshot, SessionState},
    registry::{Session, SessionId, SessionRegistry},
    sink::{CompletionNotifier, SinkError, SinkFactory, StreamEnded, StreamStatus},
    DEFAULT_VOLUME,
};
use crate::{
    config::Config,
    sources::{AutoplayStrategy, Requester, ResolutionError, Resolver, Track},
};

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("no hay canción anterior")]
    NoHistory,

    #[error("no hay nada reproduciéndose")]
    NothingPlaying,

    #[error("no hay sesión activa en guild {0}")]
    NoSession(SessionId),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Motivo por el que terminó una sesión
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Stop explícito
    Stopped,
    /// Cola, loop y autoplay agotados
    Exhausted,
}

/// Avisa a la plataforma que una sesión terminó (salir del canal, borrar paneles)
#[async_trait]
pub trait SessionEndNotifier: Send + Sync {
    async fn on_session_ended(&self, session: SessionId, reason: EndReason);
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub default_volume: f32,
    pub autoplay_by_default: bool,
    pub max_consecutive_failures: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_volume: DEFAULT_VOLUME,
            autoplay_by_default: false,
            max_consecutive_failures: 3,
        }
    }
}

impl From<&Config> for EngineConfig {
    fn from(config: &Config) -> Self {
        Self {
            default_volume: config.default_volume,
            autoplay_by_default: config.enable_autoplay,
            max_consecutive_failures: config.max_consecutive_failures,
        }
    }
}

struct EngineInner {
    registry: SessionRegistry,
    resolver: Arc<dyn Resolver>,
    autoplay: Arc<dyn AutoplayStrategy>,
    notifier: Arc<dyn SessionEndNotifier>,
    config: EngineConfig,
    completions: mpsc::UnboundedSender<StreamEnded>,
    generations: AtomicU64,
}

/// Motor de reproducción de todas las guilds.
///
/// Cada operación toma el lock de su sesión, así que los comandos de una
/// guild se ejecutan en serie y guilds distintas avanzan en paralelo.
/// Las señales de fin de stream llegan por un canal y se procesan bajo
/// el mismo lock; las que traen una generación vieja se descartan.
#[derive(Clone)]
pub struct PlaybackEngine {
    inner: Arc<EngineInner>,
}

impl PlaybackEngine {
    /// Crea el motor y lanza la tarea que recibe las señales de los sinks.
    /// Debe llamarse dentro de un runtime de Tokio.
    pub fn new(
        sinks: Arc<dyn SinkFactory>,
        resolver: Arc<dyn Resolver>,
        autoplay: Arc<dyn AutoplayStrategy>,
        notifier: Arc<dyn SessionEndNotifier>,
        config: EngineConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(EngineInner {
            registry: SessionRegistry::new(sinks),
            resolver,
            autoplay,
            notifier,
            config,
            completions: tx,
            generations: AtomicU64::new(0),
        });

        tokio::spawn(completion_pump(Arc::downgrade(&inner), rx));

        Self { inner }
    }

    /// Resuelve la query y la agrega a la cola.
    ///
    /// Si la resolución falla no se crea ni modifica ninguna sesión.
    pub async fn play(&self, session_id: SessionId, query: &str, requester: Requester) -> Result<Track, PlaybackError> {
        let track = self.inner.resolver.resolve(query, requester).await?;
        self.enqueue(session_id, track.clone()).await;
        Ok(track)
    }

    /// Agrega un track; si la sesión está inactiva empieza a reproducir
    pub async fn enqueue(&self, session_id: SessionId, track: Track) {
        loop {
            let session = self.inner.registry.get_or_create(session_id, || self.new_state());
            let mut state = session.state.lock().await;
            if state.closed {
                // Se cerró entre get y lock; la siguiente vuelta crea una nueva
                continue;
            }

            state.push(track);
            if state.status == PlaybackStatus::Idle && !state.advancing {
                self.advance(&session, state, true).await;
            }
            return;
        }
    }

    /// Salta al siguiente track. Devuelve false si no había nada sonando.
    pub async fn skip(&self, session_id: SessionId) -> bool {
        let Some(session) = self.inner.registry.get(session_id) else {
            return false;
        };
        let mut state = session.state.lock().await;
        if state.closed || state.status == PlaybackStatus::Idle {
            debug!("⏭️ Skip ignorado en guild {}: nada reproduciéndose", session_id);
            return false;
        }

        info!("⏭️ Saltando track en guild {}", session_id);
        // El stream reemplazado seguía sonando: la racha de fallos se corta
        state.consecutive_failures = 0;
        self.invalidate(&mut state);
        if let Err(e) = session.sink.stop().await {
            warn!("Error al detener stream en guild {}: {:?}", session_id, e);
        }
        state.status = PlaybackStatus::Idle;
        self.advance(&session, state, true).await;
        true
    }

    /// Vuelve al track anterior y lo reproduce desde el inicio
    pub async fn back(&self, session_id: SessionId) -> Result<Track, PlaybackError> {
        let session = self
            .inner
            .registry
            .get(session_id)
            .ok_or(PlaybackError::NoHistory)?;
        let mut state = session.state.lock().await;
        if state.closed {
            return Err(PlaybackError::NoHistory);
        }

        let restored = state.rewind().ok_or(PlaybackError::NoHistory)?;

        if state.status != PlaybackStatus::Idle {
            state.consecutive_failures = 0;
        }

        // Cancela cualquier stream o autoplay pendiente
        self.invalidate(&mut state);
        state.advancing = false;
        if let Err(e) = session.sink.stop().await {
            warn!("Error al detener stream en guild {}: {:?}", session_id, e);
        }
        state.status = PlaybackStatus::Idle;

        if let Err(e) = self.start_stream(&session, &mut state, &restored).await {
            error!("❌ No se pudo reiniciar '{}': {}", restored.title(), e);
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            self.advance(&session, state, false).await;
        }
        Ok(restored)
    }

    /// Alterna entre pausa y reproducción; devuelve el nuevo estado
    pub async fn pause_resume(&self, session_id: SessionId) -> Result<PlaybackStatus, PlaybackError> {
        let session = self
            .inner
            .registry
            .get(session_id)
            .ok_or(PlaybackError::NothingPlaying)?;
        let mut state = session.state.lock().await;

        match state.status {
            PlaybackStatus::Idle => Err(PlaybackError::NothingPlaying),
            PlaybackStatus::Playing => {
                session.sink.pause().await?;
                state.status = PlaybackStatus::Paused;
                info!("⏸️ Reproducción pausada en guild {}", session_id);
                Ok(PlaybackStatus::Paused)
            }
            PlaybackStatus::Paused => {
                session.sink.resume().await?;
                state.status = PlaybackStatus::Playing;
                info!("▶️ Reproducción reanudada en guild {}", session_id);
                Ok(PlaybackStatus::Playing)
            }
        }
    }

    /// Ajusta el volumen sumando `delta`; aplica al stream actual y a los siguientes
    pub async fn set_volume(&self, session_id: SessionId, delta: f32) -> Result<f32, PlaybackError> {
        let session = self.open_session(session_id)?;
        let mut state = session.state.lock().await;
        if state.closed {
            return Err(PlaybackError::NoSession(session_id));
        }

        let volume = state.adjust_volume(delta);
        if state.status != PlaybackStatus::Idle {
            if let Err(e) = session.sink.set_volume(volume).await {
                warn!("Error al aplicar volumen en guild {}: {:?}", session_id, e);
            }
        }
        Ok(volume)
    }

    pub async fn toggle_loop(&self, session_id: SessionId) -> Result<bool, PlaybackError> {
        self.with_state(session_id, SessionState::toggle_loop).await
    }

    pub async fn toggle_autoplay(&self, session_id: SessionId) -> Result<bool, PlaybackError> {
        self.with_state(session_id, SessionState::toggle_autoplay).await
    }

    pub async fn shuffle_queue(&self, session_id: SessionId) -> Result<(), PlaybackError> {
        self.with_state(session_id, SessionState::shuffle).await
    }

    /// Detiene todo, limpia la cola y elimina la sesión
    pub async fn stop(&self, session_id: SessionId) -> Result<(), PlaybackError> {
        let session = self.open_session(session_id)?;
        let state = session.state.lock().await;
        if state.closed {
            return Err(PlaybackError::NoSession(session_id));
        }

        info!("⏹️ Stop en guild {}", session_id);
        self.teardown(&session, state, EndReason::Stopped).await;
        Ok(())
    }

    /// Copia del estado actual, si la sesión existe
    pub async fn snapshot(&self, session_id: SessionId) -> Option<SessionSnapshot> {
        let session = self.inner.registry.get(session_id)?;
        let state = session.state.lock().await;
        if state.closed {
            return None;
        }
        Some(state.snapshot())
    }

    pub fn is_active(&self, session_id: SessionId) -> bool {
        self.inner.registry.contains(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.inner.registry.len()
    }

    // Funciones privadas

    fn new_state(&self) -> SessionState {
        SessionState::new(
            self.inner.config.default_volume,
            self.inner.config.autoplay_by_default,
        )
    }

    fn open_session(&self, session_id: SessionId) -> Result<Arc<Session>, PlaybackError> {
        self.inner
            .registry
            .get(session_id)
            .ok_or(PlaybackError::NoSession(session_id))
    }

    async fn with_state<T>(
        &self,
        session_id: SessionId,
        f: impl FnOnce(&mut SessionState) -> T,
    ) -> Result<T, PlaybackError> {
        let session = self.open_session(session_id)?;
        let mut state = session.state.lock().await;
        if state.closed {
            return Err(PlaybackError::NoSession(session_id));
        }
        Ok(f(&mut state))
    }

    /// Nueva generación: las señales de streams anteriores quedan obsoletas.
    /// El contador es global para que una sesión recreada nunca repita valores.
    fn invalidate(&self, state: &mut SessionState) -> u64 {
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1;
        state.generation = generation;
        generation
    }

    async fn start_stream(
        &self,
        session: &Session,
        state: &mut SessionState,
        track: &Track,
    ) -> Result<(), SinkError> {
        let generation = self.invalidate(state);
        let notifier = CompletionNotifier::new(session.id, generation, self.inner.completions.clone());

        session.sink.start(track.uri(), state.volume(), notifier).await?;

        state.status = PlaybackStatus::Playing;
        info!(
            "🎵 Reproduciendo en guild {}: {} (gen {})",
            session.id,
            track.title(),
            generation
        );
        Ok(())
    }

    /// Elige y arranca el siguiente track. Consume el lock de la sesión.
    ///
    /// Solo el autoplay suelta el lock (para resolver); mientras tanto
    /// `advancing` rechaza otras entradas.
    async fn advance<'a>(&self, session: &'a Arc<Session>, mut state: MutexGuard<'a, SessionState>, mut allow_replay: bool) {
        if state.advancing {
            debug!("Advance ya en curso en guild {}, ignorado", session.id);
            return;
        }

        loop {
            let track = match state.select_next(allow_replay) {
                Selection::Replay(track) | Selection::Next(track) => track,
                Selection::Autoplay(seed) => {
                    state.advancing = true;
                    let token = state.generation;
                    drop(state);

                    let resolved = self.inner.autoplay.next_after(&seed).await;

                    state = session.state.lock().await;
                    if state.closed || state.generation != token {
                        debug!("🗑️ Autoplay descartado en guild {}: sesión cambió", session.id);
                        return;
                    }
                    state.advancing = false;

                    match resolved {
                        Ok(track) => {
                            state.commit_autoplay(track.clone());
                            track
                        }
                        Err(e) => {
                            warn!("⚠️ Autoplay falló en guild {}: {}", session.id, e);
                            if state.queue().is_empty() {
                                self.teardown(session, state, EndReason::Exhausted).await;
                                return;
                            }
                            // Llegaron canciones mientras se resolvía
                            allow_replay = false;
                            continue;
                        }
                    }
                }
                Selection::Exhausted => {
                    self.teardown(session, state, EndReason::Exhausted).await;
                    return;
                }
            };

            match self.start_stream(session, &mut state, &track).await {
                Ok(()) => return,
                Err(e) => {
                    state.status = PlaybackStatus::Idle;
                    state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                    error!(
                        "❌ Error al reproducir '{}' en guild {} (fallo {}): {}",
                        track.title(),
                        session.id,
                        state.consecutive_failures,
                        e
                    );

                    if state.consecutive_failures >= self.inner.config.max_consecutive_failures {
                        warn!("🚨 Demasiados fallos seguidos en guild {}, terminando sesión", session.id);
                        self.teardown(session, state, EndReason::Exhausted).await;
                        return;
                    }
                    // Un track roto no se repite aunque el loop esté activo
                    allow_replay = false;
                }
            }
        }
    }

    /// Cierra la sesión, libera el sink y avisa a la plataforma
    async fn teardown<'a>(&self, session: &'a Arc<Session>, mut state: MutexGuard<'a, SessionState>, reason: EndReason) {
        state.close();
        self.invalidate(&mut state);

        if let Err(e) = session.sink.release().await {
            warn!("Error al liberar conexión de voz en guild {}: {:?}", session.id, e);
        }
        self.inner.registry.remove(session);
        drop(state);

        info!("👋 Sesión terminada en guild {} ({:?})", session.id, reason);
        self.inner.notifier.on_session_ended(session.id, reason).await;
    }

    async fn handle_stream_end(&self, event: StreamEnded) {
        let Some(session) = self.inner.registry.get(event.session) else {
            debug!("Señal de fin para sesión inexistente {}", event.session);
            return;
        };
        let mut state = session.state.lock().await;
        if state.closed || state.generation != event.generation {
            debug!(
                "🗑️ Señal obsoleta descartada en guild {} (gen {} != {})",
                event.session, event.generation, state.generation
            );
            return;
        }

        debug!("Track terminado en guild {}: {:?}", event.session, event.status);
        state.status = PlaybackStatus::Idle;

        if event.status == StreamStatus::Errored {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            warn!(
                "⚠️ Stream con error en guild {} (fallo {})",
                event.session, state.consecutive_failures
            );
            if state.consecutive_failures >= self.inner.config.max_consecutive_failures {
                warn!("🚨 Demasiados fallos seguidos en guild {}, terminando sesión", event.session);
                self.teardown(&session, state, EndReason::Exhausted).await;
                return;
            }
            self.advance(&session, state, false).await;
        } else {
            state.consecutive_failures = 0;
            self.advance(&session, state, true).await;
        }
    }
}

/// Recibe las señales de los sinks y las procesa cada una en su propia tarea,
/// para que una sesión resolviendo autoplay no frene a las demás
async fn completion_pump(engine: Weak<EngineInner>, mut rx: mpsc::UnboundedReceiver<StreamEnded>) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = engine.upgrade() else {
            break;
        };
        let engine = PlaybackEngine { inner };
        tokio::spawn(async move {
            engine.handle_stream_end(event).await;
        });
    }
    debug!("Canal de señales cerrado");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            sink::fake::{FakeSinkFactory, RecordingSink},
            VOLUME_STEP,
        },
        sources::{MockResolver, SearchAutoplay},
    };
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::sync::Notify;

    const GUILD: SessionId = SessionId(1);

    fn track(name: &str) -> Track {
        Track::new(name, uri(name), Requester::new(1, "ana"))
    }

    fn uri(name: &str) -> String {
        format!("https://cdn/{}", name)
    }

    #[derive(Default)]
    struct RecordingNotifier {
        ended: Mutex<Vec<(SessionId, EndReason)>>,
    }

    impl RecordingNotifier {
        fn ended(&self) -> Vec<(SessionId, EndReason)> {
            self.ended.lock().clone()
        }
    }

    #[async_trait]
    impl SessionEndNotifier for RecordingNotifier {
        async fn on_session_ended(&self, session: SessionId, reason: EndReason) {
            self.ended.lock().push((session, reason));
        }
    }

    /// Autoplay que espera una señal antes de responder
    struct GatedAutoplay {
        gate: Notify,
        result: Mutex<Option<Result<Track, ResolutionError>>>,
    }

    #[async_trait]
    impl AutoplayStrategy for GatedAutoplay {
        async fn next_after(&self, _seed: &Track) -> Result<Track, ResolutionError> {
            self.gate.notified().await;
            self.result
                .lock()
                .take()
                .unwrap_or_else(|| Err(ResolutionError::NoResults("gated".to_string())))
        }
    }

    struct Harness {
        engine: PlaybackEngine,
        sinks: Arc<FakeSinkFactory>,
        notifier: Arc<RecordingNotifier>,
    }

    impl Harness {
        fn new(resolver: MockResolver) -> Self {
            let resolver: Arc<dyn Resolver> = Arc::new(resolver);
            let autoplay = Arc::new(SearchAutoplay::new(resolver.clone()));
            Self::with_autoplay(resolver, autoplay)
        }

        fn idle() -> Self {
            Self::new(MockResolver::new())
        }

        fn with_autoplay(resolver: Arc<dyn Resolver>, autoplay: Arc<dyn AutoplayStrategy>) -> Self {
            let sinks = Arc::new(FakeSinkFactory::default());
            let notifier = Arc::new(RecordingNotifier::default());
            let engine = PlaybackEngine::new(
                sinks.clone(),
                resolver,
                autoplay,
                notifier.clone(),
                EngineConfig::default(),
            );
            Self {
                engine,
                sinks,
                notifier,
            }
        }

        fn sink(&self) -> Arc<RecordingSink> {
            self.sinks.sink(GUILD)
        }

        async fn current_title(&self) -> Option<String> {
            self.engine
                .snapshot(GUILD)
                .await
                .and_then(|s| s.current.map(|t| t.title().to_string()))
        }

        async fn queue_titles(&self) -> Vec<String> {
            self.engine
                .snapshot(GUILD)
                .await
                .map(|s| s.queue.iter().map(|t| t.title().to_string()).collect())
                .unwrap_or_default()
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..300 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("la condición no se cumplió a tiempo");
    }

    /// Da tiempo a que se procesen señales pendientes
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_enqueue_into_idle_session_starts_playback() {
        let h = Harness::idle();
        h.engine.enqueue(GUILD, track("A")).await;

        assert_eq!(h.sink().started(), vec![uri("A")]);
        let snapshot = h.engine.snapshot(GUILD).await.expect("sesión");
        assert_eq!(snapshot.status, PlaybackStatus::Playing);
        assert_eq!(snapshot.current.map(|t| t.title().to_string()), Some("A".to_string()));
        assert!(snapshot.queue.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_while_playing_only_appends() {
        let h = Harness::idle();
        h.engine.enqueue(GUILD, track("A")).await;
        h.engine.enqueue(GUILD, track("B")).await;

        assert_eq!(h.sink().started(), vec![uri("A")]);
        assert_eq!(h.queue_titles().await, vec!["B"]);
    }

    #[tokio::test]
    async fn test_completion_advances_through_queue_then_ends() {
        let h = Harness::idle();
        h.engine.enqueue(GUILD, track("A")).await;
        h.engine.enqueue(GUILD, track("B")).await;

        let sink = h.sink();
        assert!(sink.finish_current());
        wait_until(|| sink.started().len() == 2).await;
        assert_eq!(h.current_title().await, Some("B".to_string()));

        assert!(sink.finish_current());
        wait_until(|| !h.notifier.ended().is_empty()).await;

        assert_eq!(h.notifier.ended(), vec![(GUILD, EndReason::Exhausted)]);
        assert!(!h.engine.is_active(GUILD));
        assert!(h.engine.snapshot(GUILD).await.is_none());
        assert!(sink.released());
        assert!(!sink.overlap_detected());
    }

    #[tokio::test]
    async fn test_loop_replays_current_and_keeps_queue() {
        let h = Harness::idle();
        h.engine.enqueue(GUILD, track("T")).await;
        h.engine.enqueue(GUILD, track("A")).await;
        h.engine.enqueue(GUILD, track("B")).await;
        assert!(h.engine.toggle_loop(GUILD).await.unwrap());

        let sink = h.sink();
        sink.finish_current();
        wait_until(|| sink.started().len() == 2).await;

        assert_eq!(sink.started(), vec![uri("T"), uri("T")]);
        assert_eq!(h.current_title().await, Some("T".to_string()));
        assert_eq!(h.queue_titles().await, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_queue_wins_over_autoplay() {
        // El resolvedor no debe llamarse: la cola tiene prioridad
        let mut resolver = MockResolver::new();
        resolver.expect_resolve().never();
        let h = Harness::new(resolver);

        h.engine.enqueue(GUILD, track("T")).await;
        h.engine.enqueue(GUILD, track("A")).await;
        assert!(h.engine.toggle_autoplay(GUILD).await.unwrap());

        let sink = h.sink();
        sink.finish_current();
        wait_until(|| sink.started().len() == 2).await;
        assert_eq!(h.current_title().await, Some("A".to_string()));
    }

    #[tokio::test]
    async fn test_autoplay_resolves_from_current_title() {
        let mut resolver = MockResolver::new();
        resolver
            .expect_resolve()
            .withf(|query, _| query == "T")
            .times(1)
            .returning(|_, requester| Ok(Track::new("Related", "https://cdn/Related", requester)));
        let h = Harness::new(resolver);

        h.engine.enqueue(GUILD, track("T")).await;
        h.engine.toggle_autoplay(GUILD).await.unwrap();

        let sink = h.sink();
        sink.finish_current();
        wait_until(|| sink.started().len() == 2).await;

        let snapshot = h.engine.snapshot(GUILD).await.expect("sesión");
        assert_eq!(snapshot.current.map(|t| t.title().to_string()), Some("Related".to_string()));
        assert_eq!(snapshot.previous.map(|t| t.title().to_string()), Some("T".to_string()));
        assert_eq!(snapshot.status, PlaybackStatus::Playing);
    }

    #[tokio::test]
    async fn test_autoplay_failure_degrades_to_end_of_queue() {
        let mut resolver = MockResolver::new();
        resolver
            .expect_resolve()
            .times(1)
            .returning(|_, _| Err(ResolutionError::Timeout(30)));
        let h = Harness::new(resolver);

        h.engine.enqueue(GUILD, track("T")).await;
        h.engine.toggle_autoplay(GUILD).await.unwrap();
        h.sink().finish_current();

        wait_until(|| !h.notifier.ended().is_empty()).await;
        assert_eq!(h.notifier.ended(), vec![(GUILD, EndReason::Exhausted)]);
        assert!(!h.engine.is_active(GUILD));
    }

    #[tokio::test]
    async fn test_enqueue_during_autoplay_resolution_is_kept() {
        let autoplay = Arc::new(GatedAutoplay {
            gate: Notify::new(),
            result: Mutex::new(Some(Err(ResolutionError::NoResults("T".to_string())))),
        });
        let h = Harness::with_autoplay(Arc::new(MockResolver::new()), autoplay.clone());

        h.engine.enqueue(GUILD, track("T")).await;
        h.engine.toggle_autoplay(GUILD).await.unwrap();
        let sink = h.sink();
        sink.finish_current();
        settle().await;

        // Mientras se resuelve el autoplay no hay stream ni advance nuevo
        h.engine.enqueue(GUILD, track("A")).await;
        assert_eq!(sink.started(), vec![uri("T")]);
        assert_eq!(
            h.engine.pause_resume(GUILD).await.unwrap_err().to_string(),
            PlaybackError::NothingPlaying.to_string()
        );

        autoplay.gate.notify_one();
        wait_until(|| sink.started().len() == 2).await;
        assert_eq!(h.current_title().await, Some("A".to_string()));
        assert!(h.notifier.ended().is_empty());
    }

    #[tokio::test]
    async fn test_stop_during_autoplay_discards_result() {
        let autoplay = Arc::new(GatedAutoplay {
            gate: Notify::new(),
            result: Mutex::new(Some(Ok(track("Late")))),
        });
        let h = Harness::with_autoplay(Arc::new(MockResolver::new()), autoplay.clone());

        h.engine.enqueue(GUILD, track("T")).await;
        h.engine.toggle_autoplay(GUILD).await.unwrap();
        let sink = h.sink();
        sink.finish_current();
        settle().await;

        h.engine.stop(GUILD).await.unwrap();
        autoplay.gate.notify_one();
        settle().await;

        assert_eq!(sink.started(), vec![uri("T")]);
        assert!(!h.engine.is_active(GUILD));
        assert_eq!(h.notifier.ended(), vec![(GUILD, EndReason::Stopped)]);
    }

    #[tokio::test]
    async fn test_back_during_autoplay_discards_result() {
        let autoplay = Arc::new(GatedAutoplay {
            gate: Notify::new(),
            result: Mutex::new(Some(Ok(track("Late")))),
        });
        let h = Harness::with_autoplay(Arc::new(MockResolver::new()), autoplay.clone());

        h.engine.enqueue(GUILD, track("A")).await;
        h.engine.enqueue(GUILD, track("B")).await;
        let sink = h.sink();
        sink.finish_current();
        wait_until(|| sink.started().len() == 2).await;

        h.engine.toggle_autoplay(GUILD).await.unwrap();
        sink.finish_current();
        settle().await;

        let restored = h.engine.back(GUILD).await.expect("hay historial");
        assert_eq!(restored.title(), "A");

        autoplay.gate.notify_one();
        settle().await;

        assert_eq!(sink.started(), vec![uri("A"), uri("B"), uri("A")]);
        assert_eq!(h.current_title().await, Some("A".to_string()));
        assert_eq!(h.queue_titles().await, vec!["B"]);
        assert_eq!(sink.active_uri(), Some(uri("A")));
        assert!(h.notifier.ended().is_empty());
    }

    #[tokio::test]
    async fn test_history_round_trip() {
        let h = Harness::idle();
        h.engine.enqueue(GUILD, track("A")).await;
        h.engine.enqueue(GUILD, track("B")).await;
        assert!(h.engine.skip(GUILD).await);
        assert_eq!(h.current_title().await, Some("B".to_string()));

        let restored = h.engine.back(GUILD).await.expect("hay historial");
        assert_eq!(restored.title(), "A");

        let snapshot = h.engine.snapshot(GUILD).await.expect("sesión");
        assert_eq!(snapshot.current.map(|t| t.title().to_string()), Some("A".to_string()));
        assert!(snapshot.previous.is_none());
        assert_eq!(
            snapshot.queue.iter().map(|t| t.title()).collect::<Vec<_>>(),
            vec!["B"]
        );
        assert_eq!(snapshot.status, PlaybackStatus::Playing);

        settle().await;
        let sink = h.sink();
        assert_eq!(sink.started(), vec![uri("A"), uri("B"), uri("A")]);
        assert_eq!(sink.active_uri(), Some(uri("A")));
        assert!(!sink.overlap_detected());
    }

    #[tokio::test]
    async fn test_back_without_history_changes_nothing() {
        let h = Harness::idle();
        assert!(matches!(h.engine.back(GUILD).await, Err(PlaybackError::NoHistory)));

        h.engine.enqueue(GUILD, track("A")).await;
        h.engine.enqueue(GUILD, track("B")).await;
        assert!(matches!(h.engine.back(GUILD).await, Err(PlaybackError::NoHistory)));

        assert_eq!(h.current_title().await, Some("A".to_string()));
        assert_eq!(h.queue_titles().await, vec!["B"]);
        assert_eq!(h.sink().started(), vec![uri("A")]);
    }

    #[tokio::test]
    async fn test_stale_completion_is_discarded() {
        let h = Harness::idle();
        let sink = h.sink();
        sink.defer_stop_notifications();

        h.engine.enqueue(GUILD, track("A")).await;
        h.engine.enqueue(GUILD, track("B")).await;
        h.engine.enqueue(GUILD, track("C")).await;
        let first_generation = sink.active_generation().expect("stream A");

        assert!(h.engine.skip(GUILD).await);
        let second_generation = sink.active_generation().expect("stream B");
        assert!(second_generation > first_generation);

        // Llega tarde la señal del stream A
        assert_eq!(sink.deliver_deferred(), 1);
        settle().await;

        assert_eq!(sink.started(), vec![uri("A"), uri("B")]);
        assert_eq!(h.current_title().await, Some("B".to_string()));
        assert_eq!(h.queue_titles().await, vec!["C"]);
    }

    #[tokio::test]
    async fn test_skip_when_idle_is_noop() {
        let h = Harness::idle();
        assert!(!h.engine.skip(GUILD).await);
        assert!(!h.engine.is_active(GUILD));
    }

    #[tokio::test]
    async fn test_skip_last_track_ends_session() {
        let h = Harness::idle();
        h.engine.enqueue(GUILD, track("A")).await;
        assert!(h.engine.skip(GUILD).await);

        assert!(!h.engine.is_active(GUILD));
        assert_eq!(h.notifier.ended(), vec![(GUILD, EndReason::Exhausted)]);
    }

    #[tokio::test]
    async fn test_pause_resume_toggles() {
        let h = Harness::idle();
        assert!(matches!(
            h.engine.pause_resume(GUILD).await,
            Err(PlaybackError::NothingPlaying)
        ));

        h.engine.enqueue(GUILD, track("A")).await;
        assert_eq!(h.engine.pause_resume(GUILD).await.unwrap(), PlaybackStatus::Paused);
        assert!(h.sink().is_paused());
        assert_eq!(h.engine.pause_resume(GUILD).await.unwrap(), PlaybackStatus::Playing);
        assert!(!h.sink().is_paused());
    }

    #[tokio::test]
    async fn test_volume_applies_live_and_persists() {
        let h = Harness::idle();
        assert!(matches!(
            h.engine.set_volume(GUILD, VOLUME_STEP).await,
            Err(PlaybackError::NoSession(GUILD))
        ));

        h.engine.enqueue(GUILD, track("A")).await;
        h.engine.enqueue(GUILD, track("B")).await;
        let mut volume = 0.0;
        for _ in 0..15 {
            volume = h.engine.set_volume(GUILD, VOLUME_STEP).await.unwrap();
        }
        assert_eq!(volume, 2.0);
        assert_eq!(h.sink().volume(), Some(2.0));

        let volume = h.engine.set_volume(GUILD, -0.5).await.unwrap();
        assert!((volume - 1.5).abs() < 1e-6);

        // El siguiente track arranca con el volumen guardado
        h.engine.skip(GUILD).await;
        assert_eq!(h.sink().volume(), Some(volume));
    }

    #[tokio::test]
    async fn test_stop_clears_and_removes_session() {
        let h = Harness::idle();
        assert!(matches!(h.engine.stop(GUILD).await, Err(PlaybackError::NoSession(GUILD))));

        h.engine.enqueue(GUILD, track("A")).await;
        h.engine.enqueue(GUILD, track("B")).await;
        h.engine.stop(GUILD).await.unwrap();

        assert!(!h.engine.is_active(GUILD));
        assert!(h.sink().released());
        assert_eq!(h.notifier.ended(), vec![(GUILD, EndReason::Stopped)]);

        // La señal del stream detenido llega después y se ignora
        settle().await;
        assert_eq!(h.sink().started(), vec![uri("A")]);
        assert_eq!(h.engine.session_count(), 0);
    }

    #[tokio::test]
    async fn test_play_after_stop_creates_fresh_session() {
        let h = Harness::idle();
        h.engine.enqueue(GUILD, track("A")).await;
        h.engine.toggle_loop(GUILD).await.unwrap();
        h.engine.set_volume(GUILD, -0.5).await.unwrap();
        h.engine.stop(GUILD).await.unwrap();

        h.engine.enqueue(GUILD, track("B")).await;
        let snapshot = h.engine.snapshot(GUILD).await.expect("sesión nueva");
        assert!(!snapshot.loop_enabled);
        assert_eq!(snapshot.volume, DEFAULT_VOLUME);
        assert!(snapshot.previous.is_none());
    }

    #[tokio::test]
    async fn test_controls_require_session() {
        let h = Harness::idle();
        assert!(matches!(h.engine.toggle_loop(GUILD).await, Err(PlaybackError::NoSession(_))));
        assert!(matches!(h.engine.toggle_autoplay(GUILD).await, Err(PlaybackError::NoSession(_))));
        assert!(matches!(h.engine.shuffle_queue(GUILD).await, Err(PlaybackError::NoSession(_))));
        assert!(h.engine.snapshot(GUILD).await.is_none());
    }

    #[tokio::test]
    async fn test_shuffle_keeps_queue_contents() {
        let h = Harness::idle();
        for name in ["Now", "A", "B", "C", "D"] {
            h.engine.enqueue(GUILD, track(name)).await;
        }
        h.engine.shuffle_queue(GUILD).await.unwrap();

        let mut titles = h.queue_titles().await;
        titles.sort();
        assert_eq!(titles, vec!["A", "B", "C", "D"]);
        assert_eq!(h.current_title().await, Some("Now".to_string()));
    }

    #[tokio::test]
    async fn test_play_resolution_error_creates_nothing() {
        let mut resolver = MockResolver::new();
        resolver
            .expect_resolve()
            .returning(|query, _| Err(ResolutionError::NoResults(query.to_string())));
        let h = Harness::new(resolver);

        let err = h
            .engine
            .play(GUILD, "asdfghjkl", Requester::new(1, "ana"))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::Resolution(ResolutionError::NoResults(_))));
        assert!(!h.engine.is_active(GUILD));
    }

    #[tokio::test]
    async fn test_play_resolves_and_enqueues() {
        let mut resolver = MockResolver::new();
        resolver
            .expect_resolve()
            .withf(|query, requester| query == "lofi" && requester.name == "ana")
            .returning(|_, requester| Ok(Track::new("Lofi Mix", "https://cdn/lofi", requester)));
        let h = Harness::new(resolver);

        let resolved = h.engine.play(GUILD, "lofi", Requester::new(1, "ana")).await.unwrap();
        assert_eq!(resolved.title(), "Lofi Mix");
        assert_eq!(h.sink().started(), vec!["https://cdn/lofi".to_string()]);
    }

    #[tokio::test]
    async fn test_play_of_unplayable_track_leaves_no_session() {
        let mut resolver = MockResolver::new();
        resolver
            .expect_resolve()
            .returning(|_, requester| Ok(Track::new("Roto", "https://cdn/roto", requester)));
        let h = Harness::new(resolver);
        h.sink().fail_uri("https://cdn/roto");

        let resolved = h.engine.play(GUILD, "roto", Requester::new(1, "ana")).await.unwrap();

        assert_eq!(resolved.title(), "Roto");
        assert!(!h.engine.is_active(GUILD));
        assert_eq!(h.notifier.ended(), vec![(GUILD, EndReason::Exhausted)]);
    }

    #[tokio::test]
    async fn test_broken_track_is_skipped_even_with_loop() {
        let h = Harness::idle();
        let sink = h.sink();

        h.engine.enqueue(GUILD, track("A")).await;
        h.engine.enqueue(GUILD, track("B")).await;
        h.engine.toggle_loop(GUILD).await.unwrap();

        // A deja de poder reproducirse: el loop no debe insistir con ella
        sink.fail_uri(&uri("A"));
        assert!(h.engine.skip(GUILD).await);

        assert_eq!(sink.started(), vec![uri("A"), uri("A"), uri("B")]);
        let snapshot = h.engine.snapshot(GUILD).await.expect("sesión");
        assert_eq!(snapshot.current.map(|t| t.title().to_string()), Some("B".to_string()));
        assert_eq!(snapshot.status, PlaybackStatus::Playing);
    }

    #[tokio::test]
    async fn test_consecutive_failures_end_session() {
        let h = Harness::idle();
        let sink = h.sink();
        for name in ["X", "Y", "Z"] {
            sink.fail_uri(&uri(name));
        }
        h.engine.enqueue(GUILD, track("A")).await;
        for name in ["X", "Y", "Z", "After"] {
            h.engine.enqueue(GUILD, track(name)).await;
        }

        h.engine.skip(GUILD).await;

        assert_eq!(sink.started(), vec![uri("A"), uri("X"), uri("Y"), uri("Z")]);
        assert!(!h.engine.is_active(GUILD));
        assert_eq!(h.notifier.ended(), vec![(GUILD, EndReason::Exhausted)]);
    }

    #[tokio::test]
    async fn test_skipping_live_tracks_breaks_failure_streak() {
        let h = Harness::idle();
        let sink = h.sink();
        for name in ["X", "Y", "Z"] {
            sink.fail_uri(&uri(name));
        }
        for name in ["A", "X", "B", "Y", "C", "Z", "D"] {
            h.engine.enqueue(GUILD, track(name)).await;
        }

        // Cada skip corta un track que sí sonaba, así que los fallos no se acumulan
        for _ in 0..3 {
            assert!(h.engine.skip(GUILD).await);
        }

        assert_eq!(
            sink.started(),
            ["A", "X", "B", "Y", "C", "Z", "D"].map(uri).to_vec()
        );
        assert_eq!(h.current_title().await, Some("D".to_string()));
        assert!(h.engine.is_active(GUILD));
        assert!(h.notifier.ended().is_empty());
    }

    #[tokio::test]
    async fn test_errored_stream_does_not_loop() {
        let h = Harness::idle();
        h.engine.enqueue(GUILD, track("A")).await;
        h.engine.enqueue(GUILD, track("B")).await;
        h.engine.toggle_loop(GUILD).await.unwrap();

        let sink = h.sink();
        sink.error_current();
        wait_until(|| sink.started().len() == 2).await;
        assert_eq!(sink.started(), vec![uri("A"), uri("B")]);
    }

    #[tokio::test]
    async fn test_repeated_stream_errors_end_session() {
        let h = Harness::idle();
        for name in ["A", "B", "C", "D"] {
            h.engine.enqueue(GUILD, track(name)).await;
        }

        let sink = h.sink();
        for played in 1..=2 {
            sink.error_current();
            wait_until(|| sink.started().len() == played + 1).await;
        }
        sink.error_current();
        wait_until(|| !h.notifier.ended().is_empty()).await;

        assert_eq!(sink.started(), vec![uri("A"), uri("B"), uri("C")]);
        assert_eq!(h.notifier.ended(), vec![(GUILD, EndReason::Exhausted)]);
        assert!(!h.engine.is_active(GUILD));
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let h = Harness::idle();
        let other = SessionId(2);

        h.engine.enqueue(GUILD, track("A")).await;
        h.engine.enqueue(other, track("X")).await;
        h.engine.stop(GUILD).await.unwrap();

        assert!(!h.engine.is_active(GUILD));
        assert!(h.engine.is_active(other));
        assert_eq!(h.sinks.sink(other).active_uri(), Some(uri("X")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_skips_never_overlap_streams() {
        let h = Harness::idle();
        for i in 0..20 {
            h.engine.enqueue(GUILD, track(&format!("T{}", i))).await;
        }

        let skips = (0..10).map(|_| {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.skip(GUILD).await })
        });
        let completions = (0..5).map(|_| {
            let sink = h.sink();
            tokio::spawn(async move {
                sink.finish_current();
            })
        });
        let skips: Vec<_> = skips.collect();
        let completions: Vec<_> = completions.collect();
        for result in futures::future::join_all(skips).await {
            result.expect("skip task");
        }
        for result in futures::future::join_all(completions).await {
            result.expect("completion task");
        }
        settle().await;

        let sink = h.sink();
        assert!(!sink.overlap_detected());
        if let Some(snapshot) = h.engine.snapshot(GUILD).await {
            let current = snapshot.current.expect("current mientras suena");
            assert_eq!(sink.active_uri(), Some(current.uri().to_string()));
        }
    }
}
