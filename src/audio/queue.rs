use rand::{seq::SliceRandom, Rng};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, info};

use super::{MAX_VOLUME, MIN_VOLUME};
use crate::sources::Track;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaybackStatus {
    Idle,
    Playing,
    Paused,
}

/// Resultado de elegir el siguiente track
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Loop activo: se repite `current`
    Replay(Track),
    /// Siguiente de la cola, ya movido a `current`
    Next(Track),
    /// Cola vacía con autoplay: hay que resolver usando este track como semilla
    Autoplay(Track),
    /// No queda nada que reproducir
    Exhausted,
}

/// Estado de reproducción de una guild.
///
/// Solo el motor lo modifica, siempre bajo el lock de la sesión.
#[derive(Debug)]
pub struct SessionState {
    queue: VecDeque<Track>,
    current: Option<Track>,
    previous: Option<Track>,
    loop_enabled: bool,
    autoplay_enabled: bool,
    volume: f32,
    pub(crate) status: PlaybackStatus,
    pub(crate) generation: u64,
    pub(crate) advancing: bool,
    pub(crate) closed: bool,
    pub(crate) consecutive_failures: u8,
}

impl SessionState {
    pub fn new(volume: f32, autoplay_enabled: bool) -> Self {
        Self {
            queue: VecDeque::new(),
            current: None,
            previous: None,
            loop_enabled: false,
            autoplay_enabled,
            volume: clamp_volume(volume),
            status: PlaybackStatus::Idle,
            generation: 0,
            advancing: false,
            closed: false,
            consecutive_failures: 0,
        }
    }

    /// Agrega un track al final de la cola
    pub fn push(&mut self, track: Track) {
        info!("➕ Agregado a la cola: {}", track.title());
        self.queue.push_back(track);
    }

    /// Elige el siguiente track: loop > cola > autoplay > fin.
    ///
    /// `allow_replay` en false salta el loop (el track actual falló).
    pub fn select_next(&mut self, allow_replay: bool) -> Selection {
        if allow_replay && self.loop_enabled {
            if let Some(current) = &self.current {
                info!("🔂 Repitiendo track: {}", current.title());
                return Selection::Replay(current.clone());
            }
        }

        if let Some(next) = self.queue.pop_front() {
            info!("➡️ Siguiente en cola: {}", next.title());
            self.previous = self.current.take();
            self.current = Some(next.clone());
            return Selection::Next(next);
        }

        if self.autoplay_enabled {
            if let Some(current) = &self.current {
                return Selection::Autoplay(current.clone());
            }
        }

        info!("📭 Cola vacía, no hay siguiente track");
        Selection::Exhausted
    }

    /// Aplica el track resuelto por autoplay
    pub fn commit_autoplay(&mut self, track: Track) {
        info!("🔄 Autoplay: {}", track.title());
        self.previous = self.current.take();
        self.current = Some(track);
    }

    /// Vuelve al track anterior; el actual pasa al frente de la cola.
    ///
    /// Devuelve el track restaurado, o None si no hay historial.
    pub fn rewind(&mut self) -> Option<Track> {
        let previous = self.previous.take()?;
        if let Some(current) = self.current.take() {
            self.queue.push_front(current);
        }
        info!("⏮️ Volviendo a: {}", previous.title());
        self.current = Some(previous.clone());
        Some(previous)
    }

    pub fn adjust_volume(&mut self, delta: f32) -> f32 {
        self.volume = clamp_volume(self.volume + delta);
        debug!("🔊 Volumen ajustado a {}%", (self.volume * 100.0).round() as u32);
        self.volume
    }

    /// Mezcla la cola
    pub fn shuffle(&mut self) {
        self.shuffle_with(&mut rand::thread_rng());
    }

    pub fn shuffle_with<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if self.queue.len() <= 1 {
            return;
        }
        self.queue.make_contiguous().shuffle(rng);
        info!("🔀 Cola mezclada ({} canciones)", self.queue.len());
    }

    pub fn toggle_loop(&mut self) -> bool {
        self.loop_enabled = !self.loop_enabled;
        if self.loop_enabled {
            info!("🔁 Loop activado");
        } else {
            info!("➡️ Loop desactivado");
        }
        self.loop_enabled
    }

    pub fn toggle_autoplay(&mut self) -> bool {
        self.autoplay_enabled = !self.autoplay_enabled;
        if self.autoplay_enabled {
            info!("🔄 Autoplay activado");
        } else {
            info!("⏹️ Autoplay desactivado");
        }
        self.autoplay_enabled
    }

    /// Limpia todo y marca la sesión como cerrada
    pub fn close(&mut self) {
        self.queue.clear();
        self.current = None;
        self.previous = None;
        self.status = PlaybackStatus::Idle;
        self.advancing = false;
        self.closed = true;
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn previous(&self) -> Option<&Track> {
        self.previous.as_ref()
    }

    pub fn queue(&self) -> &VecDeque<Track> {
        &self.queue
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn is_loop(&self) -> bool {
        self.loop_enabled
    }

    pub fn is_autoplay(&self) -> bool {
        self.autoplay_enabled
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            current: self.current.clone(),
            previous: self.previous.clone(),
            queue: self.queue.iter().cloned().collect(),
            loop_enabled: self.loop_enabled,
            autoplay_enabled: self.autoplay_enabled,
            volume: self.volume,
            status: self.status,
        }
    }
}

/// Copia de solo lectura del estado de una sesión
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub current: Option<Track>,
    pub previous: Option<Track>,
    pub queue: Vec<Track>,
    pub loop_enabled: bool,
    pub autoplay_enabled: bool,
    pub volume: f32,
    pub status: PlaybackStatus,
}

impl SessionSnapshot {
    /// Duración total de la cola más el track actual
    pub fn total_seconds(&self) -> u64 {
        self.current
            .iter()
            .chain(self.queue.iter())
            .map(Track::duration_seconds)
            .sum()
    }
}

/// Redondea a centésimas y limita al rango permitido
pub fn clamp_volume(volume: f32) -> f32 {
    ((volume * 100.0).round() / 100.0).clamp(MIN_VOLUME, MAX_VOLUME)
}
