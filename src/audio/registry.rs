use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    queue::SessionState,
    sink::{Sink, SinkFactory},
};

/// Identificador de sesión (una por guild)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SessionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Una sesión: su estado bajo lock propio y el sink que le pertenece
pub struct Session {
    pub id: SessionId,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) sink: Arc<dyn Sink>,
}

impl Session {
    fn new(id: SessionId, state: SessionState, sink: Arc<dyn Sink>) -> Self {
        Self {
            id,
            state: Mutex::new(state),
            sink,
        }
    }
}

/// Mapa concurrente guild -> sesión.
///
/// Operaciones sobre guilds distintas no se bloquean entre sí.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    sinks: Arc<dyn SinkFactory>,
}

impl SessionRegistry {
    pub fn new(sinks: Arc<dyn SinkFactory>) -> Self {
        Self {
            sessions: DashMap::new(),
            sinks,
        }
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|s| s.clone())
    }

    /// Único punto de creación de sesiones
    pub fn get_or_create(&self, id: SessionId, init: impl FnOnce() -> SessionState) -> Arc<Session> {
        self.sessions
            .entry(id)
            .or_insert_with(|| {
                debug!("🆕 Nueva sesión para guild {}", id);
                Arc::new(Session::new(id, init(), self.sinks.create(id)))
            })
            .clone()
    }

    /// Único punto de destrucción. Solo elimina esta instancia exacta,
    /// nunca una sesión nueva creada con el mismo id.
    pub fn remove(&self, session: &Arc<Session>) -> bool {
        let removed = self
            .sessions
            .remove_if(&session.id, |_, current| Arc::ptr_eq(current, session))
            .is_some();
        if removed {
            debug!("🗑️ Sesión eliminada para guild {}", session.id);
        }
        removed
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
