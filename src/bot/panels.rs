use async_trait::async_trait;
use dashmap::DashMap;
use serenity::{
    all::{ChannelId, MessageId},
    http::Http,
};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use crate::audio::{
    player::{EndReason, SessionEndNotifier},
    registry::SessionId,
};

const QUEUE_ENDED_MESSAGE: &str = "⏹️ Cola terminada. El bot salió del canal de voz.";

#[derive(Debug)]
struct PanelMessages {
    channel_id: ChannelId,
    messages: Vec<MessageId>,
}

/// Recuerda los paneles publicados por guild y los limpia cuando la sesión termina
#[derive(Default)]
pub struct PanelTracker {
    http: OnceLock<Arc<Http>>,
    panels: DashMap<SessionId, PanelMessages>,
}

impl PanelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// El cliente HTTP solo existe una vez conectado; se fija en `ready`
    pub fn attach_http(&self, http: Arc<Http>) {
        if self.http.set(http).is_err() {
            debug!("Cliente HTTP ya registrado para paneles");
        }
    }

    pub fn track(&self, session: SessionId, channel_id: ChannelId, message_id: MessageId) {
        let mut entry = self.panels.entry(session).or_insert_with(|| PanelMessages {
            channel_id,
            messages: Vec::new(),
        });
        if entry.channel_id != channel_id {
            // Los paneles viejos quedan en el canal anterior; se avisa en el último usado
            entry.channel_id = channel_id;
            entry.messages.clear();
        }
        entry.messages.push(message_id);
    }

    pub fn tracked(&self, session: SessionId) -> usize {
        self.panels.get(&session).map_or(0, |p| p.messages.len())
    }
}

#[async_trait]
impl SessionEndNotifier for PanelTracker {
    async fn on_session_ended(&self, session: SessionId, reason: EndReason) {
        let Some((_, panel)) = self.panels.remove(&session) else {
            return;
        };

        // Un stop explícito ya respondió al usuario
        if reason == EndReason::Stopped {
            return;
        }

        let Some(http) = self.http.get() else {
            warn!("Sin cliente HTTP para limpiar paneles de guild {}", session);
            return;
        };

        for message_id in panel.messages {
            if let Err(e) = panel.channel_id.delete_message(http, message_id).await {
                debug!("No se pudo borrar panel {}: {:?}", message_id, e);
            }
        }

        if let Err(e) = panel.channel_id.say(http, QUEUE_ENDED_MESSAGE).await {
            warn!("Error al avisar fin de cola en guild {}: {:?}", session, e);
        } else {
            info!("📭 Cola terminada en guild {}", session);
        }
    }
}
