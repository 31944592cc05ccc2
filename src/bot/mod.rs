//! # Bot Module
//!
//! Discord front end for Open Jukebox.
//!
//! This module translates Discord events into [`PlaybackEngine`] calls:
//! - Slash command registration and handling (`/play`, `/stop`, `/queue`)
//! - The music panel buttons
//! - Voice channel joins through Songbird
//!
//! It never touches session state directly; every change goes through the engine.
//!
//! ## Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use open_jukebox::{audio::player::PlaybackEngine, bot::{panels::PanelTracker, JukeboxBot}, config::Config};
//! # fn example(engine: PlaybackEngine, panels: Arc<PanelTracker>) -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let bot = JukeboxBot::new(config, engine, panels);
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::{num::NonZeroU64, sync::Arc};
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod handlers;
pub mod panels;

use crate::{
    audio::{player::PlaybackEngine, registry::SessionId},
    config::Config,
};
use panels::PanelTracker;

impl From<GuildId> for SessionId {
    fn from(guild_id: GuildId) -> Self {
        SessionId(guild_id.get())
    }
}

/// Handler principal del bot.
///
/// Implementa el [`EventHandler`] de Serenity y delega toda la lógica de
/// reproducción al [`PlaybackEngine`].
pub struct JukeboxBot {
    /// Configuración cargada del entorno
    config: Arc<Config>,
    /// Motor de reproducción compartido por todas las guilds
    pub engine: PlaybackEngine,
    /// Paneles publicados, para limpiarlos al terminar la cola
    pub panels: Arc<PanelTracker>,
}

impl JukeboxBot {
    pub fn new(config: Config, engine: PlaybackEngine, panels: Arc<PanelTracker>) -> Self {
        Self {
            config: Arc::new(config),
            engine,
            panels,
        }
    }

    /// Registra los comandos slash, por guild si `GUILD_ID` está configurado
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id.and_then(NonZeroU64::new).map(GuildId::from) {
            Some(guild_id) => {
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);
                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }

    /// Conecta (o mueve) el bot al canal de voz indicado
    pub async fn join_voice_channel(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<()> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

        match manager.join(guild_id, channel_id).await {
            Ok(_call) => {
                info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);
                Ok(())
            }
            Err(e) => {
                error!("Error al conectar al canal de voz: {:?}", e);
                Err(anyhow::anyhow!("Error al conectar al canal de voz"))
            }
        }
    }

    /// Sale del canal de voz si el bot está conectado
    pub async fn leave_voice_channel(&self, ctx: &Context, guild_id: GuildId) -> Result<()> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

        if manager.get(guild_id).is_some() {
            manager.remove(guild_id).await?;
            info!("👋 Desconectado del canal de voz en guild {}", guild_id);
        }
        Ok(())
    }

    /// Canal de voz en el que está el bot, si está conectado
    pub async fn bot_voice_channel(&self, ctx: &Context, guild_id: GuildId) -> Option<ChannelId> {
        let manager = songbird::get(ctx).await?;
        let call = manager.get(guild_id)?;
        let call_lock = call.lock().await;
        call_lock
            .current_channel()
            .map(|channel_id| ChannelId::from(channel_id.0))
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        self.panels.attach_http(ctx.http.clone());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command_interaction) => {
                if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                    error!("Error manejando comando: {:?}", e);
                }
            }
            Interaction::Component(component_interaction) => {
                if let Err(e) = handlers::handle_component(&ctx, component_interaction, self).await
                {
                    error!("Error manejando componente: {:?}", e);
                }
            }
            _ => {}
        }
    }

    /// Si alguien desconecta al bot a mano, la sesión se cierra igual que con /stop
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }

        let Some(guild_id) = new.guild_id else {
            return;
        };
        info!("🔌 Bot desconectado en guild {}", guild_id);

        let session = SessionId::from(guild_id);
        if !self.engine.is_active(session) {
            return;
        }
        match self.engine.stop(session).await {
            Ok(()) => debug!("Sesión cerrada tras desconexión en guild {}", guild_id),
            Err(e) => warn!("Error al cerrar sesión en guild {}: {}", guild_id, e),
        }
    }
}
