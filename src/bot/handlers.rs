use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::{
        application::{CommandInteraction, ComponentInteraction},
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{debug, info, warn};

use crate::{
    audio::{
        player::PlaybackError,
        queue::PlaybackStatus,
        registry::SessionId,
        VOLUME_STEP,
    },
    bot::JukeboxBot,
    sources::Requester,
    ui::{
        buttons::{self, PanelAction},
        embeds,
    },
};

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, guild_id, bot).await?,
        "stop" => handle_stop(ctx, &command, guild_id, bot).await?,
        "queue" => handle_queue(ctx, &command, guild_id, bot).await?,
        _ => {
            reply_ephemeral(ctx, &command, "❌ Comando no reconocido").await?;
        }
    }

    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &JukeboxBot,
) -> Result<()> {
    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "query")
        .and_then(|opt| opt.value.as_str())
        .ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?;

    let Some(voice_channel_id) = get_user_voice_channel(ctx, guild_id, command.user.id) else {
        reply_ephemeral(ctx, command, "❌ ¡Entra a un canal de voz primero!").await?;
        return Ok(());
    };

    // Defer la respuesta ya que resolver puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    if bot.bot_voice_channel(ctx, guild_id).await != Some(voice_channel_id) {
        bot.join_voice_channel(ctx, guild_id, voice_channel_id).await?;
    }

    let session = SessionId::from(guild_id);
    let requester = Requester::new(command.user.id.get(), command.user.display_name());

    match bot.engine.play(session, query, requester).await {
        Ok(track) if !bot.engine.is_active(session) => {
            // La sesión terminó durante el arranque; no hay panel que mantener
            warn!("❌ '{}' no pudo iniciar en guild {}", track.title(), guild_id);
            command
                .edit_response(
                    &ctx.http,
                    EditInteractionResponse::new()
                        .content(format!("❌ No se pudo reproducir: {}", track.title())),
                )
                .await?;
        }
        Ok(track) => {
            let embed = embeds::create_panel_embed(&track, Some(command.user.face()));
            let message = command
                .edit_response(
                    &ctx.http,
                    EditInteractionResponse::new()
                        .embed(embed)
                        .components(buttons::create_panel_buttons()),
                )
                .await?;
            bot.panels.track(session, command.channel_id, message.id);
        }
        Err(e) => {
            warn!("❌ No se pudo reproducir '{}' en guild {}: {}", query, guild_id, e);
            command
                .edit_response(
                    &ctx.http,
                    EditInteractionResponse::new().content(format!("❌ Error: {}", e)),
                )
                .await?;

            // No quedarse en el canal si nunca empezó una sesión
            if !bot.engine.is_active(session) {
                bot.leave_voice_channel(ctx, guild_id).await?;
            }
        }
    }

    Ok(())
}

async fn handle_stop(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &JukeboxBot,
) -> Result<()> {
    match bot.engine.stop(SessionId::from(guild_id)).await {
        Ok(()) => {
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new().content("⏹️ Detenido y desconectado"),
                    ),
                )
                .await?;
        }
        Err(e) => {
            debug!("Stop sin sesión en guild {}: {}", guild_id, e);
            reply_ephemeral(ctx, command, "❌ No estoy conectado").await?;
        }
    }

    Ok(())
}

async fn handle_queue(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &JukeboxBot,
) -> Result<()> {
    let Some(snapshot) = bot.engine.snapshot(SessionId::from(guild_id)).await else {
        reply_ephemeral(ctx, command, "📃 No hay nada reproduciéndose").await?;
        return Ok(());
    };

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .embed(embeds::create_queue_embed(&snapshot))
                    .ephemeral(true),
            ),
        )
        .await?;

    Ok(())
}

/// Maneja los botones del panel de música
pub async fn handle_component(
    ctx: &Context,
    component: ComponentInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    let guild_id = component
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Componente usado fuera de un servidor"))?;

    info!(
        "🔘 Botón {} presionado por {} en guild {}",
        component.data.custom_id, component.user.name, guild_id
    );

    let Some(action) = PanelAction::from_custom_id(&component.data.custom_id) else {
        debug!("Componente no manejado: {}", component.data.custom_id);
        return component_reply(ctx, &component, "⚠️ Acción no reconocida").await;
    };

    // Solo quien comparte el canal de voz con el bot puede usar el panel
    let Some(bot_channel) = bot.bot_voice_channel(ctx, guild_id).await else {
        return component_reply(ctx, &component, "❌ No estoy conectado").await;
    };
    if get_user_voice_channel(ctx, guild_id, component.user.id) != Some(bot_channel) {
        return component_reply(ctx, &component, "❌ ¡Debes estar en el mismo canal de voz!").await;
    }

    let session = SessionId::from(guild_id);
    let engine = &bot.engine;

    let outcome: Result<String, PlaybackError> = match action {
        PanelAction::VolumeDown => engine
            .set_volume(session, -VOLUME_STEP)
            .await
            .map(|v| format!("🔉 Volumen: {}%", volume_percent(v))),
        PanelAction::VolumeUp => engine
            .set_volume(session, VOLUME_STEP)
            .await
            .map(|v| format!("🔊 Volumen: {}%", volume_percent(v))),
        PanelAction::Back => engine
            .back(session)
            .await
            .map(|track| format!("⏮ Volviendo a: {}", track.title())),
        PanelAction::PauseResume => engine.pause_resume(session).await.map(|status| match status {
            PlaybackStatus::Paused => "⏸ Pausado".to_string(),
            _ => "▶ Reanudado".to_string(),
        }),
        PanelAction::Skip => Ok(if engine.skip(session).await {
            "⏭ Saltado".to_string()
        } else {
            "❌ No hay nada reproduciéndose".to_string()
        }),
        PanelAction::Shuffle => engine
            .shuffle_queue(session)
            .await
            .map(|_| "🔀 Cola mezclada".to_string()),
        PanelAction::Loop => engine
            .toggle_loop(session)
            .await
            .map(|on| format!("🔁 Loop {}", if on { "activado" } else { "desactivado" })),
        PanelAction::Autoplay => engine
            .toggle_autoplay(session)
            .await
            .map(|on| format!("🔄 AutoPlay {}", if on { "activado" } else { "desactivado" })),
        PanelAction::Playlist => match engine.snapshot(session).await {
            Some(snapshot) if snapshot.queue.is_empty() => Ok("📃 La cola está vacía".to_string()),
            Some(snapshot) => Ok(format!("📃 Playlist:\n{}", embeds::queue_listing(&snapshot))),
            None => Err(PlaybackError::NoSession(session)),
        },
        PanelAction::Stop => {
            return match engine.stop(session).await {
                Ok(()) => {
                    component
                        .create_response(
                            &ctx.http,
                            CreateInteractionResponse::UpdateMessage(
                                CreateInteractionResponseMessage::new()
                                    .content("⏹️ Detenido y desconectado")
                                    .embeds(Vec::new())
                                    .components(Vec::new()),
                            ),
                        )
                        .await?;
                    Ok(())
                }
                Err(e) => component_reply(ctx, &component, &error_message(&e)).await,
            };
        }
    };

    let content = outcome.unwrap_or_else(|e| error_message(&e));
    component_reply(ctx, &component, &content).await
}

/// Texto para el usuario según el error de reproducción
fn error_message(error: &PlaybackError) -> String {
    match error {
        PlaybackError::NoHistory => "❌ No hay canción anterior".to_string(),
        PlaybackError::NothingPlaying => "❌ No hay nada reproduciéndose".to_string(),
        PlaybackError::NoSession(_) => "❌ No estoy conectado".to_string(),
        other => format!("❌ Error: {}", other),
    }
}

fn volume_percent(volume: f32) -> u32 {
    (volume * 100.0).round() as u32
}

async fn reply_ephemeral(ctx: &Context, command: &CommandInteraction, content: &str) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}

async fn component_reply(ctx: &Context, component: &ComponentInteraction, content: &str) -> Result<()> {
    component
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}
