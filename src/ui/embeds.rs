use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedAuthor, CreateEmbedFooter},
};

use crate::{audio::queue::SessionSnapshot, sources::Track};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const PANEL_BLURPLE: Colour = Colour::from_rgb(88, 101, 242);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Open Jukebox";

/// Máximo de canciones listadas en un embed de cola
const QUEUE_LISTING_LIMIT: usize = 15;

/// Panel de música que acompaña a los botones de control
pub fn create_panel_embed(track: &Track, requester_avatar: Option<String>) -> CreateEmbed {
    let requester = track.requester();

    let mut author = CreateEmbedAuthor::new(&requester.name);
    let mut footer = CreateEmbedFooter::new(format!("Solicitado por {}", requester.name));
    if let Some(avatar) = &requester_avatar {
        author = author.icon_url(avatar);
        footer = footer.icon_url(avatar);
    }

    let mut embed = CreateEmbed::default()
        .title("🎛️ Panel de Música")
        .description("¡Controla la música con los botones de abajo!")
        .color(colors::PANEL_BLURPLE)
        .author(author)
        .field("🎶 Canción", song_link(track), false)
        .field("🎧 Solicitado por", format!("<@{}>", requester.id), true)
        .field("⏱ Duración", format_duration(track.duration_seconds()), true)
        .field("✍ Autor", track.uploader(), true)
        .timestamp(Timestamp::now())
        .footer(footer);

    if let Some(avatar) = requester_avatar {
        embed = embed.thumbnail(avatar);
    }

    embed
}

/// Estado de la cola para `/queue` y el botón Playlist
pub fn create_queue_embed(snapshot: &SessionSnapshot) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📃 Cola de Reproducción")
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER));

    if let Some(current) = &snapshot.current {
        embed = embed.field("▶️ Sonando", song_link(current), false);
    }

    let description = if snapshot.queue.is_empty() {
        embed = embed.color(colors::NEUTRAL_GRAY);
        "📃 La cola está vacía".to_string()
    } else {
        queue_listing(snapshot)
    };

    let flags = format!(
        "🔁 Loop: {} • 🔄 AutoPlay: {} • 🔊 {}%",
        on_off(snapshot.loop_enabled),
        on_off(snapshot.autoplay_enabled),
        (snapshot.volume * 100.0).round() as u32
    );

    embed
        .description(description)
        .field("⚙️ Modo", flags, false)
        .field(
            "⏱ Duración total",
            format_duration(snapshot.total_seconds()),
            true,
        )
}

fn song_link(track: &Track) -> String {
    format!("[{}]({})", track.title(), track.source_page())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "activado"
    } else {
        "desactivado"
    }
}

/// Lista numerada de la cola, recortada a las primeras entradas
pub fn queue_listing(snapshot: &SessionSnapshot) -> String {
    let mut lines: Vec<String> = snapshot
        .queue
        .iter()
        .take(QUEUE_LISTING_LIMIT)
        .enumerate()
        .map(|(i, track)| format!("{}. {}", i + 1, track.title()))
        .collect();

    let hidden = snapshot.queue.len().saturating_sub(QUEUE_LISTING_LIMIT);
    if hidden > 0 {
        lines.push(format!("… y {} más", hidden));
    }

    lines.join("\n")
}

/// Formatea segundos como `Xm Ys`
pub fn format_duration(total_seconds: u64) -> String {
    format!("{}m {}s", total_seconds / 60, total_seconds % 60)
}
