use serenity::{
    all::ButtonStyle,
    builder::{CreateActionRow, CreateButton},
};

/// IDs personalizados para los botones del panel
pub mod button_ids {
    pub const VOLUME_DOWN: &str = "music_volume_down";
    pub const VOLUME_UP: &str = "music_volume_up";
    pub const BACK: &str = "music_back";
    pub const PLAY_PAUSE: &str = "music_play_pause";
    pub const SKIP: &str = "music_skip";
    pub const SHUFFLE: &str = "music_shuffle";
    pub const LOOP_TRACK: &str = "music_loop";
    pub const STOP: &str = "music_stop";
    pub const AUTOPLAY: &str = "music_autoplay";
    pub const PLAYLIST: &str = "music_playlist";
}

/// Acción de un botón del panel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelAction {
    VolumeDown,
    VolumeUp,
    Back,
    PauseResume,
    Skip,
    Shuffle,
    Loop,
    Stop,
    Autoplay,
    Playlist,
}

impl PanelAction {
    pub fn from_custom_id(custom_id: &str) -> Option<Self> {
        let action = match custom_id {
            button_ids::VOLUME_DOWN => Self::VolumeDown,
            button_ids::VOLUME_UP => Self::VolumeUp,
            button_ids::BACK => Self::Back,
            button_ids::PLAY_PAUSE => Self::PauseResume,
            button_ids::SKIP => Self::Skip,
            button_ids::SHUFFLE => Self::Shuffle,
            button_ids::LOOP_TRACK => Self::Loop,
            button_ids::STOP => Self::Stop,
            button_ids::AUTOPLAY => Self::Autoplay,
            button_ids::PLAYLIST => Self::Playlist,
            _ => return None,
        };
        Some(action)
    }

    pub fn custom_id(self) -> &'static str {
        match self {
            Self::VolumeDown => button_ids::VOLUME_DOWN,
            Self::VolumeUp => button_ids::VOLUME_UP,
            Self::Back => button_ids::BACK,
            Self::PauseResume => button_ids::PLAY_PAUSE,
            Self::Skip => button_ids::SKIP,
            Self::Shuffle => button_ids::SHUFFLE,
            Self::Loop => button_ids::LOOP_TRACK,
            Self::Stop => button_ids::STOP,
            Self::Autoplay => button_ids::AUTOPLAY,
            Self::Playlist => button_ids::PLAYLIST,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::VolumeDown => "🔉 Bajar",
            Self::VolumeUp => "🔊 Subir",
            Self::Back => "⏮ Anterior",
            Self::PauseResume => "⏸ Pausa/▶ Seguir",
            Self::Skip => "⏭ Saltar",
            Self::Shuffle => "🔀 Mezclar",
            Self::Loop => "🔁 Loop",
            Self::Stop => "⏹ Detener",
            Self::Autoplay => "🔄 AutoPlay",
            Self::Playlist => "📃 Playlist",
        }
    }

    fn style(self) -> ButtonStyle {
        match self {
            Self::PauseResume | Self::Autoplay | Self::Playlist => ButtonStyle::Primary,
            Self::Stop => ButtonStyle::Danger,
            _ => ButtonStyle::Secondary,
        }
    }
}

const FIRST_ROW: [PanelAction; 5] = [
    PanelAction::VolumeDown,
    PanelAction::VolumeUp,
    PanelAction::Back,
    PanelAction::PauseResume,
    PanelAction::Skip,
];

const SECOND_ROW: [PanelAction; 5] = [
    PanelAction::Shuffle,
    PanelAction::Loop,
    PanelAction::Stop,
    PanelAction::Autoplay,
    PanelAction::Playlist,
];

/// Crea los controles del panel de música (dos filas de cinco botones)
pub fn create_panel_buttons() -> Vec<CreateActionRow> {
    [FIRST_ROW, SECOND_ROW]
        .iter()
        .map(|row| {
            CreateActionRow::Buttons(
                row.iter()
                    .map(|action| {
                        CreateButton::new(action.custom_id())
                            .label(action.label())
                            .style(action.style())
                    })
                    .collect(),
            )
        })
        .collect()
}
