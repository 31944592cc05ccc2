use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::audio::{MAX_VOLUME, MIN_VOLUME};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Audio
    pub default_volume: f32,
    pub enable_autoplay: bool,
    pub max_consecutive_failures: u8,

    // yt-dlp
    pub ytdlp_path: String,
    pub ytdlp_cookies: Option<PathBuf>,
    pub resolve_timeout_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Audio
            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "1.0".to_string())
                .parse()?,
            enable_autoplay: std::env::var("ENABLE_AUTOPLAY")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,
            max_consecutive_failures: std::env::var("MAX_CONSECUTIVE_FAILURES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,

            // yt-dlp
            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string()),
            ytdlp_cookies: std::env::var("YTDLP_COOKIES")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            resolve_timeout_secs: std::env::var("RESOLVE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be within the playback range (0.1 to 2.0)
    /// - At least one start failure must be tolerated
    /// - Resolution timeout must be non-zero
    pub fn validate(&self) -> Result<()> {
        if !(MIN_VOLUME..=MAX_VOLUME).contains(&self.default_volume) {
            anyhow::bail!(
                "Default volume must be between {} and {}, got: {}",
                MIN_VOLUME,
                MAX_VOLUME,
                self.default_volume
            );
        }

        if self.max_consecutive_failures == 0 {
            anyhow::bail!("Max consecutive failures must be greater than 0");
        }

        if self.resolve_timeout_secs == 0 {
            anyhow::bail!("Resolve timeout must be greater than 0");
        }

        if self.ytdlp_path.trim().is_empty() {
            anyhow::bail!("yt-dlp path cannot be empty");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the Discord token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: commands {}\n  \
            Audio: {}% vol, autoplay={}, {} failures max\n  \
            yt-dlp: {} (cookies: {}), timeout {}",
            self.guild_id.map_or("global".to_string(), |id| format!("guild {}", id)),
            (self.default_volume * 100.0).round() as u32,
            self.enable_autoplay,
            self.max_consecutive_failures,
            self.ytdlp_path,
            self.ytdlp_cookies
                .as_ref()
                .map_or("none".to_string(), |p| p.display().to_string()),
            humantime::format_duration(Duration::from_secs(self.resolve_timeout_secs)),
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            guild_id: None,

            // Audio defaults
            default_volume: 1.0,
            enable_autoplay: false,
            max_consecutive_failures: 3,

            // yt-dlp defaults
            ytdlp_path: "yt-dlp".to_string(),
            ytdlp_cookies: None,
            resolve_timeout_secs: 30,
        }
    }
}
