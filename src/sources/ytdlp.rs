use async_trait::async_trait;
use serde::Deserialize;
use std::{path::PathBuf, process::Stdio, time::Duration};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{is_url, Requester, ResolutionError, Resolver, Track, DEFAULT_SOURCE_PAGE, UNKNOWN_UPLOADER};
use crate::config::Config;

/// Resolvedor que usa yt-dlp para obtener la URL de audio directa
pub struct YtDlpResolver {
    executable: String,
    cookies: Option<PathBuf>,
    timeout: Duration,
}

impl YtDlpResolver {
    pub fn new(executable: impl Into<String>, cookies: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            cookies,
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.ytdlp_path.clone(),
            config.ytdlp_cookies.clone(),
            Duration::from_secs(config.resolve_timeout_secs),
        )
    }

    /// Texto libre se convierte en búsqueda del primer resultado
    fn target_for(query: &str) -> String {
        let query = query.trim();
        if is_url(query) {
            query.to_string()
        } else {
            format!("ytsearch1:{}", query)
        }
    }

    fn command(&self, target: &str) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args([
            "--dump-single-json",
            "--format", "bestaudio/best",
            "--no-playlist",
            "--default-search", "ytsearch",
            "--source-address", "0.0.0.0",
            "--quiet",
            "--no-warnings",
        ]);

        // Agregar cookies si están disponibles
        if let Some(cookies) = &self.cookies {
            if cookies.exists() {
                cmd.arg("--cookies").arg(cookies);
            } else {
                warn!("🍪 Archivo de cookies no encontrado: {}", cookies.display());
            }
        }

        cmd.arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Resolver for YtDlpResolver {
    async fn resolve(&self, query: &str, requester: Requester) -> Result<Track, ResolutionError> {
        let target = Self::target_for(query);
        info!("🔍 Resolviendo con yt-dlp: {}", target);

        let output = tokio::time::timeout(self.timeout, self.command(&target).output())
            .await
            .map_err(|_| ResolutionError::Timeout(self.timeout.as_secs()))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("yt-dlp falló para '{}': {}", query, stderr.trim());
            return Err(ResolutionError::Process(stderr.trim().to_string()));
        }

        let info: VideoInfo = serde_json::from_slice(&output.stdout)
            .map_err(|e| ResolutionError::Malformed(e.to_string()))?;

        let track = track_from_info(info, query, requester)?;
        debug!("✅ Resuelto '{}' -> {}", query, track.title());
        Ok(track)
    }
}

/// Metadatos relevantes del JSON de yt-dlp
#[derive(Debug, Deserialize)]
struct VideoInfo {
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    #[serde(default)]
    formats: Vec<FormatInfo>,
    entries: Option<Vec<VideoInfo>>,
}

#[derive(Debug, Deserialize)]
struct FormatInfo {
    url: Option<String>,
}

fn track_from_info(mut info: VideoInfo, query: &str, requester: Requester) -> Result<Track, ResolutionError> {
    // Las búsquedas devuelven una lista; se toma la primera entrada
    if let Some(entries) = info.entries.take() {
        info = entries
            .into_iter()
            .next()
            .ok_or_else(|| ResolutionError::NoResults(query.to_string()))?;
    }

    let title = info
        .title
        .ok_or_else(|| ResolutionError::Malformed("falta el título".to_string()))?;

    let uri = info
        .url
        .or_else(|| info.formats.into_iter().find_map(|f| f.url))
        .ok_or_else(|| ResolutionError::Malformed(format!("sin URL reproducible para '{}'", title)))?;

    let duration = info
        .duration
        .filter(|d| d.is_finite() && *d > 0.0)
        .map(|d| d.round() as u64)
        .unwrap_or(0);

    Ok(Track::new(title, uri, requester)
        .with_source_page(info.webpage_url.unwrap_or_else(|| DEFAULT_SOURCE_PAGE.to_string()))
        .with_duration(duration)
        .with_uploader(info.uploader.unwrap_or_else(|| UNKNOWN_UPLOADER.to_string())))
}
