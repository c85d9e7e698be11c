use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo
    /// Usuario con control total (playfile, volumen sin límite). `None` = todos.
    pub bot_author: Option<u64>,
    pub debug_mode: bool,

    // Audio
    pub default_volume: f32,
    pub max_volume_percent: u32,
    pub download_playlist: bool,
    pub random_playlist: bool,

    // Procesos externos
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
    pub resolve_timeout_secs: u64,

    // UI
    pub queue_page_size: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),
            bot_author: std::env::var("BOT_AUTHOR_ID")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|id: &u64| *id != 0),
            debug_mode: std::env::var("DEBUG_MODE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,

            // Audio
            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "1.0".to_string())
                .parse()?,
            max_volume_percent: std::env::var("MAX_VOLUME_PERCENT")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            download_playlist: std::env::var("DOWNLOAD_PLAYLIST")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,
            random_playlist: std::env::var("RANDOM_PLAYLIST")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,

            // Procesos externos
            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string()),
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            resolve_timeout_secs: std::env::var("RESOLVE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,

            queue_page_size: std::env::var("QUEUE_PAGE_SIZE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Default volume must be between 0.0 and 1.0
    /// - The volume cap must be at least 1%
    /// - The resolve timeout and queue page size must be greater than 0
    /// - Executable paths must not be empty
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.default_volume) {
            anyhow::bail!(
                "Default volume must be between 0.0 and 1.0, got: {}",
                self.default_volume
            );
        }

        if self.max_volume_percent == 0 {
            anyhow::bail!("Max volume percent must be greater than 0");
        }

        if self.resolve_timeout_secs == 0 {
            anyhow::bail!("Resolve timeout must be greater than 0");
        }

        if self.queue_page_size == 0 {
            anyhow::bail!("Queue page size must be greater than 0");
        }

        if self.ytdlp_path.trim().is_empty() || self.ffmpeg_path.trim().is_empty() {
            anyhow::bail!("yt-dlp and ffmpeg paths must not be empty");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the Discord token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {}, Author: {})\n  \
            Audio: {}% vol, {}% max, playlist={}, random={}\n  \
            Processes: {} / {} ({}s resolve timeout)\n  \
            Debug: {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.bot_author.map_or("none".to_string(), |id| id.to_string()),
            (self.default_volume * 100.0) as u32,
            self.max_volume_percent,
            self.download_playlist,
            self.random_playlist,
            self.ytdlp_path,
            self.ffmpeg_path,
            self.resolve_timeout_secs,
            self.debug_mode,
        )
    }

    /// Configuración que necesita cada motor de reproducción.
    pub fn player_settings(&self) -> PlayerSettings {
        PlayerSettings {
            debug_mode: self.debug_mode,
            default_volume: self.default_volume,
            max_volume_percent: self.max_volume_percent,
            download_playlist: self.download_playlist,
            random_playlist: self.random_playlist,
            ytdlp_path: self.ytdlp_path.clone(),
            ffmpeg_path: self.ffmpeg_path.clone(),
            resolve_timeout: Duration::from_secs(self.resolve_timeout_secs),
            queue_page_size: self.queue_page_size,
        }
    }

    /// Si no hay autor configurado todos los usuarios tienen control total.
    pub fn is_privileged(&self, user_id: u64) -> bool {
        self.bot_author.map_or(true, |author| author == user_id)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,
            bot_author: None,
            debug_mode: false,

            default_volume: 1.0,
            max_volume_percent: 100,
            download_playlist: true,
            random_playlist: false,

            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            resolve_timeout_secs: 10,

            queue_page_size: 10,
        }
    }
}

/// Subconjunto de [`Config`] que usa el motor de reproducción.
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub debug_mode: bool,
    pub default_volume: f32,
    pub max_volume_percent: u32,
    pub download_playlist: bool,
    pub random_playlist: bool,
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
    pub resolve_timeout: Duration,
    pub queue_page_size: usize,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Config::default().player_settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_volume_above_one() {
        let config = Config {
            default_volume: 1.5,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn everyone_is_privileged_without_author() {
        let config = Config::default();
        assert!(config.is_privileged(42));

        let config = Config {
            bot_author: Some(7),
            ..Config::default()
        };
        assert!(config.is_privileged(7));
        assert!(!config.is_privileged(42));
    }

    #[test]
    fn summary_hides_token() {
        let config = Config {
            discord_token: "super-secret".to_string(),
            ..Config::default()
        };
        assert!(!config.summary().contains("super-secret"));
    }

    #[test]
    fn player_settings_carry_resolve_timeout() {
        let settings = Config::default().player_settings();
        assert_eq!(settings.resolve_timeout, Duration::from_secs(10));
        assert_eq!(settings.queue_page_size, 10);
    }
}
