use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

/// Transport settings handed to the cast client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_receiver_port")]
    pub receiver_port: u16,
    #[serde(default = "default_media_server_port")]
    pub media_server_port: u16,
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// How long a discovery scan listens for answers.
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    /// Stylesheet served to the control pane.  Relative paths resolve
    /// against the config directory.
    #[serde(default = "default_stylesheet")]
    pub stylesheet: PathBuf,
    /// Directory the last playlist file was added from.
    #[serde(default)]
    pub open_file_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Flat playlist file, one absolute path per line.
    #[serde(default = "default_playlist_file")]
    pub playlist_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlaybackConfig {
    /// Start in single-play mode (no auto-advance after a track ends).
    #[serde(default)]
    pub single_play: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            receiver_port: default_receiver_port(),
            media_server_port: default_media_server_port(),
            discovery_port: default_discovery_port(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            stylesheet: default_stylesheet(),
            open_file_dir: None,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            playlist_file: default_playlist_file(),
        }
    }
}

fn default_receiver_port() -> u16 {
    platform::RECEIVER_PORT
}

fn default_media_server_port() -> u16 {
    platform::MEDIA_SERVER_PORT
}

fn default_discovery_port() -> u16 {
    platform::DISCOVERY_PORT
}

fn default_discovery_timeout_ms() -> u64 {
    500
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_stylesheet() -> PathBuf {
    PathBuf::from("default.css")
}

fn default_playlist_file() -> PathBuf {
    platform::data_dir().join("filepaths.conf")
}

impl Config {
    /// Load from `path`, writing the defaults there on first run.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    /// Remember the directory `file` was picked from.  Returns true when the
    /// stored value changed.
    pub fn remember_open_dir(&mut self, file: &Path) -> bool {
        let dir = match file.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => return false,
        };
        if self.ui.open_file_dir.as_deref() == Some(dir.as_path()) {
            return false;
        }
        self.ui.open_file_dir = Some(dir);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8990);
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert_eq!(config.client.receiver_port, 4004);
        assert_eq!(config.ui.stylesheet, PathBuf::from("default.css"));
        assert!(config.ui.open_file_dir.is_none());
        assert!(!config.playback.single_play);
        assert!(config
            .paths
            .playlist_file
            .ends_with("nymphcast-remote/filepaths.conf"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str("[http]\nport = 9000\n").unwrap();
        assert_eq!(config.http.port, 9000);
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert_eq!(config.client.discovery_timeout_ms, 500);
    }

    #[test]
    fn test_load_writes_defaults_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.http.port, 8990);
    }

    #[test]
    fn test_remember_open_dir() {
        let mut config = Config::default();
        assert!(config.remember_open_dir(Path::new("/music/album/track.flac")));
        assert_eq!(
            config.ui.open_file_dir.as_deref(),
            Some(Path::new("/music/album"))
        );
        assert!(!config.remember_open_dir(Path::new("/music/album/other.flac")));
        assert!(!config.remember_open_dir(Path::new("bare.flac")));
    }
}
