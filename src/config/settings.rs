use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::player::PlayerOptions;
use crate::recorder::RecorderOptions;
use crate::transport::server::ServerConfig;
use crate::util::paths::{chunks_dir, config_path};

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Recorder throttles, buffering and debug output
    pub recorder: RecorderOptions,
    /// Player pacing and overlay timings
    pub player: PlayerOptions,
    /// Where the chunk store keeps sessions
    pub store_dir: PathBuf,
    /// Chunk server bind address
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recorder: RecorderOptions::default(),
            player: PlayerOptions::default(),
            store_dir: chunks_dir(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TomlRecorderConfig {
    pub scroll_throttle_ms: Option<u64>,
    pub pointer_throttle_ms: Option<u64>,
    pub buffer_size: Option<usize>,
    pub max_emit_size: Option<usize>,
    pub debug: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TomlPlayerConfig {
    pub speed: Option<u32>,
    pub fast_forward_threshold_ms: Option<u64>,
    pub contiguous_window_ms: Option<u64>,
    pub click_indicator_ms: Option<u64>,
    pub hint_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlStoreConfig {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TomlServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cors_permissive: Option<bool>,
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub recorder: Option<TomlRecorderConfig>,
    pub player: Option<TomlPlayerConfig>,
    pub store: Option<TomlStoreConfig>,
    pub server: Option<TomlServerConfig>,
}

impl Config {
    /// Load configuration from the default location, merging with defaults.
    /// Creates the example file on first run.
    pub fn load() -> Self {
        let config_file = config_path();
        if !config_file.exists() {
            Self::create_default_config(&config_file);
        }
        Self::load_from(&config_file)
    }

    /// Load configuration from `path`. A missing, unreadable or invalid file
    /// yields the defaults.
    pub fn load_from(path: &Path) -> Self {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "cannot read config, using defaults");
                }
                return Self::default();
            }
        };
        match Self::from_toml_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "invalid config, using defaults");
                Self::default()
            }
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        let toml_config: TomlConfig = toml::from_str(contents)?;
        let mut config = Config::default();
        config.merge(toml_config);
        Ok(config)
    }

    fn merge(&mut self, toml_config: TomlConfig) {
        if let Some(recorder) = toml_config.recorder {
            if let Some(ms) = recorder.scroll_throttle_ms {
                self.recorder.scroll_throttle_ms = ms;
            }
            if let Some(ms) = recorder.pointer_throttle_ms {
                self.recorder.pointer_throttle_ms = ms;
            }
            if let Some(size) = recorder.buffer_size {
                self.recorder.buffer_size = size;
            }
            if let Some(size) = recorder.max_emit_size {
                self.recorder.max_emit_size = size.max(1);
            }
            if let Some(debug) = recorder.debug {
                self.recorder.debug = debug;
            }
        }

        if let Some(player) = toml_config.player {
            if let Some(speed) = player.speed {
                self.player.speed = speed;
            }
            if let Some(ms) = player.fast_forward_threshold_ms {
                self.player.fast_forward_threshold_ms = ms;
            }
            if let Some(ms) = player.contiguous_window_ms {
                self.player.contiguous_window_ms = ms;
            }
            if let Some(ms) = player.click_indicator_ms {
                self.player.click_indicator_ms = ms;
            }
            if let Some(ms) = player.hint_ms {
                self.player.hint_ms = ms;
            }
        }

        if let Some(dir) = toml_config.store.and_then(|store| store.dir) {
            self.store_dir = dir;
        }

        if let Some(server) = toml_config.server {
            if let Some(host) = server.host {
                self.server.host = host;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(cors_permissive) = server.cors_permissive {
                self.server.cors_permissive = cors_permissive;
            }
        }
    }

    /// Create the default config file from the bundled example
    fn create_default_config(path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                tracing::warn!(path = %parent.display(), error = %e, "Failed to create config directory");
                return;
            }
        }
        if let Err(e) = fs::write(path, EXAMPLE_CONFIG) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to write default config");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_config_parses_to_defaults() {
        let config = Config::from_toml_str(EXAMPLE_CONFIG).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn merges_sections_over_defaults() {
        let config = Config::from_toml_str(
            r#"
            [recorder]
            scroll-throttle-ms = 250
            debug = true

            [player]
            speed = 3

            [store]
            dir = "/tmp/domtape-store"

            [server]
            port = 8080
            "#,
        )
        .unwrap();

        assert_eq!(config.recorder.scroll_throttle_ms, 250);
        assert_eq!(config.recorder.pointer_throttle_ms, 100);
        assert!(config.recorder.debug);
        assert_eq!(config.player.speed, 3);
        assert_eq!(config.player.fast_forward_threshold_ms, 2000);
        assert_eq!(config.store_dir, PathBuf::from("/tmp/domtape-store"));
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn invalid_or_missing_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert_eq!(Config::load_from(&path), Config::default());

        fs::write(&path, "[player]\nspeed = \"fast\"\n").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }
}
