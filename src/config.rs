// ABOUTME: Configuration module for the victorycard application
// ABOUTME: Provides process-level settings and environment variable handling

use crate::watch::WatchConfig;
use std::env;
use std::path::PathBuf;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8800;
const DEFAULT_DEBOUNCE_MS: u64 = 200;

/// Global configuration for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub reload_port: u16,
    pub debounce_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            reload_port: DEFAULT_PORT + 1,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let host = env::var("VICTORYCARD_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let port = env::var("VICTORYCARD_PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);
        let reload_port = env::var("VICTORYCARD_RELOAD_PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or_else(|| port.wrapping_add(1));
        let debounce_ms = env::var("VICTORYCARD_DEBOUNCE_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_DEBOUNCE_MS);

        Self {
            host,
            port,
            reload_port,
            debounce_ms,
        }
    }

    /// Get a watch configuration with defaults from this config
    ///
    /// An overridden `port` moves the default reload port along with it.
    pub fn get_watch_config(
        &self,
        deck_paths: Vec<PathBuf>,
        host: Option<String>,
        port: Option<u16>,
        reload_port: Option<u16>,
        debounce_ms: Option<u64>,
        serve: bool,
    ) -> WatchConfig {
        let reload_port = match (reload_port, port) {
            (Some(reload_port), _) => reload_port,
            (None, Some(port)) => port.wrapping_add(1),
            (None, None) => self.reload_port,
        };
        WatchConfig {
            deck_paths,
            debounce_ms: debounce_ms.unwrap_or(self.debounce_ms),
            serve,
            host: host.unwrap_or_else(|| self.host.clone()),
            port: port.unwrap_or(self.port),
            reload_port,
        }
    }
}
