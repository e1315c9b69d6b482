use std::path::Path;

use serde::{Deserialize, Serialize};
use slog::Logger;

pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:1080";

#[derive(Serialize, Deserialize, Clone)]
pub struct LogConfig {
    pub level: String,
    pub destination: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig { level: "info".to_string(), destination: "stderr".to_string() }
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct ProxyConfig {
    pub listen_address: String,
    pub backlog: i32,
    pub max_methods: u8,
    pub handshake_timeout_secs: u64,
    pub housekeeping_interval_secs: u64,
    pub log: LogConfig,
}

impl Default for ProxyConfig {
    fn default() -> ProxyConfig {
        ProxyConfig {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            backlog: 1024,
            max_methods: 8,
            handshake_timeout_secs: 10,
            housekeeping_interval_secs: 3,
            log: LogConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Reads and parses a TOML file at `path`. Unlike a hard `expect`, a missing or
    /// malformed config is not fatal here: the server has a complete, reasonable default
    /// and an unauthenticated proxy should not refuse to start over a config typo; the
    /// caller is still told about it via the returned warning message.
    pub fn load<P: AsRef<Path>>(path: P) -> (ProxyConfig, Option<String>) {
        match serdeconv::from_toml_file(path.as_ref()) {
            Ok(config) => (config, None),
            Err(err) => {
                let warning = format!(
                    "could not load configuration from {}: {err}; falling back to defaults",
                    path.as_ref().display()
                );
                (ProxyConfig::default(), Some(warning))
            }
        }
    }

    pub fn log_fallback_warning(log: &Logger, warning: &str) {
        slog::warn!(log, "{}", warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let config = ProxyConfig::default();
        assert_eq!(config.listen_address, "0.0.0.0:1080");
        assert_eq!(config.backlog, 1024);
        assert_eq!(config.max_methods, 8);
        assert_eq!(config.handshake_timeout_secs, 10);
        assert_eq!(config.housekeeping_interval_secs, 3);
    }

    #[test]
    fn load_falls_back_to_default_when_file_is_absent() {
        let (config, warning) = ProxyConfig::load("/nonexistent/socks5d.toml");
        assert_eq!(config.listen_address, ProxyConfig::default().listen_address);
        assert!(warning.is_some());
    }
}
