use sloggers::{Config, LoggerConfig};

use crate::config::LogConfig;

/// Builds the process-wide logger from `config`, the same way the lineage this binary comes
/// from does: assemble a small TOML document describing the drain and hand it to
/// `sloggers`' own config type rather than calling its builders directly.
pub fn build(config: &LogConfig) -> slog::Logger {
    let toml = format!(
        "type = \"terminal\"\nlevel = \"{}\"\ndestination = \"{}\"\n",
        config.level, config.destination
    );
    let parsed: LoggerConfig = serdeconv::from_toml_str(&toml).expect("invalid logging configuration");
    parsed.build_logger().expect("failed to build logger")
}
