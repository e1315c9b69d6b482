mod config;
mod logging;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use socks5_core::handler::RefusingHandler;
use socks5_core::registry::FreeListPool;
use socks5_core::server::{Server, ServerConfig};
use socks5_mio::{run_forever, Housekeeping, MioNotifier};

use config::ProxyConfig;

#[derive(Parser)]
#[command(name = "socks5d", about = "A SOCKS5 handshake proxy server")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, default_value = "./socks5d.toml")]
    config: String,

    /// Overrides the config file's listen_address.
    #[arg(long)]
    listen: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    let (mut proxy_config, fallback_warning) = ProxyConfig::load(&cli.config);
    if let Some(listen) = cli.listen {
        proxy_config.listen_address = listen;
    }

    let log = logging::build(&proxy_config.log);
    if let Some(warning) = &fallback_warning {
        ProxyConfig::log_fallback_warning(&log, warning);
    }

    if let Err(err) = run(proxy_config, &log) {
        slog::error!(log, "fatal startup error"; "error" => %err);
        std::process::exit(1);
    }
}

fn run(proxy_config: ProxyConfig, log: &slog::Logger) -> Result<(), socks5_core::error::ServerError> {
    let listener_address = proxy_config
        .listen_address
        .parse()
        .unwrap_or_else(|_| panic!("invalid listen_address: {}", proxy_config.listen_address));

    let server_config = ServerConfig {
        listener_address,
        backlog: proxy_config.backlog,
        max_methods: proxy_config.max_methods,
    };

    let pool = Box::new(FreeListPool::new(server_config.max_methods, log.clone()));
    // The core never dials upstream; see the crate's notes on the request-handling
    // extension point. Embedders that want to actually proxy CONNECT requests supply
    // their own `RequestHandler` here instead of `RefusingHandler`.
    let handler = Box::new(RefusingHandler);
    let notifier = MioNotifier::new().map_err(socks5_core::error::ServerError::Notifier)?;

    let mut server = Server::construct(server_config, pool, handler, notifier, log.clone())?;
    server.begin_listening()?;
    slog::info!(log, "listening"; "address" => %proxy_config.listen_address);

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown)).expect("failed to register signal handler");
    }

    let housekeeping = Housekeeping {
        interval: Duration::from_secs(proxy_config.housekeeping_interval_secs),
        handshake_timeout: Duration::from_secs(proxy_config.handshake_timeout_secs),
    };

    run_forever(&mut server, &shutdown, Duration::from_millis(250), housekeeping, log)
        .map_err(socks5_core::error::ServerError::Notifier)?;

    slog::info!(log, "shutdown complete");
    Ok(())
}
