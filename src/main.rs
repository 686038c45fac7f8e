//! eio — Engine.IO server
//!
//! Serves the Engine.IO protocol (revision 3) over HTTP long-polling and
//! WebSocket, and echoes every message back to the session that sent it.
//!
//! Usage:
//!   eio                                        # Default port 3000, path /engine.io/
//!   eio --port 8080 --path /realtime/          # Custom port and mount path
//!   eio --transports websocket                 # WebSocket only
//!   eio --ping-interval-ms 5000 --verbose      # Faster heartbeat, debug logs

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eio_protocol::MessageKind;
use eio_server::{ConnectionHandler, EngineConfig, EngineServer, ServerConfig, Session, SessionError};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "eio", about = "Engine.IO echo server")]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "3000")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// Mount path of the engine endpoint
    #[arg(long, default_value = "/engine.io/")]
    path: String,

    /// Interval between heartbeat pings
    #[arg(long, default_value = "25000")]
    ping_interval_ms: u64,

    /// Silence after which a session is closed
    #[arg(long, default_value = "60000")]
    ping_timeout_ms: u64,

    /// Maximum time a polling request is held open
    #[arg(long, default_value = "30000")]
    poll_timeout_ms: u64,

    /// Maximum polling request body, in bytes
    #[arg(long, default_value = "1000000")]
    max_http_buffer_size: usize,

    /// Enabled transports, comma separated
    #[arg(long, value_delimiter = ',', default_value = "polling,websocket")]
    transports: Vec<String>,

    /// Disallow switching transports mid-session
    #[arg(long)]
    no_upgrades: bool,

    /// Name of the session id cookie
    #[arg(long, default_value = "io")]
    cookie: String,

    /// Do not set the session id cookie
    #[arg(long)]
    no_cookie: bool,

    /// Enable CORS
    #[arg(long)]
    cors: bool,

    /// Maximum concurrently open sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file (defaults to ~/.eio/logs/eio.log if no path given)
    #[arg(long, default_missing_value = "DEFAULT", num_args = 0..=1)]
    log_file: Option<String>,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            hostname: self.hostname.clone(),
            port: self.port,
            engine: EngineConfig {
                path: self.path.clone(),
                ping_interval: Duration::from_millis(self.ping_interval_ms),
                ping_timeout: Duration::from_millis(self.ping_timeout_ms),
                poll_timeout: Duration::from_millis(self.poll_timeout_ms),
                max_http_buffer_size: self.max_http_buffer_size,
                allow_upgrades: !self.no_upgrades,
                transports: self.transports.clone(),
                cookie: (!self.no_cookie).then(|| self.cookie.clone()),
                enable_cors: self.cors,
                max_sessions: self.max_sessions,
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Echo handler
// ─────────────────────────────────────────────────────────────────────────────

/// Sends every message straight back, keeping its kind.
struct EchoHandler;

impl ConnectionHandler for EchoHandler {
    async fn on_connect(&self, session: Arc<Session>) {
        info!("Client connected: {}", session.id());

        while let Ok(reader) = session.next_reader().await {
            let kind = reader.kind();
            let data = reader.into_bytes();
            if let Err(e) = echo(&session, kind, &data).await {
                debug!("Echo failed on {}: {e}", session.id());
                break;
            }
        }

        info!("Client disconnected: {}", session.id());
    }
}

async fn echo(session: &Session, kind: MessageKind, data: &[u8]) -> Result<(), SessionError> {
    loop {
        match session.next_writer(kind).await {
            Ok(mut writer) => {
                writer.write_all(data)?;
                return writer.close();
            }
            // Transport switch in flight
            Err(e) if e.is_retryable() => tokio::time::sleep(Duration::from_millis(10)).await,
            Err(e) => return Err(e),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    if let Some(ref log_file_arg) = cli.log_file {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        let log_path = if log_file_arg == "DEFAULT" {
            PathBuf::from(&home).join(".eio/logs/eio.log")
        } else {
            PathBuf::from(log_file_arg)
        };

        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let file = match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
        {
            Ok(file) => file,
            Err(e) => {
                eprintln!("Failed to open log file {}: {e}", log_path.display());
                std::process::exit(1);
            }
        };

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();

        eprintln!("Logging to {}", log_path.display());
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    };

    let config = cli.server_config();

    println!();
    println!("  Engine.IO server");
    println!();
    println!("  Binding:    {}:{}", config.hostname, config.port);
    println!("  Path:       {}", config.engine.path);
    println!("  Transports: {}", config.engine.transports.join(", "));
    println!(
        "  Heartbeat:  every {}ms, timeout {}ms",
        cli.ping_interval_ms, cli.ping_timeout_ms
    );
    println!();

    let mut server = match EngineServer::start(config, EchoHandler).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start server: {e}");
            std::process::exit(1);
        }
    };

    println!(
        "  Server running on http://{}:{}{}",
        cli.hostname,
        server.port(),
        server.engine().config().path
    );
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {e}");
    }

    println!();
    println!("  Shutting down...");
    server.stop().await;
    println!("  Server stopped.");
}
