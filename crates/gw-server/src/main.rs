//! gangway demo daemon
//!
//! Runs the session server over SSH with an echo handler: shells echo
//! their input back, exec requests print the command line.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gw_core::config::{self, ServerConfig};
use gw_core::secrets_equal;
use gw_server::options;
use gw_server::transport::{host_key_fingerprint, load_or_generate_host_key, RusshTransport};
use gw_server::{
    AuthorizedKeys, Handler, Permissions, Server, ServerHandle, Session, Signal, Window,
};
use tokio::sync::watch;

/// Exit status of a shell interrupted with INT
const INTERRUPTED_EXIT_STATUS: u32 = 130;

#[derive(Parser)]
#[command(name = "gangway")]
#[command(about = "Embeddable SSH session server (echo demo)")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Additional authorized_keys file
    #[arg(short, long)]
    authorized_keys: Vec<PathBuf>,

    /// Accept this password for any user
    #[arg(long, env = "GANGWAY_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("gangway starting...");

    let mut config = load_config(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    config.authorized_keys.extend(args.authorized_keys);

    let host_key = load_or_generate_host_key(&config.host_key_path).await?;
    if let Some(fingerprint) = host_key_fingerprint(&host_key) {
        tracing::info!("Host key fingerprint: {}", fingerprint);
    }

    let auth_keys = if config.authorized_keys.is_empty() {
        AuthorizedKeys::new()
    } else {
        AuthorizedKeys::load_from_files(&config.authorized_keys)?
    };

    let mut server_options = vec![
        options::from_config(&config),
        options::pty_callback(|_user: &str, _permissions: &Permissions| true),
    ];

    let mut any_auth = false;
    if auth_keys.is_empty() {
        tracing::warn!("No authorized keys loaded - public key auth disabled");
    } else {
        any_auth = true;
        tracing::info!("Loaded {} authorized keys", auth_keys.len());
        server_options.push(options::public_key_auth(auth_keys));
    }

    if let Some(expected) = args.password {
        tracing::info!("Password auth enabled");
        any_auth = true;
        server_options.push(options::password_auth(
            move |_user: &str, password: &str| secrets_equal(password.as_bytes(), expected.as_bytes()),
        ));
    }

    if !any_auth {
        tracing::warn!("No authentication method configured - all connections will be rejected");
    }

    let transport = RusshTransport::new(host_key, &config);
    let handler: Arc<dyn Handler> = Arc::new(echo);
    let server = Server::with_options(transport, Some(handler), server_options)?;

    spawn_shutdown_listener(server.handle());

    server.listen_and_serve().await?;

    tracing::info!("gangway shutdown complete");
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<ServerConfig> {
    if let Some(config_path) = path {
        return config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path));
    }

    let default_path = config::default_config_path();
    if default_path.exists() {
        Ok(config::load_config(&default_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
            ServerConfig::default()
        }))
    } else {
        tracing::info!("Using default configuration");
        Ok(ServerConfig::default())
    }
}

/// Close the server on Ctrl+C or SIGTERM
fn spawn_shutdown_listener(handle: ServerHandle) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        handle.close();
    });
}

async fn echo(session: Session) {
    if let Some(command) = session.raw_command() {
        let _ = session.write(format!("{}\r\n", command).as_bytes()).await;
        return;
    }

    if let Some(name) = session.subsystem() {
        let _ = session
            .write_stderr(format!("unknown subsystem: {}\r\n", name).as_bytes())
            .await;
        let _ = session.set_exit_status(1);
        return;
    }

    let greeting = match session.pty() {
        Some(pty) => format!(
            "Hello {} ({} {}x{}). Ctrl+D to quit.\r\n",
            session.user(),
            pty.term,
            pty.window.width,
            pty.window.height
        ),
        None => format!("Hello {}. Ctrl+D to quit.\r\n", session.user()),
    };
    if session.write(greeting.as_bytes()).await.is_err() {
        return;
    }

    let mut signals = match session.signals() {
        Ok(signals) => signals,
        Err(_) => return,
    };
    let mut windows = session.window_changes();

    loop {
        tokio::select! {
            resized = next_window(&mut windows) => match resized {
                Some(window) => {
                    let notice = format!("[window {}x{}]\r\n", window.width, window.height);
                    if session.write(notice.as_bytes()).await.is_err() {
                        return;
                    }
                }
                None => windows = None,
            },
            signal = signals.recv() => match signal {
                Some(Signal::Int) => {
                    let _ = session.set_exit_status(INTERRUPTED_EXIT_STATUS);
                    return;
                }
                Some(other) => tracing::debug!("Ignoring {} in session {}", other, session.id()),
                None => return,
            },
            input = session.read() => match input {
                // Ctrl+D
                Ok(Some(data)) if data[..] == [4u8] => return,
                Ok(Some(data)) => {
                    if session.write(&data).await.is_err() {
                        return;
                    }
                }
                Ok(None) | Err(_) => return,
            },
        }
    }
}

/// Next window size; pends forever without a PTY
async fn next_window(windows: &mut Option<watch::Receiver<Window>>) -> Option<Window> {
    match windows {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}
