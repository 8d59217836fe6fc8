//! # Call Monitor - Main Application Entry Point
//!
//! One binary, three roles:
//! - `serve`: the relay server that holds the remote API credentials and places calls
//! - `listen`: plays a call's live audio feed on the local output device
//! - `dial`: places a call through the relay, listens to it, and sends control messages
//!
//! ## Application Architecture:
//! - **config**: Handles application configuration (TOML files + environment variables)
//! - **state**: Manages shared server state and metrics
//! - **health**: Provides system health monitoring endpoints
//! - **middleware**: Request tracing and per-endpoint metrics
//! - **handlers**: HTTP request handlers for the relay endpoints
//! - **error**: Server error types and HTTP error responses
//! - **vapi**: Client for the remote calling API
//! - **audio / websocket**: The listen feed to speaker pipeline
//! - **control / dialer**: The listener's side of the relay

mod audio;
mod config;
mod control;
mod dialer;
mod error;
mod handlers;
mod health;
mod middleware;
mod state;
mod vapi;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use audio::session::RelaySession;
use clap::{Parser, Subcommand};
use config::AppConfig;
use control::CallControlClient;
use dialer::{ConsoleNotifier, Dialer};
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[derive(Parser, Debug)]
#[command(name = "call-monitor", version, about = "Place phone calls and listen in live")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server
    Serve,

    /// Play a call's live audio
    Listen {
        /// A listen URL (ws:// or wss://) or a page URL carrying a `listenUrl` query parameter
        target: String,
    },

    /// Place a call, listen to it, and send control messages typed on stdin
    Dial {
        /// Number to call, in E.164 format
        #[arg(long)]
        phone: String,

        /// Customer name passed to the assistant
        #[arg(long, default_value = "")]
        name: String,

        /// Relay server URL, overrides `client.server_url`
        #[arg(long, env = "RELAY_SERVER_URL")]
        server: Option<String>,

        /// Control message type, defaults to `assistant_message`
        #[arg(long = "type")]
        control_type: Option<String>,
    },
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();

    let config = AppConfig::load()?;
    config.validate()?;

    setup_signal_handlers();

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Listen { target } => listen(config, &target).await,
        Command::Dial {
            phone,
            name,
            server,
            control_type,
        } => {
            let server_url = server.unwrap_or_else(|| config.client.server_url.clone());
            dial(config, &server_url, &phone, &name, control_type.as_deref()).await
        }
    }
}

/// Run the relay server until a shutdown signal arrives.
async fn serve(config: AppConfig) -> Result<()> {
    config.validate_relay()?;

    info!("Starting call-monitor relay v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(handlers::json_config())
            .wrap(cors)
            .wrap(middleware::RequestTracing)
            .route("/initiate-call", web::post().to(handlers::initiate_call))
            .route("/control-call", web::post().to(handlers::control_call))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Relay one listen feed until it ends or the user interrupts.
async fn listen(config: AppConfig, target: &str) -> Result<()> {
    let dialer = Dialer::new(
        CallControlClient::new(&config.client.server_url),
        RelaySession::with_default_output(config.playback_format()),
        Arc::new(ConsoleNotifier),
    );

    let started = match dialer::listen_url_param(target) {
        Some(_) => dialer.launch(target).await && dialer.session().is_active(),
        None => dialer.listen_only(target).await,
    };
    if !started {
        return Ok(());
    }
    info!(
        session_id = ?dialer.session().session_id(),
        "Listening to {}; press Ctrl+C to stop",
        dialer.session().listen_url().unwrap_or_default()
    );

    tokio::select! {
        _ = dialer.session().wait_idle() => info!("Listen feed ended"),
        _ = wait_for_shutdown() => info!("Shutdown signal received"),
    }

    dialer.stop_listening().await;
    Ok(())
}

/// Interactive dialer on stdin.
///
/// Each line is sent to the call as a control message. `start` and `stop`
/// toggle listening; `quit` or end of input hangs up the listener.
async fn dial(
    config: AppConfig,
    server_url: &str,
    phone: &str,
    name: &str,
    control_type: Option<&str>,
) -> Result<()> {
    let dialer = Dialer::new(
        CallControlClient::new(server_url),
        RelaySession::with_default_output(config.playback_format()),
        Arc::new(ConsoleNotifier),
    );

    if dialer.submit_call(phone, name).await.is_none() {
        return Ok(());
    }
    if let Some(listen_url) = dialer.view().listen_url {
        println!("Listen URL: {}", listen_url);
    }
    dialer.start_listening().await;

    println!("Type a message and press enter to send it. Commands: start, stop, quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = wait_for_shutdown() => None,
        };

        let Some(line) = line else {
            break;
        };

        match line.trim() {
            "quit" => break,
            "start" => {
                dialer.start_listening().await;
            }
            "stop" => dialer.stop_listening().await,
            message => {
                dialer.send_control(control_type, message).await;
            }
        }
    }

    dialer.stop_listening().await;
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// `RUST_LOG` controls what gets logged; without it the default is
/// `call_monitor=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "call_monitor=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM and SIGINT and raise the global shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Resolve once the shutdown flag is set.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
