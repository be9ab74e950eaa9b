//! # rollcall
//!
//! Dice server and client binary. `serve` answers roll requests with an RNG;
//! `roll` sends one batch request and prints the outcome.

#![deny(unsafe_code)]

mod responder;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use rollcall_client::{ClientConfig, ClientEvent, ClientEventKind, DiceClient};
use rollcall_core::{RollDescriptor, SupportedDice};
use rollcall_server::{DiceServer, ServerEvent, ServerEventKind, load_config_from_path};

/// rollcall dice protocol tools.
#[derive(Parser, Debug)]
#[command(name = "rollcall", about = "Remote dice rolling over WebSocket")]
struct Cli {
    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a server that rolls requested dice with a random number generator.
    Serve(ServeArgs),
    /// Connect to a server, request one batch of rolls and print the results.
    Roll(RollArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// JSON config file (missing file means defaults).
    #[arg(long, default_value = "rollcall.json")]
    config: PathBuf,

    /// Host to bind (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides config).
    #[arg(long)]
    port: Option<u16>,

    /// Supported dice, e.g. `4,6,8,12,20,100` or `all` (overrides config).
    #[arg(long)]
    dice: Option<SupportedDice>,

    /// Heartbeat interval in milliseconds (overrides config).
    #[arg(long)]
    heartbeat_ms: Option<u64>,
}

#[derive(Args, Debug)]
struct RollArgs {
    /// Server URL.
    #[arg(long, default_value = "ws://127.0.0.1:3423")]
    url: String,

    /// Seconds to wait for the response before cancelling.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Dice in `NdF` notation, e.g. `2d6 d20`.
    #[arg(required = true)]
    dice: Vec<RollDescriptor>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    rollcall_core::logging::init_subscriber(&cli.log_level);

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Roll(args) => roll(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut config = load_config_from_path(&args.config)
        .with_context(|| format!("Failed to load config: {}", args.config.display()))?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(dice) = args.dice {
        config.supported_dice = dice;
    }
    if let Some(ms) = args.heartbeat_ms {
        config.heartbeat_interval_ms = ms;
    }

    let server = DiceServer::new(config);
    let _ = server.on(ServerEventKind::ConnectionOpened, |e| {
        if let ServerEvent::ConnectionOpened { connection_id } = e {
            tracing::info!(%connection_id, "client connected");
        }
    });
    let _ = server.on(ServerEventKind::ConnectionClosed, |e| {
        if let ServerEvent::ConnectionClosed { connection_id } = e {
            tracing::info!(%connection_id, "client disconnected");
        }
    });
    let _ = server.on(ServerEventKind::Error, |e| {
        if let ServerEvent::Error { connection_id, error } = e {
            tracing::warn!(connection_id = ?connection_id, error = %error, "server error event");
        }
    });

    let responder = server.clone();
    let _ = server.on(ServerEventKind::RollRequested, move |e| {
        let ServerEvent::RollRequested {
            connection_id,
            request_id,
            rolls,
        } = e
        else {
            return;
        };
        let supported = responder.supported_dice();
        let result = responder::roll_batch(&mut rand::rng(), rolls, &supported)
            .map_err(anyhow::Error::from)
            .and_then(|completed| {
                responder
                    .send_roll_response(connection_id, request_id.clone(), completed)
                    .map_err(anyhow::Error::from)
            });
        match result {
            Ok(true) => tracing::info!(%connection_id, %request_id, count = rolls.len(), "roll answered"),
            Ok(false) => tracing::info!(%connection_id, %request_id, "requester went away"),
            Err(e) => tracing::error!(%request_id, error = %e, "failed to answer roll"),
        }
    });
    let _ = server.on(ServerEventKind::RollCancelled, |e| {
        if let ServerEvent::RollCancelled {
            connection_id,
            request_id,
        } = e
        {
            tracing::info!(%connection_id, %request_id, "roll cancelled by client");
        }
    });

    let addr = server.open().await.context("Failed to start server")?;
    tracing::info!(
        %addr,
        dice = ?server.supported_dice(),
        heartbeat_ms = server.config().heartbeat_interval_ms,
        "serving dice"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("shutting down");
    server.close().await;
    Ok(())
}

async fn roll(args: RollArgs) -> Result<()> {
    let client = DiceClient::new(ClientConfig {
        request_timeout_secs: args.timeout_secs,
    });
    let _ = client.on(ClientEventKind::Error, |e| {
        if let ClientEvent::Error { error } = e {
            tracing::error!(error = %error, "connection error");
        }
    });

    client
        .connect(&args.url)
        .await
        .with_context(|| format!("Failed to connect to {}", args.url))?;

    let (request_id, pending) = client.request_roll_await(args.dice)?;
    tracing::info!(%request_id, "request sent");

    let outcome = pending.await;
    client.close().await;
    if outcome.cancelled {
        bail!("request {request_id} was cancelled before the server answered");
    }

    println!("Request {request_id} completed, results:");
    for result in &outcome.completed_rolls {
        println!("{}", responder::format_result(result));
    }
    Ok(())
}
