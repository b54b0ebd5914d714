mod auth;
mod bridge;
mod cli;
mod config;
mod console;
mod daemon;
mod websocket;

use anyhow::Context;
use clap::Parser;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use bridge::Bridge;
use cli::chat;

#[derive(Parser)]
#[command(name = "console-bridge")]
#[command(about = "Command/response bridge for a Pterodactyl server console", long_about = None)]
struct Cli {
    #[arg(long = "dev")]
    dev: bool,

    #[arg(long = "config", default_value = "config.json")]
    config: String,

    /// Run one chat command, print the reply and exit
    #[arg(long = "exec")]
    exec: Option<String>,

    /// How long to wait for the console before running --exec
    #[arg(long = "wait-secs", default_value_t = 15)]
    wait_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.dev {
        // Dev mode takes its filter from RUST_LOG, debug by default
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    let config = config::config::Config::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config))?;

    let bridge = Bridge::new(config.clone()).context("Failed to build panel client")?;

    if let Some(line) = cli.exec {
        return run_once(&bridge, &line, Duration::from_secs(cli.wait_secs)).await;
    }

    daemon::start::print_banner(&config);

    // Surface connection changes at the prompt
    let mut state_rx = bridge.subscribe_state();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow_and_update();
            tracing::info!("Console connection: {}", state);
        }
    });

    bridge.start().await;
    interactive(&bridge).await?;
    bridge.stop().await;
    Ok(())
}

async fn run_once(bridge: &Bridge, line: &str, wait: Duration) -> anyhow::Result<()> {
    let command = chat::parse(line).map_err(anyhow::Error::msg)?;

    bridge.start().await;
    if !bridge.wait_until_live(wait).await {
        tracing::warn!("Console not live after {:?} (state: {})", wait, bridge.status());
    }

    let reply = chat::execute(bridge, command).await;
    println!("{}", reply);

    bridge.stop().await;
    Ok(())
}

async fn interactive(bridge: &Bridge) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let shutdown = daemon::start::shutdown_signal();
    tokio::pin!(shutdown);

    println!("Type /help for commands.");
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };

        // EOF
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        if matches!(line.trim(), "exit" | "quit" | "/exit" | "/quit") {
            break;
        }

        let reply = match chat::parse(&line) {
            Ok(command) => chat::execute(bridge, command).await,
            Err(message) => message,
        };
        println!("{}", reply);
    }

    tracing::info!("Shutting down...");
    Ok(())
}
