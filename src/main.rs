//! # ChatBridge — customer question relay
//!
//! Usage:
//!   chatbridge settings show                     # Print stored toggles
//!   chatbridge settings set --enabled true       # Update toggles
//!   chatbridge config init                       # Write default config.toml
//!   chatbridge simulate --seconds 20 --partial   # Run the bridge against simulated pages

mod runtime;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chatbridge_coordinator::{JsonSettingsStore, SettingsService};
use chatbridge_core::config::BridgeConfig;
use chatbridge_core::types::Settings;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::runtime::{compressed, demo_traffic, Bridge};

#[derive(Parser)]
#[command(name = "chatbridge", version, about = "🔗 ChatBridge — answer customer questions with an AI chat page")]
struct Cli {
    /// Config file (default ~/.chatbridge/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect or change the automation toggles
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run all contexts in-process against simulated pages
    Simulate {
        /// Stage replies instead of sending them
        #[arg(long)]
        partial: bool,
        /// How long to run
        #[arg(long, default_value = "15")]
        seconds: u64,
        /// Divide all configured timings by this factor
        #[arg(long, default_value = "20")]
        speedup: u64,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    Show,
    Set {
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long)]
        partial: Option<bool>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    Show,
}

fn load_config(path: Option<&PathBuf>) -> Result<BridgeConfig> {
    Ok(match path {
        Some(p) => BridgeConfig::load_from(p)?,
        None => BridgeConfig::load()?,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "chatbridge=debug,chatbridge_core=debug,chatbridge_coordinator=debug,chatbridge_extractor=debug,chatbridge_scanner=debug"
    } else {
        "chatbridge=info,chatbridge_core=info,chatbridge_coordinator=info,chatbridge_extractor=info,chatbridge_scanner=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    match cli.command {
        Command::Config { action: ConfigAction::Init { force } } => {
            let path = cli.config.unwrap_or_else(BridgeConfig::default_path);
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            BridgeConfig::default().save_to(&path)?;
            println!("✅ Wrote {}", path.display());
        }
        Command::Config { action: ConfigAction::Show } => {
            let config = load_config(cli.config.as_ref())?;
            print!("{}", config.to_toml()?);
        }
        Command::Settings { action } => {
            let config = load_config(cli.config.as_ref())?;
            let store = Arc::new(JsonSettingsStore::new(config.settings_file()));
            let service = SettingsService::load(store).await?;
            let settings = match action {
                SettingsAction::Show => service.get().await,
                SettingsAction::Set { enabled, partial } => {
                    let current = service.get().await;
                    let raw = serde_json::json!({
                        "isEnabled": enabled.unwrap_or(current.is_enabled),
                        "isPartialAutomation": partial.unwrap_or(current.is_partial_automation),
                    });
                    service.save(&raw).await?
                }
            };
            println!("enabled: {}", settings.is_enabled);
            println!("partial automation: {}", settings.is_partial_automation);
        }
        Command::Simulate { partial, seconds, speedup } => {
            let config = compressed(&load_config(cli.config.as_ref())?, speedup);
            simulate(&config, partial, Duration::from_secs(seconds)).await?;
        }
    }
    Ok(())
}

async fn simulate(config: &BridgeConfig, partial: bool, run_for: Duration) -> Result<()> {
    let settings = Settings { is_enabled: true, is_partial_automation: partial };
    let bridge = Bridge::launch(config, settings).await?;
    tracing::info!("🚀 Simulation running for {}s (partial: {partial})", run_for.as_secs());

    let start = tokio::time::Instant::now();
    let mut traffic = demo_traffic().into_iter().peekable();
    let mut tick = tokio::time::interval(Duration::from_millis(50));
    while start.elapsed() < run_for {
        tick.tick().await;
        while let Some((_, sender, text)) = traffic.next_if(|(at, _, _)| start.elapsed() >= *at) {
            tracing::info!("💬 {sender}: {text}");
            bridge.messenger.customer_says(sender, text);
        }
        if partial && bridge.messenger.continue_visible() {
            // Stand-in for the operator reviewing the draft.
            tokio::time::sleep(config.scanner.inter_question()).await;
            bridge.press_continue().await?;
        }
    }
    bridge.shutdown();

    println!("\n── Sent ──");
    for (sender, text) in bridge.messenger.sent() {
        println!("→ {sender}: {text}");
    }
    if partial {
        println!("\n── Drafts ──");
        for (_, sender, _) in demo_traffic() {
            if let Some(draft) = bridge.messenger.draft(sender).filter(|d| !d.is_empty()) {
                println!("✎ {sender}: {draft}");
            }
        }
    }
    println!("\n── Activity ──");
    for entry in bridge.activity().await? {
        println!("{} [{:?}] {}", entry.timestamp.format("%H:%M:%S"), entry.level, entry.message);
    }
    Ok(())
}
