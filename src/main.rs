//! Binary entrypoint for the thingy-bridge daemon.
//!
//! Commands:
//! - `start [--address <host:port>]` - connect to the aggregator and run until Ctrl-C
//! - `init` - write a starter `config.toml`
//! - `status` - validate the config file and print a summary
//!
//! See the library crate docs for module-level details: `thingy_bridge::`.
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{debug, info, warn};

use thingy_bridge::bridge::Bridge;
use thingy_bridge::config::Config;
use thingy_bridge::metrics;
use thingy_bridge::sink::MemoryHost;
use thingy_bridge::transport::TcpTransport;

#[derive(Parser)]
#[command(name = "thingy-bridge")]
#[command(about = "Bridge between a BLE Thingy aggregator and host data points")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the aggregator and bridge frames until interrupted
    Start {
        /// Aggregator relay address, overrides `aggregator.address`
        #[arg(short, long)]
        address: Option<String>,
    },
    /// Write a default configuration file
    Init,
    /// Validate the configuration and print a summary
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start { address } => {
            let mut config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            if let Some(address) = address {
                config.aggregator.address = address;
                config.validate()?;
            }
            info!("Starting thingy-bridge v{}", env!("CARGO_PKG_VERSION"));
            run(config).await?;
        }
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            println!("Wrote default configuration to {}", cli.config);
        }
        Commands::Status => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            let summary = serde_json::json!({
                "address": config.aggregator.address,
                "heartbeat_ms": config.timing.heartbeat_ms,
                "reconnect_delay_ms": config.timing.reconnect_delay_ms,
                "custom_ids": config.nodes.custom_ids,
                "sinks": config.sinks.len(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let host = Arc::new(MemoryHost::new());
    let transport = Arc::new(TcpTransport::new(
        config.aggregator.notify_channel.clone(),
        config.aggregator.command_channel.clone(),
    ));
    let bridge = Bridge::new(&config, host.clone(), transport);

    let accepted = bridge.register_all(&config.sinks);
    info!("{} of {} configured sinks registered", accepted, config.sinks.len());
    bridge.readiness().signal();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    // Reconnects are the supervisor's job once a first link exists; until
    // then keep retrying here.
    let mut connected = false;
    while !connected {
        tokio::select! {
            res = bridge.start() => match res {
                Ok(_) => {
                    info!("Connected to aggregator at {}", config.aggregator.address);
                    connected = true;
                }
                Err(e) => {
                    warn!(
                        "Failed to connect to aggregator at {}: {} (retrying in {:?})",
                        config.aggregator.address,
                        e,
                        config.timing.reconnect_delay()
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(config.timing.reconnect_delay()) => {}
                        _ = &mut shutdown => break,
                    }
                }
            },
            _ = &mut shutdown => break,
        }
    }

    if connected {
        shutdown.await?;
    }
    info!("Shutting down");
    if let Err(e) = bridge.shutdown().await {
        warn!("Teardown incomplete: {}", e);
    }

    debug!("final metrics: {}", serde_json::to_string(&metrics::snapshot())?);
    debug!("final sink values: {}", serde_json::to_string(&host.snapshot())?);
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Mutex::new(f);
        // Foreground runs echo to the console as well
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
