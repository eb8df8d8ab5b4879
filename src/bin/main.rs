//! netstate-dns binary entry point.

use clap::{Parser, Subcommand};
use netstate_dns::config::load_json;
use netstate_dns::{telemetry, translate_diff, Config, Diff, DnsServer, Doc};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Declarative host network state with an in-memory DNS engine.
#[derive(Parser, Debug)]
#[command(name = "netstate-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "netstate-dns.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Serve DNS (the default).
    Serve,

    /// Print the host commands for a diff or a whole document.
    Commands {
        /// JSON diff to translate.
        #[arg(long, conflicts_with = "doc", required_unless_present = "doc")]
        diff: Option<PathBuf>,

        /// JSON document to provision from scratch.
        #[arg(long)]
        doc: Option<PathBuf>,
    },
}

fn print_commands(
    diff: Option<PathBuf>,
    doc: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let diff: Diff = match (diff, doc) {
        (Some(path), _) => load_json(&path)?,
        (None, Some(path)) => load_json::<Doc>(&path)?.as_diff(),
        (None, None) => Diff::default(),
    };

    for command in translate_diff(&diff)? {
        println!("{command}");
    }
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("Cannot install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    let _ = tokio::signal::ctrl_c().await;

    info!("Shutdown signal received");
    token.cancel();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(Cmd::Commands { diff, doc }) = args.command {
        return print_commands(diff, doc);
    }

    // Load configuration
    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()).required(false))
        .add_source(
            config::Environment::with_prefix("NETSTATE_DNS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        listen_addr = %config.dns.listen_addr,
        "Starting netstate-dns"
    );

    // Setup graceful shutdown
    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    // Run DNS server
    let result = match DnsServer::new(config.dns) {
        Ok(server) => server.run(shutdown).await,
        Err(e) => Err(e),
    };

    // Shutdown telemetry
    telemetry::shutdown();

    if let Err(e) = result {
        error!("DNS server error: {}", e);
        return Err(e.into());
    }

    info!("netstate-dns shutdown complete");
    Ok(())
}
