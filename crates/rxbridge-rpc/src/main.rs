//! rxbridge RPC host - serves business-logic handlers to the orchestrator.
//!
//! Binds the invoke endpoint, connects the control-plane client and runs
//! until Ctrl-C or until the endpoint stops on its own.

mod sentiment;

use anyhow::Result;
use clap::Parser;
use rxbridge_core::{BridgeConfig, EnvConfig, HandlerRegistry, InvokeConfig};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "rxbridge-rpc")]
#[command(about = "Handler bridge host for the orchestrator")]
struct Args {
    /// Address of the invoke endpoint (port 0 = auto-assign)
    #[arg(long, env = EnvConfig::BIND_VAR, default_value = EnvConfig::DEFAULT_BIND)]
    bind: String,

    /// host:port of the orchestrator's control service
    #[arg(long, env = EnvConfig::CONTROL_TARGET_VAR, default_value = EnvConfig::DEFAULT_CONTROL_TARGET)]
    control_target: String,

    /// Maximum number of handlers running at once
    #[arg(long, default_value_t = InvokeConfig::DEFAULT_WORKERS)]
    workers: usize,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting rxbridge RPC host");

    let config = BridgeConfig::new()
        .with_bind_str(&args.bind)?
        .with_control_target(args.control_target)
        .with_workers(args.workers);

    let registry = HandlerRegistry::new().register_sync(sentiment::HANDLER_NAME, sentiment::analyse);

    let app = rxbridge_core::serve(config.clone(), registry).await?;

    // Print the bound address for the parent process (intentional stdout)
    println!("BRIDGE_ADDR={}", app.addr());

    info!(
        "Sentiment bridge listening on {} (control {})",
        app.addr(),
        config.control_target
    );

    tokio::select! {
        result = app.wait() => {
            result?;
            info!("Invoke endpoint stopped, exiting");
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received, exiting");
            app.stop().await?;
        }
    }

    Ok(())
}
