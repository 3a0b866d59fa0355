use std::error::Error;

use clap::Parser;
use log::{info, LevelFilter};

use chord_ring::utils::cli::Cli;
use chord_ring::{Config, NodeHandle};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();
    let level = if args.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    simple_logger::SimpleLogger::new()
        .env()
        .with_level(level)
        .init()
        .unwrap();

    let config = Config::assemble(&args)?;

    // A port that cannot be bound is the one fatal startup error.
    let node = NodeHandle::start(config).await?;
    info!(
        "node {} running on {}",
        node.peer().id,
        node.local_addr()
    );

    match args.peer {
        Some(seed) => node.join(seed).await?,
        None => node.join_self().await?,
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down, leaving the ring gracefully");
    node.leave().await;

    Ok(())
}
