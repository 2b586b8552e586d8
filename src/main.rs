//! StripeStor node
//!
//! One process per peer. Every peer is launched with the same endpoint list;
//! the local index selects which endpoint is this process and where its
//! export directory lives.

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stripestor::config::{Args, Setup};
use stripestor::error::Result;
use stripestor::http::{Cluster, Server};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let setup = Setup::from_args(&args)?;

    info!("Starting StripeStor node {}", setup.local_index);
    info!("  Peers: {}", setup.endpoints.len());
    info!(
        "  Erasure geometry: {} data + {} parity, shard size {}",
        setup.data_count, setup.parity_count, setup.shard_size
    );
    info!(
        "  Quorums: read {}, write {}",
        setup.read_quorum, setup.write_quorum
    );
    info!("  Export: {}", setup.export_dir.display());

    let port = setup.port;
    let cluster = Cluster::build(setup).await?;
    let server = Server::new(cluster);

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    server.run(listener).await
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("reqwest=warn".parse().unwrap())
        .add_directive("tower=warn".parse().unwrap());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
