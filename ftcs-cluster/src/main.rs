use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use ftcs_cluster::{
    cli::{Cli, Command},
    client,
    config::NodeConfig,
    runtime,
    transport::quic::QuicTransport,
};

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Node(args) => {
            let config = NodeConfig::from(args);
            let transport = QuicTransport::new().context("failed to create quic endpoint")?;
            let running = runtime::start(transport, &config).await?;
            info!(
                peers = %running.peer_addr(),
                clients = %running.client_addr(),
                "node listening"
            );
            if let Err(err) = running.run_until_ctrl_c().await {
                warn!("node exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}
