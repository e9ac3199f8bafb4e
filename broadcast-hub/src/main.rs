use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use broadcast_hub::{
    cli::Cli,
    server::{Server, ServerConfig},
};

fn init_tracing(debug: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = ServerConfig::from(cli.serve);
    let server = Server::bind(&config).await?;
    let addr = server.local_addr()?;
    info!("hub listening on {}", addr);

    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("hub exited with error: {err:?}");
        return Err(err);
    }

    Ok(())
}
