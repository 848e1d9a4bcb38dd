use clap::Parser;
use lsif_api::Server;
use lsif_core::Settings;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "lsif-server", version, about = "Serve code intelligence from uploaded LSIF dumps")]
struct Args {
    /// Directory holding default.toml, <env>.toml and local.toml
    #[arg(long, env = "LSIF_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Configuration environment (defaults to LSIF_ENV, then APP_ENV, then development)
    #[arg(long)]
    env: Option<String>,

    /// Overrides server.port
    #[arg(long)]
    port: Option<u16>,
}

fn init_tracing(level: &str) {
    let default = format!(
        "lsif_api={level},lsif_query={level},lsif_storage={level},tower_http={level}",
        level = level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(&args.config_dir, args.env.as_deref())?;
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    settings.validate()?;
    init_tracing(&settings.logging.level);

    let server = Server::new(settings).await?;
    server.run().await?;
    Ok(())
}
