use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tandem_config::ConfigLoader;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tandem-relay")]
#[command(about = "WebSocket relay for Tandem document topics")]
#[command(version)]
struct Cli {
    /// Config file, layered over ~/.config/tandem/config.toml
    #[arg(short = 'C', long)]
    config: Option<PathBuf>,

    /// Interface to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_file(path);
    }
    let mut config = loader.load()?;
    if let Some(host) = cli.host {
        config.relay.host = host;
    }
    if let Some(port) = cli.port {
        config.relay.port = port;
    }
    config.relay.validate()?;

    // Initialize logging
    let env_filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()))
    };
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tandem_relay::start_server(&config.relay).await?;
    Ok(())
}
