use anyhow::{Context, Result};
use clap::Parser;

use boardmux::cli::{Cli, Command};
use boardmux::config::Config;
use boardmux::logging::init_tracing;
use boardmux::notebook;
use boardmux::proxy::ProxyServer;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = cli.load_config().context("Failed to load configuration")?;

    match cli.command {
        Command::Serve(_) => serve(config).await,
        Command::Notebook(_) => {
            let end = notebook::run(&config.notebook)
                .await
                .context("Notebook session failed")?;
            tracing::info!(reason = ?end, "Notebook session finished");
            Ok(())
        }
        Command::CheckConfig => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{}", rendered);
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    let addr = config
        .router
        .socket_addr()
        .with_context(|| format!("Invalid bind address '{}'", config.router.bind_addr))?;

    let mut server = ProxyServer::new(&config).context("Failed to build router")?;
    let bound = server
        .bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(
        addr = %bound,
        storage_root = %config.router.storage_root.display(),
        base_port = config.backends.base_port,
        "Router listening"
    );

    let report = server.run().await.context("Router failed")?;
    if !report.errors.is_empty() {
        anyhow::bail!(
            "{} backend(s) failed to stop cleanly",
            report.errors.len()
        );
    }
    Ok(())
}
