//! Command line interface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{Config, ConfigError};

/// Multi-experiment TensorBoard router
#[derive(Debug, Parser)]
#[command(name = "boardmux", version, about = "Route TensorBoard requests to one backend per log directory")]
pub struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the router
    Serve(ServeArgs),
    /// Launch a local Jupyter notebook server
    Notebook(NotebookArgs),
    /// Validate and print the effective configuration
    CheckConfig,
}

#[derive(Debug, Default, Args)]
pub struct ServeArgs {
    /// Address to listen on (host:port)
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Directory every logdir is resolved under
    #[arg(long, value_name = "DIR")]
    pub storage_root: Option<PathBuf>,

    /// First port handed to backends
    #[arg(long, value_name = "PORT")]
    pub base_port: Option<u16>,
}

#[derive(Debug, Default, Args)]
pub struct NotebookArgs {
    /// Port for the notebook server
    #[arg(long)]
    pub port: Option<u16>,

    /// Seconds before the notebook is stopped
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

impl Cli {
    /// Load the config file and apply command line overrides.
    ///
    /// An explicitly given `--config` must exist; the default location may be
    /// absent, in which case defaults apply.
    pub fn load_config(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) if !path.exists() => {
                return Err(ConfigError::ReadError {
                    path: path.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
                })
            }
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };

        match &self.command {
            Command::Serve(args) => args.apply(&mut config),
            Command::Notebook(args) => args.apply(&mut config),
            Command::CheckConfig => {}
        }

        config.validate()?;
        Ok(config)
    }
}

impl ServeArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(bind) = &self.bind {
            config.router.bind_addr = bind.clone();
        }
        if let Some(root) = &self.storage_root {
            config.router.storage_root = root.clone();
        }
        if let Some(port) = self.base_port {
            config.backends.base_port = port;
        }
    }
}

impl NotebookArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.notebook.port = port;
        }
        if let Some(timeout) = self.timeout {
            config.notebook.timeout_seconds = timeout;
        }
    }
}
