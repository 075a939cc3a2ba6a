use std::env::current_dir;
use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use console::Term;
use tracing::{error, info, trace};

use crate::engine::{CliManager, ConfigManager, SearchHistory, SecretBox, init_logger};

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The authors who created the package.
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

/// A program class that handles the flow of the downloader user experience and steps of execution.
pub(crate) struct Program {
    config_dir: PathBuf,
}

impl Program {
    /// Creates a new instance of the program.
    pub(crate) fn new(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    /// Runs the downloader program.
    pub(crate) async fn run(&self) -> Result<(), Error> {
        Term::stdout().set_title("Danbooru downloader");

        let mut config_manager = ConfigManager::new(&self.config_dir)
            .with_context(|| format!("Failed to load configuration from {}", self.config_dir.display()))?;
        let config = config_manager.get_app_config()?;

        // Held until exit so buffered log lines are flushed.
        let logger = init_logger(Path::new(&config.paths.log_directory), &config.logging)?;

        trace!("Starting danbooru downloader...");
        trace!("Program Name: {}", NAME);
        trace!("Program Version: {}", VERSION);
        trace!("Program Authors: {}", AUTHORS);
        match current_dir() {
            Ok(dir) => trace!("Program Working Directory: {}", dir.display()),
            Err(e) => error!("Unable to get working directory: {}", e),
        }
        crate::log_system_information();
        if let Some(dir) = logger.log_dir() {
            info!("Writing logs to {}", dir.display());
        }

        let secret = SecretBox::load_or_generate(Path::new(&config.paths.key_file))
            .with_context(|| format!("Failed to load key file {}", config.paths.key_file))?;
        config_manager.attach_secret(secret.clone())?;
        trace!("Stored credentials loaded...");

        let history = SearchHistory::load(Path::new(&config.paths.history_file), secret.clone());

        let cli = CliManager::new(config_manager, secret, history);
        cli.run().await?;

        info!("User requested exit. Closing application...");
        Ok(())
    }
}
