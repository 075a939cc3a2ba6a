use std::env::consts::{ARCH, FAMILY, OS};
use std::path::PathBuf;

use anyhow::Error;
use tracing::trace;

use crate::program::Program;

mod danbooru;
mod engine;
mod program;

/// Directory holding `config.toml` unless one is passed as the first argument.
const DEFAULT_CONFIG_DIR: &str = ".";

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR));

    let program = Program::new(config_dir);
    program.run().await
}

/// Logs important information about the system being used.
pub(crate) fn log_system_information() {
    trace!("Printing system information out into log for debug purposes...");
    trace!("ARCH:           \"{}\"", ARCH);
    trace!("FAMILY:         \"{}\"", FAMILY);
    trace!("OS:             \"{}\"", OS);
}
