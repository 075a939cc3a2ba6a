//! Download engine for the Danbooru Downloader
//! Contains the resume engine, its transfer pipeline and the interactive front end

pub mod bulk;
pub mod cli;
pub mod config_loader;
pub mod control;
pub mod dispatcher;
pub mod events;
pub mod fetcher;
pub mod history;
pub mod local_files;
pub mod logger;
pub mod resume_store;
pub mod retry;
pub mod security;
pub mod selective;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types for convenience
pub use config_loader::{AppConfig, ConfigError, ConfigManager, ConfigResult};

// Re-export the transfer pipeline
pub use control::TransferControl;
pub use dispatcher::{BatchDispatcher, BatchHandle, clamp_concurrency, destination_path};
pub use events::{BatchReport, DownloadEvent, EventReceiver, EventSender, Outcome, event_channel};
pub use fetcher::{FetchOutcome, Fetcher, FetcherConfig, HttpTransport, TransferError, TransferResult, Transport};

// Re-export resume functionality
pub use bulk::{BulkConfig, BulkEngine, EngineError, EngineResult, RunEnd, RunMode, RunSummary};
pub use resume_store::{Checkpoint, ResumeState, ResumeStore, queries_match};
pub use selective::{QueryMismatch, SelectiveDownloader, check_query_mismatch};

// Re-export supporting services
pub use history::SearchHistory;
pub use logger::{Logger, LoggerError, init_logger};
pub use security::{SecretBox, SecurityError};

// Re-export CLI functionality
pub use cli::{CliError, CliManager};
