//! Interactive CLI menu system for the Danbooru Downloader
//! Uses dialoguer for user interaction

use std::collections::BTreeMap;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use console::{Key, Term, style as __console_style};
use dialoguer::{Confirm, Input, MultiSelect, Password, Select, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::danbooru::{ApiError, DanbooruClient, Post, PostSource, normalize_query};
use crate::engine::bulk::{BulkConfig, BulkEngine, EngineError, RunEnd, RunMode};
use crate::engine::config_loader::{AppConfig, ConfigError, ConfigManager, MAX_PREVIEW_LIMIT, is_valid_email};
use crate::engine::control::TransferControl;
use crate::engine::dispatcher::{BatchDispatcher, MAX_CONCURRENCY};
use crate::engine::events::{BatchReport, DownloadEvent, EventReceiver, Outcome, event_channel};
use crate::engine::fetcher::{Fetcher, HttpTransport, TransferError};
use crate::engine::history::SearchHistory;
use crate::engine::local_files::count_local_files;
use crate::engine::security::SecretBox;
use crate::engine::selective::{SelectiveDownloader, check_query_mismatch};

// Sanitize styled output: strip all non-ASCII (emoji/symbols) before styling
fn style<S: Into<String>>(s: S) -> console::StyledObject<String> {
    let raw: String = s.into();
    let cleaned: String = raw.chars().filter(|c| c.is_ascii()).collect();
    __console_style(cleaned)
}

const PROGRESS_TEMPLATE: &str = "{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}";
const SUMMARY_TAGS_LEN: usize = 60;

/// Error types for CLI operations
#[derive(Error, Debug)]
pub enum CliError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("UI interaction error: {0}")]
    Dialoguer(#[from] dialoguer::Error),

    #[error("Board error: {0}")]
    Api(#[from] ApiError),

    #[error("Transfer setup error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Download error: {0}")]
    Engine(#[from] EngineError),
}

// Result type alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Main menu options
#[derive(Debug, Clone, Copy)]
pub enum MainMenuOption {
    SearchPosts,
    BulkDownload,
    BulkRepair,
    Settings,
    Exit,
}

impl MainMenuOption {
    /// Get all menu options
    pub fn variants() -> &'static [MainMenuOption] {
        &[
            MainMenuOption::SearchPosts,
            MainMenuOption::BulkDownload,
            MainMenuOption::BulkRepair,
            MainMenuOption::Settings,
            MainMenuOption::Exit,
        ]
    }

    /// Get the display name for the menu option
    pub fn display_name(&self) -> &'static str {
        match self {
            MainMenuOption::SearchPosts => "Search and select posts",
            MainMenuOption::BulkDownload => "Bulk download (smart resume)",
            MainMenuOption::BulkRepair => "Bulk download (full scan / repair)",
            MainMenuOption::Settings => "Settings",
            MainMenuOption::Exit => "Exit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageAction {
    Next,
    Previous,
    GoTo,
    Download,
    Back,
}

impl PageAction {
    fn variants() -> &'static [PageAction] {
        &[
            PageAction::Next,
            PageAction::Previous,
            PageAction::GoTo,
            PageAction::Download,
            PageAction::Back,
        ]
    }

    fn display_name(&self, selected: usize) -> String {
        match self {
            PageAction::Next => "Next page".to_string(),
            PageAction::Previous => "Previous page".to_string(),
            PageAction::GoTo => "Go to page".to_string(),
            PageAction::Download => format!("Download selected ({})", selected),
            PageAction::Back => "Back to main menu".to_string(),
        }
    }
}

/// Per-operation clients built from the current settings
struct Services {
    client: Arc<DanbooruClient>,
    dispatcher: Arc<BatchDispatcher>,
    control: TransferControl,
}

/// CLI manager
pub struct CliManager {
    config_manager: ConfigManager,
    secret: SecretBox,
    history: Mutex<SearchHistory>,
    interrupts: InterruptRouter,
    theme: ColorfulTheme,
}

impl CliManager {
    pub fn new(config_manager: ConfigManager, secret: SecretBox, history: SearchHistory) -> Self {
        Self {
            config_manager,
            secret,
            history: Mutex::new(history),
            interrupts: InterruptRouter::default(),
            theme: ColorfulTheme::default(),
        }
    }

    /// Check if we're running in an interactive terminal
    fn is_interactive_terminal() -> bool {
        io::stdin().is_terminal() && io::stdout().is_terminal()
    }

    /// Run the main menu loop
    pub async fn run(&self) -> CliResult<()> {
        if !Self::is_interactive_terminal() {
            println!("Warning: Not running in an interactive terminal.");
            println!("Please run this program from a proper terminal/command prompt.");
            println!("Settings can be edited in {}.", self.config_manager.config_path().display());
            return Ok(());
        }

        self.ensure_credentials()?;
        let listener = self.interrupts.spawn_listener();

        loop {
            let selection = self.show_main_menu()?;

            match selection {
                MainMenuOption::SearchPosts => self.search_posts().await?,
                MainMenuOption::BulkDownload => self.bulk_download(RunMode::SmartResume).await?,
                MainMenuOption::BulkRepair => self.bulk_download(RunMode::Repair).await?,
                MainMenuOption::Settings => self.edit_settings()?,
                MainMenuOption::Exit => {
                    println!("{}", style("Exiting...").cyan());
                    break;
                }
            }
        }

        listener.abort();
        Ok(())
    }

    /// Show the main menu and get user selection
    fn show_main_menu(&self) -> CliResult<MainMenuOption> {
        let config = self.config()?;
        let options = MainMenuOption::variants();
        let option_names: Vec<&str> = options.iter().map(|o| o.display_name()).collect();

        println!("\n{}", style("Danbooru Downloader - Main Menu").cyan().bold());
        println!(
            "Download directory: {} (local files: {})",
            config.paths.download_directory,
            count_local_files(&self.download_dir(&config))
        );

        let selection = Select::with_theme(&self.theme)
            .items(&option_names)
            .default(0)
            .interact()?;

        Ok(options[selection])
    }

    fn config(&self) -> CliResult<AppConfig> {
        Ok(self.config_manager.get_app_config()?)
    }

    fn download_dir(&self, config: &AppConfig) -> PathBuf {
        PathBuf::from(&config.paths.download_directory)
    }

    fn services(&self, config: &AppConfig) -> CliResult<Services> {
        let client_config = config.client_config();
        let user_agent = client_config.user_agent();
        let client = Arc::new(DanbooruClient::new(client_config)?);

        let transport = HttpTransport::new(&user_agent, Duration::from_secs(config.rate.request_timeout_secs.max(1)))?;
        let control = TransferControl::new();
        let fetcher = Fetcher::new(Arc::new(transport), control.clone(), config.fetcher_config());
        let dispatcher = Arc::new(BatchDispatcher::new(Arc::new(fetcher), config.pools.max_download_concurrency));

        Ok(Services { client, dispatcher, control })
    }

    /// Offer to set up credentials when none are stored
    fn ensure_credentials(&self) -> CliResult<()> {
        if self.config_manager.has_valid_credentials() {
            return Ok(());
        }

        println!("{}", style("No board credentials configured.").yellow());
        println!("Anonymous access works, but with lower rate limits and tag limits.");

        let configure = Confirm::with_theme(&self.theme)
            .with_prompt("Configure username and API key now?")
            .default(false)
            .interact()?;
        if !configure {
            return Ok(());
        }

        let username: String = Input::with_theme(&self.theme)
            .with_prompt("Username")
            .interact_text()?;
        let api_key = Password::with_theme(&self.theme)
            .with_prompt("API key")
            .interact()?;

        self.config_manager.update(|c| {
            c.api.username = username.trim().to_string();
            c.api.api_key = api_key.trim().to_string();
        })?;
        println!("{}", style("Credentials saved.").green());
        Ok(())
    }

    /// Ask for a tag expression, offering recent searches first
    fn prompt_query(&self) -> CliResult<Option<String>> {
        let recent: Vec<String> = self.history.lock().entries().to_vec();

        let initial = if recent.is_empty() {
            String::new()
        } else {
            let mut items = vec!["New search...".to_string()];
            items.extend(recent.iter().cloned());

            let choice = Select::with_theme(&self.theme)
                .with_prompt("Recent searches")
                .items(&items)
                .default(0)
                .interact()?;
            if choice == 0 { String::new() } else { recent[choice - 1].clone() }
        };

        let raw: String = Input::with_theme(&self.theme)
            .with_prompt("Tags (empty to cancel)")
            .with_initial_text(initial)
            .allow_empty(true)
            .interact_text()?;

        let raw = raw.trim().to_string();
        if raw.is_empty() {
            return Ok(None);
        }

        self.history.lock().record(&raw);
        Ok(Some(raw))
    }

    /// Warn when the download directory holds another query's checkpoint
    async fn confirm_mismatch(&self, config: &AppConfig, query: &str) -> CliResult<bool> {
        let Some(mismatch) = check_query_mismatch(&self.download_dir(config), query, &self.secret).await else {
            return Ok(true);
        };

        println!(
            "{} The download directory was last used for '{}', not '{}'.",
            style("!").yellow(),
            mismatch.stored,
            mismatch.active
        );
        println!("   Mixing queries in one folder makes resume less reliable.");

        Ok(Confirm::with_theme(&self.theme)
            .with_prompt("Continue anyway?")
            .default(false)
            .interact()?)
    }

    async fn search_posts(&self) -> CliResult<()> {
        println!("\n{}", style("Search Posts").cyan().bold());

        let Some(raw) = self.prompt_query()? else {
            return Ok(());
        };
        let config = self.config()?;
        let query = normalize_query(&raw, config.api.safe_search);
        let services = self.services(&config)?;
        let limit = config.api.preview_limit.clamp(1, MAX_PREVIEW_LIMIT);

        let total = match services.client.count(&query).await {
            Ok(total) => total,
            Err(e) => {
                println!("{} Failed to count posts: {}", style("x").red(), e);
                return self.press_enter_to_continue();
            }
        };
        let total_pages = total.div_ceil(u64::from(limit)).max(1);
        println!("Found {} posts for '{}' ({} pages)", total, query, total_pages);
        if total == 0 {
            return self.press_enter_to_continue();
        }

        let mut page: u32 = 1;
        let mut selected: BTreeMap<u64, Post> = BTreeMap::new();

        loop {
            let posts = match services.client.fetch_page(&query, page, limit).await {
                Ok(posts) => posts,
                Err(e) => {
                    println!("{} Failed to load page {}: {}", style("x").red(), page, e);
                    Vec::new()
                }
            };

            if posts.is_empty() {
                println!("{}", style("No posts on this page.").yellow());
            } else {
                let labels: Vec<String> = posts.iter().map(|p| p.summary(SUMMARY_TAGS_LEN)).collect();
                let defaults: Vec<bool> = posts.iter().map(|p| selected.contains_key(&p.id)).collect();

                let picked = MultiSelect::with_theme(&self.theme)
                    .with_prompt(format!("Page {}/{} - space to toggle, enter to confirm", page, total_pages))
                    .items(&labels)
                    .defaults(&defaults)
                    .interact()?;

                for (index, post) in posts.iter().enumerate() {
                    if picked.contains(&index) {
                        selected.insert(post.id, post.clone());
                    } else {
                        selected.remove(&post.id);
                    }
                }
            }

            let actions = PageAction::variants();
            let names: Vec<String> = actions.iter().map(|a| a.display_name(selected.len())).collect();
            let action = actions[Select::with_theme(&self.theme)
                .items(&names)
                .default(0)
                .interact()?];

            match action {
                PageAction::Next => page = (page + 1).min(total_pages as u32),
                PageAction::Previous => page = page.saturating_sub(1).max(1),
                PageAction::GoTo => {
                    let target: u32 = Input::with_theme(&self.theme)
                        .with_prompt(format!("Page (1-{})", total_pages))
                        .default(page)
                        .interact_text()?;
                    page = target.clamp(1, total_pages as u32);
                }
                PageAction::Download => {
                    if selected.is_empty() {
                        println!("{}", style("Nothing selected.").yellow());
                        continue;
                    }
                    if !self.confirm_mismatch(&config, &query).await? {
                        continue;
                    }

                    let posts: Vec<Post> = selected.values().cloned().collect();
                    self.download_selected(&config, &services, &posts).await?;
                    return Ok(());
                }
                PageAction::Back => return Ok(()),
            }
        }
    }

    async fn download_selected(&self, config: &AppConfig, services: &Services, posts: &[Post]) -> CliResult<()> {
        let downloader = SelectiveDownloader::new(services.dispatcher.clone(), self.download_dir(config));
        let (tx, rx) = event_channel();

        println!("{}", style("Keys: [p] pause/resume  [c] cancel").dim());
        info!(posts = posts.len(), workers = services.dispatcher.concurrency(), "Starting selected download");
        let monitor = ProgressMonitor::start(rx, Some(posts.len() as u64), services.control.clone());
        let keys = KeyControls::spawn(services.control.clone(), &self.interrupts);

        let report = downloader.download(posts, Some(&tx)).await;
        drop(tx);
        monitor.finish().await;

        print_report(&report);
        println!("Local files: {}", count_local_files(downloader.directory()));
        keys.finish().await;
        Ok(())
    }

    async fn bulk_download(&self, mode: RunMode) -> CliResult<()> {
        let title = match mode {
            RunMode::SmartResume => "Bulk Download",
            RunMode::Repair => "Bulk Download (Full Scan / Repair)",
        };
        println!("\n{}", style(title).cyan().bold());

        let Some(raw) = self.prompt_query()? else {
            return Ok(());
        };
        let config = self.config()?;
        let query = normalize_query(&raw, config.api.safe_search);
        let services = self.services(&config)?;

        let total = match services.client.count(&query).await {
            Ok(total) => total,
            Err(e) => {
                println!("{} Failed to count posts: {}", style("x").red(), e);
                return self.press_enter_to_continue();
            }
        };
        if total == 0 {
            println!("{}", style(format!("No posts found for '{}'.", query)).yellow());
            return self.press_enter_to_continue();
        }

        if !config.ui.skip_download_confirmation {
            let answers = ["Yes", "No", "Yes, and don't ask again"];
            let answer = Select::with_theme(&self.theme)
                .with_prompt(format!("Download up to {} posts for '{}'?", total, query))
                .items(&answers)
                .default(0)
                .interact()?;
            match answer {
                1 => return Ok(()),
                2 => {
                    self.config_manager.update(|c| c.ui.skip_download_confirmation = true)?;
                }
                _ => {}
            }
        }

        if !self.confirm_mismatch(&config, &query).await? {
            return Ok(());
        }

        let directory = self.download_dir(&config);
        let engine = BulkEngine::new(
            services.client.clone(),
            services.dispatcher.clone(),
            self.secret.clone(),
            BulkConfig {
                directory: directory.clone(),
                page_size: config.api.page_size,
            },
        );
        let (tx, rx) = event_channel();

        println!("{}", style("Keys: [p] pause/resume  [c] cancel  (Ctrl-C also cancels)").dim());
        info!(query = %query, workers = services.dispatcher.concurrency(), ?mode, "Starting bulk download");
        let monitor = ProgressMonitor::start(rx, Some(total), services.control.clone());
        let keys = KeyControls::spawn(services.control.clone(), &self.interrupts);

        let result = engine.run(&query, mode, Some(&tx)).await;
        drop(tx);
        monitor.finish().await;

        match result {
            Ok(summary) => {
                let ending = match summary.end {
                    RunEnd::EndOfResults => "Reached the end of results.",
                    RunEnd::CaughtUp => "Caught up with the previous run.",
                    RunEnd::Cancelled => "Download cancelled. Run again to resume.",
                };
                println!("{}", style(ending).green());
                if let Some(page) = summary.jumped_to {
                    println!("Resumed at page {} after downloading new posts.", page);
                }
                print_report(&summary.report);
            }
            Err(e) => {
                warn!("Bulk run aborted: {}", e);
                println!("{} {}", style("x").red(), e);
                println!("   Progress up to the last finished page is saved. Run again to resume.");
            }
        }

        println!("Local files: {}", count_local_files(&directory));
        keys.finish().await;
        Ok(())
    }

    fn edit_settings(&self) -> CliResult<()> {
        println!("\n{}", style("Settings").cyan().bold());

        let mut config = self.config()?;

        loop {
            println!("\n{}", style("Current Settings:").cyan());
            println!("1. Download directory: {}", config.paths.download_directory);
            println!("2. Username: {}", config.api.username);
            println!("3. API key: {}", "*".repeat(config.api.api_key.len().min(12)));
            println!("4. Email: {}", config.api.email);
            println!("5. Nickname: {}", config.api.nickname);
            println!("6. Preview limit: {}", config.api.preview_limit);
            println!("7. Max download concurrency: {}", config.pools.max_download_concurrency);
            println!("8. Safe search: {}", config.api.safe_search);
            println!("9. Skip download confirmation: {}", config.ui.skip_download_confirmation);
            println!("10. Log level: {}", config.logging.log_level);
            println!("0. Save and return");

            let choice: String = Input::with_theme(&self.theme)
                .with_prompt("Select field to edit (0-10)")
                .interact_text()?;

            match choice.trim() {
                "0" => {
                    match self.config_manager.save_app_config(&config) {
                        Ok(()) => {
                            info!("Settings saved");
                            println!("{}", style("Settings saved successfully!").green());
                        }
                        Err(e) => println!("{} Failed to save settings: {}", style("x").red(), e),
                    }
                    break;
                }
                "1" => {
                    config.paths.download_directory = Input::with_theme(&self.theme)
                        .with_prompt("Download directory")
                        .with_initial_text(config.paths.download_directory.clone())
                        .interact_text()?;
                }
                "2" => {
                    config.api.username = Input::<String>::with_theme(&self.theme)
                        .with_prompt("Username")
                        .with_initial_text(config.api.username.clone())
                        .allow_empty(true)
                        .interact_text()?
                        .trim()
                        .to_string();
                }
                "3" => {
                    config.api.api_key = Password::with_theme(&self.theme)
                        .with_prompt("API key")
                        .allow_empty_password(true)
                        .interact()?
                        .trim()
                        .to_string();
                }
                "4" => {
                    config.api.email = Input::with_theme(&self.theme)
                        .with_prompt("Email")
                        .with_initial_text(config.api.email.clone())
                        .validate_with(|input: &String| -> Result<(), &str> {
                            if is_valid_email(input) {
                                Ok(())
                            } else {
                                Err("Please enter a valid email address")
                            }
                        })
                        .interact_text()?;
                }
                "5" => {
                    config.api.nickname = Input::with_theme(&self.theme)
                        .with_prompt("Nickname for the user agent (empty uses the username)")
                        .with_initial_text(config.api.nickname.clone())
                        .allow_empty(true)
                        .interact_text()?;
                }
                "6" => {
                    let value: u32 = Input::with_theme(&self.theme)
                        .with_prompt(format!("Preview limit (1-{})", MAX_PREVIEW_LIMIT))
                        .default(config.api.preview_limit)
                        .interact_text()?;
                    config.api.preview_limit = value.clamp(1, MAX_PREVIEW_LIMIT);
                }
                "7" => {
                    let value: usize = Input::with_theme(&self.theme)
                        .with_prompt(format!("Max download concurrency (1-{})", MAX_CONCURRENCY))
                        .default(config.pools.max_download_concurrency)
                        .interact_text()?;
                    config.pools.max_download_concurrency = value.clamp(1, MAX_CONCURRENCY);
                }
                "8" => config.api.safe_search = !config.api.safe_search,
                "9" => config.ui.skip_download_confirmation = !config.ui.skip_download_confirmation,
                "10" => {
                    let levels = ["trace", "debug", "info", "warn", "error"];
                    let current = levels
                        .iter()
                        .position(|l| *l == config.logging.log_level)
                        .unwrap_or(2);
                    let index = Select::with_theme(&self.theme)
                        .with_prompt("Log level (applies on next start)")
                        .items(&levels)
                        .default(current)
                        .interact()?;
                    config.logging.log_level = levels[index].to_string();
                }
                _ => println!("{}", style("Invalid choice.").yellow()),
            }
        }

        Ok(())
    }

    /// Helper function to pause and wait for user to press Enter
    fn press_enter_to_continue(&self) -> CliResult<()> {
        println!("\nPress Enter to continue...");
        let mut buffer = String::new();
        io::stdin().read_line(&mut buffer)?;
        Ok(())
    }
}

fn print_report(report: &BatchReport) {
    println!(
        "Done: {}  Skipped: {}  Failed: {}",
        style(report.done.to_string()).green(),
        style(report.skipped.to_string()).cyan(),
        style(report.failed.to_string()).red()
    );
    if report.cancelled > 0 {
        println!("Not finished: {}", report.cancelled);
    }
}

fn status_line(page: u32, report: &BatchReport, paused: bool) -> String {
    let mut line = String::new();
    if page > 0 {
        line.push_str(&format!("page {} | ", page));
    }
    line.push_str(&format!(
        "done {} skipped {} failed {}",
        report.done, report.skipped, report.failed
    ));
    if paused {
        line.push_str(" | PAUSED");
    }
    line
}

/// Draws download events on a progress bar
struct ProgressMonitor {
    task: JoinHandle<()>,
}

impl ProgressMonitor {
    fn start(mut events: EventReceiver, total: Option<u64>, control: TransferControl) -> Self {
        let bar = match total {
            Some(len) => ProgressBar::new(len),
            None => ProgressBar::new_spinner(),
        };
        let progress_style = ProgressStyle::default_bar()
            .template(PROGRESS_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(progress_style);
        bar.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
        bar.enable_steady_tick(Duration::from_millis(200));

        let task = tokio::spawn(async move {
            let mut report = BatchReport::default();
            let mut page = 0;
            let mut tick = tokio::time::interval(Duration::from_millis(250));

            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(DownloadEvent::PageStarted { page: started }) => page = started,
                        Some(DownloadEvent::Jumped { from, to }) => {
                            bar.println(format!("Gap filled on page {}, resuming at page {}", from, to));
                        }
                        Some(DownloadEvent::Finished { post_id, outcome }) => {
                            if let Outcome::Failed(message) = &outcome {
                                bar.println(format!("Post {} failed: {}", post_id, message));
                            }
                            report.record(Some(&outcome));
                            bar.set_position(report.settled() as u64);
                        }
                        Some(DownloadEvent::Progress { .. }) => {}
                        None => break,
                    },
                    _ = tick.tick() => {}
                }
                bar.set_message(status_line(page, &report, control.is_paused()));
            }

            bar.finish_and_clear();
        });

        Self { task }
    }

    async fn finish(self) {
        let _ = self.task.await;
    }
}

/// Routes Ctrl-C for the whole session.
///
/// The signal handler stays installed once registered, so a single listener
/// decides: cancel the armed run, or exit when no run is in progress.
#[derive(Clone, Default)]
struct InterruptRouter {
    active: Arc<Mutex<Option<TransferControl>>>,
}

impl InterruptRouter {
    fn arm(&self, control: TransferControl) {
        *self.active.lock() = Some(control);
    }

    fn disarm(&self) {
        *self.active.lock() = None;
    }

    /// Returns `true` when a run was cancelled, `false` when the program should exit.
    fn route(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(control) => {
                control.cancel();
                true
            }
            None => false,
        }
    }

    fn spawn_listener(&self) -> JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !router.route() {
                    info!("Interrupted at a prompt. Exiting...");
                    println!();
                    std::process::exit(130);
                }
            }
        })
    }
}

/// Pause and cancel keys while a download runs. Ctrl-C is routed to the run
/// through the [`InterruptRouter`] until [`KeyControls::finish`].
///
/// The key reader blocks on the terminal, so it ends on the first key
/// pressed after the download finished.
struct KeyControls {
    finished: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    interrupts: InterruptRouter,
}

impl KeyControls {
    fn spawn(control: TransferControl, interrupts: &InterruptRouter) -> Self {
        let finished = Arc::new(AtomicBool::new(false));
        interrupts.arm(control.clone());

        let reader = {
            let finished = finished.clone();
            tokio::task::spawn_blocking(move || {
                let term = Term::stdout();
                loop {
                    let key = term.read_key();
                    if finished.load(Ordering::SeqCst) {
                        break;
                    }
                    match key {
                        Ok(Key::Char('p')) | Ok(Key::Char('P')) => {
                            let paused = control.toggle_pause();
                            info!(paused, "Pause toggled from keyboard");
                        }
                        Ok(Key::Char('c')) | Ok(Key::Char('C')) | Ok(Key::Char('\u{3}')) => control.cancel(),
                        Ok(_) => {}
                        Err(_) => {
                            control.cancel();
                            break;
                        }
                    }
                }
            })
        };

        Self {
            finished,
            reader,
            interrupts: interrupts.clone(),
        }
    }

    async fn finish(self) {
        self.interrupts.disarm();
        self.finished.store(true, Ordering::SeqCst);
        println!("\nPress any key to return...");
        let _ = self.reader.await;
    }
}
