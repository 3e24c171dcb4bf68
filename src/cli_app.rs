//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use timeline_sync::cache::TimelineCache;
use timeline_sync::cache::sqlite::SqliteTimelineCache;
use timeline_sync::core::config::Config;
use timeline_sync::core::errors::TlsError;
use timeline_sync::feed::{FeedController, FeedOptions, ScreenState};
use timeline_sync::fetch::fixture::FixtureSource;
use timeline_sync::fetch::source::PageSource;
use timeline_sync::logger::dual::{
    ActivityEvent, ActivityLoggerHandle, DualLoggerConfig, spawn_logger,
};
use timeline_sync::timeline::entity::{Notification, Status, StatusCarrier};
use timeline_sync::timeline::item::{GapId, Item};
use timeline_sync::timeline::list::OrderedItemList;
use timeline_sync::timeline::view::{
    NotificationViewData, StatusViewData, notification_view, status_view,
};

/// How long a replay step may wait for its fetches.
const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeline sync: gap-aware timeline paging, replayed against fixtures.
#[derive(Debug, Parser)]
#[command(
    name = "tlsync",
    author,
    version,
    about = "Timeline sync - gap-aware timeline pagination",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run a feed against a fixture and print the resulting list.
    Replay(ReplayArgs),
    /// Inspect or prune the home-feed cache.
    Cache(CacheArgs),
    /// View configuration state.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
enum FeedKind {
    #[default]
    Statuses,
    Notifications,
}

impl FeedKind {
    const fn label(self) -> &'static str {
        match self {
            Self::Statuses => "home",
            Self::Notifications => "notifications",
        }
    }
}

/// One user action in a replay script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplayStep {
    /// Pull to refresh.
    Top,
    /// Load more at the end.
    Bottom,
    /// Fill the n-th gap of the list, counted from the top.
    Gap(usize),
}

impl FromStr for ReplayStep {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "top" | "refresh" => Ok(Self::Top),
            "bottom" | "more" => Ok(Self::Bottom),
            other => other
                .strip_prefix("gap:")
                .and_then(|n| n.parse::<usize>().ok())
                .map(Self::Gap)
                .ok_or_else(|| format!("unknown step {raw:?}; expected top, bottom or gap:N")),
        }
    }
}

impl std::fmt::Display for ReplayStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Top => f.write_str("top"),
            Self::Bottom => f.write_str("bottom"),
            Self::Gap(n) => write!(f, "gap:{n}"),
        }
    }
}

#[derive(Debug, Clone, Args)]
struct ReplayArgs {
    /// JSON fixture: `{"style": "item_id"|"link_header", "items": [...]}`.
    #[arg(value_name = "FIXTURE")]
    fixture: PathBuf,
    /// Entity type held by the fixture.
    #[arg(long, value_enum, default_value_t = FeedKind::Statuses)]
    feed: FeedKind,
    /// Page size (defaults to `paging.page_size`).
    #[arg(long, value_name = "N")]
    page_size: Option<usize>,
    /// Comma-separated actions after the first load.
    #[arg(long, value_delimiter = ',', value_name = "STEPS")]
    script: Vec<ReplayStep>,
    /// Write pages through a cache database (status feeds only).
    #[arg(long, value_name = "PATH")]
    cache_db: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CacheArgs {
    /// Cache operation to run.
    #[command(subcommand)]
    command: Option<CacheCommand>,
    /// Cache database (defaults to `paths.cache_db`).
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
enum CacheCommand {
    /// Count stored entries and placeholders.
    Stats,
    /// Drop entries older than the retention window.
    Prune(PruneArgs),
    /// List stored rows, newest first.
    Show(ShowArgs),
}

#[derive(Debug, Clone, Args)]
struct PruneArgs {
    /// Retention in days (defaults to `cache.retention_days`).
    #[arg(long, value_name = "DAYS")]
    days: Option<u32>,
}

#[derive(Debug, Clone, Args)]
struct ShowArgs {
    /// Maximum rows to list.
    #[arg(long, default_value_t = 40)]
    limit: usize,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl From<TlsError> for CliError {
    fn from(error: TlsError) -> Self {
        match error {
            TlsError::InvalidConfig { .. }
            | TlsError::MissingConfig { .. }
            | TlsError::ConfigParse { .. }
            | TlsError::InvalidGapPosition { .. } => Self::User(error.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Replay(args) => run_replay(cli, args),
        Command::Cache(args) => run_cache(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── replay ────────────────────

/// Summary printed after a replay.
#[derive(Debug, Serialize)]
struct ReplayReport<'a, V> {
    command: &'static str,
    feed: FeedKind,
    fixture: String,
    steps: Vec<String>,
    screen: ScreenState,
    bottom_exhausted: bool,
    entries: usize,
    gaps: usize,
    stale_discarded: u64,
    newest_seen_id: Option<&'a str>,
    items: &'a [V],
}

/// How one view row is printed in human mode.
trait ReplayRow {
    fn gap(&self) -> Option<(i64, bool)>;
    fn line(&self) -> String;
}

impl ReplayRow for StatusViewData {
    fn gap(&self) -> Option<(i64, bool)> {
        match self {
            Self::Placeholder { id, loading } => Some((*id, *loading)),
            Self::Concrete(_) => None,
        }
    }

    fn line(&self) -> String {
        match self {
            Self::Concrete(view) => {
                let boost = view
                    .reblogged_by
                    .as_deref()
                    .map(|by| format!(" (boosted by @{by})"))
                    .unwrap_or_default();
                format!(
                    "{:>10}  @{}{boost}  {}",
                    view.id,
                    view.author,
                    truncate(&view.text, 60)
                )
            }
            Self::Placeholder { .. } => String::new(),
        }
    }
}

impl ReplayRow for NotificationViewData {
    fn gap(&self) -> Option<(i64, bool)> {
        match self {
            Self::Placeholder { id, loading } => Some((*id, *loading)),
            Self::Concrete { .. } => None,
        }
    }

    fn line(&self) -> String {
        match self {
            Self::Concrete {
                id,
                notification,
                account,
                status,
            } => {
                let text = status
                    .as_ref()
                    .map(|s| truncate(&s.text, 50))
                    .unwrap_or_default();
                let kind = serde_json::to_value(notification)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                format!("{id:>10}  {kind:<10} @{account}  {text}")
            }
            Self::Placeholder { .. } => String::new(),
        }
    }
}

fn run_replay(cli: &Cli, args: &ReplayArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    match args.feed {
        FeedKind::Statuses => {
            let source = FixtureSource::<Status>::from_file(&args.fixture)?;
            let mut options = FeedOptions::from_config(args.feed.label(), source.style(), &config);
            if let Some(page_size) = args.page_size {
                options.page_size = page_size;
            }
            let source: Arc<dyn PageSource<Status>> = Arc::new(source);
            let mut feed = FeedController::new(source, status_view, options)?;
            if let Some(path) = &args.cache_db {
                let cache = SqliteTimelineCache::<Status>::open(path, config.cache.account_id)?;
                feed = feed.with_cache(Box::new(cache));
            }
            replay_feed(cli, args, &config, feed)
        }
        FeedKind::Notifications => {
            if args.cache_db.is_some() {
                return Err(CliError::User(
                    "--cache-db only applies to status feeds".to_string(),
                ));
            }
            let source = FixtureSource::<Notification>::from_file(&args.fixture)?;
            let mut options = FeedOptions::from_config(args.feed.label(), source.style(), &config);
            options.filter = None;
            if let Some(page_size) = args.page_size {
                options.page_size = page_size;
            }
            let source: Arc<dyn PageSource<Notification>> = Arc::new(source);
            let feed = FeedController::new(source, notification_view, options)?;
            replay_feed(cli, args, &config, feed)
        }
    }
}

fn replay_feed<T, V>(
    cli: &Cli,
    args: &ReplayArgs,
    config: &Config,
    mut feed: FeedController<T, V>,
) -> Result<(), CliError>
where
    T: StatusCarrier,
    V: Serialize + ReplayRow,
{
    let started = Instant::now();
    let logger = start_logger(cli, config)?;
    if let Some((handle, _)) = &logger {
        feed = feed.with_logger(handle.clone());
    }

    let outcome = drive(&mut feed, &args.script, cli.verbose);
    feed.teardown();
    if let Some((handle, join)) = logger {
        handle.send(ActivityEvent::SessionStopped {
            uptime_secs: started.elapsed().as_secs(),
        });
        handle.shutdown();
        if join.join().is_err() {
            eprintln!("[TLS-CLI] logger thread panicked");
        }
    }
    outcome?;

    let list = feed.list();
    let gaps = list.len() - list.real_len();
    let report = ReplayReport {
        command: "replay",
        feed: args.feed,
        fixture: args.fixture.display().to_string(),
        steps: args.script.iter().map(ToString::to_string).collect(),
        screen: feed.screen(),
        bottom_exhausted: feed.bottom_exhausted(),
        entries: list.real_len(),
        gaps,
        stale_discarded: feed.stale_discarded(),
        newest_seen_id: feed.newest_seen_id(),
        items: list.views(),
    };

    match output_mode(cli) {
        OutputMode::Json => write_json_line(&serde_json::to_value(&report)?),
        OutputMode::Human => {
            print_replay_human(&report);
            Ok(())
        }
    }
}

/// Run the first load and every scripted step, settling after each.
fn drive<T: StatusCarrier, V>(
    feed: &mut FeedController<T, V>,
    script: &[ReplayStep],
    verbose: bool,
) -> Result<(), CliError> {
    feed.start()?;
    settle(feed)?;
    for step in script {
        if verbose {
            eprintln!("[TLS-CLI] step {step}");
        }
        let ticket = match *step {
            ReplayStep::Top => feed.refresh()?,
            ReplayStep::Bottom => feed.load_more()?,
            ReplayStep::Gap(n) => {
                let gap = nth_gap(feed.list(), n)
                    .ok_or_else(|| CliError::User(format!("step gap:{n}: the list has no such gap")))?;
                feed.load_gap(gap)?
            }
        };
        if ticket.is_none() && verbose {
            eprintln!("[TLS-CLI] step {step} suppressed: nothing to fetch");
        }
        settle(feed)?;
    }
    Ok(())
}

fn settle<T: StatusCarrier, V>(feed: &mut FeedController<T, V>) -> Result<(), CliError> {
    if feed.wait_settled(STEP_TIMEOUT) {
        Ok(())
    } else {
        Err(CliError::Runtime(format!(
            "fetches did not settle within {}s",
            STEP_TIMEOUT.as_secs()
        )))
    }
}

fn nth_gap<T: StatusCarrier, V>(list: &OrderedItemList<T, V>, n: usize) -> Option<GapId> {
    list.items().iter().filter_map(Item::gap_id).nth(n)
}

fn print_replay_human<V: ReplayRow>(report: &ReplayReport<'_, V>) {
    println!(
        "{} {} ({} entries, {} gaps)",
        "Feed".bold(),
        report.feed.label(),
        report.entries,
        report.gaps
    );
    for row in report.items {
        match row.gap() {
            Some((id, loading)) => {
                let label = if loading { "loading" } else { "tap to load" };
                println!("{}", format!("  ~~~ gap {id} ({label}) ~~~").yellow());
            }
            None => println!("  {}", row.line()),
        }
    }
    let screen = serde_json::to_value(report.screen)
        .ok()
        .and_then(|v| v.get("state").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_default();
    println!();
    println!("  Screen: {screen}");
    if report.bottom_exhausted {
        println!("  {}", "End of feed reached.".dimmed());
    }
    if report.stale_discarded > 0 {
        println!(
            "  {}",
            format!("{} stale completions discarded", report.stale_discarded).yellow()
        );
    }
}

fn start_logger(
    cli: &Cli,
    config: &Config,
) -> Result<Option<(ActivityLoggerHandle, JoinHandle<()>)>, CliError> {
    if !config.logging.enabled {
        return Ok(None);
    }
    let (handle, join) = spawn_logger(DualLoggerConfig::from_config(config))?;
    handle.send(ActivityEvent::SessionStarted {
        version: env!("CARGO_PKG_VERSION").to_string(),
        config_hash: config.stable_hash()?,
    });
    if cli.verbose {
        eprintln!("[TLS-CLI] activity log: {}", config.paths.jsonl_log.display());
    }
    Ok(Some((handle, join)))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

// ──────────────────── cache ────────────────────

fn run_cache(cli: &Cli, args: &CacheArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let path = args.db.clone().unwrap_or_else(|| config.paths.cache_db.clone());
    let mut cache = SqliteTimelineCache::<Status>::open(&path, config.cache.account_id)?;

    match &args.command {
        None | Some(CacheCommand::Stats) => {
            let stats = cache.stats()?;
            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{} {}", "Cache".bold(), path.display());
                    println!("  Account:      {}", config.cache.account_id);
                    println!("  Entries:      {}", stats.entries);
                    println!("  Placeholders: {}", stats.placeholders);
                    println!(
                        "  Range:        {} .. {}",
                        stats.oldest_id.as_deref().unwrap_or("-"),
                        stats.newest_id.as_deref().unwrap_or("-")
                    );
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "cache stats",
                        "path": path.to_string_lossy(),
                        "account_id": config.cache.account_id,
                        "stats": stats,
                    });
                    write_json_line(&payload)?;
                }
            }
        }
        Some(CacheCommand::Prune(prune)) => {
            let days = prune.days.unwrap_or(config.cache.retention_days);
            if days == 0 {
                return Err(CliError::User("--days must be > 0".to_string()));
            }
            let removed = cache.cleanup(days)?;
            match output_mode(cli) {
                OutputMode::Human => {
                    println!("Removed {removed} cached rows older than {days} days.");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "cache prune",
                        "retention_days": days,
                        "removed": removed,
                    });
                    write_json_line(&payload)?;
                }
            }
        }
        Some(CacheCommand::Show(show)) => {
            let rows = cache.rows(show.limit)?;
            match output_mode(cli) {
                OutputMode::Human => {
                    if rows.is_empty() {
                        println!("Cache is empty.");
                    }
                    for row in &rows {
                        if row.placeholder {
                            println!("{}", format!("  {:>10}  (placeholder)", row.server_id).yellow());
                        } else {
                            println!("  {:>10}  created {}", row.server_id, row.created_at_ms);
                        }
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "cache show",
                        "rows": rows,
                    });
                    write_json_line(&payload)?;
                }
            }
        }
    }
    Ok(())
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let value = serde_json::to_value(&config)?;
                    let payload = json!({
                        "command": "config show",
                        "config": value,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── output ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("TLSYNC_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
