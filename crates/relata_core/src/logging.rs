//! Rolling file logs for the engine.
//!
//! Engine events are single `key=value` lines tagged with `module=<area>`.
//! Each [`LogArea`] maps to one Rust module, so the verbosity of transaction,
//! provider and database events can be tuned independently. Events carry ids,
//! counts and durations only; property values never reach the log.

use flexi_logger::{
    Cleanup, Criterion, FileSpec, LogSpecification, Logger, LoggerHandle, Naming, WriteMode,
};
use log::{error, info, LevelFilter};
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const LOG_FILE_BASENAME: &str = "relata";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;

static ACTIVE: OnceCell<ActiveLogging> = OnceCell::new();
static PANIC_HOOK_INSTALLED: OnceCell<()> = OnceCell::new();

struct ActiveLogging {
    config: LoggingConfig,
    _handle: LoggerHandle,
}

/// Engine areas that emit their own `module=` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogArea {
    /// Loading, relation changes, commit and rollback.
    Transaction,
    /// Persistence providers.
    Repo,
    /// Object-store connections and schema steps.
    Db,
}

impl LogArea {
    pub const ALL: [Self; 3] = [Self::Transaction, Self::Repo, Self::Db];

    /// Value of the `module=` field on this area's events.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::Repo => "repo",
            Self::Db => "db",
        }
    }

    fn module_path(self) -> &'static str {
        match self {
            Self::Transaction => "relata_core::transaction",
            Self::Repo => "relata_core::repo",
            Self::Db => "relata_core::db",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|area| area.tag() == tag)
    }
}

/// Where the process logs and how verbosely each area does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Level for everything without an area override.
    pub level: LevelFilter,
    pub area_levels: BTreeMap<LogArea, LevelFilter>,
    /// Absolute directory receiving the rolling `relata` log files.
    pub log_dir: PathBuf,
}

impl LoggingConfig {
    pub fn new(level: LevelFilter, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            level,
            area_levels: BTreeMap::new(),
            log_dir: log_dir.into(),
        }
    }

    /// Configuration using [`default_log_level`] and no area overrides.
    pub fn with_default_level(log_dir: impl Into<PathBuf>) -> Self {
        Self::new(default_log_level(), log_dir)
    }

    pub fn with_area_level(mut self, area: LogArea, level: LevelFilter) -> Self {
        self.area_levels.insert(area, level);
        self
    }

    /// Applies comma-separated directives such as `warn,transaction=debug`.
    ///
    /// A bare level replaces the default; `<area>=<level>` overrides one area.
    ///
    /// # Errors
    /// Returns an error naming the first directive with an unknown area or level.
    pub fn with_directives(mut self, directives: &str) -> Result<Self, String> {
        for directive in directives.split(',').map(str::trim) {
            if directive.is_empty() {
                continue;
            }
            match directive.split_once('=') {
                None => self.level = parse_level(directive)?,
                Some((tag, level)) => {
                    let tag = tag.trim().to_ascii_lowercase();
                    let area = LogArea::from_tag(&tag).ok_or_else(|| {
                        let known: Vec<&str> = LogArea::ALL.iter().map(|area| area.tag()).collect();
                        format!("unknown log area `{tag}`; expected one of {}", known.join("|"))
                    })?;
                    self.area_levels.insert(area, parse_level(level)?);
                }
            }
        }
        Ok(self)
    }

    fn module_levels(&self) -> Vec<(&'static str, LevelFilter)> {
        self.area_levels
            .iter()
            .map(|(area, level)| (area.module_path(), *level))
            .collect()
    }

    fn log_specification(&self) -> LogSpecification {
        let mut builder = LogSpecification::builder();
        builder.default(self.level);
        for (module, level) in self.module_levels() {
            builder.module(module, level);
        }
        builder.build()
    }

    fn describe_areas(&self) -> String {
        if self.area_levels.is_empty() {
            return "none".to_string();
        }
        self.area_levels
            .iter()
            .map(|(area, level)| format!("{}:{}", area.tag(), level.as_str().to_ascii_lowercase()))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// `debug` in debug builds, `info` otherwise.
pub fn default_log_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Starts file logging for the process.
///
/// Repeating the call with an equal configuration is a no-op; any other
/// configuration after the first success is rejected. Never panics.
///
/// # Errors
/// - `log_dir` is empty, relative, or cannot be created.
/// - A different configuration is already active.
/// - The logger backend fails to start.
pub fn init_logging(config: &LoggingConfig) -> Result<(), String> {
    check_log_dir(&config.log_dir)?;

    let active = ACTIVE.get_or_try_init(|| start(config))?;
    if active.config != *config {
        return Err(format!(
            "logging already active at `{}` with level {} (areas {}); refusing to reconfigure",
            active.config.log_dir.display(),
            active.config.level,
            active.config.describe_areas()
        ));
    }
    Ok(())
}

/// The active configuration, or `None` before [`init_logging`] succeeds.
pub fn logging_status() -> Option<LoggingConfig> {
    ACTIVE.get().map(|active| active.config.clone())
}

fn start(config: &LoggingConfig) -> Result<ActiveLogging, String> {
    std::fs::create_dir_all(&config.log_dir).map_err(|err| {
        format!(
            "failed to create log directory `{}`: {err}",
            config.log_dir.display()
        )
    })?;

    let handle = Logger::with(config.log_specification())
        .log_to_file(
            FileSpec::default()
                .directory(config.log_dir.as_path())
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(MAX_LOG_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| format!("failed to start logger: {err}"))?;

    install_panic_hook_once();
    info!(
        "event=logging_init module=logging status=ok version={} level={} areas={} log_dir={}",
        env!("CARGO_PKG_VERSION"),
        config.level.as_str().to_ascii_lowercase(),
        config.describe_areas(),
        config.log_dir.display()
    );

    Ok(ActiveLogging {
        config: config.clone(),
        _handle: handle,
    })
}

fn parse_level(raw: &str) -> Result<LevelFilter, String> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("warning") {
        return Ok(LevelFilter::Warn);
    }
    LevelFilter::from_str(raw).map_err(|_| {
        format!("unsupported log level `{raw}`; expected off|error|warn|info|debug|trace")
    })
}

fn check_log_dir(log_dir: &Path) -> Result<(), String> {
    if log_dir.as_os_str().is_empty() {
        return Err("log_dir cannot be empty".to_string());
    }
    if !log_dir.is_absolute() {
        return Err(format!(
            "log_dir must be an absolute path, got `{}`",
            log_dir.display()
        ));
    }
    Ok(())
}

fn install_panic_hook_once() {
    if PANIC_HOOK_INSTALLED.set(()).is_err() {
        return;
    }

    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        // Listener panics can carry property values in their message.
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let thread = std::thread::current();
        error!(
            "event=panic_captured module=logging status=error thread={} location={} payload={}",
            thread.name().unwrap_or("unnamed"),
            location,
            payload_summary(panic_info.payload())
        );
        previous_hook(panic_info);
    }));
}

fn payload_summary(payload: &(dyn std::any::Any + Send)) -> String {
    let text = payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    single_line(&text, MAX_PANIC_PAYLOAD_CHARS)
}

fn single_line(value: &str, max_chars: usize) -> String {
    let flattened = value.replace(['\n', '\r'], " ");
    let mut kept: String = flattened.chars().take(max_chars).collect();
    if flattened.chars().count() > max_chars {
        kept.push_str("...");
    }
    kept
}
