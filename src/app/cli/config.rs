//! TOML configuration file parsing and loading
//!
//! The file is read into a `toml::Table` and walked key by key so every
//! rejected value can be reported with the key it came from. Command line
//! flags are applied on top afterwards.

use crate::app::cli::args::Args;
use crate::core::error_handling::ContextualError;
use crate::core::retry::BackoffPolicy;
use crate::queue::api::{EngineConfig, JobOptionsOverride, Retention};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use toml::{Table, Value};

pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_STORE_FILE: &str = "jobqueue-store.json";
/// Longest duration any `*-ms` setting accepts: 100 years
pub const MAX_DURATION_MS: u64 = 100 * 365 * 24 * 60 * 60 * 1000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("The specified configuration file does not exist: {0}")]
    Missing(PathBuf),

    #[error("Error reading configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error parsing configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown configuration key '{0}'")]
    UnknownKey(String),
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

impl ContextualError for ConfigError {
    // Messages are built from the path and key, so callers render the
    // Display form with their own context.
    fn is_user_actionable(&self) -> bool {
        false
    }

    fn user_message(&self) -> Option<&str> {
        None
    }
}

/// Settings of one `[queues.<name>]` section
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueSettings {
    pub concurrency: Option<usize>,
    pub defaults: JobOptionsOverride,
}

/// Everything the binary reads from the configuration file and flags
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub log_file: Option<PathBuf>,
    pub store_file: Option<PathBuf>,
    pub color: Option<bool>,
    pub engine: EngineConfig,
    pub snapshot_interval: Duration,
    pub queues: BTreeMap<String, QueueSettings>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: None,
            log_format: None,
            log_file: None,
            store_file: None,
            color: None,
            engine: EngineConfig::default(),
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            queues: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Configured concurrency for `queue`, or `default`
    pub fn concurrency_for(&self, queue: &str, default: usize) -> usize {
        self.queues
            .get(queue)
            .and_then(|settings| settings.concurrency)
            .unwrap_or(default)
    }

    pub fn store_path(&self) -> PathBuf {
        self.store_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_FILE))
    }

    /// Engine settings with every configured queue's defaults attached
    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = self.engine.clone();
        for (name, settings) in &self.queues {
            if !settings.defaults.is_empty() {
                engine
                    .queue_defaults
                    .insert(name.clone(), settings.defaults.clone());
            }
        }
        engine
    }

    /// Apply command line flags; flags win over the file
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(level) = &args.log_level {
            self.log_level = Some(level.clone());
        }
        if let Some(format) = &args.log_format {
            self.log_format = Some(format.clone());
        }
        if let Some(file) = &args.log_file {
            self.log_file = disabled_or_path(&file.to_string_lossy());
        }
        if let Some(store) = &args.store_file {
            self.store_file = Some(store.clone());
        }
        if let Some(color) = args.color_requested() {
            self.color = Some(color);
        }
    }
}

/// `<config_dir>/Jobqueue/jobqueue.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("Jobqueue").join("jobqueue.toml"))
}

/// Load the configuration file
///
/// An explicitly named file must exist; the default location is optional.
pub async fn load_config(config_file: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let path = match config_file {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::Missing(path.to_path_buf()));
            }
            path.to_path_buf()
        }
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(AppConfig::default()),
        },
    };

    let contents = tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
    parse_config(&contents, &path)
}

pub fn parse_config(contents: &str, path: &Path) -> Result<AppConfig, ConfigError> {
    let table = toml::from_str::<Table>(contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = AppConfig::default();
    apply_toml_values(&mut config, &table)?;
    Ok(config)
}

/// Walk the top-level table into `config`
pub fn apply_toml_values(config: &mut AppConfig, table: &Table) -> Result<(), ConfigError> {
    for (key, value) in table {
        match key.as_str() {
            "log-level" => config.log_level = Some(string_value(key, value)?.to_string()),
            "log-format" => {
                let format = string_value(key, value)?;
                if !matches!(format, "text" | "ext" | "json") {
                    return Err(ConfigError::invalid(key, "expected text, ext or json"));
                }
                config.log_format = Some(format.to_string());
            }
            "log-file" => config.log_file = disabled_or_path(string_value(key, value)?),
            "store-file" => config.store_file = Some(PathBuf::from(string_value(key, value)?)),
            "color" => config.color = Some(bool_value(key, value)?),
            "engine" => apply_engine(config, table_value(key, value)?)?,
            "queues" => {
                for (name, section) in table_value(key, value)? {
                    let prefix = format!("queues.{}", name);
                    crate::core::validation::validate_name("queue name", name)
                        .map_err(|e| ConfigError::invalid(&prefix, e.to_string()))?;
                    let settings = parse_queue(&prefix, table_value(&prefix, section)?)?;
                    config.queues.insert(name.clone(), settings);
                }
            }
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
    }
    Ok(())
}

fn apply_engine(config: &mut AppConfig, table: &Table) -> Result<(), ConfigError> {
    for (key, value) in table {
        let full_key = format!("engine.{}", key);
        let duration = millis_value(&full_key, value)?;
        match key.as_str() {
            "tick-interval-ms" => config.engine.tick_interval = non_zero(&full_key, duration)?,
            "lock-duration-ms" => config.engine.lock_duration = non_zero(&full_key, duration)?,
            "poll-interval-ms" => config.engine.poll_interval = non_zero(&full_key, duration)?,
            "drain-timeout-ms" => config.engine.drain_timeout = duration,
            "backoff-ceiling-ms" => config.engine.backoff_ceiling = duration,
            "snapshot-interval-ms" => config.snapshot_interval = non_zero(&full_key, duration)?,
            _ => return Err(ConfigError::UnknownKey(full_key)),
        }
    }
    Ok(())
}

fn parse_queue(prefix: &str, table: &Table) -> Result<QueueSettings, ConfigError> {
    let mut settings = QueueSettings::default();
    for (key, value) in table {
        let full_key = format!("{}.{}", prefix, key);
        match key.as_str() {
            "concurrency" => {
                let n = positive_value(&full_key, value)?;
                settings.concurrency = Some(n as usize);
            }
            "max-attempts" => {
                let n = positive_value(&full_key, value)?;
                let n = u32::try_from(n).map_err(|_| ConfigError::invalid(&full_key, "too large"))?;
                settings.defaults.max_attempts = Some(n);
            }
            "priority" => {
                let n = integer_value(&full_key, value)?;
                let n = i32::try_from(n).map_err(|_| ConfigError::invalid(&full_key, "out of range"))?;
                settings.defaults.priority = Some(n);
            }
            "delay-ms" => {
                let delay = millis_value(&full_key, value)?;
                settings.defaults.initial_delay_ms = Some(delay.as_millis() as u64);
            }
            "backoff" => settings.defaults.backoff = Some(parse_backoff(&full_key, value)?),
            "remove-on-complete" => {
                settings.defaults.remove_on_complete = Some(retention_value(&full_key, value)?)
            }
            "remove-on-fail" => {
                settings.defaults.remove_on_fail = Some(retention_value(&full_key, value)?)
            }
            _ => return Err(ConfigError::UnknownKey(full_key)),
        }
    }
    Ok(settings)
}

fn parse_backoff(key: &str, value: &Value) -> Result<BackoffPolicy, ConfigError> {
    let table = table_value(key, value)?;
    let delay_key = format!("{}.delay-ms", key);
    let delay = match table.get("delay-ms") {
        Some(delay) => millis_value(&delay_key, delay)?.as_millis() as u64,
        None => return Err(ConfigError::invalid(&delay_key, "missing")),
    };
    let kind_key = format!("{}.kind", key);
    let policy = match table.get("kind").map(|kind| string_value(&kind_key, kind)).transpose()? {
        Some("fixed") => BackoffPolicy::fixed(delay),
        Some("exponential") | None => BackoffPolicy::exponential(delay),
        Some(other) => {
            return Err(ConfigError::invalid(
                &kind_key,
                format!("unknown backoff kind '{}'", other),
            ))
        }
    };
    if let Some(extra) = table.keys().find(|k| !matches!(k.as_str(), "kind" | "delay-ms")) {
        return Err(ConfigError::UnknownKey(format!("{}.{}", key, extra)));
    }
    Ok(policy)
}

fn disabled_or_path(value: &str) -> Option<PathBuf> {
    // "none" and "-" disable file logging
    if value.eq_ignore_ascii_case("none") || value == "-" {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

fn string_value<'a>(key: &str, value: &'a Value) -> Result<&'a str, ConfigError> {
    value
        .as_str()
        .ok_or_else(|| ConfigError::invalid(key, "expected a string"))
}

fn bool_value(key: &str, value: &Value) -> Result<bool, ConfigError> {
    value
        .as_bool()
        .ok_or_else(|| ConfigError::invalid(key, "expected true or false"))
}

fn table_value<'a>(key: &str, value: &'a Value) -> Result<&'a Table, ConfigError> {
    value
        .as_table()
        .ok_or_else(|| ConfigError::invalid(key, "expected a table"))
}

fn integer_value(key: &str, value: &Value) -> Result<i64, ConfigError> {
    value
        .as_integer()
        .ok_or_else(|| ConfigError::invalid(key, "expected an integer"))
}

fn positive_value(key: &str, value: &Value) -> Result<u64, ConfigError> {
    let n = integer_value(key, value)?;
    if n <= 0 {
        return Err(ConfigError::invalid(key, "must be greater than 0"));
    }
    Ok(n as u64)
}

fn millis_value(key: &str, value: &Value) -> Result<Duration, ConfigError> {
    let n = integer_value(key, value)?;
    if n < 0 {
        return Err(ConfigError::invalid(key, "must not be negative"));
    }
    let n = n as u64;
    if n > MAX_DURATION_MS {
        return Err(ConfigError::invalid(
            key,
            format!("must be at most {}", MAX_DURATION_MS),
        ));
    }
    Ok(Duration::from_millis(n))
}

fn non_zero(key: &str, duration: Duration) -> Result<Duration, ConfigError> {
    if duration.is_zero() {
        return Err(ConfigError::invalid(key, "must be greater than 0"));
    }
    Ok(duration)
}

fn retention_value(key: &str, value: &Value) -> Result<Retention, ConfigError> {
    match value {
        Value::Boolean(false) => Ok(Retention::KeepAll),
        Value::Boolean(true) => Ok(Retention::RemoveImmediately),
        Value::Integer(n) if *n >= 0 => Ok(Retention::KeepLatest(*n as usize)),
        _ => Err(ConfigError::invalid(
            key,
            "expected true, false or a non-negative count",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
log-level = "debug"
log-format = "json"
log-file = "none"
store-file = "jobs.json"

[engine]
tick-interval-ms = 500
lock-duration-ms = 10000
poll-interval-ms = 100
drain-timeout-ms = 2000
backoff-ceiling-ms = 60000
snapshot-interval-ms = 1000

[queues.email]
concurrency = 5
max-attempts = 4
backoff = { kind = "fixed", delay-ms = 1500 }
priority = 2
remove-on-complete = 10
remove-on-fail = false
"#;

    fn parse(contents: &str) -> Result<AppConfig, ConfigError> {
        parse_config(contents, Path::new("test.toml"))
    }

    fn invalid_key(result: Result<AppConfig, ConfigError>) -> String {
        match result {
            Err(ConfigError::InvalidValue { key, .. }) => key,
            Err(ConfigError::UnknownKey(key)) => key,
            other => panic!("expected a key error, got {:?}", other),
        }
    }

    #[test]
    fn test_full_configuration() {
        let config = parse(SAMPLE).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.log_format.as_deref(), Some("json"));
        assert_eq!(config.log_file, None);
        assert_eq!(config.store_path(), PathBuf::from("jobs.json"));
        assert_eq!(config.engine.tick_interval, Duration::from_millis(500));
        assert_eq!(config.engine.lock_duration, Duration::from_secs(10));
        assert_eq!(config.engine.poll_interval, Duration::from_millis(100));
        assert_eq!(config.engine.drain_timeout, Duration::from_secs(2));
        assert_eq!(config.engine.backoff_ceiling, Duration::from_secs(60));
        assert_eq!(config.snapshot_interval, Duration::from_secs(1));

        let email = &config.queues["email"];
        assert_eq!(email.concurrency, Some(5));
        assert_eq!(email.defaults.max_attempts, Some(4));
        assert_eq!(email.defaults.backoff, Some(BackoffPolicy::fixed(1500)));
        assert_eq!(email.defaults.priority, Some(2));
        assert_eq!(email.defaults.remove_on_complete, Some(Retention::KeepLatest(10)));
        assert_eq!(email.defaults.remove_on_fail, Some(Retention::KeepAll));

        let engine = config.engine_config();
        assert_eq!(engine.queue_defaults["email"], email.defaults);
        assert_eq!(config.concurrency_for("email", 1), 5);
        assert_eq!(config.concurrency_for("notification", 10), 10);
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.snapshot_interval, DEFAULT_SNAPSHOT_INTERVAL);
        assert_eq!(config.store_path(), PathBuf::from(DEFAULT_STORE_FILE));
        assert!(config.queues.is_empty());
    }

    #[test]
    fn test_errors_name_the_key() {
        assert_eq!(invalid_key(parse("log-level = 3")), "log-level");
        assert_eq!(invalid_key(parse("log-format = \"xml\"")), "log-format");
        assert_eq!(invalid_key(parse("[engine]\ntick-interval-ms = 0")), "engine.tick-interval-ms");
        assert_eq!(invalid_key(parse("[engine]\nlock-duration-ms = -5")), "engine.lock-duration-ms");
        assert_eq!(invalid_key(parse("[engine]\nwarp = 9")), "engine.warp");
        assert_eq!(invalid_key(parse("[queues.email]\nconcurrency = 0")), "queues.email.concurrency");
        assert_eq!(
            invalid_key(parse("[queues.email]\nremove-on-fail = \"yes\"")),
            "queues.email.remove-on-fail"
        );
        assert_eq!(
            invalid_key(parse("[queues.email]\nbackoff = { kind = \"linear\", delay-ms = 5 }")),
            "queues.email.backoff.kind"
        );
        assert_eq!(
            invalid_key(parse("[queues.email]\nbackoff = { kind = \"fixed\" }")),
            "queues.email.backoff.delay-ms"
        );
        assert_eq!(invalid_key(parse("mystery = true")), "mystery");
    }

    #[test]
    fn test_out_of_range_durations_are_rejected() {
        let huge = format!("[engine]\nlock-duration-ms = {}", i64::MAX);
        assert_eq!(invalid_key(parse(&huge)), "engine.lock-duration-ms");
        let huge = format!("[engine]\nbackoff-ceiling-ms = {}", MAX_DURATION_MS + 1);
        assert_eq!(invalid_key(parse(&huge)), "engine.backoff-ceiling-ms");
        let huge = format!("[queues.email]\nbackoff = {{ delay-ms = {} }}", i64::MAX);
        assert_eq!(invalid_key(parse(&huge)), "queues.email.backoff.delay-ms");

        let longest = format!("[engine]\nlock-duration-ms = {}", MAX_DURATION_MS);
        assert_eq!(
            parse(&longest).unwrap().engine.lock_duration,
            Duration::from_millis(MAX_DURATION_MS)
        );
    }

    #[test]
    fn test_parse_error_is_reported() {
        assert!(matches!(parse("log-level = "), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_flags_override_file() {
        let mut config = parse(SAMPLE).unwrap();
        let args = Args::try_parse_styled(
            ["jobqueue", "--log-level", "warn", "--store-file", "other.json", "--no-color", "status"],
            false,
        )
        .unwrap();
        config.apply_args(&args);
        assert_eq!(config.log_level.as_deref(), Some("warn"));
        assert_eq!(config.log_format.as_deref(), Some("json"));
        assert_eq!(config.store_path(), PathBuf::from("other.json"));
        assert_eq!(config.color, Some(false));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobqueue.toml");
        tokio::fs::write(&path, SAMPLE).await.unwrap();

        let config = load_config(Some(path.as_path())).await.unwrap();
        assert_eq!(config.queues.len(), 1);

        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            load_config(Some(missing.as_path())).await,
            Err(ConfigError::Missing(_))
        ));
    }
}
