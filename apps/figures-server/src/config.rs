//! Configuration management for Figures Server
//!
//! Everything is read from the environment once at startup (after `.env` is
//! loaded by `dotenvy`) and is immutable afterwards.

use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("{name} must be greater than zero")]
    MustBePositive { name: &'static str },

    #[error("{name} is too large")]
    OutOfRange { name: &'static str },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub engine: EngineConfig,
    pub limits: LimitsConfig,
    pub cleanup: CleanupConfig,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root under which uploads are written, one directory per request
    pub upload_dir: PathBuf,
    /// Root under which engine output lands, one directory per request
    pub output_dir: PathBuf,
    /// Maximum request body size in bytes
    pub max_content_length: usize,
    /// Accepted document extensions, lowercase without the dot
    pub allowed_extensions: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub jar_path: PathBuf,
    pub working_dir: PathBuf,
    pub dpi: u32,
    pub java_opts: String,
    pub timeout: Duration,
    /// Keep the work directory of failed runs for diagnostics
    pub retain_failed_output: bool,
}

#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Number of engine processes allowed to run at once
    pub worker_pool_size: usize,
    /// How long a request may wait for an engine slot
    pub queue_timeout: Duration,
    /// Requests per window per client (0 = unlimited)
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
}

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub upload_retention: Duration,
    pub output_retention: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5001,
            },
            storage: StorageConfig {
                upload_dir: PathBuf::from("./uploads"),
                output_dir: PathBuf::from("./output"),
                max_content_length: 64 * 1024 * 1024,
                allowed_extensions: parse_extensions("pdf"),
            },
            engine: EngineConfig {
                jar_path: PathBuf::from("./pdffigures2/pdffigures2.jar"),
                working_dir: PathBuf::from("./pdffigures2"),
                dpi: 300,
                java_opts: "-Xmx2g".to_string(),
                timeout: Duration::from_secs(300),
                retain_failed_output: false,
            },
            limits: LimitsConfig {
                worker_pool_size: 1,
                queue_timeout: Duration::from_secs(600),
                rate_limit_requests: 60,
                rate_limit_window: Duration::from_secs(60),
            },
            cleanup: CleanupConfig {
                enabled: true,
                interval: Duration::from_secs(3600),
                upload_retention: Duration::from_secs(24 * 3600),
                output_retention: Duration::from_secs(48 * 3600),
            },
            log_level: "info".to_string(),
        }
    }
}

/// Upper bound for any configured duration (ten years)
const MAX_SECONDS: u64 = 10 * 365 * 24 * 3600;

impl Config {
    /// Read the configuration from the process environment
    ///
    /// A missing, unparsable or out-of-range variable keeps its default; the
    /// other variables are unaffected. Every fallback is returned so the
    /// caller can report it once logging is up.
    pub fn from_env() -> (Self, Vec<ConfigError>) {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> (Self, Vec<ConfigError>) {
        let defaults = Config::default();
        let mut vars = EnvReader {
            lookup,
            problems: Vec::new(),
        };

        let mut config = Config {
            server: ServerConfig {
                host: vars.string("SERVER_HOST", defaults.server.host),
                port: vars.parse("SERVER_PORT", defaults.server.port),
            },
            storage: StorageConfig {
                upload_dir: vars.path("UPLOAD_DIR", defaults.storage.upload_dir),
                output_dir: vars.path("OUTPUT_DIR", defaults.storage.output_dir),
                max_content_length: vars
                    .parse("MAX_CONTENT_LENGTH", defaults.storage.max_content_length),
                allowed_extensions: vars
                    .raw("ALLOWED_EXTENSIONS")
                    .map(|v| parse_extensions(&v))
                    .unwrap_or(defaults.storage.allowed_extensions),
            },
            engine: EngineConfig {
                jar_path: vars.path("PDFFIGURES2_JAR", defaults.engine.jar_path),
                working_dir: vars.path("PDF_FIGURES2_CWD", defaults.engine.working_dir),
                dpi: vars.parse("PDFFIGURES2_DPI", defaults.engine.dpi),
                java_opts: vars.string("JAVA_OPTS", defaults.engine.java_opts),
                timeout: vars.seconds("PDFFIGURES2_TIMEOUT_SECONDS", defaults.engine.timeout),
                retain_failed_output: vars
                    .flag("RETAIN_FAILED_OUTPUT", defaults.engine.retain_failed_output),
            },
            limits: LimitsConfig {
                worker_pool_size: vars.parse("WORKER_POOL_SIZE", defaults.limits.worker_pool_size),
                queue_timeout: vars.seconds("QUEUE_TIMEOUT_SECONDS", defaults.limits.queue_timeout),
                rate_limit_requests: vars
                    .parse("RATE_LIMIT_REQUESTS", defaults.limits.rate_limit_requests),
                rate_limit_window: vars
                    .seconds("RATE_LIMIT_WINDOW_SECONDS", defaults.limits.rate_limit_window),
            },
            cleanup: CleanupConfig {
                enabled: vars.flag("ENABLE_CLEANUP", defaults.cleanup.enabled),
                interval: vars.seconds("CLEANUP_INTERVAL_SECONDS", defaults.cleanup.interval),
                upload_retention: vars
                    .hours("UPLOAD_RETENTION_HOURS", defaults.cleanup.upload_retention),
                output_retention: vars
                    .hours("OUTPUT_RETENTION_HOURS", defaults.cleanup.output_retention),
            },
            log_level: vars
                .raw("LOG_LEVEL")
                .map(|v| v.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        let mut problems = vars.problems;
        config.enforce_positive(&Config::default(), &mut problems);
        (config, problems)
    }

    /// Reset values that must be non-zero back to their defaults
    fn enforce_positive(&mut self, defaults: &Config, problems: &mut Vec<ConfigError>) {
        if self.limits.worker_pool_size == 0 {
            problems.push(ConfigError::MustBePositive {
                name: "WORKER_POOL_SIZE",
            });
            self.limits.worker_pool_size = defaults.limits.worker_pool_size;
        }
        if self.limits.rate_limit_window.is_zero() {
            problems.push(ConfigError::MustBePositive {
                name: "RATE_LIMIT_WINDOW_SECONDS",
            });
            self.limits.rate_limit_window = defaults.limits.rate_limit_window;
        }
        if self.cleanup.interval.is_zero() {
            problems.push(ConfigError::MustBePositive {
                name: "CLEANUP_INTERVAL_SECONDS",
            });
            self.cleanup.interval = defaults.cleanup.interval;
        }
    }
}

/// Split a comma-separated extension list (`"pdf, PDF ,"` -> `{"pdf"}`)
pub fn parse_extensions(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

struct EnvReader<F> {
    lookup: F,
    problems: Vec<ConfigError>,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
    }

    fn string(&self, name: &str, default: String) -> String {
        self.raw(name).unwrap_or(default)
    }

    fn path(&self, name: &str, default: PathBuf) -> PathBuf {
        self.raw(name).map(PathBuf::from).unwrap_or(default)
    }

    fn flag(&self, name: &str, default: bool) -> bool {
        match self.raw(name) {
            Some(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
            None => default,
        }
    }

    fn parse<T: FromStr>(&mut self, name: &'static str, default: T) -> T {
        match self.raw(name) {
            Some(value) => match value.trim().parse() {
                Ok(parsed) => parsed,
                Err(_) => {
                    self.problems.push(ConfigError::InvalidValue { name, value });
                    default
                }
            },
            None => default,
        }
    }

    fn seconds(&mut self, name: &'static str, default: Duration) -> Duration {
        let secs = self.parse(name, default.as_secs());
        self.bounded(name, Some(secs), default)
    }

    fn hours(&mut self, name: &'static str, default: Duration) -> Duration {
        let hours = self.parse(name, default.as_secs() / 3600);
        self.bounded(name, hours.checked_mul(3600), default)
    }

    fn bounded(&mut self, name: &'static str, secs: Option<u64>, default: Duration) -> Duration {
        match secs {
            Some(secs) if secs <= MAX_SECONDS => Duration::from_secs(secs),
            _ => {
                self.problems.push(ConfigError::OutOfRange { name });
                default
            }
        }
    }
}
