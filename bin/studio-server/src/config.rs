//! Server configuration, loaded from environment variables at startup.

use std::path::PathBuf;

use studio_import_logs::LogServiceConfig;

/// Runtime configuration for studio-server.
///
/// Every field has a default so the server starts without any environment
/// variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:7001"`).
    pub bind_address: String,

    /// sqlx SQLite URL holding the `import_tasks` table
    /// (default: `"sqlite://studio.db"`).
    pub database_url: String,

    /// Directory holding one sub-directory of log segments per import task.
    pub task_log_root: PathBuf,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// When set, also write logs to a daily rolling file in this directory.
    pub log_dir: Option<PathBuf>,

    /// Comma-separated list of allowed CORS origins; `None` allows any.
    pub cors_allowed_origins: Option<String>,

    /// Serve Swagger UI and the OpenAPI document.
    pub enable_swagger: bool,

    /// Size of one read from a log segment while streaming a download.
    pub read_chunk_bytes: usize,

    /// Cap on lines returned by one log page.
    pub max_log_lines: usize,

    /// Longer log lines are cut to this many bytes in a page.
    pub max_line_bytes: usize,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("STUDIO_BIND", "0.0.0.0:7001"),
            database_url: env_or("STUDIO_DATABASE_URL", "sqlite://studio.db"),
            task_log_root: PathBuf::from(env_or("STUDIO_TASK_LOG_ROOT", "./data/tasks")),
            log_level: env_or("STUDIO_LOG", "info"),
            log_json: env_flag("STUDIO_LOG_JSON", false),
            log_dir: non_empty_env("STUDIO_LOG_DIR").map(PathBuf::from),
            cors_allowed_origins: non_empty_env("STUDIO_CORS_ORIGINS"),
            enable_swagger: env_flag("STUDIO_ENABLE_SWAGGER", true),
            read_chunk_bytes: parse_env("STUDIO_READ_CHUNK_BYTES", 64 * 1024),
            max_log_lines: parse_env("STUDIO_MAX_LOG_LINES", 1000),
            max_line_bytes: parse_env("STUDIO_MAX_LINE_BYTES", 16 * 1024),
        }
    }

    pub fn log_service(&self) -> LogServiceConfig {
        LogServiceConfig {
            read_chunk_bytes: self.read_chunk_bytes.max(1),
            max_lines: self.max_log_lines.max(1),
            max_line_bytes: self.max_line_bytes.max(1),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:7001".to_owned(),
            database_url: "sqlite://studio.db".to_owned(),
            task_log_root: PathBuf::from("./data/tasks"),
            log_level: "info".to_owned(),
            log_json: false,
            log_dir: None,
            cors_allowed_origins: None,
            enable_swagger: true,
            read_chunk_bytes: 64 * 1024,
            max_log_lines: 1000,
            max_line_bytes: 16 * 1024,
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
