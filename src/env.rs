//! Environment variable names read by [`PipelineConfig::from_env`](crate::init::PipelineConfig::from_env)
//! and [`parse_dsn`](crate::backend::parse_dsn) callers.
//!
//! These are purely helpers; the core types never touch the environment
//! themselves.

/// Recurring flush schedule, e.g. `*/5 * * * *` or `@every 30s`.
pub const LOG_FLUSH_SCHEDULE_ENV: &str = "LOG_FLUSH_SCHEDULE";

/// Number of buffered events that triggers an immediate flush.
pub const LOG_BUFFER_CAPACITY_ENV: &str = "LOG_BUFFER_CAPACITY";

/// Minimum level emitted to both sinks (`debug`, `info`, ...).
pub const LOG_MIN_LEVEL_ENV: &str = "LOG_MIN_LEVEL";

/// `true` switches defaults to development mode: debug level, colored console.
pub const LOG_DEVELOPMENT_ENV: &str = "LOG_DEVELOPMENT";

/// Timeout in seconds for one batch insert.
pub const LOG_PERSIST_TIMEOUT_SECS_ENV: &str = "LOG_PERSIST_TIMEOUT_SECS";

/// Force ANSI colors on the console on or off.
pub const LOG_CONSOLE_ANSI_ENV: &str = "LOG_CONSOLE_ANSI";

/// Backend DSN: `memory://`, `noop://`, `clickhouse://...`, `postgres://...`.
pub const LOG_SINK_DSN_ENV: &str = "LOG_SINK_DSN";

/// ClickHouse base HTTP URL, e.g. `http://127.0.0.1:8123`.
pub const LOG_SINK_CLICKHOUSE_URL_ENV: &str = "LOG_SINK_CLICKHOUSE_URL";

/// ClickHouse database name.
pub const LOG_SINK_CLICKHOUSE_DB_ENV: &str = "LOG_SINK_CLICKHOUSE_DB";

/// ClickHouse target table name.
pub const LOG_SINK_CLICKHOUSE_TABLE_ENV: &str = "LOG_SINK_CLICKHOUSE_TABLE";

/// Optional ClickHouse user name.
pub const LOG_SINK_CLICKHOUSE_USER_ENV: &str = "LOG_SINK_CLICKHOUSE_USER";

/// Optional ClickHouse password.
pub const LOG_SINK_CLICKHOUSE_PASSWORD_ENV: &str = "LOG_SINK_CLICKHOUSE_PASSWORD";

/// Read an environment variable or fall back to a provided default.
/// Empty values count as unset.
pub fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

/// Read an environment variable, treating empty values as unset.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
