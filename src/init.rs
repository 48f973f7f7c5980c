use crate::backend::{make_backend_from_config, parse_dsn, BackendBuildError, DsnError};
use crate::buffer::{LogBuffer, PersistError, DEFAULT_CAPACITY, DEFAULT_PERSIST_TIMEOUT};
use crate::console::{ConsoleSink, ConsoleWriter};
use crate::emitter::Logger;
use crate::env::*;
use crate::flusher::{Flusher, FlusherError, FlusherState};
use crate::layer::PipelineLayer;
use crate::level::LogLevel;
use crate::query::QuerySurface;
use crate::schedule::{FlushSchedule, ScheduleError, DEFAULT_SCHEDULE};
use crate::store::Backend;
use std::sync::Arc;
use tokio::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Configuration of the logging pipeline.
///
/// **Fields**
/// - `buffer_capacity`: pending events that trigger an immediate flush.
/// - `flush_schedule`: recurring flush expression, see [`FlushSchedule`].
/// - `min_level`: events below this level reach neither sink.
/// - `persist_timeout`: upper bound on one batch insert.
/// - `enable_stdout`: if `false`, the console sink discards everything.
/// - `console_ansi`: colored console output.
/// - `capture_stack_traces`: attach a backtrace to `error`/`fatal` events
///   created through the [`Logger`] builders.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub buffer_capacity: usize,
    pub flush_schedule: FlushSchedule,
    pub min_level: LogLevel,
    pub persist_timeout: Duration,
    pub enable_stdout: bool,
    pub console_ansi: bool,
    pub capture_stack_traces: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_CAPACITY,
            flush_schedule: FlushSchedule::default(),
            min_level: LogLevel::Info,
            persist_timeout: DEFAULT_PERSIST_TIMEOUT,
            enable_stdout: true,
            console_ansi: false,
            capture_stack_traces: true,
        }
    }
}

/// A configuration value that could not be used.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{key} must be a positive integer, got {value:?}")]
    NotPositive { key: &'static str, value: String },

    #[error("{key} must be true or false, got {value:?}")]
    NotBool { key: &'static str, value: String },

    #[error("{key}: {source}")]
    Level {
        key: &'static str,
        #[source]
        source: crate::event::EventError,
    },

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

impl PipelineConfig {
    /// Development defaults: everything from `debug` up, colored console.
    pub fn development() -> Self {
        Self {
            min_level: LogLevel::Debug,
            console_ansi: true,
            ..Self::default()
        }
    }

    /// Read the configuration from the environment (see [`crate::env`]).
    /// Unset or empty variables fall back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_opt)
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let development = match lookup(LOG_DEVELOPMENT_ENV) {
            Some(v) => parse_bool(LOG_DEVELOPMENT_ENV, &v)?,
            None => false,
        };
        let mut config = if development { Self::development() } else { Self::default() };

        let schedule = lookup(LOG_FLUSH_SCHEDULE_ENV).unwrap_or_else(|| DEFAULT_SCHEDULE.to_string());
        config.flush_schedule = FlushSchedule::parse(&schedule)?;

        if let Some(v) = lookup(LOG_BUFFER_CAPACITY_ENV) {
            config.buffer_capacity = parse_positive(LOG_BUFFER_CAPACITY_ENV, &v)? as usize;
        }
        if let Some(v) = lookup(LOG_MIN_LEVEL_ENV) {
            config.min_level = v
                .parse()
                .map_err(|source| ConfigError::Level { key: LOG_MIN_LEVEL_ENV, source })?;
        }
        if let Some(v) = lookup(LOG_PERSIST_TIMEOUT_SECS_ENV) {
            config.persist_timeout = Duration::from_secs(parse_positive(LOG_PERSIST_TIMEOUT_SECS_ENV, &v)?);
        }
        if let Some(v) = lookup(LOG_CONSOLE_ANSI_ENV) {
            config.console_ansi = parse_bool(LOG_CONSOLE_ANSI_ENV, &v)?;
        }
        Ok(config)
    }
}

fn parse_positive(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::NotPositive { key, value: value.to_string() }),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::NotBool { key, value: value.to_string() }),
    }
}

/// Buffer, logger, flusher and query surface wired over one backend.
pub struct Pipeline {
    logger: Logger,
    flusher: Flusher,
    queries: QuerySurface,
}

impl Pipeline {
    /// Assemble the pipeline and start the flusher. Must be called from
    /// within a Tokio runtime.
    pub fn start(backend: Backend, config: &PipelineConfig) -> Result<Self, FlusherError> {
        let console: Arc<dyn ConsoleSink> = if config.enable_stdout {
            Arc::new(ConsoleWriter::stdout(config.console_ansi))
        } else {
            Arc::new(ConsoleWriter::new(std::io::sink(), false))
        };
        Self::start_with_console(backend, console, config)
    }

    /// [`start`](Self::start) with a custom console sink.
    pub fn start_with_console(
        backend: Backend,
        console: Arc<dyn ConsoleSink>,
        config: &PipelineConfig,
    ) -> Result<Self, FlusherError> {
        let buffer = Arc::new(
            LogBuffer::new(backend.store, config.buffer_capacity)
                .with_persist_timeout(config.persist_timeout),
        );
        let logger = Logger::new(Arc::clone(&buffer), console, config.min_level)
            .with_stack_traces(config.capture_stack_traces);
        let flusher = Flusher::new(buffer);
        flusher.start_with(config.flush_schedule.clone())?;

        Ok(Pipeline {
            logger,
            flusher,
            queries: QuerySurface::new(backend.query),
        })
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn buffer(&self) -> &Arc<LogBuffer> {
        self.logger.buffer()
    }

    pub fn queries(&self) -> &QuerySurface {
        &self.queries
    }

    pub fn flusher_state(&self) -> FlusherState {
        self.flusher.state()
    }

    /// A `tracing` layer feeding this pipeline's logger.
    pub fn tracing_layer(&self) -> PipelineLayer {
        PipelineLayer::new(self.logger.clone())
    }

    /// Stop the flusher and persist whatever is still buffered.
    pub async fn shutdown(&self) -> Result<usize, PersistError> {
        self.flusher.stop().await
    }
}

/// Anything that can go wrong while building a pipeline from the
/// environment.
#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dsn(#[from] DsnError),

    #[error(transparent)]
    Backend(#[from] BackendBuildError),

    #[error(transparent)]
    Flusher(#[from] FlusherError),
}

/// Read [`PipelineConfig`] and the backend DSN from the environment once,
/// connect the backend and start the pipeline.
pub async fn pipeline_from_env() -> Result<Pipeline, InitError> {
    let config = PipelineConfig::from_env()?;
    let dsn = env_or(LOG_SINK_DSN_ENV, "memory://");
    let backend = make_backend_from_config(&parse_dsn(&dsn)?).await?;
    Ok(Pipeline::start(backend, &config)?)
}

/// Install a global `tracing` subscriber that routes every `tracing` event
/// through `pipeline`.
///
/// **Effects**
///
/// This installs a [`Registry`] combined with [`PipelineLayer`] as the
/// global default subscriber. Optional: the pipeline's [`Logger`] works
/// without it.
pub fn init_tracing(pipeline: &Pipeline) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let subscriber = Registry::default().with(pipeline.tracing_layer());
    tracing::subscriber::set_global_default(subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = PipelineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.buffer_capacity, 100);
        assert_eq!(config.flush_schedule.to_string(), DEFAULT_SCHEDULE);
        assert_eq!(config.min_level, LogLevel::Info);
    }

    #[test]
    fn development_mode_lowers_level() {
        let config = PipelineConfig::from_lookup(lookup(&[(LOG_DEVELOPMENT_ENV, "true")])).unwrap();
        assert_eq!(config.min_level, LogLevel::Debug);
        assert!(config.console_ansi);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = PipelineConfig::from_lookup(lookup(&[
            (LOG_FLUSH_SCHEDULE_ENV, "@every 30s"),
            (LOG_BUFFER_CAPACITY_ENV, "250"),
            (LOG_MIN_LEVEL_ENV, "warn"),
            (LOG_PERSIST_TIMEOUT_SECS_ENV, "2"),
            (LOG_CONSOLE_ANSI_ENV, "off"),
        ]))
        .unwrap();
        assert_eq!(config.flush_schedule.interval(), Some(Duration::from_secs(30)));
        assert_eq!(config.buffer_capacity, 250);
        assert_eq!(config.min_level, LogLevel::Warn);
        assert_eq!(config.persist_timeout, Duration::from_secs(2));
        assert!(!config.console_ansi);
    }

    #[test]
    fn invalid_values_are_reported() {
        assert!(matches!(
            PipelineConfig::from_lookup(lookup(&[(LOG_BUFFER_CAPACITY_ENV, "0")])),
            Err(ConfigError::NotPositive { .. })
        ));
        assert!(matches!(
            PipelineConfig::from_lookup(lookup(&[(LOG_MIN_LEVEL_ENV, "critical")])),
            Err(ConfigError::Level { .. })
        ));
        assert!(matches!(
            PipelineConfig::from_lookup(lookup(&[(LOG_FLUSH_SCHEDULE_ENV, "sometimes")])),
            Err(ConfigError::Schedule(_))
        ));
    }
}
