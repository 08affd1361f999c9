use dau_gateway_error::{DauError, DauResult};
use dau_gateway_models::constants::LOG_FILE_NAME;
use std::{
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{subscriber::set_global_default, Level};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{filter::DynFilterFn, fmt, layer::SubscriberExt, Layer, Registry};

/// Console plus daily rolling file logger whose level can be changed at runtime.
pub struct Logger {
    level: Arc<Mutex<Level>>,
    log_dir: String,
    _file_guard: Option<WorkerGuard>,
}

fn lock(level: &Mutex<Level>) -> MutexGuard<'_, Level> {
    level.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Logger {
    pub fn new(level: Option<Level>, log_dir: impl Into<String>) -> Self {
        Logger {
            level: Arc::new(Mutex::new(level.unwrap_or(Level::INFO))),
            log_dir: log_dir.into(),
            _file_guard: None,
        }
    }

    /// Parses `trace`/`debug`/`info`/`warn`/`error`, case-insensitive.
    pub fn parse_level(level: &str) -> DauResult<Level> {
        Level::from_str(level.trim())
            .map_err(|_| DauError::ConfigurationError(format!("unknown log level `{level}`")))
    }

    #[inline]
    pub fn set_level(&self, new_level: Level) {
        *lock(&self.level) = new_level;
    }

    #[inline]
    pub fn get_level(&self) -> Level {
        *lock(&self.level)
    }

    /// Installs the global subscriber. Fails if one is already set.
    pub fn initialize(&mut self) -> DauResult<()> {
        let file_appender = rolling::daily(&self.log_dir, LOG_FILE_NAME);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        self._file_guard = Some(guard);

        let console_filter = {
            let level = Arc::clone(&self.level);
            DynFilterFn::new(move |metadata, _| metadata.level() <= &*lock(&level))
        };
        let file_filter = {
            let level = Arc::clone(&self.level);
            DynFilterFn::new(move |metadata, _| metadata.level() <= &*lock(&level))
        };

        let console_layer = {
            #[cfg(debug_assertions)]
            let layer = fmt::layer()
                .with_writer(std::io::stdout)
                .with_file(true)
                .with_line_number(true);

            #[cfg(not(debug_assertions))]
            let layer = fmt::layer().with_writer(std::io::stdout).with_target(true);

            layer.with_filter(console_filter)
        };

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_filter(file_filter);

        let subscriber = Registry::default().with(console_layer).with(file_layer);
        set_global_default(subscriber).map_err(|_| DauError::from("Failed to set logger"))?;
        Ok(())
    }
}
