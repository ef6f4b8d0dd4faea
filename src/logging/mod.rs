//! Логирование на базе `tracing`.
//!
//! - `config`: `LoggingConfig`, формат вывода, переопределения из окружения.
//! - `filters`: `EnvFilter` из `RUST_LOG` или конфигурации.
//! - `formatter`: консольный слой json/pretty/compact.
//! - `sinks`: консоль и файл с ежедневной ротацией.
//! - `handle`: `LoggingHandle`, держащий guard файлового писателя.

pub mod config;
mod filters;
mod formatter;
pub mod handle;
pub mod sinks;

pub use config::{LogFormat, LoggingConfig, LoggingError};
pub use handle::LoggingHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Инициализация логирования с конфигурацией.
///
/// Устанавливает глобальный subscriber; повторный вызов возвращает
/// `LoggingError::Init`.
pub fn init_logging(mut config: LoggingConfig) -> Result<LoggingHandle, LoggingError> {
    config.apply_env_overrides();
    config.validate()?;
    config.ensure_log_dir()?;

    let env_filter = filters::build_filter_from_config(&config);
    let mut layers = Vec::new();

    if let Some(console) = sinks::console::layer_with_config(&config) {
        layers.push(console);
    }

    let file_guard = match sinks::file::layer_with_config(&config) {
        Some((file_layer, guard)) => {
            layers.push(file_layer);
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.level,
        format = %config.format,
        log_dir = ?config.log_dir,
        "Logging system initialized"
    );

    Ok(LoggingHandle::new(file_guard))
}
