use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

/// Переменная окружения с уровнем логирования.
pub const ENV_LOG_LEVEL: &str = "MX_LOG_LEVEL";
/// Переменная окружения с форматом консольного вывода.
pub const ENV_LOG_FORMAT: &str = "MX_LOG_FORMAT";

const LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Формат событий в консоли.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    #[default]
    Compact,
}

/// Ошибки инициализации логирования.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log level '{0}'")]
    InvalidLevel(String),
    #[error("Invalid log format '{0}', expected json, pretty or compact")]
    InvalidFormat(String),
    #[error("Cannot create log directory {path}: {source}")]
    LogDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Global subscriber already installed: {0}")]
    Init(String),
}

/// Конфигурация логирования.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Уровень (`info`) или готовая директива EnvFilter (`mxbus=debug,warn`)
    pub level: String,
    pub format: LogFormat,
    pub console_enabled: bool,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
    /// Каталог для ежедневно ротируемого файла; `None` - без файла
    pub log_dir: Option<PathBuf>,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            console_enabled: true,
            with_ansi: atty::is(atty::Stream::Stdout),
            with_target: true,
            with_thread_ids: false,
            with_line_numbers: false,
            log_dir: None,
            file_name: "mxbus.log".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Применяет `MX_LOG_LEVEL` и `MX_LOG_FORMAT`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) {
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|l| !l.is_empty()) {
            self.level = level;
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT).and_then(|f| f.parse().ok()) {
            self.format = format;
        }
    }

    pub fn validate(&self) -> Result<(), LoggingError> {
        let simple = !self.level.contains(['=', ',']);
        if simple && !LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            return Err(LoggingError::InvalidLevel(self.level.clone()));
        }
        Ok(())
    }

    /// Директива для `EnvFilter`.
    ///
    /// Простой уровень относится к крейту `mxbus`; остальные крейты
    /// логируют только предупреждения. Составная директива используется
    /// как есть.
    pub fn build_filter_directive(&self) -> String {
        if self.level.contains(['=', ',']) {
            return self.level.clone();
        }
        let level = self.level.to_ascii_lowercase();
        format!("warn,mxbus={level}")
    }

    pub fn ensure_log_dir(&self) -> Result<(), LoggingError> {
        if let Some(dir) = &self.log_dir {
            std::fs::create_dir_all(dir).map_err(|source| LoggingError::LogDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
            Self::Compact => "compact",
        })
    }
}
