use std::{path::Path, time::Duration};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use super::resolve::{effective_host, effective_name, effective_port_for};
use crate::{
    logging::{LogFormat, LoggingConfig},
    network::{wire::DEFAULT_MAX_FRAME_LEN, BrokerConfig},
    pubsub::BroadcastEcho,
};

/// Настройки брокера.
///
/// Источники в порядке возрастания приоритета: значения по умолчанию,
/// TOML-файл (если указан), переменные окружения `MX_*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_connections: usize,
    pub outbound_queue_frames: usize,
    pub max_frame_len: usize,
    pub handshake_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub broadcast_echo: BroadcastEcho,
    pub log_level: String,
    pub log_format: LogFormat,
    pub log_dir: Option<String>,
}

impl Settings {
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            // Добавляем значения по умолчанию
            .set_default("max_connections", 1024)?
            .set_default("outbound_queue_frames", 1024)?
            .set_default("max_frame_len", DEFAULT_MAX_FRAME_LEN as u64)?
            .set_default("handshake_timeout_ms", 5000)?
            .set_default("write_timeout_ms", 10_000)?
            .set_default("broadcast_echo", "if_subscribed")?
            .set_default("log_level", "info")?
            .set_default("log_format", "compact")?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path));
        }

        // Добавляем переменные окружения с префиксом MX_
        let cfg = builder
            .add_source(Environment::with_prefix("MX").try_parsing(true))
            .build()?;

        // Десериализуем конфигурацию в нашу структуру
        cfg.try_deserialize()
    }

    /// Конфигурация брокера с итоговыми именем, хостом и портом.
    pub fn broker_config(&self) -> BrokerConfig {
        let name = effective_name(self.name.as_deref());
        BrokerConfig {
            port: effective_port_for(self.port, &name),
            host: effective_host(self.host.as_deref()),
            name,
            max_connections: self.max_connections,
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            outbound_queue_frames: self.outbound_queue_frames,
            max_frame_len: self.max_frame_len,
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            broadcast_echo: self.broadcast_echo,
        }
    }

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level.clone(),
            format: self.log_format,
            log_dir: self.log_dir.clone().map(Into::into),
            ..LoggingConfig::default()
        }
    }
}
