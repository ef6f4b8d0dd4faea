use tracing_subscriber::layer::Layer as LayerTrait;
use tracing_subscriber::registry::LookupSpan;

use crate::logging::{config::LoggingConfig, formatter};

/// Консольный слой с конфигурацией; `None`, если консоль выключена.
pub fn layer_with_config<S>(config: &LoggingConfig) -> Option<Box<dyn LayerTrait<S> + Send + Sync>>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    config
        .console_enabled
        .then(|| formatter::build_formatter_from_config(config))
}
