use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling::daily};
use tracing_subscriber::{fmt, registry::LookupSpan, Layer};

use crate::logging::config::LoggingConfig;

/// Файловый слой с ежедневной ротацией; `None`, если каталог не задан.
///
/// `WorkerGuard` нужно держать, пока приложение пишет логи: при его drop
/// буфер сбрасывается на диск.
pub fn layer_with_config<S>(config: &LoggingConfig) -> Option<(Box<dyn Layer<S> + Send + Sync>, WorkerGuard)>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let dir = config.log_dir.as_ref()?;
    let file_appender = daily(dir, &config.file_name);
    let (writer, guard) = non_blocking(file_appender);

    let layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(writer)
        .boxed();

    Some((layer, guard))
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::{prelude::*, registry::Registry};

    use super::*;

    #[test]
    fn test_writes_into_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = LoggingConfig {
            log_dir: Some(tmp.path().to_path_buf()),
            file_name: "test.log".into(),
            ..Default::default()
        };

        let (layer, guard) = layer_with_config::<Registry>(&cfg).expect("log dir is set");
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("line for the file sink");
        });
        drop(guard);

        let files: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        let content = std::fs::read_to_string(&files[0]).unwrap();
        assert!(content.contains("line for the file sink"));
    }

    #[test]
    fn test_no_dir_no_layer() {
        assert!(layer_with_config::<Registry>(&LoggingConfig::default()).is_none());
    }
}
