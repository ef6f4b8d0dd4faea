use std::time::Duration;

use tracing_appender::non_blocking::WorkerGuard;

/// Handle для управления жизненным циклом логирования.
///
/// Держит guard файлового писателя: пока handle жив, фоновый поток пишет
/// события в файл; при drop буфер сбрасывается.
#[derive(Debug)]
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
    /// Timeout для flush при shutdown (по умолчанию 5 секунд)
    flush_timeout: Duration,
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            flush_timeout: Duration::from_secs(5),
        }
    }

    /// Устанавливает custom flush timeout.
    pub fn with_flush_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Пишет ли логирование в файл.
    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }

    /// Graceful shutdown с таймаутом (для async контекстов).
    pub async fn shutdown(mut self) {
        let Some(guard) = self.file_guard.take() else {
            return;
        };
        tracing::debug!(timeout_ms = self.flush_timeout.as_millis(), "Flushing log file");

        // Drop guard блокирует до сброса буфера.
        match tokio::time::timeout(self.flush_timeout, tokio::task::spawn_blocking(move || drop(guard))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => eprintln!("Logging shutdown task panicked: {e}"),
            Err(_) => eprintln!(
                "WARNING: Logging shutdown exceeded timeout of {}ms",
                self.flush_timeout.as_millis()
            ),
        }
    }
}
