use std::{any::Any, time::Duration};

use crate::{ErrorExt, StatusCode};

/// Ошибки клиентской среды выполнения.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Брокер недоступен при подключении
    #[error("Failed to connect to {address}: {reason}")]
    ConnectFailure { address: String, reason: String },
    /// Таймаут подключения
    #[error("Connection to {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },
    /// Рукопожатие с брокером не удалось
    #[error("Handshake with broker failed: {reason}")]
    HandshakeFailed { reason: String },
    /// Соединение с брокером закрыто
    #[error("Connection to broker closed")]
    ConnectionClosed,
    /// Ожидание ответа этого типа уже выполняется
    #[error("A wait for message type {msg_type} is already pending")]
    DuplicateWait { msg_type: u32 },
    /// Повторный вход в цикл событий из обработчика
    #[error("{operation} cannot be called from inside a callback")]
    ReentrantRun { operation: &'static str },
    /// Брокер не ответил на запрос вовремя
    #[error("{request} timed out after {timeout:?}")]
    RequestTimeout { request: String, timeout: Duration },
}

impl ErrorExt for ClientError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ConnectFailure { .. } => StatusCode::ConnectionFailed,
            Self::ConnectTimeout { .. } | Self::RequestTimeout { .. } => StatusCode::Timeout,
            Self::HandshakeFailed { .. } => StatusCode::HandshakeFailed,
            Self::ConnectionClosed => StatusCode::ConnectionClosed,
            Self::DuplicateWait { .. } => StatusCode::DuplicateWait,
            Self::ReentrantRun { .. } => StatusCode::Reentrant,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "client".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        match self {
            Self::ConnectFailure { address, .. } | Self::ConnectTimeout { address, .. } => {
                tags.push(("address", address.clone()));
            }
            Self::DuplicateWait { msg_type } => tags.push(("msg_type", msg_type.to_string())),
            _ => {}
        }
        tags
    }
}
