use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки брокера.
///
/// Большинство из них касается одного соединения: брокер закрывает его и
/// продолжает обслуживать остальных.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// Не удалось занять адрес для прослушивания
    #[error("Failed to bind {address}: {reason}")]
    Bind { address: String, reason: String },
    /// Очередь исходящих кадров соединения переполнена
    #[error("Component {component} is too slow: {queued} frames queued")]
    SlowConsumer { component: u32, queued: usize },
    /// Адресат отсутствует или уже отключился
    #[error("Unknown target component {target}")]
    UnknownTarget { target: u32 },
    /// Рукопожатие не пришло вовремя
    #[error("No handshake from {peer} within {timeout_ms} ms")]
    HandshakeTimeout { peer: String, timeout_ms: u64 },
    /// Кадр недопустим в текущем состоянии соединения
    #[error("Protocol violation by {peer}: {reason}")]
    ProtocolViolation { peer: String, reason: String },
}

impl ErrorExt for BrokerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Bind { .. } => StatusCode::Io,
            Self::SlowConsumer { .. } => StatusCode::SlowConsumer,
            Self::UnknownTarget { .. } => StatusCode::UnknownTarget,
            Self::HandshakeTimeout { .. } => StatusCode::Timeout,
            Self::ProtocolViolation { .. } => StatusCode::ProtocolError,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::Bind { address, .. } => format!("Cannot listen on {address}"),
            _ => self.to_string(),
        }
    }
}
