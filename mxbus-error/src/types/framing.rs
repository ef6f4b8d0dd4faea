use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки разбора кадров и полей.
///
/// Любая из них на уровне соединения означает, что поток байт испорчен:
/// соединение закрывается.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// Буфер короче, чем требует поле фиксированной ширины или объявленная
    /// длина строки
    #[error("Truncated input: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    /// Объявленная длина кадра превышает лимит
    #[error("Frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },
    /// Неизвестный тип кадра
    #[error("Unknown frame kind {kind}")]
    UnknownKind { kind: u16 },
    /// Строковое поле не является корректным UTF-8
    #[error("String field is not valid UTF-8")]
    InvalidUtf8,
    /// После разбора управляющего кадра остались лишние байты
    #[error("{count} trailing bytes after frame body")]
    TrailingBytes { count: usize },
    /// Неизвестная тема подписки на события обнаружения
    #[error("Unknown watch topic {topic}")]
    UnknownWatchTopic { topic: u8 },
}

impl ErrorExt for FramingError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Truncated { .. } | Self::TrailingBytes { .. } => StatusCode::InvalidFrame,
            Self::FrameTooLarge { .. } => StatusCode::SizeLimit,
            Self::UnknownKind { .. } | Self::UnknownWatchTopic { .. } => {
                StatusCode::UnknownFrameKind
            }
            Self::InvalidUtf8 => StatusCode::InvalidUtf8,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "framing".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        if let Self::UnknownKind { kind } = self {
            tags.push(("kind", kind.to_string()));
        }
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = FramingError::Truncated {
            needed: 8,
            available: 3,
        };
        assert_eq!(err.to_string(), "Truncated input: needed 8 bytes, 3 available");
        assert_eq!(
            FramingError::FrameTooLarge { len: 10, max: 4 }.to_string(),
            "Frame of 10 bytes exceeds limit of 4 bytes"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(FramingError::InvalidUtf8.status_code(), StatusCode::InvalidUtf8);
        assert_eq!(
            FramingError::UnknownKind { kind: 77 }.status_code(),
            StatusCode::UnknownFrameKind
        );
        assert!(FramingError::TrailingBytes { count: 1 }
            .status_code()
            .is_protocol_error());
    }

    #[test]
    fn test_metrics_tags_include_kind() {
        let tags = FramingError::UnknownKind { kind: 42 }.metrics_tags();
        assert!(tags.contains(&("kind", "42".to_string())));
    }
}
