use std::{net::SocketAddr, time::Duration};

use serde::Serialize;
use tokio::time::Instant;

use crate::pubsub::{ComponentId, MessageTypeId};

/// Состояние соединения в его жизненном цикле.
///
/// Переходы только вперёд: `Connecting -> Active -> Closed`, либо сразу
/// `Connecting -> Closed`, если рукопожатие не состоялось.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// TCP-сессия установлена, ждём `Hello`
    Connecting,
    /// Рукопожатие выполнено, компонент участвует в маршрутизации
    Active,
    /// Соединение закрыто
    Closed,
}

/// Причина закрытия соединения, для логов.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CloseReason {
    /// Клиент закрыл соединение или произошла ошибка ввода-вывода
    PeerClosed,
    /// Очередь исходящих кадров переполнена
    SlowConsumer,
    /// Испорченный поток или недопустимый кадр
    ProtocolError,
    /// Не пришло рукопожатие
    HandshakeTimeout,
    /// Брокер останавливается
    Shutdown,
}

/// Метаданные компонента.
#[derive(Debug, Clone)]
pub struct ComponentMetadata {
    pub id: ComponentId,
    /// Итоговое (уникальное) имя
    pub name: String,
    /// Имя до добавления суффикса `/N`
    pub base_name: String,
    pub host: String,
    pub pid: u32,
    pub peer: SocketAddr,
    pub connected_at: Instant,
    pub state: ConnectionState,
}

/// Счётчики кадров соединения. Меняются только под блокировкой маршрутизатора.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ConnectionStats {
    pub frames_in: u64,
    pub frames_out: u64,
    pub bytes_out: u64,
}

/// Снимок состояния компонента для внешнего потребителя (CLI, логи).
#[derive(Debug, Clone, Serialize)]
pub struct ComponentSnapshot {
    pub id: ComponentId,
    pub name: String,
    pub peer: String,
    pub state: ConnectionState,
    pub uptime_secs: u64,
    pub subscriptions: Vec<MessageTypeId>,
    pub publications: Vec<MessageTypeId>,
    pub stats: ConnectionStats,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ConnectionState {
    /// Допустим ли переход в `next`.
    pub fn can_transition_to(
        self,
        next: ConnectionState,
    ) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Active)
                | (Self::Connecting, Self::Closed)
                | (Self::Active, Self::Closed)
        )
    }

    pub fn is_active(self) -> bool {
        self == Self::Active
    }
}

impl ComponentMetadata {
    /// Метаданные только что принятого соединения: состояние `Connecting`,
    /// имени ещё нет.
    pub fn new(
        id: ComponentId,
        peer: SocketAddr,
    ) -> Self {
        Self {
            id,
            name: String::new(),
            base_name: String::new(),
            host: String::new(),
            pid: 0,
            peer,
            connected_at: Instant::now(),
            state: ConnectionState::Connecting,
        }
    }

    /// Выполняет переход состояния.
    ///
    /// # Возвращает
    /// `false`, если переход недопустим; состояние при этом не меняется.
    pub fn transition(
        &mut self,
        next: ConnectionState,
    ) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        true
    }

    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl ConnectionStats {
    pub fn record_out(
        &mut self,
        bytes: usize,
    ) {
        self.frames_out += 1;
        self.bytes_out += bytes as u64;
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ComponentMetadata {
        ComponentMetadata::new(ComponentId(1), "127.0.0.1:5000".parse().unwrap())
    }

    #[test]
    fn test_new_metadata_is_connecting() {
        let m = meta();
        assert_eq!(m.state, ConnectionState::Connecting);
        assert!(m.name.is_empty());
    }

    #[test]
    fn test_forward_transitions() {
        let mut m = meta();
        assert!(m.transition(ConnectionState::Active));
        assert!(m.state.is_active());
        assert!(m.transition(ConnectionState::Closed));
        assert_eq!(m.state, ConnectionState::Closed);
    }

    #[test]
    fn test_backward_transitions_rejected() {
        let mut m = meta();
        assert!(m.transition(ConnectionState::Active));
        assert!(!m.transition(ConnectionState::Connecting));
        assert!(!m.transition(ConnectionState::Active));
        assert_eq!(m.state, ConnectionState::Active);

        let mut closed = meta();
        assert!(closed.transition(ConnectionState::Closed));
        assert!(!closed.transition(ConnectionState::Active));
    }

    #[test]
    fn test_stats_record_out() {
        let mut s = ConnectionStats::default();
        s.record_out(10);
        s.record_out(5);
        assert_eq!(s.frames_out, 2);
        assert_eq!(s.bytes_out, 15);
    }
}
