use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Notify};

/// Почему кадр не встал в очередь.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// Очередь заполнена: получатель не успевает читать
    Full,
    /// Задача записи завершилась
    Closed,
}

/// Отправляющая сторона ограниченной исходящей очереди соединения.
///
/// Маршрутизатор кладёт сюда закодированные кадры под своей блокировкой,
/// поэтому вставка никогда не ждёт. Принимающая сторона и сигнал закрытия
/// принадлежат задаче соединения.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Bytes>,
    closed: Arc<Notify>,
    capacity: usize,
}

/// Принимающая сторона, ею владеет задача соединения.
#[derive(Debug)]
pub struct OutboxReceiver {
    pub frames: mpsc::Receiver<Bytes>,
    pub closed: Arc<Notify>,
}

pub fn outbox(capacity: usize) -> (Outbox, OutboxReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let closed = Arc::new(Notify::new());
    (
        Outbox {
            tx,
            closed: closed.clone(),
            capacity,
        },
        OutboxReceiver { frames: rx, closed },
    )
}

impl Outbox {
    pub fn try_push(
        &self,
        frame: Bytes,
    ) -> Result<(), PushError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }

    /// Просит задачу соединения остановиться. Разрешение сохраняется, так
    /// что его увидит и задача, которая ещё не начала ждать.
    pub fn close(&self) {
        self.closed.notify_one();
    }

    /// Кадры, ждущие задачу записи.
    pub fn queued(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
