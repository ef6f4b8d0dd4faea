use std::collections::HashMap;

use mxbus_error::ClientError;
use tokio::time::Instant;

use crate::pubsub::{ComponentId, Delivery, MessageTypeId};

#[derive(Debug)]
struct PendingWait {
    target: ComponentId,
    deadline: Instant,
    result: Option<Delivery>,
}

/// Ожидания ответов, по одному на ожидаемый тип.
///
/// Ожидание нельзя отменить извне: если вызывающий бросил его, запись
/// остаётся до своего срока и до тех пор блокирует новое ожидание того же
/// типа, но доставки больше не забирает. Забирает их только ожидание,
/// которое сейчас выполняется (`active`), причём и после срока: ответ мог
/// прийти раньше, а быть прочитан позже.
#[derive(Debug, Default)]
pub struct PendingWaits {
    waits: HashMap<MessageTypeId, PendingWait>,
    active: Option<MessageTypeId>,
}

impl PendingWaits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Начинает ожидание `msg_type` от `target` до `deadline`.
    ///
    /// # Ошибки
    /// `ClientError::DuplicateWait`, если ожидание этого типа ещё живо.
    pub fn begin(
        &mut self,
        target: ComponentId,
        msg_type: MessageTypeId,
        deadline: Instant,
        now: Instant,
    ) -> Result<(), ClientError> {
        // Ожидания не вкладываются, так что прежнее активное брошено.
        self.active = None;
        self.waits.retain(|_, w| w.deadline > now);

        if self.waits.contains_key(&msg_type) {
            return Err(ClientError::DuplicateWait { msg_type: msg_type.0 });
        }
        self.waits.insert(
            msg_type,
            PendingWait {
                target,
                deadline,
                result: None,
            },
        );
        self.active = Some(msg_type);
        Ok(())
    }

    /// Предлагает доставку ожиданиям.
    ///
    /// # Возвращает
    /// `None`, если доставка забрана ожиданием; иначе её же для обычной
    /// обработки.
    pub fn offer(
        &mut self,
        delivery: Delivery,
        now: Instant,
    ) -> Option<Delivery> {
        let msg_type = delivery.msg_type();
        let Some(wait) = self.waits.get_mut(&msg_type) else {
            return Some(delivery);
        };

        if self.active != Some(msg_type) {
            if wait.deadline < now {
                self.waits.remove(&msg_type);
            }
            return Some(delivery);
        }
        if wait.target != delivery.source || wait.result.is_some() {
            return Some(delivery);
        }
        wait.result = Some(delivery);
        None
    }

    /// Забирает результат ожидания, если он уже есть, и завершает ожидание.
    pub fn take_result(
        &mut self,
        msg_type: MessageTypeId,
    ) -> Option<Delivery> {
        let result = self.waits.get_mut(&msg_type)?.result.take()?;
        self.finish(msg_type);
        Some(result)
    }

    /// Завершает ожидание без результата.
    pub fn finish(
        &mut self,
        msg_type: MessageTypeId,
    ) {
        self.waits.remove(&msg_type);
        if self.active == Some(msg_type) {
            self.active = None;
        }
    }

    /// Снимает пометку активного ожидания (его вызывающий ушёл).
    ///
    /// # Возвращает
    /// Доставки, которые брошенные ожидания успели забрать, но не отдали.
    pub fn release(&mut self) -> Vec<Delivery> {
        self.active = None;
        self.waits
            .values_mut()
            .filter_map(|w| w.result.take())
            .collect()
    }

    pub fn is_pending(
        &self,
        msg_type: MessageTypeId,
    ) -> bool {
        self.waits.contains_key(&msg_type)
    }

    pub fn len(&self) -> usize {
        self.waits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waits.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::pubsub::Envelope;

    const PONG: MessageTypeId = MessageTypeId(2);

    fn reply(from: u32) -> Delivery {
        Delivery {
            source: ComponentId(from),
            envelope: Envelope::new(PONG, 0, Bytes::from_static(b"Pong!")),
        }
    }

    #[test]
    fn test_duplicate_wait_rejected_until_deadline() {
        let now = Instant::now();
        let mut waits = PendingWaits::new();
        waits.begin(ComponentId(1), PONG, now + Duration::from_secs(1), now).unwrap();

        let err = waits.begin(ComponentId(1), PONG, now + Duration::from_secs(1), now);
        assert_eq!(err, Err(ClientError::DuplicateWait { msg_type: 2 }));

        // Срок брошенного ожидания прошёл: новое разрешено.
        let later = now + Duration::from_secs(2);
        assert!(waits.begin(ComponentId(1), PONG, later + Duration::from_secs(1), later).is_ok());
    }

    #[test]
    fn test_offer_matches_type_and_target() {
        let now = Instant::now();
        let mut waits = PendingWaits::new();
        waits.begin(ComponentId(1), PONG, now + Duration::from_secs(1), now).unwrap();

        // Чужой отправитель: доставка возвращается.
        assert!(waits.offer(reply(9), now).is_some());
        assert!(waits.offer(reply(1), now).is_none());
        // Слот занят: вторая копия идёт обычным путём.
        assert!(waits.offer(reply(1), now).is_some());

        let got = waits.take_result(PONG).unwrap();
        assert_eq!(got.source, ComponentId(1));
        assert!(waits.is_empty());
    }

    #[test]
    fn test_active_wait_accepts_late_read() {
        let now = Instant::now();
        let deadline = now + Duration::from_millis(10);
        let mut waits = PendingWaits::new();
        waits.begin(ComponentId(1), PONG, deadline, now).unwrap();

        assert!(waits.offer(reply(1), deadline + Duration::from_millis(1)).is_none());
    }

    #[test]
    fn test_abandoned_wait_expires_on_offer() {
        let now = Instant::now();
        let deadline = now + Duration::from_millis(10);
        let mut waits = PendingWaits::new();
        waits.begin(ComponentId(1), PONG, deadline, now).unwrap();
        waits.release();

        assert!(waits.offer(reply(1), deadline + Duration::from_millis(1)).is_some());
        assert!(!waits.is_pending(PONG));
    }

    /// Тест проверяет, что брошенное ожидание не забирает доставку до
    /// своего срока, но по-прежнему блокирует повторное ожидание.
    #[test]
    fn test_abandoned_wait_passes_delivery_through() {
        let now = Instant::now();
        let deadline = now + Duration::from_secs(1);
        let mut waits = PendingWaits::new();
        waits.begin(ComponentId(1), PONG, deadline, now).unwrap();
        assert!(waits.release().is_empty());

        let passed = waits.offer(reply(1), now).unwrap();
        assert_eq!(passed.source, ComponentId(1));
        assert!(waits.is_pending(PONG));
        assert_eq!(
            waits.begin(ComponentId(1), PONG, deadline, now),
            Err(ClientError::DuplicateWait { msg_type: 2 })
        );
    }

    #[test]
    fn test_release_returns_unread_results() {
        let now = Instant::now();
        let mut waits = PendingWaits::new();
        waits.begin(ComponentId(1), PONG, now + Duration::from_secs(1), now).unwrap();
        assert!(waits.offer(reply(1), now).is_none());

        let unread = waits.release();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].envelope.payload, Bytes::from_static(b"Pong!"));
        assert!(waits.take_result(PONG).is_none());
    }

    #[test]
    fn test_finish_clears_active() {
        let now = Instant::now();
        let mut waits = PendingWaits::new();
        waits.begin(ComponentId(1), PONG, now + Duration::from_secs(1), now).unwrap();
        waits.finish(PONG);
        assert_eq!(waits.len(), 0);
        assert!(waits.begin(ComponentId(1), PONG, now + Duration::from_secs(1), now).is_ok());
    }
}
