use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    time::Duration,
};

use tokio::time::Instant;

/// Наименьший допустимый период повторяющегося таймера.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Срок "никогда": столько же откладывает tokio для бесконечных таймаутов.
pub const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Идентификатор таймера, уникальный в пределах одной очереди.
///
/// Идентификаторы выдаются по возрастанию, поэтому они же задают порядок
/// создания при совпадающих сроках.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Сработавший таймер: идентификатор и срок, на который он был назначен.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expired {
    pub id: TimerId,
    pub deadline: Instant,
}

#[derive(Debug, Clone, Copy)]
struct TimerEntry {
    deadline: Instant,
    interval: Option<Duration>,
}

/// Очередь таймеров процесса.
///
/// Упорядочена по `(срок, id)`: при равных сроках первым срабатывает
/// таймер, созданный раньше. Повторяющиеся таймеры после срабатывания
/// переносятся на первый срок `deadline + k * interval`, строго больший
/// текущего момента, так что пропущенные периоды не накапливаются.
#[derive(Debug, Default)]
pub struct TimerQueue {
    queue: BTreeSet<(Instant, TimerId)>,
    timers: HashMap<TimerId, TimerEntry>,
    next_id: u64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Назначает таймер на `deadline`. С `interval` таймер повторяется.
    pub fn schedule(
        &mut self,
        deadline: Instant,
        interval: Option<Duration>,
    ) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        let interval = interval.map(|i| i.max(MIN_INTERVAL));

        self.timers.insert(id, TimerEntry { deadline, interval });
        self.queue.insert((deadline, id));
        id
    }

    /// Отменяет таймер.
    ///
    /// # Возвращает
    /// `false`, если таймера нет (уже сработал или отменён).
    pub fn cancel(
        &mut self,
        id: TimerId,
    ) -> bool {
        match self.timers.remove(&id) {
            Some(entry) => {
                self.queue.remove(&(entry.deadline, id));
                true
            }
            None => false,
        }
    }

    /// Переносит таймер на новый срок, сохраняя идентификатор.
    ///
    /// # Возвращает
    /// `false`, если таймера нет.
    pub fn adjust(
        &mut self,
        id: TimerId,
        deadline: Instant,
    ) -> bool {
        let Some(entry) = self.timers.get_mut(&id) else {
            return false;
        };
        self.queue.remove(&(entry.deadline, id));
        entry.deadline = deadline;
        self.queue.insert((deadline, id));
        true
    }

    /// Ближайший срок среди всех таймеров.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.first().map(|(deadline, _)| *deadline)
    }

    /// Извлекает все таймеры со сроком `<= now` в порядке срабатывания.
    ///
    /// Разовые таймеры удаляются, повторяющиеся переносятся вперёд. Каждый
    /// таймер попадает в результат не более одного раза за вызов.
    pub fn pop_due(
        &mut self,
        now: Instant,
    ) -> Vec<Expired> {
        let mut fired = Vec::new();

        while let Some(&(deadline, id)) = self.queue.first() {
            if deadline > now {
                break;
            }
            self.queue.remove(&(deadline, id));
            fired.push(Expired { id, deadline });
        }

        for expired in &fired {
            let Some(entry) = self.timers.get_mut(&expired.id) else {
                continue;
            };
            match entry.interval {
                None => {
                    self.timers.remove(&expired.id);
                }
                Some(interval) => {
                    let next = next_after(entry.deadline, interval, now);
                    entry.deadline = next;
                    self.queue.insert((next, expired.id));
                }
            }
        }

        fired
    }

    pub fn contains(
        &self,
        id: TimerId,
    ) -> bool {
        self.timers.contains_key(&id)
    }

    pub fn deadline_of(
        &self,
        id: TimerId,
    ) -> Option<Instant> {
        self.timers.get(&id).map(|e| e.deadline)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

/// `now + delay` без переполнения: слишком далёкий срок заменяется на
/// [`FAR_FUTURE`] от `now`.
pub fn deadline_after(
    now: Instant,
    delay: Duration,
) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Первый срок `deadline + k * interval` (k >= 1), строго больший `now`.
fn next_after(
    deadline: Instant,
    interval: Duration,
    now: Instant,
) -> Instant {
    let Some(next) = deadline.checked_add(interval) else {
        return deadline_after(now, FAR_FUTURE);
    };
    if next > now {
        return next;
    }
    let behind = now.duration_since(deadline).as_nanos();
    let step = interval.as_nanos();
    let periods = behind / step + 1;
    let offset = u64::try_from(periods * step).unwrap_or(u64::MAX);
    deadline
        .checked_add(Duration::from_nanos(offset))
        .unwrap_or_else(|| deadline_after(now, FAR_FUTURE))
}

impl fmt::Display for TimerId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    /// Тест проверяет сценарий: таймер на `now + 1.0` срабатывает ровно один
    /// раз при `pop_due(now + 1.5)`.
    #[test]
    fn test_one_shot_fires_once() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        let id = q.schedule(now + secs(1.0), None);

        assert_eq!(q.next_deadline(), Some(now + secs(1.0)));
        assert!(q.pop_due(now + secs(0.5)).is_empty());

        let fired = q.pop_due(now + secs(1.5));
        assert_eq!(
            fired,
            vec![Expired {
                id,
                deadline: now + secs(1.0)
            }]
        );
        assert!(q.pop_due(now + secs(3.0)).is_empty());
        assert!(q.is_empty());
        assert_eq!(q.next_deadline(), None);
    }

    #[test]
    fn test_ties_fire_in_creation_order() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        let at = now + secs(1.0);
        let a = q.schedule(at, None);
        let b = q.schedule(at, None);
        let c = q.schedule(now + secs(0.5), None);

        let ids: Vec<_> = q.pop_due(at).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![c, a, b]);
    }

    #[test]
    fn test_adjust_keeps_identity_and_reorders() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        let a = q.schedule(now + secs(1.0), None);
        let b = q.schedule(now + secs(2.0), None);

        assert!(q.adjust(b, now + secs(0.5)));
        assert_eq!(q.next_deadline(), Some(now + secs(0.5)));
        assert_eq!(q.deadline_of(b), Some(now + secs(0.5)));

        let ids: Vec<_> = q.pop_due(now + secs(1.0)).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![b, a]);
    }

    #[test]
    fn test_cancel_and_adjust_after_fire_are_noops() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        let id = q.schedule(now, None);
        q.pop_due(now);

        assert!(!q.cancel(id));
        assert!(!q.adjust(id, now + secs(1.0)));
        assert!(q.is_empty());
    }

    #[test]
    fn test_cancel_pending() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        let id = q.schedule(now + secs(1.0), None);

        assert!(q.cancel(id));
        assert!(!q.contains(id));
        assert!(q.pop_due(now + secs(2.0)).is_empty());
    }

    #[test]
    fn test_recurring_reschedules() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        let id = q.schedule(now + secs(1.0), Some(secs(1.0)));

        assert_eq!(q.pop_due(now + secs(1.0)).len(), 1);
        assert_eq!(q.deadline_of(id), Some(now + secs(2.0)));
        assert_eq!(q.pop_due(now + secs(2.0)).len(), 1);
        assert_eq!(q.deadline_of(id), Some(now + secs(3.0)));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_recurring_skips_missed_intervals() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        let id = q.schedule(now + secs(1.0), Some(secs(1.0)));

        // Пропущено несколько периодов: срабатывание одно.
        let fired = q.pop_due(now + secs(4.5));
        assert_eq!(fired.len(), 1);
        assert_eq!(q.deadline_of(id), Some(now + secs(5.0)));
    }

    #[test]
    fn test_recurring_on_exact_multiple() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        let id = q.schedule(now + secs(1.0), Some(secs(1.0)));

        q.pop_due(now + secs(3.0));
        assert_eq!(q.deadline_of(id), Some(now + secs(4.0)));
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        let id = q.schedule(now, Some(Duration::ZERO));

        assert_eq!(q.pop_due(now).len(), 1);
        assert_eq!(q.deadline_of(id), Some(now + MIN_INTERVAL));
    }

    #[test]
    fn test_deadline_after_saturates() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, secs(1.0)), now + secs(1.0));
        assert_eq!(deadline_after(now, Duration::MAX), now + FAR_FUTURE);
    }

    /// Тест проверяет, что огромный период не переполняет срок следующего
    /// срабатывания.
    #[test]
    fn test_recurring_with_max_interval() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        let id = q.schedule(now, Some(Duration::MAX));

        assert_eq!(q.pop_due(now).len(), 1);
        let next = q.deadline_of(id).unwrap();
        assert!(next > now);
        assert!(q.pop_due(now + secs(3600.0)).is_empty());
    }

    #[test]
    fn test_cancel_recurring() {
        let now = Instant::now();
        let mut q = TimerQueue::new();
        let id = q.schedule(now, Some(secs(1.0)));
        q.pop_due(now);

        assert!(q.cancel(id));
        assert!(q.pop_due(now + secs(10.0)).is_empty());
    }
}
