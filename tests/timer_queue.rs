//! Инварианты очереди таймеров на случайных расписаниях.

use std::{collections::HashSet, time::Duration};

use mxbus::TimerQueue;
use proptest::prelude::*;
use rstest::rstest;
use tokio::time::Instant;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Разовые таймеры срабатывают ровно один раз, по возрастанию сроков,
    /// а при равных сроках в порядке создания.
    #[test]
    fn prop_one_shots_fire_once_in_order(
        offsets in prop::collection::vec(0u64..500, 1..64),
        probes in prop::collection::vec(0u64..600, 1..8),
    ) {
        let base = Instant::now();
        let mut queue = TimerQueue::new();
        let ids: Vec<_> = offsets
            .iter()
            .map(|&ms| queue.schedule(base + Duration::from_millis(ms), None))
            .collect();

        let mut probes = probes;
        probes.sort_unstable();
        probes.push(600);

        let mut seen = HashSet::new();
        let mut last = None;
        for probe in probes {
            let now = base + Duration::from_millis(probe);
            for expired in queue.pop_due(now) {
                prop_assert!(expired.deadline <= now);
                prop_assert!(seen.insert(expired.id), "fired twice: {:?}", expired.id);
                if let Some(prev) = last {
                    prop_assert!(prev <= (expired.deadline, expired.id));
                }
                last = Some((expired.deadline, expired.id));
            }
        }

        prop_assert_eq!(seen.len(), ids.len());
        prop_assert!(queue.is_empty());
        prop_assert_eq!(queue.next_deadline(), None);
    }

    /// После срабатывания повторяющийся таймер всегда назначен в будущее
    /// и на сетку `start + k * interval`.
    #[test]
    fn prop_recurring_stays_on_grid(
        interval_ms in 1u64..100,
        late_ms in 0u64..1_000,
    ) {
        let start = Instant::now();
        let interval = Duration::from_millis(interval_ms);
        let mut queue = TimerQueue::new();
        let id = queue.schedule(start, Some(interval));

        let now = start + Duration::from_millis(late_ms);
        let fired = queue.pop_due(now);
        prop_assert_eq!(fired.len(), 1);

        let next = queue.deadline_of(id).expect("recurring timer stays queued");
        prop_assert!(next > now);
        let offset = next.duration_since(start).as_millis() as u64;
        prop_assert_eq!(offset % interval_ms, 0);
        prop_assert!(offset - interval_ms <= late_ms);
    }
}

#[rstest]
#[case(0, 1)]
#[case(10, 1)]
#[case(25, 2)]
#[case(40, 3)]
fn test_mixed_queue_due_counts(
    #[case] at_ms: u64,
    #[case] expected: usize,
) {
    let base = Instant::now();
    let mut queue = TimerQueue::new();
    queue.schedule(base, None);
    queue.schedule(base + Duration::from_millis(20), None);
    queue.schedule(base + Duration::from_millis(40), None);

    let due = queue.pop_due(base + Duration::from_millis(at_ms));
    assert_eq!(due.len(), expected);
    assert_eq!(queue.len(), 3 - expected);
}
