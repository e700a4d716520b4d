//! Correlation of outgoing reflects with their acks.
//!
//! Every `Reflect` carries a random [`ReflectId`]; the mediator answers with a
//! `ReflectAck` carrying the same id once the envelope is queued for the other
//! devices. The tracker holds one entry per reflect in flight, keyed by id,
//! and reports the ones whose ack did not arrive in time.

use std::{collections::HashMap, time::Duration};

use mdsync_proto::ReflectId;

use crate::Environment;

#[derive(Debug)]
struct Pending<I, T> {
    sent_at: I,
    waiter: T,
}

/// Reflects awaiting their ack.
///
/// `T` is whatever the caller needs on completion, e.g. a channel to the
/// task that reflected the envelope.
#[derive(Debug)]
pub struct ReflectTracker<I, T = ()> {
    pending: HashMap<ReflectId, Pending<I, T>>,
    timeout: Duration,
}

impl<I, T> ReflectTracker<I, T>
where
    I: Copy + Ord + std::ops::Sub<Output = Duration>,
{
    /// Empty tracker; acks older than `timeout` expire.
    pub fn new(timeout: Duration) -> Self {
        Self { pending: HashMap::new(), timeout }
    }

    /// Fresh random id not currently in flight.
    pub fn next_id<E: Environment>(&self, env: &E) -> ReflectId {
        loop {
            let mut id = [0u8; 4];
            env.random_bytes(&mut id);
            let id = ReflectId(id);
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }

    /// Record a reflect sent at `now`.
    pub fn track(&mut self, reflect_id: ReflectId, now: I, waiter: T) {
        if self.pending.insert(reflect_id, Pending { sent_at: now, waiter }).is_some() {
            tracing::warn!(%reflect_id, "reflect id reused while in flight");
        }
    }

    /// Complete a reflect. `None` if the id is unknown (late or duplicate ack).
    pub fn acknowledge(&mut self, reflect_id: &ReflectId) -> Option<T> {
        let pending = self.pending.remove(reflect_id);
        if pending.is_none() {
            tracing::debug!(%reflect_id, "ack for unknown reflect");
        }
        pending.map(|p| p.waiter)
    }

    /// Remove and return every reflect whose ack is overdue at `now`.
    pub fn expired(&mut self, now: I) -> Vec<(ReflectId, T)> {
        let overdue: Vec<ReflectId> = self
            .pending
            .iter()
            .filter(|(_, p)| now - p.sent_at >= self.timeout)
            .map(|(id, _)| *id)
            .collect();

        overdue
            .into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|p| (id, p.waiter)))
            .collect()
    }

    /// Drop every pending reflect (connection lost).
    pub fn clear(&mut self) -> Vec<(ReflectId, T)> {
        self.pending.drain().map(|(id, p)| (id, p.waiter)).collect()
    }

    /// Reflect is in flight.
    pub fn contains(&self, reflect_id: &ReflectId) -> bool {
        self.pending.contains_key(reflect_id)
    }

    /// Number of reflects in flight.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Nothing in flight.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicU8, Ordering},
        },
        time::Instant,
    };

    use super::*;

    #[derive(Clone, Default)]
    struct CountingEnv(Arc<AtomicU8>);

    impl Environment for CountingEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            Instant::now()
        }

        fn wall_clock_millis(&self) -> u64 {
            0
        }

        async fn sleep(&self, _duration: Duration) {}

        fn random_bytes(&self, buffer: &mut [u8]) {
            let value = self.0.fetch_add(1, Ordering::Relaxed) / 2;
            buffer.fill(value);
        }
    }

    #[test]
    fn ack_completes_reflect() {
        let mut tracker = ReflectTracker::new(Duration::from_secs(10));
        let id = ReflectId([1, 2, 3, 4]);
        tracker.track(id, Instant::now(), "contact");

        assert!(tracker.contains(&id));
        assert_eq!(tracker.acknowledge(&id), Some("contact"));
        assert_eq!(tracker.acknowledge(&id), None);
        assert!(tracker.is_empty());
    }

    #[test]
    fn next_id_skips_in_flight() {
        // Draws 0,0,1,1,...: the first two ids collide.
        let env = CountingEnv::default();
        let mut tracker: ReflectTracker<Instant> = ReflectTracker::new(Duration::from_secs(10));

        let first = tracker.next_id(&env);
        tracker.track(first, Instant::now(), ());
        let second = tracker.next_id(&env);

        assert_eq!(first, ReflectId([0; 4]));
        assert_eq!(second, ReflectId([1; 4]));
    }

    #[test]
    fn expired_only_returns_overdue() {
        let start = Instant::now();
        let mut tracker = ReflectTracker::new(Duration::from_secs(10));
        tracker.track(ReflectId([1; 4]), start, 1);
        tracker.track(ReflectId([2; 4]), start + Duration::from_secs(5), 2);

        let expired = tracker.expired(start + Duration::from_secs(12));
        assert_eq!(expired, vec![(ReflectId([1; 4]), 1)]);
        assert_eq!(tracker.len(), 1);
    }
}
