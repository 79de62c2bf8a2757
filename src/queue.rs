//! C5: the four ordered sub-indexes a named queue owns, and the pure
//! index-maintenance operations on top of them. Scheduling *decisions*
//! (what `pop` actually selects) live in [`crate::engine`]; this module
//! only guarantees each sub-index stays internally ordered and consistent
//! with itself.

use std::collections::{BTreeMap, BTreeSet};

use crate::ids::{Jid, Priority, QueueName};

/// `waiting`, sorted by `(-priority, put-time)`: highest priority first,
/// oldest among equal priorities first.
type WaitingKey = (i64, u64);

#[derive(Clone, Debug, Default)]
pub struct Queue {
    pub name: QueueName,
    waiting: BTreeSet<(i64, u64, Jid)>,
    waiting_keys: BTreeMap<Jid, WaitingKey>,
    scheduled: BTreeSet<(i64, Jid)>,
    scheduled_keys: BTreeMap<Jid, i64>,
    depends: BTreeSet<Jid>,
    locks: BTreeSet<(i64, Jid)>,
    locks_keys: BTreeMap<Jid, i64>,
    put_seq: u64,
}

impl Queue {
    pub fn new(name: QueueName) -> Self {
        Self { name, ..Default::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
            && self.scheduled.is_empty()
            && self.depends.is_empty()
            && self.locks.is_empty()
    }

    // -- waiting --------------------------------------------------------

    pub fn insert_waiting(&mut self, jid: Jid, priority: Priority) {
        self.remove_waiting(&jid);
        let seq = self.put_seq;
        self.put_seq += 1;
        let key = (-priority.0, seq);
        self.waiting.insert((key.0, key.1, jid.clone()));
        self.waiting_keys.insert(jid, key);
    }

    pub fn remove_waiting(&mut self, jid: &Jid) -> bool {
        if let Some(key) = self.waiting_keys.remove(jid) {
            self.waiting.remove(&(key.0, key.1, jid.clone()));
            true
        } else {
            false
        }
    }

    pub fn contains_waiting(&self, jid: &Jid) -> bool {
        self.waiting_keys.contains_key(jid)
    }

    /// Updates the priority of a job already in `waiting`, keeping its
    /// original put-time ordering key. No-op if not currently waiting.
    pub fn reprioritize(&mut self, jid: &Jid, priority: Priority) {
        if let Some(&(old_neg_pri, seq)) = self.waiting_keys.get(jid) {
            self.waiting.remove(&(old_neg_pri, seq, jid.clone()));
            let key = (-priority.0, seq);
            self.waiting.insert((key.0, key.1, jid.clone()));
            self.waiting_keys.insert(jid.clone(), key);
        }
    }

    /// Jids in `waiting`, highest-priority-first, oldest-first among ties.
    pub fn waiting_order(&self) -> impl Iterator<Item = &Jid> {
        self.waiting.iter().map(|(_, _, jid)| jid)
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    /// Puts `jid` at the very front of `waiting`, ahead of any existing
    /// entry regardless of priority — used to reinsert reclaimed jobs
    /// "at the front of waiting (highest priority among peers)" per spec.
    pub fn insert_waiting_front(&mut self, jid: Jid) {
        self.remove_waiting(&jid);
        let min_key = self.waiting.iter().next().map(|(p, s, _)| (*p, *s));
        let key = match min_key {
            Some((p, s)) if s > 0 => (p, s - 1),
            Some((p, _)) => (p - 1, 0),
            None => (i64::MIN, 0),
        };
        self.waiting.insert((key.0, key.1, jid.clone()));
        self.waiting_keys.insert(jid, key);
    }

    // -- scheduled --------------------------------------------------------

    pub fn insert_scheduled(&mut self, jid: Jid, ready_at: i64) {
        self.remove_scheduled(&jid);
        self.scheduled.insert((ready_at, jid.clone()));
        self.scheduled_keys.insert(jid, ready_at);
    }

    pub fn remove_scheduled(&mut self, jid: &Jid) -> bool {
        if let Some(ready_at) = self.scheduled_keys.remove(jid) {
            self.scheduled.remove(&(ready_at, jid.clone()));
            true
        } else {
            false
        }
    }

    pub fn contains_scheduled(&self, jid: &Jid) -> bool {
        self.scheduled_keys.contains_key(jid)
    }

    /// Jids whose ready-time has arrived (`ready_at <= now`), without
    /// removing them.
    pub fn scheduled_due(&self, now: i64) -> Vec<Jid> {
        self.scheduled
            .iter()
            .take_while(|(ready_at, _)| *ready_at <= now)
            .map(|(_, jid)| jid.clone())
            .collect()
    }

    // -- depends ----------------------------------------------------------

    pub fn insert_depends(&mut self, jid: Jid) {
        self.depends.insert(jid);
    }

    pub fn remove_depends(&mut self, jid: &Jid) -> bool {
        self.depends.remove(jid)
    }

    pub fn contains_depends(&self, jid: &Jid) -> bool {
        self.depends.contains(jid)
    }

    // -- locks (running) ---------------------------------------------------

    pub fn insert_locks(&mut self, jid: Jid, expires: i64) {
        self.remove_locks(&jid);
        self.locks.insert((expires, jid.clone()));
        self.locks_keys.insert(jid, expires);
    }

    pub fn remove_locks(&mut self, jid: &Jid) -> bool {
        if let Some(expires) = self.locks_keys.remove(jid) {
            self.locks.remove(&(expires, jid.clone()));
            true
        } else {
            false
        }
    }

    pub fn contains_locks(&self, jid: &Jid) -> bool {
        self.locks_keys.contains_key(jid)
    }

    /// Jids whose claim is stale: `expires + grace_period <= now`.
    pub fn stale_locks(&self, now: i64, grace_period: i64) -> Vec<Jid> {
        let threshold = now - grace_period;
        self.locks
            .iter()
            .take_while(|(expires, _)| *expires <= threshold)
            .map(|(_, jid)| jid.clone())
            .collect()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            waiting: self.waiting.len(),
            scheduled: self.scheduled.len(),
            depends: self.depends.len(),
            running: self.locks.len(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct QueueStats {
    pub waiting: usize,
    pub scheduled: usize,
    pub depends: usize,
    pub running: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q() -> Queue {
        Queue::new(QueueName::from("q"))
    }

    #[test]
    fn waiting_orders_by_priority_then_put_time() {
        let mut queue = q();
        queue.insert_waiting(Jid::from("low"), Priority(0));
        queue.insert_waiting(Jid::from("high"), Priority(10));
        queue.insert_waiting(Jid::from("low2"), Priority(0));
        let order: Vec<_> =
            queue.waiting_order().map(Jid::to_string).collect();
        assert_eq!(order, vec!["high", "low", "low2"]);
    }

    #[test]
    fn reclaimed_job_jumps_the_queue() {
        let mut queue = q();
        queue.insert_waiting(Jid::from("a"), Priority(5));
        queue.insert_waiting(Jid::from("b"), Priority(5));
        queue.insert_waiting_front(Jid::from("reclaimed"));
        let order: Vec<_> =
            queue.waiting_order().map(Jid::to_string).collect();
        assert_eq!(order, vec!["reclaimed", "a", "b"]);
    }

    #[test]
    fn scheduled_due_respects_now() {
        let mut queue = q();
        queue.insert_scheduled(Jid::from("a"), 10);
        queue.insert_scheduled(Jid::from("b"), 20);
        assert!(queue.scheduled_due(5).is_empty());
        assert_eq!(
            queue.scheduled_due(10).iter().map(Jid::to_string).collect::<Vec<_>>(),
            vec!["a"]
        );
    }

    #[test]
    fn stale_locks_honor_grace_period() {
        let mut queue = q();
        queue.insert_locks(Jid::from("a"), 100);
        assert!(queue.stale_locks(105, 10).is_empty());
        assert_eq!(
            queue.stale_locks(110, 10).iter().map(Jid::to_string).collect::<Vec<_>>(),
            vec!["a"]
        );
    }
}
