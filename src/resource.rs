//! C3: counted semaphores with owners (`locks`) and an ordered waitlist
//! (`pending`). This is the only cross-job coordination primitive (spec §5)
//! — every mutation path funnels through [`Resource::acquire`],
//! [`Resource::release`], or [`Resource::rebalance`].

use std::collections::{BTreeMap, VecDeque};

use crate::error::{EngineError, EngineResult};
use crate::ids::{Jid, ResourceId};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AcquireOutcome {
    Acquired,
    Pending,
    AlreadyHeld,
}

#[derive(Clone, Debug)]
pub struct Resource {
    pub rid: ResourceId,
    pub max: i64,
    /// Insertion order matters: `locks` reflects acquisition order, and
    /// FIFO promotion reads `pending`'s head first.
    pub locks: Vec<Jid>,
    pub pending: VecDeque<Jid>,
}

impl Resource {
    fn new(rid: ResourceId, max: i64) -> Self {
        Self { rid, max, locks: Vec::new(), pending: VecDeque::new() }
    }

    pub fn holds(&self, jid: &Jid) -> bool {
        self.locks.contains(jid) || self.pending.contains(jid)
    }

    /// Idempotent: a jid already in `locks` or `pending` is a no-op.
    pub fn acquire(&mut self, jid: &Jid) -> AcquireOutcome {
        if self.holds(jid) {
            return AcquireOutcome::AlreadyHeld;
        }
        if (self.locks.len() as i64) < self.max {
            self.locks.push(jid.clone());
            AcquireOutcome::Acquired
        } else {
            self.pending.push_back(jid.clone());
            AcquireOutcome::Pending
        }
    }

    /// Removes `jid` from both `locks` and `pending`, rebalancing if a lock
    /// slot was freed. Returns the jids promoted from `pending` to `locks`.
    pub fn release(&mut self, jid: &Jid) -> Vec<Jid> {
        if let Some(pos) = self.locks.iter().position(|j| j == jid) {
            self.locks.remove(pos);
            self.rebalance()
        } else {
            self.pending.retain(|j| j != jid);
            Vec::new()
        }
    }

    /// While `locks` has spare capacity and `pending` is non-empty, promote
    /// the head of `pending` into `locks`. No new locks are granted while
    /// `locks.len() >= max` (this also holds transiently after `max` has
    /// just been lowered).
    pub fn rebalance(&mut self) -> Vec<Jid> {
        let mut promoted = Vec::new();
        while (self.locks.len() as i64) < self.max {
            match self.pending.pop_front() {
                Some(jid) => {
                    self.locks.push(jid.clone());
                    promoted.push(jid);
                },
                None => break,
            }
        }
        promoted
    }

    pub fn in_use(&self) -> bool {
        !self.locks.is_empty() || !self.pending.is_empty()
    }
}

/// The full set of resources known to the engine.
#[derive(Clone, Debug, Default)]
pub struct ResourceTable(BTreeMap<ResourceId, Resource>);

impl ResourceTable {
    /// Creates the resource if absent, else updates its cap and rebalances.
    pub fn set(&mut self, rid: ResourceId, max: i64) -> Vec<Jid> {
        let entry =
            self.0.entry(rid.clone()).or_insert_with(|| Resource::new(rid, max));
        entry.max = max;
        entry.rebalance()
    }

    pub fn get(&self, rid: &str) -> Option<&Resource> {
        self.0.get(rid)
    }

    fn get_mut(&mut self, rid: &str) -> Option<&mut Resource> {
        self.0.get_mut(rid)
    }

    pub fn locks_count(&self, rid: &str) -> Option<usize> {
        self.get(rid).map(|r| r.locks.len())
    }

    /// Errors if `locks` or `pending` is non-empty (spec §9 Open Question:
    /// this engine rejects rather than cascading releases).
    pub fn unset(&mut self, rid: &str) -> EngineResult<()> {
        match self.0.get(rid) {
            None => Ok(()),
            Some(r) if r.in_use() => {
                Err(EngineError::ResourceInUse(ResourceId::from(rid)))
            },
            Some(_) => {
                self.0.remove(rid);
                Ok(())
            },
        }
    }

    /// Attempts to acquire every resource in `resources`, in order, for
    /// `jid`. Errors if any rid was never `resource.set`. Returns true iff
    /// every one of them ended up in `locks` (i.e. the job is fully
    /// satisfied and may run).
    pub fn acquire_all(
        &mut self,
        resources: &[ResourceId],
        jid: &Jid,
    ) -> EngineResult<bool> {
        for rid in resources {
            if !self.0.contains_key(rid.as_str()) {
                return Err(EngineError::UnknownResource(rid.clone()));
            }
        }
        let mut satisfied = true;
        for rid in resources {
            let resource = self.get_mut(rid.as_str()).expect("checked above");
            if resource.acquire(jid) == AcquireOutcome::Pending {
                satisfied = false;
            }
        }
        Ok(satisfied)
    }

    /// True iff every resource `jid` declared currently holds it in
    /// `locks` (used by `pop` to decide if a waiting job may be selected).
    pub fn fully_granted(&self, resources: &[ResourceId], jid: &Jid) -> bool {
        resources.iter().all(|rid| {
            self.get(rid.as_str()).is_some_and(|r| r.locks.contains(jid))
        })
    }

    /// Releases `jid` from every resource it might hold, promoting waiters.
    /// Returns `(rid, promoted_jid)` pairs for every promotion that
    /// occurred, so the queue engine can re-evaluate those jobs.
    pub fn release_all(
        &mut self,
        resources: &[ResourceId],
        jid: &Jid,
    ) -> Vec<(ResourceId, Jid)> {
        let mut promotions = Vec::new();
        for rid in resources {
            if let Some(resource) = self.get_mut(rid.as_str()) {
                for promoted in resource.release(jid) {
                    promotions.push((rid.clone(), promoted));
                }
            }
        }
        promotions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_is_idempotent() {
        let mut table = ResourceTable::default();
        table.set(ResourceId::from("r1"), 1);
        let jid = Jid::from("jid-1");
        assert!(table.acquire_all(&[ResourceId::from("r1")], &jid).unwrap());
        assert!(table.acquire_all(&[ResourceId::from("r1")], &jid).unwrap());
        assert_eq!(table.get("r1").unwrap().locks, vec![jid]);
    }

    #[test]
    fn third_job_waits_then_promotes_on_release() {
        let mut table = ResourceTable::default();
        let rid = ResourceId::from("r1");
        table.set(rid.clone(), 1);
        let j1 = Jid::from("jid-1");
        let j2 = Jid::from("jid-2");
        assert!(table.acquire_all(&[rid.clone()], &j1).unwrap());
        assert!(!table.acquire_all(&[rid.clone()], &j2).unwrap());
        assert_eq!(table.get("r1").unwrap().pending, vec![j2.clone()]);

        let promotions = table.release_all(&[rid.clone()], &j1);
        assert_eq!(promotions, vec![(rid.clone(), j2.clone())]);
        assert_eq!(table.get("r1").unwrap().locks, vec![j2]);
        assert!(table.get("r1").unwrap().pending.is_empty());
    }

    #[test]
    fn shrinking_below_in_use_count_blocks_new_locks() {
        let mut table = ResourceTable::default();
        let rid = ResourceId::from("r1");
        table.set(rid.clone(), 2);
        let j1 = Jid::from("jid-1");
        let j2 = Jid::from("jid-2");
        table.acquire_all(&[rid.clone()], &j1).unwrap();
        table.acquire_all(&[rid.clone()], &j2).unwrap();
        table.set(rid.clone(), 0);
        assert_eq!(table.get("r1").unwrap().locks.len(), 2);

        table.release_all(&[rid.clone()], &j1);
        assert!(table.get("r1").unwrap().locks.is_empty());
        let j3 = Jid::from("jid-3");
        assert!(!table.acquire_all(&[rid.clone()], &j3).unwrap());
    }

    #[test]
    fn unset_rejects_while_in_use() {
        let mut table = ResourceTable::default();
        let rid = ResourceId::from("r1");
        table.set(rid.clone(), 1);
        table.acquire_all(&[rid.clone()], &Jid::from("jid-1")).unwrap();
        assert!(table.unset("r1").is_err());
    }
}
