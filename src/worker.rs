//! C6: worker → running-jids index. Exists so the wrong-worker guard on
//! `complete`/`heartbeat`/`fail`/`retry` is a lookup rather than a scan, and
//! so worker-scoped queries (out of this engine's scope, but a natural
//! extension point) have something to query.

use std::collections::{BTreeMap, BTreeSet};

use crate::ids::{Jid, WorkerId};

#[derive(Clone, Debug, Default)]
pub struct WorkerTable(BTreeMap<WorkerId, BTreeSet<Jid>>);

impl WorkerTable {
    pub fn assign(&mut self, worker: WorkerId, jid: Jid) {
        self.0.entry(worker).or_default().insert(jid);
    }

    /// Removes `jid` from whichever worker currently holds it, if any.
    pub fn unassign(&mut self, jid: &Jid) {
        self.0.retain(|_, jids| {
            jids.remove(jid);
            !jids.is_empty()
        });
    }

    pub fn running_for(&self, worker: &str) -> BTreeSet<Jid> {
        self.0.get(worker).cloned().unwrap_or_default()
    }
}
