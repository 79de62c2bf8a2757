//! C2: the storage contract. spec.md describes this as transactional
//! execution of a closure over hash/set/sorted-set primitives; here that
//! contract is realized as one strongly-typed `State` snapshot plus a
//! `transaction` boundary that clones, mutates, and only commits back on
//! success — giving the "one serializable transaction per verb, rollback on
//! error" guarantee spec.md §4.2 asks for, without re-deriving a
//! schema-less KV layer by hand. There is exactly one backend
//! (`MemoryStore`); a `Store` trait over it would buy nothing today, so the
//! boundary is an inherent method instead (see DESIGN.md).

use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::EngineResult;
use crate::ids::{Jid, QueueName};
use crate::job::Job;
use crate::queue::Queue;
use crate::resource::ResourceTable;
use crate::worker::WorkerTable;

/// Everything the engine persists. Cloned wholesale at the start of every
/// `transaction` and swapped back in only if the closure succeeds.
#[derive(Clone, Debug, Default)]
pub struct State {
    pub jobs: BTreeMap<Jid, Job>,
    pub queues: BTreeMap<QueueName, Queue>,
    pub resources: ResourceTable,
    pub config: Config,
    /// Completed jobs, scored by completion time, for the eviction policy.
    pub completed: BTreeSet<(i64, Jid)>,
    pub workers: WorkerTable,
}

impl State {
    pub fn queue_mut(&mut self, name: &QueueName) -> &mut Queue {
        self.queues.entry(name.clone()).or_insert_with(|| Queue::new(name.clone()))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against a staged copy of the current state. On `Ok`, the
    /// staged copy is committed; on `Err`, it's discarded and the live
    /// state is left untouched — the whole-transaction rollback spec.md
    /// §4.2 requires.
    pub async fn transaction<R>(
        &self,
        f: impl FnOnce(&mut State) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let mut guard = self.state.lock().await;
        let mut staged = guard.clone();
        let result = f(&mut staged);
        if result.is_ok() {
            *guard = staged;
        }
        result
    }

    /// Read-only peek, for queries that never mutate (`get`, `queue.stats`,
    /// `config.get_all`).
    pub async fn read<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        let guard = self.state.lock().await;
        f(&guard)
    }
}
