//! Read-only snapshots handed back to callers. Kept separate from the
//! mutable [`crate::job::Job`] record so serialization concerns (what a
//! caller sees) never leak back into the storage model (what the engine
//! keeps).

use std::collections::BTreeSet;

use bytes::Bytes;
use serde::Serialize;

use crate::ids::{Jid, Priority, QueueName, ResourceId, WorkerId};
use crate::job::{Failure, HistoryKind, Job, JobStateView};

#[derive(Clone, Debug, Serialize)]
pub struct HistoryEventView {
    pub what: String,
    pub when: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<QueueName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub data: Vec<(String, String)>,
}

#[derive(Clone, Debug, Serialize)]
pub struct JobView {
    pub jid: Jid,
    pub klass: String,
    pub data: Bytes,
    pub priority: i64,
    pub tags: BTreeSet<String>,
    pub retries: i64,
    pub remaining: i64,
    pub state: JobStateView,
    pub queue: Option<QueueName>,
    pub worker: Option<WorkerId>,
    pub expires: i64,
    pub failure: Option<Failure>,
    pub dependencies: BTreeSet<Jid>,
    pub dependents: BTreeSet<Jid>,
    pub resources: Vec<ResourceId>,
    pub spawned_from_jid: Option<Jid>,
    pub history: Vec<HistoryEventView>,
    pub tracked: bool,
}

impl Job {
    pub fn view(&self, now: i64, grace_period: i64) -> JobView {
        JobView {
            jid: self.jid.clone(),
            klass: self.klass.clone(),
            data: self.data.clone(),
            priority: self.priority.0,
            tags: self.tags.clone(),
            retries: self.retries,
            remaining: self.remaining,
            state: self.view_state(now, grace_period),
            queue: self.queue.clone(),
            worker: self.worker.clone(),
            expires: self.expires,
            failure: self.failure.clone(),
            dependencies: self.dependencies.clone(),
            dependents: self.dependents.clone(),
            resources: self.resources.clone(),
            spawned_from_jid: self.spawned_from_jid.clone(),
            history: self.history.iter().map(history_view).collect(),
            tracked: self.tracked,
        }
    }
}

fn history_view(event: &crate::job::HistoryEvent) -> HistoryEventView {
    let what = event.kind.what().to_owned();
    let (q, worker, group, data) = match &event.kind {
        HistoryKind::Put { queue } => (Some(queue.clone()), None, None, Vec::new()),
        HistoryKind::Popped { worker } => (None, Some(worker.clone()), None, Vec::new()),
        HistoryKind::Done | HistoryKind::TimedOut => (None, None, None, Vec::new()),
        HistoryKind::Failed { group } => (None, None, Some(group.clone()), Vec::new()),
        HistoryKind::Log { data, .. } => (None, None, None, data.clone()),
    };
    HistoryEventView { what, when: event.when, q, worker, group, data }
}

impl Serialize for Priority {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i64(self.0)
    }
}
