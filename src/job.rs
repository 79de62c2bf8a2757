//! C4: the canonical job record, its bounded history, and the dependency
//! graph edges it carries. `Engine` (C7) is the only thing that mutates a
//! `Job`; this module just holds the data and the small amount of pure
//! logic (history capping) that has no business living in the engine.

use std::collections::{BTreeSet, VecDeque};

use bytes::Bytes;
use serde::Serialize;

use crate::ids::{Jid, Priority, QueueName, ResourceId, WorkerId};

/// The state actually persisted for a job. `stalled` is not a stored state
/// — spec.md describes it as something a running job "becomes" purely by
/// the clock passing `expires + grace-period`, and time-driven transitions
/// are lazy (only applied on the next `pop` against the job's queue). So a
/// stale job keeps `Running` in storage until reclaimed, and callers asking
/// for a point-in-time view get the computed `JobView` state instead (see
/// [`JobView::state`] / [`Job::view_state`]).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobState {
    Waiting,
    Scheduled,
    Depends,
    Running,
    Complete,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Scheduled => "scheduled",
            Self::Depends => "depends",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

/// The state reported by `get`: identical to [`JobState`] except a running
/// job whose claim has lapsed displays as `Stalled` without anything having
/// mutated storage.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStateView {
    Waiting,
    Scheduled,
    Depends,
    Running,
    Stalled,
    Complete,
    Failed,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Failure {
    pub group: String,
    pub message: String,
    pub worker: WorkerId,
    pub when: i64,
}

/// One entry in a job's history. `when` is common to all kinds; the kind
/// carries whatever extra fields spec.md §3 documents for that event.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEvent {
    pub when: i64,
    pub kind: HistoryKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum HistoryKind {
    Put { queue: QueueName },
    Popped { worker: WorkerId },
    Done,
    Failed { group: String },
    TimedOut,
    Log { what: String, data: Vec<(String, String)> },
}

impl HistoryKind {
    pub fn what(&self) -> &str {
        match self {
            Self::Put { .. } => "put",
            Self::Popped { .. } => "popped",
            Self::Done => "done",
            Self::Failed { .. } => "failed",
            Self::TimedOut => "timed-out",
            Self::Log { what, .. } => what,
        }
    }
}

/// Bounded job history. The first event a job ever recorded is retained
/// forever; everything since is capped to the most recent
/// `max-job-history - 1` entries, per spec.md §3.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct History {
    first: Option<HistoryEvent>,
    rest: VecDeque<HistoryEvent>,
}

impl History {
    pub fn push(&mut self, event: HistoryEvent, cap: usize) {
        if self.first.is_none() {
            self.first = Some(event);
            return;
        }
        self.rest.push_back(event);
        let bound = cap.saturating_sub(1);
        while self.rest.len() > bound {
            self.rest.pop_front();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEvent> {
        self.first.iter().chain(self.rest.iter())
    }

    pub fn len(&self) -> usize {
        self.first.iter().count() + self.rest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug)]
pub struct Job {
    pub jid: Jid,
    pub klass: String,
    pub data: Bytes,
    pub priority: Priority,
    pub tags: BTreeSet<String>,
    pub retries: i64,
    pub remaining: i64,
    pub state: JobState,
    pub queue: Option<QueueName>,
    pub worker: Option<WorkerId>,
    pub expires: i64,
    pub failure: Option<Failure>,
    pub dependencies: BTreeSet<Jid>,
    pub dependents: BTreeSet<Jid>,
    pub resources: Vec<ResourceId>,
    pub spawned_from_jid: Option<Jid>,
    pub history: History,
    pub tracked: bool,
}

impl Job {
    /// The state `get` should report: `Running` becomes `Stalled` once its
    /// claim has lapsed past the grace period, without mutating `self`.
    pub fn view_state(&self, now: i64, grace_period: i64) -> JobStateView {
        match self.state {
            JobState::Waiting => JobStateView::Waiting,
            JobState::Scheduled => JobStateView::Scheduled,
            JobState::Depends => JobStateView::Depends,
            JobState::Complete => JobStateView::Complete,
            JobState::Failed => JobStateView::Failed,
            JobState::Running => {
                if self.expires + grace_period <= now {
                    JobStateView::Stalled
                } else {
                    JobStateView::Running
                }
            },
        }
    }
}
