use std::{error, fmt};

use crate::ids::{Jid, ResourceId};

/// Errors the operations surface (C7) can return. Every variant's `Display`
/// carries the substring documented in spec §7 so callers matching on error
/// text (as the wire protocol this engine replaces does) keep working.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EngineError {
    /// Arity or type violation in a verb's arguments.
    Malformed(String),
    /// A referenced job, resource, or requeue target doesn't exist.
    DoesNotExist(String),
    /// `complete`/`heartbeat`/`fail`/`retry` called by the wrong worker.
    AnotherWorker { jid: Jid },
    /// `complete` called against the wrong queue.
    AnotherQueue { jid: Jid },
    /// A verb's state precondition failed (e.g. `complete` on a job that
    /// isn't `running`). `state` carries the job's actual current state.
    WrongState { jid: Jid, state: String },
    /// `cancel` blocked by live dependents.
    Dependency { jid: Jid, blockers: Vec<Jid> },
    /// `put` referenced an rid with no prior `resource.set`.
    UnknownResource(ResourceId),
    /// `resource.unset` attempted while locks or pending are non-empty.
    ResourceInUse(ResourceId),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(detail) => write!(f, "malformed: {detail}"),
            Self::DoesNotExist(what) => write!(f, "{what} does not exist"),
            Self::AnotherWorker { jid } => {
                write!(f, "Job {jid} given out to another worker")
            },
            Self::AnotherQueue { jid } => {
                write!(f, "Job {jid} has been handed out in another queue")
            },
            Self::WrongState { jid, state } => {
                write!(f, "Job {jid} is {state}")
            },
            Self::Dependency { jid, blockers } => {
                write!(
                    f,
                    "Job {jid} not cancelled due to dependency: still \
                     depended on by {}",
                    blockers
                        .iter()
                        .map(Jid::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            },
            Self::UnknownResource(rid) => {
                write!(f, "resource {rid} does not exist")
            },
            Self::ResourceInUse(rid) => {
                write!(f, "resource {rid} still has locks or pending jobs")
            },
        }
    }
}

impl error::Error for EngineError {}

pub type EngineResult<T> = Result<T, EngineError>;
