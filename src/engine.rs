//! C7: the operations surface. Each public method here is one verb; each
//! composes C3 (resources), C4 (job record/history), C5 (queue indexes),
//! and C6 (worker tracking) inside a single [`MemoryStore::transaction`],
//! so a verb either applies completely or not at all.

use std::collections::BTreeSet;

use bytes::Bytes;
use tracing::{debug, instrument, warn};

use crate::error::{EngineError, EngineResult};
use crate::ids::{Jid, Priority, QueueName, ResourceId, WorkerId};
use crate::job::{Failure, HistoryEvent, HistoryKind, Job, JobState};
use crate::queue::QueueStats;
use crate::resource::Resource;
use crate::store::{MemoryStore, State};
use crate::view::JobView;

#[derive(Clone, Debug, Default)]
pub struct PutOptions {
    pub retries: Option<i64>,
    pub depends: Vec<Jid>,
    pub resources: Vec<ResourceId>,
    pub priority: Option<Priority>,
    pub tags: Option<BTreeSet<String>>,
}

#[derive(Clone, Debug, Default)]
pub struct CompleteOptions {
    pub next: Option<QueueName>,
    pub delay: Option<i64>,
    pub depends: Option<Vec<Jid>>,
}

#[derive(Clone, Debug, Default)]
pub struct RetryOptions {
    pub group: Option<String>,
    pub message: Option<String>,
    pub delay: Option<i64>,
}

/// The job queueing and scheduling engine. Owns no threads; every verb is a
/// self-contained async call against the in-memory [`MemoryStore`].
#[derive(Default)]
pub struct Engine {
    store: MemoryStore,
}

impl Engine {
    pub fn new() -> Self {
        Self { store: MemoryStore::new() }
    }

    #[instrument(skip(self, data, opts), fields(%jid, %queue))]
    pub async fn put(
        &self,
        now: i64,
        queue: &str,
        jid: &str,
        klass: &str,
        data: Bytes,
        delay: i64,
        opts: PutOptions,
    ) -> EngineResult<Jid> {
        let jid = Jid::from(jid);
        let queue_name = QueueName::from(queue);
        self.store
            .transaction(|state| {
                do_put(
                    state,
                    now,
                    &queue_name,
                    &jid,
                    klass,
                    data.clone(),
                    delay,
                    &opts,
                    None,
                )
            })
            .await?;
        debug!(%jid, "put");
        Ok(jid)
    }

    #[instrument(skip(self), fields(%queue, %worker))]
    pub async fn pop(
        &self,
        now: i64,
        queue: &str,
        worker: &str,
        count: usize,
    ) -> EngineResult<Vec<JobView>> {
        let queue_name = QueueName::from(queue);
        let worker_id = WorkerId::from(worker);
        self.store
            .transaction(|state| do_pop(state, now, &queue_name, &worker_id, count))
            .await
    }

    #[instrument(skip(self, data), fields(%jid, %worker, %queue))]
    pub async fn complete(
        &self,
        now: i64,
        jid: &str,
        worker: &str,
        queue: &str,
        data: Bytes,
        opts: CompleteOptions,
    ) -> EngineResult<&'static str> {
        let jid = Jid::from(jid);
        let worker = WorkerId::from(worker);
        let queue_name = QueueName::from(queue);
        self.store
            .transaction(|state| {
                do_complete(state, now, &jid, &worker, &queue_name, data.clone(), &opts)
            })
            .await
    }

    /// `data` is accepted for parity with the wire surface this replaces
    /// but spec.md's `fail` never describes it updating the job record, so
    /// it's not persisted.
    #[instrument(skip(self, _data), fields(%jid, %worker))]
    pub async fn fail(
        &self,
        now: i64,
        jid: &str,
        worker: &str,
        group: &str,
        message: &str,
        _data: Bytes,
    ) -> EngineResult<()> {
        let jid = Jid::from(jid);
        let worker = WorkerId::from(worker);
        self.store
            .transaction(|state| do_fail(state, now, &jid, &worker, group, message))
            .await
    }

    #[instrument(skip(self, opts), fields(%jid, %queue, %worker))]
    pub async fn retry(
        &self,
        now: i64,
        jid: &str,
        queue: &str,
        worker: &str,
        opts: RetryOptions,
    ) -> EngineResult<i64> {
        let jid = Jid::from(jid);
        let queue_name = QueueName::from(queue);
        let worker = WorkerId::from(worker);
        self.store
            .transaction(|state| do_retry(state, now, &jid, &queue_name, &worker, &opts))
            .await
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, now: i64, jids: &[&str]) -> EngineResult<Vec<Jid>> {
        let jids: Vec<Jid> = jids.iter().map(|j| Jid::from(*j)).collect();
        self.store.transaction(|state| do_cancel(state, now, &jids)).await
    }

    #[instrument(skip(self, data), fields(%jid, %worker))]
    pub async fn heartbeat(
        &self,
        now: i64,
        jid: &str,
        worker: &str,
        data: Bytes,
    ) -> EngineResult<i64> {
        let jid = Jid::from(jid);
        let worker = WorkerId::from(worker);
        let _ = data;
        self.store.transaction(|state| do_heartbeat(state, now, &jid, &worker)).await
    }

    pub async fn log(&self, now: i64, jid: &str, what: &str, data: Vec<(String, String)>) -> EngineResult<()> {
        let jid = Jid::from(jid);
        self.store
            .transaction(|state| {
                let cap = state.config.max_job_history() as usize;
                let job = state
                    .jobs
                    .get_mut(&jid)
                    .ok_or_else(|| EngineError::DoesNotExist(format!("Job {jid}")))?;
                job.history.push(
                    HistoryEvent {
                        when: now,
                        kind: HistoryKind::Log { what: what.to_owned(), data },
                    },
                    cap,
                );
                Ok(())
            })
            .await
    }

    pub async fn priority(&self, jid: &str, value: i64) -> EngineResult<i64> {
        let jid = Jid::from(jid);
        self.store
            .transaction(|state| {
                let job = state
                    .jobs
                    .get_mut(&jid)
                    .ok_or_else(|| EngineError::DoesNotExist(format!("Job {jid}")))?;
                job.priority = Priority(value);
                if let (Some(queue_name), JobState::Waiting) =
                    (job.queue.clone(), job.state)
                {
                    state.queue_mut(&queue_name).reprioritize(&jid, Priority(value));
                }
                Ok(value)
            })
            .await
    }

    pub async fn get(&self, now: i64, jid: &str) -> Option<JobView> {
        let jid = Jid::from(jid);
        self.store
            .read(|state| {
                let grace = state.config.grace_period();
                state.jobs.get(&jid).map(|job| job.view(now, grace))
            })
            .await
    }

    pub async fn set_tracked(&self, jid: &str, tracked: bool) -> EngineResult<()> {
        let jid = Jid::from(jid);
        self.store
            .transaction(|state| {
                let job = state
                    .jobs
                    .get_mut(&jid)
                    .ok_or_else(|| EngineError::DoesNotExist(format!("Job {jid}")))?;
                job.tracked = tracked;
                Ok(())
            })
            .await
    }

    /// Flips `tracked` on; thin alias over [`Self::set_tracked`] matching
    /// the `track`/`untrack` verb pair spec.md's notification hooks imply.
    pub async fn track(&self, jid: &str) -> EngineResult<()> {
        self.set_tracked(jid, true).await
    }

    pub async fn untrack(&self, jid: &str) -> EngineResult<()> {
        self.set_tracked(jid, false).await
    }

    pub async fn resource_set(&self, rid: &str, max: i64) -> EngineResult<String> {
        let rid = ResourceId::from(rid);
        self.store
            .transaction(|state| {
                state.resources.set(rid.clone(), max);
                Ok(rid.to_string())
            })
            .await
    }

    pub async fn resource_get(&self, rid: &str) -> Option<Resource> {
        self.store.read(|state| state.resources.get(rid).cloned()).await
    }

    pub async fn resource_unset(&self, rid: &str) -> EngineResult<()> {
        self.store.transaction(|state| state.resources.unset(rid)).await
    }

    pub async fn resource_locks(&self, rid: &str) -> Option<usize> {
        self.store.read(|state| state.resources.locks_count(rid)).await
    }

    pub async fn config_set(&self, key: &str, value: i64) {
        self.store
            .transaction(|state: &mut State| {
                state.config.set(key, value);
                Ok(())
            })
            .await
            .expect("config.set never fails");
    }

    pub async fn config_get(&self, key: &str) -> Option<i64> {
        self.store.read(|state| state.config.get(key)).await
    }

    pub async fn config_get_all(&self) -> std::collections::BTreeMap<String, i64> {
        self.store.read(|state| state.config.get_all()).await
    }

    pub async fn queue_stats(&self, queue: &str) -> QueueStats {
        self.store
            .read(|state| {
                state
                    .queues
                    .get(queue)
                    .map(|q| q.stats())
                    .unwrap_or_default()
            })
            .await
    }
}

// -- verb implementations ---------------------------------------------------
//
// Free functions rather than `Engine` methods: they operate purely on the
// staged `&mut State` a transaction hands them, with no access to `self`.

#[allow(clippy::too_many_arguments)]
fn do_put(
    state: &mut State,
    now: i64,
    queue_name: &QueueName,
    jid: &Jid,
    klass: &str,
    data: Bytes,
    delay: i64,
    opts: &PutOptions,
    spawned_from: Option<Jid>,
) -> EngineResult<()> {
    if let Some(existing) = state.jobs.get(jid) {
        if existing.state == JobState::Complete {
            return Err(EngineError::DoesNotExist(format!("Job {jid}")));
        }
    }

    // Detach from whatever index/resources/dependency-edges the job
    // previously occupied, so a requeue starts from a clean slate.
    let (retries_carry, tags_carry, spawned_carry) =
        if let Some(existing) = state.jobs.get(jid).cloned() {
            detach_existing(state, &existing);
            (Some(existing.retries), Some(existing.tags), existing.spawned_from_jid)
        } else {
            (None, None, None)
        };

    let retries = opts.retries.or(retries_carry).unwrap_or(5);
    let tags = opts.tags.clone().or(tags_carry).unwrap_or_default();
    let priority = opts.priority.unwrap_or(Priority(0));
    let spawned_from_jid = spawned_from.or(spawned_carry);

    let mut job = Job {
        jid: jid.clone(),
        klass: klass.to_owned(),
        data,
        priority,
        tags,
        retries,
        remaining: retries,
        state: JobState::Waiting,
        queue: Some(queue_name.clone()),
        worker: None,
        expires: 0,
        failure: None,
        dependencies: BTreeSet::new(),
        dependents: state.jobs.get(jid).map(|j| j.dependents.clone()).unwrap_or_default(),
        resources: opts.resources.clone(),
        spawned_from_jid,
        history: state.jobs.get(jid).map(|j| j.history.clone()).unwrap_or_default(),
        tracked: state.jobs.get(jid).map(|j| j.tracked).unwrap_or(false),
    };

    let cap = state.config.max_job_history() as usize;
    job.history.push(
        HistoryEvent { when: now, kind: HistoryKind::Put { queue: queue_name.clone() } },
        cap,
    );

    // A dependency that doesn't exist, or has already completed, can never
    // block this job — only still-live ones count.
    let blocking: BTreeSet<Jid> = opts
        .depends
        .iter()
        .filter(|d| state.jobs.get(*d).is_some_and(|dj| dj.state != JobState::Complete))
        .cloned()
        .collect();
    if !blocking.is_empty() {
        job.state = JobState::Depends;
        job.dependencies = blocking.clone();
        for dep in &blocking {
            state.jobs.get_mut(dep).expect("checked above").dependents.insert(jid.clone());
        }
        state.jobs.insert(jid.clone(), job);
        state.queue_mut(queue_name).insert_depends(jid.clone());
        return Ok(());
    }

    if !opts.resources.is_empty() {
        state.resources.acquire_all(&opts.resources, jid)?;
        job.state = JobState::Waiting;
        state.jobs.insert(jid.clone(), job);
        state.queue_mut(queue_name).insert_waiting(jid.clone(), priority);
        return Ok(());
    }

    if delay > 0 {
        job.state = JobState::Scheduled;
        state.jobs.insert(jid.clone(), job);
        state.queue_mut(queue_name).insert_scheduled(jid.clone(), now + delay);
        return Ok(());
    }

    job.state = JobState::Waiting;
    state.jobs.insert(jid.clone(), job);
    state.queue_mut(queue_name).insert_waiting(jid.clone(), priority);
    Ok(())
}

/// Removes `existing`'s membership from its queue sub-index and releases
/// any resources it held, ahead of a requeue recomputing both from scratch.
fn detach_existing(state: &mut State, existing: &Job) {
    if let Some(queue_name) = &existing.queue {
        let queue = state.queue_mut(queue_name);
        match existing.state {
            JobState::Waiting => {
                queue.remove_waiting(&existing.jid);
            },
            JobState::Scheduled => {
                queue.remove_scheduled(&existing.jid);
            },
            JobState::Depends => {
                queue.remove_depends(&existing.jid);
            },
            JobState::Running => {
                queue.remove_locks(&existing.jid);
            },
            JobState::Complete | JobState::Failed => {},
        }
    }
    if !existing.resources.is_empty() {
        state.resources.release_all(&existing.resources, &existing.jid);
    }
    for dep in &existing.dependencies {
        if let Some(dep_job) = state.jobs.get_mut(dep) {
            dep_job.dependents.remove(&existing.jid);
        }
    }
}

fn do_pop(
    state: &mut State,
    now: i64,
    queue_name: &QueueName,
    worker: &WorkerId,
    count: usize,
) -> EngineResult<Vec<JobView>> {
    let heartbeat = state.config.heartbeat();
    let grace_period = state.config.grace_period();

    // 1. Drain scheduled into waiting.
    let due = state.queue_mut(queue_name).scheduled_due(now);
    for jid in due {
        state.queue_mut(queue_name).remove_scheduled(&jid);
        let priority = state.jobs.get(&jid).map(|j| j.priority).unwrap_or_default();
        let resources = state.jobs.get(&jid).map(|j| j.resources.clone()).unwrap_or_default();
        if !resources.is_empty() {
            let _ = state.resources.acquire_all(&resources, &jid);
        }
        if let Some(job) = state.jobs.get_mut(&jid) {
            job.state = JobState::Waiting;
        }
        state.queue_mut(queue_name).insert_waiting(jid, priority);
    }

    // 2. Reclaim stale running claims.
    let stale = state.queue_mut(queue_name).stale_locks(now, grace_period);
    for jid in stale {
        state.queue_mut(queue_name).remove_locks(&jid);
        let cap = state.config.max_job_history() as usize;
        let Some(job) = state.jobs.get_mut(&jid) else { continue };
        job.history.push(HistoryEvent { when: now, kind: HistoryKind::TimedOut }, cap);
        job.remaining -= 1;
        let resources = job.resources.clone();
        if job.remaining < 0 {
            job.state = JobState::Failed;
            job.failure = Some(Failure {
                group: "failed-retries".to_owned(),
                message: "job exhausted retries while its claim timed out".to_owned(),
                worker: job.worker.clone().unwrap_or_default(),
                when: now,
            });
            job.history.push(
                HistoryEvent {
                    when: now,
                    kind: HistoryKind::Failed { group: "failed-retries".to_owned() },
                },
                cap,
            );
            job.worker = None;
            job.queue = None;
            state.resources.release_all(&resources, &jid);
        } else {
            job.state = JobState::Waiting;
            job.worker = None;
            state.resources.release_all(&resources, &jid);
            state.queue_mut(queue_name).insert_waiting_front(jid.clone());
        }
        state.workers.unassign(&jid);
    }

    // 3. Select up to `count` fully-satisfied waiting jobs.
    let candidates: Vec<Jid> = state.queue_mut(queue_name).waiting_order().cloned().collect();
    let mut selected = Vec::new();
    for jid in candidates {
        if selected.len() >= count {
            break;
        }
        let resources = state.jobs.get(&jid).map(|j| j.resources.clone()).unwrap_or_default();
        if !resources.is_empty() && !state.resources.fully_granted(&resources, &jid) {
            continue;
        }
        state.queue_mut(queue_name).remove_waiting(&jid);
        let cap = state.config.max_job_history() as usize;
        let expires = now + heartbeat;
        if let Some(job) = state.jobs.get_mut(&jid) {
            job.worker = Some(worker.clone());
            job.expires = expires;
            job.queue = Some(queue_name.clone());
            job.state = JobState::Running;
            job.history.push(
                HistoryEvent { when: now, kind: HistoryKind::Popped { worker: worker.clone() } },
                cap,
            );
        }
        state.queue_mut(queue_name).insert_locks(jid.clone(), expires);
        state.workers.assign(worker.clone(), jid.clone());
        selected.push(jid);
    }

    let grace_period = state.config.grace_period();
    Ok(selected
        .into_iter()
        .filter_map(|jid| state.jobs.get(&jid).map(|j| j.view(now, grace_period)))
        .collect())
}

fn do_complete(
    state: &mut State,
    now: i64,
    jid: &Jid,
    worker: &WorkerId,
    queue_name: &QueueName,
    data: Bytes,
    opts: &CompleteOptions,
) -> EngineResult<&'static str> {
    let job = state
        .jobs
        .get(jid)
        .ok_or_else(|| EngineError::DoesNotExist(format!("Job {jid}")))?
        .clone();

    if job.state != JobState::Running {
        return Err(EngineError::WrongState { jid: jid.clone(), state: job.state.as_str().to_owned() });
    }
    if job.worker.as_ref() != Some(worker) {
        return Err(EngineError::AnotherWorker { jid: jid.clone() });
    }
    if job.queue.as_ref() != Some(queue_name) {
        return Err(EngineError::AnotherQueue { jid: jid.clone() });
    }
    if opts.depends.is_some() && opts.next.is_none() {
        return Err(EngineError::Malformed("complete with depends requires next".into()));
    }
    if opts.depends.is_some() && opts.delay.is_some() {
        return Err(EngineError::Malformed("complete cannot combine depends and delay".into()));
    }

    state.queue_mut(queue_name).remove_locks(jid);
    state.workers.unassign(jid);

    let cap = state.config.max_job_history() as usize;
    {
        let job_mut = state.jobs.get_mut(jid).expect("checked above");
        job_mut.data = data.clone();
        job_mut.history.push(HistoryEvent { when: now, kind: HistoryKind::Done }, cap);
    }

    match &opts.next {
        None => {
            let job_mut = state.jobs.get_mut(jid).expect("checked above");
            job_mut.state = JobState::Complete;
            job_mut.worker = None;
            job_mut.queue = None;
            job_mut.failure = None;
            let resources = job_mut.resources.clone();
            state.resources.release_all(&resources, jid);

            release_dependents(state, jid);

            state.completed.insert((now, jid.clone()));
            evict_completed(state, now);
            Ok("complete")
        },
        Some(next_queue) => {
            let put_opts = PutOptions {
                retries: None,
                depends: opts.depends.clone().unwrap_or_default(),
                resources: job.resources.clone(),
                priority: Some(job.priority),
                tags: Some(job.tags.clone()),
            };
            do_put(
                state,
                now,
                next_queue,
                jid,
                &job.klass,
                data,
                opts.delay.unwrap_or(0),
                &put_opts,
                job.spawned_from_jid.clone(),
            )?;
            Ok("advanced")
        },
    }
}

/// §4.4: on A's completion, for each dependent B, drop A from B's
/// dependencies and, once B's dependency set is empty, move B out of
/// `depends` and into `waiting`.
fn release_dependents(state: &mut State, jid: &Jid) {
    let dependents = state.jobs.get(jid).map(|j| j.dependents.clone()).unwrap_or_default();
    for dependent in dependents {
        let Some(dep_job) = state.jobs.get_mut(&dependent) else { continue };
        dep_job.dependencies.remove(jid);
        if dep_job.dependencies.is_empty() && dep_job.state == JobState::Depends {
            let queue_name = dep_job.queue.clone();
            let priority = dep_job.priority;
            dep_job.state = JobState::Waiting;
            if let Some(queue_name) = queue_name {
                let queue = state.queue_mut(&queue_name);
                queue.remove_depends(&dependent);
                queue.insert_waiting(dependent, priority);
            }
        }
    }
}

fn evict_completed(state: &mut State, now: i64) {
    let threshold = now - state.config.jobs_history();
    let count_cap = state.config.jobs_history_count().max(0) as usize;

    let expired: Vec<(i64, Jid)> =
        state.completed.iter().take_while(|(when, _)| *when <= threshold).cloned().collect();
    for key in expired {
        state.jobs.remove(&key.1);
        state.completed.remove(&key);
    }

    while state.completed.len() > count_cap {
        let Some(oldest) = state.completed.iter().next().cloned() else { break };
        state.jobs.remove(&oldest.1);
        state.completed.remove(&oldest);
    }
}

fn do_fail(
    state: &mut State,
    now: i64,
    jid: &Jid,
    worker: &WorkerId,
    group: &str,
    message: &str,
) -> EngineResult<()> {
    let job = state
        .jobs
        .get(jid)
        .ok_or_else(|| EngineError::DoesNotExist(format!("Job {jid}")))?
        .clone();

    if job.state != JobState::Running {
        return Err(EngineError::WrongState { jid: jid.clone(), state: job.state.as_str().to_owned() });
    }
    if job.worker.as_ref() != Some(worker) {
        return Err(EngineError::AnotherWorker { jid: jid.clone() });
    }

    if let Some(queue_name) = &job.queue {
        state.queue_mut(queue_name).remove_locks(jid);
    }
    state.workers.unassign(jid);
    state.resources.release_all(&job.resources, jid);

    let cap = state.config.max_job_history() as usize;
    let job_mut = state.jobs.get_mut(jid).expect("checked above");
    job_mut.state = JobState::Failed;
    job_mut.worker = None;
    job_mut.queue = None;
    job_mut.failure = Some(Failure {
        group: group.to_owned(),
        message: message.to_owned(),
        worker: worker.clone(),
        when: now,
    });
    job_mut.history.push(
        HistoryEvent { when: now, kind: HistoryKind::Failed { group: group.to_owned() } },
        cap,
    );
    Ok(())
}

fn do_retry(
    state: &mut State,
    now: i64,
    jid: &Jid,
    queue_name: &QueueName,
    worker: &WorkerId,
    opts: &RetryOptions,
) -> EngineResult<i64> {
    let job = state
        .jobs
        .get(jid)
        .ok_or_else(|| EngineError::DoesNotExist(format!("Job {jid}")))?
        .clone();

    if job.state != JobState::Running {
        return Err(EngineError::WrongState { jid: jid.clone(), state: job.state.as_str().to_owned() });
    }
    if job.worker.as_ref() != Some(worker) {
        return Err(EngineError::AnotherWorker { jid: jid.clone() });
    }
    if job.queue.as_ref() != Some(queue_name) {
        return Err(EngineError::AnotherQueue { jid: jid.clone() });
    }

    state.queue_mut(queue_name).remove_locks(jid);
    state.workers.unassign(jid);

    let cap = state.config.max_job_history() as usize;
    let remaining = job.remaining - 1;
    let job_mut = state.jobs.get_mut(jid).expect("checked above");
    job_mut.remaining = remaining;

    if remaining < 0 {
        let group = opts.group.clone().unwrap_or_else(|| "failed-retries".to_owned());
        job_mut.state = JobState::Failed;
        job_mut.worker = None;
        job_mut.queue = None;
        job_mut.failure = Some(Failure {
            group: group.clone(),
            message: opts.message.clone().unwrap_or_default(),
            worker: worker.clone(),
            when: now,
        });
        job_mut.history.push(
            HistoryEvent { when: now, kind: HistoryKind::Failed { group } },
            cap,
        );
        let resources = job_mut.resources.clone();
        state.resources.release_all(&resources, jid);
    } else {
        let priority = job_mut.priority;
        let mut data = Vec::new();
        if let Some(group) = &opts.group {
            data.push(("group".to_owned(), group.clone()));
        }
        if let Some(message) = &opts.message {
            data.push(("message".to_owned(), message.clone()));
        }
        job_mut.history.push(
            HistoryEvent { when: now, kind: HistoryKind::Log { what: "retried".to_owned(), data } },
            cap,
        );
        job_mut.worker = None;
        match opts.delay {
            Some(delay) if delay > 0 => {
                job_mut.state = JobState::Scheduled;
                state.queue_mut(queue_name).insert_scheduled(jid.clone(), now + delay);
            },
            _ => {
                job_mut.state = JobState::Waiting;
                state.queue_mut(queue_name).insert_waiting(jid.clone(), priority);
            },
        }
    }
    Ok(remaining)
}

fn do_cancel(state: &mut State, now: i64, jids: &[Jid]) -> EngineResult<Vec<Jid>> {
    let _ = now;
    let existing: Vec<Jid> =
        jids.iter().filter(|jid| state.jobs.contains_key(*jid)).cloned().collect();

    for jid in &existing {
        let job = state.jobs.get(jid).expect("filtered above");
        let blockers: Vec<Jid> = job
            .dependents
            .iter()
            .filter(|dep| {
                state
                    .jobs
                    .get(*dep)
                    .is_some_and(|d| !matches!(d.state, JobState::Complete | JobState::Failed))
            })
            .cloned()
            .collect();
        if !blockers.is_empty() {
            return Err(EngineError::Dependency { jid: jid.clone(), blockers });
        }
    }

    for jid in &existing {
        let job = state.jobs.get(jid).expect("filtered above").clone();
        if let Some(queue_name) = &job.queue {
            let queue = state.queue_mut(queue_name);
            match job.state {
                JobState::Waiting => {
                    queue.remove_waiting(jid);
                },
                JobState::Scheduled => {
                    queue.remove_scheduled(jid);
                },
                JobState::Depends => {
                    queue.remove_depends(jid);
                },
                JobState::Running => {
                    queue.remove_locks(jid);
                },
                JobState::Complete | JobState::Failed => {},
            }
        }
        state.workers.unassign(jid);
        state.resources.release_all(&job.resources, jid);

        for dep in &job.dependencies {
            if let Some(dep_job) = state.jobs.get_mut(dep) {
                dep_job.dependents.remove(jid);
            }
        }
        for dependent in &job.dependents {
            if let Some(dep_job) = state.jobs.get_mut(dependent) {
                dep_job.dependencies.remove(jid);
            }
        }

        state.jobs.remove(jid);
        state.completed.retain(|(_, j)| j != jid);
    }

    if existing.len() != jids.len() {
        warn!(requested = jids.len(), found = existing.len(), "cancel: some jids did not exist");
    }
    Ok(existing)
}

fn do_heartbeat(
    state: &mut State,
    now: i64,
    jid: &Jid,
    worker: &WorkerId,
) -> EngineResult<i64> {
    let job = state
        .jobs
        .get(jid)
        .ok_or_else(|| EngineError::DoesNotExist(format!("Job {jid}")))?;

    if job.state != JobState::Running {
        return Err(EngineError::DoesNotExist(format!("Job {jid}")));
    }
    if job.worker.as_ref() != Some(worker) {
        return Err(EngineError::AnotherWorker { jid: jid.clone() });
    }

    let heartbeat = state.config.heartbeat();
    let expires = now + heartbeat;
    let queue_name = state.jobs.get(jid).and_then(|j| j.queue.clone());
    if let Some(job) = state.jobs.get_mut(jid) {
        job.expires = expires;
    }
    if let Some(queue_name) = queue_name {
        state.queue_mut(&queue_name).insert_locks(jid.clone(), expires);
    }
    Ok(expires)
}
