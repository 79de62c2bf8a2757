//! End-to-end scenario coverage across multiple verbs in sequence — the
//! seed cases from spec.md §8 plus the resource/cancel interactions
//! `test_job.py`/`test_resource.py` exercise against the original
//! implementation this spec was distilled from.

use bytes::Bytes;
use jobqueue_engine::engine::{CompleteOptions, PutOptions, RetryOptions};
use jobqueue_engine::job::JobStateView;
use jobqueue_engine::Engine;

fn jid(s: &str) -> String {
    s.to_owned()
}

#[tokio::test]
async fn seed_1_resource_gates_second_job_until_first_completes() {
    let engine = Engine::new();
    engine.resource_set("r1", 1).await;
    engine
        .put(0, "q", "j1", "klass", Bytes::new(), 0, PutOptions {
            resources: vec!["r1".into()],
            ..Default::default()
        })
        .await
        .unwrap();
    engine
        .put(0, "q", "j2", "klass", Bytes::new(), 0, PutOptions {
            resources: vec!["r1".into()],
            ..Default::default()
        })
        .await
        .unwrap();

    let popped = engine.pop(0, "q", "w1", 10).await.unwrap();
    assert_eq!(popped.iter().map(|j| j.jid.to_string()).collect::<Vec<_>>(), vec![jid("j1")]);

    let popped = engine.pop(0, "q", "w2", 10).await.unwrap();
    assert!(popped.is_empty());

    engine.complete(0, "j1", "w1", "q", Bytes::new(), CompleteOptions::default()).await.unwrap();

    let popped = engine.pop(0, "q", "w2", 10).await.unwrap();
    assert_eq!(popped.iter().map(|j| j.jid.to_string()).collect::<Vec<_>>(), vec![jid("j2")]);
}

#[tokio::test]
async fn seed_2_delayed_job_only_pops_once_due() {
    let engine = Engine::new();
    engine.put(0, "q", "j", "klass", Bytes::new(), 1, PutOptions::default()).await.unwrap();

    assert!(engine.pop(0, "q", "w", 10).await.unwrap().is_empty());
    let popped = engine.pop(1, "q", "w", 10).await.unwrap();
    assert_eq!(popped.len(), 1);
    assert_eq!(popped[0].jid.to_string(), "j");
}

#[tokio::test]
async fn seed_3_dependent_job_waits_then_becomes_poppable() {
    let engine = Engine::new();
    engine.put(0, "q", "a", "klass", Bytes::new(), 0, PutOptions::default()).await.unwrap();
    engine
        .put(0, "q", "b", "klass", Bytes::new(), 0, PutOptions {
            depends: vec!["a".into()],
            ..Default::default()
        })
        .await
        .unwrap();

    let popped = engine.pop(0, "q", "w", 10).await.unwrap();
    assert_eq!(popped.iter().map(|j| j.jid.to_string()).collect::<Vec<_>>(), vec![jid("a")]);

    engine.complete(0, "a", "w", "q", Bytes::new(), CompleteOptions::default()).await.unwrap();
    let b = engine.get(0, "b").await.unwrap();
    assert_eq!(b.state, JobStateView::Waiting);
    assert!(b.dependencies.is_empty());

    let popped = engine.pop(0, "q", "w", 10).await.unwrap();
    assert_eq!(popped.iter().map(|j| j.jid.to_string()).collect::<Vec<_>>(), vec![jid("b")]);
}

#[tokio::test]
async fn seed_4_history_caps_at_max_job_history_keeping_first_event() {
    let engine = Engine::new();
    engine.config_set("max-job-history", 5).await;
    for now in 0..100 {
        engine.put(now, "q", "j", "klass", Bytes::new(), 0, PutOptions::default()).await.unwrap();
    }
    let job = engine.get(99, "j").await.unwrap();
    let whens: Vec<i64> = job.history.iter().map(|e| e.when).collect();
    assert_eq!(whens, vec![0, 96, 97, 98, 99]);
    assert_eq!(job.history[0].what, "put");
}

#[tokio::test]
async fn seed_5_stale_claim_with_zero_retries_fails_terminally_and_releases_resources() {
    let engine = Engine::new();
    engine.config_set("heartbeat", -10).await;
    engine.config_set("grace-period", 0).await;
    engine.resource_set("r1", 1).await;
    engine
        .put(0, "q", "j", "klass", Bytes::new(), 0, PutOptions {
            retries: Some(0),
            resources: vec!["r1".into()],
            ..Default::default()
        })
        .await
        .unwrap();

    engine.pop(1, "q", "w1", 10).await.unwrap();
    // heartbeat=-10 means expires is already in the past at pop time; the
    // *next* pop against the queue reclaims it.
    let popped = engine.pop(2, "q", "w2", 10).await.unwrap();
    assert!(popped.is_empty());

    let job = engine.get(2, "j").await.unwrap();
    assert_eq!(job.state, JobStateView::Failed);
    assert_eq!(job.failure.unwrap().group, "failed-retries");
    assert_eq!(engine.resource_locks("r1").await, Some(0));
}

#[tokio::test]
async fn seed_6_resource_shrink_to_zero_then_complete_drains_into_pending_order() {
    let engine = Engine::new();
    engine.resource_set("r", 1).await;
    engine.put(0, "q", "j1", "klass", Bytes::new(), 0, PutOptions {
        resources: vec!["r".into()],
        ..Default::default()
    }).await.unwrap();
    engine.put(0, "q", "j2", "klass", Bytes::new(), 0, PutOptions {
        resources: vec!["r".into()],
        ..Default::default()
    }).await.unwrap();
    engine.resource_set("r", 0).await;

    engine.pop(0, "q", "w1", 10).await.unwrap();
    engine.complete(0, "j1", "w1", "q", Bytes::new(), CompleteOptions::default()).await.unwrap();

    let resource = engine.resource_get("r").await.unwrap();
    assert!(resource.locks.is_empty());
    assert_eq!(resource.pending.iter().map(|j| j.to_string()).collect::<Vec<_>>(), vec![jid("j2")]);

    // further puts enqueue behind j2 in pending order
    engine.put(0, "q", "j3", "klass", Bytes::new(), 0, PutOptions {
        resources: vec!["r".into()],
        ..Default::default()
    }).await.unwrap();
    let resource = engine.resource_get("r").await.unwrap();
    assert_eq!(
        resource.pending.iter().map(|j| j.to_string()).collect::<Vec<_>>(),
        vec![jid("j2"), jid("j3")]
    );
}

#[tokio::test]
async fn cancel_of_unknown_jid_is_a_noop() {
    let engine = Engine::new();
    let result = engine.cancel(0, &["ghost"]).await.unwrap();
    assert!(result.is_empty());
}

#[tokio::test]
async fn cancel_blocked_by_live_dependent() {
    let engine = Engine::new();
    engine.put(0, "q", "a", "klass", Bytes::new(), 0, PutOptions::default()).await.unwrap();
    engine
        .put(0, "q", "b", "klass", Bytes::new(), 0, PutOptions {
            depends: vec!["a".into()],
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(engine.cancel(0, &["a"]).await.is_err());

    engine.cancel(0, &["b"]).await.unwrap();
    let a = engine.get(0, "a").await.unwrap();
    assert!(a.dependents.is_empty());
    engine.cancel(0, &["a"]).await.unwrap();
}

#[tokio::test]
async fn cancel_waiting_releases_acquired_and_pending_resources() {
    let engine = Engine::new();
    engine.resource_set("r", 1).await;
    engine.put(0, "q", "j1", "klass", Bytes::new(), 0, PutOptions {
        resources: vec!["r".into()],
        ..Default::default()
    }).await.unwrap();
    engine.put(0, "q", "j2", "klass", Bytes::new(), 0, PutOptions {
        resources: vec!["r".into()],
        ..Default::default()
    }).await.unwrap();

    engine.cancel(0, &["j2"]).await.unwrap();
    let resource = engine.resource_get("r").await.unwrap();
    assert!(resource.pending.is_empty());
    assert_eq!(resource.locks.iter().map(|j| j.to_string()).collect::<Vec<_>>(), vec![jid("j1")]);

    engine.cancel(0, &["j1"]).await.unwrap();
    let resource = engine.resource_get("r").await.unwrap();
    assert!(resource.locks.is_empty());
}

#[tokio::test]
async fn requeue_after_fail_clears_failure() {
    let engine = Engine::new();
    engine.put(0, "q", "j", "klass", Bytes::new(), 0, PutOptions::default()).await.unwrap();
    engine.pop(0, "q", "w", 10).await.unwrap();
    engine.fail(0, "j", "w", "bad-input", "oops", Bytes::new()).await.unwrap();

    let job = engine.get(0, "j").await.unwrap();
    assert_eq!(job.state, JobStateView::Failed);
    assert!(job.failure.is_some());

    engine.put(1, "q", "j", "klass", Bytes::new(), 0, PutOptions::default()).await.unwrap();
    let job = engine.get(1, "j").await.unwrap();
    assert_eq!(job.state, JobStateView::Waiting);
    assert!(job.failure.is_none());
    // the original put event from before the fail is still first
    assert_eq!(job.history[0].what, "put");
}

#[tokio::test]
async fn complete_with_next_advances_the_job_preserving_history() {
    let engine = Engine::new();
    engine.put(0, "q1", "j", "klass", Bytes::new(), 0, PutOptions::default()).await.unwrap();
    engine.pop(0, "q1", "w", 10).await.unwrap();

    let outcome = engine
        .complete(0, "j", "w", "q1", Bytes::from_static(b"result"), CompleteOptions {
            next: Some("q2".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(outcome, "advanced");

    let job = engine.get(0, "j").await.unwrap();
    assert_eq!(job.state, JobStateView::Waiting);
    assert_eq!(job.queue.unwrap().to_string(), "q2");
    assert_eq!(job.data, Bytes::from_static(b"result"));
    assert!(job.history.iter().any(|e| e.what == "done"));
    assert!(job.history.iter().filter(|e| e.what == "put").count() >= 2);
}

#[tokio::test]
async fn complete_requires_running_state_and_matching_worker_and_queue() {
    let engine = Engine::new();
    engine.put(0, "q", "j", "klass", Bytes::new(), 0, PutOptions::default()).await.unwrap();

    let err = engine
        .complete(0, "j", "w", "q", Bytes::new(), CompleteOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("waiting"));

    engine.pop(0, "q", "w", 10).await.unwrap();

    let err = engine
        .complete(0, "j", "intruder", "q", Bytes::new(), CompleteOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("another worker"));

    let err = engine
        .complete(0, "j", "w", "other-q", Bytes::new(), CompleteOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("another queue"));
}

#[tokio::test]
async fn retry_exhaustion_fails_terminally_and_releases_resources() {
    let engine = Engine::new();
    engine.resource_set("r", 1).await;
    engine
        .put(0, "q", "j", "klass", Bytes::new(), 0, PutOptions {
            retries: Some(0),
            resources: vec!["r".into()],
            ..Default::default()
        })
        .await
        .unwrap();
    engine.pop(0, "q", "w", 10).await.unwrap();

    let remaining = engine
        .retry(0, "j", "q", "w", RetryOptions { group: Some("oops".into()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(remaining, -1);

    let job = engine.get(0, "j").await.unwrap();
    assert_eq!(job.state, JobStateView::Failed);
    assert_eq!(job.failure.unwrap().group, "oops");
    assert_eq!(engine.resource_locks("r").await, Some(0));
}

#[tokio::test]
async fn retry_holds_resources_until_terminal() {
    let engine = Engine::new();
    engine.resource_set("r", 1).await;
    engine
        .put(0, "q", "j", "klass", Bytes::new(), 0, PutOptions {
            retries: Some(5),
            resources: vec!["r".into()],
            ..Default::default()
        })
        .await
        .unwrap();
    engine.pop(0, "q", "w", 10).await.unwrap();
    engine.retry(0, "j", "q", "w", RetryOptions::default()).await.unwrap();

    // the resource slot is still held by j, not released back to the pool
    assert_eq!(engine.resource_locks("r").await, Some(1));
    let job = engine.get(0, "j").await.unwrap();
    assert_eq!(job.state, JobStateView::Waiting);
}

#[tokio::test]
async fn priority_change_reorders_waiting_jobs() {
    let engine = Engine::new();
    engine.put(0, "q", "low", "klass", Bytes::new(), 0, PutOptions::default()).await.unwrap();
    engine.put(0, "q", "high", "klass", Bytes::new(), 0, PutOptions::default()).await.unwrap();
    engine.priority("high", 10).await.unwrap();

    let popped = engine.pop(0, "q", "w", 10).await.unwrap();
    assert_eq!(popped[0].jid.to_string(), "high");
    assert_eq!(popped[1].jid.to_string(), "low");
}

#[tokio::test]
async fn completed_jobs_evict_past_jobs_history_window() {
    let engine = Engine::new();
    engine.config_set("jobs-history", -1).await;
    for i in 0..10 {
        let jid = format!("j{i}");
        engine.put(0, "q", &jid, "klass", Bytes::new(), 0, PutOptions::default()).await.unwrap();
    }
    engine.pop(1, "q", "w", 10).await.unwrap();
    for i in 0..10 {
        let jid = format!("j{i}");
        engine.complete(2, &jid, "w", "q", Bytes::new(), CompleteOptions::default()).await.unwrap();
    }
    for i in 0..10 {
        let jid = format!("j{i}");
        assert!(engine.get(3, &jid).await.is_none());
    }
}

#[tokio::test]
async fn put_referencing_unknown_resource_fails() {
    let engine = Engine::new();
    let err = engine
        .put(0, "q", "j", "klass", Bytes::new(), 0, PutOptions {
            resources: vec!["ghost".into()],
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("ghost"));
    assert!(err.to_string().contains("does not exist"));
}

#[tokio::test]
async fn opaque_data_round_trips_exact_bytes_including_empty_array_vs_object() {
    let engine = Engine::new();
    engine
        .put(0, "q", "arr", "klass", Bytes::from_static(b"[]"), 0, PutOptions::default())
        .await
        .unwrap();
    engine
        .put(0, "q", "obj", "klass", Bytes::from_static(b"{}"), 0, PutOptions::default())
        .await
        .unwrap();

    assert_eq!(engine.get(0, "arr").await.unwrap().data, Bytes::from_static(b"[]"));
    assert_eq!(engine.get(0, "obj").await.unwrap().data, Bytes::from_static(b"{}"));
}

#[tokio::test]
async fn heartbeat_extends_expiry_and_requires_matching_worker() {
    let engine = Engine::new();
    engine.put(0, "q", "j", "klass", Bytes::new(), 0, PutOptions::default()).await.unwrap();
    engine.pop(0, "q", "w", 10).await.unwrap();

    let expires = engine.heartbeat(5, "j", "w", Bytes::new()).await.unwrap();
    assert_eq!(expires, 5 + 60);

    let err = engine.heartbeat(5, "j", "intruder", Bytes::new()).await.unwrap_err();
    assert!(err.to_string().contains("another worker"));
}

#[tokio::test]
async fn track_and_untrack_flip_the_flag() {
    let engine = Engine::new();
    engine.put(0, "q", "j", "klass", Bytes::new(), 0, PutOptions::default()).await.unwrap();
    assert!(!engine.get(0, "j").await.unwrap().tracked);

    engine.track("j").await.unwrap();
    assert!(engine.get(0, "j").await.unwrap().tracked);

    engine.untrack("j").await.unwrap();
    assert!(!engine.get(0, "j").await.unwrap().tracked);

    assert!(engine.track("ghost").await.is_err());
}

#[tokio::test]
async fn non_terminal_stale_reclaim_returns_job_to_waiting_state() {
    let engine = Engine::new();
    engine
        .put(0, "q", "j", "klass", Bytes::new(), 0, PutOptions { retries: Some(5), ..Default::default() })
        .await
        .unwrap();
    engine.pop(1, "q", "w1", 1).await.unwrap();

    // now=100 is past expires(61)+grace-period(10); a pop against the same
    // queue reclaims the stale claim even though count=0 selects nothing.
    let popped = engine.pop(100, "q", "w2", 0).await.unwrap();
    assert!(popped.is_empty());

    let job = engine.get(100, "j").await.unwrap();
    assert_eq!(job.state, JobStateView::Waiting);
    assert!(job.worker.is_none());

    let popped = engine.pop(100, "q", "w3", 1).await.unwrap();
    assert_eq!(popped.iter().map(|j| j.jid.to_string()).collect::<Vec<_>>(), vec![jid("j")]);
}
