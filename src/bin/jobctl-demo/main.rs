mod args;

use std::process::ExitCode;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use tracing::{info, instrument, warn, Level};

use crate::args::Args;
use jobqueue_engine::engine::PutOptions;
use jobqueue_engine::Engine;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.debug {
        tracing_subscriber::fmt().with_max_level(Level::TRACE).init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    match run_scenario(&args.queue).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "demo scenario failed");
            ExitCode::FAILURE
        },
    }
}

/// Walks a scripted sequence of verbs across resource gating, scheduling,
/// and dependency admission, logging each decision the engine makes. Stands
/// in for a real client/worker pair, which stay out of this crate's scope.
#[instrument(skip_all, fields(%queue))]
async fn run_scenario(queue: &str) -> Result<()> {
    let engine = Engine::new();

    resource_scenario(&engine, queue).await.context("resource scenario")?;
    dependency_scenario(&engine, queue).await.context("dependency scenario")?;
    schedule_scenario(&engine, queue).await.context("schedule scenario")?;

    let stats = engine.queue_stats(queue).await;
    info!(
        waiting = stats.waiting,
        scheduled = stats.scheduled,
        depends = stats.depends,
        running = stats.running,
        "final queue state"
    );
    Ok(())
}

/// A single-slot resource gates two jobs; the second only runs once the
/// first completes and releases its lock.
async fn resource_scenario(engine: &Engine, queue: &str) -> Result<()> {
    engine.resource_set("gpu", 1).await;

    engine
        .put(0, queue, "job-1", "render", Bytes::new(), 0, PutOptions {
            resources: vec!["gpu".into()],
            ..Default::default()
        })
        .await?;
    engine
        .put(0, queue, "job-2", "render", Bytes::new(), 0, PutOptions {
            resources: vec!["gpu".into()],
            ..Default::default()
        })
        .await?;

    let popped = engine.pop(1, queue, "worker-a", 10).await?;
    info!(jids = ?popped.iter().map(|j| j.jid.to_string()).collect::<Vec<_>>(), "popped with gpu free");

    let blocked = engine.pop(1, queue, "worker-b", 10).await?;
    if !blocked.is_empty() {
        warn!("expected job-2 to be blocked on the gpu resource");
    }

    engine.complete(2, "job-1", "worker-a", queue, Bytes::new(), Default::default()).await?;
    let promoted = engine.pop(2, queue, "worker-b", 10).await?;
    info!(jids = ?promoted.iter().map(|j| j.jid.to_string()).collect::<Vec<_>>(), "popped after release");
    engine.complete(3, "job-2", "worker-b", queue, Bytes::new(), Default::default()).await?;
    Ok(())
}

/// `job-b` depends on `job-a`; it only becomes poppable once `job-a`
/// completes.
async fn dependency_scenario(engine: &Engine, queue: &str) -> Result<()> {
    engine.put(0, queue, "job-a", "step", Bytes::new(), 0, PutOptions::default()).await?;
    engine
        .put(0, queue, "job-b", "step", Bytes::new(), 0, PutOptions {
            depends: vec!["job-a".into()],
            ..Default::default()
        })
        .await?;

    let popped = engine.pop(0, queue, "worker-a", 10).await?;
    info!(jids = ?popped.iter().map(|j| j.jid.to_string()).collect::<Vec<_>>(), "only the dependency is poppable");

    engine.complete(1, "job-a", "worker-a", queue, Bytes::new(), Default::default()).await?;
    let popped = engine.pop(1, queue, "worker-a", 10).await?;
    info!(jids = ?popped.iter().map(|j| j.jid.to_string()).collect::<Vec<_>>(), "dependent released");
    engine.complete(2, "job-b", "worker-a", queue, Bytes::new(), Default::default()).await?;
    Ok(())
}

/// A delayed job sits in `scheduled` until its ready time elapses.
async fn schedule_scenario(engine: &Engine, queue: &str) -> Result<()> {
    engine.put(0, queue, "job-delayed", "step", Bytes::new(), 5, PutOptions::default()).await?;

    let popped = engine.pop(3, queue, "worker-a", 10).await?;
    if !popped.is_empty() {
        warn!("expected the delayed job to still be scheduled at now=3");
    }

    let popped = engine.pop(5, queue, "worker-a", 10).await?;
    info!(jids = ?popped.iter().map(|j| j.jid.to_string()).collect::<Vec<_>>(), "delayed job became due");
    engine.complete(6, "job-delayed", "worker-a", queue, Bytes::new(), Default::default()).await?;
    Ok(())
}
