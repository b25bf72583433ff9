//! Cron Runner - drives schedule triggers
//!
//! This binary runs as a daemon:
//! - schedule-tick: every minute at :00, fires `schedule` automations of all
//!   registered workspaces whose cron matches the current minute
//! - purge-expired: daily at 03:15, deletes entities past their retention
//!   (Postgres only; the in-memory store hides expired entries on read)
//!
//! Environment variables: see `EngineConfig::from_env`.

use chrono::{DurationRound, TimeDelta, Utc};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};

use automation_core::config::EngineConfig;
use automation_core::runtime::Runtime;
use automation_core::services::AutomationEngine;
use automation_core::store::PgEntityStore;

#[tokio::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = match EngineConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            log::error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let runtime = match Runtime::build(&config).await {
        Ok(r) => r,
        Err(e) => {
            log::error!("Failed to start engine: {}", e);
            std::process::exit(1);
        }
    };

    log::info!("Starting automation cron scheduler...");

    let _sched = match run_scheduler(runtime.engine, runtime.pg_store).await {
        Ok(sched) => sched,
        Err(e) => {
            log::error!("Scheduler error: {}", e);
            std::process::exit(1);
        }
    };

    // Keep the process running
    loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(3600)).await;
    }
}

async fn run_scheduler(
    engine: AutomationEngine,
    pg_store: Option<Arc<PgEntityStore>>,
) -> Result<JobScheduler, tokio_cron_scheduler::JobSchedulerError> {
    let sched = JobScheduler::new().await?;

    // Cron: "0 * * * * *" = second 0 of every minute
    let tick_job = Job::new_async("0 * * * * *", move |_uuid, _l| {
        let engine = engine.clone();
        Box::pin(async move {
            schedule_tick(engine).await;
        })
    })?;
    sched.add(tick_job).await?;

    if let Some(store) = pg_store {
        // Cron: "0 15 3 * * *" = 03:15:00 every day
        let purge_job = Job::new_async("0 15 3 * * *", move |_uuid, _l| {
            let store = store.clone();
            Box::pin(async move {
                match store.purge_expired().await {
                    Ok(count) => log::info!("Purged {} expired entities", count),
                    Err(e) => log::error!("Failed to purge expired entities: {}", e),
                }
            })
        })?;
        sched.add(purge_job).await?;
        log::info!("  - purge-expired: daily at 03:15");
    }

    sched.start().await?;

    log::info!("Cron scheduler running. Jobs scheduled:");
    log::info!("  - schedule-tick: every minute at :00");

    Ok(sched)
}

/// Evaluate schedule automations for the current minute
async fn schedule_tick(engine: AutomationEngine) {
    let now = Utc::now();
    let minute = now.duration_trunc(TimeDelta::minutes(1)).unwrap_or(now);

    let runs = engine.handle_schedule_tick(minute).await;
    if runs.is_empty() {
        log::debug!("Schedule tick {}: nothing to run", minute);
        return;
    }

    let failed = runs
        .iter()
        .filter(|r| r.results.iter().any(|result| result.is_failure()))
        .count();
    log::info!(
        "Schedule tick {}: {} automations fired, {} with failed actions",
        minute,
        runs.len(),
        failed
    );
}
