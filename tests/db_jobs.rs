#[allow(dead_code)]
mod helpers;

use std::collections::HashSet;

use sqlx::PgPool;
use uuid::Uuid;

use waypoint::db::{DbContext, JobFilter, NewJob};
use waypoint::error::Error;
use waypoint::models::JobStatus;

fn ctx(pool: PgPool) -> DbContext {
    DbContext::new(pool)
}

// ── create ──────────────────────────────────────────────────────────

#[sqlx::test]
async fn create_fixes_total_places_from_config(pool: PgPool) {
    let db = ctx(pool);
    let job = db
        .jobs()
        .create(NewJob {
            name: "coffee".to_owned(),
            priority: 5,
            config: helpers::make_config(),
        })
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Pending);
    // 1 keyword * depth 5 * 20 * 1 grid point
    assert_eq!(job.total_places, 100);
    assert!(job.worker_id.is_none());
}

// ── claim ───────────────────────────────────────────────────────────

#[sqlx::test]
async fn claim_empty_queue_returns_none(pool: PgPool) {
    let db = ctx(pool);
    assert!(db.jobs().claim("w1").await.unwrap().is_none());
}

#[sqlx::test]
async fn claim_sets_running_worker_and_started_at(pool: PgPool) {
    let db = ctx(pool.clone());
    helpers::insert_worker(&pool, "w1", waypoint::models::WorkerStatus::Idle, None, 0).await;
    let id = helpers::insert_job(&pool, "a", JobStatus::Pending, 0, None, 0).await;

    let job = db.jobs().claim("w1").await.unwrap().expect("job available");
    assert_eq!(job.id, id);
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.worker_id.as_deref(), Some("w1"));
    assert!(job.started_at.is_some());

    // The worker row tracks the claim.
    let (status, current): (waypoint::models::WorkerStatus, Option<Uuid>) =
        sqlx::query_as("SELECT status, current_job_id FROM workers WHERE id = 'w1'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, waypoint::models::WorkerStatus::Busy);
    assert_eq!(current, Some(id));
}

#[sqlx::test]
async fn claim_prefers_priority_then_age(pool: PgPool) {
    let db = ctx(pool.clone());
    helpers::insert_job(&pool, "low", JobStatus::Pending, 1, None, 300).await;
    let high = helpers::insert_job(&pool, "high", JobStatus::Pending, 9, None, 0).await;
    let older_high = helpers::insert_job(&pool, "older-high", JobStatus::Pending, 9, None, 600).await;

    let first = db.jobs().claim("w1").await.unwrap().unwrap();
    assert_eq!(first.id, older_high, "same priority: oldest created_at wins");

    let second = db.jobs().claim("w2").await.unwrap().unwrap();
    assert_eq!(second.id, high);

    let third = db.jobs().claim("w3").await.unwrap().unwrap();
    assert_eq!(third.name, "low");
}

#[sqlx::test]
async fn claim_skips_held_and_terminal_jobs(pool: PgPool) {
    let db = ctx(pool.clone());
    helpers::insert_job(&pool, "running", JobStatus::Running, 50, Some("other"), 0).await;
    helpers::insert_job(&pool, "paused", JobStatus::Paused, 70, Some("other"), 0).await;
    helpers::insert_job(&pool, "done", JobStatus::Completed, 90, None, 0).await;

    assert!(db.jobs().claim("w1").await.unwrap().is_none());
}

#[sqlx::test]
async fn claim_accepts_broker_notified_jobs(pool: PgPool) {
    let db = ctx(pool.clone());
    let queued = helpers::insert_job(&pool, "notified", JobStatus::Queued, 0, None, 0).await;

    // A queued job whose broker consumers never show up is still drainable
    // by a polling worker.
    let claimed = db.jobs().claim("w1").await.unwrap().expect("queued job claimable");
    assert_eq!(claimed.id, queued);
    assert_eq!(claimed.status, JobStatus::Running);
    assert_eq!(claimed.worker_id.as_deref(), Some("w1"));
}

#[sqlx::test]
async fn concurrent_claimers_get_distinct_jobs(pool: PgPool) {
    let job_count = 3;
    let claimer_count = 8;
    for i in 0..job_count {
        helpers::insert_job(&pool, &format!("job-{i}"), JobStatus::Pending, 0, None, 0).await;
    }

    let mut handles = Vec::new();
    for i in 0..claimer_count {
        let db = ctx(pool.clone());
        handles.push(tokio::spawn(async move {
            db.jobs().claim(&format!("w{i}")).await.unwrap()
        }));
    }

    let mut claimed = HashSet::new();
    let mut empty = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Some(job) => {
                assert!(claimed.insert(job.id), "job {} claimed twice", job.id);
            }
            None => empty += 1,
        }
    }
    assert_eq!(claimed.len(), job_count);
    assert_eq!(empty, claimer_count - job_count);
}

#[sqlx::test]
async fn claim_specific_is_exclusive(pool: PgPool) {
    let db = ctx(pool.clone());
    let id = helpers::insert_job(&pool, "a", JobStatus::Queued, 0, None, 0).await;

    let first = db.jobs().claim_specific(id, "w1").await.unwrap();
    assert!(first.is_some());
    let second = db.jobs().claim_specific(id, "w2").await.unwrap();
    assert!(second.is_none(), "redelivered claim must lose");

    let job = db.jobs().get(id).await.unwrap();
    assert_eq!(job.worker_id.as_deref(), Some("w1"));
}

#[sqlx::test]
async fn claim_specific_ignores_terminal_jobs(pool: PgPool) {
    let db = ctx(pool.clone());
    let id = helpers::insert_job(&pool, "a", JobStatus::Cancelled, 0, None, 0).await;
    assert!(db.jobs().claim_specific(id, "w1").await.unwrap().is_none());
}

// ── update_status ───────────────────────────────────────────────────

#[sqlx::test]
async fn forbidden_transitions_are_rejected_unchanged(pool: PgPool) {
    let db = ctx(pool.clone());

    let forbidden = [
        (JobStatus::Pending, JobStatus::Paused),
        (JobStatus::Pending, JobStatus::Completed),
        (JobStatus::Queued, JobStatus::Paused),
        (JobStatus::Queued, JobStatus::Completed),
        (JobStatus::Running, JobStatus::Queued),
        (JobStatus::Paused, JobStatus::Queued),
        (JobStatus::Paused, JobStatus::Completed),
    ];

    for (from, to) in forbidden {
        let id = helpers::insert_job(&pool, "t", from, 0, None, 0).await;
        let err = db.jobs().update_status(id, to).await.unwrap_err();
        assert!(
            matches!(err, Error::InvalidTransition { .. }),
            "{from} -> {to} should be InvalidTransition, got {err:?}"
        );
        let job = db.jobs().get(id).await.unwrap();
        assert_eq!(job.status, from, "{from} -> {to} must persist nothing");
    }
}

#[sqlx::test]
async fn terminal_jobs_reject_every_write(pool: PgPool) {
    let db = ctx(pool.clone());
    for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
        let id = helpers::insert_job(&pool, "t", terminal, 0, None, 0).await;

        let err = db.jobs().update_status(id, JobStatus::Running).await.unwrap_err();
        assert!(matches!(err, Error::Terminal(_)));

        let err = db.jobs().update_progress(id, 10, 0).await.unwrap_err();
        assert!(matches!(err, Error::Terminal(_)));

        let job = db.jobs().get(id).await.unwrap();
        assert_eq!(job.status, terminal);
    }
}

#[sqlx::test]
async fn pause_and_resume_keep_the_worker(pool: PgPool) {
    let db = ctx(pool.clone());
    helpers::insert_worker(&pool, "w1", waypoint::models::WorkerStatus::Busy, None, 0).await;
    let id = helpers::insert_job(&pool, "t", JobStatus::Running, 0, Some("w1"), 0).await;

    let paused = db.jobs().update_status(id, JobStatus::Paused).await.unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert_eq!(paused.worker_id.as_deref(), Some("w1"));

    let resumed = db.jobs().update_status(id, JobStatus::Running).await.unwrap();
    assert_eq!(resumed.worker_id.as_deref(), Some("w1"));
}

#[sqlx::test]
async fn cancelling_clears_the_worker(pool: PgPool) {
    let db = ctx(pool.clone());
    let id = helpers::insert_job(&pool, "t", JobStatus::Running, 0, Some("w1"), 0).await;

    let cancelled = db.jobs().update_status(id, JobStatus::Cancelled).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.worker_id.is_none());
    assert!(cancelled.completed_at.is_some());
}

// ── release ─────────────────────────────────────────────────────────

#[sqlx::test]
async fn release_running_job_returns_it_to_pending(pool: PgPool) {
    let db = ctx(pool.clone());
    helpers::insert_worker(&pool, "w1", waypoint::models::WorkerStatus::Busy, None, 0).await;
    let id = helpers::insert_job(&pool, "t", JobStatus::Running, 0, Some("w1"), 0).await;

    let released = db.jobs().release(id).await.unwrap();
    assert_eq!(released.status, JobStatus::Pending);
    assert!(released.worker_id.is_none());
}

#[sqlx::test]
async fn release_pending_job_is_a_noop(pool: PgPool) {
    let db = ctx(pool.clone());
    let id = helpers::insert_job(&pool, "t", JobStatus::Pending, 0, None, 0).await;
    let job = db.jobs().release(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
}

#[sqlx::test]
async fn release_terminal_job_errors_unchanged(pool: PgPool) {
    let db = ctx(pool.clone());
    let id = helpers::insert_job(&pool, "t", JobStatus::Completed, 0, None, 0).await;
    let err = db.jobs().release(id).await.unwrap_err();
    assert!(matches!(err, Error::Terminal(JobStatus::Completed)));
}

// ── complete / fail ─────────────────────────────────────────────────

#[sqlx::test]
async fn complete_credits_the_worker(pool: PgPool) {
    let db = ctx(pool.clone());
    helpers::insert_worker(&pool, "w1", waypoint::models::WorkerStatus::Busy, None, 0).await;
    let id = helpers::insert_job(&pool, "t", JobStatus::Running, 0, Some("w1"), 0).await;

    let completed = db.jobs().complete(id, "w1", 42).await.unwrap();
    assert_eq!(completed.status, JobStatus::Completed);
    assert_eq!(completed.scraped_places, 42);
    assert!(completed.completed_at.is_some());

    let (jobs_completed, places_scraped): (i32, i64) =
        sqlx::query_as("SELECT jobs_completed, places_scraped FROM workers WHERE id = 'w1'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(jobs_completed, 1);
    assert_eq!(places_scraped, 42);
}

#[sqlx::test]
async fn complete_requires_running(pool: PgPool) {
    let db = ctx(pool.clone());
    let id = helpers::insert_job(&pool, "t", JobStatus::Pending, 0, None, 0).await;
    let err = db.jobs().complete(id, "w1", 0).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

#[sqlx::test]
async fn fail_records_the_message(pool: PgPool) {
    let db = ctx(pool.clone());
    let id = helpers::insert_job(&pool, "t", JobStatus::Running, 0, Some("w1"), 0).await;
    let failed = db.jobs().fail(id, "scraper exploded").await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("scraper exploded"));
    assert!(failed.worker_id.is_none());
}

// ── progress / list / stats / delete ────────────────────────────────

#[sqlx::test]
async fn progress_updates_but_total_is_fixed(pool: PgPool) {
    let db = ctx(pool.clone());
    let id = helpers::insert_job(&pool, "t", JobStatus::Running, 0, Some("w1"), 0).await;

    let job = db.jobs().update_progress(id, 50, 2).await.unwrap();
    assert_eq!(job.scraped_places, 50);
    assert_eq!(job.failed_places, 2);
    assert_eq!(job.total_places, 100);
    assert_eq!(job.progress().percentage, 50.0);
}

#[sqlx::test]
async fn list_filters_by_status(pool: PgPool) {
    let db = ctx(pool.clone());
    helpers::insert_job(&pool, "a", JobStatus::Pending, 0, None, 0).await;
    helpers::insert_job(&pool, "b", JobStatus::Running, 0, Some("w1"), 0).await;
    helpers::insert_job(&pool, "c", JobStatus::Pending, 0, None, 0).await;

    let pending = db
        .jobs()
        .list(&JobFilter {
            status: Some(JobStatus::Pending),
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|j| j.status == JobStatus::Pending));
}

#[sqlx::test]
async fn stats_counts_by_status(pool: PgPool) {
    let db = ctx(pool.clone());
    helpers::insert_job(&pool, "a", JobStatus::Pending, 0, None, 0).await;
    helpers::insert_job(&pool, "b", JobStatus::Pending, 0, None, 0).await;
    helpers::insert_job(&pool, "c", JobStatus::Failed, 0, None, 0).await;

    let stats = db.jobs().stats().await.unwrap();
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.running, 0);
}

#[sqlx::test]
async fn delete_cascades_results(pool: PgPool) {
    let db = ctx(pool.clone());
    let id = helpers::insert_job(&pool, "t", JobStatus::Completed, 0, None, 0).await;
    db.results()
        .create(id, serde_json::json!({"place_id": "x", "name": "X"}))
        .await
        .unwrap();

    db.jobs().delete(id).await.unwrap();

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM results WHERE job_id = $1")
        .bind(id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);

    let err = db.jobs().delete(id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

// ── startup recovery ────────────────────────────────────────────────

#[sqlx::test]
async fn release_orphans_frees_jobs_of_missing_workers(pool: PgPool) {
    let db = ctx(pool.clone());
    helpers::insert_worker(&pool, "alive", waypoint::models::WorkerStatus::Busy, None, 0).await;
    let orphaned = helpers::insert_job(&pool, "orphan", JobStatus::Running, 0, Some("gone"), 0).await;
    let held = helpers::insert_job(&pool, "held", JobStatus::Running, 0, Some("alive"), 0).await;

    let released = db.jobs().release_orphans().await.unwrap();
    assert_eq!(released, 1);

    assert_eq!(db.jobs().get(orphaned).await.unwrap().status, JobStatus::Pending);
    assert_eq!(db.jobs().get(held).await.unwrap().status, JobStatus::Running);
}
