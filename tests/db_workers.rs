#[allow(dead_code)]
mod helpers;

use std::time::Duration;

use sqlx::PgPool;

use waypoint::db::DbContext;
use waypoint::error::Error;
use waypoint::models::{JobStatus, WorkerStatus};
use waypoint::monitor::HeartbeatMonitor;

fn ctx(pool: PgPool) -> DbContext {
    DbContext::new(pool)
}

const TIMEOUT: Duration = Duration::from_secs(30);
const RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

// ── register / heartbeat ────────────────────────────────────────────

#[sqlx::test]
async fn register_generates_an_id_when_absent(pool: PgPool) {
    let db = ctx(pool);
    let worker = db.workers().register(None, "host-a").await.unwrap();
    assert!(worker.id.starts_with("worker-"));
    assert_eq!(worker.status, WorkerStatus::Idle);
    assert_eq!(worker.hostname, "host-a");
}

#[sqlx::test]
async fn register_is_idempotent_per_id(pool: PgPool) {
    let db = ctx(pool);
    let first = db
        .workers()
        .register(Some("w1".to_owned()), "host-a")
        .await
        .unwrap();
    let again = db
        .workers()
        .register(Some("w1".to_owned()), "host-b")
        .await
        .unwrap();
    assert_eq!(first.id, again.id);
    assert_eq!(again.hostname, "host-b");
    assert_eq!(db.workers().list().await.unwrap().len(), 1);
}

#[sqlx::test]
async fn heartbeat_overwrites_previous_state(pool: PgPool) {
    let db = ctx(pool.clone());
    helpers::insert_worker(&pool, "w1", WorkerStatus::Idle, None, 120).await;

    let job_id = helpers::insert_job(&pool, "j", JobStatus::Running, 0, Some("w1"), 0).await;
    db.workers()
        .heartbeat("w1", "host-a", WorkerStatus::Busy, Some(job_id))
        .await
        .unwrap();

    let worker = db.workers().get("w1").await.unwrap();
    assert_eq!(worker.status, WorkerStatus::Busy);
    assert_eq!(worker.current_job_id, Some(job_id));
    assert!(
        (chrono::Utc::now() - worker.last_heartbeat).num_seconds() < 5,
        "heartbeat timestamp should be fresh"
    );
}

#[sqlx::test]
async fn heartbeat_for_unknown_worker_is_not_found(pool: PgPool) {
    let db = ctx(pool);
    let err = db
        .workers()
        .heartbeat("ghost", "host", WorkerStatus::Idle, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

// ── staleness ───────────────────────────────────────────────────────

#[sqlx::test]
async fn stale_workers_go_offline_and_report_their_job(pool: PgPool) {
    let db = ctx(pool.clone());
    let job_id = helpers::insert_job(&pool, "j", JobStatus::Running, 0, Some("stale"), 0).await;
    helpers::insert_worker(&pool, "stale", WorkerStatus::Busy, Some(job_id), 60).await;
    helpers::insert_worker(&pool, "fresh", WorkerStatus::Idle, None, 1).await;

    let stale = db.workers().mark_stale_offline(TIMEOUT).await.unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].0, "stale");
    assert_eq!(stale[0].1, Some(job_id));

    assert_eq!(db.workers().get("stale").await.unwrap().status, WorkerStatus::Offline);
    assert_eq!(db.workers().get("fresh").await.unwrap().status, WorkerStatus::Idle);

    // Idempotent: the second sweep finds nothing new.
    assert!(db.workers().mark_stale_offline(TIMEOUT).await.unwrap().is_empty());
}

#[sqlx::test]
async fn monitor_tick_recovers_the_orphaned_job(pool: PgPool) {
    let db = ctx(pool.clone());
    let job_id = helpers::insert_job(&pool, "j", JobStatus::Running, 0, Some("stale"), 0).await;
    helpers::insert_worker(&pool, "stale", WorkerStatus::Busy, Some(job_id), 60).await;

    let monitor = HeartbeatMonitor::new(db.clone(), Duration::from_secs(10), TIMEOUT, RETENTION);
    monitor.tick().await;

    let job = db.jobs().get(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending, "job must be back in the queue");
    assert!(job.worker_id.is_none());
    assert_eq!(db.workers().get("stale").await.unwrap().status, WorkerStatus::Offline);

    // A second tick changes nothing.
    monitor.tick().await;
    assert_eq!(db.jobs().get(job_id).await.unwrap().status, JobStatus::Pending);
}

#[sqlx::test]
async fn recovered_job_is_claimable_by_another_worker(pool: PgPool) {
    let db = ctx(pool.clone());
    let job_id = helpers::insert_job(&pool, "j", JobStatus::Running, 0, Some("w1"), 0).await;
    helpers::insert_worker(&pool, "w1", WorkerStatus::Busy, Some(job_id), 60).await;
    helpers::insert_worker(&pool, "w2", WorkerStatus::Idle, None, 1).await;

    // w2 sees nothing while w1 nominally holds the job.
    assert!(db.jobs().claim("w2").await.unwrap().is_none());

    let monitor = HeartbeatMonitor::new(db.clone(), Duration::from_secs(10), TIMEOUT, RETENTION);
    monitor.tick().await;

    let reclaimed = db.jobs().claim("w2").await.unwrap().expect("job recovered");
    assert_eq!(reclaimed.id, job_id);
    assert_eq!(reclaimed.worker_id.as_deref(), Some("w2"));
}

// ── retention / unregister ──────────────────────────────────────────

#[sqlx::test]
async fn long_offline_workers_are_garbage_collected(pool: PgPool) {
    let db = ctx(pool.clone());
    helpers::insert_worker(&pool, "ancient", WorkerStatus::Offline, None, 2 * 24 * 60 * 60).await;
    helpers::insert_worker(&pool, "recent", WorkerStatus::Offline, None, 60).await;

    let removed = db.workers().gc_offline(RETENTION).await.unwrap();
    assert_eq!(removed, 1);
    assert!(matches!(
        db.workers().get("ancient").await.unwrap_err(),
        Error::NotFound { .. }
    ));
    assert!(db.workers().get("recent").await.is_ok());
}

#[sqlx::test]
async fn delete_removes_the_worker(pool: PgPool) {
    let db = ctx(pool.clone());
    helpers::insert_worker(&pool, "w1", WorkerStatus::Idle, None, 0).await;
    db.workers().delete("w1").await.unwrap();
    assert!(matches!(
        db.workers().delete("w1").await.unwrap_err(),
        Error::NotFound { .. }
    ));
}
