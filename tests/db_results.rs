#[allow(dead_code)]
mod helpers;

use sqlx::PgPool;
use serde_json::json;

use waypoint::db::DbContext;
use waypoint::models::JobStatus;

fn ctx(pool: PgPool) -> DbContext {
    DbContext::new(pool)
}

// ── raw results ─────────────────────────────────────────────────────

#[sqlx::test]
async fn batch_insert_preserves_worker_order(pool: PgPool) {
    let db = ctx(pool.clone());
    let job_id = helpers::insert_job(&pool, "j", JobStatus::Running, 0, Some("w1"), 0).await;

    let payloads: Vec<_> = (0..5)
        .map(|i| json!({"place_id": format!("p{i}"), "name": format!("Place {i}")}))
        .collect();
    let inserted = db.results().create_batch(job_id, &payloads).await.unwrap();
    assert_eq!(inserted, 5);

    let rows = db.results().list_by_job(job_id, 10, 0).await.unwrap();
    let ids: Vec<_> = rows
        .iter()
        .map(|r| r.data["place_id"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(ids, vec!["p0", "p1", "p2", "p3", "p4"]);
}

#[sqlx::test]
async fn empty_batch_is_a_noop(pool: PgPool) {
    let db = ctx(pool.clone());
    let job_id = helpers::insert_job(&pool, "j", JobStatus::Running, 0, None, 0).await;
    assert_eq!(db.results().create_batch(job_id, &[]).await.unwrap(), 0);
    assert_eq!(db.results().count_by_job(job_id).await.unwrap(), 0);
}

#[sqlx::test]
async fn pagination_windows_do_not_overlap(pool: PgPool) {
    let db = ctx(pool.clone());
    let job_id = helpers::insert_job(&pool, "j", JobStatus::Running, 0, None, 0).await;
    let payloads: Vec<_> = (0..7).map(|i| json!({"place_id": format!("p{i}")})).collect();
    db.results().create_batch(job_id, &payloads).await.unwrap();

    let first = db.results().list_by_job(job_id, 3, 0).await.unwrap();
    let second = db.results().list_by_job(job_id, 3, 3).await.unwrap();
    let third = db.results().list_by_job(job_id, 3, 6).await.unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(second.len(), 3);
    assert_eq!(third.len(), 1);
    assert_eq!(first[0].data["place_id"], "p0");
    assert_eq!(second[0].data["place_id"], "p3");
    assert_eq!(third[0].data["place_id"], "p6");
}

#[sqlx::test]
async fn stream_yields_each_result_once_in_order(pool: PgPool) {
    let db = ctx(pool.clone());
    let job_id = helpers::insert_job(&pool, "j", JobStatus::Running, 0, None, 0).await;
    let payloads: Vec<_> = (0..4).map(|i| json!({"place_id": format!("p{i}")})).collect();
    db.results().create_batch(job_id, &payloads).await.unwrap();

    let mut seen = Vec::new();
    let count = db
        .results()
        .stream_by_job(job_id, |row| {
            seen.push(row.data["place_id"].as_str().unwrap().to_owned());
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(count, 4);
    assert_eq!(seen, vec!["p0", "p1", "p2", "p3"]);
}

// ── normalized projection ───────────────────────────────────────────

#[sqlx::test]
async fn insert_projects_into_business_listings(pool: PgPool) {
    let db = ctx(pool.clone());
    let job_id = helpers::insert_job(&pool, "j", JobStatus::Running, 0, None, 0).await;

    db.results()
        .create(
            job_id,
            json!({
                "place_id": "ChIJabc123",
                "name": "Kopi Corner",
                "address": "Jl. Sudirman 1",
                "phone": "+62-21-555",
                "website": "https://kopi.example",
                "latitude": -6.2,
                "longitude": 106.8,
                "rating": 4.6,
                "review_count": 213,
                "emails": ["HELLO@kopi.example", "owner@kopi.example"],
            }),
        )
        .await
        .unwrap();

    let (name, address): (String, Option<String>) = sqlx::query_as(
        "SELECT name, address FROM business_listings WHERE place_id = 'ChIJabc123'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(name, "Kopi Corner");
    assert_eq!(address.as_deref(), Some("Jl. Sudirman 1"));

    // Emails are lowercased, deduplicated, and linked.
    let (email_count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM business_emails be
         JOIN business_listings bl ON bl.id = be.listing_id
         WHERE bl.place_id = 'ChIJabc123'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(email_count, 2);

    let (status,): (String,) =
        sqlx::query_as("SELECT validation_status FROM emails WHERE address = 'hello@kopi.example'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "unverified");
}

#[sqlx::test]
async fn duplicate_place_ids_upsert_one_listing(pool: PgPool) {
    let db = ctx(pool.clone());
    let job_id = helpers::insert_job(&pool, "j", JobStatus::Running, 0, None, 0).await;

    db.results()
        .create(job_id, json!({"place_id": "dup", "name": "First", "phone": "111"}))
        .await
        .unwrap();
    db.results()
        .create(job_id, json!({"place_id": "dup", "name": "Second"}))
        .await
        .unwrap();

    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM business_listings WHERE place_id = 'dup'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(count, 1);

    // Latest name wins; missing fields keep the previous value.
    let (name, phone): (String, Option<String>) =
        sqlx::query_as("SELECT name, phone FROM business_listings WHERE place_id = 'dup'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(name, "Second");
    assert_eq!(phone.as_deref(), Some("111"));

    // Raw results stay append-only.
    assert_eq!(db.results().count_by_job(job_id).await.unwrap(), 2);
}

#[sqlx::test]
async fn payloads_without_place_id_skip_the_projection(pool: PgPool) {
    let db = ctx(pool.clone());
    let job_id = helpers::insert_job(&pool, "j", JobStatus::Running, 0, None, 0).await;

    db.results()
        .create(job_id, json!({"name": "anonymous place"}))
        .await
        .unwrap();

    let (listings,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM business_listings")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(listings, 0);
    assert_eq!(db.results().count_by_job(job_id).await.unwrap(), 1);
}
