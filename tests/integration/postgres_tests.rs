//! Races for the last copy against a real PostgreSQL database.
//!
//! Needs `DATABASE_URL` (or the default development database); every test seeds a
//! book of its own, so the tests can share one database.

use std::sync::Arc;

use sqlx::{postgres::PgPoolOptions, Pool, Postgres};

use elidune_circulation::{
    clock::{Clock, SystemClock},
    config::{CirculationPolicy, DatabaseConfig},
    error::AppError,
    models::loan::{LoanOrigin, RequestOutcome},
    repository::PgStore,
    services::{notifications::Notifier, CirculationContext, Services},
};

use crate::common::STAFF;

async fn pool() -> Pool<Postgres> {
    let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| DatabaseConfig::default().url);
    PgPoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await
        .expect("Failed to connect to database")
}

async fn services(pool: &Pool<Postgres>) -> Services {
    let store = PgStore::new(pool.clone());
    store.migrate().await.expect("Failed to run migrations");
    Services::new(CirculationContext::new(
        Arc::new(store),
        Arc::new(SystemClock),
        CirculationPolicy::default(),
        Notifier::default(),
    ))
}

/// Insert a book with `copies` available copies; returns the book id and copy ids
async fn seed_book(pool: &Pool<Postgres>, copies: i32) -> (i32, Vec<i32>) {
    let book_id: i32 = sqlx::query_scalar(
        "INSERT INTO books (title, total_copies, available_copies) VALUES ($1, $2, $2) RETURNING id",
    )
    .bind("Dune")
    .bind(copies)
    .fetch_one(pool)
    .await
    .expect("Failed to insert book");

    let mut ids = Vec::new();
    for n in 0..copies {
        let id: i32 = sqlx::query_scalar(
            "INSERT INTO copies (book_id, label) VALUES ($1, $2) RETURNING id",
        )
        .bind(book_id)
        .bind(format!("DUNE-{}", n + 1))
        .fetch_one(pool)
        .await
        .expect("Failed to insert copy");
        ids.push(id);
    }
    (book_id, ids)
}

async fn count_loans(pool: &Pool<Postgres>, book_id: i32, status: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM loans WHERE book_id = $1 AND status = $2")
        .bind(book_id)
        .bind(status)
        .fetch_one(pool)
        .await
        .expect("Failed to count loans")
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_pg_concurrent_approvals_bind_the_last_copy_once() {
    let pool = pool().await;
    let services = services(&pool).await;
    let (book_id, copies) = seed_book(&pool, 1).await;
    let today = SystemClock.today();

    // Disjoint windows, so both requests are granted on the single copy
    let mut granted = Vec::new();
    for (user_id, offset) in [(10, 0), (11, 10)] {
        let start = today + chrono::Duration::days(offset);
        let end = start + chrono::Duration::days(4);
        match services
            .loans
            .request(user_id, book_id, start, Some(end), LoanOrigin::UserRequest)
            .await
            .unwrap()
        {
            RequestOutcome::Granted(loan) => granted.push(loan.id),
            other => panic!("unexpected {:?}", other),
        }
    }

    let (a, b) = tokio::join!(
        services.loans.approve(granted[0], STAFF),
        services.loans.approve(granted[1], STAFF),
    );
    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|r| matches!(r, Err(AppError::NoCopyAvailable(_))))
            .count(),
        1
    );

    assert_eq!(count_loans(&pool, book_id, "awaiting_pickup").await, 1);
    assert_eq!(count_loans(&pool, book_id, "pending").await, 1);

    let disposition: String = sqlx::query_scalar("SELECT disposition FROM copies WHERE id = $1")
        .bind(copies[0])
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(disposition, "held_for_pickup");

    let cached: i32 = sqlx::query_scalar("SELECT available_copies FROM books WHERE id = $1")
        .bind(book_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(cached, 0);
}

#[tokio::test]
#[ignore]
async fn test_pg_concurrent_requests_grant_once_and_queue_the_rest() {
    let pool = pool().await;
    let services = services(&pool).await;
    let (book_id, _) = seed_book(&pool, 1).await;
    let today = SystemClock.today();

    let handles: Vec<_> = (20..25)
        .map(|user_id| {
            let loans = services.loans.clone();
            tokio::spawn(async move {
                loans
                    .request(user_id, book_id, today, None, LoanOrigin::UserRequest)
                    .await
            })
        })
        .collect();

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(outcomes.iter().filter(|o| o.loan().is_some()).count(), 1);
    let mut positions: Vec<i32> = outcomes
        .iter()
        .filter_map(|o| o.reservation())
        .map(|r| r.position)
        .collect();
    positions.sort_unstable();
    assert_eq!(positions, vec![1, 2, 3, 4]);
}

#[tokio::test]
#[ignore]
async fn test_pg_copy_cannot_hold_two_open_loans() {
    let pool = pool().await;
    let services = services(&pool).await;
    let (book_id, copies) = seed_book(&pool, 1).await;
    let today = SystemClock.today();

    let loan = match services
        .loans
        .request(30, book_id, today, None, LoanOrigin::UserRequest)
        .await
        .unwrap()
    {
        RequestOutcome::Granted(loan) => loan,
        other => panic!("unexpected {:?}", other),
    };
    services.loans.approve(loan.id, STAFF).await.unwrap();

    // Bypass the engine: the partial unique index still refuses a second holder
    let result = sqlx::query(
        r#"
        INSERT INTO loans (user_id, book_id, copy_id, origin, start_date, end_date, status)
        VALUES ($1, $2, $3, 'direct_request', $4, $4, 'awaiting_pickup')
        "#,
    )
    .bind(31)
    .bind(book_id)
    .bind(copies[0])
    .bind(today)
    .execute(&pool)
    .await;

    match result {
        Err(sqlx::Error::Database(e)) => {
            assert_eq!(e.constraint(), Some("loans_one_open_per_copy"))
        }
        other => panic!("expected a unique violation, got {:?}", other),
    }
}
