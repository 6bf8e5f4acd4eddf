//! PostgreSQL store
//!
//! Book rows are locked with `SELECT ... FOR UPDATE` before any per-book decision,
//! and copy moves are conditional updates on the current disposition. The partial
//! unique index `loans_one_open_per_copy` backs the one-open-loan-per-copy rule.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Pool, Postgres, Row, Transaction};

use super::{CirculationStore, CirculationTx};
use crate::{
    error::{AppError, AppResult},
    models::{
        book::Book,
        copy::{BookCopy, CopyDisposition},
        date_range::DateRange,
        loan::{Loan, LoanOrigin, LoanStatus, NewLoan},
        reservation::{NewReservation, Reservation, ReservationStatus},
    },
};

const LOAN_COLUMNS: &str = r#"
    id, user_id, book_id, copy_id, origin, origin_reservation_id, start_date, end_date,
    status, due_date, nb_renews, pickup_deadline, created_at, approved_at, approved_by,
    picked_up_at, renew_date, returned_at, rejected_by, rejection_reason, closed_at
"#;

const RESERVATION_COLUMNS: &str = r#"
    id, user_id, book_id, position, start_date, end_date, status, created_at,
    expires_at, closed_at, converted_loan_id
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl CirculationStore for PgStore {
    async fn begin(&self) -> AppResult<Box<dyn CirculationTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

fn decode_err(e: String) -> sqlx::Error {
    sqlx::Error::Decode(e.into())
}

fn loan_from_row(row: &PgRow) -> Result<Loan, sqlx::Error> {
    let origin_kind: String = row.try_get("origin")?;
    let origin = LoanOrigin::from_columns(&origin_kind, row.try_get("origin_reservation_id")?)
        .map_err(decode_err)?;

    Ok(Loan {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        book_id: row.try_get("book_id")?,
        copy_id: row.try_get("copy_id")?,
        origin,
        range: DateRange {
            start: row.try_get("start_date")?,
            end: row.try_get("end_date")?,
        },
        status: row.try_get("status")?,
        due_date: row.try_get("due_date")?,
        nb_renews: row.try_get("nb_renews")?,
        pickup_deadline: row.try_get("pickup_deadline")?,
        created_at: row.try_get("created_at")?,
        approved_at: row.try_get("approved_at")?,
        approved_by: row.try_get("approved_by")?,
        picked_up_at: row.try_get("picked_up_at")?,
        renew_date: row.try_get("renew_date")?,
        returned_at: row.try_get("returned_at")?,
        rejected_by: row.try_get("rejected_by")?,
        rejection_reason: row.try_get("rejection_reason")?,
        closed_at: row.try_get("closed_at")?,
    })
}

fn reservation_from_row(row: &PgRow) -> Result<Reservation, sqlx::Error> {
    Ok(Reservation {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        book_id: row.try_get("book_id")?,
        position: row.try_get("position")?,
        range: DateRange {
            start: row.try_get("start_date")?,
            end: row.try_get("end_date")?,
        },
        status: row.try_get("status")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        closed_at: row.try_get("closed_at")?,
        converted_loan_id: row.try_get("converted_loan_id")?,
    })
}

fn loans_from_rows(rows: Vec<PgRow>) -> AppResult<Vec<Loan>> {
    rows.iter()
        .map(|row| loan_from_row(row).map_err(AppError::from))
        .collect()
}

fn reservations_from_rows(rows: Vec<PgRow>) -> AppResult<Vec<Reservation>> {
    rows.iter()
        .map(|row| reservation_from_row(row).map_err(AppError::from))
        .collect()
}

fn open_statuses() -> Vec<String> {
    LoanStatus::OPEN
        .iter()
        .map(|s| s.as_str().to_string())
        .collect()
}

#[async_trait]
impl CirculationTx for PgTx {
    async fn lock_book(&mut self, book_id: i32) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(
            "SELECT id, title, total_copies, available_copies FROM books WHERE id = $1 FOR UPDATE",
        )
        .bind(book_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(book)
    }

    async fn set_cached_available(&mut self, book_id: i32, available: i32) -> AppResult<()> {
        sqlx::query("UPDATE books SET available_copies = $1 WHERE id = $2")
            .bind(available)
            .bind(book_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn books_with_active_queue(&mut self) -> AppResult<Vec<i32>> {
        let ids = sqlx::query_scalar::<_, i32>(
            "SELECT DISTINCT book_id FROM reservations WHERE status = 'active' ORDER BY book_id",
        )
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(ids)
    }

    async fn get_copy(&mut self, copy_id: i32) -> AppResult<Option<BookCopy>> {
        let copy = sqlx::query_as::<_, BookCopy>(
            "SELECT id, book_id, label, disposition, updated_at FROM copies WHERE id = $1",
        )
        .bind(copy_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(copy)
    }

    async fn copies_for_book(&mut self, book_id: i32) -> AppResult<Vec<BookCopy>> {
        let copies = sqlx::query_as::<_, BookCopy>(
            "SELECT id, book_id, label, disposition, updated_at FROM copies WHERE book_id = $1 ORDER BY id",
        )
        .bind(book_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(copies)
    }

    async fn transition_copy(
        &mut self,
        copy_id: i32,
        from: &[CopyDisposition],
        to: CopyDisposition,
    ) -> AppResult<bool> {
        let from: Vec<String> = from.iter().map(|d| d.as_str().to_string()).collect();
        let result = sqlx::query(
            r#"
            UPDATE copies SET disposition = $1, updated_at = NOW()
            WHERE id = $2 AND disposition = ANY($3)
            "#,
        )
        .bind(to)
        .bind(copy_id)
        .bind(from)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_loan(&mut self, loan_id: i32) -> AppResult<Option<Loan>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM loans WHERE id = $1 FOR UPDATE",
            LOAN_COLUMNS
        ))
        .bind(loan_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.as_ref().map(loan_from_row).transpose()?)
    }

    async fn insert_loan(&mut self, loan: NewLoan) -> AppResult<Loan> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO loans (user_id, book_id, origin, origin_reservation_id,
                               start_date, end_date, status, nb_renews, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', 0, $7)
            RETURNING {}
            "#,
            LOAN_COLUMNS
        ))
        .bind(loan.user_id)
        .bind(loan.book_id)
        .bind(loan.origin.as_str())
        .bind(loan.origin.reservation_id())
        .bind(loan.range.start)
        .bind(loan.range.end)
        .bind(loan.created_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(loan_from_row(&row)?)
    }

    async fn update_loan(&mut self, loan: &Loan) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE loans SET
                copy_id = $1, start_date = $2, end_date = $3, status = $4, due_date = $5,
                nb_renews = $6, pickup_deadline = $7, approved_at = $8, approved_by = $9,
                picked_up_at = $10, renew_date = $11, returned_at = $12, rejected_by = $13,
                rejection_reason = $14, closed_at = $15
            WHERE id = $16
            "#,
        )
        .bind(loan.copy_id)
        .bind(loan.range.start)
        .bind(loan.range.end)
        .bind(loan.status)
        .bind(loan.due_date)
        .bind(loan.nb_renews)
        .bind(loan.pickup_deadline)
        .bind(loan.approved_at)
        .bind(loan.approved_by)
        .bind(loan.picked_up_at)
        .bind(loan.renew_date)
        .bind(loan.returned_at)
        .bind(loan.rejected_by)
        .bind(&loan.rejection_reason)
        .bind(loan.closed_at)
        .bind(loan.id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Loan with id {} not found", loan.id)));
        }
        Ok(())
    }

    async fn open_loans_for_book(&mut self, book_id: i32) -> AppResult<Vec<Loan>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM loans WHERE book_id = $1 AND status = ANY($2) ORDER BY id",
            LOAN_COLUMNS
        ))
        .bind(book_id)
        .bind(open_statuses())
        .fetch_all(&mut *self.tx)
        .await?;
        loans_from_rows(rows)
    }

    async fn open_loans_for_user(&mut self, user_id: i32) -> AppResult<Vec<Loan>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM loans WHERE user_id = $1 AND status = ANY($2) ORDER BY created_at",
            LOAN_COLUMNS
        ))
        .bind(user_id)
        .bind(open_statuses())
        .fetch_all(&mut *self.tx)
        .await?;
        loans_from_rows(rows)
    }

    async fn loans_with_status(&mut self, status: LoanStatus) -> AppResult<Vec<Loan>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM loans WHERE status = $1 ORDER BY id",
            LOAN_COLUMNS
        ))
        .bind(status)
        .fetch_all(&mut *self.tx)
        .await?;
        loans_from_rows(rows)
    }

    async fn purge_loans(
        &mut self,
        status: LoanStatus,
        closed_before: DateTime<Utc>,
    ) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM loans WHERE status = $1 AND closed_at < $2")
            .bind(status)
            .bind(closed_before)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn get_reservation(&mut self, reservation_id: i32) -> AppResult<Option<Reservation>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM reservations WHERE id = $1",
            RESERVATION_COLUMNS
        ))
        .bind(reservation_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.as_ref().map(reservation_from_row).transpose()?)
    }

    async fn insert_reservation(&mut self, reservation: NewReservation) -> AppResult<Reservation> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO reservations (user_id, book_id, position, start_date, end_date,
                                      status, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            RESERVATION_COLUMNS
        ))
        .bind(reservation.user_id)
        .bind(reservation.book_id)
        .bind(reservation.position)
        .bind(reservation.range.start)
        .bind(reservation.range.end)
        .bind(ReservationStatus::Active)
        .bind(reservation.created_at)
        .bind(reservation.expires_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(reservation_from_row(&row)?)
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE reservations SET
                position = $1, start_date = $2, end_date = $3, status = $4,
                expires_at = $5, closed_at = $6, converted_loan_id = $7
            WHERE id = $8
            "#,
        )
        .bind(reservation.position)
        .bind(reservation.range.start)
        .bind(reservation.range.end)
        .bind(reservation.status)
        .bind(reservation.expires_at)
        .bind(reservation.closed_at)
        .bind(reservation.converted_loan_id)
        .bind(reservation.id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Reservation with id {} not found",
                reservation.id
            )));
        }
        Ok(())
    }

    async fn active_reservations_for_book(&mut self, book_id: i32) -> AppResult<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM reservations
            WHERE book_id = $1 AND status = 'active'
            ORDER BY position, created_at, id
            "#,
            RESERVATION_COLUMNS
        ))
        .bind(book_id)
        .fetch_all(&mut *self.tx)
        .await?;
        reservations_from_rows(rows)
    }

    async fn expired_reservations(&mut self, now: DateTime<Utc>) -> AppResult<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM reservations
            WHERE status = 'active' AND expires_at < $1
            ORDER BY book_id, position
            "#,
            RESERVATION_COLUMNS
        ))
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await?;
        reservations_from_rows(rows)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let PgTx { tx } = *self;
        tx.commit().await?;
        Ok(())
    }
}
