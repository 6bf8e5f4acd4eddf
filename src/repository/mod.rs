//! Repository layer: transactional access to copies, loans and reservations
//!
//! The engine talks to storage through a unit of work. Every admission decision
//! and every transition happens inside one [`CirculationTx`]: the book row is
//! locked before deciding, current state is re-read, and all writes commit together.
//! Dropping a transaction without calling [`CirculationTx::commit`] rolls it back.
//!
//! Lock order is loan row, then book row. Reservation rows are only written while
//! their book is locked.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::AppResult,
    models::{
        book::Book,
        copy::{BookCopy, CopyDisposition},
        loan::{Loan, LoanStatus, NewLoan},
        reservation::{NewReservation, Reservation},
    },
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Source of transactions
#[async_trait]
pub trait CirculationStore: Send + Sync {
    async fn begin(&self) -> AppResult<Box<dyn CirculationTx>>;

    /// Liveness check for the readiness endpoint
    async fn ping(&self) -> AppResult<()>;
}

/// One unit of work against the circulation tables
#[async_trait]
pub trait CirculationTx: Send {
    // ---- Books ----

    /// Lock the book row for the rest of the transaction.
    /// Serializes every admission and queue mutation on that book.
    async fn lock_book(&mut self, book_id: i32) -> AppResult<Option<Book>>;

    async fn set_cached_available(&mut self, book_id: i32, available: i32) -> AppResult<()>;

    /// Books having at least one active reservation
    async fn books_with_active_queue(&mut self) -> AppResult<Vec<i32>>;

    // ---- Copies ----

    async fn get_copy(&mut self, copy_id: i32) -> AppResult<Option<BookCopy>>;

    /// Copies of a book, ordered by id
    async fn copies_for_book(&mut self, book_id: i32) -> AppResult<Vec<BookCopy>>;

    /// Conditional update: move the copy to `to` only if its disposition is one of `from`.
    /// Returns whether the row changed.
    async fn transition_copy(
        &mut self,
        copy_id: i32,
        from: &[CopyDisposition],
        to: CopyDisposition,
    ) -> AppResult<bool>;

    // ---- Loans ----

    /// Loan by id, locked for update
    async fn get_loan(&mut self, loan_id: i32) -> AppResult<Option<Loan>>;

    async fn insert_loan(&mut self, loan: NewLoan) -> AppResult<Loan>;

    async fn update_loan(&mut self, loan: &Loan) -> AppResult<()>;

    /// Loans on a book in any of [`LoanStatus::OPEN`]
    async fn open_loans_for_book(&mut self, book_id: i32) -> AppResult<Vec<Loan>>;

    /// Open loans of a user, all books
    async fn open_loans_for_user(&mut self, user_id: i32) -> AppResult<Vec<Loan>>;

    async fn loans_with_status(&mut self, status: LoanStatus) -> AppResult<Vec<Loan>>;

    /// Delete loans in `status` closed before `closed_before`; returns the number removed
    async fn purge_loans(
        &mut self,
        status: LoanStatus,
        closed_before: DateTime<Utc>,
    ) -> AppResult<u64>;

    // ---- Reservations ----

    /// Reservation by id. Not locked: reservations only change under their book's lock,
    /// so callers re-read after [`CirculationTx::lock_book`] before deciding anything.
    async fn get_reservation(&mut self, reservation_id: i32) -> AppResult<Option<Reservation>>;

    async fn insert_reservation(&mut self, reservation: NewReservation) -> AppResult<Reservation>;

    async fn update_reservation(&mut self, reservation: &Reservation) -> AppResult<()>;

    /// Active reservations of a book ordered by position, then creation
    async fn active_reservations_for_book(&mut self, book_id: i32) -> AppResult<Vec<Reservation>>;

    /// Active reservations whose expiry deadline is before `now`
    async fn expired_reservations(&mut self, now: DateTime<Utc>) -> AppResult<Vec<Reservation>>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}
