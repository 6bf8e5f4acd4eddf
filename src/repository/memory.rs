//! In-process store
//!
//! Transactions take the single state mutex for their whole lifetime and work on a
//! private copy of the tables, so they are serializable by construction. Commit
//! swaps the copy in; dropping the transaction discards it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{CirculationStore, CirculationTx};
use crate::{
    error::{AppError, AppResult},
    models::{
        book::Book,
        copy::{BookCopy, CopyDisposition},
        loan::{Loan, LoanStatus, NewLoan},
        reservation::{NewReservation, Reservation, ReservationStatus},
    },
};

#[derive(Debug, Clone, Default)]
struct Tables {
    books: BTreeMap<i32, Book>,
    copies: BTreeMap<i32, BookCopy>,
    loans: BTreeMap<i32, Loan>,
    reservations: BTreeMap<i32, Reservation>,
    last_id: i32,
}

impl Tables {
    fn next_id(&mut self) -> i32 {
        self.last_id += 1;
        self.last_id
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision a book with `copies` available copies labelled `<title>-<n>`
    pub async fn add_book(&self, title: &str, copies: usize) -> (Book, Vec<BookCopy>) {
        let mut tables = self.tables.lock().await;
        let book = Book {
            id: tables.next_id(),
            title: title.to_string(),
            total_copies: copies as i32,
            available_copies: copies as i32,
        };
        tables.books.insert(book.id, book.clone());

        let mut created = Vec::with_capacity(copies);
        for n in 1..=copies {
            let copy = BookCopy {
                id: tables.next_id(),
                book_id: book.id,
                label: format!("{}-{}", title, n),
                disposition: CopyDisposition::Available,
                updated_at: Utc::now(),
            };
            tables.copies.insert(copy.id, copy.clone());
            created.push(copy);
        }
        (book, created)
    }

    pub async fn book(&self, book_id: i32) -> Option<Book> {
        self.tables.lock().await.books.get(&book_id).cloned()
    }

    pub async fn copy(&self, copy_id: i32) -> Option<BookCopy> {
        self.tables.lock().await.copies.get(&copy_id).cloned()
    }

    /// Copies of a book, in id order
    pub async fn copies_of(&self, book_id: i32) -> Vec<BookCopy> {
        self.tables
            .lock()
            .await
            .copies
            .values()
            .filter(|c| c.book_id == book_id)
            .cloned()
            .collect()
    }

    /// Every loan ever stored for a book, including closed ones
    pub async fn loans_for_book(&self, book_id: i32) -> Vec<Loan> {
        self.tables
            .lock()
            .await
            .loans
            .values()
            .filter(|l| l.book_id == book_id)
            .cloned()
            .collect()
    }

    /// Every reservation ever stored for a book, in id order
    pub async fn reservations_for_book(&self, book_id: i32) -> Vec<Reservation> {
        self.tables
            .lock()
            .await
            .reservations
            .values()
            .filter(|r| r.book_id == book_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CirculationStore for MemoryStore {
    async fn begin(&self) -> AppResult<Box<dyn CirculationTx>> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

#[async_trait]
impl CirculationTx for MemoryTx {
    async fn lock_book(&mut self, book_id: i32) -> AppResult<Option<Book>> {
        Ok(self.working.books.get(&book_id).cloned())
    }

    async fn set_cached_available(&mut self, book_id: i32, available: i32) -> AppResult<()> {
        let book = self
            .working
            .books
            .get_mut(&book_id)
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", book_id)))?;
        book.available_copies = available;
        Ok(())
    }

    async fn books_with_active_queue(&mut self) -> AppResult<Vec<i32>> {
        let mut ids: Vec<i32> = self
            .working
            .reservations
            .values()
            .filter(|r| r.is_active())
            .map(|r| r.book_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn get_copy(&mut self, copy_id: i32) -> AppResult<Option<BookCopy>> {
        Ok(self.working.copies.get(&copy_id).cloned())
    }

    async fn copies_for_book(&mut self, book_id: i32) -> AppResult<Vec<BookCopy>> {
        Ok(self
            .working
            .copies
            .values()
            .filter(|c| c.book_id == book_id)
            .cloned()
            .collect())
    }

    async fn transition_copy(
        &mut self,
        copy_id: i32,
        from: &[CopyDisposition],
        to: CopyDisposition,
    ) -> AppResult<bool> {
        match self.working.copies.get_mut(&copy_id) {
            Some(copy) if from.contains(&copy.disposition) => {
                copy.disposition = to;
                copy.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_loan(&mut self, loan_id: i32) -> AppResult<Option<Loan>> {
        Ok(self.working.loans.get(&loan_id).cloned())
    }

    async fn insert_loan(&mut self, new: NewLoan) -> AppResult<Loan> {
        let loan = Loan {
            id: self.working.next_id(),
            user_id: new.user_id,
            book_id: new.book_id,
            copy_id: None,
            origin: new.origin,
            range: new.range,
            status: LoanStatus::Pending,
            due_date: None,
            nb_renews: 0,
            pickup_deadline: None,
            created_at: new.created_at,
            approved_at: None,
            approved_by: None,
            picked_up_at: None,
            renew_date: None,
            returned_at: None,
            rejected_by: None,
            rejection_reason: None,
            closed_at: None,
        };
        self.working.loans.insert(loan.id, loan.clone());
        Ok(loan)
    }

    async fn update_loan(&mut self, loan: &Loan) -> AppResult<()> {
        if loan.status.holds_copy() {
            if let Some(copy_id) = loan.copy_id {
                let taken = self.working.loans.values().any(|other| {
                    other.id != loan.id && other.copy_id == Some(copy_id) && other.status.holds_copy()
                });
                if taken {
                    return Err(AppError::Internal(format!(
                        "Copy {} is already bound to an open loan",
                        copy_id
                    )));
                }
            }
        }
        match self.working.loans.get_mut(&loan.id) {
            Some(slot) => {
                *slot = loan.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(format!("Loan with id {} not found", loan.id))),
        }
    }

    async fn open_loans_for_book(&mut self, book_id: i32) -> AppResult<Vec<Loan>> {
        Ok(self
            .working
            .loans
            .values()
            .filter(|l| l.book_id == book_id && l.status.is_open())
            .cloned()
            .collect())
    }

    async fn open_loans_for_user(&mut self, user_id: i32) -> AppResult<Vec<Loan>> {
        Ok(self
            .working
            .loans
            .values()
            .filter(|l| l.user_id == user_id && l.status.is_open())
            .cloned()
            .collect())
    }

    async fn loans_with_status(&mut self, status: LoanStatus) -> AppResult<Vec<Loan>> {
        Ok(self
            .working
            .loans
            .values()
            .filter(|l| l.status == status)
            .cloned()
            .collect())
    }

    async fn purge_loans(
        &mut self,
        status: LoanStatus,
        closed_before: DateTime<Utc>,
    ) -> AppResult<u64> {
        let before = self.working.loans.len();
        self.working.loans.retain(|_, l| {
            !(l.status == status && l.closed_at.map(|at| at < closed_before).unwrap_or(false))
        });
        Ok((before - self.working.loans.len()) as u64)
    }

    async fn get_reservation(&mut self, reservation_id: i32) -> AppResult<Option<Reservation>> {
        Ok(self.working.reservations.get(&reservation_id).cloned())
    }

    async fn insert_reservation(&mut self, new: NewReservation) -> AppResult<Reservation> {
        let reservation = Reservation {
            id: self.working.next_id(),
            user_id: new.user_id,
            book_id: new.book_id,
            position: new.position,
            range: new.range,
            status: ReservationStatus::Active,
            created_at: new.created_at,
            expires_at: new.expires_at,
            closed_at: None,
            converted_loan_id: None,
        };
        self.working
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> AppResult<()> {
        match self.working.reservations.get_mut(&reservation.id) {
            Some(slot) => {
                *slot = reservation.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(format!(
                "Reservation with id {} not found",
                reservation.id
            ))),
        }
    }

    async fn active_reservations_for_book(&mut self, book_id: i32) -> AppResult<Vec<Reservation>> {
        let mut queue: Vec<Reservation> = self
            .working
            .reservations
            .values()
            .filter(|r| r.book_id == book_id && r.is_active())
            .cloned()
            .collect();
        queue.sort_by_key(|r| (r.position, r.created_at, r.id));
        Ok(queue)
    }

    async fn expired_reservations(&mut self, now: DateTime<Utc>) -> AppResult<Vec<Reservation>> {
        Ok(self
            .working
            .reservations
            .values()
            .filter(|r| r.is_expired(now))
            .cloned()
            .collect())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
