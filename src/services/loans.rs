//! Loan state machine
//!
//! `pending -> awaiting_pickup -> active -> overdue -> returned`, with `rejected`
//! and `pickup_expired` as the other terminal statuses. Each transition runs in its
//! own transaction: loan row first, then the book row, then the copy.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::{
    config::CirculationPolicy,
    error::{AppError, AppResult},
    models::{
        copy::CopyDisposition,
        date_range::DateRange,
        event::{EventKind, LifecycleEvent},
        loan::{Loan, LoanOrigin, LoanStatus, NewLoan, RequestOutcome, ReturnCondition},
    },
    repository::CirculationTx,
};

use super::{availability, reservations::ReservationsService, CirculationContext};

/// Pickup deadline for a loan approved at `now` whose window opens on `start`
pub fn pickup_deadline(
    policy: &CirculationPolicy,
    now: DateTime<Utc>,
    start: NaiveDate,
) -> DateTime<Utc> {
    let opens = Utc.from_utc_datetime(&start.and_time(NaiveTime::MIN));
    now.max(opens) + Duration::hours(policy.pickup_window_hours)
}

#[derive(Clone)]
pub struct LoansService {
    ctx: CirculationContext,
    reservations: ReservationsService,
}

impl LoansService {
    pub fn new(ctx: CirculationContext, reservations: ReservationsService) -> Self {
        Self { ctx, reservations }
    }

    pub fn context(&self) -> &CirculationContext {
        &self.ctx
    }

    /// Get a loan by ID. Rejected loans are gone as far as callers are concerned.
    pub async fn get(&self, loan_id: i32) -> AppResult<Loan> {
        let mut tx = self.ctx.begin().await?;
        load(tx.as_mut(), loan_id).await
    }

    /// Open loans of a user
    pub async fn user_loans(&self, user_id: i32) -> AppResult<Vec<Loan>> {
        let mut tx = self.ctx.begin().await?;
        tx.open_loans_for_user(user_id).await
    }

    /// Ask to borrow a book.
    ///
    /// Granted as a `pending` loan when a copy can be guaranteed for the whole window
    /// and nobody is queued ahead; otherwise queued as a reservation.
    pub async fn request(
        &self,
        user_id: i32,
        book_id: i32,
        start: NaiveDate,
        end: Option<NaiveDate>,
        origin: LoanOrigin,
    ) -> AppResult<RequestOutcome> {
        let now = self.ctx.clock.now();
        let today = now.date_naive();
        let range = self.requested_range(start, end, today)?;

        let mut tx = self.ctx.begin().await?;
        tx.lock_book(book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", book_id)))?;

        let holds_loan = tx
            .open_loans_for_user(user_id)
            .await?
            .iter()
            .any(|l| l.book_id == book_id);
        let queue = tx.active_reservations_for_book(book_id).await?;
        if holds_loan || queue.iter().any(|r| r.user_id == user_id) {
            return Err(AppError::DuplicateRequest(format!(
                "User {} already has an open loan or reservation for book {}",
                user_id, book_id
            )));
        }

        let free = availability::has_free_slot(tx.as_mut(), book_id, &range, today, None).await?;
        if !queue.is_empty() || !free {
            let reservation = self
                .reservations
                .enqueue_in(tx.as_mut(), user_id, book_id, range)
                .await?;
            availability::refresh_cached_count(tx.as_mut(), book_id).await?;
            tx.commit().await?;
            return Ok(RequestOutcome::Queued(reservation));
        }

        let loan = tx
            .insert_loan(NewLoan {
                user_id,
                book_id,
                origin,
                range,
                created_at: now,
            })
            .await?;

        tracing::info!(
            loan_id = loan.id,
            book_id,
            user_id,
            origin = origin.as_str(),
            start = %range.start,
            end = %range.end,
            "Loan requested"
        );
        tx.commit().await?;
        Ok(RequestOutcome::Granted(loan))
    }

    /// Bind a copy to a pending loan and open the pickup window
    pub async fn approve(&self, loan_id: i32, staff_id: i32) -> AppResult<Loan> {
        let now = self.ctx.clock.now();
        let mut tx = self.ctx.begin().await?;
        let mut loan = load(tx.as_mut(), loan_id).await?;
        require_status(&loan, &[LoanStatus::Pending], "approved")?;
        tx.lock_book(loan.book_id).await?;

        let copy = availability::bind_copy(tx.as_mut(), loan.book_id)
            .await?
            .ok_or_else(|| {
                AppError::NoCopyAvailable(format!(
                    "No copy of book {} is available for loan {}",
                    loan.book_id, loan_id
                ))
            })?;

        loan.copy_id = Some(copy.id);
        loan.status = LoanStatus::AwaitingPickup;
        loan.approved_at = Some(now);
        loan.approved_by = Some(staff_id);
        loan.pickup_deadline = Some(pickup_deadline(&self.ctx.policy, now, loan.range.start));
        tx.update_loan(&loan).await?;
        availability::refresh_cached_count(tx.as_mut(), loan.book_id).await?;

        tracing::info!(
            loan_id,
            book_id = loan.book_id,
            copy_id = copy.id,
            staff_id,
            "Loan approved"
        );
        let events = vec![LifecycleEvent::for_loan(EventKind::LoanApproved, &loan, now)];
        self.ctx.commit_and_publish(tx, events).await?;
        Ok(loan)
    }

    /// Refuse a pending loan. No copy was bound, availability is unchanged.
    pub async fn reject(
        &self,
        loan_id: i32,
        staff_id: i32,
        reason: Option<String>,
    ) -> AppResult<Loan> {
        let now = self.ctx.clock.now();
        let mut tx = self.ctx.begin().await?;
        let mut loan = load(tx.as_mut(), loan_id).await?;
        require_status(&loan, &[LoanStatus::Pending], "rejected")?;

        loan.status = LoanStatus::Rejected;
        loan.rejected_by = Some(staff_id);
        loan.rejection_reason = reason;
        loan.closed_at = Some(now);
        tx.update_loan(&loan).await?;

        tracing::info!(loan_id, book_id = loan.book_id, staff_id, "Loan rejected");
        let events = vec![LifecycleEvent::for_loan(EventKind::LoanRejected, &loan, now)];
        self.ctx.commit_and_publish(tx, events).await?;
        Ok(loan)
    }

    /// Hand the held copy over to the borrower
    pub async fn confirm_pickup(&self, loan_id: i32) -> AppResult<Loan> {
        let now = self.ctx.clock.now();
        let mut tx = self.ctx.begin().await?;
        let mut loan = load(tx.as_mut(), loan_id).await?;
        require_status(&loan, &[LoanStatus::AwaitingPickup], "picked up")?;

        if loan.is_pickup_expired(now) {
            return Err(AppError::PickupDeadlinePassed(format!(
                "Pickup deadline of loan {} has passed",
                loan_id
            )));
        }
        tx.lock_book(loan.book_id).await?;

        let copy_id = loan
            .copy_id
            .ok_or_else(|| AppError::Internal(format!("Loan {} has no bound copy", loan_id)))?;
        let moved = tx
            .transition_copy(copy_id, &[CopyDisposition::HeldForPickup], CopyDisposition::Loaned)
            .await?;
        if !moved {
            return Err(AppError::Internal(format!(
                "Copy {} of loan {} is not held for pickup",
                copy_id, loan_id
            )));
        }

        loan.status = LoanStatus::Active;
        loan.picked_up_at = Some(now);
        loan.due_date = Some(loan.range.end.max(now.date_naive()));
        tx.update_loan(&loan).await?;

        tracing::info!(loan_id, book_id = loan.book_id, copy_id, due_date = ?loan.due_date, "Loan picked up");
        tx.commit().await?;
        Ok(loan)
    }

    /// Close a loan that is out, releasing its copy and promoting the queue
    pub async fn return_loan(&self, loan_id: i32, condition: ReturnCondition) -> AppResult<Loan> {
        let now = self.ctx.clock.now();
        let mut tx = self.ctx.begin().await?;
        let mut loan = load(tx.as_mut(), loan_id).await?;
        require_status(&loan, &[LoanStatus::Active, LoanStatus::Overdue], "returned")?;
        tx.lock_book(loan.book_id).await?;

        loan.status = LoanStatus::Returned;
        loan.returned_at = Some(now);
        loan.closed_at = Some(now);
        tx.update_loan(&loan).await?;

        let mut events = Vec::new();
        self.free_copy(tx.as_mut(), &loan, condition, now, &mut events)
            .await?;

        tracing::info!(
            loan_id,
            book_id = loan.book_id,
            copy_id = ?loan.copy_id,
            ?condition,
            "Loan returned"
        );
        self.ctx.commit_and_publish(tx, events).await?;
        Ok(loan)
    }

    /// Push the due date back by one renewal period
    pub async fn renew(&self, loan_id: i32) -> AppResult<Loan> {
        let now = self.ctx.clock.now();
        let mut tx = self.ctx.begin().await?;
        let mut loan = load(tx.as_mut(), loan_id).await?;
        require_status(&loan, &[LoanStatus::Active], "renewed")?;

        if loan.nb_renews >= self.ctx.policy.max_renewals {
            return Err(AppError::RenewalLimitExceeded(format!(
                "Loan {} was already renewed {} times",
                loan_id, loan.nb_renews
            )));
        }

        let due = loan.due_date.unwrap_or(loan.range.end);
        let extended = due + Duration::days(self.ctx.policy.renewal_days);
        tx.lock_book(loan.book_id).await?;

        // The extra days must not eat into a window already promised to someone else
        let extension = DateRange::new(due + Duration::days(1), extended)?;
        let today = now.date_naive();
        let free =
            availability::has_free_slot(tx.as_mut(), loan.book_id, &extension, today, Some(loan_id))
                .await?;
        if !free {
            return Err(AppError::NoCopyAvailable(format!(
                "Renewing loan {} would overlap a window already granted for book {}",
                loan_id, loan.book_id
            )));
        }

        loan.due_date = Some(extended);
        loan.nb_renews += 1;
        loan.renew_date = Some(now);
        tx.update_loan(&loan).await?;

        tracing::info!(loan_id, nb_renews = loan.nb_renews, due_date = ?loan.due_date, "Loan renewed");
        tx.commit().await?;
        Ok(loan)
    }

    /// Pending and awaiting-pickup loans whose window has opened
    pub async fn due_for_action(&self) -> AppResult<Vec<Loan>> {
        let today = self.ctx.clock.today();
        let mut tx = self.ctx.begin().await?;
        let mut due = Vec::new();
        for status in [LoanStatus::Pending, LoanStatus::AwaitingPickup] {
            due.extend(
                tx.loans_with_status(status)
                    .await?
                    .into_iter()
                    .filter(|l| !l.is_scheduled(today)),
            );
        }
        Ok(due)
    }

    pub async fn with_status(&self, status: LoanStatus) -> AppResult<Vec<Loan>> {
        let mut tx = self.ctx.begin().await?;
        tx.loans_with_status(status).await
    }

    /// Flag an active loan past its due date. `None` when it no longer qualifies.
    pub async fn mark_overdue(&self, loan_id: i32) -> AppResult<Option<Loan>> {
        let now = self.ctx.clock.now();
        let mut tx = self.ctx.begin().await?;
        let mut loan = load(tx.as_mut(), loan_id).await?;
        if !loan.is_past_due(now.date_naive()) {
            return Ok(None);
        }

        loan.status = LoanStatus::Overdue;
        tx.update_loan(&loan).await?;

        tracing::info!(loan_id, book_id = loan.book_id, due_date = ?loan.due_date, "Loan overdue");
        let events = vec![LifecycleEvent::for_loan(EventKind::LoanOverdue, &loan, now)];
        self.ctx.commit_and_publish(tx, events).await?;
        Ok(Some(loan))
    }

    /// Release the hold of a loan nobody came to collect. `None` when it no longer qualifies.
    pub async fn expire_pickup(&self, loan_id: i32) -> AppResult<Option<Loan>> {
        let now = self.ctx.clock.now();
        let mut tx = self.ctx.begin().await?;
        let mut loan = load(tx.as_mut(), loan_id).await?;
        if !loan.is_pickup_expired(now) {
            return Ok(None);
        }
        tx.lock_book(loan.book_id).await?;

        loan.status = LoanStatus::PickupExpired;
        loan.closed_at = Some(now);
        tx.update_loan(&loan).await?;

        let mut events = vec![LifecycleEvent::for_loan(EventKind::PickupExpired, &loan, now)];
        self.free_copy(tx.as_mut(), &loan, ReturnCondition::Good, now, &mut events)
            .await?;

        tracing::info!(loan_id, book_id = loan.book_id, copy_id = ?loan.copy_id, "Pickup expired");
        self.ctx.commit_and_publish(tx, events).await?;
        Ok(Some(loan))
    }

    /// Delete rejected loans closed before the retention horizon
    pub async fn purge_rejected(&self) -> AppResult<u64> {
        let horizon =
            self.ctx.clock.now() - Duration::days(self.ctx.policy.rejected_retention_days);
        let mut tx = self.ctx.begin().await?;
        let purged = tx.purge_loans(LoanStatus::Rejected, horizon).await?;
        tx.commit().await?;
        Ok(purged)
    }

    /// Release the loan's copy, refresh the cached count and, if the copy is back on
    /// the shelf, promote the book's queue. The loan row must already be closed.
    async fn free_copy(
        &self,
        tx: &mut dyn CirculationTx,
        loan: &Loan,
        condition: ReturnCondition,
        now: DateTime<Utc>,
        events: &mut Vec<LifecycleEvent>,
    ) -> AppResult<()> {
        let released = match loan.copy_id {
            Some(copy_id) => availability::release_copy(tx, copy_id, condition).await?,
            None => None,
        };
        availability::refresh_cached_count(tx, loan.book_id).await?;

        if let Some(copy) = released {
            events.push(LifecycleEvent::copy_available(loan.book_id, copy.id, now));
            self.reservations
                .promote_head_in(tx, loan.book_id, events)
                .await?;
        }
        Ok(())
    }

    fn requested_range(
        &self,
        start: NaiveDate,
        end: Option<NaiveDate>,
        today: NaiveDate,
    ) -> AppResult<DateRange> {
        if start < today {
            return Err(AppError::Validation(format!(
                "Start date {} is in the past",
                start
            )));
        }

        let range = match end {
            Some(end) => DateRange::new(start, end)?,
            None => DateRange::starting_at(start, self.ctx.policy.default_loan_days),
        };

        if range.len_days() > self.ctx.policy.max_loan_days {
            return Err(AppError::Validation(format!(
                "Loan period of {} days exceeds the maximum of {}",
                range.len_days(),
                self.ctx.policy.max_loan_days
            )));
        }
        Ok(range)
    }
}

/// Loan by id, locked; rejected loans read as missing
async fn load(tx: &mut dyn CirculationTx, loan_id: i32) -> AppResult<Loan> {
    tx.get_loan(loan_id)
        .await?
        .filter(|l| l.status != LoanStatus::Rejected)
        .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", loan_id)))
}

fn require_status(loan: &Loan, allowed: &[LoanStatus], action: &str) -> AppResult<()> {
    if allowed.contains(&loan.status) {
        Ok(())
    } else {
        Err(AppError::InvalidTransition(format!(
            "Loan {} is {} and cannot be {}",
            loan.id, loan.status, action
        )))
    }
}
