//! Reservation queue
//!
//! One FIFO queue per book. Active reservations hold positions `1..=N` with no gaps;
//! every mutation of a queue renumbers it from the stored order instead of shifting
//! individual positions.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::{
    config::PromotionPolicy,
    error::{AppError, AppResult},
    models::{
        date_range::DateRange,
        event::{EventKind, LifecycleEvent},
        loan::{Loan, LoanOrigin, LoanStatus, NewLoan},
        reservation::{NewReservation, Reservation, ReservationStatus},
    },
    repository::CirculationTx,
};

use super::{availability, loans::pickup_deadline, CirculationContext};

/// What promotion does with a queued reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fit {
    Promote(DateRange),
    Skip,
    Expire,
}

#[derive(Clone)]
pub struct ReservationsService {
    ctx: CirculationContext,
}

impl ReservationsService {
    pub fn new(ctx: CirculationContext) -> Self {
        Self { ctx }
    }

    pub async fn get(&self, reservation_id: i32) -> AppResult<Reservation> {
        let mut tx = self.ctx.begin().await?;
        tx.get_reservation(reservation_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("Reservation with id {} not found", reservation_id))
        })
    }

    /// Active queue of a book, head first
    pub async fn queue(&self, book_id: i32) -> AppResult<Vec<Reservation>> {
        let mut tx = self.ctx.begin().await?;
        tx.lock_book(book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", book_id)))?;
        tx.active_reservations_for_book(book_id).await
    }

    /// Active reservations past their expiry deadline, all books
    pub async fn expired(&self) -> AppResult<Vec<Reservation>> {
        let now = self.ctx.clock.now();
        let mut tx = self.ctx.begin().await?;
        tx.expired_reservations(now).await
    }

    /// Books with a non-empty queue
    pub async fn queued_books(&self) -> AppResult<Vec<i32>> {
        let mut tx = self.ctx.begin().await?;
        tx.books_with_active_queue().await
    }

    /// Append a reservation at the tail of the book's queue. The book must be locked.
    pub async fn enqueue_in(
        &self,
        tx: &mut dyn CirculationTx,
        user_id: i32,
        book_id: i32,
        range: DateRange,
    ) -> AppResult<Reservation> {
        let now = self.ctx.clock.now();
        let position = tx
            .active_reservations_for_book(book_id)
            .await?
            .iter()
            .map(|r| r.position)
            .max()
            .unwrap_or(0)
            + 1;

        let reservation = tx
            .insert_reservation(NewReservation {
                user_id,
                book_id,
                position,
                range,
                created_at: now,
                expires_at: now + Duration::days(self.ctx.policy.reservation_ttl_days),
            })
            .await?;

        tracing::info!(
            reservation_id = reservation.id,
            book_id,
            user_id,
            position,
            "Request queued"
        );
        Ok(reservation)
    }

    /// Cancel an active reservation and close the gap it leaves
    pub async fn cancel(&self, reservation_id: i32) -> AppResult<Reservation> {
        let mut tx = self.ctx.begin().await?;
        let book_id = self.book_of(tx.as_mut(), reservation_id).await?;
        tx.lock_book(book_id).await?;

        let mut reservation = self.reload(tx.as_mut(), reservation_id).await?;
        if !reservation.is_active() {
            return Err(AppError::InvalidTransition(format!(
                "Reservation {} is {}, only active reservations can be cancelled",
                reservation_id, reservation.status
            )));
        }

        reservation.status = ReservationStatus::Cancelled;
        reservation.closed_at = Some(self.ctx.clock.now());
        tx.update_reservation(&reservation).await?;
        self.renumber_queue_in(tx.as_mut(), book_id).await?;

        tracing::info!(reservation_id, book_id, position = reservation.position, "Reservation cancelled");
        tx.commit().await?;
        Ok(reservation)
    }

    /// Expire a reservation whose deadline has passed.
    ///
    /// Returns `None` when it is no longer active or not yet expired.
    pub async fn expire(&self, reservation_id: i32) -> AppResult<Option<Reservation>> {
        let now = self.ctx.clock.now();
        let mut tx = self.ctx.begin().await?;
        let book_id = self.book_of(tx.as_mut(), reservation_id).await?;
        tx.lock_book(book_id).await?;

        let mut reservation = self.reload(tx.as_mut(), reservation_id).await?;
        if !reservation.is_expired(now) {
            return Ok(None);
        }

        reservation.status = ReservationStatus::Expired;
        reservation.closed_at = Some(now);
        tx.update_reservation(&reservation).await?;
        self.renumber_queue_in(tx.as_mut(), book_id).await?;

        tracing::info!(reservation_id, book_id, "Reservation expired");
        let events = vec![LifecycleEvent::for_reservation(
            EventKind::ReservationExpired,
            &reservation,
            now,
        )];
        self.ctx.commit_and_publish(tx, events).await?;
        Ok(Some(reservation))
    }

    /// Promote the head of the book's queue in a transaction of its own.
    /// Returns the number of reservations converted into loans.
    pub async fn promote_head(&self, book_id: i32, notify_skips: bool) -> AppResult<usize> {
        let mut tx = self.ctx.begin().await?;
        tx.lock_book(book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", book_id)))?;

        let mut events = Vec::new();
        let promoted = self
            .promote_in(tx.as_mut(), book_id, notify_skips, &mut events)
            .await?;
        self.ctx.commit_and_publish(tx, events).await?;
        Ok(promoted)
    }

    /// Promotion after a copy was freed, inside the caller's transaction.
    /// The book must be locked.
    pub async fn promote_head_in(
        &self,
        tx: &mut dyn CirculationTx,
        book_id: i32,
        events: &mut Vec<LifecycleEvent>,
    ) -> AppResult<usize> {
        self.promote_in(tx, book_id, true, events).await
    }

    /// Convert queued reservations into loans while copies are available.
    ///
    /// The queue is read inside the transaction, after the book lock, so a reservation
    /// cancelled concurrently is seen as cancelled and never converted. A head whose
    /// window no copy can cover, open loans counted, stops the pass.
    async fn promote_in(
        &self,
        tx: &mut dyn CirculationTx,
        book_id: i32,
        notify_skips: bool,
        events: &mut Vec<LifecycleEvent>,
    ) -> AppResult<usize> {
        let now = self.ctx.clock.now();
        let today = now.date_naive();

        let mut capacity = availability::available_count(tx, book_id).await?;
        if capacity <= 0 {
            return Ok(0);
        }

        let queue = tx.active_reservations_for_book(book_id).await?;
        let mut promoted = 0;
        let mut queue_changed = false;

        for mut reservation in queue {
            if capacity <= 0 {
                break;
            }
            if !reservation.is_active() {
                continue;
            }

            match self.fit(&reservation, today) {
                Fit::Promote(range) => {
                    // Loans already granted keep their copy; the queue waits behind them
                    if !availability::has_free_slot(tx, book_id, &range, today, None).await? {
                        tracing::debug!(
                            reservation_id = reservation.id,
                            book_id,
                            "Window already committed to granted loans, promotion stops"
                        );
                        break;
                    }
                    let loan = self
                        .convert_in(tx, &mut reservation, range, now, events)
                        .await?;
                    tracing::info!(
                        reservation_id = reservation.id,
                        loan_id = loan.id,
                        book_id,
                        status = %loan.status,
                        "Reservation promoted"
                    );
                    promoted += 1;
                    capacity -= 1;
                    queue_changed = true;
                }
                Fit::Skip => {
                    tracing::debug!(
                        reservation_id = reservation.id,
                        book_id,
                        start = %reservation.range.start,
                        "Reservation window not started, passed over"
                    );
                    if notify_skips {
                        events.push(LifecycleEvent::for_reservation(
                            EventKind::ReservationSkipped,
                            &reservation,
                            now,
                        ));
                    }
                }
                Fit::Expire => {
                    reservation.status = ReservationStatus::Expired;
                    reservation.closed_at = Some(now);
                    tx.update_reservation(&reservation).await?;
                    events.push(LifecycleEvent::for_reservation(
                        EventKind::ReservationExpired,
                        &reservation,
                        now,
                    ));
                    queue_changed = true;
                }
            }
        }

        if queue_changed {
            self.renumber_queue_in(tx, book_id).await?;
        }
        availability::refresh_cached_count(tx, book_id).await?;
        Ok(promoted)
    }

    fn fit(&self, reservation: &Reservation, today: NaiveDate) -> Fit {
        let range = reservation.range;
        if range.contains(today) {
            return Fit::Promote(range);
        }
        match self.ctx.policy.promotion_policy {
            PromotionPolicy::AdjustDates => Fit::Promote(range.shifted_to(today)),
            PromotionPolicy::SkipAndNotify if range.start > today => Fit::Skip,
            PromotionPolicy::SkipAndNotify => Fit::Expire,
        }
    }

    /// Create the loan for a promoted reservation, bypassing the duplicate check
    async fn convert_in(
        &self,
        tx: &mut dyn CirculationTx,
        reservation: &mut Reservation,
        range: DateRange,
        now: DateTime<Utc>,
        events: &mut Vec<LifecycleEvent>,
    ) -> AppResult<Loan> {
        let mut loan = tx
            .insert_loan(NewLoan {
                user_id: reservation.user_id,
                book_id: reservation.book_id,
                origin: LoanOrigin::PromotedFromReservation {
                    reservation_id: reservation.id,
                },
                range,
                created_at: now,
            })
            .await?;

        reservation.status = ReservationStatus::Converted;
        reservation.closed_at = Some(now);
        reservation.converted_loan_id = Some(loan.id);
        tx.update_reservation(reservation).await?;
        events.push(LifecycleEvent::for_reservation(
            EventKind::ReservationPromoted,
            reservation,
            now,
        ));

        if self.ctx.policy.auto_approve_promotions {
            match availability::bind_copy(tx, loan.book_id).await? {
                Some(copy) => {
                    loan.copy_id = Some(copy.id);
                    loan.status = LoanStatus::AwaitingPickup;
                    loan.approved_at = Some(now);
                    loan.pickup_deadline =
                        Some(pickup_deadline(&self.ctx.policy, now, loan.range.start));
                    tx.update_loan(&loan).await?;
                    events.push(LifecycleEvent::for_loan(EventKind::LoanApproved, &loan, now));
                }
                None => {
                    tracing::warn!(
                        loan_id = loan.id,
                        book_id = loan.book_id,
                        "No copy left for promoted loan, left pending"
                    );
                }
            }
        }

        Ok(loan)
    }

    /// Renumber active reservations `1..=N` in queue order
    pub async fn renumber_queue_in(&self, tx: &mut dyn CirculationTx, book_id: i32) -> AppResult<()> {
        let queue = tx.active_reservations_for_book(book_id).await?;
        for (idx, mut reservation) in queue.into_iter().enumerate() {
            let position = idx as i32 + 1;
            if reservation.position != position {
                reservation.position = position;
                tx.update_reservation(&reservation).await?;
            }
        }
        Ok(())
    }

    async fn book_of(&self, tx: &mut dyn CirculationTx, reservation_id: i32) -> AppResult<i32> {
        Ok(self.reload(tx, reservation_id).await?.book_id)
    }

    async fn reload(
        &self,
        tx: &mut dyn CirculationTx,
        reservation_id: i32,
    ) -> AppResult<Reservation> {
        tx.get_reservation(reservation_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("Reservation with id {} not found", reservation_id))
        })
    }
}
