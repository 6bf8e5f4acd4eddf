//! Copy registry and availability calculator
//!
//! Availability is always derived from copy and loan rows read inside the caller's
//! transaction. The count stored on the book row is rewritten from that derivation
//! after every mutation and is never read back for a decision.

use chrono::NaiveDate;
use std::collections::HashSet;

use crate::{
    error::{AppError, AppResult},
    models::{
        book::BookAvailability,
        copy::{BookCopy, CopyDisposition},
        date_range::DateRange,
        event::LifecycleEvent,
        loan::ReturnCondition,
    },
    repository::CirculationTx,
};

use super::{reservations::ReservationsService, CirculationContext};

/// Copies of a book that are on the shelf and not bound to any copy-holding loan
pub async fn available_copies(
    tx: &mut dyn CirculationTx,
    book_id: i32,
) -> AppResult<Vec<BookCopy>> {
    let bound: HashSet<i32> = tx
        .open_loans_for_book(book_id)
        .await?
        .into_iter()
        .filter(|l| l.status.holds_copy())
        .filter_map(|l| l.copy_id)
        .collect();

    Ok(tx
        .copies_for_book(book_id)
        .await?
        .into_iter()
        .filter(|c| c.disposition == CopyDisposition::Available && !bound.contains(&c.id))
        .collect())
}

pub async fn available_count(tx: &mut dyn CirculationTx, book_id: i32) -> AppResult<i32> {
    Ok(available_copies(tx, book_id).await?.len() as i32)
}

/// Whether a copy stays uncommitted over `range`.
///
/// Every copy still in circulation is a slot; every open loan whose commitment
/// intersects the range takes one, pending loans included. `exclude` leaves one
/// loan out of the count.
pub async fn has_free_slot(
    tx: &mut dyn CirculationTx,
    book_id: i32,
    range: &DateRange,
    today: NaiveDate,
    exclude: Option<i32>,
) -> AppResult<bool> {
    let slots = tx
        .copies_for_book(book_id)
        .await?
        .iter()
        .filter(|c| c.disposition.in_circulation())
        .count();
    let committed = tx
        .open_loans_for_book(book_id)
        .await?
        .iter()
        .filter(|l| Some(l.id) != exclude)
        .filter(|l| l.commitment(today).overlaps(range))
        .count();
    Ok(committed < slots)
}

/// Recompute the availability count and rewrite the cached value on the book row
pub async fn refresh_cached_count(tx: &mut dyn CirculationTx, book_id: i32) -> AppResult<i32> {
    let available = available_count(tx, book_id).await?;
    tx.set_cached_available(book_id, available).await?;
    Ok(available)
}

/// Claim one available copy of the book, marking it held for pickup.
///
/// Returns `None` when no copy is free. Each candidate is claimed with a conditional
/// update, so a copy taken by a concurrent transaction is skipped rather than shared.
pub async fn bind_copy(tx: &mut dyn CirculationTx, book_id: i32) -> AppResult<Option<BookCopy>> {
    for mut copy in available_copies(tx, book_id).await? {
        if tx
            .transition_copy(
                copy.id,
                &[CopyDisposition::Available],
                CopyDisposition::HeldForPickup,
            )
            .await?
        {
            copy.disposition = CopyDisposition::HeldForPickup;
            return Ok(Some(copy));
        }
    }
    Ok(None)
}

/// Put a copy back on the shelf (or aside, when it came back damaged).
///
/// Lost and damaged copies stay where they are. Returns the copy when it became available.
pub async fn release_copy(
    tx: &mut dyn CirculationTx,
    copy_id: i32,
    condition: ReturnCondition,
) -> AppResult<Option<BookCopy>> {
    let target = match condition {
        ReturnCondition::Good => CopyDisposition::Available,
        ReturnCondition::Damaged => CopyDisposition::Damaged,
    };

    let moved = tx
        .transition_copy(
            copy_id,
            &[CopyDisposition::HeldForPickup, CopyDisposition::Loaned],
            target,
        )
        .await?;

    if !moved {
        tracing::warn!(copy_id, "Copy was not bound when released, disposition left unchanged");
        return Ok(None);
    }

    if target == CopyDisposition::Available {
        Ok(tx.get_copy(copy_id).await?)
    } else {
        Ok(None)
    }
}

#[derive(Clone)]
pub struct AvailabilityService {
    ctx: CirculationContext,
    reservations: ReservationsService,
}

impl AvailabilityService {
    pub fn new(ctx: CirculationContext, reservations: ReservationsService) -> Self {
        Self { ctx, reservations }
    }

    /// Derived count of copies lendable right now
    pub async fn available_count(&self, book_id: i32) -> AppResult<i32> {
        let mut tx = self.ctx.begin().await?;
        available_count(tx.as_mut(), book_id).await
    }

    /// Derived count, cached count and queue length for a book
    pub async fn availability(&self, book_id: i32) -> AppResult<BookAvailability> {
        let mut tx = self.ctx.begin().await?;
        let book = tx
            .lock_book(book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", book_id)))?;
        let available = available_count(tx.as_mut(), book_id).await?;
        let queue_length = tx.active_reservations_for_book(book_id).await?.len() as i32;

        Ok(BookAvailability {
            book_id,
            available,
            cached: book.available_copies,
            queue_length,
        })
    }

    /// Withdraw a copy (lost, damaged) or reinstate it (available).
    ///
    /// Refused while the copy is bound to an open loan. Reinstatement runs queue promotion.
    pub async fn set_copy_disposition(
        &self,
        copy_id: i32,
        disposition: CopyDisposition,
    ) -> AppResult<BookCopy> {
        if disposition.is_bound() {
            return Err(AppError::Validation(format!(
                "Disposition {} is managed by loans",
                disposition
            )));
        }

        let mut tx = self.ctx.begin().await?;
        let book_id = tx
            .get_copy(copy_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Copy with id {} not found", copy_id)))?
            .book_id;
        tx.lock_book(book_id).await?;

        // Disposition as of the lock, not as of the first read
        let copy = tx
            .get_copy(copy_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Copy with id {} not found", copy_id)))?;

        let bound = tx
            .open_loans_for_book(copy.book_id)
            .await?
            .into_iter()
            .any(|l| l.status.holds_copy() && l.copy_id == Some(copy_id));
        if bound {
            return Err(AppError::InvalidTransition(format!(
                "Copy {} is bound to an open loan",
                copy_id
            )));
        }

        let from = [
            CopyDisposition::Available,
            CopyDisposition::Lost,
            CopyDisposition::Damaged,
            CopyDisposition::HeldForPickup,
            CopyDisposition::Loaned,
        ];
        tx.transition_copy(copy_id, &from, disposition).await?;
        refresh_cached_count(tx.as_mut(), copy.book_id).await?;

        let mut events = Vec::new();
        if disposition == CopyDisposition::Available && copy.disposition != disposition {
            let now = self.ctx.clock.now();
            events.push(LifecycleEvent::copy_available(copy.book_id, copy_id, now));
            self.reservations
                .promote_head_in(tx.as_mut(), copy.book_id, &mut events)
                .await?;
        }

        let updated = tx
            .get_copy(copy_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Copy with id {} not found", copy_id)))?;

        tracing::info!(
            copy_id,
            book_id = copy.book_id,
            from = %copy.disposition,
            to = %disposition,
            "Copy disposition changed"
        );

        self.ctx.commit_and_publish(tx, events).await?;
        Ok(updated)
    }
}
