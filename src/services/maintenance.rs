//! Maintenance sweep
//!
//! Time-driven transitions, run periodically and on demand. Every record moves in a
//! transaction of its own, guarded by a re-check of its current status, so the sweep
//! can be re-run or overlap with itself. A failing record is logged and counted; it
//! never stops the records after it.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use utoipa::ToSchema;

use crate::{error::AppError, models::loan::LoanStatus};

use super::{loans::LoansService, reservations::ReservationsService, CirculationContext};

/// Transitions performed by one sweep, per category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepSummary {
    /// Pending or awaiting-pickup loans whose window has opened
    pub scheduled_due: u64,
    pub marked_overdue: u64,
    pub pickups_expired: u64,
    pub reservations_expired: u64,
    pub reservations_promoted: u64,
    pub rejected_purged: u64,
    /// Records (or listings) that could not be processed
    pub failures: u64,
}

#[derive(Clone)]
pub struct MaintenanceService {
    ctx: CirculationContext,
    loans: LoansService,
    reservations: ReservationsService,
}

impl MaintenanceService {
    pub fn new(
        ctx: CirculationContext,
        loans: LoansService,
        reservations: ReservationsService,
    ) -> Self {
        Self {
            ctx,
            loans,
            reservations,
        }
    }

    /// Run every maintenance step once
    pub async fn run_sweep(&self) -> SweepSummary {
        let started = self.ctx.clock.now();
        let mut summary = SweepSummary::default();
        let mut touched_books = BTreeSet::new();

        // 1. Scheduled loans whose start date has arrived
        match self.loans.due_for_action().await {
            Ok(due) => {
                for loan in &due {
                    tracing::debug!(
                        loan_id = loan.id,
                        book_id = loan.book_id,
                        status = %loan.status,
                        start = %loan.range.start,
                        "Loan due for action"
                    );
                }
                summary.scheduled_due = due.len() as u64;
            }
            Err(e) => failed(&mut summary, "scheduled loans", None, &e),
        }

        // 2. Overdue marking
        match self.loans.with_status(LoanStatus::Active).await {
            Ok(active) => {
                let today = self.ctx.clock.today();
                for loan in active.into_iter().filter(|l| l.is_past_due(today)) {
                    match self.loans.mark_overdue(loan.id).await {
                        Ok(Some(_)) => summary.marked_overdue += 1,
                        Ok(None) => {}
                        Err(e) => failed(&mut summary, "overdue", Some(loan.id), &e),
                    }
                }
            }
            Err(e) => failed(&mut summary, "overdue", None, &e),
        }

        // 3. Pickup expiry, copy released and queue promoted inside the same transition
        match self.loans.with_status(LoanStatus::AwaitingPickup).await {
            Ok(waiting) => {
                let now = self.ctx.clock.now();
                for loan in waiting.into_iter().filter(|l| l.is_pickup_expired(now)) {
                    match self.loans.expire_pickup(loan.id).await {
                        Ok(Some(expired)) => {
                            summary.pickups_expired += 1;
                            touched_books.insert(expired.book_id);
                        }
                        Ok(None) => {}
                        Err(e) => failed(&mut summary, "pickup expiry", Some(loan.id), &e),
                    }
                }
            }
            Err(e) => failed(&mut summary, "pickup expiry", None, &e),
        }

        // 4. Reservation expiry
        match self.reservations.expired().await {
            Ok(expired) => {
                for reservation in expired {
                    match self.reservations.expire(reservation.id).await {
                        Ok(Some(_)) => summary.reservations_expired += 1,
                        Ok(None) => {}
                        Err(e) => {
                            failed(&mut summary, "reservation expiry", Some(reservation.id), &e)
                        }
                    }
                }
            }
            Err(e) => failed(&mut summary, "reservation expiry", None, &e),
        }

        // 5. Promotion for books freed above and any queue left waiting earlier
        match self.reservations.queued_books().await {
            Ok(queued) => touched_books.extend(queued),
            Err(e) => failed(&mut summary, "promotion", None, &e),
        }
        for book_id in touched_books {
            match self.reservations.promote_head(book_id, false).await {
                Ok(promoted) => summary.reservations_promoted += promoted as u64,
                Err(e) => failed(&mut summary, "promotion", Some(book_id), &e),
            }
        }

        // 6. Events went out with each committed transition

        // 7. Retention of rejected loans
        match self.loans.purge_rejected().await {
            Ok(purged) => summary.rejected_purged = purged,
            Err(e) => failed(&mut summary, "rejected purge", None, &e),
        }

        let elapsed = self.ctx.clock.now() - started;
        tracing::info!(
            scheduled_due = summary.scheduled_due,
            marked_overdue = summary.marked_overdue,
            pickups_expired = summary.pickups_expired,
            reservations_expired = summary.reservations_expired,
            reservations_promoted = summary.reservations_promoted,
            rejected_purged = summary.rejected_purged,
            failures = summary.failures,
            elapsed_ms = elapsed.num_milliseconds(),
            "Maintenance sweep finished"
        );
        summary
    }

    /// Run the sweep every `every` in a background task. Missed ticks are skipped.
    pub fn spawn(self, every: Duration, run_on_startup: bool) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = interval(every);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            // The first tick completes immediately
            if !run_on_startup {
                timer.tick().await;
            }

            loop {
                timer.tick().await;
                self.run_sweep().await;
            }
        })
    }
}

fn failed(summary: &mut SweepSummary, step: &str, record_id: Option<i32>, error: &AppError) {
    summary.failures += 1;
    if error.is_expected() {
        tracing::warn!(step, record_id, "Maintenance step skipped a record: {}", error);
    } else {
        tracing::error!(step, record_id, "Maintenance step failed: {}", error);
    }
}
