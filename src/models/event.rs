//! Lifecycle events handed to notification dispatchers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::loan::Loan;
use super::reservation::Reservation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    LoanApproved,
    LoanRejected,
    LoanOverdue,
    PickupExpired,
    ReservationExpired,
    ReservationPromoted,
    /// Head of queue passed over because its window has not started
    ReservationSkipped,
    CopyAvailable,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::LoanApproved => "loan-approved",
            EventKind::LoanRejected => "loan-rejected",
            EventKind::LoanOverdue => "loan-overdue",
            EventKind::PickupExpired => "pickup-expired",
            EventKind::ReservationExpired => "reservation-expired",
            EventKind::ReservationPromoted => "reservation-promoted",
            EventKind::ReservationSkipped => "reservation-skipped",
            EventKind::CopyAvailable => "copy-available",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A committed transition, identified by the records it touched
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LifecycleEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub book_id: i32,
    pub user_id: Option<i32>,
    pub loan_id: Option<i32>,
    pub reservation_id: Option<i32>,
    pub copy_id: Option<i32>,
    pub occurred_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn for_loan(kind: EventKind, loan: &Loan, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            book_id: loan.book_id,
            user_id: Some(loan.user_id),
            loan_id: Some(loan.id),
            reservation_id: loan.origin.reservation_id(),
            copy_id: loan.copy_id,
            occurred_at: at,
        }
    }

    pub fn for_reservation(kind: EventKind, reservation: &Reservation, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            book_id: reservation.book_id,
            user_id: Some(reservation.user_id),
            loan_id: reservation.converted_loan_id,
            reservation_id: Some(reservation.id),
            copy_id: None,
            occurred_at: at,
        }
    }

    pub fn copy_available(book_id: i32, copy_id: i32, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: EventKind::CopyAvailable,
            book_id,
            user_id: None,
            loan_id: None,
            reservation_id: None,
            copy_id: Some(copy_id),
            occurred_at: at,
        }
    }
}
