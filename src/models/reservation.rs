//! Reservation (queued borrow request) model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::date_range::DateRange;

/// Reservation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Expired,
    Cancelled,
    Converted,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Expired => "expired",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Converted => "converted",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ReservationStatus::Active),
            "expired" => Ok(ReservationStatus::Expired),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            "converted" => Ok(ReservationStatus::Converted),
            _ => Err(format!("Invalid reservation status: {}", s)),
        }
    }
}

super::text_column!(ReservationStatus);

/// Reservation record.
///
/// `position` is meaningful only while the reservation is active; terminal
/// reservations keep the last position they held.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Reservation {
    pub id: i32,
    pub user_id: i32,
    pub book_id: i32,
    pub position: i32,
    pub range: DateRange,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Loan created when the reservation reached the head of the queue
    pub converted_loan_id: Option<i32>,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at < now
    }
}

/// Values for a reservation about to be inserted
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub user_id: i32,
    pub book_id: i32,
    pub position: i32,
    pub range: DateRange,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
