//! Loan (borrow) model and related types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::date_range::DateRange;
use super::reservation::Reservation;

/// Loan lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Pending,
    AwaitingPickup,
    Active,
    Overdue,
    Returned,
    Rejected,
    PickupExpired,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::AwaitingPickup => "awaiting_pickup",
            LoanStatus::Active => "active",
            LoanStatus::Overdue => "overdue",
            LoanStatus::Returned => "returned",
            LoanStatus::Rejected => "rejected",
            LoanStatus::PickupExpired => "pickup_expired",
        }
    }

    /// Statuses that count against a user or a book (duplicate and overlap checks)
    pub const OPEN: [LoanStatus; 4] = [
        LoanStatus::Pending,
        LoanStatus::AwaitingPickup,
        LoanStatus::Active,
        LoanStatus::Overdue,
    ];

    pub fn is_open(&self) -> bool {
        Self::OPEN.contains(self)
    }

    /// Statuses in which the loan owns a copy
    pub fn holds_copy(&self) -> bool {
        matches!(
            self,
            LoanStatus::AwaitingPickup | LoanStatus::Active | LoanStatus::Overdue
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LoanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LoanStatus::Pending),
            "awaiting_pickup" => Ok(LoanStatus::AwaitingPickup),
            "active" => Ok(LoanStatus::Active),
            "overdue" => Ok(LoanStatus::Overdue),
            "returned" => Ok(LoanStatus::Returned),
            "rejected" => Ok(LoanStatus::Rejected),
            "pickup_expired" => Ok(LoanStatus::PickupExpired),
            _ => Err(format!("Invalid loan status: {}", s)),
        }
    }
}

super::text_column!(LoanStatus);

/// How a loan came into existence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoanOrigin {
    /// Staff created the loan on behalf of a user
    DirectRequest,
    /// The borrower asked for it
    UserRequest,
    /// Head of a reservation queue converted into a loan
    PromotedFromReservation { reservation_id: i32 },
}

impl LoanOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanOrigin::DirectRequest => "direct_request",
            LoanOrigin::UserRequest => "user_request",
            LoanOrigin::PromotedFromReservation { .. } => "promoted_from_reservation",
        }
    }

    pub fn reservation_id(&self) -> Option<i32> {
        match self {
            LoanOrigin::PromotedFromReservation { reservation_id } => Some(*reservation_id),
            _ => None,
        }
    }

    /// Rebuild from the `origin` / `origin_reservation_id` column pair
    pub fn from_columns(kind: &str, reservation_id: Option<i32>) -> Result<Self, String> {
        match (kind, reservation_id) {
            ("direct_request", _) => Ok(LoanOrigin::DirectRequest),
            ("user_request", _) => Ok(LoanOrigin::UserRequest),
            ("promoted_from_reservation", Some(reservation_id)) => {
                Ok(LoanOrigin::PromotedFromReservation { reservation_id })
            }
            _ => Err(format!("Invalid loan origin: {}", kind)),
        }
    }
}

/// Loan record
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Loan {
    pub id: i32,
    pub user_id: i32,
    pub book_id: i32,
    pub copy_id: Option<i32>,
    pub origin: LoanOrigin,
    pub range: DateRange,
    pub status: LoanStatus,
    /// Set at pickup, pushed back by renewals
    pub due_date: Option<NaiveDate>,
    pub nb_renews: i16,
    pub pickup_deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<i32>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub renew_date: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<i32>,
    pub rejection_reason: Option<String>,
    /// When the loan reached a terminal status
    pub closed_at: Option<DateTime<Utc>>,
}

impl Loan {
    /// Days this loan keeps a copy committed, as seen on `today`.
    ///
    /// A loan that is out keeps its copy at least until today, whatever the due date says.
    pub fn commitment(&self, today: NaiveDate) -> DateRange {
        match self.status {
            LoanStatus::Active | LoanStatus::Overdue => {
                let due = self.due_date.unwrap_or(self.range.end);
                DateRange {
                    start: self.range.start.min(today),
                    end: due.max(today),
                }
            }
            _ => self.range,
        }
    }

    /// Requested start is still ahead
    pub fn is_scheduled(&self, today: NaiveDate) -> bool {
        matches!(self.status, LoanStatus::Pending | LoanStatus::AwaitingPickup)
            && self.range.start > today
    }

    pub fn is_past_due(&self, today: NaiveDate) -> bool {
        self.status == LoanStatus::Active && self.due_date.map(|d| d < today).unwrap_or(false)
    }

    pub fn is_pickup_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == LoanStatus::AwaitingPickup
            && self.pickup_deadline.map(|d| d < now).unwrap_or(false)
    }
}

/// Values for a loan about to be inserted
#[derive(Debug, Clone)]
pub struct NewLoan {
    pub user_id: i32,
    pub book_id: i32,
    pub origin: LoanOrigin,
    pub range: DateRange,
    pub created_at: DateTime<Utc>,
}

/// Result of a borrow request: granted as a loan or queued as a reservation
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "outcome", content = "record", rename_all = "snake_case")]
pub enum RequestOutcome {
    Granted(Loan),
    Queued(Reservation),
}

impl RequestOutcome {
    pub fn loan(&self) -> Option<&Loan> {
        match self {
            RequestOutcome::Granted(loan) => Some(loan),
            RequestOutcome::Queued(_) => None,
        }
    }

    pub fn reservation(&self) -> Option<&Reservation> {
        match self {
            RequestOutcome::Granted(_) => None,
            RequestOutcome::Queued(reservation) => Some(reservation),
        }
    }
}

/// Physical state of a copy coming back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReturnCondition {
    #[default]
    Good,
    Damaged,
}
