//! Requested borrowing windows

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{AppError, AppResult};

/// How ranges sharing a boundary day are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryPolicy {
    /// A range ending on day D overlaps a range starting on day D
    Inclusive,
    /// A range ending on day D leaves day D free for the next range
    Exclusive,
}

/// Boundary rule used for every admission decision.
///
/// A copy coming back during day D cannot be promised to someone else on day D.
pub const RANGE_BOUNDARY: BoundaryPolicy = BoundaryPolicy::Inclusive;

/// Inclusive calendar-day interval `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> AppResult<Self> {
        if end < start {
            return Err(AppError::Validation(format!(
                "End date {} is before start date {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Range of `days` days beginning at `start`
    pub fn starting_at(start: NaiveDate, days: i64) -> Self {
        Self {
            start,
            end: start + Duration::days(days.max(1) - 1),
        }
    }

    /// Number of calendar days covered
    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Interval intersection under the given boundary policy
    pub fn overlaps_with(&self, other: &DateRange, policy: BoundaryPolicy) -> bool {
        match policy {
            BoundaryPolicy::Inclusive => self.start <= other.end && other.start <= self.end,
            BoundaryPolicy::Exclusive => self.start < other.end && other.start < self.end,
        }
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.overlaps_with(other, RANGE_BOUNDARY)
    }

    /// Same length, moved to begin at `start`
    pub fn shifted_to(&self, start: NaiveDate) -> Self {
        Self::starting_at(start, self.len_days())
    }
}
