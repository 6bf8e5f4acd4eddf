//! Copy (physical unit) model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Current disposition of a physical copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CopyDisposition {
    Available,
    Loaned,
    HeldForPickup,
    Lost,
    Damaged,
}

impl CopyDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyDisposition::Available => "available",
            CopyDisposition::Loaned => "loaned",
            CopyDisposition::HeldForPickup => "held_for_pickup",
            CopyDisposition::Lost => "lost",
            CopyDisposition::Damaged => "damaged",
        }
    }

    /// Still part of the lendable stock (possibly out on loan right now)
    pub fn in_circulation(&self) -> bool {
        !matches!(self, CopyDisposition::Lost | CopyDisposition::Damaged)
    }

    /// Dispositions that only a bound loan may hold
    pub fn is_bound(&self) -> bool {
        matches!(self, CopyDisposition::Loaned | CopyDisposition::HeldForPickup)
    }
}

impl std::fmt::Display for CopyDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CopyDisposition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "available" => Ok(CopyDisposition::Available),
            "loaned" => Ok(CopyDisposition::Loaned),
            "held_for_pickup" | "held-for-pickup" => Ok(CopyDisposition::HeldForPickup),
            "lost" => Ok(CopyDisposition::Lost),
            "damaged" => Ok(CopyDisposition::Damaged),
            _ => Err(format!("Invalid copy disposition: {}", s)),
        }
    }
}

super::text_column!(CopyDisposition);

/// Copy row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct BookCopy {
    pub id: i32,
    pub book_id: i32,
    /// Inventory label (barcode or call number)
    pub label: String,
    pub disposition: CopyDisposition,
    pub updated_at: DateTime<Utc>,
}
