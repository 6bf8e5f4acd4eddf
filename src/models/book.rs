//! Book (catalog title) as seen by the circulation engine

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Book row. Title and total copy count belong to the catalog;
/// `available_copies` is a cached value rewritten by every circulation mutation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: i32,
    pub title: String,
    pub total_copies: i32,
    pub available_copies: i32,
}

/// Availability report for a book
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BookAvailability {
    pub book_id: i32,
    /// Count derived from copy and loan state
    pub available: i32,
    /// Denormalized count stored on the book row
    pub cached: i32,
    /// Active reservations waiting for this book
    pub queue_length: i32,
}
