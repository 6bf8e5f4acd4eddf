//! Book availability, queue and copy registry endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::{
        book::BookAvailability,
        copy::{BookCopy, CopyDisposition},
        reservation::Reservation,
    },
    AppState,
};

use super::AuthenticatedUser;

/// Copy withdrawal or reinstatement
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateDispositionRequest {
    /// `available`, `lost` or `damaged`
    pub disposition: CopyDisposition,
}

/// Get availability of a book
#[utoipa::path(
    get,
    path = "/books/{id}/availability",
    tag = "books",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Book ID")),
    responses(
        (status = 200, description = "Availability", body = BookAvailability),
        (status = 404, description = "Book not found")
    )
)]
pub async fn get_availability(
    State(state): State<AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
    Path(book_id): Path<i32>,
) -> AppResult<Json<BookAvailability>> {
    let availability = state.services.availability.availability(book_id).await?;
    Ok(Json(availability))
}

/// List the reservation queue of a book
#[utoipa::path(
    get,
    path = "/books/{id}/reservations",
    tag = "books",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Book ID")),
    responses(
        (status = 200, description = "Active reservations, head first", body = Vec<Reservation>),
        (status = 404, description = "Book not found")
    )
)]
pub async fn get_queue(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(book_id): Path<i32>,
) -> AppResult<Json<Vec<Reservation>>> {
    claims.require_staff()?;

    let queue = state.services.reservations.queue(book_id).await?;
    Ok(Json(queue))
}

/// Withdraw or reinstate a copy
#[utoipa::path(
    put,
    path = "/copies/{id}/disposition",
    tag = "books",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Copy ID")),
    request_body = UpdateDispositionRequest,
    responses(
        (status = 200, description = "Copy updated", body = BookCopy),
        (status = 400, description = "Disposition managed by loans"),
        (status = 404, description = "Copy not found"),
        (status = 409, description = "Copy is bound to an open loan")
    )
)]
pub async fn update_disposition(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(copy_id): Path<i32>,
    Json(request): Json<UpdateDispositionRequest>,
) -> AppResult<Json<BookCopy>> {
    claims.require_staff()?;

    let copy = state
        .services
        .availability
        .set_copy_disposition(copy_id, request.disposition)
        .await?;
    Ok(Json(copy))
}
