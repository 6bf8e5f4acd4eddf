//! Reservation endpoints

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{error::AppResult, models::reservation::Reservation, AppState};

use super::AuthenticatedUser;

/// Get a reservation
#[utoipa::path(
    get,
    path = "/reservations/{id}",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Reservation ID")),
    responses(
        (status = 200, description = "Reservation", body = Reservation),
        (status = 404, description = "Reservation not found")
    )
)]
pub async fn get_reservation(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(reservation_id): Path<i32>,
) -> AppResult<Json<Reservation>> {
    let reservation = state.services.reservations.get(reservation_id).await?;
    claims.require_self_or_staff(reservation.user_id)?;
    Ok(Json(reservation))
}

/// Cancel a reservation and leave the queue
#[utoipa::path(
    post,
    path = "/reservations/{id}/cancel",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Reservation ID")),
    responses(
        (status = 200, description = "Reservation cancelled", body = Reservation),
        (status = 404, description = "Reservation not found"),
        (status = 409, description = "Reservation is no longer active")
    )
)]
pub async fn cancel_reservation(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(reservation_id): Path<i32>,
) -> AppResult<Json<Reservation>> {
    if !claims.is_staff() {
        let reservation = state.services.reservations.get(reservation_id).await?;
        claims.require_self_or_staff(reservation.user_id)?;
    }

    let reservation = state.services.reservations.cancel(reservation_id).await?;
    Ok(Json(reservation))
}
