//! On-demand maintenance sweep, for external job runners

use axum::{extract::State, Json};

use crate::{error::AppResult, services::maintenance::SweepSummary, AppState};

use super::AuthenticatedUser;

/// Run the maintenance sweep now
#[utoipa::path(
    post,
    path = "/maintenance/sweep",
    tag = "maintenance",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Transitions performed", body = SweepSummary),
        (status = 403, description = "Staff only")
    )
)]
pub async fn run_sweep(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<SweepSummary>> {
    claims.require_staff()?;

    let summary = state.services.maintenance.run_sweep().await;
    Ok(Json(summary))
}
