//! Loan lifecycle endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    error::AppResult,
    models::loan::{Loan, LoanOrigin, RequestOutcome, ReturnCondition},
    AppState,
};

use super::AuthenticatedUser;

/// Borrow request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateLoanRequest {
    /// Borrower (defaults to the caller; staff only for someone else)
    pub user_id: Option<i32>,
    /// Book ID
    #[validate(range(min = 1, message = "Invalid book id"))]
    pub book_id: i32,
    /// First day of the loan (defaults to today)
    pub start_date: Option<NaiveDate>,
    /// Last day of the loan (defaults to the standard loan period)
    pub end_date: Option<NaiveDate>,
}

/// Rejection of a pending loan
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct RejectLoanRequest {
    #[validate(length(max = 500, message = "Reason is limited to 500 characters"))]
    pub reason: Option<String>,
}

/// Return of a loaned copy
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ReturnLoanRequest {
    #[serde(default)]
    pub condition: ReturnCondition,
}

/// Request a loan
#[utoipa::path(
    post,
    path = "/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    request_body = CreateLoanRequest,
    responses(
        (status = 201, description = "Loan granted (pending approval)", body = RequestOutcome),
        (status = 202, description = "No copy free, request queued", body = RequestOutcome),
        (status = 400, description = "Invalid dates"),
        (status = 404, description = "Book not found"),
        (status = 409, description = "User already has an open loan or reservation for this book")
    )
)]
pub async fn create_loan(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<CreateLoanRequest>,
) -> AppResult<(StatusCode, Json<RequestOutcome>)> {
    request.validate()?;

    let user_id = request.user_id.unwrap_or(claims.user_id);
    claims.require_self_or_staff(user_id)?;

    let origin = if user_id != claims.user_id {
        LoanOrigin::DirectRequest
    } else {
        LoanOrigin::UserRequest
    };
    let start = request
        .start_date
        .unwrap_or_else(|| state.services.loans.context().clock.today());

    let outcome = state
        .services
        .loans
        .request(user_id, request.book_id, start, request.end_date, origin)
        .await?;

    let status = match outcome {
        RequestOutcome::Granted(_) => StatusCode::CREATED,
        RequestOutcome::Queued(_) => StatusCode::ACCEPTED,
    };
    Ok((status, Json(outcome)))
}

/// Get a loan
#[utoipa::path(
    get,
    path = "/loans/{id}",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Loan ID")),
    responses(
        (status = 200, description = "Loan", body = Loan),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn get_loan(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<Loan>> {
    let loan = state.services.loans.get(loan_id).await?;
    claims.require_self_or_staff(loan.user_id)?;
    Ok(Json(loan))
}

/// Get open loans for a specific user
#[utoipa::path(
    get,
    path = "/users/{id}/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "User's open loans", body = Vec<Loan>),
        (status = 403, description = "Not allowed to see this user's loans")
    )
)]
pub async fn get_user_loans(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<i32>,
) -> AppResult<Json<Vec<Loan>>> {
    claims.require_self_or_staff(user_id)?;

    let loans = state.services.loans.user_loans(user_id).await?;
    Ok(Json(loans))
}

/// Approve a pending loan, holding a copy for pickup
#[utoipa::path(
    post,
    path = "/loans/{id}/approve",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Loan ID")),
    responses(
        (status = 200, description = "Loan approved", body = Loan),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Not pending, or the last copy was already taken")
    )
)]
pub async fn approve_loan(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<Loan>> {
    claims.require_staff()?;

    let loan = state.services.loans.approve(loan_id, claims.user_id).await?;
    Ok(Json(loan))
}

/// Reject a pending loan
#[utoipa::path(
    post,
    path = "/loans/{id}/reject",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Loan ID")),
    request_body = RejectLoanRequest,
    responses(
        (status = 204, description = "Loan rejected"),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Loan is not pending")
    )
)]
pub async fn reject_loan(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i32>,
    request: Option<Json<RejectLoanRequest>>,
) -> AppResult<StatusCode> {
    claims.require_staff()?;

    let request = request.map(|Json(r)| r).unwrap_or_default();
    request.validate()?;

    state
        .services
        .loans
        .reject(loan_id, claims.user_id, request.reason)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Confirm the borrower collected the held copy
#[utoipa::path(
    post,
    path = "/loans/{id}/pickup",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Loan ID")),
    responses(
        (status = 200, description = "Loan active", body = Loan),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Loan is not awaiting pickup"),
        (status = 422, description = "Pickup deadline passed")
    )
)]
pub async fn confirm_pickup(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<Loan>> {
    claims.require_staff()?;

    let loan = state.services.loans.confirm_pickup(loan_id).await?;
    Ok(Json(loan))
}

/// Return a borrowed copy
#[utoipa::path(
    post,
    path = "/loans/{id}/return",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Loan ID")),
    request_body = ReturnLoanRequest,
    responses(
        (status = 200, description = "Loan returned", body = Loan),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Loan is not out")
    )
)]
pub async fn return_loan(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i32>,
    request: Option<Json<ReturnLoanRequest>>,
) -> AppResult<Json<Loan>> {
    claims.require_staff()?;

    let request = request.map(|Json(r)| r).unwrap_or_default();
    let loan = state
        .services
        .loans
        .return_loan(loan_id, request.condition)
        .await?;
    Ok(Json(loan))
}

/// Renew a loan
#[utoipa::path(
    post,
    path = "/loans/{id}/renew",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Loan ID")),
    responses(
        (status = 200, description = "Loan renewed", body = Loan),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Loan is not active"),
        (status = 422, description = "Max renewals reached")
    )
)]
pub async fn renew_loan(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<Loan>> {
    if !claims.is_staff() {
        let loan = state.services.loans.get(loan_id).await?;
        claims.require_self_or_staff(loan.user_id)?;
    }

    let loan = state.services.loans.renew(loan_id).await?;
    Ok(Json(loan))
}
