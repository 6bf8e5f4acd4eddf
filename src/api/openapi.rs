//! OpenAPI documentation

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{books, health, loans, maintenance, reservations};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Elidune Circulation API",
        version = "1.1.0",
        description = "Loan and reservation lifecycle engine",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html"),
        contact(name = "Elidune Team", email = "contact@elidune.org")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Loans
        loans::create_loan,
        loans::get_loan,
        loans::get_user_loans,
        loans::approve_loan,
        loans::reject_loan,
        loans::confirm_pickup,
        loans::return_loan,
        loans::renew_loan,
        // Reservations
        reservations::get_reservation,
        reservations::cancel_reservation,
        // Books and copies
        books::get_availability,
        books::get_queue,
        books::update_disposition,
        // Maintenance
        maintenance::run_sweep,
    ),
    components(
        schemas(
            // Loans
            loans::CreateLoanRequest,
            loans::RejectLoanRequest,
            loans::ReturnLoanRequest,
            crate::models::loan::Loan,
            crate::models::loan::LoanStatus,
            crate::models::loan::LoanOrigin,
            crate::models::loan::RequestOutcome,
            crate::models::loan::ReturnCondition,
            crate::models::date_range::DateRange,
            // Reservations
            crate::models::reservation::Reservation,
            crate::models::reservation::ReservationStatus,
            // Books and copies
            books::UpdateDispositionRequest,
            crate::models::book::BookAvailability,
            crate::models::copy::BookCopy,
            crate::models::copy::CopyDisposition,
            // Events
            crate::models::event::LifecycleEvent,
            crate::models::event::EventKind,
            // Maintenance
            crate::services::maintenance::SweepSummary,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "loans", description = "Loan lifecycle"),
        (name = "reservations", description = "Reservation queue"),
        (name = "books", description = "Availability and copy registry"),
        (name = "maintenance", description = "Time-driven transitions")
    )
)]
pub struct ApiDoc;

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
