//! Elidune Circulation Engine
//!
//! Loan and reservation lifecycle for the Elidune library management system:
//! copy availability, the loan state machine, per-book reservation queues and the
//! periodic maintenance sweep, served as a REST JSON API.

use std::sync::Arc;

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}
