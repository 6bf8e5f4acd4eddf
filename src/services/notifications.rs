//! Notification dispatch for lifecycle events
//!
//! The engine hands over committed events and moves on: a dispatcher failure is
//! logged, never propagated back into the transition that produced the event.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, Message},
    transport::smtp::authentication::Credentials,
    SmtpTransport, Transport,
};
use std::str::FromStr;
use std::sync::Arc;

use crate::{
    config::{EmailConfig, NotificationsConfig},
    error::{AppError, AppResult},
    models::event::{EventKind, LifecycleEvent},
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, event: &LifecycleEvent) -> AppResult<()>;
}

/// Writes every event to the log
#[derive(Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationDispatcher for LogNotifier {
    async fn dispatch(&self, event: &LifecycleEvent) -> AppResult<()> {
        tracing::info!(
            event_id = %event.id,
            kind = %event.kind,
            book_id = event.book_id,
            loan_id = ?event.loan_id,
            reservation_id = ?event.reservation_id,
            user_id = ?event.user_id,
            "Circulation event"
        );
        Ok(())
    }
}

/// Mails a one-line notice per event to the circulation desk
#[derive(Clone)]
pub struct EmailNotifier {
    config: EmailConfig,
    desk_address: String,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig, notifications: &NotificationsConfig) -> Self {
        Self {
            config,
            desk_address: notifications.desk_address.clone(),
        }
    }

    fn subject(event: &LifecycleEvent) -> String {
        let what = match event.kind {
            EventKind::LoanApproved => "Loan approved",
            EventKind::LoanRejected => "Loan rejected",
            EventKind::LoanOverdue => "Loan overdue",
            EventKind::PickupExpired => "Pickup deadline expired",
            EventKind::ReservationExpired => "Reservation expired",
            EventKind::ReservationPromoted => "Reservation promoted to loan",
            EventKind::ReservationSkipped => "Reservation passed over",
            EventKind::CopyAvailable => "Copy available again",
        };
        format!("[Elidune] {} (book {})", what, event.book_id)
    }

    fn body(event: &LifecycleEvent) -> String {
        let mut lines = vec![
            format!("Event: {}", event.kind),
            format!("Book: {}", event.book_id),
        ];
        if let Some(user_id) = event.user_id {
            lines.push(format!("User: {}", user_id));
        }
        if let Some(loan_id) = event.loan_id {
            lines.push(format!("Loan: {}", loan_id));
        }
        if let Some(reservation_id) = event.reservation_id {
            lines.push(format!("Reservation: {}", reservation_id));
        }
        if let Some(copy_id) = event.copy_id {
            lines.push(format!("Copy: {}", copy_id));
        }
        lines.push(format!("At: {}", event.occurred_at.to_rfc3339()));
        lines.join("\n")
    }

    fn build_message(&self, event: &LifecycleEvent) -> AppResult<Message> {
        let from_name = self.config.smtp_from_name.as_deref().unwrap_or("Elidune");
        let from_mailbox = Mailbox::from_str(&format!("{} <{}>", from_name, self.config.smtp_from))
            .map_err(|e| AppError::Internal(format!("Invalid from address: {}", e)))?;
        let to_mailbox = Mailbox::from_str(&self.desk_address)
            .map_err(|e| AppError::Internal(format!("Invalid to address: {}", e)))?;

        Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(Self::subject(event))
            .header(ContentType::TEXT_PLAIN)
            .body(Self::body(event))
            .map_err(|e| AppError::Internal(format!("Failed to build email: {}", e)))
    }

    fn transport(&self) -> AppResult<SmtpTransport> {
        let builder = if self.config.smtp_use_tls {
            SmtpTransport::starttls_relay(&self.config.smtp_host)
                .map_err(|e| AppError::Internal(format!("Failed to create SMTP transport: {}", e)))?
        } else {
            SmtpTransport::builder_dangerous(&self.config.smtp_host)
        }
        .port(self.config.smtp_port);

        let builder = match (&self.config.smtp_username, &self.config.smtp_password) {
            (Some(username), Some(password)) => {
                builder.credentials(Credentials::new(username.clone(), password.clone()))
            }
            _ => builder,
        };

        Ok(builder.build())
    }
}

#[async_trait]
impl NotificationDispatcher for EmailNotifier {
    async fn dispatch(&self, event: &LifecycleEvent) -> AppResult<()> {
        let message = self.build_message(event)?;
        let mailer = self.transport()?;

        // SMTP transport is blocking
        tokio::task::spawn_blocking(move || mailer.send(&message))
            .await
            .map_err(|e| AppError::Internal(format!("Email task failed: {}", e)))?
            .map_err(|e| AppError::Internal(format!("Failed to send email: {}", e)))?;

        Ok(())
    }
}

/// Fans committed events out to every configured dispatcher
#[derive(Clone, Default)]
pub struct Notifier {
    dispatchers: Vec<Arc<dyn NotificationDispatcher>>,
}

impl Notifier {
    pub fn new(dispatchers: Vec<Arc<dyn NotificationDispatcher>>) -> Self {
        Self { dispatchers }
    }

    /// Log dispatcher plus email when enabled
    pub fn from_config(email: &EmailConfig, notifications: &NotificationsConfig) -> Self {
        let mut dispatchers: Vec<Arc<dyn NotificationDispatcher>> = vec![Arc::new(LogNotifier)];
        if notifications.email_enabled {
            dispatchers.push(Arc::new(EmailNotifier::new(email.clone(), notifications)));
        }
        Self::new(dispatchers)
    }

    pub fn with(mut self, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        self.dispatchers.push(dispatcher);
        self
    }

    /// Deliver events; failures are logged and swallowed
    pub async fn publish(&self, events: &[LifecycleEvent]) {
        for event in events {
            for dispatcher in &self.dispatchers {
                if let Err(e) = dispatcher.dispatch(event).await {
                    tracing::warn!(
                        event_id = %event.id,
                        kind = %event.kind,
                        "Notification dispatch failed: {}",
                        e
                    );
                }
            }
        }
    }
}
