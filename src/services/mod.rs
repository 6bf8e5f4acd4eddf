//! Business logic services

pub mod availability;
pub mod loans;
pub mod maintenance;
pub mod notifications;
pub mod reservations;

use std::sync::Arc;

use crate::{
    clock::Clock,
    config::CirculationPolicy,
    error::AppResult,
    models::event::LifecycleEvent,
    repository::{CirculationStore, CirculationTx},
};

use notifications::Notifier;

/// Everything a circulation service needs: storage, time, rules and event delivery
#[derive(Clone)]
pub struct CirculationContext {
    pub store: Arc<dyn CirculationStore>,
    pub clock: Arc<dyn Clock>,
    pub policy: CirculationPolicy,
    pub notifier: Notifier,
}

impl CirculationContext {
    pub fn new(
        store: Arc<dyn CirculationStore>,
        clock: Arc<dyn Clock>,
        policy: CirculationPolicy,
        notifier: Notifier,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
            notifier,
        }
    }

    pub async fn begin(&self) -> AppResult<Box<dyn CirculationTx>> {
        self.store.begin().await
    }

    /// Commit, then hand the events to the notifier
    pub async fn commit_and_publish(
        &self,
        tx: Box<dyn CirculationTx>,
        events: Vec<LifecycleEvent>,
    ) -> AppResult<()> {
        tx.commit().await?;
        self.notifier.publish(&events).await;
        Ok(())
    }
}

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub availability: availability::AvailabilityService,
    pub loans: loans::LoansService,
    pub reservations: reservations::ReservationsService,
    pub maintenance: maintenance::MaintenanceService,
}

impl Services {
    pub fn new(ctx: CirculationContext) -> Self {
        let reservations = reservations::ReservationsService::new(ctx.clone());
        let loans = loans::LoansService::new(ctx.clone(), reservations.clone());
        Self {
            availability: availability::AvailabilityService::new(ctx.clone(), reservations.clone()),
            maintenance: maintenance::MaintenanceService::new(
                ctx,
                loans.clone(),
                reservations.clone(),
            ),
            loans,
            reservations,
        }
    }

    pub async fn ping(&self) -> AppResult<()> {
        self.loans.context().store.ping().await
    }
}
