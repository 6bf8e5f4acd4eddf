//! Shared fixtures: in-memory store, fixed clock and an event recorder

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use elidune_circulation::{
    clock::{Clock, FixedClock},
    config::CirculationPolicy,
    error::AppResult,
    models::{
        copy::{BookCopy, CopyDisposition},
        event::{EventKind, LifecycleEvent},
        loan::{Loan, LoanOrigin, RequestOutcome},
        reservation::{Reservation, ReservationStatus},
    },
    repository::MemoryStore,
    services::{
        notifications::{NotificationDispatcher, Notifier},
        CirculationContext, Services,
    },
};

pub const STAFF: i32 = 1;

/// Keeps every published event for assertions
#[derive(Clone, Default)]
pub struct RecordingDispatcher {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl RecordingDispatcher {
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().unwrap().iter().map(|e| e.kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn dispatch(&self, event: &LifecycleEvent) -> AppResult<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub clock: FixedClock,
    pub services: Services,
    pub events: RecordingDispatcher,
}

/// Monday morning, opening hours
pub fn opening() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap()
}

pub fn harness() -> Harness {
    harness_with(CirculationPolicy::default())
}

pub fn harness_with(policy: CirculationPolicy) -> Harness {
    let store = MemoryStore::new();
    let clock = FixedClock::new(opening());
    let events = RecordingDispatcher::default();
    let ctx = CirculationContext::new(
        Arc::new(store.clone()),
        Arc::new(clock.clone()),
        policy,
        Notifier::default().with(Arc::new(events.clone())),
    );

    Harness {
        store,
        clock,
        services: Services::new(ctx),
        events,
    }
}

impl Harness {
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn day(&self, offset: i64) -> NaiveDate {
        self.today() + Duration::days(offset)
    }

    pub fn advance_days(&self, days: i64) {
        self.clock.advance(Duration::days(days));
    }

    pub async fn book(&self, copies: usize) -> (i32, Vec<BookCopy>) {
        let (book, copies) = self.store.add_book("Dune", copies).await;
        (book.id, copies)
    }

    /// Request from today for the default period
    pub async fn request(&self, user_id: i32, book_id: i32) -> RequestOutcome {
        self.request_range(user_id, book_id, 0, None).await
    }

    pub async fn request_range(
        &self,
        user_id: i32,
        book_id: i32,
        start: i64,
        end: Option<i64>,
    ) -> RequestOutcome {
        self.services
            .loans
            .request(
                user_id,
                book_id,
                self.day(start),
                end.map(|e| self.day(e)),
                LoanOrigin::UserRequest,
            )
            .await
            .unwrap()
    }

    pub async fn granted(&self, user_id: i32, book_id: i32) -> Loan {
        match self.request(user_id, book_id).await {
            RequestOutcome::Granted(loan) => loan,
            RequestOutcome::Queued(r) => panic!("expected a loan, got reservation {}", r.id),
        }
    }

    pub async fn queued(&self, user_id: i32, book_id: i32) -> Reservation {
        match self.request(user_id, book_id).await {
            RequestOutcome::Queued(reservation) => reservation,
            RequestOutcome::Granted(l) => panic!("expected a reservation, got loan {}", l.id),
        }
    }

    /// Request, approve and pick up
    pub async fn checked_out(&self, user_id: i32, book_id: i32) -> Loan {
        let loan = self.granted(user_id, book_id).await;
        self.services.loans.approve(loan.id, STAFF).await.unwrap();
        self.services.loans.confirm_pickup(loan.id).await.unwrap()
    }

    pub async fn available(&self, book_id: i32) -> i32 {
        self.services
            .availability
            .available_count(book_id)
            .await
            .unwrap()
    }

    pub async fn loan_for(&self, user_id: i32, book_id: i32) -> Option<Loan> {
        self.store
            .loans_for_book(book_id)
            .await
            .into_iter()
            .filter(|l| l.user_id == user_id)
            .max_by_key(|l| l.id)
    }

    /// Active queue as (user, position), head first
    pub async fn queue(&self, book_id: i32) -> Vec<(i32, i32)> {
        self.services
            .reservations
            .queue(book_id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.user_id, r.position))
            .collect()
    }

    /// Availability, copy binding and queue invariants for one book
    pub async fn assert_consistent(&self, book_id: i32) {
        let loans = self.store.loans_for_book(book_id).await;
        let holders: Vec<&Loan> = loans.iter().filter(|l| l.status.holds_copy()).collect();

        let bound: HashSet<i32> = holders.iter().filter_map(|l| l.copy_id).collect();
        assert_eq!(bound.len(), holders.len(), "a copy is bound to two open loans");

        let mut expected = 0;
        for copy in self.store.copies_of(book_id).await {
            if copy.disposition == CopyDisposition::Available && !bound.contains(&copy.id) {
                expected += 1;
            }
            if bound.contains(&copy.id) {
                assert!(copy.disposition.is_bound(), "copy {} bound but {}", copy.id, copy.disposition);
            }
        }

        let availability = self.services.availability.availability(book_id).await.unwrap();
        assert_eq!(availability.available, expected);
        assert_eq!(availability.cached, expected);

        let mut positions: Vec<i32> = self
            .store
            .reservations_for_book(book_id)
            .await
            .into_iter()
            .filter(|r| r.status == ReservationStatus::Active)
            .map(|r| r.position)
            .collect();
        positions.sort_unstable();
        let gapless: Vec<i32> = (1..=positions.len() as i32).collect();
        assert_eq!(positions, gapless);
    }
}
