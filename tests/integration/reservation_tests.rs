//! Reservation queue and promotion

use elidune_circulation::{
    config::{CirculationPolicy, PromotionPolicy},
    error::AppError,
    models::{
        copy::CopyDisposition,
        event::EventKind,
        loan::{LoanStatus, RequestOutcome, ReturnCondition},
        reservation::ReservationStatus,
    },
};

use crate::common::{harness, harness_with, STAFF};

#[tokio::test]
async fn test_cancel_compacts_positions() {
    let h = harness();
    let (book_id, _) = h.book(1).await;
    h.checked_out(10, book_id).await;

    let mut queued = Vec::new();
    for user in 11..=14 {
        queued.push(h.queued(user, book_id).await);
    }
    assert_eq!(
        h.queue(book_id).await,
        vec![(11, 1), (12, 2), (13, 3), (14, 4)]
    );

    let cancelled = h.services.reservations.cancel(queued[1].id).await.unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);
    assert!(cancelled.closed_at.is_some());
    assert_eq!(h.queue(book_id).await, vec![(11, 1), (13, 2), (14, 3)]);
    h.assert_consistent(book_id).await;

    let err = h
        .services
        .reservations
        .cancel(queued[1].id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));

    // New arrivals go to the tail
    let tail = h.queued(15, book_id).await;
    assert_eq!(tail.position, 4);
}

#[tokio::test]
async fn test_cancelled_reservation_is_never_promoted() {
    let h = harness();
    let (book_id, _) = h.book(1).await;
    let loan = h.checked_out(10, book_id).await;

    let first = h.queued(11, book_id).await;
    h.queued(12, book_id).await;
    h.services.reservations.cancel(first.id).await.unwrap();

    h.services
        .loans
        .return_loan(loan.id, ReturnCondition::Good)
        .await
        .unwrap();

    assert!(h.loan_for(11, book_id).await.is_none());
    let promoted = h.loan_for(12, book_id).await.unwrap();
    assert_eq!(promoted.status, LoanStatus::AwaitingPickup);
    h.assert_consistent(book_id).await;
}

#[tokio::test]
async fn test_freed_copy_goes_to_queue_before_new_requests() {
    let h = harness();
    let (book_id, _) = h.book(2).await;
    let out = h.checked_out(10, book_id).await;
    h.checked_out(11, book_id).await;
    h.queued(12, book_id).await;

    // One copy back, promoted to the head; the queue is empty again
    h.services
        .loans
        .return_loan(out.id, ReturnCondition::Good)
        .await
        .unwrap();
    assert!(h.queue(book_id).await.is_empty());

    // Nothing left on the shelf: the next reader queues
    let reservation = h.queued(13, book_id).await;
    assert_eq!(reservation.position, 1);
}

#[tokio::test]
async fn test_promotion_adjusts_window_of_future_reservation() {
    let h = harness();
    let (book_id, _) = h.book(1).await;
    let loan = h.checked_out(10, book_id).await;

    let reservation = match h.request_range(11, book_id, 10, Some(15)).await {
        RequestOutcome::Queued(r) => r,
        other => panic!("unexpected {:?}", other),
    };

    h.advance_days(2);
    h.services
        .loans
        .return_loan(loan.id, ReturnCondition::Good)
        .await
        .unwrap();

    let promoted = h.loan_for(11, book_id).await.unwrap();
    assert_eq!(promoted.range.start, h.today());
    assert_eq!(promoted.range.len_days(), reservation.range.len_days());
    assert_eq!(promoted.status, LoanStatus::AwaitingPickup);
}

#[tokio::test]
async fn test_skip_policy_passes_over_future_reservation() {
    let h = harness_with(CirculationPolicy {
        promotion_policy: PromotionPolicy::SkipAndNotify,
        ..CirculationPolicy::default()
    });
    let (book_id, _) = h.book(1).await;
    let loan = h.checked_out(10, book_id).await;

    let later = match h.request_range(11, book_id, 10, Some(15)).await {
        RequestOutcome::Queued(r) => r,
        other => panic!("unexpected {:?}", other),
    };
    h.queued(12, book_id).await;

    h.advance_days(1);
    h.services
        .loans
        .return_loan(loan.id, ReturnCondition::Good)
        .await
        .unwrap();

    assert!(h.loan_for(11, book_id).await.is_none());
    assert_eq!(
        h.loan_for(12, book_id).await.unwrap().status,
        LoanStatus::AwaitingPickup
    );
    assert_eq!(h.queue(book_id).await, vec![(11, 1)]);
    assert_eq!(
        h.services.reservations.get(later.id).await.unwrap().status,
        ReservationStatus::Active
    );
    assert_eq!(h.events.count(EventKind::ReservationSkipped), 1);
    h.assert_consistent(book_id).await;
}

#[tokio::test]
async fn test_promotion_without_auto_approval_leaves_pending_loan() {
    let h = harness_with(CirculationPolicy {
        auto_approve_promotions: false,
        ..CirculationPolicy::default()
    });
    let (book_id, copies) = h.book(1).await;
    let loan = h.checked_out(10, book_id).await;
    h.queued(11, book_id).await;

    h.services
        .loans
        .return_loan(loan.id, ReturnCondition::Good)
        .await
        .unwrap();

    let promoted = h.loan_for(11, book_id).await.unwrap();
    assert_eq!(promoted.status, LoanStatus::Pending);
    assert_eq!(promoted.copy_id, None);
    assert_eq!(
        h.store.copy(copies[0].id).await.unwrap().disposition,
        CopyDisposition::Available
    );

    let approved = h.services.loans.approve(promoted.id, STAFF).await.unwrap();
    assert_eq!(approved.copy_id, Some(copies[0].id));
    h.assert_consistent(book_id).await;
}

#[tokio::test]
async fn test_reinstated_copy_promotes_queue() {
    let h = harness();
    let (book_id, copies) = h.book(1).await;

    h.services
        .availability
        .set_copy_disposition(copies[0].id, CopyDisposition::Lost)
        .await
        .unwrap();
    assert_eq!(h.available(book_id).await, 0);

    h.queued(11, book_id).await;

    let copy = h
        .services
        .availability
        .set_copy_disposition(copies[0].id, CopyDisposition::Available)
        .await
        .unwrap();
    assert_eq!(copy.disposition, CopyDisposition::HeldForPickup);
    assert_eq!(
        h.loan_for(11, book_id).await.unwrap().status,
        LoanStatus::AwaitingPickup
    );
    assert_eq!(h.events.count(EventKind::CopyAvailable), 1);
    h.assert_consistent(book_id).await;
}

#[tokio::test]
async fn test_bound_copy_cannot_be_withdrawn() {
    let h = harness();
    let (book_id, copies) = h.book(1).await;
    h.checked_out(10, book_id).await;

    let err = h
        .services
        .availability
        .set_copy_disposition(copies[0].id, CopyDisposition::Lost)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));

    let err = h
        .services
        .availability
        .set_copy_disposition(copies[0].id, CopyDisposition::HeldForPickup)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_reinstating_a_shelved_copy_changes_nothing() {
    let h = harness();
    let (book_id, copies) = h.book(1).await;

    let copy = h
        .services
        .availability
        .set_copy_disposition(copies[0].id, CopyDisposition::Available)
        .await
        .unwrap();
    assert_eq!(copy.disposition, CopyDisposition::Available);
    assert_eq!(h.events.count(EventKind::CopyAvailable), 0);
    assert_eq!(h.available(book_id).await, 1);
    h.assert_consistent(book_id).await;
}
