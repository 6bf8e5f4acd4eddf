//! Loan state machine scenarios

use chrono::Duration;

use elidune_circulation::{
    clock::Clock,
    error::AppError,
    models::{
        copy::CopyDisposition,
        event::EventKind,
        loan::{LoanOrigin, LoanStatus, RequestOutcome, ReturnCondition},
        reservation::ReservationStatus,
    },
};

use crate::common::{harness, STAFF};

const READER_A: i32 = 10;
const READER_C: i32 = 11;

#[tokio::test]
async fn test_single_copy_handover_to_queued_reader() {
    let h = harness();
    let (book_id, copies) = h.book(1).await;

    let loan = h.granted(READER_A, book_id).await;
    assert_eq!(loan.status, LoanStatus::Pending);
    assert_eq!(loan.origin, LoanOrigin::UserRequest);

    let loan = h.services.loans.approve(loan.id, STAFF).await.unwrap();
    assert_eq!(loan.status, LoanStatus::AwaitingPickup);
    assert_eq!(loan.copy_id, Some(copies[0].id));
    assert_eq!(
        h.store.copy(copies[0].id).await.unwrap().disposition,
        CopyDisposition::HeldForPickup
    );

    let reservation = h.queued(READER_C, book_id).await;
    assert_eq!(reservation.position, 1);

    let loan = h.services.loans.confirm_pickup(loan.id).await.unwrap();
    assert_eq!(loan.status, LoanStatus::Active);
    assert_eq!(
        h.store.copy(copies[0].id).await.unwrap().disposition,
        CopyDisposition::Loaned
    );

    let returned = h
        .services
        .loans
        .return_loan(loan.id, ReturnCondition::Good)
        .await
        .unwrap();
    assert_eq!(returned.status, LoanStatus::Returned);
    assert!(returned.returned_at.is_some());

    let promoted = h.loan_for(READER_C, book_id).await.unwrap();
    assert_eq!(
        promoted.origin,
        LoanOrigin::PromotedFromReservation {
            reservation_id: reservation.id
        }
    );
    assert_eq!(promoted.status, LoanStatus::AwaitingPickup);
    assert_eq!(promoted.copy_id, Some(copies[0].id));

    let reservation = h.services.reservations.get(reservation.id).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Converted);
    assert_eq!(reservation.converted_loan_id, Some(promoted.id));

    assert!(h.queue(book_id).await.is_empty());
    assert_eq!(h.events.count(EventKind::CopyAvailable), 1);
    assert_eq!(h.events.count(EventKind::ReservationPromoted), 1);
    h.assert_consistent(book_id).await;
}

#[tokio::test]
async fn test_rejected_loan_reads_as_missing() {
    let h = harness();
    let (book_id, _) = h.book(1).await;
    let before = h.available(book_id).await;

    let loan = h.granted(READER_A, book_id).await;
    h.services
        .loans
        .reject(loan.id, STAFF, Some("Reference copy".to_string()))
        .await
        .unwrap();

    let err = h.services.loans.get(loan.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(h.available(book_id).await, before);
    assert_eq!(h.events.count(EventKind::LoanRejected), 1);

    // The reader may ask again once rejected
    assert!(matches!(
        h.request(READER_A, book_id).await,
        RequestOutcome::Granted(_)
    ));
}

#[tokio::test]
async fn test_duplicate_requests_are_refused() {
    let h = harness();
    let (book_id, _) = h.book(1).await;

    h.granted(READER_A, book_id).await;
    let err = h
        .services
        .loans
        .request(READER_A, book_id, h.today(), None, LoanOrigin::UserRequest)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DuplicateRequest(_)));

    h.queued(READER_C, book_id).await;
    let err = h
        .services
        .loans
        .request(READER_C, book_id, h.day(2), None, LoanOrigin::UserRequest)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DuplicateRequest(_)));
    assert_eq!(h.queue(book_id).await, vec![(READER_C, 1)]);
}

#[tokio::test]
async fn test_request_dates_are_validated() {
    let h = harness();
    let (book_id, _) = h.book(1).await;

    let past = h
        .services
        .loans
        .request(READER_A, book_id, h.day(-1), None, LoanOrigin::UserRequest)
        .await;
    assert!(matches!(past, Err(AppError::Validation(_))));

    let inverted = h
        .services
        .loans
        .request(READER_A, book_id, h.day(5), Some(h.day(4)), LoanOrigin::UserRequest)
        .await;
    assert!(matches!(inverted, Err(AppError::Validation(_))));

    let too_long = h
        .services
        .loans
        .request(READER_A, book_id, h.today(), Some(h.day(120)), LoanOrigin::UserRequest)
        .await;
    assert!(matches!(too_long, Err(AppError::Validation(_))));

    let missing = h
        .services
        .loans
        .request(READER_A, 999, h.today(), None, LoanOrigin::UserRequest)
        .await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_default_period_when_end_is_omitted() {
    let h = harness();
    let (book_id, _) = h.book(1).await;

    let loan = h.granted(READER_A, book_id).await;
    assert_eq!(loan.range.start, h.today());
    assert_eq!(loan.range.len_days(), 21);
}

#[tokio::test]
async fn test_future_window_is_granted_past_current_loan() {
    let h = harness();
    let (book_id, _) = h.book(1).await;

    let out = h.checked_out(READER_A, book_id).await;
    assert_eq!(out.due_date, Some(h.day(20)));

    // Starts the day after the copy is due back
    let later = h.request_range(READER_C, book_id, 21, Some(28)).await;
    assert!(matches!(later, RequestOutcome::Granted(_)));

    // Starts on the due date itself: boundaries touch, so it overlaps
    let touching = h.request_range(12, book_id, 20, Some(25)).await;
    assert!(matches!(touching, RequestOutcome::Queued(_)));
}

#[tokio::test]
async fn test_approve_requires_pending() {
    let h = harness();
    let (book_id, _) = h.book(1).await;

    let loan = h.checked_out(READER_A, book_id).await;
    let err = h.services.loans.approve(loan.id, STAFF).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));

    let err = h
        .services
        .loans
        .reject(loan.id, STAFF, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));
}

#[tokio::test]
async fn test_pickup_after_deadline_is_refused() {
    let h = harness();
    let (book_id, _) = h.book(1).await;

    let loan = h.granted(READER_A, book_id).await;
    let loan = h.services.loans.approve(loan.id, STAFF).await.unwrap();
    assert_eq!(
        loan.pickup_deadline,
        Some(h.clock.now() + Duration::hours(72))
    );

    h.clock.advance(Duration::hours(73));
    let err = h.services.loans.confirm_pickup(loan.id).await.unwrap_err();
    assert!(matches!(err, AppError::PickupDeadlinePassed(_)));

    let loan = h.services.loans.get(loan.id).await.unwrap();
    assert_eq!(loan.status, LoanStatus::AwaitingPickup);
}

#[tokio::test]
async fn test_renewal_limit() {
    let h = harness();
    let (book_id, _) = h.book(1).await;
    let loan = h.checked_out(READER_A, book_id).await;
    let due = loan.due_date.unwrap();

    let loan = h.services.loans.renew(loan.id).await.unwrap();
    assert_eq!(loan.nb_renews, 1);
    assert_eq!(loan.due_date, Some(due + Duration::days(21)));

    let loan = h.services.loans.renew(loan.id).await.unwrap();
    assert_eq!(loan.nb_renews, 2);

    let err = h.services.loans.renew(loan.id).await.unwrap_err();
    assert!(matches!(err, AppError::RenewalLimitExceeded(_)));
    assert_eq!(h.services.loans.get(loan.id).await.unwrap().nb_renews, 2);
}

#[tokio::test]
async fn test_renewal_refused_when_it_overlaps_a_granted_window() {
    let h = harness();
    let (book_id, _) = h.book(1).await;
    let out = h.checked_out(READER_A, book_id).await;
    assert_eq!(out.due_date, Some(h.day(20)));

    let next = match h.request_range(READER_C, book_id, 25, Some(30)).await {
        RequestOutcome::Granted(loan) => loan,
        other => panic!("unexpected {:?}", other),
    };

    let err = h.services.loans.renew(out.id).await.unwrap_err();
    assert!(matches!(err, AppError::NoCopyAvailable(_)));

    let out = h.services.loans.get(out.id).await.unwrap();
    assert_eq!(out.nb_renews, 0);
    assert_eq!(out.due_date, Some(h.day(20)));

    // Once the later window is released the renewal goes through
    h.services.loans.reject(next.id, STAFF, None).await.unwrap();
    let renewed = h.services.loans.renew(out.id).await.unwrap();
    assert_eq!(renewed.due_date, Some(h.day(41)));
}

#[tokio::test]
async fn test_renewal_with_a_spare_copy_is_allowed() {
    let h = harness();
    let (book_id, _) = h.book(2).await;
    let out = h.checked_out(READER_A, book_id).await;
    h.request_range(READER_C, book_id, 25, Some(30)).await;

    let renewed = h.services.loans.renew(out.id).await.unwrap();
    assert_eq!(renewed.nb_renews, 1);
    h.assert_consistent(book_id).await;
}

#[tokio::test]
async fn test_overdue_loan_cannot_be_renewed_but_can_be_returned() {
    let h = harness();
    let (book_id, _) = h.book(1).await;
    let loan = h.checked_out(READER_A, book_id).await;

    h.advance_days(25);
    h.services.loans.mark_overdue(loan.id).await.unwrap();

    let err = h.services.loans.renew(loan.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));

    let loan = h
        .services
        .loans
        .return_loan(loan.id, ReturnCondition::Good)
        .await
        .unwrap();
    assert_eq!(loan.status, LoanStatus::Returned);
}

#[tokio::test]
async fn test_return_frees_exactly_one_copy() {
    let h = harness();
    let (book_id, _) = h.book(2).await;

    let loan = h.checked_out(READER_A, book_id).await;
    assert_eq!(h.available(book_id).await, 1);

    h.services
        .loans
        .return_loan(loan.id, ReturnCondition::Good)
        .await
        .unwrap();
    assert_eq!(h.available(book_id).await, 2);
    h.assert_consistent(book_id).await;

    let err = h
        .services
        .loans
        .return_loan(loan.id, ReturnCondition::Good)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));
}

#[tokio::test]
async fn test_damaged_return_sets_copy_aside() {
    let h = harness();
    let (book_id, copies) = h.book(1).await;

    let loan = h.checked_out(READER_A, book_id).await;
    h.queued(READER_C, book_id).await;

    h.services
        .loans
        .return_loan(loan.id, ReturnCondition::Damaged)
        .await
        .unwrap();

    assert_eq!(
        h.store.copy(copies[0].id).await.unwrap().disposition,
        CopyDisposition::Damaged
    );
    assert_eq!(h.available(book_id).await, 0);
    assert_eq!(h.queue(book_id).await, vec![(READER_C, 1)]);
    assert_eq!(h.events.count(EventKind::CopyAvailable), 0);
    h.assert_consistent(book_id).await;
}

#[tokio::test]
async fn test_user_loans_lists_open_loans_only() {
    let h = harness();
    let (first, _) = h.book(1).await;
    let (second, _) = h.book(1).await;

    let done = h.checked_out(READER_A, first).await;
    h.services
        .loans
        .return_loan(done.id, ReturnCondition::Good)
        .await
        .unwrap();
    let open = h.granted(READER_A, second).await;

    let loans = h.services.loans.user_loans(READER_A).await.unwrap();
    assert_eq!(loans.len(), 1);
    assert_eq!(loans[0].id, open.id);
}
