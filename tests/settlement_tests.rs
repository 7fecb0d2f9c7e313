//! Integration tests for bi-weekly and on-demand settlement.

#[path = "test_utils/mod.rs"]
mod test_utils;

use chrono::{NaiveDate, TimeZone, Utc};
use payroll::models::job_assignment::AssignmentPayoutStatus;
use payroll::models::pending_payout::PendingPayoutStatus;
use payroll::notifications::NotificationKind;
use payroll::repositories::{JobAssignmentRepository, PendingPayoutRepository};
use payroll::settlement::{NO_DESTINATION_REASON, OnDemandOutcome, PayeeOutcome, SettlementTrigger};
use payroll::transfers::{TransferError, idempotency_key};
use test_utils::{Harness, mid_cycle, settlement_friday};
use uuid::Uuid;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// One owner, one worker with two approved jobs worth 4000 and 3500.
async fn two_jobs(h: &Harness) -> (Uuid, Uuid, Vec<Uuid>) {
    let (owner, worker) = (Uuid::new_v4(), Uuid::new_v4());
    let first = h.appointment(Uuid::new_v4(), owner, 10_000, 1_000).await.unwrap();
    let second = h.appointment(Uuid::new_v4(), owner, 9_000, 900).await.unwrap();
    let a1 = h.flat_assignment(&first, worker, 4_000).await.unwrap();
    let a2 = h.flat_assignment(&second, worker, 3_500).await.unwrap();
    let ids = vec![h.earn(&a1).await.unwrap(), h.earn(&a2).await.unwrap()];
    (owner, worker, ids)
}

#[tokio::test]
async fn settlement_pays_each_payee_in_one_transfer() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let (_, worker, ids) = two_jobs(&h).await;
    h.verified_account(worker).await.unwrap();

    h.clock.set(settlement_friday());
    let summary = h.settlement.run_scheduled().await.unwrap();

    assert!(!summary.skipped);
    assert_eq!(summary.trigger, SettlementTrigger::Scheduled);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.total_paid, 7_500);

    let requests = h.transfers.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].amount, 7_500);
    assert_eq!(requests[0].currency, "usd");
    assert_eq!(requests[0].destination, format!("acct_{}", worker.simple()));

    let payouts = PendingPayoutRepository::new(h.db.clone());
    for id in &ids {
        let row = payouts.find_by_id(*id).await.unwrap().unwrap();
        assert_eq!(row.status, PendingPayoutStatus::Completed);
        assert_eq!(row.transfer_reference.as_deref(), Some("tr_test_1"));
        assert!(row.paid_at.is_some());

        let assignment = JobAssignmentRepository::find_by_id(h.db.as_ref(), row.job_assignment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(assignment.payout_status, AssignmentPayoutStatus::Paid);
        assert_eq!(assignment.paid_amount, Some(row.amount));
    }

    assert!(h.notifier.kinds_for(worker).contains(&NotificationKind::PayoutSent));
}

#[tokio::test]
async fn transfer_carries_batch_metadata_and_idempotency_key() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let (_, worker, ids) = two_jobs(&h).await;
    h.verified_account(worker).await.unwrap();

    h.settlement.run_for_date(date(2024, 1, 19), false).await.unwrap();

    let request = &h.transfers.requests()[0];
    assert_eq!(request.idempotency_key, idempotency_key(&ids, 0));
    assert_eq!(request.metadata["payee_id"], worker.to_string());
    assert_eq!(request.metadata["trigger"], "scheduled");
    assert!(request.metadata.contains_key("batch_id"));
    for id in &ids {
        assert!(request.metadata["payout_ids"].contains(&id.to_string()));
    }
}

#[tokio::test]
async fn non_settlement_date_is_skipped() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let (_, worker, _) = two_jobs(&h).await;
    h.verified_account(worker).await.unwrap();

    // Friday 2024-01-12 is an off week.
    let summary = h.settlement.run_for_date(date(2024, 1, 12), false).await.unwrap();

    assert!(summary.skipped);
    assert_eq!(summary.processed, 0);
    assert!(h.transfers.requests().is_empty());
}

#[tokio::test]
async fn failed_transfer_marks_every_row_failed() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let (_, worker, ids) = two_jobs(&h).await;
    h.verified_account(worker).await.unwrap();
    h.transfers.fail_with(TransferError::InsufficientPlatformBalance {
        message: "balance too low".into(),
    });

    let summary = h.settlement.run_for_date(date(2024, 1, 19), false).await.unwrap();

    assert_eq!(summary.failed, 2);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.total_paid, 0);
    assert!(matches!(summary.payees[0].outcome, PayeeOutcome::Failed { .. }));

    let payouts = PendingPayoutRepository::new(h.db.clone());
    for id in &ids {
        let row = payouts.find_by_id(*id).await.unwrap().unwrap();
        assert_eq!(row.status, PendingPayoutStatus::Failed);
        assert_eq!(row.retry_count, 1);
        assert!(row.failure_reason.is_some());
    }
    assert!(h.notifier.kinds_for(worker).contains(&NotificationKind::PayoutFailed));
}

#[tokio::test]
async fn payee_without_destination_fails_without_transfer() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let (_, worker, ids) = two_jobs(&h).await;
    h.unverified_account(worker).await.unwrap();

    let summary = h.settlement.run_for_date(date(2024, 1, 19), false).await.unwrap();

    assert!(h.transfers.requests().is_empty());
    assert_eq!(summary.failed, 2);
    let row = PendingPayoutRepository::new(h.db.clone())
        .find_by_id(ids[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, PendingPayoutStatus::Failed);
    assert_eq!(row.failure_reason.as_deref(), Some(NO_DESTINATION_REASON));
}

#[tokio::test]
async fn one_failing_payee_does_not_block_others() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let owner = Uuid::new_v4();
    let (paid, unpaid) = (Uuid::new_v4(), Uuid::new_v4());
    let appointment = h.appointment(Uuid::new_v4(), owner, 12_000, 1_200).await.unwrap();
    let a1 = h.flat_assignment(&appointment, paid, 4_000).await.unwrap();
    let a2 = h.flat_assignment(&appointment, unpaid, 3_000).await.unwrap();
    h.earn(&a1).await.unwrap();
    h.earn(&a2).await.unwrap();
    h.verified_account(paid).await.unwrap();

    let summary = h.settlement.run_for_date(date(2024, 1, 19), false).await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.total_paid, 4_000);
    assert_eq!(h.transfers.requests().len(), 1);
}

#[tokio::test]
async fn only_due_rows_are_settled() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let (_, worker, _) = two_jobs(&h).await;
    h.verified_account(worker).await.unwrap();

    // Earned after 2024-01-19, so due on the following settlement date.
    h.clock.set(Utc.with_ymd_and_hms(2024, 1, 22, 9, 0, 0).unwrap());
    let later = h
        .appointment(Uuid::new_v4(), Uuid::new_v4(), 6_000, 600)
        .await
        .unwrap();
    let late_assignment = h.flat_assignment(&later, worker, 2_000).await.unwrap();
    let late_id = h.earn(&late_assignment).await.unwrap();

    let summary = h.settlement.run_for_date(date(2024, 1, 19), false).await.unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.total_paid, 7_500);
    let late = PendingPayoutRepository::new(h.db.clone())
        .find_by_id(late_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(late.status, PendingPayoutStatus::Pending);
    assert_eq!(late.scheduled_for, date(2024, 2, 2));
}

#[tokio::test]
async fn second_pass_does_not_pay_again() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let (_, worker, _) = two_jobs(&h).await;
    h.verified_account(worker).await.unwrap();

    h.settlement.run_for_date(date(2024, 1, 19), false).await.unwrap();
    let second = h.settlement.run_for_date(date(2024, 1, 19), false).await.unwrap();

    assert_eq!(second.processed, 0);
    assert_eq!(h.transfers.requests().len(), 1);
}

#[tokio::test]
async fn early_payout_is_scoped_to_payer() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let worker = Uuid::new_v4();
    let (owner_a, owner_b) = (Uuid::new_v4(), Uuid::new_v4());
    let for_a = h.appointment(Uuid::new_v4(), owner_a, 10_000, 1_000).await.unwrap();
    let for_b = h.appointment(Uuid::new_v4(), owner_b, 10_000, 1_000).await.unwrap();
    let job_a = h.flat_assignment(&for_a, worker, 4_000).await.unwrap();
    let job_b = h.flat_assignment(&for_b, worker, 2_500).await.unwrap();
    h.earn(&job_a).await.unwrap();
    let other_id = h.earn(&job_b).await.unwrap();
    h.verified_account(worker).await.unwrap();

    let outcome = h.settlement.early_payout(worker, owner_a).await.unwrap();

    let OnDemandOutcome::Settled { settlement } = outcome else {
        panic!("expected a settlement");
    };
    assert!(settlement.is_paid());
    assert_eq!(settlement.amount, 4_000);
    assert_eq!(h.transfers.requests()[0].metadata["trigger"], "early_payout");

    let untouched = PendingPayoutRepository::new(h.db.clone())
        .find_by_id(other_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(untouched.status, PendingPayoutStatus::Pending);
}

#[tokio::test]
async fn termination_payout_covers_every_payer() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let worker = Uuid::new_v4();
    let for_a = h
        .appointment(Uuid::new_v4(), Uuid::new_v4(), 10_000, 1_000)
        .await
        .unwrap();
    let for_b = h
        .appointment(Uuid::new_v4(), Uuid::new_v4(), 10_000, 1_000)
        .await
        .unwrap();
    let job_a = h.flat_assignment(&for_a, worker, 4_000).await.unwrap();
    let job_b = h.flat_assignment(&for_b, worker, 2_500).await.unwrap();
    h.earn(&job_a).await.unwrap();
    h.earn(&job_b).await.unwrap();
    h.verified_account(worker).await.unwrap();

    let outcome = h.settlement.termination_payout(worker).await.unwrap();

    let OnDemandOutcome::Settled { settlement } = outcome else {
        panic!("expected a settlement");
    };
    assert_eq!(settlement.amount, 6_500);
    assert_eq!(settlement.payout_ids.len(), 2);
    let summary = h.ledger.pending_for_payee(worker).await.unwrap();
    assert_eq!(summary.pending.count, 0);
}

#[tokio::test]
async fn on_demand_with_nothing_pending_sends_nothing() {
    let h = Harness::new(mid_cycle()).await.unwrap();

    let outcome = h.settlement.termination_payout(Uuid::new_v4()).await.unwrap();

    assert_eq!(outcome, OnDemandOutcome::NothingPending);
    assert!(h.transfers.requests().is_empty());
}

#[tokio::test]
async fn requeued_batch_uses_fresh_idempotency_key() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let (_, worker, ids) = two_jobs(&h).await;
    h.verified_account(worker).await.unwrap();
    h.transfers.fail_with(TransferError::Network {
        message: "connection reset".into(),
    });
    h.settlement.run_for_date(date(2024, 1, 19), false).await.unwrap();

    h.transfers.succeed();
    for id in &ids {
        h.ledger.requeue_failed(*id).await.unwrap();
    }
    let summary = h.settlement.run_for_date(date(2024, 1, 19), true).await.unwrap();

    assert_eq!(summary.trigger, SettlementTrigger::Manual);
    assert_eq!(summary.total_paid, 7_500);
    let requests = h.transfers.requests();
    assert_eq!(requests.len(), 2);
    assert_ne!(requests[0].idempotency_key, requests[1].idempotency_key);
    assert_eq!(requests[1].idempotency_key, idempotency_key(&ids, 1));
}
