//! Integration tests for the completion approval workflow and owner release.

#[path = "test_utils/mod.rs"]
mod test_utils;

use std::sync::Arc;

use chrono::Duration;
use payroll::approval::OwnerRelease;
use payroll::approval_monitor::AutoApprovalMonitor;
use payroll::clock::Clock;
use payroll::config::ApprovalConfig;
use payroll::error::SettlementError;
use payroll::models::appointment::AppointmentPaymentStatus;
use payroll::models::completion_record::{ApprovedBy, CompletionStatus};
use payroll::models::job_assignment::PayType;
use payroll::models::pending_payout::PendingPayoutStatus;
use payroll::notifications::NotificationKind;
use payroll::repositories::job_assignment::NewJobAssignment;
use payroll::repositories::{
    AppointmentRepository, CompletionRecordRepository, JobAssignmentRepository,
};
use test_utils::{Harness, mid_cycle};
use uuid::Uuid;

struct Job {
    homeowner: Uuid,
    owner: Uuid,
    worker: Uuid,
    appointment_id: Uuid,
}

/// 10000 job with a 1500 fee, one employee on a 4000 flat rate.
async fn single_cleaner_job(h: &Harness) -> Job {
    let (homeowner, owner, worker) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let appointment = h.appointment(homeowner, owner, 10_000, 1_500).await.unwrap();
    h.flat_assignment(&appointment, worker, 4_000).await.unwrap();
    Job {
        homeowner,
        owner,
        worker,
        appointment_id: appointment.id,
    }
}

#[tokio::test]
async fn submit_uses_default_window_without_pricing_row() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let job = single_cleaner_job(&h).await;

    let record = h.approvals.submit(job.appointment_id, job.worker).await.unwrap();

    assert_eq!(record.status, CompletionStatus::Submitted);
    let expires_at = record.auto_approval_expires_at.unwrap();
    assert_eq!(expires_at, (mid_cycle() + Duration::hours(4)).fixed_offset());
    assert!(
        h.notifier
            .kinds_for(job.homeowner)
            .contains(&NotificationKind::CompletionSubmitted)
    );
}

#[tokio::test]
async fn submit_uses_configured_window() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    h.pricing_window(Some(24)).await.unwrap();
    let job = single_cleaner_job(&h).await;

    let record = h.approvals.submit(job.appointment_id, job.worker).await.unwrap();

    assert_eq!(
        record.auto_approval_expires_at.unwrap(),
        (mid_cycle() + Duration::hours(24)).fixed_offset()
    );
}

#[tokio::test]
async fn submit_twice_is_rejected() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let job = single_cleaner_job(&h).await;
    h.approvals.submit(job.appointment_id, job.worker).await.unwrap();

    let again = h.approvals.submit(job.appointment_id, job.worker).await;

    assert!(matches!(
        again,
        Err(SettlementError::InvalidTransition {
            current: CompletionStatus::Submitted,
            ..
        })
    ));
}

#[tokio::test]
async fn unassigned_cleaner_cannot_submit() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let job = single_cleaner_job(&h).await;

    let result = h.approvals.submit(job.appointment_id, Uuid::new_v4()).await;

    assert!(matches!(result, Err(SettlementError::Forbidden(_))));
}

#[tokio::test]
async fn only_the_homeowner_can_approve() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let job = single_cleaner_job(&h).await;
    let record = h.approvals.submit(job.appointment_id, job.worker).await.unwrap();

    let result = h.approvals.approve(record.id, Uuid::new_v4()).await;

    assert!(matches!(result, Err(SettlementError::Forbidden(_))));
    assert!(h.ledger.pending_for_payee(job.worker).await.unwrap().pending.entries.is_empty());
}

#[tokio::test]
async fn manual_approval_records_earning_and_releases_owner_share() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let job = single_cleaner_job(&h).await;
    h.verified_account(job.owner).await.unwrap();
    let record = h.approvals.submit(job.appointment_id, job.worker).await.unwrap();

    let outcome = h.approvals.approve(record.id, job.homeowner).await.unwrap();

    assert_eq!(outcome.record.status, CompletionStatus::Approved);
    assert_eq!(outcome.approved_by, ApprovedBy::Homeowner(job.homeowner));
    assert_eq!(outcome.earnings.len(), 1);
    assert_eq!(outcome.earnings[0].amount, 4_000);

    // 10000 - 1500 fee - 4000 employee pay
    let Some(OwnerRelease::Released { amount, .. }) = outcome.owner_release else {
        panic!("expected owner release, got {:?}", outcome.owner_release);
    };
    assert_eq!(amount, 4_500);

    let requests = h.transfers.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].amount, 4_500);
    assert_eq!(
        requests[0].idempotency_key,
        format!("owner-release-{}", job.appointment_id)
    );

    let appointment = AppointmentRepository::find_by_id(h.db.as_ref(), job.appointment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(appointment.payment_status, AppointmentPaymentStatus::Released);
    assert_eq!(appointment.owner_paid_amount, Some(4_500));

    assert!(h.notifier.kinds_for(job.worker).contains(&NotificationKind::CompletionApproved));
    assert!(h.notifier.kinds_for(job.owner).contains(&NotificationKind::PaymentReleased));
}

#[tokio::test]
async fn owner_release_without_destination_is_marked_failed() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let job = single_cleaner_job(&h).await;
    let record = h.approvals.submit(job.appointment_id, job.worker).await.unwrap();

    let outcome = h.approvals.approve(record.id, job.homeowner).await.unwrap();

    assert!(matches!(
        outcome.owner_release,
        Some(OwnerRelease::Failed { amount: 4_500, .. })
    ));
    let appointment = AppointmentRepository::find_by_id(h.db.as_ref(), job.appointment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        appointment.payment_status,
        AppointmentPaymentStatus::OwnerTransferFailed
    );
}

#[tokio::test]
async fn auto_approval_after_window_pays_exactly_once() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let job = single_cleaner_job(&h).await;
    let record = h.approvals.submit(job.appointment_id, job.worker).await.unwrap();

    h.clock.advance(Duration::hours(5));
    let outcome = h.approvals.auto_approve(record.id).await.unwrap();

    assert_eq!(outcome.record.status, CompletionStatus::AutoApproved);
    assert_eq!(outcome.record.approved_by, None);
    assert_eq!(outcome.earnings.len(), 1);

    let late = h.approvals.approve(record.id, job.homeowner).await;
    assert!(matches!(
        late,
        Err(SettlementError::InvalidTransition {
            current: CompletionStatus::AutoApproved,
            ..
        })
    ));

    let summary = h.ledger.pending_for_payee(job.worker).await.unwrap();
    assert_eq!(summary.pending.count, 1);
    assert_eq!(summary.pending.total_amount, 4_000);
}

#[tokio::test]
async fn auto_approval_after_manual_approval_is_rejected() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let job = single_cleaner_job(&h).await;
    let record = h.approvals.submit(job.appointment_id, job.worker).await.unwrap();
    h.approvals.approve(record.id, job.homeowner).await.unwrap();

    h.clock.advance(Duration::hours(5));
    let result = h.approvals.auto_approve(record.id).await;

    assert!(matches!(
        result,
        Err(SettlementError::InvalidTransition {
            current: CompletionStatus::Approved,
            ..
        })
    ));
    assert_eq!(h.ledger.pending_for_payee(job.worker).await.unwrap().pending.count, 1);
}

#[tokio::test]
async fn auto_approval_before_window_closes_is_rejected() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let job = single_cleaner_job(&h).await;
    let record = h.approvals.submit(job.appointment_id, job.worker).await.unwrap();

    h.clock.advance(Duration::hours(3));
    let result = h.approvals.auto_approve(record.id).await;

    assert!(matches!(result, Err(SettlementError::Validation(_))));
}

#[tokio::test]
async fn monitor_tick_approves_only_expired_submissions() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let early = single_cleaner_job(&h).await;
    let early_record = h
        .approvals
        .submit(early.appointment_id, early.worker)
        .await
        .unwrap();

    h.clock.advance(Duration::hours(3));
    let later = single_cleaner_job(&h).await;
    h.approvals.submit(later.appointment_id, later.worker).await.unwrap();

    h.clock.advance(Duration::hours(2));
    let clock: Arc<dyn Clock> = Arc::new(h.clock.clone());
    let monitor = AutoApprovalMonitor::new(
        h.approvals.clone(),
        CompletionRecordRepository::new(h.db.clone()),
        clock,
        &ApprovalConfig::default(),
    );
    let summary = monitor.tick().await.unwrap();

    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.approved, 1);
    assert_eq!(summary.errors, 0);
    let record = CompletionRecordRepository::find_by_id(h.db.as_ref(), early_record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, CompletionStatus::AutoApproved);

    let second = monitor.tick().await.unwrap();
    assert_eq!(second.scanned, 0);
}

#[tokio::test]
async fn monitor_tick_continues_past_a_failing_record() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let (homeowner, owner, stuck_worker) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let appointment = h.appointment(homeowner, owner, 10_000, 1_500).await.unwrap();
    let stuck_assignment = h.flat_assignment(&appointment, stuck_worker, 4_000).await.unwrap();
    h.unlinked_active_payout(&stuck_assignment).await.unwrap();
    let stuck_record = h.approvals.submit(appointment.id, stuck_worker).await.unwrap();

    h.clock.advance(Duration::minutes(30));
    let healthy = single_cleaner_job(&h).await;
    let healthy_record = h
        .approvals
        .submit(healthy.appointment_id, healthy.worker)
        .await
        .unwrap();

    h.clock.advance(Duration::hours(5));
    let clock: Arc<dyn Clock> = Arc::new(h.clock.clone());
    let monitor = AutoApprovalMonitor::new(
        h.approvals.clone(),
        CompletionRecordRepository::new(h.db.clone()),
        clock,
        &ApprovalConfig::default(),
    );
    let summary = monitor.tick().await.unwrap();

    assert_eq!(summary.scanned, 2);
    assert_eq!(summary.approved, 1);
    assert_eq!(summary.errors, 1);

    let stuck = CompletionRecordRepository::find_by_id(h.db.as_ref(), stuck_record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stuck.status, CompletionStatus::Submitted);
    let approved = CompletionRecordRepository::find_by_id(h.db.as_ref(), healthy_record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(approved.status, CompletionStatus::AutoApproved);
}

#[tokio::test]
async fn zero_pay_inputs_do_not_create_assignments() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let appointment = h
        .appointment(Uuid::new_v4(), Uuid::new_v4(), 10_000, 1_500)
        .await
        .unwrap();
    let repo = JobAssignmentRepository::new(h.db.clone());

    for (pay_type, hourly_rate, flat_rate, hours_worked) in [
        (PayType::Flat, None, Some(0), None),
        (PayType::Flat, None, Some(-2_000), None),
        (PayType::Hourly, Some(2_000), None, Some(0.0)),
    ] {
        let created = repo
            .create(
                NewJobAssignment {
                    appointment_id: appointment.id,
                    business_id: appointment.payer_id,
                    worker_id: Uuid::new_v4(),
                    pay_type,
                    hourly_rate,
                    flat_rate,
                    hours_worked,
                },
                mid_cycle(),
            )
            .await
            .unwrap();
        assert!(created.is_none(), "{pay_type:?} {flat_rate:?} {hours_worked:?}");
    }
}

#[tokio::test]
async fn stored_zero_pay_assignment_does_not_block_approval() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let (homeowner, owner, worker) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let appointment = h.appointment(homeowner, owner, 10_000, 1_500).await.unwrap();
    h.zero_pay_assignment(&appointment, worker).await.unwrap();
    h.verified_account(owner).await.unwrap();
    let record = h.approvals.submit(appointment.id, worker).await.unwrap();

    let outcome = h.approvals.approve(record.id, homeowner).await.unwrap();

    assert_eq!(outcome.record.status, CompletionStatus::Approved);
    assert!(outcome.earnings.is_empty());
    assert!(matches!(
        outcome.owner_release,
        Some(OwnerRelease::Released { amount: 8_500, .. })
    ));
    assert_eq!(h.ledger.pending_for_payee(worker).await.unwrap().pending.count, 0);
}

#[tokio::test]
async fn resubmitting_an_approved_completion_is_rejected() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let job = single_cleaner_job(&h).await;
    let record = h.approvals.submit(job.appointment_id, job.worker).await.unwrap();
    h.approvals.approve(record.id, job.homeowner).await.unwrap();

    let again = h.approvals.submit(job.appointment_id, job.worker).await;

    assert!(matches!(
        again,
        Err(SettlementError::InvalidTransition {
            current: CompletionStatus::Approved,
            attempted: CompletionStatus::Submitted,
            ..
        })
    ));
}

#[tokio::test]
async fn disputing_twice_is_rejected() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let job = single_cleaner_job(&h).await;
    let record = h.approvals.submit(job.appointment_id, job.worker).await.unwrap();
    h.approvals
        .dispute(record.id, job.homeowner, "missed the kitchen")
        .await
        .unwrap();

    let again = h
        .approvals
        .dispute(record.id, job.homeowner, "still missed the kitchen")
        .await;

    assert!(matches!(
        again,
        Err(SettlementError::InvalidTransition {
            current: CompletionStatus::Disputed,
            attempted: CompletionStatus::Disputed,
            ..
        })
    ));
}

#[tokio::test]
async fn owner_share_waits_for_every_cleaner() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let (homeowner, owner) = (Uuid::new_v4(), Uuid::new_v4());
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let appointment = h.appointment(homeowner, owner, 20_000, 2_000).await.unwrap();
    h.flat_assignment(&appointment, alice, 5_000).await.unwrap();
    h.flat_assignment(&appointment, bob, 6_000).await.unwrap();
    h.verified_account(owner).await.unwrap();

    let alice_record = h.approvals.submit(appointment.id, alice).await.unwrap();
    let bob_record = h.approvals.submit(appointment.id, bob).await.unwrap();

    let first = h.approvals.approve(alice_record.id, homeowner).await.unwrap();
    assert_eq!(first.owner_release, None);
    assert!(h.transfers.requests().is_empty());

    let second = h.approvals.approve(bob_record.id, homeowner).await.unwrap();
    let Some(OwnerRelease::Released { amount, .. }) = second.owner_release else {
        panic!("expected owner release, got {:?}", second.owner_release);
    };
    assert_eq!(amount, 20_000 - 2_000 - 5_000 - 6_000);
    assert_eq!(h.transfers.requests().len(), 1);
}

#[tokio::test]
async fn owner_self_assignment_is_paid_through_release_only() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let (homeowner, owner) = (Uuid::new_v4(), Uuid::new_v4());
    let appointment = h.appointment(homeowner, owner, 9_000, 900).await.unwrap();
    h.flat_assignment(&appointment, owner, 3_000).await.unwrap();
    h.verified_account(owner).await.unwrap();

    let record = h.approvals.submit(appointment.id, owner).await.unwrap();
    let outcome = h.approvals.approve(record.id, homeowner).await.unwrap();

    assert!(outcome.earnings.is_empty());
    assert!(h.ledger.pending_for_payer(owner).await.unwrap().pending.entries.is_empty());
    assert!(matches!(
        outcome.owner_release,
        Some(OwnerRelease::Released { amount: 8_100, .. })
    ));
}

#[tokio::test]
async fn independent_cleaner_without_assignments_can_complete() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let (homeowner, cleaner) = (Uuid::new_v4(), Uuid::new_v4());
    let appointment = h.appointment(homeowner, cleaner, 7_000, 700).await.unwrap();
    h.verified_account(cleaner).await.unwrap();

    let record = h.approvals.submit(appointment.id, cleaner).await.unwrap();
    let outcome = h.approvals.approve(record.id, homeowner).await.unwrap();

    assert!(outcome.earnings.is_empty());
    assert!(matches!(
        outcome.owner_release,
        Some(OwnerRelease::Released { amount: 6_300, .. })
    ));
}

#[tokio::test]
async fn employee_pay_exceeding_net_retains_nothing() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let (homeowner, owner, worker) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let appointment = h.appointment(homeowner, owner, 5_000, 1_000).await.unwrap();
    h.flat_assignment(&appointment, worker, 4_500).await.unwrap();
    h.verified_account(owner).await.unwrap();

    let record = h.approvals.submit(appointment.id, worker).await.unwrap();
    let outcome = h.approvals.approve(record.id, homeowner).await.unwrap();

    assert_eq!(outcome.owner_release, Some(OwnerRelease::NothingRetained));
    assert!(h.transfers.requests().is_empty());
}

#[tokio::test]
async fn dispute_before_approval_blocks_payment() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let job = single_cleaner_job(&h).await;
    let record = h.approvals.submit(job.appointment_id, job.worker).await.unwrap();

    let disputed = h
        .approvals
        .dispute(record.id, job.homeowner, "bathroom not cleaned")
        .await
        .unwrap();

    assert_eq!(disputed.record.status, CompletionStatus::Disputed);
    assert_eq!(
        disputed.record.dispute_reason.as_deref(),
        Some("bathroom not cleaned")
    );
    assert!(disputed.cancelled_payouts.is_empty());
    assert!(
        h.notifier
            .kinds_for(job.worker)
            .contains(&NotificationKind::CompletionDisputed)
    );

    h.clock.advance(Duration::hours(5));
    let auto = h.approvals.auto_approve(record.id).await;
    assert!(matches!(auto, Err(SettlementError::InvalidTransition { .. })));
    assert_eq!(h.ledger.pending_for_payee(job.worker).await.unwrap().pending.count, 0);
}

#[tokio::test]
async fn dispute_requires_reason() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let job = single_cleaner_job(&h).await;
    let record = h.approvals.submit(job.appointment_id, job.worker).await.unwrap();

    let result = h.approvals.dispute(record.id, job.homeowner, "").await;

    assert!(matches!(result, Err(SettlementError::Validation(_))));
}

#[tokio::test]
async fn late_dispute_cancels_pending_earnings() {
    let h = Harness::new(mid_cycle()).await.unwrap();
    let job = single_cleaner_job(&h).await;
    let record = h.approvals.submit(job.appointment_id, job.worker).await.unwrap();
    let approved = h.approvals.approve(record.id, job.homeowner).await.unwrap();
    let payout_id = approved.earnings[0].id;

    let disputed = h
        .approvals
        .dispute(record.id, job.homeowner, "damage found afterwards")
        .await
        .unwrap();

    assert_eq!(disputed.record.status, CompletionStatus::Approved);
    assert_eq!(disputed.cancelled_payouts.len(), 1);
    assert_eq!(disputed.cancelled_payouts[0].id, payout_id);
    assert_eq!(
        disputed.cancelled_payouts[0].status,
        PendingPayoutStatus::Cancelled
    );
    assert_eq!(h.ledger.pending_for_payee(job.worker).await.unwrap().pending.count, 0);
}
