//! End-to-end coverage of the approval workflow boundary against an
//! in-memory database with the demo seed loaded.

use chrono::{Duration, Utc};

use keyturn_core::audit::InMemoryAuditSink;
use keyturn_core::authorize::StepActor;
use keyturn_core::domain::property::{
    MovementDetail, MovementStatus, PropertyId, PropertyMovementId, PropertyStatus,
};
use keyturn_core::domain::request::{Decision, RequestId, RequestStatus, ResponseStatus, UserId};
use keyturn_core::domain::workflow::RoleId;
use keyturn_db::repositories::{PropertyRepository, SqlPropertyRepository};
use keyturn_db::{
    connect_with_settings, migrations, DbPool, NewMovement, SeedDataset, WorkflowError,
    WorkflowService,
};

async fn setup() -> (WorkflowService<InMemoryAuditSink>, DbPool) {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    SeedDataset::load(&pool).await.expect("seed");
    (WorkflowService::new(pool.clone(), InMemoryAuditSink::default()), pool)
}

fn actor(user: &str, role_id: &str, role_name: &str, level: u8) -> StepActor {
    StepActor {
        user_id: UserId(user.to_string()),
        role_id: RoleId(role_id.to_string()),
        role_name: role_name.to_string(),
        role_level: level,
        is_administrator: false,
    }
}

fn custodian() -> StepActor {
    actor("u-custodian-01", "role-custodian", "Custodian", 1)
}

fn supervisor() -> StepActor {
    actor("u-supervisor-01", "role-supervisor", "Supervisor", 2)
}

fn manager() -> StepActor {
    actor("u-manager-01", "role-manager", "Property Manager", 3)
}

fn gso_director() -> StepActor {
    actor("u-director-01", "role-gso-director", "GSO Director", 4)
}

fn administrator() -> StepActor {
    let mut admin = actor("u-admin-01", "role-admin", "Administrator", 5);
    admin.is_administrator = true;
    admin
}

fn release(property_id: &str) -> NewMovement {
    NewMovement {
        property_id: PropertyId(property_id.to_string()),
        detail: MovementDetail::Release {
            recipient: "Provincial Engineering Office".to_string(),
            destination: "Motor pool annex".to_string(),
            remarks: None,
        },
    }
}

fn turnover(property_id: &str, incoming: &str) -> NewMovement {
    NewMovement {
        property_id: PropertyId(property_id.to_string()),
        detail: MovementDetail::Turnover {
            incoming_custodian: UserId(incoming.to_string()),
            remarks: Some("custodian reassignment".to_string()),
        },
    }
}

fn returning(property_id: &str) -> NewMovement {
    NewMovement {
        property_id: PropertyId(property_id.to_string()),
        detail: MovementDetail::Return {
            return_reason: "End of assignment".to_string(),
            condition: "Serviceable".to_string(),
            remarks: None,
        },
    }
}

async fn property_status(pool: &DbPool, property_id: &str) -> PropertyStatus {
    let repo = SqlPropertyRepository::new(pool.clone());
    repo.find_by_id(&PropertyId(property_id.to_string()))
        .await
        .expect("find property")
        .expect("property exists")
        .status
}

async fn movement_status(pool: &DbPool, movement_id: &PropertyMovementId) -> MovementStatus {
    let repo = SqlPropertyRepository::new(pool.clone());
    repo.find_movement(movement_id)
        .await
        .expect("find movement")
        .expect("movement exists")
        .status
}

#[tokio::test]
async fn two_step_release_happy_path() {
    let (service, pool) = setup().await;

    let created = service
        .create_with_approval(release("prop-0001"), &UserId("u-custodian-01".to_string()), "corr-1")
        .await
        .expect("create release");
    assert_eq!(created.next_approver_role, "Supervisor");

    let history = service.request_with_history(&created.request_id).await.expect("history");
    assert_eq!(history.request.status, RequestStatus::Pending);
    assert_eq!(history.request.current_step_order, 1);
    assert_eq!(property_status(&pool, "prop-0001").await, PropertyStatus::UnderReview);
    assert_eq!(movement_status(&pool, &created.movement_id).await, MovementStatus::UnderReview);

    let first = service
        .respond(&created.request_id, &supervisor(), Decision::Approve, None, "corr-1")
        .await
        .expect("supervisor approves");
    assert_eq!(first.new_status, RequestStatus::InProgress);
    assert_eq!(first.next_approver_role.as_deref(), Some("Property Manager"));
    assert!(!first.is_override);

    let second = service
        .respond(&created.request_id, &manager(), Decision::Approve, None, "corr-1")
        .await
        .expect("manager approves");
    assert_eq!(second.new_status, RequestStatus::Approved);
    assert_eq!(second.next_approver_role, None);

    let history = service.request_with_history(&created.request_id).await.expect("history");
    assert_eq!(history.request.status, RequestStatus::Approved);
    assert_eq!(history.responses.len(), 2);
    let mut step_orders: Vec<u32> = history.responses.iter().map(|r| r.step_order).collect();
    step_orders.sort_unstable();
    assert_eq!(step_orders, vec![1, 2]);
    assert!(!history.override_used());

    assert_eq!(movement_status(&pool, &created.movement_id).await, MovementStatus::Approved);

    let records = SqlPropertyRepository::new(pool.clone())
        .movement_records(&created.movement_id)
        .await
        .expect("ledger");
    assert_eq!(records.len(), 1);
    assert!(records[0].closed_at.is_some(), "ledger row closes with the terminal outcome");

    // Entity-specific completion releases the property.
    let completed = service
        .complete(&created.movement_id, &UserId("u-manager-01".to_string()), "corr-1")
        .await
        .expect("complete movement");
    assert_eq!(completed, MovementStatus::Completed);
    assert_eq!(property_status(&pool, "prop-0001").await, PropertyStatus::Released);
}

#[tokio::test]
async fn rejection_short_circuits_and_reverts_the_entity() {
    let (service, pool) = setup().await;

    let created = service
        .create_with_approval(release("prop-0001"), &UserId("u-custodian-01".to_string()), "corr-2")
        .await
        .expect("create release");

    let rejected = service
        .respond(
            &created.request_id,
            &supervisor(),
            Decision::Reject,
            Some("insufficient documentation".to_string()),
            "corr-2",
        )
        .await
        .expect("supervisor rejects");
    assert_eq!(rejected.new_status, RequestStatus::Rejected);

    let history = service.request_with_history(&created.request_id).await.expect("history");
    assert_eq!(history.request.status, RequestStatus::Rejected);
    assert_eq!(history.request.current_step_order, 1, "pointer never advances past a rejection");
    assert_eq!(history.responses.len(), 1);
    assert_eq!(history.responses[0].status, ResponseStatus::Rejected);
    assert_eq!(history.responses[0].comments.as_deref(), Some("insufficient documentation"));

    assert_eq!(property_status(&pool, "prop-0001").await, PropertyStatus::Active);
    assert_eq!(movement_status(&pool, &created.movement_id).await, MovementStatus::Rejected);
}

#[tokio::test]
async fn rejection_without_comments_changes_nothing() {
    let (service, _pool) = setup().await;

    let created = service
        .create_with_approval(release("prop-0001"), &UserId("u-custodian-01".to_string()), "corr-3")
        .await
        .expect("create release");

    let error = service
        .respond(&created.request_id, &supervisor(), Decision::Reject, None, "corr-3")
        .await
        .expect_err("rejection without comments must fail");
    assert_eq!(error.kind(), "comments_required_for_rejection");

    let blank = service
        .respond(
            &created.request_id,
            &supervisor(),
            Decision::Reject,
            Some("   ".to_string()),
            "corr-3",
        )
        .await
        .expect_err("whitespace comments are still missing comments");
    assert_eq!(blank.kind(), "comments_required_for_rejection");

    let history = service.request_with_history(&created.request_id).await.expect("history");
    assert_eq!(history.request.status, RequestStatus::Pending);
    assert!(history.responses.is_empty());
}

#[tokio::test]
async fn duplicate_open_request_for_a_property_is_blocked() {
    let (service, _pool) = setup().await;
    let requester = UserId("u-custodian-01".to_string());

    let created = service
        .create_with_approval(release("prop-0001"), &requester, "corr-4")
        .await
        .expect("first request");

    let error = service
        .create_with_approval(release("prop-0001"), &requester, "corr-4")
        .await
        .expect_err("second open request must be blocked");
    assert!(matches!(error, WorkflowError::EntityAlreadyInApprovalProcess { .. }));

    // A terminal outcome frees the slot.
    service
        .respond(
            &created.request_id,
            &supervisor(),
            Decision::Reject,
            Some("duplicate tag number on the request form".to_string()),
            "corr-4",
        )
        .await
        .expect("reject first request");

    service
        .create_with_approval(release("prop-0001"), &requester, "corr-4")
        .await
        .expect("slot is free after the first request terminates");
}

#[tokio::test]
async fn second_answer_to_an_already_answered_step_conflicts() {
    let (service, pool) = setup().await;

    let created = service
        .create_with_approval(release("prop-0001"), &UserId("u-custodian-01".to_string()), "corr-5")
        .await
        .expect("create release");

    // Simulate the race loser: the winning response for step 1 is already on
    // disk, but this caller still holds the stale pending-at-step-1 view.
    sqlx::query(
        "INSERT INTO approval_response
             (id, request_id, step_order, responded_by, status, comments, is_override, responded_at)
         VALUES ('resp-winner', ?, 1, 'u-supervisor-02', 'approved', NULL, 0, ?)",
    )
    .bind(&created.request_id.0)
    .bind(Utc::now().to_rfc3339())
    .execute(&pool)
    .await
    .expect("winner's response row");

    let error = service
        .respond(&created.request_id, &supervisor(), Decision::Approve, None, "corr-5")
        .await
        .expect_err("loser must observe the step as answered");
    assert_eq!(error.kind(), "step_already_answered");

    let rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM approval_response WHERE request_id = ? AND step_order = 1",
    )
    .bind(&created.request_id.0)
    .fetch_one(&pool)
    .await
    .expect("count responses");
    assert_eq!(rows, 1, "exactly one response row per (request, step)");
}

#[tokio::test]
async fn authorization_boundary_on_an_overridable_step() {
    let (service, _pool) = setup().await;

    let created = service
        .create_with_approval(release("prop-0001"), &UserId("u-custodian-01".to_string()), "corr-6")
        .await
        .expect("create release");

    // Wrong role on a non-overridable first step.
    let denied = service
        .respond(&created.request_id, &custodian(), Decision::Approve, None, "corr-6")
        .await
        .expect_err("custodian cannot act on a supervisor step");
    assert_eq!(denied.kind(), "unauthorized");

    service
        .respond(&created.request_id, &supervisor(), Decision::Approve, None, "corr-6")
        .await
        .expect("supervisor approves step 1");

    // Step 2 requires Property Manager, overridable at level >= 4.
    let below = service
        .respond(&created.request_id, &supervisor(), Decision::Approve, None, "corr-6")
        .await
        .expect_err("level 2 is below the override threshold");
    assert_eq!(below.kind(), "unauthorized");

    let overridden = service
        .respond(&created.request_id, &gso_director(), Decision::Approve, None, "corr-6")
        .await
        .expect("level 4 overrides the manager step");
    assert!(overridden.is_override, "override is forced on a non-matching senior role");
    assert_eq!(
        overridden.new_status,
        RequestStatus::Overridden,
        "an override anywhere in the chain completes the request as overridden"
    );
}

#[tokio::test]
async fn administrator_bypasses_every_step() {
    let (service, _pool) = setup().await;

    let created = service
        .create_with_approval(release("prop-0001"), &UserId("u-custodian-01".to_string()), "corr-7")
        .await
        .expect("create release");

    let first = service
        .respond(&created.request_id, &administrator(), Decision::Approve, None, "corr-7")
        .await
        .expect("admin approves step 1");
    assert!(first.is_override);

    let second = service
        .respond(&created.request_id, &administrator(), Decision::Approve, None, "corr-7")
        .await
        .expect("admin approves step 2");
    assert_eq!(second.new_status, RequestStatus::Overridden);

    let history = service.request_with_history(&created.request_id).await.expect("history");
    assert!(history.override_used());
}

#[tokio::test]
async fn cancel_reverts_the_entity_and_is_single_shot() {
    let (service, pool) = setup().await;
    let requester = UserId("u-custodian-01".to_string());

    let created = service
        .create_with_approval(release("prop-0001"), &requester, "corr-8")
        .await
        .expect("create release");

    let status = service.cancel(&created.request_id, &requester, "corr-8").await.expect("cancel");
    assert_eq!(status, RequestStatus::Cancelled);
    assert_eq!(property_status(&pool, "prop-0001").await, PropertyStatus::Active);
    assert_eq!(movement_status(&pool, &created.movement_id).await, MovementStatus::Cancelled);

    let records = SqlPropertyRepository::new(pool.clone())
        .movement_records(&created.movement_id)
        .await
        .expect("ledger");
    assert!(records.iter().all(|record| record.closed_at.is_some()));

    let again = service
        .cancel(&created.request_id, &requester, "corr-8")
        .await
        .expect_err("a cancelled request cannot be cancelled again");
    assert_eq!(again.kind(), "request_not_cancellable");

    let respond = service
        .respond(&created.request_id, &supervisor(), Decision::Approve, None, "corr-8")
        .await
        .expect_err("a cancelled request accepts no responses");
    assert_eq!(respond.kind(), "request_not_pending");
}

#[tokio::test]
async fn rejection_is_idempotent_for_all_later_calls() {
    let (service, _pool) = setup().await;

    let created = service
        .create_with_approval(release("prop-0001"), &UserId("u-custodian-01".to_string()), "corr-9")
        .await
        .expect("create release");

    service
        .respond(
            &created.request_id,
            &supervisor(),
            Decision::Reject,
            Some("wrong recipient office".to_string()),
            "corr-9",
        )
        .await
        .expect("reject");

    let before = service.request_with_history(&created.request_id).await.expect("history");

    let respond = service
        .respond(&created.request_id, &manager(), Decision::Approve, None, "corr-9")
        .await
        .expect_err("responses after rejection are refused");
    assert_eq!(respond.kind(), "request_not_pending");

    let cancel = service
        .cancel(&created.request_id, &UserId("u-custodian-01".to_string()), "corr-9")
        .await
        .expect_err("cancel after rejection is refused");
    assert_eq!(cancel.kind(), "request_not_cancellable");

    let after = service.request_with_history(&created.request_id).await.expect("history");
    assert_eq!(before.request.current_step_order, after.request.current_step_order);
    assert_eq!(before.responses, after.responses, "history never changes after a terminal status");
}

#[tokio::test]
async fn expiry_sweep_closes_out_stale_open_requests() {
    let (service, pool) = setup().await;

    let created = service
        .create_with_approval(release("prop-0001"), &UserId("u-custodian-01".to_string()), "corr-10")
        .await
        .expect("create release");

    // Nothing is older than a cutoff in the past.
    let none = service
        .expire_stale(Utc::now() - Duration::hours(1), "corr-10")
        .await
        .expect("sweep with past cutoff");
    assert_eq!(none, 0);

    let swept = service
        .expire_stale(Utc::now() + Duration::hours(1), "corr-10")
        .await
        .expect("sweep with future cutoff");
    assert_eq!(swept, 1);

    let history = service.request_with_history(&created.request_id).await.expect("history");
    assert_eq!(history.request.status, RequestStatus::Expired);
    assert_eq!(property_status(&pool, "prop-0001").await, PropertyStatus::Active);
    assert_eq!(movement_status(&pool, &created.movement_id).await, MovementStatus::Expired);

    // The sweep is idempotent over already-terminal requests.
    let again = service
        .expire_stale(Utc::now() + Duration::hours(1), "corr-10")
        .await
        .expect("second sweep");
    assert_eq!(again, 0);
}

#[tokio::test]
async fn missing_workflow_configuration_blocks_creation() {
    let (service, pool) = setup().await;
    let requester = UserId("u-custodian-01".to_string());

    sqlx::query("UPDATE workflow_template SET is_active = 0 WHERE entity_type = 'property_return'")
        .execute(&pool)
        .await
        .expect("deactivate return workflow");

    let error = service
        .create_with_approval(returning("prop-0003"), &requester, "corr-11")
        .await
        .expect_err("no active workflow");
    assert_eq!(error.kind(), "no_active_workflow");
    assert!(error.user_message().contains("Contact your administrator"));
}

#[tokio::test]
async fn zero_step_workflow_blocks_creation() {
    let (service, pool) = setup().await;

    sqlx::query("DELETE FROM approval_step WHERE template_id = 'wf-return-v1'")
        .execute(&pool)
        .await
        .expect("strip steps");

    let error = service
        .create_with_approval(returning("prop-0003"), &UserId("u-custodian-01".to_string()), "corr-12")
        .await
        .expect_err("zero-step workflow");
    assert_eq!(error.kind(), "workflow_has_no_steps");
}

#[tokio::test]
async fn dangling_property_reference_is_rejected() {
    let (service, _pool) = setup().await;

    let error = service
        .create_with_approval(release("prop-nope"), &UserId("u-custodian-01".to_string()), "corr-13")
        .await
        .expect_err("unknown property");
    assert_eq!(error.kind(), "invalid_entity_reference");
}

#[tokio::test]
async fn pending_queue_follows_the_current_step() {
    let (service, _pool) = setup().await;

    let created = service
        .create_with_approval(release("prop-0001"), &UserId("u-custodian-01".to_string()), "corr-14")
        .await
        .expect("create release");

    let supervisor_queue = service
        .pending_for_role(&RoleId("role-supervisor".to_string()), 10)
        .await
        .expect("supervisor queue");
    assert_eq!(supervisor_queue.len(), 1);
    assert_eq!(supervisor_queue[0].request_id, created.request_id);
    assert_eq!(supervisor_queue[0].step_order, 1);

    let manager_queue = service
        .pending_for_role(&RoleId("role-manager".to_string()), 10)
        .await
        .expect("manager queue");
    assert!(manager_queue.is_empty());

    service
        .respond(&created.request_id, &supervisor(), Decision::Approve, None, "corr-14")
        .await
        .expect("advance to step 2");

    let supervisor_queue = service
        .pending_for_role(&RoleId("role-supervisor".to_string()), 10)
        .await
        .expect("supervisor queue after advance");
    assert!(supervisor_queue.is_empty());

    let manager_queue = service
        .pending_for_role(&RoleId("role-manager".to_string()), 10)
        .await
        .expect("manager queue after advance");
    assert_eq!(manager_queue.len(), 1);
    assert_eq!(manager_queue[0].step_name, "Manager sign-off");
}

#[tokio::test]
async fn skip_is_only_legal_on_optional_steps() {
    let (service, pool) = setup().await;
    let requester = UserId("u-custodian-02".to_string());

    let created = service
        .create_with_approval(turnover("prop-0002", "u-clerk-07"), &requester, "corr-15")
        .await
        .expect("create turnover");

    // Step 1 (Supervisor review) is required.
    let error = service
        .respond(&created.request_id, &supervisor(), Decision::Skip, None, "corr-15")
        .await
        .expect_err("required steps cannot be skipped");
    assert_eq!(error.kind(), "step_not_skippable");

    service
        .respond(&created.request_id, &supervisor(), Decision::Approve, None, "corr-15")
        .await
        .expect("supervisor approves");

    // Step 2 (Director acceptance) is optional and may be skipped by its role.
    let skipped = service
        .respond(&created.request_id, &gso_director(), Decision::Skip, None, "corr-15")
        .await
        .expect("optional step skipped");
    assert_eq!(skipped.new_status, RequestStatus::Approved);

    let history = service.request_with_history(&created.request_id).await.expect("history");
    assert_eq!(history.response_for(2).map(|r| r.status), Some(ResponseStatus::Skipped));

    // Completing the turnover hands the property to the incoming custodian.
    service.complete(&created.movement_id, &requester, "corr-15").await.expect("complete");
    let repo = SqlPropertyRepository::new(pool.clone());
    let property = repo
        .find_by_id(&PropertyId("prop-0002".to_string()))
        .await
        .expect("find property")
        .expect("property exists");
    assert_eq!(property.status, PropertyStatus::Active);
    assert_eq!(property.custodian, Some(UserId("u-clerk-07".to_string())));
}

#[tokio::test]
async fn completion_requires_an_approved_movement() {
    let (service, _pool) = setup().await;
    let requester = UserId("u-custodian-01".to_string());

    let created = service
        .create_with_approval(release("prop-0001"), &requester, "corr-16")
        .await
        .expect("create release");

    let error = service
        .complete(&created.movement_id, &requester, "corr-16")
        .await
        .expect_err("movement still under review");
    assert_eq!(error.kind(), "movement_not_completable");

    let missing = service
        .complete(&PropertyMovementId("mov-nope".to_string()), &requester, "corr-16")
        .await
        .expect_err("unknown movement");
    assert_eq!(missing.kind(), "movement_not_found");
}

#[tokio::test]
async fn unknown_request_reads_as_not_found() {
    let (service, _pool) = setup().await;

    let error = service
        .request_with_history(&RequestId("req-nope".to_string()))
        .await
        .expect_err("unknown request");
    assert_eq!(error.kind(), "request_not_found");
}
