//! Property-based tests for the payment review state machine
//!
//! These throw arbitrary sequences of review actions, from arbitrary sessions,
//! at a payment and check the invariants that must hold whatever the order:
//!
//! 1. Only table edges are ever taken, and only by the role the edge names
//! 2. Terminal statuses never change again
//! 3. The plan upgrade fires at most once per payment
//! 4. A payment never carries both a final approval and a rejection
//! 5. Refused requests leave the stored record unchanged
//!
//! Lookup and validation are pure, so they are also checked exhaustively here
//! against an independent copy of the table.

use payment_review::{
    auth::{Actor, Role},
    error::{ReviewError, UpgradeError},
    payment::{PaymentDetails, PaymentStatus, Plan, RejectionReason},
    service::ReviewService,
    transition::{self, Transition, TransitionPolicy, TransitionRequest},
    upgrade::{PlanUpgradeEffector, SledPlanUpgrader, UpgradeOutcome, UpgradeReceipt, User},
};
use proptest::prelude::*;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

const TABLE: [(PaymentStatus, PaymentStatus, Role); 6] = [
    (PaymentStatus::Pending, PaymentStatus::Approved, Role::Verifier),
    (PaymentStatus::Pending, PaymentStatus::Rejected, Role::Verifier),
    (PaymentStatus::Investigating, PaymentStatus::Verifying, Role::Rejector),
    (PaymentStatus::Investigating, PaymentStatus::Rejected, Role::Rejector),
    (PaymentStatus::Verified, PaymentStatus::Approved, Role::Approver),
    (PaymentStatus::Verified, PaymentStatus::Rejected, Role::Approver),
];

// with re-entry the verifier treats `verifying` like `pending`
fn table_role(reentry: bool, from: PaymentStatus, to: PaymentStatus) -> Option<Role> {
    let from = if reentry && from == PaymentStatus::Verifying {
        PaymentStatus::Pending
    } else {
        from
    };
    TABLE
        .iter()
        .find(|(f, t, _)| *f == from && *t == to)
        .map(|(_, _, role)| *role)
}

struct CountingUpgrader {
    inner: SledPlanUpgrader,
    applied: AtomicUsize,
}

impl PlanUpgradeEffector for CountingUpgrader {
    fn apply_upgrade(&self, payment_id: &str, user_id: &str, plan: Plan) -> Result<UpgradeOutcome, UpgradeError> {
        let outcome = self.inner.apply_upgrade(payment_id, user_id, plan)?;
        if let UpgradeOutcome::Applied(_) = outcome {
            self.applied.fetch_add(1, Ordering::SeqCst);
        }
        Ok(outcome)
    }

    fn receipt(&self, payment_id: &str) -> Result<Option<UpgradeReceipt>, UpgradeError> {
        self.inner.receipt(payment_id)
    }
}

fn status_strategy() -> impl Strategy<Value = PaymentStatus> {
    prop::sample::select(PaymentStatus::ALL.to_vec())
}

fn role_strategy() -> impl Strategy<Value = Role> {
    prop::sample::select(vec![Role::Verifier, Role::Approver, Role::Rejector])
}

fn reason_strategy() -> impl Strategy<Value = RejectionReason> {
    prop::sample::select(RejectionReason::ALL.to_vec())
}

/// One button press: who presses it, what they ask for, what they attach.
fn action_strategy() -> impl Strategy<Value = (Role, PaymentStatus, Vec<RejectionReason>, Option<String>)> {
    (
        role_strategy(),
        status_strategy(),
        prop::collection::vec(reason_strategy(), 0..=2),
        prop::option::of("[a-z ]{0,12}"),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: the live workflow only ever follows table edges and keeps
    /// terminal outcomes, attribution and the upgrade effect consistent.
    #[test]
    fn prop_workflow_follows_table(
        reentry in any::<bool>(),
        initial in status_strategy(),
        plan in prop::sample::select(vec![Plan::Pro, Plan::Elite, Plan::Creator]),
        actions in prop::collection::vec(action_strategy(), 1..=8),
    ) {
        let db = Arc::new(sled::Config::new().temporary(true).open().unwrap());
        let effector = CountingUpgrader {
            inner: SledPlanUpgrader::open(&db).unwrap(),
            applied: AtomicUsize::new(0),
        };
        let service = ReviewService::with_effector(db, effector, TransitionPolicy::new(reentry)).unwrap();

        let user = User::new("user_prop", "prop@example.com");
        service.effector().inner.put_user(&user).unwrap();

        let payment = service
            .submit(
                PaymentDetails::new()
                    .set_user(&user.id, &user.email, "Prop")
                    .set_sender_name("Prop Tester")
                    .set_plan(plan)
                    .set_amount("GHS 10")
                    .set_momo_number("0200000000")
                    .set_screenshot_url("https://img.example/p.png")
                    .set_initial_status(initial),
            )
            .unwrap();

        let mut terminal: Option<PaymentStatus> = initial.is_terminal().then_some(initial);

        for (role, to, reasons, notes) in actions {
            let actor = Actor::new(format!("worker_{role}"), format!("{role}@example.com"), role);
            let before = service.store().get(&payment.id).unwrap();
            let request = TransitionRequest::to(to).with_reasons(reasons).with_notes(notes);

            match service.transition(&payment.id, request, &actor) {
                Ok(report) if report.replayed => {
                    prop_assert_eq!(before.status, PaymentStatus::Approved);
                    prop_assert_eq!(&report.payment, &before);
                }
                Ok(report) => {
                    prop_assert_eq!(table_role(reentry, before.status, to), Some(role));
                    prop_assert!(terminal.is_none(), "terminal payment changed status");
                    prop_assert_eq!(report.payment.status, to);
                    if to.is_terminal() {
                        terminal = Some(to);
                    }
                }
                Err(ReviewError::ReconciliationNeeded { .. }) => {
                    prop_assert!(false, "user exists, upgrade must not fail");
                }
                Err(_) => {
                    let after = service.store().get(&payment.id).unwrap();
                    prop_assert_eq!(after, before, "refused request wrote to the store");
                }
            }
        }

        let stored = service.store().get(&payment.id).unwrap();
        for entry in stored.history() {
            prop_assert_eq!(table_role(reentry, entry.from, entry.to), Some(entry.role));
        }
        prop_assert!(!(stored.final_approved.is_some() && stored.rejected.is_some()));
        if let Some(status) = terminal {
            prop_assert_eq!(stored.status, status);
        }

        let applied = service.effector().applied.load(Ordering::SeqCst);
        prop_assert!(applied <= 1, "upgrade fired {} times", applied);
        // an approval made here always grants the plan; a payment seeded as
        // approved may have its outstanding upgrade completed by a replay
        let approved_here = stored.history().iter().any(|e| e.to == PaymentStatus::Approved);
        if approved_here {
            prop_assert_eq!(applied, 1);
        }
        if applied == 1 {
            prop_assert_eq!(stored.status, PaymentStatus::Approved);
        }
    }

    /// Property: lookup accepts exactly the table, and names the table's role
    #[test]
    fn prop_lookup_matches_table(reentry in any::<bool>(), from in status_strategy(), to in status_strategy()) {
        let policy = TransitionPolicy::new(reentry);
        match (policy.lookup(from, to), table_role(reentry, from, to)) {
            (Ok(edge), Some(role)) => {
                prop_assert_eq!(edge.required_role(), role);
                prop_assert_eq!(edge.from(), from);
                prop_assert_eq!(edge.to(), to);
            }
            (Err(ReviewError::InvalidTransition { from: f, to: t }), None) => {
                prop_assert_eq!((f, t), (from, to));
            }
            (got, expected) => prop_assert!(false, "lookup {:?} vs table {:?}", got, expected),
        }
    }

    /// Property: an investigated payment can only be rejected with a reason or a note
    #[test]
    fn prop_investigation_reject_needs_justification(
        reasons in prop::collection::vec(reason_strategy(), 0..=3),
        notes in prop::option::of("[a-z ]{0,8}"),
    ) {
        let request = TransitionRequest::to(PaymentStatus::Rejected)
            .with_reasons(reasons.clone())
            .with_notes(notes.clone());
        let justified = !reasons.is_empty() || notes.is_some_and(|n| !n.trim().is_empty());

        prop_assert_eq!(
            transition::validate(Transition::InvestigationReject, &request).is_ok(),
            justified
        );
    }
}
