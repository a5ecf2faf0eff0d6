//! Service layer API for payment review operations
use super::auth::{self, Actor, Role};
use super::config::ReviewConfig;
use super::error::{ReviewError, UpgradeError};
use super::payment::{Flag, Payment, PaymentDetails, PaymentStatus, RejectionReason};
use super::queue;
use super::store::PaymentStore;
use super::transition::{self, TransitionPolicy, TransitionRequest};
use super::upgrade::{PlanUpgradeEffector, SledPlanUpgrader, UpgradeOutcome, UpgradeReceipt};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct ReviewService<E = SledPlanUpgrader> {
    instance: Arc<sled::Db>,
    store: PaymentStore,
    effector: E,
    policy: TransitionPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeEffect {
    /// The transition does not grant a plan.
    NotApplicable,
    Applied(UpgradeReceipt),
    /// The plan had already been granted for this payment; nothing changed.
    AlreadyApplied(UpgradeReceipt),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionReport {
    pub payment: Payment,
    pub effect: UpgradeEffect,
    /// True when the payment was already approved and nothing was written.
    pub replayed: bool,
}

impl ReviewService<SledPlanUpgrader> {
    /// Payments and users share one database.
    pub fn new(instance: Arc<sled::Db>, policy: TransitionPolicy) -> Result<Self, ReviewError> {
        let effector = SledPlanUpgrader::open(&instance)?;
        Self::with_effector(instance, effector, policy)
    }

    pub fn open(config: &ReviewConfig) -> Result<Self, ReviewError> {
        let db = sled::open(&config.db_path)?;
        info!(path = %config.db_path.display(), reentry = config.verifying_reentry, "review store opened");
        Self::new(Arc::new(db), config.policy())
    }
}

impl<E: PlanUpgradeEffector> ReviewService<E> {
    pub fn with_effector(instance: Arc<sled::Db>, effector: E, policy: TransitionPolicy) -> Result<Self, ReviewError> {
        let store = PaymentStore::open(&instance)?;
        Ok(Self {
            instance,
            store,
            effector,
            policy,
        })
    }

    pub fn store(&self) -> &PaymentStore {
        &self.store
    }

    pub fn effector(&self) -> &E {
        &self.effector
    }

    pub fn policy(&self) -> &TransitionPolicy {
        &self.policy
    }

    /// Record a new submission in `pending`
    pub fn submit(&self, details: PaymentDetails) -> Result<Payment, ReviewError> {
        let payment = self.store.create(details)?;
        info!(payment_id = %payment.id, user_id = %payment.user_id, plan = %payment.plan, "payment submitted");
        Ok(payment)
    }

    /// Verifier accepts a pending proof; grants the plan
    pub fn approve_verification(
        &self,
        payment_id: &str,
        actor: &Actor,
        flags: Vec<Flag>,
        notes: Option<String>,
    ) -> Result<TransitionReport, ReviewError> {
        let request = TransitionRequest::to(PaymentStatus::Approved)
            .with_flags(flags)
            .with_notes(notes);
        self.transition(payment_id, self.verifier_request(payment_id, request)?, actor)
    }

    /// Verifier refuses a pending proof, optionally flagging what was wrong
    pub fn reject_verification(
        &self,
        payment_id: &str,
        actor: &Actor,
        flags: Vec<Flag>,
        notes: Option<String>,
    ) -> Result<TransitionReport, ReviewError> {
        let request = TransitionRequest::to(PaymentStatus::Rejected)
            .with_flags(flags)
            .with_notes(notes);
        self.transition(payment_id, self.verifier_request(payment_id, request)?, actor)
    }

    /// Rejector clears an investigation and returns the payment for verification
    pub fn send_to_verifier(
        &self,
        payment_id: &str,
        actor: &Actor,
        notes: Option<String>,
    ) -> Result<TransitionReport, ReviewError> {
        let request = TransitionRequest::to(PaymentStatus::Verifying)
            .expecting(PaymentStatus::Investigating)
            .with_notes(notes);
        self.transition(payment_id, request, actor)
    }

    /// Rejector closes an investigation as rejected; needs a reason or a note
    pub fn reject_investigation(
        &self,
        payment_id: &str,
        actor: &Actor,
        reasons: Vec<RejectionReason>,
        notes: Option<String>,
    ) -> Result<TransitionReport, ReviewError> {
        let request = TransitionRequest::to(PaymentStatus::Rejected)
            .expecting(PaymentStatus::Investigating)
            .with_reasons(reasons)
            .with_notes(notes);
        self.transition(payment_id, request, actor)
    }

    /// Approver signs off a verified payment; grants the plan
    pub fn final_approve(&self, payment_id: &str, actor: &Actor) -> Result<TransitionReport, ReviewError> {
        let request = TransitionRequest::to(PaymentStatus::Approved).expecting(PaymentStatus::Verified);
        self.transition(payment_id, request, actor)
    }

    /// Approver turns down a verified payment, optionally flagging what was wrong
    pub fn final_reject(
        &self,
        payment_id: &str,
        actor: &Actor,
        flags: Vec<Flag>,
        notes: Option<String>,
    ) -> Result<TransitionReport, ReviewError> {
        let request = TransitionRequest::to(PaymentStatus::Rejected)
            .expecting(PaymentStatus::Verified)
            .with_flags(flags)
            .with_notes(notes);
        self.transition(payment_id, request, actor)
    }

    /// Single entry point for every status change. Refusals never write.
    pub fn transition(
        &self,
        payment_id: &str,
        request: TransitionRequest,
        actor: &Actor,
    ) -> Result<TransitionReport, ReviewError> {
        let result = self.try_transition(payment_id, &request, actor);

        match &result {
            Ok(report) if report.replayed => {
                info!(payment_id, actor = actor.email(), "payment already approved, no new write");
            }
            Ok(report) => {
                info!(
                    payment_id,
                    actor = actor.email(),
                    role = %actor.role(),
                    to = %report.payment.status,
                    "payment transitioned"
                );
            }
            Err(e @ ReviewError::ReconciliationNeeded { .. }) => {
                error!(payment_id, actor = actor.email(), error = %e, "approval written but upgrade outstanding");
            }
            Err(e) => {
                warn!(payment_id, actor = actor.email(), to = %request.to, error = %e, "transition refused");
            }
        }
        result
    }

    fn try_transition(
        &self,
        payment_id: &str,
        request: &TransitionRequest,
        actor: &Actor,
    ) -> Result<TransitionReport, ReviewError> {
        let payment = self.store.get(payment_id)?;

        if request.to == PaymentStatus::Approved && payment.status == PaymentStatus::Approved {
            return self.replay_approval(payment, actor);
        }

        match request.expected_from {
            Some(expected) if payment.status != expected => {
                return Err(ReviewError::NoLongerApplicable {
                    id: payment.id,
                    expected,
                    found: payment.status,
                });
            }
            _ => {}
        }

        let edge = self.policy.lookup(payment.status, request.to)?;
        auth::authorize(actor, edge)?;
        transition::validate(edge, request)?;

        let updated = self
            .store
            .update_if(payment_id, edge.from(), |current| Ok(transition::apply(current, edge, request, actor)))?;

        let effect = if edge.fires_upgrade() {
            self.run_upgrade(&updated)?
        } else {
            UpgradeEffect::NotApplicable
        };

        Ok(TransitionReport {
            payment: updated,
            effect,
            replayed: false,
        })
    }

    /// An approve request for a payment that is already approved. Nothing is
    /// written; an upgrade left outstanding by an earlier failure is completed.
    fn replay_approval(&self, payment: Payment, actor: &Actor) -> Result<TransitionReport, ReviewError> {
        let approver_role = payment
            .history
            .iter()
            .rev()
            .find(|entry| entry.to == PaymentStatus::Approved)
            .map(|entry| entry.role);

        match approver_role {
            Some(role) if role != actor.role() => {
                return Err(ReviewError::Forbidden {
                    required: role,
                    held: actor.role(),
                });
            }
            None if !self.policy.approving_roles().contains(&actor.role()) => {
                return Err(ReviewError::Forbidden {
                    required: Role::Approver,
                    held: actor.role(),
                });
            }
            _ => {}
        }

        let effect = match self.receipt(&payment)? {
            Some(receipt) => UpgradeEffect::AlreadyApplied(receipt),
            None => self.run_upgrade(&payment)?,
        };

        Ok(TransitionReport {
            payment,
            effect,
            replayed: true,
        })
    }

    fn run_upgrade(&self, payment: &Payment) -> Result<UpgradeEffect, ReviewError> {
        match self.effector.apply_upgrade(&payment.id, &payment.user_id, payment.plan) {
            Ok(UpgradeOutcome::Applied(receipt)) => Ok(UpgradeEffect::Applied(receipt)),
            Ok(UpgradeOutcome::AlreadyApplied(receipt)) => Ok(UpgradeEffect::AlreadyApplied(receipt)),
            Err(source) => Err(ReviewError::ReconciliationNeeded {
                payment_id: payment.id.clone(),
                user_id: payment.user_id.clone(),
                source,
            }),
        }
    }

    fn receipt(&self, payment: &Payment) -> Result<Option<UpgradeReceipt>, ReviewError> {
        self.effector.receipt(&payment.id).map_err(|source| match source {
            UpgradeError::Store(e) => ReviewError::Store(e),
            source => ReviewError::ReconciliationNeeded {
                payment_id: payment.id.clone(),
                user_id: payment.user_id.clone(),
                source,
            },
        })
    }

    // Verifier stage works from whichever verification status the payment sits in.
    // An approve on an approved payment goes through untouched to the replay path.
    fn verifier_request(&self, payment_id: &str, request: TransitionRequest) -> Result<TransitionRequest, ReviewError> {
        let current = self.store.get(payment_id)?.status;
        if self.policy.verification_sources().contains(&current) {
            return Ok(request.expecting(current));
        }
        if current == PaymentStatus::Approved && request.to == PaymentStatus::Approved {
            return Ok(request);
        }

        warn!(payment_id, from = %current, to = %request.to, "payment is not at the verification stage");
        Err(ReviewError::InvalidTransition {
            from: current,
            to: request.to,
        })
    }

    /// Approved payments whose plan upgrade never completed.
    pub fn outstanding_upgrades(&self) -> Result<Vec<Payment>, ReviewError> {
        let mut outstanding = vec![];
        for payment in self.store.query_by_status(&[PaymentStatus::Approved])? {
            if self.receipt(&payment)?.is_none() {
                outstanding.push(payment);
            }
        }
        Ok(outstanding)
    }

    /// Retry the upgrade for an approved payment. Safe to call repeatedly.
    pub fn reconcile(&self, payment_id: &str) -> Result<UpgradeEffect, ReviewError> {
        let payment = self.store.get(payment_id)?;
        if payment.status != PaymentStatus::Approved {
            return Err(ReviewError::NoLongerApplicable {
                id: payment.id,
                expected: PaymentStatus::Approved,
                found: payment.status,
            });
        }

        let effect = self.run_upgrade(&payment)?;
        if let UpgradeEffect::Applied(_) = effect {
            info!(payment_id, "outstanding upgrade reconciled");
        }
        Ok(effect)
    }

    /// The queue the actor's session role works from, newest first.
    pub fn queue(&self, actor: &Actor) -> Result<Vec<Payment>, ReviewError> {
        queue::queue_for(&self.store, actor.role(), &self.policy)
    }

    pub fn flush(&self) -> Result<(), ReviewError> {
        self.instance.flush()?;
        Ok(())
    }
}
