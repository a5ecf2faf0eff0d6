//! The payment review state machine.
//!
//! Every status change goes through [`TransitionPolicy::lookup`], which only
//! knows the edges below. Anything else is refused before a write happens.
//!
//! | from          | to        | role     |
//! |---------------|-----------|----------|
//! | pending       | approved  | Verifier |
//! | pending       | rejected  | Verifier |
//! | investigating | verifying | Rejector |
//! | investigating | rejected  | Rejector |
//! | verified      | approved  | Approver |
//! | verified      | rejected  | Approver |
//!
//! A payment the rejector sends back sits in `verifying`. Under the default
//! policy the verifier approves or rejects it exactly like a `pending` one;
//! [`TransitionPolicy::new(false)`](TransitionPolicy::new) keeps the table above strict.
use super::audit::AuditEntry;
use super::auth::{Actor, Role};
use super::error::{ReviewError, ValidationError};
use super::payment::{Attribution, Flag, Payment, PaymentStatus, RejectionReason, TimeStamp};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Verification stage accepts the proof. `from` is `pending`, or
    /// `verifying` when re-entry is enabled.
    VerificationApprove { from: PaymentStatus },
    VerificationReject { from: PaymentStatus },
    SendToVerifier,
    InvestigationReject,
    FinalApprove,
    FinalReject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPolicy {
    /// Let the verifier act on `verifying` payments as if they were `pending`.
    /// On by default, so a payment sent back by the rejector can be reviewed again.
    pub verifying_reentry: bool,
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self {
            verifying_reentry: true,
        }
    }
}

/// What a reviewer asks for: the target status plus whatever they attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub to: PaymentStatus,
    /// Status the reviewer saw when they pressed the button.
    pub expected_from: Option<PaymentStatus>,
    pub flags: Vec<Flag>,
    pub reasons: Vec<RejectionReason>,
    pub notes: Option<String>,
}

impl Transition {
    pub fn from(&self) -> PaymentStatus {
        match self {
            Transition::VerificationApprove { from } | Transition::VerificationReject { from } => *from,
            Transition::SendToVerifier | Transition::InvestigationReject => PaymentStatus::Investigating,
            Transition::FinalApprove | Transition::FinalReject => PaymentStatus::Verified,
        }
    }

    pub fn to(&self) -> PaymentStatus {
        match self {
            Transition::VerificationApprove { .. } | Transition::FinalApprove => PaymentStatus::Approved,
            Transition::SendToVerifier => PaymentStatus::Verifying,
            Transition::VerificationReject { .. }
            | Transition::InvestigationReject
            | Transition::FinalReject => PaymentStatus::Rejected,
        }
    }

    pub fn required_role(&self) -> Role {
        match self {
            Transition::VerificationApprove { .. } | Transition::VerificationReject { .. } => Role::Verifier,
            Transition::SendToVerifier | Transition::InvestigationReject => Role::Rejector,
            Transition::FinalApprove | Transition::FinalReject => Role::Approver,
        }
    }

    /// Only edges into `approved` grant the purchased plan.
    pub fn fires_upgrade(&self) -> bool {
        self.to() == PaymentStatus::Approved
    }
}

impl TransitionPolicy {
    pub fn new(verifying_reentry: bool) -> Self {
        Self { verifying_reentry }
    }

    pub fn lookup(&self, from: PaymentStatus, to: PaymentStatus) -> Result<Transition, ReviewError> {
        use PaymentStatus::*;

        let verifier_source = from == Pending || (self.verifying_reentry && from == Verifying);

        let edge = match (from, to) {
            (_, Approved) if verifier_source => Transition::VerificationApprove { from },
            (_, Rejected) if verifier_source => Transition::VerificationReject { from },
            (Investigating, Verifying) => Transition::SendToVerifier,
            (Investigating, Rejected) => Transition::InvestigationReject,
            (Verified, Approved) => Transition::FinalApprove,
            (Verified, Rejected) => Transition::FinalReject,
            _ => return Err(ReviewError::InvalidTransition { from, to }),
        };
        Ok(edge)
    }

    /// Statuses the verification stage works from.
    pub fn verification_sources(&self) -> Vec<PaymentStatus> {
        if self.verifying_reentry {
            vec![PaymentStatus::Pending, PaymentStatus::Verifying]
        } else {
            vec![PaymentStatus::Pending]
        }
    }

    /// Roles with at least one edge into `approved`.
    pub fn approving_roles(&self) -> [Role; 2] {
        [Role::Verifier, Role::Approver]
    }
}

impl TransitionRequest {
    pub fn to(status: PaymentStatus) -> Self {
        Self {
            to: status,
            expected_from: None,
            flags: vec![],
            reasons: vec![],
            notes: None,
        }
    }
    pub fn expecting(mut self, from: PaymentStatus) -> Self {
        self.expected_from = Some(from);
        self
    }
    pub fn with_flags(mut self, flags: Vec<Flag>) -> Self {
        self.flags = flags;
        self
    }
    pub fn with_reasons(mut self, reasons: Vec<RejectionReason>) -> Self {
        self.reasons = reasons;
        self
    }
    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        // blank notes count as no notes
        self.notes = notes.filter(|n| !n.trim().is_empty());
        self
    }
}

/// Checks that depend only on the request, run before anything is written.
pub fn validate(transition: Transition, request: &TransitionRequest) -> Result<(), ValidationError> {
    if transition == Transition::InvestigationReject
        && request.reasons.is_empty()
        && request.notes.as_deref().is_none_or(|n| n.trim().is_empty())
    {
        return Err(ValidationError::MissingRejectionReason);
    }
    Ok(())
}

/// Produce the record as it should look after `transition`. Attribution
/// fields already written by an earlier stage are left as they are.
pub fn apply(current: &Payment, transition: Transition, request: &TransitionRequest, actor: &Actor) -> Payment {
    let mut next = current.clone();
    let now = TimeStamp::new();
    let stamp = Attribution {
        by: actor.email().to_owned(),
        at: now.clone(),
    };

    match transition {
        Transition::VerificationApprove { .. } => {
            set_once(&mut next.verified, &stamp, "verified", &next.id);
            set_once(&mut next.final_approved, &stamp, "final_approved", &next.id);
        }
        Transition::VerificationReject { .. } | Transition::FinalReject => {
            set_once(&mut next.rejected, &stamp, "rejected", &next.id);
        }
        Transition::SendToVerifier => {
            set_once(&mut next.investigated, &stamp, "investigated", &next.id);
        }
        Transition::InvestigationReject => {
            set_once(&mut next.investigated, &stamp, "investigated", &next.id);
            set_once(&mut next.rejected, &stamp, "rejected", &next.id);
        }
        Transition::FinalApprove => {
            set_once(&mut next.final_approved, &stamp, "final_approved", &next.id);
        }
    }

    if let Some(notes) = &request.notes {
        next.verification_notes = Some(notes.clone());
    }
    if !request.flags.is_empty() {
        merge(next.flags.get_or_insert_with(Vec::new), &request.flags);
    }
    if !request.reasons.is_empty() {
        merge(next.rejection_reasons.get_or_insert_with(Vec::new), &request.reasons);
    }

    next.status = transition.to();
    next.history.push(AuditEntry {
        actor_id: actor.id().to_owned(),
        actor_email: actor.email().to_owned(),
        role: actor.role(),
        from: transition.from(),
        to: transition.to(),
        at: now,
        flags: request.flags.clone(),
        reasons: request.reasons.clone(),
        notes: request.notes.clone(),
    });
    next
}

fn set_once(slot: &mut Option<Attribution>, stamp: &Attribution, field: &str, payment_id: &str) {
    match slot {
        Some(existing) => warn!(
            payment_id,
            field,
            kept = %existing.by,
            "attribution already recorded, keeping the earlier stage"
        ),
        None => *slot = Some(stamp.clone()),
    }
}

fn merge<T: PartialEq + Copy>(into: &mut Vec<T>, items: &[T]) {
    for item in items {
        if !into.contains(item) {
            into.push(*item);
        }
    }
}
