use crate::auth::Role;
use crate::payment::PaymentStatus;
use std::convert::Infallible;

#[derive(thiserror::Error, Debug)]
pub enum ReviewError {
    #[error("Payment {0} was not found")]
    NotFound(String),
    #[error("Transition {from} -> {to} is not part of the review workflow")]
    InvalidTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },
    #[error("Payment {id} is no longer {expected} (now {found}); it was handled by someone else")]
    NoLongerApplicable {
        id: String,
        expected: PaymentStatus,
        found: PaymentStatus,
    },
    #[error("Forbidden: this action requires the {required} role, session holds {held}")]
    Forbidden { required: Role, held: Role },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Payment {payment_id} is approved but the plan upgrade for {user_id} did not complete: {source}")]
    ReconciliationNeeded {
        payment_id: String,
        user_id: String,
        #[source]
        source: UpgradeError,
    },
    #[error("Failed to generate identifier: {0}")]
    Identifier(String),
    #[error("Store unavailable: {0}")]
    Store(#[from] sled::Error),
    #[error("Failed to encode record: {0}")]
    Encode(#[from] minicbor::encode::Error<Infallible>),
    #[error("Failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
}

impl ReviewError {
    /// Store failures may be retried as a whole; the conditional write and the
    /// effector receipt keep the retry from applying anything twice.
    pub fn is_transient(&self) -> bool {
        matches!(self, ReviewError::Store(_))
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Rejecting an investigated payment needs at least one reason or a note")]
    MissingRejectionReason,
    #[error("Submission is missing {0}")]
    MissingField(&'static str),
    #[error("Role {0} is not assigned to this worker")]
    RoleNotAssigned(Role),
}

#[derive(thiserror::Error, Debug)]
pub enum UpgradeError {
    #[error("User {0} does not exist")]
    UserNotFound(String),
    #[error("User store unavailable: {0}")]
    Store(#[from] sled::Error),
    #[error("Corrupt user record: {0}")]
    Codec(String),
    #[error("Upgrade rejected by provider: {0}")]
    Provider(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}
