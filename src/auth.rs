//! Operational roles and the authorization gate in front of every transition
use super::error::{ReviewError, ValidationError};
use super::transition::Transition;
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    #[n(0)]
    Verifier,
    #[n(1)]
    Approver,
    #[n(2)]
    Rejector,
}

/// A reviewer as known to the worker directory, possibly holding several roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worker {
    pub id: String,
    pub email: String,
    pub roles: Vec<Role>,
}

/// An authenticated reviewer acting under exactly one role for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    id: String,
    email: String,
    role: Role,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Verifier => "verifier",
            Role::Approver => "approver",
            Role::Rejector => "rejector",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Worker {
    pub fn new(id: impl Into<String>, email: impl Into<String>, roles: Vec<Role>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            roles,
        }
    }

    pub fn holds(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Pick the role this worker reviews under until the session ends.
    pub fn start_session(&self, role: Role) -> Result<Actor, ReviewError> {
        if !self.holds(role) {
            return Err(ValidationError::RoleNotAssigned(role).into());
        }
        Ok(Actor::new(self.id.clone(), self.email.clone(), role))
    }
}

impl Actor {
    pub fn new(id: impl Into<String>, email: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            role,
        }
    }
    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn email(&self) -> &str {
        &self.email
    }
    pub fn role(&self) -> Role {
        self.role
    }
}

/// Allow the transition only if the session role is the one the edge names.
/// Pure: depends on nothing but its arguments.
pub fn authorize(actor: &Actor, transition: Transition) -> Result<(), ReviewError> {
    let required = transition.required_role();
    if actor.role != required {
        return Err(ReviewError::Forbidden {
            required,
            held: actor.role,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::PaymentStatus;
    use crate::transition::TransitionPolicy;

    #[test]
    fn session_requires_assigned_role() {
        let worker = Worker::new("worker_1", "ops@example.com", vec![Role::Verifier]);

        assert!(worker.start_session(Role::Verifier).is_ok());
        assert!(matches!(
            worker.start_session(Role::Approver),
            Err(ReviewError::Validation(ValidationError::RoleNotAssigned(
                Role::Approver
            )))
        ));
    }

    #[test]
    fn rejector_cannot_reject_pending() {
        let policy = TransitionPolicy::default();
        let edge = policy
            .lookup(PaymentStatus::Pending, PaymentStatus::Rejected)
            .unwrap();
        let actor = Actor::new("worker_2", "rj@example.com", Role::Rejector);

        match authorize(&actor, edge) {
            Err(ReviewError::Forbidden { required, held }) => {
                assert_eq!(required, Role::Verifier);
                assert_eq!(held, Role::Rejector);
            }
            other => panic!("expected forbidden, got {other:?}"),
        }
    }
}
