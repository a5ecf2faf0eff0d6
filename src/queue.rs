//! Read-path helpers for the review screens
use super::auth::Role;
use super::error::ReviewError;
use super::payment::{Payment, PaymentStatus};
use super::store::PaymentStore;
use super::transition::TransitionPolicy;
use std::collections::BTreeMap;

/// Newest submission first; ties fall back to the id, which is time ordered.
pub fn newest_first(payments: &mut [Payment]) {
    payments.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
}

/// Statuses a reviewer holding `role` works from.
pub fn statuses_for(role: Role, policy: &TransitionPolicy) -> Vec<PaymentStatus> {
    match role {
        Role::Verifier => policy.verification_sources(),
        Role::Rejector => vec![PaymentStatus::Investigating],
        Role::Approver => vec![PaymentStatus::Verified],
    }
}

pub fn queue_for(store: &PaymentStore, role: Role, policy: &TransitionPolicy) -> Result<Vec<Payment>, ReviewError> {
    store.query_by_status(&statuses_for(role, policy))
}

pub fn verification_queue(store: &PaymentStore, policy: &TransitionPolicy) -> Result<Vec<Payment>, ReviewError> {
    queue_for(store, Role::Verifier, policy)
}

pub fn investigation_queue(store: &PaymentStore) -> Result<Vec<Payment>, ReviewError> {
    store.query_by_status(&[PaymentStatus::Investigating])
}

pub fn final_approval_queue(store: &PaymentStore) -> Result<Vec<Payment>, ReviewError> {
    store.query_by_status(&[PaymentStatus::Verified])
}

/// Number of payments per status. Every status is present, zero or not.
pub fn status_counts(store: &PaymentStore) -> Result<BTreeMap<PaymentStatus, usize>, ReviewError> {
    let mut counts: BTreeMap<PaymentStatus, usize> = PaymentStatus::ALL.into_iter().map(|s| (s, 0)).collect();
    for payment in store.all()? {
        *counts.entry(payment.status).or_default() += 1;
    }
    Ok(counts)
}

/// Other submissions that claim the same transfer (same number, amount and screenshot).
pub fn find_duplicates(store: &PaymentStore, payment: &Payment) -> Result<Vec<Payment>, ReviewError> {
    store.scan(|other| other.fingerprint == payment.fingerprint && other.id != payment.id)
}

/// Case-insensitive match on email, user name, sender name or momo number.
pub fn search(store: &PaymentStore, needle: &str) -> Result<Vec<Payment>, ReviewError> {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return store.all();
    }
    store.scan(|p| {
        [&p.user_email, &p.user_name, &p.sender_name, &p.momo_number]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle))
    })
}
