use super::auth::Role;
use super::payment::{Flag, PaymentStatus, RejectionReason, TimeStamp};
use chrono::Utc;
use std::fmt;

// One applied transition. Entries are only ever appended to a payment's history.
#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct AuditEntry {
    #[n(0)]
    pub actor_id: String,
    #[n(1)]
    pub actor_email: String,
    #[n(2)]
    pub role: Role,
    #[n(3)]
    pub from: PaymentStatus,
    #[n(4)]
    pub to: PaymentStatus,
    #[n(5)]
    pub at: TimeStamp<Utc>,
    #[n(6)]
    pub flags: Vec<Flag>,
    #[n(7)]
    pub reasons: Vec<RejectionReason>,
    #[n(8)]
    pub notes: Option<String>,
}

impl fmt::Display for AuditEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} by {} ({})",
            self.at.to_datetime_utc().format("%Y-%m-%d %H:%M:%S"),
            self.from,
            self.to,
            self.actor_email,
            self.role
        )?;
        if !self.flags.is_empty() {
            let flags: Vec<&str> = self.flags.iter().map(Flag::label).collect();
            write!(f, " flags=[{}]", flags.join(", "))?;
        }
        if !self.reasons.is_empty() {
            let reasons: Vec<&str> = self.reasons.iter().map(RejectionReason::label).collect();
            write!(f, " reasons=[{}]", reasons.join(", "))?;
        }
        if let Some(notes) = &self.notes {
            write!(f, " notes={notes:?}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_tags_and_notes() {
        let entry = AuditEntry {
            actor_id: "worker_1".into(),
            actor_email: "ops@example.com".into(),
            role: Role::Verifier,
            from: PaymentStatus::Pending,
            to: PaymentStatus::Rejected,
            at: TimeStamp::new_with(2025, 3, 1, 9, 30, 0).unwrap(),
            flags: vec![Flag::AmountMismatch, Flag::NameMismatch],
            reasons: vec![],
            notes: Some("paid 40 not 50".into()),
        };

        assert_eq!(
            entry.to_string(),
            "2025-03-01 09:30:00 pending -> rejected by ops@example.com (verifier) \
             flags=[Amount Mismatch, Name Mismatch] notes=\"paid 40 not 50\""
        );
    }

    #[test]
    fn entry_cbor_roundtrip() {
        let entry = AuditEntry {
            actor_id: "worker_2".into(),
            actor_email: "lead@example.com".into(),
            role: Role::Rejector,
            from: PaymentStatus::Investigating,
            to: PaymentStatus::Rejected,
            at: TimeStamp::new(),
            flags: vec![],
            reasons: vec![RejectionReason::ReusedReceipt],
            notes: None,
        };

        let encoded = minicbor::to_vec(&entry).unwrap();
        let decoded: AuditEntry = minicbor::decode(&encoded).unwrap();
        assert_eq!(entry, decoded);
    }
}
