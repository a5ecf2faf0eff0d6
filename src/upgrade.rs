//! Plan upgrade effector: the only code that changes a user's plan
use super::error::UpgradeError;
use super::payment::{Plan, TimeStamp};
use chrono::Utc;
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionError, abort};
use tracing::info;

pub const USERS_TREE: &str = "users";
pub const UPGRADES_TREE: &str = "plan_upgrades";

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct User {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub email: String,
    #[n(2)]
    pub plan: Option<Plan>,
    #[n(3)]
    pub is_subscribed: bool,
    #[n(4)]
    pub last_upgrade_at: Option<TimeStamp<Utc>>,
}

/// Proof that the upgrade for one payment has been applied.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct UpgradeReceipt {
    #[n(0)]
    pub payment_id: String,
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub plan: Plan,
    #[n(3)]
    pub applied_at: TimeStamp<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    Applied(UpgradeReceipt),
    AlreadyApplied(UpgradeReceipt),
}

/// Grants the plan bought by a payment.
///
/// Implementations must apply the upgrade at most once per `payment_id`:
/// a second call for the same payment returns `AlreadyApplied` and leaves the
/// user record alone.
pub trait PlanUpgradeEffector {
    fn apply_upgrade(&self, payment_id: &str, user_id: &str, plan: Plan) -> Result<UpgradeOutcome, UpgradeError>;

    fn receipt(&self, payment_id: &str) -> Result<Option<UpgradeReceipt>, UpgradeError>;
}

/// Effector over the `users` tree. The user mutation and the receipt are
/// written in one sled transaction.
#[derive(Clone)]
pub struct SledPlanUpgrader {
    users: sled::Tree,
    upgrades: sled::Tree,
}

impl User {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            plan: None,
            is_subscribed: false,
            last_upgrade_at: None,
        }
    }
}

impl UpgradeOutcome {
    pub fn receipt(&self) -> &UpgradeReceipt {
        match self {
            UpgradeOutcome::Applied(r) | UpgradeOutcome::AlreadyApplied(r) => r,
        }
    }
}

impl SledPlanUpgrader {
    pub fn open(db: &sled::Db) -> Result<Self, sled::Error> {
        Ok(Self {
            users: db.open_tree(USERS_TREE)?,
            upgrades: db.open_tree(UPGRADES_TREE)?,
        })
    }

    pub fn put_user(&self, user: &User) -> Result<(), UpgradeError> {
        let bytes = minicbor::to_vec(user).map_err(|e| UpgradeError::Codec(e.to_string()))?;
        self.users.insert(user.id.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<User>, UpgradeError> {
        self.users
            .get(user_id.as_bytes())?
            .map(|raw| minicbor::decode(&raw).map_err(|e| UpgradeError::Codec(e.to_string())))
            .transpose()
    }
}

impl PlanUpgradeEffector for SledPlanUpgrader {
    fn apply_upgrade(&self, payment_id: &str, user_id: &str, plan: Plan) -> Result<UpgradeOutcome, UpgradeError> {
        let result = (&self.users, &self.upgrades).transaction(
            |(users, upgrades)| -> ConflictableTransactionResult<UpgradeOutcome, UpgradeError> {
                if let Some(raw) = upgrades.get(payment_id.as_bytes())? {
                    let receipt: UpgradeReceipt = decode(&raw)?;
                    return Ok(UpgradeOutcome::AlreadyApplied(receipt));
                }

                let Some(raw) = users.get(user_id.as_bytes())? else {
                    return abort(UpgradeError::UserNotFound(user_id.to_owned()));
                };
                let mut user: User = decode(&raw)?;

                let now = TimeStamp::new();
                user.plan = Some(plan);
                user.is_subscribed = true;
                user.last_upgrade_at = Some(now.clone());

                let receipt = UpgradeReceipt {
                    payment_id: payment_id.to_owned(),
                    user_id: user_id.to_owned(),
                    plan,
                    applied_at: now,
                };

                users.insert(user_id.as_bytes(), encode(&user)?)?;
                upgrades.insert(payment_id.as_bytes(), encode(&receipt)?)?;
                Ok(UpgradeOutcome::Applied(receipt))
            },
        );

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(TransactionError::Abort(e)) => return Err(e),
            Err(TransactionError::Storage(e)) => return Err(UpgradeError::Store(e)),
        };

        if let UpgradeOutcome::Applied(receipt) = &outcome {
            info!(payment_id, user_id, plan = %receipt.plan, "plan upgrade applied");
        }
        Ok(outcome)
    }

    fn receipt(&self, payment_id: &str) -> Result<Option<UpgradeReceipt>, UpgradeError> {
        self.upgrades
            .get(payment_id.as_bytes())?
            .map(|raw| minicbor::decode(&raw).map_err(|e| UpgradeError::Codec(e.to_string())))
            .transpose()
    }
}

fn decode<T>(raw: &[u8]) -> Result<T, ConflictableTransactionError<UpgradeError>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(raw).map_err(|e| ConflictableTransactionError::Abort(UpgradeError::Codec(e.to_string())))
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, ConflictableTransactionError<UpgradeError>> {
    minicbor::to_vec(value).map_err(|e| ConflictableTransactionError::Abort(UpgradeError::Codec(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrader() -> (sled::Db, SledPlanUpgrader) {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let upgrader = SledPlanUpgrader::open(&db).unwrap();
        (db, upgrader)
    }

    #[test]
    fn applies_once_per_payment() {
        let (_db, upgrader) = upgrader();
        upgrader.put_user(&User::new("user_1", "yaw@example.com")).unwrap();

        let first = upgrader.apply_upgrade("pay_1", "user_1", Plan::Creator).unwrap();
        assert!(matches!(first, UpgradeOutcome::Applied(_)));
        let stamped = upgrader.get_user("user_1").unwrap().unwrap();

        let second = upgrader.apply_upgrade("pay_1", "user_1", Plan::Creator).unwrap();
        assert_eq!(second, UpgradeOutcome::AlreadyApplied(first.receipt().clone()));

        let user = upgrader.get_user("user_1").unwrap().unwrap();
        assert_eq!(user, stamped);
        assert_eq!(user.plan, Some(Plan::Creator));
        assert!(user.is_subscribed);
    }

    #[test]
    fn missing_user_leaves_no_receipt() {
        let (_db, upgrader) = upgrader();

        let err = upgrader.apply_upgrade("pay_2", "user_ghost", Plan::Pro).unwrap_err();
        assert!(matches!(err, UpgradeError::UserNotFound(id) if id == "user_ghost"));
        assert_eq!(upgrader.receipt("pay_2").unwrap(), None);
    }
}
