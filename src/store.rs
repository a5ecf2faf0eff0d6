//! Durable payment records kept in a sled tree
use super::error::ReviewError;
use super::payment::{Payment, PaymentDetails, PaymentStatus};
use super::queue;
use sled::{CompareAndSwapError, IVec, Subscriber, Tree};
use std::time::Duration;
use tracing::debug;

pub const PAYMENTS_TREE: &str = "payments";

// a status write that loses only to a non-status change is retried this many times
const MAX_SWAP_ATTEMPTS: usize = 8;

#[derive(Clone)]
pub struct PaymentStore {
    tree: Tree,
}

/// Re-delivers the full set of payments in the watched statuses after every
/// change to the payments tree.
pub struct PaymentFeed {
    tree: Tree,
    statuses: Vec<PaymentStatus>,
    subscriber: Subscriber,
}

impl PaymentStore {
    pub fn open(db: &sled::Db) -> Result<Self, ReviewError> {
        Ok(Self {
            tree: db.open_tree(PAYMENTS_TREE)?,
        })
    }

    /// Store a new submission. Submissions normally arrive from the intake form.
    pub fn create(&self, details: PaymentDetails) -> Result<Payment, ReviewError> {
        let payment = details.validate_and_finalise()?;
        self.tree
            .compare_and_swap(payment.id.as_bytes(), None as Option<&[u8]>, Some(payment.to_cbor()?))?
            .map_err(|_| ReviewError::Identifier(format!("payment id {} already taken", payment.id)))?;
        debug!(payment_id = %payment.id, status = %payment.status, "payment created");
        Ok(payment)
    }

    pub fn find(&self, id: &str) -> Result<Option<Payment>, ReviewError> {
        self.tree
            .get(id.as_bytes())?
            .map(|raw| Payment::from_cbor(&raw))
            .transpose()
    }

    pub fn get(&self, id: &str) -> Result<Payment, ReviewError> {
        self.find(id)?.ok_or_else(|| ReviewError::NotFound(id.to_owned()))
    }

    /// Every payment, newest submission first.
    pub fn all(&self) -> Result<Vec<Payment>, ReviewError> {
        self.scan(|_| true)
    }

    /// Payments whose status is one of `statuses`, newest submission first.
    pub fn query_by_status(&self, statuses: &[PaymentStatus]) -> Result<Vec<Payment>, ReviewError> {
        self.scan(|p| statuses.contains(&p.status))
    }

    pub fn query_by_user(&self, user_id: &str) -> Result<Vec<Payment>, ReviewError> {
        self.scan(|p| p.user_id == user_id)
    }

    // unordered fetch, sorted client-side
    pub(crate) fn scan(&self, keep: impl Fn(&Payment) -> bool) -> Result<Vec<Payment>, ReviewError> {
        let mut payments = vec![];
        for entry in self.tree.iter() {
            let (_, raw) = entry?;
            let payment = Payment::from_cbor(&raw)?;
            if keep(&payment) {
                payments.push(payment);
            }
        }
        queue::newest_first(&mut payments);
        Ok(payments)
    }

    /// Conditional write: `update` only runs against a record whose status is
    /// `expected`, and the result is only stored if the record has not changed
    /// since it was read. Losing to a status change yields `NoLongerApplicable`.
    pub fn update_if<F>(&self, id: &str, expected: PaymentStatus, update: F) -> Result<Payment, ReviewError>
    where
        F: Fn(&Payment) -> Result<Payment, ReviewError>,
    {
        let mut raw = self.load_raw(id)?;

        for attempt in 1..=MAX_SWAP_ATTEMPTS {
            let current = Payment::from_cbor(&raw)?;
            if current.status != expected {
                return Err(ReviewError::NoLongerApplicable {
                    id: id.to_owned(),
                    expected,
                    found: current.status,
                });
            }

            let next = update(&current)?;
            match self.tree.compare_and_swap(id.as_bytes(), Some(&raw), Some(next.to_cbor()?))? {
                Ok(()) => return Ok(next),
                Err(CompareAndSwapError { current: Some(newer), .. }) => {
                    debug!(payment_id = id, attempt, "payment changed underneath, re-reading");
                    raw = newer;
                }
                Err(CompareAndSwapError { current: None, .. }) => {
                    return Err(ReviewError::NotFound(id.to_owned()));
                }
            }
        }

        let found = Payment::from_cbor(&raw)?.status;
        Err(ReviewError::NoLongerApplicable {
            id: id.to_owned(),
            expected,
            found,
        })
    }

    fn load_raw(&self, id: &str) -> Result<IVec, ReviewError> {
        self.tree
            .get(id.as_bytes())?
            .ok_or_else(|| ReviewError::NotFound(id.to_owned()))
    }

    /// Watch the payments in `statuses`. An empty list watches everything.
    pub fn subscribe(&self, statuses: Vec<PaymentStatus>) -> PaymentFeed {
        PaymentFeed {
            tree: self.tree.clone(),
            subscriber: self.tree.watch_prefix(Vec::<u8>::new()),
            statuses,
        }
    }

    pub fn flush(&self) -> Result<(), ReviewError> {
        self.tree.flush()?;
        Ok(())
    }
}

impl PaymentFeed {
    /// The current matching set, without waiting for a change.
    pub fn snapshot(&self) -> Result<Vec<Payment>, ReviewError> {
        let store = PaymentStore {
            tree: self.tree.clone(),
        };
        if self.statuses.is_empty() {
            store.all()
        } else {
            store.query_by_status(&self.statuses)
        }
    }

    /// Wait up to `timeout` for a change. `Ok(None)` means nothing changed.
    pub fn next_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<Payment>>, ReviewError> {
        match self.subscriber.next_timeout(timeout) {
            Ok(_event) => self.snapshot().map(Some),
            Err(_) => Ok(None),
        }
    }
}

impl Iterator for PaymentFeed {
    type Item = Result<Vec<Payment>, ReviewError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.subscriber.next()?;
        Some(self.snapshot())
    }
}
