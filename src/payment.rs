//! Payment records, submission details and the review vocabularies
use super::audit::AuditEntry;
use super::error::{ReviewError, ValidationError};
use super::utils;
use chrono::{DateTime, TimeZone, Utc};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Plan {
    #[n(0)]
    Pro,
    #[n(1)]
    Elite,
    #[n(2)]
    Creator,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PaymentStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Verifying,
    #[n(2)]
    Investigating,
    #[n(3)]
    Verified,
    #[n(4)]
    Approved,
    #[n(5)]
    Rejected,
}

/// Issue tags a verifier may attach while reviewing a proof.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    #[n(0)]
    DuplicatePayment,
    #[n(1)]
    AmountMismatch,
    #[n(2)]
    InvalidScreenshot,
    #[n(3)]
    NameMismatch,
    #[n(4)]
    SuspiciousActivity,
    #[n(5)]
    IncompleteInformation,
}

/// Structured reasons recorded when an investigated payment is rejected.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    #[n(0)]
    InvalidScreenshot,
    #[n(1)]
    AmountMismatch,
    #[n(2)]
    SenderMismatch,
    #[n(3)]
    DuplicateTransaction,
    #[n(4)]
    ReusedReceipt,
    #[n(5)]
    TransactionNotFound,
    #[n(6)]
    WrongMethod,
    #[n(7)]
    SuspectedFraud,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

/// Who performed a stage and when.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    #[n(0)]
    pub by: String, // actor email
    #[n(1)]
    pub at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    #[n(0)]
    pub id: String, // bech32 encoded uuid7, "pay_" prefix
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub user_email: String,
    #[n(3)]
    pub user_name: String,
    #[n(4)]
    pub sender_name: String,
    #[n(5)]
    pub plan: Plan,
    #[n(6)]
    pub amount: String, // display string, e.g. "GHS 50"
    #[n(7)]
    pub method: String,
    #[n(8)]
    pub momo_number: String,
    #[n(9)]
    pub screenshot_url: String,
    #[n(10)]
    pub created_at: TimeStamp<Utc>,
    #[n(11)]
    pub fingerprint: String,
    #[n(12)]
    pub status: PaymentStatus,
    #[n(13)]
    pub verified: Option<Attribution>,
    #[n(14)]
    pub rejected: Option<Attribution>,
    #[n(15)]
    pub final_approved: Option<Attribution>,
    #[n(16)]
    pub investigated: Option<Attribution>,
    #[n(17)]
    pub verification_notes: Option<String>,
    #[n(18)]
    pub rejection_reasons: Option<Vec<RejectionReason>>,
    #[n(19)]
    pub flags: Option<Vec<Flag>>,
    #[n(20)]
    pub history: Vec<AuditEntry>,
}

// Submission form contents, written once by the submitter.
#[derive(Debug, Default, Clone)]
pub struct PaymentDetails {
    user_id: Option<String>,
    user_email: Option<String>,
    user_name: Option<String>,
    sender_name: Option<String>,
    plan: Option<Plan>,
    amount: Option<String>,
    method: Option<String>,
    momo_number: Option<String>,
    screenshot_url: Option<String>,
    created_at: Option<TimeStamp<Utc>>,
    initial_status: Option<PaymentStatus>,
}

#[derive(minicbor::Encode)]
struct FingerprintInput<'a> {
    #[n(0)]
    momo_number: &'a str,
    #[n(1)]
    amount: &'a str,
    #[n(2)]
    screenshot_url: &'a str,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Pro => "pro",
            Plan::Elite => "elite",
            Plan::Creator => "creator",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pro" => Ok(Plan::Pro),
            "elite" => Ok(Plan::Elite),
            "creator" => Ok(Plan::Creator),
            other => Err(format!("unknown plan {other:?}")),
        }
    }
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 6] = [
        PaymentStatus::Pending,
        PaymentStatus::Verifying,
        PaymentStatus::Investigating,
        PaymentStatus::Verified,
        PaymentStatus::Approved,
        PaymentStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Verifying => "verifying",
            PaymentStatus::Investigating => "investigating",
            PaymentStatus::Verified => "verified",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Approved | PaymentStatus::Rejected)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown status {s:?}"))
    }
}

impl Flag {
    pub const ALL: [Flag; 6] = [
        Flag::DuplicatePayment,
        Flag::AmountMismatch,
        Flag::InvalidScreenshot,
        Flag::NameMismatch,
        Flag::SuspiciousActivity,
        Flag::IncompleteInformation,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Flag::DuplicatePayment => "Duplicate Payment",
            Flag::AmountMismatch => "Amount Mismatch",
            Flag::InvalidScreenshot => "Invalid Screenshot",
            Flag::NameMismatch => "Name Mismatch",
            Flag::SuspiciousActivity => "Suspicious Activity",
            Flag::IncompleteInformation => "Incomplete Information",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Flag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Flag::ALL
            .into_iter()
            .find(|flag| flag.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown flag {s:?}"))
    }
}

impl RejectionReason {
    pub const ALL: [RejectionReason; 8] = [
        RejectionReason::InvalidScreenshot,
        RejectionReason::AmountMismatch,
        RejectionReason::SenderMismatch,
        RejectionReason::DuplicateTransaction,
        RejectionReason::ReusedReceipt,
        RejectionReason::TransactionNotFound,
        RejectionReason::WrongMethod,
        RejectionReason::SuspectedFraud,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            RejectionReason::InvalidScreenshot => "Invalid Screenshot / Blurry",
            RejectionReason::AmountMismatch => "Amount Mismatch",
            RejectionReason::SenderMismatch => "Sender Name Mismatch",
            RejectionReason::DuplicateTransaction => "Duplicate Transaction",
            RejectionReason::ReusedReceipt => "Reused Receipt",
            RejectionReason::TransactionNotFound => "Transaction Not Found",
            RejectionReason::WrongMethod => "Wrong Payment Method",
            RejectionReason::SuspectedFraud => "Suspected Fraud",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RejectionReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RejectionReason::ALL
            .into_iter()
            .find(|reason| reason.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown rejection reason {s:?}"))
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(TimeStamp)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

// chrono's Utc is not Ord itself, so order by the instant
impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

impl Attribution {
    pub fn new(by: impl Into<String>) -> Self {
        Self {
            by: by.into(),
            at: TimeStamp::new(),
        }
    }
}

impl Payment {
    pub fn verified_by(&self) -> Option<&str> {
        self.verified.as_ref().map(|a| a.by.as_str())
    }
    pub fn rejected_by(&self) -> Option<&str> {
        self.rejected.as_ref().map(|a| a.by.as_str())
    }
    pub fn final_approved_by(&self) -> Option<&str> {
        self.final_approved.as_ref().map(|a| a.by.as_str())
    }
    pub fn investigated_by(&self) -> Option<&str> {
        self.investigated.as_ref().map(|a| a.by.as_str())
    }
    pub fn history(&self) -> &[AuditEntry] {
        &self.history
    }
    pub fn to_cbor(&self) -> Result<Vec<u8>, ReviewError> {
        Ok(minicbor::to_vec(self)?)
    }
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, ReviewError> {
        Ok(minicbor::decode(bytes)?)
    }
}

impl PaymentDetails {
    /// Construct an empty submission, fields are filled in by the setters below
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_user(mut self, user_id: &str, email: &str, name: &str) -> Self {
        self.user_id = Some(user_id.to_owned());
        self.user_email = Some(email.to_owned());
        self.user_name = Some(name.to_owned());
        self
    }
    pub fn set_sender_name(mut self, sender_name: &str) -> Self {
        self.sender_name = Some(sender_name.to_owned());
        self
    }
    pub fn set_plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan);
        self
    }
    pub fn set_amount(mut self, amount: &str) -> Self {
        self.amount = Some(amount.to_owned());
        self
    }
    pub fn set_method(mut self, method: &str) -> Self {
        self.method = Some(method.to_owned());
        self
    }
    pub fn set_momo_number(mut self, momo_number: &str) -> Self {
        self.momo_number = Some(momo_number.to_owned());
        self
    }
    pub fn set_screenshot_url(mut self, url: &str) -> Self {
        self.screenshot_url = Some(url.to_owned());
        self
    }
    pub fn set_created_at(mut self, created_at: TimeStamp<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
    /// Records imported from elsewhere may arrive already routed to a later
    /// review stage. Defaults to `pending`.
    pub fn set_initial_status(mut self, status: PaymentStatus) -> Self {
        self.initial_status = Some(status);
        self
    }

    /// sha256 over the fields that identify a single real-world transfer.
    pub fn fingerprint(&self) -> Result<String, ReviewError> {
        let input = FingerprintInput {
            momo_number: self.momo_number.as_deref().unwrap_or_default().trim(),
            amount: self.amount.as_deref().unwrap_or_default().trim(),
            screenshot_url: self.screenshot_url.as_deref().unwrap_or_default().trim(),
        };
        let contents = minicbor::to_vec(&input)?;
        Ok(sha256::digest(&contents))
    }

    // Checks required fields, assigns an id and returns the record ready to store
    pub fn validate_and_finalise(self) -> Result<Payment, ReviewError> {
        let fingerprint = self.fingerprint()?;

        let user_id = required(self.user_id, "user id")?;
        let user_email = required(self.user_email, "user email")?;
        let user_name = self.user_name.unwrap_or_default();
        let sender_name = required(self.sender_name, "sender name")?;
        let plan = self.plan.ok_or(ValidationError::MissingField("plan"))?;
        let amount = required(self.amount, "amount")?;
        let method = self.method.unwrap_or_else(|| "momo".to_owned());
        let momo_number = required(self.momo_number, "momo number")?;
        let screenshot_url = required(self.screenshot_url, "screenshot url")?;

        let id = utils::new_payment_id().map_err(|e| ReviewError::Identifier(e.to_string()))?;

        Ok(Payment {
            id,
            user_id,
            user_email,
            user_name,
            sender_name,
            plan,
            amount,
            method,
            momo_number,
            screenshot_url,
            created_at: self.created_at.unwrap_or_default(),
            fingerprint,
            status: self.initial_status.unwrap_or(PaymentStatus::Pending),
            verified: None,
            rejected: None,
            final_approved: None,
            investigated: None,
            verification_notes: None,
            rejection_reasons: None,
            flags: None,
            history: vec![],
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ValidationError::MissingField(field)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn timestamps_order_by_instant() {
        let early = TimeStamp::new_with(2025, 1, 1, 8, 0, 0).unwrap();
        let late = TimeStamp::new_with(2025, 1, 1, 8, 0, 1).unwrap();

        assert!(early < late);
        assert_eq!(late.cmp(&early), Ordering::Greater);
        assert_eq!(early.clone().max(late.clone()), late);
    }

    #[test]
    fn fingerprint_ignores_submitter_identity() {
        let a = PaymentDetails::new()
            .set_user("user_a", "a@example.com", "A")
            .set_momo_number("0241234567")
            .set_amount("GHS 50")
            .set_screenshot_url("https://img.example/r1.png");
        let b = a.clone().set_user("user_b", "b@example.com", "B");

        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_ne!(
            a.fingerprint().unwrap(),
            a.clone().set_amount("GHS 60").fingerprint().unwrap()
        );
    }

    #[test]
    fn vocabularies_parse_their_labels() {
        for flag in Flag::ALL {
            assert_eq!(flag.label().parse::<Flag>(), Ok(flag));
        }
        for reason in RejectionReason::ALL {
            assert_eq!(reason.label().parse::<RejectionReason>(), Ok(reason));
        }
        assert_eq!("amount mismatch".parse::<Flag>(), Ok(Flag::AmountMismatch));
        assert!("Cash Only".parse::<Flag>().is_err());
    }
}
