//! Payment proof review: the status workflow that takes a submitted payment
//! claim through verification, investigation and final approval, and grants
//! the purchased plan exactly once when it is approved.

pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod payment;
pub mod queue;
pub mod service;
pub mod store;
pub mod transition;
pub mod upgrade;
pub mod utils;

pub use auth::{Actor, Role, Worker};
pub use error::{ReviewError, ValidationError};
pub use payment::{Flag, Payment, PaymentDetails, PaymentStatus, Plan, RejectionReason};
pub use service::{ReviewService, TransitionReport, UpgradeEffect};
