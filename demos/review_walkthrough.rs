//! Walks one payment through investigation, re-verification and approval.
//!
//! Configuration comes from the environment (see `ReviewConfig`); the
//! database lives in a temp dir unless `REVIEW_DB_PATH` is set.

use anyhow::Context;
use payment_review::{
    Flag, PaymentDetails, PaymentStatus, Plan, RejectionReason, ReviewService, Role, Worker,
    config::ReviewConfig,
    logging, queue,
    upgrade::User,
    utils,
};
use tempfile::tempdir;

fn main() -> anyhow::Result<()> {
    let mut config = ReviewConfig::load()?;
    logging::init(&config.log_filter);

    let temp_dir = tempdir()?;
    if std::env::var("REVIEW_DB_PATH").is_err() {
        config.db_path = temp_dir.path().join("walkthrough.db");
    }

    let service = ReviewService::open(&config)?;

    let user = User::new(utils::new_uuid_to_bech32(utils::USER_HRP)?, "adwoa@example.com");
    service.effector().put_user(&user)?;

    let lead = Worker::new(
        utils::new_uuid_to_bech32(utils::WORKER_HRP)?,
        "lead@example.com",
        vec![Role::Verifier, Role::Rejector],
    );
    let rejector = lead.start_session(Role::Rejector)?;
    let verifier = lead.start_session(Role::Verifier)?;

    let claim = |sender: &str, status: PaymentStatus| {
        PaymentDetails::new()
            .set_user(&user.id, &user.email, "Adwoa")
            .set_sender_name(sender)
            .set_plan(Plan::Elite)
            .set_amount("GHS 120")
            .set_method("momo")
            .set_momo_number("0265554444")
            .set_screenshot_url("https://img.example/adwoa.png")
            .set_initial_status(status)
    };

    // flagged for a closer look by the intake screen
    let payment = service.submit(claim("Adwoa Sarpong", PaymentStatus::Investigating))?;
    service.send_to_verifier(&payment.id, &rejector, Some("sender matches account holder".into()))?;
    let report = service
        .approve_verification(&payment.id, &verifier, vec![], None)
        .context("approval failed")?;
    println!("{} -> {} ({:?})", report.payment.id, report.payment.status, report.effect);

    // the same receipt submitted again
    let copy = service.submit(claim("A. Sarpong", PaymentStatus::Investigating))?;
    let dupes = queue::find_duplicates(service.store(), &copy)?;
    println!("{} duplicates found for {}", dupes.len(), copy.id);
    service.reject_investigation(
        &copy.id,
        &rejector,
        vec![RejectionReason::ReusedReceipt, RejectionReason::DuplicateTransaction],
        None,
    )?;

    let pending = service.submit(claim("Adwoa Sarpong", PaymentStatus::Pending))?;
    service.reject_verification(&pending.id, &verifier, vec![Flag::DuplicatePayment], None)?;

    for payment in service.store().all()? {
        println!("{} [{}]", payment.id, payment.status);
        for entry in payment.history() {
            println!("  {entry}");
        }
    }
    for (status, count) in queue::status_counts(service.store())? {
        println!("{status}: {count}");
    }

    let user = service
        .effector()
        .get_user(&user.id)?
        .context("user record missing")?;
    println!("{} plan={:?} subscribed={}", user.email, user.plan, user.is_subscribed);

    service.flush()?;
    Ok(())
}
