//! Failure ledger policy.
//!
//! The storage backends implement [`FailureLedger`] in SQL; the rules they
//! encode are spelled out here once so the in-memory ledger used by tests
//! and the sweeps share them.

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{FailedRecord, NewFailure, RetryCandidate};
use crate::traits::FailureLedger;

/// Error messages that no retry can fix. Records carrying one are ignored.
pub const UNRECOVERABLE_ERROR_MESSAGES: &[&str] = &[
    "Validation error: id_product: missing or not a string or number",
    "Validation error: extracted data is not a JSON object",
    "Unique constraint violation",
];

/// Records that failed this many times are ignored by the policy sweep.
pub const IGNORE_AT_RETRY_COUNT: u32 = 3;

/// Highest retry count still eligible for re-enqueueing.
pub const MAX_RETRY_COUNT: u32 = 2;

/// Upsert semantics: first failure starts at zero, repeats replace the
/// message and increment. A known product id survives a failure without one.
pub fn apply_failure(
    existing: Option<&FailedRecord>,
    failure: &NewFailure,
    now: DateTime<Utc>,
) -> FailedRecord {
    match existing {
        None => FailedRecord {
            natural_key: failure.natural_key.clone(),
            url: failure.url.clone(),
            offer_id: failure.offer_id,
            error_message: failure.error_message.clone(),
            retry_count: 0,
            resolved: false,
            ignore: false,
            id_product: failure.id_product.clone(),
            created_at: now,
            updated_at: now,
        },
        Some(record) => FailedRecord {
            error_message: failure.error_message.clone(),
            retry_count: record.retry_count.saturating_add(1),
            id_product: failure.id_product.clone().or_else(|| record.id_product.clone()),
            updated_at: now,
            ..record.clone()
        },
    }
}

pub fn should_ignore(record: &FailedRecord) -> bool {
    !record.ignore
        && (UNRECOVERABLE_ERROR_MESSAGES.contains(&record.error_message.as_str())
            || record.retry_count >= IGNORE_AT_RETRY_COUNT
            || record.resolved)
}

pub fn is_retry_candidate(record: &FailedRecord, denied_offer_ids: &[i64]) -> bool {
    !record.resolved
        && !record.ignore
        && record.retry_count <= MAX_RETRY_COUNT
        && !denied_offer_ids.contains(&record.offer_id)
}

/// Counts from one maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub resolved: u64,
    pub ignored: u64,
}

/// Reconcile against persisted products, then apply the ignore policy.
///
/// The order matters: records resolved by the first step are ignored by the
/// second.
pub async fn sweep<L: FailureLedger>(ledger: &L) -> Result<SweepReport, AppError> {
    let resolved = ledger.mark_resolved().await?;
    let ignored = ledger.apply_ignore_policy().await?;
    tracing::info!(resolved, ignored, "Failure ledger swept");
    Ok(SweepReport { resolved, ignored })
}

impl From<&FailedRecord> for RetryCandidate {
    fn from(record: &FailedRecord) -> Self {
        Self {
            url: record.url.clone(),
            natural_key: record.natural_key.clone(),
            offer_id: record.offer_id,
        }
    }
}
