//! Translation of provider status payloads into `PaymentStatus`.
//!
//! The provider has shipped several response schemas over time and the
//! status field has moved around between them. Extraction walks an ordered
//! list of candidate paths and takes the first string hit; mapping folds the
//! provider's vocabulary into the internal enum.

use serde_json::Value;

use crate::db::models::PaymentStatus;

/// Candidate locations of the status field, tried in order. New provider
/// schema revisions get a new entry here rather than a new branch.
const STATUS_PATHS: &[&[&str]] = &[
    &["status"],
    &["transactionStatus"],
    &["transaction", "status"],
    &["transaction_status"],
    &["data", "status"],
];

fn lookup<'a>(response: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(response, |node, key| node.get(key))
}

/// Pulls the raw status string out of a provider response, if any of the
/// known shapes carry one. `None` means the caller must treat the poll as a
/// no-op, not as a failure.
pub fn extract_raw_status(response: &Value) -> Option<String> {
    STATUS_PATHS
        .iter()
        .filter_map(|path| lookup(response, path))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Case-insensitive fold of the provider vocabulary into `PaymentStatus`.
/// Unrecognized input maps to `Pending`: an unknown word must never promote
/// a transaction into a terminal state.
pub fn map_status(raw: &str) -> PaymentStatus {
    match raw.trim().to_ascii_lowercase().as_str() {
        "completed" | "success" | "settled" | "approved" => PaymentStatus::Completed,
        "pending" => PaymentStatus::Pending,
        "processing" | "in_progress" | "submitted" => PaymentStatus::Processing,
        "failed" | "declined" | "rejected" | "returned" | "error" => PaymentStatus::Failed,
        "refunded" | "reversed" => PaymentStatus::Refunded,
        "voided" | "cancelled" => PaymentStatus::Voided,
        _ => PaymentStatus::Pending,
    }
}
