//! JSON serialization for benchmark results.

use super::Summary;

/// Serialize a Summary to a compact JSON string.
///
/// # Errors
///
/// Returns an error if serialization fails (should not happen for Summary).
pub fn to_json(summary: &Summary) -> Result<String, serde_json::Error> {
    serde_json::to_string(summary)
}

/// Serialize a Summary to a pretty-printed JSON string.
///
/// # Errors
///
/// Returns an error if serialization fails (should not happen for Summary).
pub fn to_json_pretty(summary: &Summary) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(summary)
}
