//! Checkpoint name normalization.
//!
//! Workers report their loaded model as e.g. `"modelA.safetensors [89ff21]"`
//! while users and static configuration refer to it as `"modelA"`. Every
//! comparison of checkpoint identifiers in the workspace goes through
//! [`normalize_checkpoint`] first.

/// Strip the file extension and bracketed hash suffix from a checkpoint
/// name and trim surrounding whitespace.
///
/// Everything from the first `.` onwards is treated as extension, then
/// everything from the first `[` onwards as hash. Returns `None` when
/// nothing is left, so a blank name never matches a real checkpoint.
///
/// Normalization is idempotent: the output contains neither `.` nor `[`.
pub fn normalize_checkpoint(raw: &str) -> Option<String> {
    let without_ext = raw.split('.').next().unwrap_or_default();
    let without_hash = without_ext.split('[').next().unwrap_or_default();
    let trimmed = without_hash.trim();

    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Normalize an optional checkpoint name (as reported by a worker probe).
pub fn normalize_optional(raw: Option<&str>) -> Option<String> {
    raw.and_then(normalize_checkpoint)
}
