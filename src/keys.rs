//! Composite key encoding.
//!
//! Multi-part keys are the UTF-8 parts joined by a NUL byte, so every key of
//! one owner sorts contiguously and can be found with a prefix scan:
//!
//! - sections: `examId \0 name`
//! - documents: `userId \0 examId \0 sectionId`
//! - exam owner index: `userId \0 examId`

use crate::store_error::{StoreError, StoreResult};

pub(crate) const SEPARATOR: u8 = 0;

/// LMDB rejects keys over 511 bytes; three parts plus separators must fit.
pub(crate) const MAX_PART_LEN: usize = 160;

pub(crate) fn is_valid_part(value: &str) -> bool {
    !value.is_empty() && value.len() <= MAX_PART_LEN && !value.as_bytes().contains(&SEPARATOR)
}

/// Reject identifiers that cannot be encoded as a key part.
pub(crate) fn validate(field: &str, value: &str) -> StoreResult<()> {
    if value.is_empty() {
        return Err(StoreError::Validation(format!("{field} must not be empty")));
    }
    if value.len() > MAX_PART_LEN {
        return Err(StoreError::Validation(format!(
            "{field} exceeds {MAX_PART_LEN} bytes"
        )));
    }
    if value.as_bytes().contains(&SEPARATOR) {
        return Err(StoreError::Validation(format!(
            "{field} must not contain NUL bytes"
        )));
    }
    Ok(())
}

pub(crate) fn composite(parts: &[&str]) -> Vec<u8> {
    let mut key = Vec::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            key.push(SEPARATOR);
        }
        key.extend_from_slice(part.as_bytes());
    }
    key
}

/// Prefix matching every composite key that starts with `parts`.
pub(crate) fn prefix(parts: &[&str]) -> Vec<u8> {
    let mut key = composite(parts);
    key.push(SEPARATOR);
    key
}
