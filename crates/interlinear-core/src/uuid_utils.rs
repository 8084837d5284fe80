//! UUID v7 utilities for time-ordered job identifiers.
//!
//! Job ids are UUIDv7 so that ids minted later sort later, which keeps
//! `ORDER BY created_at, id` stable for jobs created in the same millisecond.

use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
///
/// # Example
///
/// ```
/// use interlinear_core::uuid_utils::new_v7;
///
/// let a = new_v7();
/// let b = new_v7();
/// assert!(b > a);
/// ```
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Check if a UUID is version 7.
#[inline]
pub fn is_v7(uuid: &Uuid) -> bool {
    uuid.get_version_num() == 7
}
