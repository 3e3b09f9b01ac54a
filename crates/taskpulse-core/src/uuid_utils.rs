//! UUID v7 utilities for time-ordered identifiers.
//!
//! Tasks, jobs and event envelopes all use UUIDv7, so ids sort in creation
//! order and the leading 48 bits carry the creation time in milliseconds.

use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
///
/// # Example
///
/// ```
/// use taskpulse_core::uuid_utils::new_v7;
///
/// let id = new_v7();
/// assert_eq!(id.get_version_num(), 7);
/// ```
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}
