//! Identifier generation for runs and events.

use uuid::Uuid;

/// Generates a new UUID v4.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Generates a new UUID v7 (time-ordered).
#[must_use]
pub fn generate_uuid_v7() -> Uuid {
    Uuid::now_v7()
}

/// Generates a run identifier.
///
/// Run ids are time-ordered so that lexical order roughly follows creation order.
#[must_use]
pub fn generate_run_id() -> String {
    generate_uuid_v7().to_string()
}
