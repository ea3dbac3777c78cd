//! Utility functions for run id generation and timestamp handling.

pub mod timestamps;
mod ids;

pub use ids::{generate_run_id, generate_uuid, generate_uuid_v7};
pub use timestamps::{elapsed_ms, iso_timestamp, now_utc, Timestamp};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uuid_is_valid() {
        let id = generate_uuid();
        assert_eq!(id.get_version_num(), 4);
    }

    #[test]
    fn test_iso_timestamp_format() {
        let ts = iso_timestamp();
        assert!(ts.contains('T'));
        assert!(ts.ends_with("+00:00"));
    }
}
