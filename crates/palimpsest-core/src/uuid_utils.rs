//! UUID v7 utilities for time-ordered identifiers.
//!
//! All rows created by this system use UUIDv7, which embeds a
//! millisecond-precision timestamp in the first 48 bits and therefore sorts
//! in creation order.

use uuid::Uuid;

/// Generate a time-ordered UUIDv7. Jobs queued later always sort after
/// earlier ones, which keeps the claim order stable within a priority.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_v7_is_version_7() {
        let id = new_v7();
        assert_eq!(id.get_version_num(), 7);
    }

    #[test]
    fn test_new_v7_is_time_ordered() {
        let a = new_v7();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_v7();
        assert!(a < b);
    }
}
