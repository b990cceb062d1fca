//! Generation of new UIDs for derived instances.
use uuid::Uuid;

/// The root of UUID-derived UIDs (standard, part 5, section B.2).
const UUID_ROOT: &str = "2.25.";

/// Generate a new globally unique UID,
/// as the decimal form of a random UUID under the `2.25` root.
pub fn new_uid() -> String {
    uid_from_uuid(Uuid::new_v4())
}

fn uid_from_uuid(uuid: Uuid) -> String {
    format!("{}{}", UUID_ROOT, uuid.as_u128())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_is_written_in_decimal() {
        let uuid = Uuid::from_u128(0xAB);
        assert_eq!(uid_from_uuid(uuid), "2.25.171");
        assert_eq!(uid_from_uuid(Uuid::nil()), "2.25.0");
    }

    #[test]
    fn new_uids_are_valid_and_distinct() {
        let a = new_uid();
        let b = new_uid();
        assert_ne!(a, b);
        for uid in [&a, &b] {
            assert!(uid.starts_with("2.25."));
            // UIDs are limited to 64 characters
            assert!(uid.len() <= 64);
            assert!(uid.chars().all(|c| c.is_ascii_digit() || c == '.'));
            // no leading zero in the numeric component
            assert!(!uid[5..].starts_with('0') || uid.len() == 6);
        }
    }
}
