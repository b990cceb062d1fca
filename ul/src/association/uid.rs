//! Private utility module for working with UIDs

use std::borrow::Cow;

/// Remove the trailing null padding of a UID, if any.
pub(crate) fn trim_uid(uid: Cow<'_, str>) -> Cow<'_, str> {
    if uid.ends_with('\0') {
        Cow::Owned(uid.trim_end_matches('\0').to_string())
    } else {
        uid
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::trim_uid;

    #[test]
    fn trims_null_padding_only() {
        assert_eq!(trim_uid(Cow::from("1.2.840.10008.1.2")), "1.2.840.10008.1.2");
        assert_eq!(trim_uid(Cow::from("1.2.840.10008.1.2\0")), "1.2.840.10008.1.2");
        assert!(matches!(trim_uid(Cow::from("1.2.3")), Cow::Borrowed(_)));
    }
}
