//! In-memory data sets and typed attribute accessors.
//!
//! Data sets are plain [`InMemDicomObject`] values.
//! The [`DatasetExt`] trait adds the few accessors
//! which the DIMSE services and their callers keep reaching for,
//! with trailing padding already removed.
use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_object::InMemDicomObject;

/// An in-memory DICOM data set with the standard data dictionary.
pub type Dataset = InMemDicomObject;

/// Typed accessors over a [`Dataset`].
pub trait DatasetExt {
    /// Fetch the textual value of an attribute,
    /// without padding or surrounding whitespace.
    ///
    /// Returns `None` if the attribute is absent
    /// or its value cannot be read as text.
    fn text(&self, tag: Tag) -> Option<String>;

    /// Fetch the value of an attribute as an unsigned 16-bit integer.
    fn uint16(&self, tag: Tag) -> Option<u16>;

    /// Insert or replace a textual attribute.
    fn put_text(&mut self, tag: Tag, vr: VR, value: &str);

    /// Insert or replace an `US` attribute.
    fn put_uint16(&mut self, tag: Tag, value: u16);
}

impl DatasetExt for Dataset {
    fn text(&self, tag: Tag) -> Option<String> {
        let value = self.get(tag)?.to_str().ok()?;
        Some(
            value
                .trim_matches(|c: char| c == '\0' || c.is_whitespace())
                .to_string(),
        )
    }

    fn uint16(&self, tag: Tag) -> Option<u16> {
        self.get(tag)?.to_int::<u16>().ok()
    }

    fn put_text(&mut self, tag: Tag, vr: VR, value: &str) {
        self.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
    }

    fn put_uint16(&mut self, tag: Tag, value: u16) {
        self.put(DataElement::new(tag, VR::US, PrimitiveValue::from(value)));
    }
}

#[cfg(test)]
mod tests {
    use super::{Dataset, DatasetExt};
    use dicom_core::VR;
    use dicom_dictionary_std::tags;

    #[test]
    fn text_is_unpadded() {
        let mut obj = Dataset::new_empty();
        obj.put_text(tags::SERIES_INSTANCE_UID, VR::UI, "1.2.3.4\0");
        obj.put_text(tags::MODALITY, VR::CS, "MG ");
        assert_eq!(obj.text(tags::SERIES_INSTANCE_UID).as_deref(), Some("1.2.3.4"));
        assert_eq!(obj.text(tags::MODALITY).as_deref(), Some("MG"));
        assert_eq!(obj.text(tags::STUDY_INSTANCE_UID), None);
    }

    #[test]
    fn integers() {
        let mut obj = Dataset::new_empty();
        obj.put_uint16(tags::ROWS, 512);
        assert_eq!(obj.uint16(tags::ROWS), Some(512));
        obj.put_uint16(tags::ROWS, 256);
        assert_eq!(obj.uint16(tags::ROWS), Some(256));
        assert_eq!(obj.uint16(tags::COLUMNS), None);
    }
}
