//! Codec adapter between data sets and their wire encoding.
//!
//! DIMSE command sets are always encoded in _Implicit VR Little Endian_,
//! whereas data sets follow the transfer syntax
//! negotiated for their presentation context.
use dicom_encoding::transfer_syntax::{TransferSyntax, TransferSyntaxIndex};
use dicom_transfer_syntax_registry::{entries, TransferSyntaxRegistry};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};

use crate::dataset::Dataset;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("unsupported transfer syntax {}", uid))]
    UnsupportedTransferSyntax { uid: String, backtrace: Backtrace },

    /// could not decode data set
    Decode { source: dicom_object::ReadError },

    /// could not encode data set
    Encode { source: dicom_object::WriteError },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Decoder and encoder of data sets for a given transfer syntax.
pub trait Codec {
    /// Decode a data set from its encoded bytes.
    fn decode(&self, transfer_syntax_uid: &str, bytes: &[u8]) -> Result<Dataset>;

    /// Encode a data set into bytes.
    fn encode(&self, transfer_syntax_uid: &str, dataset: &Dataset) -> Result<Vec<u8>>;
}

/// A codec backed by the built-in transfer syntax registry.
///
/// Only transfer syntaxes whose data set encoding is fully known
/// are admitted. Encapsulated pixel data is kept as is.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegistryCodec;

impl RegistryCodec {
    fn lookup(uid: &str) -> Result<&'static TransferSyntax> {
        let uid = uid.trim_end_matches('\0');
        let ts = TransferSyntaxRegistry
            .get(uid)
            .context(UnsupportedTransferSyntaxSnafu { uid })?;
        ensure!(
            !ts.is_unsupported(),
            UnsupportedTransferSyntaxSnafu { uid }
        );
        Ok(ts)
    }
}

impl Codec for RegistryCodec {
    fn decode(&self, transfer_syntax_uid: &str, bytes: &[u8]) -> Result<Dataset> {
        let ts = Self::lookup(transfer_syntax_uid)?;
        Dataset::read_dataset_with_ts(bytes, ts).context(DecodeSnafu)
    }

    fn encode(&self, transfer_syntax_uid: &str, dataset: &Dataset) -> Result<Vec<u8>> {
        let ts = Self::lookup(transfer_syntax_uid)?;
        let mut out = Vec::with_capacity(1024);
        dataset
            .write_dataset_with_ts(&mut out, ts)
            .context(EncodeSnafu)?;
        Ok(out)
    }
}

/// Decode a command set.
pub fn decode_command(bytes: &[u8]) -> Result<Dataset> {
    let ts = entries::IMPLICIT_VR_LITTLE_ENDIAN.erased();
    Dataset::read_dataset_with_ts(bytes, &ts).context(DecodeSnafu)
}

/// Encode a command set.
pub fn encode_command(command: &Dataset) -> Result<Vec<u8>> {
    let ts = entries::IMPLICIT_VR_LITTLE_ENDIAN.erased();
    let mut out = Vec::with_capacity(128);
    command
        .write_dataset_with_ts(&mut out, &ts)
        .context(EncodeSnafu)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{Codec, Error, RegistryCodec};
    use crate::dataset::{Dataset, DatasetExt};
    use dicom_core::VR;
    use dicom_dictionary_std::tags;
    use matches::assert_matches;

    #[test]
    fn encodes_with_negotiated_transfer_syntax() {
        let mut obj = Dataset::new_empty();
        obj.put_text(tags::QUERY_RETRIEVE_LEVEL, VR::CS, "SERIES");
        obj.put_text(tags::MODALITY, VR::CS, "MG");

        let codec = RegistryCodec;
        let explicit = codec.encode("1.2.840.10008.1.2.1", &obj).unwrap();
        let implicit = codec.encode("1.2.840.10008.1.2\0", &obj).unwrap();
        // explicit VR carries the VR code after each tag
        assert_eq!(&explicit[4..6], b"CS");
        assert_ne!(explicit, implicit);

        let back = codec.decode("1.2.840.10008.1.2", &implicit).unwrap();
        assert_eq!(back.text(tags::MODALITY).as_deref(), Some("MG"));
        assert_eq!(back.text(tags::QUERY_RETRIEVE_LEVEL).as_deref(), Some("SERIES"));
    }

    #[test]
    fn unknown_transfer_syntax_is_refused() {
        let codec = RegistryCodec;
        assert_matches!(
            codec.encode("1.2.3.4.5", &Dataset::new_empty()),
            Err(Error::UnsupportedTransferSyntax { .. })
        );
        assert_matches!(
            codec.decode("1.2.3.4.5", &[]),
            Err(Error::UnsupportedTransferSyntax { .. })
        );
    }
}
