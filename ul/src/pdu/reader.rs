//! PDU reader module
use crate::pdu::*;
use byteordered::byteorder::{BigEndian, ReadBytesExt};
use dicom_encoding::text::{DefaultCharacterSetCodec, TextCodec};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};
use std::io::{Cursor, ErrorKind, Read};
use tracing::warn;

/// The default maximum PDU size
pub const DEFAULT_MAX_PDU: u32 = 16_384;

/// The minimum PDU size,
/// as specified by the standard
pub const MINIMUM_PDU_SIZE: u32 = 4_096;

/// The maximum PDU size,
/// as specified by the standard
pub const MAXIMUM_PDU_SIZE: u32 = 131_072;

/// The length of the PDU header in bytes,
/// comprising the PDU type (1 byte),
/// reserved byte (1 byte),
/// and PDU length (4 bytes).
pub const PDU_HEADER_SIZE: u32 = 6;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Invalid max PDU length {}", max_pdu_length))]
    InvalidMaxPdu {
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("No PDU available"))]
    NoPduAvailable { backtrace: Backtrace },

    #[snafu(display("Could not read PDU from the transport"))]
    ReadPdu {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("PDU header is incomplete ({} bytes available)", available))]
    IncompleteHeader { available: usize, backtrace: Backtrace },

    #[snafu(display(
        "PDU declares a length of {} bytes, but {} bytes are available",
        declared,
        available
    ))]
    LengthMismatch {
        declared: u32,
        available: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read PDU field `{}`", field))]
    ReadPduField {
        field: &'static str,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Item of type {:#04x} declares {} bytes, which overflows its enclosing item",
        item_type,
        length
    ))]
    ItemOverflow {
        item_type: u8,
        length: u32,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid item length {} (must be >=2)", length))]
    InvalidItemLength { length: u32 },

    #[snafu(display(
        "Incoming pdu was too large: length {}, maximum is {}",
        pdu_length,
        max_pdu_length
    ))]
    PduTooLarge {
        pdu_length: u32,
        max_pdu_length: u32,
        backtrace: Backtrace,
    },
    #[snafu(display("PDU contained an invalid value {:?}", var_item))]
    InvalidPduVariable {
        var_item: PduVariableItem,
        backtrace: Backtrace,
    },
    #[snafu(display("Multiple transfer syntaxes were accepted"))]
    MultipleTransferSyntaxesAccepted { backtrace: Backtrace },
    #[snafu(display("Invalid reject source or reason"))]
    InvalidRejectSourceOrReason { backtrace: Backtrace },
    #[snafu(display("Invalid abort service provider"))]
    InvalidAbortSourceOrReason { backtrace: Backtrace },
    #[snafu(display("Invalid presentation context result reason"))]
    InvalidPresentationContextResultReason { backtrace: Backtrace },
    #[snafu(display("invalid transfer syntax sub-item"))]
    InvalidTransferSyntaxSubItem { backtrace: Backtrace },
    #[snafu(display("unknown presentation context sub-item"))]
    UnknownPresentationContextSubItem { backtrace: Backtrace },
    #[snafu(display("Could not decode text field `{}`", field))]
    DecodeText {
        field: &'static str,
        #[snafu(backtrace)]
        source: dicom_encoding::text::DecodeTextError,
    },
    #[snafu(display("Missing application context name"))]
    MissingApplicationContextName { backtrace: Backtrace },
    #[snafu(display("Missing abstract syntax"))]
    MissingAbstractSyntax { backtrace: Backtrace },
    #[snafu(display("Missing transfer syntax"))]
    MissingTransferSyntax { backtrace: Backtrace },
}

impl Error {
    /// Whether this error stems from bytes which do not form a valid PDU,
    /// as opposed to a failure of the transport or of the caller's arguments.
    pub fn is_malformed(&self) -> bool {
        !matches!(
            self,
            Error::InvalidMaxPdu { .. } | Error::NoPduAvailable { .. } | Error::ReadPdu { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Read a single PDU from a byte stream.
///
/// PDUs longer than `max_pdu_length` are refused in strict mode.
/// Otherwise they are accepted with a warning,
/// as long as they do not exceed [`MAXIMUM_PDU_SIZE`].
pub fn read_pdu<R>(reader: &mut R, max_pdu_length: u32, strict: bool) -> Result<Pdu>
where
    R: Read,
{
    ensure!(
        (MINIMUM_PDU_SIZE..=MAXIMUM_PDU_SIZE).contains(&max_pdu_length),
        InvalidMaxPduSnafu { max_pdu_length }
    );

    // A stream closing before the first two bytes means that no PDU
    // was about to arrive, which the caller may wish to tell apart
    // from a stream closing in the middle of one.
    let mut bytes = [0; 2];
    if let Err(e) = reader.read_exact(&mut bytes) {
        ensure!(e.kind() != ErrorKind::UnexpectedEof, NoPduAvailableSnafu);
        return Err(e).context(ReadPduSnafu);
    }

    let pdu_type = bytes[0];
    let pdu_length = reader.read_u32::<BigEndian>().context(ReadPduSnafu)?;

    if strict {
        ensure!(
            pdu_length <= max_pdu_length,
            PduTooLargeSnafu {
                pdu_length,
                max_pdu_length
            }
        );
    } else if pdu_length > max_pdu_length {
        ensure!(
            pdu_length <= MAXIMUM_PDU_SIZE,
            PduTooLargeSnafu {
                pdu_length,
                max_pdu_length: MAXIMUM_PDU_SIZE
            }
        );
        warn!(
            "Incoming pdu was too large: length {}, maximum is {}",
            pdu_length, max_pdu_length
        );
    }

    let mut body = vec![0; pdu_length as usize];
    reader.read_exact(&mut body).context(ReadPduSnafu)?;
    decode_body(pdu_type, body)
}

/// Decode a PDU held entirely in memory.
///
/// The length declared in the PDU header
/// must match the number of bytes which follow it exactly.
pub fn decode_pdu(bytes: &[u8]) -> Result<Pdu> {
    ensure!(
        bytes.len() >= PDU_HEADER_SIZE as usize,
        IncompleteHeaderSnafu {
            available: bytes.len()
        }
    );
    let pdu_type = bytes[0];
    let declared = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
    let body = &bytes[PDU_HEADER_SIZE as usize..];
    ensure!(
        declared as usize == body.len(),
        LengthMismatchSnafu {
            declared,
            available: body.len()
        }
    );
    decode_body(pdu_type, body.to_vec())
}

fn decode_body(pdu_type: u8, body: Vec<u8>) -> Result<Pdu> {
    let mut cursor = Cursor::new(body);
    let codec = DefaultCharacterSetCodec;

    match pdu_type {
        0x01 => {
            // A-ASSOCIATE-RQ
            let header = read_association_header(&mut cursor, &codec)?;
            let mut application_context_name = None;
            let mut presentation_contexts = vec![];
            let mut user_variables = vec![];

            while has_remaining(&cursor) {
                match read_pdu_variable(&mut cursor, &codec)? {
                    PduVariableItem::ApplicationContext(val) => {
                        application_context_name = Some(val);
                    }
                    PduVariableItem::PresentationContextProposed(val) => {
                        presentation_contexts.push(val);
                    }
                    PduVariableItem::UserVariables(val) => {
                        user_variables = val;
                    }
                    var_item => {
                        return InvalidPduVariableSnafu { var_item }.fail();
                    }
                }
            }

            Ok(Pdu::AssociationRQ(AssociationRQ {
                protocol_version: header.protocol_version,
                calling_ae_title: header.calling_ae_title,
                called_ae_title: header.called_ae_title,
                application_context_name: application_context_name
                    .context(MissingApplicationContextNameSnafu)?,
                presentation_contexts,
                user_variables,
            }))
        }
        0x02 => {
            // A-ASSOCIATE-AC
            let header = read_association_header(&mut cursor, &codec)?;
            let mut application_context_name = None;
            let mut presentation_contexts = vec![];
            let mut user_variables = vec![];

            while has_remaining(&cursor) {
                match read_pdu_variable(&mut cursor, &codec)? {
                    PduVariableItem::ApplicationContext(val) => {
                        application_context_name = Some(val);
                    }
                    PduVariableItem::PresentationContextResult(val) => {
                        presentation_contexts.push(val);
                    }
                    PduVariableItem::UserVariables(val) => {
                        user_variables = val;
                    }
                    var_item => {
                        return InvalidPduVariableSnafu { var_item }.fail();
                    }
                }
            }

            Ok(Pdu::AssociationAC(AssociationAC {
                protocol_version: header.protocol_version,
                calling_ae_title: header.calling_ae_title,
                called_ae_title: header.called_ae_title,
                application_context_name: application_context_name
                    .context(MissingApplicationContextNameSnafu)?,
                presentation_contexts,
                user_variables,
            }))
        }
        0x03 => {
            // A-ASSOCIATE-RJ: reserved (1), result (1), source (1), reason/diag. (1)
            let mut fields = [0; 4];
            cursor
                .read_exact(&mut fields)
                .context(ReadPduFieldSnafu {
                    field: "Result/Source/Reason",
                })?;
            let result =
                AssociationRJResult::from(fields[1]).context(InvalidRejectSourceOrReasonSnafu)?;
            let source = AssociationRJSource::from(fields[2], fields[3])
                .context(InvalidRejectSourceOrReasonSnafu)?;

            Ok(Pdu::AssociationRJ(AssociationRJ { result, source }))
        }
        0x04 => {
            // P-DATA-TF: one or more presentation data value items
            let mut values = vec![];
            while has_remaining(&cursor) {
                let item_length = cursor.read_u32::<BigEndian>().context(ReadPduFieldSnafu {
                    field: "Item-Length",
                })?;

                ensure!(
                    item_length >= 2,
                    InvalidItemLengthSnafu {
                        length: item_length
                    }
                );

                let presentation_context_id = cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "Presentation-context-ID",
                })?;

                // message control header:
                // bit 0 set for command fragments, bit 1 set for the last fragment
                let header = cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "Message Control Header",
                })?;
                let value_type = if header & 0x01 > 0 {
                    PDataValueType::Command
                } else {
                    PDataValueType::Data
                };
                let is_last = (header & 0x02) > 0;

                let data = read_item_body(&mut cursor, 0x04, item_length - 2)?;

                values.push(PDataValue {
                    presentation_context_id,
                    value_type,
                    is_last,
                    data,
                })
            }

            Ok(Pdu::PData { data: values })
        }
        0x05 | 0x06 => {
            // A-RELEASE-RQ / A-RELEASE-RP: 4 reserved bytes
            let mut reserved = [0; 4];
            cursor
                .read_exact(&mut reserved)
                .context(ReadPduFieldSnafu { field: "Reserved" })?;

            if pdu_type == 0x05 {
                Ok(Pdu::ReleaseRQ)
            } else {
                Ok(Pdu::ReleaseRP)
            }
        }
        0x07 => {
            // A-ABORT: reserved (2), source (1), reason/diag. (1)
            let mut fields = [0; 4];
            cursor
                .read_exact(&mut fields)
                .context(ReadPduFieldSnafu {
                    field: "Source/Reason",
                })?;
            let source =
                AbortRQSource::from(fields[2], fields[3]).context(InvalidAbortSourceOrReasonSnafu)?;

            Ok(Pdu::AbortRQ { source })
        }
        _ => Ok(Pdu::Unknown {
            pdu_type,
            data: cursor.into_inner(),
        }),
    }
}

struct AssociationHeader {
    protocol_version: u16,
    called_ae_title: String,
    calling_ae_title: String,
}

/// Read the fixed fields shared by A-ASSOCIATE-RQ and A-ASSOCIATE-AC.
fn read_association_header(
    cursor: &mut Cursor<Vec<u8>>,
    codec: &dyn TextCodec,
) -> Result<AssociationHeader> {
    let protocol_version = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Protocol-version",
    })?;

    cursor
        .read_u16::<BigEndian>()
        .context(ReadPduFieldSnafu { field: "Reserved" })?;

    let mut ae_bytes = [0; 16];
    cursor.read_exact(&mut ae_bytes).context(ReadPduFieldSnafu {
        field: "Called-AE-title",
    })?;
    let called_ae_title = decode_text(codec, &ae_bytes, "Called-AE-title")?;

    cursor.read_exact(&mut ae_bytes).context(ReadPduFieldSnafu {
        field: "Calling-AE-title",
    })?;
    let calling_ae_title = decode_text(codec, &ae_bytes, "Calling-AE-title")?;

    let mut reserved = [0; 32];
    cursor
        .read_exact(&mut reserved)
        .context(ReadPduFieldSnafu { field: "Reserved" })?;

    Ok(AssociationHeader {
        protocol_version,
        called_ae_title,
        calling_ae_title,
    })
}

fn has_remaining(cursor: &Cursor<Vec<u8>>) -> bool {
    cursor.position() < cursor.get_ref().len() as u64
}

/// Read exactly `length` bytes of an item's content,
/// failing if the enclosing buffer ends first.
fn read_item_body<R>(reader: &mut R, item_type: u8, length: u32) -> Result<Vec<u8>>
where
    R: Read,
{
    let mut data = Vec::new();
    reader
        .take(u64::from(length))
        .read_to_end(&mut data)
        .context(ReadPduFieldSnafu { field: "Item" })?;
    if data.len() < length as usize {
        return Err(std::io::Error::from(ErrorKind::UnexpectedEof))
            .context(ItemOverflowSnafu { item_type, length });
    }
    Ok(data)
}

/// Read the 4-byte header of a variable item or sub-item:
/// item type, reserved byte, item length.
fn read_item_header<R>(reader: &mut R) -> Result<(u8, u16)>
where
    R: Read,
{
    let item_type = reader
        .read_u8()
        .context(ReadPduFieldSnafu { field: "Item-type" })?;
    reader
        .read_u8()
        .context(ReadPduFieldSnafu { field: "Reserved" })?;
    let item_length = reader.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Item-length",
    })?;
    Ok((item_type, item_length))
}

fn decode_text(codec: &dyn TextCodec, bytes: &[u8], field: &'static str) -> Result<String> {
    let text = codec.decode(bytes).context(DecodeTextSnafu { field })?;
    Ok(text
        .trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_string())
}

fn read_pdu_variable<R>(reader: &mut R, codec: &dyn TextCodec) -> Result<PduVariableItem>
where
    R: Read,
{
    let (item_type, item_length) = read_item_header(reader)?;
    let bytes = read_item_body(reader, item_type, u32::from(item_length))?;
    let mut cursor = Cursor::new(bytes);

    match item_type {
        0x10 => {
            // Application Context Item
            let val = decode_text(codec, cursor.get_ref(), "Application-context-name")?;
            Ok(PduVariableItem::ApplicationContext(val))
        }
        0x20 => {
            // Presentation Context Item (proposed):
            // id (1), reserved (3), then one abstract syntax
            // and one or more transfer syntax sub-items
            let mut fields = [0; 4];
            cursor.read_exact(&mut fields).context(ReadPduFieldSnafu {
                field: "Presentation-context-ID",
            })?;

            let mut abstract_syntax = None;
            let mut transfer_syntaxes = vec![];
            while has_remaining(&cursor) {
                let (sub_type, sub_length) = read_item_header(&mut cursor)?;
                let data = read_item_body(&mut cursor, sub_type, u32::from(sub_length))?;
                match sub_type {
                    0x30 => {
                        abstract_syntax = Some(decode_text(codec, &data, "Abstract-syntax-name")?);
                    }
                    0x40 => {
                        transfer_syntaxes.push(decode_text(codec, &data, "Transfer-syntax-name")?);
                    }
                    _ => {
                        return UnknownPresentationContextSubItemSnafu.fail();
                    }
                }
            }

            Ok(PduVariableItem::PresentationContextProposed(
                PresentationContextProposed {
                    id: fields[0],
                    abstract_syntax: abstract_syntax.context(MissingAbstractSyntaxSnafu)?,
                    transfer_syntaxes,
                },
            ))
        }
        0x21 => {
            // Presentation Context Item (result):
            // id (1), reserved (1), result/reason (1), reserved (1),
            // then a single transfer syntax sub-item
            let mut fields = [0; 4];
            cursor.read_exact(&mut fields).context(ReadPduFieldSnafu {
                field: "Presentation-context-ID",
            })?;
            let reason = PresentationContextResultReason::from(fields[2])
                .context(InvalidPresentationContextResultReasonSnafu)?;

            let mut transfer_syntax = None;
            while has_remaining(&cursor) {
                let (sub_type, sub_length) = read_item_header(&mut cursor)?;
                let data = read_item_body(&mut cursor, sub_type, u32::from(sub_length))?;
                ensure!(sub_type == 0x40, InvalidTransferSyntaxSubItemSnafu);
                ensure!(
                    transfer_syntax.is_none(),
                    MultipleTransferSyntaxesAcceptedSnafu
                );
                transfer_syntax = Some(decode_text(codec, &data, "Transfer-syntax-name")?);
            }

            // the sub-item is not significant on rejection,
            // and some acceptors leave it out
            let transfer_syntax = match (transfer_syntax, reason) {
                (Some(ts), _) => ts,
                (None, PresentationContextResultReason::Acceptance) => {
                    return MissingTransferSyntaxSnafu.fail();
                }
                (None, _) => String::new(),
            };

            Ok(PduVariableItem::PresentationContextResult(
                PresentationContextResult {
                    id: fields[0],
                    reason,
                    transfer_syntax,
                },
            ))
        }
        0x50 => {
            // User Information Item: a sequence of sub-items
            let mut user_variables = vec![];
            while has_remaining(&cursor) {
                let (sub_type, sub_length) = read_item_header(&mut cursor)?;
                let data = read_item_body(&mut cursor, sub_type, u32::from(sub_length))?;
                user_variables.push(read_user_variable(codec, sub_type, data)?);
            }
            Ok(PduVariableItem::UserVariables(user_variables))
        }
        _ => Ok(PduVariableItem::Unknown(item_type)),
    }
}

fn read_user_variable(
    codec: &dyn TextCodec,
    item_type: u8,
    data: Vec<u8>,
) -> Result<UserVariableItem> {
    match item_type {
        0x51 => {
            // Maximum Length Sub-Item
            let mut cursor = Cursor::new(&data);
            let max_length = cursor.read_u32::<BigEndian>().context(ReadPduFieldSnafu {
                field: "Maximum-length-received",
            })?;
            Ok(UserVariableItem::MaxLength(max_length))
        }
        0x52 => Ok(UserVariableItem::ImplementationClassUID(decode_text(
            codec,
            &data,
            "Implementation-class-uid",
        )?)),
        0x54 => {
            // SCP/SCU Role Selection Sub-Item:
            // UID length (2), SOP class UID, SCU role (1), SCP role (1)
            let mut cursor = Cursor::new(&data);
            let uid_length = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                field: "UID-length",
            })?;
            let uid = read_item_body(&mut cursor, item_type, u32::from(uid_length))?;
            let scu_role = cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "SCU-role" })?;
            let scp_role = cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "SCP-role" })?;
            Ok(UserVariableItem::RoleSelection(RoleSelection {
                sop_class_uid: decode_text(codec, &uid, "SOP-class-uid")?,
                scu_role: scu_role != 0,
                scp_role: scp_role != 0,
            }))
        }
        0x55 => Ok(UserVariableItem::ImplementationVersionName(decode_text(
            codec,
            &data,
            "Implementation-version-name",
        )?)),
        _ => Ok(UserVariableItem::Unknown(item_type, data)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;

    #[test]
    fn can_read_release_and_abort() {
        let bytes = [0x05, 0, 0, 0, 0, 4, 0, 0, 0, 0];
        assert_eq!(decode_pdu(&bytes).unwrap(), Pdu::ReleaseRQ);

        let bytes = [0x07, 0, 0, 0, 0, 4, 0, 0, 2, 2];
        assert_eq!(
            decode_pdu(&bytes).unwrap(),
            Pdu::AbortRQ {
                source: AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::UnexpectedPdu)
            }
        );
    }

    #[test]
    fn declared_length_must_match_exactly() {
        // declares 4 bytes, 3 available
        let err = decode_pdu(&[0x06, 0, 0, 0, 0, 4, 0, 0, 0]).unwrap_err();
        assert_matches!(err, Error::LengthMismatch { declared: 4, available: 3, .. });
        assert!(err.is_malformed());

        // declares 4 bytes, 5 available
        let err = decode_pdu(&[0x06, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0]).unwrap_err();
        assert_matches!(err, Error::LengthMismatch { declared: 4, available: 5, .. });

        let err = decode_pdu(&[0x06, 0, 0]).unwrap_err();
        assert_matches!(err, Error::IncompleteHeader { available: 3, .. });
    }

    #[test]
    fn pdv_item_longer_than_pdu_is_malformed() {
        #[rustfmt::skip]
        let bytes = [
            0x04, 0, 0, 0, 0, 10,
            // item length 20, only 6 bytes follow
            0, 0, 0, 20,
            1, 0x03,
            1, 2, 3, 4,
        ];
        let err = decode_pdu(&bytes).unwrap_err();
        assert_matches!(err, Error::ItemOverflow { item_type: 0x04, length: 18, .. });
        assert!(err.is_malformed());
    }

    #[test]
    fn sub_item_longer_than_its_item_is_malformed() {
        #[rustfmt::skip]
        let mut bytes = vec![
            0x01, 0, 0, 0, 0, 0,
            0, 1, 0, 0,
        ];
        bytes.extend_from_slice(b"ANY-SCP         ");
        bytes.extend_from_slice(b"THIS-SCU        ");
        bytes.extend_from_slice(&[0; 32]);
        // presentation context item of 8 bytes,
        // holding an abstract syntax sub-item declaring 16 bytes
        bytes.extend_from_slice(&[0x20, 0, 0, 8, 1, 0, 0, 0, 0x30, 0, 0, 16]);
        let len = (bytes.len() - 6) as u32;
        bytes[2..6].copy_from_slice(&len.to_be_bytes());

        let err = decode_pdu(&bytes).unwrap_err();
        assert_matches!(err, Error::ItemOverflow { item_type: 0x30, length: 16, .. });
    }

    #[test]
    fn stream_closed_before_pdu_is_not_malformed() {
        let mut empty: &[u8] = &[];
        let err = read_pdu(&mut empty, DEFAULT_MAX_PDU, true).unwrap_err();
        assert_matches!(err, Error::NoPduAvailable { .. });
        assert!(!err.is_malformed());

        // stream ends in the middle of the body
        let mut partial: &[u8] = &[0x04, 0, 0, 0, 0, 12, 0, 0];
        let err = read_pdu(&mut partial, DEFAULT_MAX_PDU, true).unwrap_err();
        assert_matches!(err, Error::ReadPdu { .. });
    }

    #[test]
    fn oversized_pdu_in_strict_and_lenient_mode() {
        let mut bytes = vec![0x04, 0, 0, 0, 0, 0];
        let body_len = MINIMUM_PDU_SIZE + 6;
        bytes[2..6].copy_from_slice(&body_len.to_be_bytes());
        bytes.extend_from_slice(&(MINIMUM_PDU_SIZE + 2).to_be_bytes());
        bytes.extend_from_slice(&[1, 0x02]);
        bytes.resize(bytes.len() + MINIMUM_PDU_SIZE as usize, 0xAB);

        let err = read_pdu(&mut bytes.as_slice(), MINIMUM_PDU_SIZE, true).unwrap_err();
        assert_matches!(err, Error::PduTooLarge { .. });

        let pdu = read_pdu(&mut bytes.as_slice(), MINIMUM_PDU_SIZE, false).unwrap();
        assert_matches!(pdu, Pdu::PData { ref data } if data[0].data.len() == MINIMUM_PDU_SIZE as usize);
    }

    #[test]
    fn unknown_pdu_keeps_its_body() {
        let pdu = decode_pdu(&[0x42, 0, 0, 0, 0, 3, 9, 8, 7]).unwrap();
        assert_eq!(
            pdu,
            Pdu::Unknown {
                pdu_type: 0x42,
                data: vec![9, 8, 7]
            }
        );
    }
}
