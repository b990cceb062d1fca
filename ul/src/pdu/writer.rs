//! PDU writer module
use crate::pdu::*;
use byteordered::byteorder::{BigEndian, WriteBytesExt};
use dicom_encoding::text::{DefaultCharacterSetCodec, TextCodec};
use snafu::{Backtrace, OptionExt, ResultExt, Snafu};
use std::io::Write;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Could not write chunk of {} PDU structure", name))]
    WriteChunk {
        /// the name of the PDU structure
        name: &'static str,
        source: WriteChunkError,
    },

    #[snafu(display("Could not write field `{}`", field))]
    WriteField {
        field: &'static str,
        backtrace: Backtrace,
        source: std::io::Error,
    },

    #[snafu(display("Could not write {} reserved bytes", bytes))]
    WriteReserved {
        bytes: u32,
        backtrace: Backtrace,
        source: std::io::Error,
    },

    #[snafu(display("Could not encode field `{}`", field))]
    EncodeField {
        field: &'static str,
        #[snafu(backtrace)]
        source: dicom_encoding::text::EncodeTextError,
    },

    #[snafu(display("Could not write PDU to the transport"))]
    WritePdu {
        backtrace: Backtrace,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
pub enum WriteChunkError {
    #[snafu(display("Failed to build chunk"))]
    BuildChunk {
        backtrace: Backtrace,
        source: Box<Error>,
    },
    #[snafu(display("Chunk of {} bytes does not fit its length field", length))]
    ChunkTooLong { length: usize, backtrace: Backtrace },
    #[snafu(display("Failed to write chunk length"))]
    WriteLength {
        backtrace: Backtrace,
        source: std::io::Error,
    },
    #[snafu(display("Failed to write chunk data"))]
    WriteData {
        backtrace: Backtrace,
        source: std::io::Error,
    },
}

/// Write the bytes produced by `func`, preceded by their length as a 32-bit integer.
fn write_chunk_u32<F>(writer: &mut dyn Write, func: F) -> std::result::Result<(), WriteChunkError>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data).map_err(Box::from).context(BuildChunkSnafu)?;

    let length = u32::try_from(data.len())
        .ok()
        .context(ChunkTooLongSnafu { length: data.len() })?;
    writer
        .write_u32::<BigEndian>(length)
        .context(WriteLengthSnafu)?;
    writer.write_all(&data).context(WriteDataSnafu)?;

    Ok(())
}

/// Write the bytes produced by `func`, preceded by their length as a 16-bit integer.
fn write_chunk_u16<F>(writer: &mut dyn Write, func: F) -> std::result::Result<(), WriteChunkError>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data).map_err(Box::from).context(BuildChunkSnafu)?;

    let length = u16::try_from(data.len())
        .ok()
        .context(ChunkTooLongSnafu { length: data.len() })?;
    writer
        .write_u16::<BigEndian>(length)
        .context(WriteLengthSnafu)?;
    writer.write_all(&data).context(WriteDataSnafu)?;

    Ok(())
}

/// Write a PDU to the given byte sink as a single buffer.
pub fn write_pdu<W>(writer: &mut W, pdu: &Pdu) -> Result<()>
where
    W: Write,
{
    let bytes = encode_pdu(pdu)?;
    writer.write_all(&bytes).context(WritePduSnafu)?;
    Ok(())
}

/// Encode a PDU in full, header included.
pub fn encode_pdu(pdu: &Pdu) -> Result<Vec<u8>> {
    let codec = DefaultCharacterSetCodec;
    let mut out = Vec::new();
    let writer: &mut dyn Write = &mut out;

    match pdu {
        Pdu::AssociationRQ(AssociationRQ {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        }) => {
            write_pdu_type(writer, 0x01)?;
            write_chunk_u32(writer, |writer| {
                write_association_header(
                    writer,
                    &codec,
                    *protocol_version,
                    called_ae_title,
                    calling_ae_title,
                )?;
                write_pdu_variable_application_context_name(
                    writer,
                    application_context_name,
                    &codec,
                )?;
                for presentation_context in presentation_contexts {
                    write_pdu_variable_presentation_context_proposed(
                        writer,
                        presentation_context,
                        &codec,
                    )?;
                }
                write_pdu_variable_user_variables(writer, user_variables, &codec)?;
                Ok(())
            })
            .context(WriteChunkSnafu {
                name: "A-ASSOCIATE-RQ",
            })?;
        }
        Pdu::AssociationAC(AssociationAC {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        }) => {
            write_pdu_type(writer, 0x02)?;
            write_chunk_u32(writer, |writer| {
                // the AE title fields echo those of the A-ASSOCIATE-RQ
                write_association_header(
                    writer,
                    &codec,
                    *protocol_version,
                    called_ae_title,
                    calling_ae_title,
                )?;
                write_pdu_variable_application_context_name(
                    writer,
                    application_context_name,
                    &codec,
                )?;
                for presentation_context in presentation_contexts {
                    write_pdu_variable_presentation_context_result(
                        writer,
                        presentation_context,
                        &codec,
                    )?;
                }
                write_pdu_variable_user_variables(writer, user_variables, &codec)?;
                Ok(())
            })
            .context(WriteChunkSnafu {
                name: "A-ASSOCIATE-AC",
            })?;
        }
        Pdu::AssociationRJ(AssociationRJ { result, source }) => {
            write_pdu_type(writer, 0x03)?;
            let (source, reason) = source.codes();
            write_chunk_u32(writer, |writer| {
                writer
                    .write_u8(0x00)
                    .context(WriteReservedSnafu { bytes: 1_u32 })?;
                writer
                    .write_u8(*result as u8)
                    .context(WriteFieldSnafu { field: "Result" })?;
                writer
                    .write_u8(source)
                    .context(WriteFieldSnafu { field: "Source" })?;
                writer.write_u8(reason).context(WriteFieldSnafu {
                    field: "Reason/Diag.",
                })?;
                Ok(())
            })
            .context(WriteChunkSnafu {
                name: "A-ASSOCIATE-RJ",
            })?;
        }
        Pdu::PData { data } => {
            write_pdu_type(writer, 0x04)?;
            write_chunk_u32(writer, |writer| {
                for presentation_data_value in data {
                    write_chunk_u32(writer, |writer| {
                        writer
                            .write_u8(presentation_data_value.presentation_context_id)
                            .context(WriteFieldSnafu {
                                field: "Presentation-context-ID",
                            })?;
                        writer
                            .write_u8(presentation_data_value.control_header())
                            .context(WriteFieldSnafu {
                                field: "Message Control Header",
                            })?;
                        writer
                            .write_all(&presentation_data_value.data)
                            .context(WriteFieldSnafu {
                                field: "Presentation-data-value",
                            })?;
                        Ok(())
                    })
                    .context(WriteChunkSnafu {
                        name: "Presentation-data-value item",
                    })?;
                }
                Ok(())
            })
            .context(WriteChunkSnafu { name: "P-DATA-TF" })?;
        }
        Pdu::ReleaseRQ | Pdu::ReleaseRP => {
            let pdu_type = if matches!(pdu, Pdu::ReleaseRQ) {
                0x05
            } else {
                0x06
            };
            write_pdu_type(writer, pdu_type)?;
            write_chunk_u32(writer, |writer| {
                writer
                    .write_u32::<BigEndian>(0x0000_0000)
                    .context(WriteReservedSnafu { bytes: 4_u32 })?;
                Ok(())
            })
            .context(WriteChunkSnafu { name: "A-RELEASE" })?;
        }
        Pdu::AbortRQ { source } => {
            write_pdu_type(writer, 0x07)?;
            let (source, reason) = source.codes();
            write_chunk_u32(writer, |writer| {
                writer
                    .write_u16::<BigEndian>(0x0000)
                    .context(WriteReservedSnafu { bytes: 2_u32 })?;
                writer
                    .write_u8(source)
                    .context(WriteFieldSnafu { field: "Source" })?;
                writer.write_u8(reason).context(WriteFieldSnafu {
                    field: "Reason/Diag",
                })?;
                Ok(())
            })
            .context(WriteChunkSnafu { name: "A-ABORT" })?;
        }
        Pdu::Unknown { pdu_type, data } => {
            write_pdu_type(writer, *pdu_type)?;
            write_chunk_u32(writer, |writer| {
                writer
                    .write_all(data)
                    .context(WriteFieldSnafu { field: "Unknown" })?;
                Ok(())
            })
            .context(WriteChunkSnafu { name: "Unknown" })?;
        }
    }

    Ok(out)
}

/// Write the PDU type followed by its reserved byte.
fn write_pdu_type(writer: &mut dyn Write, pdu_type: u8) -> Result<()> {
    writer
        .write_u8(pdu_type)
        .context(WriteFieldSnafu { field: "PDU-type" })?;
    writer
        .write_u8(0x00)
        .context(WriteReservedSnafu { bytes: 1_u32 })
}

/// Write the fixed part of an A-ASSOCIATE-RQ or A-ASSOCIATE-AC.
fn write_association_header(
    writer: &mut dyn Write,
    codec: &dyn TextCodec,
    protocol_version: u16,
    called_ae_title: &str,
    calling_ae_title: &str,
) -> Result<()> {
    writer
        .write_u16::<BigEndian>(protocol_version)
        .context(WriteFieldSnafu {
            field: "Protocol-version",
        })?;
    writer
        .write_u16::<BigEndian>(0x00)
        .context(WriteReservedSnafu { bytes: 2_u32 })?;

    write_ae_title(writer, codec, called_ae_title, "Called-AE-title")?;
    write_ae_title(writer, codec, calling_ae_title, "Calling-AE-title")?;

    writer
        .write_all(&[0; 32])
        .context(WriteReservedSnafu { bytes: 32_u32 })
}

/// AE titles are always 16 bytes, padded with trailing spaces.
fn write_ae_title(
    writer: &mut dyn Write,
    codec: &dyn TextCodec,
    ae_title: &str,
    field: &'static str,
) -> Result<()> {
    let mut ae_title_bytes = codec.encode(ae_title).context(EncodeFieldSnafu { field })?;
    ae_title_bytes.resize(16, b' ');
    writer
        .write_all(&ae_title_bytes)
        .context(WriteFieldSnafu { field })
}

/// Write a variable item or sub-item header (type and reserved byte),
/// followed by the 16-bit length and the content produced by `func`.
fn write_item<F>(writer: &mut dyn Write, item_type: u8, name: &'static str, func: F) -> Result<()>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    writer
        .write_u8(item_type)
        .context(WriteFieldSnafu { field: "Item-type" })?;
    writer
        .write_u8(0x00)
        .context(WriteReservedSnafu { bytes: 1_u32 })?;
    write_chunk_u16(writer, func).context(WriteChunkSnafu { name })
}

fn write_text_item(
    writer: &mut dyn Write,
    item_type: u8,
    text: &str,
    field: &'static str,
    codec: &dyn TextCodec,
) -> Result<()> {
    write_item(writer, item_type, field, |writer| {
        let bytes = codec.encode(text).context(EncodeFieldSnafu { field })?;
        writer.write_all(&bytes).context(WriteFieldSnafu { field })
    })
}

fn write_pdu_variable_application_context_name(
    writer: &mut dyn Write,
    application_context_name: &str,
    codec: &dyn TextCodec,
) -> Result<()> {
    write_text_item(
        writer,
        0x10,
        application_context_name,
        "Application-context-name",
        codec,
    )
}

fn write_pdu_variable_presentation_context_proposed(
    writer: &mut dyn Write,
    presentation_context: &PresentationContextProposed,
    codec: &dyn TextCodec,
) -> Result<()> {
    write_item(writer, 0x20, "Presentation Context Item", |writer| {
        writer
            .write_u8(presentation_context.id)
            .context(WriteFieldSnafu {
                field: "Presentation-context-ID",
            })?;
        writer
            .write_all(&[0; 3])
            .context(WriteReservedSnafu { bytes: 3_u32 })?;

        write_text_item(
            writer,
            0x30,
            &presentation_context.abstract_syntax,
            "Abstract-syntax-name",
            codec,
        )?;
        for transfer_syntax in &presentation_context.transfer_syntaxes {
            write_text_item(
                writer,
                0x40,
                transfer_syntax,
                "Transfer-syntax-name",
                codec,
            )?;
        }
        Ok(())
    })
}

fn write_pdu_variable_presentation_context_result(
    writer: &mut dyn Write,
    presentation_context: &PresentationContextResult,
    codec: &dyn TextCodec,
) -> Result<()> {
    write_item(writer, 0x21, "Presentation Context Item", |writer| {
        writer
            .write_u8(presentation_context.id)
            .context(WriteFieldSnafu {
                field: "Presentation-context-ID",
            })?;
        writer
            .write_u8(0x00)
            .context(WriteReservedSnafu { bytes: 1_u32 })?;
        writer
            .write_u8(presentation_context.reason as u8)
            .context(WriteFieldSnafu {
                field: "Result/Reason",
            })?;
        writer
            .write_u8(0x00)
            .context(WriteReservedSnafu { bytes: 1_u32 })?;

        write_text_item(
            writer,
            0x40,
            &presentation_context.transfer_syntax,
            "Transfer-syntax-name",
            codec,
        )
    })
}

fn write_pdu_variable_user_variables(
    writer: &mut dyn Write,
    user_variables: &[UserVariableItem],
    codec: &dyn TextCodec,
) -> Result<()> {
    if user_variables.is_empty() {
        return Ok(());
    }

    write_item(writer, 0x50, "User-data", |writer| {
        for user_variable in user_variables {
            match user_variable {
                UserVariableItem::MaxLength(max_length) => {
                    write_item(writer, 0x51, "Maximum-length", |writer| {
                        writer
                            .write_u32::<BigEndian>(*max_length)
                            .context(WriteFieldSnafu {
                                field: "Maximum-length-received",
                            })
                    })?;
                }
                UserVariableItem::ImplementationClassUID(uid) => {
                    write_text_item(writer, 0x52, uid, "Implementation-class-uid", codec)?;
                }
                UserVariableItem::RoleSelection(role) => {
                    write_item(writer, 0x54, "SCP/SCU Role Selection", |writer| {
                        write_chunk_u16(writer, |writer| {
                            let bytes = codec
                                .encode(&role.sop_class_uid)
                                .context(EncodeFieldSnafu {
                                    field: "SOP-class-uid",
                                })?;
                            writer.write_all(&bytes).context(WriteFieldSnafu {
                                field: "SOP-class-uid",
                            })
                        })
                        .context(WriteChunkSnafu {
                            name: "SOP-class-uid",
                        })?;
                        writer
                            .write_u8(role.scu_role as u8)
                            .context(WriteFieldSnafu { field: "SCU-role" })?;
                        writer
                            .write_u8(role.scp_role as u8)
                            .context(WriteFieldSnafu { field: "SCP-role" })
                    })?;
                }
                UserVariableItem::ImplementationVersionName(name) => {
                    write_text_item(writer, 0x55, name, "Implementation-version-name", codec)?;
                }
                UserVariableItem::Unknown(item_type, data) => {
                    write_item(writer, *item_type, "Unknown", |writer| {
                        writer
                            .write_all(data)
                            .context(WriteFieldSnafu { field: "Unknown" })
                    })?;
                }
            }
        }
        Ok(())
    })
}
