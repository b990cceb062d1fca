//! DIMSE command sets.
//!
//! Request command sets are built with the `*_rq` functions,
//! and incoming command sets are interpreted with [`Command::parse`].
use dicom_core::{dicom_value, DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags;
use snafu::{Backtrace, OptionExt, Snafu};

use crate::{
    dataset::{Dataset, DatasetExt},
    status::Status,
};

/// Value of _Command Data Set Type_ when no data set follows.
pub const NO_DATA_SET: u16 = 0x0101;

/// Value of _Command Data Set Type_ used in requests carrying a data set.
const DATA_SET_PRESENT: u16 = 0x0000;

/// Medium priority.
const PRIORITY_MEDIUM: u16 = 0x0000;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("command set is missing attribute {}", name))]
    MissingCommandAttribute {
        name: &'static str,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The _Command Field_ of the DIMSE messages known to this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandField {
    CStoreRq,
    CStoreRsp,
    CGetRq,
    CGetRsp,
    CFindRq,
    CFindRsp,
    CCancelRq,
    /// Any other command, by its code.
    Other(u16),
}

impl CommandField {
    pub fn code(self) -> u16 {
        match self {
            CommandField::CStoreRq => 0x0001,
            CommandField::CStoreRsp => 0x8001,
            CommandField::CGetRq => 0x0010,
            CommandField::CGetRsp => 0x8010,
            CommandField::CFindRq => 0x0020,
            CommandField::CFindRsp => 0x8020,
            CommandField::CCancelRq => 0x0FFF,
            CommandField::Other(code) => code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            0x0001 => CommandField::CStoreRq,
            0x8001 => CommandField::CStoreRsp,
            0x0010 => CommandField::CGetRq,
            0x8010 => CommandField::CGetRsp,
            0x0020 => CommandField::CFindRq,
            0x8020 => CommandField::CFindRsp,
            0x0FFF => CommandField::CCancelRq,
            code => CommandField::Other(code),
        }
    }

    /// The conventional name of the message, such as `C-FIND-RQ`.
    pub fn name(self) -> &'static str {
        match self {
            CommandField::CStoreRq => "C-STORE-RQ",
            CommandField::CStoreRsp => "C-STORE-RSP",
            CommandField::CGetRq => "C-GET-RQ",
            CommandField::CGetRsp => "C-GET-RSP",
            CommandField::CFindRq => "C-FIND-RQ",
            CommandField::CFindRsp => "C-FIND-RSP",
            CommandField::CCancelRq => "C-CANCEL-RQ",
            CommandField::Other(_) => "unknown command",
        }
    }
}

/// Sub-operation counters of a C-GET response.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubOperations {
    pub remaining: Option<u16>,
    pub completed: Option<u16>,
    pub failed: Option<u16>,
    pub warning: Option<u16>,
}

impl SubOperations {
    fn from_command(obj: &Dataset) -> Self {
        SubOperations {
            remaining: obj.uint16(tags::NUMBER_OF_REMAINING_SUBOPERATIONS),
            completed: obj.uint16(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS),
            failed: obj.uint16(tags::NUMBER_OF_FAILED_SUBOPERATIONS),
            warning: obj.uint16(tags::NUMBER_OF_WARNING_SUBOPERATIONS),
        }
    }

    /// Whether any sub-operation is reported as failed.
    pub fn has_failures(&self) -> bool {
        self.failed.unwrap_or(0) > 0
    }
}

/// The interpreted contents of a command set.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub field: CommandField,
    pub message_id: Option<u16>,
    pub message_id_being_responded_to: Option<u16>,
    pub affected_sop_class_uid: Option<String>,
    pub affected_sop_instance_uid: Option<String>,
    pub status: Option<Status>,
    /// whether a data set follows this command
    pub has_dataset: bool,
    pub sub_operations: SubOperations,
    pub error_comment: Option<String>,
}

impl Command {
    /// Interpret a decoded command set.
    ///
    /// Only _Command Field_ and _Command Data Set Type_ are mandatory.
    pub fn parse(obj: &Dataset) -> Result<Self> {
        let field = obj
            .uint16(tags::COMMAND_FIELD)
            .context(MissingCommandAttributeSnafu {
                name: "CommandField",
            })?;
        let data_set_type =
            obj.uint16(tags::COMMAND_DATA_SET_TYPE)
                .context(MissingCommandAttributeSnafu {
                    name: "CommandDataSetType",
                })?;

        Ok(Command {
            field: CommandField::from_code(field),
            message_id: obj.uint16(tags::MESSAGE_ID),
            message_id_being_responded_to: obj.uint16(tags::MESSAGE_ID_BEING_RESPONDED_TO),
            affected_sop_class_uid: obj.text(tags::AFFECTED_SOP_CLASS_UID),
            affected_sop_instance_uid: obj.text(tags::AFFECTED_SOP_INSTANCE_UID),
            status: obj.uint16(tags::STATUS).map(Status),
            has_dataset: data_set_type != NO_DATA_SET,
            sub_operations: SubOperations::from_command(obj),
            error_comment: obj.text(tags::ERROR_COMMENT),
        })
    }
}

/// Build a C-FIND-RQ command set.
pub fn find_rq(sop_class_uid: &str, message_id: u16) -> Dataset {
    Dataset::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(sop_class_uid),
        ),
        DataElement::new(
            tags::COMMAND_FIELD,
            VR::US,
            dicom_value!(U16, [CommandField::CFindRq.code()]),
        ),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        DataElement::new(tags::PRIORITY, VR::US, dicom_value!(U16, [PRIORITY_MEDIUM])),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [DATA_SET_PRESENT]),
        ),
    ])
}

/// Build a C-GET-RQ command set.
pub fn get_rq(sop_class_uid: &str, message_id: u16) -> Dataset {
    Dataset::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(sop_class_uid),
        ),
        DataElement::new(
            tags::COMMAND_FIELD,
            VR::US,
            dicom_value!(U16, [CommandField::CGetRq.code()]),
        ),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        DataElement::new(tags::PRIORITY, VR::US, dicom_value!(U16, [PRIORITY_MEDIUM])),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [DATA_SET_PRESENT]),
        ),
    ])
}

/// Build a C-STORE-RQ command set.
pub fn store_rq(sop_class_uid: &str, sop_instance_uid: &str, message_id: u16) -> Dataset {
    Dataset::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            dicom_value!(Str, sop_class_uid),
        ),
        DataElement::new(
            tags::COMMAND_FIELD,
            VR::US,
            dicom_value!(U16, [CommandField::CStoreRq.code()]),
        ),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        DataElement::new(tags::PRIORITY, VR::US, dicom_value!(U16, [PRIORITY_MEDIUM])),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [DATA_SET_PRESENT]),
        ),
        DataElement::new(
            tags::AFFECTED_SOP_INSTANCE_UID,
            VR::UI,
            dicom_value!(Str, sop_instance_uid),
        ),
    ])
}

/// Build the C-STORE-RSP command set acknowledging a C-STORE-RQ.
pub fn store_rsp(
    message_id: u16,
    sop_class_uid: &str,
    sop_instance_uid: &str,
    status: Status,
) -> Dataset {
    Dataset::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            dicom_value!(Str, sop_class_uid),
        ),
        DataElement::new(
            tags::COMMAND_FIELD,
            VR::US,
            dicom_value!(U16, [CommandField::CStoreRsp.code()]),
        ),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            dicom_value!(U16, [message_id]),
        ),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [NO_DATA_SET]),
        ),
        DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status.code()])),
        DataElement::new(
            tags::AFFECTED_SOP_INSTANCE_UID,
            VR::UI,
            dicom_value!(Str, sop_instance_uid),
        ),
    ])
}

/// Build a C-CANCEL-RQ command set for the operation with the given message ID.
pub fn cancel_rq(message_id_being_responded_to: u16) -> Dataset {
    Dataset::command_from_element_iter([
        DataElement::new(
            tags::COMMAND_FIELD,
            VR::US,
            dicom_value!(U16, [CommandField::CCancelRq.code()]),
        ),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            dicom_value!(U16, [message_id_being_responded_to]),
        ),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [NO_DATA_SET]),
        ),
    ])
}
