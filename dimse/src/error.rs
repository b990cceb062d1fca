use irym_ul::association::client::Error as AssociationError;
use snafu::{Backtrace, Snafu};

use crate::{codec, command, command::CommandField};

/// An error from a DIMSE service exchange.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// association failure
    Association {
        #[snafu(backtrace)]
        source: AssociationError,
    },

    /// could not encode or decode a data set
    Codec {
        #[snafu(backtrace)]
        source: codec::Error,
    },

    /// invalid command set
    InvalidCommand {
        #[snafu(backtrace)]
        source: command::Error,
    },

    #[snafu(display("no presentation context accepted for abstract syntax {}", abstract_syntax))]
    NoPresentationContext {
        abstract_syntax: String,
        backtrace: Backtrace,
    },

    #[snafu(display("unknown presentation context {}", id))]
    UnknownPresentationContext { id: u8, backtrace: Backtrace },

    #[snafu(display("expected {}, got {}", expected.name(), got.name()))]
    UnexpectedCommand {
        expected: CommandField,
        got: CommandField,
        backtrace: Backtrace,
    },

    #[snafu(display("response to message {:?}, expected {}", got, expected))]
    MessageIdMismatch {
        expected: u16,
        got: Option<u16>,
        backtrace: Backtrace,
    },

    /// a data set was received in place of a command set
    UnexpectedDataSet { backtrace: Backtrace },

    /// a command was received where its data set was expected
    MissingDataSet { backtrace: Backtrace },

    #[snafu(display("response is missing its status"))]
    MissingStatus { backtrace: Backtrace },

    #[snafu(display("unknown status code {:04X}H", code))]
    UnknownStatus { code: u16, backtrace: Backtrace },

    #[snafu(display("data set is missing attribute {}", name))]
    MissingAttribute {
        name: &'static str,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The category of a DIMSE error,
/// for callers which only need to tell failures apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The peer sent an invalid PDU.
    MalformedPdu,
    /// The transport closed in the middle of a message.
    TruncatedMessage,
    /// The association was rejected by the peer.
    AssociationRejected,
    /// The association is not in a state to exchange messages.
    AssociationNotReady,
    /// Any other association failure, including aborts and transport errors.
    AssociationError,
    /// The transfer syntax of a data set cannot be handled,
    /// or no presentation context was negotiated for it.
    UnsupportedTransferSyntax,
    /// A response carried a status outside the known ranges.
    UnknownStatus,
    /// The peer sent a DIMSE message which does not fit the exchange.
    Protocol,
    /// A data set lacks an attribute required for the operation.
    InvalidDataSet,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Association { source } => match source {
                e if e.is_malformed() => ErrorKind::MalformedPdu,
                AssociationError::TruncatedMessage { .. } => ErrorKind::TruncatedMessage,
                AssociationError::Rejected { .. } => ErrorKind::AssociationRejected,
                AssociationError::NotReady { .. } => ErrorKind::AssociationNotReady,
                _ => ErrorKind::AssociationError,
            },
            Error::Codec {
                source: codec::Error::UnsupportedTransferSyntax { .. },
            }
            | Error::NoPresentationContext { .. }
            | Error::UnknownPresentationContext { .. } => ErrorKind::UnsupportedTransferSyntax,
            Error::Codec {
                source: codec::Error::Encode { .. },
            }
            | Error::MissingAttribute { .. } => ErrorKind::InvalidDataSet,
            Error::Codec { .. } => ErrorKind::Protocol,
            Error::UnknownStatus { .. } => ErrorKind::UnknownStatus,
            Error::InvalidCommand { .. }
            | Error::UnexpectedCommand { .. }
            | Error::MessageIdMismatch { .. }
            | Error::UnexpectedDataSet { .. }
            | Error::MissingDataSet { .. }
            | Error::MissingStatus { .. } => ErrorKind::Protocol,
        }
    }
}
