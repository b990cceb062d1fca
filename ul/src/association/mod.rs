//! DICOM association module
//!
//! This module contains utilities for establishing associations
//! with other DICOM nodes via TCP/IP,
//! this application entity always being the association requester.
//!
//! A new association is started
//! via the [`ClientAssociationOptions`][1] type.
//! The minimum required properties are the proposed abstract syntaxes
//! and the TCP socket address to the target node.
//!
//! Every association goes through the lifecycle described by [`State`].
//! Observable transitions are reported to an [`EventSink`].
//!
//! [1]: crate::association::client::ClientAssociationOptions
use std::fmt;

pub mod client;
pub mod event;
pub mod pdata;

mod uid;

pub use client::{AbortHandle, ClientAssociation, ClientAssociationOptions, Error};
pub use event::{Event, EventSink, RecordingSink, TracingSink};
pub use pdata::{PDataReassembler, PDataWriter, Pdv};

/// The lifecycle state of an association.
///
/// ```text
/// Idle -> Requesting -> Negotiating -> Established -> Releasing -> Closed
///              |                            |              |
///              +-> Closed (rejected)        +--------------+--> Aborted
/// ```
///
/// `Aborted` is reachable from every state other than `Idle`.
/// DIMSE traffic only flows in the `Established` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Not connected yet.
    Idle,
    /// Connected, association request sent, waiting for the answer.
    Requesting,
    /// Association accepted, presentation contexts being evaluated.
    Negotiating,
    /// Ready for DIMSE message exchange.
    Established,
    /// Release requested, waiting for confirmation.
    Releasing,
    /// Released or rejected.
    Closed,
    /// Aborted by either side, or by a transport failure.
    Aborted,
}

impl State {
    /// Whether the association has reached a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Closed | State::Aborted)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Idle => "idle",
            State::Requesting => "requesting",
            State::Negotiating => "negotiating",
            State::Established => "established",
            State::Releasing => "releasing",
            State::Closed => "closed",
            State::Aborted => "aborted",
        };
        f.write_str(name)
    }
}
