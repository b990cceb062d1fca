//! This crate contains the types and methods needed to interact
//! with DICOM nodes through the upper layer protocol,
//! from the side of the association requester.
//!
//! - The [`pdu`] module
//!   provides data structures representing _protocol data units_,
//!   which are passed around as part of the DICOM network communication support,
//!   along with their readers and writers.
//! - The [`association`] module
//!   comprises the association lifecycle,
//!   the negotiation of presentation contexts,
//!   and the fragmentation of messages into P-Data PDUs,
//!   via the upper layer protocol by TCP.

pub mod association;
pub mod pdu;

/// The implementation class UID sent in association requests.
///
/// Generated as a UUID-derived UID, as per the standard, part 5, section B.2.
pub const IMPLEMENTATION_CLASS_UID: &str = "2.25.227104961783120874415382920581339284215";

/// The implementation version name sent in association requests.
pub const IMPLEMENTATION_VERSION_NAME: &str = "IRYM 0.1.0";

// re-exports

pub use association::client::{ClientAssociation, ClientAssociationOptions};
pub use association::State;
pub use pdu::read_pdu;
pub use pdu::write_pdu;
pub use pdu::Pdu;
