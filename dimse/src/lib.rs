//! DIMSE services on top of the DICOM upper layer,
//! from the side of the association requester.
//!
//! - [`dataset`] and [`codec`] deal with data sets
//!   and their encoding for a given transfer syntax;
//! - [`command`] builds and interprets DIMSE command sets;
//! - [`status`] classifies response status codes;
//! - [`DimseScu`] drives C-FIND, C-GET and C-STORE
//!   over an established [`ClientAssociation`](irym_ul::ClientAssociation).
//!
//! # Example
//!
//! ```no_run
//! # use irym_dimse::{DimseScu, Dataset, DatasetExt};
//! # use irym_ul::ClientAssociationOptions;
//! # use dicom_core::VR;
//! # use dicom_dictionary_std::{tags, uids};
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let association = ClientAssociationOptions::new()
//!     .with_abstract_syntax(uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND)
//!     .establish("127.0.0.1:4242")?;
//! let mut scu = DimseScu::new(association);
//!
//! let mut query = Dataset::new_empty();
//! query.put_text(tags::QUERY_RETRIEVE_LEVEL, VR::CS, "STUDY");
//! query.put_text(tags::STUDY_INSTANCE_UID, VR::UI, "");
//! for response in scu.find(uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND, &query)? {
//!     let response = response?;
//!     if let Some(identifier) = response.identifier {
//!         println!("{:?}", identifier.text(tags::STUDY_INSTANCE_UID));
//!     }
//! }
//! scu.release()?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod command;
pub mod dataset;
pub mod find;
pub mod get;
pub mod scu;
pub mod status;
pub mod store;

mod error;

pub use codec::{Codec, RegistryCodec};
pub use dataset::{Dataset, DatasetExt};
pub use error::{Error, ErrorKind, Result};
pub use find::{FindResponse, FindResponses};
pub use get::{GetResponse, GetResponses, GetSummary, StoreHandler};
pub use scu::{DimseScu, Message};
pub use status::{Status, StatusKind};
