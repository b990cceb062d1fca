//! Query a DICOM node for a series, retrieve it,
//! transform each of its instances
//! and store the result back as a new series.
//!
//! The [`Workflow`] drives the whole exchange
//! with the configuration in [`WorkflowConfig`].
//! The transformation is any [`Transform`],
//! [`Rotate90`] being the one used by the command line tool.

pub mod config;
pub mod transform;
pub mod uid;
pub mod workflow;

pub use config::WorkflowConfig;
pub use transform::{Direction, Rotate90, Transform};
pub use workflow::{Error, Outcome, Result, SeriesRef, Workflow};
