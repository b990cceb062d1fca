//! The query, retrieve, transform and store workflow.
//!
//! 1. An association is opened for C-FIND,
//!    and the first matching series is taken.
//! 2. After releasing it, a second association is opened
//!    for C-GET and C-STORE.
//!    Each retrieved instance goes through the [`Transform`]
//!    and becomes part of a new series.
//! 3. The derived series is stored back to the same peer,
//!    and the association is released.
use std::sync::Arc;

use dicom_core::VR;
use dicom_dictionary_std::{tags, uids};
use irym_dimse::{Dataset, DatasetExt, DimseScu, ErrorKind, Status};
use irym_ul::{
    association::{EventSink, TracingSink},
    ClientAssociation, ClientAssociationOptions, State,
};
use snafu::{ensure, OptionExt, Report, ResultExt, Snafu};
use tracing::{debug, info, warn};

use crate::{config::WorkflowConfig, transform::Transform, uid::new_uid};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Could not establish association with {addr}
    Establish {
        addr: String,
        source: irym_ul::association::Error,
    },
    /// C-FIND failed
    Find { source: irym_dimse::Error },
    /// Query failed with status {status}
    QueryFailed { status: Status },
    /// Matching series lacks {name}
    IncompleteMatch { name: &'static str },
    /// C-GET failed
    Retrieve { source: irym_dimse::Error },
    /// Retrieval ended with status {status}, {failed} instance(s) missing
    IncompleteRetrieve { status: Status, failed: u32 },
    /// Retrieval ended with status {status} without any instance
    NothingRetrieved { status: Status },
    /// C-STORE failed
    Store { source: irym_dimse::Error },
    /// Instance {sop_instance_uid} was refused with status {status}
    StoreRefused {
        sop_instance_uid: String,
        status: Status,
    },
    /// Could not release association
    Release { source: irym_dimse::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the failure lies in the association itself
    /// rather than in the content of an operation.
    pub fn is_association_failure(&self) -> bool {
        match self {
            Error::Establish { .. } => true,
            Error::Find { source }
            | Error::Retrieve { source }
            | Error::Store { source }
            | Error::Release { source } => matches!(
                source.kind(),
                ErrorKind::MalformedPdu
                    | ErrorKind::TruncatedMessage
                    | ErrorKind::AssociationRejected
                    | ErrorKind::AssociationNotReady
                    | ErrorKind::AssociationError
            ),
            _ => false,
        }
    }
}

/// A series found by the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRef {
    pub study_instance_uid: String,
    pub series_instance_uid: String,
}

/// How a workflow run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The query had no matches.
    NotFound,
    /// The derived series was stored in full.
    Stored {
        study_instance_uid: String,
        /// the UID of the new series
        series_instance_uid: String,
        instances: usize,
    },
}

/// The workflow, bound to a configuration and a transform.
pub struct Workflow<T> {
    config: WorkflowConfig,
    transform: T,
    event_sink: Arc<dyn EventSink>,
}

impl<T> std::fmt::Debug for Workflow<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: Transform> Workflow<T> {
    pub fn new(config: WorkflowConfig, transform: T) -> Self {
        Workflow {
            config,
            transform,
            event_sink: Arc::new(TracingSink),
        }
    }

    /// Report association events to the given sink.
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Run the whole workflow.
    pub fn run(&self) -> Result<Outcome> {
        let Some(series) = self.find_series()? else {
            return Ok(Outcome::NotFound);
        };
        info!(
            "Found series {} of study {}",
            series.series_instance_uid, series.study_instance_uid
        );

        let mut scu = DimseScu::new(self.establish(true)?);
        let series_instance_uid = new_uid();
        let stored = self
            .retrieve(&mut scu, &series, &series_instance_uid)
            .and_then(|derived| self.store(&mut scu, &derived));
        let instances = match stored {
            Ok(instances) => instances,
            Err(e) => {
                release_after_failure(scu);
                return Err(e);
            }
        };
        scu.release().context(ReleaseSnafu)?;

        Ok(Outcome::Stored {
            study_instance_uid: series.study_instance_uid,
            series_instance_uid,
            instances,
        })
    }

    /// Query the peer over a dedicated association,
    /// and return the series of the first match, if any.
    pub fn find_series(&self) -> Result<Option<SeriesRef>> {
        let mut scu = DimseScu::new(self.establish(false)?);
        let (first, final_status) = match self.first_match(&mut scu) {
            Ok(found) => found,
            Err(e) => {
                release_after_failure(scu);
                return Err(e);
            }
        };
        scu.release().context(ReleaseSnafu)?;

        let Some(identifier) = first else {
            if let Some(status) = final_status {
                ensure!(status.is_ok(), QueryFailedSnafu { status });
            }
            return Ok(None);
        };
        Ok(Some(SeriesRef {
            study_instance_uid: identifier
                .text(tags::STUDY_INSTANCE_UID)
                .filter(|uid| !uid.is_empty())
                .context(IncompleteMatchSnafu {
                    name: "StudyInstanceUID",
                })?,
            series_instance_uid: identifier
                .text(tags::SERIES_INSTANCE_UID)
                .filter(|uid| !uid.is_empty())
                .context(IncompleteMatchSnafu {
                    name: "SeriesInstanceUID",
                })?,
        }))
    }

    /// Issue the query and take its first match,
    /// along with the final status when there is none.
    fn first_match(&self, scu: &mut DimseScu) -> Result<(Option<Dataset>, Option<Status>)> {
        let query = self.query();
        let mut responses = scu
            .find(uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND, &query)
            .context(FindSnafu)?;
        let mut first = None;
        let mut final_status = None;
        for response in responses.by_ref() {
            let response = response.context(FindSnafu)?;
            if response.status.is_pending() {
                first = Some(response.identifier.unwrap_or_else(Dataset::new_empty));
                break;
            }
            final_status = Some(response.status);
        }

        if first.is_some() {
            // the remaining matches are not needed
            let status = responses.cancel().context(FindSnafu)?;
            debug!("C-FIND ended with status {:?}", status.map(|s| s.to_string()));
        }
        Ok((first, final_status))
    }

    /// Retrieve the given series with C-GET,
    /// transforming each instance into one of the derived series
    /// with the given UID.
    ///
    /// Fails with `IncompleteRetrieve` if any instance
    /// could not be retrieved, decoded or transformed,
    /// and with `NothingRetrieved` if the peer sent no instance.
    pub fn retrieve(
        &self,
        scu: &mut DimseScu,
        series: &SeriesRef,
        series_instance_uid: &str,
    ) -> Result<Vec<Dataset>> {
        let mut identifier = Dataset::new_empty();
        identifier.put_text(tags::QUERY_RETRIEVE_LEVEL, VR::CS, &self.config.query_level);
        identifier.put_text(tags::STUDY_INSTANCE_UID, VR::UI, &series.study_instance_uid);
        identifier.put_text(
            tags::SERIES_INSTANCE_UID,
            VR::UI,
            &series.series_instance_uid,
        );

        let mut derived = Vec::new();
        let handler = |instance: Dataset| match self.transform.transform(&instance) {
            Ok(mut obj) => {
                self.derive(&mut obj, series_instance_uid);
                derived.push(obj);
                Status::SUCCESS
            }
            Err(e) => {
                warn!(
                    "Could not transform instance {}: {}",
                    instance.text(tags::SOP_INSTANCE_UID).unwrap_or_default(),
                    Report::from_error(e)
                );
                Status::CANNOT_UNDERSTAND
            }
        };
        let summary = scu
            .get(
                uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_GET,
                &identifier,
                handler,
            )
            .context(RetrieveSnafu)?
            .finish()
            .context(RetrieveSnafu)?;

        let last = summary.response;
        // instances the peer counts as delivered but which were not kept
        let missing = last
            .sub_operations
            .completed
            .map(u32::from)
            .unwrap_or_default()
            .saturating_sub(derived.len() as u32);
        let failed = summary.failed().max(missing);
        ensure!(
            last.status.is_ok() && failed == 0,
            IncompleteRetrieveSnafu {
                status: last.status,
                failed,
            }
        );
        ensure!(
            !derived.is_empty(),
            NothingRetrievedSnafu {
                status: last.status
            }
        );
        if last.sub_operations.warning.unwrap_or_default() > 0 {
            warn!(
                "{} instance(s) retrieved with warnings",
                last.sub_operations.warning.unwrap_or_default()
            );
        }
        info!("Retrieved and transformed {} instance(s)", derived.len());
        Ok(derived)
    }

    /// Store each instance, stopping at the first refusal.
    pub fn store(&self, scu: &mut DimseScu, instances: &[Dataset]) -> Result<usize> {
        for instance in instances {
            let status = scu.store(instance).context(StoreSnafu)?;
            ensure!(
                status.is_ok(),
                StoreRefusedSnafu {
                    sop_instance_uid: instance.text(tags::SOP_INSTANCE_UID).unwrap_or_default(),
                    status,
                }
            );
        }
        info!("Stored {} instance(s)", instances.len());
        Ok(instances.len())
    }

    /// Make a transformed instance a member of the derived series.
    fn derive(&self, obj: &mut Dataset, series_instance_uid: &str) {
        obj.put_text(tags::SOP_INSTANCE_UID, VR::UI, &new_uid());
        obj.put_text(tags::SERIES_INSTANCE_UID, VR::UI, series_instance_uid);
        obj.put_text(
            tags::SERIES_DESCRIPTION,
            VR::LO,
            &self.config.series_description,
        );
        obj.put_text(tags::MODALITY, VR::CS, &self.config.modality);
    }

    /// The C-FIND identifier.
    fn query(&self) -> Dataset {
        let mut query = Dataset::new_empty();
        query.put_text(tags::QUERY_RETRIEVE_LEVEL, VR::CS, &self.config.query_level);
        query.put_text(tags::MODALITY, VR::CS, &self.config.modality);
        query.put_text(tags::STUDY_INSTANCE_UID, VR::UI, "");
        query.put_text(tags::SERIES_INSTANCE_UID, VR::UI, "");
        query
    }

    /// Open an association with the peer,
    /// for querying, or for retrieving and storing.
    fn establish(&self, retrieve: bool) -> Result<ClientAssociation> {
        let config = &self.config;
        let mut options = ClientAssociationOptions::new()
            .calling_ae_title(config.calling_ae_title.as_str())
            .called_ae_title(config.called_ae_title.as_str())
            .max_pdu_length(config.max_pdu_length)
            .event_sink(self.event_sink.clone());
        if let Some(timeout) = config.read_timeout {
            options = options.read_timeout(timeout);
        }
        if let Some(timeout) = config.connect_timeout {
            options = options.connect_timeout(timeout);
        }

        if retrieve {
            options =
                options.with_abstract_syntax(uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_GET);
            for sop_class in &config.storage_sop_classes {
                options = options
                    .with_abstract_syntax(sop_class.as_str())
                    .with_role_selection(sop_class.as_str(), true, true);
            }
        } else {
            options = options
                .with_abstract_syntax(uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND);
        }

        options.establish(&config.addr).context(EstablishSnafu {
            addr: config.addr.as_str(),
        })
    }
}

/// Release the association after a failed operation,
/// unless it is already closed.
fn release_after_failure(scu: DimseScu) {
    if scu.association().state() != State::Established {
        return;
    }
    if let Err(e) = scu.release() {
        warn!("Could not release association: {}", Report::from_error(e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn association_failures_are_told_apart() {
        let err = QueryFailedSnafu {
            status: Status(0xA700),
        }
        .build();
        assert!(!err.is_association_failure());
        let err = IncompleteRetrieveSnafu {
            status: Status::SUB_OPERATIONS_WARNING,
            failed: 1_u32,
        }
        .build();
        assert!(!err.is_association_failure());
        let err = NothingRetrievedSnafu {
            status: Status::SUCCESS,
        }
        .build();
        assert!(!err.is_association_failure());
    }

    #[test]
    fn query_uses_the_configured_level_and_modality() {
        let workflow = Workflow::new(WorkflowConfig::default(), crate::transform::Identity);
        let query = workflow.query();
        assert_eq!(query.text(tags::QUERY_RETRIEVE_LEVEL).as_deref(), Some("SERIES"));
        assert_eq!(query.text(tags::MODALITY).as_deref(), Some("MG"));
        assert_eq!(query.text(tags::SERIES_INSTANCE_UID).as_deref(), Some(""));
    }

    #[test]
    fn derived_instances_join_the_new_series() {
        let workflow = Workflow::new(WorkflowConfig::default(), crate::transform::Identity);
        let mut obj = Dataset::new_empty();
        obj.put_text(tags::SOP_INSTANCE_UID, VR::UI, "1.2.3.4.1");
        obj.put_text(tags::STUDY_INSTANCE_UID, VR::UI, "1.2.3");
        obj.put_text(tags::MODALITY, VR::CS, "OT");
        workflow.derive(&mut obj, "2.25.1");

        let sop_instance_uid = obj.text(tags::SOP_INSTANCE_UID).unwrap();
        assert_ne!(sop_instance_uid, "1.2.3.4.1");
        assert!(sop_instance_uid.starts_with("2.25."));
        assert_eq!(obj.text(tags::SERIES_INSTANCE_UID).as_deref(), Some("2.25.1"));
        assert_eq!(obj.text(tags::STUDY_INSTANCE_UID).as_deref(), Some("1.2.3"));
        assert_eq!(
            obj.text(tags::SERIES_DESCRIPTION).as_deref(),
            Some("Rotated series")
        );
        assert_eq!(obj.text(tags::MODALITY).as_deref(), Some("MG"));
    }
}
