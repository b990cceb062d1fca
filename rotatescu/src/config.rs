//! Workflow configuration.
use std::time::Duration;

use dicom_dictionary_std::uids;

/// The parameters of a query, retrieve and store workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// socket address of the peer node
    pub addr: String,
    /// the calling AE title
    pub calling_ae_title: String,
    /// the called AE title
    pub called_ae_title: String,
    /// the maximum PDU length admitted by this node
    pub max_pdu_length: u32,
    /// bound on each wait for data from the peer
    pub read_timeout: Option<Duration>,
    /// bound on connecting to the peer
    pub connect_timeout: Option<Duration>,
    /// _Query/Retrieve Level_ of the query
    pub query_level: String,
    /// _Modality_ to match
    pub modality: String,
    /// _Series Description_ of the derived series
    pub series_description: String,
    /// the storage SOP classes proposed for retrieving and storing instances
    pub storage_sop_classes: Vec<String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        WorkflowConfig {
            addr: "127.0.0.1:4242".to_string(),
            calling_ae_title: "ROTATE-SCU".to_string(),
            called_ae_title: "ANY-SCP".to_string(),
            max_pdu_length: 16384,
            read_timeout: Some(Duration::from_secs(30)),
            connect_timeout: Some(Duration::from_secs(10)),
            query_level: "SERIES".to_string(),
            modality: "MG".to_string(),
            series_description: "Rotated series".to_string(),
            storage_sop_classes: vec![
                uids::DIGITAL_MAMMOGRAPHY_X_RAY_IMAGE_STORAGE_FOR_PRESENTATION.to_string(),
                uids::DIGITAL_MAMMOGRAPHY_X_RAY_IMAGE_STORAGE_FOR_PROCESSING.to_string(),
            ],
        }
    }
}
