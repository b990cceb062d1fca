//! The C-STORE service.
use dicom_dictionary_std::tags;
use snafu::{OptionExt, ResultExt};
use tracing::warn;

use crate::{
    codec::Codec,
    command::{self, CommandField},
    dataset::{Dataset, DatasetExt},
    error::{CodecSnafu, MissingAttributeSnafu, Result},
    scu::DimseScu,
    status::Status,
};

impl<C: Codec> DimseScu<C> {
    /// Send an instance to the peer with a C-STORE request
    /// and wait for its response.
    ///
    /// The presentation context is chosen by the instance's SOP class UID.
    /// Failure statuses are returned as they are,
    /// for the caller to inspect.
    pub fn store(&mut self, instance: &Dataset) -> Result<Status> {
        let sop_class_uid = instance
            .text(tags::SOP_CLASS_UID)
            .context(MissingAttributeSnafu {
                name: "SOPClassUID",
            })?;
        let sop_instance_uid =
            instance
                .text(tags::SOP_INSTANCE_UID)
                .context(MissingAttributeSnafu {
                    name: "SOPInstanceUID",
                })?;

        let (presentation_context_id, ts) = self.presentation_context_for(&sop_class_uid)?;
        let data = self.codec.encode(&ts, instance).context(CodecSnafu)?;
        let message_id = self.next_message_id();
        let cmd = command::store_rq(&sop_class_uid, &sop_instance_uid, message_id);
        self.send_message(presentation_context_id, &cmd, Some(&data))?;

        let (message, status) = self.receive_response(CommandField::CStoreRsp, message_id)?;
        if message.data.is_some() {
            warn!("Ignoring data set in C-STORE response");
        }
        if !status.is_ok() {
            warn!(
                "Failed to store instance {} (status code {}){}",
                sop_instance_uid,
                status,
                message
                    .command
                    .error_comment
                    .map(|c| format!(": {}", c))
                    .unwrap_or_default()
            );
        }
        Ok(status)
    }
}
