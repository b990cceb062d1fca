//! The C-FIND service.
use std::iter::FusedIterator;

use snafu::ResultExt;
use tracing::warn;

use crate::{
    codec::Codec,
    command::{self, CommandField},
    dataset::Dataset,
    error::{CodecSnafu, Result},
    scu::DimseScu,
    status::Status,
};

/// One response to a C-FIND request.
#[derive(Debug, Clone)]
pub struct FindResponse {
    pub status: Status,
    /// The matching identifier, present in pending responses.
    pub identifier: Option<Dataset>,
}

impl<C: Codec> DimseScu<C> {
    /// Issue a C-FIND request with the given query identifier.
    ///
    /// The responses are produced one at a time by the returned stream,
    /// which ends after the first terminal status
    /// or the first error.
    pub fn find(
        &mut self,
        abstract_syntax: &str,
        identifier: &Dataset,
    ) -> Result<FindResponses<'_, C>> {
        let (presentation_context_id, ts) = self.presentation_context_for(abstract_syntax)?;
        let data = self.codec.encode(&ts, identifier).context(CodecSnafu)?;
        let message_id = self.next_message_id();
        let cmd = command::find_rq(abstract_syntax, message_id);
        self.send_message(presentation_context_id, &cmd, Some(&data))?;

        Ok(FindResponses {
            scu: self,
            presentation_context_id,
            message_id,
            done: false,
        })
    }
}

/// The lazy sequence of responses to a C-FIND request.
///
/// Every item but the last one has a pending status.
/// Dropping the stream before its end leaves
/// the remaining responses in flight;
/// use [`cancel`](Self::cancel) to end the operation early
/// and keep the association usable.
#[derive(Debug)]
pub struct FindResponses<'a, C: Codec> {
    scu: &'a mut DimseScu<C>,
    presentation_context_id: u8,
    message_id: u16,
    done: bool,
}

impl<C: Codec> FindResponses<'_, C> {
    /// The message ID of the C-FIND request.
    pub fn message_id(&self) -> u16 {
        self.message_id
    }

    /// Whether the final response has been received.
    pub fn is_finished(&self) -> bool {
        self.done
    }

    /// Request the cancellation of the operation
    /// and consume the responses until its end.
    ///
    /// Returns the final status,
    /// or `None` if the operation had already ended.
    pub fn cancel(mut self) -> Result<Option<Status>> {
        if self.done {
            return Ok(None);
        }
        let cmd = command::cancel_rq(self.message_id);
        self.scu
            .send_message(self.presentation_context_id, &cmd, None)?;

        let mut last = None;
        for response in self.by_ref() {
            last = Some(response?.status);
        }
        Ok(last)
    }

    fn next_response(&mut self) -> Result<FindResponse> {
        let (message, status) = self
            .scu
            .receive_response(CommandField::CFindRsp, self.message_id)?;

        let identifier = match message.data {
            Some(data) if status.is_pending() => Some(
                self.scu
                    .decode_data(message.presentation_context_id, &data)?,
            ),
            Some(_) => {
                warn!("Ignoring data set in C-FIND response with status {}", status);
                None
            }
            None => {
                if status.is_pending() {
                    warn!("Pending C-FIND response without an identifier");
                }
                None
            }
        };

        Ok(FindResponse { status, identifier })
    }
}

impl<C: Codec> Iterator for FindResponses<'_, C> {
    type Item = Result<FindResponse>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let out = self.next_response();
        if !matches!(&out, Ok(response) if response.status.is_pending()) {
            self.done = true;
        }
        Some(out)
    }
}

impl<C: Codec> FusedIterator for FindResponses<'_, C> {}
