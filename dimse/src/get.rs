//! The C-GET service.
//!
//! The peer answers a C-GET request by opening C-STORE sub-operations
//! on the same association, interleaved with C-GET progress responses.
//! Each inbound instance is handed to a [`StoreHandler`]
//! and acknowledged before the next message is read.
use std::iter::FusedIterator;

use snafu::{OptionExt, Report, ResultExt};
use tracing::{debug, warn};

use crate::{
    codec::Codec,
    command::{self, CommandField, SubOperations},
    dataset::Dataset,
    error::{CodecSnafu, MissingDataSetSnafu, Result, UnexpectedCommandSnafu},
    scu::{check_response, response_status, DimseScu, Message},
    status::Status,
};

/// A receiver of the instances sent through C-STORE sub-operations.
pub trait StoreHandler {
    /// Take one instance, returning the status to acknowledge it with.
    fn on_store(&mut self, instance: Dataset) -> Status;
}

impl<F> StoreHandler for F
where
    F: FnMut(Dataset) -> Status,
{
    fn on_store(&mut self, instance: Dataset) -> Status {
        self(instance)
    }
}

/// One C-GET response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetResponse {
    pub status: Status,
    pub sub_operations: SubOperations,
}

/// How a C-GET operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetSummary {
    /// The final response of the peer.
    pub response: GetResponse,
    /// Sub-operations acknowledged with success or warning.
    pub stored: u32,
    /// Sub-operations acknowledged with a failure by this node.
    pub refused: u32,
}

impl GetSummary {
    /// The number of failed sub-operations,
    /// as counted by the peer or by this node, whichever is larger.
    pub fn failed(&self) -> u32 {
        self.response
            .sub_operations
            .failed
            .map(u32::from)
            .unwrap_or_default()
            .max(self.refused)
    }
}

impl<C: Codec> DimseScu<C> {
    /// Issue a C-GET request with the given identifier.
    ///
    /// The role selection for each storage SOP class expected in return
    /// must have been proposed when requesting the association.
    pub fn get<H: StoreHandler>(
        &mut self,
        abstract_syntax: &str,
        identifier: &Dataset,
        handler: H,
    ) -> Result<GetResponses<'_, C, H>> {
        let (presentation_context_id, ts) = self.presentation_context_for(abstract_syntax)?;
        let data = self.codec.encode(&ts, identifier).context(CodecSnafu)?;
        let message_id = self.next_message_id();
        let cmd = command::get_rq(abstract_syntax, message_id);
        self.send_message(presentation_context_id, &cmd, Some(&data))?;

        Ok(GetResponses {
            scu: self,
            handler,
            message_id,
            done: false,
            stored: 0,
            refused: 0,
        })
    }
}

/// The lazy sequence of responses to a C-GET request.
///
/// Reading the next response serves every C-STORE sub-operation
/// which the peer opens before it.
#[derive(Debug)]
pub struct GetResponses<'a, C: Codec, H> {
    scu: &'a mut DimseScu<C>,
    handler: H,
    message_id: u16,
    done: bool,
    stored: u32,
    refused: u32,
}

impl<C: Codec, H: StoreHandler> GetResponses<'_, C, H> {
    pub fn message_id(&self) -> u16 {
        self.message_id
    }

    /// The number of sub-operations acknowledged with success or warning.
    pub fn stored(&self) -> u32 {
        self.stored
    }

    /// The number of sub-operations acknowledged with a failure.
    pub fn refused(&self) -> u32 {
        self.refused
    }

    /// Consume the responses until the final one,
    /// and summarize the operation.
    pub fn finish(mut self) -> Result<GetSummary> {
        let mut last = None;
        for response in self.by_ref() {
            last = Some(response?);
        }
        // the stream only ends on a terminal response or an error
        let response = last.unwrap_or(GetResponse {
            status: Status::SUCCESS,
            sub_operations: SubOperations::default(),
        });
        Ok(GetSummary {
            response,
            stored: self.stored,
            refused: self.refused,
        })
    }

    fn next_response(&mut self) -> Result<GetResponse> {
        loop {
            let message = self.scu.receive_message()?;
            match message.command.field {
                CommandField::CStoreRq => self.serve_store(message)?,
                CommandField::CGetRsp => {
                    check_response(&message, CommandField::CGetRsp, self.message_id)?;
                    let status = response_status(&message.command)?;
                    return Ok(GetResponse {
                        status,
                        sub_operations: message.command.sub_operations,
                    });
                }
                got => {
                    return UnexpectedCommandSnafu {
                        expected: CommandField::CGetRsp,
                        got,
                    }
                    .fail()
                }
            }
        }
    }

    /// Hand an inbound instance to the handler and acknowledge it.
    fn serve_store(&mut self, message: Message) -> Result<()> {
        let sop_class_uid = message
            .command
            .affected_sop_class_uid
            .clone()
            .unwrap_or_default();
        let sop_instance_uid = message
            .command
            .affected_sop_instance_uid
            .clone()
            .unwrap_or_default();
        let message_id = message.command.message_id.unwrap_or_else(|| {
            warn!("C-STORE request without a message ID");
            0
        });

        let status = match self.decode_instance(&message) {
            Ok(instance) => self.handler.on_store(instance),
            Err(e) => {
                warn!(
                    "Could not read instance {}: {}",
                    sop_instance_uid,
                    Report::from_error(e)
                );
                Status::CANNOT_UNDERSTAND
            }
        };
        if status.is_ok() {
            self.stored += 1;
        } else {
            self.refused += 1;
        }
        debug!("Acknowledging instance {} with {}", sop_instance_uid, status);

        let rsp = command::store_rsp(message_id, &sop_class_uid, &sop_instance_uid, status);
        self.scu
            .send_message(message.presentation_context_id, &rsp, None)
    }

    fn decode_instance(&self, message: &Message) -> Result<Dataset> {
        let data = message.data.as_deref().context(MissingDataSetSnafu)?;
        self.scu
            .decode_data(message.presentation_context_id, data)
    }
}

impl<C: Codec, H: StoreHandler> Iterator for GetResponses<'_, C, H> {
    type Item = Result<GetResponse>;

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

impl<C: Codec, H: StoreHandler> FusedIterator for GetResponses<'_, C, H> {}
