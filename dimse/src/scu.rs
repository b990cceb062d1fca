//! The DIMSE service user over an established association.
use irym_ul::{
    association::{ClientAssociation, Event},
    pdu::PDataValueType,
};
use snafu::{ensure, OptionExt, ResultExt};
use tracing::debug;

use crate::{
    codec::{decode_command, encode_command, Codec, RegistryCodec},
    command::{Command, CommandField},
    dataset::Dataset,
    error::{
        AssociationSnafu, CodecSnafu, InvalidCommandSnafu, MessageIdMismatchSnafu,
        MissingDataSetSnafu, MissingStatusSnafu, NoPresentationContextSnafu, Result,
        UnexpectedCommandSnafu, UnexpectedDataSetSnafu, UnknownPresentationContextSnafu,
        UnknownStatusSnafu,
    },
    status::{Status, StatusKind},
};

/// A whole DIMSE message as received from the peer:
/// the interpreted command set and the encoded data set, if any.
#[derive(Debug, Clone)]
pub struct Message {
    pub presentation_context_id: u8,
    pub command: Command,
    pub data: Option<Vec<u8>>,
}

/// A DIMSE service user,
/// exclusively owning an established association.
///
/// The C-FIND, C-GET and C-STORE services are provided by
/// [`find`](Self::find), [`get`](Self::get) and [`store`](Self::store).
/// Only one operation is in progress at any time,
/// which the borrow of the response streams enforces.
#[derive(Debug)]
pub struct DimseScu<C = RegistryCodec> {
    association: ClientAssociation,
    pub(crate) codec: C,
    message_id: u16,
}

impl DimseScu<RegistryCodec> {
    /// Wrap an established association,
    /// using the built-in codec for data sets.
    pub fn new(association: ClientAssociation) -> Self {
        Self::with_codec(association, RegistryCodec)
    }
}

impl<C: Codec> DimseScu<C> {
    pub fn with_codec(association: ClientAssociation, codec: C) -> Self {
        DimseScu {
            association,
            codec,
            message_id: 0,
        }
    }

    pub fn association(&self) -> &ClientAssociation {
        &self.association
    }

    pub fn association_mut(&mut self) -> &mut ClientAssociation {
        &mut self.association
    }

    /// Allocate the message ID of the next request.
    /// IDs start at 1 and never take the value 0.
    pub fn next_message_id(&mut self) -> u16 {
        self.message_id = self.message_id.wrapping_add(1);
        if self.message_id == 0 {
            self.message_id = 1;
        }
        self.message_id
    }

    /// Gracefully release the association.
    pub fn release(self) -> Result<()> {
        self.association.release().context(AssociationSnafu)
    }

    /// Abort the association.
    pub fn abort(self) -> Result<()> {
        self.association.abort().context(AssociationSnafu)
    }

    /// Obtain the identifier and transfer syntax
    /// of the presentation context accepted for the given abstract syntax.
    pub fn presentation_context_for(&self, abstract_syntax: &str) -> Result<(u8, String)> {
        let pc = self
            .association
            .presentation_context_for(abstract_syntax)
            .context(NoPresentationContextSnafu { abstract_syntax })?;
        Ok((pc.id, pc.transfer_syntax.clone()))
    }

    /// Obtain the transfer syntax of an accepted presentation context.
    pub fn transfer_syntax_of(&self, presentation_context_id: u8) -> Result<&str> {
        let pc = self
            .association
            .presentation_context(presentation_context_id)
            .context(UnknownPresentationContextSnafu {
                id: presentation_context_id,
            })?;
        Ok(&pc.transfer_syntax)
    }

    /// Decode the data set of a received message
    /// with the transfer syntax of its presentation context.
    pub fn decode_data(&self, presentation_context_id: u8, data: &[u8]) -> Result<Dataset> {
        let ts = self.transfer_syntax_of(presentation_context_id)?;
        self.codec.decode(ts, data).context(CodecSnafu)
    }

    /// Encode a data set for the given presentation context.
    pub fn encode_data(&self, presentation_context_id: u8, dataset: &Dataset) -> Result<Vec<u8>> {
        let ts = self.transfer_syntax_of(presentation_context_id)?;
        self.codec.encode(ts, dataset).context(CodecSnafu)
    }

    /// Send a command set, followed by its encoded data set if any.
    pub fn send_message(
        &mut self,
        presentation_context_id: u8,
        command_set: &Dataset,
        data: Option<&[u8]>,
    ) -> Result<()> {
        let command = Command::parse(command_set).context(InvalidCommandSnafu)?;
        let bytes = encode_command(command_set).context(CodecSnafu)?;
        self.association
            .send_pdv(presentation_context_id, PDataValueType::Command, &bytes)
            .context(AssociationSnafu)?;
        if let Some(data) = data {
            self.association
                .send_pdv(presentation_context_id, PDataValueType::Data, data)
                .context(AssociationSnafu)?;
        }
        debug!(
            "Sent {} on presentation context {}",
            command.field.name(),
            presentation_context_id
        );
        self.report(&command);
        Ok(())
    }

    /// Receive the next whole DIMSE message.
    pub fn receive_message(&mut self) -> Result<Message> {
        let pdv = self.association.receive_pdv().context(AssociationSnafu)?;
        ensure!(
            pdv.value_type == PDataValueType::Command,
            UnexpectedDataSetSnafu
        );
        let command_set = decode_command(&pdv.data).context(CodecSnafu)?;
        let command = Command::parse(&command_set).context(InvalidCommandSnafu)?;

        let data = if command.has_dataset {
            let data = self.association.receive_pdv().context(AssociationSnafu)?;
            ensure!(
                data.value_type == PDataValueType::Data
                    && data.presentation_context_id == pdv.presentation_context_id,
                MissingDataSetSnafu
            );
            Some(data.data)
        } else {
            None
        };

        debug!(
            "Received {} on presentation context {}",
            command.field.name(),
            pdv.presentation_context_id
        );
        self.report(&command);
        Ok(Message {
            presentation_context_id: pdv.presentation_context_id,
            command,
            data,
        })
    }

    /// Receive the response to the request with the given message ID,
    /// checking its command field and status.
    pub(crate) fn receive_response(
        &mut self,
        expected: CommandField,
        message_id: u16,
    ) -> Result<(Message, Status)> {
        let message = self.receive_message()?;
        check_response(&message, expected, message_id)?;
        let status = response_status(&message.command)?;
        Ok((message, status))
    }

    fn report(&self, command: &Command) {
        let message_id = command
            .message_id
            .or(command.message_id_being_responded_to)
            .unwrap_or_default();
        self.association.emit(Event::Dimse {
            message: command.field.name().to_string(),
            message_id,
            status: command.status.map(Status::code),
        });
    }
}

/// Check that a message is the expected response to the given request.
pub(crate) fn check_response(message: &Message, expected: CommandField, message_id: u16) -> Result<()> {
    let got = message.command.field;
    ensure!(got == expected, UnexpectedCommandSnafu { expected, got });
    let responded_to = message.command.message_id_being_responded_to;
    ensure!(
        responded_to == Some(message_id),
        MessageIdMismatchSnafu {
            expected: message_id,
            got: responded_to,
        }
    );
    Ok(())
}

/// Extract the status of a response,
/// refusing codes outside the known ranges.
pub(crate) fn response_status(command: &Command) -> Result<Status> {
    let status = command.status.context(MissingStatusSnafu)?;
    ensure!(
        status.kind() != StatusKind::Unknown,
        UnknownStatusSnafu { code: status.code() }
    );
    Ok(status)
}
