//! A scripted association acceptor over a single TCP connection.
use std::{collections::VecDeque, io::Write, net::TcpStream};

use dicom_dictionary_std::tags;
use dicom_encoding::transfer_syntax::{TransferSyntax, TransferSyntaxIndex};
use dicom_object::InMemDicomObject;
use dicom_transfer_syntax_registry::{entries, TransferSyntaxRegistry};
use irym_ul::{
    association::{PDataReassembler, PDataWriter, Pdv},
    pdu::{
        read_pdu, write_pdu, AbortRQSource, AssociationAC, AssociationRJ, AssociationRJResult,
        AssociationRJSource, AssociationRQ, PDataValueType, Pdu, PresentationContextNegotiated,
        PresentationContextResult, PresentationContextResultReason, UserVariableItem,
        DEFAULT_MAX_PDU, MAXIMUM_PDU_SIZE,
    },
};
use tracing::debug;

use crate::Result;

/// A message received by the peer.
#[derive(Debug, Clone)]
pub struct Received {
    pub presentation_context_id: u8,
    pub command: InMemDicomObject,
    pub data: Option<Vec<u8>>,
}

impl Received {
    /// The _Command Field_ of the message.
    pub fn command_field(&self) -> Result<u16> {
        uint16(&self.command, tags::COMMAND_FIELD)
    }

    /// The _Message ID_ of the message.
    pub fn message_id(&self) -> Result<u16> {
        uint16(&self.command, tags::MESSAGE_ID)
    }
}

/// What the requestor sent next.
#[derive(Debug, Clone)]
pub enum Incoming {
    Message(Received),
    ReleaseRequested,
    Aborted(AbortRQSource),
}

/// The accepting side of one association, driven step by step by a test.
#[derive(Debug)]
pub struct Peer {
    stream: TcpStream,
    contexts: Vec<PresentationContextNegotiated>,
    requestor_max_pdu_length: u32,
    reassembler: PDataReassembler,
    pending: VecDeque<Pdv>,
}

impl Peer {
    pub fn new(stream: TcpStream) -> Self {
        Peer {
            stream,
            contexts: Vec::new(),
            requestor_max_pdu_length: DEFAULT_MAX_PDU,
            reassembler: PDataReassembler::new(),
            pending: VecDeque::new(),
        }
    }

    /// Read the association request.
    pub fn receive_request(&mut self) -> Result<AssociationRQ> {
        match self.receive_pdu()? {
            Pdu::AssociationRQ(rq) => Ok(rq),
            pdu => Err(format!("expected association request, got {}", pdu.short_description()).into()),
        }
    }

    /// Read the association request and accept every proposed context,
    /// each with the first transfer syntax known to the registry.
    /// Role selections are granted as proposed.
    pub fn accept(&mut self) -> Result<AssociationRQ> {
        let rq = self.receive_request()?;
        self.accept_request(&rq, MAXIMUM_PDU_SIZE)?;
        Ok(rq)
    }

    /// Accept the given association request,
    /// advertising the given maximum PDU length.
    pub fn accept_request(&mut self, rq: &AssociationRQ, max_pdu_length: u32) -> Result<()> {
        let mut results = Vec::with_capacity(rq.presentation_contexts.len());
        for pc in &rq.presentation_contexts {
            let ts = pc
                .transfer_syntaxes
                .iter()
                .find(|ts| lookup(ts).is_some());
            match ts {
                Some(ts) => {
                    self.contexts.push(PresentationContextNegotiated {
                        id: pc.id,
                        abstract_syntax: pc.abstract_syntax.clone(),
                        transfer_syntax: ts.clone(),
                    });
                    results.push(PresentationContextResult {
                        id: pc.id,
                        reason: PresentationContextResultReason::Acceptance,
                        transfer_syntax: ts.clone(),
                    });
                }
                None => results.push(PresentationContextResult {
                    id: pc.id,
                    reason: PresentationContextResultReason::TransferSyntaxesNotSupported,
                    transfer_syntax: String::new(),
                }),
            }
        }

        let mut user_variables = vec![UserVariableItem::MaxLength(max_pdu_length)];
        for item in &rq.user_variables {
            match item {
                UserVariableItem::MaxLength(len) => self.requestor_max_pdu_length = *len,
                UserVariableItem::RoleSelection(role) => {
                    user_variables.push(UserVariableItem::RoleSelection(role.clone()))
                }
                _ => {}
            }
        }

        self.send_pdu(
            &AssociationAC {
                protocol_version: rq.protocol_version,
                calling_ae_title: rq.calling_ae_title.clone(),
                called_ae_title: rq.called_ae_title.clone(),
                application_context_name: rq.application_context_name.clone(),
                presentation_contexts: results,
                user_variables,
            }
            .into(),
        )
    }

    /// Read the association request and reject it.
    pub fn reject(&mut self, source: AssociationRJSource) -> Result<AssociationRQ> {
        let rq = self.receive_request()?;
        self.send_pdu(
            &AssociationRJ {
                result: AssociationRJResult::Permanent,
                source,
            }
            .into(),
        )?;
        Ok(rq)
    }

    pub fn contexts(&self) -> &[PresentationContextNegotiated] {
        &self.contexts
    }

    /// The accepted context for the given abstract syntax.
    pub fn context_for(&self, abstract_syntax: &str) -> Option<&PresentationContextNegotiated> {
        self.contexts
            .iter()
            .find(|pc| pc.abstract_syntax == abstract_syntax)
    }

    pub fn receive_pdu(&mut self) -> Result<Pdu> {
        let pdu = read_pdu(&mut self.stream, MAXIMUM_PDU_SIZE, false)?;
        debug!("scp <- {}", pdu.short_description());
        Ok(pdu)
    }

    pub fn send_pdu(&mut self, pdu: &Pdu) -> Result<()> {
        debug!("scp -> {}", pdu.short_description());
        write_pdu(&mut self.stream, pdu)?;
        Ok(())
    }

    /// Send an abort, then close the connection.
    pub fn abort(mut self) -> Result<()> {
        self.send_pdu(&Pdu::AbortRQ {
            source: AbortRQSource::ServiceUser,
        })
    }

    /// Wait for a release request and confirm it.
    pub fn expect_release(&mut self) -> Result<()> {
        match self.receive_pdu()? {
            Pdu::ReleaseRQ => self.send_pdu(&Pdu::ReleaseRP),
            pdu => Err(format!("expected release request, got {}", pdu.short_description()).into()),
        }
    }

    /// Receive the next whole value, command or data set.
    pub fn receive_pdv(&mut self) -> Result<Option<Pdv>> {
        loop {
            if let Some(pdv) = self.pending.pop_front() {
                return Ok(Some(pdv));
            }
            match self.receive_pdu()? {
                Pdu::PData { data } => {
                    for value in data {
                        if let Some(pdv) = self.reassembler.push(value)? {
                            self.pending.push_back(pdv);
                        }
                    }
                }
                Pdu::ReleaseRQ | Pdu::AbortRQ { .. } => return Ok(None),
                pdu => {
                    return Err(format!("unexpected {}", pdu.short_description()).into());
                }
            }
        }
    }

    /// Receive the next DIMSE message, or the end of the association.
    pub fn receive(&mut self) -> Result<Incoming> {
        if self.pending.is_empty() && !self.reassembler.is_partial() {
            // peek at the next PDU to catch release and abort
            match self.receive_pdu()? {
                Pdu::PData { data } => {
                    for value in data {
                        if let Some(pdv) = self.reassembler.push(value)? {
                            self.pending.push_back(pdv);
                        }
                    }
                }
                Pdu::ReleaseRQ => return Ok(Incoming::ReleaseRequested),
                Pdu::AbortRQ { source } => return Ok(Incoming::Aborted(source)),
                pdu => {
                    return Err(format!("unexpected {}", pdu.short_description()).into());
                }
            }
        }

        let command = self
            .receive_pdv()?
            .ok_or("association ended in the middle of a message")?;
        if command.value_type != PDataValueType::Command {
            return Err("expected a command set".into());
        }
        let ts = entries::IMPLICIT_VR_LITTLE_ENDIAN.erased();
        let obj = InMemDicomObject::read_dataset_with_ts(command.data.as_slice(), &ts)?;
        let data = if uint16(&obj, tags::COMMAND_DATA_SET_TYPE)? != 0x0101 {
            let data = self
                .receive_pdv()?
                .ok_or("association ended before the data set")?;
            if data.value_type != PDataValueType::Data {
                return Err("expected a data set".into());
            }
            Some(data.data)
        } else {
            None
        };

        Ok(Incoming::Message(Received {
            presentation_context_id: command.presentation_context_id,
            command: obj,
            data,
        }))
    }

    /// Receive the next DIMSE message, failing on anything else.
    pub fn receive_message(&mut self) -> Result<Received> {
        match self.receive()? {
            Incoming::Message(message) => Ok(message),
            other => Err(format!("expected a DIMSE message, got {:?}", other).into()),
        }
    }

    /// Send a command set and its data set,
    /// fragmented as the requestor admits.
    pub fn send_message(
        &mut self,
        presentation_context_id: u8,
        command: &InMemDicomObject,
        data: Option<&InMemDicomObject>,
    ) -> Result<()> {
        let ts = entries::IMPLICIT_VR_LITTLE_ENDIAN.erased();
        let mut bytes = Vec::new();
        command.write_dataset_with_ts(&mut bytes, &ts)?;
        self.send_pdv(presentation_context_id, PDataValueType::Command, &bytes)?;

        if let Some(data) = data {
            let bytes = self.encode(presentation_context_id, data)?;
            self.send_pdv(presentation_context_id, PDataValueType::Data, &bytes)?;
        }
        Ok(())
    }

    pub fn send_pdv(
        &mut self,
        presentation_context_id: u8,
        value_type: PDataValueType,
        data: &[u8],
    ) -> Result<()> {
        let mut writer = PDataWriter::new(
            &mut self.stream,
            presentation_context_id,
            value_type,
            self.requestor_max_pdu_length,
        );
        writer.write_all(data)?;
        writer.finish()?;
        Ok(())
    }

    /// Decode a data set received on the given presentation context.
    pub fn decode(&self, presentation_context_id: u8, data: &[u8]) -> Result<InMemDicomObject> {
        let ts = self.transfer_syntax(presentation_context_id)?;
        Ok(InMemDicomObject::read_dataset_with_ts(data, ts)?)
    }

    /// Encode a data set for the given presentation context.
    pub fn encode(&self, presentation_context_id: u8, data: &InMemDicomObject) -> Result<Vec<u8>> {
        let ts = self.transfer_syntax(presentation_context_id)?;
        let mut bytes = Vec::new();
        data.write_dataset_with_ts(&mut bytes, ts)?;
        Ok(bytes)
    }

    fn transfer_syntax(&self, presentation_context_id: u8) -> Result<&'static TransferSyntax> {
        let pc = self
            .contexts
            .iter()
            .find(|pc| pc.id == presentation_context_id)
            .ok_or_else(|| format!("no presentation context {}", presentation_context_id))?;
        Ok(lookup(&pc.transfer_syntax).ok_or("unsupported transfer syntax")?)
    }
}

fn lookup(uid: &str) -> Option<&'static TransferSyntax> {
    TransferSyntaxRegistry
        .get(uid.trim_end_matches('\0'))
        .filter(|ts| !ts.is_unsupported())
}

pub(crate) fn uint16(obj: &InMemDicomObject, tag: dicom_core::Tag) -> Result<u16> {
    Ok(obj.element(tag)?.to_int::<u16>()?)
}
