//! A query/retrieve and storage provider serving canned content.
use std::{
    net::{SocketAddr, TcpListener},
    thread::{spawn, JoinHandle},
};

use dicom_core::{dicom_value, DataElement, VR};
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use tracing::warn;

use crate::{
    peer::{uint16, Incoming, Peer, Received},
    Result,
};

/// The content served by an [`Archive`], and how it answers.
#[derive(Debug, Clone, Default)]
pub struct Archive {
    /// identifiers returned as C-FIND matches, one per pending response
    pub matches: Vec<InMemDicomObject>,
    /// instances sent through C-STORE sub-operations of a C-GET
    pub instances: Vec<InMemDicomObject>,
    /// status of each C-STORE response
    pub store_status: u16,
    /// additional failed sub-operations to report in C-GET responses
    pub extra_failed_sub_operations: u16,
}

/// What happened during the sessions served by an [`Archive`].
#[derive(Debug, Clone, Default)]
pub struct ArchiveLog {
    /// number of associations accepted
    pub associations: usize,
    /// C-FIND identifiers received
    pub find_queries: Vec<InMemDicomObject>,
    /// C-GET identifiers received
    pub get_queries: Vec<InMemDicomObject>,
    /// statuses with which the requestor acknowledged each sub-operation,
    /// in the order they were sent
    pub sub_operation_acks: Vec<u16>,
    /// instances received through C-STORE
    pub stored: Vec<InMemDicomObject>,
    /// message IDs of the requests received, in order
    pub message_ids: Vec<u16>,
    /// C-CANCEL requests received
    pub cancels: usize,
    /// whether each association ended with a release
    pub released: Vec<bool>,
}

impl Archive {
    /// Listen on an ephemeral local port
    /// and serve the given number of associations, one after the other.
    pub fn spawn(self, sessions: usize) -> Result<(SocketAddr, JoinHandle<Result<ArchiveLog>>)> {
        let listener = TcpListener::bind("localhost:0")?;
        let addr = listener.local_addr()?;
        let handle = spawn(move || -> Result<ArchiveLog> {
            let mut log = ArchiveLog::default();
            for _ in 0..sessions {
                let (stream, _addr) = listener.accept()?;
                let mut peer = Peer::new(stream);
                peer.accept()?;
                log.associations += 1;
                let released = self.serve(&mut peer, &mut log)?;
                log.released.push(released);
            }
            Ok(log)
        });
        Ok((addr, handle))
    }

    /// Serve one association until it is released or aborted.
    fn serve(&self, peer: &mut Peer, log: &mut ArchiveLog) -> Result<bool> {
        loop {
            let message = match peer.receive()? {
                Incoming::Message(message) => message,
                Incoming::ReleaseRequested => {
                    peer.send_pdu(&irym_ul::Pdu::ReleaseRP)?;
                    return Ok(true);
                }
                Incoming::Aborted(source) => {
                    warn!("Association aborted by the requestor: {}", source);
                    return Ok(false);
                }
            };
            if message.command_field()? == 0x0FFF {
                // every response was already sent
                log.cancels += 1;
                continue;
            }
            log.message_ids.push(message.message_id()?);
            match message.command_field()? {
                0x0020 => self.serve_find(peer, message, log)?,
                0x0010 => self.serve_get(peer, message, log)?,
                0x0001 => self.serve_store(peer, message, log)?,
                other => return Err(format!("unsupported command {:04X}H", other).into()),
            }
        }
    }

    fn serve_find(&self, peer: &mut Peer, rq: Received, log: &mut ArchiveLog) -> Result<()> {
        let pc_id = rq.presentation_context_id;
        let data = rq.data.as_deref().ok_or("C-FIND without identifier")?;
        log.find_queries.push(peer.decode(pc_id, data)?);
        let message_id = rq.message_id()?;
        let sop_class_uid = affected_sop_class(&rq)?;

        for identifier in &self.matches {
            let rsp = find_rsp(message_id, &sop_class_uid, 0xFF00, true);
            peer.send_message(pc_id, &rsp, Some(identifier))?;
        }
        let rsp = find_rsp(message_id, &sop_class_uid, 0x0000, false);
        peer.send_message(pc_id, &rsp, None)
    }

    fn serve_get(&self, peer: &mut Peer, rq: Received, log: &mut ArchiveLog) -> Result<()> {
        let pc_id = rq.presentation_context_id;
        let data = rq.data.as_deref().ok_or("C-GET without identifier")?;
        log.get_queries.push(peer.decode(pc_id, data)?);
        let message_id = rq.message_id()?;
        let sop_class_uid = affected_sop_class(&rq)?;

        let total = self.instances.len() as u16;
        let mut completed = 0;
        let mut failed = self.extra_failed_sub_operations;
        for (i, instance) in self.instances.iter().enumerate() {
            let instance_class = text(instance, tags::SOP_CLASS_UID)?;
            let instance_uid = text(instance, tags::SOP_INSTANCE_UID)?;
            let Some(store_pc_id) = peer.context_for(&instance_class).map(|pc| pc.id) else {
                failed += 1;
                continue;
            };

            let store_id = 1000 + i as u16;
            let store_rq = store_rq(store_id, &instance_class, &instance_uid);
            peer.send_message(store_pc_id, &store_rq, Some(instance))?;

            let ack = peer.receive_message()?;
            if ack.command_field()? != 0x8001 {
                return Err("expected C-STORE response".into());
            }
            if uint16(&ack.command, tags::MESSAGE_ID_BEING_RESPONDED_TO)? != store_id {
                return Err("C-STORE response to the wrong message".into());
            }
            let status = uint16(&ack.command, tags::STATUS)?;
            log.sub_operation_acks.push(status);
            if status == 0x0000 {
                completed += 1;
            } else {
                failed += 1;
            }

            let remaining = total - (i as u16 + 1);
            if remaining > 0 {
                let rsp = get_rsp(message_id, &sop_class_uid, 0xFF00, remaining, completed, failed);
                peer.send_message(pc_id, &rsp, None)?;
            }
        }

        let status = if failed > 0 { 0xB000 } else { 0x0000 };
        let rsp = get_rsp(message_id, &sop_class_uid, status, 0, completed, failed);
        peer.send_message(pc_id, &rsp, None)
    }

    fn serve_store(&self, peer: &mut Peer, rq: Received, log: &mut ArchiveLog) -> Result<()> {
        let pc_id = rq.presentation_context_id;
        let data = rq.data.as_deref().ok_or("C-STORE without data set")?;
        let instance = peer.decode(pc_id, data)?;
        let message_id = rq.message_id()?;
        let sop_class_uid = affected_sop_class(&rq)?;
        let sop_instance_uid = text(&rq.command, tags::AFFECTED_SOP_INSTANCE_UID)?;
        log.stored.push(instance);

        let rsp = store_rsp(message_id, &sop_class_uid, &sop_instance_uid, self.store_status);
        peer.send_message(pc_id, &rsp, None)
    }
}

fn text(obj: &InMemDicomObject, tag: dicom_core::Tag) -> Result<String> {
    Ok(obj
        .element(tag)?
        .to_str()?
        .trim_end_matches(|c: char| c == '\0' || c == ' ')
        .to_string())
}

fn affected_sop_class(rq: &Received) -> Result<String> {
    text(&rq.command, tags::AFFECTED_SOP_CLASS_UID)
}

/// Build a C-FIND-RSP command set.
pub fn find_rsp(
    message_id: u16,
    sop_class_uid: &str,
    status: u16,
    with_identifier: bool,
) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            dicom_value!(Str, sop_class_uid),
        ),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x8020])),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            dicom_value!(U16, [message_id]),
        ),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [if with_identifier { 0x0000 } else { 0x0101 }]),
        ),
        DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status])),
    ])
}

/// Build a C-GET-RSP command set with its sub-operation counters.
pub fn get_rsp(
    message_id: u16,
    sop_class_uid: &str,
    status: u16,
    remaining: u16,
    completed: u16,
    failed: u16,
) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            dicom_value!(Str, sop_class_uid),
        ),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x8010])),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            dicom_value!(U16, [message_id]),
        ),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [0x0101]),
        ),
        DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status])),
        DataElement::new(
            tags::NUMBER_OF_REMAINING_SUBOPERATIONS,
            VR::US,
            dicom_value!(U16, [remaining]),
        ),
        DataElement::new(
            tags::NUMBER_OF_COMPLETED_SUBOPERATIONS,
            VR::US,
            dicom_value!(U16, [completed]),
        ),
        DataElement::new(
            tags::NUMBER_OF_FAILED_SUBOPERATIONS,
            VR::US,
            dicom_value!(U16, [failed]),
        ),
        DataElement::new(
            tags::NUMBER_OF_WARNING_SUBOPERATIONS,
            VR::US,
            dicom_value!(U16, [0]),
        ),
    ])
}

/// Build a C-STORE-RQ command set, as sent in a C-GET sub-operation.
pub fn store_rq(message_id: u16, sop_class_uid: &str, sop_instance_uid: &str) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            dicom_value!(Str, sop_class_uid),
        ),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x0001])),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        DataElement::new(tags::PRIORITY, VR::US, dicom_value!(U16, [0x0000])),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [0x0000]),
        ),
        DataElement::new(
            tags::AFFECTED_SOP_INSTANCE_UID,
            VR::UI,
            dicom_value!(Str, sop_instance_uid),
        ),
    ])
}

/// Build a C-STORE-RSP command set.
pub fn store_rsp(
    message_id: u16,
    sop_class_uid: &str,
    sop_instance_uid: &str,
    status: u16,
) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            dicom_value!(Str, sop_class_uid),
        ),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x8001])),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            dicom_value!(U16, [message_id]),
        ),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [0x0101]),
        ),
        DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status])),
        DataElement::new(
            tags::AFFECTED_SOP_INSTANCE_UID,
            VR::UI,
            dicom_value!(Str, sop_instance_uid),
        ),
    ])
}
