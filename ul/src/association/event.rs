//! Association event reporting.
//!
//! Lifecycle transitions of an association,
//! as well as each DIMSE exchange performed over it,
//! are reported as [`Event`]s to an [`EventSink`]
//! supplied when the association is requested.
use std::sync::Mutex;

use tracing::{info, warn};

/// An observable event in the life of an association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The transport is connected and an association request was sent.
    Requested {
        peer: String,
        calling_ae_title: String,
        called_ae_title: String,
    },
    /// The association request was accepted.
    Established {
        accepted_contexts: usize,
        acceptor_max_pdu_length: u32,
    },
    /// The association request was rejected by the peer.
    Rejected { reason: String },
    /// The association was released in an orderly fashion.
    Released,
    /// The association was aborted, by either side or by a transport failure.
    Aborted { reason: String },
    /// A DIMSE message was exchanged.
    Dimse {
        /// message name, such as `C-FIND-RQ` or `C-STORE-RSP`
        message: String,
        message_id: u16,
        /// the status code, for response messages
        status: Option<u16>,
    },
}

/// A receiver of association events.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &Event);
}

impl<F> EventSink for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) {
        self(event)
    }
}

/// The default event sink, which emits each event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&self, event: &Event) {
        match event {
            Event::Requested {
                peer,
                calling_ae_title,
                called_ae_title,
            } => info!(
                %peer,
                calling_ae_title = calling_ae_title.as_str(),
                called_ae_title = called_ae_title.as_str(),
                "Association requested"
            ),
            Event::Established {
                accepted_contexts,
                acceptor_max_pdu_length,
            } => info!(
                accepted_contexts,
                acceptor_max_pdu_length, "Association established"
            ),
            Event::Rejected { reason } => warn!(%reason, "Association rejected"),
            Event::Released => info!("Association released"),
            Event::Aborted { reason } => warn!(%reason, "Association aborted"),
            Event::Dimse {
                message,
                message_id,
                status: Some(status),
            } => info!(
                message = message.as_str(),
                message_id,
                status = %format!("{:04X}H", status),
                "DIMSE"
            ),
            Event::Dimse {
                message,
                message_id,
                status: None,
            } => info!(message = message.as_str(), message_id, "DIMSE"),
        }
    }
}

/// An event sink keeping every event in memory, in order of arrival.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the events recorded so far.
    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for RecordingSink {
    fn on_event(&self, event: &Event) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}
