//! Association requester module
//!
//! The module provides an abstraction for a DICOM association
//! in which this application entity is the one requesting the association.
//! See [`ClientAssociationOptions`](self::ClientAssociationOptions)
//! for details and examples on how to create an association.
use std::{
    borrow::Cow,
    collections::VecDeque,
    fmt,
    io::{ErrorKind, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    sync::Arc,
    time::Duration,
};

use snafu::{ensure, Backtrace, IntoError, ResultExt, Snafu};
use tracing::{debug, warn};

use crate::{
    pdu::{
        reader::{self, read_pdu, DEFAULT_MAX_PDU, MAXIMUM_PDU_SIZE, MINIMUM_PDU_SIZE},
        writer::{self, encode_pdu},
        AbortRQServiceProviderReason, AbortRQSource, AssociationAC, AssociationRJ, AssociationRQ,
        PDataValue, PDataValueType, Pdu, PresentationContextNegotiated,
        PresentationContextProposed, PresentationContextResultReason, RoleSelection,
        UserVariableItem, PDU_HEADER_SIZE,
    },
    IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME,
};

use super::{
    event::{Event, EventSink, TracingSink},
    pdata::{FragmentError, PDataReassembler, PDataWriter, Pdv},
    uid::trim_uid,
    State,
};

/// The highest number of presentation contexts
/// which can be proposed in one association,
/// given that their identifiers are odd numbers between 1 and 255.
pub const MAX_PRESENTATION_CONTEXTS: usize = 128;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// missing abstract syntax to begin negotiation
    MissingAbstractSyntax { backtrace: Backtrace },

    #[snafu(display(
        "too many presentation contexts proposed ({}, at most {})",
        count,
        MAX_PRESENTATION_CONTEXTS
    ))]
    TooManyPresentationContexts { count: usize, backtrace: Backtrace },

    #[snafu(display("invalid maximum PDU length {}", max_pdu_length))]
    InvalidMaxPduLength {
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    /// could not resolve the address of the peer
    Resolve {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// the address of the peer did not resolve to any socket address
    NoAddress { backtrace: Backtrace },

    /// could not connect to the peer
    Connect {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// could not configure the TCP stream
    ConfigureSocket {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// failed to encode PDU
    EncodePdu {
        #[snafu(backtrace)]
        source: writer::Error,
    },

    #[snafu(display(
        "PDU is too large ({} bytes) to be sent to the remote application entity",
        length
    ))]
    SendTooLongPdu { length: usize, backtrace: Backtrace },

    /// transport failure
    Transport {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// timed out waiting for the peer
    Timeout {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// connection closed by the peer
    ConnectionClosed { backtrace: Backtrace },

    /// received a malformed PDU
    MalformedPdu {
        #[snafu(backtrace)]
        source: reader::Error,
    },

    #[snafu(display(
        "connection closed in the middle of a message ({} bytes received)",
        received
    ))]
    TruncatedMessage { received: usize, backtrace: Backtrace },

    /// received an inconsistent message fragment
    InvalidFragment {
        source: FragmentError,
        backtrace: Backtrace,
    },

    #[snafu(display("unexpected PDU from the peer: {}", pdu.short_description()))]
    UnexpectedPdu { pdu: Box<Pdu>, backtrace: Backtrace },

    #[snafu(display("protocol version mismatch: expected {}, got {}", expected, got))]
    ProtocolVersionMismatch {
        expected: u16,
        got: u16,
        backtrace: Backtrace,
    },

    #[snafu(display("association rejected by the peer: {}", association_rj.source))]
    Rejected {
        association_rj: AssociationRJ,
        backtrace: Backtrace,
    },

    /// no presentation contexts accepted by the peer
    NoAcceptedPresentationContexts { backtrace: Backtrace },

    #[snafu(display(
        "peer advertised a maximum PDU length of {}, below the minimum of {}",
        max_pdu_length,
        MINIMUM_PDU_SIZE
    ))]
    AcceptorMaxPduTooSmall {
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("association is not established (currently {})", state))]
    NotReady { state: State, backtrace: Backtrace },

    #[snafu(display("association aborted by the peer ({})", abort_source))]
    PeerAborted {
        abort_source: AbortRQSource,
        backtrace: Backtrace,
    },

    /// the peer requested the release of the association
    PeerReleased { backtrace: Backtrace },
}

impl Error {
    /// Whether the error was caused by data received from the peer
    /// which violates the upper layer protocol.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Error::MalformedPdu { .. }
                | Error::InvalidFragment { .. }
                | Error::UnexpectedPdu { .. }
                | Error::AcceptorMaxPduTooSmall { .. }
        )
    }

    fn abort_reason(&self) -> Option<AbortRQServiceProviderReason> {
        match self {
            Error::MalformedPdu { .. }
            | Error::InvalidFragment { .. }
            | Error::AcceptorMaxPduTooSmall { .. } => {
                Some(AbortRQServiceProviderReason::InvalidPduParameter)
            }
            Error::UnexpectedPdu { .. } => Some(AbortRQServiceProviderReason::UnexpectedPdu),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A DICOM association builder for a client node.
/// The final outcome is a [`ClientAssociation`].
///
/// This is the standard way of requesting and establishing
/// an association with another DICOM node,
/// that one usually taking the role of a service class provider (SCP).
///
/// # Example
///
/// ```no_run
/// # use irym_ul::association::client::ClientAssociationOptions;
/// # fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let association = ClientAssociationOptions::new()
///    .with_presentation_context("1.2.840.10008.1.1", vec!["1.2.840.10008.1.2.1", "1.2.840.10008.1.2"])
///    .establish("129.168.0.5:104")?;
/// # Ok(())
/// # }
/// ```
///
/// At least one presentation context must be specified,
/// using the method [`with_presentation_context`](Self::with_presentation_context)
/// and supplying both an abstract syntax and list of transfer syntaxes.
/// They are assigned the identifiers 1, 3, 5, and so on,
/// in the order given.
///
/// A helper method [`with_abstract_syntax`](Self::with_abstract_syntax) will
/// include by default the transfer syntaxes
/// _Explicit VR Little Endian_ and _Implicit VR Little Endian_
/// in the resulting presentation context.
#[derive(Clone)]
pub struct ClientAssociationOptions<'a> {
    /// the calling AE title
    calling_ae_title: Cow<'a, str>,
    /// the called AE title
    called_ae_title: Cow<'a, str>,
    /// the requested application context name
    application_context_name: Cow<'a, str>,
    /// the list of requested presentation contexts
    presentation_contexts: Vec<(Cow<'a, str>, Vec<Cow<'a, str>>)>,
    /// SCP/SCU role selection proposals
    role_selections: Vec<RoleSelection>,
    /// the expected protocol version
    protocol_version: u16,
    /// the maximum PDU length requested for receiving PDUs
    max_pdu_length: u32,
    /// whether to receive PDUs in strict mode
    strict: bool,
    /// bound on each read from the transport
    read_timeout: Option<Duration>,
    /// bound on establishing the TCP connection
    connect_timeout: Option<Duration>,
    /// receiver of lifecycle and DIMSE events
    event_sink: Arc<dyn EventSink>,
}

impl fmt::Debug for ClientAssociationOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientAssociationOptions")
            .field("calling_ae_title", &self.calling_ae_title)
            .field("called_ae_title", &self.called_ae_title)
            .field("application_context_name", &self.application_context_name)
            .field("presentation_contexts", &self.presentation_contexts)
            .field("role_selections", &self.role_selections)
            .field("protocol_version", &self.protocol_version)
            .field("max_pdu_length", &self.max_pdu_length)
            .field("strict", &self.strict)
            .field("read_timeout", &self.read_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for ClientAssociationOptions<'_> {
    fn default() -> Self {
        ClientAssociationOptions {
            calling_ae_title: "THIS-SCU".into(),
            called_ae_title: "ANY-SCP".into(),
            application_context_name: "1.2.840.10008.3.1.1.1".into(),
            presentation_contexts: Vec::new(),
            role_selections: Vec::new(),
            protocol_version: 1,
            max_pdu_length: DEFAULT_MAX_PDU,
            strict: true,
            read_timeout: None,
            connect_timeout: None,
            event_sink: Arc::new(TracingSink),
        }
    }
}

impl<'a> ClientAssociationOptions<'a> {
    /// Create a new set of options for establishing an association.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define the calling application entity title for the association,
    /// which refers to this DICOM node.
    ///
    /// The default is `THIS-SCU`.
    pub fn calling_ae_title<T>(mut self, calling_ae_title: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.calling_ae_title = calling_ae_title.into();
        self
    }

    /// Define the called application entity title for the association,
    /// which refers to the target DICOM node.
    ///
    /// The default is `ANY-SCP`.
    /// Passing an empty string resets the AE title to the default.
    pub fn called_ae_title<T>(mut self, called_ae_title: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        let cae = called_ae_title.into();
        self.called_ae_title = if cae.is_empty() { "ANY-SCP".into() } else { cae };
        self
    }

    /// Include this presentation context
    /// in the list of proposed presentation contexts.
    pub fn with_presentation_context<T>(
        mut self,
        abstract_syntax_uid: T,
        transfer_syntax_uids: Vec<T>,
    ) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        let transfer_syntaxes: Vec<Cow<'a, str>> = transfer_syntax_uids
            .into_iter()
            .map(|t| trim_uid(t.into()))
            .collect();
        self.presentation_contexts
            .push((trim_uid(abstract_syntax_uid.into()), transfer_syntaxes));
        self
    }

    /// Helper to add this abstract syntax
    /// with the default transfer syntaxes
    /// to the list of proposed presentation contexts.
    pub fn with_abstract_syntax<T>(self, abstract_syntax_uid: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        let default_transfer_syntaxes: Vec<Cow<'a, str>> =
            vec!["1.2.840.10008.1.2.1".into(), "1.2.840.10008.1.2".into()];
        self.with_presentation_context(abstract_syntax_uid.into(), default_transfer_syntaxes)
    }

    /// Propose the roles which this application entity may take
    /// for the given SOP class.
    ///
    /// Retrieving instances with C-GET requires proposing the SCP role
    /// for each storage SOP class expected in return.
    pub fn with_role_selection<T>(mut self, sop_class_uid: T, scu_role: bool, scp_role: bool) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.role_selections.push(RoleSelection {
            sop_class_uid: trim_uid(sop_class_uid.into()).into_owned(),
            scu_role,
            scp_role,
        });
        self
    }

    /// Override the maximum PDU length
    /// that this application entity will admit.
    pub fn max_pdu_length(mut self, value: u32) -> Self {
        self.max_pdu_length = value;
        self
    }

    /// Override strict mode:
    /// whether receiving PDUs must not
    /// surpass the negotiated maximum PDU length.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Bound each read from the transport to the given duration.
    /// A read which times out aborts the association.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Bound the establishment of the TCP connection to the given duration.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Report association events to the given sink
    /// instead of the default [`TracingSink`].
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Initiate the TCP connection to the given address
    /// and request a new DICOM association,
    /// negotiating the presentation contexts in the process.
    pub fn establish<A: ToSocketAddrs>(self, address: A) -> Result<ClientAssociation> {
        let ClientAssociationOptions {
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            role_selections,
            protocol_version,
            max_pdu_length,
            strict,
            read_timeout,
            connect_timeout,
            event_sink,
        } = self;

        // fail if no presentation contexts were provided: they represent intent,
        // should not be omitted by the user
        ensure!(
            !presentation_contexts.is_empty(),
            MissingAbstractSyntaxSnafu
        );
        ensure!(
            presentation_contexts.len() <= MAX_PRESENTATION_CONTEXTS,
            TooManyPresentationContextsSnafu {
                count: presentation_contexts.len()
            }
        );
        ensure!(
            (MINIMUM_PDU_SIZE..=MAXIMUM_PDU_SIZE).contains(&max_pdu_length),
            InvalidMaxPduLengthSnafu { max_pdu_length }
        );

        let presentation_contexts: Vec<_> = presentation_contexts
            .into_iter()
            .enumerate()
            .map(|(i, (abstract_syntax, transfer_syntaxes))| PresentationContextProposed {
                id: (2 * i + 1) as u8,
                abstract_syntax: abstract_syntax.into_owned(),
                transfer_syntaxes: transfer_syntaxes
                    .into_iter()
                    .map(Cow::into_owned)
                    .collect(),
            })
            .collect();

        let mut user_variables = vec![
            UserVariableItem::MaxLength(max_pdu_length),
            UserVariableItem::ImplementationClassUID(IMPLEMENTATION_CLASS_UID.to_string()),
        ];
        user_variables.extend(
            role_selections
                .into_iter()
                .map(UserVariableItem::RoleSelection),
        );
        user_variables.push(UserVariableItem::ImplementationVersionName(
            IMPLEMENTATION_VERSION_NAME.to_string(),
        ));

        let request = AssociationRQ {
            protocol_version,
            calling_ae_title: calling_ae_title.into_owned(),
            called_ae_title: called_ae_title.into_owned(),
            application_context_name: application_context_name.into_owned(),
            presentation_contexts,
            user_variables,
        };

        let socket = connect(address, connect_timeout)?;
        socket
            .set_read_timeout(read_timeout)
            .context(ConfigureSocketSnafu)?;
        socket.set_nodelay(true).context(ConfigureSocketSnafu)?;

        let mut association = ClientAssociation {
            presentation_contexts: Vec::new(),
            role_selections: Vec::new(),
            calling_ae_title: request.calling_ae_title.clone(),
            called_ae_title: request.called_ae_title.clone(),
            requestor_max_pdu_length: max_pdu_length,
            acceptor_max_pdu_length: MAXIMUM_PDU_SIZE,
            socket,
            strict,
            state: State::Idle,
            reassembler: PDataReassembler::new(),
            pending: VecDeque::new(),
            event_sink,
        };

        association.request(request)?;
        Ok(association)
    }
}

/// Connect to the first reachable socket address.
fn connect<A: ToSocketAddrs>(address: A, timeout: Option<Duration>) -> Result<TcpStream> {
    let mut last_error = None;
    for addr in address.to_socket_addrs().context(ResolveSnafu)? {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(socket) => return Ok(socket),
            Err(e) => {
                debug!("Could not connect to {}: {}", addr, e);
                last_error = Some(e);
            }
        }
    }
    match last_error {
        Some(e) => Err(e).context(ConnectSnafu),
        None => NoAddressSnafu.fail(),
    }
}

/// A handle which can abort an association from another thread,
/// by shutting down its transport.
///
/// Any wait in progress on the association is interrupted,
/// failing with a transport error,
/// after which the association is in the [`State::Aborted`] state.
#[derive(Debug)]
pub struct AbortHandle {
    socket: TcpStream,
}

impl AbortHandle {
    /// Shut down the transport of the association.
    pub fn abort(&self) -> std::io::Result<()> {
        self.socket.shutdown(Shutdown::Both)
    }
}

/// A DICOM upper level association from the perspective
/// of a requesting application entity.
///
/// The most common operations of an established association are
/// [`send_pdv`](Self::send_pdv)
/// and [`receive_pdv`](Self::receive_pdv),
/// which fragment and reassemble whole command and data set values.
///
/// Any transport failure, protocol violation, or abort from the peer
/// moves the association to the [`State::Aborted`] state,
/// after which no more messages can be exchanged.
///
/// When the value falls out of scope while still established,
/// the program will try to gracefully release the association
/// through a standard A-RELEASE message exchange,
/// then shut down the underlying TCP connection.
pub struct ClientAssociation {
    /// The presentation contexts accorded with the acceptor application entity,
    /// without the rejected ones.
    presentation_contexts: Vec<PresentationContextNegotiated>,
    /// The role selections returned by the acceptor
    role_selections: Vec<RoleSelection>,
    calling_ae_title: String,
    called_ae_title: String,
    /// The maximum PDU length that this application entity is expecting to receive
    requestor_max_pdu_length: u32,
    /// The maximum PDU length that the remote application entity accepts
    acceptor_max_pdu_length: u32,
    /// The TCP stream to the other DICOM node
    socket: TcpStream,
    /// whether to receive PDUs in strict mode
    strict: bool,
    state: State,
    /// fragments of the value currently being received
    reassembler: PDataReassembler,
    /// fragments received but not yet reassembled
    pending: VecDeque<PDataValue>,
    event_sink: Arc<dyn EventSink>,
}

impl fmt::Debug for ClientAssociation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientAssociation")
            .field("presentation_contexts", &self.presentation_contexts)
            .field("calling_ae_title", &self.calling_ae_title)
            .field("called_ae_title", &self.called_ae_title)
            .field("requestor_max_pdu_length", &self.requestor_max_pdu_length)
            .field("acceptor_max_pdu_length", &self.acceptor_max_pdu_length)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ClientAssociation {
    /// Retrieve the list of negotiated presentation contexts.
    pub fn presentation_contexts(&self) -> &[PresentationContextNegotiated] {
        &self.presentation_contexts
    }

    /// Look up an accepted presentation context by its identifier.
    pub fn presentation_context(&self, id: u8) -> Option<&PresentationContextNegotiated> {
        self.presentation_contexts.iter().find(|pc| pc.id == id)
    }

    /// Look up the first accepted presentation context
    /// for the given abstract syntax.
    pub fn presentation_context_for(
        &self,
        abstract_syntax: &str,
    ) -> Option<&PresentationContextNegotiated> {
        self.presentation_contexts
            .iter()
            .find(|pc| pc.abstract_syntax == abstract_syntax)
    }

    /// Retrieve the SCP/SCU role selections answered by the acceptor.
    pub fn role_selections(&self) -> &[RoleSelection] {
        &self.role_selections
    }

    pub fn calling_ae_title(&self) -> &str {
        &self.calling_ae_title
    }

    pub fn called_ae_title(&self) -> &str {
        &self.called_ae_title
    }

    /// Retrieve the maximum PDU length
    /// admitted by the association acceptor.
    pub fn acceptor_max_pdu_length(&self) -> u32 {
        self.acceptor_max_pdu_length
    }

    /// Retrieve the maximum PDU length
    /// that this application entity is expecting to receive.
    pub fn requestor_max_pdu_length(&self) -> u32 {
        self.requestor_max_pdu_length
    }

    /// The current lifecycle state of the association.
    pub fn state(&self) -> State {
        self.state
    }

    /// Report an event to the sink of this association.
    pub fn emit(&self, event: Event) {
        self.event_sink.on_event(&event);
    }

    /// Obtain a handle for aborting this association from another thread.
    pub fn abort_handle(&self) -> Result<AbortHandle> {
        let socket = self.socket.try_clone().context(ConfigureSocketSnafu)?;
        Ok(AbortHandle { socket })
    }

    /// Send a PDU message to the other intervenient.
    pub fn send(&mut self, msg: &Pdu) -> Result<()> {
        self.ensure_established()?;
        self.send_impl(msg)
    }

    /// Read a PDU message from the other intervenient.
    ///
    /// An A-ABORT from the peer is turned into [`Error::PeerAborted`].
    pub fn receive(&mut self) -> Result<Pdu> {
        self.ensure_established()?;
        match self.read_pdu_impl()? {
            Pdu::AbortRQ { source } => Err(self.peer_aborted(source)),
            pdu => Ok(pdu),
        }
    }

    /// Send a whole command or data set value,
    /// fragmented into as many P-Data-TF PDUs
    /// as the acceptor's maximum PDU length requires.
    pub fn send_pdv(
        &mut self,
        presentation_context_id: u8,
        value_type: PDataValueType,
        data: &[u8],
    ) -> Result<()> {
        self.ensure_established()?;
        let outcome = {
            let mut writer = PDataWriter::new(
                &mut self.socket,
                presentation_context_id,
                value_type,
                self.acceptor_max_pdu_length,
            );
            writer.write_all(data).and_then(|_| writer.finish())
        };
        outcome.map_err(|e| {
            let err = TransportSnafu.into_error(e);
            self.mark_aborted(err)
        })
    }

    /// Receive the next whole command or data set value,
    /// reassembling its fragments across P-Data-TF PDUs.
    ///
    /// A release request from the peer is confirmed,
    /// closing the association with [`Error::PeerReleased`].
    pub fn receive_pdv(&mut self) -> Result<Pdv> {
        self.ensure_established()?;
        loop {
            while let Some(fragment) = self.pending.pop_front() {
                match self.reassembler.push(fragment) {
                    Ok(Some(pdv)) => return Ok(pdv),
                    Ok(None) => {}
                    Err(e) => {
                        let err = InvalidFragmentSnafu.into_error(e);
                        return Err(self.mark_aborted(err));
                    }
                }
            }

            match self.read_pdu_impl()? {
                Pdu::PData { data } => self.pending.extend(data),
                Pdu::ReleaseRQ => {
                    self.send_impl(&Pdu::ReleaseRP)?;
                    self.close(State::Closed);
                    self.emit(Event::Released);
                    return PeerReleasedSnafu.fail();
                }
                Pdu::AbortRQ { source } => return Err(self.peer_aborted(source)),
                pdu => {
                    let err = UnexpectedPduSnafu { pdu: Box::new(pdu) }.build();
                    return Err(self.mark_aborted(err));
                }
            }
        }
    }

    /// Gracefully terminate the association by exchanging release messages
    /// and then shutting down the TCP connection.
    pub fn release(mut self) -> Result<()> {
        let out = self.release_impl();
        let _ = self.socket.shutdown(Shutdown::Both);
        out
    }

    /// Send an abort message and shut down the TCP connection,
    /// terminating the association.
    pub fn abort(mut self) -> Result<()> {
        if self.state.is_terminal() {
            return Ok(());
        }
        let out = self.send_impl(&Pdu::AbortRQ {
            source: AbortRQSource::ServiceUser,
        });
        if !self.state.is_terminal() {
            self.close(State::Aborted);
            self.emit(Event::Aborted {
                reason: "aborted by this application entity".to_string(),
            });
        }
        out
    }

    /// Send the association request and evaluate the response.
    fn request(&mut self, request: AssociationRQ) -> Result<()> {
        let peer = self
            .socket
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default();
        let protocol_version = request.protocol_version;
        let proposed = request.presentation_contexts.clone();

        self.state = State::Requesting;
        self.send_impl(&Pdu::AssociationRQ(request))?;
        self.emit(Event::Requested {
            peer,
            calling_ae_title: self.calling_ae_title.clone(),
            called_ae_title: self.called_ae_title.clone(),
        });

        let response = match read_pdu(&mut self.socket, MAXIMUM_PDU_SIZE, false) {
            Ok(pdu) => pdu,
            Err(e) => {
                let err = read_error(e, 0);
                return Err(self.mark_aborted(err));
            }
        };

        match response {
            Pdu::AssociationAC(AssociationAC {
                protocol_version: protocol_version_scp,
                presentation_contexts: results,
                user_variables,
                ..
            }) => {
                self.state = State::Negotiating;
                if protocol_version != protocol_version_scp {
                    let err = ProtocolVersionMismatchSnafu {
                        expected: protocol_version,
                        got: protocol_version_scp,
                    }
                    .build();
                    self.abort_quietly();
                    return Err(self.mark_aborted(err));
                }

                let mut acceptor_max_pdu_length = DEFAULT_MAX_PDU;
                for item in user_variables {
                    match item {
                        UserVariableItem::MaxLength(len) => acceptor_max_pdu_length = len,
                        UserVariableItem::RoleSelection(role) => self.role_selections.push(role),
                        _ => {}
                    }
                }
                // treat 0 as the maximum size admitted by the standard
                if acceptor_max_pdu_length == 0 {
                    acceptor_max_pdu_length = MAXIMUM_PDU_SIZE;
                }
                if acceptor_max_pdu_length < MINIMUM_PDU_SIZE {
                    let err = AcceptorMaxPduTooSmallSnafu {
                        max_pdu_length: acceptor_max_pdu_length,
                    }
                    .build();
                    return Err(self.mark_aborted(err));
                }
                self.acceptor_max_pdu_length = acceptor_max_pdu_length;

                for result in results {
                    if result.reason != PresentationContextResultReason::Acceptance {
                        debug!(
                            "Presentation context {} rejected: {}",
                            result.id, result.reason
                        );
                        continue;
                    }
                    let Some(proposal) = proposed.iter().find(|pc| pc.id == result.id) else {
                        warn!(
                            "Peer accepted presentation context {}, which was never proposed",
                            result.id
                        );
                        continue;
                    };
                    if !proposal.transfer_syntaxes.contains(&result.transfer_syntax) {
                        warn!(
                            "Peer accepted transfer syntax {} for presentation context {}, which was not proposed",
                            result.transfer_syntax, result.id
                        );
                    }
                    self.presentation_contexts
                        .push(PresentationContextNegotiated {
                            id: result.id,
                            abstract_syntax: proposal.abstract_syntax.clone(),
                            transfer_syntax: result.transfer_syntax,
                        });
                }

                if self.presentation_contexts.is_empty() {
                    self.abort_quietly();
                    let err = NoAcceptedPresentationContextsSnafu.build();
                    return Err(self.mark_aborted(err));
                }

                self.state = State::Established;
                self.emit(Event::Established {
                    accepted_contexts: self.presentation_contexts.len(),
                    acceptor_max_pdu_length: self.acceptor_max_pdu_length,
                });
                Ok(())
            }
            Pdu::AssociationRJ(association_rj) => {
                self.close(State::Closed);
                self.emit(Event::Rejected {
                    reason: association_rj.source.to_string(),
                });
                RejectedSnafu { association_rj }.fail()
            }
            Pdu::AbortRQ { source } => Err(self.peer_aborted(source)),
            pdu => {
                let err = UnexpectedPduSnafu { pdu: Box::new(pdu) }.build();
                Err(self.mark_aborted(err))
            }
        }
    }

    /// Release implementation function,
    /// which tries to send a release request and receive a release response.
    /// This is in a separate private function because
    /// terminating a connection should still close the connection
    /// if the exchange fails.
    fn release_impl(&mut self) -> Result<()> {
        self.ensure_established()?;
        self.state = State::Releasing;
        self.send_impl(&Pdu::ReleaseRQ)?;

        loop {
            match self.read_pdu_impl()? {
                Pdu::ReleaseRP => {
                    self.close(State::Closed);
                    self.emit(Event::Released);
                    return Ok(());
                }
                Pdu::PData { data } => {
                    debug!(
                        "Discarding {} P-Data values received while releasing",
                        data.len()
                    );
                }
                Pdu::ReleaseRQ => {
                    // release collision: confirm the peer's request and keep waiting
                    self.send_impl(&Pdu::ReleaseRP)?;
                }
                Pdu::AbortRQ { source } => return Err(self.peer_aborted(source)),
                pdu => {
                    let err = UnexpectedPduSnafu { pdu: Box::new(pdu) }.build();
                    return Err(self.mark_aborted(err));
                }
            }
        }
    }

    fn ensure_established(&self) -> Result<()> {
        ensure!(
            self.state == State::Established,
            NotReadySnafu { state: self.state }
        );
        Ok(())
    }

    fn send_impl(&mut self, msg: &Pdu) -> Result<()> {
        let bytes = encode_pdu(msg).context(EncodePduSnafu)?;
        let length = bytes.len() - PDU_HEADER_SIZE as usize;
        ensure!(
            length <= self.acceptor_max_pdu_length as usize,
            SendTooLongPduSnafu { length }
        );
        debug!("-> {}", msg.short_description());
        if let Err(e) = self.socket.write_all(&bytes) {
            let err = TransportSnafu.into_error(e);
            return Err(self.mark_aborted(err));
        }
        Ok(())
    }

    fn read_pdu_impl(&mut self) -> Result<Pdu> {
        match read_pdu(&mut self.socket, self.requestor_max_pdu_length, self.strict) {
            Ok(pdu) => {
                debug!("<- {}", pdu.short_description());
                Ok(pdu)
            }
            Err(e) => {
                let received = self.reassembler.partial_len();
                let partial = self.reassembler.is_partial() || !self.pending.is_empty();
                let err = read_error(e, if partial { received.max(1) } else { 0 });
                Err(self.mark_aborted(err))
            }
        }
    }

    fn peer_aborted(&mut self, abort_source: AbortRQSource) -> Error {
        let err = PeerAbortedSnafu { abort_source }.build();
        self.mark_aborted(err)
    }

    /// Send an A-ABORT without caring whether it reaches the peer.
    fn abort_quietly(&mut self) {
        if let Ok(bytes) = encode_pdu(&Pdu::AbortRQ {
            source: AbortRQSource::ServiceUser,
        }) {
            let _ = self.socket.write_all(&bytes);
        }
    }

    /// Move to the aborted state in reaction to the given error,
    /// notifying the peer when it sent something invalid.
    fn mark_aborted(&mut self, err: Error) -> Error {
        if self.state.is_terminal() {
            return err;
        }
        if let Some(reason) = err.abort_reason() {
            if let Ok(bytes) = encode_pdu(&Pdu::AbortRQ {
                source: AbortRQSource::ServiceProvider(reason),
            }) {
                let _ = self.socket.write_all(&bytes);
            }
        }
        self.close(State::Aborted);
        self.emit(Event::Aborted {
            reason: err.to_string(),
        });
        err
    }

    fn close(&mut self, state: State) {
        self.state = state;
        self.pending.clear();
        self.reassembler = PDataReassembler::new();
        let _ = self.socket.shutdown(Shutdown::Both);
    }
}

/// Classify a failure to read a PDU from the transport.
///
/// `received` is the number of bytes of an incomplete message
/// collected so far, if any.
fn read_error(err: reader::Error, received: usize) -> Error {
    match err {
        reader::Error::NoPduAvailable { .. } if received > 0 => {
            TruncatedMessageSnafu { received }.build()
        }
        reader::Error::NoPduAvailable { .. } => ConnectionClosedSnafu.build(),
        reader::Error::ReadPdu { source, .. } => match source.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => TimeoutSnafu.into_error(source),
            ErrorKind::UnexpectedEof => TruncatedMessageSnafu { received }.build(),
            _ => TransportSnafu.into_error(source),
        },
        e => MalformedPduSnafu.into_error(e),
    }
}

/// Automatically release the association and shut down the connection.
impl Drop for ClientAssociation {
    fn drop(&mut self) {
        if self.state == State::Established {
            warn!("Association dropped while established, releasing");
            let _ = self.release_impl();
        }
        let _ = self.socket.shutdown(Shutdown::Both);
    }
}
