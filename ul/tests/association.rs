use irym_ul::{
    association::{
        client::{ClientAssociationOptions, Error},
        Event, RecordingSink, State,
    },
    pdu::{
        read_pdu, write_pdu, AbortRQServiceProviderReason, AbortRQSource, AssociationAC,
        AssociationRJ, AssociationRJResult, AssociationRJServiceUserReason, AssociationRJSource,
        AssociationRQ, PDataValue, PDataValueType, Pdu, PresentationContextNegotiated,
        PresentationContextResult, PresentationContextResultReason, RoleSelection,
        UserVariableItem, MAXIMUM_PDU_SIZE, MINIMUM_PDU_SIZE,
    },
};
use matches::assert_matches;
use rstest::rstest;
use std::{
    net::{SocketAddr, TcpListener, TcpStream},
    sync::Arc,
    thread::{sleep, spawn, JoinHandle},
    time::Duration,
};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync + 'static>>;

static SCU_AE_TITLE: &str = "ROTATE-SCU";
static SCP_AE_TITLE: &str = "STORE-SCP";

static IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
static EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
static STUDY_ROOT_GET: &str = "1.2.840.10008.5.1.4.1.2.2.3";
static DIGITAL_MG_STORAGE_SOP_CLASS: &str = "1.2.840.10008.5.1.4.1.1.1.2";

/// Spawn an acceptor thread which takes a single connection
/// and follows the given script on it.
fn spawn_scp<F>(script: F) -> Result<(JoinHandle<Result<()>>, SocketAddr)>
where
    F: FnOnce(TcpStream) -> Result<()> + Send + 'static,
{
    let listener = TcpListener::bind("localhost:0")?;
    let addr = listener.local_addr()?;
    let h = spawn(move || -> Result<()> {
        let (stream, _addr) = listener.accept()?;
        script(stream)
    });
    Ok((h, addr))
}

fn receive(stream: &mut TcpStream) -> Result<Pdu> {
    Ok(read_pdu(stream, MAXIMUM_PDU_SIZE, false)?)
}

fn send(stream: &mut TcpStream, pdu: &Pdu) -> Result<()> {
    write_pdu(stream, pdu)?;
    Ok(())
}

/// Read the association request and accept the first context only,
/// with its last proposed transfer syntax.
fn accept_first(stream: &mut TcpStream, max_length: u32) -> Result<AssociationRQ> {
    let rq = match receive(stream)? {
        Pdu::AssociationRQ(rq) => rq,
        pdu => return Err(format!("expected association request, got {:?}", pdu).into()),
    };
    let presentation_contexts = rq
        .presentation_contexts
        .iter()
        .enumerate()
        .map(|(i, pc)| PresentationContextResult {
            id: pc.id,
            reason: if i == 0 {
                PresentationContextResultReason::Acceptance
            } else {
                PresentationContextResultReason::AbstractSyntaxNotSupported
            },
            transfer_syntax: pc.transfer_syntaxes.last().cloned().unwrap_or_default(),
        })
        .collect();
    send(
        stream,
        &AssociationAC {
            protocol_version: rq.protocol_version,
            calling_ae_title: rq.calling_ae_title.clone(),
            called_ae_title: rq.called_ae_title.clone(),
            application_context_name: rq.application_context_name.clone(),
            presentation_contexts,
            user_variables: vec![UserVariableItem::MaxLength(max_length)],
        }
        .into(),
    )?;
    Ok(rq)
}

fn expect_release(stream: &mut TcpStream) -> Result<()> {
    assert_eq!(receive(stream)?, Pdu::ReleaseRQ);
    send(stream, &Pdu::ReleaseRP)
}

fn options<'a>() -> ClientAssociationOptions<'a> {
    ClientAssociationOptions::new()
        .calling_ae_title(SCU_AE_TITLE)
        .called_ae_title(SCP_AE_TITLE)
        .with_abstract_syntax(STUDY_ROOT_GET)
        .with_presentation_context(
            DIGITAL_MG_STORAGE_SOP_CLASS,
            vec![EXPLICIT_VR_LE, IMPLICIT_VR_LE],
        )
        .with_role_selection(DIGITAL_MG_STORAGE_SOP_CLASS, true, true)
}

/// Negotiate an association, check what was proposed, and release it.
#[test]
fn scu_scp_association_test() {
    let (scp_handle, scp_addr) = spawn_scp(|mut stream| {
        let rq = accept_first(&mut stream, MINIMUM_PDU_SIZE)?;
        assert_eq!(rq.calling_ae_title, SCU_AE_TITLE);
        assert_eq!(rq.called_ae_title, SCP_AE_TITLE);
        // presentation context identifiers are odd
        let ids: Vec<u8> = rq.presentation_contexts.iter().map(|pc| pc.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(rq
            .user_variables
            .contains(&UserVariableItem::RoleSelection(RoleSelection {
                sop_class_uid: DIGITAL_MG_STORAGE_SOP_CLASS.to_string(),
                scu_role: true,
                scp_role: true,
            })));
        expect_release(&mut stream)
    })
    .unwrap();

    let sink = Arc::new(RecordingSink::new());
    let association = options()
        .event_sink(sink.clone())
        .establish(scp_addr)
        .unwrap();

    assert_eq!(association.state(), State::Established);
    assert_eq!(
        association.presentation_contexts(),
        &[PresentationContextNegotiated {
            id: 1,
            abstract_syntax: STUDY_ROOT_GET.to_string(),
            transfer_syntax: IMPLICIT_VR_LE.to_string(),
        }]
    );
    assert_eq!(association.acceptor_max_pdu_length(), MINIMUM_PDU_SIZE);
    assert!(association.presentation_context_for(DIGITAL_MG_STORAGE_SOP_CLASS).is_none());

    association
        .release()
        .expect("did not have a peaceful release");

    scp_handle
        .join()
        .expect("SCP panicked")
        .expect("Error at the SCP");

    let events = sink.events();
    assert_eq!(events.len(), 3);
    assert_matches!(events[0], Event::Requested { .. });
    assert_matches!(events[1], Event::Established { accepted_contexts: 1, .. });
    assert_eq!(events[2], Event::Released);
}

#[test]
fn rejected_association() {
    let (scp_handle, scp_addr) = spawn_scp(|mut stream| {
        assert_matches!(receive(&mut stream)?, Pdu::AssociationRQ(_));
        send(
            &mut stream,
            &AssociationRJ {
                result: AssociationRJResult::Permanent,
                source: AssociationRJSource::ServiceUser(
                    AssociationRJServiceUserReason::CalledAETitleNotRecognized,
                ),
            }
            .into(),
        )
    })
    .unwrap();

    let sink = Arc::new(RecordingSink::new());
    let err = options()
        .event_sink(sink.clone())
        .establish(scp_addr)
        .unwrap_err();
    assert_matches!(err, Error::Rejected { .. });
    scp_handle.join().unwrap().unwrap();

    assert_eq!(
        sink.events().last(),
        Some(&Event::Rejected {
            reason: "called AE title not recognized".to_string()
        })
    );
}

#[rstest]
#[case(4)]
#[case(6)]
#[case(MINIMUM_PDU_SIZE - 1)]
fn undersized_acceptor_max_pdu_length_aborts(#[case] max_length: u32) {
    let (scp_handle, scp_addr) = spawn_scp(move |mut stream| {
        accept_first(&mut stream, max_length)?;
        assert_eq!(
            receive(&mut stream)?,
            Pdu::AbortRQ {
                source: AbortRQSource::ServiceProvider(
                    AbortRQServiceProviderReason::InvalidPduParameter
                ),
            }
        );
        Ok(())
    })
    .unwrap();

    let sink = Arc::new(RecordingSink::new());
    let err = options()
        .event_sink(sink.clone())
        .establish(scp_addr)
        .unwrap_err();
    assert_matches!(
        err,
        Error::AcceptorMaxPduTooSmall { max_pdu_length, .. } if max_pdu_length == max_length
    );
    assert!(err.is_malformed());
    scp_handle.join().unwrap().unwrap();
    assert_matches!(sink.events().last(), Some(Event::Aborted { .. }));
}

#[test]
fn values_are_fragmented_and_reassembled() {
    let outgoing: Vec<u8> = (0..10_000u32).map(|x| (x % 251) as u8).collect();
    let expected = outgoing.clone();
    let (scp_handle, scp_addr) = spawn_scp(move |mut stream| {
        accept_first(&mut stream, MINIMUM_PDU_SIZE)?;

        // collect the data set sent by the requestor
        let mut received = vec![];
        loop {
            let mut header = [0; 6];
            std::io::Read::read_exact(&mut stream, &mut header)?;
            let length = u32::from_be_bytes([header[2], header[3], header[4], header[5]]);
            assert!(length <= MINIMUM_PDU_SIZE);
            let mut body = vec![0; length as usize];
            std::io::Read::read_exact(&mut stream, &mut body)?;
            let mut pdu_bytes = header.to_vec();
            pdu_bytes.extend(body);
            match irym_ul::pdu::decode_pdu(&pdu_bytes)? {
                Pdu::PData { data } => {
                    assert_eq!(data.len(), 1);
                    assert_eq!(data[0].value_type, PDataValueType::Data);
                    received.extend_from_slice(&data[0].data);
                    if data[0].is_last {
                        break;
                    }
                }
                pdu => return Err(format!("unexpected {:?}", pdu).into()),
            }
        }
        assert_eq!(received, expected);

        // answer with a command split in three fragments over two PDUs
        let fragment = |data: &[u8], is_last| PDataValue {
            presentation_context_id: 1,
            value_type: PDataValueType::Command,
            is_last,
            data: data.to_vec(),
        };
        send(
            &mut stream,
            &Pdu::PData {
                data: vec![fragment(&[1, 2], false), fragment(&[3, 4], false)],
            },
        )?;
        send(
            &mut stream,
            &Pdu::PData {
                data: vec![fragment(&[5], true)],
            },
        )?;

        expect_release(&mut stream)
    })
    .unwrap();

    let mut association = options().establish(scp_addr).unwrap();
    association
        .send_pdv(1, PDataValueType::Data, &outgoing)
        .unwrap();
    let pdv = association.receive_pdv().unwrap();
    assert_eq!(pdv.value_type, PDataValueType::Command);
    assert_eq!(pdv.presentation_context_id, 1);
    assert_eq!(pdv.data, vec![1, 2, 3, 4, 5]);

    association.release().unwrap();
    scp_handle.join().unwrap().unwrap();
}

#[test]
fn transport_closed_mid_message_aborts() {
    let (scp_handle, scp_addr) = spawn_scp(|mut stream| {
        accept_first(&mut stream, MINIMUM_PDU_SIZE)?;
        send(
            &mut stream,
            &Pdu::PData {
                data: vec![PDataValue {
                    presentation_context_id: 1,
                    value_type: PDataValueType::Command,
                    is_last: false,
                    data: vec![0; 32],
                }],
            },
        )?;
        // connection dropped here
        Ok(())
    })
    .unwrap();

    let sink = Arc::new(RecordingSink::new());
    let mut association = options()
        .event_sink(sink.clone())
        .establish(scp_addr)
        .unwrap();
    scp_handle.join().unwrap().unwrap();

    let err = association.receive_pdv().unwrap_err();
    assert_matches!(err, Error::TruncatedMessage { received: 32, .. });
    assert_eq!(association.state(), State::Aborted);
    assert_matches!(sink.events().last(), Some(Event::Aborted { .. }));

    // no more traffic once aborted
    assert_matches!(
        association.send_pdv(1, PDataValueType::Command, &[0]),
        Err(Error::NotReady {
            state: State::Aborted,
            ..
        })
    );
}

#[test]
fn transport_closed_between_messages_aborts() {
    let (scp_handle, scp_addr) = spawn_scp(|mut stream| {
        accept_first(&mut stream, MINIMUM_PDU_SIZE)?;
        Ok(())
    })
    .unwrap();

    let mut association = options().establish(scp_addr).unwrap();
    scp_handle.join().unwrap().unwrap();

    assert_matches!(
        association.receive_pdv(),
        Err(Error::ConnectionClosed { .. })
    );
    assert_eq!(association.state(), State::Aborted);
}

#[test]
fn peer_abort_is_reported() {
    let (scp_handle, scp_addr) = spawn_scp(|mut stream| {
        accept_first(&mut stream, MINIMUM_PDU_SIZE)?;
        send(
            &mut stream,
            &Pdu::AbortRQ {
                source: AbortRQSource::ServiceUser,
            },
        )
    })
    .unwrap();

    let mut association = options().establish(scp_addr).unwrap();
    let err = association.receive_pdv().unwrap_err();
    assert_matches!(
        err,
        Error::PeerAborted {
            abort_source: AbortRQSource::ServiceUser,
            ..
        }
    );
    assert_eq!(association.state(), State::Aborted);
    scp_handle.join().unwrap().unwrap();
}

#[test]
fn abort_handle_unblocks_a_waiting_receive() {
    let (scp_handle, scp_addr) = spawn_scp(|mut stream| {
        accept_first(&mut stream, MINIMUM_PDU_SIZE)?;
        // wait for the requestor to go away
        let _ = receive(&mut stream);
        Ok(())
    })
    .unwrap();

    let mut association = options().establish(scp_addr).unwrap();
    let handle = association.abort_handle().unwrap();
    let aborter = spawn(move || {
        sleep(Duration::from_millis(100));
        handle.abort().unwrap();
    });

    let err = association.receive_pdv().unwrap_err();
    assert_matches!(
        err,
        Error::ConnectionClosed { .. } | Error::Transport { .. }
    );
    assert_eq!(association.state(), State::Aborted);
    aborter.join().unwrap();
    scp_handle.join().unwrap().unwrap();
}

#[test]
fn read_timeout_aborts() {
    let (scp_handle, scp_addr) = spawn_scp(|mut stream| {
        accept_first(&mut stream, MINIMUM_PDU_SIZE)?;
        let _ = receive(&mut stream);
        Ok(())
    })
    .unwrap();

    let mut association = options()
        .read_timeout(Duration::from_millis(200))
        .establish(scp_addr)
        .unwrap();
    assert_matches!(association.receive_pdv(), Err(Error::Timeout { .. }));
    assert_eq!(association.state(), State::Aborted);
    drop(association);
    scp_handle.join().unwrap().unwrap();
}

#[test]
fn release_discards_late_pdata_and_answers_collision() {
    let (scp_handle, scp_addr) = spawn_scp(|mut stream| {
        accept_first(&mut stream, MINIMUM_PDU_SIZE)?;
        assert_eq!(receive(&mut stream)?, Pdu::ReleaseRQ);
        // a late response, then a colliding release request
        send(
            &mut stream,
            &Pdu::PData {
                data: vec![PDataValue {
                    presentation_context_id: 1,
                    value_type: PDataValueType::Command,
                    is_last: true,
                    data: vec![0; 8],
                }],
            },
        )?;
        send(&mut stream, &Pdu::ReleaseRQ)?;
        assert_eq!(receive(&mut stream)?, Pdu::ReleaseRP);
        send(&mut stream, &Pdu::ReleaseRP)
    })
    .unwrap();

    let association = options().establish(scp_addr).unwrap();
    association.release().unwrap();
    scp_handle.join().unwrap().unwrap();
}

#[test]
fn dropping_an_established_association_releases_it() {
    let (scp_handle, scp_addr) = spawn_scp(|mut stream| {
        accept_first(&mut stream, MINIMUM_PDU_SIZE)?;
        expect_release(&mut stream)
    })
    .unwrap();

    let association = options().establish(scp_addr).unwrap();
    drop(association);
    scp_handle.join().unwrap().unwrap();
}

#[test]
fn too_many_presentation_contexts() {
    let mut options = ClientAssociationOptions::new();
    for i in 0..129 {
        options = options.with_abstract_syntax(format!("1.2.3.{}", i));
    }
    assert_matches!(
        options.establish("127.0.0.1:9"),
        Err(Error::TooManyPresentationContexts { count: 129, .. })
    );
}
