use irym_ul::pdu::{
    decode_pdu, encode_pdu, read_pdu, write_pdu, AbortRQServiceProviderReason, AbortRQSource,
    AssociationAC, AssociationRJ, AssociationRJResult, AssociationRJServiceUserReason,
    AssociationRJSource, AssociationRQ, PDataValue, PDataValueType, Pdu,
    PresentationContextProposed, PresentationContextResult, PresentationContextResultReason,
    RoleSelection, UserVariableItem, DEFAULT_MAX_PDU, MAXIMUM_PDU_SIZE,
};
use matches::assert_matches;
use rstest::rstest;

fn association_rq() -> Pdu {
    AssociationRQ {
        protocol_version: 1,
        calling_ae_title: "ROTATE-SCU".to_string(),
        called_ae_title: "ANY-SCP".to_string(),
        application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
        presentation_contexts: vec![
            PresentationContextProposed {
                id: 1,
                abstract_syntax: "1.2.840.10008.5.1.4.1.2.2.3".to_string(),
                transfer_syntaxes: vec![
                    "1.2.840.10008.1.2.1".to_string(),
                    "1.2.840.10008.1.2".to_string(),
                ],
            },
            PresentationContextProposed {
                id: 3,
                abstract_syntax: "1.2.840.10008.5.1.4.1.1.1.2".to_string(),
                transfer_syntaxes: vec!["1.2.840.10008.1.2".to_string()],
            },
        ],
        user_variables: vec![
            UserVariableItem::MaxLength(DEFAULT_MAX_PDU),
            UserVariableItem::ImplementationClassUID("2.25.1234".to_string()),
            UserVariableItem::RoleSelection(RoleSelection {
                sop_class_uid: "1.2.840.10008.5.1.4.1.1.1.2".to_string(),
                scu_role: true,
                scp_role: true,
            }),
            UserVariableItem::ImplementationVersionName("IRYM 0.1.0".to_string()),
            // asynchronous operations window, not interpreted
            UserVariableItem::Unknown(0x53, vec![0, 1, 0, 1]),
        ],
    }
    .into()
}

fn association_ac() -> Pdu {
    AssociationAC {
        protocol_version: 1,
        calling_ae_title: "ROTATE-SCU".to_string(),
        called_ae_title: "ANY-SCP".to_string(),
        application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
        presentation_contexts: vec![
            PresentationContextResult {
                id: 1,
                reason: PresentationContextResultReason::Acceptance,
                transfer_syntax: "1.2.840.10008.1.2".to_string(),
            },
            PresentationContextResult {
                id: 3,
                reason: PresentationContextResultReason::AbstractSyntaxNotSupported,
                transfer_syntax: "1.2.840.10008.1.2".to_string(),
            },
        ],
        user_variables: vec![
            UserVariableItem::MaxLength(0),
            UserVariableItem::RoleSelection(RoleSelection {
                sop_class_uid: "1.2.840.10008.5.1.4.1.1.1.2".to_string(),
                scu_role: false,
                scp_role: true,
            }),
        ],
    }
    .into()
}

fn association_rj() -> Pdu {
    AssociationRJ {
        result: AssociationRJResult::Permanent,
        source: AssociationRJSource::ServiceUser(
            AssociationRJServiceUserReason::CalledAETitleNotRecognized,
        ),
    }
    .into()
}

fn pdata() -> Pdu {
    Pdu::PData {
        data: vec![
            PDataValue {
                presentation_context_id: 1,
                value_type: PDataValueType::Command,
                is_last: true,
                data: vec![0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00],
            },
            PDataValue {
                presentation_context_id: 1,
                value_type: PDataValueType::Data,
                is_last: false,
                data: (0..=255).collect(),
            },
        ],
    }
}

/// decode(encode(pdu)) == pdu, for every kind of PDU
#[rstest]
#[case::associate_rq(association_rq())]
#[case::associate_ac(association_ac())]
#[case::associate_rj(association_rj())]
#[case::pdata(pdata())]
#[case::empty_pdata(Pdu::PData { data: vec![] })]
#[case::release_rq(Pdu::ReleaseRQ)]
#[case::release_rp(Pdu::ReleaseRP)]
#[case::abort_user(Pdu::AbortRQ { source: AbortRQSource::ServiceUser })]
#[case::abort_provider(Pdu::AbortRQ {
    source: AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::UnrecognizedPduParameter),
})]
#[case::unknown(Pdu::Unknown { pdu_type: 0x7F, data: vec![1, 2, 3, 4] })]
fn decode_encode_roundtrip(#[case] pdu: Pdu) {
    let bytes = encode_pdu(&pdu).unwrap();
    let declared = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
    assert_eq!(declared as usize, bytes.len() - 6);

    assert_eq!(decode_pdu(&bytes).unwrap(), pdu);

    // the stream-based reader agrees with the in-memory decoder
    let mut stream = bytes.as_slice();
    assert_eq!(read_pdu(&mut stream, MAXIMUM_PDU_SIZE, true).unwrap(), pdu);
    assert!(stream.is_empty());
}

#[test]
fn consecutive_pdus_on_one_stream() {
    let mut bytes = vec![];
    write_pdu(&mut bytes, &association_rq()).unwrap();
    write_pdu(&mut bytes, &pdata()).unwrap();
    write_pdu(&mut bytes, &Pdu::ReleaseRQ).unwrap();

    let mut stream = bytes.as_slice();
    assert_matches!(
        read_pdu(&mut stream, DEFAULT_MAX_PDU, true),
        Ok(Pdu::AssociationRQ(_))
    );
    assert_matches!(
        read_pdu(&mut stream, DEFAULT_MAX_PDU, true),
        Ok(Pdu::PData { .. })
    );
    assert_matches!(
        read_pdu(&mut stream, DEFAULT_MAX_PDU, true),
        Ok(Pdu::ReleaseRQ)
    );
    assert!(stream.is_empty());
}

#[test]
fn ae_titles_are_padded_to_sixteen_bytes() {
    let bytes = encode_pdu(&association_rq()).unwrap();
    // called AE title comes first, at offset 10
    assert_eq!(&bytes[10..26], b"ANY-SCP         ");
    assert_eq!(&bytes[26..42], b"ROTATE-SCU      ");
}

#[rstest]
#[case::truncated_body(6)]
#[case::truncated_item(40)]
#[case::one_byte_short(1)]
fn truncated_association_request_is_malformed(#[case] cut: usize) {
    let bytes = encode_pdu(&association_rq()).unwrap();
    let err = decode_pdu(&bytes[..bytes.len() - cut]).unwrap_err();
    assert!(err.is_malformed(), "{:?}", err);
}

#[test]
fn item_length_exceeding_pdu_is_malformed() {
    let mut bytes = encode_pdu(&association_rq()).unwrap();
    // inflate the application context item length (first item, at offset 74)
    assert_eq!(bytes[74], 0x10);
    bytes[76] = 0x7F;
    let err = decode_pdu(&bytes).unwrap_err();
    assert!(err.is_malformed(), "{:?}", err);
}
