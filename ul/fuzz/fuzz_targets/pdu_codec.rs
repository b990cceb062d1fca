#![no_main]
use std::error::Error;

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (u32, bool, &[u8])| {
    let (maxlen, strict, data) = data;
    let _ = fuzz_stream(maxlen, strict, data);
    let _ = fuzz_whole(data);
});

/// Arbitrary bytes over a stream must either decode or fail cleanly,
/// and whatever decodes must survive a second pass.
fn fuzz_stream(maxlen: u32, strict: bool, mut data: &[u8]) -> Result<(), Box<dyn Error>> {
    let pdu = irym_ul::pdu::read_pdu(&mut data, maxlen, strict)?;

    let mut bytes = Vec::new();
    irym_ul::pdu::write_pdu(&mut bytes, &pdu)?;

    let pdu2 = irym_ul::pdu::read_pdu(&mut bytes.as_slice(), maxlen, strict)
        .expect("encoded PDU should always decode");
    assert_eq!(pdu, pdu2, "PDU should be equal after encoding and decoding");

    Ok(())
}

fn fuzz_whole(data: &[u8]) -> Result<(), Box<dyn Error>> {
    let pdu = irym_ul::pdu::decode_pdu(data)?;
    let bytes = irym_ul::pdu::encode_pdu(&pdu)?;
    let pdu2 = irym_ul::pdu::decode_pdu(&bytes).expect("encoded PDU should always decode");
    assert_eq!(pdu, pdu2, "PDU should be equal after encoding and decoding");
    Ok(())
}
