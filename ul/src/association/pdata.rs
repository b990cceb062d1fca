use std::io::Write;

use snafu::{ensure, Snafu};

use crate::pdu::{PDataValue, PDataValueType, PDU_HEADER_SIZE};

/// Size of a P-Data-TF PDU header carrying a single value:
/// PDU header, item length, presentation context id, message control header.
const PDATA_HEADER_SIZE: usize = PDU_HEADER_SIZE as usize + 4 + 1 + 1;

/// Fill in the length fields and the control header
/// of the P-Data PDU held in `buffer`.
fn setup_pdata_header(buffer: &mut [u8], value_type: PDataValueType, is_last: bool) {
    let data_len = (buffer.len() - PDATA_HEADER_SIZE) as u32;

    // full PDU length (minus PDU type and reserved byte)
    let pdu_len = data_len + 4 + 2;
    buffer[2..6].copy_from_slice(&pdu_len.to_be_bytes());

    // presentation data value item length (data + 2 properties below)
    let pdv_data_len = data_len + 2;
    buffer[6..10].copy_from_slice(&pdv_data_len.to_be_bytes());

    let mut header = 0x00;
    if value_type == PDataValueType::Command {
        header |= 0x01;
    }
    if is_last {
        header |= 0x02;
    }
    buffer[11] = header;
}

/// A P-Data value writer.
///
/// Bytes written to it are sent as a single command or data set value,
/// split into as many P-Data-TF PDUs as needed
/// so that none exceeds the maximum PDU length of the receiving node.
/// Each PDU carries exactly one presentation data value.
///
/// The last fragment is emitted by [`finish`](Self::finish),
/// or when the writer is dropped.
#[must_use]
pub struct PDataWriter<W: Write> {
    buffer: Vec<u8>,
    stream: W,
    value_type: PDataValueType,
    max_data_len: usize,
    finished: bool,
}

impl<W> PDataWriter<W>
where
    W: Write,
{
    /// Construct a new P-Data value writer.
    ///
    /// `max_pdu_length` is the maximum value of the PDU-length property
    /// admitted by the receiving node.
    pub fn new(
        stream: W,
        presentation_context_id: u8,
        value_type: PDataValueType,
        max_pdu_length: u32,
    ) -> Self {
        let max_data_len = calculate_max_data_len_single(max_pdu_length) as usize;
        let mut buffer = Vec::with_capacity(max_data_len + PDATA_HEADER_SIZE);
        buffer.extend([
            // PDU-type + reserved byte
            0x04,
            0x00,
            // full PDU length, unknown at this point
            0xFF,
            0xFF,
            0xFF,
            0xFF,
            // presentation data length, unknown at this point
            0xFF,
            0xFF,
            0xFF,
            0xFF,
            presentation_context_id,
            // message control header, unknown at this point
            0xFF,
        ]);

        PDataWriter {
            buffer,
            stream,
            value_type,
            max_data_len,
            finished: false,
        }
    }

    /// Declare to have finished sending P-Data fragments,
    /// thus emitting the last P-Data fragment PDU.
    pub fn finish(mut self) -> std::io::Result<()> {
        self.finish_impl()
    }

    fn finish_impl(&mut self) -> std::io::Result<()> {
        if !self.finished {
            self.finished = true;
            setup_pdata_header(&mut self.buffer, self.value_type, true);
            self.stream.write_all(&self.buffer)?;
            self.stream.flush()?;
        }
        Ok(())
    }

    /// Send the full buffer as a non-last fragment,
    /// then keep only the header for the next one.
    fn dispatch_pdu(&mut self) -> std::io::Result<()> {
        debug_assert!(self.buffer.len() > PDATA_HEADER_SIZE);
        setup_pdata_header(&mut self.buffer, self.value_type, false);
        self.stream.write_all(&self.buffer)?;
        self.buffer.truncate(PDATA_HEADER_SIZE);
        Ok(())
    }
}

impl<W> Write for PDataWriter<W>
where
    W: Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let total_len = self.max_data_len + PDATA_HEADER_SIZE;
        // a full buffer is only sent once more data arrives,
        // so that the last fragment is never empty unless the value is
        if self.buffer.len() == total_len && !buf.is_empty() {
            self.dispatch_pdu()?;
        }
        let n = buf.len().min(total_len - self.buffer.len());
        self.buffer.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush()
    }
}

/// With the P-Data writer dropped,
/// this `Drop` implementation
/// will construct and emit the last P-Data fragment PDU
/// if it was not sent already.
impl<W> Drop for PDataWriter<W>
where
    W: Write,
{
    fn drop(&mut self) {
        let _ = self.finish_impl();
    }
}

#[inline]
fn calculate_max_data_len_single(pdu_len: u32) -> u32 {
    // data length: 4 bytes
    // context id and control header: 2 bytes
    pdu_len - 4 - 2
}

/// A fully reassembled command or data set value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdv {
    pub presentation_context_id: u8,
    pub value_type: PDataValueType,
    pub data: Vec<u8>,
}

#[derive(Debug, Snafu)]
pub enum FragmentError {
    #[snafu(display(
        "{:?} fragment on context {} interrupts the {:?} value on context {}",
        got,
        got_context,
        expected,
        expected_context
    ))]
    Interleaved {
        expected: PDataValueType,
        expected_context: u8,
        got: PDataValueType,
        got_context: u8,
    },
}

/// Reassembles presentation data value fragments into whole values.
///
/// Fragments of a value must arrive contiguously,
/// and all share the same value type and presentation context.
#[derive(Debug, Default)]
pub struct PDataReassembler {
    current: Option<Pdv>,
}

impl PDataReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether fragments of an incomplete value have been collected.
    pub fn is_partial(&self) -> bool {
        self.current.is_some()
    }

    /// Number of bytes collected for the value in progress.
    pub fn partial_len(&self) -> usize {
        self.current.as_ref().map(|pdv| pdv.data.len()).unwrap_or(0)
    }

    /// Feed the next fragment,
    /// obtaining the complete value if it was the last one.
    pub fn push(&mut self, fragment: PDataValue) -> Result<Option<Pdv>, FragmentError> {
        let PDataValue {
            presentation_context_id,
            value_type,
            is_last,
            data,
        } = fragment;

        match &mut self.current {
            Some(current) => {
                ensure!(
                    current.value_type == value_type
                        && current.presentation_context_id == presentation_context_id,
                    InterleavedSnafu {
                        expected: current.value_type,
                        expected_context: current.presentation_context_id,
                        got: value_type,
                        got_context: presentation_context_id,
                    }
                );
                current.data.extend_from_slice(&data);
            }
            None => {
                self.current = Some(Pdv {
                    presentation_context_id,
                    value_type,
                    data,
                });
            }
        }

        if is_last {
            Ok(self.current.take())
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use matches::assert_matches;

    use crate::pdu::{read_pdu, Pdu, MINIMUM_PDU_SIZE};
    use crate::pdu::{PDataValue, PDataValueType};

    use super::{FragmentError, PDataReassembler, PDataWriter};

    fn read_all_pdus(mut bytes: &[u8]) -> Vec<PDataValue> {
        let mut values = vec![];
        while !bytes.is_empty() {
            match read_pdu(&mut bytes, MINIMUM_PDU_SIZE, true).unwrap() {
                Pdu::PData { data } => {
                    assert_eq!(data.len(), 1);
                    values.extend(data);
                }
                pdu => panic!("Expected PData, got {:?}", pdu),
            }
        }
        values
    }

    #[test]
    fn test_write_pdata_and_finish() {
        let presentation_context_id = 12;

        let mut buf = Vec::new();
        {
            let mut writer = PDataWriter::new(
                &mut buf,
                presentation_context_id,
                PDataValueType::Data,
                MINIMUM_PDU_SIZE,
            );
            writer.write_all(&(0..64).collect::<Vec<u8>>()).unwrap();
            writer.finish().unwrap();
        }

        let values = read_all_pdus(&buf);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value_type, PDataValueType::Data);
        assert_eq!(values[0].presentation_context_id, presentation_context_id);
        assert!(values[0].is_last);
        assert_eq!(values[0].data, (0..64).collect::<Vec<u8>>());
    }

    #[test]
    fn test_write_large_command_and_reassemble() {
        let my_data: Vec<_> = (0..9000).map(|x: u32| x as u8).collect();

        let mut buf = Vec::new();
        {
            let mut writer =
                PDataWriter::new(&mut buf, 3, PDataValueType::Command, MINIMUM_PDU_SIZE);
            writer.write_all(&my_data).unwrap();
        }

        let values = read_all_pdus(&buf);
        assert_eq!(values.len(), 3);
        for value in &values {
            assert_eq!(value.value_type, PDataValueType::Command);
            assert_eq!(value.presentation_context_id, 3);
            assert!(value.data.len() <= (MINIMUM_PDU_SIZE - 6) as usize);
        }
        assert!(!values[0].is_last);
        assert!(!values[1].is_last);
        assert!(values[2].is_last);

        let mut reassembler = PDataReassembler::new();
        let mut out = None;
        for value in values {
            assert!(out.is_none());
            out = reassembler.push(value).unwrap();
        }
        let pdv = out.unwrap();
        assert_eq!(pdv.value_type, PDataValueType::Command);
        assert_eq!(pdv.data, my_data);
        assert!(!reassembler.is_partial());
    }

    #[test]
    fn exact_multiple_does_not_produce_empty_last_fragment() {
        let chunk = (MINIMUM_PDU_SIZE - 6) as usize;
        let my_data = vec![0x7F; chunk * 2];

        let mut buf = Vec::new();
        let mut writer = PDataWriter::new(&mut buf, 1, PDataValueType::Data, MINIMUM_PDU_SIZE);
        writer.write_all(&my_data).unwrap();
        writer.finish().unwrap();

        let values = read_all_pdus(&buf);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].data.len(), chunk);
        assert_eq!(values[1].data.len(), chunk);
        assert!(values[1].is_last);
    }

    #[test]
    fn empty_value_still_sends_last_fragment() {
        let mut buf = Vec::new();
        PDataWriter::new(&mut buf, 5, PDataValueType::Data, MINIMUM_PDU_SIZE)
            .finish()
            .unwrap();

        let values = read_all_pdus(&buf);
        assert_eq!(values.len(), 1);
        assert!(values[0].is_last);
        assert!(values[0].data.is_empty());
    }

    #[test]
    fn interleaved_fragments_are_refused() {
        let mut reassembler = PDataReassembler::new();
        let first = PDataValue {
            presentation_context_id: 1,
            value_type: PDataValueType::Command,
            is_last: false,
            data: vec![1, 2, 3],
        };
        assert_eq!(reassembler.push(first).unwrap(), None);
        assert_eq!(reassembler.partial_len(), 3);

        let intruder = PDataValue {
            presentation_context_id: 1,
            value_type: PDataValueType::Data,
            is_last: true,
            data: vec![4],
        };
        assert_matches!(
            reassembler.push(intruder),
            Err(FragmentError::Interleaved { .. })
        );
    }
}
