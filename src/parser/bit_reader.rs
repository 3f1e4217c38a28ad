use crate::Error;

/// Byte-level cursor over a GIF file buffer.
///
/// All multi-byte numeric fields in a GIF are ordered with the least
/// significant byte first.
#[derive(Debug, Clone)]
pub(crate) struct ByteCursor<'a> {
    buf: &'a [u8],
    position: usize,
}

impl<'a> ByteCursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, position: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.position
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, Error> {
        let byte = *self
            .buf
            .get(self.position)
            .ok_or(Error::UnexpectedEof(self.position))?;
        self.position += 1;
        Ok(byte)
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, Error> {
        let bytes = self.read_slice(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn read_slice(&mut self, count: usize) -> Result<&'a [u8], Error> {
        let end = self.position + count;
        let slice = self
            .buf
            .get(self.position..end)
            .ok_or(Error::UnexpectedEof(self.buf.len()))?;
        self.position = end;
        Ok(slice)
    }
}

/// A code whose bits were only partially collected before the current
/// input region ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PartialCode {
    pub(crate) code: u16,
    pub(crate) bits: u16,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CodeRead {
    Code(u16),
    /// The region ended before (or exactly as) the code completed; feed
    /// the partial back in on the next region to resume.
    Suspended(PartialCode),
}

/// Variable-width code reader over one compressed region.
///
/// Bits are packed into bytes LSB-first and codes are assembled LSB-first
/// across byte boundaries. The byte-internal bit mask survives region
/// boundaries so that a code split across two sub-blocks resumes at the
/// exact bit it stopped at.
pub(crate) struct BitReader<'a> {
    buf: &'a [u8],
    position: usize,
    mask: u8,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(buf: &'a [u8], mask: u8) -> Self {
        Self {
            buf,
            position: 0,
            mask,
        }
    }

    pub(crate) fn mask(&self) -> u8 {
        self.mask
    }

    /// Assemble a code of `width` bits, continuing from `resume` if the
    /// previous region suspended mid-code.
    pub(crate) fn next_code(&mut self, width: u16, resume: Option<PartialCode>) -> CodeRead {
        let (mut code, start) = match resume {
            Some(partial) => (partial.code, partial.bits),
            None => (0, 0),
        };

        for i in start..width {
            if self.position >= self.buf.len() {
                return CodeRead::Suspended(PartialCode { code, bits: i });
            }

            let bit = u16::from(self.buf[self.position] & self.mask != 0);
            self.mask = self.mask.wrapping_shl(1);
            if self.mask == 0 {
                self.mask = 0x01;
                self.position += 1;
            }

            code |= bit << i;

            if self.position == self.buf.len() {
                return CodeRead::Suspended(PartialCode { code, bits: i + 1 });
            }
        }

        CodeRead::Code(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_reads_little_endian_fields() {
        let buf = &[0x47, 0x49, 0x46, 0x0a, 0x00, 0xff];
        let mut cursor = ByteCursor::new(buf);

        assert_eq!(cursor.read_slice(3).unwrap(), b"GIF");
        assert_eq!(cursor.read_u16().unwrap(), 10);
        assert_eq!(cursor.read_u8().unwrap(), 0xff);
        assert_eq!(cursor.position(), 6);
        assert_eq!(cursor.read_u8(), Err(Error::UnexpectedEof(6)));
    }

    #[test]
    fn reads_codes_lsb_first() {
        let buffer = &[0b10000100, 0b10001111, 0b10101001];
        let mut reader = BitReader::new(buffer, 0x01);

        assert_eq!(reader.next_code(3, None), CodeRead::Code(0b100));
        assert_eq!(reader.next_code(3, None), CodeRead::Code(0b000));
        assert_eq!(reader.next_code(3, None), CodeRead::Code(0b110));
        assert_eq!(reader.next_code(3, None), CodeRead::Code(0b111));
        assert_eq!(reader.next_code(5, None), CodeRead::Code(0b11000));
        assert_eq!(reader.next_code(4, None), CodeRead::Code(0b0100));
    }

    #[test]
    fn suspends_mid_code_and_resumes() {
        // 5-bit code 0b10110 split as 2 bits in the first region and 3 in
        // the second.
        let mut reader = BitReader::new(&[0b10000110], 0x01);
        assert_eq!(reader.next_code(3, None), CodeRead::Code(0b110));
        assert_eq!(reader.next_code(3, None), CodeRead::Code(0b000));
        let partial = match reader.next_code(5, None) {
            CodeRead::Suspended(partial) => partial,
            other => panic!("expected suspension, got {:?}", other),
        };
        assert_eq!(partial, PartialCode { code: 0b10, bits: 2 });
        assert_eq!(reader.mask(), 0x01);

        let mut reader = BitReader::new(&[0b00000101], reader.mask());
        assert_eq!(reader.next_code(5, Some(partial)), CodeRead::Code(0b10110));
    }

    #[test]
    fn code_completing_on_the_last_bit_suspends_complete() {
        let mut reader = BitReader::new(&[0b00000101], 0x01);
        match reader.next_code(8, None) {
            CodeRead::Suspended(partial) => {
                assert_eq!(partial, PartialCode { code: 0b101, bits: 8 });
                // the resumed read completes without consuming anything
                let mut next = BitReader::new(&[0xff], reader.mask());
                assert_eq!(next.next_code(8, Some(partial)), CodeRead::Code(0b101));
            }
            other => panic!("expected suspension, got {:?}", other),
        }
    }
}
