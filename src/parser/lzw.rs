use super::bit_reader::{BitReader, CodeRead, PartialCode};
use crate::Error;

const MAX_CODE_TABLE_ROWS: usize = 4096;

// reconstruction buffer bound for a single code's expansion
const MAX_CHAIN: usize = 1024;

#[derive(Debug, Clone, Copy, Default)]
struct CodeTableRow {
    byte: Option<u8>,
    prev: Option<u16>,
}

/// LZW code table with fixed capacity and an explicit populated-row count.
///
/// GIF codes never exceed 12 bits, so 4096 rows is the hard ceiling. Each
/// row past the initial self-byte range stores only its final byte and a
/// link to the previous code; decoded sequences are recovered by walking
/// the `prev` chain back to its root.
pub(crate) struct CodeTable {
    rows: Box<[CodeTableRow]>,
    len: usize,
    width: u16,
}

impl CodeTable {
    pub(crate) fn new(color_size_exp: u8, min_code_size: u8) -> Self {
        let mut table = CodeTable {
            rows: vec![CodeTableRow::default(); MAX_CODE_TABLE_ROWS].into_boxed_slice(),
            len: 0,
            width: 0,
        };
        table.reset(color_size_exp, min_code_size);
        table
    }

    fn reset(&mut self, color_size_exp: u8, min_code_size: u8) {
        let num_colors = 1usize << (color_size_exp + 1);

        self.width = u16::from(min_code_size) + 1;
        self.len = (1 << min_code_size) + 2;

        for (i, row) in self.rows.iter_mut().enumerate() {
            row.byte = if i < num_colors { Some(i as u8) } else { None };
            row.prev = None;
        }
    }

    /// First byte of the decoded sequence for `code`, found at the root of
    /// its `prev` chain.
    fn first_byte(&self, code: u16) -> Result<u8, Error> {
        let mut cursor = code;
        while let Some(prev) = self.rows[cursor as usize].prev {
            cursor = prev;
        }
        self.rows[cursor as usize].byte.ok_or(Error::InvalidCode {
            code,
            limit: self.len,
        })
    }

    fn push_row(&mut self, byte: u8, prev: u16) {
        self.rows[self.len] = CodeTableRow {
            byte: Some(byte),
            prev: Some(prev),
        };
        self.len += 1;

        // grow the code width once every slot reachable at the current
        // width is populated
        if self.len == 1 << self.width && self.width < 12 {
            self.width += 1;
        }
    }
}

/// Decompression state carried across sub-block boundaries: the partially
/// assembled code (if the previous region ended mid-code), the last code
/// emitted, and the bit position inside the current byte.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DecompressionState {
    partial: Option<PartialCode>,
    prev_code: Option<u16>,
    mask: u8,
}

impl Default for DecompressionState {
    fn default() -> Self {
        Self {
            partial: None,
            prev_code: None,
            mask: 0x01,
        }
    }
}

/// Decode one compressed region, appending color indices to `output`.
///
/// Returns the state to hand to the next region of the same frame. The
/// code table is reinitialized in place whenever a clear code is read.
pub(crate) fn decode_region(
    region: &[u8],
    color_size_exp: u8,
    min_code_size: u8,
    table: &mut CodeTable,
    state: DecompressionState,
    output: &mut Vec<u16>,
) -> Result<DecompressionState, Error> {
    let clear_code = 1u16 << min_code_size;
    let eoi_code = clear_code + 1;

    let mut reader = BitReader::new(region, state.mask);
    let mut partial = state.partial;
    let mut prev_code = state.prev_code;

    loop {
        let code = match reader.next_code(table.width, partial.take()) {
            CodeRead::Code(code) => code,
            CodeRead::Suspended(incomplete) => {
                return Ok(DecompressionState {
                    partial: Some(incomplete),
                    prev_code,
                    mask: reader.mask(),
                });
            }
        };

        if code == clear_code {
            log::debug!("clear code, reinitializing code table");
            table.reset(color_size_exp, min_code_size);
            prev_code = None;
            continue;
        }

        if code == eoi_code {
            return Ok(DecompressionState {
                partial: None,
                prev_code,
                mask: reader.mask(),
            });
        }

        if usize::from(code) > table.len || (usize::from(code) == table.len && prev_code.is_none())
        {
            return Err(Error::InvalidCode {
                code,
                limit: table.len,
            });
        }

        if let Some(prev) = prev_code {
            if table.len < MAX_CODE_TABLE_ROWS {
                // in the K-w-K case the new code names the row being built,
                // whose first byte is the previous chain's first byte
                let chain_root = if usize::from(code) == table.len {
                    prev
                } else {
                    code
                };
                let first = table.first_byte(chain_root)?;
                table.push_row(first, prev);
            }
        }

        prev_code = Some(code);

        // collect the chain back-to-front, then flip it in place
        let at = output.len();
        let mut cursor = Some(code);
        while let Some(current) = cursor {
            if output.len() - at == MAX_CHAIN {
                return Err(Error::CodeChainTooLong(code));
            }
            let row = &table.rows[current as usize];
            output.push(u16::from(row.byte.ok_or(Error::InvalidCode {
                code: current,
                limit: table.len,
            })?));
            cursor = row.prev;
        }
        output[at..].reverse();
    }
}

/// Decode a frame's whole concatenated compressed payload into its color
/// index stream.
pub(crate) fn decode(
    payload: &[u8],
    color_size_exp: u8,
    min_code_size: u8,
) -> Result<Vec<u16>, Error> {
    let mut table = CodeTable::new(color_size_exp, min_code_size);
    let mut output = Vec::new();
    decode_region(
        payload,
        color_size_exp,
        min_code_size,
        &mut table,
        DecompressionState::default(),
        &mut output,
    )?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    // clear, 0, 1, 2, 3, end-of-information at minimum code size 2; the
    // table fills to eight rows after the third data code, so the last two
    // codes are four bits wide
    const FOUR_PIXELS: &[u8] = &[0x44, 0x34, 0x05];

    #[test]
    fn decodes_each_color_once() {
        assert_eq!(decode(FOUR_PIXELS, 1, 2).unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn split_regions_decode_like_the_concatenation() {
        let expected = decode(FOUR_PIXELS, 1, 2).unwrap();

        // the second region starts in the middle of a code
        for split in 1..FOUR_PIXELS.len() {
            let (head, tail) = FOUR_PIXELS.split_at(split);
            let mut table = CodeTable::new(1, 2);
            let mut output = Vec::new();
            let state = decode_region(
                head,
                1,
                2,
                &mut table,
                DecompressionState::default(),
                &mut output,
            )
            .unwrap();
            decode_region(tail, 1, 2, &mut table, state, &mut output).unwrap();
            assert_eq!(output, expected, "split at byte {}", split);
        }
    }

    #[test]
    fn rejects_codes_past_the_table() {
        // clear followed by code 6, which names a row past the next free
        // slot of a freshly initialized table
        let region = &[0b00110100];
        let err = decode(region, 1, 2).unwrap_err();
        assert_eq!(err, Error::InvalidCode { code: 6, limit: 6 });
    }

    #[test]
    fn decodes_the_sample_image_stream() {
        // 10x10 four-color sample image
        let input = &[
            140, 45, 153, 135, 42, 28, 220, 51, 160, 2, 117, 236, 149, 250, 168, 222, 96, 140, 4,
            145, 76, 1,
        ];

        let mut expected: Vec<u16> = Vec::new();
        for &(index, run) in &[
            (1u16, 5usize),
            (2, 5),
            (1, 5),
            (2, 5),
            (1, 5),
            (2, 5),
            (1, 3),
            (0, 4),
            (2, 3),
            (1, 3),
            (0, 4),
            (2, 6),
            (0, 4),
            (1, 3),
            (2, 3),
            (0, 4),
            (1, 3),
            (2, 5),
            (1, 5),
            (2, 5),
            (1, 5),
            (2, 5),
            (1, 5),
        ] {
            expected.extend(std::iter::repeat(index).take(run));
        }

        assert_eq!(decode(input, 1, 2).unwrap(), expected);
    }

    #[test]
    fn code_width_grows_at_table_boundaries() {
        let mut table = CodeTable::new(1, 2);
        assert_eq!(table.width, 3);
        assert_eq!(table.len, 6);

        table.push_row(0, 0);
        table.push_row(0, 0);
        assert_eq!(table.len, 8);
        assert_eq!(table.width, 4);

        for _ in 0..8 {
            table.push_row(0, 0);
        }
        assert_eq!(table.width, 5);
    }
}
