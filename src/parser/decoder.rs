#![allow(dead_code)]

use super::bit_reader::ByteCursor;
use super::{Color, DisposalMethod};
use crate::Error;

use log::debug;

const EXTENSION_INTRODUCER: u8 = 0x21;
const IMAGE_DESCRIPTOR_LABEL: u8 = 0x2c;
const TRAILER_LABEL: u8 = 0x3b;

// Extension labels
const APPLICATION_EXTENSION: u8 = 0xff;
const COMMENT_EXTENSION: u8 = 0xfe;
const GRAPHIC_CONTROL_EXTENSION: u8 = 0xf9;
const PLAIN_TEXT_EXTENSION: u8 = 0x21;

const MAX_FRAMES: usize = 4096;

#[derive(Debug)]
enum ExtensionType {
    Application,
    Comment,
    GraphicControl,
    PlainText,
}

impl ExtensionType {
    fn from_label(label: u8, offset: usize) -> Result<Self, Error> {
        use ExtensionType::*;

        match label {
            APPLICATION_EXTENSION => Ok(Application),
            COMMENT_EXTENSION => Ok(Comment),
            GRAPHIC_CONTROL_EXTENSION => Ok(GraphicControl),
            PLAIN_TEXT_EXTENSION => Ok(PlainText),

            _ => Err(Error::UnsupportedExtensionLabel { label, offset }),
        }
    }
}

/// Graphics control data applying to the frame that follows it. Frames
/// with no preceding graphics control extension get the default: no
/// disposal, no transparency, no delay.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GraphicsControl {
    pub(crate) disposal: DisposalMethod,
    pub(crate) transparent_color_flag: bool,
    pub(crate) transparent_color_index: u8,
    pub(crate) delay_time: u16,
}

impl Default for GraphicsControl {
    fn default() -> Self {
        Self {
            disposal: DisposalMethod::None,
            transparent_color_flag: false,
            transparent_color_index: 0,
            delay_time: 0,
        }
    }
}

impl GraphicsControl {
    pub(crate) fn transparent_index(&self) -> Option<u16> {
        self.transparent_color_flag
            .then(|| u16::from(self.transparent_color_index))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LogicalScreen {
    pub(crate) screen_width: u16,
    pub(crate) screen_height: u16,
    pub(crate) color_resolution: u8,
    pub(crate) sort_flag: bool,
    pub(crate) global_color_table_size: u8,
    pub(crate) background_color_index: u8,
}

#[derive(Debug)]
pub(crate) struct FrameHeader {
    pub(crate) left: u16,
    pub(crate) top: u16,
    pub(crate) width: u16,
    pub(crate) height: u16,
    pub(crate) local_color_table: Option<Box<[Color]>>,
    /// size exponent of the active table, local if present, else global
    pub(crate) color_size_exp: u8,
    pub(crate) lzw_min_code_size: u8,
}

impl FrameHeader {
    pub(crate) fn pixel_count(&self) -> usize {
        usize::from(self.width) * usize::from(self.height)
    }
}

/// Everything the container holds besides per-frame pixel payloads:
/// screen descriptor, global color table, frame headers, and the graphics
/// control list kept 1:1 with the frames.
#[derive(Debug, Default)]
pub(crate) struct FileData {
    pub(crate) screen: LogicalScreen,
    pub(crate) global_color_table: Option<Box<[Color]>>,
    pub(crate) frames: Vec<FrameHeader>,
    pub(crate) controls: Vec<GraphicsControl>,
    /// sum of all frame delays, in centiseconds
    pub(crate) total_runtime: u32,
}

impl FileData {
    pub(crate) fn canvas_bytes(&self) -> usize {
        usize::from(self.screen.screen_width) * usize::from(self.screen.screen_height) * 4
    }

    pub(crate) fn active_table<'a>(&'a self, frame: &'a FrameHeader) -> &'a [Color] {
        match (&frame.local_color_table, &self.global_color_table) {
            (Some(table), _) => table,
            (None, Some(table)) => table,
            (None, None) => &[],
        }
    }

    /// Confirm that every disposal the animation will replay can actually
    /// be performed, so replay itself cannot fail. The last frame's
    /// disposal is never applied.
    pub(crate) fn validate_disposal(&self) -> Result<(), Error> {
        let applied = self.controls.len().saturating_sub(1);
        for control in &self.controls[..applied] {
            if control.disposal == DisposalMethod::ClearToBackground {
                let table = self
                    .global_color_table
                    .as_deref()
                    .ok_or(Error::MissingGlobalColorTable)?;
                let index = self.screen.background_color_index;
                if usize::from(index) >= table.len() {
                    return Err(Error::BackgroundOutOfRange(index));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
enum ParserState {
    Magic,
    LogicalScreenDescriptor,
    GlobalColorTable,
    NextBlock,
    Extension(u8),
    ImageDescriptor,
    LocalColorTable(FrameHeader),
    ImageData(FrameHeader),
    Done,
}

/// Container parser. Walks the block structure of the file and hands each
/// frame's concatenated compressed payload to `on_frame`, which decides
/// what to retain.
pub(crate) struct Parser<'a, F> {
    cursor: ByteCursor<'a>,
    data: FileData,
    pending_control: Option<GraphicsControl>,
    scratch: Vec<u8>,
    on_frame: F,
}

impl<'a, F> Parser<'a, F>
where
    F: FnMut(&FileData, usize, &[u8]) -> Result<(), Error>,
{
    pub(crate) fn parse(buf: &'a [u8], on_frame: F) -> Result<FileData, Error> {
        let mut parser = Parser {
            cursor: ByteCursor::new(buf),
            data: FileData::default(),
            pending_control: None,
            scratch: Vec::new(),
            on_frame,
        };

        let mut state = ParserState::Magic;
        loop {
            debug!("begin parsing state {:?}", state);

            state = parser.process_next_state(state)?;
            if let ParserState::Done = state {
                break;
            }
        }

        if parser.pending_control.is_some() {
            return Err(Error::DanglingGraphicsControl);
        }
        if parser.data.frames.is_empty() {
            return Err(Error::NoFrames);
        }

        Ok(parser.data)
    }

    fn process_next_state(&mut self, next_state: ParserState) -> Result<ParserState, Error> {
        use ParserState::*;

        match next_state {
            Magic => {
                let signature = self.cursor.read_slice(3)?;
                if signature != b"GIF" {
                    return Err(Error::InvalidSignature);
                }

                let version = self.cursor.read_slice(3)?;
                if version != b"89a" && version != b"87a" {
                    return Err(Error::UnsupportedVersion(
                        String::from_utf8_lossy(version).into_owned(),
                    ));
                }

                Ok(LogicalScreenDescriptor)
            }
            LogicalScreenDescriptor => {
                let screen_width = self.cursor.read_u16()?;
                let screen_height = self.cursor.read_u16()?;

                let packed_fields = self.cursor.read_u8()?;
                let global_color_table_flag = packed_fields & 0b10000000 != 0;
                let color_resolution = (packed_fields >> 4) & 0b00000111;
                let sort_flag = packed_fields & 0b00001000 != 0;
                let global_color_table_size = packed_fields & 0b00000111;

                let background_color_index = self.cursor.read_u8()?;
                // the pixel aspect ratio byte carries no information we use
                self.cursor.read_u8()?;

                self.data.screen = LogicalScreen {
                    screen_width,
                    screen_height,
                    color_resolution,
                    sort_flag,
                    global_color_table_size,
                    background_color_index,
                };

                debug!("processed logical screen descriptor, got: {:#?}", self.data.screen);

                if global_color_table_flag {
                    Ok(GlobalColorTable)
                } else {
                    Ok(NextBlock)
                }
            }
            GlobalColorTable => {
                let table = self.read_color_table(self.data.screen.global_color_table_size)?;
                debug!("processed global color table with {} entries", table.len());
                self.data.global_color_table = Some(table);

                Ok(NextBlock)
            }
            NextBlock => {
                let offset = self.cursor.position();
                let introducer_or_label = self.cursor.read_u8()?;

                match introducer_or_label {
                    EXTENSION_INTRODUCER => Ok(Extension(self.cursor.read_u8()?)),
                    IMAGE_DESCRIPTOR_LABEL => Ok(ImageDescriptor),
                    TRAILER_LABEL => Ok(Done),
                    label => Err(Error::UnexpectedLabel { label, offset }),
                }
            }
            Extension(label) => {
                let offset = self.cursor.position();
                self.process_extension(ExtensionType::from_label(label, offset)?)?;
                Ok(NextBlock)
            }
            ImageDescriptor => {
                let frame_index = self.data.frames.len();
                if frame_index == MAX_FRAMES {
                    return Err(Error::TooManyFrames);
                }

                let left = self.cursor.read_u16()?;
                let top = self.cursor.read_u16()?;
                let width = self.cursor.read_u16()?;
                let height = self.cursor.read_u16()?;

                let packed_fields = self.cursor.read_u8()?;
                let local_color_table_flag = packed_fields & 0b10000000 != 0;
                let interlace_flag = packed_fields & 0b01000000 != 0;
                let sort_flag = packed_fields & 0b00100000 != 0;
                let reserved = packed_fields & 0b00011000;
                let local_color_table_size = packed_fields & 0b00000111;

                if interlace_flag {
                    return Err(Error::InterlacedImage(frame_index));
                }
                if sort_flag {
                    return Err(Error::SortedColorTable(frame_index));
                }
                if reserved != 0 {
                    return Err(Error::ReservedBits(frame_index));
                }

                let screen = &self.data.screen;
                if u32::from(left) + u32::from(width) > u32::from(screen.screen_width)
                    || u32::from(top) + u32::from(height) > u32::from(screen.screen_height)
                {
                    return Err(Error::FrameOutsideCanvas(frame_index));
                }

                if !local_color_table_flag && self.data.global_color_table.is_none() {
                    return Err(Error::MissingColorTable(frame_index));
                }

                let frame = FrameHeader {
                    left,
                    top,
                    width,
                    height,
                    local_color_table: None,
                    color_size_exp: if local_color_table_flag {
                        local_color_table_size
                    } else {
                        screen.global_color_table_size
                    },
                    lzw_min_code_size: 0,
                };

                if local_color_table_flag {
                    Ok(LocalColorTable(frame))
                } else {
                    Ok(ImageData(frame))
                }
            }
            LocalColorTable(mut frame) => {
                frame.local_color_table = Some(self.read_color_table(frame.color_size_exp)?);

                Ok(ImageData(frame))
            }
            ImageData(mut frame) => {
                let frame_index = self.data.frames.len();

                let min_code_size = self.cursor.read_u8()?;
                if min_code_size > 12 {
                    return Err(Error::InvalidMinCodeSize {
                        value: min_code_size,
                        frame: frame_index,
                    });
                }
                frame.lzw_min_code_size = min_code_size;

                self.concatenate_sub_blocks()?;

                self.data
                    .controls
                    .push(self.pending_control.take().unwrap_or_default());
                self.data.frames.push(frame);

                debug!(
                    "processed frame {} with {} compressed bytes",
                    frame_index,
                    self.scratch.len()
                );

                (self.on_frame)(&self.data, frame_index, &self.scratch)?;

                Ok(NextBlock)
            }
            Done => Ok(Done),
        }
    }

    fn process_extension(&mut self, extension: ExtensionType) -> Result<(), Error> {
        use ExtensionType::*;

        debug!("processing extension type: {:?}", extension);
        match extension {
            GraphicControl => {
                if self.pending_control.is_some() {
                    return Err(Error::DuplicateGraphicsControl(self.cursor.position()));
                }

                // block size byte, always 4 in practice; the terminator
                // check below catches files where it is not
                self.cursor.read_u8()?;

                let packed_fields = self.cursor.read_u8()?;
                let disposal_raw = (packed_fields >> 2) & 0b00000111;
                let transparent_color_flag = packed_fields & 0b00000001 != 0;

                let disposal = DisposalMethod::from_u8(disposal_raw).ok_or(
                    Error::UnsupportedDisposal {
                        value: disposal_raw,
                        frame: self.data.frames.len(),
                    },
                )?;

                let delay_time = self.cursor.read_u16()?;
                let transparent_color_index = self.cursor.read_u8()?;

                let offset = self.cursor.position();
                if self.cursor.read_u8()? != 0 {
                    return Err(Error::MissingBlockTerminator(offset));
                }

                self.data.total_runtime += u32::from(delay_time);

                let control = GraphicsControl {
                    disposal,
                    transparent_color_flag,
                    transparent_color_index,
                    delay_time,
                };
                debug!("processed graphics control: {:?}", control);
                self.pending_control = Some(control);
            }
            Application | PlainText => {
                // fixed-size part named by the block size byte, then a
                // sub-block chain; loop count and plain text are left to
                // the caller and skipped here
                let block_size = self.cursor.read_u8()?;
                self.cursor.read_slice(usize::from(block_size))?;
                self.skip_sub_blocks()?;
            }
            Comment => {
                self.skip_sub_blocks()?;
            }
        }

        Ok(())
    }

    fn read_color_table(&mut self, size_exp: u8) -> Result<Box<[Color]>, Error> {
        let entries = 1usize << (size_exp + 1);
        let bytes = self.cursor.read_slice(3 * entries)?;

        Ok(bytes
            .chunks_exact(3)
            .map(|rgb| Color(rgb[0], rgb[1], rgb[2]))
            .collect())
    }

    fn skip_sub_blocks(&mut self) -> Result<(), Error> {
        loop {
            let block_size = self.cursor.read_u8()?;
            if block_size == 0 {
                return Ok(());
            }
            self.cursor.read_slice(usize::from(block_size))?;
        }
    }

    /// Concatenate a frame's sub-block chain into the scratch buffer. The
    /// chain is scanned once for its total size first so the buffer is
    /// allocated exactly.
    fn concatenate_sub_blocks(&mut self) -> Result<(), Error> {
        let mut scan = self.cursor.clone();
        let mut total = 0usize;
        loop {
            let block_size = scan.read_u8()?;
            if block_size == 0 {
                break;
            }
            scan.read_slice(usize::from(block_size))?;
            total += usize::from(block_size);
        }

        self.scratch.clear();
        self.scratch.reserve(total);

        loop {
            let block_size = self.cursor.read_u8()?;
            if block_size == 0 {
                return Ok(());
            }
            let block = self.cursor.read_slice(usize::from(block_size))?;
            self.scratch.extend_from_slice(block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2x2 image, four-color global table, one frame, no extensions
    fn minimal_gif() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"GIF89a");
        bytes.extend_from_slice(&[2, 0, 2, 0]); // screen 2x2
        bytes.push(0b10010001); // global table, 4 entries
        bytes.extend_from_slice(&[0, 0]); // background index, aspect
        bytes.extend_from_slice(&[
            255, 0, 0, //
            0, 255, 0, //
            0, 0, 255, //
            255, 255, 255,
        ]);
        bytes.push(0x2c);
        bytes.extend_from_slice(&[0, 0, 0, 0, 2, 0, 2, 0]); // rect
        bytes.push(0); // no local table
        bytes.push(2); // lzw minimum code size
        bytes.extend_from_slice(&[3, 0x44, 0x34, 0x05, 0]); // one sub-block
        bytes.push(0x3b);
        bytes
    }

    #[test]
    fn parses_the_container() {
        let mut payloads = Vec::new();
        let data = Parser::parse(&minimal_gif(), |_, _, payload| {
            payloads.push(payload.to_vec());
            Ok(())
        })
        .unwrap();

        assert_eq!(data.screen.screen_width, 2);
        assert_eq!(data.screen.screen_height, 2);
        assert_eq!(data.global_color_table.as_ref().map(|t| t.len()), Some(4));
        assert_eq!(data.frames.len(), 1);
        assert_eq!(data.controls.len(), 1);
        assert_eq!(data.total_runtime, 0);
        assert_eq!(data.frames[0].lzw_min_code_size, 2);
        assert_eq!(payloads, vec![vec![0x44, 0x34, 0x05]]);
    }

    #[test]
    fn splits_payloads_across_sub_blocks() {
        let mut bytes = minimal_gif();
        // rewrite the single 3-byte sub-block as a 1-byte and a 2-byte one
        let at = bytes.len() - 6;
        bytes.splice(at.., [1, 0x44, 2, 0x34, 0x05, 0, 0x3b]);

        let mut payloads = Vec::new();
        Parser::parse(&bytes, |_, _, payload| {
            payloads.push(payload.to_vec());
            Ok(())
        })
        .unwrap();

        assert_eq!(payloads, vec![vec![0x44, 0x34, 0x05]]);
    }

    #[test]
    fn rejects_bad_signatures() {
        let mut bytes = minimal_gif();
        bytes[0] = b'J';
        let err = Parser::parse(&bytes, |_, _, _| Ok(())).unwrap_err();
        assert_eq!(err, Error::InvalidSignature);
    }

    #[test]
    fn rejects_unknown_block_labels() {
        let mut bytes = minimal_gif();
        let at = bytes.len() - 1;
        bytes[at] = 0x7f; // overwrite the trailer
        bytes.push(0x3b);
        let err = Parser::parse(&bytes, |_, _, _| Ok(())).unwrap_err();
        assert_eq!(
            err,
            Error::UnexpectedLabel {
                label: 0x7f,
                offset: at,
            }
        );
    }

    #[test]
    fn rejects_truncated_files() {
        let bytes = minimal_gif();
        let err = Parser::parse(&bytes[..bytes.len() - 3], |_, _, _| Ok(())).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof(_)));
    }

    #[test]
    fn rejects_graphics_control_without_a_frame() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"GIF89a");
        bytes.extend_from_slice(&[1, 0, 1, 0]);
        bytes.push(0b10000000); // global table, 2 entries
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend_from_slice(&[0, 0, 0, 1, 2, 3]);
        bytes.extend_from_slice(&[0x21, 0xf9, 4, 0, 0, 0, 0, 0]);
        bytes.push(0x3b);

        let err = Parser::parse(&bytes, |_, _, _| Ok(())).unwrap_err();
        assert_eq!(err, Error::DanglingGraphicsControl);
    }
}
