//! gifplay decodes GIF89a animations into RGBA frames.
//!
//! The caller hands in the raw bytes of a GIF file and picks one of three
//! decoding modes depending on how much memory it wants to trade for CPU:
//! [`Gif`] keeps every frame decoded, [`StreamingGif`] keeps per-frame
//! index streams, and [`CompressedGif`] keeps only the compressed data and
//! decodes frames as playback reaches them.
//!
//! # Example
//!
//! ```no_run
//! let bytes = std::fs::read("<gif path>").expect("file not found");
//! match gifplay::Gif::new(&bytes) {
//!     Ok(gif) => {
//!         for i in 0..gif.frame_count() {
//!             let _rgba = gif.frame(i);
//!         }
//!     }
//!
//!     Err(e) => {
//!         eprintln!("Error: {}", e);
//!     }
//! }
//! ```
//!
//! Interlaced images, sorted color tables, and the restore-to-previous
//! disposal method are rejected with a structured error.

mod compositor;
mod parser;

use parser::{lzw, FileData, GraphicsControl, Parser};

use thiserror::Error;

/// Why a GIF could not be decoded. Offsets are byte positions in the
/// input; frame numbers count image descriptors from zero.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEof(usize),

    #[error("signature is invalid")]
    InvalidSignature,

    #[error("version {0} in the header is unsupported")]
    UnsupportedVersion(String),

    #[error("encountered unexpected block label 0x{label:02x} at offset {offset}")]
    UnexpectedLabel { label: u8, offset: usize },

    #[error("encountered extension with label 0x{label:02x}, this label is not supported")]
    UnsupportedExtensionLabel { label: u8, offset: usize },

    #[error("expected block terminator at offset {0}")]
    MissingBlockTerminator(usize),

    #[error("frame {0} is interlaced, interlaced images are not supported")]
    InterlacedImage(usize),

    #[error("frame {0} has a sorted color table, sorted color tables are not supported")]
    SortedColorTable(usize),

    #[error("frame {0} has non-zero reserved bits in its image descriptor")]
    ReservedBits(usize),

    #[error("disposal method {value} on frame {frame} is not supported")]
    UnsupportedDisposal { value: u8, frame: usize },

    #[error("encountered a second graphics control extension before an image descriptor at offset {0}")]
    DuplicateGraphicsControl(usize),

    #[error("graphics control extension was not followed by an image descriptor")]
    DanglingGraphicsControl,

    #[error("frame {0} extends outside the logical screen")]
    FrameOutsideCanvas(usize),

    #[error("frame {0} has no local color table and the file has no global color table")]
    MissingColorTable(usize),

    #[error("disposal requires a global color table but the file has none")]
    MissingGlobalColorTable,

    #[error("background color index {0} is outside the global color table")]
    BackgroundOutOfRange(u8),

    #[error("frame {frame} has an invalid lzw minimum code size {value}")]
    InvalidMinCodeSize { value: u8, frame: usize },

    #[error("got code {code}, but only {limit} codes are defined")]
    InvalidCode { code: u16, limit: usize },

    #[error("code {0} expands to more than 1024 indices")]
    CodeChainTooLong(u16),

    #[error("file contains more than 4096 frames")]
    TooManyFrames,

    #[error("frame index stream has {actual} indices, expected {expected}")]
    IndexStreamLength { expected: usize, actual: usize },

    #[error("color index {0} is outside the active color table")]
    IndexOutOfRange(u16),

    #[error("file contains no image frames")]
    NoFrames,
}

/// The frame on screen at `hundredths` centiseconds into the animation:
/// the first frame whose running delay sum strictly exceeds it.
fn select_frame(controls: &[GraphicsControl], last: usize, hundredths: u32) -> usize {
    let mut running = 0u32;
    for (i, control) in controls.iter().enumerate() {
        running += u32::from(control.delay_time);
        if hundredths < running {
            return i;
        }
    }
    last
}

/// Accumulate a playback clock and pick the frame it lands on, wrapping
/// modulo the total runtime. `None` means the current frame stands.
fn advance_clock(
    data: &FileData,
    elapsed: &mut f32,
    delta_seconds: f32,
    current: usize,
) -> Option<usize> {
    if delta_seconds <= 0.0 {
        return None;
    }
    *elapsed += delta_seconds;

    if data.total_runtime == 0 {
        return None;
    }

    let hundredths = (*elapsed * 100.0) as u32 % data.total_runtime;
    let target = select_frame(&data.controls, data.frames.len() - 1, hundredths);
    (target != current).then_some(target)
}

/// Apply the prior frame's disposal, then composite `indices` as frame
/// `target` into the canvas.
fn compose_indices(
    data: &FileData,
    target: usize,
    indices: &[u16],
    canvas: &mut [u8],
) -> Result<(), Error> {
    if target > 0 {
        compositor::dispose(
            canvas,
            &data.controls[target - 1],
            data.global_color_table.as_deref(),
            data.screen.background_color_index,
        )?;
    }

    let frame = &data.frames[target];
    compositor::composite_frame(
        canvas,
        data.screen.screen_width,
        frame,
        indices,
        data.active_table(frame),
        data.controls[target].transparent_index(),
    )
}

fn compose_compressed(
    data: &FileData,
    payloads: &[Box<[u8]>],
    target: usize,
    canvas: &mut [u8],
) -> Result<(), Error> {
    let frame = &data.frames[target];
    let indices = lzw::decode(
        &payloads[target],
        frame.color_size_exp,
        frame.lzw_min_code_size,
    )?;
    compose_indices(data, target, &indices, canvas)
}

/// Bring the canvas from the frame currently shown to `target`, replaying
/// every frame in between so skipped frames still contribute their pixels
/// and disposals. A wrapped target restarts from the retained first frame.
/// The result is byte-for-byte the canvas random access holds for
/// `target`.
fn compose_through<F>(
    current: usize,
    target: usize,
    first_frame: &[u8],
    canvas: &mut [u8],
    mut compose_one: F,
) -> Result<(), Error>
where
    F: FnMut(usize, &mut [u8]) -> Result<(), Error>,
{
    let start = if target <= current {
        canvas.copy_from_slice(first_frame);
        1
    } else {
        current + 1
    };

    for index in start..=target {
        compose_one(index, canvas)?;
    }

    Ok(())
}

/// Random-access decoder: every frame is decoded during construction and
/// kept as RGBA, so lookups are O(1) at the cost of
/// `frames * width * height * 4` bytes.
#[derive(Debug)]
pub struct Gif {
    width: u16,
    height: u16,
    frames: Vec<Box<[u8]>>,
    controls: Vec<GraphicsControl>,
    total_runtime: u32,
}

impl Gif {
    /// Decode a whole GIF file held in memory. The input buffer is not
    /// retained.
    pub fn new(bytes: &[u8]) -> Result<Gif, Error> {
        let mut frames: Vec<Box<[u8]>> = Vec::new();
        let mut canvas: Vec<u8> = Vec::new();

        let data = Parser::parse(bytes, |data, index, payload| {
            canvas.resize(data.canvas_bytes(), 0);

            let frame = &data.frames[index];
            let indices = lzw::decode(payload, frame.color_size_exp, frame.lzw_min_code_size)?;
            compose_indices(data, index, &indices, &mut canvas)?;

            frames.push(canvas.clone().into_boxed_slice());
            Ok(())
        })?;

        Ok(Gif {
            width: data.screen.screen_width,
            height: data.screen.screen_height,
            frames,
            controls: data.controls,
            total_runtime: data.total_runtime,
        })
    }

    pub fn width(&self) -> u32 {
        u32::from(self.width)
    }

    pub fn height(&self) -> u32 {
        u32::from(self.height)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// RGBA pixels of the given frame, `width * height * 4` bytes with
    /// alpha always 255.
    pub fn frame(&self, index: usize) -> Option<&[u8]> {
        self.frames.get(index).map(|frame| &frame[..])
    }

    /// RGBA pixels of the frame on screen at `seconds` into the
    /// animation. When `looping`, time wraps modulo the total runtime;
    /// otherwise it clamps to the last frame. Negative times clamp to the
    /// first frame.
    pub fn frame_at_time(&self, seconds: f32, looping: bool) -> &[u8] {
        if self.total_runtime == 0 {
            return &self.frames[0];
        }

        let centis = (seconds.max(0.0) * 100.0) as u32;
        let hundredths = if looping {
            centis % self.total_runtime
        } else {
            centis
        };

        let index = select_frame(&self.controls, self.frames.len() - 1, hundredths);
        &self.frames[index]
    }

    /// Sum of all frame delays, in seconds.
    pub fn duration_seconds(&self) -> f32 {
        self.total_runtime as f32 / 100.0
    }
}

/// Streaming decoder that keeps per-frame color index streams and
/// recomposites the canvas as playback advances. Uses
/// `frames * width * height * 2` bytes plus two RGBA canvases.
#[derive(Debug)]
pub struct StreamingGif {
    data: FileData,
    streams: Vec<Box<[u16]>>,
    first_frame: Box<[u8]>,
    current_frame: Box<[u8]>,
    current_index: usize,
    elapsed: f32,
}

impl StreamingGif {
    pub fn new(bytes: &[u8]) -> Result<StreamingGif, Error> {
        let mut streams: Vec<Box<[u16]>> = Vec::new();

        let data = Parser::parse(bytes, |data, index, payload| {
            let frame = &data.frames[index];
            let indices = lzw::decode(payload, frame.color_size_exp, frame.lzw_min_code_size)?;
            compositor::check_frame(
                &indices,
                data.active_table(frame).len(),
                data.controls[index].transparent_index(),
                frame,
            )?;
            streams.push(indices.into_boxed_slice());
            Ok(())
        })?;
        data.validate_disposal()?;

        let mut first = vec![0u8; data.canvas_bytes()];
        compose_indices(&data, 0, &streams[0], &mut first)?;
        let first_frame = first.into_boxed_slice();
        let current_frame = first_frame.clone();

        Ok(StreamingGif {
            data,
            streams,
            first_frame,
            current_frame,
            current_index: 0,
            elapsed: 0.0,
        })
    }

    pub fn width(&self) -> u32 {
        u32::from(self.data.screen.screen_width)
    }

    pub fn height(&self) -> u32 {
        u32::from(self.data.screen.screen_height)
    }

    pub fn frame_count(&self) -> usize {
        self.data.frames.len()
    }

    /// Sum of all frame delays, in seconds.
    pub fn duration_seconds(&self) -> f32 {
        self.data.total_runtime as f32 / 100.0
    }

    pub fn first_frame(&self) -> &[u8] {
        &self.first_frame
    }

    pub fn current_frame(&self) -> &[u8] {
        &self.current_frame
    }

    /// The decoded color index stream of a frame.
    pub fn index_stream(&self, index: usize) -> Option<&[u16]> {
        self.streams.get(index).map(|stream| &stream[..])
    }

    /// Advance the playback clock. Returns true when the current frame
    /// changed. Deltas of zero or less are ignored. A large delta can
    /// move the clock past intermediate frames; they are still replayed
    /// into the canvas in order, and only the final frame is reported.
    pub fn tick(&mut self, delta_seconds: f32) -> bool {
        let Some(target) =
            advance_clock(&self.data, &mut self.elapsed, delta_seconds, self.current_index)
        else {
            return false;
        };

        if compose_through(
            self.current_index,
            target,
            &self.first_frame,
            &mut self.current_frame,
            |index, canvas| compose_indices(&self.data, index, &self.streams[index], canvas),
        )
        .is_err()
        {
            return false;
        }

        self.current_index = target;
        true
    }
}

/// Streaming decoder that keeps only each frame's compressed bytes and
/// runs the full decompression pipeline again whenever playback reaches a
/// new frame. The cheapest mode in memory and the most expensive in CPU.
#[derive(Debug)]
pub struct CompressedGif {
    data: FileData,
    payloads: Vec<Box<[u8]>>,
    first_frame: Box<[u8]>,
    current_frame: Box<[u8]>,
    current_index: usize,
    elapsed: f32,
}

impl CompressedGif {
    pub fn new(bytes: &[u8]) -> Result<CompressedGif, Error> {
        let mut payloads: Vec<Box<[u8]>> = Vec::new();

        let data = Parser::parse(bytes, |_, _, payload| {
            payloads.push(payload.to_vec().into_boxed_slice());
            Ok(())
        })?;
        data.validate_disposal()?;

        // decode every frame once now so replay cannot fail later
        let mut first = vec![0u8; data.canvas_bytes()];
        for (index, payload) in payloads.iter().enumerate() {
            let frame = &data.frames[index];
            let indices = lzw::decode(payload, frame.color_size_exp, frame.lzw_min_code_size)?;
            compositor::check_frame(
                &indices,
                data.active_table(frame).len(),
                data.controls[index].transparent_index(),
                frame,
            )?;
            if index == 0 {
                compose_indices(&data, 0, &indices, &mut first)?;
            }
        }

        let first_frame = first.into_boxed_slice();
        let current_frame = first_frame.clone();

        Ok(CompressedGif {
            data,
            payloads,
            first_frame,
            current_frame,
            current_index: 0,
            elapsed: 0.0,
        })
    }

    pub fn width(&self) -> u32 {
        u32::from(self.data.screen.screen_width)
    }

    pub fn height(&self) -> u32 {
        u32::from(self.data.screen.screen_height)
    }

    pub fn frame_count(&self) -> usize {
        self.data.frames.len()
    }

    /// Sum of all frame delays, in seconds.
    pub fn duration_seconds(&self) -> f32 {
        self.data.total_runtime as f32 / 100.0
    }

    pub fn first_frame(&self) -> &[u8] {
        &self.first_frame
    }

    pub fn current_frame(&self) -> &[u8] {
        &self.current_frame
    }

    /// Advance the playback clock; see [`StreamingGif::tick`].
    pub fn tick(&mut self, delta_seconds: f32) -> bool {
        let Some(target) =
            advance_clock(&self.data, &mut self.elapsed, delta_seconds, self.current_index)
        else {
            return false;
        };

        if compose_through(
            self.current_index,
            target,
            &self.first_frame,
            &mut self.current_frame,
            |index, canvas| compose_compressed(&self.data, &self.payloads, index, canvas),
        )
        .is_err()
        {
            return false;
        }

        self.current_index = target;
        true
    }

    /// A playback cursor with its own clock and canvas. Any number of
    /// playheads can run over the same compressed data independently.
    pub fn playhead(&self) -> Playhead<'_> {
        Playhead {
            gif: self,
            canvas: self.first_frame.clone(),
            current_index: 0,
            elapsed: 0.0,
        }
    }
}

/// An independent playback position over a [`CompressedGif`]. Each
/// playhead owns one frame of RGBA and shares the compressed data with
/// every other playhead.
pub struct Playhead<'a> {
    gif: &'a CompressedGif,
    canvas: Box<[u8]>,
    current_index: usize,
    elapsed: f32,
}

impl Playhead<'_> {
    pub fn current_frame(&self) -> &[u8] {
        &self.canvas
    }

    pub fn frame_index(&self) -> usize {
        self.current_index
    }

    /// Advance this playhead's clock; see [`StreamingGif::tick`].
    pub fn tick(&mut self, delta_seconds: f32) -> bool {
        let Some(target) = advance_clock(
            &self.gif.data,
            &mut self.elapsed,
            delta_seconds,
            self.current_index,
        ) else {
            return false;
        };

        if compose_through(
            self.current_index,
            target,
            &self.gif.first_frame,
            &mut self.canvas,
            |index, canvas| compose_compressed(&self.gif.data, &self.gif.payloads, index, canvas),
        )
        .is_err()
        {
            return false;
        }

        self.current_index = target;
        true
    }
}
