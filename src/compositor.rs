//! Applies decoded index streams to the RGBA canvas under the GIF
//! frame-disposal model.

use crate::parser::{Color, DisposalMethod, FrameHeader, GraphicsControl};
use crate::Error;

/// Write a frame's index stream into the canvas at its sub-rectangle.
///
/// Pixels whose index equals the transparent index are left untouched so
/// the prior frame shows through; everything else gets the table color at
/// full alpha.
pub(crate) fn composite_frame(
    canvas: &mut [u8],
    canvas_width: u16,
    frame: &FrameHeader,
    indices: &[u16],
    table: &[Color],
    transparent: Option<u16>,
) -> Result<(), Error> {
    if indices.len() != frame.pixel_count() {
        return Err(Error::IndexStreamLength {
            expected: frame.pixel_count(),
            actual: indices.len(),
        });
    }

    let stride = usize::from(canvas_width);
    let mut next = 0;

    for y in usize::from(frame.top)..usize::from(frame.top) + usize::from(frame.height) {
        for x in usize::from(frame.left)..usize::from(frame.left) + usize::from(frame.width) {
            let index = indices[next];
            next += 1;

            if transparent == Some(index) {
                continue;
            }

            let Color(r, g, b) = *table
                .get(usize::from(index))
                .ok_or(Error::IndexOutOfRange(index))?;
            let at = (y * stride + x) * 4;
            canvas[at..at + 4].copy_from_slice(&[r, g, b, 255]);
        }
    }

    Ok(())
}

/// Prepare the canvas for the next frame according to the prior frame's
/// disposal method.
pub(crate) fn dispose(
    canvas: &mut [u8],
    prior: &GraphicsControl,
    global_table: Option<&[Color]>,
    background_index: u8,
) -> Result<(), Error> {
    match prior.disposal {
        DisposalMethod::None | DisposalMethod::Keep => Ok(()),
        DisposalMethod::ClearToBackground => {
            let table = global_table.ok_or(Error::MissingGlobalColorTable)?;
            let color = *table
                .get(usize::from(background_index))
                .ok_or(Error::BackgroundOutOfRange(background_index))?;
            fill(canvas, color);
            Ok(())
        }
    }
}

fn fill(canvas: &mut [u8], color: Color) {
    let Color(r, g, b) = color;
    for pixel in canvas.chunks_exact_mut(4) {
        pixel.copy_from_slice(&[r, g, b, 255]);
    }
}

/// Construction-time validation that a retained index stream can be
/// replayed without failing: right length, every non-transparent index
/// inside the active table.
pub(crate) fn check_frame(
    indices: &[u16],
    table_len: usize,
    transparent: Option<u16>,
    frame: &FrameHeader,
) -> Result<(), Error> {
    if indices.len() != frame.pixel_count() {
        return Err(Error::IndexStreamLength {
            expected: frame.pixel_count(),
            actual: indices.len(),
        });
    }

    for &index in indices {
        if transparent != Some(index) && usize::from(index) >= table_len {
            return Err(Error::IndexOutOfRange(index));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(left: u16, top: u16, width: u16, height: u16) -> FrameHeader {
        FrameHeader {
            left,
            top,
            width,
            height,
            local_color_table: None,
            color_size_exp: 0,
            lzw_min_code_size: 2,
        }
    }

    const TABLE: &[Color] = &[Color(10, 20, 30), Color(40, 50, 60)];

    #[test]
    fn writes_the_sub_rectangle_with_canvas_stride() {
        let mut canvas = vec![0u8; 3 * 2 * 4];
        composite_frame(&mut canvas, 3, &frame(1, 1, 2, 1), &[0, 1], TABLE, None).unwrap();

        let mut expected = vec![0u8; 3 * 2 * 4];
        expected[16..20].copy_from_slice(&[10, 20, 30, 255]);
        expected[20..24].copy_from_slice(&[40, 50, 60, 255]);
        assert_eq!(canvas, expected);
    }

    #[test]
    fn transparent_indices_leave_pixels_alone() {
        let mut canvas = vec![7u8; 4];
        composite_frame(&mut canvas, 1, &frame(0, 0, 1, 1), &[1], TABLE, Some(1)).unwrap();
        assert_eq!(canvas, vec![7u8; 4]);
    }

    #[test]
    fn rejects_indices_outside_the_table() {
        let mut canvas = vec![0u8; 4];
        let err =
            composite_frame(&mut canvas, 1, &frame(0, 0, 1, 1), &[5], TABLE, None).unwrap_err();
        assert_eq!(err, Error::IndexOutOfRange(5));
    }

    #[test]
    fn background_disposal_fills_the_whole_canvas() {
        let mut canvas = vec![0u8; 2 * 4];
        let prior = GraphicsControl {
            disposal: DisposalMethod::ClearToBackground,
            ..GraphicsControl::default()
        };
        dispose(&mut canvas, &prior, Some(TABLE), 1).unwrap();
        assert_eq!(canvas, [40, 50, 60, 255, 40, 50, 60, 255]);
    }

    #[test]
    fn keep_disposal_is_a_no_op() {
        let mut canvas = vec![9u8; 8];
        let prior = GraphicsControl {
            disposal: DisposalMethod::Keep,
            ..GraphicsControl::default()
        };
        dispose(&mut canvas, &prior, Some(TABLE), 0).unwrap();
        assert_eq!(canvas, vec![9u8; 8]);
    }
}
