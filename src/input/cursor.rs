//! Cursor images and animated cursor presentation
//!
//! The backend owns the pixel buffers; this module only tracks which frame
//! of which cursor is on screen and when the next frame is due.

use crate::error::{PlatformError, Result};
use crate::geometry::{PixelPoint, PixelSize};
use std::rc::Rc;
use std::time::Duration;

/// Standard cursor shapes a toolkit can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorShape {
    Arrow,
    IBeam,
    Wait,
    Cross,
    UpArrow,
    SizeWestEast,
    SizeNorthSouth,
    SizeAll,
    No,
    Hand,
    AppStarting,
    Help,
    TopSide,
    BottomSide,
    LeftSide,
    RightSide,
    TopLeftCorner,
    TopRightCorner,
    BottomLeftCorner,
    BottomRightCorner,
    DragMove,
    DragCopy,
    DragLink,
}

impl CursorShape {
    /// XCursor names to try, most specific first
    pub fn theme_names(self) -> &'static [&'static str] {
        match self {
            CursorShape::Arrow => &["default", "left_ptr"],
            CursorShape::IBeam => &["text", "xterm"],
            CursorShape::Wait => &["wait", "watch"],
            CursorShape::Cross => &["crosshair", "cross"],
            CursorShape::UpArrow => &["up-arrow", "center_ptr"],
            CursorShape::SizeWestEast => &["ew-resize", "sb_h_double_arrow"],
            CursorShape::SizeNorthSouth => &["ns-resize", "sb_v_double_arrow"],
            CursorShape::SizeAll => &["all-scroll", "fleur"],
            CursorShape::No => &["not-allowed", "crossed_circle"],
            CursorShape::Hand => &["pointer", "hand2"],
            CursorShape::AppStarting => &["progress", "left_ptr_watch"],
            CursorShape::Help => &["help", "question_arrow"],
            CursorShape::TopSide => &["n-resize", "top_side"],
            CursorShape::BottomSide => &["s-resize", "bottom_side"],
            CursorShape::LeftSide => &["w-resize", "left_side"],
            CursorShape::RightSide => &["e-resize", "right_side"],
            CursorShape::TopLeftCorner => &["nw-resize", "top_left_corner"],
            CursorShape::TopRightCorner => &["ne-resize", "top_right_corner"],
            CursorShape::BottomLeftCorner => &["sw-resize", "bottom_left_corner"],
            CursorShape::BottomRightCorner => &["se-resize", "bottom_right_corner"],
            CursorShape::DragMove => &["move", "dnd-move"],
            CursorShape::DragCopy => &["copy", "dnd-copy"],
            CursorShape::DragLink => &["alias", "dnd-link"],
        }
    }
}

/// Backend-assigned key of an attached pixel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorBuffer(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorImage {
    pub buffer: CursorBuffer,
    pub size: PixelSize,
    pub hotspot: PixelPoint,
    /// Display time of this frame; zero for still cursors
    pub delay: Duration,
}

/// A loaded cursor: one image, or several for an animation
#[derive(Debug, PartialEq, Eq)]
pub struct Cursor {
    images: Vec<CursorImage>,
}

impl Cursor {
    pub fn new(images: Vec<CursorImage>) -> Result<Rc<Self>> {
        if images.is_empty() {
            return Err(PlatformError::unavailable("cursor", "no images"));
        }
        Ok(Rc::new(Self { images }))
    }

    pub fn images(&self) -> &[CursorImage] {
        &self.images
    }

    pub fn is_animated(&self) -> bool {
        self.images.len() > 1
    }
}

/// What the caller must do to the cursor surface and animation timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorCommand {
    Show(CursorImage),
    /// Replace the animation timer with one ticking at this interval
    Arm(Duration),
    Disarm,
}

const MIN_FRAME_DELAY: Duration = Duration::from_millis(1);

fn frame_delay(image: &CursorImage) -> Duration {
    image.delay.max(MIN_FRAME_DELAY)
}

#[derive(Debug, Default)]
pub struct CursorPresenter {
    current: Option<Rc<Cursor>>,
    frame: usize,
}

impl CursorPresenter {
    pub fn current(&self) -> Option<&Rc<Cursor>> {
        self.current.as_ref()
    }

    /// The frame currently on screen
    pub fn current_image(&self) -> Option<CursorImage> {
        self.current
            .as_ref()
            .and_then(|cursor| cursor.images.get(self.frame))
            .copied()
    }

    /// Switches to `cursor`; setting the cursor already shown is a no-op
    pub fn set(&mut self, cursor: Rc<Cursor>) -> Vec<CursorCommand> {
        if self
            .current
            .as_ref()
            .is_some_and(|current| Rc::ptr_eq(current, &cursor))
        {
            return Vec::new();
        }

        let first = cursor.images[0];
        let mut commands = vec![CursorCommand::Disarm, CursorCommand::Show(first)];
        if cursor.is_animated() {
            commands.push(CursorCommand::Arm(frame_delay(&first)));
        }
        self.current = Some(cursor);
        self.frame = 0;
        commands
    }

    /// Advances an animated cursor by one frame
    pub fn tick(&mut self) -> Vec<CursorCommand> {
        let Some(cursor) = self.current.as_ref() else {
            return vec![CursorCommand::Disarm];
        };
        if !cursor.is_animated() {
            return vec![CursorCommand::Disarm];
        }

        let previous = cursor.images[self.frame];
        self.frame = (self.frame + 1) % cursor.images.len();
        let next = cursor.images[self.frame];

        let mut commands = vec![CursorCommand::Show(next)];
        if frame_delay(&previous) != frame_delay(&next) {
            commands.push(CursorCommand::Arm(frame_delay(&next)));
        }
        commands
    }

    pub fn clear(&mut self) -> Vec<CursorCommand> {
        self.current = None;
        self.frame = 0;
        vec![CursorCommand::Disarm]
    }
}

/// A decoded bitmap cursor in `wl_shm` ARGB8888 layout (premultiplied, little endian)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmapPixels {
    pub size: PixelSize,
    pub data: Vec<u8>,
}

impl BitmapPixels {
    pub fn stride(&self) -> u32 {
        self.size.width * 4
    }
}

fn premultiply(channel: u8, alpha: u8) -> u8 {
    ((channel as u16 * alpha as u16 + 127) / 255) as u8
}

/// Decodes PNG bytes into shared-memory cursor pixels
pub fn decode_png_cursor(bytes: &[u8]) -> Result<BitmapPixels> {
    let mut decoder = png::Decoder::new(bytes);
    decoder.set_transformations(png::Transformations::normalize_to_color8());
    let mut reader = decoder
        .read_info()
        .map_err(|err| PlatformError::unavailable("cursor bitmap", err))?;
    let mut buffer = vec![0; reader.output_buffer_size()];
    let info = reader
        .next_frame(&mut buffer)
        .map_err(|err| PlatformError::unavailable("cursor bitmap", err))?;

    let size = PixelSize::new(info.width, info.height);
    if size.is_empty() {
        return Err(PlatformError::unavailable("cursor bitmap", "empty image"));
    }

    let channels = match info.color_type {
        png::ColorType::Grayscale => 1,
        png::ColorType::GrayscaleAlpha => 2,
        png::ColorType::Rgb => 3,
        png::ColorType::Rgba => 4,
        png::ColorType::Indexed => {
            return Err(PlatformError::unavailable("cursor bitmap", "unexpanded palette"))
        }
    };

    let mut data = Vec::with_capacity(size.width as usize * size.height as usize * 4);
    for row in buffer[..info.buffer_size()].chunks(info.line_size) {
        for pixel in row.chunks_exact(channels).take(size.width as usize) {
            let (r, g, b, a) = match *pixel {
                [l] => (l, l, l, 255),
                [l, a] => (l, l, l, a),
                [r, g, b] => (r, g, b, 255),
                [r, g, b, a] => (r, g, b, a),
                _ => continue,
            };
            data.extend_from_slice(&[premultiply(b, a), premultiply(g, a), premultiply(r, a), a]);
        }
    }

    Ok(BitmapPixels { size, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(buffer: u64, delay_ms: u64) -> CursorImage {
        CursorImage {
            buffer: CursorBuffer(buffer),
            size: PixelSize::new(24, 24),
            hotspot: PixelPoint::new(4, 4),
            delay: Duration::from_millis(delay_ms),
        }
    }

    #[test]
    fn test_still_cursor_shown_once() {
        let mut presenter = CursorPresenter::default();
        let arrow = Cursor::new(vec![image(1, 0)]).unwrap();

        assert_eq!(
            presenter.set(arrow.clone()),
            vec![CursorCommand::Disarm, CursorCommand::Show(image(1, 0))]
        );
        assert!(presenter.set(arrow).is_empty());
    }

    #[test]
    fn test_animation_rearms_only_when_delay_changes() {
        let mut presenter = CursorPresenter::default();
        let spinner = Cursor::new(vec![image(1, 30), image(2, 30), image(3, 60)]).unwrap();

        let commands = presenter.set(spinner);
        assert_eq!(commands.last(), Some(&CursorCommand::Arm(Duration::from_millis(30))));

        assert_eq!(presenter.tick(), vec![CursorCommand::Show(image(2, 30))]);
        assert_eq!(
            presenter.tick(),
            vec![
                CursorCommand::Show(image(3, 60)),
                CursorCommand::Arm(Duration::from_millis(60))
            ]
        );
        // Wraps around to the first frame
        assert_eq!(
            presenter.tick(),
            vec![
                CursorCommand::Show(image(1, 30)),
                CursorCommand::Arm(Duration::from_millis(30))
            ]
        );
    }

    #[test]
    fn test_empty_cursor_rejected() {
        assert!(Cursor::new(Vec::new()).is_err());
    }

    #[test]
    fn test_png_decoded_to_premultiplied_argb() {
        let mut encoded = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut encoded, 2, 1);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer
                .write_image_data(&[255, 0, 0, 255, 0, 0, 255, 128])
                .unwrap();
        }

        let pixels = decode_png_cursor(&encoded).unwrap();
        assert_eq!(pixels.size, PixelSize::new(2, 1));
        assert_eq!(pixels.stride(), 8);
        assert_eq!(pixels.data, vec![0, 0, 255, 255, 128, 0, 0, 128]);
    }

    #[test]
    fn test_garbage_png_is_unavailable() {
        let err = decode_png_cursor(b"not a png").unwrap_err();
        assert!(matches!(err, PlatformError::Unavailable { .. }));
    }
}
