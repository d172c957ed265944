//! Region capture: turn a dragged rectangle into a standalone image artifact.
//!
//! A drag is recorded in display coordinates (what the pointer reports), but
//! pixels live in raster coordinates (what pdfium produced). The two differ on
//! high-density screens and whenever the page is laid out smaller or larger
//! than its raster, so every corner is scaled by `raster / display` before
//! cropping.
//!
//! ```text
//! DragGesture (display px) ──▶ PixelRect (raster px, normalised) ──▶ Artifact (PNG, base64)
//! ```

pub mod encode;

use crate::error::ChatError;
use crate::transcript::Part;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A pointer position in display coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Size at which the raster is currently displayed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplaySize {
    pub width: f32,
    pub height: f32,
}

/// A rectangle in raster pixels with its origin at the min corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    /// Normalise two raster-space corners, whichever way the drag went, and
    /// clip the result to a `raster_w × raster_h` grid.
    pub fn from_corners(a: Point, b: Point, raster_w: u32, raster_h: u32) -> Self {
        let clip = |v: f32, max: u32| -> u32 {
            if v.is_nan() {
                0
            } else {
                v.round().clamp(0.0, max as f32) as u32
            }
        };
        let (x0, x1) = (clip(a.x, raster_w), clip(b.x, raster_w));
        let (y0, y1) = (clip(a.y, raster_h), clip(b.y, raster_h));
        Self {
            x: x0.min(x1),
            y: y0.min(y1),
            width: x0.abs_diff(x1),
            height: y0.abs_diff(y1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Scale a display-space point into raster space.
pub fn map_to_raster(p: Point, display: DisplaySize, raster_w: u32, raster_h: u32) -> Point {
    // A zero-sized display would divide by zero; treat it as 1:1.
    let sx = if display.width > 0.0 {
        raster_w as f32 / display.width
    } else {
        1.0
    };
    let sy = if display.height > 0.0 {
        raster_h as f32 / display.height
    } else {
        1.0
    };
    Point::new(p.x * sx, p.y * sy)
}

/// An in-progress pointer drag.
///
/// Exists only between pointer-down and pointer-up; [`DragGesture::finish`]
/// consumes it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragGesture {
    anchor: Point,
    current: Point,
}

impl DragGesture {
    pub fn start(anchor: Point) -> Self {
        Self {
            anchor,
            current: anchor,
        }
    }

    pub fn update(&mut self, p: Point) {
        self.current = p;
    }

    pub fn anchor(&self) -> Point {
        self.anchor
    }

    pub fn current(&self) -> Point {
        self.current
    }

    /// End the drag and produce the normalised raster rectangle.
    ///
    /// Fails with [`ChatError::EmptySelection`] when the drag covers no pixels.
    pub fn finish(
        self,
        display: DisplaySize,
        raster_w: u32,
        raster_h: u32,
    ) -> Result<PixelRect, ChatError> {
        let a = map_to_raster(self.anchor, display, raster_w, raster_h);
        let b = map_to_raster(self.current, display, raster_w, raster_h);
        let rect = PixelRect::from_corners(a, b, raster_w, raster_h);
        if rect.is_empty() {
            return Err(ChatError::EmptySelection {
                width: rect.width,
                height: rect.height,
            });
        }
        Ok(rect)
    }
}

/// A captured region, encoded and ready to attach to a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Base64 PNG payload.
    pub data: String,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    /// Where on the raster the region came from.
    pub source: PixelRect,
}

impl Artifact {
    /// Wrap an already-encoded payload (e.g. one received over HTTP).
    pub fn from_base64(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
            width: 0,
            height: 0,
            source: PixelRect::default(),
        }
    }

    /// The content part referencing this artifact.
    pub fn to_part(&self) -> Part {
        Part::Image {
            encoded_value: self.data.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

/// Crop `rect` out of `raster` and encode it as a PNG artifact.
///
/// The rectangle is clipped to the raster first; a rectangle that ends up
/// with no area fails with [`ChatError::EmptySelection`].
pub fn capture(rect: PixelRect, raster: &DynamicImage) -> Result<Artifact, ChatError> {
    let (rw, rh) = (raster.width(), raster.height());
    let x = rect.x.min(rw);
    let y = rect.y.min(rh);
    let width = rect.width.min(rw - x);
    let height = rect.height.min(rh - y);
    if width == 0 || height == 0 {
        return Err(ChatError::EmptySelection { width, height });
    }

    let region = DynamicImage::ImageRgba8(raster.crop_imm(x, y, width, height).to_rgba8());
    let data = encode::encode_png_base64(&region)
        .map_err(|e| ChatError::ImageEncode(e.to_string()))?;
    debug!("Captured {}x{} at ({}, {})", width, height, x, y);

    Ok(Artifact {
        data,
        mime_type: encode::PNG_MIME.to_string(),
        width,
        height,
        source: PixelRect {
            x,
            y,
            width,
            height,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use image::{Rgba, RgbaImage};

    fn raster(w: u32, h: u32) -> DynamicImage {
        let mut img = RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]));
        img.put_pixel(5, 5, Rgba([0, 0, 0, 255]));
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn normalises_all_four_drag_directions() {
        let corners = [
            (Point::new(10.0, 20.0), Point::new(40.0, 60.0)),
            (Point::new(40.0, 20.0), Point::new(10.0, 60.0)),
            (Point::new(10.0, 60.0), Point::new(40.0, 20.0)),
            (Point::new(40.0, 60.0), Point::new(10.0, 20.0)),
        ];
        for (a, b) in corners {
            let r = PixelRect::from_corners(a, b, 100, 100);
            assert_eq!(
                r,
                PixelRect {
                    x: 10,
                    y: 20,
                    width: 30,
                    height: 40
                },
                "drag {a:?} → {b:?}"
            );
        }
    }

    #[test]
    fn corners_are_clipped_to_raster() {
        let r = PixelRect::from_corners(Point::new(-5.0, -5.0), Point::new(500.0, 50.0), 100, 80);
        assert_eq!((r.x, r.y, r.width, r.height), (0, 0, 100, 50));
    }

    #[test]
    fn display_to_raster_uses_size_ratio() {
        // 2x device pixel ratio: a 400 px wide canvas shown at 200 CSS px
        let display = DisplaySize {
            width: 200.0,
            height: 100.0,
        };
        let mut drag = DragGesture::start(Point::new(50.0, 25.0));
        drag.update(Point::new(10.0, 5.0));
        let rect = drag.finish(display, 400, 200).unwrap();
        assert_eq!(
            rect,
            PixelRect {
                x: 20,
                y: 10,
                width: 80,
                height: 40
            }
        );
    }

    #[test]
    fn zero_area_drag_is_rejected() {
        let display = DisplaySize {
            width: 100.0,
            height: 100.0,
        };
        let drag = DragGesture::start(Point::new(30.0, 30.0));
        assert!(matches!(
            drag.finish(display, 100, 100),
            Err(ChatError::EmptySelection { .. })
        ));

        let mut flat = DragGesture::start(Point::new(30.0, 30.0));
        flat.update(Point::new(80.0, 30.0));
        assert!(matches!(
            flat.finish(display, 100, 100),
            Err(ChatError::EmptySelection { height: 0, .. })
        ));
    }

    #[test]
    fn capture_crops_and_encodes() {
        let img = raster(50, 40);
        let rect = PixelRect {
            x: 0,
            y: 0,
            width: 10,
            height: 8,
        };
        let artifact = capture(rect, &img).unwrap();
        assert_eq!((artifact.width, artifact.height), (10, 8));
        assert_eq!(artifact.mime_type, "image/png");

        let bytes = STANDARD.decode(&artifact.data).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (10, 8));
        assert_eq!(decoded.to_rgba8().get_pixel(5, 5), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn capture_zero_width_fails() {
        let img = raster(20, 20);
        let rect = PixelRect {
            x: 3,
            y: 3,
            width: 0,
            height: 5,
        };
        assert!(matches!(
            capture(rect, &img),
            Err(ChatError::EmptySelection { .. })
        ));
    }

    #[test]
    fn capture_outside_raster_fails() {
        let img = raster(20, 20);
        let rect = PixelRect {
            x: 30,
            y: 0,
            width: 5,
            height: 5,
        };
        assert!(capture(rect, &img).is_err());
    }

    #[test]
    fn capture_is_clipped_at_raster_edge() {
        let img = raster(20, 20);
        let rect = PixelRect {
            x: 15,
            y: 15,
            width: 10,
            height: 10,
        };
        let a = capture(rect, &img).unwrap();
        assert_eq!((a.width, a.height), (5, 5));
    }
}
