//! Software rasterization of polygon geometry onto an RGBA canvas.
//!
//! World coordinates are mapped to pixels with a uniform affine transform and
//! the Y axis flipped (raster origin is top-left, world origin bottom-left).
//! Fills use an even-odd scanline walk sampled at pixel centers; outlines use
//! Bresenham segments between consecutive vertices. Colors are blended
//! source-over so overlapping semi-transparent geometry darkens naturally.

use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, Rgba, RgbaImage};

/// Affine map from a world bbox to pixel space.
#[derive(Clone, Copy, Debug)]
pub struct WorldToPixel {
    min_x: f64,
    min_y: f64,
    scale_x: f64,
    scale_y: f64,
    height: u32,
}

impl WorldToPixel {
    /// `bbox` is `[min_x, min_y, max_x, max_y]` in world units.
    pub fn new(bbox: [f64; 4], width: u32, height: u32) -> Self {
        WorldToPixel {
            min_x: bbox[0],
            min_y: bbox[1],
            scale_x: f64::from(width) / (bbox[2] - bbox[0]),
            scale_y: f64::from(height) / (bbox[3] - bbox[1]),
            height,
        }
    }

    pub fn apply(&self, world_x: f64, world_y: f64) -> (f64, f64) {
        let px = (world_x - self.min_x) * self.scale_x;
        let py = f64::from(self.height) - (world_y - self.min_y) * self.scale_y;
        (px, py)
    }
}

pub struct Canvas {
    width: u32,
    height: u32,
    img: RgbaImage,
}

impl Canvas {
    /// Fully transparent canvas of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Canvas {
            width,
            height,
            img: RgbaImage::new(width, height),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        *self.img.get_pixel(x, y)
    }

    /// Fills the closed polygon described by `points` (pixel space) using
    /// even-odd scanline coverage. Degenerate inputs with fewer than three
    /// vertices paint nothing.
    pub fn fill_polygon(&mut self, points: &[(f64, f64)], color: Rgba<u8>) {
        if points.len() < 3 {
            return;
        }

        let mut crossings: Vec<f64> = Vec::new();
        for row in 0..self.height {
            let scan_y = f64::from(row) + 0.5;
            crossings.clear();
            for i in 0..points.len() {
                let (x0, y0) = points[i];
                let (x1, y1) = points[(i + 1) % points.len()];
                if (y0 <= scan_y && y1 > scan_y) || (y1 <= scan_y && y0 > scan_y) {
                    let t = (scan_y - y0) / (y1 - y0);
                    crossings.push(x0 + t * (x1 - x0));
                }
            }
            crossings.sort_by(|a, b| a.total_cmp(b));

            for pair in crossings.chunks_exact(2) {
                // Pixels whose center x+0.5 lies inside [pair[0], pair[1]).
                let start = (pair[0] - 0.5).ceil().max(0.0) as i64;
                let end = ((pair[1] - 0.5).ceil() as i64 - 1).min(i64::from(self.width) - 1);
                for col in start..=end {
                    self.blend_pixel(col as u32, row, color);
                }
            }
        }
    }

    /// Strokes the closed polygon outline with 1-px Bresenham segments.
    pub fn stroke_polygon(&mut self, points: &[(f64, f64)], color: Rgba<u8>) {
        if points.len() < 2 {
            return;
        }
        for i in 0..points.len() {
            let (x0, y0) = points[i];
            let (x1, y1) = points[(i + 1) % points.len()];
            self.line(
                x0.round() as i64,
                y0.round() as i64,
                x1.round() as i64,
                y1.round() as i64,
                color,
            );
        }
    }

    fn line(&mut self, mut x0: i64, mut y0: i64, x1: i64, y1: i64, color: Rgba<u8>) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            if x0 >= 0 && y0 >= 0 && x0 < i64::from(self.width) && y0 < i64::from(self.height)
            {
                self.blend_pixel(x0 as u32, y0 as u32, color);
            }
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    /// Source-over alpha composite of `color` onto the pixel.
    fn blend_pixel(&mut self, x: u32, y: u32, color: Rgba<u8>) {
        let dst = self.img.get_pixel_mut(x, y);
        let sa = f64::from(color[3]) / 255.0;
        let da = f64::from(dst[3]) / 255.0;
        let out_a = sa + da * (1.0 - sa);
        if out_a <= 0.0 {
            *dst = Rgba([0, 0, 0, 0]);
            return;
        }
        for c in 0..3 {
            let sc = f64::from(color[c]);
            let dc = f64::from(dst[c]);
            dst[c] = ((sc * sa + dc * da * (1.0 - sa)) / out_a).round() as u8;
        }
        dst[3] = (out_a * 255.0).round() as u8;
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut out = Vec::new();
        PngEncoder::new(&mut out).write_image(
            self.img.as_raw(),
            self.width,
            self.height,
            ColorType::Rgba8,
        )?;
        Ok(out)
    }
}

/// Fully transparent PNG of the given size. Encoding a blank canvas cannot
/// reasonably fail; if it somehow does, zero bytes are returned so the
/// serving path stays error-free.
pub fn empty_png(width: u32, height: u32) -> Vec<u8> {
    Canvas::new(width, height).encode_png().unwrap_or_default()
}
