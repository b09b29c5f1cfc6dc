//! Software compositing over BGRA textures.
//!
//! Every operation is a pure function of its inputs. Scaling is
//! nearest-neighbour; blending uses straight alpha.

use crate::models::error::CaptureError;
use crate::models::frame::{Texture, BYTES_PER_PIXEL};
use crate::models::geometry::{Anchor, Point, Rect, Rotation, Size, StretchMode};

/// A resized texture and where it lands inside its destination rectangle.
#[derive(Debug, Clone)]
pub struct Placed {
    pub texture: Texture,
    pub rect: Rect,
}

/// Stateless compositing pipeline shared by workers and the orchestrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextureCompositor;

impl TextureCompositor {
    /// Size of the visible content when `native` is fitted into `target`.
    ///
    /// `None` clips to the target, `Uniform` letterboxes, and `Fill` and
    /// `UniformToFill` cover the whole target.
    pub fn content_size(native: Size, target: Size, stretch: StretchMode) -> Size {
        if native.is_empty() || target.is_empty() {
            return Size::default();
        }
        match stretch {
            StretchMode::None => Size::new(native.width.min(target.width), native.height.min(target.height)),
            StretchMode::Fill | StretchMode::UniformToFill => target,
            StretchMode::Uniform => {
                let (nw, nh) = (native.width as u64, native.height as u64);
                let (tw, th) = (target.width as u64, target.height as u64);
                if nw * th >= tw * nh {
                    // wider than target: full width, letterbox top and bottom
                    let h = ((nh * tw + nw / 2) / nw).clamp(1, th);
                    Size::new(target.width, h as u32)
                } else {
                    let w = ((nw * th + nh / 2) / nh).clamp(1, tw);
                    Size::new(w as u32, target.height)
                }
            }
        }
    }

    /// Fit `frame` into `target` and return only the content.
    ///
    /// The result has `content_size(frame, target, stretch)` dimensions; the
    /// caller positions it with `anchored_position`.
    pub fn resize(&self, frame: &Texture, target: Size, stretch: StretchMode) -> Texture {
        let native = frame.size();
        let content = Self::content_size(native, target, stretch);
        if content.is_empty() {
            return Texture::new(Size::default());
        }
        match stretch {
            StretchMode::None => {
                if content == native {
                    return frame.clone();
                }
                copy_region(frame, Rect::from_origin_size(Point::default(), content))
            }
            StretchMode::Fill | StretchMode::Uniform => scale_nearest(frame, content),
            StretchMode::UniformToFill => scale_to_cover(frame, content),
        }
    }

    /// Cut `rect` out of `frame`. The rectangle is clipped to the frame first.
    pub fn crop(&self, frame: &Texture, rect: Rect) -> Result<Texture, CaptureError> {
        let clipped = rect
            .intersect(&frame.bounds())
            .ok_or_else(|| CaptureError::ConfigurationFailed(format!("crop {:?} is outside the frame", rect)))?;
        if clipped == frame.bounds() {
            return Ok(frame.clone());
        }
        Ok(copy_region(frame, clipped))
    }

    /// Rotate clockwise by `rotation`. 90 and 270 degrees swap the axes.
    pub fn rotate(&self, frame: &Texture, rotation: Rotation) -> Texture {
        if rotation == Rotation::None {
            return frame.clone();
        }
        let size = frame.size();
        let mut out = Texture::new(rotation.apply_to_size(size));
        for y in 0..size.height {
            for x in 0..size.width {
                let to = Self::rotate_point(Point::new(x as i32, y as i32), size, rotation);
                let src = frame.index(x, y);
                let dst = out.index(to.x as u32, to.y as u32);
                let (src_px, dst_data) = (&frame.data()[src..src + BYTES_PER_PIXEL], out.data_mut());
                dst_data[dst..dst + BYTES_PER_PIXEL].copy_from_slice(src_px);
            }
        }
        out
    }

    /// Where pixel `point` of a `size` frame ends up after `rotate`.
    pub fn rotate_point(point: Point, size: Size, rotation: Rotation) -> Point {
        let (w, h) = (size.width as i32, size.height as i32);
        match rotation {
            Rotation::None => point,
            Rotation::Rotate90 => Point::new(h - 1 - point.y, point.x),
            Rotation::Rotate180 => Point::new(w - 1 - point.x, h - 1 - point.y),
            Rotation::Rotate270 => Point::new(point.y, w - 1 - point.x),
        }
    }

    /// Alpha-blend `frame` into `canvas` with its top-left at `dest`'s origin.
    ///
    /// Drawing is clipped to `dest`, the canvas, and the frame itself; no
    /// scaling happens here.
    pub fn draw_into(&self, canvas: &mut Texture, frame: &Texture, dest: Rect) {
        let drawn = Rect::from_origin_size(dest.origin(), frame.size());
        let Some(area) = drawn.intersect(&dest).and_then(|r| r.intersect(&canvas.bounds())) else {
            return;
        };
        let row_bytes = area.width() as usize * BYTES_PER_PIXEL;
        for y in area.top..area.bottom {
            let src = frame.index((area.left - dest.left) as u32, (y - dest.top) as u32);
            let dst = canvas.index(area.left as u32, y as u32);
            let src_row = &frame.data()[src..src + row_bytes];
            let dst_row = &mut canvas.data_mut()[dst..dst + row_bytes];
            if src_row.iter().skip(3).step_by(BYTES_PER_PIXEL).all(|&a| a == 255) {
                dst_row.copy_from_slice(src_row);
                continue;
            }
            for (d, s) in dst_row
                .chunks_exact_mut(BYTES_PER_PIXEL)
                .zip(src_row.chunks_exact(BYTES_PER_PIXEL))
            {
                blend_pixel(d, [s[0], s[1], s[2], s[3]]);
            }
        }
    }

    /// Resize `frame` for `dest` and anchor the content inside it.
    pub fn place(&self, frame: &Texture, dest: Rect, stretch: StretchMode, anchor: Anchor) -> Placed {
        let texture = self.resize(frame, dest.size(), stretch);
        let origin = anchored_position(dest, texture.size(), anchor);
        let rect = Rect::from_origin_size(origin, texture.size());
        Placed { texture, rect }
    }
}

/// Top-left position that aligns `content` inside `parent` at `anchor`.
///
/// Content larger than the parent yields positions outside it; callers clip.
pub fn anchored_position(parent: Rect, content: Size, anchor: Anchor) -> Point {
    let (w, h) = (content.width as i32, content.height as i32);
    match anchor {
        Anchor::TopLeft => Point::new(parent.left, parent.top),
        Anchor::TopRight => Point::new(parent.right - w, parent.top),
        Anchor::Center => Point::new(
            parent.left + (parent.width() as i32 - w) / 2,
            parent.top + (parent.height() as i32 - h) / 2,
        ),
        Anchor::BottomLeft => Point::new(parent.left, parent.bottom - h),
        Anchor::BottomRight => Point::new(parent.right - w, parent.bottom - h),
    }
}

fn blend_pixel(dst: &mut [u8], src: [u8; 4]) {
    let alpha = src[3] as u32;
    if alpha == 255 {
        dst.copy_from_slice(&src);
        return;
    }
    if alpha == 0 {
        return;
    }
    let inv = 255 - alpha;
    for c in 0..3 {
        dst[c] = ((src[c] as u32 * alpha + dst[c] as u32 * inv + 127) / 255) as u8;
    }
    dst[3] = (alpha + (dst[3] as u32 * inv + 127) / 255).min(255) as u8;
}

fn copy_region(frame: &Texture, region: Rect) -> Texture {
    let mut out = Texture::new(region.size());
    let row_bytes = region.width() as usize * BYTES_PER_PIXEL;
    for row in 0..region.height() {
        let src = frame.index(region.left as u32, region.top as u32 + row);
        let dst = out.index(0, row);
        out.data_mut()[dst..dst + row_bytes].copy_from_slice(&frame.data()[src..src + row_bytes]);
    }
    out
}

fn scale_nearest(frame: &Texture, target: Size) -> Texture {
    if frame.size() == target {
        return frame.clone();
    }
    let (sw, sh) = (frame.width() as u64, frame.height() as u64);
    let (tw, th) = (target.width as u64, target.height as u64);
    let mut out = Texture::new(target);
    for y in 0..th {
        let sy = (y * sh / th) as u32;
        for x in 0..tw {
            let sx = (x * sw / tw) as u32;
            let src = frame.index(sx, sy);
            let dst = out.index(x as u32, y as u32);
            let px: [u8; 4] = [
                frame.data()[src],
                frame.data()[src + 1],
                frame.data()[src + 2],
                frame.data()[src + 3],
            ];
            out.data_mut()[dst..dst + BYTES_PER_PIXEL].copy_from_slice(&px);
        }
    }
    out
}

/// Scale to cover `target` keeping aspect, cropping the overflow evenly on both sides.
fn scale_to_cover(frame: &Texture, target: Size) -> Texture {
    let (sw, sh) = (frame.width() as f64, frame.height() as f64);
    let (tw, th) = (target.width as f64, target.height as f64);
    let scale = (tw / sw).max(th / sh);
    let crop_x = (sw * scale - tw) / 2.0;
    let crop_y = (sh * scale - th) / 2.0;

    let mut out = Texture::new(target);
    for y in 0..target.height {
        let sy = (((y as f64 + crop_y) / scale) as u32).min(frame.height() - 1);
        for x in 0..target.width {
            let sx = (((x as f64 + crop_x) / scale) as u32).min(frame.width() - 1);
            let src = frame.index(sx, sy);
            let dst = out.index(x, y);
            let px: [u8; 4] = [
                frame.data()[src],
                frame.data()[src + 1],
                frame.data()[src + 2],
                frame.data()[src + 3],
            ];
            out.data_mut()[dst..dst + BYTES_PER_PIXEL].copy_from_slice(&px);
        }
    }
    out
}
