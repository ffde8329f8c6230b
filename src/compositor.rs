// ============================================================================
// COMPOSITOR: render a layer-stack snapshot into the square bake raster
// ============================================================================
//
// Draw order: opaque background, base image, visible layers bottom-to-top,
// then the optional guide overlay. The job owns everything it reads, so it
// can run on any thread while the live stack keeps changing.

use std::io::Cursor;
use std::sync::Arc;

use egui::{Pos2, Vec2};
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, Rgba, RgbaImage, imageops};
use rayon::prelude::*;

use crate::error::EncodeError;

/// One layer as captured at bake start.
#[derive(Clone, Debug)]
pub struct LayerPlacement {
    pub image: Arc<RgbaImage>,
    pub position: Pos2,
    pub rotation: f32,
    pub scale: Vec2,
}

/// Immutable snapshot of everything one bake needs.
#[derive(Clone, Debug)]
pub struct BakeJob {
    pub generation: u64,
    /// Side of the square output in pixels.
    pub size: u32,
    pub background: Rgba<u8>,
    pub base: Option<Arc<RgbaImage>>,
    pub layers: Vec<LayerPlacement>,
    pub guide: Option<Arc<RgbaImage>>,
    /// Visible layers left out because their image was not ready.
    pub skipped: usize,
}

/// Encoded result of a successful bake.
#[derive(Clone, Debug)]
pub struct BakedImage {
    pub generation: u64,
    pub width: u32,
    pub height: u32,
    /// PNG bytes.
    pub encoded: Arc<[u8]>,
}

/// Render the job's raster without encoding it.
pub fn render(job: &BakeJob) -> RgbaImage {
    let size = job.size;
    let mut canvas = RgbaImage::from_pixel(size, size, opaque(job.background));
    if size == 0 {
        return canvas;
    }

    if let Some(base) = &job.base {
        if base.dimensions() == (size, size) {
            draw_over(&mut canvas, base);
        } else {
            let fitted = imageops::resize(&**base, size, size, imageops::FilterType::Triangle);
            draw_over(&mut canvas, &fitted);
        }
    }

    for placement in &job.layers {
        draw_layer(&mut canvas, placement);
    }

    if let Some(guide) = &job.guide {
        if guide.dimensions() == (size, size) {
            draw_over(&mut canvas, guide);
        } else {
            let fitted = imageops::resize(&**guide, size, size, imageops::FilterType::Triangle);
            draw_over(&mut canvas, &fitted);
        }
    }

    canvas
}

/// Encode an RGBA raster as PNG.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, EncodeError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(EncodeError::Empty);
    }
    let mut out = Cursor::new(Vec::new());
    PngEncoder::new(&mut out).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgba8,
    )?;
    Ok(out.into_inner())
}

/// Render and encode. Safe to call on a background thread.
pub fn bake(job: &BakeJob) -> Result<BakedImage, EncodeError> {
    let raster = render(job);
    let encoded = encode_png(&raster)?;
    Ok(BakedImage {
        generation: job.generation,
        width: raster.width(),
        height: raster.height(),
        encoded: Arc::from(encoded),
    })
}

fn opaque(mut c: Rgba<u8>) -> Rgba<u8> {
    c[3] = 255;
    c
}

/// Source-over blend of straight-alpha pixels.
#[inline]
pub fn blend_over(base: Rgba<u8>, top: Rgba<u8>) -> Rgba<u8> {
    if top[3] == 0 {
        return base;
    }
    if top[3] == 255 {
        return top;
    }
    let ta = top[3] as f32 / 255.0;
    let ba = base[3] as f32 / 255.0;
    let out_a = ta + ba * (1.0 - ta);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let mut out = [0u8; 4];
    for c in 0..3 {
        let tc = top[c] as f32 / 255.0;
        let bc = base[c] as f32 / 255.0;
        let v = (tc * ta + bc * ba * (1.0 - ta)) / out_a;
        out[c] = (v * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba(out)
}

/// Blend a same-sized image over the canvas.
fn draw_over(canvas: &mut RgbaImage, top: &RgbaImage) {
    let row_bytes = canvas.width() as usize * 4;
    let top_raw = top.as_raw();
    let raw: &mut [u8] = &mut **canvas;
    raw.par_chunks_mut(row_bytes)
        .enumerate()
        .for_each(|(y, row)| {
            let src_row = &top_raw[y * row_bytes..(y + 1) * row_bytes];
            for (dst, src) in row.chunks_exact_mut(4).zip(src_row.chunks_exact(4)) {
                let out = blend_over(
                    Rgba([dst[0], dst[1], dst[2], dst[3]]),
                    Rgba([src[0], src[1], src[2], src[3]]),
                );
                dst.copy_from_slice(&out.0);
            }
        });
}

/// Map a layer-local point into canvas space: scale, rotate, then translate.
fn local_to_canvas(p: &LayerPlacement, x: f32, y: f32) -> (f32, f32) {
    let (s, c) = p.rotation.sin_cos();
    let lx = x * p.scale.x;
    let ly = y * p.scale.y;
    (
        p.position.x + lx * c - ly * s,
        p.position.y + lx * s + ly * c,
    )
}

/// Draw one transformed layer with inverse mapping + bilinear sampling.
fn draw_layer(canvas: &mut RgbaImage, p: &LayerPlacement) {
    let src: &RgbaImage = &p.image;
    let (src_w, src_h) = src.dimensions();
    if src_w == 0 || src_h == 0 || p.scale.x.abs() < 1e-6 || p.scale.y.abs() < 1e-6 {
        return;
    }
    let (cw, ch) = canvas.dimensions();

    // Canvas-space bounding box of the transformed quad.
    let corners = [
        local_to_canvas(p, 0.0, 0.0),
        local_to_canvas(p, src_w as f32, 0.0),
        local_to_canvas(p, 0.0, src_h as f32),
        local_to_canvas(p, src_w as f32, src_h as f32),
    ];
    let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min);
    let max_x = corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max);
    let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min);
    let max_y = corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max);
    if max_x < 0.0 || max_y < 0.0 || min_x >= cw as f32 || min_y >= ch as f32 {
        return;
    }
    let x0 = min_x.floor().max(0.0) as usize;
    let x1 = (max_x.ceil().max(0.0) as usize).min(cw as usize);
    let y0 = min_y.floor().max(0.0) as usize;
    let y1 = (max_y.ceil().max(0.0) as usize).min(ch as usize);
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    let (sin, cos) = p.rotation.sin_cos();
    let inv_sx = 1.0 / p.scale.x;
    let inv_sy = 1.0 / p.scale.y;
    let row_bytes = cw as usize * 4;

    let raw: &mut [u8] = &mut **canvas;
    raw[y0 * row_bytes..y1 * row_bytes]
        .par_chunks_mut(row_bytes)
        .enumerate()
        .for_each(|(ry, row)| {
            let py = (y0 + ry) as f32 + 0.5 - p.position.y;
            for x in x0..x1 {
                let px = x as f32 + 0.5 - p.position.x;
                // Inverse rotation, then inverse scale; -0.5 back to texel centres.
                let lx = (px * cos + py * sin) * inv_sx - 0.5;
                let ly = (-px * sin + py * cos) * inv_sy - 0.5;
                if lx < -1.0 || ly < -1.0 || lx > src_w as f32 || ly > src_h as f32 {
                    continue;
                }
                let top = bilinear_sample(src, lx, ly);
                if top[3] == 0 {
                    continue;
                }
                let i = x * 4;
                let base = Rgba([row[i], row[i + 1], row[i + 2], row[i + 3]]);
                row[i..i + 4].copy_from_slice(&blend_over(base, top).0);
            }
        });
}

/// Bilinear sample with transparent black outside the image.
fn bilinear_sample(img: &RgbaImage, x: f32, y: f32) -> Rgba<u8> {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let (w, h) = (img.width() as i32, img.height() as i32);

    let sample = |sx: i32, sy: i32| -> [f32; 4] {
        if sx < 0 || sy < 0 || sx >= w || sy >= h {
            [0.0; 4]
        } else {
            let p = img.get_pixel(sx as u32, sy as u32);
            // Premultiply so transparent neighbours don't bleed black into edges.
            let a = p[3] as f32 / 255.0;
            [p[0] as f32 * a, p[1] as f32 * a, p[2] as f32 * a, p[3] as f32]
        }
    };

    let tl = sample(x0, y0);
    let tr = sample(x0 + 1, y0);
    let bl = sample(x0, y0 + 1);
    let br = sample(x0 + 1, y0 + 1);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    let mut acc = [0.0f32; 4];
    for c in 0..4 {
        let top = lerp(tl[c], tr[c], fx);
        let bot = lerp(bl[c], br[c], fx);
        acc[c] = lerp(top, bot, fy);
    }
    let a = acc[3];
    if a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let unpremul = 255.0 / a;
    Rgba([
        (acc[0] * unpremul).round().clamp(0.0, 255.0) as u8,
        (acc[1] * unpremul).round().clamp(0.0, 255.0) as u8,
        (acc[2] * unpremul).round().clamp(0.0, 255.0) as u8,
        a.round().clamp(0.0, 255.0) as u8,
    ])
}
