// ============================================================================
// UV GUIDE: wireframe of a mesh's UV unwrap in texture pixel space
// ============================================================================

use egui::{Color32, Pos2};
use image::{Rgba, RgbaImage};

use crate::error::LoadError;

/// Per-vertex UVs plus triangle connectivity for one mesh. Immutable once built.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UvTopology {
    uvs: Vec<[f32; 2]>,
    indices: Vec<u32>,
}

impl UvTopology {
    /// Build from the flat arrays a mesh loader exposes: `uvs` as
    /// `[u0, v0, u1, v1, ...]` and `indices` as triangle triples.
    pub fn from_flat(uvs: &[f32], indices: Vec<u32>) -> Result<Self, LoadError> {
        if uvs.len() % 2 != 0 {
            return Err(LoadError::Malformed(format!(
                "uv array has odd length {}",
                uvs.len()
            )));
        }
        if indices.len() % 3 != 0 {
            return Err(LoadError::Malformed(format!(
                "index array length {} is not a multiple of 3",
                indices.len()
            )));
        }
        let uvs: Vec<[f32; 2]> = uvs.chunks_exact(2).map(|c| [c[0], c[1]]).collect();
        if let Some(&bad) = indices.iter().find(|&&i| i as usize >= uvs.len()) {
            return Err(LoadError::Malformed(format!(
                "index {} out of range for {} vertices",
                bad,
                uvs.len()
            )));
        }
        Ok(Self { uvs, indices })
    }

    pub fn vertex_count(&self) -> usize {
        self.uvs.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn uv(&self, vertex: u32) -> [f32; 2] {
        self.uvs[vertex as usize]
    }

    /// Triangles in index-array order.
    pub fn triangles(&self) -> impl Iterator<Item = [u32; 3]> + '_ {
        self.indices.chunks_exact(3).map(|t| [t[0], t[1], t[2]])
    }
}

/// One straight line of the guide, in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GuideSegment {
    pub from: Pos2,
    pub to: Pos2,
}

/// Three segments per triangle `(a, b, c)`: a→b, b→c, c→a, in triangle order.
/// Deterministic for a given topology and resolution.
pub fn guide_segments(topology: &UvTopology, width: u32, height: u32) -> Vec<GuideSegment> {
    let (w, h) = (width as f32, height as f32);
    let to_px = |v: u32| {
        let [u, t] = topology.uv(v);
        Pos2::new(u * w, t * h)
    };
    let mut segments = Vec::with_capacity(topology.triangle_count() * 3);
    for [a, b, c] in topology.triangles() {
        let (pa, pb, pc) = (to_px(a), to_px(b), to_px(c));
        segments.push(GuideSegment { from: pa, to: pb });
        segments.push(GuideSegment { from: pb, to: pc });
        segments.push(GuideSegment { from: pc, to: pa });
    }
    segments
}

/// Stroke settings for [`rasterize_guide`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GuideStyle {
    pub color: Color32,
    pub line_width: f32,
}

impl Default for GuideStyle {
    fn default() -> Self {
        Self {
            color: Color32::from_rgba_unmultiplied(211, 211, 211, 160),
            line_width: 1.0,
        }
    }
}

/// Distance from a point to a line segment.
#[inline]
fn sdf_line_segment(px: f32, py: f32, ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
    let dx = bx - ax;
    let dy = by - ay;
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq > 0.0 {
        (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let cx = ax + t * dx;
    let cy = ay + t * dy;
    ((px - cx) * (px - cx) + (py - cy) * (py - cy)).sqrt()
}

#[inline]
fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Rasterize the guide into a transparent `width × height` overlay.
///
/// Coverage is accumulated per segment over its bounding box only, taking the
/// max where lines overlap so shared triangle edges don't darken.
pub fn rasterize_guide(
    segments: &[GuideSegment],
    width: u32,
    height: u32,
    style: GuideStyle,
) -> RgbaImage {
    let mut coverage = vec![0.0f32; width as usize * height as usize];
    let half = (style.line_width * 0.5).max(0.0);
    let reach = half + 1.0;

    for seg in segments {
        let min_x = (seg.from.x.min(seg.to.x) - reach).floor().max(0.0) as u32;
        let min_y = (seg.from.y.min(seg.to.y) - reach).floor().max(0.0) as u32;
        let max_x = ((seg.from.x.max(seg.to.x) + reach).ceil().max(0.0) as u32).min(width);
        let max_y = ((seg.from.y.max(seg.to.y) + reach).ceil().max(0.0) as u32).min(height);

        for y in min_y..max_y {
            let py = y as f32 + 0.5;
            let row = y as usize * width as usize;
            for x in min_x..max_x {
                let px = x as f32 + 0.5;
                let d = sdf_line_segment(px, py, seg.from.x, seg.from.y, seg.to.x, seg.to.y);
                let c = 1.0 - smoothstep(half - 0.5, half + 0.5, d);
                let slot = &mut coverage[row + x as usize];
                if c > *slot {
                    *slot = c;
                }
            }
        }
    }

    let [r, g, b, a] = style.color.to_srgba_unmultiplied();
    let mut out = RgbaImage::new(width, height);
    for (px, cov) in out.pixels_mut().zip(coverage.iter()) {
        if *cov > 0.0 {
            *px = Rgba([r, g, b, (a as f32 * cov).round().clamp(0.0, 255.0) as u8]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> UvTopology {
        UvTopology::from_flat(
            &[0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.5, 0.5],
            vec![0, 1, 2, 0, 2, 3],
        )
        .unwrap()
    }

    #[test]
    fn emits_three_segments_per_triangle_in_order() {
        let segs = guide_segments(&quad(), 100, 50);
        assert_eq!(segs.len(), 6);
        assert_eq!(segs[0], GuideSegment { from: Pos2::new(0.0, 0.0), to: Pos2::new(100.0, 0.0) });
        assert_eq!(segs[1], GuideSegment { from: Pos2::new(100.0, 0.0), to: Pos2::new(100.0, 50.0) });
        assert_eq!(segs[2], GuideSegment { from: Pos2::new(100.0, 50.0), to: Pos2::new(0.0, 0.0) });
        assert_eq!(segs[5].to, Pos2::new(0.0, 0.0));
    }

    #[test]
    fn generation_is_deterministic() {
        let topo = quad();
        assert_eq!(guide_segments(&topo, 512, 512), guide_segments(&topo, 512, 512));
    }

    #[test]
    fn zero_triangles_yield_no_segments() {
        let topo = UvTopology::from_flat(&[0.1, 0.2, 0.3, 0.4], Vec::new()).unwrap();
        assert!(guide_segments(&topo, 512, 512).is_empty());
        assert_eq!(topo.vertex_count(), 2);
    }

    #[test]
    fn rejects_malformed_arrays() {
        assert!(UvTopology::from_flat(&[0.0, 0.0, 1.0], vec![]).is_err());
        assert!(UvTopology::from_flat(&[0.0, 0.0], vec![0, 0]).is_err());
        assert!(UvTopology::from_flat(&[0.0, 0.0], vec![0, 0, 1]).is_err());
    }

    #[test]
    fn rasterized_guide_marks_edges_only() {
        let segs = guide_segments(&quad(), 64, 64);
        let img = rasterize_guide(&segs, 64, 64, GuideStyle::default());
        // Diagonal from (64,64) to (0,0) passes through the centre.
        assert!(img.get_pixel(32, 32)[3] > 0);
        // Far from every edge stays transparent.
        assert_eq!(img.get_pixel(48, 16)[3], 0);
        assert_eq!(img.get_pixel(48, 16)[0], 0);
    }

    #[test]
    fn overlay_never_exceeds_style_alpha() {
        let segs = guide_segments(&quad(), 32, 32);
        let style = GuideStyle { color: Color32::from_rgba_unmultiplied(255, 0, 0, 100), line_width: 3.0 };
        let img = rasterize_guide(&segs, 32, 32, style);
        assert!(img.pixels().all(|p| p[3] <= 100));
    }
}
