// ============================================================================
// VIEWPORT: screen ↔ canvas mapping, zoom-about-pointer, selection tracking
// ============================================================================

use egui::{Pos2, Vec2};

use crate::layers::LayerId;

pub const DEFAULT_ZOOM_STEP: f32 = 1.1;
pub const DEFAULT_MIN_ZOOM: f32 = 0.1;
pub const DEFAULT_MAX_ZOOM: f32 = 20.0;

/// View of the canvas: `screen = canvas * scale + offset`.
///
/// Purely a view; changing it never changes the baked output.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub scale: f32,
    pub offset: Vec2,
    pub zoom_step: f32,
    pub min_scale: f32,
    pub max_scale: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: Vec2::ZERO,
            zoom_step: DEFAULT_ZOOM_STEP,
            min_scale: DEFAULT_MIN_ZOOM,
            max_scale: DEFAULT_MAX_ZOOM,
        }
    }
}

impl Viewport {
    pub fn new(zoom_step: f32, min_scale: f32, max_scale: f32) -> Self {
        Self {
            zoom_step,
            min_scale,
            max_scale,
            ..Self::default()
        }
    }

    pub fn screen_to_canvas(&self, p: Pos2) -> Pos2 {
        ((p.to_vec2() - self.offset) / self.scale).to_pos2()
    }

    pub fn canvas_to_screen(&self, p: Pos2) -> Pos2 {
        (p.to_vec2() * self.scale + self.offset).to_pos2()
    }

    /// A pointer movement in screen pixels expressed in canvas pixels.
    pub fn screen_delta_to_canvas(&self, delta: Vec2) -> Vec2 {
        delta / self.scale
    }

    /// Zoom by `zoom_step^notches`, keeping the canvas point under `pointer`
    /// fixed on screen. Returns `false` when the clamp left the scale unchanged.
    pub fn zoom_about(&mut self, pointer: Pos2, notches: f32) -> bool {
        let old_scale = self.scale;
        let new_scale =
            (old_scale * self.zoom_step.powf(notches)).clamp(self.min_scale, self.max_scale);
        if new_scale == old_scale {
            return false;
        }
        let p = pointer.to_vec2();
        self.offset = p - (p - self.offset) / old_scale * new_scale;
        self.scale = new_scale;
        true
    }

    /// Wheel scrolling: one notch per event, zooming in when scrolling up.
    pub fn zoom_from_wheel(&mut self, pointer: Pos2, delta_y: f32) -> bool {
        if delta_y == 0.0 {
            return false;
        }
        self.zoom_about(pointer, -delta_y.signum())
    }

    pub fn pan_by(&mut self, delta: Vec2) {
        self.offset += delta;
    }

    pub fn reset(&mut self) {
        self.scale = 1.0;
        self.offset = Vec2::ZERO;
    }
}

/// Rotation (radians) that points a layer's anchor toward `pointer`, both in
/// canvas space. Used by the rotate handle.
pub fn rotation_towards(anchor: Pos2, pointer: Pos2) -> f32 {
    let d = pointer - anchor;
    d.y.atan2(d.x)
}

/// The selected layer index, kept in step with store mutations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    index: Option<usize>,
}

impl Selection {
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn select(&mut self, index: usize, len: usize) {
        self.index = (index < len).then_some(index);
    }

    pub fn clear(&mut self) {
        self.index = None;
    }

    /// A freshly added layer becomes the selection.
    pub fn after_add(&mut self, new_index: usize) {
        self.index = Some(new_index);
    }

    /// Follow an adjacent swap of `from` and `to`.
    pub fn after_swap(&mut self, from: usize, to: usize) {
        self.index = match self.index {
            Some(i) if i == from => Some(to),
            Some(i) if i == to => Some(from),
            other => other,
        };
    }

    /// Follow a removal; `len` is the stack length after it. Selecting the
    /// removed index keeps the same slot, clamped to the new top.
    pub fn after_remove(&mut self, removed: usize, len: usize) {
        self.index = match self.index {
            _ if len == 0 => None,
            Some(i) if i > removed => Some(i - 1),
            Some(i) => Some(i.min(len - 1)),
            None => None,
        };
    }

    /// Selection clamped to a stack of `len` layers.
    pub fn resolve(&self, len: usize) -> Option<usize> {
        match self.index {
            Some(_) if len == 0 => None,
            Some(i) => Some(i.min(len - 1)),
            None => None,
        }
    }
}

/// An in-progress layer drag. The layer is tracked by id so reorders during
/// the drag can't redirect it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DragState {
    pub layer: LayerId,
    pub last_screen: Pos2,
    pub moved: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Pos2, b: Pos2) -> bool {
        (a - b).length() < 1e-3
    }

    #[test]
    fn zoom_keeps_point_under_pointer() {
        let mut vp = Viewport::default();
        vp.pan_by(Vec2::new(40.0, -12.0));
        let pointer = Pos2::new(300.0, 220.0);
        let before = vp.screen_to_canvas(pointer);
        for notches in [1.0, 3.0, -2.0, 0.5] {
            assert!(vp.zoom_about(pointer, notches));
            assert!(approx(vp.screen_to_canvas(pointer), before));
        }
    }

    #[test]
    fn zoom_step_compounds() {
        let mut vp = Viewport::default();
        vp.zoom_about(Pos2::ZERO, 2.0);
        assert!((vp.scale - 1.21).abs() < 1e-5);
    }

    #[test]
    fn zoom_is_clamped() {
        let mut vp = Viewport::new(2.0, 0.5, 4.0);
        vp.zoom_about(Pos2::new(10.0, 10.0), 10.0);
        assert_eq!(vp.scale, 4.0);
        assert!(!vp.zoom_about(Pos2::new(10.0, 10.0), 1.0));
        vp.zoom_about(Pos2::new(10.0, 10.0), -10.0);
        assert_eq!(vp.scale, 0.5);
    }

    #[test]
    fn wheel_direction_is_opposite_to_delta() {
        let mut vp = Viewport::default();
        vp.zoom_from_wheel(Pos2::ZERO, -120.0);
        assert!(vp.scale > 1.0);
        vp.reset();
        vp.zoom_from_wheel(Pos2::ZERO, 3.0);
        assert!(vp.scale < 1.0);
        vp.reset();
        assert!(!vp.zoom_from_wheel(Pos2::ZERO, 0.0));
    }

    #[test]
    fn screen_canvas_round_trip_and_delta() {
        let mut vp = Viewport::default();
        vp.zoom_about(Pos2::new(50.0, 50.0), 4.0);
        vp.pan_by(Vec2::new(7.0, 9.0));
        let p = Pos2::new(123.0, 45.0);
        assert!(approx(vp.canvas_to_screen(vp.screen_to_canvas(p)), p));
        let d = vp.screen_delta_to_canvas(Vec2::new(vp.scale * 10.0, 0.0));
        assert!((d.x - 10.0).abs() < 1e-4);
    }

    #[test]
    fn rotate_handle_angle() {
        let a = rotation_towards(Pos2::ZERO, Pos2::new(0.0, 5.0));
        assert!((a - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn selection_follows_swaps() {
        let mut s = Selection::default();
        s.after_add(2);
        s.after_swap(2, 1);
        assert_eq!(s.index(), Some(1));
        s.after_swap(0, 1);
        assert_eq!(s.index(), Some(0));
        s.after_swap(3, 2);
        assert_eq!(s.index(), Some(0));
    }

    #[test]
    fn selection_after_remove_clamps() {
        let mut s = Selection::default();
        s.select(2, 3);
        s.after_remove(2, 2);
        assert_eq!(s.index(), Some(1));

        s.select(1, 2);
        s.after_remove(0, 1);
        assert_eq!(s.index(), Some(0));

        s.after_remove(0, 0);
        assert_eq!(s.index(), None);
        assert_eq!(s.resolve(5), None);
    }

    #[test]
    fn select_out_of_range_clears() {
        let mut s = Selection::default();
        s.select(4, 2);
        assert_eq!(s.index(), None);
        s.select(1, 2);
        assert_eq!(s.resolve(1), Some(0));
    }
}
