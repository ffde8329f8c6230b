// ============================================================================
// LAYER STORE: ordered layer stack with adjacent-swap reordering
// ============================================================================
//
// Index 0 is the bottom of the stack; the last index is drawn on top.
// Every operation is synchronous and touches nothing outside the store.

use egui::{Pos2, Vec2};
use uuid::Uuid;

/// Stable identity of a layer across reorders. Not required to be unique by
/// the store; it only lets callers follow a layer while indices shift.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayerId(Uuid);

impl LayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque reference to a layer's image bytes: a file path, a `data:` URL or a
/// remote URL. Interpreted only by an [`AssetFetcher`](crate::assets::AssetFetcher).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LayerSource(String);

impl LayerSource {
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name shown for a freshly dropped image: the file name for paths,
    /// `"image"` for inline data and URLs.
    pub fn display_name(&self) -> String {
        let s = self.0.as_str();
        if s.starts_with("data:") || s.contains("://") {
            return "image".to_string();
        }
        std::path::Path::new(s)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "image".to_string())
    }
}

impl From<&str> for LayerSource {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// One positioned, transformable image in the stack.
#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub source: LayerSource,
    /// Canvas-space top-left anchor; also the pivot for rotation and scale.
    pub position: Pos2,
    /// Radians, clockwise in canvas space (y down).
    pub rotation: f32,
    pub scale: Vec2,
    pub visible: bool,
}

impl Layer {
    pub fn new(name: impl Into<String>, source: LayerSource) -> Self {
        Self {
            id: LayerId::new(),
            name: name.into(),
            source,
            position: Pos2::ZERO,
            rotation: 0.0,
            scale: Vec2::splat(1.0),
            visible: true,
        }
    }

    /// Layer named after its source, the way dropped files are named.
    pub fn from_source(source: LayerSource) -> Self {
        let name = source.display_name();
        Self::new(name, source)
    }

    pub fn with_position(mut self, position: Pos2) -> Self {
        self.position = position;
        self
    }

    pub fn with_rotation(mut self, rotation: f32) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec2) -> Self {
        self.scale = scale;
        self
    }

    /// List label: hidden layers carry a marker.
    pub fn label(&self) -> String {
        if self.visible {
            self.name.clone()
        } else {
            format!("{} (hidden)", self.name)
        }
    }
}

/// Read-only projection of one stack entry for list rendering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerRow {
    pub index: usize,
    pub id: LayerId,
    pub name: String,
    pub label: String,
    pub visible: bool,
}

#[derive(Clone, Debug, Default)]
pub struct LayerStore {
    layers: Vec<Layer>,
}

impl LayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Layer> {
        self.layers.get_mut(index)
    }

    /// Bottom-to-top iteration (draw order).
    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }

    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    /// Append on top of the stack and return the new index.
    pub fn add(&mut self, layer: Layer) -> usize {
        self.layers.push(layer);
        self.layers.len() - 1
    }

    /// Swap layer `index` with the one above it. Returns `false` when already
    /// on top or out of range.
    pub fn move_up(&mut self, index: usize) -> bool {
        if index + 1 >= self.layers.len() {
            return false;
        }
        self.layers.swap(index, index + 1);
        true
    }

    /// Swap layer `index` with the one below it. Returns `false` when already
    /// at the bottom or out of range.
    pub fn move_down(&mut self, index: usize) -> bool {
        if index == 0 || index >= self.layers.len() {
            return false;
        }
        self.layers.swap(index, index - 1);
        true
    }

    /// Flip the visible flag. Returns `false` when `index` is out of range.
    pub fn toggle_visibility(&mut self, index: usize) -> bool {
        match self.layers.get_mut(index) {
            Some(layer) => {
                layer.visible = !layer.visible;
                true
            }
            None => false,
        }
    }

    /// Splice out layer `index`; later layers shift down by one.
    pub fn remove(&mut self, index: usize) -> Option<Layer> {
        if index >= self.layers.len() {
            return None;
        }
        Some(self.layers.remove(index))
    }

    /// Whether any remaining layer still references `source`.
    pub fn uses_source(&self, source: &LayerSource) -> bool {
        self.layers.iter().any(|l| &l.source == source)
    }

    /// Rows for a layer list, top-most layer first.
    pub fn rows(&self) -> Vec<LayerRow> {
        self.layers
            .iter()
            .enumerate()
            .rev()
            .map(|(index, layer)| LayerRow {
                index,
                id: layer.id,
                name: layer.name.clone(),
                label: layer.label(),
                visible: layer.visible,
            })
            .collect()
    }
}
