// ============================================================================
// SESSION: the editor's state and the bake pipeline that follows it
// ============================================================================
//
// Host loop:
//   1. Forward UI input to the mutation methods. Each one that changes the
//      rendered output calls `request_bake()` exactly once.
//   2. Call `poll()` every frame. It drains image loads, bake completions and
//      texture decodes, starting the trailing bake when one was coalesced.
//
// Bakes are rendered in canvas space, so pan and zoom never request one.

use std::path::Path;
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

use egui::{Pos2, Vec2};
use image::RgbaImage;

use crate::assets::{AssetFetcher, ImageCache, ImageState};
use crate::compositor::{self, BakeJob, BakedImage, LayerPlacement};
use crate::error::{EncodeError, LoadError};
use crate::jobs::{JobRunner, catch_panic};
use crate::layers::{Layer, LayerRow, LayerSource, LayerStore};
use crate::mesh::{LoadedMesh, MeshLoader};
use crate::scheduler::{BakeRequest, BakeScheduler, BakeState, BakeStats};
use crate::settings::AppSettings;
use crate::texture_sync::{ApplyOutcome, BoundTexture, MeshRenderer, ResourceRegistry, TextureBridge};
use crate::uv_guide::{UvTopology, guide_segments, rasterize_guide};
use crate::viewport::{DragState, Selection, Viewport, rotation_towards};

type BakeOutcome = (u64, Result<BakedImage, EncodeError>);

pub struct Session {
    settings: AppSettings,
    store: LayerStore,
    selection: Selection,
    viewport: Viewport,
    drag: Option<DragState>,

    fetcher: Arc<dyn AssetFetcher>,
    runner: Arc<dyn JobRunner>,
    images: ImageCache,

    topology: Option<UvTopology>,
    guide: Option<Arc<RgbaImage>>,
    base_source: Option<LayerSource>,

    scheduler: BakeScheduler,
    bake_sender: mpsc::Sender<BakeOutcome>,
    bake_receiver: mpsc::Receiver<BakeOutcome>,
    last_bake_error: Option<EncodeError>,
    bridge: TextureBridge,
}

impl Session {
    /// `texture` is the renderer's bound texture; the session only ever swaps
    /// images into it.
    pub fn new(
        settings: AppSettings,
        fetcher: Arc<dyn AssetFetcher>,
        runner: Arc<dyn JobRunner>,
        texture: &Arc<BoundTexture>,
    ) -> Self {
        let (bake_sender, bake_receiver) = mpsc::channel();
        let bridge = TextureBridge::new(
            texture,
            Arc::new(ResourceRegistry::new()),
            Arc::clone(&runner),
        );
        Self {
            viewport: settings.viewport(),
            settings,
            store: LayerStore::new(),
            selection: Selection::default(),
            drag: None,
            fetcher,
            runner,
            images: ImageCache::new(),
            topology: None,
            guide: None,
            base_source: None,
            scheduler: BakeScheduler::new(),
            bake_sender,
            bake_receiver,
            last_bake_error: None,
            bridge,
        }
    }

    // ---- mesh -------------------------------------------------------------

    /// Load a mesh through `loader`. On failure the session is unchanged.
    pub fn load_mesh(&mut self, loader: &dyn MeshLoader, source: &Path) -> Result<(), LoadError> {
        match loader.load_mesh(source) {
            Ok(mesh) => {
                self.set_mesh(mesh);
                Ok(())
            }
            Err(e) => {
                crate::log_err!("mesh load failed for {}: {}", source.display(), e);
                Err(e)
            }
        }
    }

    pub fn set_mesh(&mut self, mesh: LoadedMesh) {
        if let Some(old) = self.base_source.take()
            && !self.store.uses_source(&old)
        {
            self.images.forget(&old);
        }
        if let Some(base) = &mesh.base_image {
            self.images.request(base, &self.fetcher, &*self.runner);
        }
        self.base_source = mesh.base_image;
        self.install_topology(mesh.uv_topology);
        self.request_bake();
    }

    /// Replace only the UV unwrap, keeping the base image.
    pub fn set_topology(&mut self, topology: UvTopology) {
        self.install_topology(topology);
        self.request_bake();
    }

    /// Change the bake resolution. The guide is redrawn at the new size. A
    /// size of 0 makes bakes fail with [`EncodeError::Empty`], leaving the
    /// last good texture bound.
    pub fn set_texture_size(&mut self, size: u32) {
        if size == self.settings.texture_size {
            return;
        }
        if size == 0 {
            crate::log_warn!("texture size 0: bakes will fail until it is changed");
        }
        self.settings.texture_size = size;
        if let Some(topology) = self.topology.take() {
            self.install_topology(topology);
        }
        self.request_bake();
    }

    fn install_topology(&mut self, topology: UvTopology) {
        let size = self.settings.texture_size;
        let segments = guide_segments(&topology, size, size);
        let guide = rasterize_guide(&segments, size, size, self.settings.guide_style());
        crate::log_info!(
            "uv guide: {} triangles, {} segments at {}px",
            topology.triangle_count(),
            segments.len(),
            size
        );
        self.guide = Some(Arc::new(guide));
        self.topology = Some(topology);
    }

    // ---- layer mutations --------------------------------------------------

    /// Add an image as a new top layer and select it.
    pub fn add_image(&mut self, source: LayerSource) -> usize {
        self.add_layer(Layer::from_source(source))
    }

    pub fn add_layer(&mut self, layer: Layer) -> usize {
        self.images.request(&layer.source, &self.fetcher, &*self.runner);
        crate::log_info!("added layer '{}'", layer.name);
        let index = self.store.add(layer);
        self.selection.after_add(index);
        self.request_bake();
        index
    }

    pub fn remove_layer(&mut self, index: usize) -> Option<Layer> {
        let removed = self.store.remove(index)?;
        self.selection.after_remove(index, self.store.len());
        if self.drag.is_some_and(|d| d.layer == removed.id) {
            self.drag = None;
        }
        if !self.store.uses_source(&removed.source)
            && self.base_source.as_ref() != Some(&removed.source)
        {
            self.images.forget(&removed.source);
        }
        crate::log_info!("removed layer '{}'", removed.name);
        self.request_bake();
        Some(removed)
    }

    pub fn delete_selected(&mut self) -> Option<Layer> {
        let index = self.selection.resolve(self.store.len())?;
        self.remove_layer(index)
    }

    pub fn move_layer_up(&mut self, index: usize) -> bool {
        if !self.store.move_up(index) {
            return false;
        }
        self.selection.after_swap(index, index + 1);
        self.request_bake();
        true
    }

    pub fn move_layer_down(&mut self, index: usize) -> bool {
        if !self.store.move_down(index) {
            return false;
        }
        self.selection.after_swap(index, index - 1);
        self.request_bake();
        true
    }

    pub fn toggle_visibility(&mut self, index: usize) -> bool {
        if !self.store.toggle_visibility(index) {
            return false;
        }
        self.request_bake();
        true
    }

    pub fn set_layer_position(&mut self, index: usize, position: Pos2) -> bool {
        self.edit_layer(index, |l| l.position = position)
    }

    pub fn set_layer_rotation(&mut self, index: usize, rotation: f32) -> bool {
        self.edit_layer(index, |l| l.rotation = rotation)
    }

    pub fn set_layer_scale(&mut self, index: usize, scale: Vec2) -> bool {
        self.edit_layer(index, |l| l.scale = scale)
    }

    fn edit_layer(&mut self, index: usize, edit: impl FnOnce(&mut Layer)) -> bool {
        let Some(layer) = self.store.get_mut(index) else {
            return false;
        };
        edit(layer);
        self.request_bake();
        true
    }

    /// Point layer `index` at the pointer, as the rotate handle does.
    pub fn rotate_layer_towards(&mut self, index: usize, screen: Pos2) -> bool {
        let pointer = self.viewport.screen_to_canvas(screen);
        let Some(anchor) = self.store.get(index).map(|l| l.position) else {
            return false;
        };
        self.set_layer_rotation(index, rotation_towards(anchor, pointer))
    }

    pub fn select(&mut self, index: usize) {
        self.selection.select(index, self.store.len());
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    // ---- pointer ----------------------------------------------------------

    /// Top-most visible, loaded layer under a screen point.
    pub fn layer_at(&self, screen: Pos2) -> Option<usize> {
        let p = self.viewport.screen_to_canvas(screen);
        (0..self.store.len()).rev().find(|&i| {
            let Some(layer) = self.store.get(i) else { return false };
            if !layer.visible || layer.scale.x == 0.0 || layer.scale.y == 0.0 {
                return false;
            }
            let Some(img) = self.images.ready(&layer.source) else { return false };
            let d = p - layer.position;
            let (sin, cos) = layer.rotation.sin_cos();
            let u = (d.x * cos + d.y * sin) / layer.scale.x;
            let v = (-d.x * sin + d.y * cos) / layer.scale.y;
            u >= 0.0 && v >= 0.0 && u < img.width() as f32 && v < img.height() as f32
        })
    }

    /// Start dragging the layer under `screen`, selecting it.
    pub fn begin_drag(&mut self, screen: Pos2) -> Option<usize> {
        let index = self.layer_at(screen)?;
        self.begin_drag_layer(index, screen)
    }

    /// Start dragging a specific layer, e.g. from a handle.
    pub fn begin_drag_layer(&mut self, index: usize, screen: Pos2) -> Option<usize> {
        let layer = self.store.get(index)?;
        self.drag = Some(DragState {
            layer: layer.id,
            last_screen: screen,
            moved: false,
        });
        self.selection.select(index, self.store.len());
        Some(index)
    }

    /// Move the dragged layer by the pointer delta, in canvas space.
    pub fn drag_to(&mut self, screen: Pos2) -> bool {
        let Some(mut drag) = self.drag else { return false };
        let delta = self.viewport.screen_delta_to_canvas(screen - drag.last_screen);
        let Some(index) = self.store.index_of(drag.layer) else {
            self.drag = None;
            return false;
        };
        if delta == Vec2::ZERO {
            return false;
        }
        if let Some(layer) = self.store.get_mut(index) {
            layer.position += delta;
        }
        drag.last_screen = screen;
        drag.moved = true;
        self.drag = Some(drag);
        if self.settings.bake_during_drag {
            self.request_bake();
        }
        true
    }

    pub fn end_drag(&mut self) {
        if let Some(drag) = self.drag.take()
            && drag.moved
            && !self.settings.bake_during_drag
        {
            self.request_bake();
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Wheel zoom about the pointer. View only.
    pub fn zoom_at(&mut self, pointer: Pos2, delta_y: f32) -> bool {
        self.viewport.zoom_from_wheel(pointer, delta_y)
    }

    pub fn pan_by(&mut self, delta: Vec2) {
        self.viewport.pan_by(delta);
    }

    // ---- baking -----------------------------------------------------------

    /// Ask for the current stack to be baked. Starts a bake if none is
    /// running, otherwise records one trailing bake.
    pub fn request_bake(&mut self) {
        match self.scheduler.request() {
            BakeRequest::Start(generation) => self.spawn_bake(generation),
            BakeRequest::Coalesced => {
                crate::log_debug!("bake request coalesced");
            }
        }
    }

    fn snapshot(&self, generation: u64, guide: Option<Arc<RgbaImage>>) -> BakeJob {
        let mut layers = Vec::with_capacity(self.store.len());
        let mut skipped = 0;
        for layer in self.store.iter().filter(|l| l.visible) {
            match self.images.ready(&layer.source) {
                Some(image) => layers.push(LayerPlacement {
                    image,
                    position: layer.position,
                    rotation: layer.rotation,
                    scale: layer.scale,
                }),
                None => skipped += 1,
            }
        }
        BakeJob {
            generation,
            size: self.settings.texture_size,
            background: self.settings.background_rgba(),
            base: self.base_source.as_ref().and_then(|s| self.images.ready(s)),
            layers,
            guide,
            skipped,
        }
    }

    fn spawn_bake(&mut self, generation: u64) {
        let guide = if self.settings.bake_guide { self.guide.clone() } else { None };
        let job = self.snapshot(generation, guide);
        if job.skipped > 0 {
            crate::log_debug!("bake {}: {} layer(s) not loaded yet", generation, job.skipped);
        }
        let sender = self.bake_sender.clone();
        self.runner.spawn(Box::new(move || {
            let start = Instant::now();
            let result = catch_panic(&format!("bake {}", job.generation), || compositor::bake(&job))
                .unwrap_or_else(|msg| Err(EncodeError::Backend(msg)));
            crate::log_debug!(
                "bake {} rendered in {:.1}ms",
                job.generation,
                start.elapsed().as_secs_f64() * 1000.0
            );
            let _ = sender.send((job.generation, result));
        }));
    }

    /// Drain background completions. Call once per frame from the host thread.
    pub fn poll(&mut self, renderer: &dyn MeshRenderer) -> Vec<ApplyOutcome> {
        let loaded = self.images.poll();
        if loaded.iter().any(|s| self.affects_output(s)) {
            self.request_bake();
        }

        while let Ok((generation, result)) = self.bake_receiver.try_recv() {
            let succeeded = result.is_ok();
            match result {
                Ok(baked) => {
                    self.last_bake_error = None;
                    self.bridge.submit(baked);
                }
                Err(e) => {
                    crate::log_err!("bake {} failed: {}", generation, e);
                    self.last_bake_error = Some(e);
                }
            }
            if let Some(next) = self.scheduler.complete(generation, succeeded) {
                self.spawn_bake(next);
            }
        }

        self.bridge.poll(renderer)
    }

    fn affects_output(&self, source: &LayerSource) -> bool {
        self.base_source.as_ref() == Some(source)
            || self.store.iter().any(|l| l.visible && &l.source == source)
    }

    pub fn is_busy(&self) -> bool {
        !self.scheduler.is_idle() || self.bridge.pending_decodes() > 0 || self.images.is_loading()
    }

    /// Poll until nothing is in flight or `timeout` passes. Returns `true`
    /// when the session went idle.
    pub fn wait_until_idle(&mut self, renderer: &dyn MeshRenderer, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll(renderer);
            if !self.is_busy() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    /// Synchronous editor view: the composite with the guide drawn on top,
    /// whatever `bake_guide` says.
    pub fn preview(&self) -> RgbaImage {
        compositor::render(&self.snapshot(0, self.guide.clone()))
    }

    /// PNG bytes of the bake currently bound to the texture.
    pub fn latest_bake_png(&self) -> Option<Arc<[u8]>> {
        self.bridge.current_bytes()
    }

    /// Write the bound bake to `path`. Returns `false` if nothing was baked yet.
    pub fn export_latest(&self, path: &Path) -> std::io::Result<bool> {
        let Some(bytes) = self.latest_bake_png() else {
            return Ok(false);
        };
        std::fs::write(path, &*bytes)?;
        crate::log_info!("exported bake {} to {}", self.installed_generation(), path.display());
        Ok(true)
    }

    // ---- queries ----------------------------------------------------------

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn store(&self) -> &LayerStore {
        &self.store
    }

    pub fn layer_rows(&self) -> Vec<LayerRow> {
        self.store.rows()
    }

    pub fn selection(&self) -> Option<usize> {
        self.selection.resolve(self.store.len())
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn topology(&self) -> Option<&UvTopology> {
        self.topology.as_ref()
    }

    pub fn guide_image(&self) -> Option<&Arc<RgbaImage>> {
        self.guide.as_ref()
    }

    pub fn image_state(&self, source: &LayerSource) -> Option<&ImageState> {
        self.images.state(source)
    }

    pub fn bake_state(&self) -> BakeState {
        self.scheduler.state()
    }

    pub fn bake_stats(&self) -> BakeStats {
        self.scheduler.stats()
    }

    pub fn last_bake_error(&self) -> Option<&EncodeError> {
        self.last_bake_error.as_ref()
    }

    pub fn installed_generation(&self) -> u64 {
        self.bridge.installed_generation()
    }

    pub fn live_handles(&self) -> usize {
        self.bridge.registry().live_count()
    }
}
