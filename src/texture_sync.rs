// ============================================================================
// TEXTURE SYNC: decode baked PNGs and swap them into the bound texture
// ============================================================================
//
// Lifecycle of one bake result:
//   1. `submit` registers the encoded bytes as a transient resource handle and
//      queues an async decode tagged with the bake generation.
//   2. `poll` drains decode completions. A result older than (or equal to)
//      the installed generation is stale: its handle is released, nothing else.
//   3. A fresh result is swapped into the texture FIRST, and only then is the
//      previously installed handle released. The renderer is notified last.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak, mpsc};

use image::{ImageFormat, RgbaImage};
use uuid::Uuid;

use crate::compositor::BakedImage;
use crate::error::DecodeError;
use crate::jobs::{JobRunner, catch_panic};

/// Identifier of a transient buffer held in a [`ResourceRegistry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceHandle(Uuid);

impl ResourceHandle {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "res:{}", self.0)
    }
}

/// Owner of transient encoded buffers, addressed by handle.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    entries: Mutex<HashMap<ResourceHandle, Arc<[u8]>>>,
    released: AtomicU64,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, bytes: Arc<[u8]>) -> ResourceHandle {
        let handle = ResourceHandle::new();
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(handle, bytes);
        }
        handle
    }

    pub fn get(&self, handle: ResourceHandle) -> Option<Arc<[u8]>> {
        self.entries.lock().ok()?.get(&handle).cloned()
    }

    /// Drop the buffer behind `handle`. Returns `false` if it was not live,
    /// which would mean a double release.
    pub fn release(&self, handle: ResourceHandle) -> bool {
        let removed = self
            .entries
            .lock()
            .map(|mut e| e.remove(&handle).is_some())
            .unwrap_or(false);
        if removed {
            self.released.fetch_add(1, Ordering::Relaxed);
        } else {
            crate::log_err!("release of {} which is not live", handle);
        }
        removed
    }

    pub fn live_count(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn released_count(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }
}

/// The material's sampled image. Owned by the renderer; the bridge only holds
/// a `Weak` to it and never touches pixels, it swaps whole images.
#[derive(Debug, Default)]
pub struct BoundTexture {
    image: Mutex<Option<Arc<RgbaImage>>>,
    needs_upload: AtomicBool,
    generation: AtomicU64,
}

impl BoundTexture {
    pub fn new() -> Self {
        Self::default()
    }

    fn swap_image(&self, image: Arc<RgbaImage>, generation: u64) {
        if let Ok(mut slot) = self.image.lock() {
            *slot = Some(image);
        }
        self.generation.store(generation, Ordering::Release);
        self.needs_upload.store(true, Ordering::Release);
    }

    pub fn needs_upload(&self) -> bool {
        self.needs_upload.load(Ordering::Acquire)
    }

    /// Renderer side: take the image to upload and clear the flag.
    pub fn take_upload(&self) -> Option<Arc<RgbaImage>> {
        if !self.needs_upload.swap(false, Ordering::AcqRel) {
            return None;
        }
        self.current_image()
    }

    pub fn current_image(&self) -> Option<Arc<RgbaImage>> {
        self.image.lock().ok()?.clone()
    }

    /// Bake generation currently bound (0 = none applied yet).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

/// The 3D side of the app: told to redraw once a bake is bound.
pub trait MeshRenderer {
    fn on_bake_applied(&self, handle: ResourceHandle, generation: u64);
}

/// Renderer that ignores notifications (headless use).
#[derive(Clone, Copy, Debug, Default)]
pub struct NullRenderer;

impl MeshRenderer for NullRenderer {
    fn on_bake_applied(&self, _handle: ResourceHandle, _generation: u64) {}
}

/// Result delivered from a background decode.
struct DecodeOutcome {
    generation: u64,
    handle: ResourceHandle,
    result: Result<Arc<RgbaImage>, DecodeError>,
}

/// What happened to one decoded bake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied(u64),
    /// Superseded by a newer installed generation; dropped.
    Stale(u64),
    Failed(u64, DecodeError),
    /// The renderer dropped the texture; nothing to apply to.
    Detached(u64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Installed {
    generation: u64,
    handle: ResourceHandle,
}

pub struct TextureBridge {
    texture: Weak<BoundTexture>,
    registry: Arc<ResourceRegistry>,
    runner: Arc<dyn JobRunner>,
    sender: mpsc::Sender<DecodeOutcome>,
    receiver: mpsc::Receiver<DecodeOutcome>,
    installed: Option<Installed>,
    in_flight: usize,
}

impl TextureBridge {
    pub fn new(
        texture: &Arc<BoundTexture>,
        registry: Arc<ResourceRegistry>,
        runner: Arc<dyn JobRunner>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            texture: Arc::downgrade(texture),
            registry,
            runner,
            sender,
            receiver,
            installed: None,
            in_flight: 0,
        }
    }

    /// Generation currently installed in the texture, 0 if none.
    pub fn installed_generation(&self) -> u64 {
        self.installed.map(|i| i.generation).unwrap_or(0)
    }

    /// PNG bytes of the installed bake, for export.
    pub fn current_bytes(&self) -> Option<Arc<[u8]>> {
        self.registry.get(self.installed?.handle)
    }

    pub fn pending_decodes(&self) -> usize {
        self.in_flight
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    /// Register a finished bake and start decoding it.
    pub fn submit(&mut self, baked: BakedImage) -> ResourceHandle {
        let handle = self.registry.register(Arc::clone(&baked.encoded));
        let generation = baked.generation;
        let bytes = baked.encoded;
        let sender = self.sender.clone();
        self.in_flight += 1;
        crate::log_debug!("decoding bake {} ({} bytes) as {}", generation, bytes.len(), handle);
        self.runner.spawn(Box::new(move || {
            let result = catch_panic(&format!("decode of bake {}", generation), || {
                image::load_from_memory_with_format(&bytes, ImageFormat::Png)
                    .map(|img| Arc::new(img.into_rgba8()))
                    .map_err(DecodeError::from)
            })
            .unwrap_or_else(|msg| Err(DecodeError::Backend(msg)));
            let _ = sender.send(DecodeOutcome {
                generation,
                handle,
                result,
            });
        }));
        handle
    }

    /// Drain finished decodes, installing fresh ones in generation order.
    pub fn poll(&mut self, renderer: &dyn MeshRenderer) -> Vec<ApplyOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(done) = self.receiver.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            outcomes.push(self.handle_decoded(done, renderer));
        }
        outcomes
    }

    fn handle_decoded(&mut self, done: DecodeOutcome, renderer: &dyn MeshRenderer) -> ApplyOutcome {
        let DecodeOutcome {
            generation,
            handle,
            result,
        } = done;

        if generation <= self.installed_generation() {
            crate::log_debug!(
                "dropping stale bake {} (installed {})",
                generation,
                self.installed_generation()
            );
            self.registry.release(handle);
            return ApplyOutcome::Stale(generation);
        }

        let image = match result {
            Ok(image) => image,
            Err(e) => {
                crate::log_warn!("bake {} could not be decoded: {}", generation, e);
                self.registry.release(handle);
                return ApplyOutcome::Failed(generation, e);
            }
        };

        let Some(texture) = self.texture.upgrade() else {
            crate::log_warn!("bound texture is gone; discarding bake {}", generation);
            self.registry.release(handle);
            return ApplyOutcome::Detached(generation);
        };

        texture.swap_image(image, generation);
        let previous = self.installed.replace(Installed { generation, handle });
        if let Some(prev) = previous {
            self.registry.release(prev.handle);
        }
        renderer.on_bake_applied(handle, generation);
        crate::log_debug!("applied bake {} via {}", generation, handle);
        ApplyOutcome::Applied(generation)
    }
}

impl Drop for TextureBridge {
    fn drop(&mut self) {
        if let Some(installed) = self.installed.take() {
            self.registry.release(installed.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::QueuedRunner;
    use image::Rgba;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingRenderer {
        applied: RefCell<Vec<u64>>,
    }

    impl MeshRenderer for RecordingRenderer {
        fn on_bake_applied(&self, _handle: ResourceHandle, generation: u64) {
            self.applied.borrow_mut().push(generation);
        }
    }

    fn baked(generation: u64, color: Rgba<u8>) -> BakedImage {
        let img = RgbaImage::from_pixel(4, 4, color);
        let encoded = crate::compositor::encode_png(&img).unwrap();
        BakedImage {
            generation,
            width: 4,
            height: 4,
            encoded: Arc::from(encoded),
        }
    }

    fn setup() -> (Arc<BoundTexture>, QueuedRunner, TextureBridge) {
        let texture = Arc::new(BoundTexture::new());
        let runner = QueuedRunner::new();
        let bridge = TextureBridge::new(&texture, Arc::new(ResourceRegistry::new()), Arc::new(runner.clone()));
        (texture, runner, bridge)
    }

    #[test]
    fn decode_completion_swaps_texture_and_notifies() {
        let (texture, runner, mut bridge) = setup();
        let renderer = RecordingRenderer::default();
        bridge.submit(baked(1, Rgba([255, 0, 0, 255])));
        // Nothing changes before the decode runs.
        assert!(bridge.poll(&renderer).is_empty());
        assert!(!texture.needs_upload());

        runner.run_all();
        assert_eq!(bridge.poll(&renderer), vec![ApplyOutcome::Applied(1)]);
        assert!(texture.needs_upload());
        assert_eq!(texture.generation(), 1);
        assert_eq!(*renderer.applied.borrow(), vec![1]);
        let img = texture.take_upload().unwrap();
        assert_eq!(*img.get_pixel(0, 0), Rgba([255, 0, 0, 255]));
        assert!(!texture.needs_upload());
    }

    #[test]
    fn older_generation_finishing_late_is_discarded() {
        let (texture, runner, mut bridge) = setup();
        let renderer = RecordingRenderer::default();
        bridge.submit(baked(5, Rgba([255, 0, 0, 255])));
        bridge.submit(baked(6, Rgba([0, 255, 0, 255])));

        runner.run_newest();
        assert_eq!(bridge.poll(&renderer), vec![ApplyOutcome::Applied(6)]);
        runner.run_newest();
        assert_eq!(bridge.poll(&renderer), vec![ApplyOutcome::Stale(5)]);

        assert_eq!(texture.generation(), 6);
        let img = texture.current_image().unwrap();
        assert_eq!(*img.get_pixel(0, 0), Rgba([0, 255, 0, 255]));
        assert_eq!(bridge.registry().live_count(), 1);
        assert_eq!(*renderer.applied.borrow(), vec![6]);
    }

    #[test]
    fn previous_handle_released_exactly_once_after_install() {
        let (_texture, runner, mut bridge) = setup();
        let renderer = NullRenderer;
        for generation in 1..=10 {
            bridge.submit(baked(generation, Rgba([generation as u8, 0, 0, 255])));
            runner.run_all();
            bridge.poll(&renderer);
            assert_eq!(bridge.registry().live_count(), 1);
        }
        assert_eq!(bridge.registry().released_count(), 9);
        assert_eq!(bridge.installed_generation(), 10);
        assert!(bridge.current_bytes().is_some());
    }

    #[test]
    fn failed_decode_keeps_stale_texture() {
        let (texture, runner, mut bridge) = setup();
        let renderer = NullRenderer;
        bridge.submit(baked(1, Rgba([1, 2, 3, 255])));
        runner.run_all();
        bridge.poll(&renderer);

        bridge.submit(BakedImage {
            generation: 2,
            width: 4,
            height: 4,
            encoded: Arc::from(vec![0u8, 1, 2, 3]),
        });
        runner.run_all();
        let outcomes = bridge.poll(&renderer);
        assert!(matches!(outcomes.as_slice(), [ApplyOutcome::Failed(2, _)]));
        assert_eq!(texture.generation(), 1);
        assert_eq!(bridge.registry().live_count(), 1);
    }

    #[test]
    fn dropped_texture_detaches_without_leaking() {
        let (texture, runner, mut bridge) = setup();
        drop(texture);
        bridge.submit(baked(1, Rgba([0, 0, 0, 255])));
        runner.run_all();
        assert_eq!(bridge.poll(&NullRenderer), vec![ApplyOutcome::Detached(1)]);
        assert_eq!(bridge.registry().live_count(), 0);
    }

    #[test]
    fn dropping_the_bridge_releases_the_installed_handle() {
        let (_texture, runner, mut bridge) = setup();
        let registry = Arc::clone(bridge.registry());
        bridge.submit(baked(1, Rgba([0, 0, 0, 255])));
        runner.run_all();
        bridge.poll(&NullRenderer);
        assert_eq!(registry.live_count(), 1);
        drop(bridge);
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn double_release_is_reported() {
        let registry = ResourceRegistry::new();
        let h = registry.register(Arc::from(vec![1u8]));
        assert!(registry.release(h));
        assert!(!registry.release(h));
        assert_eq!(registry.released_count(), 1);
    }
}
