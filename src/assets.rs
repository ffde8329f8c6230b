// ============================================================================
// ASSETS: resolving layer sources to decoded images, off the host thread
// ============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::RgbaImage;

use crate::error::FetchError;
use crate::jobs::{JobRunner, catch_panic};
use crate::layers::LayerSource;

/// Resolves a layer source to raw (still encoded) image bytes.
pub trait AssetFetcher: Send + Sync {
    fn resolve_image(&self, source: &LayerSource) -> Result<Vec<u8>, FetchError>;
}

/// Local files and inline `data:` URLs. Remote URLs are not fetched.
#[derive(Clone, Debug, Default)]
pub struct FsAssetFetcher {
    root: Option<PathBuf>,
}

impl FsAssetFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relative paths resolve against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve_path(&self, s: &str) -> PathBuf {
        let path = Path::new(s);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl AssetFetcher for FsAssetFetcher {
    fn resolve_image(&self, source: &LayerSource) -> Result<Vec<u8>, FetchError> {
        let s = source.as_str();
        if let Some(rest) = s.strip_prefix("data:") {
            return decode_data_url(rest);
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            return Err(FetchError::Network(format!("remote fetch not available for {}", s)));
        }
        let path = self.resolve_path(s);
        std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FetchError::NotFound(path.display().to_string()),
            _ => FetchError::from(e),
        })
    }
}

/// `<mime>;base64,<payload>` (the part after `data:`).
fn decode_data_url(rest: &str) -> Result<Vec<u8>, FetchError> {
    let Some((meta, payload)) = rest.split_once(',') else {
        return Err(FetchError::UnsupportedContentType("data URL without payload".into()));
    };
    if !meta.ends_with(";base64") {
        return Err(FetchError::UnsupportedContentType(format!(
            "data URL is not base64 encoded ({})",
            meta
        )));
    }
    BASE64
        .decode(payload.trim())
        .map_err(|e| FetchError::Undecodable(format!("bad base64 payload: {}", e)))
}

/// Fetch and decode in one go; what an image job runs.
pub fn load_image(fetcher: &dyn AssetFetcher, source: &LayerSource) -> Result<RgbaImage, FetchError> {
    let bytes = fetcher.resolve_image(source)?;
    let format = image::guess_format(&bytes).map_err(|_| {
        FetchError::UnsupportedContentType(format!("{}: unrecognised image data", source.display_name()))
    })?;
    image::load_from_memory_with_format(&bytes, format)
        .map(|img| img.into_rgba8())
        .map_err(|e| FetchError::Undecodable(e.to_string()))
}

#[derive(Clone, Debug, PartialEq)]
pub enum ImageState {
    Loading,
    Ready(Arc<RgbaImage>),
    Failed(FetchError),
}

/// Decoded layer images keyed by source. Sources shared by several layers
/// are fetched once.
pub struct ImageCache {
    entries: HashMap<LayerSource, ImageState>,
    sender: mpsc::Sender<(LayerSource, Result<RgbaImage, FetchError>)>,
    receiver: mpsc::Receiver<(LayerSource, Result<RgbaImage, FetchError>)>,
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCache {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            entries: HashMap::new(),
            sender,
            receiver,
        }
    }

    /// Start loading `source` unless it is loading or loaded already. A source
    /// that failed before is fetched again. Returns `true` if a fetch was started.
    pub fn request(
        &mut self,
        source: &LayerSource,
        fetcher: &Arc<dyn AssetFetcher>,
        runner: &dyn JobRunner,
    ) -> bool {
        if matches!(
            self.entries.get(source),
            Some(ImageState::Loading | ImageState::Ready(_))
        ) {
            return false;
        }
        self.entries.insert(source.clone(), ImageState::Loading);
        let sender = self.sender.clone();
        let fetcher = Arc::clone(fetcher);
        let source = source.clone();
        runner.spawn(Box::new(move || {
            let result = catch_panic(&format!("load of {}", source.display_name()), || {
                load_image(&*fetcher, &source)
            })
            .unwrap_or_else(|msg| Err(FetchError::Undecodable(msg)));
            let _ = sender.send((source, result));
        }));
        true
    }

    /// Drain finished loads. Returns the sources that became ready.
    pub fn poll(&mut self) -> Vec<LayerSource> {
        let mut ready = Vec::new();
        while let Ok((source, result)) = self.receiver.try_recv() {
            // Forgotten while loading: drop the result.
            let Some(slot) = self.entries.get_mut(&source) else {
                continue;
            };
            match result {
                Ok(img) => {
                    crate::log_info!(
                        "loaded {} ({}x{})",
                        source.display_name(),
                        img.width(),
                        img.height()
                    );
                    *slot = ImageState::Ready(Arc::new(img));
                    ready.push(source);
                }
                Err(e) => {
                    crate::log_warn!("failed to load {}: {}", source.display_name(), e);
                    *slot = ImageState::Failed(e);
                }
            }
        }
        ready
    }

    pub fn state(&self, source: &LayerSource) -> Option<&ImageState> {
        self.entries.get(source)
    }

    pub fn ready(&self, source: &LayerSource) -> Option<Arc<RgbaImage>> {
        match self.entries.get(source) {
            Some(ImageState::Ready(img)) => Some(Arc::clone(img)),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.entries.values().any(|s| matches!(s, ImageState::Loading))
    }

    pub fn forget(&mut self, source: &LayerSource) {
        self.entries.remove(source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{InlineRunner, QueuedRunner};
    use base64::Engine as _;
    use image::Rgba;

    fn png_bytes() -> Vec<u8> {
        let img = RgbaImage::from_pixel(2, 3, Rgba([9, 8, 7, 255]));
        crate::compositor::encode_png(&img).unwrap()
    }

    #[test]
    fn reads_files_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), png_bytes()).unwrap();
        let fetcher = FsAssetFetcher::with_root(dir.path());
        let img = load_image(&fetcher, &LayerSource::new("a.png")).unwrap();
        assert_eq!(img.dimensions(), (2, 3));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FsAssetFetcher::with_root(dir.path());
        let err = fetcher.resolve_image(&LayerSource::new("nope.png")).unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
    }

    #[test]
    fn data_urls_decode() {
        let url = format!("data:image/png;base64,{}", BASE64.encode(png_bytes()));
        let img = load_image(&FsAssetFetcher::new(), &LayerSource::new(url)).unwrap();
        assert_eq!(*img.get_pixel(1, 2), Rgba([9, 8, 7, 255]));
    }

    #[test]
    fn remote_and_unknown_content_fail() {
        let f = FsAssetFetcher::new();
        assert!(matches!(
            f.resolve_image(&LayerSource::new("https://example.com/a.png")),
            Err(FetchError::Network(_))
        ));
        let text = format!("data:text/plain;base64,{}", BASE64.encode(b"hello"));
        assert!(matches!(
            load_image(&f, &LayerSource::new(text)),
            Err(FetchError::UnsupportedContentType(_))
        ));
        assert!(matches!(
            f.resolve_image(&LayerSource::new("data:text/plain,hello")),
            Err(FetchError::UnsupportedContentType(_))
        ));
    }

    #[test]
    fn cache_loads_once_and_reports_ready() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), png_bytes()).unwrap();
        let fetcher: Arc<dyn AssetFetcher> = Arc::new(FsAssetFetcher::with_root(dir.path()));
        let runner = QueuedRunner::new();
        let mut cache = ImageCache::new();
        let src = LayerSource::new("a.png");

        assert!(cache.request(&src, &fetcher, &runner));
        assert!(!cache.request(&src, &fetcher, &runner));
        assert_eq!(runner.pending(), 1);
        assert!(cache.is_loading());
        assert!(cache.ready(&src).is_none());

        runner.run_all();
        assert_eq!(cache.poll(), vec![src.clone()]);
        assert!(cache.ready(&src).is_some());
        assert!(!cache.is_loading());
    }

    #[test]
    fn failures_are_recorded_per_source() {
        let fetcher: Arc<dyn AssetFetcher> = Arc::new(FsAssetFetcher::new());
        let mut cache = ImageCache::new();
        let src = LayerSource::new("/definitely/not/here.png");
        cache.request(&src, &fetcher, &InlineRunner);
        assert!(cache.poll().is_empty());
        assert!(matches!(cache.state(&src), Some(ImageState::Failed(FetchError::NotFound(_)))));
    }

    #[test]
    fn failed_source_is_fetched_again() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher: Arc<dyn AssetFetcher> = Arc::new(FsAssetFetcher::with_root(dir.path()));
        let mut cache = ImageCache::new();
        let src = LayerSource::new("late.png");
        assert!(cache.request(&src, &fetcher, &InlineRunner));
        cache.poll();
        assert!(matches!(cache.state(&src), Some(ImageState::Failed(_))));

        std::fs::write(dir.path().join("late.png"), png_bytes()).unwrap();
        assert!(cache.request(&src, &fetcher, &InlineRunner));
        assert_eq!(cache.poll(), vec![src.clone()]);
        assert!(cache.ready(&src).is_some());
        assert!(!cache.request(&src, &fetcher, &InlineRunner));
    }

    struct PanickingFetcher;

    impl AssetFetcher for PanickingFetcher {
        fn resolve_image(&self, _source: &LayerSource) -> Result<Vec<u8>, FetchError> {
            panic!("fetcher blew up")
        }
    }

    #[test]
    fn panicking_load_is_recorded_as_failure() {
        let fetcher: Arc<dyn AssetFetcher> = Arc::new(PanickingFetcher);
        let runner = QueuedRunner::new();
        let mut cache = ImageCache::new();
        let src = LayerSource::new("a.png");
        cache.request(&src, &fetcher, &runner);
        runner.run_all();
        assert!(cache.poll().is_empty());
        assert!(!cache.is_loading());
        assert!(matches!(
            cache.state(&src),
            Some(ImageState::Failed(FetchError::Undecodable(msg))) if msg.contains("fetcher blew up")
        ));
    }

    #[test]
    fn forgotten_source_ignores_late_result() {
        let fetcher: Arc<dyn AssetFetcher> = Arc::new(FsAssetFetcher::new());
        let runner = QueuedRunner::new();
        let mut cache = ImageCache::new();
        let src = LayerSource::new("/missing.png");
        cache.request(&src, &fetcher, &runner);
        cache.forget(&src);
        runner.run_all();
        cache.poll();
        assert!(cache.state(&src).is_none());
    }
}
