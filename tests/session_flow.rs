use std::cell::RefCell;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use image::{Rgba, RgbaImage};

use skinstack::assets::FsAssetFetcher;
use skinstack::compositor::encode_png;
use skinstack::jobs::RayonRunner;
use skinstack::mesh::JsonMeshLoader;
use skinstack::scheduler::BakeState;
use skinstack::texture_sync::ResourceHandle;
use skinstack::{AppSettings, BoundTexture, LayerSource, MeshRenderer, Session};

const WAIT: Duration = Duration::from_secs(30);

#[derive(Default)]
struct Recorder {
    generations: RefCell<Vec<u64>>,
}

impl MeshRenderer for Recorder {
    fn on_bake_applied(&self, _handle: ResourceHandle, generation: u64) {
        self.generations.borrow_mut().push(generation);
    }
}

fn data_url(color: Rgba<u8>, w: u32, h: u32) -> LayerSource {
    let png = encode_png(&RgbaImage::from_pixel(w, h, color)).unwrap();
    LayerSource::new(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    ))
}

fn write_mesh(dir: &Path) -> std::path::PathBuf {
    let base = encode_png(&RgbaImage::from_pixel(64, 64, Rgba([0, 128, 0, 255]))).unwrap();
    std::fs::write(dir.join("skin.png"), base).unwrap();
    let mesh = dir.join("avatar.json");
    std::fs::write(
        &mesh,
        r#"{"uvs":[0,0, 1,0, 1,1, 0,1],"indices":[0,1,2, 0,2,3],"base_image":"skin.png"}"#,
    )
    .unwrap();
    mesh
}

fn new_session(texture: &Arc<BoundTexture>) -> Session {
    let settings = AppSettings {
        texture_size: 64,
        ..AppSettings::default()
    };
    Session::new(settings, Arc::new(FsAssetFetcher::new()), Arc::new(RayonRunner), texture)
}

#[test]
fn edits_end_in_one_bound_bake_of_the_latest_state() {
    let dir = tempfile::tempdir().unwrap();
    let texture = Arc::new(BoundTexture::new());
    let mut session = new_session(&texture);
    let renderer = Recorder::default();

    session.load_mesh(&JsonMeshLoader, &write_mesh(dir.path())).unwrap();
    assert_eq!(session.topology().unwrap().triangle_count(), 2);

    let red = session.add_image(data_url(Rgba([255, 0, 0, 255]), 8, 8));
    let blue = session.add_image(data_url(Rgba([0, 0, 255, 255]), 8, 8));
    assert_eq!((red, blue), (0, 1));

    // [red, blue] -> [blue, red], then hide blue.
    assert!(session.move_layer_down(1));
    assert!(session.toggle_visibility(0));
    session.set_layer_position(1, egui::Pos2::new(20.0, 20.0));

    assert!(session.wait_until_idle(&renderer, WAIT));
    assert_eq!(session.bake_state(), BakeState::Idle);

    let image = texture.current_image().expect("a bake was bound");
    assert_eq!(image.dimensions(), (64, 64));
    // Base image shows where no layer is drawn.
    assert_eq!(*image.get_pixel(2, 2), Rgba([0, 128, 0, 255]));
    // The visible red layer moved to (20, 20).
    assert_eq!(*image.get_pixel(23, 23), Rgba([255, 0, 0, 255]));
    // Hidden blue would otherwise cover (2, 2) too.
    assert_ne!(*image.get_pixel(2, 2), Rgba([0, 0, 255, 255]));

    let applied = renderer.generations.borrow();
    assert!(applied.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(applied.last().copied(), Some(session.installed_generation()));
    assert_eq!(session.live_handles(), 1);
}

#[test]
fn failed_mesh_load_leaves_session_untouched() {
    let texture = Arc::new(BoundTexture::new());
    let mut session = new_session(&texture);
    assert!(session.load_mesh(&JsonMeshLoader, Path::new("/no/such/avatar.json")).is_err());
    assert!(session.topology().is_none());
    assert_eq!(session.bake_stats().started, 0);
}

#[test]
fn rows_list_top_layer_first() {
    let texture = Arc::new(BoundTexture::new());
    let mut session = new_session(&texture);
    session.add_image(LayerSource::new("/tmp/first.png"));
    session.add_image(LayerSource::new("/tmp/second.png"));
    session.toggle_visibility(0);

    let rows = session.layer_rows();
    assert_eq!(rows[0].name, "second.png");
    assert_eq!(rows[1].label, "first.png (hidden)");
    assert!(session.wait_until_idle(&Recorder::default(), WAIT));
}
