// ============================================================================
// SkinStack CLI: headless bake of a layer stack onto a mesh's UV layout
// ============================================================================
//
// Usage examples:
//   skinstack --mesh avatar.json --layer logo.png@120,80 --output skin.png
//   skinstack -m avatar.json -l "decals/*.png" -l eyes.png@200,40,15,0.5 -o out.png
//   skinstack -m avatar.json --guide-output uv.png --size 1024
//
// The same session pipeline the editor uses runs here: images load and bakes
// render on the rayon pool, and the command waits for the pipeline to settle.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use egui::{Pos2, Vec2};

use crate::assets::{AssetFetcher, FsAssetFetcher, ImageState};
use crate::compositor::encode_png;
use crate::jobs::RayonRunner;
use crate::layers::{Layer, LayerSource};
use crate::mesh::JsonMeshLoader;
use crate::session::Session;
use crate::settings::AppSettings;
use crate::texture_sync::{BoundTexture, MeshRenderer, ResourceHandle};
use crate::{log_info, logger};

const BAKE_TIMEOUT: Duration = Duration::from_secs(120);

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// SkinStack headless texture baker.
#[derive(Parser, Debug)]
#[command(
    name = "skinstack",
    about = "Composite image layers into a UV texture without opening an editor",
    long_about = "Stack image layers onto a mesh's UV layout and bake the result to PNG.\n\n\
                  Example:\n  \
                  skinstack --mesh avatar.json --layer logo.png@120,80 --output skin.png\n  \
                  skinstack -m avatar.json -l \"decals/*.png\" -o out.png --with-guide"
)]
pub struct CliArgs {
    /// UV dump of the target mesh (JSON with "uvs", "indices", optional "base_image").
    #[arg(short, long, value_name = "MESH.json")]
    pub mesh: Option<PathBuf>,

    /// Layer image, bottom-most first. Repeatable; glob patterns accepted.
    /// Append "@x,y[,degrees[,scale]]" to place the layer.
    #[arg(short, long, value_name = "IMAGE[@x,y[,deg[,scale]]]")]
    pub layer: Vec<String>,

    /// Where to write the baked texture.
    #[arg(short, long, value_name = "FILE.png", default_value = "bake.png")]
    pub output: PathBuf,

    /// Also write the UV guide overlay on its own. Requires --mesh.
    #[arg(long, value_name = "FILE.png")]
    pub guide_output: Option<PathBuf>,

    /// Texture side length in pixels (overrides the settings file).
    #[arg(short, long, value_name = "PIXELS")]
    pub size: Option<u32>,

    /// Draw the UV guide into the baked texture.
    #[arg(long)]
    pub with_guide: bool,

    /// Settings file to use instead of the per-user one.
    #[arg(long, value_name = "FILE.cfg")]
    pub settings: Option<PathBuf>,

    /// Log debug detail and echo the log to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Placement parsed from a `@x,y[,deg[,scale]]` suffix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub position: Pos2,
    pub rotation_deg: f32,
    pub scale: f32,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            position: Pos2::ZERO,
            rotation_deg: 0.0,
            scale: 1.0,
        }
    }
}

/// Renderer stand-in that just logs each applied bake.
struct LogRenderer;

impl MeshRenderer for LogRenderer {
    fn on_bake_applied(&self, handle: ResourceHandle, generation: u64) {
        log_info!("bake {} bound to texture ({})", generation, handle);
    }
}

/// What a successful headless bake produced.
#[derive(Debug)]
pub struct BakeReport {
    pub layers: usize,
    pub skipped: usize,
    pub generation: u64,
    pub output: PathBuf,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the bake and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    logger::init();
    logger::set_verbose(args.verbose);

    let start = Instant::now();
    match bake(&args) {
        Ok(report) => {
            if report.skipped > 0 {
                eprintln!(
                    "warning: {} of {} layer(s) could not be loaded and were left out.",
                    report.skipped, report.layers
                );
            }
            println!(
                "baked {} layer(s) -> {} ({:.2}s)",
                report.layers - report.skipped,
                report.output.display(),
                start.elapsed().as_secs_f64()
            );
            ExitCode::SUCCESS
        }
        Err(msg) => {
            eprintln!("error: {}", msg);
            crate::log_err!("cli bake failed: {}", msg);
            ExitCode::FAILURE
        }
    }
}

/// Build a session from `args`, let it settle, and write the outputs.
pub fn bake(args: &CliArgs) -> Result<BakeReport, String> {
    let mut settings = match &args.settings {
        Some(path) => AppSettings::load_from(path),
        None => AppSettings::load(),
    };
    if let Some(size) = args.size {
        if size == 0 {
            return Err("--size must be at least 1".to_string());
        }
        settings.texture_size = size;
    }
    if args.with_guide {
        settings.bake_guide = true;
    }
    if args.guide_output.is_some() && args.mesh.is_none() {
        return Err("--guide-output needs --mesh".to_string());
    }

    let texture = Arc::new(BoundTexture::new());
    let fetcher: Arc<dyn AssetFetcher> = Arc::new(FsAssetFetcher::new());
    let mut session = Session::new(settings, fetcher, Arc::new(RayonRunner), &texture);

    if let Some(mesh) = &args.mesh {
        session
            .load_mesh(&JsonMeshLoader, mesh)
            .map_err(|e| format!("could not load mesh '{}': {}", mesh.display(), e))?;
    }

    let mut sources = Vec::new();
    for arg in &args.layer {
        let (pattern, placement) = split_layer_arg(arg);
        let paths = resolve_inputs(pattern);
        if paths.is_empty() {
            eprintln!("warning: layer '{}' matched no files.", pattern);
        }
        for path in paths {
            let source = LayerSource::new(path.to_string_lossy());
            let layer = Layer::from_source(source.clone())
                .with_position(placement.position)
                .with_rotation(placement.rotation_deg.to_radians())
                .with_scale(Vec2::splat(placement.scale));
            session.add_layer(layer);
            sources.push(source);
        }
    }

    // A bare mesh or an empty stack still produces a (background-only) bake.
    if session.bake_stats().started == 0 {
        session.request_bake();
    }

    if !session.wait_until_idle(&LogRenderer, BAKE_TIMEOUT) {
        return Err(format!("bake did not finish within {}s", BAKE_TIMEOUT.as_secs()));
    }
    if let Some(e) = session.last_bake_error() {
        return Err(e.to_string());
    }

    let skipped = sources
        .iter()
        .filter(|s| !matches!(session.image_state(s), Some(ImageState::Ready(_))))
        .count();

    let written = session
        .export_latest(&args.output)
        .map_err(|e| format!("could not write '{}': {}", args.output.display(), e))?;
    if !written {
        return Err("no bake was produced".to_string());
    }

    if let Some(guide_path) = &args.guide_output {
        write_guide(&session, guide_path)?;
    }

    Ok(BakeReport {
        layers: sources.len(),
        skipped,
        generation: session.installed_generation(),
        output: args.output.clone(),
    })
}

fn write_guide(session: &Session, path: &Path) -> Result<(), String> {
    let guide = session
        .guide_image()
        .ok_or_else(|| "mesh has no UV guide".to_string())?;
    let png = encode_png(guide).map_err(|e| e.to_string())?;
    std::fs::write(path, png).map_err(|e| format!("could not write '{}': {}", path.display(), e))?;
    log_info!("wrote uv guide to {}", path.display());
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Split `pattern@x,y[,deg[,scale]]`. A suffix that doesn't parse is treated
/// as part of the file name.
pub fn split_layer_arg(arg: &str) -> (&str, Placement) {
    if let Some((pattern, suffix)) = arg.rsplit_once('@')
        && let Some(placement) = parse_placement(suffix)
    {
        return (pattern, placement);
    }
    (arg, Placement::default())
}

fn parse_placement(s: &str) -> Option<Placement> {
    let parts: Vec<f32> = s
        .split(',')
        .map(|p| p.trim().parse::<f32>().ok().filter(|v| v.is_finite()))
        .collect::<Option<_>>()?;
    let mut placement = Placement::default();
    match parts.as_slice() {
        [x, y] => placement.position = Pos2::new(*x, *y),
        [x, y, deg] => {
            placement.position = Pos2::new(*x, *y);
            placement.rotation_deg = *deg;
        }
        [x, y, deg, scale] => {
            placement.position = Pos2::new(*x, *y);
            placement.rotation_deg = *deg;
            placement.scale = *scale;
        }
        _ => return None,
    }
    Some(placement)
}

/// Expand a literal path or glob pattern into concrete files, in order.
fn resolve_inputs(pattern: &str) -> Vec<PathBuf> {
    let as_path = Path::new(pattern);
    if as_path.exists() {
        return vec![as_path.to_path_buf()];
    }
    match glob::glob(pattern) {
        Ok(entries) => entries.flatten().collect(),
        Err(e) => {
            eprintln!("warning: invalid glob '{}': {}", pattern, e);
            Vec::new()
        }
    }
}
