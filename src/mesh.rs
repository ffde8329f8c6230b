// ============================================================================
// MESH: loading the UV unwrap (and optional base texture) of one model
// ============================================================================

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::LoadError;
use crate::layers::LayerSource;
use crate::uv_guide::UvTopology;

/// What the session needs from a model: its UV unwrap and, if the material
/// had one, the original texture the bake draws over.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadedMesh {
    pub uv_topology: UvTopology,
    pub base_image: Option<LayerSource>,
}

pub trait MeshLoader {
    fn load_mesh(&self, source: &Path) -> Result<LoadedMesh, LoadError>;
}

/// On-disk UV dump: `{ "uvs": [u0, v0, ...], "indices": [...], "base_image": "skin.png" }`.
#[derive(Deserialize)]
struct UvDump {
    uvs: Vec<f32>,
    #[serde(default)]
    indices: Vec<u32>,
    #[serde(default)]
    base_image: Option<String>,
}

/// Loads a JSON UV dump. `base_image` is resolved relative to the JSON file.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonMeshLoader;

impl JsonMeshLoader {
    pub fn parse(text: &str, dir: Option<&Path>) -> Result<LoadedMesh, LoadError> {
        let dump: UvDump = serde_json::from_str(text)?;
        let uv_topology = UvTopology::from_flat(&dump.uvs, dump.indices)?;
        let base_image = dump.base_image.map(|b| resolve_relative(&b, dir));
        Ok(LoadedMesh {
            uv_topology,
            base_image,
        })
    }
}

fn resolve_relative(reference: &str, dir: Option<&Path>) -> LayerSource {
    if reference.starts_with("data:") || reference.contains("://") {
        return LayerSource::new(reference);
    }
    let path = PathBuf::from(reference);
    match dir {
        Some(dir) if path.is_relative() => LayerSource::new(dir.join(path).to_string_lossy()),
        _ => LayerSource::new(reference),
    }
}

impl MeshLoader for JsonMeshLoader {
    fn load_mesh(&self, source: &Path) -> Result<LoadedMesh, LoadError> {
        let text = std::fs::read_to_string(source)
            .map_err(|e| LoadError::Unreachable(format!("{}: {}", source.display(), e)))?;
        let mesh = Self::parse(&text, source.parent())?;
        crate::log_info!(
            "loaded mesh {} ({} vertices, {} triangles)",
            source.display(),
            mesh.uv_topology.vertex_count(),
            mesh.uv_topology.triangle_count()
        );
        Ok(mesh)
    }
}
