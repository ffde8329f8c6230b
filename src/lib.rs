//! SkinStack: composite image layers into a texture laid out by a mesh's UV
//! unwrap, and keep a live material in sync with the latest bake.
//!
//! [`session::Session`] is the entry point for hosts; the other modules are
//! the pieces it wires together and can be used on their own.

pub mod logger;

pub mod assets;
pub mod cli;
pub mod compositor;
pub mod error;
pub mod jobs;
pub mod layers;
pub mod mesh;
pub mod scheduler;
pub mod session;
pub mod settings;
pub mod texture_sync;
pub mod uv_guide;
pub mod viewport;

pub use error::{DecodeError, EncodeError, FetchError, LoadError};
pub use layers::{Layer, LayerId, LayerSource, LayerStore};
pub use session::Session;
pub use settings::AppSettings;
pub use texture_sync::{BoundTexture, MeshRenderer};
