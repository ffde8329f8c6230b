// ============================================================================
// ERROR TYPES: one enum per failure domain, all degrade to "keep prior state"
// ============================================================================

use std::fmt;

/// Mesh could not be loaded. Fatal to initialisation of that mesh only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The mesh source could not be read at all.
    Unreachable(String),
    /// The mesh source was read but its contents are invalid.
    Malformed(String),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Unreachable(e) => write!(f, "mesh unreachable: {}", e),
            LoadError::Malformed(e) => write!(f, "malformed mesh: {}", e),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        LoadError::Unreachable(e.to_string())
    }
}

impl From<serde_json::Error> for LoadError {
    fn from(e: serde_json::Error) -> Self {
        LoadError::Malformed(e.to_string())
    }
}

/// A single layer image could not be resolved. Local to that layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    Network(String),
    NotFound(String),
    UnsupportedContentType(String),
    /// Bytes were fetched and recognised but failed to decode.
    Undecodable(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Network(e) => write!(f, "network error: {}", e),
            FetchError::NotFound(e) => write!(f, "not found: {}", e),
            FetchError::UnsupportedContentType(e) => write!(f, "unsupported content type: {}", e),
            FetchError::Undecodable(e) => write!(f, "undecodable image: {}", e),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => FetchError::NotFound(e.to_string()),
            _ => FetchError::Network(e.to_string()),
        }
    }
}

/// Bake raster serialization failed. The previously applied bake stays bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Zero-sized canvas, nothing to encode.
    Empty,
    Backend(String),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::Empty => write!(f, "cannot encode an empty raster"),
            EncodeError::Backend(e) => write!(f, "encode failed: {}", e),
        }
    }
}

impl std::error::Error for EncodeError {}

impl From<image::ImageError> for EncodeError {
    fn from(e: image::ImageError) -> Self {
        EncodeError::Backend(e.to_string())
    }
}

/// Decoding a baked image for the bound texture failed. No retry is scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    Backend(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Backend(e) => write!(f, "decode failed: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<image::ImageError> for DecodeError {
    fn from(e: image::ImageError) -> Self {
        DecodeError::Backend(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_maps_to_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(FetchError::from(io), FetchError::NotFound(_)));
    }

    #[test]
    fn other_io_failures_map_to_network() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(FetchError::from(io), FetchError::Network(_)));
    }

    #[test]
    fn bad_json_is_malformed() {
        let err = serde_json::from_str::<Vec<u32>>("{").unwrap_err();
        assert!(matches!(LoadError::from(err), LoadError::Malformed(_)));
    }

    #[test]
    fn display_names_the_failure() {
        assert_eq!(
            LoadError::Unreachable("avatar.json".into()).to_string(),
            "mesh unreachable: avatar.json"
        );
        assert_eq!(EncodeError::Empty.to_string(), "cannot encode an empty raster");
    }
}
