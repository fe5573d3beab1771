//! Tile payload decoding.
//!
//! Payloads arrive compressed with either zlib or gzip, detected from the
//! leading magic bytes. Vector tiles decompress to a `GeoJSON`
//! `FeatureCollection`; legacy grid tiles decompress to UTFGrid JSON.

use std::{collections::BTreeMap, io::Read as _};

use geojson::GeoJson;
use geostack_models::TileBackend;
use serde::{Deserialize, Serialize};

use crate::ContextError;

/// Leading bytes of a zlib stream at the default compression level.
pub const ZLIB_MAGIC: [u8; 2] = [0x78, 0x9C];

/// Leading bytes of a gzip stream.
pub const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Cells per grid row and column.
pub const GRID_SIZE: usize = 64;

/// Pixels per grid cell.
pub const GRID_RESOLUTION: f64 = 4.0;

/// A decoded tile, ready for point queries.
#[derive(Debug, Clone)]
pub enum DecodedTile {
    /// Vector features with geometry.
    Vector(VectorTile),
    /// A legacy UTFGrid raster.
    Grid(UtfGrid),
}

/// One feature from a vector tile.
#[derive(Debug, Clone)]
pub struct TileFeature {
    /// Feature id within the index.
    pub id: u64,
    /// Display text.
    pub text: String,
    /// Intrinsic score.
    pub score: f64,
    /// Geometry in lng/lat.
    pub geometry: geo::Geometry<f64>,
}

/// All features in a vector tile.
#[derive(Debug, Clone, Default)]
pub struct VectorTile {
    /// Features in payload order.
    pub features: Vec<TileFeature>,
}

/// Per-key payload of a UTFGrid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridEntry {
    /// Feature id within the index.
    pub id: u64,
    /// Display text.
    #[serde(default)]
    pub text: String,
    /// Intrinsic score.
    #[serde(default)]
    pub score: f64,
}

/// A UTFGrid payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UtfGrid {
    /// One string per row, one encoded character per cell.
    pub grid: Vec<String>,
    /// Key for each decoded code. Index 0 is conventionally empty.
    pub keys: Vec<String>,
    /// Feature data by key.
    #[serde(default)]
    pub data: BTreeMap<String, GridEntry>,
}

/// Decodes a UTFGrid character into a key index.
///
/// Code points skip `"` (34) and `\` (92) so grids stay valid JSON.
#[must_use]
pub const fn resolve_code(code: u32) -> Option<usize> {
    let mut code = code;
    if code >= 93 {
        code -= 1;
    }
    if code >= 35 {
        code -= 1;
    }
    if code < 32 {
        return None;
    }
    Some((code - 32) as usize)
}

/// Encodes a key index as a UTFGrid character.
#[must_use]
pub fn encode_code(key: usize) -> Option<char> {
    let mut code = u32::try_from(key).ok()?.checked_add(32)?;
    if code >= 34 {
        code += 1;
    }
    if code >= 92 {
        code += 1;
    }
    char::from_u32(code)
}

/// Inflates a zlib or gzip payload.
///
/// # Errors
///
/// Returns [`ContextError::UnknownCompression`] if the payload carries
/// neither magic, or [`ContextError::Decompress`] if inflation fails.
pub fn decompress(index: &str, bytes: &[u8]) -> Result<Vec<u8>, ContextError> {
    let mut inflated = Vec::new();
    let magic = bytes.get(..2);
    let result = if magic == Some(&ZLIB_MAGIC[..]) {
        flate2::read::ZlibDecoder::new(bytes).read_to_end(&mut inflated)
    } else if magic == Some(&GZIP_MAGIC[..]) {
        flate2::read::GzDecoder::new(bytes).read_to_end(&mut inflated)
    } else {
        return Err(ContextError::UnknownCompression {
            index: index.to_string(),
        });
    };

    result.map_err(|source| ContextError::Decompress {
        index: index.to_string(),
        source,
    })?;
    log::trace!(
        "Inflated {} bytes to {} for index {index}",
        bytes.len(),
        inflated.len()
    );
    Ok(inflated)
}

/// Decompresses and parses a tile payload for an index of `backend`.
///
/// # Errors
///
/// Returns [`ContextError`] if the payload cannot be decompressed or
/// parsed.
pub fn decode(index: &str, backend: TileBackend, bytes: &[u8]) -> Result<DecodedTile, ContextError> {
    let inflated = decompress(index, bytes)?;
    match backend {
        TileBackend::Vector => decode_vector(index, &inflated).map(DecodedTile::Vector),
        TileBackend::Grid => serde_json::from_slice(&inflated)
            .map(DecodedTile::Grid)
            .map_err(|e| ContextError::Decode {
                index: index.to_string(),
                message: e.to_string(),
            }),
    }
}

fn decode_vector(index: &str, bytes: &[u8]) -> Result<VectorTile, ContextError> {
    let invalid = |message: String| ContextError::Decode {
        index: index.to_string(),
        message,
    };

    let text = std::str::from_utf8(bytes).map_err(|e| invalid(e.to_string()))?;
    let geojson: GeoJson = text.parse().map_err(|e: geojson::Error| invalid(e.to_string()))?;
    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(invalid("expected a FeatureCollection".to_string()));
    };

    let mut features = Vec::with_capacity(collection.features.len());
    for feature in collection.features {
        let id = match &feature.id {
            Some(geojson::feature::Id::Number(number)) => number.as_u64(),
            Some(geojson::feature::Id::String(value)) => value.parse().ok(),
            None => None,
        }
        .ok_or_else(|| invalid("feature without a numeric id".to_string()))?;

        let text = feature
            .property("text")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        let score = feature
            .property("score")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or_default();

        let Some(geometry) = feature.geometry else {
            log::debug!("Skipping feature {id} without geometry in index {index}");
            continue;
        };
        let geometry: geo::Geometry<f64> = geometry
            .try_into()
            .map_err(|e: geojson::Error| invalid(e.to_string()))?;

        features.push(TileFeature {
            id,
            text,
            score,
            geometry,
        });
    }

    Ok(VectorTile { features })
}
