//! Engine tuning knobs.

use serde::Deserialize;

/// Limits and projection constants shared by the serving paths.
///
/// Defaults match the deployed values; a hosting application may deserialize
/// overrides from its own configuration file.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SRID tiles and raster previews are rendered in (web mercator).
    pub output_srid: i32,
    /// SRID GeoJSON exports are re-projected to.
    pub export_srid: i32,
    /// MVT logical tile extent.
    pub tile_extent: u32,
    /// MVT clip buffer, in tile-extent units.
    pub tile_buffer: u32,
    /// Row cap for a single raster render.
    pub raster_row_limit: i64,
    /// Row cap for a single GeoJSON export.
    pub export_row_limit: i64,
    /// Rows sampled when auto-discovering a property whitelist.
    pub property_sample_limit: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            output_srid: 3857,
            export_srid: 4326,
            tile_extent: 4096,
            tile_buffer: 64,
            raster_row_limit: 5000,
            export_row_limit: 10_000,
            property_sample_limit: 100,
        }
    }
}
