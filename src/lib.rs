//! # Tile Steward
//!
//! Engine for serving geospatial map layers out of PostGIS in three output
//! forms: Mapbox Vector Tiles, WMS-like raster PNGs, and bulk GeoJSON, plus
//! resolution of a cartographic style per layer (stored override, SLD-derived,
//! or generated default).
//!
//! ## Current status
//!
//! The serving semantics are stable and deployed; the trait surface may still
//! shift. The engine is deliberately framework-free: each operation takes the
//! caller's privilege as a plain `bool` and returns payload bytes together
//! with a cache directive, so the hosting HTTP layer stays thin.
//!
//! ## Design
//!
//! Heavy geometry lifting (re-projection, envelope intersection, tile
//! clipping, MVT encoding) is delegated to PostGIS. The engine owns
//! orchestration, access gating, attribute projection, cache semantics, the
//! SLD transducer, and one piece of native rendering: the raster polygon
//! fill in [`canvas`].
//!
//! Draft layers are indistinguishable from nonexistent layers to unprivileged
//! callers on every read path, and read paths never surface an error: bad
//! input and store failures degrade to empty payloads.

#![deny(warnings)]

use std::sync::Arc;

use sqlx::PgPool;

pub mod access;
pub mod cache;
pub mod canvas;
pub mod config;
pub mod directory;
pub mod error;
pub mod geojson;
pub mod model;
pub mod projection;
pub mod raster;
pub mod sld;
pub mod store;
pub mod style;
pub mod tile;

pub use cache::CacheDirective;
pub use config::EngineConfig;
pub use error::Error;
pub use geojson::{GeoJsonResult, GeoJsonService};
pub use model::{Layer, LayerStyle};
pub use raster::{RasterResult, RasterService};
pub use style::{StyleResult, StyleService};
pub use tile::{TileResult, TileService};

/// Convenience wiring of every service over one Postgres pool.
pub struct TileSteward {
    pub tiles: TileService,
    pub raster: RasterService,
    pub geojson: GeoJsonService,
    pub styles: StyleService,
}

impl TileSteward {
    pub fn new(pool: PgPool, config: EngineConfig) -> Self {
        let directory: Arc<dyn directory::LayerDirectory> =
            Arc::new(directory::PgLayerDirectory::new(pool.clone()));
        let styles: Arc<dyn directory::StyleStore> =
            Arc::new(directory::PgStyleStore::new(pool.clone()));
        let store: Arc<dyn store::SpatialStore> =
            Arc::new(store::PgSpatialStore::new(pool, config.clone()));

        TileSteward {
            tiles: TileService::new(directory.clone(), store.clone(), config.clone()),
            raster: RasterService::new(directory.clone(), store.clone(), config.clone()),
            geojson: GeoJsonService::new(directory.clone(), store, config),
            styles: StyleService::new(directory, styles),
        }
    }
}
