//! Vector tile orchestration.

use std::sync::Arc;

use tracing::warn;

use crate::access::can_see;
use crate::cache::CacheDirective;
use crate::config::EngineConfig;
use crate::directory::LayerDirectory;
use crate::projection::resolve_projection;
use crate::store::{SpatialStore, TableRef};

/// One rendered tile plus the facts the hosting layer needs for status and
/// cache headers.
#[derive(Clone, Debug)]
pub struct TileResult {
    pub body: Vec<u8>,
    pub empty: bool,
    /// True only when the layer is Published; drives public cacheability.
    /// A draft denial is never cacheable, while a published-but-empty tile
    /// still gets the short public window.
    pub public_published: bool,
}

impl TileResult {
    fn empty_tile(public_published: bool) -> Self {
        TileResult {
            body: Vec::new(),
            empty: true,
            public_published,
        }
    }

    pub fn cache_directive(&self) -> CacheDirective {
        CacheDirective::for_tile(self.public_published, self.empty)
    }
}

/// Serves MVT tiles for one layer per request. Stateless; every failure on
/// the way to tile bytes degrades to an empty tile rather than an error.
pub struct TileService {
    directory: Arc<dyn LayerDirectory>,
    store: Arc<dyn SpatialStore>,
    config: EngineConfig,
}

impl TileService {
    pub fn new(
        directory: Arc<dyn LayerDirectory>,
        store: Arc<dyn SpatialStore>,
        config: EngineConfig,
    ) -> Self {
        TileService {
            directory,
            store,
            config,
        }
    }

    /// Renders the vector tile for `slug` at z/x/y.
    ///
    /// Unknown slugs, gate denials, out-of-range addresses, zoom hints, and
    /// query failures all produce an empty tile; only the cacheability flag
    /// distinguishes them, and only by publish state.
    pub async fn get_tile(
        &self,
        slug: &str,
        z: i32,
        x: i32,
        y: i32,
        caller_is_privileged: bool,
    ) -> TileResult {
        let layer = match self.directory.find_by_slug(slug).await {
            Ok(Some(layer)) => layer,
            Ok(None) => return TileResult::empty_tile(false),
            Err(err) => {
                warn!(slug, error = %err, "layer lookup failed");
                return TileResult::empty_tile(false);
            }
        };

        let public_published = layer.is_published();
        if !can_see(&layer, caller_is_privileged) {
            return TileResult::empty_tile(public_published);
        }

        if !tile_address_in_range(z, x, y) {
            return TileResult::empty_tile(public_published);
        }

        if layer.minzoom.is_some_and(|minz| z < minz)
            || layer.maxzoom.is_some_and(|maxz| z > maxz)
        {
            return TileResult::empty_tile(public_published);
        }

        let Some(table) = TableRef::from_layer(&layer) else {
            return TileResult::empty_tile(public_published);
        };

        let columns = resolve_projection(
            &layer,
            self.directory.as_ref(),
            self.store.as_ref(),
            self.config.property_sample_limit,
        )
        .await;

        match self
            .store
            .mvt_tile(&table, &layer.slug, &columns, z, x, y)
            .await
        {
            Ok(body) if body.is_empty() => TileResult::empty_tile(public_published),
            Ok(body) => TileResult {
                body,
                empty: false,
                public_published,
            },
            Err(err) => {
                warn!(slug, z, x, y, error = %err, "tile query failed");
                TileResult::empty_tile(public_published)
            }
        }
    }
}

/// Validates a slippy tile address: non-negative, with `x,y < 2^z`. For
/// `z >= 31` the bound would overflow `i32`, so it is treated as unbounded.
pub fn tile_address_in_range(z: i32, x: i32, y: i32) -> bool {
    if z < 0 || x < 0 || y < 0 {
        return false;
    }
    if z >= 31 {
        return true;
    }
    let max_index = 1i32 << z;
    x < max_index && y < max_index
}
