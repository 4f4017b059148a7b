//! Bulk GeoJSON export.
//!
//! Unlike tiles, exports expose the stored attribute map verbatim with no
//! whitelist filtering. A malformed bbox filter is silently dropped and the
//! export proceeds unfiltered; this asymmetry with the raster path is
//! inherited behavior, kept deliberately.

use std::sync::Arc;

use tracing::warn;

use crate::access::can_see;
use crate::cache::CacheDirective;
use crate::config::EngineConfig;
use crate::directory::LayerDirectory;
use crate::raster::parse_bbox;
use crate::store::{SpatialStore, TableRef};

/// The exact empty document; callers depend on these bytes.
pub const EMPTY_FEATURE_COLLECTION: &str = r#"{"type":"FeatureCollection","features":[]}"#;

#[derive(Clone, Debug)]
pub struct GeoJsonResult {
    pub json: String,
    pub empty: bool,
    pub public_published: bool,
}

impl GeoJsonResult {
    fn empty_collection(public_published: bool) -> Self {
        GeoJsonResult {
            json: EMPTY_FEATURE_COLLECTION.to_string(),
            empty: true,
            public_published,
        }
    }

    pub fn cache_directive(&self) -> CacheDirective {
        CacheDirective::for_geojson(self.public_published)
    }
}

pub struct GeoJsonService {
    directory: Arc<dyn LayerDirectory>,
    store: Arc<dyn SpatialStore>,
    config: EngineConfig,
}

impl GeoJsonService {
    pub fn new(
        directory: Arc<dyn LayerDirectory>,
        store: Arc<dyn SpatialStore>,
        config: EngineConfig,
    ) -> Self {
        GeoJsonService {
            directory,
            store,
            config,
        }
    }

    /// Exports the layer as a FeatureCollection, optionally filtered by a
    /// `minLon,minLat,maxLon,maxLat` bbox in the export SRID.
    pub async fn export_geojson(
        &self,
        slug: &str,
        bbox: Option<&str>,
        caller_is_privileged: bool,
    ) -> GeoJsonResult {
        let layer = match self.directory.find_by_slug(slug).await {
            Ok(Some(layer)) => layer,
            Ok(None) => return GeoJsonResult::empty_collection(false),
            Err(err) => {
                warn!(slug, error = %err, "layer lookup failed");
                return GeoJsonResult::empty_collection(false);
            }
        };

        let public_published = layer.is_published();
        if !can_see(&layer, caller_is_privileged) {
            return GeoJsonResult::empty_collection(public_published);
        }

        let Some(table) = TableRef::from_layer(&layer) else {
            return GeoJsonResult::empty_collection(public_published);
        };

        // A bbox that does not parse is dropped, not an error.
        let bounds = bbox.and_then(parse_bbox);

        let json = match self
            .store
            .feature_collection(&table, bounds, self.config.export_row_limit)
            .await
        {
            Ok(json) => json,
            Err(err) => {
                warn!(slug, error = %err, "geojson export query failed");
                return GeoJsonResult::empty_collection(public_published);
            }
        };

        match collection_is_empty(&json) {
            Some(false) => GeoJsonResult {
                json,
                empty: false,
                public_published,
            },
            // Empty or unparseable results normalize to the canonical bytes.
            _ => GeoJsonResult::empty_collection(public_published),
        }
    }
}

/// `Some(true)` when `json` is a FeatureCollection with no features,
/// `Some(false)` when it has at least one, `None` when it is not a
/// well-formed collection at all.
fn collection_is_empty(json: &str) -> Option<bool> {
    let value: serde_json::Value = serde_json::from_str(json).ok()?;
    let features = value.get("features")?.as_array()?;
    Some(features.is_empty())
}
