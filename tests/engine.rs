//! End-to-end engine behavior over in-memory directory and store fakes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use tile_steward::directory::{LayerDirectory, StyleStore};
use tile_steward::geojson::{GeoJsonService, EMPTY_FEATURE_COLLECTION};
use tile_steward::model::{Layer, LayerStyle};
use tile_steward::raster::RasterService;
use tile_steward::store::{SpatialStore, TableRef};
use tile_steward::style::StyleService;
use tile_steward::tile::TileService;
use tile_steward::{CacheDirective, EngineConfig};

#[derive(Default)]
struct MemoryDirectory {
    layers: Mutex<HashMap<String, Layer>>,
    saves: AtomicUsize,
}

impl MemoryDirectory {
    fn with_layer(layer: Layer) -> Arc<Self> {
        let dir = MemoryDirectory::default();
        dir.layers
            .lock()
            .unwrap()
            .insert(layer.slug.clone(), layer);
        Arc::new(dir)
    }

    fn whitelist_of(&self, slug: &str) -> Option<String> {
        self.layers
            .lock()
            .unwrap()
            .get(slug)
            .and_then(|l| l.props_whitelist.clone())
    }
}

#[async_trait]
impl LayerDirectory for MemoryDirectory {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Layer>, sqlx::Error> {
        Ok(self.layers.lock().unwrap().get(slug).cloned())
    }

    async fn save(&self, layer: &Layer) -> Result<(), sqlx::Error> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.layers
            .lock()
            .unwrap()
            .insert(layer.slug.clone(), layer.clone());
        Ok(())
    }
}

#[derive(Default)]
struct MemoryStyles {
    styles: Mutex<HashMap<String, LayerStyle>>,
}

#[async_trait]
impl StyleStore for MemoryStyles {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<LayerStyle>, sqlx::Error> {
        Ok(self.styles.lock().unwrap().get(slug).cloned())
    }

    async fn save(&self, style: &LayerStyle) -> Result<(), sqlx::Error> {
        self.styles
            .lock()
            .unwrap()
            .insert(style.layer_slug.clone(), style.clone());
        Ok(())
    }

    async fn delete(&self, slug: &str) -> Result<(), sqlx::Error> {
        self.styles.lock().unwrap().remove(slug);
        Ok(())
    }
}

/// Canned spatial store. `fail` simulates a broken connection on every query.
#[derive(Default)]
struct MemoryStore {
    tile_bytes: Vec<u8>,
    wkt: Vec<String>,
    feature_json: Option<String>,
    prop_keys: Vec<String>,
    columns: Vec<String>,
    fail: bool,
    tile_queries: AtomicUsize,
    discoveries: AtomicUsize,
}

impl MemoryStore {
    fn failing() -> Self {
        MemoryStore {
            fail: true,
            ..MemoryStore::default()
        }
    }

    fn broken() -> sqlx::Error {
        sqlx::Error::PoolClosed
    }
}

#[async_trait]
impl SpatialStore for MemoryStore {
    async fn mvt_tile(
        &self,
        _table: &TableRef,
        _source_layer: &str,
        _columns: &[String],
        _z: i32,
        _x: i32,
        _y: i32,
    ) -> Result<Vec<u8>, sqlx::Error> {
        if self.fail {
            return Err(Self::broken());
        }
        self.tile_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.tile_bytes.clone())
    }

    async fn geometries_as_wkt(
        &self,
        _table: &TableRef,
        _bbox: [f64; 4],
        _limit: i64,
    ) -> Result<Vec<String>, sqlx::Error> {
        if self.fail {
            return Err(Self::broken());
        }
        Ok(self.wkt.clone())
    }

    async fn feature_collection(
        &self,
        _table: &TableRef,
        _bbox: Option<[f64; 4]>,
        _limit: i64,
    ) -> Result<String, sqlx::Error> {
        if self.fail {
            return Err(Self::broken());
        }
        Ok(self
            .feature_json
            .clone()
            .unwrap_or_else(|| EMPTY_FEATURE_COLLECTION.to_string()))
    }

    async fn property_keys(
        &self,
        _table: &TableRef,
        _sample_limit: i64,
    ) -> Result<Vec<String>, sqlx::Error> {
        if self.fail {
            return Err(Self::broken());
        }
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        Ok(self.prop_keys.clone())
    }

    async fn table_columns(&self, _table: &TableRef) -> Result<Vec<String>, sqlx::Error> {
        if self.fail {
            return Err(Self::broken());
        }
        Ok(self.columns.clone())
    }
}

fn parks(status: &str) -> Layer {
    Layer {
        id: 1,
        name: "Parks".into(),
        slug: "parks".into(),
        schema_name: "gis".into(),
        table_name: Some("layer_parks".into()),
        geom_column: "geom".into(),
        srid: Some(4326),
        feature_count: Some(1),
        status: status.into(),
        minzoom: Some(0),
        maxzoom: Some(22),
        props_whitelist: Some(r#"["NAME"]"#.into()),
    }
}

fn tile_service(directory: Arc<MemoryDirectory>, store: Arc<MemoryStore>) -> TileService {
    TileService::new(directory, store, EngineConfig::default())
}

#[tokio::test]
async fn draft_layer_reads_match_nonexistent_layer() {
    let mut draft = parks("Draft");
    draft.slug = "secret".into();
    let directory = MemoryDirectory::with_layer(draft);
    let store = Arc::new(MemoryStore {
        tile_bytes: vec![1, 2, 3],
        wkt: vec!["POLYGON ((0 0, 1 0, 1 1, 0 0))".into()],
        feature_json: Some(r#"{"type": "FeatureCollection", "features": [1]}"#.into()),
        ..MemoryStore::default()
    });

    let tiles = tile_service(directory.clone(), store.clone());
    let for_draft = tiles.get_tile("secret", 5, 10, 12, false).await;
    let for_missing = tiles.get_tile("no-such-layer", 5, 10, 12, false).await;
    assert_eq!(for_draft.body, for_missing.body);
    assert_eq!(for_draft.empty, for_missing.empty);
    assert_eq!(for_draft.public_published, for_missing.public_published);
    assert_eq!(for_draft.cache_directive(), CacheDirective::NoStore);

    let raster = RasterService::new(directory.clone(), store.clone(), EngineConfig::default());
    let r_draft = raster.get_raster("secret", "0,0,1,1", 256, 256, false).await;
    let r_missing = raster
        .get_raster("no-such-layer", "0,0,1,1", 256, 256, false)
        .await;
    assert_eq!(r_draft.image, r_missing.image);
    assert!(r_draft.empty && r_missing.empty);

    let geojson = GeoJsonService::new(directory.clone(), store.clone(), EngineConfig::default());
    let g_draft = geojson.export_geojson("secret", None, false).await;
    let g_missing = geojson.export_geojson("no-such-layer", None, false).await;
    assert_eq!(g_draft.json, g_missing.json);
    assert_eq!(g_draft.json, EMPTY_FEATURE_COLLECTION);

    let styles = StyleService::new(directory, Arc::new(MemoryStyles::default()));
    assert!(styles.get_effective_style("secret", false).await.is_none());
    assert!(styles
        .get_effective_style("no-such-layer", false)
        .await
        .is_none());
}

#[tokio::test]
async fn draft_layer_is_served_to_privileged_callers() {
    let mut draft = parks("Draft");
    draft.slug = "secret".into();
    let directory = MemoryDirectory::with_layer(draft);
    let store = Arc::new(MemoryStore {
        tile_bytes: vec![9, 9],
        ..MemoryStore::default()
    });

    let tiles = tile_service(directory, store);
    let res = tiles.get_tile("secret", 5, 10, 12, true).await;
    assert!(!res.empty);
    assert_eq!(res.body, vec![9, 9]);
    // Draft tiles are never publicly cacheable, even for privileged callers.
    assert!(!res.public_published);
    assert_eq!(res.cache_directive(), CacheDirective::NoStore);
}

#[tokio::test]
async fn out_of_range_tile_addresses_are_empty_for_everyone() {
    let directory = MemoryDirectory::with_layer(parks("Published"));
    let store = Arc::new(MemoryStore {
        tile_bytes: vec![1],
        ..MemoryStore::default()
    });
    let tiles = tile_service(directory, store.clone());

    for privileged in [false, true] {
        let res = tiles.get_tile("parks", 3, 8, 0, privileged).await;
        assert!(res.empty);
        let res = tiles.get_tile("parks", 3, 0, 8, privileged).await;
        assert!(res.empty);
        let res = tiles.get_tile("parks", -1, 0, 0, privileged).await;
        assert!(res.empty);
    }
    assert_eq!(store.tile_queries.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn zoom_range_is_inclusive_at_both_ends() {
    let mut layer = parks("Published");
    layer.minzoom = Some(2);
    layer.maxzoom = Some(10);
    let directory = MemoryDirectory::with_layer(layer);
    let store = Arc::new(MemoryStore {
        tile_bytes: vec![7],
        ..MemoryStore::default()
    });
    let tiles = tile_service(directory, store.clone());

    assert!(tiles.get_tile("parks", 1, 0, 0, false).await.empty);
    assert!(tiles.get_tile("parks", 11, 0, 0, false).await.empty);
    assert!(!tiles.get_tile("parks", 2, 0, 0, false).await.empty);
    assert!(!tiles.get_tile("parks", 10, 0, 0, false).await.empty);
    assert_eq!(store.tile_queries.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn published_tile_with_data_is_publicly_cacheable() {
    let directory = MemoryDirectory::with_layer(parks("Published"));
    let store = Arc::new(MemoryStore {
        tile_bytes: vec![0x1a, 0x05],
        ..MemoryStore::default()
    });
    let tiles = tile_service(directory, store);

    let res = tiles.get_tile("parks", 5, 10, 12, false).await;
    assert!(!res.empty);
    assert!(res.public_published);
    assert_eq!(res.cache_directive(), CacheDirective::PublicImmutable);
}

#[tokio::test]
async fn empty_published_tile_gets_short_public_cache() {
    let directory = MemoryDirectory::with_layer(parks("Published"));
    let store = Arc::new(MemoryStore::default());
    let tiles = tile_service(directory, store);

    let res = tiles.get_tile("parks", 5, 10, 12, false).await;
    assert!(res.empty);
    assert!(res.body.is_empty());
    assert_eq!(res.cache_directive(), CacheDirective::PublicShort);
}

#[tokio::test]
async fn store_failure_degrades_to_empty_tile() {
    let directory = MemoryDirectory::with_layer(parks("Published"));
    let tiles = tile_service(directory, Arc::new(MemoryStore::failing()));

    let res = tiles.get_tile("parks", 5, 10, 12, false).await;
    assert!(res.empty);
    assert!(res.body.is_empty());
    assert!(res.public_published);
}

#[tokio::test]
async fn projection_discovery_persists_once() {
    let mut layer = parks("Published");
    layer.props_whitelist = None;
    let directory = MemoryDirectory::with_layer(layer);
    let store = Arc::new(MemoryStore {
        tile_bytes: vec![1],
        prop_keys: vec!["NAME".into(), "KIND".into()],
        ..MemoryStore::default()
    });
    let tiles = tile_service(directory.clone(), store.clone());

    tiles.get_tile("parks", 5, 10, 12, false).await;
    assert_eq!(store.discoveries.load(Ordering::SeqCst), 1);
    assert_eq!(directory.saves.load(Ordering::SeqCst), 1);
    let persisted = directory.whitelist_of("parks").unwrap();
    assert_eq!(persisted, r#"["NAME","KIND"]"#);

    // The second request sees the stored whitelist and skips discovery.
    tiles.get_tile("parks", 5, 10, 12, false).await;
    assert_eq!(store.discoveries.load(Ordering::SeqCst), 1);
    assert_eq!(directory.saves.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn projection_discovery_failure_is_not_persisted() {
    let mut layer = parks("Published");
    layer.props_whitelist = None;
    let directory = MemoryDirectory::with_layer(layer);
    let tiles = tile_service(directory.clone(), Arc::new(MemoryStore::failing()));

    let res = tiles.get_tile("parks", 5, 10, 12, false).await;
    assert!(res.empty);
    assert_eq!(directory.saves.load(Ordering::SeqCst), 0);
    assert!(directory.whitelist_of("parks").is_none());
}

#[tokio::test]
async fn raster_invalid_dimensions_fall_back_to_default_size() {
    let directory = MemoryDirectory::with_layer(parks("Published"));
    let raster = RasterService::new(
        directory,
        Arc::new(MemoryStore::default()),
        EngineConfig::default(),
    );

    let res = raster.get_raster("parks", "0,0,1,1", 0, 256, false).await;
    assert!(res.empty);
    let decoded = image::load_from_memory(&res.image).unwrap();
    assert_eq!(decoded.width(), 256);
    assert_eq!(decoded.height(), 256);

    let res = raster.get_raster("parks", "0,0,1,1", 4096, 256, false).await;
    assert!(res.empty);
}

#[tokio::test]
async fn raster_renders_intersecting_geometry() {
    let directory = MemoryDirectory::with_layer(parks("Published"));
    let store = Arc::new(MemoryStore {
        wkt: vec!["POLYGON ((0 0, 10 0, 10 10, 0 10, 0 0))".into()],
        ..MemoryStore::default()
    });
    let raster = RasterService::new(directory, store, EngineConfig::default());

    let res = raster.get_raster("parks", "0,0,10,10", 64, 64, false).await;
    assert!(!res.empty);
    let decoded = image::load_from_memory(&res.image).unwrap().to_rgba8();
    assert!(decoded.get_pixel(32, 32)[3] > 0);
    assert_eq!(res.cache_directive(), CacheDirective::PublicImmutable);
}

#[tokio::test]
async fn raster_malformed_bbox_is_empty() {
    let directory = MemoryDirectory::with_layer(parks("Published"));
    let store = Arc::new(MemoryStore {
        wkt: vec!["POLYGON ((0 0, 1 0, 1 1, 0 0))".into()],
        ..MemoryStore::default()
    });
    let raster = RasterService::new(directory, store, EngineConfig::default());

    let res = raster.get_raster("parks", "not,a,box", 256, 256, false).await;
    assert!(res.empty);
}

#[tokio::test]
async fn geojson_empty_result_is_canonical() {
    let directory = MemoryDirectory::with_layer(parks("Published"));
    let geojson = GeoJsonService::new(
        directory,
        Arc::new(MemoryStore::default()),
        EngineConfig::default(),
    );

    let res = geojson.export_geojson("parks", Some("100,0,101,1"), false).await;
    assert!(res.empty);
    assert_eq!(res.json, r#"{"type":"FeatureCollection","features":[]}"#);
    assert_eq!(res.cache_directive(), CacheDirective::PublicHourly);
}

#[tokio::test]
async fn geojson_malformed_bbox_still_exports() {
    let directory = MemoryDirectory::with_layer(parks("Published"));
    let store = Arc::new(MemoryStore {
        feature_json: Some(
            r#"{"type": "FeatureCollection", "features": [{"type": "Feature", "id": 1}]}"#
                .into(),
        ),
        ..MemoryStore::default()
    });
    let geojson = GeoJsonService::new(directory, store, EngineConfig::default());

    // The broken filter is dropped, not an error; the export proceeds.
    let res = geojson.export_geojson("parks", Some("1,2,banana,4"), false).await;
    assert!(!res.empty);
    assert!(res.json.contains("Feature"));
}

#[tokio::test]
async fn style_round_trip_preserves_json_and_etag() {
    let directory = MemoryDirectory::with_layer(parks("Published"));
    let styles = StyleService::new(directory, Arc::new(MemoryStyles::default()));

    styles.upsert_style("parks", r#"{"a": 1}"#).await.unwrap();

    let first = styles.get_effective_style("parks", true).await.unwrap();
    let second = styles.get_effective_style("parks", true).await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&first.json).unwrap();
    assert_eq!(value, serde_json::json!({"a": 1}));
    assert_eq!(first.etag, second.etag);

    assert!(first.not_modified(Some(first.etag.as_str())));
    assert!(!first.not_modified(Some("W/\"deadbeef\"")));
}

#[tokio::test]
async fn style_upsert_rejects_non_objects() {
    let directory = MemoryDirectory::with_layer(parks("Published"));
    let styles = StyleService::new(directory, Arc::new(MemoryStyles::default()));

    assert!(styles.upsert_style("parks", "[1, 2]").await.is_err());
    assert!(styles.upsert_style("parks", "not json").await.is_err());
    assert!(styles.upsert_style("parks", "42").await.is_err());
}

#[tokio::test]
async fn missing_style_falls_back_to_generated_default() {
    let directory = MemoryDirectory::with_layer(parks("Published"));
    let styles = StyleService::new(directory, Arc::new(MemoryStyles::default()));

    let res = styles.get_effective_style("parks", false).await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&res.json).unwrap();
    assert_eq!(
        value["sources"]["parks"]["tiles"][0],
        "/tiles/parks/{z}/{x}/{y}.pbf"
    );
    assert_eq!(res.cache_directive(), CacheDirective::PublicDaily);
}

#[tokio::test]
async fn sld_upload_derives_and_stores_a_style() {
    let directory = MemoryDirectory::with_layer(parks("Published"));
    let styles = StyleService::new(directory, Arc::new(MemoryStyles::default()));

    let sld = r#"
        <StyledLayerDescriptor>
          <Rule>
            <Filter>
              <PropertyIsEqualTo>
                <PropertyName>kind</PropertyName>
                <Literal>garden</Literal>
              </PropertyIsEqualTo>
            </Filter>
            <CssParameter name="fill">rgb(255, 0, 0)</CssParameter>
          </Rule>
        </StyledLayerDescriptor>"#;
    styles
        .upsert_sld("parks", sld, Some("uploads/parks.sld".into()))
        .await
        .unwrap();

    let res = styles.get_effective_style("parks", true).await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&res.json).unwrap();
    assert_eq!(
        value["fillExpression"],
        serde_json::json!(["match", ["get", "KIND"], "garden", "#FF0000", "#690000"])
    );

    styles
        .upsert_sld("no-such-layer", sld, None)
        .await
        .unwrap_err();
}

#[tokio::test]
async fn deleting_a_style_restores_the_default() {
    let directory = MemoryDirectory::with_layer(parks("Published"));
    let styles = StyleService::new(directory, Arc::new(MemoryStyles::default()));

    styles.upsert_style("parks", r#"{"custom": true}"#).await.unwrap();
    styles.delete_style("parks").await.unwrap();

    let res = styles.get_effective_style("parks", true).await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&res.json).unwrap();
    assert!(value.get("custom").is_none());
    assert_eq!(value["version"], 8);
}
