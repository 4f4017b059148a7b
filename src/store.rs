//! The spatial data-store boundary.
//!
//! All SQL the engine runs is built here. Identifiers that originate from
//! stored metadata (schema, table, geometry column, attribute keys) pass
//! through an allow-list sanitizer before interpolation; every caller-derived
//! value (tile address, bbox floats, row caps, the source-layer name) is a
//! bound parameter. This split is a security invariant, not a style choice.

use async_trait::async_trait;

use futures::TryStreamExt;

use sqlx::{PgPool, Row};

use crate::config::EngineConfig;
use crate::model::Layer;

/// Replaces every character outside `[A-Za-z0-9_]` with `_`.
///
/// Applied to schema/table/column identifiers before they are interpolated
/// into query text.
pub fn safe_ident(ident: &str) -> String {
    ident
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Strips every character outside `[A-Za-z0-9_]`.
///
/// Applied to attribute keys before they appear inside a `props->>'KEY'`
/// projection.
pub fn safe_prop_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// A sanitized schema+table+geometry-column triple.
///
/// Constructing one is the only way to get identifiers into query text, so
/// the sanitizer cannot be bypassed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableRef {
    schema: String,
    table: String,
    geom_column: String,
}

impl TableRef {
    pub fn new(schema: &str, table: &str, geom_column: &str) -> Self {
        TableRef {
            schema: safe_ident(schema.trim()),
            table: safe_ident(table.trim()),
            geom_column: safe_ident(geom_column.trim()),
        }
    }

    /// Builds a reference from layer metadata, or `None` when the record is
    /// missing any part of its data location.
    pub fn from_layer(layer: &Layer) -> Option<Self> {
        if !layer.has_data_location() {
            return None;
        }
        Some(TableRef::new(
            &layer.schema_name,
            layer.table_name.as_deref().unwrap_or_default(),
            &layer.geom_column,
        ))
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn geom_column(&self) -> &str {
        &self.geom_column
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// Read interface to the spatial engine.
///
/// One method per serving query. The Pg implementation delegates the actual
/// geometry work (re-projection, envelope intersection, tile clipping, MVT
/// encoding) to PostGIS.
#[async_trait]
pub trait SpatialStore: Send + Sync {
    /// Renders one vector tile for the addressed slippy tile. The result set
    /// is encoded by the spatial engine as a single MVT payload whose
    /// source-layer is `source_layer`; an empty intersection yields a
    /// zero-length payload.
    async fn mvt_tile(
        &self,
        table: &TableRef,
        source_layer: &str,
        columns: &[String],
        z: i32,
        x: i32,
        y: i32,
    ) -> Result<Vec<u8>, sqlx::Error>;

    /// Fetches geometries intersecting `bbox` (output SRID) as WKT text,
    /// capped at `limit` rows.
    async fn geometries_as_wkt(
        &self,
        table: &TableRef,
        bbox: [f64; 4],
        limit: i64,
    ) -> Result<Vec<String>, sqlx::Error>;

    /// Builds a complete GeoJSON FeatureCollection document, optionally
    /// filtered by a bbox in the export SRID.
    async fn feature_collection(
        &self,
        table: &TableRef,
        bbox: Option<[f64; 4]>,
        limit: i64,
    ) -> Result<String, sqlx::Error>;

    /// Distinct upper-cased attribute keys present on a bounded sample of
    /// stored rows.
    async fn property_keys(
        &self,
        table: &TableRef,
        sample_limit: i64,
    ) -> Result<Vec<String>, sqlx::Error>;

    /// Column names for the layer's table from the catalog, excluding the
    /// fixed `id`/`geom`/`props` columns.
    async fn table_columns(&self, table: &TableRef) -> Result<Vec<String>, sqlx::Error>;
}

pub struct PgSpatialStore {
    pool: PgPool,
    config: EngineConfig,
}

impl PgSpatialStore {
    pub fn new(pool: PgPool, config: EngineConfig) -> Self {
        PgSpatialStore { pool, config }
    }

    /// Projection list for the MVT query: always `t.id`, then one JSONB
    /// extraction per whitelisted key. Keys are upper-cased and stripped to
    /// `[A-Za-z0-9_]` before interpolation.
    fn projected_columns(columns: &[String]) -> String {
        let mut cols = vec!["t.id".to_string()];
        for key in columns {
            let key = safe_prop_key(key).to_uppercase();
            if !key.is_empty() {
                cols.push(format!("t.props->>'{key}' AS \"{key}\""));
            }
        }
        cols.join(", ")
    }

    fn mvt_sql(&self, table: &TableRef, columns: &[String]) -> String {
        let projected = Self::projected_columns(columns);
        let geom = table.geom_column();
        let qualified = table.qualified();
        let srid = self.config.output_srid;
        let extent = self.config.tile_extent;
        let buffer = self.config.tile_buffer;
        format!(
            "WITH env AS (SELECT ST_TileEnvelope($1, $2, $3) AS box) \
             SELECT COALESCE( \
               (SELECT ST_AsMVT(q, $4, {extent}, 'geom') FROM ( \
                 SELECT {projected}, \
                        ST_AsMVTGeom(ST_Transform(t.{geom}, {srid}), env.box, {extent}, {buffer}, true) AS geom \
                 FROM {qualified} t, env \
                 WHERE ST_Intersects(ST_Transform(t.{geom}, {srid}), env.box) \
               ) AS q), \
               ''::bytea \
             ) AS tile"
        )
    }
}

#[async_trait]
impl SpatialStore for PgSpatialStore {
    async fn mvt_tile(
        &self,
        table: &TableRef,
        source_layer: &str,
        columns: &[String],
        z: i32,
        x: i32,
        y: i32,
    ) -> Result<Vec<u8>, sqlx::Error> {
        let sql = self.mvt_sql(table, columns);
        let row = sqlx::query(&sql)
            .bind(z)
            .bind(x)
            .bind(y)
            .bind(source_layer)
            .fetch_one(&self.pool)
            .await?;
        row.try_get(0)
    }

    async fn geometries_as_wkt(
        &self,
        table: &TableRef,
        bbox: [f64; 4],
        limit: i64,
    ) -> Result<Vec<String>, sqlx::Error> {
        let geom = table.geom_column();
        let qualified = table.qualified();
        let srid = self.config.output_srid;
        let sql = format!(
            "SELECT ST_AsText(ST_Transform(t.{geom}, {srid})) AS wkt \
             FROM {qualified} t \
             WHERE ST_Intersects(ST_Transform(t.{geom}, {srid}), \
                                 ST_MakeEnvelope($1, $2, $3, $4, {srid})) \
             LIMIT $5"
        );
        sqlx::query(&sql)
            .bind(bbox[0])
            .bind(bbox[1])
            .bind(bbox[2])
            .bind(bbox[3])
            .bind(limit)
            .fetch(&self.pool)
            .and_then(|row| async move { row.try_get::<String, _>(0) })
            .try_collect()
            .await
    }

    async fn feature_collection(
        &self,
        table: &TableRef,
        bbox: Option<[f64; 4]>,
        limit: i64,
    ) -> Result<String, sqlx::Error> {
        let geom = table.geom_column();
        let qualified = table.qualified();
        let srid = self.config.export_srid;
        let feature = format!(
            "SELECT jsonb_build_object( \
               'type', 'Feature', \
               'id', t.id, \
               'geometry', ST_AsGeoJSON(ST_Transform(t.{geom}, {srid}), 6)::jsonb, \
               'properties', t.props \
             ) AS feature \
             FROM {qualified} t"
        );
        let row = match bbox {
            Some(b) => {
                let sql = format!(
                    "SELECT jsonb_build_object( \
                       'type', 'FeatureCollection', \
                       'features', COALESCE(jsonb_agg(feature), '[]'::jsonb) \
                     )::text \
                     FROM ({feature} \
                           WHERE ST_Intersects(ST_Transform(t.{geom}, {srid}), \
                                               ST_MakeEnvelope($1, $2, $3, $4, {srid})) \
                           LIMIT $5) AS features"
                );
                sqlx::query(&sql)
                    .bind(b[0])
                    .bind(b[1])
                    .bind(b[2])
                    .bind(b[3])
                    .bind(limit)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT jsonb_build_object( \
                       'type', 'FeatureCollection', \
                       'features', COALESCE(jsonb_agg(feature), '[]'::jsonb) \
                     )::text \
                     FROM ({feature} LIMIT $1) AS features"
                );
                sqlx::query(&sql).bind(limit).fetch_one(&self.pool).await?
            }
        };
        row.try_get(0)
    }

    async fn property_keys(
        &self,
        table: &TableRef,
        sample_limit: i64,
    ) -> Result<Vec<String>, sqlx::Error> {
        let qualified = table.qualified();
        let sql = format!(
            "SELECT DISTINCT UPPER(jsonb_object_keys(props)) AS key FROM ( \
               SELECT props FROM {qualified} \
               WHERE props IS NOT NULL AND props != '{{}}'::jsonb \
               LIMIT $1 \
             ) AS sample"
        );
        sqlx::query(&sql)
            .bind(sample_limit)
            .fetch(&self.pool)
            .and_then(|row| async move { row.try_get::<String, _>(0) })
            .try_collect()
            .await
    }

    async fn table_columns(&self, table: &TableRef) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 \
               AND column_name NOT IN ('id', 'geom', 'props') \
             ORDER BY ordinal_position",
        )
        .bind(table.schema())
        .bind(table.table())
        .fetch(&self.pool)
        .and_then(|row| async move { row.try_get::<String, _>(0) })
        .try_collect()
        .await
    }
}
