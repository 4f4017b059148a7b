//! Layer and style metadata records.
//!
//! These rows are created and updated by the ingestion and admin collaborators;
//! the engine only reads them, with one exception: the lazy property-whitelist
//! write-back performed by [`crate::projection`].

use serde::{Deserialize, Serialize};

/// Metadata for one published map layer.
///
/// `schema_name`, `table_name`, and `geom_column` locate the feature table the
/// ingestion pipeline wrote for this layer. Attribute values live in a JSONB
/// `props` column on that table, keyed by upper-cased attribute names.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Layer {
    pub id: i64,
    /// Display name (metadata only).
    pub name: String,
    /// Unique key used for routing and as the MVT source-layer name.
    pub slug: String,
    pub schema_name: String,
    pub table_name: Option<String>,
    pub geom_column: String,
    /// SRID of the stored geometry; output is always re-projected at read time.
    pub srid: Option<i32>,
    pub feature_count: Option<i64>,
    /// `Draft` or `Published`. Draft layers must be indistinguishable from
    /// nonexistent layers for unprivileged callers.
    pub status: String,
    /// Zoom hints; requests outside `[minzoom, maxzoom]` yield an empty tile.
    pub minzoom: Option<i32>,
    pub maxzoom: Option<i32>,
    /// JSON array or comma-separated list of attribute keys approved for
    /// exposure in vector tiles. Empty/absent triggers one-time auto-discovery.
    pub props_whitelist: Option<String>,
}

impl Layer {
    pub fn is_published(&self) -> bool {
        self.status.eq_ignore_ascii_case("published")
    }

    /// True when the layer record carries enough location metadata to query.
    pub fn has_data_location(&self) -> bool {
        !self.schema_name.trim().is_empty()
            && self.table_name.as_deref().is_some_and(|t| !t.trim().is_empty())
            && !self.geom_column.trim().is_empty()
    }
}

/// Stored style override for a layer, keyed 1:1 by slug.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct LayerStyle {
    pub layer_slug: String,
    /// Arbitrary JSON paint/layer specification, serialized.
    pub style_json: String,
    /// Reference to the uploaded raw style document, when one exists.
    pub source_ref: Option<String>,
}
