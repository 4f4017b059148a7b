//! Lookup and persistence of layer and style records.
//!
//! The traits are the seams the serving engine is tested through; the Pg
//! implementations are thin sqlx wrappers over the `layers` and `layer_styles`
//! tables maintained by the ingestion and admin collaborators.

use async_trait::async_trait;

use sqlx::PgPool;

use crate::model::{Layer, LayerStyle};

#[async_trait]
pub trait LayerDirectory: Send + Sync {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Layer>, sqlx::Error>;

    /// Persists mutable layer metadata. The engine only calls this for the
    /// one-time property-whitelist write-back.
    async fn save(&self, layer: &Layer) -> Result<(), sqlx::Error>;
}

#[async_trait]
pub trait StyleStore: Send + Sync {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<LayerStyle>, sqlx::Error>;
    async fn save(&self, style: &LayerStyle) -> Result<(), sqlx::Error>;
    async fn delete(&self, slug: &str) -> Result<(), sqlx::Error>;
}

pub struct PgLayerDirectory {
    pool: PgPool,
}

impl PgLayerDirectory {
    pub fn new(pool: PgPool) -> Self {
        PgLayerDirectory { pool }
    }
}

#[async_trait]
impl LayerDirectory for PgLayerDirectory {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Layer>, sqlx::Error> {
        sqlx::query_as::<_, Layer>(
            "SELECT id, name, slug, schema_name, table_name, geom_column, srid, \
             feature_count, status, minzoom, maxzoom, props_whitelist \
             FROM layers WHERE slug = $1",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
    }

    async fn save(&self, layer: &Layer) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE layers SET props_whitelist = $2, minzoom = $3, maxzoom = $4, \
             status = $5, updated_at = now() WHERE slug = $1",
        )
        .bind(&layer.slug)
        .bind(&layer.props_whitelist)
        .bind(layer.minzoom)
        .bind(layer.maxzoom)
        .bind(&layer.status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub struct PgStyleStore {
    pool: PgPool,
}

impl PgStyleStore {
    pub fn new(pool: PgPool) -> Self {
        PgStyleStore { pool }
    }
}

#[async_trait]
impl StyleStore for PgStyleStore {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<LayerStyle>, sqlx::Error> {
        sqlx::query_as::<_, LayerStyle>(
            "SELECT layer_slug, style_json, source_ref \
             FROM layer_styles WHERE layer_slug = $1",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
    }

    async fn save(&self, style: &LayerStyle) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO layer_styles (layer_slug, style_json, source_ref) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (layer_slug) DO UPDATE \
             SET style_json = EXCLUDED.style_json, source_ref = EXCLUDED.source_ref",
        )
        .bind(&style.layer_slug)
        .bind(&style.style_json)
        .bind(&style.source_ref)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, slug: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM layer_styles WHERE layer_slug = $1")
            .bind(slug)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
