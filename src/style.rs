//! Style resolution and persistence.
//!
//! Reads resolve to the stored override, or to a generated default style
//! referencing the layer's tile endpoint. Writes are the one place in the
//! engine that surfaces a caller-visible validation error.

use std::sync::Arc;

use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use tracing::warn;

use crate::access::can_see;
use crate::cache::CacheDirective;
use crate::directory::{LayerDirectory, StyleStore};
use crate::error::Error;
use crate::model::LayerStyle;
use crate::sld::{self, DEFAULT_COLOR, DEFAULT_FILL_OPACITY, DEFAULT_LINE_WIDTH};

/// The effective style for a layer plus conditional-retrieval metadata.
#[derive(Clone, Debug)]
pub struct StyleResult {
    pub json: String,
    pub public_published: bool,
    /// Weak validator over the JSON text, e.g. `W/"5e3f..."`.
    pub etag: String,
}

impl StyleResult {
    /// True when the caller-supplied validator matches and the body can be
    /// skipped with a not-modified response.
    pub fn not_modified(&self, if_none_match: Option<&str>) -> bool {
        if_none_match == Some(self.etag.as_str())
    }

    pub fn cache_directive(&self) -> CacheDirective {
        CacheDirective::for_style(self.public_published)
    }
}

pub struct StyleService {
    directory: Arc<dyn LayerDirectory>,
    styles: Arc<dyn StyleStore>,
}

impl StyleService {
    pub fn new(directory: Arc<dyn LayerDirectory>, styles: Arc<dyn StyleStore>) -> Self {
        StyleService { directory, styles }
    }

    /// Resolves the effective style for `slug`, or `None` when the layer is
    /// absent or the gate denies (the caller renders a plain not-found).
    pub async fn get_effective_style(
        &self,
        slug: &str,
        caller_is_privileged: bool,
    ) -> Option<StyleResult> {
        let layer = match self.directory.find_by_slug(slug).await {
            Ok(layer) => layer?,
            Err(err) => {
                warn!(slug, error = %err, "layer lookup failed");
                return None;
            }
        };

        let public_published = layer.is_published();
        if !can_see(&layer, caller_is_privileged) {
            return None;
        }

        let json = match self.styles.find_by_slug(slug).await {
            Ok(Some(style)) => style.style_json,
            Ok(None) => default_style(slug).to_string(),
            Err(err) => {
                warn!(slug, error = %err, "style lookup failed");
                default_style(slug).to_string()
            }
        };

        let etag = weak_etag(&json);
        Some(StyleResult {
            json,
            public_published,
            etag,
        })
    }

    /// Stores a style override after validating it is a JSON object. The
    /// stored text is the parse/re-serialize round trip of the input.
    pub async fn upsert_style(&self, slug: &str, json: &str) -> Result<(), Error> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| Error::InvalidStyle(e.to_string()))?;
        if !value.is_object() {
            return Err(Error::InvalidStyle(
                "style must be a JSON object".to_string(),
            ));
        }

        let source_ref = match self.styles.find_by_slug(slug).await {
            Ok(existing) => existing.and_then(|s| s.source_ref),
            Err(_) => None,
        };
        self.styles
            .save(&LayerStyle {
                layer_slug: slug.to_string(),
                style_json: value.to_string(),
                source_ref,
            })
            .await?;
        Ok(())
    }

    /// Derives and stores a style from an uploaded SLD document. The layer
    /// must exist; `source_ref` points at wherever the raw document was kept.
    pub async fn upsert_sld(
        &self,
        slug: &str,
        xml: &str,
        source_ref: Option<String>,
    ) -> Result<(), Error> {
        let layer = self.directory.find_by_slug(slug).await?;
        if layer.is_none() {
            return Err(Error::LayerNotFound(slug.to_string()));
        }

        let parsed = sld::parse_style_document(xml);
        let style = sld::build_style_from_rules(&parsed);
        self.styles
            .save(&LayerStyle {
                layer_slug: slug.to_string(),
                style_json: style.to_string(),
                source_ref,
            })
            .await?;
        Ok(())
    }

    /// Removes the override; the next read falls back to the default style.
    pub async fn delete_style(&self, slug: &str) -> Result<(), Error> {
        self.styles.delete(slug).await?;
        Ok(())
    }
}

/// Minimal version-8 style: one vector source pointed at the layer's tile
/// endpoint plus three generic renderers (fill, outline, point) with static
/// paint defaults.
pub fn default_style(slug: &str) -> Value {
    let tiles = format!("/tiles/{slug}/{{z}}/{{x}}/{{y}}.pbf");
    let mut sources = serde_json::Map::new();
    sources.insert(
        slug.to_string(),
        json!({
            "type": "vector",
            "tiles": [tiles]
        }),
    );
    json!({
        "version": 8,
        "sources": sources,
        "layers": [
            {
                "id": format!("{slug}-fill"),
                "type": "fill",
                "source": slug,
                "source-layer": slug,
                "paint": {
                    "fill-color": DEFAULT_COLOR,
                    "fill-opacity": DEFAULT_FILL_OPACITY
                }
            },
            {
                "id": format!("{slug}-outline"),
                "type": "line",
                "source": slug,
                "source-layer": slug,
                "paint": {
                    "line-color": DEFAULT_COLOR,
                    "line-width": DEFAULT_LINE_WIDTH
                }
            },
            {
                "id": format!("{slug}-point"),
                "type": "circle",
                "source": slug,
                "source-layer": slug,
                "paint": {
                    "circle-color": DEFAULT_COLOR,
                    "circle-radius": 4
                }
            }
        ]
    })
}

/// Weak ETag over the style text: `W/"<sha1 hex>"`.
pub fn weak_etag(text: &str) -> String {
    let digest = Sha1::digest(text.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("W/\"{hex}\"")
}
