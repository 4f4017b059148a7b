//! Property projection resolution.
//!
//! Decides which attribute keys a layer exposes in vector tiles. A stored
//! whitelist wins; otherwise the keys are discovered from the data itself and
//! persisted back onto the layer record, once. Discovery failures are
//! swallowed so tile serving never blocks on metadata repair.

use tracing::{debug, warn};

use crate::directory::LayerDirectory;
use crate::model::Layer;
use crate::store::{SpatialStore, TableRef};

/// Parses a stored whitelist. Accepts a JSON-ish array of strings or a
/// comma-separated list; never fails, garbage yields an empty list.
pub fn parse_whitelist(raw: &str) -> Vec<String> {
    let s = raw.trim();
    if s.is_empty() {
        return Vec::new();
    }

    let inner = if s.starts_with('[') && s.ends_with(']') {
        &s[1..s.len() - 1]
    } else {
        s
    };

    inner
        .split(',')
        .map(|part| {
            let v = part.trim();
            v.strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(v)
                .trim()
        })
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resolves the ordered attribute keys to project for `layer`, upper-cased to
/// match how the ingestion pipeline stored them.
///
/// When the layer has no usable whitelist, keys are auto-discovered: first
/// from a bounded sample of stored `props`, then from the column catalog.
/// A non-empty discovery is persisted back via the directory, best-effort;
/// concurrent first resolutions may race, which is safe because the written
/// value is derived from the same data.
pub async fn resolve_projection(
    layer: &Layer,
    directory: &dyn LayerDirectory,
    store: &dyn SpatialStore,
    sample_limit: i64,
) -> Vec<String> {
    let stored = layer
        .props_whitelist
        .as_deref()
        .map(parse_whitelist)
        .unwrap_or_default();
    if !stored.is_empty() {
        return normalize(stored);
    }

    let Some(table) = TableRef::from_layer(layer) else {
        return Vec::new();
    };

    let discovered = match discover(&table, store, sample_limit).await {
        Ok(keys) => keys,
        Err(err) => {
            warn!(slug = %layer.slug, error = %err, "property discovery failed");
            return Vec::new();
        }
    };
    if discovered.is_empty() {
        warn!(slug = %layer.slug, table = %table.qualified(), "no properties detected");
        return Vec::new();
    }

    let serialized =
        serde_json::to_string(&discovered).unwrap_or_else(|_| discovered.join(","));
    debug!(slug = %layer.slug, whitelist = %serialized, "persisting auto-detected properties");

    let mut updated = layer.clone();
    updated.props_whitelist = Some(serialized);
    if let Err(err) = directory.save(&updated).await {
        // Retried on the next resolution; the list is still usable now.
        warn!(slug = %layer.slug, error = %err, "whitelist write-back failed");
    }

    normalize(discovered)
}

async fn discover(
    table: &TableRef,
    store: &dyn SpatialStore,
    sample_limit: i64,
) -> Result<Vec<String>, sqlx::Error> {
    let keys = store.property_keys(table, sample_limit).await?;
    if !keys.is_empty() {
        return Ok(keys);
    }
    store.table_columns(table).await
}

fn normalize(keys: Vec<String>) -> Vec<String> {
    keys.into_iter()
        .map(|k| k.trim().to_uppercase())
        .filter(|k| !k.is_empty())
        .collect()
}
