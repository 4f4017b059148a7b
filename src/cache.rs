//! Cache directives and media types for the serving endpoints.
//!
//! The engine never writes HTTP headers itself; it hands the hosting layer a
//! directive derived from the publish state and payload emptiness. Published
//! payloads are safe for edge/CDN caching; drafts and denials must never be
//! stored, and an empty published tile gets a short public max-age to absorb
//! retry storms without pinning a stale empty tile for a day.

pub const MVT_MIME: &str = "application/vnd.mapbox-vector-tile";
pub const PNG_MIME: &str = "image/png";
pub const JSON_MIME: &str = "application/json";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheDirective {
    /// Full-fat tile caching: a day, public, immutable.
    PublicImmutable,
    /// Style payloads: a day, public.
    PublicDaily,
    /// GeoJSON exports: an hour, public.
    PublicHourly,
    /// Empty published tiles: short public window.
    PublicShort,
    NoStore,
}

impl CacheDirective {
    pub fn header_value(self) -> &'static str {
        match self {
            CacheDirective::PublicImmutable => "public, max-age=86400, immutable",
            CacheDirective::PublicDaily => "public, max-age=86400",
            CacheDirective::PublicHourly => "public, max-age=3600",
            CacheDirective::PublicShort => "public, max-age=600",
            CacheDirective::NoStore => "no-store",
        }
    }

    /// Directive for a vector tile response.
    pub fn for_tile(published: bool, empty: bool) -> Self {
        match (published, empty) {
            (true, false) => CacheDirective::PublicImmutable,
            (true, true) => CacheDirective::PublicShort,
            (false, _) => CacheDirective::NoStore,
        }
    }

    /// Directive for a raster (WMS-like) response.
    pub fn for_raster(published: bool) -> Self {
        if published {
            CacheDirective::PublicImmutable
        } else {
            CacheDirective::NoStore
        }
    }

    /// Directive for a GeoJSON export response.
    pub fn for_geojson(published: bool) -> Self {
        if published {
            CacheDirective::PublicHourly
        } else {
            CacheDirective::NoStore
        }
    }

    /// Directive for a style response.
    pub fn for_style(published: bool) -> Self {
        if published {
            CacheDirective::PublicDaily
        } else {
            CacheDirective::NoStore
        }
    }
}
