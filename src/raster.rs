//! WMS-like raster rendering.
//!
//! Queries geometries intersecting a bbox as WKT and rasterizes them onto a
//! transparent canvas with a fixed fill and outline. Everything that can go
//! wrong degrades to an empty transparent PNG; the endpoint never errors.

use std::str::FromStr;
use std::sync::Arc;

use geo_types::Geometry;
use image::Rgba;
use tracing::warn;
use wkt::Wkt;

use crate::access::can_see;
use crate::cache::CacheDirective;
use crate::canvas::{empty_png, Canvas, WorldToPixel};
use crate::config::EngineConfig;
use crate::directory::LayerDirectory;
use crate::store::{SpatialStore, TableRef};

/// Semi-transparent fill, `#A3D9A5` at 40% alpha.
const FILL_COLOR: Rgba<u8> = Rgba([163, 217, 165, 102]);
/// Opaque outline, `#154734`.
const STROKE_COLOR: Rgba<u8> = Rgba([21, 71, 52, 255]);

const DEFAULT_SIZE: u32 = 256;
const MAX_SIZE: u32 = 2048;

#[derive(Clone, Debug)]
pub struct RasterResult {
    pub image: Vec<u8>,
    pub empty: bool,
    pub public_published: bool,
}

impl RasterResult {
    fn empty_image(width: u32, height: u32, public_published: bool) -> Self {
        RasterResult {
            image: empty_png(width, height),
            empty: true,
            public_published,
        }
    }

    pub fn cache_directive(&self) -> CacheDirective {
        CacheDirective::for_raster(self.public_published)
    }
}

pub struct RasterService {
    directory: Arc<dyn LayerDirectory>,
    store: Arc<dyn SpatialStore>,
    config: EngineConfig,
}

impl RasterService {
    pub fn new(
        directory: Arc<dyn LayerDirectory>,
        store: Arc<dyn SpatialStore>,
        config: EngineConfig,
    ) -> Self {
        RasterService {
            directory,
            store,
            config,
        }
    }

    /// Renders the layer's geometry inside `bbox` (output SRID,
    /// `minX,minY,maxX,maxY`) as a PNG of the requested dimensions.
    pub async fn get_raster(
        &self,
        slug: &str,
        bbox: &str,
        width: u32,
        height: u32,
        caller_is_privileged: bool,
    ) -> RasterResult {
        if width == 0 || width > MAX_SIZE || height == 0 || height > MAX_SIZE {
            return RasterResult::empty_image(DEFAULT_SIZE, DEFAULT_SIZE, false);
        }

        let layer = match self.directory.find_by_slug(slug).await {
            Ok(Some(layer)) => layer,
            Ok(None) => return RasterResult::empty_image(width, height, false),
            Err(err) => {
                warn!(slug, error = %err, "layer lookup failed");
                return RasterResult::empty_image(width, height, false);
            }
        };

        let public_published = layer.is_published();
        if !can_see(&layer, caller_is_privileged) {
            return RasterResult::empty_image(width, height, public_published);
        }

        let Some(table) = TableRef::from_layer(&layer) else {
            return RasterResult::empty_image(width, height, public_published);
        };

        let Some(bounds) = parse_bbox(bbox) else {
            return RasterResult::empty_image(width, height, public_published);
        };

        let wkt_rows = match self
            .store
            .geometries_as_wkt(&table, bounds, self.config.raster_row_limit)
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                warn!(slug, error = %err, "raster geometry query failed");
                return RasterResult::empty_image(width, height, public_published);
            }
        };
        if wkt_rows.is_empty() {
            return RasterResult::empty_image(width, height, public_published);
        }

        let image = render_png(&wkt_rows, bounds, width, height);
        match image {
            Some(image) => RasterResult {
                image,
                empty: false,
                public_published,
            },
            None => RasterResult::empty_image(width, height, public_published),
        }
    }
}

/// Parses `minX,minY,maxX,maxY`. Anything else is `None`.
pub fn parse_bbox(raw: &str) -> Option<[f64; 4]> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 4 {
        return None;
    }
    let mut out = [0.0; 4];
    for (slot, part) in out.iter_mut().zip(&parts) {
        *slot = part.trim().parse().ok()?;
    }
    Some(out)
}

fn render_png(wkt_rows: &[String], bbox: [f64; 4], width: u32, height: u32) -> Option<Vec<u8>> {
    if bbox[2] <= bbox[0] || bbox[3] <= bbox[1] {
        return None;
    }
    let map = WorldToPixel::new(bbox, width, height);
    let mut canvas = Canvas::new(width, height);

    for wkt in wkt_rows {
        let Some(geometry) = parse_wkt(wkt) else {
            // Unparseable geometry rows are skipped, not fatal.
            continue;
        };
        let loop_points: Vec<(f64, f64)> = flat_vertex_loop(&geometry)
            .into_iter()
            .map(|(x, y)| map.apply(x, y))
            .collect();
        canvas.fill_polygon(&loop_points, FILL_COLOR);
        canvas.stroke_polygon(&loop_points, STROKE_COLOR);
    }

    canvas.encode_png().ok()
}

fn parse_wkt(text: &str) -> Option<Geometry<f64>> {
    let parsed = Wkt::<f64>::from_str(text).ok()?;
    Geometry::try_from(parsed).ok()
}

/// Flattens any geometry into a single closed vertex loop, rings and
/// multi-parts concatenated in storage order.
pub fn flat_vertex_loop(geometry: &Geometry<f64>) -> Vec<(f64, f64)> {
    let mut out = Vec::new();
    collect_vertices(geometry, &mut out);
    out
}

fn collect_vertices(geometry: &Geometry<f64>, out: &mut Vec<(f64, f64)>) {
    match geometry {
        Geometry::Point(p) => out.push((p.x(), p.y())),
        Geometry::Line(l) => {
            out.push((l.start.x, l.start.y));
            out.push((l.end.x, l.end.y));
        }
        Geometry::LineString(ls) => out.extend(ls.coords().map(|c| (c.x, c.y))),
        Geometry::Polygon(poly) => {
            out.extend(poly.exterior().coords().map(|c| (c.x, c.y)));
            for ring in poly.interiors() {
                out.extend(ring.coords().map(|c| (c.x, c.y)));
            }
        }
        Geometry::MultiPoint(mp) => out.extend(mp.iter().map(|p| (p.x(), p.y()))),
        Geometry::MultiLineString(mls) => {
            for ls in mls {
                out.extend(ls.coords().map(|c| (c.x, c.y)));
            }
        }
        Geometry::MultiPolygon(mp) => {
            for poly in mp {
                collect_vertices(&Geometry::Polygon(poly.clone()), out);
            }
        }
        Geometry::GeometryCollection(gc) => {
            for g in gc {
                collect_vertices(g, out);
            }
        }
        Geometry::Rect(r) => collect_vertices(&Geometry::Polygon(r.to_polygon()), out),
        Geometry::Triangle(t) => collect_vertices(&Geometry::Polygon(t.to_polygon()), out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_parses_four_floats() {
        assert_eq!(
            parse_bbox("100.0, 0.5 ,101,1"),
            Some([100.0, 0.5, 101.0, 1.0])
        );
    }

    #[test]
    fn bbox_rejects_malformed_input() {
        assert_eq!(parse_bbox(""), None);
        assert_eq!(parse_bbox("1,2,3"), None);
        assert_eq!(parse_bbox("1,2,3,4,5"), None);
        assert_eq!(parse_bbox("a,b,c,d"), None);
    }

    #[test]
    fn polygon_wkt_flattens_to_vertex_loop() {
        let geom = parse_wkt("POLYGON ((0 0, 10 0, 10 10, 0 10, 0 0))").unwrap();
        let pts = flat_vertex_loop(&geom);
        assert_eq!(pts.len(), 5);
        assert_eq!(pts[0], (0.0, 0.0));
        assert_eq!(pts[2], (10.0, 10.0));
    }

    #[test]
    fn multipolygon_concatenates_parts() {
        let geom = parse_wkt(
            "MULTIPOLYGON (((0 0, 1 0, 1 1, 0 0)), ((5 5, 6 5, 6 6, 5 5)))",
        )
        .unwrap();
        let pts = flat_vertex_loop(&geom);
        assert_eq!(pts.len(), 8);
        assert_eq!(pts[4], (5.0, 5.0));
    }

    #[test]
    fn invalid_wkt_is_skipped() {
        assert!(parse_wkt("POLYGON ((broken").is_none());
        // One bad row must not poison a render.
        let png = render_png(
            &[
                "not wkt at all".to_string(),
                "POLYGON ((0 0, 10 0, 10 10, 0 10, 0 0))".to_string(),
            ],
            [0.0, 0.0, 10.0, 10.0],
            32,
            32,
        );
        assert!(png.is_some());
    }

    #[test]
    fn rendered_polygon_fills_interior_pixels() {
        let png = render_png(
            &["POLYGON ((0 0, 10 0, 10 10, 0 10, 0 0))".to_string()],
            [0.0, 0.0, 10.0, 10.0],
            32,
            32,
        )
        .unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        let center = decoded.get_pixel(16, 16);
        assert!(center[3] > 0);
    }

    #[test]
    fn inverted_bbox_renders_nothing() {
        assert!(render_png(
            &["POLYGON ((0 0, 1 0, 1 1, 0 0))".to_string()],
            [10.0, 10.0, 0.0, 0.0],
            32,
            32
        )
        .is_none());
    }
}
