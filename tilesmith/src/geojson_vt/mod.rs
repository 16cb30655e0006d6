//! Slicing GeoJSON into vector tiles on the fly.
//!
//! Features are projected and simplified once, then a tile pyramid is built down to
//! `index_max_zoom`. Deeper tiles are cut from the nearest ancestor on request.

mod clip;
mod convert;
mod tile;

use crate::{expression::Properties, geojson::GeoJson, vector_tile::GeomType};
use clip::Axis;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

/// Highest zoom level the index can produce.
pub const MAX_ZOOM: u8 = 24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeoJsonVtOptions {
    /// Max zoom to preserve detail on.
    pub max_zoom: u8,

    /// Max zoom in the initial tile index.
    pub index_max_zoom: u8,

    /// Max number of points per tile in the initial index.
    pub index_max_points: usize,

    /// Simplification tolerance, higher means simpler.
    pub tolerance: f64,

    pub extent: u32,

    /// Tile buffer on each side, in tile units.
    pub buffer: u32,

    /// Track line lengths so that clipped pieces know where they lie on the original.
    pub line_metrics: bool,

    /// Property to use as the feature id.
    pub promote_id: Option<String>,

    /// Use the index of the feature as its id.
    pub generate_id: bool,
}

impl Default for GeoJsonVtOptions {
    fn default() -> Self {
        Self {
            max_zoom: 14,
            index_max_zoom: 5,
            index_max_points: 100_000,
            tolerance: 3.,
            extent: 4096,
            buffer: 64,
            line_metrics: false,
            promote_id: None,
            generate_id: false,
        }
    }
}

/// Projected line or ring. The third coordinate of every point is its importance
/// computed by the simplification.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Slice {
    pub points: Vec<[f64; 3]>,
    /// Length of a line, or area of a ring.
    pub size: f64,
    pub start: f64,
    pub end: f64,
}

impl Slice {
    /// No points, same metrics.
    fn empty(&self) -> Self {
        Self {
            points: Vec::new(),
            size: self.size,
            start: self.start,
            end: self.end,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum VtGeometry {
    Points(Vec<[f64; 3]>),
    LineString(Slice),
    MultiLineString(Vec<Slice>),
    Polygon(Vec<Slice>),
    MultiPolygon(Vec<Vec<Slice>>),
}

impl VtGeometry {
    fn points(&self) -> Box<dyn Iterator<Item = &[f64; 3]> + '_> {
        match self {
            VtGeometry::Points(points) => Box::new(points.iter()),
            VtGeometry::LineString(line) => Box::new(line.points.iter()),
            VtGeometry::MultiLineString(lines) | VtGeometry::Polygon(lines) => {
                Box::new(lines.iter().flat_map(|line| line.points.iter()))
            }
            VtGeometry::MultiPolygon(polygons) => Box::new(
                polygons
                    .iter()
                    .flatten()
                    .flat_map(|line| line.points.iter()),
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct VtFeature {
    pub id: Option<Value>,
    pub geometry: VtGeometry,
    pub tags: Arc<Properties>,
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl VtFeature {
    pub fn new(id: Option<Value>, geometry: VtGeometry, tags: Arc<Properties>) -> Self {
        let mut feature = Self {
            id,
            geometry,
            tags,
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for point in feature.geometry.points() {
            feature.min_x = feature.min_x.min(point[0]);
            feature.min_y = feature.min_y.min(point[1]);
            feature.max_x = feature.max_x.max(point[0]);
            feature.max_y = feature.max_y.max(point[1]);
        }
        feature
    }
}

/// Feature of a tile, in the tile's integer coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct TileFeature {
    pub id: Option<Value>,
    pub kind: GeomType,
    /// Same layout as [`crate::vector_tile::Geometry`].
    pub geometry: crate::vector_tile::Geometry,
    pub tags: Arc<Properties>,
}

#[derive(Debug, Clone)]
pub struct Tile {
    pub features: Vec<TileFeature>,
    pub num_points: usize,
    pub num_simplified: usize,
    pub num_features: usize,
    pub x: u32,
    pub y: u32,
    pub z: u8,

    /// Features to cut children from, kept only where the index stopped splitting.
    source: Option<Vec<VtFeature>>,

    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

fn to_id(z: u8, x: u32, y: u32) -> u64 {
    ((u64::from(1u32 << z) * u64::from(y) + u64::from(x)) << 5) + u64::from(z)
}

/// Tile pyramid over a single GeoJSON document.
pub struct GeoJsonVt {
    options: GeoJsonVtOptions,
    tiles: HashMap<u64, Tile>,
    tile_coords: Vec<(u8, u32, u32)>,
}

impl GeoJsonVt {
    /// # Errors
    ///
    /// When `max_zoom` is out of range, or when both `promote_id` and `generate_id` are
    /// set. `index_max_zoom` is capped at `max_zoom`.
    pub fn new(data: &GeoJson, mut options: GeoJsonVtOptions) -> Result<Self, crate::Error> {
        if options.max_zoom > MAX_ZOOM {
            return Err(crate::Error::Configuration(format!(
                "maxZoom should be in the 0-{MAX_ZOOM} range"
            )));
        }
        if options.index_max_zoom > options.max_zoom {
            log::debug!(
                "Capping indexMaxZoom {} at maxZoom {}.",
                options.index_max_zoom,
                options.max_zoom
            );
            options.index_max_zoom = options.max_zoom;
        }
        if options.promote_id.is_some() && options.generate_id {
            return Err(crate::Error::Configuration(
                "promoteId and generateId cannot be used together.".to_owned(),
            ));
        }

        let features = convert::convert(data, &options);
        let features = clip::wrap(features, &options);

        let mut index = Self {
            options,
            tiles: HashMap::new(),
            tile_coords: Vec::new(),
        };

        log::debug!("Indexing {} features.", features.len());

        if !features.is_empty() {
            index.split_tile(features, 0, 0, 0, None);
        }

        log::debug!("Index has {} tiles.", index.tiles.len());

        Ok(index)
    }

    pub fn options(&self) -> &GeoJsonVtOptions {
        &self.options
    }

    /// Number of tiles generated so far.
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Coordinates of tiles generated so far, in the order they were created.
    pub fn tile_coords(&self) -> &[(u8, u32, u32)] {
        &self.tile_coords
    }

    /// Tile at the given coordinates, cut from its nearest indexed ancestor if needed.
    /// `x` wraps around the world.
    pub fn get_tile(&mut self, z: u8, x: i64, y: u32) -> Option<&Tile> {
        if z > MAX_ZOOM {
            return None;
        }

        let z2 = 1u32 << z;
        if y >= z2 {
            return None;
        }
        let x = u32::try_from(x.rem_euclid(i64::from(z2))).ok()?;

        let id = to_id(z, x, y);
        if !self.tiles.contains_key(&id) {
            let (mut z0, mut x0, mut y0) = (z, x, y);
            let mut parent = None;

            while parent.is_none() && z0 > 0 {
                z0 -= 1;
                x0 >>= 1;
                y0 >>= 1;
                let parent_id = to_id(z0, x0, y0);
                if self.tiles.contains_key(&parent_id) {
                    parent = Some(parent_id);
                }
            }

            let source = self.tiles.get_mut(&parent?)?.source.take()?;
            log::trace!("Drilling down to z{z}-{x}-{y} from z{z0}-{x0}-{y0}.");
            self.split_tile(source, z0, x0, y0, Some((z, x, y)));
        }

        self.tiles.get(&id)
    }

    /// Build tiles from the given features down to `index_max_zoom` or, when a target is
    /// given, down to the target only.
    fn split_tile(
        &mut self,
        features: Vec<VtFeature>,
        z: u8,
        x: u32,
        y: u32,
        target: Option<(u8, u32, u32)>,
    ) {
        let options = &self.options;
        let mut stack = vec![(features, z, x, y)];

        while let Some((features, z, x, y)) = stack.pop() {
            let id = to_id(z, x, y);
            let tile = self.tiles.entry(id).or_insert_with(|| {
                self.tile_coords.push((z, x, y));
                tile::create_tile(&features, z, x, y, options)
            });

            let stop = match target {
                None => {
                    z >= options.index_max_zoom || tile.num_points <= options.index_max_points
                }
                Some((cz, cx, cy)) => {
                    z == options.max_zoom
                        || z >= cz
                        || x != cx >> (cz - z)
                        || y != cy >> (cz - z)
                }
            };

            if stop {
                tile.source = Some(features);
                continue;
            }

            tile.source = None;

            if features.is_empty() {
                continue;
            }

            let z2 = f64::from(1u32 << z);
            let k1 = 0.5 * f64::from(options.buffer) / f64::from(options.extent);
            let k2 = 0.5 - k1;
            let k3 = 0.5 + k1;
            let k4 = 1. + k1;
            let (fx, fy) = (f64::from(x), f64::from(y));
            let (min_x, min_y, max_x, max_y) = (tile.min_x, tile.min_y, tile.max_x, tile.max_y);
            let line_metrics = options.line_metrics;

            let left = clip::clip(&features, z2, fx - k1, fx + k3, Axis::X, min_x, max_x, line_metrics);
            let right = clip::clip(&features, z2, fx + k2, fx + k4, Axis::X, min_x, max_x, line_metrics);
            drop(features);

            let split_y = |features: Option<Vec<VtFeature>>| match features {
                Some(features) => (
                    clip::clip(&features, z2, fy - k1, fy + k3, Axis::Y, min_y, max_y, line_metrics),
                    clip::clip(&features, z2, fy + k2, fy + k4, Axis::Y, min_y, max_y, line_metrics),
                ),
                None => (None, None),
            };

            let (top_left, bottom_left) = split_y(left);
            let (top_right, bottom_right) = split_y(right);

            stack.push((top_left.unwrap_or_default(), z + 1, x * 2, y * 2));
            stack.push((bottom_left.unwrap_or_default(), z + 1, x * 2, y * 2 + 1));
            stack.push((top_right.unwrap_or_default(), z + 1, x * 2 + 1, y * 2));
            stack.push((bottom_right.unwrap_or_default(), z + 1, x * 2 + 1, y * 2 + 1));
        }
    }
}
