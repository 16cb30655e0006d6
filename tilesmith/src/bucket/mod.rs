//! Renderable geometry of a layer family in a single tile.

mod circle;
mod fill;
mod line;
mod symbol;

pub use circle::{CircleBucket, CircleVertex};
pub use fill::FillBucket;
pub use line::{LineBucket, LineVertex};
pub use symbol::{SymbolBucket, SymbolInstance, SymbolLayoutParameters, SymbolQuad};

use crate::{
    atlas::{ImagePosition, ImagePositions},
    expression::{Context, to_string},
    feature_index::FeatureIndex,
    style::{EvaluatedLayer, EvaluationParameters, Family, LayerType},
    vector_tile::{Geometry, TilePoint, VectorTileFeature},
};
use geo::Area as _;
use geo_types::{LineString, Polygon};
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Range,
};

/// Everything a bucket needs to know about where it is built.
#[derive(Debug, Clone)]
pub struct BucketParameters {
    /// Position of the bucket in the feature index.
    pub index: usize,
    pub family: Family,
    /// Family evaluated at the zoom of the tile.
    pub layers: Vec<EvaluatedLayer>,
    pub zoom: f64,
    pub pixel_ratio: f32,
    pub overscaling: u32,
    pub source_layer_index: u32,
    pub source_id: String,
}

impl BucketParameters {
    pub fn layer_ids(&self) -> Vec<String> {
        self.family.iter().map(|layer| layer.id().to_owned()).collect()
    }

    fn recalculate(&mut self, parameters: &EvaluationParameters) {
        self.layers = self
            .family
            .iter()
            .map(|layer| layer.recalculate(parameters))
            .collect();
    }

    /// Features accepted by the filter of the family.
    fn accepted<'a, 'f>(
        &'a self,
        features: &'a [BucketFeature<'f>],
    ) -> impl Iterator<Item = &'a BucketFeature<'f>> + 'a {
        features.iter().filter(|feature| {
            self.family.first().is_some_and(|layer| {
                let context = Context::new(self.zoom, &feature.feature.properties)
                    .with_id(feature.id.as_ref())
                    .with_geometry_type(feature.feature.kind);
                layer.matches(&context)
            })
        })
    }
}

/// Feature of a source layer, as handed to every bucket built from that layer.
#[derive(Debug, Clone)]
pub struct BucketFeature<'a> {
    pub feature: &'a VectorTileFeature,
    pub id: Option<Value>,
    /// Position in the source layer.
    pub index: usize,
    pub source_layer_index: u32,
}

impl BucketFeature<'_> {
    fn context<'a>(&'a self, layer: &'a EvaluatedLayer) -> Context<'a> {
        layer
            .context(&self.feature.properties)
            .with_id(self.id.as_ref())
            .with_geometry_type(self.feature.kind)
    }
}

/// Resources the buckets of a tile are waiting for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies {
    /// Code points by font stack.
    pub glyphs: BTreeMap<String, BTreeSet<u32>>,
    pub icons: BTreeSet<String>,
    pub patterns: BTreeSet<String>,
}

/// Pattern of a single layer, for a single feature.
#[derive(Debug, Clone, PartialEq)]
pub struct FeaturePattern {
    pub name: String,
    /// Filled in once the image atlas is known.
    pub position: Option<ImagePosition>,
}

/// Vertices of a feature drawn with patterns.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternFeature {
    pub vertices: Range<usize>,
    /// Keyed by layer id.
    pub patterns: BTreeMap<String, FeaturePattern>,
}

/// Feature kept aside until its patterns are in the atlas.
#[derive(Debug, Clone)]
struct PendingPatternFeature {
    geometry: Geometry,
    patterns: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub enum Bucket {
    Fill(FillBucket),
    Line(LineBucket),
    Circle(CircleBucket),
    Symbol(SymbolBucket),
}

impl Bucket {
    /// Bucket for the family, `None` for layer types which are not drawn from tile
    /// features.
    pub fn new(parameters: BucketParameters) -> Option<Self> {
        let kind = parameters.family.first()?.kind();
        match kind {
            LayerType::Fill | LayerType::FillExtrusion => {
                Some(Self::Fill(FillBucket::new(parameters)))
            }
            LayerType::Line => Some(Self::Line(LineBucket::new(parameters))),
            LayerType::Circle | LayerType::Heatmap => {
                Some(Self::Circle(CircleBucket::new(parameters)))
            }
            LayerType::Symbol => Some(Self::Symbol(SymbolBucket::new(parameters))),
            LayerType::Background | LayerType::Raster | LayerType::Hillshade => None,
        }
    }

    pub fn parameters(&self) -> &BucketParameters {
        match self {
            Self::Fill(bucket) => &bucket.parameters,
            Self::Line(bucket) => &bucket.parameters,
            Self::Circle(bucket) => &bucket.parameters,
            Self::Symbol(bucket) => &bucket.parameters,
        }
    }

    pub fn layer_ids(&self) -> Vec<String> {
        self.parameters().layer_ids()
    }

    /// Take features of the source layer, recording which glyphs and images they need.
    pub fn populate(
        &mut self,
        features: &[BucketFeature<'_>],
        dependencies: &mut Dependencies,
        feature_index: &mut FeatureIndex,
    ) {
        match self {
            Self::Fill(bucket) => bucket.populate(features, dependencies, feature_index),
            Self::Line(bucket) => bucket.populate(features, dependencies, feature_index),
            Self::Circle(bucket) => bucket.populate(features, feature_index),
            Self::Symbol(bucket) => bucket.populate(features, dependencies, feature_index),
        }
    }

    pub fn recalculate(&mut self, parameters: &EvaluationParameters) {
        match self {
            Self::Fill(bucket) => bucket.parameters.recalculate(parameters),
            Self::Line(bucket) => bucket.parameters.recalculate(parameters),
            Self::Circle(bucket) => bucket.parameters.recalculate(parameters),
            Self::Symbol(bucket) => bucket.parameters.recalculate(parameters),
        }
    }

    pub fn has_pattern(&self) -> bool {
        match self {
            Self::Fill(bucket) => bucket.has_pattern(),
            Self::Line(bucket) => bucket.has_pattern(),
            Self::Circle(_) | Self::Symbol(_) => false,
        }
    }

    /// Build the geometry which was waiting for patterns.
    pub fn add_features(&mut self, pattern_positions: &ImagePositions) {
        match self {
            Self::Fill(bucket) => bucket.add_features(pattern_positions),
            Self::Line(bucket) => bucket.add_features(pattern_positions),
            Self::Circle(_) | Self::Symbol(_) => {}
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Fill(bucket) => bucket.is_empty(),
            Self::Line(bucket) => bucket.is_empty(),
            Self::Circle(bucket) => bucket.is_empty(),
            Self::Symbol(bucket) => bucket.is_empty(),
        }
    }
}

/// Patterns requested by each layer of the family for this feature.
fn feature_patterns(
    layers: &[EvaluatedLayer],
    property: &str,
    feature: &BucketFeature<'_>,
) -> BTreeMap<String, String> {
    layers
        .iter()
        .filter_map(|layer| {
            let value = layer.paint(property, &feature.context(layer))?;
            let name = match value {
                Value::String(name) => name,
                other => to_string(&other),
            };
            (!name.is_empty()).then(|| (layer.id.clone(), name))
        })
        .collect()
}

fn resolve_patterns(
    patterns: BTreeMap<String, String>,
    pattern_positions: &ImagePositions,
) -> BTreeMap<String, FeaturePattern> {
    patterns
        .into_iter()
        .map(|(layer, name)| {
            let position = pattern_positions.get(&name).copied();
            if position.is_none() {
                log::debug!("Pattern '{name}' of layer '{layer}' is not in the atlas.");
            }
            (layer, FeaturePattern { name, position })
        })
        .collect()
}

fn signed_area(ring: &[TilePoint]) -> f64 {
    let ring: LineString<f64> = ring
        .iter()
        .map(|&[x, y]| (f64::from(x), f64::from(y)))
        .collect::<Vec<_>>()
        .into();
    Polygon::new(ring, Vec::new()).signed_area()
}

/// Group rings into polygons: a ring wound like the first one starts a new polygon,
/// the others are its holes. Degenerate rings are dropped.
pub(crate) fn classify_rings(rings: &[Vec<TilePoint>]) -> Vec<Vec<&[TilePoint]>> {
    let mut polygons = Vec::new();
    let mut polygon: Vec<&[TilePoint]> = Vec::new();
    let mut outer_orientation = None;

    for ring in rings {
        let area = signed_area(ring);
        if area == 0. {
            continue;
        }

        let orientation = area > 0.;
        if *outer_orientation.get_or_insert(orientation) == orientation && !polygon.is_empty() {
            polygons.push(std::mem::take(&mut polygon));
        }
        polygon.push(ring.as_slice());
    }

    if !polygon.is_empty() {
        polygons.push(polygon);
    }
    polygons
}

fn to_lyon(point: TilePoint) -> lyon_tessellation::math::Point {
    lyon_tessellation::math::point(point[0] as f32, point[1] as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: i32, y: i32, size: i32, clockwise: bool) -> Vec<TilePoint> {
        let mut ring = vec![[x, y], [x + size, y], [x + size, y + size], [x, y + size], [x, y]];
        if !clockwise {
            ring.reverse();
        }
        ring
    }

    #[test]
    fn rings_are_classified_into_polygons() {
        let rings = vec![
            square(0, 0, 100, true),
            square(10, 10, 10, false),
            square(200, 200, 50, true),
            vec![[0, 0], [5, 5], [0, 0]],
        ];

        let polygons = classify_rings(&rings);
        assert_eq!(polygons.len(), 2);
        assert_eq!(polygons[0].len(), 2);
        assert_eq!(polygons[1].len(), 1);
        assert_eq!(polygons[1][0][0], [200, 200]);
    }
}
