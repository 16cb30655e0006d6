use super::{
    BucketFeature, BucketParameters, Dependencies, PatternFeature, PendingPatternFeature,
    classify_rings, feature_patterns, resolve_patterns, to_lyon,
};
use crate::{
    atlas::ImagePositions,
    feature_index::FeatureIndex,
    vector_tile::{GeomType, Geometry, TilePoint},
};
use lyon_path::Path;
use lyon_tessellation::{BuffersBuilder, FillOptions, FillTessellator, FillVertex, VertexBuffers};
use std::{collections::BTreeMap, ops::Range};

const PATTERN_PROPERTY: &str = "fill-pattern";

/// Triangulated polygons, plus their outlines.
#[derive(Debug, Clone)]
pub struct FillBucket {
    pub(super) parameters: BucketParameters,
    pub vertices: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
    /// Segments of the rings, indexing into `vertices`.
    pub outline_indices: Vec<[u32; 2]>,
    pub pattern_features: Vec<PatternFeature>,
    pending: Vec<PendingPatternFeature>,
}

impl FillBucket {
    pub(super) fn new(parameters: BucketParameters) -> Self {
        Self {
            parameters,
            vertices: Vec::new(),
            indices: Vec::new(),
            outline_indices: Vec::new(),
            pattern_features: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn has_pattern(&self) -> bool {
        self.parameters
            .layers
            .iter()
            .any(|layer| layer.has_paint(PATTERN_PROPERTY))
    }

    pub(super) fn populate(
        &mut self,
        features: &[BucketFeature<'_>],
        dependencies: &mut Dependencies,
        feature_index: &mut FeatureIndex,
    ) {
        let has_pattern = self.has_pattern();
        let mut pending = Vec::new();

        for feature in self.parameters.accepted(features) {
            if feature.feature.kind != GeomType::Polygon {
                continue;
            }

            let patterns = if has_pattern {
                feature_patterns(&self.parameters.layers, PATTERN_PROPERTY, feature)
            } else {
                BTreeMap::new()
            };
            dependencies.patterns.extend(patterns.values().cloned());
            pending.push(PendingPatternFeature {
                geometry: feature.feature.geometry.clone(),
                patterns,
            });

            feature_index.insert(
                feature.index,
                &feature.feature.geometry,
                feature.source_layer_index,
                self.parameters.index,
            );
        }

        if has_pattern {
            self.pending.extend(pending);
        } else {
            for feature in pending {
                self.add_polygons(&feature.geometry);
            }
        }
    }

    pub(super) fn add_features(&mut self, pattern_positions: &ImagePositions) {
        for feature in std::mem::take(&mut self.pending) {
            let vertices = self.add_polygons(&feature.geometry);
            self.pattern_features.push(PatternFeature {
                vertices,
                patterns: resolve_patterns(feature.patterns, pattern_positions),
            });
        }
    }

    fn add_polygons(&mut self, geometry: &Geometry) -> Range<usize> {
        let start = self.vertices.len();

        for polygon in classify_rings(geometry) {
            let mut builder = Path::builder();
            for ring in &polygon {
                let mut points = ring.iter().copied().map(to_lyon);
                let Some(first) = points.next() else {
                    continue;
                };
                builder.begin(first);
                for point in points {
                    builder.line_to(point);
                }
                builder.end(true);
            }
            let path = builder.build();

            let mut buffers: VertexBuffers<[f32; 2], u32> = VertexBuffers::new();
            let result = FillTessellator::new().tessellate_path(
                &path,
                &FillOptions::default(),
                &mut BuffersBuilder::new(&mut buffers, |vertex: FillVertex<'_>| {
                    vertex.position().to_array()
                }),
            );
            if let Err(error) = result {
                log::warn!("Could not tessellate a polygon: {error:?}");
                continue;
            }

            let Ok(offset) = u32::try_from(self.vertices.len()) else {
                log::warn!("Fill bucket is full.");
                break;
            };
            self.vertices.extend(buffers.vertices);
            self.indices
                .extend(buffers.indices.into_iter().map(|index| index + offset));

            self.add_outlines(&polygon);
        }

        start..self.vertices.len()
    }

    fn add_outlines(&mut self, polygon: &[&[TilePoint]]) {
        for ring in polygon {
            let Ok(first) = u32::try_from(self.vertices.len()) else {
                return;
            };
            self.vertices
                .extend(ring.iter().map(|&[x, y]| [x as f32, y as f32]));
            for (a, b) in (first..).zip(first + 1..).take(ring.len().saturating_sub(1)) {
                self.outline_indices.push([a, b]);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty() && self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bucket::Bucket,
        style::{EvaluationParameters, Family, LayerSpec, StyleLayer},
        tile_id::{CanonicalTileId, OverscaledTileId},
        vector_tile::VectorTileFeature,
    };
    use serde_json::json;
    use std::sync::Arc;

    fn family(layer: serde_json::Value) -> Family {
        let spec: LayerSpec = serde_json::from_value(layer).unwrap();
        Family::from(vec![Arc::new(StyleLayer::new(spec).unwrap())])
    }

    fn bucket(family: Family) -> Bucket {
        let parameters = EvaluationParameters::new(10., Arc::from([]));
        Bucket::new(BucketParameters {
            index: 0,
            layers: family.iter().map(|l| l.recalculate(&parameters)).collect(),
            family,
            zoom: 10.,
            pixel_ratio: 1.,
            overscaling: 1,
            source_layer_index: 0,
            source_id: "s".to_owned(),
        })
        .unwrap()
    }

    fn square_with_hole() -> VectorTileFeature {
        VectorTileFeature {
            id: Some(1),
            kind: GeomType::Polygon,
            properties: json!({"class": "lake"}).as_object().cloned().unwrap(),
            geometry: vec![
                vec![[0, 0], [100, 0], [100, 100], [0, 100], [0, 0]],
                vec![[25, 25], [25, 75], [75, 75], [75, 25], [25, 25]],
            ],
        }
    }

    fn features(feature: &VectorTileFeature) -> Vec<BucketFeature<'_>> {
        vec![BucketFeature {
            feature,
            id: Some(json!(1)),
            index: 0,
            source_layer_index: 0,
        }]
    }

    fn index() -> FeatureIndex {
        FeatureIndex::new(OverscaledTileId::canonical(CanonicalTileId::new(10, 0, 0)), None)
    }

    #[test]
    fn polygon_with_hole_is_triangulated() {
        let feature = square_with_hole();
        let mut bucket = bucket(family(json!({"id": "water", "type": "fill"})));
        let mut dependencies = Dependencies::default();
        let mut index = index();

        bucket.populate(&features(&feature), &mut dependencies, &mut index);

        let Bucket::Fill(fill) = &bucket else {
            panic!("expected a fill bucket");
        };
        assert_eq!(fill.indices.len() % 3, 0);
        assert!(fill.indices.len() >= 8 * 3);
        assert_eq!(fill.outline_indices.len(), 8);
        assert!(!bucket.is_empty());
        assert_eq!(index.len(), 1);
        assert_eq!(dependencies, Dependencies::default());
    }

    #[test]
    fn filtered_out_features_are_skipped() {
        let feature = square_with_hole();
        let mut bucket = bucket(family(
            json!({"id": "water", "type": "fill", "filter": ["==", "class", "river"]}),
        ));
        let mut index = index();

        bucket.populate(&features(&feature), &mut Dependencies::default(), &mut index);

        assert!(bucket.is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn patterns_wait_for_the_atlas() {
        let feature = square_with_hole();
        let mut bucket = bucket(family(
            json!({"id": "water", "type": "fill", "paint": {"fill-pattern": "waves"}}),
        ));
        let mut dependencies = Dependencies::default();

        bucket.populate(&features(&feature), &mut dependencies, &mut index());

        assert!(bucket.has_pattern());
        assert_eq!(dependencies.patterns.iter().collect::<Vec<_>>(), vec!["waves"]);

        bucket.add_features(&ImagePositions::new());
        let Bucket::Fill(fill) = &bucket else {
            panic!("expected a fill bucket");
        };
        assert_eq!(fill.pattern_features.len(), 1);
        assert_eq!(fill.pattern_features[0].patterns["water"].name, "waves");
        assert!(fill.pattern_features[0].patterns["water"].position.is_none());
        assert!(!fill.indices.is_empty());
    }
}
