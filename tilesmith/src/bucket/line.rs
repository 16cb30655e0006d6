use super::{
    BucketFeature, BucketParameters, Dependencies, PatternFeature, PendingPatternFeature,
    feature_patterns, resolve_patterns, to_lyon,
};
use crate::{
    atlas::ImagePositions,
    expression::Context,
    feature_index::FeatureIndex,
    style::EvaluatedLayer,
    vector_tile::{GeomType, Geometry},
};
use lyon_path::Path;
use lyon_tessellation::{
    BuffersBuilder, LineCap, LineJoin, StrokeOptions, StrokeTessellator, StrokeVertex,
    VertexBuffers,
};
use std::{collections::BTreeMap, ops::Range};

const PATTERN_PROPERTY: &str = "line-pattern";

/// Vertex of a stroked line. Width is applied when drawing, by moving the vertex along
/// its normal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineVertex {
    pub position: [f32; 2],
    pub normal: [f32; 2],
    /// Distance along the line, for dashes and patterns.
    pub advancement: f32,
}

#[derive(Debug, Clone)]
pub struct LineBucket {
    pub(super) parameters: BucketParameters,
    pub vertices: Vec<LineVertex>,
    pub indices: Vec<u32>,
    pub pattern_features: Vec<PatternFeature>,
    pending: Vec<(StrokeOptions, PendingPatternFeature)>,
}

impl LineBucket {
    pub(super) fn new(parameters: BucketParameters) -> Self {
        Self {
            parameters,
            vertices: Vec::new(),
            indices: Vec::new(),
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
        let mut accepted = Vec::new();

        for feature in self.parameters.accepted(features) {
            if !matches!(
                feature.feature.kind,
                GeomType::LineString | GeomType::Polygon
            ) {
                continue;
            }

            let options = self.stroke_options(feature);
            let patterns = if has_pattern {
                feature_patterns(&self.parameters.layers, PATTERN_PROPERTY, feature)
            } else {
                BTreeMap::new()
            };
            dependencies.patterns.extend(patterns.values().cloned());
            accepted.push((
                options,
                PendingPatternFeature {
                    geometry: feature.feature.geometry.clone(),
                    patterns,
                },
            ));

            feature_index.insert(
                feature.index,
                &feature.feature.geometry,
                feature.source_layer_index,
                self.parameters.index,
            );
        }

        if has_pattern {
            self.pending.extend(accepted);
        } else {
            for (options, feature) in accepted {
                self.add_lines(&feature.geometry, &options);
            }
        }
    }

    pub(super) fn add_features(&mut self, pattern_positions: &ImagePositions) {
        for (options, feature) in std::mem::take(&mut self.pending) {
            let vertices = self.add_lines(&feature.geometry, &options);
            self.pattern_features.push(PatternFeature {
                vertices,
                patterns: resolve_patterns(feature.patterns, pattern_positions),
            });
        }
    }

    /// Join, cap and miter limit come from the first layer of the family.
    fn stroke_options(&self, feature: &BucketFeature<'_>) -> StrokeOptions {
        let Some(layer) = self.parameters.layers.first() else {
            return StrokeOptions::default();
        };
        let context = feature.context(layer);

        StrokeOptions::default()
            .with_line_width(1.)
            .with_line_join(line_join(layer, &context))
            .with_line_cap(line_cap(layer, &context))
            .with_miter_limit(layer.layout_f64("line-miter-limit", &context, 2.).max(1.) as f32)
            .with_tolerance(
                StrokeOptions::DEFAULT_TOLERANCE / self.parameters.overscaling.max(1) as f32,
            )
    }

    fn add_lines(&mut self, geometry: &Geometry, options: &StrokeOptions) -> Range<usize> {
        let start = self.vertices.len();

        for line in geometry {
            let closed = line.len() > 2 && line.first() == line.last();
            let mut points = line.iter().copied().map(to_lyon);
            let Some(first) = points.next() else {
                continue;
            };
            let mut builder = Path::builder();
            builder.begin(first);
            for point in points.take(line.len().saturating_sub(1 + usize::from(closed))) {
                builder.line_to(point);
            }
            builder.end(closed);
            let path = builder.build();

            let mut buffers: VertexBuffers<LineVertex, u32> = VertexBuffers::new();
            let result = StrokeTessellator::new().tessellate_path(
                &path,
                options,
                &mut BuffersBuilder::new(&mut buffers, |vertex: StrokeVertex<'_, '_>| {
                    LineVertex {
                        position: vertex.position_on_path().to_array(),
                        normal: vertex.normal().to_array(),
                        advancement: vertex.advancement(),
                    }
                }),
            );
            if let Err(error) = result {
                log::warn!("Could not tessellate a line: {error:?}");
                continue;
            }

            let Ok(offset) = u32::try_from(self.vertices.len()) else {
                log::warn!("Line bucket is full.");
                break;
            };
            self.vertices.extend(buffers.vertices);
            self.indices
                .extend(buffers.indices.into_iter().map(|index| index + offset));
        }

        start..self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty() && self.pending.is_empty()
    }
}

fn line_join(layer: &EvaluatedLayer, context: &Context<'_>) -> LineJoin {
    match layer.layout("line-join", context).as_ref().and_then(|v| v.as_str()) {
        Some("bevel") => LineJoin::Bevel,
        Some("round") => LineJoin::Round,
        _ => LineJoin::Miter,
    }
}

fn line_cap(layer: &EvaluatedLayer, context: &Context<'_>) -> LineCap {
    match layer.layout("line-cap", context).as_ref().and_then(|v| v.as_str()) {
        Some("round") => LineCap::Round,
        Some("square") => LineCap::Square,
        _ => LineCap::Butt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bucket::Bucket,
        style::{EvaluationParameters, Family, StyleLayer},
        tile_id::{CanonicalTileId, OverscaledTileId},
        vector_tile::VectorTileFeature,
    };
    use serde_json::json;
    use std::sync::Arc;

    fn bucket(layer: serde_json::Value) -> Bucket {
        let family = Family::from(vec![Arc::new(
            StyleLayer::new(serde_json::from_value(layer).unwrap()).unwrap(),
        )]);
        let parameters = EvaluationParameters::new(14., Arc::from([]));
        Bucket::new(BucketParameters {
            index: 3,
            layers: family.iter().map(|l| l.recalculate(&parameters)).collect(),
            family,
            zoom: 14.,
            pixel_ratio: 1.,
            overscaling: 1,
            source_layer_index: 0,
            source_id: "s".to_owned(),
        })
        .unwrap()
    }

    fn road(kind: GeomType) -> VectorTileFeature {
        VectorTileFeature {
            id: None,
            kind,
            properties: json!({"class": "primary"}).as_object().cloned().unwrap(),
            geometry: vec![vec![[0, 0], [1000, 0], [1000, 1000]]],
        }
    }

    fn populate(bucket: &mut Bucket, feature: &VectorTileFeature) -> (Dependencies, FeatureIndex) {
        let mut dependencies = Dependencies::default();
        let mut index = FeatureIndex::new(
            OverscaledTileId::canonical(CanonicalTileId::new(14, 0, 0)),
            None,
        );
        let features = [BucketFeature {
            feature,
            id: None,
            index: 0,
            source_layer_index: 0,
        }];
        bucket.populate(&features, &mut dependencies, &mut index);
        (dependencies, index)
    }

    #[test]
    fn lines_are_stroked() {
        let mut bucket = bucket(json!({
            "id": "roads",
            "type": "line",
            "layout": {"line-join": "round", "line-cap": "round"}
        }));
        let (_, index) = populate(&mut bucket, &road(GeomType::LineString));

        let Bucket::Line(line) = &bucket else {
            panic!("expected a line bucket");
        };
        assert!(!line.indices.is_empty());
        assert_eq!(line.indices.len() % 3, 0);
        assert!(line.vertices.iter().any(|v| v.advancement > 1000.));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn points_are_not_lines() {
        let mut bucket = bucket(json!({"id": "roads", "type": "line"}));
        let (_, index) = populate(&mut bucket, &road(GeomType::Point));
        assert!(bucket.is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn patterned_lines_are_deferred() {
        let mut bucket = bucket(json!({
            "id": "rails",
            "type": "line",
            "paint": {"line-pattern": ["concat", "rail-", ["get", "class"]]}
        }));
        let (dependencies, _) = populate(&mut bucket, &road(GeomType::LineString));
        assert_eq!(
            dependencies.patterns.into_iter().collect::<Vec<_>>(),
            vec!["rail-primary"]
        );

        let Bucket::Line(line) = &bucket else {
            panic!("expected a line bucket");
        };
        assert!(line.indices.is_empty());
        assert!(!bucket.is_empty());

        bucket.add_features(&ImagePositions::new());
        let Bucket::Line(line) = &bucket else {
            panic!("expected a line bucket");
        };
        assert!(!line.indices.is_empty());
        assert_eq!(line.pattern_features[0].patterns["rails"].name, "rail-primary");
    }
}
