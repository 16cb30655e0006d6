use super::{BucketFeature, BucketParameters};
use crate::{
    feature_index::FeatureIndex,
    vector_tile::EXTENT,
};

/// Corner of the quad a circle is drawn into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircleVertex {
    pub position: [f32; 2],
    /// Unit offset of the corner, scaled by the radius when drawing.
    pub extrude: [i8; 2],
}

const CORNERS: [[i8; 2]; 4] = [[-1, -1], [1, -1], [1, 1], [-1, 1]];

#[derive(Debug, Clone)]
pub struct CircleBucket {
    pub(super) parameters: BucketParameters,
    pub vertices: Vec<CircleVertex>,
    pub indices: Vec<u32>,
}

impl CircleBucket {
    pub(super) fn new(parameters: BucketParameters) -> Self {
        Self {
            parameters,
            vertices: Vec::new(),
            indices: Vec::new(),
        }
    }

    pub(super) fn populate(
        &mut self,
        features: &[BucketFeature<'_>],
        feature_index: &mut FeatureIndex,
    ) {
        let extent = EXTENT as i32;

        for feature in self.parameters.accepted(features) {
            for &[x, y] in feature.feature.geometry.iter().flatten() {
                // Neighbouring tiles draw the points in their buffer.
                if !(0..extent).contains(&x) || !(0..extent).contains(&y) {
                    continue;
                }

                let Ok(first) = u32::try_from(self.vertices.len()) else {
                    log::warn!("Circle bucket is full.");
                    return;
                };
                self.vertices.extend(CORNERS.map(|extrude| CircleVertex {
                    position: [x as f32, y as f32],
                    extrude,
                }));
                self.indices.extend(
                    [0, 1, 2, 0, 2, 3]
                        .into_iter()
                        .map(|corner| first + corner),
                );
            }

            feature_index.insert(
                feature.index,
                &feature.feature.geometry,
                feature.source_layer_index,
                self.parameters.index,
            );
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bucket::{Bucket, Dependencies},
        style::{EvaluationParameters, Family, StyleLayer},
        tile_id::{CanonicalTileId, OverscaledTileId},
        vector_tile::{GeomType, VectorTileFeature},
    };
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn points_in_the_buffer_are_skipped() {
        let family = Family::from(vec![Arc::new(
            StyleLayer::new(serde_json::from_value(json!({"id": "dots", "type": "circle"})).unwrap())
                .unwrap(),
        )]);
        let parameters = EvaluationParameters::new(5., Arc::from([]));
        let mut bucket = Bucket::new(BucketParameters {
            index: 0,
            layers: family.iter().map(|l| l.recalculate(&parameters)).collect(),
            family,
            zoom: 5.,
            pixel_ratio: 1.,
            overscaling: 1,
            source_layer_index: 0,
            source_id: "s".to_owned(),
        })
        .unwrap();

        let feature = VectorTileFeature {
            id: Some(1),
            kind: GeomType::Point,
            properties: Default::default(),
            geometry: vec![vec![[10, 10]], vec![[-5, 20]], vec![[4095, 0]]],
        };
        let features = [BucketFeature {
            feature: &feature,
            id: Some(json!(1)),
            index: 0,
            source_layer_index: 0,
        }];
        let mut dependencies = Dependencies::default();
        let mut index = FeatureIndex::new(
            OverscaledTileId::canonical(CanonicalTileId::new(5, 0, 0)),
            None,
        );
        bucket.populate(&features, &mut dependencies, &mut index);

        let Bucket::Circle(circle) = &bucket else {
            panic!("expected a circle bucket");
        };
        assert_eq!(circle.vertices.len(), 2 * 4);
        assert_eq!(circle.indices, vec![0, 1, 2, 0, 2, 3, 4, 5, 6, 4, 6, 7]);
        assert_eq!(index.len(), 1);
        assert_eq!(dependencies, Dependencies::default());
    }
}
