//! Lookup from tile-space boxes back to the features they came from, for queries made
//! against an already rendered tile.

use crate::{
    expression::Properties,
    tile_id::OverscaledTileId,
    vector_tile::{GeomType, Geometry, VectorTile, VectorTileFeature},
};
use geo::BoundingRect as _;
use geo_types::{Coord, MultiPoint, Point};
use rstar::{AABB, RTree, RTreeObject};
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

/// Property used as the feature id instead of the one stored in the tile.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(untagged)]
pub enum PromoteId {
    Property(String),
    PerSourceLayer(BTreeMap<String, String>),
}

impl PromoteId {
    pub fn property(&self, source_layer: &str) -> Option<&str> {
        match self {
            Self::Property(name) => Some(name),
            Self::PerSourceLayer(names) => names.get(source_layer).map(String::as_str),
        }
    }
}

/// Maps strings to small integers and back. Source layer names are persisted this way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DictionaryCoder {
    string_to_number: HashMap<String, u32>,
    number_to_string: Vec<String>,
}

impl DictionaryCoder {
    pub fn new(strings: impl IntoIterator<Item = String>) -> Self {
        let number_to_string: Vec<String> = strings.into_iter().collect();
        let string_to_number = number_to_string
            .iter()
            .zip(0..)
            .map(|(string, number)| (string.clone(), number))
            .collect();
        Self {
            string_to_number,
            number_to_string,
        }
    }

    pub fn encode(&self, string: &str) -> Option<u32> {
        self.string_to_number.get(string).copied()
    }

    pub fn decode(&self, number: u32) -> Option<&str> {
        self.number_to_string
            .get(usize::try_from(number).ok()?)
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct IndexedFeature {
    feature_index: usize,
    source_layer_index: u32,
    bucket_index: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct IndexedBox {
    envelope: AABB<[f64; 2]>,
    key: usize,
}

impl RTreeObject for IndexedBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Feature found by [`FeatureIndex::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueriedFeature {
    pub source_layer: String,
    pub id: Option<Value>,
    pub kind: GeomType,
    pub properties: Properties,
    /// Layers drawing this feature.
    pub layer_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FeatureIndex {
    pub tile_id: OverscaledTileId,
    /// Layer ids of each bucket, by bucket index.
    pub bucket_layer_ids: Vec<Vec<String>>,
    promote_id: Option<PromoteId>,
    features: Vec<IndexedFeature>,
    tree: RTree<IndexedBox>,
    source_layer_coder: DictionaryCoder,
    data: Option<Arc<VectorTile>>,
}

impl FeatureIndex {
    pub fn new(tile_id: OverscaledTileId, promote_id: Option<PromoteId>) -> Self {
        Self {
            tile_id,
            bucket_layer_ids: Vec::new(),
            promote_id,
            features: Vec::new(),
            tree: RTree::new(),
            source_layer_coder: DictionaryCoder::default(),
            data: None,
        }
    }

    /// Attach the tile the features come from.
    pub fn set_data(&mut self, data: Arc<VectorTile>, source_layer_coder: DictionaryCoder) {
        self.data = Some(data);
        self.source_layer_coder = source_layer_coder;
    }

    /// Id of the feature, taking `promoteId` into account. Booleans become numbers.
    pub fn get_id(&self, feature: &VectorTileFeature, source_layer: &str) -> Option<Value> {
        let Some(promote_id) = &self.promote_id else {
            return feature.id.map(Value::from);
        };
        let property = promote_id.property(source_layer)?;
        match feature.properties.get(property)? {
            Value::Bool(value) => Some(Value::from(u8::from(*value))),
            Value::Null => None,
            value => Some(value.clone()),
        }
    }

    pub fn insert(
        &mut self,
        feature_index: usize,
        geometry: &Geometry,
        source_layer_index: u32,
        bucket_index: usize,
    ) {
        let points: MultiPoint<f64> = geometry
            .iter()
            .flatten()
            .map(|&[x, y]| Point::new(f64::from(x), f64::from(y)))
            .collect();
        let Some(rect) = points.bounding_rect() else {
            return;
        };

        let key = self.features.len();
        self.features.push(IndexedFeature {
            feature_index,
            source_layer_index,
            bucket_index,
        });

        let Coord { x: x1, y: y1 } = rect.min();
        let Coord { x: x2, y: y2 } = rect.max();
        self.tree.insert(IndexedBox {
            envelope: AABB::from_corners([x1, y1], [x2, y2]),
            key,
        });
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Features whose bounding box intersects the box given in tile units.
    pub fn query(&self, min: [f64; 2], max: [f64; 2]) -> Vec<QueriedFeature> {
        let Some(data) = &self.data else {
            return Vec::new();
        };

        let mut keys: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&AABB::from_corners(min, max))
            .map(|indexed| indexed.key)
            .collect();
        keys.sort_unstable();

        keys.into_iter()
            .filter_map(|key| {
                let indexed = self.features.get(key)?;
                let source_layer = self.source_layer_coder.decode(indexed.source_layer_index)?;
                let feature = data
                    .layer(source_layer)?
                    .features
                    .get(indexed.feature_index)?;
                Some(QueriedFeature {
                    source_layer: source_layer.to_owned(),
                    id: self.get_id(feature, source_layer),
                    kind: feature.kind,
                    properties: feature.properties.clone(),
                    layer_ids: self
                        .bucket_layer_ids
                        .get(indexed.bucket_index)
                        .cloned()
                        .unwrap_or_default(),
                })
            })
            .collect()
    }
}
