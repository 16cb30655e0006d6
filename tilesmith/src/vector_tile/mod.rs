//! In-memory vector tile, shared by both the protobuf and the GeoJSON paths so that
//! the tile parser does not need to know where the data came from.
//! <https://github.com/mapbox/vector-tile-spec/tree/master/2.1>

mod decode;
mod encode;
mod proto;

use crate::expression::Properties;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use encode::encode_layers;

/// Name of the single layer produced from GeoJSON sources.
pub const GEOJSON_TILE_LAYER: &str = "_geojsonTileLayer";

/// Default extent of a vector tile.
pub const EXTENT: u32 = 4096;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed vector tile: {0}")]
    Malformed(String),

    #[error("Could not inflate the tile: {0}")]
    Inflate(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeomType {
    Unknown = 0,
    Point = 1,
    LineString = 2,
    Polygon = 3,
}

impl GeomType {
    /// Name as seen by the `$type` filter and the `geometry-type` expression.
    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Point => "Point",
            Self::LineString => "LineString",
            Self::Polygon => "Polygon",
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Point,
            2 => Self::LineString,
            3 => Self::Polygon,
            _ => Self::Unknown,
        }
    }
}

/// Point in tile coordinates. Might lie outside `0..extent` because of the buffer.
pub type TilePoint = [i32; 2];

/// Points are stored as rings of a single point, lines and polygons as rings of
/// vertices. Polygon rings are closed.
pub type Geometry = Vec<Vec<TilePoint>>;

#[derive(Debug, Clone, PartialEq)]
pub struct VectorTileFeature {
    pub id: Option<u64>,
    pub kind: GeomType,
    pub properties: Properties,
    pub geometry: Geometry,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorTileLayer {
    pub name: String,
    pub version: u32,
    pub extent: u32,
    pub features: Vec<VectorTileFeature>,
}

impl VectorTileLayer {
    pub fn new(name: impl Into<String>, features: Vec<VectorTileFeature>) -> Self {
        Self {
            name: name.into(),
            version: 2,
            extent: EXTENT,
            features,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorTile {
    pub layers: BTreeMap<String, VectorTileLayer>,
}

impl VectorTile {
    /// Decode a protobuf tile, inflating it first if it is gzipped.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        decode::decode(data)
    }

    /// Single-layer tile, as produced by the GeoJSON source.
    pub fn from_layer(layer: VectorTileLayer) -> Self {
        Self {
            layers: BTreeMap::from([(layer.name.clone(), layer)]),
        }
    }

    pub fn layer(&self, name: &str) -> Option<&VectorTileLayer> {
        self.layers.get(name)
    }

    /// Encode into the protobuf representation.
    pub fn encode(&self) -> Vec<u8> {
        encode_layers(self.layers.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn properties(value: serde_json::Value) -> Properties {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("properties must be an object"),
        }
    }

    #[test]
    fn encoded_tile_decodes_into_the_same_features() {
        let _ = env_logger::try_init();

        let road = VectorTileFeature {
            id: Some(7),
            kind: GeomType::LineString,
            properties: properties(json!({"class": "main", "lanes": 2, "oneway": true})),
            geometry: vec![vec![[0, 0], [100, 50], [4096, 4096]]],
        };
        let park = VectorTileFeature {
            id: None,
            kind: GeomType::Polygon,
            properties: properties(json!({"name": "Pole Mokotowskie", "area": 1.5})),
            geometry: vec![vec![[10, 10], [20, 10], [20, 20], [10, 20], [10, 10]]],
        };
        let poi = VectorTileFeature {
            id: Some(1),
            kind: GeomType::Point,
            properties: properties(json!({"rank": -3})),
            geometry: vec![vec![[5, 5]], vec![[-10, 4100]]],
        };

        let tile = VectorTile {
            layers: BTreeMap::from([
                ("roads".to_owned(), VectorTileLayer::new("roads", vec![road.clone()])),
                ("pois".to_owned(), VectorTileLayer::new("pois", vec![park.clone(), poi.clone()])),
            ]),
        };

        let decoded = VectorTile::decode(&tile.encode()).unwrap();

        assert_eq!(decoded.layers.len(), 2);
        let roads = decoded.layer("roads").unwrap();
        assert_eq!(roads.extent, 4096);
        assert_eq!(roads.version, 2);
        assert_eq!(roads.features, vec![road]);

        let pois = decoded.layer("pois").unwrap();
        assert_eq!(pois.features[0].kind, GeomType::Polygon);
        assert_eq!(pois.features[0].properties, park.properties);
        assert_eq!(pois.features[0].geometry[0].len(), 5);
        assert_eq!(pois.features[1], poi);
    }

    #[test]
    fn gzipped_tile_is_inflated() {
        use flate2::{Compression, write::GzEncoder};
        use std::io::Write as _;

        let tile = VectorTile::from_layer(VectorTileLayer::new(
            "water",
            vec![VectorTileFeature {
                id: Some(3),
                kind: GeomType::Point,
                properties: Properties::new(),
                geometry: vec![vec![[1, 2]]],
            }],
        ));

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tile.encode()).unwrap();
        let gzipped = encoder.finish().unwrap();

        assert_eq!(VectorTile::decode(&gzipped).unwrap(), tile);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(VectorTile::decode(&[0xff, 0xff, 0xff, 0x01]).is_err());
    }
}
