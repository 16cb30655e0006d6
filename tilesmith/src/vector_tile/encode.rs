//! Encode in-memory layers back into the protobuf format, so GeoJSON tiles can be
//! handed over as raw bytes like any other vector tile.

use super::{GeomType, Geometry, VectorTileFeature, VectorTileLayer, proto};
use prost::Message as _;
use serde_json::Value;
use std::collections::HashMap;

pub fn encode_layers<'a>(layers: impl IntoIterator<Item = &'a VectorTileLayer>) -> Vec<u8> {
    proto::Tile {
        layers: layers.into_iter().map(encode_layer).collect(),
    }
    .encode_to_vec()
}

/// Keys and values shared by all features of a layer.
#[derive(Default)]
struct Dictionary {
    keys: Vec<String>,
    key_cache: HashMap<String, u32>,
    values: Vec<proto::Value>,
    value_cache: HashMap<String, u32>,
}

impl Dictionary {
    fn key(&mut self, key: &str) -> u32 {
        if let Some(index) = self.key_cache.get(key) {
            return *index;
        }
        let index = self.keys.len() as u32;
        self.keys.push(key.to_owned());
        self.key_cache.insert(key.to_owned(), index);
        index
    }

    fn value(&mut self, value: &Value) -> u32 {
        let (cache_key, encoded) = encode_value(value);
        if let Some(index) = self.value_cache.get(&cache_key) {
            return *index;
        }
        let index = self.values.len() as u32;
        self.values.push(encoded);
        self.value_cache.insert(cache_key, index);
        index
    }
}

fn encode_layer(layer: &VectorTileLayer) -> proto::Layer {
    let mut dictionary = Dictionary::default();
    let features = layer
        .features
        .iter()
        .map(|feature| encode_feature(feature, &mut dictionary))
        .collect();

    proto::Layer {
        version: if layer.version == 0 { 1 } else { layer.version },
        name: layer.name.clone(),
        features,
        keys: dictionary.keys,
        values: dictionary.values,
        extent: Some(layer.extent),
    }
}

fn encode_feature(feature: &VectorTileFeature, dictionary: &mut Dictionary) -> proto::Feature {
    let mut tags = Vec::with_capacity(feature.properties.len() * 2);
    for (key, value) in &feature.properties {
        if value.is_null() {
            continue;
        }
        tags.push(dictionary.key(key));
        tags.push(dictionary.value(value));
    }

    let kind = match feature.kind {
        GeomType::Unknown => proto::GeomType::Unknown,
        GeomType::Point => proto::GeomType::Point,
        GeomType::LineString => proto::GeomType::Linestring,
        GeomType::Polygon => proto::GeomType::Polygon,
    };

    proto::Feature {
        id: feature.id,
        tags,
        r#type: Some(kind as i32),
        geometry: encode_geometry(feature.kind, &feature.geometry),
    }
}

/// Value message together with the key used to deduplicate it within a layer.
fn encode_value(value: &Value) -> (String, proto::Value) {
    let mut encoded = proto::Value::default();
    let cache_key = match value {
        Value::String(s) => {
            encoded.string_value = Some(s.clone());
            format!("string:{s}")
        }
        Value::Bool(b) => {
            encoded.bool_value = Some(*b);
            format!("boolean:{b}")
        }
        Value::Number(n) => {
            if let Some(unsigned) = n.as_u64() {
                encoded.uint_value = Some(unsigned);
            } else if let Some(signed) = n.as_i64() {
                encoded.sint_value = Some(signed);
            } else {
                let float = n.as_f64().unwrap_or_default();
                if float.fract() != 0. || !float.is_finite() {
                    encoded.double_value = Some(float);
                } else if float < 0. {
                    encoded.sint_value = Some(float as i64);
                } else {
                    encoded.uint_value = Some(float as u64);
                }
            }
            format!("number:{n}")
        }
        // Nested values are not representable, they travel as JSON text.
        other => {
            let text = other.to_string();
            encoded.string_value = Some(text.clone());
            format!("string:{text}")
        }
    };
    (cache_key, encoded)
}

fn command(id: u32, count: usize) -> u32 {
    ((count as u32) << 3) | (id & 0x7)
}

fn zigzag(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

fn encode_geometry(kind: GeomType, geometry: &Geometry) -> Vec<u32> {
    let mut commands = Vec::new();
    let (mut x, mut y) = (0, 0);

    for ring in geometry.iter().filter(|ring| !ring.is_empty()) {
        let count = if kind == GeomType::Point { ring.len() } else { 1 };
        commands.push(command(1, count));

        // Closing point of a polygon ring is implied by ClosePath.
        let line_count = if kind == GeomType::Polygon {
            ring.len() - 1
        } else {
            ring.len()
        };

        for (i, point) in ring.iter().take(line_count).enumerate() {
            if i == 1 && kind != GeomType::Point {
                commands.push(command(2, line_count - 1));
            }
            let dx = point[0] - x;
            let dy = point[1] - y;
            commands.push(zigzag(dx));
            commands.push(zigzag(dy));
            x += dx;
            y += dy;
        }

        if kind == GeomType::Polygon {
            commands.push(command(7, 1));
        }
    }

    commands
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commands_and_zigzag() {
        assert_eq!(command(1, 1), 9);
        assert_eq!(command(2, 3), 26);
        assert_eq!(command(7, 1), 15);
        assert_eq!(zigzag(0), 0);
        assert_eq!(zigzag(-1), 1);
        assert_eq!(zigzag(1), 2);
        assert_eq!(zigzag(-2), 3);
    }

    #[test]
    fn polygon_geometry_skips_closing_point() {
        // Example from the vector tile specification.
        let geometry = vec![vec![[3, 6], [8, 12], [20, 34], [3, 6]]];
        assert_eq!(
            encode_geometry(GeomType::Polygon, &geometry),
            vec![9, 6, 12, 18, 10, 12, 24, 44, 15]
        );
    }

    #[test]
    fn multi_point_is_a_single_move_to() {
        let geometry = vec![vec![[5, 7], [3, 2]]];
        assert_eq!(
            encode_geometry(GeomType::Point, &geometry),
            vec![17, 10, 14, 3, 9]
        );
    }

    #[test]
    fn values_are_deduplicated_by_type() {
        let mut dictionary = Dictionary::default();
        let a = dictionary.value(&json!("1"));
        let b = dictionary.value(&json!(1));
        let c = dictionary.value(&json!("1"));
        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_eq!(dictionary.values.len(), 2);
        assert_eq!(dictionary.values[1].uint_value, Some(1));

        let negative = dictionary.value(&json!(-4));
        assert_eq!(dictionary.values[negative as usize].sint_value, Some(-4));

        let float = dictionary.value(&json!(0.25));
        assert_eq!(dictionary.values[float as usize].double_value, Some(0.25));
    }
}
