//! GeoJSON document model.
//! <https://datatracker.ietf.org/doc/html/rfc7946>

mod rewind;
mod updateable;

use crate::expression::Properties;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use rewind::rewind;
pub use updateable::{
    GeoJsonFeatureDiff, GeoJsonSourceDiff, PropertyUpdate, UpdateableGeoJson, apply_source_diff,
    to_updateable,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Unsupported GeoJSON type: {0}")]
    UnsupportedType(String),

    #[error("Invalid position: {0:?}")]
    InvalidPosition(Vec<f64>),
}

/// Longitude and latitude. Altitude, if present, is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "[f64; 2]")]
pub struct Position(pub f64, pub f64);

impl TryFrom<Vec<f64>> for Position {
    type Error = Error;

    fn try_from(coordinates: Vec<f64>) -> Result<Self, Self::Error> {
        match coordinates.as_slice() {
            [x, y, ..] => Ok(Position(*x, *y)),
            _ => Err(Error::InvalidPosition(coordinates)),
        }
    }
}

impl From<Position> for [f64; 2] {
    fn from(position: Position) -> Self {
        [position.0, position.1]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Position },
    MultiPoint { coordinates: Vec<Position> },
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    GeometryCollection { geometries: Vec<Geometry> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub struct Feature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub properties: Option<Properties>,
}

impl Feature {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            id: None,
            geometry: Some(geometry),
            properties: None,
        }
    }

    pub fn with_id(self, id: impl Into<Value>) -> Self {
        Self {
            id: Some(id.into()),
            ..self
        }
    }

    pub fn with_properties(self, properties: Properties) -> Self {
        Self {
            properties: Some(properties),
            ..self
        }
    }

    /// Identifier of the feature, taken from a property when `promote_id` is given.
    pub fn feature_id(&self, promote_id: Option<&str>) -> Option<FeatureId> {
        let value = match promote_id {
            Some(key) => self.properties.as_ref()?.get(key)?,
            None => self.id.as_ref()?,
        };
        FeatureId::from_value(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GeoJson {
    Feature(Feature),
    FeatureCollection(FeatureCollection),
    Geometry(Geometry),
}

impl GeoJson {
    /// # Errors
    ///
    /// When the object is not a GeoJSON object or is malformed.
    pub fn from_value(value: Value) -> Result<Self, Error> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        match kind.as_str() {
            "Feature" => Ok(GeoJson::Feature(serde_json::from_value(value)?)),
            "FeatureCollection" => Ok(GeoJson::FeatureCollection(serde_json::from_value(value)?)),
            "Point" | "MultiPoint" | "LineString" | "MultiLineString" | "Polygon"
            | "MultiPolygon" | "GeometryCollection" => {
                Ok(GeoJson::Geometry(serde_json::from_value(value)?))
            }
            _ => Err(Error::UnsupportedType(kind)),
        }
    }

    pub fn parse(text: &str) -> Result<Self, Error> {
        Self::from_value(serde_json::from_str(text)?)
    }

    /// Every feature of the document. A bare geometry becomes a feature without
    /// properties.
    pub fn into_features(self) -> Vec<Feature> {
        match self {
            GeoJson::Feature(feature) => vec![feature],
            GeoJson::FeatureCollection(collection) => collection.features,
            GeoJson::Geometry(geometry) => vec![Feature::new(geometry)],
        }
    }

    pub fn features(&self) -> Vec<&Feature> {
        match self {
            GeoJson::Feature(feature) => vec![feature],
            GeoJson::FeatureCollection(collection) => collection.features.iter().collect(),
            GeoJson::Geometry(_) => Vec::new(),
        }
    }
}

impl<'de> Deserialize<'de> for GeoJson {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        GeoJson::from_value(value).map_err(serde::de::Error::custom)
    }
}

/// Identifier under which a feature can be addressed by diffs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureId {
    Int(i64),
    String(String),
}

impl FeatureId {
    /// Integers (also written as `1.0`) and strings. Other values cannot identify a
    /// feature.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(FeatureId::String(s.clone())),
            Value::Number(n) => n.as_i64().map(FeatureId::Int).or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0. && f.abs() < 9e15)
                    .map(|f| FeatureId::Int(f as i64))
            }),
            _ => None,
        }
    }
}

impl From<&FeatureId> for Value {
    fn from(id: &FeatureId) -> Self {
        match id {
            FeatureId::Int(i) => Value::from(*i),
            FeatureId::String(s) => Value::from(s.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parsing_documents() {
        let collection = GeoJson::from_value(json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "id": 1,
                    "geometry": {"type": "Point", "coordinates": [21.0, 52.2, 100.0]},
                    "properties": {"name": "Warszawa"}
                },
                {
                    "type": "Feature",
                    "geometry": {"type": "LineString", "coordinates": [[0, 0], [1, 1]]},
                    "properties": null
                }
            ]
        }))
        .unwrap();

        let features = collection.features();
        assert_eq!(features.len(), 2);
        assert_eq!(
            features[0].geometry,
            Some(Geometry::Point {
                coordinates: Position(21.0, 52.2)
            })
        );
        assert_eq!(features[0].feature_id(None), Some(FeatureId::Int(1)));
        assert_eq!(
            features[0].feature_id(Some("name")),
            Some(FeatureId::String("Warszawa".to_owned()))
        );
        assert_eq!(features[1].feature_id(None), None);

        let point = GeoJson::parse(r#"{"type": "Point", "coordinates": [1, 2]}"#).unwrap();
        assert!(matches!(point, GeoJson::Geometry(Geometry::Point { .. })));
    }

    #[test]
    fn invalid_documents() {
        assert!(GeoJson::from_value(json!({"type": "Topology"})).is_err());
        assert!(GeoJson::from_value(json!([1, 2])).is_err());
        assert!(GeoJson::from_value(json!({"type": "Point", "coordinates": [1]})).is_err());
    }

    #[test]
    fn serializing_keeps_the_type_tags() {
        let feature = Feature::new(Geometry::Point {
            coordinates: Position(1., 2.),
        })
        .with_id(5);

        assert_eq!(
            serde_json::to_value(GeoJson::Feature(feature)).unwrap(),
            json!({
                "type": "Feature",
                "id": 5,
                "geometry": {"type": "Point", "coordinates": [1.0, 2.0]},
                "properties": null
            })
        );
    }

    #[test]
    fn float_ids_with_integer_value() {
        assert_eq!(FeatureId::from_value(&json!(3.0)), Some(FeatureId::Int(3)));
        assert_eq!(FeatureId::from_value(&json!(3.5)), None);
        assert_eq!(FeatureId::from_value(&Value::Null), None);
    }
}
