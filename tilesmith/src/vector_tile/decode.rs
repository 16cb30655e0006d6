//! Decode protobuf tiles with `mvt-reader`.

use super::{DecodeError, GeomType, Geometry, TilePoint, VectorTile, VectorTileFeature, VectorTileLayer};
use crate::expression::Properties;
use flate2::read::GzDecoder;
use geo_types::{Coord, LineString};
use mvt_reader::feature::Value as MvtValue;
use serde_json::{Number, Value};
use std::{collections::BTreeMap, io::Read as _};

pub(super) fn decode(data: &[u8]) -> Result<VectorTile, DecodeError> {
    let data = inflate(data)?;
    let reader =
        mvt_reader::Reader::new(data).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let metadata = reader
        .get_layer_metadata()
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let mut layers = BTreeMap::new();
    for layer in metadata {
        let features = reader
            .get_features(layer.layer_index)
            .map_err(|e| DecodeError::Malformed(e.to_string()))?
            .into_iter()
            .map(|feature| {
                let (kind, geometry) = convert_geometry(feature.geometry);
                VectorTileFeature {
                    id: feature.id,
                    kind,
                    properties: feature
                        .properties
                        .map(|properties| {
                            properties
                                .into_iter()
                                .map(|(key, value)| (key, mvt_value_to_json(value)))
                                .collect::<Properties>()
                        })
                        .unwrap_or_default(),
                    geometry,
                }
            })
            .collect();

        layers.insert(
            layer.name.clone(),
            VectorTileLayer {
                name: layer.name,
                version: layer.version,
                extent: layer.extent,
                features,
            },
        );
    }

    Ok(VectorTile { layers })
}

/// Tiles are often served gzipped without a matching `Content-Encoding`.
fn inflate(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if data.starts_with(&[0x1f, 0x8b]) {
        let mut inflated = Vec::new();
        GzDecoder::new(data).read_to_end(&mut inflated)?;
        Ok(inflated)
    } else {
        Ok(data.to_vec())
    }
}

fn mvt_value_to_json(value: MvtValue) -> Value {
    match value {
        MvtValue::String(s) => Value::String(s),
        MvtValue::Float(f) => Number::from_f64(f64::from(f)).map_or(Value::Null, Value::Number),
        MvtValue::Double(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        MvtValue::Int(i) | MvtValue::SInt(i) => Value::Number(i.into()),
        MvtValue::UInt(u) => Value::Number(u.into()),
        MvtValue::Bool(b) => Value::Bool(b),
        MvtValue::Null => Value::Null,
        #[allow(unreachable_patterns, clippy::allow_attributes)]
        other => {
            log::warn!("Unsupported MVT value type: {other:?}");
            Value::Null
        }
    }
}

fn point(coord: Coord<f32>) -> TilePoint {
    [coord.x.round() as i32, coord.y.round() as i32]
}

fn ring(line: &LineString<f32>) -> Vec<TilePoint> {
    line.0.iter().copied().map(point).collect()
}

fn convert_geometry(geometry: geo_types::Geometry<f32>) -> (GeomType, Geometry) {
    use geo_types::Geometry as G;

    match geometry {
        G::Point(p) => (GeomType::Point, vec![vec![point(p.0)]]),
        G::MultiPoint(points) => (
            GeomType::Point,
            points.0.into_iter().map(|p| vec![point(p.0)]).collect(),
        ),
        G::Line(line) => (GeomType::LineString, vec![vec![point(line.start), point(line.end)]]),
        G::LineString(line) => (GeomType::LineString, vec![ring(&line)]),
        G::MultiLineString(lines) => (GeomType::LineString, lines.0.iter().map(ring).collect()),
        G::Polygon(polygon) => (GeomType::Polygon, polygon_rings(&polygon)),
        G::MultiPolygon(polygons) => (
            GeomType::Polygon,
            polygons.0.iter().flat_map(polygon_rings).collect(),
        ),
        other => {
            log::warn!("Unsupported MVT geometry: {other:?}");
            (GeomType::Unknown, Vec::new())
        }
    }
}

fn polygon_rings(polygon: &geo_types::Polygon<f32>) -> Geometry {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(ring)
        .collect()
}
