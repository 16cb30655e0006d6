//! Project GeoJSON into the intermediate representation: flat lists of
//! `[x, y, importance]` in 0-1 Mercator space.

use super::{GeoJsonVtOptions, Slice, VtFeature, VtGeometry};
use crate::{
    expression::Properties,
    geojson::{Feature, GeoJson, Geometry, Position},
    mercator::{lat_y, lng_x},
};
use serde_json::Value;
use std::sync::Arc;

pub(super) fn convert(data: &GeoJson, options: &GeoJsonVtOptions) -> Vec<VtFeature> {
    let mut features = Vec::new();
    match data {
        GeoJson::FeatureCollection(collection) => {
            for (index, feature) in collection.features.iter().enumerate() {
                convert_feature(&mut features, feature, options, index);
            }
        }
        GeoJson::Feature(feature) => convert_feature(&mut features, feature, options, 0),
        GeoJson::Geometry(geometry) => {
            convert_feature(&mut features, &Feature::new(geometry.clone()), options, 0);
        }
    }
    features
}

fn convert_feature(
    features: &mut Vec<VtFeature>,
    feature: &Feature,
    options: &GeoJsonVtOptions,
    index: usize,
) {
    let Some(geometry) = &feature.geometry else {
        return;
    };

    let id = if let Some(key) = &options.promote_id {
        feature
            .properties
            .as_ref()
            .and_then(|properties| properties.get(key))
            .cloned()
    } else if options.generate_id {
        Some(Value::from(index))
    } else {
        feature.id.clone()
    };

    let tags = Arc::new(feature.properties.clone().unwrap_or_default());
    convert_geometry(features, geometry, id, &tags, options);
}

fn convert_geometry(
    features: &mut Vec<VtFeature>,
    geometry: &Geometry,
    id: Option<Value>,
    tags: &Arc<Properties>,
    options: &GeoJsonVtOptions,
) {
    let tolerance = (options.tolerance / (f64::from(1u32 << options.max_zoom) * f64::from(options.extent)))
        .powi(2);

    let geometry = match geometry {
        Geometry::Point { coordinates } => VtGeometry::Points(vec![project(*coordinates)]),
        Geometry::MultiPoint { coordinates } => {
            VtGeometry::Points(coordinates.iter().copied().map(project).collect())
        }
        Geometry::LineString { coordinates } => {
            VtGeometry::LineString(convert_line(coordinates, tolerance, false))
        }
        Geometry::MultiLineString { coordinates } => {
            if options.line_metrics {
                // Every line on its own, so that metrics can be tracked.
                for line in coordinates {
                    features.push(VtFeature::new(
                        id.clone(),
                        VtGeometry::LineString(convert_line(line, tolerance, false)),
                        Arc::clone(tags),
                    ));
                }
                return;
            }
            VtGeometry::MultiLineString(convert_lines(coordinates, tolerance, false))
        }
        Geometry::Polygon { coordinates } => {
            VtGeometry::Polygon(convert_lines(coordinates, tolerance, true))
        }
        Geometry::MultiPolygon { coordinates } => VtGeometry::MultiPolygon(
            coordinates
                .iter()
                .map(|polygon| convert_lines(polygon, tolerance, true))
                .collect(),
        ),
        Geometry::GeometryCollection { geometries } => {
            for geometry in geometries {
                convert_geometry(features, geometry, id.clone(), tags, options);
            }
            return;
        }
    };

    features.push(VtFeature::new(id, geometry, Arc::clone(tags)));
}

fn project(position: Position) -> [f64; 3] {
    [lng_x(position.0), lat_y(position.1), 0.]
}

fn convert_line(ring: &[Position], tolerance: f64, is_polygon: bool) -> Slice {
    let mut points: Vec<[f64; 3]> = Vec::with_capacity(ring.len());
    let mut size = 0.;

    for position in ring {
        let point = project(*position);
        if let Some([x0, y0, _]) = points.last() {
            let [x, y, _] = point;
            size += if is_polygon {
                (x0 * y - x * y0) / 2.
            } else {
                f64::hypot(x - x0, y - y0)
            };
        }
        points.push(point);
    }

    if let Some(last) = points.len().checked_sub(1) {
        points[0][2] = 1.;
        simplify(&mut points, 0, last, tolerance);
        points[last][2] = 1.;
    }

    let size = f64::abs(size);
    Slice {
        points,
        size,
        start: 0.,
        end: size,
    }
}

fn convert_lines(rings: &[Vec<Position>], tolerance: f64, is_polygon: bool) -> Vec<Slice> {
    rings
        .iter()
        .map(|ring| convert_line(ring, tolerance, is_polygon))
        .collect()
}

/// Douglas-Peucker which, instead of dropping points, stores their importance (squared
/// distance at the moment they were picked) in the third coordinate. Uses an explicit
/// stack, pathological inputs would overflow the call stack otherwise.
pub(super) fn simplify(points: &mut [[f64; 3]], first: usize, last: usize, sq_tolerance: f64) {
    let mut stack = vec![(first, last)];

    while let Some((first, last)) = stack.pop() {
        let mut max_sq_dist = sq_tolerance;
        let mid = first + (last - first) / 2;
        let mut min_pos_to_mid = last - first;
        let mut index = None;

        let [ax, ay, _] = points[first];
        let [bx, by, _] = points[last];

        for (i, point) in points.iter().enumerate().take(last).skip(first + 1) {
            let d = sq_seg_dist(point[0], point[1], ax, ay, bx, by);

            if d > max_sq_dist {
                index = Some(i);
                max_sq_dist = d;
            } else if d == max_sq_dist {
                // Prefer a pivot close to the middle, it keeps the work balanced for
                // degenerate inputs.
                let pos_to_mid = i.abs_diff(mid);
                if pos_to_mid < min_pos_to_mid {
                    index = Some(i);
                    min_pos_to_mid = pos_to_mid;
                }
            }
        }

        if let Some(index) = index.filter(|_| max_sq_dist > sq_tolerance) {
            points[index][2] = max_sq_dist;
            if index - first > 1 {
                stack.push((first, index));
            }
            if last - index > 1 {
                stack.push((index, last));
            }
        }
    }
}

/// Squared distance from a point to a segment.
fn sq_seg_dist(px: f64, py: f64, mut x: f64, mut y: f64, bx: f64, by: f64) -> f64 {
    let mut dx = bx - x;
    let mut dy = by - y;

    if dx != 0. || dy != 0. {
        let t = ((px - x) * dx + (py - y) * dy) / (dx * dx + dy * dy);

        if t > 1. {
            x = bx;
            y = by;
        } else if t > 0. {
            x += dx * t;
            y += dy * t;
        }
    }

    dx = px - x;
    dy = py - y;

    dx * dx + dy * dy
}
