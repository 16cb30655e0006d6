//! Turning the intermediate features into a tile with integer coordinates.

use super::{GeoJsonVtOptions, Slice, Tile, TileFeature, VtFeature, VtGeometry};
use crate::vector_tile::{GeomType, TilePoint};
use serde_json::Value;
use std::sync::Arc;

pub(super) fn create_tile(
    features: &[VtFeature],
    z: u8,
    x: u32,
    y: u32,
    options: &GeoJsonVtOptions,
) -> Tile {
    let tolerance = if z == options.max_zoom {
        0.
    } else {
        options.tolerance / (f64::from(1u32 << z) * f64::from(options.extent))
    };

    let mut tile = Tile {
        features: Vec::new(),
        num_points: 0,
        num_simplified: 0,
        num_features: features.len(),
        source: None,
        x,
        y,
        z,
        min_x: 2.,
        min_y: 1.,
        max_x: -1.,
        max_y: 0.,
    };

    let transform = Transform {
        extent: f64::from(options.extent),
        z2: f64::from(1u32 << z),
        tx: f64::from(x),
        ty: f64::from(y),
    };

    for feature in features {
        add_feature(&mut tile, feature, tolerance, options, &transform);
    }

    tile
}

/// From 0-1 world space into the tile's integer grid.
struct Transform {
    extent: f64,
    z2: f64,
    tx: f64,
    ty: f64,
}

impl Transform {
    fn point(&self, point: &[f64; 3]) -> TilePoint {
        [
            (self.extent * (point[0] * self.z2 - self.tx)).round() as i32,
            (self.extent * (point[1] * self.z2 - self.ty)).round() as i32,
        ]
    }
}

fn add_feature(
    tile: &mut Tile,
    feature: &VtFeature,
    tolerance: f64,
    options: &GeoJsonVtOptions,
    transform: &Transform,
) {
    tile.min_x = tile.min_x.min(feature.min_x);
    tile.min_y = tile.min_y.min(feature.min_y);
    tile.max_x = tile.max_x.max(feature.max_x);
    tile.max_y = tile.max_y.max(feature.max_y);

    let mut simplified = Vec::new();

    let kind = match &feature.geometry {
        VtGeometry::Points(points) => {
            for point in points {
                simplified.push(vec![transform.point(point)]);
            }
            tile.num_points += points.len();
            tile.num_simplified += points.len();
            GeomType::Point
        }
        VtGeometry::LineString(line) => {
            add_line(&mut simplified, line, tile, tolerance, false, false, transform);
            GeomType::LineString
        }
        VtGeometry::MultiLineString(lines) => {
            for line in lines {
                add_line(&mut simplified, line, tile, tolerance, false, false, transform);
            }
            GeomType::LineString
        }
        VtGeometry::Polygon(rings) => {
            for (i, ring) in rings.iter().enumerate() {
                add_line(&mut simplified, ring, tile, tolerance, true, i == 0, transform);
            }
            GeomType::Polygon
        }
        VtGeometry::MultiPolygon(polygons) => {
            for rings in polygons {
                for (i, ring) in rings.iter().enumerate() {
                    add_line(&mut simplified, ring, tile, tolerance, true, i == 0, transform);
                }
            }
            GeomType::Polygon
        }
    };

    if simplified.is_empty() {
        return;
    }

    let tags = match &feature.geometry {
        VtGeometry::LineString(line) if options.line_metrics => {
            let mut tags = (*feature.tags).clone();
            tags.insert(
                "mapbox_clip_start".to_owned(),
                Value::from(line.start / line.size),
            );
            tags.insert("mapbox_clip_end".to_owned(), Value::from(line.end / line.size));
            Arc::new(tags)
        }
        _ => Arc::clone(&feature.tags),
    };

    tile.features.push(TileFeature {
        id: feature.id.clone(),
        kind,
        geometry: simplified,
        tags,
    });
}

#[expect(clippy::too_many_arguments)]
fn add_line(
    result: &mut Vec<Vec<TilePoint>>,
    line: &Slice,
    tile: &mut Tile,
    tolerance: f64,
    is_polygon: bool,
    is_outer: bool,
    transform: &Transform,
) {
    let sq_tolerance = tolerance * tolerance;

    if tolerance > 0. && line.size < if is_polygon { sq_tolerance } else { tolerance } {
        tile.num_points += line.points.len();
        return;
    }

    let mut ring = Vec::new();
    for point in &line.points {
        if tolerance == 0. || point[2] > sq_tolerance {
            tile.num_simplified += 1;
            ring.push(point);
        }
        tile.num_points += 1;
    }

    if is_polygon {
        rewind(&mut ring, is_outer);
    }

    result.push(ring.into_iter().map(|point| transform.point(point)).collect());
}

/// Outer rings clockwise, holes counter-clockwise, in tile space where y points down.
fn rewind(ring: &mut [&[f64; 3]], clockwise: bool) {
    let mut area = 0.;
    if let Some(mut previous) = ring.last() {
        for point in ring.iter() {
            area += (point[0] - previous[0]) * (point[1] + previous[1]);
            previous = point;
        }
    }
    if (area > 0.) == clockwise {
        ring.reverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Properties;

    fn slice(points: &[(f64, f64)], size: f64) -> Slice {
        Slice {
            points: points.iter().map(|&(x, y)| [x, y, 1.]).collect(),
            size,
            start: 0.,
            end: size,
        }
    }

    fn polygon(rings: Vec<Slice>) -> VtFeature {
        VtFeature::new(
            Some(Value::from(1)),
            VtGeometry::Polygon(rings),
            Arc::new(Properties::new()),
        )
    }

    /// Shoelace in tile space, positive for clockwise rings on screen.
    fn screen_area(ring: &[TilePoint]) -> i64 {
        ring.windows(2)
            .map(|w| i64::from(w[0][0]) * i64::from(w[1][1]) - i64::from(w[1][0]) * i64::from(w[0][1]))
            .sum()
    }

    #[test]
    fn polygon_rings_are_rewound_and_transformed() {
        // Counter-clockwise on screen, both of them.
        let outer = slice(&[(0., 0.), (0., 0.5), (0.5, 0.5), (0.5, 0.), (0., 0.)], 0.25);
        let hole = slice(&[(0.1, 0.1), (0.1, 0.2), (0.2, 0.2), (0.2, 0.1), (0.1, 0.1)], 0.01);

        let tile = create_tile(
            &[polygon(vec![outer, hole])],
            0,
            0,
            0,
            &GeoJsonVtOptions::default(),
        );

        assert_eq!(tile.features.len(), 1);
        let feature = &tile.features[0];
        assert_eq!(feature.kind, GeomType::Polygon);
        assert_eq!(feature.id, Some(Value::from(1)));
        assert!(screen_area(&feature.geometry[0]) > 0);
        assert!(screen_area(&feature.geometry[1]) < 0);
        assert!(feature.geometry[0].contains(&[2048, 2048]));
        assert_eq!(tile.num_points, 10);
        assert_eq!(tile.num_simplified, 10);
    }

    #[test]
    fn tiny_rings_are_dropped_but_counted() {
        let speck = slice(&[(0.1, 0.1), (0.1, 0.1000001), (0.1000001, 0.1), (0.1, 0.1)], 1e-14);
        let tile = create_tile(&[polygon(vec![speck])], 0, 0, 0, &GeoJsonVtOptions::default());

        assert!(tile.features.is_empty());
        assert_eq!(tile.num_points, 4);
        assert_eq!(tile.num_simplified, 0);
    }

    #[test]
    fn nothing_is_simplified_at_max_zoom() {
        let mut line = slice(&[(0.5, 0.5), (0.5000001, 0.5), (0.6, 0.5)], 1e-9);
        line.points[1][2] = 0.;
        let feature = VtFeature::new(None, VtGeometry::LineString(line), Arc::new(Properties::new()));
        let options = GeoJsonVtOptions {
            max_zoom: 2,
            ..Default::default()
        };

        let tile = create_tile(std::slice::from_ref(&feature), 2, 2, 2, &options);
        assert_eq!(tile.features[0].geometry[0].len(), 3);

        let tile = create_tile(std::slice::from_ref(&feature), 1, 1, 1, &options);
        assert!(tile.features.is_empty());
    }

    #[test]
    fn line_metrics_are_added_to_tags() {
        let mut line = slice(&[(0.1, 0.5), (0.2, 0.5)], 0.4);
        line.start = 0.1;
        line.end = 0.2;
        let feature = VtFeature::new(None, VtGeometry::LineString(line), Arc::new(Properties::new()));
        let options = GeoJsonVtOptions {
            line_metrics: true,
            ..Default::default()
        };

        let tile = create_tile(&[feature], 0, 0, 0, &options);
        let tags = &tile.features[0].tags;
        assert_eq!(tags.get("mapbox_clip_start"), Some(&Value::from(0.25)));
        assert_eq!(tags.get("mapbox_clip_end"), Some(&Value::from(0.5)));
    }
}
