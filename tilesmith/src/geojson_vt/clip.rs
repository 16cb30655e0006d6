//! Clip features between two axis-parallel lines, and duplicate features crossing the
//! antimeridian into the neighbouring world copies.
//!
//! ```text
//!     |        |
//!  ___|___     |     /
//! /   |   \____|____/
//!     |        |
//! ```

use super::{GeoJsonVtOptions, Slice, VtFeature, VtGeometry};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Axis {
    X,
    Y,
}

impl Axis {
    fn of(self, point: &[f64; 3]) -> f64 {
        match self {
            Axis::X => point[0],
            Axis::Y => point[1],
        }
    }

    fn range(self, feature: &VtFeature) -> (f64, f64) {
        match self {
            Axis::X => (feature.min_x, feature.max_x),
            Axis::Y => (feature.min_y, feature.max_y),
        }
    }

    /// Point where segment `a-b` crosses the line at `k`, and how far along the
    /// segment it is. Such points are always kept by simplification.
    fn intersect(self, a: &[f64; 3], b: &[f64; 3], k: f64) -> ([f64; 3], f64) {
        match self {
            Axis::X => {
                let t = (k - a[0]) / (b[0] - a[0]);
                ([k, a[1] + (b[1] - a[1]) * t, 1.], t)
            }
            Axis::Y => {
                let t = (k - a[1]) / (b[1] - a[1]);
                ([a[0] + (b[0] - a[0]) * t, k, 1.], t)
            }
        }
    }
}

/// Keep the parts of features lying in `k1..k2` (in units of `1 / scale`). `None`
/// means nothing is left.
#[expect(clippy::too_many_arguments)]
pub(super) fn clip(
    features: &[VtFeature],
    scale: f64,
    k1: f64,
    k2: f64,
    axis: Axis,
    min_all: f64,
    max_all: f64,
    line_metrics: bool,
) -> Option<Vec<VtFeature>> {
    let k1 = k1 / scale;
    let k2 = k2 / scale;

    if min_all >= k1 && max_all < k2 {
        return Some(features.to_vec());
    } else if max_all < k1 || min_all >= k2 {
        return None;
    }

    let mut clipped = Vec::new();

    for feature in features {
        let (min, max) = axis.range(feature);

        if min >= k1 && max < k2 {
            clipped.push(feature.clone());
            continue;
        } else if max < k1 || min >= k2 {
            continue;
        }

        let geometry = match &feature.geometry {
            VtGeometry::Points(points) => {
                let points: Vec<_> = points
                    .iter()
                    .filter(|point| (k1..=k2).contains(&axis.of(point)))
                    .copied()
                    .collect();
                (!points.is_empty()).then_some(VtGeometry::Points(points))
            }
            VtGeometry::LineString(line) => {
                let mut slices = Vec::new();
                clip_line(line, &mut slices, k1, k2, axis, false, line_metrics);

                if line_metrics {
                    // Every piece separately, each with its own metrics.
                    clipped.extend(slices.into_iter().map(|slice| {
                        VtFeature::new(
                            feature.id.clone(),
                            VtGeometry::LineString(slice),
                            Arc::clone(&feature.tags),
                        )
                    }));
                    continue;
                }
                lines(slices)
            }
            VtGeometry::MultiLineString(lines_in) => {
                let mut slices = Vec::new();
                clip_lines(lines_in, &mut slices, k1, k2, axis, false);
                lines(slices)
            }
            VtGeometry::Polygon(rings) => {
                let mut slices = Vec::new();
                clip_lines(rings, &mut slices, k1, k2, axis, true);
                (!slices.is_empty()).then_some(VtGeometry::Polygon(slices))
            }
            VtGeometry::MultiPolygon(polygons) => {
                let polygons: Vec<_> = polygons
                    .iter()
                    .filter_map(|rings| {
                        let mut slices = Vec::new();
                        clip_lines(rings, &mut slices, k1, k2, axis, true);
                        (!slices.is_empty()).then_some(slices)
                    })
                    .collect();
                (!polygons.is_empty()).then_some(VtGeometry::MultiPolygon(polygons))
            }
        };

        if let Some(geometry) = geometry {
            clipped.push(VtFeature::new(
                feature.id.clone(),
                geometry,
                Arc::clone(&feature.tags),
            ));
        }
    }

    (!clipped.is_empty()).then_some(clipped)
}

/// Single piece stays a line string.
fn lines(mut slices: Vec<Slice>) -> Option<VtGeometry> {
    match slices.len() {
        0 => None,
        1 => slices.pop().map(VtGeometry::LineString),
        _ => Some(VtGeometry::MultiLineString(slices)),
    }
}

fn clip_lines(
    lines: &[Slice],
    slices: &mut Vec<Slice>,
    k1: f64,
    k2: f64,
    axis: Axis,
    is_polygon: bool,
) {
    for line in lines {
        clip_line(line, slices, k1, k2, axis, is_polygon, false);
    }
}

fn clip_line(
    line: &Slice,
    slices: &mut Vec<Slice>,
    k1: f64,
    k2: f64,
    axis: Axis,
    is_polygon: bool,
    track_metrics: bool,
) {
    let mut slice = line.empty();
    let mut len = line.start;
    let mut seg_len = 0.;
    let mut t = 0.;

    for segment in line.points.windows(2) {
        let (a_point, b_point) = (&segment[0], &segment[1]);
        let a = axis.of(a_point);
        let b = axis.of(b_point);
        let mut exited = false;

        if track_metrics {
            seg_len = f64::hypot(a_point[0] - b_point[0], a_point[1] - b_point[1]);
        }

        if a < k1 {
            // ---|-->  | (line enters the clip region from the left)
            if b > k1 {
                let (point, at) = axis.intersect(a_point, b_point, k1);
                slice.points.push(point);
                t = at;
                if track_metrics {
                    slice.start = len + seg_len * t;
                }
            }
        } else if a > k2 {
            // |  <--|--- (line enters the clip region from the right)
            if b < k2 {
                let (point, at) = axis.intersect(a_point, b_point, k2);
                slice.points.push(point);
                t = at;
                if track_metrics {
                    slice.start = len + seg_len * t;
                }
            }
        } else {
            slice.points.push(*a_point);
        }

        if b < k1 && a >= k1 {
            // <--|---  | or <--|-----|--- (line exits the clip region on the left)
            let (point, at) = axis.intersect(a_point, b_point, k1);
            slice.points.push(point);
            t = at;
            exited = true;
        }
        if b > k2 && a <= k2 {
            // |  ---|--> or ---|-----|--> (line exits the clip region on the right)
            let (point, at) = axis.intersect(a_point, b_point, k2);
            slice.points.push(point);
            t = at;
            exited = true;
        }

        if !is_polygon && exited {
            if track_metrics {
                slice.end = len + seg_len * t;
            }
            slices.push(std::mem::replace(&mut slice, line.empty()));
        }

        if track_metrics {
            len += seg_len;
        }
    }

    if let Some(last) = line.points.last() {
        if (k1..=k2).contains(&axis.of(last)) {
            slice.points.push(*last);
        }
    }

    // Close the polygon if its endpoints are not the same after clipping.
    if is_polygon && slice.points.len() >= 2 {
        let first = slice.points[0];
        if slice.points.last().is_some_and(|last| last[0] != first[0] || last[1] != first[1]) {
            slice.points.push(first);
        }
    }

    if !slice.points.is_empty() {
        slices.push(slice);
    }
}

/// Copy features sticking out of the world to the other side.
pub(super) fn wrap(features: Vec<VtFeature>, options: &GeoJsonVtOptions) -> Vec<VtFeature> {
    let buffer = f64::from(options.buffer) / f64::from(options.extent);
    let line_metrics = options.line_metrics;

    let left = clip(&features, 1., -1. - buffer, buffer, Axis::X, -1., 2., line_metrics);
    let right = clip(&features, 1., 1. - buffer, 2. + buffer, Axis::X, -1., 2., line_metrics);

    if left.is_none() && right.is_none() {
        return features;
    }

    let center = clip(&features, 1., -buffer, 1. + buffer, Axis::X, -1., 2., line_metrics)
        .unwrap_or_default();

    let mut merged = left.map(|left| shift(left, 1.)).unwrap_or_default();
    merged.extend(center);
    if let Some(right) = right {
        merged.extend(shift(right, -1.));
    }
    merged
}

fn shift(features: Vec<VtFeature>, offset: f64) -> Vec<VtFeature> {
    features
        .into_iter()
        .map(|feature| {
            let shift_slice = |slice: &Slice| Slice {
                points: slice
                    .points
                    .iter()
                    .map(|&[x, y, z]| [x + offset, y, z])
                    .collect(),
                ..*slice
            };
            let geometry = match &feature.geometry {
                VtGeometry::Points(points) => VtGeometry::Points(
                    points.iter().map(|&[x, y, z]| [x + offset, y, z]).collect(),
                ),
                VtGeometry::LineString(line) => VtGeometry::LineString(shift_slice(line)),
                VtGeometry::MultiLineString(lines) => {
                    VtGeometry::MultiLineString(lines.iter().map(shift_slice).collect())
                }
                VtGeometry::Polygon(rings) => {
                    VtGeometry::Polygon(rings.iter().map(shift_slice).collect())
                }
                VtGeometry::MultiPolygon(polygons) => VtGeometry::MultiPolygon(
                    polygons
                        .iter()
                        .map(|rings| rings.iter().map(shift_slice).collect())
                        .collect(),
                ),
            };
            VtFeature::new(feature.id, geometry, feature.tags)
        })
        .collect()
}
