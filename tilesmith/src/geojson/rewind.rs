//! Enforce ring winding order on polygons.

use super::{GeoJson, Geometry, Position};

/// Wind outer rings clockwise when `outer` is true (counter-clockwise otherwise),
/// holes the opposite way.
pub fn rewind(geojson: &mut GeoJson, outer: bool) {
    match geojson {
        GeoJson::FeatureCollection(collection) => {
            for feature in &mut collection.features {
                if let Some(geometry) = &mut feature.geometry {
                    rewind_geometry(geometry, outer);
                }
            }
        }
        GeoJson::Feature(feature) => {
            if let Some(geometry) = &mut feature.geometry {
                rewind_geometry(geometry, outer);
            }
        }
        GeoJson::Geometry(geometry) => rewind_geometry(geometry, outer),
    }
}

fn rewind_geometry(geometry: &mut Geometry, outer: bool) {
    match geometry {
        Geometry::GeometryCollection { geometries } => {
            for geometry in geometries {
                rewind_geometry(geometry, outer);
            }
        }
        Geometry::Polygon { coordinates } => rewind_rings(coordinates, outer),
        Geometry::MultiPolygon { coordinates } => {
            for polygon in coordinates {
                rewind_rings(polygon, outer);
            }
        }
        _ => {}
    }
}

fn rewind_rings(rings: &mut [Vec<Position>], outer: bool) {
    if let Some((exterior, holes)) = rings.split_first_mut() {
        rewind_ring(exterior, outer);
        for hole in holes {
            rewind_ring(hole, !outer);
        }
    }
}

fn rewind_ring(ring: &mut [Position], clockwise: bool) {
    let mut area = 0.;
    let mut error = 0.;
    let mut j = ring.len().wrapping_sub(1);

    // Kahan-Babuska summation, the result decides the orientation of nearly
    // degenerate rings.
    for i in 0..ring.len() {
        let k = (ring[i].0 - ring[j].0) * (ring[j].1 + ring[i].1);
        let m = area + k;
        error += if f64::abs(area) >= f64::abs(k) {
            area - m + k
        } else {
            k - m + area
        };
        area = m;
        j = i;
    }

    if (area + error >= 0.) != clockwise {
        ring.reverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geojson::Feature;
    use geo::Area as _;

    fn polygon(rings: &[&[(f64, f64)]]) -> Geometry {
        Geometry::Polygon {
            coordinates: rings
                .iter()
                .map(|ring| ring.iter().map(|&(x, y)| Position(x, y)).collect())
                .collect(),
        }
    }

    fn signed_area(ring: &[Position]) -> f64 {
        let exterior: geo_types::LineString<f64> = ring.iter().map(|p| (p.0, p.1)).collect();
        geo_types::Polygon::new(exterior, vec![]).signed_area()
    }

    #[test]
    fn outer_rings_become_clockwise_and_holes_counter_clockwise() {
        let counter_clockwise = [(0., 0.), (10., 0.), (10., 10.), (0., 10.), (0., 0.)];
        let clockwise_hole = [(2., 2.), (2., 4.), (4., 4.), (4., 2.), (2., 2.)];

        let mut geojson = GeoJson::Feature(Feature::new(polygon(&[
            &counter_clockwise,
            &clockwise_hole,
        ])));
        rewind(&mut geojson, true);

        let GeoJson::Feature(Feature {
            geometry: Some(Geometry::Polygon { coordinates }),
            ..
        }) = geojson
        else {
            panic!("geometry changed its type");
        };

        // Positive signed area means counter-clockwise.
        assert!(signed_area(&coordinates[0]) < 0.);
        assert!(signed_area(&coordinates[1]) > 0.);
    }

    #[test]
    fn already_wound_rings_are_untouched() {
        let clockwise = polygon(&[&[(0., 0.), (0., 10.), (10., 10.), (10., 0.), (0., 0.)]]);
        let mut geojson = GeoJson::Geometry(clockwise.clone());
        rewind(&mut geojson, true);
        assert_eq!(geojson, GeoJson::Geometry(clockwise));
    }
}
