//! Project the lon/lat coordinates into the Web Mercator, normalized to 0-1 range.
//! <https://en.wikipedia.org/wiki/Web_Mercator_projection>

use std::f64::consts::PI;

/// Longitude into 0-1 range, where 0 is the antimeridian on the west.
pub fn lng_x(lng: f64) -> f64 {
    lng / 360. + 0.5
}

/// Latitude into 0-1 range, where 0 is the north edge. Values beyond the poles are clamped.
pub fn lat_y(lat: f64) -> f64 {
    let sin = (lat * PI / 180.).sin();
    let y = 0.5 - 0.25 * ((1. + sin) / (1. - sin)).ln() / PI;
    y.clamp(0., 1.)
}

pub fn x_lng(x: f64) -> f64 {
    (x - 0.5) * 360.
}

pub fn y_lat(y: f64) -> f64 {
    let y2 = (180. - y * 360.) * PI / 180.;
    360. * y2.exp().atan() / PI - 90.
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn projecting_and_back() {
        let citadel = (21.00027, 52.26470);

        let x = lng_x(citadel.0);
        let y = lat_y(citadel.1);
        assert!((0. ..1.).contains(&x));
        assert!((0. ..0.5).contains(&y));

        assert_relative_eq!(x_lng(x), citadel.0, epsilon = 1e-9);
        assert_relative_eq!(y_lat(y), citadel.1, epsilon = 1e-9);
    }

    #[test]
    fn equator_and_poles() {
        assert_relative_eq!(lat_y(0.), 0.5);
        assert_relative_eq!(lng_x(-180.), 0.);
        assert_relative_eq!(lat_y(90.), 0.);
        assert_relative_eq!(lat_y(-90.), 1.);
    }
}
