//! Elevation tiles. Heights are packed into the color channels of a raster tile, which
//! carries a 1px border so that neighbouring tiles can be stitched without seams.

use crate::{error::Error, warn_once};
use image::{RgbaImage, imageops};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DemEncoding {
    #[default]
    Mapbox,
    Terrarium,
}

impl DemEncoding {
    /// Encoding by name. Unknown names fall back to the default with a warning.
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            None | Some("mapbox") => Self::Mapbox,
            Some("terrarium") => Self::Terrarium,
            Some(other) => {
                warn_once(&format!(
                    "\"{other}\" is not a valid encoding type. \
                     Valid types include \"mapbox\" and \"terrarium\"."
                ));
                Self::Mapbox
            }
        }
    }

    fn unpack(self, [r, g, b, _]: [u8; 4]) -> f64 {
        let (r, g, b) = (f64::from(r), f64::from(g), f64::from(b));
        match self {
            Self::Mapbox => (r * 256. * 256. + g * 256. + b) / 10. - 10000.,
            Self::Terrarium => r * 256. + g + b / 256. - 32768.,
        }
    }
}

/// Decoded elevation tile.
#[derive(Debug, Clone, PartialEq)]
pub struct DemData {
    pub uid: u64,
    pub encoding: DemEncoding,
    /// Size of the tile without its border.
    pub dim: i32,
    stride: i32,
    pixels: Vec<[u8; 4]>,
    pub min: f64,
    pub max: f64,
}

impl DemData {
    /// Elevation from pixels that already include the 1px border.
    ///
    /// # Errors
    ///
    /// When the image is not square or too small to hold a border.
    pub fn new(uid: u64, image: &RgbaImage, encoding: DemEncoding) -> Result<Self, Error> {
        if image.width() != image.height() {
            return Err(Error::Parse("DEM tiles must be square.".to_owned()));
        }
        let stride = i32::try_from(image.height())
            .map_err(|_| Error::Parse("DEM tile is too large.".to_owned()))?;
        if stride < 3 {
            return Err(Error::Parse("DEM tile is too small.".to_owned()));
        }

        let mut dem = Self {
            uid,
            encoding,
            dim: stride - 2,
            stride,
            pixels: image.pixels().map(|pixel| pixel.0).collect(),
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        };
        dem.fill_own_border();

        for y in 0..dem.dim {
            for x in 0..dem.dim {
                let elevation = dem.elevation(x, y);
                dem.min = dem.min.min(elevation);
                dem.max = dem.max.max(elevation);
            }
        }
        Ok(dem)
    }

    /// Decode a PNG or WebP tile and give it an empty border.
    ///
    /// # Errors
    ///
    /// When the image can not be decoded or is not square.
    pub fn decode(uid: u64, data: &[u8], encoding: DemEncoding) -> Result<Self, Error> {
        let decoded = image::load_from_memory(data)
            .map_err(|error| Error::Parse(error.to_string()))?
            .to_rgba8();
        let mut padded = RgbaImage::new(decoded.width() + 2, decoded.height() + 2);
        imageops::replace(&mut padded, &decoded, 1, 1);
        Self::new(uid, &padded, encoding)
    }

    /// Until neighbours are known, the border repeats the edge of the tile.
    fn fill_own_border(&mut self) {
        let dim = self.dim;
        for i in 0..dim {
            self.copy(i, -1, i, 0);
            self.copy(i, dim, i, dim - 1);
            self.copy(-1, i, 0, i);
            self.copy(dim, i, dim - 1, i);
        }
        self.copy(-1, -1, 0, 0);
        self.copy(dim, -1, dim - 1, 0);
        self.copy(-1, dim, 0, dim - 1);
        self.copy(dim, dim, dim - 1, dim - 1);
    }

    fn copy(&mut self, x: i32, y: i32, from_x: i32, from_y: i32) {
        if let (Some(to), Some(from)) = (self.index(x, y), self.index(from_x, from_y)) {
            self.pixels[to] = self.pixels[from];
        }
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < -1 || x > self.dim || y < -1 || y > self.dim {
            return None;
        }
        usize::try_from((y + 1) * self.stride + (x + 1)).ok()
    }

    fn elevation(&self, x: i32, y: i32) -> f64 {
        self.get(x, y).unwrap_or_default()
    }

    /// Elevation in meters. Coordinates range over `-1..=dim`, including the border.
    pub fn get(&self, x: i32, y: i32) -> Option<f64> {
        let pixel = self.pixels.get(self.index(x, y)?)?;
        Some(self.encoding.unpack(*pixel))
    }

    /// Copy the edge of a neighbouring tile into the border. `dx` and `dy` give the
    /// position of the neighbour, each in `-1..=1`.
    ///
    /// # Errors
    ///
    /// When the tiles have different sizes.
    pub fn backfill_border(&mut self, border: &Self, dx: i32, dy: i32) -> Result<(), Error> {
        if self.dim != border.dim {
            return Err(Error::Parse("DEM dimension mismatch.".to_owned()));
        }

        let dim = self.dim;
        let (mut x_min, mut x_max) = (dx * dim, dx * dim + dim);
        let (mut y_min, mut y_max) = (dy * dim, dy * dim + dim);
        match dx {
            -1 => x_min = x_max - 1,
            1 => x_max = x_min + 1,
            _ => {}
        }
        match dy {
            -1 => y_min = y_max - 1,
            1 => y_max = y_min + 1,
            _ => {}
        }

        let (ox, oy) = (-dx * dim, -dy * dim);
        for y in y_min..y_max {
            for x in x_min..x_max {
                if let (Some(to), Some(from)) = (self.index(x, y), border.index(x + ox, y + oy)) {
                    self.pixels[to] = border.pixels[from];
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    /// Mapbox encoded tile where every pixel has the elevation `x + 10 * y`.
    fn tile(dim: u32, offset: f64) -> RgbaImage {
        RgbaImage::from_fn(dim + 2, dim + 2, |x, y| {
            let (x, y) = (f64::from(x) - 1., f64::from(y) - 1.);
            if x < 0. || y < 0. || x >= f64::from(dim) || y >= f64::from(dim) {
                return Rgba([0, 0, 0, 0]);
            }
            let encoded = ((x + 10. * y + offset + 10000.) * 10.) as u32;
            Rgba([(encoded >> 16) as u8, (encoded >> 8) as u8, encoded as u8, 255])
        })
    }

    #[test]
    fn unpacking() {
        approx::assert_relative_eq!(DemEncoding::Mapbox.unpack([1, 134, 160, 255]), 0.);
        approx::assert_relative_eq!(DemEncoding::Terrarium.unpack([128, 0, 0, 255]), 0.);
        approx::assert_relative_eq!(DemEncoding::Terrarium.unpack([128, 100, 128, 255]), 100.5);
    }

    #[test]
    fn unknown_encoding_falls_back_to_mapbox() {
        assert_eq!(DemEncoding::from_name(Some("terrarium")), DemEncoding::Terrarium);
        assert_eq!(DemEncoding::from_name(Some("lerc")), DemEncoding::Mapbox);
        assert_eq!(DemEncoding::from_name(None), DemEncoding::Mapbox);
    }

    #[test]
    fn border_repeats_the_edge() {
        let dem = DemData::new(1, &tile(4, 0.), DemEncoding::Mapbox).unwrap();
        assert_eq!(dem.dim, 4);
        approx::assert_relative_eq!(dem.get(0, 0).unwrap(), 0.);
        approx::assert_relative_eq!(dem.get(-1, 0).unwrap(), 0.);
        approx::assert_relative_eq!(dem.get(4, 3).unwrap(), 33.);
        approx::assert_relative_eq!(dem.get(4, 4).unwrap(), 33.);
        approx::assert_relative_eq!(dem.min, 0.);
        approx::assert_relative_eq!(dem.max, 33.);
        assert_eq!(dem.get(5, 0), None);
    }

    #[test]
    fn backfilling_from_a_neighbour() {
        let mut dem = DemData::new(1, &tile(4, 0.), DemEncoding::Mapbox).unwrap();
        let east = DemData::new(2, &tile(4, 1000.), DemEncoding::Mapbox).unwrap();

        dem.backfill_border(&east, 1, 0).unwrap();

        // Left column of the neighbour ends up in the right border.
        approx::assert_relative_eq!(dem.get(4, 2).unwrap(), 1020.);
        approx::assert_relative_eq!(dem.get(-1, 2).unwrap(), 20.);

        let small = DemData::new(3, &tile(2, 0.), DemEncoding::Mapbox).unwrap();
        assert!(dem.backfill_border(&small, 1, 0).is_err());
    }

    #[test]
    fn non_square_tiles_are_rejected() {
        assert!(DemData::new(1, &RgbaImage::new(6, 5), DemEncoding::Mapbox).is_err());
    }

    #[test]
    fn decoding_png() {
        let mut png = Vec::new();
        let image = RgbaImage::from_pixel(4, 4, Rgba([128, 0, 0, 255]));
        image
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let dem = DemData::decode(7, &png, DemEncoding::Terrarium).unwrap();
        assert_eq!(dem.dim, 4);
        approx::assert_relative_eq!(dem.get(-1, -1).unwrap(), 0.);
        approx::assert_relative_eq!(dem.max, 0.);
    }
}
