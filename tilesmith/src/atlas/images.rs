use super::potpack::{Bin, potpack};
use image::{RgbaImage, imageops};
use std::collections::BTreeMap;

const PADDING: u32 = 1;

/// Icon or pattern registered with the map.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleImage {
    pub data: RgbaImage,
    pub pixel_ratio: f32,
    pub sdf: bool,
    pub version: u32,
}

impl StyleImage {
    pub fn new(data: RgbaImage) -> Self {
        Self {
            data,
            pixel_ratio: 1.,
            sdf: false,
            version: 0,
        }
    }
}

pub type ImageMap = BTreeMap<String, StyleImage>;

/// Where an image ended up in the atlas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImagePosition {
    pub padded_rect: Bin,
    pub pixel_ratio: f32,
    pub version: u32,
}

impl ImagePosition {
    fn new(padded_rect: Bin, image: &StyleImage) -> Self {
        Self {
            padded_rect,
            pixel_ratio: image.pixel_ratio,
            version: image.version,
        }
    }

    /// Top left corner of the image itself, without padding.
    pub fn tl(&self) -> [u32; 2] {
        [self.padded_rect.x + PADDING, self.padded_rect.y + PADDING]
    }

    pub fn br(&self) -> [u32; 2] {
        [
            self.padded_rect.x + self.padded_rect.w - PADDING,
            self.padded_rect.y + self.padded_rect.h - PADDING,
        ]
    }

    /// Size in CSS pixels.
    pub fn display_size(&self) -> [f32; 2] {
        [
            (self.padded_rect.w - 2 * PADDING) as f32 / self.pixel_ratio,
            (self.padded_rect.h - 2 * PADDING) as f32 / self.pixel_ratio,
        ]
    }
}

pub type ImagePositions = BTreeMap<String, ImagePosition>;

/// Icons and patterns of a tile in one image. Patterns get their edges wrapped into
/// the padding, so that they tile without seams.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAtlas {
    pub image: RgbaImage,
    pub icon_positions: ImagePositions,
    pub pattern_positions: ImagePositions,
}

impl ImageAtlas {
    pub fn new(icons: &ImageMap, patterns: &ImageMap) -> Self {
        let mut bins: Vec<Bin> = icons
            .values()
            .chain(patterns.values())
            .map(|image| {
                Bin::new(
                    image.data.width() + 2 * PADDING,
                    image.data.height() + 2 * PADDING,
                )
            })
            .collect();

        let (w, h) = potpack(&mut bins);
        let mut atlas = RgbaImage::new(w.max(1), h.max(1));

        let (icon_bins, pattern_bins) = bins.split_at(icons.len());

        let mut icon_positions = ImagePositions::new();
        for ((id, icon), bin) in icons.iter().zip(icon_bins) {
            copy(&mut atlas, &icon.data, bin.x + PADDING, bin.y + PADDING);
            icon_positions.insert(id.clone(), ImagePosition::new(*bin, icon));
        }

        let mut pattern_positions = ImagePositions::new();
        for ((id, pattern), bin) in patterns.iter().zip(pattern_bins) {
            let data = &pattern.data;
            let (x, y) = (bin.x + PADDING, bin.y + PADDING);
            let (w, h) = data.dimensions();

            copy(&mut atlas, data, x, y);
            if w > 0 && h > 0 {
                copy(&mut atlas, &imageops::crop_imm(data, 0, h - 1, w, 1).to_image(), x, y - 1);
                copy(&mut atlas, &imageops::crop_imm(data, 0, 0, w, 1).to_image(), x, y + h);
                copy(&mut atlas, &imageops::crop_imm(data, w - 1, 0, 1, h).to_image(), x - 1, y);
                copy(&mut atlas, &imageops::crop_imm(data, 0, 0, 1, h).to_image(), x + w, y);
            }

            pattern_positions.insert(id.clone(), ImagePosition::new(*bin, pattern));
        }

        Self {
            image: atlas,
            icon_positions,
            pattern_positions,
        }
    }
}

fn copy(atlas: &mut RgbaImage, image: &RgbaImage, x: u32, y: u32) {
    imageops::replace(atlas, image, i64::from(x), i64::from(y));
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn striped(width: u32, height: u32) -> StyleImage {
        StyleImage::new(RgbaImage::from_fn(width, height, |x, y| {
            Rgba([u8::try_from(x).unwrap(), u8::try_from(y).unwrap(), 0, 255])
        }))
    }

    #[test]
    fn icons_and_patterns_are_packed_together() {
        let icons = ImageMap::from([("bus".to_owned(), striped(4, 4))]);
        let patterns = ImageMap::from([("dots".to_owned(), striped(3, 2))]);

        let atlas = ImageAtlas::new(&icons, &patterns);

        let bus = atlas.icon_positions["bus"];
        assert_eq!((bus.padded_rect.w, bus.padded_rect.h), (6, 6));
        assert_eq!(bus.display_size(), [4., 4.]);
        let [x, y] = bus.tl();
        assert_eq!(atlas.image.get_pixel(x + 2, y + 3).0, [2, 3, 0, 255]);
        // Icons are not wrapped.
        assert_eq!(atlas.image.get_pixel(x - 1, y).0, [0, 0, 0, 0]);

        let dots = atlas.pattern_positions["dots"];
        let [x, y] = dots.tl();
        assert_eq!(dots.br(), [x + 3, y + 2]);
        // Left padding repeats the rightmost column, top padding the bottom row.
        assert_eq!(atlas.image.get_pixel(x - 1, y).0, [2, 0, 0, 255]);
        assert_eq!(atlas.image.get_pixel(x, y - 1).0, [0, 1, 0, 255]);
        assert_eq!(atlas.image.get_pixel(x + 3, y + 1).0, [0, 1, 0, 255]);
    }
}
