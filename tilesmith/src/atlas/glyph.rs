use super::potpack::{Bin, potpack};
use image::GrayImage;
use std::collections::BTreeMap;

const PADDING: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlyphMetrics {
    pub width: u32,
    pub height: u32,
    pub left: i32,
    pub top: i32,
    pub advance: u32,
}

/// Single signed distance field glyph of a font stack.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleGlyph {
    pub id: u32,
    pub bitmap: GrayImage,
    pub metrics: GlyphMetrics,
}

/// Glyphs by font stack and code point. `None` for code points the font does not have.
pub type GlyphMap = BTreeMap<String, BTreeMap<u32, Option<StyleGlyph>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlyphPosition {
    pub rect: Bin,
    pub metrics: GlyphMetrics,
}

pub type GlyphPositions = BTreeMap<String, BTreeMap<u32, GlyphPosition>>;

/// All glyphs needed by a tile, packed into a single alpha image.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphAtlas {
    pub image: GrayImage,
    pub positions: GlyphPositions,
}

impl GlyphAtlas {
    pub fn new(stacks: &GlyphMap) -> Self {
        let glyphs: Vec<(&str, &StyleGlyph)> = stacks
            .iter()
            .flat_map(|(stack, glyphs)| {
                glyphs
                    .values()
                    .flatten()
                    .filter(|glyph| glyph.bitmap.width() > 0 && glyph.bitmap.height() > 0)
                    .map(move |glyph| (stack.as_str(), glyph))
            })
            .collect();

        let mut bins: Vec<Bin> = glyphs
            .iter()
            .map(|(_, glyph)| {
                Bin::new(
                    glyph.bitmap.width() + 2 * PADDING,
                    glyph.bitmap.height() + 2 * PADDING,
                )
            })
            .collect();

        let (w, h) = potpack(&mut bins);
        let mut image = GrayImage::new(w.max(1), h.max(1));

        let mut positions = GlyphPositions::new();
        for stack in stacks.keys() {
            positions.entry(stack.clone()).or_default();
        }

        for ((stack, glyph), bin) in glyphs.into_iter().zip(bins) {
            image::imageops::replace(
                &mut image,
                &glyph.bitmap,
                i64::from(bin.x + PADDING),
                i64::from(bin.y + PADDING),
            );
            positions.entry(stack.to_owned()).or_default().insert(
                glyph.id,
                GlyphPosition {
                    rect: bin,
                    metrics: glyph.metrics,
                },
            );
        }

        Self { image, positions }
    }
}
