//! Packing glyphs and images needed by a tile into atlases.

mod glyph;
mod images;
mod potpack;

pub use glyph::{GlyphAtlas, GlyphMap, GlyphMetrics, GlyphPosition, GlyphPositions, StyleGlyph};
pub use images::{ImageAtlas, ImageMap, ImagePosition, ImagePositions, StyleImage};
pub use potpack::{Bin, potpack};
