use super::{BucketFeature, BucketParameters, Dependencies, classify_rings};
use crate::{
    atlas::{Bin, GlyphMap, GlyphPositions, ImageMap, ImagePositions},
    collision::{CollisionBox, CollisionBoxArray},
    expression::{Context, Properties, to_string},
    feature_index::FeatureIndex,
    style::EvaluatedLayer,
    vector_tile::{EXTENT, GeomType, Geometry, TilePoint},
};
use geo::Centroid as _;
use geo_types::{LineString, Polygon};
use serde_json::Value;

/// Size glyphs are rendered at in the glyph atlas.
const ONE_EM: f32 = 24.;

/// Distance from the top of the line box to the baseline, at `ONE_EM`.
const BASELINE_OFFSET: f32 = 17.;

const DEFAULT_FONT_STACK: &str = "Open Sans Regular,Arial Unicode MS Regular";

/// Everything symbol layout needs once the dependencies of the tile arrived.
#[derive(Debug, Clone, Copy)]
pub struct SymbolLayoutParameters<'a> {
    pub glyph_map: &'a GlyphMap,
    pub glyph_positions: &'a GlyphPositions,
    pub image_map: &'a ImageMap,
    pub image_positions: &'a ImagePositions,
    pub show_collision_boxes: bool,
}

/// Textured quad, offsets are in pixels from the anchor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymbolQuad {
    pub tl: [f32; 2],
    pub br: [f32; 2],
    /// Source rectangle in the atlas.
    pub tex: Bin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolInstance {
    pub anchor: [f32; 2],
    pub feature_index: usize,
    pub text: Option<String>,
    pub glyph_quads: Vec<SymbolQuad>,
    pub icon_quad: Option<SymbolQuad>,
    pub icon_sdf: bool,
    /// Indices into the collision box array of the tile.
    pub text_box: Option<usize>,
    pub icon_box: Option<usize>,
}

/// Symbol of a feature, waiting for glyphs and images.
#[derive(Debug, Clone)]
struct SymbolFeature {
    index: usize,
    source_layer_index: u32,
    text: Option<String>,
    icon: Option<String>,
    font_stack: String,
    text_size: f32,
    letter_spacing: f32,
    icon_size: f32,
    anchors: Vec<[f32; 2]>,
}

#[derive(Debug, Clone)]
pub struct SymbolBucket {
    pub(super) parameters: BucketParameters,
    pub symbol_instances: Vec<SymbolInstance>,
    /// Corners of the collision boxes, when they are shown for debugging.
    pub collision_debug: Vec<[[f32; 2]; 4]>,
    features: Vec<SymbolFeature>,
}

impl SymbolBucket {
    pub(super) fn new(parameters: BucketParameters) -> Self {
        Self {
            parameters,
            symbol_instances: Vec::new(),
            collision_debug: Vec::new(),
            features: Vec::new(),
        }
    }

    pub(super) fn populate(
        &mut self,
        features: &[BucketFeature<'_>],
        dependencies: &mut Dependencies,
        feature_index: &mut FeatureIndex,
    ) {
        let Some(layer) = self.parameters.layers.first() else {
            return;
        };

        for feature in self.parameters.accepted(features) {
            let context = feature.context(layer);

            let text = layer
                .layout("text-field", &context)
                .map(|value| text_field(layer, &value, &feature.feature.properties, &context))
                .filter(|text| !text.is_empty());
            let icon = layer
                .layout("icon-image", &context)
                .map(|value| resolve_tokens(&to_string(&value), &feature.feature.properties))
                .filter(|icon| !icon.is_empty());
            if text.is_none() && icon.is_none() {
                continue;
            }

            let font_stack = font_stack(layer.layout("text-font", &context));
            if let Some(text) = &text {
                dependencies
                    .glyphs
                    .entry(font_stack.clone())
                    .or_default()
                    .extend(text.chars().map(u32::from));
            }
            if let Some(icon) = &icon {
                dependencies.icons.insert(icon.clone());
            }

            let placement = layer
                .layout("symbol-placement", &context)
                .and_then(|value| value.as_str().map(str::to_owned));
            let anchors: Vec<[f32; 2]> = anchors(
                feature.feature.kind,
                &feature.feature.geometry,
                placement.as_deref().unwrap_or("point"),
            )
            .into_iter()
            .filter(|&anchor| in_tile(anchor))
            .collect();
            if anchors.is_empty() {
                continue;
            }

            self.features.push(SymbolFeature {
                index: feature.index,
                source_layer_index: feature.source_layer_index,
                text,
                icon,
                font_stack,
                text_size: layer.layout_f64("text-size", &context, 16.) as f32,
                letter_spacing: layer.layout_f64("text-letter-spacing", &context, 0.) as f32,
                icon_size: layer.layout_f64("icon-size", &context, 1.) as f32,
                anchors,
            });

            feature_index.insert(
                feature.index,
                &feature.feature.geometry,
                feature.source_layer_index,
                self.parameters.index,
            );
        }
    }

    /// Shape text and icons of every feature, collecting their collision boxes.
    pub fn perform_symbol_layout(
        &mut self,
        parameters: &SymbolLayoutParameters<'_>,
        collision_boxes: &mut CollisionBoxArray,
    ) {
        for feature in std::mem::take(&mut self.features) {
            let glyph_quads = feature
                .text
                .as_deref()
                .map(|text| shape_text(text, &feature, parameters))
                .unwrap_or_default();
            let icon = feature.icon.as_deref().and_then(|name| {
                let position = parameters.image_positions.get(name)?;
                let [w, h] = position.display_size().map(|size| size * feature.icon_size);
                let quad = SymbolQuad {
                    tl: [-w / 2., -h / 2.],
                    br: [w / 2., h / 2.],
                    tex: position.padded_rect,
                };
                let sdf = parameters.image_map.get(name).is_some_and(|image| image.sdf);
                Some((quad, sdf))
            });

            if glyph_quads.is_empty() && icon.is_none() {
                log::trace!("Nothing to draw for feature {}.", feature.index);
                continue;
            }

            for &anchor in &feature.anchors {
                let text_box = bounds(&glyph_quads).map(|bounds| {
                    self.add_collision_box(&feature, anchor, bounds, parameters, collision_boxes)
                });
                let icon_box = icon.map(|(quad, _)| {
                    let bounds = [quad.tl, quad.br];
                    self.add_collision_box(&feature, anchor, bounds, parameters, collision_boxes)
                });

                self.symbol_instances.push(SymbolInstance {
                    anchor,
                    feature_index: feature.index,
                    text: feature.text.clone(),
                    glyph_quads: glyph_quads.clone(),
                    icon_quad: icon.map(|(quad, _)| quad),
                    icon_sdf: icon.is_some_and(|(_, sdf)| sdf),
                    text_box,
                    icon_box,
                });
            }
        }
    }

    fn add_collision_box(
        &mut self,
        feature: &SymbolFeature,
        anchor: [f32; 2],
        [[x1, y1], [x2, y2]]: [[f32; 2]; 2],
        parameters: &SymbolLayoutParameters<'_>,
        collision_boxes: &mut CollisionBoxArray,
    ) -> usize {
        let collision_box = CollisionBox {
            anchor,
            x1,
            y1,
            x2,
            y2,
            feature_index: feature.index,
            source_layer_index: feature.source_layer_index,
            bucket_index: self.parameters.index,
        };
        if parameters.show_collision_boxes {
            self.collision_debug.push(collision_box.corners());
        }
        collision_boxes.push(collision_box)
    }

    pub fn is_empty(&self) -> bool {
        self.symbol_instances.is_empty()
    }
}

fn text_field(
    layer: &EvaluatedLayer,
    value: &Value,
    properties: &Properties,
    context: &Context<'_>,
) -> String {
    let text = match value {
        Value::String(text) => resolve_tokens(text, properties),
        other => to_string(other),
    };
    match layer
        .layout("text-transform", context)
        .as_ref()
        .and_then(Value::as_str)
    {
        Some("uppercase") => text.to_uppercase(),
        Some("lowercase") => text.to_lowercase(),
        _ => text,
    }
}

fn font_stack(value: Option<Value>) -> String {
    match value {
        Some(Value::Array(fonts)) if !fonts.is_empty() => fonts
            .iter()
            .map(to_string)
            .collect::<Vec<_>>()
            .join(","),
        Some(Value::String(font)) => font,
        _ => DEFAULT_FONT_STACK.to_owned(),
    }
}

/// Replace `{name}` with the value of the `name` property, or nothing.
pub(crate) fn resolve_tokens(text: &str, properties: &Properties) -> String {
    let mut resolved = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('{') {
        resolved.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find(['{', '}']) {
            Some(end) if after[end..].starts_with('}') && end > 0 => {
                if let Some(value) = properties.get(&after[..end]) {
                    resolved.push_str(&to_string(value));
                }
                rest = &after[end + 1..];
            }
            _ => {
                resolved.push('{');
                rest = after;
            }
        }
    }

    resolved.push_str(rest);
    resolved
}

fn anchors(kind: GeomType, geometry: &Geometry, placement: &str) -> Vec<[f32; 2]> {
    let along_lines = placement != "point";
    match kind {
        GeomType::Point => geometry.iter().flatten().map(|&point| to_f32(point)).collect(),
        GeomType::LineString | GeomType::Polygon if along_lines => geometry
            .iter()
            .map(Vec::as_slice)
            .filter_map(line_midpoint)
            .collect(),
        GeomType::LineString => geometry.iter().flatten().map(|&point| to_f32(point)).collect(),
        GeomType::Polygon => classify_rings(geometry)
            .into_iter()
            .filter_map(|rings| {
                let (exterior, interiors) = rings.split_first()?;
                let polygon = Polygon::new(
                    to_line_string(exterior),
                    interiors.iter().copied().map(to_line_string).collect(),
                );
                let centroid = polygon.centroid()?;
                Some([centroid.x() as f32, centroid.y() as f32])
            })
            .collect(),
        GeomType::Unknown => Vec::new(),
    }
}

fn line_midpoint(line: &[TilePoint]) -> Option<[f32; 2]> {
    let segments: Vec<([f32; 2], [f32; 2], f32)> = line
        .windows(2)
        .map(|pair| {
            let (a, b) = (to_f32(pair[0]), to_f32(pair[1]));
            (a, b, (b[0] - a[0]).hypot(b[1] - a[1]))
        })
        .collect();
    let total: f32 = segments.iter().map(|(_, _, length)| length).sum();
    if total == 0. {
        return line.first().map(|&point| to_f32(point));
    }

    let mut remaining = total / 2.;
    for (a, b, length) in segments {
        if remaining <= length {
            let t = if length > 0. { remaining / length } else { 0. };
            return Some([a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t]);
        }
        remaining -= length;
    }
    line.last().map(|&point| to_f32(point))
}

fn in_tile([x, y]: [f32; 2]) -> bool {
    let extent = EXTENT as f32;
    (0. ..extent).contains(&x) && (0. ..extent).contains(&y)
}

fn to_f32([x, y]: TilePoint) -> [f32; 2] {
    [x as f32, y as f32]
}

fn to_line_string(ring: &[TilePoint]) -> LineString<f64> {
    ring.iter()
        .map(|&[x, y]| (f64::from(x), f64::from(y)))
        .collect::<Vec<_>>()
        .into()
}

/// Lay glyphs out on a single line, centered on the anchor.
fn shape_text(
    text: &str,
    feature: &SymbolFeature,
    parameters: &SymbolLayoutParameters<'_>,
) -> Vec<SymbolQuad> {
    let glyphs = parameters.glyph_map.get(&feature.font_stack);
    let positions = parameters.glyph_positions.get(&feature.font_stack);
    let scale = feature.text_size / ONE_EM;
    let spacing = feature.letter_spacing * ONE_EM;

    let mut quads = Vec::new();
    let mut x = 0.;
    for code_point in text.chars().map(u32::from) {
        let Some(Some(glyph)) = glyphs.and_then(|glyphs| glyphs.get(&code_point)) else {
            log::trace!("Glyph {code_point} missing from '{}'.", feature.font_stack);
            continue;
        };
        let metrics = glyph.metrics;

        if let Some(position) = positions.and_then(|positions| positions.get(&code_point)) {
            let left = x + metrics.left as f32;
            let top = -BASELINE_OFFSET - metrics.top as f32;
            quads.push(SymbolQuad {
                tl: [left, top],
                br: [left + metrics.width as f32, top + metrics.height as f32],
                tex: position.rect,
            });
        }
        x += metrics.advance as f32 + spacing;
    }

    let width = (x - spacing).max(0.);
    for quad in &mut quads {
        for corner in [&mut quad.tl, &mut quad.br] {
            *corner = [
                (corner[0] - width / 2.) * scale,
                (corner[1] + ONE_EM / 2.) * scale,
            ];
        }
    }
    quads
}

fn bounds(quads: &[SymbolQuad]) -> Option<[[f32; 2]; 2]> {
    quads.iter().fold(None, |bounds, quad| {
        let [[x1, y1], [x2, y2]] = bounds.unwrap_or([quad.tl, quad.br]);
        Some([
            [x1.min(quad.tl[0]), y1.min(quad.tl[1])],
            [x2.max(quad.br[0]), y2.max(quad.br[1])],
        ])
    })
}
