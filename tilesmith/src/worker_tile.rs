//! Parsing a single tile into buckets. Building the buckets is synchronous, then the
//! tile waits for the glyphs and images its symbols and patterns need, and finally
//! lays them out.

use crate::{
    actor::{ImageKind, MapActor},
    atlas::{GlyphAtlas, GlyphMap, GlyphPositions, ImageAtlas, ImageMap},
    bucket::{Bucket, BucketFeature, BucketParameters, Dependencies, SymbolLayoutParameters},
    collision::CollisionBoxArray,
    error::Error,
    feature_index::{DictionaryCoder, FeatureIndex, PromoteId},
    style::{EvaluationParameters, StyleLayerIndex},
    tile_id::{OverscaledTileId, TileUid},
    vector_tile::VectorTile,
    warn_once,
};
use futures::{
    FutureExt as _,
    channel::oneshot,
    future::{self, BoxFuture},
};
use image::GrayImage;
use serde::Deserialize;
use std::sync::Arc;

/// Request made by the main thread for a single tile.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileParameters {
    pub uid: TileUid,
    pub tile_id: OverscaledTileId,
    /// Name of the source the tile belongs to.
    pub source: String,
    #[serde(default = "default_pixel_ratio")]
    pub pixel_ratio: f32,
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
    #[serde(default)]
    pub show_collision_boxes: bool,
    /// Send the resolved glyphs and images back along with the result.
    #[serde(default)]
    pub return_dependencies: bool,
    #[serde(default)]
    pub promote_id: Option<PromoteId>,
    /// Where to fetch the tile from. Not needed by sources which hold the data.
    #[serde(default)]
    pub request: Option<TileRequest>,
}

fn default_pixel_ratio() -> f32 {
    1.
}

fn default_tile_size() -> u32 {
    512
}

impl TileParameters {
    pub fn new(uid: TileUid, tile_id: OverscaledTileId, source: impl Into<String>) -> Self {
        Self {
            uid,
            tile_id,
            source: source.into(),
            pixel_ratio: default_pixel_ratio(),
            tile_size: default_tile_size(),
            show_collision_boxes: false,
            return_dependencies: false,
            promote_id: None,
            request: None,
        }
    }

    pub fn with_request(self, url: impl Into<String>) -> Self {
        Self {
            request: Some(TileRequest { url: url.into() }),
            ..self
        }
    }

    pub fn zoom(&self) -> f64 {
        f64::from(self.tile_id.overscaled_z)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TileRequest {
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileStatus {
    Parsing,
    Done,
}

/// Everything the renderer needs to draw a tile.
#[derive(Debug, Clone)]
pub struct ParseResult {
    /// Only the buckets which have something to draw.
    pub buckets: Vec<Bucket>,
    pub feature_index: FeatureIndex,
    pub collision_box_array: CollisionBoxArray,
    pub glyph_atlas_image: GrayImage,
    pub image_atlas: ImageAtlas,
    pub glyph_map: Option<GlyphMap>,
    pub icon_map: Option<ImageMap>,
    pub glyph_positions: Option<GlyphPositions>,
}

/// Tile kept by a source between loads and reloads.
#[derive(Debug)]
pub struct WorkerTile {
    pub parameters: TileParameters,
    status: TileStatus,
    vector_tile: Option<Arc<VectorTile>>,
    /// Latest reload which arrived during a parse.
    pending_reload: Option<oneshot::Sender<()>>,
}

impl WorkerTile {
    pub fn new(parameters: TileParameters) -> Self {
        Self {
            parameters,
            status: TileStatus::Parsing,
            vector_tile: None,
            pending_reload: None,
        }
    }

    pub fn status(&self) -> TileStatus {
        self.status
    }

    pub fn vector_tile(&self) -> Option<&Arc<VectorTile>> {
        self.vector_tile.as_ref()
    }

    /// Mark the tile as done, also waking the reload waiting for the running parse.
    pub fn finish(&mut self) {
        self.status = TileStatus::Done;
        if let Some(reload) = self.pending_reload.take() {
            let _ = reload.send(());
        }
    }

    /// Resolves once the running parse is done. `None` when nothing is running.
    ///
    /// Only the latest reload waits, the receiver of an earlier one is cancelled.
    pub fn wait_for_parse(&mut self) -> Option<oneshot::Receiver<()>> {
        if self.status != TileStatus::Parsing {
            return None;
        }
        let (sender, receiver) = oneshot::channel();
        self.pending_reload = Some(sender);
        Some(receiver)
    }

    /// Build the buckets right away and return a future which waits for glyphs and
    /// images, then finishes the layout. The future does not borrow the tile, the caller
    /// calls [`WorkerTile::finish`] once it resolves.
    pub fn parse(
        &mut self,
        data: Arc<VectorTile>,
        layer_index: &StyleLayerIndex,
        available_images: Arc<[String]>,
        actor: &MapActor,
    ) -> BoxFuture<'static, Result<ParseResult, Error>> {
        self.status = TileStatus::Parsing;
        self.vector_tile = Some(Arc::clone(&data));

        let parameters = self.parameters.clone();
        let evaluation = EvaluationParameters::new(parameters.zoom(), available_images);
        let (buckets, feature_index, dependencies) =
            build_buckets(&parameters, data, layer_index, &evaluation);

        let Dependencies {
            glyphs,
            icons,
            patterns,
        } = dependencies;
        let source = parameters.source.clone();
        let tile_id = parameters.tile_id;

        let glyphs = if glyphs.is_empty() {
            future::ready(Ok(GlyphMap::new())).boxed()
        } else {
            actor.get_glyphs(parameters.uid, glyphs, source.clone(), tile_id)
        };
        let icons = if icons.is_empty() {
            future::ready(Ok(ImageMap::new())).boxed()
        } else {
            actor.get_images(icons, source.clone(), tile_id, ImageKind::Icons)
        };
        let patterns = if patterns.is_empty() {
            future::ready(Ok(ImageMap::new())).boxed()
        } else {
            actor.get_images(patterns, source, tile_id, ImageKind::Patterns)
        };

        async move {
            let (glyph_map, icon_map, pattern_map) =
                future::try_join3(glyphs, icons, patterns).await?;
            Ok(finish_layout(
                &parameters,
                &evaluation,
                buckets,
                feature_index,
                glyph_map,
                icon_map,
                pattern_map,
            ))
        }
        .boxed()
    }
}

fn build_buckets(
    parameters: &TileParameters,
    data: Arc<VectorTile>,
    layer_index: &StyleLayerIndex,
    evaluation: &EvaluationParameters,
) -> (Vec<Bucket>, FeatureIndex, Dependencies) {
    let source = parameters.source.as_str();
    let zoom = parameters.zoom();
    let source_layer_coder = DictionaryCoder::new(data.layers.keys().cloned());
    let mut feature_index = FeatureIndex::new(parameters.tile_id, parameters.promote_id.clone());
    let mut dependencies = Dependencies::default();
    let mut buckets = Vec::new();

    for (source_layer_id, families) in layer_index.families(source).into_iter().flatten() {
        let Some(layer) = data.layer(source_layer_id) else {
            continue;
        };
        if layer.version == 1 {
            warn_once(&format!(
                "Vector tile source \"{source}\" layer \"{source_layer_id}\" does not use \
                 vector tile spec v2 and therefore may have some rendering errors."
            ));
        }

        let source_layer_index = source_layer_coder.encode(source_layer_id).unwrap_or_default();
        let features: Vec<BucketFeature<'_>> = layer
            .features
            .iter()
            .enumerate()
            .map(|(index, feature)| BucketFeature {
                feature,
                id: feature_index.get_id(feature, source_layer_id),
                index,
                source_layer_index,
            })
            .collect();

        for family in families {
            let Some(first) = family.first() else {
                continue;
            };
            if first.source() != Some(source) {
                warn_once(&format!(
                    "layer.source = {} does not equal the source of the tile {source}",
                    first.source().unwrap_or_default()
                ));
            }
            if first.minzoom().is_some_and(|minzoom| zoom < minzoom.floor())
                || first.maxzoom().is_some_and(|maxzoom| zoom >= maxzoom)
                || first.is_hidden()
            {
                continue;
            }

            let Some(mut bucket) = Bucket::new(BucketParameters {
                index: feature_index.bucket_layer_ids.len(),
                family: Arc::clone(family),
                layers: family
                    .iter()
                    .map(|layer| layer.recalculate(evaluation))
                    .collect(),
                zoom,
                pixel_ratio: parameters.pixel_ratio,
                overscaling: parameters.tile_id.overscale_factor(),
                source_layer_index,
                source_id: source.to_owned(),
            }) else {
                continue;
            };

            bucket.populate(&features, &mut dependencies, &mut feature_index);
            feature_index.bucket_layer_ids.push(bucket.layer_ids());
            buckets.push(bucket);
        }
    }

    feature_index.set_data(data, source_layer_coder);
    (buckets, feature_index, dependencies)
}

fn finish_layout(
    parameters: &TileParameters,
    evaluation: &EvaluationParameters,
    mut buckets: Vec<Bucket>,
    feature_index: FeatureIndex,
    glyph_map: GlyphMap,
    icon_map: ImageMap,
    pattern_map: ImageMap,
) -> ParseResult {
    let glyph_atlas = GlyphAtlas::new(&glyph_map);
    let image_atlas = ImageAtlas::new(&icon_map, &pattern_map);
    let mut collision_box_array = CollisionBoxArray::new();

    let layout = SymbolLayoutParameters {
        glyph_map: &glyph_map,
        glyph_positions: &glyph_atlas.positions,
        image_map: &icon_map,
        image_positions: &image_atlas.icon_positions,
        show_collision_boxes: parameters.show_collision_boxes,
    };

    for bucket in &mut buckets {
        let is_symbol = matches!(bucket, Bucket::Symbol(_));
        if !is_symbol && !bucket.has_pattern() {
            continue;
        }

        bucket.recalculate(evaluation);
        if let Bucket::Symbol(symbol) = bucket {
            symbol.perform_symbol_layout(&layout, &mut collision_box_array);
        } else {
            bucket.add_features(&image_atlas.pattern_positions);
        }
    }

    buckets.retain(|bucket| !bucket.is_empty());
    log::trace!(
        "Parsed tile {} of '{}' into {} buckets.",
        parameters.uid,
        parameters.source,
        buckets.len()
    );

    let (glyph_map, icon_map, glyph_positions) = if parameters.return_dependencies {
        (
            Some(glyph_map),
            Some(icon_map),
            Some(glyph_atlas.positions.clone()),
        )
    } else {
        (None, None, None)
    };

    ParseResult {
        buckets,
        feature_index,
        collision_box_array,
        glyph_atlas_image: glyph_atlas.image,
        image_atlas,
        glyph_map,
        icon_map,
        glyph_positions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        actor::{Actor, DependencyRequest, DependencyResponse},
        atlas::{GlyphMetrics, StyleGlyph, StyleImage},
        expression::Properties,
        style::LayerSpec,
        tile_id::CanonicalTileId,
        vector_tile::{GeomType, VectorTileFeature, VectorTileLayer},
    };
    use image::RgbaImage;
    use serde_json::{Value, json};
    use std::{
        collections::BTreeMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    /// Answers every request right away and counts them.
    #[derive(Default)]
    struct FakeActor {
        requests: AtomicUsize,
        fail_images: bool,
    }

    impl Actor for FakeActor {
        fn send(
            &self,
            request: DependencyRequest,
            _target_map_id: Option<&str>,
        ) -> BoxFuture<'static, Result<DependencyResponse, Error>> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            let response = match request {
                DependencyRequest::GetGlyphs { stacks, .. } => {
                    Ok(DependencyResponse::Glyphs(glyphs(&stacks)))
                }
                DependencyRequest::GetImages { .. } if self.fail_images => {
                    Err(Error::Dependency("no sprite".to_owned()))
                }
                DependencyRequest::GetImages { icons, .. } => Ok(DependencyResponse::Images(
                    icons
                        .into_iter()
                        .map(|name| (name, StyleImage::new(RgbaImage::new(8, 8))))
                        .collect(),
                )),
            };
            future::ready(response).boxed()
        }
    }

    fn glyphs(stacks: &BTreeMap<String, std::collections::BTreeSet<u32>>) -> GlyphMap {
        stacks
            .iter()
            .map(|(stack, code_points)| {
                let glyphs = code_points
                    .iter()
                    .map(|&id| {
                        let glyph = StyleGlyph {
                            id,
                            bitmap: GrayImage::new(8, 10),
                            metrics: GlyphMetrics {
                                width: 8,
                                height: 10,
                                left: 0,
                                top: -3,
                                advance: 9,
                            },
                        };
                        (id, Some(glyph))
                    })
                    .collect();
                (stack.clone(), glyphs)
            })
            .collect()
    }

    fn properties(value: Value) -> Properties {
        value.as_object().cloned().unwrap()
    }

    fn road_tile() -> Arc<VectorTile> {
        let line = |class: &str, y| VectorTileFeature {
            id: None,
            kind: GeomType::LineString,
            properties: properties(json!({"class": class, "name": "Main St"})),
            geometry: vec![vec![[0, y], [2000, y]]],
        };
        Arc::new(VectorTile::from_layer(VectorTileLayer::new(
            "road",
            vec![line("main", 100), line("side", 200), line("side", 300)],
        )))
    }

    fn index(layers: Value) -> StyleLayerIndex {
        let layers: Vec<LayerSpec> = serde_json::from_value(layers).unwrap();
        StyleLayerIndex::new(layers).unwrap()
    }

    fn parameters() -> TileParameters {
        TileParameters::new(
            TileUid(1),
            OverscaledTileId::canonical(CanonicalTileId::new(14, 0, 0)),
            "streets",
        )
    }

    fn parse(
        tile: &mut WorkerTile,
        layers: &StyleLayerIndex,
        actor: &Arc<FakeActor>,
    ) -> Result<ParseResult, Error> {
        let map_actor = MapActor::new(Arc::clone(actor) as Arc<dyn Actor>, "map");
        let parsing = tile.parse(road_tile(), layers, Arc::from([]), &map_actor);
        let result = futures::executor::block_on(parsing);
        tile.finish();
        result
    }

    #[test]
    fn filters_select_features() {
        let layers = index(json!([
            {"id": "main", "type": "line", "source": "streets", "source-layer": "road",
             "filter": ["==", "class", "main"]},
            {"id": "other", "type": "line", "source": "streets", "source-layer": "road",
             "filter": ["!=", "class", "main"]}
        ]));
        let actor = Arc::new(FakeActor::default());
        let mut tile = WorkerTile::new(parameters());

        let result = parse(&mut tile, &layers, &actor).unwrap();

        assert_eq!(result.buckets.len(), 2);
        assert_eq!(result.feature_index.bucket_layer_ids, vec![vec!["main"], vec!["other"]]);
        let found = result.feature_index.query([0., 0.], [4096., 4096.]);
        let main = found.iter().filter(|f| f.layer_ids == ["main"]).count();
        let other = found.iter().filter(|f| f.layer_ids == ["other"]).count();
        assert_eq!((main, other), (1, 2));
        assert_eq!(tile.status(), TileStatus::Done);
    }

    #[test]
    fn no_dependencies_means_no_round_trip() {
        let layers = index(json!([
            {"id": "roads", "type": "line", "source": "streets", "source-layer": "road"}
        ]));
        let actor = Arc::new(FakeActor::default());
        let mut tile = WorkerTile::new(parameters());

        parse(&mut tile, &layers, &actor).unwrap();

        assert_eq!(actor.requests.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn symbols_wait_for_glyphs_and_icons() {
        let layers = index(json!([
            {"id": "labels", "type": "symbol", "source": "streets", "source-layer": "road",
             "layout": {"text-field": "{name}", "icon-image": "shield",
                        "symbol-placement": "line"}}
        ]));
        let actor = Arc::new(FakeActor::default());
        let mut tile = WorkerTile::new(TileParameters {
            return_dependencies: true,
            ..parameters()
        });

        let result = parse(&mut tile, &layers, &actor).unwrap();

        assert_eq!(actor.requests.load(Ordering::SeqCst), 2);
        assert_eq!(result.buckets.len(), 1);
        assert_eq!(result.collision_box_array.len(), 6);
        assert!(result.image_atlas.icon_positions.contains_key("shield"));
        let glyph_map = result.glyph_map.unwrap();
        assert!(glyph_map.contains_key("Open Sans Regular,Arial Unicode MS Regular"));
        assert!(result.glyph_positions.is_some());
    }

    #[test]
    fn a_failed_dependency_fails_the_tile() {
        let layers = index(json!([
            {"id": "labels", "type": "symbol", "source": "streets", "source-layer": "road",
             "layout": {"text-field": "{name}", "icon-image": "shield"}}
        ]));
        let actor = Arc::new(FakeActor {
            fail_images: true,
            ..FakeActor::default()
        });
        let mut tile = WorkerTile::new(parameters());

        let result = parse(&mut tile, &layers, &actor);
        assert!(matches!(result, Err(Error::Dependency(_))));
    }

    #[test]
    fn zoom_range_and_visibility_are_respected() {
        let layers = index(json!([
            {"id": "early", "type": "line", "source": "streets", "source-layer": "road",
             "maxzoom": 14},
            {"id": "late", "type": "line", "source": "streets", "source-layer": "road",
             "minzoom": 14.5},
            {"id": "hidden", "type": "line", "source": "streets", "source-layer": "road",
             "layout": {"visibility": "none"}}
        ]));
        let actor = Arc::new(FakeActor::default());
        let mut tile = WorkerTile::new(parameters());

        let result = parse(&mut tile, &layers, &actor).unwrap();

        // minzoom is floored, so 14.5 still draws at 14.
        assert_eq!(result.feature_index.bucket_layer_ids, vec![vec!["late"]]);
    }

    #[test]
    fn waiting_for_a_running_parse() {
        let mut tile = WorkerTile::new(parameters());
        let waiter = tile.wait_for_parse().unwrap();

        tile.finish();

        assert!(futures::executor::block_on(waiter).is_ok());
        assert!(tile.wait_for_parse().is_none());
    }

    #[test]
    fn later_reloads_replace_earlier_ones() {
        let mut tile = WorkerTile::new(parameters());
        let earlier = tile.wait_for_parse().unwrap();
        let later = tile.wait_for_parse().unwrap();

        tile.finish();

        assert!(futures::executor::block_on(earlier).is_err());
        assert!(futures::executor::block_on(later).is_ok());
    }
}
