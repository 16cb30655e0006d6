use super::{
    LoadedVectorData, SourceContext, TileResult, VectorTileLoader, VectorWorkerSource,
    WorkerSource,
};
use crate::{
    error::Error,
    expression::{Context, Filter, Properties},
    geojson::{
        Feature, FeatureCollection, GeoJson, GeoJsonSourceDiff, UpdateableGeoJson,
        apply_source_diff, rewind, to_updateable,
    },
    geojson_vt::{GeoJsonVt, GeoJsonVtOptions, TileFeature},
    io::Fetch,
    lock,
    supercluster::{Supercluster, SuperclusterOptions},
    tile_id::TileUid,
    vector_tile::{GEOJSON_TILE_LAYER, VectorTile, VectorTileFeature, VectorTileLayer},
    worker_tile::{TileParameters, TileRequest},
};
use bytes::Bytes;
use futures::{
    FutureExt as _,
    channel::oneshot,
    future::{self, BoxFuture, Either},
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Where the data of a GeoJSON source comes from. Exactly one of `request`, `data` and
/// `data_diff` is expected.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadGeoJsonParameters {
    pub source: String,
    pub request: Option<TileRequest>,
    /// Serialized GeoJSON.
    pub data: Option<String>,
    pub data_diff: Option<GeoJsonSourceDiff>,
    pub cluster: bool,
    pub supercluster_options: SuperclusterOptions,
    pub geojson_vt_options: GeoJsonVtOptions,
    pub filter: Option<Value>,
    pub promote_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeoJsonLoadResult {
    /// A newer load took over before this one was done.
    pub abandoned: bool,
}

/// Either index can cut the data into tiles.
pub enum GeoJsonIndex {
    Tiles(GeoJsonVt),
    Clusters(Supercluster),
}

impl GeoJsonIndex {
    fn get_tile(&mut self, z: u8, x: u32, y: u32) -> Option<Vec<TileFeature>> {
        match self {
            Self::Tiles(index) => index
                .get_tile(z, i64::from(x), y)
                .map(|tile| tile.features.clone()),
            Self::Clusters(index) => index.get_tile(z, x, y),
        }
    }
}

/// Cuts tiles out of the current index and wraps them as vector tiles, so that they
/// are parsed the same way as fetched ones.
#[derive(Default)]
pub struct GeoJsonTileLoader {
    index: Arc<Mutex<Option<GeoJsonIndex>>>,
}

impl VectorTileLoader for GeoJsonTileLoader {
    fn load(
        &self,
        parameters: &TileParameters,
    ) -> BoxFuture<'static, Result<Option<LoadedVectorData>, Error>> {
        let canonical = parameters.tile_id.canonical;
        let features = lock(&self.index)
            .as_mut()
            .and_then(|index| index.get_tile(canonical.z, canonical.x, canonical.y));

        let loaded = features.map(|features| {
            let features = features.into_iter().map(to_vector_tile_feature).collect();
            let vector_tile =
                VectorTile::from_layer(VectorTileLayer::new(GEOJSON_TILE_LAYER, features));
            let raw_data = Bytes::from(vector_tile.encode());
            LoadedVectorData {
                raw_data: Some(raw_data),
                ..LoadedVectorData::new(vector_tile)
            }
        });

        future::ready(Ok(loaded)).boxed()
    }
}

/// Vector tiles can only carry unsigned integer ids.
fn to_vector_tile_feature(feature: TileFeature) -> VectorTileFeature {
    let id = match &feature.id {
        Some(Value::Number(number)) => number.as_u64(),
        Some(Value::String(string)) => string.parse().ok(),
        _ => None,
    };
    VectorTileFeature {
        id,
        kind: feature.kind,
        properties: Arc::unwrap_or_clone(feature.tags),
        geometry: feature.geometry,
    }
}

/// Source holding a single GeoJSON document, tiled or clustered on the worker.
pub struct GeoJsonWorkerSource<F> {
    tiles: VectorWorkerSource<GeoJsonTileLoader>,
    loader: Arc<GeoJsonTileLoader>,
    fetch: Arc<F>,
    /// Document by feature id, when every feature has a unique one.
    updateable: Arc<Mutex<Option<UpdateableGeoJson>>>,
    /// Tells the running load that it has been superseded.
    pending: Option<oneshot::Sender<()>>,
}

impl<F: Fetch> GeoJsonWorkerSource<F> {
    pub fn new(context: SourceContext, fetch: Arc<F>) -> Self {
        let loader = Arc::new(GeoJsonTileLoader::default());
        Self {
            tiles: VectorWorkerSource::new(context, Arc::clone(&loader)),
            loader,
            fetch,
            updateable: Arc::default(),
            pending: None,
        }
    }

    /// Replace the data of the source and index it. Resolves with `abandoned` set when
    /// another load is started before this one is done.
    ///
    /// # Errors
    ///
    /// When the data can not be fetched or parsed, or the index options are invalid.
    pub fn load_data(
        &mut self,
        parameters: LoadGeoJsonParameters,
    ) -> BoxFuture<'static, Result<GeoJsonLoadResult, Error>> {
        self.abandon_pending();
        let (pending, abandoned) = oneshot::channel();
        self.pending = Some(pending);

        let fetch = Arc::clone(&self.fetch);
        let updateable = Arc::clone(&self.updateable);
        let loader = Arc::clone(&self.loader);
        let tiles = self.tiles.tiles();

        let work = async move {
            let mut geojson = load_geojson(&parameters, fetch.as_ref(), &updateable).await?;
            rewind(&mut geojson, true);

            if let Some(filter) = &parameters.filter {
                geojson = filter_features(geojson, &Filter::compile(filter)?);
            }

            let index = if parameters.cluster {
                GeoJsonIndex::Clusters(Supercluster::new(
                    geojson.into_features(),
                    parameters.supercluster_options,
                )?)
            } else {
                GeoJsonIndex::Tiles(GeoJsonVt::new(&geojson, parameters.geojson_vt_options)?)
            };

            *lock(&loader.index) = Some(index);
            lock(&tiles).loaded.clear();
            log::debug!("GeoJSON source '{}' is indexed.", parameters.source);

            Ok(GeoJsonLoadResult::default())
        };

        async move {
            match future::select(abandoned, work.boxed()).await {
                Either::Left(_) => Ok(GeoJsonLoadResult { abandoned: true }),
                Either::Right((result, _)) => result,
            }
        }
        .boxed()
    }

    fn abandon_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            // The load might be over already.
            let _ = pending.send(());
        }
    }

    fn clusters<T>(
        &self,
        query: impl FnOnce(&Supercluster) -> Result<T, Error>,
    ) -> Result<T, Error> {
        match lock(&self.loader.index).as_ref() {
            Some(GeoJsonIndex::Clusters(index)) => query(index),
            _ => Err(Error::Query("Source is not clustered.".to_owned())),
        }
    }

    /// # Errors
    ///
    /// When the source is not clustered or there is no such cluster.
    pub fn get_cluster_expansion_zoom(&self, cluster_id: u64) -> Result<u8, Error> {
        self.clusters(|index| index.get_cluster_expansion_zoom(cluster_id))
    }

    /// # Errors
    ///
    /// When the source is not clustered or there is no such cluster.
    pub fn get_cluster_children(&self, cluster_id: u64) -> Result<Vec<Feature>, Error> {
        self.clusters(|index| index.get_children(cluster_id))
    }

    /// # Errors
    ///
    /// When the source is not clustered or there is no such cluster.
    pub fn get_cluster_leaves(
        &self,
        cluster_id: u64,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<Feature>, Error> {
        self.clusters(|index| index.get_leaves(cluster_id, limit, offset))
    }

    /// # Errors
    ///
    /// When the source is not clustered.
    pub fn get_clusters(&self, bbox: [f64; 4], zoom: u8) -> Result<Vec<Feature>, Error> {
        self.clusters(|index| Ok(index.get_clusters(bbox, zoom)))
    }
}

async fn load_geojson<F: Fetch>(
    parameters: &LoadGeoJsonParameters,
    fetch: &F,
    updateable: &Mutex<Option<UpdateableGeoJson>>,
) -> Result<GeoJson, Error> {
    let source = &parameters.source;
    let promote_id = parameters.promote_id.as_deref();

    let geojson = if let Some(request) = &parameters.request {
        let response = fetch
            .fetch(&request.url)
            .await
            .map_err(|error| Error::Fetch(error.to_string()))?;
        let value: Value =
            serde_json::from_slice(&response.data).map_err(|error| Error::Parse(error.to_string()))?;
        GeoJson::from_value(value)?
    } else if let Some(data) = &parameters.data {
        GeoJson::parse(data).map_err(|error| {
            Error::Parse(format!(
                "Input data given to '{source}' is not a valid GeoJSON object: {error}"
            ))
        })?
    } else if let Some(diff) = &parameters.data_diff {
        let mut updateable = lock(updateable);
        let Some(features) = updateable.as_mut() else {
            return Err(Error::Parse(format!(
                "Cannot update existing geojson data in {source}"
            )));
        };
        apply_source_diff(features, diff, promote_id);
        return Ok(GeoJson::from(&*features));
    } else {
        return Err(Error::Parse(format!(
            "Input data given to '{source}' is not a valid GeoJSON object."
        )));
    };

    *lock(updateable) = to_updateable(&geojson, promote_id);
    Ok(geojson)
}

fn filter_features(geojson: GeoJson, filter: &Filter) -> GeoJson {
    let empty = Properties::new();
    let features = geojson
        .into_features()
        .into_iter()
        .filter(|feature| {
            let properties = feature.properties.as_ref().unwrap_or(&empty);
            filter.matches(&Context::new(0., properties).with_id(feature.id.as_ref()))
        })
        .collect();
    GeoJson::FeatureCollection(FeatureCollection { features })
}

impl<F: Fetch> WorkerSource for GeoJsonWorkerSource<F> {
    fn load_tile(
        &mut self,
        parameters: TileParameters,
    ) -> BoxFuture<'static, Result<Option<TileResult>, Error>> {
        self.tiles.load_tile(parameters)
    }

    /// Tiles which were never loaded, e.g. because the data changed since, are loaded
    /// from the current index.
    fn reload_tile(
        &mut self,
        parameters: TileParameters,
    ) -> BoxFuture<'static, Result<Option<TileResult>, Error>> {
        if self.tiles.is_loaded(parameters.uid) {
            self.tiles.reload_tile(parameters)
        } else {
            self.tiles.load_tile(parameters)
        }
    }

    fn abort_tile(&mut self, uid: TileUid) {
        self.tiles.abort_tile(uid);
    }

    fn remove_tile(&mut self, uid: TileUid) {
        self.tiles.remove_tile(uid);
    }

    fn set_available_images(&mut self, images: Arc<[String]>) {
        self.tiles.set_available_images(images);
    }

    fn remove_source(&mut self, source: &str) {
        log::debug!("Removing GeoJSON source '{source}'.");
        self.abandon_pending();
    }
}
