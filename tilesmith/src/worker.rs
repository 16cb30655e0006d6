//! Dispatcher owning every source and style of the maps a worker serves.

use crate::{
    actor::Actor,
    dem::DemData,
    error::Error,
    geojson::Feature,
    io::{Fetch, HttpFetch, Runtime},
    source::{
        FetchTileLoader, GEOJSON, GeoJsonLoadResult, GeoJsonWorkerSource, LoadDemParameters,
        LoadGeoJsonParameters, RasterDemWorkerSource, SourceContext, SourceInstance, TileResult,
        VECTOR, VectorWorkerSource, WorkerSourceFactory,
    },
    style::{LayerSpec, StyleLayerIndex},
    tile_id::TileUid,
    worker_tile::TileParameters,
    write,
};
use futures::{
    FutureExt as _, StreamExt as _,
    channel::{mpsc, oneshot},
    future::{self, BoxFuture},
};
use std::{
    collections::{BTreeMap, HashMap, btree_map::Entry},
    sync::{Arc, RwLock},
};

/// Message from the main thread. Tile operations name the kind of their source, e.g.
/// `vector` or `geojson`.
#[derive(Debug)]
pub enum Request {
    SetReferrer(String),
    SetImages(Vec<String>),
    GetAvailableImages,
    SetLayers(Vec<LayerSpec>),
    UpdateLayers {
        layers: Vec<LayerSpec>,
        removed_ids: Vec<String>,
    },
    LoadTile {
        kind: String,
        parameters: TileParameters,
    },
    ReloadTile {
        kind: String,
        parameters: TileParameters,
    },
    AbortTile {
        kind: String,
        source: String,
        uid: TileUid,
    },
    RemoveTile {
        kind: String,
        source: String,
        uid: TileUid,
    },
    LoadDemTile(LoadDemParameters),
    RemoveDemTile {
        source: String,
        uid: TileUid,
    },
    RemoveSource {
        kind: String,
        source: String,
    },
    LoadData(LoadGeoJsonParameters),
    GetClusterExpansionZoom {
        source: String,
        cluster_id: u64,
    },
    GetClusterChildren {
        source: String,
        cluster_id: u64,
    },
    GetClusterLeaves {
        source: String,
        cluster_id: u64,
        limit: Option<usize>,
        offset: Option<usize>,
    },
    EnforceCacheSizeLimit(usize),
}

#[derive(Debug, Clone)]
pub enum Response {
    Done,
    Tile(Option<TileResult>),
    Dem(Arc<DemData>),
    Data(GeoJsonLoadResult),
    ExpansionZoom(u8),
    Features(Vec<Feature>),
    AvailableImages(Arc<[String]>),
}

/// Per map registries. Maps are created lazily, on their first request.
pub struct WorkerState<F> {
    layer_indexes: HashMap<String, Arc<RwLock<StyleLayerIndex>>>,
    available_images: HashMap<String, Arc<[String]>>,
    /// Sources by map, then by kind and name.
    sources: HashMap<String, BTreeMap<(String, String), SourceInstance<F>>>,
    dem_sources: HashMap<String, HashMap<String, RasterDemWorkerSource>>,
    referrer: Option<String>,
}

impl<F> Default for WorkerState<F> {
    fn default() -> Self {
        Self {
            layer_indexes: HashMap::new(),
            available_images: HashMap::new(),
            sources: HashMap::new(),
            dem_sources: HashMap::new(),
            referrer: None,
        }
    }
}

impl<F> WorkerState<F> {
    fn layer_index(&mut self, map_id: &str) -> Arc<RwLock<StyleLayerIndex>> {
        Arc::clone(self.layer_indexes.entry(map_id.to_owned()).or_default())
    }

    fn available_images(&self, map_id: &str) -> Arc<[String]> {
        self.available_images
            .get(map_id)
            .cloned()
            .unwrap_or_else(|| Arc::from([]))
    }

    pub fn referrer(&self) -> Option<&str> {
        self.referrer.as_deref()
    }
}

pub struct Worker<F = HttpFetch> {
    actor: Arc<dyn Actor>,
    fetch: Arc<F>,
    factories: BTreeMap<String, WorkerSourceFactory>,
    state: WorkerState<F>,
}

impl<F: Fetch> Worker<F> {
    pub fn new(actor: Arc<dyn Actor>, fetch: Arc<F>) -> Self {
        Self {
            actor,
            fetch,
            factories: BTreeMap::new(),
            state: WorkerState::default(),
        }
    }

    pub fn state(&self) -> &WorkerState<F> {
        &self.state
    }

    /// Add a kind of source. Each name can be registered only once.
    ///
    /// # Errors
    ///
    /// When the name is already taken.
    pub fn register_worker_source(
        &mut self,
        name: &str,
        factory: WorkerSourceFactory,
    ) -> Result<(), Error> {
        if name == VECTOR || name == GEOJSON || self.factories.contains_key(name) {
            return Err(Error::Configuration(format!(
                "Worker source with name \"{name}\" already registered."
            )));
        }
        self.factories.insert(name.to_owned(), factory);
        Ok(())
    }

    /// Route a request of the map `map_id` to where it belongs.
    pub fn handle(
        &mut self,
        map_id: &str,
        request: Request,
    ) -> BoxFuture<'static, Result<Response, Error>> {
        let response = match request {
            Request::SetReferrer(referrer) => {
                self.set_referrer(&referrer);
                Ok(Response::Done)
            }
            Request::SetImages(images) => {
                self.set_images(map_id, images);
                Ok(Response::Done)
            }
            Request::GetAvailableImages => Ok(Response::AvailableImages(
                self.get_available_images(map_id),
            )),
            Request::SetLayers(layers) => self.set_layers(map_id, layers).map(|()| Response::Done),
            Request::UpdateLayers {
                layers,
                removed_ids,
            } => self
                .update_layers(map_id, layers, &removed_ids)
                .map(|()| Response::Done),
            Request::LoadTile { kind, parameters } => {
                return self
                    .load_tile(map_id, &kind, parameters)
                    .map(|tile| tile.map(Response::Tile))
                    .boxed();
            }
            Request::ReloadTile { kind, parameters } => {
                return self
                    .reload_tile(map_id, &kind, parameters)
                    .map(|tile| tile.map(Response::Tile))
                    .boxed();
            }
            Request::AbortTile { kind, source, uid } => self
                .abort_tile(map_id, &kind, &source, uid)
                .map(|()| Response::Done),
            Request::RemoveTile { kind, source, uid } => self
                .remove_tile(map_id, &kind, &source, uid)
                .map(|()| Response::Done),
            Request::LoadDemTile(parameters) => {
                self.load_dem_tile(map_id, &parameters).map(Response::Dem)
            }
            Request::RemoveDemTile { source, uid } => {
                self.remove_dem_tile(map_id, &source, uid);
                Ok(Response::Done)
            }
            Request::RemoveSource { kind, source } => {
                self.remove_source(map_id, &kind, &source);
                Ok(Response::Done)
            }
            Request::LoadData(parameters) => {
                return self
                    .load_data(map_id, parameters)
                    .map(|result| result.map(Response::Data))
                    .boxed();
            }
            Request::GetClusterExpansionZoom { source, cluster_id } => self
                .get_cluster_expansion_zoom(map_id, &source, cluster_id)
                .map(Response::ExpansionZoom),
            Request::GetClusterChildren { source, cluster_id } => self
                .get_cluster_children(map_id, &source, cluster_id)
                .map(Response::Features),
            Request::GetClusterLeaves {
                source,
                cluster_id,
                limit,
                offset,
            } => self
                .get_cluster_leaves(map_id, &source, cluster_id, limit, offset)
                .map(Response::Features),
            Request::EnforceCacheSizeLimit(limit) => {
                self.enforce_cache_size_limit(limit);
                Ok(Response::Done)
            }
        };
        future::ready(response).boxed()
    }

    pub fn set_referrer(&mut self, referrer: &str) {
        self.fetch.set_referrer(referrer);
        self.state.referrer = Some(referrer.to_owned());
    }

    /// Remember the images of the map's style and tell every source about them.
    pub fn set_images(&mut self, map_id: &str, images: Vec<String>) {
        let images: Arc<[String]> = Arc::from(images);
        self.state
            .available_images
            .insert(map_id.to_owned(), Arc::clone(&images));

        for source in self
            .state
            .sources
            .get_mut(map_id)
            .into_iter()
            .flat_map(BTreeMap::values_mut)
        {
            source
                .as_worker_source()
                .set_available_images(Arc::clone(&images));
        }
    }

    pub fn get_available_images(&self, map_id: &str) -> Arc<[String]> {
        self.state.available_images(map_id)
    }

    /// # Errors
    ///
    /// When one of the layers is invalid. The previous layers stay in place.
    pub fn set_layers(&mut self, map_id: &str, layers: Vec<LayerSpec>) -> Result<(), Error> {
        write(&self.state.layer_index(map_id)).replace(layers)
    }

    /// # Errors
    ///
    /// When one of the layers is invalid.
    pub fn update_layers(
        &mut self,
        map_id: &str,
        layers: Vec<LayerSpec>,
        removed_ids: &[String],
    ) -> Result<(), Error> {
        write(&self.state.layer_index(map_id)).update(layers, removed_ids)
    }

    /// Source of the given kind and name, created on first use.
    fn worker_source(
        &mut self,
        map_id: &str,
        kind: &str,
        source: &str,
    ) -> Result<&mut SourceInstance<F>, Error> {
        let context = SourceContext {
            actor: crate::actor::MapActor::new(Arc::clone(&self.actor), map_id),
            layer_index: self.state.layer_index(map_id),
            available_images: self.state.available_images(map_id),
        };

        let sources = self.state.sources.entry(map_id.to_owned()).or_default();
        let entry = match sources.entry((kind.to_owned(), source.to_owned())) {
            Entry::Occupied(entry) => return Ok(entry.into_mut()),
            Entry::Vacant(entry) => entry,
        };

        log::debug!("Creating {kind} source '{source}' for map '{map_id}'.");
        let instance = match kind {
            VECTOR => SourceInstance::Vector(VectorWorkerSource::new(
                context,
                Arc::new(FetchTileLoader::new(Arc::clone(&self.fetch))),
            )),
            GEOJSON => {
                SourceInstance::GeoJson(GeoJsonWorkerSource::new(context, Arc::clone(&self.fetch)))
            }
            other => {
                let factory = self.factories.get(other).ok_or_else(|| {
                    Error::UnknownSource(format!("no worker source of kind '{other}'"))
                })?;
                SourceInstance::Custom(factory(context))
            }
        };
        Ok(entry.insert(instance))
    }

    fn geojson_source(
        &mut self,
        map_id: &str,
        source: &str,
    ) -> Result<&mut GeoJsonWorkerSource<F>, Error> {
        match self.worker_source(map_id, GEOJSON, source)? {
            SourceInstance::GeoJson(source) => Ok(source),
            _ => Err(Error::UnknownSource(source.to_owned())),
        }
    }

    pub fn load_tile(
        &mut self,
        map_id: &str,
        kind: &str,
        parameters: TileParameters,
    ) -> BoxFuture<'static, Result<Option<TileResult>, Error>> {
        match self.worker_source(map_id, kind, &parameters.source) {
            Ok(source) => source.as_worker_source().load_tile(parameters),
            Err(error) => future::ready(Err(error)).boxed(),
        }
    }

    pub fn reload_tile(
        &mut self,
        map_id: &str,
        kind: &str,
        parameters: TileParameters,
    ) -> BoxFuture<'static, Result<Option<TileResult>, Error>> {
        match self.worker_source(map_id, kind, &parameters.source) {
            Ok(source) => source.as_worker_source().reload_tile(parameters),
            Err(error) => future::ready(Err(error)).boxed(),
        }
    }

    /// # Errors
    ///
    /// When there is no such kind of source.
    pub fn abort_tile(
        &mut self,
        map_id: &str,
        kind: &str,
        source: &str,
        uid: TileUid,
    ) -> Result<(), Error> {
        self.worker_source(map_id, kind, source)?
            .as_worker_source()
            .abort_tile(uid);
        Ok(())
    }

    /// # Errors
    ///
    /// When there is no such kind of source.
    pub fn remove_tile(
        &mut self,
        map_id: &str,
        kind: &str,
        source: &str,
        uid: TileUid,
    ) -> Result<(), Error> {
        self.worker_source(map_id, kind, source)?
            .as_worker_source()
            .remove_tile(uid);
        Ok(())
    }

    /// # Errors
    ///
    /// When the image can not be decoded.
    pub fn load_dem_tile(
        &mut self,
        map_id: &str,
        parameters: &LoadDemParameters,
    ) -> Result<Arc<DemData>, Error> {
        self.state
            .dem_sources
            .entry(map_id.to_owned())
            .or_default()
            .entry(parameters.source.clone())
            .or_default()
            .load_tile(parameters)
    }

    pub fn remove_dem_tile(&mut self, map_id: &str, source: &str, uid: TileUid) {
        if let Some(dem) = self
            .state
            .dem_sources
            .get_mut(map_id)
            .and_then(|sources| sources.get_mut(source))
        {
            dem.remove_tile(uid);
        }
    }

    /// Drop the source. A running GeoJSON load is reported as abandoned.
    pub fn remove_source(&mut self, map_id: &str, kind: &str, source: &str) {
        let removed = self
            .state
            .sources
            .get_mut(map_id)
            .and_then(|sources| sources.remove(&(kind.to_owned(), source.to_owned())));
        if let Some(mut removed) = removed {
            removed.as_worker_source().remove_source(source);
        }
    }

    pub fn load_data(
        &mut self,
        map_id: &str,
        parameters: LoadGeoJsonParameters,
    ) -> BoxFuture<'static, Result<GeoJsonLoadResult, Error>> {
        match self.geojson_source(map_id, &parameters.source) {
            Ok(source) => source.load_data(parameters),
            Err(error) => future::ready(Err(error)).boxed(),
        }
    }

    /// # Errors
    ///
    /// When the source is not clustered or there is no such cluster.
    pub fn get_cluster_expansion_zoom(
        &mut self,
        map_id: &str,
        source: &str,
        cluster_id: u64,
    ) -> Result<u8, Error> {
        self.geojson_source(map_id, source)?
            .get_cluster_expansion_zoom(cluster_id)
    }

    /// # Errors
    ///
    /// When the source is not clustered or there is no such cluster.
    pub fn get_cluster_children(
        &mut self,
        map_id: &str,
        source: &str,
        cluster_id: u64,
    ) -> Result<Vec<Feature>, Error> {
        self.geojson_source(map_id, source)?
            .get_cluster_children(cluster_id)
    }

    /// # Errors
    ///
    /// When the source is not clustered or there is no such cluster.
    pub fn get_cluster_leaves(
        &mut self,
        map_id: &str,
        source: &str,
        cluster_id: u64,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<Feature>, Error> {
        self.geojson_source(map_id, source)?
            .get_cluster_leaves(cluster_id, limit, offset)
    }

    /// Limit the number of responses the fetcher keeps around.
    pub fn enforce_cache_size_limit(&self, limit: usize) {
        self.fetch.set_cache_limit(limit);
    }
}

/// Request on its way to the worker thread.
struct WorkerMessage {
    map_id: String,
    request: Request,
    reply: oneshot::Sender<Result<Response, Error>>,
}

/// [`Worker`] running on its own thread. Requests are served concurrently, each
/// completes through its own reply.
pub struct WorkerThread {
    requests: mpsc::UnboundedSender<WorkerMessage>,
    runtime: Runtime,
}

impl WorkerThread {
    pub fn spawn<F: Fetch>(worker: Worker<F>) -> Self {
        let (requests, mut messages) = mpsc::unbounded::<WorkerMessage>();

        let runtime = Runtime::new("tilesmith-worker", async move {
            let mut worker = worker;
            while let Some(WorkerMessage {
                map_id,
                request,
                reply,
            }) = messages.next().await
            {
                log::trace!("Request {request:?} from map '{map_id}'.");
                let response = worker.handle(&map_id, request);
                tokio::spawn(async move {
                    if reply.send(response.await).is_err() {
                        log::debug!("Nobody waits for the response anymore.");
                    }
                });
            }
        });

        Self { requests, runtime }
    }

    /// # Errors
    ///
    /// When the request fails, or the worker thread is gone.
    pub fn send(
        &self,
        map_id: &str,
        request: Request,
    ) -> BoxFuture<'static, Result<Response, Error>> {
        let (reply, response) = oneshot::channel();
        let message = WorkerMessage {
            map_id: map_id.to_owned(),
            request,
            reply,
        };

        if self.requests.unbounded_send(message).is_err() {
            return future::ready(Err(Error::WorkerGone)).boxed();
        }

        async move { response.await.unwrap_or(Err(Error::WorkerGone)) }.boxed()
    }

    pub fn is_running(&self) -> bool {
        self.runtime.is_running()
    }
}
