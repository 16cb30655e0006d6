use super::{SourceContext, TileResult, WorkerSource};
use crate::{
    error::Error,
    io::Fetch,
    lock, read,
    tile_id::TileUid,
    vector_tile::VectorTile,
    worker_tile::{TileParameters, WorkerTile},
};
use bytes::Bytes;
use futures::{
    FutureExt as _,
    future::{self, AbortHandle, Abortable, BoxFuture},
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Decoded tile as handed over by a [`VectorTileLoader`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedVectorData {
    pub vector_tile: VectorTile,
    pub raw_data: Option<Bytes>,
    pub cache_control: Option<String>,
    pub expires: Option<String>,
}

impl LoadedVectorData {
    pub fn new(vector_tile: VectorTile) -> Self {
        Self {
            vector_tile,
            raw_data: None,
            cache_control: None,
            expires: None,
        }
    }
}

/// Where the bytes of a tile come from.
pub trait VectorTileLoader: Send + Sync + 'static {
    /// Resolves to `None` when the source has no such tile.
    ///
    /// # Errors
    ///
    /// When the tile can not be fetched or decoded.
    fn load(
        &self,
        parameters: &TileParameters,
    ) -> BoxFuture<'static, Result<Option<LoadedVectorData>, Error>>;
}

/// Loads tiles from the URL of the request.
pub struct FetchTileLoader<F> {
    fetch: Arc<F>,
}

impl<F> FetchTileLoader<F> {
    pub fn new(fetch: Arc<F>) -> Self {
        Self { fetch }
    }
}

impl<F: Fetch> VectorTileLoader for FetchTileLoader<F> {
    fn load(
        &self,
        parameters: &TileParameters,
    ) -> BoxFuture<'static, Result<Option<LoadedVectorData>, Error>> {
        let fetch = Arc::clone(&self.fetch);
        let url = parameters.request.as_ref().map(|request| request.url.clone());

        async move {
            let url = url.ok_or_else(|| Error::Fetch("Tile request has no URL.".to_owned()))?;
            let response = fetch
                .fetch(&url)
                .await
                .map_err(|error| Error::Fetch(error.to_string()))?;
            let vector_tile = VectorTile::decode(&response.data)?;

            Ok(Some(LoadedVectorData {
                vector_tile,
                raw_data: Some(response.data),
                cache_control: response.cache_control,
                expires: response.expires,
            }))
        }
        .boxed()
    }
}

#[derive(Default)]
pub(super) struct Tiles {
    /// Tiles whose bytes are being fetched.
    loading: HashMap<TileUid, AbortHandle>,
    pub(super) loaded: HashMap<TileUid, Arc<Mutex<WorkerTile>>>,
}

/// Source of vector tiles. Keeps the decoded tiles around, so that they can be parsed
/// again when the style changes.
pub struct VectorWorkerSource<L> {
    loader: Arc<L>,
    context: SourceContext,
    tiles: Arc<Mutex<Tiles>>,
}

impl<L: VectorTileLoader> VectorWorkerSource<L> {
    pub fn new(context: SourceContext, loader: Arc<L>) -> Self {
        Self {
            loader,
            context,
            tiles: Arc::default(),
        }
    }

    pub fn is_loading(&self, uid: TileUid) -> bool {
        lock(&self.tiles).loading.contains_key(&uid)
    }

    pub fn is_loaded(&self, uid: TileUid) -> bool {
        lock(&self.tiles).loaded.contains_key(&uid)
    }

    pub(super) fn tiles(&self) -> Arc<Mutex<Tiles>> {
        Arc::clone(&self.tiles)
    }
}

impl<L: VectorTileLoader> WorkerSource for VectorWorkerSource<L> {
    fn load_tile(
        &mut self,
        parameters: TileParameters,
    ) -> BoxFuture<'static, Result<Option<TileResult>, Error>> {
        let uid = parameters.uid;
        let (abort_handle, registration) = AbortHandle::new_pair();
        let fetch = Abortable::new(self.loader.load(&parameters), registration);
        lock(&self.tiles).loading.insert(uid, abort_handle);

        let tile = Arc::new(Mutex::new(WorkerTile::new(parameters)));
        let tiles = Arc::clone(&self.tiles);
        let context = self.context.clone();

        async move {
            let response = fetch.await;
            lock(&tiles).loading.remove(&uid);

            let data = match response.map_err(Error::from).and_then(|response| response) {
                Ok(Some(data)) => data,
                failed => {
                    // Reloads of a tile which never arrived resolve to nothing.
                    lock(&tile).finish();
                    lock(&tiles).loaded.insert(uid, tile);
                    return match failed {
                        Err(error) if !error.is_aborted() => Err(error),
                        _ => Ok(None),
                    };
                }
            };

            let LoadedVectorData {
                vector_tile,
                raw_data,
                cache_control,
                expires,
            } = data;

            let parse = {
                let layer_index = read(&context.layer_index);
                let mut tile = lock(&tile);
                tile.parse(
                    Arc::new(vector_tile),
                    &layer_index,
                    Arc::clone(&context.available_images),
                    &context.actor,
                )
            };
            lock(&tiles).loaded.insert(uid, Arc::clone(&tile));

            let result = parse.await;
            lock(&tile).finish();

            Ok(Some(TileResult {
                parse_result: result?,
                raw_tile_data: raw_data,
                cache_control,
                expires,
            }))
        }
        .boxed()
    }

    fn reload_tile(
        &mut self,
        parameters: TileParameters,
    ) -> BoxFuture<'static, Result<Option<TileResult>, Error>> {
        let Some(tile) = lock(&self.tiles).loaded.get(&parameters.uid).cloned() else {
            return future::ready(Ok(None)).boxed();
        };

        let running = {
            let mut tile = lock(&tile);
            tile.parameters.show_collision_boxes = parameters.show_collision_boxes;
            tile.wait_for_parse()
        };
        let context = self.context.clone();

        async move {
            if let Some(running) = running {
                log::trace!("Reload of {} waits for the running parse.", parameters.uid);
                // Cancelled when a newer reload takes over, or the tile is gone.
                if running.await.is_err() {
                    return Ok(None);
                }
            }
            reparse(&tile, &context).await
        }
        .boxed()
    }

    fn abort_tile(&mut self, uid: TileUid) {
        if let Some(abort_handle) = lock(&self.tiles).loading.remove(&uid) {
            abort_handle.abort();
        }
    }

    fn remove_tile(&mut self, uid: TileUid) {
        lock(&self.tiles).loaded.remove(&uid);
    }

    fn set_available_images(&mut self, images: Arc<[String]>) {
        self.context.available_images = images;
    }
}

/// Parse the already decoded data of a tile again.
async fn reparse(
    tile: &Mutex<WorkerTile>,
    context: &SourceContext,
) -> Result<Option<TileResult>, Error> {
    let parse = {
        let layer_index = read(&context.layer_index);
        let mut tile = lock(tile);
        let Some(data) = tile.vector_tile().cloned() else {
            return Ok(None);
        };
        tile.parse(
            data,
            &layer_index,
            Arc::clone(&context.available_images),
            &context.actor,
        )
    };

    let result = parse.await;
    lock(tile).finish();

    Ok(Some(TileResult {
        parse_result: result?,
        raw_tile_data: None,
        cache_control: None,
        expires: None,
    }))
}
