//! Sources turn tile requests into parsed tiles. Vector and GeoJSON sources are built in,
//! other kinds can be registered with [`crate::Worker::register_worker_source`].

mod geojson;
mod raster_dem;
mod vector;

pub use geojson::{
    GeoJsonIndex, GeoJsonLoadResult, GeoJsonTileLoader, GeoJsonWorkerSource, LoadGeoJsonParameters,
};
pub use raster_dem::{DemImage, LoadDemParameters, RasterDemWorkerSource};
pub use vector::{FetchTileLoader, LoadedVectorData, VectorTileLoader, VectorWorkerSource};

use crate::{
    actor::MapActor,
    error::Error,
    io::Fetch,
    style::StyleLayerIndex,
    tile_id::TileUid,
    worker_tile::{ParseResult, TileParameters},
};
use bytes::Bytes;
use futures::future::BoxFuture;
use std::sync::{Arc, RwLock};

/// Parsed tile as it goes back to the main thread.
#[derive(Debug, Clone)]
pub struct TileResult {
    pub parse_result: ParseResult,
    /// Encoded tile, kept by the main thread for feature queries.
    pub raw_tile_data: Option<Bytes>,
    pub cache_control: Option<String>,
    pub expires: Option<String>,
}

/// Capability every kind of source provides. Tile operations resolve to `None` when
/// there is nothing to report, e.g. when the fetch was aborted.
pub trait WorkerSource: Send {
    /// # Errors
    ///
    /// When the tile can not be fetched, decoded or its dependencies resolved.
    fn load_tile(
        &mut self,
        parameters: TileParameters,
    ) -> BoxFuture<'static, Result<Option<TileResult>, Error>>;

    /// Parse the tile again with the current style, without fetching it.
    ///
    /// # Errors
    ///
    /// When dependencies can not be resolved.
    fn reload_tile(
        &mut self,
        parameters: TileParameters,
    ) -> BoxFuture<'static, Result<Option<TileResult>, Error>>;

    /// Cancel the fetch of a tile. A parse in progress is not interrupted.
    fn abort_tile(&mut self, uid: TileUid);

    fn remove_tile(&mut self, uid: TileUid);

    fn set_available_images(&mut self, _images: Arc<[String]>) {}

    fn remove_source(&mut self, _source: &str) {}
}

/// What a source gets to know about the map it works for.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub actor: MapActor,
    pub layer_index: Arc<RwLock<StyleLayerIndex>>,
    pub available_images: Arc<[String]>,
}

pub type WorkerSourceFactory = Arc<dyn Fn(SourceContext) -> Box<dyn WorkerSource> + Send + Sync>;

/// Source kinds known to every worker.
pub const VECTOR: &str = "vector";
pub const GEOJSON: &str = "geojson";

/// Instance of one of the built-in kinds, or of a registered one.
pub enum SourceInstance<F> {
    Vector(VectorWorkerSource<FetchTileLoader<F>>),
    GeoJson(GeoJsonWorkerSource<F>),
    Custom(Box<dyn WorkerSource>),
}

impl<F: Fetch> SourceInstance<F> {
    pub fn as_worker_source(&mut self) -> &mut dyn WorkerSource {
        match self {
            Self::Vector(source) => source,
            Self::GeoJson(source) => source,
            Self::Custom(source) => source.as_mut(),
        }
    }
}
