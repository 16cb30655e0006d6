#![doc = include_str!("../README.md")]
#![deny(clippy::unwrap_used, rustdoc::broken_intra_doc_links)]

pub mod actor;
pub mod atlas;
pub mod bucket;
pub mod collision;
pub mod dem;
mod error;
pub mod expression;
pub mod feature_index;
pub mod geojson;
pub mod geojson_vt;
mod io;
pub mod mercator;
pub mod source;
pub mod style;
pub mod supercluster;
pub mod tile_id;
pub mod vector_tile;
mod worker;
pub mod worker_tile;

pub use actor::{Actor, ChannelActor, MapActor};
pub use error::Error;
pub use io::{Fetch, FetchResponse, HeaderValue, HttpError, HttpFetch, HttpOptions, http_client};
pub use worker::{Request, Response, Worker, WorkerState, WorkerThread};

use std::{
    collections::HashSet,
    sync::{LazyLock, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// Lock the mutex, also when a panicking thread left it poisoned.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Log a warning, unless the very same one was logged before.
pub(crate) fn warn_once(message: &str) {
    static WARNED: LazyLock<Mutex<HashSet<String>>> = LazyLock::new(Mutex::default);

    if lock(&WARNED).insert(message.to_owned()) {
        log::warn!("{message}");
    }
}
