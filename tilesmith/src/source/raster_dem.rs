use crate::{
    dem::{DemData, DemEncoding},
    error::Error,
    tile_id::TileUid,
};
use bytes::Bytes;
use image::RgbaImage;
use std::{collections::HashMap, sync::Arc};

/// Pixels of an elevation tile as the main thread sends them.
#[derive(Debug, Clone, PartialEq)]
pub enum DemImage {
    /// PNG or WebP, still to be decoded.
    Encoded(Bytes),
    /// Decoded pixels, already padded with a 1px border.
    Pixels(RgbaImage),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadDemParameters {
    pub uid: TileUid,
    pub source: String,
    /// `mapbox` or `terrarium`.
    pub encoding: Option<String>,
    pub image: DemImage,
}

/// Decoded elevation tiles, kept until the main thread removes them.
#[derive(Debug, Default)]
pub struct RasterDemWorkerSource {
    loaded: HashMap<TileUid, Arc<DemData>>,
}

impl RasterDemWorkerSource {
    /// # Errors
    ///
    /// When the image can not be decoded or is not square.
    pub fn load_tile(&mut self, parameters: &LoadDemParameters) -> Result<Arc<DemData>, Error> {
        let encoding = DemEncoding::from_name(parameters.encoding.as_deref());
        let uid = parameters.uid;
        let dem = match &parameters.image {
            DemImage::Encoded(data) => DemData::decode(uid.0, data, encoding)?,
            DemImage::Pixels(pixels) => DemData::new(uid.0, pixels, encoding)?,
        };

        let dem = Arc::new(dem);
        self.loaded.insert(uid, Arc::clone(&dem));
        Ok(dem)
    }

    pub fn get(&self, uid: TileUid) -> Option<&Arc<DemData>> {
        self.loaded.get(&uid)
    }

    pub fn remove_tile(&mut self, uid: TileUid) {
        self.loaded.remove(&uid);
    }
}
