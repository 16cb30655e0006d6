use bytes::Bytes;
use std::future::Future;

/// Body of a fetched resource, with the headers that tell the main thread how long it may
/// be cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub data: Bytes,
    pub cache_control: Option<String>,
    pub expires: Option<String>,
}

impl FetchResponse {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            cache_control: None,
            expires: None,
        }
    }
}

/// Source of tiles and GeoJSON documents.
pub trait Fetch: Send + Sync + 'static {
    type Error: std::error::Error + Sync + Send;

    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchResponse, Self::Error>> + Send;

    /// Sent along with every following request.
    fn set_referrer(&self, _referrer: &str) {}

    /// Number of responses kept for repeated requests.
    fn set_cache_limit(&self, _entries: usize) {}
}
