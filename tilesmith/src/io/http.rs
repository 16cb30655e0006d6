use super::{Fetch, FetchResponse};
use crate::lock;
use lru::LruCache;
use reqwest::header::{CACHE_CONTROL, EXPIRES, HeaderName, REFERER, USER_AGENT};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use std::{num::NonZeroUsize, sync::Mutex};

pub use reqwest::header::HeaderValue;

/// Controls how [`HttpFetch`] uses the HTTP protocol.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// User agent to be sent to the servers.
    pub user_agent: Option<HeaderValue>,

    /// Number of responses kept in memory. Responses with `Cache-Control: no-store` are
    /// never kept.
    pub cache_size: NonZeroUsize,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            user_agent: Some(HeaderValue::from_static(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION"),
            ))),
            cache_size: NonZeroUsize::new(DEFAULT_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

const DEFAULT_CACHE_SIZE: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error(transparent)]
    Middleware(#[from] reqwest_middleware::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
}

pub fn http_client() -> ClientWithMiddleware {
    ClientBuilder::new(reqwest::Client::new()).build()
}

/// Fetches over HTTP, remembering recent responses.
pub struct HttpFetch {
    client: ClientWithMiddleware,
    user_agent: Option<HeaderValue>,
    referrer: Mutex<Option<HeaderValue>>,
    cache: Mutex<LruCache<String, FetchResponse>>,
}

impl HttpFetch {
    pub fn new(options: HttpOptions) -> Self {
        Self {
            client: http_client(),
            user_agent: options.user_agent,
            referrer: Mutex::new(None),
            cache: Mutex::new(LruCache::new(options.cache_size)),
        }
    }

    async fn download(&self, url: &str) -> Result<FetchResponse, HttpError> {
        let mut request = self.client.get(url);
        if let Some(user_agent) = &self.user_agent {
            request = request.header(USER_AGENT, user_agent);
        }
        let referrer = lock(&self.referrer).clone();
        if let Some(referrer) = referrer {
            request = request.header(REFERER, referrer);
        }

        let response = request.send().await?;
        log::debug!("Downloaded {url}: {:?}.", response.status());
        let response = response.error_for_status()?;

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        };
        let cache_control = header(CACHE_CONTROL);
        let expires = header(EXPIRES);

        Ok(FetchResponse {
            data: response.bytes().await?,
            cache_control,
            expires,
        })
    }
}

impl Default for HttpFetch {
    fn default() -> Self {
        Self::new(HttpOptions::default())
    }
}

impl Fetch for HttpFetch {
    type Error = HttpError;

    async fn fetch(&self, url: &str) -> Result<FetchResponse, Self::Error> {
        if let Some(cached) = lock(&self.cache).get(url) {
            log::trace!("{url} served from the cache.");
            return Ok(cached.clone());
        }

        let response = self.download(url).await?;

        let no_store = response
            .cache_control
            .as_deref()
            .is_some_and(|cache_control| cache_control.contains("no-store"));
        if !no_store {
            lock(&self.cache).put(url.to_owned(), response.clone());
        }

        Ok(response)
    }

    fn set_referrer(&self, referrer: &str) {
        match HeaderValue::from_str(referrer) {
            Ok(value) => *lock(&self.referrer) = Some(value),
            Err(error) => log::warn!("Invalid referrer '{referrer}': {error}."),
        }
    }

    fn set_cache_limit(&self, entries: usize) {
        let entries = NonZeroUsize::new(entries).unwrap_or(NonZeroUsize::MIN);
        lock(&self.cache).resize(entries);
    }
}
