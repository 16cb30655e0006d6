//! Network access and the thread the worker runs on.

mod fetch;
mod http;
mod runtime;

pub use fetch::{Fetch, FetchResponse};
pub use http::{HeaderValue, HttpError, HttpFetch, HttpOptions, http_client};
pub(crate) use runtime::Runtime;
