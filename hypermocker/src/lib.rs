//! HTTP server for tests. Every request has to be anticipated first, and the test
//! decides when and how it is answered.

pub use http_body_util::Full;
use hyper::{Request, Response, server::conn::http1, service::Service};
use hyper_util::rt::TokioIo;
use std::{
    collections::HashMap,
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::{Arc, Mutex},
};
use tokio::{net::TcpListener, sync::oneshot};

pub use hyper;
pub use hyper::StatusCode;
pub use hyper::body::Bytes;
pub use hyper::http::request::Parts as RequestParts;

struct Anticipation {
    request_tx: oneshot::Sender<RequestParts>,
    response_rx: oneshot::Receiver<Response<Full<Bytes>>>,
}

#[derive(Default)]
struct State {
    /// Requests announced with [`Mock::anticipate`], keyed by path.
    anticipated: HashMap<String, Anticipation>,

    unexpected: Vec<String>,
}

pub struct Mock {
    pub port: u16,
    state: Arc<Mutex<State>>,
}

impl Mock {
    /// Create new [`Mock`], and bind it to a random port.
    pub async fn bind() -> std::io::Result<Mock> {
        let state = Arc::new(Mutex::new(State::default()));

        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();

        let state_clone = state.clone();
        tokio::spawn(async move {
            loop {
                let stream = match listener.accept().await {
                    Ok((stream, _)) => stream,
                    Err(error) => {
                        log::error!("Could not accept a connection: {error}.");
                        break;
                    }
                };
                let io = TokioIo::new(stream);

                let state = state_clone.clone();
                tokio::task::spawn(async move {
                    if let Err(error) = http1::Builder::new()
                        .serve_connection(io, MockRequest { state })
                        .await
                    {
                        log::warn!("Connection error: {error}.");
                    }
                });
            }
        });

        Ok(Mock { port, state })
    }

    /// Full URL of given path on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://localhost:{}{}", self.port, path)
    }

    /// Announce a request for `path`. It will hang until the returned
    /// [`AnticipatedRequest`] is answered.
    pub async fn anticipate(&self, path: impl Into<String>) -> AnticipatedRequest {
        let path = path.into();
        log::info!("Anticipating '{path}'.");
        let (request_tx, request_rx) = oneshot::channel();
        let (response_tx, response_rx) = oneshot::channel();
        lock(&self.state).anticipated.insert(
            path.clone(),
            Anticipation {
                request_tx,
                response_rx,
            },
        );
        AnticipatedRequest {
            path,
            request_rx: Some(request_rx),
            response_tx,
        }
    }

    /// Take the list of requests which were not anticipated.
    pub fn take_unexpected(&self) -> Vec<String> {
        std::mem::take(&mut lock(&self.state).unexpected)
    }
}

impl Drop for Mock {
    fn drop(&mut self) {
        let unexpected = self.take_unexpected();
        if !unexpected.is_empty() && !std::thread::panicking() {
            panic!("there are unexpected requests: {unexpected:?}");
        }
    }
}

pub struct AnticipatedRequest {
    path: String,
    request_rx: Option<oneshot::Receiver<RequestParts>>,
    response_tx: oneshot::Sender<Response<Full<Bytes>>>,
}

impl AnticipatedRequest {
    /// Wait until the request actually arrives and return its head.
    pub async fn expect(&mut self) -> RequestParts {
        let request_rx = self
            .request_rx
            .take()
            .unwrap_or_else(|| panic!("'{}' was already expected", self.path));
        request_rx
            .await
            .unwrap_or_else(|_| panic!("server dropped '{}'", self.path))
    }

    pub async fn respond(self, payload: impl Into<Bytes>) {
        self.respond_with(Response::new(Full::new(payload.into())));
    }

    pub async fn respond_with_status(self, status: StatusCode) {
        let mut response = Response::new(Full::new(Bytes::new()));
        *response.status_mut() = status;
        self.respond_with(response);
    }

    /// Respond with arbitrary response, e.g. with extra headers.
    pub fn respond_with(self, response: Response<Full<Bytes>>) {
        log::info!("Responding to '{}'.", self.path);
        if self.response_tx.send(response).is_err() {
            log::warn!("Client of '{}' is gone.", self.path);
        }
    }
}

struct MockRequest {
    state: Arc<Mutex<State>>,
}

impl Service<Request<hyper::body::Incoming>> for MockRequest {
    type Response = Response<Full<Bytes>>;
    type Error = hyper::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, request: Request<hyper::body::Incoming>) -> Self::Future {
        log::info!("Incoming request '{}'.", request.uri());
        let state = self.state.clone();
        Box::pin(async move {
            let (parts, _body) = request.into_parts();
            let path = parts.uri.path().to_owned();
            let anticipation = lock(&state).anticipated.remove(&path);

            if let Some(anticipation) = anticipation {
                // Test might not be interested in the request head.
                let _ = anticipation.request_tx.send(parts);

                match anticipation.response_rx.await {
                    Ok(response) => Ok(response),
                    Err(_) => Ok(status_response(StatusCode::INTERNAL_SERVER_ERROR, "dropped")),
                }
            } else {
                log::warn!("Unexpected '{}'.", parts.uri);
                lock(&state).unexpected.push(parts.uri.to_string());
                Ok(status_response(StatusCode::IM_A_TEAPOT, "unexpected"))
            }
        })
    }
}

fn status_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

fn lock(state: &Mutex<State>) -> std::sync::MutexGuard<'_, State> {
    state
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
