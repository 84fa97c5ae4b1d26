//! HTTP server for the photo relay
//!
//! Built directly on `hyper` and `tokio`: one task per connection, HTTP/1.1,
//! graceful shutdown on a caller-supplied signal.
//!
//! # Endpoints
//!
//! * `GET /health` - returns `ok`
//! * `POST /upload` - multipart upload, handled by [`RelayService`]
//! * `GET /metrics` - Prometheus text format, when metrics are enabled
//!
//! Anything else is 404; other methods on `/upload` are 405.
//!
//! # Example
//!
//! ```no_run
//! use photo_relay::config::Config;
//! use photo_relay::server::RelayServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("relay.yaml")?;
//! let server = RelayServer::new(config).await?;
//! println!("Listening on {}", server.local_addr());
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::Config;
use crate::metrics;
use crate::relay::RelayService;
use crate::server::ServerError;
use crate::store::{HttpMediaStore, HttpMediaStoreConfig, MediaStore};
use hyper::body::Incoming;
use hyper::header::{ALLOW, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

struct AppState {
    relay: RelayService,
    metrics_enabled: bool,
}

/// HTTP server fronting the relay
pub struct RelayServer {
    state: Arc<AppState>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl RelayServer {
    /// Bind the configured address and build the HTTP media store
    pub async fn new(config: Config) -> Result<Self, ServerError> {
        let store = HttpMediaStore::new(HttpMediaStoreConfig::from(&config.media_store))?;
        Self::with_store(config, Arc::new(store)).await
    }

    /// Bind the configured address using the given media store
    pub async fn with_store(config: Config, store: Arc<dyn MediaStore>) -> Result<Self, ServerError> {
        let addr: SocketAddr = config
            .server
            .address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        // Port 0 resolves here
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        info!(
            address = %local_addr,
            multi_file = config.relay.multi_file,
            folder = %config.relay.folder,
            "Relay server bound"
        );

        let relay = RelayService::new(store, config.relay.clone(), config.server.request_timeout());
        Ok(Self {
            state: Arc::new(AppState {
                relay,
                metrics_enabled: config.metrics.enabled,
            }),
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until Ctrl-C
    pub async fn run(self) -> Result<(), ServerError> {
        self.serve_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await
    }

    /// Serve until `shutdown` resolves. In-flight connections are left to finish.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        info!("Starting relay server on {}", self.local_addr);
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                _ = &mut shutdown => None,
                accepted = self.listener.accept() => Some(accepted),
            };

            let (stream, peer_addr) = match accepted {
                None => {
                    info!("Shutting down relay server");
                    return Ok(());
                }
                Some(Ok(conn)) => conn,
                Some(Err(e)) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { handle_request(req, state).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {}", peer_addr, e);
                }
            });
        }
    }
}

fn text_response(status: StatusCode, body: impl Into<String>) -> Response<String> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static("text/plain"));
    response
}

async fn handle_request(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<String>, Infallible> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    info!("Handling {} {}", method, path);

    let response = match (path.as_str(), &method) {
        ("/health", &Method::GET) => text_response(StatusCode::OK, "ok"),
        ("/metrics", &Method::GET) if state.metrics_enabled => {
            let mut response = text_response(StatusCode::OK, metrics::gather_text());
            response.headers_mut().insert(
                CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        ("/upload", &Method::POST) => upload(req, &state.relay).await,
        ("/upload", _) => {
            let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
            response
                .headers_mut()
                .insert(ALLOW, hyper::header::HeaderValue::from_static("POST"));
            response
        }
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

async fn upload(req: Request<Incoming>, relay: &RelayService) -> Response<String> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let relayed = relay.handle_body(content_type.as_deref(), req.into_body()).await;
    let mut response = Response::new(relayed.body);
    *response.status_mut() = relayed.status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static("application/json"));
    response
}
