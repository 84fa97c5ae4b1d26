//! HTTP server module
//!
//! Binds the listener and routes requests to the relay.

pub mod http;

pub use http::RelayServer;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Failed to create media store: {0}")]
    StoreError(#[from] crate::store::StoreError),
}
