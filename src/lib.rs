//! Photo Relay Library
//!
//! Photo upload pipeline: a client half that validates, downscales and
//! uploads photos in batches, and a relay server that re-validates them and
//! stores them in a hosted media store.
//!
//! # Features
//!
//! - **Client-side checks**: type and size validation before any network traffic
//! - **Normalization**: large photos are downscaled and re-encoded as JPEG
//! - **Batching**: bounded concurrency with a pause between batches
//! - **Relay**: authoritative validation, single or multi-file mode
//!
//! # Example
//!
//! ```no_run
//! use photo_relay::{config::Config, server::RelayServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("relay.yaml")?;
//!     let server = RelayServer::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use relay::RelayService;
pub use server::RelayServer;
pub use upload::session::{SessionController, SessionReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
