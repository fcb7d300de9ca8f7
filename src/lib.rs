//! FastScan Backend Library
//!
//! Orderbook dataset replay: timeline resolution, per-row trace payloads,
//! bounded caching with speed-aware prefetch, and cross-window sync.
//! Exposes the modules used by the server binary, the CLI tools and tests.

pub mod api;
pub mod config;
pub mod middleware;
pub mod playback;

pub use api::create_router;
pub use config::ServerConfig;
pub use playback::PlaybackService;
