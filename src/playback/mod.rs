//! Playback & Prefetch
//!
//! Turns a continuously advancing virtual clock into dataset rows and serves a
//! lightweight per-row payload for the dashboard.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────────┐     ┌──────────────┐
//! │ DatasetStore │────▶│ CumulativeTimeline │────▶│ Row Resolver │◀── PlaybackState
//! │ (CSV, memo)  │     │ T[0]=0, monotone   │     │ (bisect)     │    (anchor clock)
//! └──────────────┘     └────────────────────┘     └──────┬───────┘
//!                                                       │ row
//!                                                       ▼
//!                      ┌────────────────────┐     ┌──────────────┐
//!                      │ TraceCache (LRU)   │◀───▶│ Extractor    │
//!                      │ (dataset,row)→data │     │ (pure)       │
//!                      └─────────┬──────────┘     └──────────────┘
//!                                │  ▲ prefetch (speed-aware horizon)
//!                                ▼  │
//!                      ┌────────────────────┐     ┌──────────────┐
//!                      │ Chunk delivery     │     │ SyncChannel  │──▶ secondary windows
//!                      │ {batch,start,reset}│     │ (row, file)  │
//!                      └────────────────────┘     └──────────────┘
//! ```
//!
//! # Guarantees
//!
//! - **Positional correctness**: row is a pure function of anchors and wall clock
//! - **Monotone**: non-decreasing virtual time never resolves to an earlier row
//! - **Bounded memory**: cache holds at most `capacity` payloads
//! - **Isolation**: datasets never share cache keys

pub mod cache;
pub mod chunk;
pub mod dataset;
pub mod error;
pub mod prefetch;
pub mod service;
pub mod session;
pub mod state;
pub mod sync;
pub mod timeline;
pub mod trace;


pub use cache::{CacheStats, TraceCache, TraceKey};
pub use chunk::{load_chunk, ChunkRequest, ChunkResponse};
pub use dataset::{Dataset, DatasetInfo, DatasetStore};
pub use error::{PlaybackError, PlaybackResult};
pub use prefetch::{PrefetchPlan, PrefetchScheduler};
pub use service::{PlaybackService, PrefetchOutcome, SessionSample};
pub use session::{Session, SessionRegistry};
pub use state::{PlaybackCommand, PlaybackPhase, PlaybackState, Tick};
pub use sync::{SyncChannel, SyncMessage, SyncSnapshot, SyncStatus, ViewStatus};
pub use timeline::CumulativeTimeline;
pub use trace::{TraceData, TraceExtractor};
