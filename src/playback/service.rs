//! Playback service
//!
//! Owns every shared playback structure and is injected into the HTTP layer
//! (`Arc<PlaybackService>` as axum state). Several independent services can
//! live in one process, which is how the tests run.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use super::cache::{CacheStats, TraceCache, TraceKey};
use super::chunk::{load_chunk, ChunkRequest, ChunkResponse};
use super::dataset::{Dataset, DatasetInfo, DatasetStore};
use super::error::{PlaybackError, PlaybackResult};
use super::prefetch::{prefetch, PrefetchScheduler};
use super::session::{Session, SessionRegistry};
use super::state::PlaybackCommand;
use super::sync::SyncChannel;
use super::trace::{TraceData, TraceExtractor};
use crate::config::{ServerConfig, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};

/// Cache entries per frame of buffer: the 2x horizon ahead plus an equal window behind.
pub const CACHE_FRAMES_PER_BUFFER_FRAME: i64 = 4;

/// Cache bound for a buffer size: `4 × size`, never below `floor`. A disabled
/// cache (`floor <= 0` handled by the caller) is left alone.
fn cache_capacity_for(size: usize, floor: i64) -> i64 {
    (size as i64)
        .saturating_mul(CACHE_FRAMES_PER_BUFFER_FRAME)
        .max(floor)
}

/// Current wall clock, epoch ms.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PrefetchOutcome {
    pub newly_cached: usize,
    pub horizon: usize,
    /// When the client should trigger the next pass.
    pub next_due_in_ms: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BufferSettings {
    pub size: usize,
    pub capacity: usize,
}

/// Position of a session sampled at one instant.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionSample {
    pub session: Session,
    pub row: usize,
    pub virtual_time_ms: f64,
    /// Playback reached the terminal row on this sample and paused.
    pub ended: bool,
    pub prefetched: usize,
}

pub struct PlaybackService {
    store: DatasetStore,
    cache: TraceCache,
    extractor: TraceExtractor,
    scheduler: RwLock<PrefetchScheduler>,
    sessions: SessionRegistry,
    sync: SyncChannel,
    min_cache_capacity: i64,
    max_chunk_rows: usize,
}

impl PlaybackService {
    pub fn new(config: &ServerConfig) -> Self {
        // The 2x-speed horizon must fit, or each prefetch pass evicts its own rows.
        let cache_capacity = if config.cache_capacity > 0 {
            cache_capacity_for(config.buffer_size, config.cache_capacity)
        } else {
            config.cache_capacity
        };
        info!(
            data_dir = %config.data_dir.display(),
            cache_capacity,
            buffer_size = config.buffer_size,
            bar_scale_coeff = config.bar_scale_coeff,
            session_idle_ttl_ms = config.session_idle_ttl_ms,
            "Playback service initialized"
        );
        Self {
            store: DatasetStore::new(config.data_dir.clone()),
            cache: TraceCache::new(cache_capacity),
            extractor: TraceExtractor::new(config.bar_scale_coeff),
            scheduler: RwLock::new(PrefetchScheduler::new(
                config.buffer_size,
                config.prefetch_interval_ms,
            )),
            sessions: SessionRegistry::new(config.session_idle_ttl_ms),
            sync: SyncChannel::new(),
            min_cache_capacity: config.min_cache_capacity,
            max_chunk_rows: config.max_chunk_rows.max(1),
        }
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    pub fn cache(&self) -> &TraceCache {
        &self.cache
    }

    pub fn sync(&self) -> &SyncChannel {
        &self.sync
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn bar_scale_coeff(&self) -> f64 {
        self.extractor.bar_scale_coeff()
    }

    // ========================================================================
    // Datasets
    // ========================================================================

    pub fn list_datasets(&self) -> PlaybackResult<Vec<String>> {
        self.store
            .list_files()
            .map_err(|e| PlaybackError::DatasetLoad {
                filename: self.store.data_dir().display().to_string(),
                reason: e.to_string(),
            })
    }

    pub fn dataset(&self, filename: &str) -> PlaybackResult<Arc<Dataset>> {
        self.store.get(filename)
    }

    pub fn dataset_info(&self, filename: &str) -> PlaybackResult<DatasetInfo> {
        Ok(self.store.get(filename)?.info())
    }

    /// One row's payload, served from the cache when possible.
    pub fn trace(&self, filename: &str, row: usize) -> PlaybackResult<Arc<TraceData>> {
        let dataset = self.store.get(filename)?;
        self.trace_for(&dataset, row)
    }

    fn trace_for(&self, dataset: &Dataset, row: usize) -> PlaybackResult<Arc<TraceData>> {
        if row >= dataset.len() {
            return Err(PlaybackError::RowOutOfRange {
                row,
                len: dataset.len(),
            });
        }
        let key = TraceKey::new(dataset.id(), row);
        let (trace, _) = self
            .cache
            .get_or_compute(key, || self.extractor.extract(dataset, row))?;
        Ok(trace)
    }

    pub fn resolve(&self, filename: &str, virtual_time_ms: f64) -> PlaybackResult<usize> {
        Ok(self.store.get(filename)?.timeline().resolve(virtual_time_ms))
    }

    pub fn chunk(&self, filename: &str, request: ChunkRequest) -> PlaybackResult<ChunkResponse> {
        let dataset = self.store.get(filename)?;
        load_chunk(
            &self.cache,
            &self.extractor,
            &dataset,
            request,
            self.max_chunk_rows,
        )
    }

    // ========================================================================
    // Prefetch / buffer
    // ========================================================================

    pub fn prefetch(
        &self,
        filename: &str,
        current_row: usize,
        speed: f64,
    ) -> PlaybackResult<PrefetchOutcome> {
        if !(speed.is_finite() && speed > 0.0) {
            return Err(PlaybackError::InvalidSpeed(speed));
        }
        let dataset = self.store.get(filename)?;
        let plan = self.scheduler.read().plan(speed);
        let newly_cached = prefetch(
            &self.cache,
            &self.extractor,
            &dataset,
            current_row,
            plan.horizon,
        )?;
        Ok(PrefetchOutcome {
            newly_cached,
            horizon: plan.horizon,
            next_due_in_ms: plan.interval_ms,
        })
    }

    pub fn buffer_status(&self, filename: &str, current_row: usize) -> CacheStats {
        self.cache.stats(filename, current_row)
    }

    pub fn buffer_settings(&self) -> BufferSettings {
        BufferSettings {
            size: self.scheduler.read().base_horizon(),
            capacity: self.cache.capacity(),
        }
    }

    /// Change frames-ahead. The cache is resized to `4 × size`, never below the
    /// configured floor. A disabled cache (capacity 0) stays disabled.
    pub fn set_buffer_size(&self, size: usize) -> BufferSettings {
        let size = size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        self.scheduler.write().set_base_horizon(size);

        if self.cache.capacity() > 0 {
            self.cache
                .resize(cache_capacity_for(size, self.min_cache_capacity));
        }

        info!(size, capacity = self.cache.capacity(), "Buffer size updated");
        self.buffer_settings()
    }

    pub fn clear_buffer(&self) {
        let dropped = self.cache.len();
        self.cache.clear();
        info!(dropped, "Trace cache cleared");
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    pub fn create_session(&self, filename: &str) -> PlaybackResult<Session> {
        self.store.get(filename)?;
        let session = self.sessions.create(filename, now_ms());
        info!(session = %session.id, dataset = filename, "Playback session created");
        Ok(session)
    }

    /// Sample the session clock at `now_ms`, applying end-of-data, and run a
    /// prefetch pass when one is due.
    pub fn sample_session(&self, id: &str, now_ms: i64) -> PlaybackResult<SessionSample> {
        let scheduler = self.scheduler.read().clone();

        // The dataset is read under the session lock so a concurrent switch
        // cannot pair this tick with the previous file's timeline.
        let (session, dataset, tick, due) = self.sessions.update(id, now_ms, |s| {
            let dataset = self.store.get(&s.dataset_id)?;
            let tick = s.state.tick(dataset.timeline(), now_ms);
            let due = scheduler.is_due(s.last_prefetch_ms, now_ms, s.state.speed());
            if due {
                s.last_prefetch_ms = Some(now_ms);
            }
            Ok((s.clone(), dataset, tick, due))
        })?;

        if tick.ended {
            info!(session = id, row = tick.row, "Playback reached end of data");
        }

        // Extraction happens outside the session lock.
        let prefetched = if due {
            let horizon = scheduler.horizon_for_speed(session.state.speed());
            prefetch(&self.cache, &self.extractor, &dataset, tick.row, horizon)?
        } else {
            0
        };

        Ok(SessionSample {
            session,
            row: tick.row,
            virtual_time_ms: tick.virtual_time_ms,
            ended: tick.ended,
            prefetched,
        })
    }

    pub fn command_session(
        &self,
        id: &str,
        command: PlaybackCommand,
        now_ms: i64,
    ) -> PlaybackResult<SessionSample> {
        let (session, dataset, row) = self.sessions.update(id, now_ms, |s| {
            let dataset = self.store.get(&s.dataset_id)?;
            let row = s.state.apply(command, dataset.timeline(), now_ms)?;
            Ok((s.clone(), dataset, row))
        })?;
        debug!(session = id, ?command, row, "Playback command applied");

        Ok(SessionSample {
            virtual_time_ms: session.state.virtual_time_ms(dataset.timeline(), now_ms),
            session,
            row,
            ended: false,
            prefetched: 0,
        })
    }

    pub fn switch_session_dataset(&self, id: &str, filename: &str) -> PlaybackResult<Session> {
        self.store.get(filename)?;
        let session = self.sessions.update(id, now_ms(), |s| {
            s.switch_dataset(filename);
            Ok(s.clone())
        })?;
        info!(session = id, dataset = filename, "Session switched dataset");
        Ok(session)
    }

    pub fn drop_session(&self, id: &str) -> PlaybackResult<()> {
        self.sessions.remove(id)?;
        debug!(session = id, "Playback session dropped");
        Ok(())
    }
}
