//! Chunk Delivery Protocol
//!
//! Batch-produces [`TraceData`] for a contiguous row range so the browser render
//! loop can advance through many rows per second without a round-trip per row.
//!
//! - `count_returned = min(count, max_rows, N - start_row)`
//! - `start_row >= N` yields an empty batch
//! - `reset` is passed through untouched (replace vs. append on the client)

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::cache::{TraceCache, TraceKey};
use super::dataset::Dataset;
use super::error::PlaybackResult;
use super::trace::{TraceData, TraceExtractor};

/// Rows per chunk requested by the browser render loop.
pub const DEFAULT_CHUNK_ROWS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRequest {
    pub start_row: usize,
    #[serde(default = "default_count")]
    pub count: usize,
    #[serde(default)]
    pub reset: bool,
}

fn default_count() -> usize {
    DEFAULT_CHUNK_ROWS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResponse {
    pub batch: Vec<Arc<TraceData>>,
    pub start_row: usize,
    /// Rows actually returned.
    pub count: usize,
    pub reset: bool,
}

/// Serve `request` from the cache, extracting misses in parallel.
///
/// `max_rows` caps a single response regardless of the requested count.
pub fn load_chunk(
    cache: &TraceCache,
    extractor: &TraceExtractor,
    dataset: &Dataset,
    request: ChunkRequest,
    max_rows: usize,
) -> PlaybackResult<ChunkResponse> {
    let start = Instant::now();
    let len = dataset.len();
    let end = if request.start_row >= len {
        request.start_row
    } else {
        request
            .start_row
            .saturating_add(request.count.min(max_rows))
            .min(len)
    };

    let mut batch: Vec<Option<Arc<TraceData>>> = (request.start_row..end)
        .map(|row| cache.get(&TraceKey::new(dataset.id(), row)))
        .collect();

    let missing: Vec<usize> = batch
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.is_none())
        .map(|(offset, _)| request.start_row + offset)
        .collect();

    let extracted: Vec<TraceData> = missing
        .par_iter()
        .map(|&row| extractor.extract(dataset, row))
        .collect::<PlaybackResult<_>>()?;

    for (row, trace) in missing.iter().zip(extracted) {
        let trace = Arc::new(trace);
        cache.put(TraceKey::new(dataset.id(), *row), trace.clone());
        batch[row - request.start_row] = Some(trace);
    }

    let batch: Vec<Arc<TraceData>> = batch.into_iter().flatten().collect();
    debug!(
        dataset = %dataset.id(),
        start_row = request.start_row,
        requested = request.count,
        returned = batch.len(),
        extracted = missing.len(),
        reset = request.reset,
        elapsed_us = start.elapsed().as_micros() as u64,
        "Chunk served"
    );

    Ok(ChunkResponse {
        count: batch.len(),
        batch,
        start_row: request.start_row,
        reset: request.reset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(rows: usize) -> Dataset {
        let mut csv = String::from("timestamp_ms,up_bid_1_price,up_bid_1_size\n");
        for i in 0..rows {
            csv.push_str(&format!("{},0.{},{}\n", i * 10, 40 + i % 10, 100 + i));
        }
        Dataset::from_csv_str("chunk.csv", &csv).unwrap()
    }

    fn request(start_row: usize, count: usize) -> ChunkRequest {
        ChunkRequest {
            start_row,
            count,
            reset: false,
        }
    }

    #[test]
    fn test_chunk_returns_ordered_rows() {
        let ds = dataset(20);
        let cache = TraceCache::new(100);
        let resp = load_chunk(&cache, &TraceExtractor::default(), &ds, request(5, 4), 5000).unwrap();

        assert_eq!(resp.count, 4);
        assert_eq!(resp.start_row, 5);
        let rows: Vec<usize> = resp.batch.iter().map(|t| t.row_idx).collect();
        assert_eq!(rows, vec![5, 6, 7, 8]);
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_chunk_boundary() {
        let ds = dataset(10);
        let cache = TraceCache::new(100);
        let ex = TraceExtractor::default();

        let tail = load_chunk(&cache, &ex, &ds, request(7, 500), 5000).unwrap();
        assert_eq!(tail.count, 3);
        assert_eq!(tail.batch.len(), 3);

        let past = load_chunk(&cache, &ex, &ds, request(10, 5), 5000).unwrap();
        assert_eq!(past.count, 0);
        assert!(past.batch.is_empty());

        let far = load_chunk(&cache, &ex, &ds, request(usize::MAX, 5), 5000).unwrap();
        assert_eq!(far.count, 0);
    }

    #[test]
    fn test_chunk_capped_by_max_rows() {
        let ds = dataset(50);
        let cache = TraceCache::new(100);
        let resp = load_chunk(&cache, &TraceExtractor::default(), &ds, request(0, 500), 8).unwrap();
        assert_eq!(resp.count, 8);
        assert_eq!(resp.batch.last().map(|t| t.row_idx), Some(7));
    }

    #[test]
    fn test_reset_flag_passthrough() {
        let ds = dataset(5);
        let cache = TraceCache::new(10);
        let req = ChunkRequest {
            start_row: 0,
            count: 2,
            reset: true,
        };
        assert!(load_chunk(&cache, &TraceExtractor::default(), &ds, req, 5000).unwrap().reset);
    }

    #[test]
    fn test_cached_rows_reused() {
        let ds = dataset(10);
        let cache = TraceCache::new(100);
        let ex = TraceExtractor::default();

        let first = load_chunk(&cache, &ex, &ds, request(0, 5), 5000).unwrap();
        let second = load_chunk(&cache, &ex, &ds, request(0, 5), 5000).unwrap();
        for (a, b) in first.batch.iter().zip(&second.batch) {
            assert!(Arc::ptr_eq(a, b));
        }
    }

    #[test]
    fn test_uncached_still_serves() {
        let ds = dataset(10);
        let cache = TraceCache::new(0);
        let resp = load_chunk(&cache, &TraceExtractor::default(), &ds, request(2, 3), 5000).unwrap();
        assert_eq!(resp.count, 3);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_request_defaults() {
        let req: ChunkRequest = serde_json::from_str(r#"{"start_row": 12}"#).unwrap();
        assert_eq!(req.count, DEFAULT_CHUNK_ROWS);
        assert!(!req.reset);
    }
}
