//! Dataset Store
//!
//! Loads recorded orderbook CSV files into immutable, column-oriented tables and
//! memoizes them per filename for the process lifetime.
//!
//! - Columns are typed once at load time (numeric vs. text).
//! - Missing / NaN cells are `None`, never an error.
//! - First loads are serialized; reads of already-loaded datasets only take a
//!   shared lock.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::error::{PlaybackError, PlaybackResult};
use super::timeline::CumulativeTimeline;

/// Numeric epoch-millisecond timestamp column.
pub const TIMESTAMP_MS_COLUMN: &str = "timestamp_ms";

/// Human-readable timestamp columns, in lookup order.
pub const TIMESTAMP_LABEL_COLUMNS: [&str; 2] = ["timestamp_et", "timestamp"];

const MISSING_TOKENS: [&str; 6] = ["nan", "NaN", "NAN", "null", "None", "N/A"];

// ============================================================================
// Dataset
// ============================================================================

/// A single typed column.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl Column {
    fn len(&self) -> usize {
        match self {
            Self::Numeric(v) => v.len(),
            Self::Text(v) => v.len(),
        }
    }
}

/// Immutable in-memory table for one recorded session.
#[derive(Debug)]
pub struct Dataset {
    id: Arc<str>,
    names: Vec<String>,
    index: HashMap<String, usize>,
    columns: Vec<Column>,
    rows: usize,
    fingerprint: String,
    timeline: CumulativeTimeline,
}

impl Dataset {
    /// Parse CSV bytes. The fingerprint is the SHA-256 of the raw bytes.
    pub fn from_csv_bytes(id: &str, bytes: &[u8]) -> PlaybackResult<Self> {
        let load_err = |reason: String| PlaybackError::DatasetLoad {
            filename: id.to_string(),
            reason,
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes);

        let names: Vec<String> = reader
            .headers()
            .map_err(|e| load_err(e.to_string()))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut raw: Vec<Vec<Option<String>>> = vec![Vec::new(); names.len()];
        for record in reader.records() {
            let record = record.map_err(|e| load_err(e.to_string()))?;
            for (col, cells) in raw.iter_mut().enumerate() {
                cells.push(record.get(col).and_then(normalize_cell));
            }
        }

        let columns = names
            .iter()
            .zip(raw)
            .map(|(name, cells)| infer_column(id, name, cells))
            .collect();

        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let fingerprint = hex::encode(hasher.finalize());

        Self::from_columns(id, names, columns, fingerprint)
    }

    /// Convenience for fixtures and tools.
    pub fn from_csv_str(id: &str, text: &str) -> PlaybackResult<Self> {
        Self::from_csv_bytes(id, text.as_bytes())
    }

    /// Assemble a dataset from already-typed columns. All columns must have equal length.
    pub fn from_columns(
        id: &str,
        names: Vec<String>,
        columns: Vec<Column>,
        fingerprint: String,
    ) -> PlaybackResult<Self> {
        if names.len() != columns.len() {
            return Err(PlaybackError::DatasetLoad {
                filename: id.to_string(),
                reason: format!("{} names for {} columns", names.len(), columns.len()),
            });
        }
        let rows = columns.first().map(Column::len).unwrap_or(0);
        if let Some(bad) = columns.iter().position(|c| c.len() != rows) {
            return Err(PlaybackError::DatasetLoad {
                filename: id.to_string(),
                reason: format!("column {} has a different length", names[bad]),
            });
        }

        // First occurrence wins on duplicate headers.
        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            index.entry(name.clone()).or_insert(i);
        }

        let mut dataset = Self {
            id: Arc::from(id),
            names,
            index,
            columns,
            rows,
            fingerprint,
            timeline: CumulativeTimeline::default(),
        };
        dataset.timeline = CumulativeTimeline::build(&dataset.raw_timestamps_ms());
        Ok(dataset)
    }

    pub fn id(&self) -> &Arc<str> {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn column_count(&self) -> usize {
        self.names.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn timeline(&self) -> &CumulativeTimeline {
        &self.timeline
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.index.get(name).map(|&i| &self.columns[i])
    }

    /// Numeric value of a cell; `None` for absent cells, text columns, unknown
    /// columns and out-of-range rows.
    pub fn number(&self, column: &str, row: usize) -> Option<f64> {
        match self.column(column)? {
            Column::Numeric(values) => values.get(row).copied().flatten(),
            Column::Text(_) => None,
        }
    }

    /// Display form of a cell.
    pub fn label(&self, column: &str, row: usize) -> Option<String> {
        match self.column(column)? {
            Column::Numeric(values) => values.get(row).copied().flatten().map(format_number),
            Column::Text(values) => values.get(row).cloned().flatten(),
        }
    }

    /// Timestamp shown in chart titles: the readable column first, then epoch ms.
    pub fn timestamp_label(&self, row: usize) -> String {
        TIMESTAMP_LABEL_COLUMNS
            .iter()
            .chain(std::iter::once(&TIMESTAMP_MS_COLUMN))
            .find_map(|col| self.label(col, row))
            .unwrap_or_else(|| "N/A".to_string())
    }

    /// Raw per-row timestamps in epoch milliseconds.
    ///
    /// Prefers `timestamp_ms`; falls back to parsing a readable timestamp column.
    /// Rows without a usable timestamp yield `None`.
    pub fn raw_timestamps_ms(&self) -> Vec<Option<f64>> {
        if let Some(Column::Numeric(values)) = self.column(TIMESTAMP_MS_COLUMN) {
            return values.clone();
        }
        for name in TIMESTAMP_LABEL_COLUMNS {
            if let Some(Column::Text(values)) = self.column(name) {
                return values
                    .iter()
                    .map(|v| v.as_deref().and_then(parse_timestamp_ms))
                    .collect();
            }
        }
        vec![None; self.rows]
    }

    pub fn info(&self) -> DatasetInfo {
        let last = self.rows.saturating_sub(1);
        DatasetInfo {
            filename: self.id.to_string(),
            rows: self.rows,
            columns: self.names.len(),
            time_start: if self.rows > 0 {
                self.timestamp_label(0)
            } else {
                "N/A".to_string()
            },
            time_end: if self.rows > 0 {
                self.timestamp_label(last)
            } else {
                "N/A".to_string()
            },
            duration_ms: self.timeline.total_ms(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}

/// Summary shown in the file info panel.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DatasetInfo {
    pub filename: String,
    pub rows: usize,
    pub columns: usize,
    pub time_start: String,
    pub time_end: String,
    pub duration_ms: f64,
    pub fingerprint: String,
}

fn normalize_cell(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || MISSING_TOKENS.contains(&trimmed) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_number(cell: &str) -> Option<f64> {
    fast_float::parse::<f64, _>(cell).ok()
}

/// Numeric when most present cells parse. Stray unparseable cells and
/// non-finite values become absent.
fn infer_column(dataset: &str, name: &str, cells: Vec<Option<String>>) -> Column {
    let present = cells.iter().flatten().count();
    let parsed = cells
        .iter()
        .flatten()
        .filter(|cell| parse_number(cell).is_some())
        .count();

    if present > 0 && parsed * 2 <= present {
        return Column::Text(cells);
    }
    if parsed < present {
        debug!(
            dataset,
            column = %name,
            stray = present - parsed,
            "Unparseable cells in numeric column treated as missing"
        );
    }
    Column::Numeric(
        cells
            .iter()
            .map(|c| c.as_deref().and_then(parse_number).filter(|v| v.is_finite()))
            .collect(),
    )
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// Parse a readable timestamp into epoch milliseconds.
pub fn parse_timestamp_ms(s: &str) -> Option<f64> {
    use chrono::{DateTime, NaiveDateTime};

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis() as f64);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.timestamp_millis() as f64);
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc().timestamp_millis() as f64);
        }
    }
    None
}

// ============================================================================
// Store
// ============================================================================

/// Memoizing loader keyed by filename.
pub struct DatasetStore {
    data_dir: PathBuf,
    loaded: RwLock<HashMap<String, Arc<Dataset>>>,
    load_lock: Mutex<()>,
}

impl DatasetStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            loaded: RwLock::new(HashMap::new()),
            load_lock: Mutex::new(()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get a dataset, loading it from disk on first reference.
    pub fn get(&self, filename: &str) -> PlaybackResult<Arc<Dataset>> {
        validate_filename(filename)?;

        if let Some(ds) = self.loaded.read().get(filename) {
            return Ok(ds.clone());
        }

        let _guard = self.load_lock.lock();
        // Another request may have finished the load while we waited.
        if let Some(ds) = self.loaded.read().get(filename) {
            return Ok(ds.clone());
        }

        let path = self.data_dir.join(filename);
        let start = Instant::now();
        let bytes = std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PlaybackError::DatasetNotFound(filename.to_string()),
            _ => PlaybackError::DatasetLoad {
                filename: filename.to_string(),
                reason: e.to_string(),
            },
        })?;
        let dataset = Arc::new(Dataset::from_csv_bytes(filename, &bytes)?);

        info!(
            filename,
            rows = dataset.len(),
            columns = dataset.column_count(),
            load_ms = start.elapsed().as_millis() as u64,
            "Dataset loaded"
        );

        self.loaded
            .write()
            .insert(filename.to_string(), dataset.clone());
        Ok(dataset)
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.read().len()
    }

    /// Sorted list of CSV files in the data directory.
    pub fn list_files(&self) -> std::io::Result<Vec<String>> {
        let mut files: Vec<String> = std::fs::read_dir(&self.data_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.ends_with(".csv"))
            .collect();
        files.sort();
        Ok(files)
    }
}

/// Only plain `*.csv` names inside the data directory are accepted.
pub fn validate_filename(filename: &str) -> PlaybackResult<()> {
    let bad = filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains("..")
        || !filename.ends_with(".csv");
    if bad {
        return Err(PlaybackError::InvalidDatasetName(filename.to_string()));
    }
    Ok(())
}
