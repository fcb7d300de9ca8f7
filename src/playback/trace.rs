//! Trace Extractor
//!
//! Projects one dataset row into the render-ready payload consumed by the
//! dashboard's orderbook and BTC/lag charts. Pure function of `(dataset, row)`.

use serde::{Deserialize, Serialize};

use super::dataset::Dataset;
use super::error::{PlaybackError, PlaybackResult};

/// Levels per side per book.
pub const BOOK_DEPTH: usize = 5;

/// Multiplier of the mean order size above which a level is flagged.
pub const ANOMALY_MULTIPLIER: f64 = 2.0;

/// The two correlated books shown side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Book {
    Up,
    Down,
}

impl Book {
    fn prefix(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    fn prefix(self) -> &'static str {
        match self {
            Self::Bid => "bid",
            Self::Ask => "ask",
        }
    }

    /// Bids render to the left (negative), asks to the right.
    fn sign(self) -> f64 {
        match self {
            Self::Bid => -1.0,
            Self::Ask => 1.0,
        }
    }
}

/// Column name for one book level, e.g. `up_bid_1_price`.
pub fn level_column(book: Book, side: Side, level: usize, field: &str) -> String {
    format!("{}_{}_{}_{}", book.prefix(), side.prefix(), level, field)
}

// ============================================================================
// Payload types
// ============================================================================

/// Colour classification of one bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarColor {
    Normal,
    Anomalous,
}

/// One side of one book, five bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideBars {
    /// Price labels (`"0.52"` or `"N/A"`).
    pub y: Vec<String>,
    /// Signed, scaled magnitudes.
    pub x: Vec<f64>,
    /// Size text (`"$1,250"` or empty).
    pub text: Vec<String>,
    pub colors: Vec<BarColor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PressureSide {
    Buyers,
    Sellers,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pressure {
    pub classification: PressureSide,
    pub bid_total: f64,
    pub ask_total: f64,
}

impl Pressure {
    /// Ties classify as sellers (`bid_total > ask_total` is required for buyers).
    pub fn from_sizes(bid_sizes: &[Option<f64>], ask_sizes: &[Option<f64>]) -> Self {
        let bid_total: f64 = bid_sizes.iter().flatten().sum();
        let ask_total: f64 = ask_sizes.iter().flatten().sum();
        let classification = if bid_total > ask_total {
            PressureSide::Buyers
        } else {
            PressureSide::Sellers
        };
        Self {
            classification,
            bid_total,
            ask_total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookTrace {
    pub bids: SideBars,
    pub asks: SideBars,
    pub pressure: Pressure,
}

/// Single-point marker. Both vectors are empty when the value is absent,
/// meaning "nothing to draw".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub x: Vec<usize>,
    pub y: Vec<f64>,
}

impl Marker {
    fn at(row: usize, value: Option<f64>) -> Self {
        match value {
            Some(v) => Self {
                x: vec![row],
                y: vec![v],
            },
            None => Self::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Markers {
    pub up_ask_price: Marker,
    pub down_ask_price: Marker,
    pub binance_price: Marker,
    pub oracle_price: Marker,
    pub lag: Marker,
}

/// Render-ready projection of one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceData {
    pub row_idx: usize,
    pub timestamp: String,
    pub up: BookTrace,
    pub down: BookTrace,
    pub markers: Markers,
}

// ============================================================================
// Extraction
// ============================================================================

/// Raw level values for one side of one book.
#[derive(Debug, Clone, Default)]
struct RawSide {
    prices: [Option<f64>; BOOK_DEPTH],
    sizes: [Option<f64>; BOOK_DEPTH],
}

impl RawSide {
    fn read(dataset: &Dataset, row: usize, book: Book, side: Side) -> Self {
        let mut raw = Self::default();
        for level in 0..BOOK_DEPTH {
            raw.prices[level] = dataset.number(&level_column(book, side, level + 1, "price"), row);
            raw.sizes[level] = dataset.number(&level_column(book, side, level + 1, "size"), row);
        }
        raw
    }
}

/// Extractor configured with the display scale of the bar charts.
#[derive(Debug, Clone, Copy)]
pub struct TraceExtractor {
    bar_scale_coeff: f64,
}

impl Default for TraceExtractor {
    fn default() -> Self {
        Self {
            bar_scale_coeff: 1.0,
        }
    }
}

impl TraceExtractor {
    pub fn new(bar_scale_coeff: f64) -> Self {
        Self { bar_scale_coeff }
    }

    pub fn bar_scale_coeff(&self) -> f64 {
        self.bar_scale_coeff
    }

    /// Project row `row` of `dataset`. Fails only for rows outside `[0, len)`.
    pub fn extract(&self, dataset: &Dataset, row: usize) -> PlaybackResult<TraceData> {
        if row >= dataset.len() {
            return Err(PlaybackError::RowOutOfRange {
                row,
                len: dataset.len(),
            });
        }

        let up_bids = RawSide::read(dataset, row, Book::Up, Side::Bid);
        let up_asks = RawSide::read(dataset, row, Book::Up, Side::Ask);
        let down_bids = RawSide::read(dataset, row, Book::Down, Side::Bid);
        let down_asks = RawSide::read(dataset, row, Book::Down, Side::Ask);

        // One threshold across both books and both sides.
        let threshold = anomaly_threshold(
            [&up_bids, &up_asks, &down_bids, &down_asks]
                .into_iter()
                .flat_map(|side| side.sizes.iter().copied()),
        );

        let marker = |column: &str| Marker::at(row, dataset.number(column, row));

        Ok(TraceData {
            row_idx: row,
            timestamp: dataset.timestamp_label(row),
            up: self.book_trace(&up_bids, &up_asks, threshold),
            down: self.book_trace(&down_bids, &down_asks, threshold),
            markers: Markers {
                up_ask_price: marker("up_ask_1_price"),
                down_ask_price: marker("down_ask_1_price"),
                binance_price: marker("binance_btc_price"),
                oracle_price: marker("oracle_btc_price"),
                lag: marker("lag"),
            },
        })
    }

    fn book_trace(&self, bids: &RawSide, asks: &RawSide, threshold: f64) -> BookTrace {
        BookTrace {
            bids: self.side_bars(bids, Side::Bid, threshold),
            asks: self.side_bars(asks, Side::Ask, threshold),
            pressure: Pressure::from_sizes(&bids.sizes, &asks.sizes),
        }
    }

    fn side_bars(&self, raw: &RawSide, side: Side, threshold: f64) -> SideBars {
        SideBars {
            y: raw
                .prices
                .iter()
                .map(|p| match p {
                    Some(p) => format!("{:.2}", p),
                    None => "N/A".to_string(),
                })
                .collect(),
            x: raw
                .sizes
                .iter()
                .map(|s| match s {
                    Some(s) => side.sign() * s.abs() * self.bar_scale_coeff,
                    None => 0.0,
                })
                .collect(),
            text: raw
                .sizes
                .iter()
                .map(|s| s.map(format_usd).unwrap_or_default())
                .collect(),
            colors: raw
                .sizes
                .iter()
                .map(|s| match s {
                    Some(s) if *s > threshold => BarColor::Anomalous,
                    _ => BarColor::Normal,
                })
                .collect(),
        }
    }
}

/// `2 × mean` of the present, strictly positive sizes; `+inf` when there are none.
pub fn anomaly_threshold(sizes: impl IntoIterator<Item = Option<f64>>) -> f64 {
    let (sum, count) = sizes
        .into_iter()
        .flatten()
        .filter(|s| *s > 0.0)
        .fold((0.0_f64, 0usize), |(sum, n), s| (sum + s, n + 1));
    if count == 0 {
        f64::INFINITY
    } else {
        sum / count as f64 * ANOMALY_MULTIPLIER
    }
}

/// `$1,234` style: rounded to whole units with thousands separators.
pub fn format_usd(value: f64) -> String {
    let rounded = format!("{:.0}", value.abs());
    let mut grouped = String::with_capacity(rounded.len() + rounded.len() / 3 + 2);
    for (i, ch) in rounded.chars().enumerate() {
        if i > 0 && (rounded.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if value < 0.0 && rounded != "0" {
        format!("$-{}", grouped)
    } else {
        format!("${}", grouped)
    }
}
