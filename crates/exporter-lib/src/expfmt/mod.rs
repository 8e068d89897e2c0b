//! Prometheus text exposition codec
//!
//! This module handles both directions of the text format: parsing a scrape
//! response into metric family maps (appending discovery-derived identity
//! labels to every sample) and serializing aggregated family maps back into
//! one exposition stream.
//!
//! Family maps from different endpoints are never key-merged; the final
//! writer concatenates them, so the same family name from two endpoints
//! appears twice, each tagged with its own identity labels.

mod parse;
mod write;


pub use parse::{parse_families, ParseError};
pub use write::{write_metrics, ExpositionError};

use std::collections::HashMap;

/// Content type of the text exposition format.
pub const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Metric type as declared by a `# TYPE` comment line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
    Untyped,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
            MetricKind::Untyped => "untyped",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "counter" => Some(MetricKind::Counter),
            "gauge" => Some(MetricKind::Gauge),
            "histogram" => Some(MetricKind::Histogram),
            "summary" => Some(MetricKind::Summary),
            "untyped" => Some(MetricKind::Untyped),
            _ => None,
        }
    }
}

/// One sample line: full series name (including any `_bucket`/`_sum`/
/// `_count` suffix), its label pairs in order, a value and an optional
/// timestamp in milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
    pub timestamp: Option<i64>,
}

/// A named, typed group of samples.
///
/// For histograms and summaries the samples are the child series
/// (`x_bucket`, `x_sum`, `x_count`, quantile series) grouped under the
/// declared family name.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub kind: MetricKind,
    pub help: Option<String>,
    pub samples: Vec<Sample>,
}

/// Mapping of family name to family, produced independently per scraped
/// endpoint.
pub type MetricFamilyMap = HashMap<String, MetricFamily>;

/// Whether a string is a valid metric or label name
/// (`[a-zA-Z_:][a-zA-Z0-9_:]*`; label names may not contain `:`).
fn valid_name(name: &str, allow_colon: bool) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || (allow_colon && c == ':') => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || (allow_colon && c == ':'))
}
