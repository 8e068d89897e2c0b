//! Text exposition serialization
//!
//! Concatenates every family from every input map into one exposition
//! stream. Unlike the parsing stages, which drop bad inputs per endpoint,
//! an encode failure here aborts the whole write: a successfully parsed
//! family is expected to always encode.

use super::{MetricFamily, MetricFamilyMap};
use std::fmt::Write as _;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExpositionError {
    #[error("invalid metric family name {0:?}")]
    InvalidMetricName(String),
    #[error("invalid label name {label:?} in family {family:?}")]
    InvalidLabelName { family: String, label: String },
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
}

/// Serialize the aggregated family maps into `w`, returning the number of
/// bytes written. Iteration order across maps and within a map is not
/// stable and no consumer of the format requires it to be.
pub fn write_metrics<W: io::Write>(
    w: &mut W,
    maps: &[MetricFamilyMap],
) -> Result<usize, ExpositionError> {
    let mut buf = String::new();
    for map in maps {
        for family in map.values() {
            encode_family(&mut buf, family)?;
        }
    }

    w.write_all(buf.as_bytes())?;
    Ok(buf.len())
}

fn encode_family(buf: &mut String, family: &MetricFamily) -> Result<(), ExpositionError> {
    if !super::valid_name(&family.name, true) {
        return Err(ExpositionError::InvalidMetricName(family.name.clone()));
    }

    if let Some(help) = &family.help {
        let _ = writeln!(buf, "# HELP {} {}", family.name, escape_help(help));
    }
    let _ = writeln!(buf, "# TYPE {} {}", family.name, family.kind.as_str());

    for sample in &family.samples {
        buf.push_str(&sample.name);
        if !sample.labels.is_empty() {
            buf.push('{');
            for (i, (name, value)) in sample.labels.iter().enumerate() {
                if !super::valid_name(name, false) {
                    return Err(ExpositionError::InvalidLabelName {
                        family: family.name.clone(),
                        label: name.clone(),
                    });
                }
                if i > 0 {
                    buf.push(',');
                }
                let _ = write!(buf, "{}=\"{}\"", name, escape_label_value(value));
            }
            buf.push('}');
        }
        buf.push(' ');
        buf.push_str(&format_value(sample.value));
        if let Some(ts) = sample.timestamp {
            let _ = write!(buf, " {ts}");
        }
        buf.push('\n');
    }

    Ok(())
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        format!("{value}")
    }
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}
