//! Text exposition parsing
//!
//! Parses `# HELP` / `# TYPE` comment lines and `name{labels} value
//! [timestamp]` sample lines. Any malformed line fails the whole document;
//! the pipeline treats that as a per-endpoint failure and drops the
//! endpoint's contribution.

use super::{MetricFamily, MetricFamilyMap, MetricKind, Sample};
use crate::models::Identity;
use thiserror::Error;

/// Label names attached to every parsed sample.
const NAMESPACE_LABEL: &str = "namespace";
const APP_LABEL: &str = "app";
const INSTANCE_ID_LABEL: &str = "instanceId";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line {line}: invalid metric name")]
    InvalidMetricName { line: usize },
    #[error("line {line}: malformed label set")]
    MalformedLabels { line: usize },
    #[error("line {line}: invalid sample value {value:?}")]
    InvalidValue { line: usize, value: String },
    #[error("line {line}: invalid timestamp {value:?}")]
    InvalidTimestamp { line: usize, value: String },
    #[error("line {line}: unknown metric type {token:?}")]
    UnknownType { line: usize, token: String },
    #[error("line {line}: trailing text after sample")]
    TrailingText { line: usize },
}

/// Parse a scrape response body into a metric family map, appending the
/// endpoint's identity labels (`namespace`, `app`, `instanceId`) to every
/// sample of every family.
pub fn parse_families(body: &str, identity: &Identity) -> Result<MetricFamilyMap, ParseError> {
    let mut families = MetricFamilyMap::new();

    for (idx, raw) in body.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(comment) = line.strip_prefix('#') {
            parse_comment(comment.trim_start(), line_no, &mut families)?;
            continue;
        }

        let sample = parse_sample_line(line, line_no)?;
        let family_name = family_for(&sample.name, &families);
        families
            .entry(family_name.clone())
            .or_insert_with(|| MetricFamily {
                name: family_name,
                kind: MetricKind::Untyped,
                help: None,
                samples: Vec::new(),
            })
            .samples
            .push(sample);
    }

    for family in families.values_mut() {
        for sample in &mut family.samples {
            sample
                .labels
                .push((NAMESPACE_LABEL.to_string(), identity.namespace.clone()));
            sample
                .labels
                .push((APP_LABEL.to_string(), identity.name.clone()));
            if let Some(id) = &identity.instance_id {
                sample
                    .labels
                    .push((INSTANCE_ID_LABEL.to_string(), id.clone()));
            }
        }
    }

    Ok(families)
}

/// Resolve which family a series belongs to. Histogram and summary child
/// series (`x_bucket`, `x_sum`, `x_count`) are grouped under the family
/// declared by their `# TYPE` line; everything else is its own family.
fn family_for(series: &str, families: &MetricFamilyMap) -> String {
    for suffix in ["_bucket", "_sum", "_count"] {
        if let Some(base) = series.strip_suffix(suffix) {
            if let Some(family) = families.get(base) {
                if matches!(family.kind, MetricKind::Histogram | MetricKind::Summary) {
                    return base.to_string();
                }
            }
        }
    }
    series.to_string()
}

/// Handle one comment line (without the leading `#`). `HELP` and `TYPE`
/// create or annotate a family; any other comment is ignored.
fn parse_comment(
    comment: &str,
    line_no: usize,
    families: &mut MetricFamilyMap,
) -> Result<(), ParseError> {
    let (keyword, rest) = split_token(comment);
    match keyword {
        "HELP" => {
            let (name, help) = split_token(rest);
            if !super::valid_name(name, true) {
                return Err(ParseError::InvalidMetricName { line: line_no });
            }
            family_entry(families, name).help = Some(unescape_help(help));
        }
        "TYPE" => {
            let (name, token) = split_token(rest);
            if !super::valid_name(name, true) {
                return Err(ParseError::InvalidMetricName { line: line_no });
            }
            let kind = MetricKind::from_token(token).ok_or_else(|| ParseError::UnknownType {
                line: line_no,
                token: token.to_string(),
            })?;
            family_entry(families, name).kind = kind;
        }
        _ => {}
    }
    Ok(())
}

fn family_entry<'a>(families: &'a mut MetricFamilyMap, name: &str) -> &'a mut MetricFamily {
    families
        .entry(name.to_string())
        .or_insert_with(|| MetricFamily {
            name: name.to_string(),
            kind: MetricKind::Untyped,
            help: None,
            samples: Vec::new(),
        })
}

/// Split off the first whitespace-delimited token, returning it and the
/// trimmed remainder.
fn split_token(s: &str) -> (&str, &str) {
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

fn parse_sample_line(line: &str, line_no: usize) -> Result<Sample, ParseError> {
    let name_end = line
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == ':'))
        .unwrap_or(line.len());
    let name = &line[..name_end];
    if !super::valid_name(name, true) {
        return Err(ParseError::InvalidMetricName { line: line_no });
    }

    let mut rest = line[name_end..].trim_start();
    let mut labels = Vec::new();
    if rest.starts_with('{') {
        let (parsed, remainder) = parse_labels(rest, line_no)?;
        labels = parsed;
        rest = remainder.trim_start();
    }

    let (value_token, rest) = split_token(rest);
    let value = value_token
        .parse::<f64>()
        .map_err(|_| ParseError::InvalidValue {
            line: line_no,
            value: value_token.to_string(),
        })?;

    let (ts_token, rest) = split_token(rest);
    let timestamp = if ts_token.is_empty() {
        None
    } else {
        Some(
            ts_token
                .parse::<i64>()
                .map_err(|_| ParseError::InvalidTimestamp {
                    line: line_no,
                    value: ts_token.to_string(),
                })?,
        )
    };

    if !rest.is_empty() {
        return Err(ParseError::TrailingText { line: line_no });
    }

    Ok(Sample {
        name: name.to_string(),
        labels,
        value,
        timestamp,
    })
}

/// Parse a `{name="value",...}` label set, returning the pairs and the
/// remainder of the line after the closing brace.
fn parse_labels(s: &str, line_no: usize) -> Result<(Vec<(String, String)>, &str), ParseError> {
    let malformed = || ParseError::MalformedLabels { line: line_no };
    let bytes = s.as_bytes();
    let mut labels = Vec::new();
    let mut i = 1; // past '{'

    loop {
        while i < bytes.len() && (bytes[i] == b',' || bytes[i].is_ascii_whitespace()) {
            i += 1;
        }
        if i >= bytes.len() {
            return Err(malformed());
        }
        if bytes[i] == b'}' {
            return Ok((labels, &s[i + 1..]));
        }

        let name_start = i;
        while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
            i += 1;
        }
        let name = &s[name_start..i];
        if !super::valid_name(name, false) {
            return Err(malformed());
        }

        if i >= bytes.len() || bytes[i] != b'=' {
            return Err(malformed());
        }
        i += 1;
        if i >= bytes.len() || bytes[i] != b'"' {
            return Err(malformed());
        }
        i += 1;

        let mut value = String::new();
        loop {
            let c = s[i..].chars().next().ok_or_else(malformed)?;
            match c {
                '"' => {
                    i += 1;
                    break;
                }
                '\\' => {
                    i += 1;
                    let escaped = s[i..].chars().next().ok_or_else(malformed)?;
                    match escaped {
                        'n' => value.push('\n'),
                        '\\' => value.push('\\'),
                        '"' => value.push('"'),
                        _ => return Err(malformed()),
                    }
                    i += escaped.len_utf8();
                }
                _ => {
                    value.push(c);
                    i += c.len_utf8();
                }
            }
        }

        labels.push((name.to_string(), value));
    }
}

/// Undo `\\` and `\n` escaping in HELP text.
fn unescape_help(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}
