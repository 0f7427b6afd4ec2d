/*
 * Copyright 2024 ArpNetworking
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Statsd line parsing
//!
//! Decodes one logical statsd line into aggregation-ready records:
//! DataDog tag extraction, multi-value splitting on `:`, per-pair
//! `value|type[|@rate]` decoding, and bucket name parsing (inline tags,
//! template application, separator normalization).

use ahash::{HashMap, HashMapExt};
use anyhow::Result;
use thiserror::Error;
use tracing::debug;

use crate::model::{MetricValue, ParsedMetric, DEFAULT_FIELD_NAME};

pub mod template;

use template::TemplateEngine;

/// Reasons a statsd record is rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Missing `:` between bucket and value, or missing `|` between value
    /// and type
    #[error("malformed statsd line: {0:?}")]
    MalformedLine(String),

    /// Type code outside `c`, `g`, `s`, `ms`, `h`
    #[error("unknown metric type {0:?} in line {1:?}")]
    UnknownType(String, String),

    /// Non-numeric value for a numeric type, or a signed value where signs
    /// are not allowed
    #[error("invalid value {0:?} in line {1:?}")]
    InvalidValue(String, String),
}

/// Parser for the statsd text protocol
pub struct StatsdParser {
    templates: TemplateEngine,
    metric_separator: String,
    parse_datadog_tags: bool,
}

impl StatsdParser {
    pub fn new(
        metric_separator: &str,
        templates: &[String],
        parse_datadog_tags: bool,
    ) -> Result<Self> {
        Ok(Self {
            templates: TemplateEngine::new(templates)?,
            metric_separator: metric_separator.to_string(),
            parse_datadog_tags,
        })
    }

    /// Parse one logical line into its records.
    ///
    /// A line is `bucket:value|type[|@rate]` with any number of additional
    /// `:value|type[|@rate]` pairs sharing the bucket. Rejecting any pair
    /// rejects the whole line; nothing is returned partially.
    pub fn parse_line(&self, line: &str) -> Result<Vec<ParsedMetric>, ParseError> {
        // DataDog tags are stripped from the whole line before the colon
        // split: their values may legally contain ':'.
        let mut line_tags: HashMap<String, String> = HashMap::new();
        let stripped;
        let line = if self.parse_datadog_tags {
            let mut kept: Vec<&str> = Vec::new();
            for segment in line.split('|') {
                match segment.strip_prefix('#') {
                    Some(tag_list) => {
                        for spec in tag_list.split(',') {
                            let (key, value) = spec.split_once(':').unwrap_or((spec, ""));
                            if !key.is_empty() {
                                line_tags.insert(key.to_string(), value.to_string());
                            }
                        }
                    }
                    None => kept.push(segment),
                }
            }
            stripped = kept.join("|");
            stripped.as_str()
        } else {
            line
        };

        let mut pieces = line.split(':');
        let bucket = pieces.next().unwrap_or_default();
        let pairs: Vec<&str> = pieces.collect();
        if pairs.is_empty() {
            return Err(ParseError::MalformedLine(line.to_string()));
        }

        let (name, field, tags) = self.parse_name(bucket);

        let mut metrics = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let mut metric = parse_pair(pair, line, &name, &field, &tags)?;
            for (key, value) in &line_tags {
                metric.tags.insert(key.clone(), value.clone());
            }
            metrics.push(metric);
        }
        Ok(metrics)
    }

    /// Parse a bucket into measurement name, field name, and tags.
    ///
    /// The bucket may carry inline `,k=v` tags. Templates then decompose
    /// the remaining dotted path; finally `.` is replaced with the
    /// configured metric separator in the rendered name.
    pub fn parse_name(&self, bucket: &str) -> (String, String, HashMap<String, String>) {
        let mut tags = HashMap::new();
        let mut segments = bucket.split(',');
        let bucket_name = segments.next().unwrap_or_default();
        for segment in segments {
            let (key, value) = parse_key_value(segment);
            if !key.is_empty() {
                tags.insert(key.to_string(), value.to_string());
            }
        }

        let (mut name, field) = self.templates.apply(bucket_name, &mut tags);
        if !self.metric_separator.is_empty() {
            name = name.replace('.', &self.metric_separator);
        }
        let field = if field.is_empty() {
            DEFAULT_FIELD_NAME.to_string()
        } else {
            field
        };
        (name, field, tags)
    }
}

/// Decode one `value|type[|@rate]` pair.
fn parse_pair(
    pair: &str,
    line: &str,
    name: &str,
    field: &str,
    tags: &HashMap<String, String>,
) -> Result<ParsedMetric, ParseError> {
    let segments: Vec<&str> = pair.split('|').collect();
    if segments.len() < 2 {
        return Err(ParseError::MalformedLine(line.to_string()));
    }
    let value_str = segments[0];
    let type_code = segments[1];

    // Only the third segment is consulted for a sample rate; a bad one is
    // dropped to 1.0 rather than rejecting the record.
    let mut sample_rate = 1.0;
    if segments.len() > 2 {
        let candidate = segments[2]
            .strip_prefix('@')
            .and_then(|r| r.parse::<f64>().ok())
            .filter(|r| *r > 0.0);
        match candidate {
            Some(rate) => sample_rate = rate,
            None => debug!(segment = segments[2], line, "ignoring invalid sample rate"),
        }
    }

    // A leading sign is a delta marker, valid for gauges and counters only.
    let signed = value_str.starts_with('+') || value_str.starts_with('-');

    let value = match type_code {
        "g" => MetricValue::Gauge {
            value: parse_float(value_str, line)?,
            additive: signed,
        },
        "ms" | "h" | "s" if signed => {
            return Err(ParseError::InvalidValue(
                value_str.to_string(),
                line.to_string(),
            ))
        }
        "ms" | "h" => MetricValue::Timing(parse_float(value_str, line)?),
        "s" => MetricValue::Set(value_str.to_string()),
        "c" => {
            let v = match value_str.parse::<i64>() {
                Ok(v) => v,
                Err(_) => parse_float(value_str, line)? as i64,
            };
            let v = if sample_rate != 1.0 {
                (v as f64 / sample_rate).round() as i64
            } else {
                v
            };
            MetricValue::Counter(v)
        }
        _ => {
            return Err(ParseError::UnknownType(
                type_code.to_string(),
                line.to_string(),
            ))
        }
    };

    let mut tags = tags.clone();
    tags.insert(
        "metric_type".to_string(),
        value.kind().as_str().to_string(),
    );

    Ok(ParsedMetric {
        name: name.to_string(),
        field: field.to_string(),
        tags,
        value,
        sample_rate,
    })
}

fn parse_float(value: &str, line: &str) -> Result<f64, ParseError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ParseError::InvalidValue(value.to_string(), line.to_string()))
}

/// Split an inline bucket tag. `"foo=bar"` yields `("foo", "bar")`; a
/// segment without `=` yields an empty key, which the caller drops.
pub fn parse_key_value(segment: &str) -> (&str, &str) {
    let pieces: Vec<&str> = segment.split('=').collect();
    match pieces.as_slice() {
        [key, value] => (key, value),
        [value] => ("", value),
        _ => ("", ""),
    }
}
