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

//! Core data model for statsd aggregation
//!
//! Defines the fundamental data structures used throughout STAD for
//! representing parsed statsd records, output field values, and flushed
//! samples.

use ahash::HashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Field name used when a template does not extract one from the bucket.
pub const DEFAULT_FIELD_NAME: &str = "value";

/// Type of statsd metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Accumulating integer counter (`c`)
    Counter,
    /// Last-value-wins float, with optional signed deltas (`g`)
    Gauge,
    /// Distinct-value cardinality (`s`)
    Set,
    /// Distribution summary (`ms` and `h`)
    Timing,
}

impl MetricType {
    /// Tag value recorded on every series under the `metric_type` key.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Set => "set",
            MetricType::Timing => "timing",
        }
    }
}

/// Decoded value of a single statsd record, carrying the metric type
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// Counter delta, already compensated for the sample rate
    Counter(i64),
    /// Gauge assignment, or a signed delta when `additive` is set
    Gauge { value: f64, additive: bool },
    /// Raw set member; no numeric coercion, so `"100"` and `"1e2"` differ
    Set(String),
    /// Single timing observation
    Timing(f64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricType {
        match self {
            MetricValue::Counter(_) => MetricType::Counter,
            MetricValue::Gauge { .. } => MetricType::Gauge,
            MetricValue::Set(_) => MetricType::Set,
            MetricValue::Timing(_) => MetricType::Timing,
        }
    }
}

/// A single decoded statsd record, ready for aggregation
///
/// Produced by the parser from one `bucket:value|type` pair after template
/// application. The `tags` map always contains the `metric_type` tag in
/// addition to inline bucket tags, template-extracted tags, and DataDog
/// tags.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMetric {
    /// Measurement name after template application and separator
    /// normalization
    pub name: String,

    /// Field name extracted by a template, or [`DEFAULT_FIELD_NAME`]
    pub field: String,

    /// Key-value pairs attached to this series
    pub tags: HashMap<String, String>,

    /// Decoded value and metric type
    pub value: MetricValue,

    /// Sample rate from the `@rate` segment; 1.0 when absent or invalid
    pub sample_rate: f64,
}

impl ParsedMetric {
    /// Key under which this record aggregates.
    ///
    /// Tags are serialized as `k=v` pairs in sorted order and the name is
    /// appended, so series identity is independent of tag insertion order.
    /// Since `metric_type` is always among the tags, records of different
    /// types can never share a key.
    pub fn series_key(&self) -> String {
        series_key(&self.name, &self.tags)
    }
}

/// Fingerprint for a measurement name and tag set.
pub fn series_key(name: &str, tags: &HashMap<String, String>) -> String {
    let mut pairs: Vec<String> = tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    let mut key = pairs.concat();
    key.push_str(name);
    key
}

/// Value of a single output field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Integer value (counters, set cardinality, timing counts)
    Int(i64),
    /// Float value (gauges, timing statistics)
    Float(f64),
}

/// One flushed measurement: the flattened field map for a single series at
/// a single gather timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Measurement name
    pub measurement: String,

    /// Flattened fields; timings expand to their statistic fields here
    pub fields: HashMap<String, FieldValue>,

    /// Tags for this series
    pub tags: HashMap<String, String>,

    /// Wall-clock time of the gather that produced this sample
    pub timestamp: DateTime<Utc>,
}
