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

//! Statsd aggregation engine
//!
//! Four typed stores keyed by series fingerprint apply the per-type update
//! rules, and `gather` materializes each entry into one output sample per
//! gathering cycle.

use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use anyhow::Result;
use chrono::Utc;

use crate::config::StatsdConfig;
use crate::model::{FieldValue, MetricValue, ParsedMetric, DEFAULT_FIELD_NAME};
use crate::parser::{ParseError, StatsdParser};
use crate::sinks::Accumulator;

pub mod stats;

use stats::RunningStats;

#[derive(Debug)]
struct CachedCounter {
    name: String,
    tags: HashMap<String, String>,
    fields: HashMap<String, i64>,
}

#[derive(Debug)]
struct CachedGauge {
    name: String,
    tags: HashMap<String, String>,
    fields: HashMap<String, f64>,
}

#[derive(Debug)]
struct CachedSet {
    name: String,
    tags: HashMap<String, String>,
    fields: HashMap<String, HashSet<String>>,
}

#[derive(Debug)]
struct CachedTiming {
    name: String,
    tags: HashMap<String, String>,
    fields: HashMap<String, RunningStats>,
}

/// The parse-and-aggregate engine
///
/// Owns the parser and all four stores. Entries are created lazily on the
/// first observation of a fingerprint and either survive gathers
/// (accumulating semantics) or are cleared afterwards when the per-type
/// delete flag is set.
pub struct Aggregator {
    parser: StatsdParser,
    percentiles: Vec<u32>,
    delete_counters: bool,
    delete_gauges: bool,
    delete_sets: bool,
    delete_timings: bool,
    counters: HashMap<String, CachedCounter>,
    gauges: HashMap<String, CachedGauge>,
    sets: HashMap<String, CachedSet>,
    timings: HashMap<String, CachedTiming>,
}

impl Aggregator {
    pub fn new(config: &StatsdConfig) -> Result<Self> {
        Ok(Self {
            parser: StatsdParser::new(
                &config.metric_separator,
                &config.templates,
                config.parse_data_dog_tags,
            )?,
            percentiles: config.percentiles.clone(),
            delete_counters: config.delete_counters,
            delete_gauges: config.delete_gauges,
            delete_sets: config.delete_sets,
            delete_timings: config.delete_timings,
            counters: HashMap::new(),
            gauges: HashMap::new(),
            sets: HashMap::new(),
            timings: HashMap::new(),
        })
    }

    /// Parse one statsd line and fold every record it yields into the
    /// stores.
    pub fn apply_line(&mut self, line: &str) -> Result<(), ParseError> {
        for metric in self.parser.parse_line(line)? {
            self.record(metric);
        }
        Ok(())
    }

    /// Apply the type-specific update rule for one record.
    pub fn record(&mut self, metric: ParsedMetric) {
        let key = metric.series_key();
        let ParsedMetric {
            name,
            field,
            tags,
            value,
            sample_rate,
        } = metric;

        match value {
            MetricValue::Counter(v) => {
                let entry = self.counters.entry(key).or_insert_with(|| CachedCounter {
                    name,
                    tags,
                    fields: HashMap::new(),
                });
                *entry.fields.entry(field).or_insert(0) += v;
            }
            MetricValue::Gauge { value: v, additive } => {
                let entry = self.gauges.entry(key).or_insert_with(|| CachedGauge {
                    name,
                    tags,
                    fields: HashMap::new(),
                });
                let slot = entry.fields.entry(field).or_insert(0.0);
                if additive {
                    *slot += v;
                } else {
                    *slot = v;
                }
            }
            MetricValue::Set(member) => {
                let entry = self.sets.entry(key).or_insert_with(|| CachedSet {
                    name,
                    tags,
                    fields: HashMap::new(),
                });
                entry.fields.entry(field).or_insert_with(HashSet::new).insert(member);
            }
            MetricValue::Timing(v) => {
                let entry = self.timings.entry(key).or_insert_with(|| CachedTiming {
                    name,
                    tags,
                    fields: HashMap::new(),
                });
                let summary = entry.fields.entry(field).or_default();
                // A sampled timing stands in for round(1/rate) observations.
                let repeat = if sample_rate < 1.0 {
                    (1.0 / sample_rate).round() as usize
                } else {
                    1
                };
                for _ in 0..repeat {
                    summary.add_value(v);
                }
            }
        }
    }

    /// Materialize every store entry into one sample on the accumulator,
    /// then clear the stores whose delete flag is set.
    pub fn gather(&mut self, acc: &mut dyn Accumulator) {
        let now = Utc::now();

        for entry in self.timings.values() {
            let mut fields = HashMap::new();
            for (field_name, summary) in &entry.fields {
                let prefix = if field_name != DEFAULT_FIELD_NAME {
                    format!("{field_name}_")
                } else {
                    String::new()
                };
                fields.insert(format!("{prefix}count"), FieldValue::Int(summary.count()));
                fields.insert(format!("{prefix}lower"), FieldValue::Float(summary.lower()));
                fields.insert(format!("{prefix}upper"), FieldValue::Float(summary.upper()));
                fields.insert(format!("{prefix}mean"), FieldValue::Float(summary.mean()));
                fields.insert(
                    format!("{prefix}stddev"),
                    FieldValue::Float(summary.stddev()),
                );
                for p in &self.percentiles {
                    fields.insert(
                        format!("{prefix}{p}_percentile"),
                        FieldValue::Float(summary.percentile(*p)),
                    );
                }
            }
            acc.add_fields(&entry.name, fields, &entry.tags, now);
        }
        if self.delete_timings {
            self.timings.clear();
        }

        for entry in self.gauges.values() {
            let fields = entry
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), FieldValue::Float(*v)))
                .collect();
            acc.add_fields(&entry.name, fields, &entry.tags, now);
        }
        if self.delete_gauges {
            self.gauges.clear();
        }

        for entry in self.counters.values() {
            let fields = entry
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), FieldValue::Int(*v)))
                .collect();
            acc.add_counter(&entry.name, fields, &entry.tags, now);
        }
        if self.delete_counters {
            self.counters.clear();
        }

        for entry in self.sets.values() {
            let fields = entry
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), FieldValue::Int(v.len() as i64)))
                .collect();
            acc.add_fields(&entry.name, fields, &entry.tags, now);
        }
        if self.delete_sets {
            self.sets.clear();
        }
    }
}
