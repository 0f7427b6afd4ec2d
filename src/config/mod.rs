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

//! Configuration parsing
//!
//! JSON configuration with camelCase keys, per-field defaults, and
//! ISO-8601 durations.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main STAD configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StadConfig {
    /// Statsd engine options
    #[serde(default)]
    pub statsd: StatsdConfig,

    /// How often aggregated state is gathered and pushed to the sinks
    #[serde(default = "default_flush_interval", with = "duration_serde")]
    pub flush_interval: Duration,

    /// Output sinks; when empty, a druid sink on stdout is used
    #[serde(default)]
    pub sinks: Vec<SinkSpec>,
}

/// Statsd engine options
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsdConfig {
    /// UDP bind address for the listener
    #[serde(default = "default_service_address")]
    pub service_address: String,

    /// Capacity of the datagram channel between listener and drain;
    /// datagrams arriving while it is full are dropped
    #[serde(default = "default_allowed_pending_messages")]
    pub allowed_pending_messages: usize,

    /// Replacement for `.` in rendered measurement names
    #[serde(default = "default_metric_separator")]
    pub metric_separator: String,

    /// Ordered list of `[filter] layout` bucket templates
    #[serde(default)]
    pub templates: Vec<String>,

    /// Percentiles emitted for timing metrics
    #[serde(default)]
    pub percentiles: Vec<u32>,

    /// Enable `|#k:v,...` DataDog tag parsing
    #[serde(default)]
    pub parse_data_dog_tags: bool,

    /// Clear the counter store after each gather
    #[serde(default)]
    pub delete_counters: bool,

    /// Clear the gauge store after each gather
    #[serde(default)]
    pub delete_gauges: bool,

    /// Clear the set store after each gather
    #[serde(default)]
    pub delete_sets: bool,

    /// Clear the timing store after each gather
    #[serde(default)]
    pub delete_timings: bool,
}

/// Sink configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkSpec {
    /// Druid JSON lines to a file, or stdout when no path is given
    Druid {
        #[serde(default)]
        path: Option<PathBuf>,
    },
}

impl StadConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_json(&contents)
    }

    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse configuration")
    }
}

impl Default for StadConfig {
    fn default() -> Self {
        Self {
            statsd: StatsdConfig::default(),
            flush_interval: default_flush_interval(),
            sinks: Vec::new(),
        }
    }
}

impl Default for StatsdConfig {
    fn default() -> Self {
        Self {
            service_address: default_service_address(),
            allowed_pending_messages: default_allowed_pending_messages(),
            metric_separator: default_metric_separator(),
            templates: Vec::new(),
            percentiles: Vec::new(),
            parse_data_dog_tags: false,
            delete_counters: false,
            delete_gauges: false,
            delete_sets: false,
            delete_timings: false,
        }
    }
}

// Default value functions
fn default_service_address() -> String {
    "127.0.0.1:8125".to_string()
}

fn default_allowed_pending_messages() -> usize {
    10000
}

fn default_metric_separator() -> String {
    "_".to_string()
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(10)
}

// Duration serialization helpers
mod duration_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // ISO-8601 duration format (PT10S)
        let seconds = duration.as_secs_f64();
        let iso_duration = format!("PT{}S", seconds);
        serializer.serialize_str(&iso_duration)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        if s.starts_with("PT") && s.ends_with('S') {
            let seconds_str = &s[2..s.len() - 1];
            let seconds: f64 = seconds_str.parse().map_err(serde::de::Error::custom)?;
            Ok(Duration::from_secs_f64(seconds))
        } else {
            Err(serde::de::Error::custom(format!(
                "Invalid duration format: {}",
                s
            )))
        }
    }
}
