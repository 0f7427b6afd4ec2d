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

//! Metric sinks for outputting gathered samples to various destinations
//!
//! The gather path materializes store entries through the [`Accumulator`]
//! contract; sinks receive the finalized samples and forward them to
//! external systems.

use ahash::HashMap;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{FieldValue, Sample};

pub mod druid;

/// Receiver for samples materialized during a gather
///
/// The sink side is assumed lossless; backpressure from the sink is not
/// modeled.
pub trait Accumulator {
    /// Record one sample for a measurement.
    fn add_fields(
        &mut self,
        measurement: &str,
        fields: HashMap<String, FieldValue>,
        tags: &HashMap<String, String>,
        timestamp: DateTime<Utc>,
    );

    /// Counterpart for counter samples. Separate entry point so sinks that
    /// distinguish monotonic series can; the default treats both alike.
    fn add_counter(
        &mut self,
        measurement: &str,
        fields: HashMap<String, FieldValue>,
        tags: &HashMap<String, String>,
        timestamp: DateTime<Utc>,
    ) {
        self.add_fields(measurement, fields, tags, timestamp);
    }
}

/// In-memory accumulator
///
/// Stages the samples of one gather before they are handed to the sinks;
/// also the assertion point for aggregation tests.
#[derive(Debug, Default)]
pub struct SampleBuffer {
    samples: Vec<Sample>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Drain the buffered samples, leaving the buffer reusable.
    pub fn take(&mut self) -> Vec<Sample> {
        std::mem::take(&mut self.samples)
    }
}

impl Accumulator for SampleBuffer {
    fn add_fields(
        &mut self,
        measurement: &str,
        fields: HashMap<String, FieldValue>,
        tags: &HashMap<String, String>,
        timestamp: DateTime<Utc>,
    ) {
        self.samples.push(Sample {
            measurement: measurement.to_string(),
            fields,
            tags: tags.clone(),
            timestamp,
        });
    }
}

/// Trait for all metric sinks
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Send a batch of gathered samples to this sink
    async fn send(&self, samples: &[Sample]) -> Result<()>;

    /// Flush any buffered data
    async fn flush(&self) -> Result<()>;

    /// Close the sink gracefully
    async fn close(&self) -> Result<()>;

    /// Get the name of this sink
    fn name(&self) -> &str;
}
