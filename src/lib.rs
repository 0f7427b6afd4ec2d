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

//! # StatsD Aggregation Daemon (STAD)
//!
//! A small, fast statsd server: ingests metric traffic in the statsd text
//! protocol over UDP, aggregates it in memory across a collection
//! interval, and emits structured samples to configurable sinks.
//!
//! ## Features
//!
//! - **Full statsd line support**: counters, gauges, sets, timings,
//!   sample rates, multi-value lines, DataDog tags
//! - **Template rewriting**: glob-filtered templates extract measurement
//!   names, field names, and tags from dotted buckets
//! - **Timing summaries**: online min/max/mean/stddev plus configurable
//!   percentiles over the full sample buffer
//! - **Pluggable sinks**: druid JSON line output to stdout or file
//!
//! ## Example
//!
//! ```rust,no_run
//! use stad::{config::StadConfig, Stad};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = StadConfig::from_file("config.json")?;
//!     let stad = Stad::new(config).await?;
//!     stad.start().await?;
//!     stad.wait_for_shutdown().await?;
//!     Ok(())
//! }
//! ```

use anyhow::Result;
use std::sync::{Arc, Mutex};
use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info, warn};

pub mod aggregation;
pub mod config;
pub mod model;
pub mod parser;
pub mod sinks;
pub mod sources;

use aggregation::Aggregator;
use config::{SinkSpec, StadConfig};
use sinks::druid::DruidSink;
use sinks::{MetricsSink, SampleBuffer};
use sources::{MetricsSource, StatsdSource};

/// Main STAD application instance
pub struct Stad {
    config: StadConfig,
    aggregator: Arc<Mutex<Aggregator>>,
    source: Arc<StatsdSource>,
    sinks: Arc<Vec<Box<dyn MetricsSink>>>,
    shutdown_notify: Arc<Notify>,
}

impl Stad {
    /// Create a new STAD instance with the given configuration
    pub async fn new(config: StadConfig) -> Result<Self> {
        let aggregator = Arc::new(Mutex::new(Aggregator::new(&config.statsd)?));
        let source = Arc::new(StatsdSource::new(
            config.statsd.clone(),
            Arc::clone(&aggregator),
        ));
        let sinks = Arc::new(build_sinks(&config.sinks));
        Ok(Self {
            config,
            aggregator,
            source,
            sinks,
            shutdown_notify: Arc::new(Notify::new()),
        })
    }

    /// Start all STAD services (source, flush loop, signal handlers)
    pub async fn start(&self) -> Result<()> {
        info!("Starting STAD services");

        self.source.start().await?;
        self.spawn_flush_loop();
        self.setup_signal_handlers().await;

        info!("All services started successfully");
        Ok(())
    }

    /// Wait for shutdown signal
    pub async fn wait_for_shutdown(&self) -> Result<()> {
        self.shutdown_notify.notified().await;
        info!("Shutdown signal received, stopping services...");

        self.source.stop().await;
        flush_once(&self.aggregator, &self.sinks).await;
        for sink in self.sinks.iter() {
            if let Err(e) = sink.close().await {
                warn!(sink = sink.name(), error = %e, "Failed to close sink");
            }
        }

        Ok(())
    }

    fn spawn_flush_loop(&self) {
        let aggregator = Arc::clone(&self.aggregator);
        let sinks = Arc::clone(&self.sinks);
        let interval = self.config.flush_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so a fresh daemon
            // does not flush an empty state right away.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                flush_once(&aggregator, &sinks).await;
            }
        });
    }

    async fn setup_signal_handlers(&self) {
        let shutdown_notify = Arc::clone(&self.shutdown_notify);

        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received SIGINT, initiating shutdown");
                    shutdown_notify.notify_one();
                }
                Err(err) => {
                    warn!("Failed to listen for SIGINT: {}", err);
                }
            }
        });

        #[cfg(unix)]
        {
            let shutdown_notify = Arc::clone(&self.shutdown_notify);
            tokio::spawn(async move {
                let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM handler");

                sigterm.recv().await;
                info!("Received SIGTERM, initiating shutdown");
                shutdown_notify.notify_one();
            });
        }
    }
}

/// Gather the current aggregate state and push it to every sink.
async fn flush_once(aggregator: &Mutex<Aggregator>, sinks: &[Box<dyn MetricsSink>]) {
    let samples = {
        let mut aggregator = aggregator.lock().expect("aggregator mutex poisoned");
        let mut buffer = SampleBuffer::new();
        aggregator.gather(&mut buffer);
        buffer.take()
    };
    if samples.is_empty() {
        return;
    }

    for sink in sinks {
        if let Err(e) = sink.send(&samples).await {
            error!(sink = sink.name(), error = %e, "Failed to send samples");
        }
    }
}

fn build_sinks(specs: &[SinkSpec]) -> Vec<Box<dyn MetricsSink>> {
    if specs.is_empty() {
        return vec![Box::new(DruidSink::stdout())];
    }
    specs
        .iter()
        .map(|spec| -> Box<dyn MetricsSink> {
            match spec {
                SinkSpec::Druid { path: Some(path) } => Box::new(DruidSink::file(path.clone())),
                SinkSpec::Druid { path: None } => Box::new(DruidSink::stdout()),
            }
        })
        .collect()
}
