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

//! Metric sources for ingesting statsd traffic
//!
//! The statsd source runs two tasks: a UDP listener that enqueues raw
//! datagrams on a bounded channel, and a single drain worker that parses
//! them and updates the aggregator. Datagrams arriving while the channel
//! is full are dropped at the listener. The drain worker and the periodic
//! gather serialize on the aggregator mutex, so flushes always observe a
//! consistent snapshot.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::aggregation::Aggregator;
use crate::config::StatsdConfig;

/// Receive buffer size; larger datagrams are truncated by the socket.
const UDP_MAX_PACKET_SIZE: usize = 8192;

/// Trait for all metric sources
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Start the source's background tasks
    async fn start(&self) -> Result<()>;

    /// Stop the source; in-flight messages are discarded
    async fn stop(&self);

    /// Get the name of this source
    fn name(&self) -> &str;
}

/// UDP statsd ingest source
pub struct StatsdSource {
    config: StatsdConfig,
    aggregator: Arc<Mutex<Aggregator>>,
    shutdown: watch::Sender<bool>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl StatsdSource {
    pub fn new(config: StatsdConfig, aggregator: Arc<Mutex<Aggregator>>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            aggregator,
            shutdown,
            local_addr: Mutex::new(None),
        }
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("local_addr mutex poisoned")
    }
}

#[async_trait]
impl MetricsSource for StatsdSource {
    async fn start(&self) -> Result<()> {
        let socket = UdpSocket::bind(&self.config.service_address)
            .await
            .with_context(|| {
                format!(
                    "Failed to bind statsd listener on {}",
                    self.config.service_address
                )
            })?;
        let local = socket.local_addr()?;
        *self.local_addr.lock().expect("local_addr mutex poisoned") = Some(local);
        info!(address = %local, "statsd listener started");

        let (sender, receiver) = mpsc::channel(self.config.allowed_pending_messages);
        tokio::spawn(listen_udp(socket, sender, self.shutdown.subscribe()));
        tokio::spawn(drain(
            receiver,
            Arc::clone(&self.aggregator),
            self.shutdown.subscribe(),
        ));
        Ok(())
    }

    async fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    fn name(&self) -> &str {
        "statsd"
    }
}

async fn listen_udp(
    socket: UdpSocket,
    sender: mpsc::Sender<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = [0u8; UDP_MAX_PACKET_SIZE];
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, _)) => {
                    if sender.try_send(buf[..len].to_vec()).is_err() {
                        warn!("dropped datagram: pending message channel is full");
                    }
                }
                Err(e) => {
                    error!(error = %e, "UDP receive failed");
                }
            }
        }
    }
    info!("statsd listener stopped");
}

async fn drain(
    mut receiver: mpsc::Receiver<Vec<u8>>,
    aggregator: Arc<Mutex<Aggregator>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            message = receiver.recv() => match message {
                Some(datagram) => {
                    let text = String::from_utf8_lossy(&datagram);
                    let mut aggregator =
                        aggregator.lock().expect("aggregator mutex poisoned");
                    for line in text.lines() {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if let Err(e) = aggregator.apply_line(line) {
                            warn!(error = %e, "rejected statsd line");
                        }
                    }
                }
                None => break,
            }
        }
    }
    info!("statsd drain worker stopped");
}
