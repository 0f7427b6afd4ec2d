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

//! Druid JSON line output
//!
//! Encodes each sample field as its own newline-terminated JSON object:
//! `origin` carries the measurement name, `name` the field name, `value`
//! the field value, `timestamp` unix milliseconds, and every tag becomes a
//! top-level key.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use super::MetricsSink;
use crate::model::Sample;

/// One-metric-per-field JSON line encoder
#[derive(Debug, Default)]
pub struct DruidSerializer;

impl DruidSerializer {
    pub fn new() -> Self {
        Self
    }

    /// Encode one sample; the result holds one line per field, in
    /// unspecified field order. Keys within a line serialize
    /// lexicographically.
    pub fn serialize(&self, sample: &Sample) -> Result<String> {
        let mut out = String::new();
        for (field, value) in &sample.fields {
            let mut object: BTreeMap<&str, Value> = BTreeMap::new();
            object.insert("origin", Value::String(sample.measurement.clone()));
            object.insert("timestamp", sample.timestamp.timestamp_millis().into());
            object.insert("name", Value::String(field.clone()));
            for (key, tag_value) in &sample.tags {
                object.insert(key.as_str(), Value::String(tag_value.clone()));
            }
            object.insert("value", serde_json::to_value(value)?);

            out.push_str(&serde_json::to_string(&object)?);
            out.push('\n');
        }
        Ok(out)
    }
}

/// Sink writing druid-encoded lines to stdout or an append-only file
pub struct DruidSink {
    serializer: DruidSerializer,
    path: Option<PathBuf>,
}

impl DruidSink {
    pub fn stdout() -> Self {
        Self {
            serializer: DruidSerializer::new(),
            path: None,
        }
    }

    pub fn file(path: PathBuf) -> Self {
        Self {
            serializer: DruidSerializer::new(),
            path: Some(path),
        }
    }
}

#[async_trait]
impl MetricsSink for DruidSink {
    async fn send(&self, samples: &[Sample]) -> Result<()> {
        let mut encoded = String::new();
        for sample in samples {
            encoded.push_str(&self.serializer.serialize(sample)?);
        }
        if encoded.is_empty() {
            return Ok(());
        }

        match &self.path {
            Some(path) => {
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                    .with_context(|| format!("Failed to open sink file: {}", path.display()))?;
                file.write_all(encoded.as_bytes()).await?;
            }
            None => {
                let mut stdout = tokio::io::stdout();
                stdout.write_all(encoded.as_bytes()).await?;
                stdout.flush().await?;
            }
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "druid"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldValue;
    use ahash::{HashMap, HashMapExt};
    use chrono::DateTime;

    fn sample(fields: HashMap<String, FieldValue>, tags: HashMap<String, String>) -> Sample {
        Sample {
            measurement: "cpu".to_string(),
            fields,
            tags,
            timestamp: DateTime::from_timestamp(1700000000, 0).unwrap(),
        }
    }

    #[test]
    fn test_serialize_float() {
        let mut fields = HashMap::new();
        fields.insert("usage_idle".to_string(), FieldValue::Float(91.5));
        let mut tags = HashMap::new();
        tags.insert("cpu".to_string(), "cpu0".to_string());

        let out = DruidSerializer::new().serialize(&sample(fields, tags)).unwrap();
        assert_eq!(
            out,
            "{\"cpu\":\"cpu0\",\"name\":\"usage_idle\",\"origin\":\"cpu\",\"timestamp\":1700000000000,\"value\":91.5}\n"
        );
    }

    #[test]
    fn test_serialize_int() {
        let mut fields = HashMap::new();
        fields.insert("usage_idle".to_string(), FieldValue::Int(90));
        let mut tags = HashMap::new();
        tags.insert("cpu".to_string(), "cpu0".to_string());

        let out = DruidSerializer::new().serialize(&sample(fields, tags)).unwrap();
        assert_eq!(
            out,
            "{\"cpu\":\"cpu0\",\"name\":\"usage_idle\",\"origin\":\"cpu\",\"timestamp\":1700000000000,\"value\":90}\n"
        );
    }

    #[test]
    fn test_serialize_multiple_fields() {
        let mut fields = HashMap::new();
        fields.insert("usage_idle".to_string(), FieldValue::Int(90));
        fields.insert("usage_total".to_string(), FieldValue::Int(8559615));
        let mut tags = HashMap::new();
        tags.insert("cpu".to_string(), "cpu0".to_string());

        let out = DruidSerializer::new().serialize(&sample(fields, tags)).unwrap();

        // One line per field, in unspecified order.
        let mut lines: Vec<&str> = out.lines().collect();
        lines.sort_unstable();
        assert_eq!(
            lines,
            vec![
                "{\"cpu\":\"cpu0\",\"name\":\"usage_idle\",\"origin\":\"cpu\",\"timestamp\":1700000000000,\"value\":90}",
                "{\"cpu\":\"cpu0\",\"name\":\"usage_total\",\"origin\":\"cpu\",\"timestamp\":1700000000000,\"value\":8559615}",
            ]
        );
    }

    #[test]
    fn test_serialize_preserves_awkward_names() {
        let mut fields = HashMap::new();
        fields.insert("U,age=Idle".to_string(), FieldValue::Int(90));
        let mut tags = HashMap::new();
        tags.insert("cpu tag".to_string(), "cpu0".to_string());

        let mut s = sample(fields, tags);
        s.measurement = "My CPU".to_string();

        let out = DruidSerializer::new().serialize(&s).unwrap();
        assert_eq!(
            out,
            "{\"cpu tag\":\"cpu0\",\"name\":\"U,age=Idle\",\"origin\":\"My CPU\",\"timestamp\":1700000000000,\"value\":90}\n"
        );
    }

    #[test]
    fn test_serialize_empty_fields() {
        let out = DruidSerializer::new()
            .serialize(&sample(HashMap::new(), HashMap::new()))
            .unwrap();
        assert!(out.is_empty());
    }
}
