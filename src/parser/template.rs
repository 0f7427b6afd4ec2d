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

//! Template-driven bucket name decomposition
//!
//! A template is a `[filter] layout` pair: an optional glob matched against
//! the raw bucket, and a dot-separated layout whose tokens assign bucket
//! parts to the measurement name, the field name, or tags.

use ahash::HashMap;
use anyhow::{bail, Context, Result};
use globset::{Glob, GlobMatcher};

/// Role of one dot-separated layout position
#[derive(Debug, Clone, PartialEq, Eq)]
enum LayoutToken {
    /// Part contributes to the measurement name
    Measurement,
    /// Part contributes to the field name
    Field,
    /// Part becomes the value of the named tag
    Tag(String),
}

/// One compiled template rule
#[derive(Debug)]
struct Template {
    /// Filter glob; `None` matches every bucket
    matcher: Option<GlobMatcher>,
    /// Length of the filter's literal prefix, the primary specificity key
    prefix_len: usize,
    /// Number of wildcard characters in the filter, the tie-breaker
    wildcards: usize,
    layout: Vec<LayoutToken>,
}

impl Template {
    fn matches(&self, bucket: &str) -> bool {
        match &self.matcher {
            Some(m) => m.is_match(bucket),
            None => true,
        }
    }
}

/// Ordered collection of compiled templates
#[derive(Debug, Default)]
pub struct TemplateEngine {
    templates: Vec<Template>,
}

impl TemplateEngine {
    /// Compile a list of `[filter] layout` template strings.
    pub fn new(specs: &[String]) -> Result<Self> {
        let mut templates = Vec::with_capacity(specs.len());
        for spec in specs {
            templates.push(parse_template(spec)?);
        }
        Ok(Self { templates })
    }

    /// Decompose a bucket into a dotted measurement name and a field name.
    ///
    /// The most specific matching template wins: longest literal filter
    /// prefix first, then fewest wildcards, then input order. Tags
    /// extracted by the template are inserted into `tags`, overriding
    /// inline bucket tags of the same name. Without a matching template
    /// the whole bucket is the measurement and the field is empty.
    pub fn apply(&self, bucket: &str, tags: &mut HashMap<String, String>) -> (String, String) {
        match self.select(bucket) {
            Some(template) => apply_layout(&template.layout, bucket, tags),
            None => (bucket.to_string(), String::new()),
        }
    }

    fn select(&self, bucket: &str) -> Option<&Template> {
        let mut best: Option<&Template> = None;
        for template in self.templates.iter().filter(|t| t.matches(bucket)) {
            let better = match best {
                None => true,
                Some(b) => {
                    template.prefix_len > b.prefix_len
                        || (template.prefix_len == b.prefix_len
                            && template.wildcards < b.wildcards)
                }
            };
            if better {
                best = Some(template);
            }
        }
        best
    }
}

fn parse_template(spec: &str) -> Result<Template> {
    let parts: Vec<&str> = spec.split_whitespace().collect();
    let (filter, layout) = match parts.as_slice() {
        [layout] => (None, *layout),
        [filter, layout] => (Some(*filter), *layout),
        _ => bail!("invalid template {spec:?}: expected `[filter] layout`"),
    };

    let (matcher, prefix_len, wildcards) = match filter {
        Some(f) => {
            let matcher = Glob::new(f)
                .with_context(|| format!("invalid template filter {f:?}"))?
                .compile_matcher();
            let prefix_len = f
                .find(|c| matches!(c, '*' | '?' | '['))
                .unwrap_or(f.len());
            let wildcards = f.chars().filter(|c| matches!(c, '*' | '?')).count();
            (Some(matcher), prefix_len, wildcards)
        }
        None => (None, 0, 0),
    };

    let layout = layout
        .split('.')
        .filter(|token| !token.is_empty())
        .map(|token| match token {
            "measurement" => LayoutToken::Measurement,
            "field" => LayoutToken::Field,
            tag => LayoutToken::Tag(tag.to_string()),
        })
        .collect();

    Ok(Template {
        matcher,
        prefix_len,
        wildcards,
        layout,
    })
}

fn apply_layout(
    layout: &[LayoutToken],
    bucket: &str,
    tags: &mut HashMap<String, String>,
) -> (String, String) {
    let mut measurement: Vec<&str> = Vec::new();
    let mut field: Vec<&str> = Vec::new();

    // Bucket parts beyond the layout length are dropped by the zip.
    for (token, part) in layout.iter().zip(bucket.split('.')) {
        match token {
            LayoutToken::Measurement => measurement.push(part),
            LayoutToken::Field => field.push(part),
            LayoutToken::Tag(name) => {
                tags.insert(name.clone(), part.to_string());
            }
        }
    }

    (measurement.join("."), field.join("_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::HashMapExt;

    fn engine(specs: &[&str]) -> TemplateEngine {
        let specs: Vec<String> = specs.iter().map(|s| s.to_string()).collect();
        TemplateEngine::new(&specs).unwrap()
    }

    #[test]
    fn test_no_templates_passes_bucket_through() {
        let e = engine(&[]);
        let mut tags = HashMap::new();
        let (name, field) = e.apply("unique.user.ids", &mut tags);
        assert_eq!(name, "unique.user.ids");
        assert_eq!(field, "");
        assert!(tags.is_empty());
    }

    #[test]
    fn test_layout_extracts_tags() {
        let e = engine(&["measurement.measurement.host.service"]);
        let mut tags = HashMap::new();
        let (name, field) = e.apply("cpu.busy.host01.myservice", &mut tags);
        assert_eq!(name, "cpu.busy");
        assert_eq!(field, "");
        assert_eq!(tags.get("host").unwrap(), "host01");
        assert_eq!(tags.get("service").unwrap(), "myservice");
    }

    #[test]
    fn test_short_bucket_skips_trailing_tokens() {
        let e = engine(&["measurement.measurement.host.service"]);
        let mut tags = HashMap::new();
        let (name, _) = e.apply("cpu.idle.localhost", &mut tags);
        assert_eq!(name, "cpu.idle");
        assert_eq!(tags.get("host").unwrap(), "localhost");
        assert!(!tags.contains_key("service"));
    }

    #[test]
    fn test_extra_bucket_parts_dropped() {
        let e = engine(&["measurement.host"]);
        let mut tags = HashMap::new();
        let (name, _) = e.apply("cpu.localhost.ignored.more", &mut tags);
        assert_eq!(name, "cpu");
        assert_eq!(tags.get("host").unwrap(), "localhost");
    }

    #[test]
    fn test_field_tokens_concatenate() {
        let e = engine(&["measurement.field.field.host"]);
        let mut tags = HashMap::new();
        let (name, field) = e.apply("jvm.mem.used.host01", &mut tags);
        assert_eq!(name, "jvm");
        assert_eq!(field, "mem_used");
        assert_eq!(tags.get("host").unwrap(), "host01");
    }

    #[test]
    fn test_filter_selects_template() {
        let e = engine(&["cpu.idle.* measurement.measurement.host"]);
        let mut tags = HashMap::new();

        let (name, _) = e.apply("cpu.idle.localhost", &mut tags);
        assert_eq!(name, "cpu.idle");
        assert_eq!(tags.get("host").unwrap(), "localhost");

        // Unmatched buckets fall back to the whole-bucket measurement.
        let mut tags = HashMap::new();
        let (name, _) = e.apply("cpu.busy.host01.myservice", &mut tags);
        assert_eq!(name, "cpu.busy.host01.myservice");
        assert!(tags.is_empty());
    }

    #[test]
    fn test_longest_literal_prefix_wins() {
        let e = engine(&[
            "cpu.* measurement.foo.host",
            "cpu.idle.* measurement.measurement.host",
        ]);
        let mut tags = HashMap::new();
        let (name, _) = e.apply("cpu.idle.localhost", &mut tags);
        assert_eq!(name, "cpu.idle");
        assert!(!tags.contains_key("foo"));
    }

    #[test]
    fn test_fewer_wildcards_break_prefix_ties() {
        let e = engine(&[
            "druid.*.segment.*.* measurement.role.field.field.field",
            "druid.*.segment.size.* measurement.role.field.field.datasource",
        ]);
        let mut tags = HashMap::new();
        let (name, field) = e.apply("druid.coordinator.segment.size.realtime", &mut tags);
        assert_eq!(name, "druid");
        assert_eq!(field, "segment_size");
        assert_eq!(tags.get("datasource").unwrap(), "realtime");
    }

    #[test]
    fn test_input_order_breaks_full_ties() {
        let e = engine(&["cpu.* measurement.first", "cpu.* measurement.second"]);
        let mut tags = HashMap::new();
        e.apply("cpu.localhost", &mut tags);
        assert_eq!(tags.get("first").unwrap(), "localhost");
        assert!(!tags.contains_key("second"));
    }

    #[test]
    fn test_filter_star_spans_separators() {
        let e = engine(&["cpu* measurement.measurement.field"]);
        let mut tags = HashMap::new();
        let (name, field) = e.apply("cpu.timing.success", &mut tags);
        assert_eq!(name, "cpu.timing");
        assert_eq!(field, "success");
    }

    #[test]
    fn test_template_tags_override_inline_tags() {
        let e = engine(&["measurement.host"]);
        let mut tags = HashMap::new();
        tags.insert("host".to_string(), "inline".to_string());
        e.apply("cpu.fromtemplate", &mut tags);
        assert_eq!(tags.get("host").unwrap(), "fromtemplate");
    }

    #[test]
    fn test_invalid_spec_is_rejected() {
        assert!(TemplateEngine::new(&["a b c".to_string()]).is_err());
    }
}
