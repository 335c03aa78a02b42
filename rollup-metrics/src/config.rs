// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

use crate::definition::MetricDefinition;
use crate::pipeline::queue::QueueFullPolicy;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_FLUSH_THRESHOLD: u64 = 1000;

//
// Config
//

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  pub aggregator: AggregatorConfig,
  pub persistence: PersistenceConfig,
  pub sink: SinkConfig,
  pub lookup: LookupConfig,
  pub metrics: MetricsConfig,
}

//
// AggregatorConfig
//

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AggregatorConfig {
  // Maximum number of entities waiting in the queue of a single aggregator.
  pub queue_capacity: usize,
  // Maximum number of entities the consumer pulls from the queue at once. The last entity of each
  // pull is flagged as end of batch.
  pub batch_size: usize,
  // Number of merged entities after which a flush happens even within a batch.
  pub flush_threshold: u64,
  pub full_policy: QueueFullPolicy,
  #[serde(with = "humantime_serde")]
  pub drain_poll_interval: Duration,
}

impl Default for AggregatorConfig {
  fn default() -> Self {
    Self {
      queue_capacity: 10_000,
      batch_size: 1000,
      flush_threshold: DEFAULT_FLUSH_THRESHOLD,
      full_policy: QueueFullPolicy::Block,
      drain_poll_interval: Duration::from_millis(10),
    }
  }
}

//
// PersistenceConfig
//

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PersistenceConfig {
  pub hour: bool,
  pub day: bool,
  // Number of most recent windows per level whose aggregates are kept in memory. Data arriving
  // for an older window is dropped.
  pub retained_windows: u32,
}

impl Default for PersistenceConfig {
  fn default() -> Self {
    Self {
      hour: true,
      day: true,
      retained_windows: 2,
    }
  }
}

//
// SinkConfig
//

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SinkConfig {
  pub retry: RetryConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
  pub max_retries: Option<u32>,
  // Fraction of in-flight requests that are allowed to be retries.
  pub budget: Option<f64>,
  #[serde(with = "humantime_serde")]
  pub initial_backoff: Duration,
  #[serde(with = "humantime_serde")]
  pub max_backoff: Duration,
  #[serde(with = "humantime_serde")]
  pub max_elapsed_time: Option<Duration>,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_retries: Some(5),
      budget: None,
      initial_backoff: Duration::from_millis(100),
      max_backoff: Duration::from_secs(10),
      max_elapsed_time: Some(Duration::from_secs(60)),
    }
  }
}

//
// LookupConfig
//

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LookupConfig {
  // Slow thresholds in milliseconds keyed by kind, e.g. a database type. The "default" key is used
  // for kinds without an entry.
  pub slow_thresholds: HashMap<String, i64>,
  // Segments at least this slow are always sampled. Negative disables the rule.
  pub slow_segment_threshold: i64,
  // Sample rate in units of 1/10000.
  pub sample_rate: u32,
}

impl Default for LookupConfig {
  fn default() -> Self {
    Self {
      slow_thresholds: HashMap::from([("default".to_string(), 200)]),
      slow_segment_threshold: -1,
      sample_rate: 10000,
    }
  }
}

//
// MetricsConfig
//

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
  // Whether to register the built-in metric definitions.
  pub defaults: bool,
  pub definitions: Vec<MetricDefinition>,
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      defaults: true,
      definitions: Vec::new(),
    }
  }
}
