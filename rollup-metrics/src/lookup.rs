// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./lookup_test.rs"]
mod lookup_test;

use crate::config::LookupConfig;
use parking_lot::RwLock;
use std::sync::Arc;

const DEFAULT_THRESHOLD_KEY: &str = "default";
const SAMPLE_RATE_BASE: u64 = 10000;

// Fixed seeds so that a trace id maps to the same sampling slot on every call.
const TRACE_HASH_SEEDS: [u64; 4] = [
  0x243f_6a88_85a3_08d3,
  0x1319_8a2e_0370_7344,
  0xa409_3822_299f_31d0,
  0x082e_fa98_ec4e_6c89,
];

//
// ConfigLookup
//

// Runtime settings consulted by the dispatchers. Values are read on every decision so updates
// take effect immediately.
#[cfg_attr(test, mockall::automock)]
pub trait ConfigLookup: Send + Sync {
  // Slow threshold in milliseconds for the given kind. Falls back to the default threshold, and
  // to 0 if there is none.
  fn threshold(&self, kind: &str) -> i64;

  // Sample rate in units of 1/10000.
  fn sample_rate(&self) -> u32;

  // Whether a segment with the given duration in milliseconds is slow enough to always be
  // sampled.
  fn should_sample(&self, duration: i64) -> bool;

  // Whether the trace falls within the sample rate. Every segment of a trace gets the same
  // answer.
  fn should_sample_trace(&self, trace_id: &str) -> bool;
}

//
// SwappableLookup
//

// ConfigLookup backed by a config snapshot that can be replaced at any time.
pub struct SwappableLookup {
  config: RwLock<Arc<LookupConfig>>,
  trace_hasher: ahash::RandomState,
}

impl SwappableLookup {
  #[must_use]
  pub fn new(config: LookupConfig) -> Self {
    Self {
      config: RwLock::new(Arc::new(config)),
      trace_hasher: ahash::RandomState::with_seeds(
        TRACE_HASH_SEEDS[0],
        TRACE_HASH_SEEDS[1],
        TRACE_HASH_SEEDS[2],
        TRACE_HASH_SEEDS[3],
      ),
    }
  }

  pub fn update(&self, config: LookupConfig) {
    log::info!(
      "updating lookup config: sample rate {}, {} threshold(s)",
      config.sample_rate,
      config.slow_thresholds.len()
    );
    *self.config.write() = Arc::new(config);
  }

  fn snapshot(&self) -> Arc<LookupConfig> {
    self.config.read().clone()
  }
}

impl ConfigLookup for SwappableLookup {
  fn threshold(&self, kind: &str) -> i64 {
    let config = self.snapshot();
    config
      .slow_thresholds
      .get(kind)
      .or_else(|| config.slow_thresholds.get(DEFAULT_THRESHOLD_KEY))
      .copied()
      .unwrap_or_default()
  }

  fn sample_rate(&self) -> u32 {
    self.snapshot().sample_rate
  }

  fn should_sample(&self, duration: i64) -> bool {
    let threshold = self.snapshot().slow_segment_threshold;
    threshold > -1 && duration >= threshold
  }

  fn should_sample_trace(&self, trace_id: &str) -> bool {
    let slot = self.trace_hasher.hash_one(trace_id) % SAMPLE_RATE_BASE;
    slot < u64::from(self.sample_rate())
  }
}
