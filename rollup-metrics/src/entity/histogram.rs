// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./histogram_test.rs"]
mod histogram_test;

use super::{Accumulator, EntityError, Result};
use serde::Serialize;
use std::collections::BTreeMap;

//
// HistogramFunction
//

// Fixed bucket histogram. Bounds are the inclusive lower bounds of each bucket, sorted ascending.
// Values below the first bound land in the first bucket. The calculated value maps each lower
// bound to its count.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HistogramFunction {
  bounds: Vec<i64>,
  counts: Vec<i64>,
  values: BTreeMap<i64, i64>,
}

impl HistogramFunction {
  #[must_use]
  pub fn new(bounds: Vec<i64>) -> Self {
    let counts = vec![0; bounds.len()];
    Self {
      bounds,
      counts,
      values: BTreeMap::new(),
    }
  }

  #[must_use]
  pub fn bounds(&self) -> &[i64] {
    &self.bounds
  }

  #[must_use]
  pub const fn values(&self) -> &BTreeMap<i64, i64> {
    &self.values
  }
}

impl Accumulator for HistogramFunction {
  fn accept(&mut self, value: i64) {
    if self.bounds.is_empty() {
      return;
    }
    let index = self
      .bounds
      .partition_point(|bound| *bound <= value)
      .saturating_sub(1);
    self.counts[index] += 1;
  }

  fn combine(&mut self, other: &Self) -> Result<()> {
    if self.bounds != other.bounds {
      return Err(EntityError::BucketMismatch);
    }
    for (count, other_count) in self.counts.iter_mut().zip(&other.counts) {
      *count += other_count;
    }
    Ok(())
  }

  fn calculate(&mut self, _time_bucket: i64) {
    self.values = self
      .bounds
      .iter()
      .copied()
      .zip(self.counts.iter().copied())
      .collect();
  }

  fn rolled_up(&self) -> Self {
    Self {
      bounds: self.bounds.clone(),
      counts: self.counts.clone(),
      values: BTreeMap::new(),
    }
  }
}
