// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./percentile_test.rs"]
mod percentile_test;

use super::{Accumulator, EntityError, Result};
use itertools::Itertools;
use serde::Serialize;
use std::collections::BTreeMap;

//
// PercentileFunction
//

// Percentiles over a bucketed dataset. Observations are grouped into buckets of `precision` width
// (bucket key = value / precision) so the accumulator size is bounded by the value range rather
// than the number of observations. Values are reported per rank as the lower bound of the bucket
// containing that rank.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PercentileFunction {
  precision: i64,
  ranks: Vec<i64>,
  dataset: BTreeMap<i64, i64>,
  values: BTreeMap<i64, i64>,
}

impl PercentileFunction {
  #[must_use]
  pub fn new(precision: i64, ranks: Vec<i64>) -> Self {
    Self {
      precision: precision.max(1),
      ranks: ranks.into_iter().sorted_unstable().dedup().collect(),
      dataset: BTreeMap::new(),
      values: BTreeMap::new(),
    }
  }

  #[must_use]
  pub fn ranks(&self) -> &[i64] {
    &self.ranks
  }

  #[must_use]
  pub const fn values(&self) -> &BTreeMap<i64, i64> {
    &self.values
  }

  fn total(&self) -> i64 {
    self.dataset.values().sum()
  }
}

impl Accumulator for PercentileFunction {
  fn accept(&mut self, value: i64) {
    *self
      .dataset
      .entry(value.max(0) / self.precision)
      .or_default() += 1;
  }

  fn combine(&mut self, other: &Self) -> Result<()> {
    if self.precision != other.precision {
      return Err(EntityError::PrecisionMismatch);
    }
    if self.ranks != other.ranks {
      return Err(EntityError::RankMismatch);
    }

    for (key, count) in &other.dataset {
      *self.dataset.entry(*key).or_default() += count;
    }
    Ok(())
  }

  fn calculate(&mut self, _time_bucket: i64) {
    self.values.clear();
    let total = self.total();
    if total == 0 {
      return;
    }

    // Rounded half up, ranks are sorted so roofs are non-decreasing.
    let roofs: Vec<i64> = self
      .ranks
      .iter()
      .map(|rank| (total * rank + 50) / 100)
      .collect();

    let mut next_rank = 0;
    let mut count = 0;
    for (key, bucket_count) in &self.dataset {
      count += bucket_count;
      while next_rank < roofs.len() && count >= roofs[next_rank] {
        self
          .values
          .insert(self.ranks[next_rank], key * self.precision);
        next_rank += 1;
      }
      if next_rank == roofs.len() {
        break;
      }
    }
  }

  fn rolled_up(&self) -> Self {
    Self {
      precision: self.precision,
      ranks: self.ranks.clone(),
      dataset: self.dataset.clone(),
      values: BTreeMap::new(),
    }
  }
}
