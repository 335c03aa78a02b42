// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./avg_test.rs"]
mod avg_test;

use super::{Accumulator, Result};
use serde::Serialize;

//
// AvgFunction
//

// Integer average. The value is summation / count, with two special cases: an empty aggregate is
// 0, and an aggregate with a positive summation that rounds down to 0 reports 1 so that a series
// with observations never reads as having none.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AvgFunction {
  summation: i64,
  count: i64,
  value: i64,
}

impl AvgFunction {
  // Fold a pre-aggregated (summation, count) pair.
  pub const fn combine_value(&mut self, summation: i64, count: i64) {
    self.summation += summation;
    self.count += count;
  }

  #[must_use]
  pub const fn summation(&self) -> i64 {
    self.summation
  }

  #[must_use]
  pub const fn count(&self) -> i64 {
    self.count
  }

  #[must_use]
  pub const fn value(&self) -> i64 {
    self.value
  }
}

impl Accumulator for AvgFunction {
  fn accept(&mut self, value: i64) {
    self.combine_value(value, 1);
  }

  fn combine(&mut self, other: &Self) -> Result<()> {
    self.combine_value(other.summation, other.count);
    Ok(())
  }

  fn calculate(&mut self, _time_bucket: i64) {
    if self.count == 0 {
      self.value = 0;
      return;
    }

    let result = self.summation / self.count;
    self.value = if result == 0 && self.summation > 0 {
      1
    } else {
      result
    };
  }

  fn rolled_up(&self) -> Self {
    Self {
      summation: self.summation,
      count: self.count,
      value: 0,
    }
  }
}
