// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./simple_test.rs"]
mod simple_test;

use super::{Accumulator, Result};
use crate::time_bucket;
use serde::Serialize;

//
// CountFunction
//

// Number of observations, regardless of their value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CountFunction {
  count: i64,
  value: i64,
}

impl CountFunction {
  #[must_use]
  pub const fn value(&self) -> i64 {
    self.value
  }
}

impl Accumulator for CountFunction {
  fn accept(&mut self, _value: i64) {
    self.count += 1;
  }

  fn combine(&mut self, other: &Self) -> Result<()> {
    self.count += other.count;
    Ok(())
  }

  fn calculate(&mut self, _time_bucket: i64) {
    self.value = self.count;
  }

  fn rolled_up(&self) -> Self {
    Self {
      count: self.count,
      value: 0,
    }
  }
}

//
// SumFunction
//

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SumFunction {
  summation: i64,
  value: i64,
}

impl SumFunction {
  #[must_use]
  pub const fn value(&self) -> i64 {
    self.value
  }
}

impl Accumulator for SumFunction {
  fn accept(&mut self, value: i64) {
    self.summation += value;
  }

  fn combine(&mut self, other: &Self) -> Result<()> {
    self.summation += other.summation;
    Ok(())
  }

  fn calculate(&mut self, _time_bucket: i64) {
    self.value = self.summation;
  }

  fn rolled_up(&self) -> Self {
    Self {
      summation: self.summation,
      value: 0,
    }
  }
}

//
// CpmFunction
//

// Calls per minute. The total is divided by the number of minutes the owning bucket spans, so the
// same accumulators give a per minute rate at every downsampling level.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CpmFunction {
  total: i64,
  value: i64,
}

impl CpmFunction {
  #[must_use]
  pub const fn value(&self) -> i64 {
    self.value
  }
}

impl Accumulator for CpmFunction {
  fn accept(&mut self, value: i64) {
    self.total += value;
  }

  fn combine(&mut self, other: &Self) -> Result<()> {
    self.total += other.total;
    Ok(())
  }

  fn calculate(&mut self, time_bucket: i64) {
    // Entities validate their bucket on construction so this cannot fail in practice.
    let minutes = time_bucket::minutes_in(time_bucket).unwrap_or(1).max(1);
    self.value = self.total / minutes;
  }

  fn rolled_up(&self) -> Self {
    Self {
      total: self.total,
      value: 0,
    }
  }
}

//
// MaxFunction
//

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MaxFunction {
  max: Option<i64>,
  value: i64,
}

impl MaxFunction {
  #[must_use]
  pub const fn value(&self) -> i64 {
    self.value
  }
}

impl Accumulator for MaxFunction {
  fn accept(&mut self, value: i64) {
    self.max = Some(self.max.map_or(value, |max| max.max(value)));
  }

  fn combine(&mut self, other: &Self) -> Result<()> {
    if let Some(other_max) = other.max {
      self.accept(other_max);
    }
    Ok(())
  }

  fn calculate(&mut self, _time_bucket: i64) {
    self.value = self.max.unwrap_or_default();
  }

  fn rolled_up(&self) -> Self {
    Self {
      max: self.max,
      value: 0,
    }
  }
}

//
// PercentFunction
//

// Ratio of matching observations in basis points (10000 = 100%). Any non-zero observation
// matches.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PercentFunction {
  matched: i64,
  total: i64,
  percentage: i64,
}

impl PercentFunction {
  #[must_use]
  pub const fn value(&self) -> i64 {
    self.percentage
  }
}

impl Accumulator for PercentFunction {
  fn accept(&mut self, value: i64) {
    self.total += 1;
    if value != 0 {
      self.matched += 1;
    }
  }

  fn combine(&mut self, other: &Self) -> Result<()> {
    self.matched += other.matched;
    self.total += other.total;
    Ok(())
  }

  fn calculate(&mut self, _time_bucket: i64) {
    self.percentage = if self.total == 0 {
      0
    } else {
      self.matched * 10000 / self.total
    };
  }

  fn rolled_up(&self) -> Self {
    Self {
      matched: self.matched,
      total: self.total,
      percentage: 0,
    }
  }
}
