// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt


mod avg;
mod histogram;
mod percentile;
mod simple;

pub use self::avg::AvgFunction;
pub use self::histogram::HistogramFunction;
pub use self::percentile::PercentileFunction;
pub use self::simple::{CountFunction, CpmFunction, MaxFunction, PercentFunction, SumFunction};
use crate::merge_cache::Mergeable;
use crate::time_bucket::{self, DownSampling, TimeBucketError};
use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

const fn default_percentile_precision() -> i64 {
  10
}

fn default_percentile_ranks() -> Vec<i64> {
  vec![50, 75, 90, 95, 99]
}

//
// EntityError
//

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum EntityError {
  #[error("cannot combine a {theirs} aggregate into a {ours} aggregate")]
  ChangedType {
    ours: &'static str,
    theirs: &'static str,
  },
  #[error("histogram buckets do not match")]
  BucketMismatch,
  #[error("percentile ranks do not match")]
  RankMismatch,
  #[error("percentile precision does not match")]
  PrecisionMismatch,
  #[error(transparent)]
  TimeBucket(#[from] TimeBucketError),
}

pub type Result<T> = std::result::Result<T, EntityError>;

//
// Accumulator
//

// The contract shared by every aggregation function. accept() and combine() only touch the
// accumulator fields and must be commutative and associative. calculate() derives the visible
// value from the accumulators and may be called any number of times.
pub trait Accumulator: Sized {
  // Fold a single raw observation into the accumulators.
  fn accept(&mut self, value: i64);

  // Merge another partial aggregate of the same shape.
  fn combine(&mut self, other: &Self) -> Result<()>;

  // Derive the value. The time bucket is the one of the owning entity.
  fn calculate(&mut self, time_bucket: i64);

  // Copy the accumulators into a fresh aggregate with no derived value.
  fn rolled_up(&self) -> Self;
}

//
// FunctionSpec
//

// Declarative description of an aggregation function, as found in metric definitions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FunctionSpec {
  LongAvg,
  Count,
  Sum,
  Cpm,
  Max,
  Percent,
  Percentile {
    #[serde(default = "default_percentile_precision")]
    precision: i64,
    #[serde(default = "default_percentile_ranks")]
    ranks: Vec<i64>,
  },
  Histogram {
    bounds: Vec<i64>,
  },
}

impl FunctionSpec {
  #[must_use]
  pub fn percentile() -> Self {
    Self::Percentile {
      precision: default_percentile_precision(),
      ranks: default_percentile_ranks(),
    }
  }

  pub fn validate(&self) -> anyhow::Result<()> {
    match self {
      Self::Percentile { precision, ranks } => {
        if *precision <= 0 {
          bail!("percentile precision must be > 0");
        }
        if ranks.is_empty() {
          bail!("percentile ranks must not be empty");
        }
        if ranks.iter().any(|rank| !(1 ..= 100).contains(rank)) {
          bail!("percentile ranks must be between 1 and 100");
        }
      },
      Self::Histogram { bounds } => {
        if bounds.is_empty() {
          bail!("histogram bounds must not be empty");
        }
        if bounds.windows(2).any(|pair| pair[0] >= pair[1]) {
          bail!("histogram bounds must be strictly increasing");
        }
      },
      Self::LongAvg | Self::Count | Self::Sum | Self::Cpm | Self::Max | Self::Percent => {},
    }
    Ok(())
  }
}

//
// MetricFunction
//

// The closed set of aggregation functions an entity can carry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "function", rename_all = "snake_case")]
pub enum MetricFunction {
  LongAvg(AvgFunction),
  Count(CountFunction),
  Sum(SumFunction),
  Cpm(CpmFunction),
  Max(MaxFunction),
  Percent(PercentFunction),
  Percentile(PercentileFunction),
  Histogram(HistogramFunction),
}

// Dispatch a call to the inner function of every variant.
macro_rules! for_each_function {
  ($self:expr, $f:ident => $body:expr) => {
    match $self {
      MetricFunction::LongAvg($f) => $body,
      MetricFunction::Count($f) => $body,
      MetricFunction::Sum($f) => $body,
      MetricFunction::Cpm($f) => $body,
      MetricFunction::Max($f) => $body,
      MetricFunction::Percent($f) => $body,
      MetricFunction::Percentile($f) => $body,
      MetricFunction::Histogram($f) => $body,
    }
  };
}

impl MetricFunction {
  #[must_use]
  pub fn new(spec: &FunctionSpec) -> Self {
    match spec {
      FunctionSpec::LongAvg => Self::LongAvg(AvgFunction::default()),
      FunctionSpec::Count => Self::Count(CountFunction::default()),
      FunctionSpec::Sum => Self::Sum(SumFunction::default()),
      FunctionSpec::Cpm => Self::Cpm(CpmFunction::default()),
      FunctionSpec::Max => Self::Max(MaxFunction::default()),
      FunctionSpec::Percent => Self::Percent(PercentFunction::default()),
      FunctionSpec::Percentile { precision, ranks } => {
        Self::Percentile(PercentileFunction::new(*precision, ranks.clone()))
      },
      FunctionSpec::Histogram { bounds } => {
        Self::Histogram(HistogramFunction::new(bounds.clone()))
      },
    }
  }

  #[must_use]
  pub const fn kind(&self) -> &'static str {
    match self {
      Self::LongAvg(_) => "long_avg",
      Self::Count(_) => "count",
      Self::Sum(_) => "sum",
      Self::Cpm(_) => "cpm",
      Self::Max(_) => "max",
      Self::Percent(_) => "percent",
      Self::Percentile(_) => "percentile",
      Self::Histogram(_) => "histogram",
    }
  }

  fn accept(&mut self, value: i64) {
    for_each_function!(self, f => f.accept(value));
  }

  fn combine(&mut self, other: &Self) -> Result<()> {
    match (self, other) {
      (Self::LongAvg(ours), Self::LongAvg(theirs)) => ours.combine(theirs),
      (Self::Count(ours), Self::Count(theirs)) => ours.combine(theirs),
      (Self::Sum(ours), Self::Sum(theirs)) => ours.combine(theirs),
      (Self::Cpm(ours), Self::Cpm(theirs)) => ours.combine(theirs),
      (Self::Max(ours), Self::Max(theirs)) => ours.combine(theirs),
      (Self::Percent(ours), Self::Percent(theirs)) => ours.combine(theirs),
      (Self::Percentile(ours), Self::Percentile(theirs)) => ours.combine(theirs),
      (Self::Histogram(ours), Self::Histogram(theirs)) => ours.combine(theirs),
      (ours, theirs) => Err(EntityError::ChangedType {
        ours: ours.kind(),
        theirs: theirs.kind(),
      }),
    }
  }

  fn calculate(&mut self, time_bucket: i64) {
    for_each_function!(self, f => f.calculate(time_bucket));
  }

  fn rolled_up(&self) -> Self {
    match self {
      Self::LongAvg(f) => Self::LongAvg(f.rolled_up()),
      Self::Count(f) => Self::Count(f.rolled_up()),
      Self::Sum(f) => Self::Sum(f.rolled_up()),
      Self::Cpm(f) => Self::Cpm(f.rolled_up()),
      Self::Max(f) => Self::Max(f.rolled_up()),
      Self::Percent(f) => Self::Percent(f.rolled_up()),
      Self::Percentile(f) => Self::Percentile(f.rolled_up()),
      Self::Histogram(f) => Self::Histogram(f.rolled_up()),
    }
  }

  fn value(&self) -> MetricValue {
    match self {
      Self::LongAvg(f) => MetricValue::Long(f.value()),
      Self::Count(f) => MetricValue::Long(f.value()),
      Self::Sum(f) => MetricValue::Long(f.value()),
      Self::Cpm(f) => MetricValue::Long(f.value()),
      Self::Max(f) => MetricValue::Long(f.value()),
      Self::Percent(f) => MetricValue::Long(f.value()),
      Self::Percentile(f) => MetricValue::Labeled(f.values().clone()),
      Self::Histogram(f) => MetricValue::Labeled(f.values().clone()),
    }
  }
}

//
// MetricValue
//

// The externally visible result of calculate(). Labeled values are keyed by rank for percentiles
// and by bucket lower bound for histograms.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
  Long(i64),
  Labeled(BTreeMap<i64, i64>),
}

//
// EntityKey
//

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
  pub entity_id: String,
  pub time_bucket: i64,
}

//
// MetricEntity
//

// One partial or complete aggregate of a metric series within a time bucket. Two entities are the
// same logical aggregate when their entity id and time bucket match, so equality and hashing only
// consider those two fields.
#[derive(Clone, Debug, Serialize)]
pub struct MetricEntity {
  entity_id: String,
  time_bucket: i64,
  #[serde(flatten)]
  function: MetricFunction,
}

impl MetricEntity {
  pub fn new(
    entity_id: impl Into<String>,
    time_bucket: i64,
    function: MetricFunction,
  ) -> Result<Self> {
    time_bucket::minutes_in(time_bucket)?;
    Ok(Self {
      entity_id: entity_id.into(),
      time_bucket,
      function,
    })
  }

  #[must_use]
  pub fn entity_id(&self) -> &str {
    &self.entity_id
  }

  #[must_use]
  pub const fn time_bucket(&self) -> i64 {
    self.time_bucket
  }

  #[must_use]
  pub const fn function(&self) -> &MetricFunction {
    &self.function
  }

  #[must_use]
  pub fn key(&self) -> EntityKey {
    EntityKey {
      entity_id: self.entity_id.clone(),
      time_bucket: self.time_bucket,
    }
  }

  // Storage id of the aggregate.
  #[must_use]
  pub fn id(&self) -> String {
    format!("{}_{}", self.time_bucket, self.entity_id)
  }

  pub fn accept(&mut self, value: i64) {
    self.function.accept(value);
  }

  // Merge another partial aggregate into this one. Returns false without touching anything if
  // the other entity is a different logical aggregate.
  pub fn combine(&mut self, other: &Self) -> Result<bool> {
    if self.entity_id != other.entity_id || self.time_bucket != other.time_bucket {
      return Ok(false);
    }
    self.function.combine(&other.function)?;
    Ok(true)
  }

  pub fn calculate(&mut self) {
    self.function.calculate(self.time_bucket);
  }

  #[must_use]
  pub fn value(&self) -> MetricValue {
    self.function.value()
  }

  // Produce a copy of the accumulators in the coarser bucket that contains this one.
  pub fn to_level(&self, level: DownSampling) -> Result<Self> {
    Ok(Self {
      entity_id: self.entity_id.clone(),
      time_bucket: time_bucket::rollup(self.time_bucket, level)?,
      function: self.function.rolled_up(),
    })
  }

  pub fn to_hour(&self) -> Result<Self> {
    self.to_level(DownSampling::Hour)
  }

  pub fn to_day(&self) -> Result<Self> {
    self.to_level(DownSampling::Day)
  }
}

impl PartialEq for MetricEntity {
  fn eq(&self, other: &Self) -> bool {
    self.entity_id == other.entity_id && self.time_bucket == other.time_bucket
  }
}

impl Eq for MetricEntity {}

impl Hash for MetricEntity {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.entity_id.hash(state);
    self.time_bucket.hash(state);
  }
}

impl Mergeable for MetricEntity {
  type Key = EntityKey;
  type Error = EntityError;

  fn merge_key(&self) -> EntityKey {
    self.key()
  }

  fn merge(&mut self, other: &Self) -> Result<()> {
    let merged = self.combine(other)?;
    debug_assert!(merged);
    Ok(())
  }
}
