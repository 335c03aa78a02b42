// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./time_bucket_test.rs"]
mod time_bucket_test;

use serde::{Deserialize, Serialize};
use time::{Month, OffsetDateTime};

//
// TimeBucketError
//

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TimeBucketError {
  #[error("timestamp {0} is out of range")]
  InvalidTimestamp(i64),
  #[error("{0} is not a calendar time bucket")]
  UnknownBucket(i64),
  #[error("cannot roll a {from:?} bucket up to {to:?}")]
  NotCoarser { from: DownSampling, to: DownSampling },
}

pub type Result<T> = std::result::Result<T, TimeBucketError>;

//
// DownSampling
//

// Time resolution of a bucket, ordered from finest to coarsest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownSampling {
  None,
  Second,
  Minute,
  Hour,
  Day,
  Month,
}

impl DownSampling {
  // Number of decimal digits in a calendar bucket of this level.
  const fn digits(self) -> Option<u32> {
    match self {
      Self::None => None,
      Self::Second => Some(14),
      Self::Minute => Some(12),
      Self::Hour => Some(10),
      Self::Day => Some(8),
      Self::Month => Some(6),
    }
  }

  // Width of the level in seconds. None and Second pass through.
  #[must_use]
  pub const fn modulus(self) -> i64 {
    match self {
      Self::None | Self::Second => 1,
      Self::Minute => 60,
      Self::Hour => 3600,
      Self::Day => 86400,
      Self::Month => 2_592_000,
    }
  }

  // Suffix appended to a metric name to form the storage model name at this level.
  #[must_use]
  pub const fn model_suffix(self) -> &'static str {
    match self {
      Self::None | Self::Minute => "",
      Self::Second => "_second",
      Self::Hour => "_hour",
      Self::Day => "_day",
      Self::Month => "_month",
    }
  }
}

fn to_date_time(timestamp_millis: i64) -> Result<OffsetDateTime> {
  OffsetDateTime::from_unix_timestamp_nanos(i128::from(timestamp_millis) * 1_000_000)
    .map_err(|_| TimeBucketError::InvalidTimestamp(timestamp_millis))
}

// Convert a millisecond timestamp into a calendar bucket (UTC) at the given level, e.g.
// 201809120511 for the minute 2018-09-12 05:11. DownSampling::None passes the timestamp through.
pub fn bucket(timestamp_millis: i64, level: DownSampling) -> Result<i64> {
  if level == DownSampling::None {
    return Ok(timestamp_millis);
  }

  let date_time = to_date_time(timestamp_millis)?;
  let month = i64::from(u8::from(date_time.month()));
  let day_bucket = i64::from(date_time.year()) * 10_000 + month * 100 + i64::from(date_time.day());
  Ok(match level {
    DownSampling::None => unreachable!(),
    DownSampling::Month => i64::from(date_time.year()) * 100 + month,
    DownSampling::Day => day_bucket,
    DownSampling::Hour => day_bucket * 100 + i64::from(date_time.hour()),
    DownSampling::Minute => {
      (day_bucket * 100 + i64::from(date_time.hour())) * 100 + i64::from(date_time.minute())
    },
    DownSampling::Second => {
      ((day_bucket * 100 + i64::from(date_time.hour())) * 100 + i64::from(date_time.minute()))
        * 100
        + i64::from(date_time.second())
    },
  })
}

// Index of the fixed width window containing the given unix time in seconds.
#[must_use]
pub const fn window_index(unix_seconds: i64, level: DownSampling) -> i64 {
  unix_seconds.div_euclid(level.modulus())
}

// Infer the level of a calendar bucket from its number of digits.
pub fn granularity(bucket: i64) -> Result<DownSampling> {
  match bucket {
    10_000_000_000_000 ..= 99_999_999_999_999 => Ok(DownSampling::Second),
    100_000_000_000 ..= 999_999_999_999 => Ok(DownSampling::Minute),
    1_000_000_000 ..= 9_999_999_999 => Ok(DownSampling::Hour),
    10_000_000 ..= 99_999_999 => Ok(DownSampling::Day),
    100_000 ..= 999_999 => Ok(DownSampling::Month),
    _ => Err(TimeBucketError::UnknownBucket(bucket)),
  }
}

// Roll a calendar bucket up to a coarser level. 201809120511 becomes 2018091205 at the hour level
// and 20180912 at the day level.
pub fn rollup(bucket: i64, to: DownSampling) -> Result<i64> {
  let from = granularity(bucket)?;
  let (Some(from_digits), Some(to_digits)) = (from.digits(), to.digits()) else {
    return Err(TimeBucketError::NotCoarser { from, to });
  };
  if to < from {
    return Err(TimeBucketError::NotCoarser { from, to });
  }
  Ok(bucket / 10_i64.pow(from_digits - to_digits))
}

// Number of whole minutes covered by a calendar bucket. Sub-minute buckets count as one minute.
pub fn minutes_in(bucket: i64) -> Result<i64> {
  Ok(match granularity(bucket)? {
    DownSampling::None | DownSampling::Second | DownSampling::Minute => 1,
    DownSampling::Hour => 60,
    DownSampling::Day => 1440,
    DownSampling::Month => {
      let year = i32::try_from(bucket / 100).map_err(|_| TimeBucketError::UnknownBucket(bucket))?;
      let month = u8::try_from(bucket % 100)
        .ok()
        .and_then(|month| Month::try_from(month).ok())
        .ok_or(TimeBucketError::UnknownBucket(bucket))?;
      i64::from(time::util::days_in_year_month(year, month)) * 1440
    },
  })
}
