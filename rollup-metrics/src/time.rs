// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./time_test.rs"]
mod time_test;

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use time::OffsetDateTime;

//
// TimeProvider
//

pub trait TimeProvider: Send + Sync + 'static {
  fn unix_now(&self) -> i64;

  fn unix_now_millis(&self) -> i64 {
    self.unix_now() * 1000
  }
}

//
// RealTimeProvider
//

pub struct RealTimeProvider {}

impl TimeProvider for RealTimeProvider {
  fn unix_now(&self) -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
  }

  fn unix_now_millis(&self) -> i64 {
    i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000)
      .unwrap_or(i64::MAX)
  }
}

//
// TestTimeProvider
//

// Time source for tests. The time is in seconds and shared so that tests can move it while the
// code under test holds the provider.
#[derive(Default)]
pub struct TestTimeProvider {
  pub time: Arc<AtomicI64>,
}

impl TestTimeProvider {
  #[must_use]
  pub fn new(unix_seconds: i64) -> Self {
    Self {
      time: Arc::new(AtomicI64::new(unix_seconds)),
    }
  }

  pub fn set(&self, unix_seconds: i64) {
    self.time.store(unix_seconds, Ordering::SeqCst);
  }
}

impl TimeProvider for TestTimeProvider {
  fn unix_now(&self) -> i64 {
    self.time.load(Ordering::SeqCst)
  }
}
