// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod config;

use bd_log::SwapLogger;
use bd_panic::PanicType;

#[cfg(test)]
#[ctor::ctor]
fn test_global_init() {
  global_initialize();
}

pub fn global_initialize() {
  // A combine on incompatible aggregate shapes panics inside an aggregator task. Force abort so
  // that the process does not keep running with a dead consumer and a growing queue.
  bd_panic::default(PanicType::ForceAbort);

  SwapLogger::initialize();

  #[cfg(not(debug_assertions))]
  unsafe {
    std::env::set_var("LOG_PANIC", "true");
  }

  if std::env::var("ENABLE_TOKIO_CONSOLE").is_ok() {
    console_subscriber::init();
  }
}

pub trait LossyIntoToFloat {
  fn lossy_to_f64(self) -> f64;
}

impl LossyIntoToFloat for u64 {
  #[allow(clippy::cast_precision_loss)]
  fn lossy_to_f64(self) -> f64 {
    self as f64
  }
}

impl LossyIntoToFloat for i64 {
  #[allow(clippy::cast_precision_loss)]
  fn lossy_to_f64(self) -> f64 {
    self as f64
  }
}
