// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod config;
pub mod definition;
pub mod dispatcher;
pub mod entity;
pub mod ids;
pub mod lookup;
pub mod merge_cache;
pub mod pipeline;
pub mod runtime;
pub mod sink;
pub mod source;
#[cfg(test)]
pub mod test;
pub mod time;
pub mod time_bucket;

#[cfg(test)]
#[ctor::ctor]
fn test_global_init() {
  use rollup_common::global_initialize;

  global_initialize();
}
