// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod json_log;
pub mod memory;
pub mod retry;
pub mod retrying;

use crate::entity::MetricEntity;
use async_trait::async_trait;

//
// SinkError
//

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
  // Worth retrying, e.g. a timeout or an overloaded backend.
  #[error("transient sink error: {0}")]
  Transient(String),
  #[error("permanent sink error: {0}")]
  Permanent(String),
}

pub type Result<T> = std::result::Result<T, SinkError>;

//
// MetricSink
//

// Destination of finished aggregates. Writes must be idempotent upserts keyed by model and entity
// id so that rewriting the latest value of an aggregate is always safe.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricSink: Send + Sync {
  async fn persist_batch(&self, model: &str, entities: &[MetricEntity]) -> Result<()>;

  async fn persist(&self, model: &str, entity: &MetricEntity) -> Result<()> {
    self
      .persist_batch(model, std::slice::from_ref(entity))
      .await
  }
}
