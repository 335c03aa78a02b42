// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./json_log_test.rs"]
mod json_log_test;

use super::{MetricSink, Result, SinkError};
use crate::entity::MetricEntity;
use async_trait::async_trait;
use serde::Serialize;

#[derive(Serialize)]
struct Row<'a> {
  model: &'a str,
  id: String,
  #[serde(flatten)]
  entity: &'a MetricEntity,
}

// Renders an aggregate as a single JSON row.
pub fn to_json_row(model: &str, entity: &MetricEntity) -> Result<String> {
  serde_json::to_string(&Row {
    model,
    id: entity.id(),
    entity,
  })
  .map_err(|e| SinkError::Permanent(e.to_string()))
}

//
// JsonLogSink
//

// Writes every aggregate to the log as a JSON row. Useful for debugging and the load generator.
#[derive(Default)]
pub struct JsonLogSink {}

#[async_trait]
impl MetricSink for JsonLogSink {
  async fn persist_batch(&self, model: &str, entities: &[MetricEntity]) -> Result<()> {
    for entity in entities {
      log::info!("{}", to_json_row(model, entity)?);
    }
    Ok(())
  }
}
