// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./memory_test.rs"]
mod memory_test;

use super::{MetricSink, Result};
use crate::entity::{MetricEntity, MetricValue};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

//
// InMemorySink
//

// Keeps the latest version of every aggregate, keyed by model and id.
#[derive(Default)]
pub struct InMemorySink {
  rows: Mutex<HashMap<String, HashMap<String, MetricEntity>>>,
}

impl InMemorySink {
  #[must_use]
  pub fn get(&self, model: &str, id: &str) -> Option<MetricEntity> {
    self
      .rows
      .lock()
      .get(model)
      .and_then(|rows| rows.get(id))
      .cloned()
  }

  #[must_use]
  pub fn value(&self, model: &str, id: &str) -> Option<MetricValue> {
    self.get(model, id).map(|entity| entity.value())
  }

  #[must_use]
  pub fn len(&self, model: &str) -> usize {
    self.rows.lock().get(model).map_or(0, HashMap::len)
  }

  #[must_use]
  pub fn models(&self) -> Vec<String> {
    let mut models: Vec<_> = self.rows.lock().keys().cloned().collect();
    models.sort();
    models
  }
}

#[async_trait]
impl MetricSink for InMemorySink {
  async fn persist_batch(&self, model: &str, entities: &[MetricEntity]) -> Result<()> {
    let mut rows = self.rows.lock();
    let rows = rows.entry(model.to_string()).or_default();
    for entity in entities {
      rows.insert(entity.id(), entity.clone());
    }
    Ok(())
  }
}
