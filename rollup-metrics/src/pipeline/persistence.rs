// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./persistence_test.rs"]
mod persistence_test;

use super::aggregator::AggregationHandler;
use crate::entity::{EntityKey, MetricEntity};
use crate::sink::MetricSink;
use crate::time::TimeProvider;
use crate::time_bucket::{self, DownSampling};
use async_trait::async_trait;
use bd_server_stats::stats::Scope;
use parking_lot::Mutex;
use prometheus::IntCounter;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

//
// Stats
//

struct Stats {
  late: IntCounter,
  evicted: IntCounter,
  persisted: IntCounter,
  persist_failed: IntCounter,
}

//
// PersistenceWorker
//

// Keeps the running aggregate of the open windows of one downsampling level. Every incoming
// partial is combined into the running aggregate and the full value is written to the sink, which
// upserts by id. Windows older than the retained range are forgotten, and late partials for them
// are dropped.
pub struct PersistenceWorker {
  level: DownSampling,
  model: String,
  retained_windows: i64,
  retained: Mutex<HashMap<EntityKey, MetricEntity>>,
  sink: Arc<dyn MetricSink>,
  time_provider: Arc<dyn TimeProvider>,
  stats: Stats,
}

impl PersistenceWorker {
  pub fn new(
    metric_name: &str,
    level: DownSampling,
    retained_windows: u32,
    sink: Arc<dyn MetricSink>,
    time_provider: Arc<dyn TimeProvider>,
    scope: &Scope,
  ) -> Self {
    let scope = scope.scope(&format!("persistence{}", level.model_suffix()));
    Self {
      level,
      model: format!("{metric_name}{}", level.model_suffix()),
      retained_windows: i64::from(retained_windows.max(1)),
      retained: Mutex::default(),
      sink,
      time_provider,
      stats: Stats {
        late: scope.counter("late"),
        evicted: scope.counter("evicted"),
        persisted: scope.counter("persisted"),
        persist_failed: scope.counter("persist_failed"),
      },
    }
  }

  #[must_use]
  pub const fn level(&self) -> DownSampling {
    self.level
  }

  #[must_use]
  pub fn model(&self) -> &str {
    &self.model
  }

  // Oldest bucket that is still retained.
  fn watermark(&self) -> i64 {
    let now_millis = self.time_provider.unix_now_millis();
    let window_millis = self.level.modulus() * 1000;
    time_bucket::bucket(
      now_millis - (self.retained_windows - 1) * window_millis,
      self.level,
    )
    .unwrap_or(i64::MIN)
  }

  fn merge(&self, partials: Vec<MetricEntity>) -> Vec<MetricEntity> {
    let watermark = self.watermark();
    let mut retained = self.retained.lock();
    let mut changed = BTreeSet::new();
    for partial in partials {
      if partial.time_bucket() < watermark {
        self.stats.late.inc();
        log::debug!("dropping late aggregate {} for {}", partial.id(), self.model);
        continue;
      }

      let key = partial.key();
      match retained.entry(key.clone()) {
        Entry::Occupied(mut entry) => {
          if let Err(e) = entry.get_mut().combine(&partial) {
            panic!("{}: cannot merge {}: {e}", self.model, partial.id());
          }
        },
        Entry::Vacant(entry) => {
          entry.insert(partial);
        },
      }
      changed.insert(key);
    }

    let batch = changed
      .iter()
      .filter_map(|key| {
        retained.get_mut(key).map(|entity| {
          entity.calculate();
          entity.clone()
        })
      })
      .collect();

    let before = retained.len();
    retained.retain(|key, _| key.time_bucket >= watermark);
    self.stats.evicted.inc_by((before - retained.len()) as u64);
    batch
  }

  pub async fn persist(&self, partials: Vec<MetricEntity>) {
    let batch = self.merge(partials);
    if batch.is_empty() {
      return;
    }

    match self.sink.persist_batch(&self.model, &batch).await {
      Ok(()) => self.stats.persisted.inc_by(batch.len() as u64),
      Err(e) => {
        self.stats.persist_failed.inc();
        log::warn!(
          "failed to persist {} aggregate(s) of {}: {e}",
          batch.len(),
          self.model
        );
      },
    }
  }
}

//
// PersistenceStage
//

// Receives the flushes of a metric's aggregator. Minute partials are persisted as is and rolled up
// into the coarser levels.
pub struct PersistenceStage {
  minute: PersistenceWorker,
  rollups: Vec<PersistenceWorker>,
}

impl PersistenceStage {
  #[must_use]
  pub const fn new(minute: PersistenceWorker, rollups: Vec<PersistenceWorker>) -> Self {
    Self { minute, rollups }
  }
}

#[async_trait]
impl AggregationHandler for PersistenceStage {
  async fn on_next(&self, entities: Vec<MetricEntity>) {
    for rollup in &self.rollups {
      let rolled_up = entities
        .iter()
        .filter_map(|entity| {
          entity
            .to_level(rollup.level())
            .inspect_err(|e| log::warn!("cannot roll up {}: {e}", entity.id()))
            .ok()
        })
        .collect();
      rollup.persist(rolled_up).await;
    }
    self.minute.persist(entities).await;
  }
}
