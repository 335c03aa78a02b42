// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt


pub mod aggregator;
pub mod persistence;
pub mod queue;

use crate::config::{AggregatorConfig, PersistenceConfig};
use crate::definition::MetricRegistry;
use crate::entity::MetricEntity;
use crate::sink::MetricSink;
use crate::time::TimeProvider;
use crate::time_bucket::DownSampling;
use aggregator::Aggregator;
use async_trait::async_trait;
use bd_server_stats::stats::Scope;
use bd_shutdown::ComponentShutdownTriggerHandle;
use persistence::{PersistenceStage, PersistenceWorker};
use queue::QueueError;
use std::collections::HashMap;
use std::sync::Arc;

//
// EntityInput
//

// Entry point of an aggregator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntityInput: Send + Sync {
  // Enqueue a partial entity. Waits for space or fails, depending on the queue policy.
  async fn ingest(&self, entity: MetricEntity) -> Result<(), QueueError>;
}

//
// MetricsStreamProcessor
//

// Owns one aggregator, with its persistence stage, per registered metric.
pub struct MetricsStreamProcessor {
  aggregators: HashMap<String, Arc<Aggregator>>,
}

impl MetricsStreamProcessor {
  pub fn new(
    registry: &MetricRegistry,
    aggregator_config: &AggregatorConfig,
    persistence_config: &PersistenceConfig,
    sink: &Arc<dyn MetricSink>,
    time_provider: &Arc<dyn TimeProvider>,
    scope: &Scope,
    shutdown_trigger_handle: &ComponentShutdownTriggerHandle,
  ) -> anyhow::Result<Self> {
    let mut aggregators = HashMap::new();
    for definition in registry.definitions() {
      let scope = scope.scope(&definition.name);
      let make_worker = |level| {
        PersistenceWorker::new(
          &definition.name,
          level,
          persistence_config.retained_windows,
          sink.clone(),
          time_provider.clone(),
          &scope,
        )
      };

      let mut rollups = Vec::new();
      if definition.downsampling {
        if persistence_config.hour {
          rollups.push(make_worker(DownSampling::Hour));
        }
        if persistence_config.day {
          rollups.push(make_worker(DownSampling::Day));
        }
      }
      let stage = Arc::new(PersistenceStage::new(
        make_worker(DownSampling::Minute),
        rollups,
      ));

      let aggregator = Aggregator::new(
        &definition.name,
        aggregator_config,
        stage,
        &scope,
        shutdown_trigger_handle.make_shutdown(),
      )?;
      aggregators.insert(definition.name.clone(), aggregator);
    }

    log::info!("started {} aggregator(s)", aggregators.len());
    Ok(Self { aggregators })
  }

  #[must_use]
  pub fn aggregator(&self, name: &str) -> Option<Arc<Aggregator>> {
    self.aggregators.get(name).cloned()
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.aggregators.len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.aggregators.is_empty()
  }
}
