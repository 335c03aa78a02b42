// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./runtime_test.rs"]
mod runtime_test;

use crate::config::{Config, LookupConfig};
use crate::definition::MetricRegistry;
use crate::dispatcher::{self, DispatcherManager};
use crate::lookup::{ConfigLookup, SwappableLookup};
use crate::pipeline::{EntityInput, MetricsStreamProcessor};
use crate::sink::MetricSink;
use crate::sink::retrying::RetryingSink;
use crate::source::{Source, SourceScope};
use crate::time::TimeProvider;
use bd_server_stats::stats::Scope;
use bd_shutdown::ComponentShutdownTriggerHandle;
use std::sync::Arc;

//
// RollupRuntime
//

// The assembled pipeline: dispatchers feeding one aggregator per metric, persisted through a
// retrying sink. Must be created within a tokio runtime. Aggregators drain and exit when the
// shutdown trigger behind the handle fires.
pub struct RollupRuntime {
  registry: MetricRegistry,
  processor: MetricsStreamProcessor,
  dispatchers: DispatcherManager,
  lookup: Arc<SwappableLookup>,
}

impl RollupRuntime {
  pub fn new(
    config: &Config,
    sink: Arc<dyn MetricSink>,
    time_provider: Arc<dyn TimeProvider>,
    scope: &Scope,
    shutdown_trigger_handle: &ComponentShutdownTriggerHandle,
  ) -> anyhow::Result<Self> {
    let registry = MetricRegistry::from_config(&config.metrics)?;
    let sink: Arc<dyn MetricSink> = Arc::new(RetryingSink::new(
      sink,
      &config.sink.retry,
      &scope.scope("sink"),
    )?);
    let processor = MetricsStreamProcessor::new(
      &registry,
      &config.aggregator,
      &config.persistence,
      &sink,
      &time_provider,
      &scope.scope("metrics"),
      shutdown_trigger_handle,
    )?;

    let lookup = Arc::new(SwappableLookup::new(config.lookup.clone()));
    let dispatchers = DispatcherManager::builder()
      .with_rule_dispatchers(
        &registry,
        |name| {
          processor
            .aggregator(name)
            .map(|aggregator| aggregator as Arc<dyn EntityInput>)
        },
        &(lookup.clone() as Arc<dyn ConfigLookup>),
        &scope.scope("dispatcher"),
      )?
      .build(&registry)?;

    log::info!(
      "rollup runtime started with {} metric(s)",
      registry.definitions().len()
    );
    Ok(Self {
      registry,
      processor,
      dispatchers,
      lookup,
    })
  }

  #[must_use]
  pub const fn registry(&self) -> &MetricRegistry {
    &self.registry
  }

  #[must_use]
  pub const fn processor(&self) -> &MetricsStreamProcessor {
    &self.processor
  }

  pub async fn dispatch(&self, scope: SourceScope, source: &Source) -> dispatcher::Result<()> {
    self.dispatchers.dispatch(scope, source).await
  }

  // Dispatch a record under every scope that can view it. Returns the first error.
  pub async fn dispatch_all(&self, source: &Source) -> dispatcher::Result<()> {
    let mut result = Ok(());
    for scope in SourceScope::ALL {
      if !source.supports(scope) || self.dispatchers.get_dispatcher(scope).is_err() {
        continue;
      }
      result = result.and(self.dispatch(scope, source).await);
    }
    result
  }

  pub fn update_lookup(&self, config: LookupConfig) {
    self.lookup.update(config);
  }
}
