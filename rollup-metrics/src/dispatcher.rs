// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./dispatcher_test.rs"]
mod dispatcher_test;

use crate::definition::{MetricDefinition, MetricRegistry};
use crate::entity::{EntityError, MetricEntity, MetricFunction};
use crate::lookup::ConfigLookup;
use crate::pipeline::EntityInput;
use crate::pipeline::queue::QueueError;
use crate::source::{Source, SourceScope};
use crate::time_bucket::{self, DownSampling, TimeBucketError};
use anyhow::bail;
use async_trait::async_trait;
use bd_server_stats::stats::Scope;
use prometheus::IntCounter;
use std::collections::HashMap;
use std::sync::Arc;

//
// DispatchError
//

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DispatchError {
  #[error("no dispatcher registered for scope {}", .0.name())]
  UnknownScope(SourceScope),
  #[error("a {kind} record cannot be dispatched under scope {}", .scope.name())]
  SourceMismatch {
    scope: SourceScope,
    kind: &'static str,
  },
  #[error(transparent)]
  TimeBucket(#[from] TimeBucketError),
  #[error(transparent)]
  Entity(#[from] EntityError),
  #[error(transparent)]
  Queue(#[from] QueueError),
}

pub type Result<T> = std::result::Result<T, DispatchError>;

//
// SourceDispatcher
//

// Turns a source record into metric entities for the aggregators of one scope.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceDispatcher: Send + Sync {
  async fn dispatch(&self, source: &Source) -> Result<()>;
}

//
// RuleDispatcher
//

struct Rule {
  definition: Arc<MetricDefinition>,
  input: Arc<dyn EntityInput>,
}

struct Stats {
  dispatched: IntCounter,
  filtered: IntCounter,
  failed: IntCounter,
}

// Dispatches to every metric definition of a scope. Each matching definition gets a fresh minute
// entity holding the single value extracted from the record.
pub struct RuleDispatcher {
  scope: SourceScope,
  rules: Vec<Rule>,
  lookup: Arc<dyn ConfigLookup>,
  stats: Stats,
}

impl RuleDispatcher {
  #[must_use]
  pub fn new(
    scope: SourceScope,
    rules: Vec<(Arc<MetricDefinition>, Arc<dyn EntityInput>)>,
    lookup: Arc<dyn ConfigLookup>,
    stats_scope: &Scope,
  ) -> Self {
    let stats_scope = stats_scope.scope(scope.name());
    Self {
      scope,
      rules: rules
        .into_iter()
        .map(|(definition, input)| Rule { definition, input })
        .collect(),
      lookup,
      stats: Stats {
        dispatched: stats_scope.counter("dispatched"),
        filtered: stats_scope.counter("filtered"),
        failed: stats_scope.counter("failed"),
      },
    }
  }

  fn make_entity(
    &self,
    definition: &MetricDefinition,
    entity_id: &str,
    minute: i64,
    source: &Source,
  ) -> Result<Option<MetricEntity>> {
    let filtered = definition
      .filter
      .as_ref()
      .is_some_and(|filter| !filter.matches(source, self.lookup.as_ref()));
    if filtered {
      return Ok(None);
    }
    let Some(value) = definition.column.extract(source) else {
      return Ok(None);
    };

    let mut entity = MetricEntity::new(
      entity_id,
      minute,
      MetricFunction::new(&definition.function),
    )?;
    entity.accept(value);
    Ok(Some(entity))
  }
}

#[async_trait]
impl SourceDispatcher for RuleDispatcher {
  async fn dispatch(&self, source: &Source) -> Result<()> {
    let mismatch = || DispatchError::SourceMismatch {
      scope: self.scope,
      kind: source.kind(),
    };
    if !source.supports(self.scope) {
      return Err(mismatch());
    }
    let entity_id = source.entity_id(self.scope).ok_or_else(mismatch)?;
    let minute = time_bucket::bucket(source.timestamp(), DownSampling::Minute)?;

    // A failing aggregator does not keep the others from seeing the record. The first error is
    // reported.
    let mut result = Ok(());
    for rule in &self.rules {
      let entity = match self.make_entity(&rule.definition, &entity_id, minute, source) {
        Ok(Some(entity)) => entity,
        Ok(None) => {
          self.stats.filtered.inc();
          continue;
        },
        Err(e) => {
          self.stats.failed.inc();
          result = result.and(Err(e));
          continue;
        },
      };

      log::trace!("dispatching {} to {}", entity.id(), rule.definition.name);
      match rule.input.ingest(entity).await {
        Ok(()) => self.stats.dispatched.inc(),
        Err(e) => {
          self.stats.failed.inc();
          result = result.and(Err(e.into()));
        },
      }
    }
    result
  }
}

//
// DispatcherManager
//

// Routes records to the dispatcher of their scope. Built once at startup and immutable after.
pub struct DispatcherManager {
  dispatchers: HashMap<SourceScope, Arc<dyn SourceDispatcher>>,
}

impl DispatcherManager {
  #[must_use]
  pub fn builder() -> DispatcherManagerBuilder {
    DispatcherManagerBuilder::default()
  }

  pub fn get_dispatcher(&self, scope: SourceScope) -> Result<&Arc<dyn SourceDispatcher>> {
    self
      .dispatchers
      .get(&scope)
      .ok_or(DispatchError::UnknownScope(scope))
  }

  pub async fn dispatch(&self, scope: SourceScope, source: &Source) -> Result<()> {
    self.get_dispatcher(scope)?.dispatch(source).await
  }
}

#[derive(Default)]
pub struct DispatcherManagerBuilder {
  dispatchers: HashMap<SourceScope, Arc<dyn SourceDispatcher>>,
}

impl DispatcherManagerBuilder {
  #[must_use]
  pub fn register(mut self, scope: SourceScope, dispatcher: Arc<dyn SourceDispatcher>) -> Self {
    self.dispatchers.insert(scope, dispatcher);
    self
  }

  // Register a RuleDispatcher for every scope that has definitions. Fails if a definition has no
  // input to dispatch to.
  pub fn with_rule_dispatchers(
    mut self,
    registry: &MetricRegistry,
    inputs: impl Fn(&str) -> Option<Arc<dyn EntityInput>>,
    lookup: &Arc<dyn ConfigLookup>,
    stats_scope: &Scope,
  ) -> anyhow::Result<Self> {
    for scope in SourceScope::ALL {
      let mut rules = Vec::new();
      for definition in registry.for_scope(scope) {
        let Some(input) = inputs(&definition.name) else {
          bail!("no aggregator for metric '{}'", definition.name);
        };
        rules.push((definition.clone(), input));
      }
      if rules.is_empty() {
        continue;
      }

      log::debug!(
        "dispatching scope {} to {} metric(s)",
        scope.name(),
        rules.len()
      );
      self = self.register(
        scope,
        Arc::new(RuleDispatcher::new(scope, rules, lookup.clone(), stats_scope)),
      );
    }
    Ok(self)
  }

  // Fails if any registered definition has a scope without a dispatcher.
  pub fn build(self, registry: &MetricRegistry) -> anyhow::Result<DispatcherManager> {
    for definition in registry.definitions() {
      if !self.dispatchers.contains_key(&definition.scope) {
        bail!(
          "metric '{}': no dispatcher for scope {}",
          definition.name,
          definition.scope.name()
        );
      }
    }

    Ok(DispatcherManager {
      dispatchers: self.dispatchers,
    })
  }
}
