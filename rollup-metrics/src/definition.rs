// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./definition_test.rs"]
mod definition_test;

use crate::config::MetricsConfig;
use crate::entity::FunctionSpec;
use crate::lookup::ConfigLookup;
use crate::source::{Source, SourceScope};
use anyhow::{anyhow, bail};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

const fn default_downsampling() -> bool {
  true
}

//
// Column
//

// The value of a source record that a metric aggregates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
  Latency,
  // Always 1. Used to count calls.
  Calls,
  // 1 for a successful call, 0 otherwise.
  Success,
  CpuUsage,
  HeapUsed,
  HeapMax,
  YoungGcCount,
  YoungGcTime,
  OldGcCount,
  OldGcTime,
}

impl Column {
  #[must_use]
  pub const fn extract(self, source: &Source) -> Option<i64> {
    match (self, source) {
      (Self::Calls, _) => Some(1),
      (Self::Latency, Source::ServiceCall(call)) => Some(call.latency),
      (Self::Latency, Source::Segment(segment)) => Some(segment.latency),
      (Self::Success, Source::ServiceCall(call)) => Some(call.success as i64),
      (Self::Success, Source::Segment(segment)) => Some(!segment.is_error as i64),
      (Self::CpuUsage, Source::Jvm(jvm)) => Some(jvm.cpu_usage),
      (Self::HeapUsed, Source::Jvm(jvm)) => Some(jvm.heap_used),
      (Self::HeapMax, Source::Jvm(jvm)) => Some(jvm.heap_max),
      (Self::YoungGcCount, Source::Jvm(jvm)) => Some(jvm.young_gc_count),
      (Self::YoungGcTime, Source::Jvm(jvm)) => Some(jvm.young_gc_time),
      (Self::OldGcCount, Source::Jvm(jvm)) => Some(jvm.old_gc_count),
      (Self::OldGcTime, Source::Jvm(jvm)) => Some(jvm.old_gc_time),
      _ => None,
    }
  }

  // Whether records dispatched under the scope carry this column.
  #[must_use]
  pub const fn available_for(self, scope: SourceScope) -> bool {
    match self {
      Self::Calls => true,
      Self::Latency | Self::Success => !matches!(scope, SourceScope::ServiceInstanceJvm),
      Self::CpuUsage
      | Self::HeapUsed
      | Self::HeapMax
      | Self::YoungGcCount
      | Self::YoungGcTime
      | Self::OldGcCount
      | Self::OldGcTime => matches!(scope, SourceScope::ServiceInstanceJvm),
    }
  }
}

//
// Filter
//

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
  Error,
  Success,
  // Latency at or above the slow threshold of the named kind.
  SlowerThan(String),
  // Slow segments, and segments of traces within the sample rate.
  Sampled,
}

impl Filter {
  #[must_use]
  pub fn matches(&self, source: &Source, lookup: &dyn ConfigLookup) -> bool {
    let success = Column::Success.extract(source).is_none_or(|success| success == 1);
    match self {
      Self::Error => !success,
      Self::Success => success,
      Self::SlowerThan(kind) => Column::Latency
        .extract(source)
        .is_some_and(|latency| latency >= lookup.threshold(kind)),
      Self::Sampled => {
        let slow = Column::Latency
          .extract(source)
          .is_some_and(|latency| lookup.should_sample(latency));
        slow
          || matches!(
            source,
            Source::Segment(segment) if lookup.should_sample_trace(&segment.trace_id)
          )
      },
    }
  }
}

//
// MetricDefinition
//

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricDefinition {
  pub name: String,
  pub scope: SourceScope,
  pub function: FunctionSpec,
  pub column: Column,
  #[serde(default)]
  pub filter: Option<Filter>,
  // Whether hour and day aggregates are kept in addition to minute aggregates.
  #[serde(default = "default_downsampling")]
  pub downsampling: bool,
}

impl MetricDefinition {
  #[must_use]
  pub fn new(name: &str, scope: SourceScope, function: FunctionSpec, column: Column) -> Self {
    Self {
      name: name.to_string(),
      scope,
      function,
      column,
      filter: None,
      downsampling: true,
    }
  }

  #[must_use]
  pub fn with_filter(mut self, filter: Filter) -> Self {
    self.filter = Some(filter);
    self
  }

  #[must_use]
  pub const fn without_downsampling(mut self) -> Self {
    self.downsampling = false;
    self
  }

  fn validate(&self) -> anyhow::Result<()> {
    if self.name.is_empty()
      || !self
        .name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
      bail!("invalid metric name '{}'", self.name);
    }
    self
      .function
      .validate()
      .map_err(|e| anyhow!("metric '{}': {e}", self.name))?;
    if !self.column.available_for(self.scope) {
      bail!(
        "metric '{}': column {:?} is not available for scope {}",
        self.name,
        self.column,
        self.scope.name()
      );
    }
    Ok(())
  }
}

// The metrics every deployment computes unless disabled in config.
#[must_use]
pub fn default_definitions() -> Vec<MetricDefinition> {
  use Column::{
    Calls,
    CpuUsage,
    HeapMax,
    HeapUsed,
    Latency,
    OldGcCount,
    OldGcTime,
    Success,
    YoungGcCount,
    YoungGcTime,
  };
  use FunctionSpec::{Count, Cpm, LongAvg, Max, Percent, Sum};
  use SourceScope::{
    Endpoint,
    Segment,
    Service,
    ServiceInstance,
    ServiceInstanceJvm,
    ServiceRelation,
  };

  vec![
    MetricDefinition::new("service_resp_time", Service, LongAvg, Latency),
    MetricDefinition::new("service_sla", Service, Percent, Success),
    MetricDefinition::new("service_cpm", Service, Cpm, Calls),
    MetricDefinition::new("service_max_resp_time", Service, Max, Latency),
    MetricDefinition::new("service_percentile", Service, FunctionSpec::percentile(), Latency),
    MetricDefinition::new("service_instance_resp_time", ServiceInstance, LongAvg, Latency),
    MetricDefinition::new("service_instance_sla", ServiceInstance, Percent, Success),
    MetricDefinition::new("service_instance_cpm", ServiceInstance, Cpm, Calls),
    MetricDefinition::new("endpoint_resp_time", Endpoint, LongAvg, Latency),
    MetricDefinition::new("endpoint_sla", Endpoint, Percent, Success),
    MetricDefinition::new("endpoint_cpm", Endpoint, Cpm, Calls),
    MetricDefinition::new("endpoint_percentile", Endpoint, FunctionSpec::percentile(), Latency),
    MetricDefinition::new("endpoint_slow_calls", Endpoint, Count, Calls)
      .with_filter(Filter::SlowerThan("default".to_string())),
    MetricDefinition::new("service_relation_cpm", ServiceRelation, Cpm, Calls),
    MetricDefinition::new("service_relation_resp_time", ServiceRelation, LongAvg, Latency),
    MetricDefinition::new("instance_jvm_cpu", ServiceInstanceJvm, LongAvg, CpuUsage),
    MetricDefinition::new("instance_jvm_memory_heap", ServiceInstanceJvm, LongAvg, HeapUsed),
    MetricDefinition::new("instance_jvm_memory_heap_max", ServiceInstanceJvm, LongAvg, HeapMax),
    MetricDefinition::new("instance_jvm_young_gc_count", ServiceInstanceJvm, Sum, YoungGcCount),
    MetricDefinition::new("instance_jvm_young_gc_time", ServiceInstanceJvm, Sum, YoungGcTime),
    MetricDefinition::new("instance_jvm_old_gc_count", ServiceInstanceJvm, Sum, OldGcCount),
    MetricDefinition::new("instance_jvm_old_gc_time", ServiceInstanceJvm, Sum, OldGcTime),
    MetricDefinition::new(
      "segment_latency_histogram",
      Segment,
      FunctionSpec::Histogram {
        bounds: vec![0, 100, 200, 500, 1000, 2000, 5000],
      },
      Latency,
    ),
    MetricDefinition::new("segment_error_count", Segment, Count, Calls).with_filter(Filter::Error),
    MetricDefinition::new("segment_sampled_count", Segment, Count, Calls)
      .with_filter(Filter::Sampled)
      .without_downsampling(),
  ]
}

//
// MetricRegistry
//

// The set of metrics computed by the pipeline. Built once at startup and shared read only.
#[derive(Debug, Default)]
pub struct MetricRegistry {
  definitions: Vec<Arc<MetricDefinition>>,
}

impl MetricRegistry {
  pub fn from_config(config: &MetricsConfig) -> anyhow::Result<Self> {
    let mut builder = MetricRegistryBuilder::default();
    if config.defaults {
      for definition in default_definitions() {
        builder = builder.register(definition);
      }
    }
    for definition in &config.definitions {
      builder = builder.register(definition.clone());
    }
    builder.build()
  }

  #[must_use]
  pub fn definitions(&self) -> &[Arc<MetricDefinition>] {
    &self.definitions
  }

  pub fn for_scope(&self, scope: SourceScope) -> impl Iterator<Item = &Arc<MetricDefinition>> {
    self
      .definitions
      .iter()
      .filter(move |definition| definition.scope == scope)
  }

  #[must_use]
  pub fn get(&self, name: &str) -> Option<&Arc<MetricDefinition>> {
    self
      .definitions
      .iter()
      .find(|definition| definition.name == name)
  }
}

#[derive(Default)]
pub struct MetricRegistryBuilder {
  definitions: Vec<MetricDefinition>,
}

impl MetricRegistryBuilder {
  #[must_use]
  pub fn register(mut self, definition: MetricDefinition) -> Self {
    self.definitions.push(definition);
    self
  }

  pub fn build(self) -> anyhow::Result<MetricRegistry> {
    let mut names = HashSet::new();
    for definition in &self.definitions {
      definition.validate()?;
      if !names.insert(definition.name.as_str()) {
        bail!("duplicate metric '{}'", definition.name);
      }
    }

    log::info!("registered {} metric definition(s)", self.definitions.len());
    Ok(MetricRegistry {
      definitions: self.definitions.into_iter().map(Arc::new).collect(),
    })
  }
}
