// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use crate::lookup::MockConfigLookup;
use crate::source::{JvmMetrics, ServiceCall};
use crate::test::make_segment;
use mockall::predicate::eq;
use pretty_assertions::assert_eq;

fn make_call(latency: i64, success: bool) -> Source {
  Source::ServiceCall(ServiceCall {
    service: "checkout".to_string(),
    latency,
    success,
    ..Default::default()
  })
}

#[test]
fn default_registry() {
  let registry = MetricRegistry::from_config(&MetricsConfig::default()).unwrap();
  assert_eq!(default_definitions().len(), registry.definitions().len());
  assert_eq!(
    SourceScope::Service,
    registry.get("service_resp_time").unwrap().scope
  );
  for scope in SourceScope::ALL {
    assert!(registry.for_scope(scope).count() > 0, "{scope:?}");
  }
  assert!(registry.get("unknown").is_none());

  let registry = MetricRegistry::from_config(&MetricsConfig {
    defaults: false,
    definitions: vec![],
  })
  .unwrap();
  assert!(registry.definitions().is_empty());
}

#[test]
fn duplicate_name() {
  let definition = MetricDefinition::new(
    "service_cpm",
    SourceScope::Service,
    FunctionSpec::Cpm,
    Column::Calls,
  );
  assert_eq!(
    "duplicate metric 'service_cpm'",
    MetricRegistryBuilder::default()
      .register(definition.clone())
      .register(definition)
      .build()
      .unwrap_err()
      .to_string()
  );
}

#[test]
fn invalid_definitions() {
  assert_eq!(
    "metric 'heap': column HeapUsed is not available for scope endpoint",
    MetricRegistryBuilder::default()
      .register(MetricDefinition::new(
        "heap",
        SourceScope::Endpoint,
        FunctionSpec::LongAvg,
        Column::HeapUsed
      ))
      .build()
      .unwrap_err()
      .to_string()
  );
  assert_eq!(
    "metric 'latency': histogram bounds must not be empty",
    MetricRegistryBuilder::default()
      .register(MetricDefinition::new(
        "latency",
        SourceScope::Endpoint,
        FunctionSpec::Histogram { bounds: vec![] },
        Column::Latency
      ))
      .build()
      .unwrap_err()
      .to_string()
  );
  assert_eq!(
    "invalid metric name 'bad name'",
    MetricRegistryBuilder::default()
      .register(MetricDefinition::new(
        "bad name",
        SourceScope::Endpoint,
        FunctionSpec::Count,
        Column::Calls
      ))
      .build()
      .unwrap_err()
      .to_string()
  );
}

#[test]
fn columns() {
  let call = make_call(25, false);
  assert_eq!(Some(1), Column::Calls.extract(&call));
  assert_eq!(Some(25), Column::Latency.extract(&call));
  assert_eq!(Some(0), Column::Success.extract(&call));
  assert_eq!(None, Column::HeapUsed.extract(&call));

  let jvm = Source::Jvm(JvmMetrics {
    heap_used: 512,
    old_gc_time: 7,
    ..Default::default()
  });
  assert_eq!(Some(512), Column::HeapUsed.extract(&jvm));
  assert_eq!(Some(7), Column::OldGcTime.extract(&jvm));
  assert_eq!(None, Column::Latency.extract(&jvm));
  assert_eq!(Some(1), Column::Calls.extract(&jvm));
}

#[test]
fn filters() {
  let mut lookup = MockConfigLookup::new();
  lookup
    .expect_threshold()
    .with(eq("mysql"))
    .returning(|_| 100);
  lookup
    .expect_should_sample()
    .with(eq(150))
    .times(1)
    .return_const(true);

  let slow_error = make_call(150, false);
  let fast_success = make_call(50, true);
  assert!(Filter::Error.matches(&slow_error, &lookup));
  assert!(!Filter::Error.matches(&fast_success, &lookup));
  assert!(Filter::Success.matches(&fast_success, &lookup));
  assert!(Filter::SlowerThan("mysql".to_string()).matches(&slow_error, &lookup));
  assert!(!Filter::SlowerThan("mysql".to_string()).matches(&fast_success, &lookup));
  assert!(Filter::Sampled.matches(&slow_error, &lookup));

  // JVM records have no latency so they are never slow nor sampled.
  let jvm = Source::Jvm(JvmMetrics::default());
  assert!(!Filter::SlowerThan("mysql".to_string()).matches(&jvm, &lookup));
  assert!(!Filter::Sampled.matches(&jvm, &lookup));
  assert!(!Filter::Error.matches(&jvm, &lookup));
}

#[test]
fn sampled_segments() {
  let mut lookup = MockConfigLookup::new();
  lookup.expect_should_sample().returning(|latency| latency >= 1000);
  lookup
    .expect_should_sample_trace()
    .returning(|trace_id| trace_id == "sampled");

  let make = |trace_id: &str, latency| {
    let Source::Segment(mut segment) = make_segment("svc", latency, false) else {
      unreachable!();
    };
    segment.trace_id = trace_id.to_string();
    Source::Segment(segment)
  };
  assert!(Filter::Sampled.matches(&make("sampled", 10), &lookup));
  assert!(Filter::Sampled.matches(&make("other", 1000), &lookup));
  assert!(!Filter::Sampled.matches(&make("other", 10), &lookup));

  // Every segment of a trace gets the same decision.
  assert_eq!(
    Filter::Sampled.matches(&make("sampled", 20), &lookup),
    Filter::Sampled.matches(&make("sampled", 30), &lookup)
  );
}

#[test]
fn yaml_definition() {
  let definition: MetricDefinition = serde_yaml::from_str(
    r"
name: endpoint_p99
scope: endpoint
function:
  type: percentile
  ranks: [99]
column: latency
",
  )
  .unwrap();
  assert_eq!(
    MetricDefinition::new(
      "endpoint_p99",
      SourceScope::Endpoint,
      FunctionSpec::Percentile {
        precision: 10,
        ranks: vec![99]
      },
      Column::Latency
    ),
    definition
  );
}
