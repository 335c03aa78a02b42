// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use crate::config::LookupConfig;
use crate::definition::{Column, Filter, MetricRegistryBuilder};
use crate::entity::{FunctionSpec, MetricValue};
use crate::ids;
use crate::lookup::SwappableLookup;
use crate::pipeline::MockEntityInput;
use crate::test::{MINUTE_BUCKET, make_call, make_jvm};
use bd_server_stats::test::util::stats::Helper as StatsHelper;
use matches::assert_matches;
use pretty_assertions::assert_eq;
use prometheus::labels;

fn calculated(entity: &MetricEntity) -> MetricValue {
  let mut entity = entity.clone();
  entity.calculate();
  entity.value()
}

fn lookup() -> Arc<dyn ConfigLookup> {
  Arc::new(SwappableLookup::new(LookupConfig::default()))
}

fn expect_one(input: &mut MockEntityInput, entity_id: String, value: MetricValue) {
  input
    .expect_ingest()
    .times(1)
    .withf(move |entity| {
      entity.entity_id() == entity_id
        && entity.time_bucket() == MINUTE_BUCKET
        && calculated(entity) == value
    })
    .returning(|_| Ok(()));
}

fn service_registry() -> MetricRegistry {
  MetricRegistryBuilder::default()
    .register(MetricDefinition::new(
      "service_resp_time",
      SourceScope::Service,
      FunctionSpec::LongAvg,
      Column::Latency,
    ))
    .register(MetricDefinition::new(
      "service_sla",
      SourceScope::Service,
      FunctionSpec::Percent,
      Column::Success,
    ))
    .build()
    .unwrap()
}

fn make_dispatcher(
  registry: &MetricRegistry,
  scope: SourceScope,
  inputs: Vec<MockEntityInput>,
  stats_helper: &StatsHelper,
) -> RuleDispatcher {
  let rules = registry
    .for_scope(scope)
    .cloned()
    .zip(
      inputs
        .into_iter()
        .map(|input| Arc::new(input) as Arc<dyn EntityInput>),
    )
    .collect();
  RuleDispatcher::new(
    scope,
    rules,
    lookup(),
    &stats_helper.collector().scope("dispatcher"),
  )
}

#[tokio::test]
async fn one_entity_per_definition() {
  let stats_helper = StatsHelper::default();
  let service_id = ids::service_id("svc", true);
  let mut resp_time = MockEntityInput::new();
  expect_one(&mut resp_time, service_id.clone(), MetricValue::Long(250));
  let mut sla = MockEntityInput::new();
  expect_one(&mut sla, service_id, MetricValue::Long(0));

  let dispatcher = make_dispatcher(
    &service_registry(),
    SourceScope::Service,
    vec![resp_time, sla],
    &stats_helper,
  );
  dispatcher
    .dispatch(&make_call("svc", "/get", 250, false))
    .await
    .unwrap();
  stats_helper.assert_counter_eq(2, "dispatcher:service:dispatched", &labels! {});
}

#[tokio::test]
async fn endpoint_ids() {
  let stats_helper = StatsHelper::default();
  let registry = MetricRegistryBuilder::default()
    .register(MetricDefinition::new(
      "endpoint_cpm",
      SourceScope::Endpoint,
      FunctionSpec::Cpm,
      Column::Calls,
    ))
    .build()
    .unwrap();
  let mut input = MockEntityInput::new();
  expect_one(
    &mut input,
    ids::endpoint_id(&ids::service_id("svc", true), "/get"),
    MetricValue::Long(1),
  );

  let dispatcher = make_dispatcher(&registry, SourceScope::Endpoint, vec![input], &stats_helper);
  dispatcher
    .dispatch(&make_call("svc", "/get", 10, true))
    .await
    .unwrap();
}

#[tokio::test]
async fn slow_filter() {
  let stats_helper = StatsHelper::default();
  let registry = MetricRegistryBuilder::default()
    .register(
      MetricDefinition::new(
        "endpoint_slow_calls",
        SourceScope::Endpoint,
        FunctionSpec::Count,
        Column::Calls,
      )
      .with_filter(Filter::SlowerThan("default".to_string())),
    )
    .build()
    .unwrap();
  let mut input = MockEntityInput::new();
  expect_one(
    &mut input,
    ids::endpoint_id(&ids::service_id("svc", true), "/get"),
    MetricValue::Long(1),
  );

  let dispatcher = make_dispatcher(&registry, SourceScope::Endpoint, vec![input], &stats_helper);
  dispatcher
    .dispatch(&make_call("svc", "/get", 100, true))
    .await
    .unwrap();
  dispatcher
    .dispatch(&make_call("svc", "/get", 300, true))
    .await
    .unwrap();
  stats_helper.assert_counter_eq(1, "dispatcher:endpoint:filtered", &labels! {});
  stats_helper.assert_counter_eq(1, "dispatcher:endpoint:dispatched", &labels! {});
}

#[tokio::test]
async fn source_mismatch() {
  let stats_helper = StatsHelper::default();
  let dispatcher = make_dispatcher(
    &service_registry(),
    SourceScope::Service,
    vec![MockEntityInput::new(), MockEntityInput::new()],
    &stats_helper,
  );
  assert_eq!(
    Err(DispatchError::SourceMismatch {
      scope: SourceScope::Service,
      kind: "jvm",
    }),
    dispatcher.dispatch(&make_jvm("svc", 100)).await
  );
}

#[tokio::test]
async fn invalid_timestamp() {
  let stats_helper = StatsHelper::default();
  let dispatcher = make_dispatcher(
    &service_registry(),
    SourceScope::Service,
    vec![MockEntityInput::new(), MockEntityInput::new()],
    &stats_helper,
  );
  let Source::ServiceCall(mut call) = make_call("svc", "/get", 10, true) else {
    unreachable!();
  };
  call.timestamp = i64::MAX;
  assert_matches!(
    dispatcher.dispatch(&Source::ServiceCall(call)).await,
    Err(DispatchError::TimeBucket(_))
  );
}

#[tokio::test]
async fn failing_input_does_not_stop_dispatch() {
  let stats_helper = StatsHelper::default();
  let mut resp_time = MockEntityInput::new();
  resp_time
    .expect_ingest()
    .times(1)
    .returning(|_| Err(QueueError::Full));
  let mut sla = MockEntityInput::new();
  sla.expect_ingest().times(1).returning(|_| Ok(()));

  let dispatcher = make_dispatcher(
    &service_registry(),
    SourceScope::Service,
    vec![resp_time, sla],
    &stats_helper,
  );
  assert_eq!(
    Err(DispatchError::Queue(QueueError::Full)),
    dispatcher.dispatch(&make_call("svc", "/get", 10, true)).await
  );
  stats_helper.assert_counter_eq(1, "dispatcher:service:failed", &labels! {});
  stats_helper.assert_counter_eq(1, "dispatcher:service:dispatched", &labels! {});
}

#[tokio::test]
async fn manager_routes_by_scope() {
  let registry = service_registry();
  let mut dispatcher = MockSourceDispatcher::new();
  dispatcher
    .expect_dispatch()
    .times(1)
    .withf(|source| source.kind() == "service_call")
    .returning(|_| Ok(()));
  let manager = DispatcherManager::builder()
    .register(SourceScope::Service, Arc::new(dispatcher))
    .build(&registry)
    .unwrap();

  manager
    .dispatch(SourceScope::Service, &make_call("svc", "/get", 10, true))
    .await
    .unwrap();
  assert_eq!(
    Some(DispatchError::UnknownScope(SourceScope::Endpoint)),
    manager.get_dispatcher(SourceScope::Endpoint).err()
  );
  assert_eq!(
    Err(DispatchError::UnknownScope(SourceScope::Segment)),
    manager
      .dispatch(SourceScope::Segment, &make_call("svc", "/get", 10, true))
      .await
  );
}

#[test]
fn startup_validation() {
  let stats_helper = StatsHelper::default();
  let registry = service_registry();

  // No dispatcher for the service scope.
  let error = DispatcherManager::builder().build(&registry).err().unwrap();
  assert_eq!(
    "metric 'service_resp_time': no dispatcher for scope service",
    error.to_string()
  );

  // No aggregator for service_sla.
  let error = DispatcherManager::builder()
    .with_rule_dispatchers(
      &registry,
      |name| {
        (name == "service_resp_time")
          .then(|| Arc::new(MockEntityInput::new()) as Arc<dyn EntityInput>)
      },
      &lookup(),
      &stats_helper.collector().scope("dispatcher"),
    )
    .err()
    .unwrap();
  assert_eq!("no aggregator for metric 'service_sla'", error.to_string());

  let manager = DispatcherManager::builder()
    .with_rule_dispatchers(
      &registry,
      |_| Some(Arc::new(MockEntityInput::new()) as Arc<dyn EntityInput>),
      &lookup(),
      &stats_helper.collector().scope("dispatcher"),
    )
    .unwrap()
    .build(&registry)
    .unwrap();
  assert!(manager.get_dispatcher(SourceScope::Service).is_ok());
  assert!(manager.get_dispatcher(SourceScope::Segment).is_err());
}
