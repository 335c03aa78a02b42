// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use crate::entity::{FunctionSpec, MetricFunction, MetricValue};
use crate::sink::memory::InMemorySink;
use crate::sink::{MockMetricSink, SinkError};
use crate::test::{MINUTE_BUCKET, MINUTE_BUCKET_UNIX_SECONDS, make_avg, make_entity};
use crate::time::TestTimeProvider;
use bd_server_stats::test::util::stats::Helper as StatsHelper;
use pretty_assertions::assert_eq;
use prometheus::labels;

struct Helper {
  stats_helper: StatsHelper,
  sink: Arc<InMemorySink>,
  time_provider: Arc<TestTimeProvider>,
}

impl Helper {
  fn new() -> Self {
    Self {
      stats_helper: StatsHelper::default(),
      sink: Arc::new(InMemorySink::default()),
      time_provider: Arc::new(TestTimeProvider::new(MINUTE_BUCKET_UNIX_SECONDS)),
    }
  }

  fn make_worker(&self, name: &str, level: DownSampling) -> PersistenceWorker {
    PersistenceWorker::new(
      name,
      level,
      2,
      self.sink.clone(),
      self.time_provider.clone(),
      &self.stats_helper.collector().scope("test"),
    )
  }
}

#[tokio::test]
async fn running_aggregate() {
  let helper = Helper::new();
  let worker = helper.make_worker("resp_time", DownSampling::Minute);
  assert_eq!("resp_time", worker.model());

  let id = format!("{MINUTE_BUCKET}_a");
  worker.persist(vec![make_avg("a", 12, 1)]).await;
  assert_eq!(
    Some(MetricValue::Long(12)),
    helper.sink.value("resp_time", &id)
  );

  worker
    .persist(vec![make_avg("a", 24, 2), make_avg("b", 1, 1)])
    .await;
  worker.persist(vec![make_avg("a", 36, 3)]).await;
  let stored = helper.sink.get("resp_time", &id).unwrap();
  assert_eq!(MetricValue::Long(12), stored.value());
  let MetricFunction::LongAvg(avg) = stored.function() else {
    panic!("unexpected function {}", stored.function().kind());
  };
  assert_eq!((72, 6), (avg.summation(), avg.count()));
  assert_eq!(2, helper.sink.len("resp_time"));
  helper
    .stats_helper
    .assert_counter_eq(4, "test:persistence:persisted", &labels! {});
}

#[tokio::test]
async fn closed_windows_are_evicted() {
  let helper = Helper::new();
  let worker = helper.make_worker("resp_time", DownSampling::Minute);
  worker.persist(vec![make_avg("a", 10, 1)]).await;

  // The previous minute is still open.
  helper.time_provider.set(MINUTE_BUCKET_UNIX_SECONDS + 60);
  worker.persist(vec![make_avg("a", 30, 1)]).await;
  assert_eq!(
    Some(MetricValue::Long(20)),
    helper.sink.value("resp_time", &format!("{MINUTE_BUCKET}_a"))
  );

  // Two minutes later the window is closed. The late partial must not overwrite the stored value.
  helper.time_provider.set(MINUTE_BUCKET_UNIX_SECONDS + 120);
  worker.persist(vec![make_avg("a", 1000, 1)]).await;
  assert_eq!(
    Some(MetricValue::Long(20)),
    helper.sink.value("resp_time", &format!("{MINUTE_BUCKET}_a"))
  );
  helper
    .stats_helper
    .assert_counter_eq(1, "test:persistence:late", &labels! {});
  helper
    .stats_helper
    .assert_counter_eq(1, "test:persistence:evicted", &labels! {});
}

#[tokio::test]
async fn stage_rolls_up() {
  let helper = Helper::new();
  let stage = PersistenceStage::new(
    helper.make_worker("cpm", DownSampling::Minute),
    vec![
      helper.make_worker("cpm", DownSampling::Hour),
      helper.make_worker("cpm", DownSampling::Day),
    ],
  );

  let mut entity = make_entity("a", &FunctionSpec::Cpm, &[60, 60, 60, 60, 60, 60]);
  entity.calculate();
  stage.on_next(vec![entity]).await;

  assert_eq!(vec!["cpm", "cpm_day", "cpm_hour"], helper.sink.models());
  assert_eq!(
    Some(MetricValue::Long(360)),
    helper.sink.value("cpm", &format!("{MINUTE_BUCKET}_a"))
  );
  assert_eq!(
    Some(MetricValue::Long(6)),
    helper.sink.value("cpm_hour", "2018091205_a")
  );
  assert_eq!(
    Some(MetricValue::Long(0)),
    helper.sink.value("cpm_day", "20180912_a")
  );
}

#[tokio::test]
async fn sink_failure_is_counted() {
  let stats_helper = StatsHelper::default();
  let mut sink = MockMetricSink::new();
  sink
    .expect_persist_batch()
    .times(1)
    .returning(|_, _| Err(SinkError::Permanent("down".to_string())));
  let worker = PersistenceWorker::new(
    "resp_time",
    DownSampling::Minute,
    2,
    Arc::new(sink),
    Arc::new(TestTimeProvider::new(MINUTE_BUCKET_UNIX_SECONDS)),
    &stats_helper.collector().scope("test"),
  );
  worker.persist(vec![make_avg("a", 10, 1)]).await;
  stats_helper.assert_counter_eq(1, "test:persistence:persist_failed", &labels! {});

  // Nothing to persist means no sink call.
  worker.persist(vec![]).await;
}
