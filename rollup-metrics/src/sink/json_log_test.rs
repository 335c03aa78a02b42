// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use crate::entity::{FunctionSpec, MetricFunction};
use pretty_assertions::assert_eq;

#[test]
fn percentile_row() {
  let mut entity = MetricEntity::new(
    "c2VydmljZQ==.1",
    2_018_091_205,
    MetricFunction::new(&FunctionSpec::Percentile {
      precision: 10,
      ranks: vec![50],
    }),
  )
  .unwrap();
  entity.accept(42);
  entity.calculate();

  let row: serde_json::Value =
    serde_json::from_str(&to_json_row("service_percentile_hour", &entity).unwrap()).unwrap();
  assert_eq!(
    serde_json::json!({
      "model": "service_percentile_hour",
      "id": "2018091205_c2VydmljZQ==.1",
      "entity_id": "c2VydmljZQ==.1",
      "time_bucket": 2_018_091_205,
      "function": "percentile",
      "precision": 10,
      "ranks": [50],
      "dataset": {"4": 1},
      "values": {"50": 40},
    }),
    row
  );
}

#[tokio::test]
async fn persist() {
  let entity =
    MetricEntity::new("a", 201_809_120_511, MetricFunction::new(&FunctionSpec::Count)).unwrap();
  JsonLogSink::default()
    .persist_batch("count", &[entity])
    .await
    .unwrap();
}
