// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::entity::{AvgFunction, FunctionSpec, MetricEntity, MetricFunction};
use crate::source::{JvmMetrics, Segment, ServiceCall, Source};

// 2018-09-12T05:11:42Z
pub const MINUTE_BUCKET_UNIX_SECONDS: i64 = 1_536_729_102;
pub const MINUTE_BUCKET: i64 = 201_809_120_511;

#[must_use]
pub fn make_entity(entity_id: &str, spec: &FunctionSpec, values: &[i64]) -> MetricEntity {
  let mut entity = MetricEntity::new(entity_id, MINUTE_BUCKET, MetricFunction::new(spec)).unwrap();
  for value in values {
    entity.accept(*value);
  }
  entity
}

// A pre-aggregated average partial.
#[must_use]
pub fn make_avg(entity_id: &str, summation: i64, count: i64) -> MetricEntity {
  let mut avg = AvgFunction::default();
  avg.combine_value(summation, count);
  MetricEntity::new(entity_id, MINUTE_BUCKET, MetricFunction::LongAvg(avg)).unwrap()
}

#[must_use]
pub fn make_call(service: &str, endpoint: &str, latency: i64, success: bool) -> Source {
  Source::ServiceCall(ServiceCall {
    service: service.to_string(),
    instance: format!("{service}-0"),
    endpoint: endpoint.to_string(),
    source_service: None,
    latency,
    success,
    timestamp: MINUTE_BUCKET_UNIX_SECONDS * 1000,
  })
}

#[must_use]
pub fn make_jvm(service: &str, heap_used: i64) -> Source {
  Source::Jvm(JvmMetrics {
    service: service.to_string(),
    instance: format!("{service}-0"),
    heap_used,
    heap_max: heap_used * 2,
    timestamp: MINUTE_BUCKET_UNIX_SECONDS * 1000,
    ..Default::default()
  })
}

#[must_use]
pub fn make_segment(service: &str, latency: i64, is_error: bool) -> Source {
  Source::Segment(Segment {
    service: service.to_string(),
    instance: format!("{service}-0"),
    endpoint: "/".to_string(),
    trace_id: "trace".to_string(),
    latency,
    is_error,
    timestamp: MINUTE_BUCKET_UNIX_SECONDS * 1000,
  })
}
