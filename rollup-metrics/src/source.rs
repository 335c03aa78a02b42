// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./source_test.rs"]
mod source_test;

use crate::ids;
use serde::{Deserialize, Serialize};

// Service name used as the source of a relation when the caller is not instrumented.
pub const USER_SERVICE_NAME: &str = "User";

//
// SourceScope
//

// The kind of entity a metric is computed for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceScope {
  Service,
  ServiceInstance,
  Endpoint,
  ServiceRelation,
  ServiceInstanceJvm,
  Segment,
}

impl SourceScope {
  pub const ALL: [Self; 6] = [
    Self::Service,
    Self::ServiceInstance,
    Self::Endpoint,
    Self::ServiceRelation,
    Self::ServiceInstanceJvm,
    Self::Segment,
  ];

  #[must_use]
  pub const fn name(self) -> &'static str {
    match self {
      Self::Service => "service",
      Self::ServiceInstance => "service_instance",
      Self::Endpoint => "endpoint",
      Self::ServiceRelation => "service_relation",
      Self::ServiceInstanceJvm => "service_instance_jvm",
      Self::Segment => "segment",
    }
  }
}

//
// ServiceCall
//

// One observed call into a service, as decoded from a trace span or a mesh telemetry record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceCall {
  pub service: String,
  pub instance: String,
  pub endpoint: String,
  // Calling service, None when the call came from outside the instrumented system.
  pub source_service: Option<String>,
  pub latency: i64,
  pub success: bool,
  pub timestamp: i64,
}

//
// JvmMetrics
//

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JvmMetrics {
  pub service: String,
  pub instance: String,
  // CPU usage in basis points.
  pub cpu_usage: i64,
  pub heap_used: i64,
  pub heap_max: i64,
  pub young_gc_count: i64,
  pub young_gc_time: i64,
  pub old_gc_count: i64,
  pub old_gc_time: i64,
  pub timestamp: i64,
}

//
// Segment
//

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Segment {
  pub service: String,
  pub instance: String,
  pub endpoint: String,
  pub trace_id: String,
  pub latency: i64,
  pub is_error: bool,
  pub timestamp: i64,
}

//
// Source
//

// An already decoded telemetry record. Timestamps are milliseconds since the unix epoch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
  ServiceCall(ServiceCall),
  Jvm(JvmMetrics),
  Segment(Segment),
}

impl Source {
  #[must_use]
  pub const fn kind(&self) -> &'static str {
    match self {
      Self::ServiceCall(_) => "service_call",
      Self::Jvm(_) => "jvm",
      Self::Segment(_) => "segment",
    }
  }

  #[must_use]
  pub const fn timestamp(&self) -> i64 {
    match self {
      Self::ServiceCall(call) => call.timestamp,
      Self::Jvm(jvm) => jvm.timestamp,
      Self::Segment(segment) => segment.timestamp,
    }
  }

  #[must_use]
  pub const fn supports(&self, scope: SourceScope) -> bool {
    matches!(
      (self, scope),
      (
        Self::ServiceCall(_),
        SourceScope::Service
          | SourceScope::ServiceInstance
          | SourceScope::Endpoint
          | SourceScope::ServiceRelation
      ) | (Self::Jvm(_), SourceScope::ServiceInstanceJvm)
        | (Self::Segment(_), SourceScope::Segment)
    )
  }

  // Id of the entity this record contributes to under the given scope. None if the record cannot
  // be viewed under that scope.
  #[must_use]
  pub fn entity_id(&self, scope: SourceScope) -> Option<String> {
    match (self, scope) {
      (Self::ServiceCall(call), SourceScope::Service) => Some(ids::service_id(&call.service, true)),
      (Self::ServiceCall(call), SourceScope::ServiceInstance) => Some(ids::instance_id(
        &ids::service_id(&call.service, true),
        &call.instance,
      )),
      (Self::ServiceCall(call), SourceScope::Endpoint) => Some(ids::endpoint_id(
        &ids::service_id(&call.service, true),
        &call.endpoint,
      )),
      (Self::ServiceCall(call), SourceScope::ServiceRelation) => {
        let source_id = call.source_service.as_ref().map_or_else(
          || ids::service_id(USER_SERVICE_NAME, false),
          |source_service| ids::service_id(source_service, true),
        );
        Some(ids::relation_id(
          &source_id,
          &ids::service_id(&call.service, true),
        ))
      },
      (Self::Jvm(jvm), SourceScope::ServiceInstanceJvm) => Some(ids::instance_id(
        &ids::service_id(&jvm.service, true),
        &jvm.instance,
      )),
      (Self::Segment(segment), SourceScope::Segment) => {
        Some(ids::service_id(&segment.service, true))
      },
      _ => None,
    }
  }
}
