// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./retrying_test.rs"]
mod retrying_test;

use super::retry::Retry;
use super::{MetricSink, Result, SinkError};
use crate::config::RetryConfig;
use crate::entity::MetricEntity;
use async_trait::async_trait;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bd_server_stats::stats::Scope;
use prometheus::IntCounter;
use std::sync::Arc;

//
// Stats
//

struct Stats {
  retries: IntCounter,
  failed_transient: IntCounter,
  failed_permanent: IntCounter,
}

//
// RetryingSink
//

// Wraps a sink and retries transient failures with exponential backoff, subject to the retry
// budget. Permanent failures are returned immediately.
pub struct RetryingSink {
  inner: Arc<dyn MetricSink>,
  retry: Arc<Retry>,
  config: RetryConfig,
  stats: Stats,
}

impl RetryingSink {
  pub fn new(
    inner: Arc<dyn MetricSink>,
    config: &RetryConfig,
    scope: &Scope,
  ) -> anyhow::Result<Self> {
    Ok(Self {
      inner,
      retry: Retry::new(config)?,
      config: config.clone(),
      stats: Stats {
        retries: scope.counter("retries"),
        failed_transient: scope.counter("failed_transient"),
        failed_permanent: scope.counter("failed_permanent"),
      },
    })
  }

  fn backoff(&self) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
      .with_initial_interval(self.config.initial_backoff)
      .with_max_interval(self.config.max_backoff)
      .with_max_elapsed_time(self.config.max_elapsed_time)
      .build()
  }
}

#[async_trait]
impl MetricSink for RetryingSink {
  async fn persist_batch(&self, model: &str, entities: &[MetricEntity]) -> Result<()> {
    let result = self
      .retry
      .retry_notify(
        self.backoff(),
        || async {
          self
            .inner
            .persist_batch(model, entities)
            .await
            .map_err(|e| match e {
              SinkError::Transient(_) => backoff::Error::transient(e),
              SinkError::Permanent(_) => backoff::Error::permanent(e),
            })
        },
        || {
          log::debug!("retrying persist of {} aggregate(s) to {model}", entities.len());
          self.stats.retries.inc();
        },
      )
      .await;

    match &result {
      Ok(()) => {},
      Err(SinkError::Transient(_)) => self.stats.failed_transient.inc(),
      Err(SinkError::Permanent(_)) => self.stats.failed_permanent.inc(),
    }
    result
  }
}
