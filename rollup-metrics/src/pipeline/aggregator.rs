// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./aggregator_test.rs"]
mod aggregator_test;

use super::EntityInput;
use super::queue::{BoundedQueue, Envelope, QueueError};
use crate::config::AggregatorConfig;
use crate::entity::MetricEntity;
use crate::merge_cache::MergeDataCache;
use anyhow::Context;
use async_trait::async_trait;
use bd_server_stats::stats::Scope;
use bd_shutdown::ComponentShutdown;
use prometheus::{Histogram, IntCounter};
use std::sync::Arc;

//
// AggregationHandler
//

// Receives the calculated entities of every flush.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AggregationHandler: Send + Sync {
  async fn on_next(&self, entities: Vec<MetricEntity>);
}

//
// Stats
//

struct Stats {
  received: IntCounter,
  flushes: IntCounter,
  flushed: IntCounter,
  flush_time: Histogram,
}

//
// Aggregator
//

// Merges the entities of a single metric. Producers enqueue partial entities, and a single
// consumer task merges them into a double buffered cache. The cache is flushed at the end of
// every batch pulled from the queue or after flush_threshold entities, whichever comes first.
pub struct Aggregator {
  name: String,
  queue: BoundedQueue<MetricEntity>,
  cache: MergeDataCache<MetricEntity>,
  handler: Arc<dyn AggregationHandler>,
  batch_size: usize,
  flush_threshold: u64,
  stats: Stats,
}

impl Aggregator {
  pub fn new(
    name: &str,
    config: &AggregatorConfig,
    handler: Arc<dyn AggregationHandler>,
    scope: &Scope,
    shutdown: ComponentShutdown,
  ) -> anyhow::Result<Arc<Self>> {
    let drain_poll_interval: time::Duration = config
      .drain_poll_interval
      .try_into()
      .context("invalid drain poll interval")?;
    let aggregator = Arc::new(Self {
      name: name.to_string(),
      queue: BoundedQueue::new(config.queue_capacity, config.full_policy, scope),
      cache: MergeDataCache::new(drain_poll_interval, &scope.scope("cache")),
      handler,
      batch_size: config.batch_size.max(1),
      flush_threshold: config.flush_threshold.max(1),
      stats: Stats {
        received: scope.counter("received"),
        flushes: scope.counter("flushes"),
        flushed: scope.counter("flushed"),
        flush_time: scope.histogram("flush_time"),
      },
    });

    let cloned_aggregator = aggregator.clone();
    tokio::spawn(async move {
      cloned_aggregator.consume_loop(shutdown).await;
    });

    Ok(aggregator)
  }

  #[must_use]
  pub fn name(&self) -> &str {
    &self.name
  }

  async fn consume_loop(&self, mut shutdown: ComponentShutdown) {
    let mut pending = 0;
    loop {
      tokio::select! {
        () = shutdown.cancelled() => {
          log::debug!("shutting down aggregator {}", self.name);
          break;
        }
        batch = self.queue.pop_batch(self.batch_size) => {
          self.consume(batch, &mut pending).await;
        }
      }
    }

    // Everything that made it into the queue is still aggregated and handed off.
    self.queue.close();
    loop {
      let batch = self.queue.pop_batch(self.batch_size).await;
      if batch.is_empty() {
        break;
      }
      self.consume(batch, &mut pending).await;
    }
    let remaining = self.cache.drain_all().await;
    self.emit(remaining).await;
    log::debug!("aggregator {} shutdown drain complete", self.name);
    drop(shutdown);
  }

  async fn consume(&self, batch: Vec<Envelope<MetricEntity>>, pending: &mut u64) {
    log::trace!("aggregator {} consuming {} entities", self.name, batch.len());
    for envelope in batch {
      self.stats.received.inc();
      if let Err((entity, e)) = self.cache.put(envelope.message) {
        // Two entities with the same key but a different shape means the metric definitions are
        // inconsistent. There is no way to make progress.
        panic!("aggregator {}: cannot merge {}: {e}", self.name, entity.id());
      }

      *pending += 1;
      if *pending >= self.flush_threshold || envelope.end_of_batch.is_end_of_batch() {
        self.flush().await;
        *pending = 0;
      }
    }
  }

  async fn flush(&self) {
    let _flush_time = self.stats.flush_time.start_timer();
    let entities = match self.cache.flush().await {
      Ok(entities) => entities,
      Err(e) => {
        log::error!("aggregator {} flush failed, draining: {e}", self.name);
        self.cache.drain_all().await
      },
    };
    self.emit(entities).await;
  }

  async fn emit(&self, mut entities: Vec<MetricEntity>) {
    self.stats.flushes.inc();
    if entities.is_empty() {
      return;
    }

    for entity in &mut entities {
      entity.calculate();
    }
    log::debug!("aggregator {} flushing {} entities", self.name, entities.len());
    self.stats.flushed.inc_by(entities.len() as u64);
    self.handler.on_next(entities).await;
  }
}

#[async_trait]
impl EntityInput for Aggregator {
  async fn ingest(&self, entity: MetricEntity) -> Result<(), QueueError> {
    self.queue.push(entity).await
  }
}
