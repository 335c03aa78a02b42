// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./queue_test.rs"]
mod queue_test;

use bd_log::warn_every;
use bd_server_stats::stats::Scope;
use event_listener::{Event, listener};
use parking_lot::Mutex;
use prometheus::{IntCounter, IntGauge};
use serde::Deserialize;
use std::collections::VecDeque;
use time::ext::NumericalDuration;

//
// QueueFullPolicy
//

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueFullPolicy {
  // Wait for space.
  #[default]
  Block,
  // Drop the incoming message.
  Drop,
}

//
// QueueError
//

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum QueueError {
  #[error("queue is full")]
  Full,
  #[error("queue is closed")]
  Closed,
}

//
// EndOfBatchContext
//

// Marks the last message of a batch handed to the consumer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EndOfBatchContext(bool);

impl EndOfBatchContext {
  #[must_use]
  pub const fn new(end_of_batch: bool) -> Self {
    Self(end_of_batch)
  }

  #[must_use]
  pub const fn is_end_of_batch(self) -> bool {
    self.0
  }
}

#[derive(Debug)]
pub struct Envelope<T> {
  pub message: T,
  pub end_of_batch: EndOfBatchContext,
}

//
// Stats
//

struct Stats {
  dropped: IntCounter,
  rejected: IntCounter,
  depth: IntGauge,
}

struct LockedData<T> {
  messages: VecDeque<Envelope<T>>,
  closed: bool,
}

//
// BoundedQueue
//

// Multi producer FIFO queue with a fixed capacity. Producers either wait for space or drop,
// depending on the policy. Once closed, pushes are rejected while the remaining messages can still
// be popped.
pub struct BoundedQueue<T> {
  locked_data: Mutex<LockedData<T>>,
  capacity: usize,
  policy: QueueFullPolicy,
  not_empty: Event,
  not_full: Event,
  stats: Stats,
}

impl<T> BoundedQueue<T> {
  pub fn new(capacity: usize, policy: QueueFullPolicy, scope: &Scope) -> Self {
    Self {
      locked_data: Mutex::new(LockedData {
        messages: VecDeque::with_capacity(capacity.min(1024)),
        closed: false,
      }),
      capacity: capacity.max(1),
      policy,
      not_empty: Event::new(),
      not_full: Event::new(),
      stats: Stats {
        dropped: scope.counter("dropped"),
        rejected: scope.counter("rejected"),
        depth: scope.gauge("queue_depth"),
      },
    }
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.locked_data.lock().messages.len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn try_push(&self, message: T) -> Result<(), (T, QueueError)> {
    {
      let mut locked_data = self.locked_data.lock();
      if locked_data.closed {
        return Err((message, QueueError::Closed));
      }
      if locked_data.messages.len() >= self.capacity {
        return Err((message, QueueError::Full));
      }
      locked_data.messages.push_back(Envelope {
        message,
        end_of_batch: EndOfBatchContext::new(false),
      });
      self.stats.depth.set(locked_data.messages.len().try_into().unwrap_or(i64::MAX));
    }
    self.not_empty.notify_additional(1);
    Ok(())
  }

  pub async fn push(&self, mut message: T) -> Result<(), QueueError> {
    loop {
      // The listener is registered before checking for space so a pop in between is not missed.
      listener!(self.not_full => listener);
      match self.try_push(message) {
        Ok(()) => return Ok(()),
        Err((_, QueueError::Closed)) => {
          self.stats.rejected.inc();
          return Err(QueueError::Closed);
        },
        Err((returned, QueueError::Full)) => {
          if self.policy == QueueFullPolicy::Drop {
            self.stats.dropped.inc();
            warn_every!(
              15.seconds(),
              "queue full with {} message(s), dropping",
              self.capacity
            );
            return Err(QueueError::Full);
          }
          message = returned;
        },
      }
      log::trace!("queue full, waiting for space");
      listener.await;
    }
  }

  // Pop up to max messages, waiting until at least one is available. The last popped message is
  // flagged as end of batch. Returns an empty batch only once the queue is closed and drained.
  pub async fn pop_batch(&self, max: usize) -> Vec<Envelope<T>> {
    loop {
      listener!(self.not_empty => listener);
      {
        let mut locked_data = self.locked_data.lock();
        if !locked_data.messages.is_empty() || locked_data.closed {
          let count = max.max(1).min(locked_data.messages.len());
          let mut batch: Vec<_> = locked_data.messages.drain(.. count).collect();
          self.stats.depth.set(locked_data.messages.len().try_into().unwrap_or(i64::MAX));
          drop(locked_data);

          if let Some(last) = batch.last_mut() {
            last.end_of_batch = EndOfBatchContext::new(true);
          }
          self.not_full.notify_additional(batch.len());
          return batch;
        }
      }
      listener.await;
    }
  }

  // Reject all further pushes and wake up everyone waiting.
  pub fn close(&self) {
    self.locked_data.lock().closed = true;
    self.not_empty.notify(usize::MAX);
    self.not_full.notify(usize::MAX);
  }
}
