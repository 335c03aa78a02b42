// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./merge_cache_test.rs"]
mod merge_cache_test;

use bd_log::warn_every;
use bd_server_stats::stats::Scope;
use bd_time::TimeDurationExt;
use parking_lot::Mutex;
use prometheus::IntCounter;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use time::Duration;
use time::ext::NumericalDuration;

// After this many polls a stuck writer gets a warning.
const STUCK_WRITER_POLLS: u64 = 100;

//
// Mergeable
//

// A value that can be folded into another value with the same key.
pub trait Mergeable {
  type Key: Eq + Hash;
  type Error;

  fn merge_key(&self) -> Self::Key;
  fn merge(&mut self, other: &Self) -> Result<(), Self::Error>;
}

//
// CacheError
//

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CacheError {
  #[error("generation {0} has not been drained")]
  PreviousNotDrained(usize),
}

//
// GenerationState
//

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum GenerationState {
  Idle,
  Writing,
  Switching,
  Reading,
}

impl GenerationState {
  const fn from_u8(value: u8) -> Self {
    match value {
      1 => Self::Writing,
      2 => Self::Switching,
      3 => Self::Reading,
      _ => Self::Idle,
    }
  }
}

//
// Generation
//

type GenerationMap<T> = HashMap<<T as Mergeable>::Key, T, ahash::RandomState>;

struct Generation<T: Mergeable> {
  data: Mutex<GenerationMap<T>>,
  writers: AtomicUsize,
  state: AtomicU8,
}

impl<T: Mergeable> Generation<T> {
  fn new(state: GenerationState) -> Self {
    Self {
      data: Mutex::new(HashMap::default()),
      writers: AtomicUsize::new(0),
      state: AtomicU8::new(state as u8),
    }
  }

  fn state(&self) -> GenerationState {
    GenerationState::from_u8(self.state.load(Ordering::SeqCst))
  }

  fn set_state(&self, state: GenerationState) {
    self.state.store(state as u8, Ordering::SeqCst);
  }
}

//
// WriterGuard
//

// Registration of an in-flight writer on a generation. The generation cannot be drained while a
// guard for it exists.
struct WriterGuard<'a, T: Mergeable> {
  generation: &'a Generation<T>,
}

impl<T: Mergeable> Drop for WriterGuard<'_, T> {
  fn drop(&mut self) {
    self.generation.writers.fetch_sub(1, Ordering::SeqCst);
  }
}

//
// Stats
//

struct Stats {
  switches: IntCounter,
  drain_polls: IntCounter,
}

//
// MergeDataCache
//

// Two generation merge cache. Writers always merge into the current generation. A flush switches
// the current generation, waits for the writers that raced the switch to leave the previous
// generation, and then takes everything it holds. Nothing written before the switch is lost and
// nothing written after it lands in the drained data.
pub struct MergeDataCache<T: Mergeable> {
  generations: [Generation<T>; 2],
  current: AtomicUsize,
  flush_lock: tokio::sync::Mutex<()>,
  drain_poll_interval: Duration,
  stats: Stats,
}

impl<T: Mergeable> MergeDataCache<T> {
  pub fn new(drain_poll_interval: Duration, scope: &Scope) -> Self {
    Self {
      generations: [
        Generation::new(GenerationState::Writing),
        Generation::new(GenerationState::Idle),
      ],
      current: AtomicUsize::new(0),
      flush_lock: tokio::sync::Mutex::new(()),
      drain_poll_interval,
      stats: Stats {
        switches: scope.counter("switches"),
        drain_polls: scope.counter("drain_polls"),
      },
    }
  }

  #[must_use]
  pub fn current_generation(&self) -> usize {
    self.current.load(Ordering::SeqCst)
  }

  #[must_use]
  pub fn state(&self, generation: usize) -> GenerationState {
    self.generations[generation].state()
  }

  fn writer(&self) -> WriterGuard<'_, T> {
    loop {
      let index = self.current.load(Ordering::SeqCst);
      let generation = &self.generations[index];
      generation.writers.fetch_add(1, Ordering::SeqCst);
      // A switch may have happened between the load and the registration. In that case the
      // flusher may already consider the generation drained so back out and retry.
      if self.current.load(Ordering::SeqCst) == index {
        return WriterGuard { generation };
      }
      generation.writers.fetch_sub(1, Ordering::SeqCst);
    }
  }

  // Merge the value into the current generation, combining with an existing value for the same
  // key or inserting it. A value that cannot be merged is handed back with the error.
  pub fn put(&self, value: T) -> Result<(), (T, T::Error)> {
    let writer = self.writer();
    let mut data = writer.generation.data.lock();
    match data.entry(value.merge_key()) {
      Entry::Occupied(mut entry) => {
        if let Err(e) = entry.get_mut().merge(&value) {
          return Err((value, e));
        }
      },
      Entry::Vacant(entry) => {
        entry.insert(value);
      },
    }
    Ok(())
  }

  // Make the other generation current. Fails if the other generation still holds undrained data.
  // Callers must hold flush_lock.
  fn switch_generation(&self) -> Result<usize, CacheError> {
    let current = self.current.load(Ordering::SeqCst);
    let next = 1 - current;
    if self.generations[next].state() != GenerationState::Idle {
      return Err(CacheError::PreviousNotDrained(next));
    }

    self.generations[current].set_state(GenerationState::Switching);
    self.generations[next].set_state(GenerationState::Writing);
    self.current.store(next, Ordering::SeqCst);
    self.stats.switches.inc();
    log::trace!("switched merge cache generation {current} -> {next}");
    Ok(current)
  }

  // Wait for all writers of the previous generation to finish and take its data. Returns nothing
  // if the previous generation has already been drained. Callers must hold flush_lock.
  async fn drain_previous(&self) -> Vec<T> {
    let previous = &self.generations[1 - self.current.load(Ordering::SeqCst)];
    if previous.state() != GenerationState::Switching {
      return Vec::new();
    }

    let mut polls = 0;
    loop {
      let writers = previous.writers.load(Ordering::SeqCst);
      if writers == 0 {
        break;
      }

      polls += 1;
      self.stats.drain_polls.inc();
      if polls >= STUCK_WRITER_POLLS {
        warn_every!(
          15.seconds(),
          "merge cache generation still has {} writer(s) after {} polls",
          writers,
          polls
        );
      }
      self.drain_poll_interval.sleep().await;
    }

    previous.set_state(GenerationState::Reading);
    let data = std::mem::take(&mut *previous.data.lock());
    previous.set_state(GenerationState::Idle);
    data.into_values().collect()
  }

  // Switch and drain. Flushes are serialized.
  pub async fn flush(&self) -> Result<Vec<T>, CacheError> {
    let _flush_lock = self.flush_lock.lock().await;
    self.switch_generation()?;
    Ok(self.drain_previous().await)
  }

  // Drain both generations. Used at shutdown after all writers are gone.
  pub async fn drain_all(&self) -> Vec<T> {
    let _flush_lock = self.flush_lock.lock().await;
    let mut data = self.drain_previous().await;
    if self.switch_generation().is_ok() {
      data.extend(self.drain_previous().await);
    }
    data
  }
}
