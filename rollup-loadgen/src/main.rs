// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use bd_server_stats::stats::Collector;
use bd_shutdown::ComponentShutdownTrigger;
use bd_time::TimeDurationExt;
use clap::Parser;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rollup_common::config::load_from_file;
use rollup_common::global_initialize;
use rollup_metrics::config::Config;
use rollup_metrics::runtime::RollupRuntime;
use rollup_metrics::sink::json_log::JsonLogSink;
use rollup_metrics::source::{JvmMetrics, Segment, ServiceCall, Source};
use rollup_metrics::time::{RealTimeProvider, TimeProvider};
use std::sync::Arc;

const ENDPOINTS: &[&str] = &["/", "/login", "/cart", "/checkout", "/search", "/health"];
const TICKS_PER_SECOND: u64 = 10;
const TICK: time::Duration = time::Duration::milliseconds(100);

#[derive(Parser)]
struct Options {
  #[arg(short = 'c', long = "config")]
  pub config: Option<String>,

  // Records generated per second.
  #[arg(long = "rate", default_value_t = 1000)]
  pub rate: u64,

  // Seconds to run before draining and exiting.
  #[arg(long = "duration", default_value_t = 60)]
  pub duration: u64,

  #[arg(long = "services", default_value_t = 5)]
  pub services: usize,

  #[arg(long = "seed", default_value_t = 0)]
  pub seed: u64,
}

struct Generator {
  rng: SmallRng,
  services: Vec<String>,
  trace_id: u64,
}

impl Generator {
  fn new(seed: u64, services: usize) -> Self {
    Self {
      rng: SmallRng::seed_from_u64(seed),
      services: (0 .. services.max(1))
        .map(|i| format!("service-{i}"))
        .collect(),
      trace_id: 0,
    }
  }

  fn pick_service(&mut self) -> String {
    self.services[self.rng.random_range(0 .. self.services.len())].clone()
  }

  fn next(&mut self, timestamp: i64) -> Source {
    let service = self.pick_service();
    let instance = format!("{service}-{}", self.rng.random_range(0 .. 3));
    let latency = self.rng.random_range(1 .. 1500);
    match self.rng.random_range(0 .. 10) {
      0 => Source::Jvm(JvmMetrics {
        service,
        instance,
        cpu_usage: self.rng.random_range(0 .. 10000),
        heap_used: self.rng.random_range(100 .. 900),
        heap_max: 1024,
        young_gc_count: self.rng.random_range(0 .. 5),
        young_gc_time: self.rng.random_range(0 .. 50),
        old_gc_count: i64::from(self.rng.random_bool(0.05)),
        old_gc_time: self.rng.random_range(0 .. 10),
        timestamp,
      }),
      1 => {
        self.trace_id += 1;
        Source::Segment(Segment {
          service,
          instance,
          endpoint: ENDPOINTS[self.rng.random_range(0 .. ENDPOINTS.len())].to_string(),
          trace_id: format!("{:016x}", self.trace_id),
          latency,
          is_error: self.rng.random_bool(0.02),
          timestamp,
        })
      },
      _ => {
        let source_service = self
          .rng
          .random_bool(0.5)
          .then(|| self.pick_service())
          .filter(|source_service| *source_service != service);
        Source::ServiceCall(ServiceCall {
          service,
          instance,
          endpoint: ENDPOINTS[self.rng.random_range(0 .. ENDPOINTS.len())].to_string(),
          source_service,
          latency,
          success: self.rng.random_bool(0.98),
          timestamp,
        })
      },
    }
  }
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
  global_initialize();
  let options = Options::parse();

  let config: Config = match &options.config {
    Some(path) => {
      log::info!("loading config from: {path}");
      load_from_file(path)?
    },
    None => Config::default(),
  };

  let collector = Collector::default();
  let shutdown_trigger = ComponentShutdownTrigger::default();
  let time_provider = Arc::new(RealTimeProvider {});
  let runtime = RollupRuntime::new(
    &config,
    Arc::new(JsonLogSink::default()),
    time_provider.clone(),
    &collector.scope("rollup_loadgen"),
    &shutdown_trigger.make_handle(),
  )?;

  let mut generator = Generator::new(options.seed, options.services);
  let per_tick = (options.rate / TICKS_PER_SECOND).max(1);
  let mut generated = 0_u64;
  let mut failed = 0_u64;
  for tick in 0 .. options.duration * TICKS_PER_SECOND {
    for _ in 0 .. per_tick {
      let source = generator.next(time_provider.unix_now_millis());
      generated += 1;
      if let Err(e) = runtime.dispatch_all(&source).await {
        failed += 1;
        log::debug!("failed to dispatch {} record: {e}", source.kind());
      }
    }

    if (tick + 1) % (10 * TICKS_PER_SECOND) == 0 {
      log::info!("generated {generated} record(s), {failed} failed");
    }
    TICK.sleep().await;
  }

  log::info!("generated {generated} record(s), {failed} failed, draining");
  shutdown_trigger.shutdown().await;
  log::info!("drain complete");
  Ok(())
}
