// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use crate::sink::SinkError;
use futures::poll;
use matches::assert_matches;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::Poll;
use tokio::pin;
use tokio::sync::Notify;

fn transient() -> backoff::Error<SinkError> {
  backoff::Error::transient(SinkError::Transient("timeout".to_string()))
}

#[test]
fn invalid_budget() {
  for budget in [0.0, -1.0, 1.5, f64::NAN] {
    assert!(
      Retry::new(&RetryConfig {
        budget: Some(budget),
        ..Default::default()
      })
      .is_err()
    );
  }
}

#[tokio::test]
async fn retry_until_success() {
  let retry = Retry::new(&RetryConfig::default()).unwrap();

  retry
    .retry_notify(
      backoff::backoff::Zero {},
      || async { Ok::<_, backoff::Error<SinkError>>(()) },
      || unreachable!(),
    )
    .await
    .unwrap();

  // The default budget of 10% allows a single request to retry.
  let calls = AtomicU64::default();
  let mut retries = 0;
  retry
    .retry_notify(
      backoff::backoff::Zero {},
      || async {
        if 0 == calls.fetch_add(1, Ordering::Relaxed) {
          Err(transient())
        } else {
          Ok(())
        }
      },
      || retries += 1,
    )
    .await
    .unwrap();
  assert_eq!(1, retries);
  assert_eq!(2, calls.load(Ordering::Relaxed));
}

#[tokio::test]
async fn permanent_error_is_not_retried() {
  let retry = Retry::new(&RetryConfig::default()).unwrap();
  let calls = AtomicU64::default();
  assert_eq!(
    Err(SinkError::Permanent("bad row".to_string())),
    retry
      .retry_notify(
        backoff::backoff::Zero {},
        || async {
          calls.fetch_add(1, Ordering::Relaxed);
          Err::<(), _>(backoff::Error::permanent(SinkError::Permanent(
            "bad row".to_string()
          )))
        },
        || unreachable!(),
      )
      .await
  );
  assert_eq!(1, calls.load(Ordering::Relaxed));
}

#[tokio::test]
async fn max_retries() {
  let retry = Retry::new(&RetryConfig {
    max_retries: Some(0),
    ..Default::default()
  })
  .unwrap();

  let calls = AtomicU64::default();
  retry
    .retry_notify(
      backoff::backoff::Zero {},
      || async {
        calls.fetch_add(1, Ordering::Relaxed);
        Err::<(), _>(transient())
      },
      || unreachable!(),
    )
    .await
    .unwrap_err();
  assert_eq!(1, calls.load(Ordering::Relaxed));
}

#[tokio::test]
async fn over_budget() {
  let retry = Retry::new(&RetryConfig::default()).unwrap();

  // Create a request with a retry that is pending until we notify it.
  let calls = AtomicU64::default();
  let retries = AtomicU64::default();
  let notify = Notify::new();
  let request1_future = retry.retry_notify(
    backoff::backoff::Zero {},
    || async {
      if 0 == calls.fetch_add(1, Ordering::Relaxed) {
        Err(transient())
      } else {
        notify.notified().await;
        Ok(1)
      }
    },
    || {
      retries.fetch_add(1, Ordering::Relaxed);
    },
  );
  pin!(request1_future);
  assert_matches!(poll!(request1_future.as_mut()), Poll::Pending);
  assert_eq!(1, retries.load(Ordering::Relaxed));

  // This request cannot retry while the first one holds the budget.
  retry
    .retry_notify(
      backoff::backoff::Zero {},
      || async { Err::<u64, _>(transient()) },
      || unreachable!(),
    )
    .await
    .unwrap_err();

  notify.notify_one();
  assert_eq!(1, request1_future.await.unwrap());
}
