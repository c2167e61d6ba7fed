use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

/// Source of time for the engine: execution timestamps, timeout checks and
/// the initialization retry delay.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;

  fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Wall clock time, sleeping on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }

  fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
    Box::pin(tokio::time::sleep(duration))
  }
}

/// A clock that only moves when told to.
///
/// `sleep` advances the clock by the requested duration and returns
/// immediately.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Mutex::new(start),
    }
  }

  pub fn advance(&self, duration: Duration) {
    let delta = chrono::TimeDelta::from_std(duration).unwrap_or(chrono::TimeDelta::MAX);
    let mut now = self.now.lock().unwrap();
    *now += delta;
  }

  pub fn set(&self, at: DateTime<Utc>) {
    *self.now.lock().unwrap() = at;
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new(DateTime::UNIX_EPOCH)
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap()
  }

  fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
    self.advance(duration);
    Box::pin(std::future::ready(()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_manual_clock_sleep_advances() {
    let clock = ManualClock::default();
    let start = clock.now();

    clock.sleep(Duration::from_secs(5)).await;
    clock.advance(Duration::from_millis(250));

    assert_eq!(clock.now() - start, chrono::TimeDelta::milliseconds(5250));
  }
}
