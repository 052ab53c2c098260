//! Background refresh of cache slots.
//!
//! A refresh task periodically forces a refresh of one slot, independent of
//! foreground `get` calls. Failures are logged and swallowed; the slot keeps
//! its last good value.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::layer::CacheLayer;
use super::storage::KeyValueStore;
use super::traits::{CacheConfig, Cacheable};

/// Cancellation token for a background refresh task.
///
/// Cancelling (or dropping the handle) stops all future ticks. A refresh that
/// is already running is allowed to finish.
pub struct RefreshHandle {
  key: String,
  shutdown_tx: watch::Sender<bool>,
  task: JoinHandle<()>,
}

impl RefreshHandle {
  /// Stop scheduling further refreshes.
  pub fn cancel(&self) {
    let _ = self.shutdown_tx.send(true);
  }

  pub fn is_cancelled(&self) -> bool {
    *self.shutdown_tx.borrow()
  }

  /// Cancel and wait for the task to wind down.
  pub async fn shutdown(self) {
    self.cancel();
    let _ = self.task.await;
    debug!(key = %self.key, "background refresh stopped");
  }
}

impl<T: Cacheable, S: KeyValueStore + 'static> CacheLayer<T, S> {
  /// Spawn a task that force-refreshes `config` every `interval`.
  ///
  /// The first refresh happens one interval after the call. Ticks that
  /// arrive while a foreground refresh of the same slot is running join it.
  pub fn start_background_refresh(
    &self,
    config: CacheConfig<T>,
    interval: Duration,
  ) -> RefreshHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let key = config.key().to_string();
    let layer = self.clone();

    info!(key = %key, interval_ms = interval.as_millis() as u64, "starting background refresh");

    let task = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      // Skip the first tick (immediate)
      ticker.tick().await;

      loop {
        tokio::select! {
          biased;
          // Err means the handle was dropped
          changed = shutdown_rx.changed() => {
            if changed.is_err() || *shutdown_rx.borrow() {
              break;
            }
          }
          _ = ticker.tick() => {
            if *shutdown_rx.borrow() {
              break;
            }
            match layer.force_refresh(&config).await {
              Ok(result) => debug!(key = config.key(), source = ?result.source, "background refresh tick"),
              Err(error) => debug!(key = config.key(), error = %error, "background refresh found nothing to serve"),
            }
          }
        }
      }
    });

    RefreshHandle {
      key,
      shutdown_tx,
      task,
    }
  }
}
