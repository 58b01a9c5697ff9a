//! Background cache warming for sibling analysis views.
//!
//! After a foreground fetch, the views the user is most likely to open next
//! are the same period for their other linked accounts and the all-accounts
//! aggregate. The scheduler warms those in the background, staggered so a
//! user with many accounts does not stampede the backend. Everything here is
//! best-effort: failures are logged and swallowed, and the foreground path
//! never waits on a prefetch.

use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::cache::{AccountScope, AnalysisCacheLayer, AnalysisKey, Period};

/// Tuning knobs for the scheduler.
#[derive(Debug, Clone)]
pub struct PrefetchConfig {
  pub enabled: bool,
  /// Delay before the first background fetch fires.
  pub base_delay: Duration,
  /// Extra delay per candidate index.
  pub stagger: Duration,
  /// Also warm the other periods for the current scope.
  pub sibling_periods: bool,
}

impl Default for PrefetchConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      base_delay: Duration::from_millis(2000),
      stagger: Duration::from_millis(500),
      sibling_periods: false,
    }
  }
}

/// Schedules and tracks background fetches.
///
/// The queue holds keys with a fetch in flight, guaranteeing at most one
/// concurrent prefetch per key. The timer registry holds the delayed tasks
/// that have not fired yet; those are cancellable, but a fetch that has
/// already been dispatched runs to completion and is allowed to populate the
/// cache even if nobody wants it anymore.
pub struct Prefetcher<T> {
  layer: Arc<AnalysisCacheLayer<T>>,
  config: PrefetchConfig,
  queue: Arc<Mutex<HashSet<String>>>,
  timers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl<T: Clone + Send + Sync + 'static> Prefetcher<T> {
  pub fn new(layer: Arc<AnalysisCacheLayer<T>>, config: PrefetchConfig) -> Self {
    Self {
      layer,
      config,
      queue: Arc::new(Mutex::new(HashSet::new())),
      timers: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// Candidate keys for the current view: every other linked account for
  /// this period, the aggregate when a specific account is selected, and
  /// optionally the sibling periods for the current scope.
  fn candidates(
    user_id: &str,
    period: Period,
    account_ids: &[String],
    selected: &AccountScope,
    sibling_periods: bool,
  ) -> Vec<AnalysisKey> {
    let mut keys = Vec::new();

    for id in account_ids {
      let scope = AccountScope::Account(id.clone());
      if scope != *selected {
        keys.push(AnalysisKey::new(user_id, period, scope));
      }
    }

    if *selected != AccountScope::All {
      keys.push(AnalysisKey::new(user_id, period, AccountScope::All));
    }

    if sibling_periods {
      for p in Period::all() {
        if p != period {
          keys.push(AnalysisKey::new(user_id, p, selected.clone()));
        }
      }
    }

    keys
  }

  /// Cancel pending timers and schedule staggered background fetches for
  /// every candidate that is neither cache-valid nor already in flight.
  ///
  /// Call again whenever the selected account, period, or user changes; the
  /// previous schedule is dropped first.
  pub fn schedule<F, Fut>(
    &self,
    user_id: &str,
    period: Period,
    account_ids: &[String],
    selected: &AccountScope,
    fetch: F,
  ) -> Result<usize>
  where
    F: Fn(AnalysisKey) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    if !self.config.enabled {
      return Ok(0);
    }

    self.cancel_all()?;

    let candidates = Self::candidates(
      user_id,
      period,
      account_ids,
      selected,
      self.config.sibling_periods,
    );

    let mut scheduled = 0;
    for (index, key) in candidates.into_iter().enumerate() {
      if self.layer.store().contains_valid(&key)? {
        continue;
      }
      if self.is_queued(&key)? {
        continue;
      }

      let delay = self.config.base_delay + self.config.stagger * index as u32;
      self.schedule_one(key, delay, fetch.clone())?;
      scheduled += 1;
    }

    if scheduled > 0 {
      tracing::debug!(user_id, period = %period, scheduled, "scheduled background prefetches");
    }
    Ok(scheduled)
  }

  fn schedule_one<F, Fut>(&self, key: AnalysisKey, delay: Duration, fetch: F) -> Result<()>
  where
    F: Fn(AnalysisKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let hash = key.cache_hash();
    let layer = Arc::clone(&self.layer);
    let queue = Arc::clone(&self.queue);
    let timers = Arc::clone(&self.timers);
    let timer_hash = hash.clone();

    // Register under the same lock the task takes to remove itself; a zero
    // delay would otherwise fire before registration and leave a completed
    // handle behind.
    let mut registry = self
      .timers
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let handle = tokio::spawn(async move {
      tokio::time::sleep(delay).await;

      // Past the cancellable window; drop our own timer entry.
      if let Ok(mut timers) = timers.lock() {
        timers.remove(&timer_hash);
      }

      Self::prefetch_one(&layer, &queue, key, fetch).await;
    });

    if let Some(previous) = registry.insert(hash, handle) {
      previous.abort();
    }
    Ok(())
  }

  /// Run one background fetch, guarded by the in-flight queue. Failures are
  /// logged only; the queue entry is removed whatever the outcome.
  async fn prefetch_one<F, Fut>(
    layer: &AnalysisCacheLayer<T>,
    queue: &Mutex<HashSet<String>>,
    key: AnalysisKey,
    fetch: F,
  ) where
    F: Fn(AnalysisKey) -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let hash = key.cache_hash();

    {
      let mut queue = match queue.lock() {
        Ok(q) => q,
        Err(_) => return,
      };
      if !queue.insert(hash.clone()) {
        // Already in flight for this key
        return;
      }
    }

    if matches!(layer.store().contains_valid(&key), Ok(true)) {
      if let Ok(mut queue) = queue.lock() {
        queue.remove(&hash);
      }
      return;
    }

    tracing::debug!(key = %key.description(), "prefetching in background");
    match layer.fetch(&key, false, || fetch(key.clone())).await {
      Ok(_) => tracing::debug!(key = %key.description(), "prefetch complete"),
      Err(e) => tracing::warn!(key = %key.description(), error = %e, "prefetch failed"),
    }

    if let Ok(mut queue) = queue.lock() {
      queue.remove(&hash);
    }
  }

  /// Abort every pending (not yet fired) timer.
  pub fn cancel_all(&self) -> Result<usize> {
    let mut timers = self
      .timers
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let cancelled = timers.len();
    for (_, handle) in timers.drain() {
      handle.abort();
    }
    if cancelled > 0 {
      tracing::debug!(cancelled, "cancelled pending prefetch timers");
    }
    Ok(cancelled)
  }

  /// Full reset on user change: timers cancelled and the in-flight queue
  /// cleared.
  pub fn reset(&self) -> Result<()> {
    self.cancel_all()?;
    let mut queue = self
      .queue
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    queue.clear();
    Ok(())
  }

  pub fn is_queued(&self, key: &AnalysisKey) -> Result<bool> {
    let queue = self
      .queue
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(queue.contains(&key.cache_hash()))
  }

  /// Number of timers that have not fired yet.
  pub fn pending_timers(&self) -> Result<usize> {
    let timers = self
      .timers
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(timers.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::AnalysisCache;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn fast_config() -> PrefetchConfig {
    PrefetchConfig {
      enabled: true,
      base_delay: Duration::from_millis(10),
      stagger: Duration::from_millis(5),
      sibling_periods: false,
    }
  }

  fn prefetcher(config: PrefetchConfig) -> Prefetcher<String> {
    let layer = Arc::new(AnalysisCacheLayer::new(Arc::new(AnalysisCache::new())));
    Prefetcher::new(layer, config)
  }

  fn account_key(user: &str, id: &str) -> AnalysisKey {
    AnalysisKey::new(user, Period::Month, AccountScope::Account(id.into()))
  }

  #[tokio::test]
  async fn warms_sibling_accounts_and_aggregate() {
    let pf = prefetcher(fast_config());
    let calls = Arc::new(AtomicU32::new(0));

    let counted = {
      let calls = Arc::clone(&calls);
      move |key: AnalysisKey| {
        let calls = Arc::clone(&calls);
        async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(format!("data:{}", key.scope))
        }
      }
    };

    let accounts = vec!["a".to_string(), "b".to_string()];
    let selected = AccountScope::Account("a".into());
    let scheduled = pf
      .schedule("u1", Period::Month, &accounts, &selected, counted)
      .unwrap();

    // Candidates: account b and the aggregate; never the selected account.
    assert_eq!(scheduled, 2);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let store = pf.layer.store();
    assert!(store.contains_valid(&account_key("u1", "b")).unwrap());
    assert!(store
      .contains_valid(&AnalysisKey::new("u1", Period::Month, AccountScope::All))
      .unwrap());
    assert!(!store.contains_valid(&account_key("u1", "a")).unwrap());
  }

  #[tokio::test]
  async fn aggregate_view_only_warms_specific_accounts() {
    let pf = prefetcher(fast_config());

    let accounts = vec!["a".to_string(), "b".to_string()];
    let scheduled = pf
      .schedule("u1", Period::Month, &accounts, &AccountScope::All, |_key| {
        async move { Ok(String::new()) }
      })
      .unwrap();

    assert_eq!(scheduled, 2);
  }

  #[tokio::test]
  async fn already_cached_candidates_are_skipped() {
    let pf = prefetcher(fast_config());
    pf.layer
      .store()
      .put(account_key("u1", "b"), "warm".into())
      .unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let counted = {
      let calls = Arc::clone(&calls);
      move |_key: AnalysisKey| {
        let calls = Arc::clone(&calls);
        async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(String::new())
        }
      }
    };

    let accounts = vec!["a".to_string(), "b".to_string()];
    let selected = AccountScope::Account("a".into());
    pf.schedule("u1", Period::Month, &accounts, &selected, counted)
      .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    // Only the aggregate was cold.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn cancel_all_stops_pending_timers() {
    let mut config = fast_config();
    config.base_delay = Duration::from_millis(200);
    let pf = prefetcher(config);

    let calls = Arc::new(AtomicU32::new(0));
    let counted = {
      let calls = Arc::clone(&calls);
      move |_key: AnalysisKey| {
        let calls = Arc::clone(&calls);
        async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(String::new())
        }
      }
    };

    let accounts = vec!["a".to_string(), "b".to_string()];
    let selected = AccountScope::Account("a".into());
    pf.schedule("u1", Period::Month, &accounts, &selected, counted)
      .unwrap();
    assert!(pf.pending_timers().unwrap() > 0);

    pf.cancel_all().unwrap();
    assert_eq!(pf.pending_timers().unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn zero_delay_timers_clear_their_registry_entries() {
    let pf = prefetcher(PrefetchConfig {
      enabled: true,
      base_delay: Duration::ZERO,
      stagger: Duration::ZERO,
      sibling_periods: false,
    });

    let accounts = vec!["a".to_string(), "b".to_string()];
    let selected = AccountScope::Account("a".into());
    let scheduled = pf
      .schedule("u1", Period::Month, &accounts, &selected, |_key| async {
        Ok(String::new())
      })
      .unwrap();
    assert_eq!(scheduled, 2);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pf.pending_timers().unwrap(), 0);
  }

  #[tokio::test]
  async fn one_in_flight_prefetch_per_key() {
    let layer = Arc::new(AnalysisCacheLayer::new(Arc::new(
      AnalysisCache::<String>::new(),
    )));
    let queue = Arc::new(Mutex::new(HashSet::new()));
    let key = account_key("u1", "a");
    let calls = Arc::new(AtomicU32::new(0));

    let slow = {
      let calls = Arc::clone(&calls);
      move |_key: AnalysisKey| {
        let calls = Arc::clone(&calls);
        async move {
          calls.fetch_add(1, Ordering::SeqCst);
          tokio::time::sleep(Duration::from_millis(50)).await;
          Ok(String::new())
        }
      }
    };

    let first = Prefetcher::prefetch_one(&layer, &queue, key.clone(), slow.clone());
    let second = Prefetcher::prefetch_one(&layer, &queue, key.clone(), slow);
    tokio::join!(first, second);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // Queue entry removed on completion
    assert!(!queue.lock().unwrap().contains(&key.cache_hash()));
  }

  #[tokio::test]
  async fn failed_prefetch_is_swallowed_and_dequeued() {
    let pf = prefetcher(fast_config());

    let accounts = vec!["a".to_string()];
    let selected = AccountScope::Account("a".into());
    pf.schedule("u1", Period::Month, &accounts, &selected, |_key| async {
      Err(eyre!("backend down"))
    })
    .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    let aggregate = AnalysisKey::new("u1", Period::Month, AccountScope::All);
    assert!(!pf.is_queued(&aggregate).unwrap());
    assert!(!pf.layer.store().contains_valid(&aggregate).unwrap());
  }

  #[tokio::test]
  async fn disabled_prefetching_schedules_nothing() {
    let pf = prefetcher(PrefetchConfig {
      enabled: false,
      ..fast_config()
    });

    let accounts = vec!["a".to_string(), "b".to_string()];
    let scheduled = pf
      .schedule("u1", Period::Month, &accounts, &AccountScope::All, |_key| {
        async move { Ok(String::new()) }
      })
      .unwrap();

    assert_eq!(scheduled, 0);
  }

  #[tokio::test]
  async fn sibling_periods_flag_widens_the_candidate_set() {
    let pf = prefetcher(PrefetchConfig {
      sibling_periods: true,
      ..fast_config()
    });

    let accounts = vec!["a".to_string()];
    let selected = AccountScope::Account("a".into());
    let scheduled = pf
      .schedule("u1", Period::Month, &accounts, &selected, |_key| async {
        Ok(String::new())
      })
      .unwrap();

    // Aggregate + year/all periods for the selected account.
    assert_eq!(scheduled, 3);
  }
}
