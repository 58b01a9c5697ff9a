//! Fetch orchestration: cache-first resolution with single-flight fetching.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

use super::key::AnalysisKey;
use super::store::AnalysisCache;

/// Resolves one analysis result per key, preferring the cache and falling
/// back to the supplied fetcher.
///
/// Concurrent requests for the same key are serialized through a per-key
/// async lock: the first caller performs the network fetch, later callers
/// wake up, re-check the cache, and hit the freshly stored entry. A cold key
/// therefore costs exactly one network call no matter how many callers race.
pub struct AnalysisCacheLayer<T> {
  store: Arc<AnalysisCache<T>>,
  // Key hash -> per-key fetch lock. Entries are never removed; the key space
  // is bounded by users x periods x accounts.
  inflight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl<T: Clone> AnalysisCacheLayer<T> {
  pub fn new(store: Arc<AnalysisCache<T>>) -> Self {
    Self {
      store,
      inflight: Mutex::new(HashMap::new()),
    }
  }

  /// The underlying store, for invalidation and validity probes.
  pub fn store(&self) -> &Arc<AnalysisCache<T>> {
    &self.store
  }

  fn request_lock(&self, key: &AnalysisKey) -> Result<Arc<AsyncMutex<()>>> {
    let mut inflight = self
      .inflight
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(Arc::clone(
      inflight
        .entry(key.cache_hash())
        .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
    ))
  }

  /// Resolve the result for `key`.
  ///
  /// - Valid cached entry and no forced refresh: returned without any
  ///   network activity.
  /// - Otherwise the fetcher runs once; its payload is cached and returned.
  /// - A fetcher failure is surfaced as-is and leaves any previously cached
  ///   value for the key untouched; a failed refresh never poisons the
  ///   cache.
  pub async fn fetch<F, Fut>(&self, key: &AnalysisKey, force_refresh: bool, fetcher: F) -> Result<T>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    if !force_refresh {
      if let Some(entry) = self.store.get(key)? {
        tracing::debug!(key = %key.description(), "cache hit");
        return Ok(entry.payload);
      }
    }

    let lock = self.request_lock(key)?;
    let _guard = lock.lock().await;

    // A racing caller may have filled the slot while we waited on the lock.
    if !force_refresh {
      if let Some(entry) = self.store.get(key)? {
        tracing::debug!(key = %key.description(), "cache hit after in-flight fetch");
        return Ok(entry.payload);
      }
    }

    tracing::debug!(key = %key.description(), force_refresh, "fetching from network");
    let payload = fetcher().await?;
    self.store.put(key.clone(), payload.clone())?;

    Ok(payload)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::key::{AccountScope, Period};
  use chrono::Duration;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn layer_with_ttl(ttl: Duration) -> AnalysisCacheLayer<u32> {
    AnalysisCacheLayer::new(Arc::new(AnalysisCache::new().with_ttl(ttl)))
  }

  fn month_key(user: &str) -> AnalysisKey {
    AnalysisKey::new(user, Period::Month, AccountScope::All)
  }

  #[tokio::test]
  async fn second_fetch_within_ttl_skips_network() {
    let layer = layer_with_ttl(Duration::minutes(5));
    let key = month_key("u1");
    let calls = AtomicU32::new(0);

    for _ in 0..2 {
      let got = layer
        .fetch(&key, false, || async {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(7)
        })
        .await
        .unwrap();
      assert_eq!(got, 7);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn expired_entry_triggers_refetch_and_overwrite() {
    let layer = layer_with_ttl(Duration::zero());
    let key = month_key("u1");
    let calls = AtomicU32::new(0);

    for expected in [1, 2] {
      let got = layer
        .fetch(&key, false, || async {
          Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
        })
        .await
        .unwrap();
      assert_eq!(got, expected);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn force_refresh_bypasses_valid_cache() {
    let layer = layer_with_ttl(Duration::minutes(5));
    let key = month_key("u1");

    layer.fetch(&key, false, || async { Ok(1) }).await.unwrap();
    let got = layer.fetch(&key, true, || async { Ok(2) }).await.unwrap();

    assert_eq!(got, 2);
    assert_eq!(layer.store().get(&key).unwrap().unwrap().payload, 2);
  }

  #[tokio::test]
  async fn failed_refresh_leaves_prior_entry_intact() {
    let layer = layer_with_ttl(Duration::minutes(5));
    let key = month_key("u1");

    layer.fetch(&key, false, || async { Ok(1) }).await.unwrap();

    let err = layer
      .fetch(&key, true, || async { Err(eyre!("backend unavailable")) })
      .await
      .unwrap_err();
    assert!(err.to_string().contains("backend unavailable"));

    assert_eq!(layer.store().get(&key).unwrap().unwrap().payload, 1);
  }

  #[tokio::test]
  async fn concurrent_cold_fetches_share_one_network_call() {
    let layer = Arc::new(layer_with_ttl(Duration::minutes(5)));
    let key = month_key("u1");
    let calls = Arc::new(AtomicU32::new(0));

    let tasks: Vec<_> = (0..8)
      .map(|_| {
        let layer = Arc::clone(&layer);
        let key = key.clone();
        let calls = Arc::clone(&calls);
        tokio::spawn(async move {
          layer
            .fetch(&key, false, || async move {
              calls.fetch_add(1, Ordering::SeqCst);
              tokio::time::sleep(std::time::Duration::from_millis(20)).await;
              Ok(99)
            })
            .await
            .unwrap()
        })
      })
      .collect();

    for task in tasks {
      assert_eq!(task.await.unwrap(), 99);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn distinct_keys_fetch_independently() {
    let layer = layer_with_ttl(Duration::minutes(5));
    let calls = AtomicU32::new(0);

    for user in ["u1", "u2"] {
      layer
        .fetch(&month_key(user), false, || async {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(0)
        })
        .await
        .unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }
}
