//! In-memory analysis cache with a fixed TTL.
//!
//! The store is a mutex-guarded map so it stays correct on a multi-threaded
//! runtime; nothing here assumes a single-threaded event loop. Entries are
//! memory-only and live for the process lifetime at most; a restart starts
//! cold.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::Mutex;

use super::key::AnalysisKey;

/// One cached payload plus the time it was stored.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
  pub payload: T,
  pub stored_at: DateTime<Utc>,
}

/// TTL-bounded key-value store for analysis results.
///
/// Expiry is lazy: an expired entry is purged on the next lookup that
/// touches it, never by a background sweeper.
pub struct AnalysisCache<T> {
  entries: Mutex<HashMap<AnalysisKey, CacheEntry<T>>>,
  ttl: Duration,
}

impl<T: Clone> AnalysisCache<T> {
  /// Create a cache with the default 5-minute TTL.
  pub fn new() -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      ttl: Duration::minutes(5),
    }
  }

  /// Override the TTL.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  fn is_expired(&self, stored_at: DateTime<Utc>) -> bool {
    Utc::now() - stored_at >= self.ttl
  }

  /// Look up a key, returning the entry only while it is within TTL.
  /// An expired entry is removed and reported as a miss.
  pub fn get(&self, key: &AnalysisKey) -> Result<Option<CacheEntry<T>>> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    match entries.get(key) {
      Some(entry) if !self.is_expired(entry.stored_at) => Ok(Some(entry.clone())),
      Some(_) => {
        entries.remove(key);
        tracing::debug!(key = %key.description(), "purged expired cache entry");
        Ok(None)
      }
      None => Ok(None),
    }
  }

  /// True if a valid (unexpired) entry exists, without cloning the payload.
  /// Does not purge; `get` handles that.
  pub fn contains_valid(&self, key: &AnalysisKey) -> Result<bool> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(
      entries
        .get(key)
        .is_some_and(|entry| !self.is_expired(entry.stored_at)),
    )
  }

  /// Store a payload, timestamped now, overwriting any prior entry.
  pub fn put(&self, key: AnalysisKey, payload: T) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    tracing::debug!(key = %key.description(), "cached analysis result");
    entries.insert(
      key,
      CacheEntry {
        payload,
        stored_at: Utc::now(),
      },
    );
    Ok(())
  }

  /// Remove every entry belonging to one user. Entries for other users are
  /// untouched. Returns the number of entries removed.
  pub fn invalidate_user(&self, user_id: &str) -> Result<usize> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let before = entries.len();
    entries.retain(|key, _| key.user_id != user_id);
    let removed = before - entries.len();

    if removed > 0 {
      tracing::debug!(user_id, removed, "invalidated user cache entries");
    }
    Ok(removed)
  }

  /// Number of entries currently held, expired or not.
  pub fn len(&self) -> Result<usize> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.len())
  }
}

impl<T: Clone> Default for AnalysisCache<T> {
  fn default() -> Self {
    Self::new()
  }
}
