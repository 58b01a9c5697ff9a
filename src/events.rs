//! Typed broadcast buses for cross-component state.
//!
//! The selection bus keeps "which account is active" consistent across
//! otherwise unconnected consumers (CLI commands, the prefetcher, future
//! UI surfaces) without a shared parent. Writes are idempotent: publishing
//! the value already held notifies nobody. Subscription lifecycle is
//! explicit: dropping a watcher unsubscribes it.

use color_eyre::{eyre::eyre, Result};
use tokio::sync::watch;

/// The active-account slot: `None` means the "all accounts" aggregate.
///
/// Exactly two logical states exist, aggregate and specific account.
/// Transitions: an explicit pick, or a reset to aggregate when the
/// authenticated user changes.
#[derive(Clone)]
pub struct SelectionBus {
  tx: watch::Sender<Option<String>>,
}

impl SelectionBus {
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(None);
    Self { tx }
  }

  /// Current selection.
  pub fn current(&self) -> Option<String> {
    self.tx.borrow().clone()
  }

  /// Set the selection, broadcasting only if the value actually changed.
  /// Returns whether subscribers were notified.
  pub fn select(&self, account_id: Option<String>) -> bool {
    let changed = self.tx.send_if_modified(|current| {
      if *current == account_id {
        false
      } else {
        *current = account_id.clone();
        true
      }
    });

    if changed {
      tracing::debug!(
        account = account_id.as_deref().unwrap_or("all"),
        "selection changed"
      );
    }
    changed
  }

  /// Back to the "all accounts" aggregate (user/session change).
  pub fn reset(&self) -> bool {
    self.select(None)
  }

  pub fn subscribe(&self) -> SelectionWatcher {
    SelectionWatcher {
      rx: self.tx.subscribe(),
    }
  }
}

impl Default for SelectionBus {
  fn default() -> Self {
    Self::new()
  }
}

/// One subscriber's view of the selection slot. Notifications for an
/// unchanged value are never delivered, so consumers need no own-state
/// comparison before reacting.
pub struct SelectionWatcher {
  rx: watch::Receiver<Option<String>>,
}

impl SelectionWatcher {
  /// Wait for the next selection change and return the new value.
  pub async fn changed(&mut self) -> Result<Option<String>> {
    self
      .rx
      .changed()
      .await
      .map_err(|_| eyre!("Selection bus closed"))?;
    Ok(self.rx.borrow_and_update().clone())
  }

  /// Whether a change is pending since the last observation.
  #[allow(dead_code)]
  pub fn has_changed(&self) -> Result<bool> {
    self
      .rx
      .has_changed()
      .map_err(|_| eyre!("Selection bus closed"))
  }

  pub fn current(&mut self) -> Option<String> {
    self.rx.borrow_and_update().clone()
  }
}

/// The signed-in-user slot: `None` while signed out.
///
/// Auth state changes ripple into cache invalidation and selection resets;
/// publishing here is how the auth layer reaches those consumers.
#[derive(Clone)]
pub struct SessionBus {
  tx: watch::Sender<Option<String>>,
}

impl SessionBus {
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(None);
    Self { tx }
  }

  #[allow(dead_code)]
  pub fn current_user(&self) -> Option<String> {
    self.tx.borrow().clone()
  }

  /// Publish the signed-in user (or `None` on sign-out). Idempotent.
  pub fn set_user(&self, user_id: Option<String>) -> bool {
    self.tx.send_if_modified(|current| {
      if *current == user_id {
        false
      } else {
        tracing::debug!(
          user = user_id.as_deref().unwrap_or("<signed out>"),
          "session changed"
        );
        *current = user_id.clone();
        true
      }
    })
  }

  /// Subscribe to auth changes.
  pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
    self.tx.subscribe()
  }
}

impl Default for SessionBus {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn subscribers_observe_a_change_exactly_once() {
    let bus = SelectionBus::new();
    let mut watcher = bus.subscribe();

    assert!(bus.select(Some("acc-1".into())));
    assert!(watcher.has_changed().unwrap());
    assert_eq!(watcher.changed().await.unwrap(), Some("acc-1".into()));

    // Already observed; nothing further pending.
    assert!(!watcher.has_changed().unwrap());
  }

  #[tokio::test]
  async fn duplicate_selection_does_not_notify() {
    let bus = SelectionBus::new();
    bus.select(Some("acc-1".into()));
    let mut watcher = bus.subscribe();
    watcher.current();

    assert!(!bus.select(Some("acc-1".into())));
    assert!(!watcher.has_changed().unwrap());
  }

  #[tokio::test]
  async fn reset_returns_to_aggregate() {
    let bus = SelectionBus::new();
    bus.select(Some("acc-1".into()));

    assert!(bus.reset());
    assert_eq!(bus.current(), None);

    // Resetting an already-aggregate selection is a no-op.
    assert!(!bus.reset());
  }

  #[tokio::test]
  async fn independent_subscribers_each_see_the_change() {
    let bus = SelectionBus::new();
    let mut a = bus.subscribe();
    let mut b = bus.subscribe();

    bus.select(Some("acc-2".into()));

    assert_eq!(a.changed().await.unwrap(), Some("acc-2".into()));
    assert_eq!(b.changed().await.unwrap(), Some("acc-2".into()));
  }

  #[tokio::test]
  async fn session_subscribers_observe_sign_out() {
    let bus = SessionBus::new();
    let mut rx = bus.subscribe();

    bus.set_user(Some("u1".into()));
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), Some("u1".to_string()));

    bus.set_user(None);
    rx.changed().await.unwrap();
    assert!(rx.borrow_and_update().is_none());
  }

  #[tokio::test]
  async fn session_bus_is_idempotent() {
    let bus = SessionBus::new();
    assert!(bus.set_user(Some("u1".into())));
    assert!(!bus.set_user(Some("u1".into())));
    assert!(bus.set_user(None));
    assert_eq!(bus.current_user(), None);
  }
}
