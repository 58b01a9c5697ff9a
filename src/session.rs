//! Persistent session storage: the bearer token and the signed-in user.
//!
//! The CLI equivalent of the browser's persistent token storage. One JSON
//! file under the platform data directory; clearing the session deletes it.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::api::types::User;

/// The persisted session payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
  pub token: String,
  pub user: User,
  /// Last selected account (`None` = all accounts). Scoped to the session:
  /// cleared along with it when the user changes.
  #[serde(default)]
  pub selected_account: Option<String>,
}

/// File-backed session store.
#[derive(Clone)]
pub struct SessionStore {
  path: PathBuf,
}

impl SessionStore {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    Ok(Self {
      path: Self::default_path()?,
    })
  }

  /// Open the store at an explicit path (tests).
  pub fn at(path: PathBuf) -> Self {
    Self { path }
  }

  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("quo").join("session.json"))
  }

  /// Load the stored session, if any. A corrupt file reads as no session.
  pub fn load(&self) -> Option<Session> {
    let contents = std::fs::read_to_string(&self.path).ok()?;
    match serde_json::from_str(&contents) {
      Ok(session) => Some(session),
      Err(e) => {
        tracing::warn!(path = %self.path.display(), error = %e, "discarding corrupt session file");
        None
      }
    }
  }

  /// Persist a session, replacing any previous one.
  pub fn save(&self, session: &Session) -> Result<()> {
    if let Some(parent) = self.path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create session directory: {}", e))?;
    }

    let contents =
      serde_json::to_string_pretty(session).map_err(|e| eyre!("Failed to serialize session: {}", e))?;
    std::fs::write(&self.path, contents)
      .map_err(|e| eyre!("Failed to write session file {}: {}", self.path.display(), e))?;

    Ok(())
  }

  /// Delete the stored session. Missing file is fine.
  pub fn clear(&self) -> Result<()> {
    match std::fs::remove_file(&self.path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(eyre!(
        "Failed to remove session file {}: {}",
        self.path.display(),
        e
      )),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_session() -> Session {
    Session {
      token: "tok-123".into(),
      user: User {
        id: "u1".into(),
        email: "a@b.c".into(),
        first_name: "Ada".into(),
        last_name: "L".into(),
      },
      selected_account: None,
    }
  }

  #[test]
  fn save_load_clear_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::at(dir.path().join("session.json"));

    assert!(store.load().is_none());

    store.save(&sample_session()).unwrap();
    let loaded = store.load().expect("session should persist");
    assert_eq!(loaded.token, "tok-123");
    assert_eq!(loaded.user.id, "u1");

    store.clear().unwrap();
    assert!(store.load().is_none());
    // Clearing twice is harmless
    store.clear().unwrap();
  }

  #[test]
  fn corrupt_file_reads_as_no_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    std::fs::write(&path, "not json").unwrap();

    let store = SessionStore::at(path);
    assert!(store.load().is_none());
  }
}
