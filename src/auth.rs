//! Authentication: login, signup, token verification, logout.
//!
//! Owns the persisted session and announces every auth change on the
//! session bus so cache invalidation and selection resets happen in one
//! place downstream.

use color_eyre::Result;

use crate::api::types::{AuthResponse, SignupRequest, User};
use crate::api::QuoClient;
use crate::events::SessionBus;
use crate::session::{Session, SessionStore};

pub struct AuthService {
  store: SessionStore,
  bus: SessionBus,
}

impl AuthService {
  pub fn new(store: SessionStore, bus: SessionBus) -> Self {
    Self { store, bus }
  }

  /// The stored session, if one exists.
  pub fn current(&self) -> Option<Session> {
    self.store.load()
  }

  /// The stored bearer token, if signed in.
  pub fn token(&self) -> Option<String> {
    self.store.load().map(|s| s.token)
  }

  fn establish(&self, response: AuthResponse) -> Result<User> {
    let session = Session {
      token: response.token,
      user: response.user.clone(),
      selected_account: None,
    };
    self.store.save(&session)?;
    self.bus.set_user(Some(session.user.id.clone()));
    tracing::info!(user = %session.user.id, "signed in");
    Ok(response.user)
  }

  pub async fn login(&self, client: &QuoClient, email: &str, password: &str) -> Result<User> {
    let response = client.login(email, password).await?;
    self.establish(response)
  }

  pub async fn signup(&self, client: &QuoClient, request: &SignupRequest<'_>) -> Result<User> {
    let response = client.signup(request).await?;
    self.establish(response)
  }

  /// Verify the stored token against the backend.
  ///
  /// A rejected or missing token clears the stored session and returns
  /// `None`; transport errors propagate without touching the session.
  pub async fn verify(&self, client: &QuoClient) -> Result<Option<User>> {
    let Some(session) = self.store.load() else {
      return Ok(None);
    };

    let authed = client.clone().with_token(Some(session.token));
    match authed.verify().await {
      Ok(Some(user)) => Ok(Some(user)),
      Ok(None) => {
        tracing::info!("stored token rejected, clearing session");
        self.clear()?;
        Ok(None)
      }
      Err(e) if e.is_auth() => {
        tracing::info!(error = %e, "stored token rejected, clearing session");
        self.clear()?;
        Ok(None)
      }
      Err(e) => Err(e.into()),
    }
  }

  /// Sign out. Returns the user id that was signed in, so callers can
  /// invalidate that user's cache entries.
  pub fn logout(&self) -> Result<Option<String>> {
    let user_id = self.store.load().map(|s| s.user.id);
    self.clear()?;
    if let Some(id) = &user_id {
      tracing::info!(user = %id, "signed out");
    }
    Ok(user_id)
  }

  fn clear(&self) -> Result<()> {
    self.store.clear()?;
    self.bus.set_user(None);
    Ok(())
  }
}
