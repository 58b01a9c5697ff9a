//! Application wiring and the interactive dashboard loop.
//!
//! `App` connects config, session, the REST client, the analysis cache
//! layer, the prefetcher, and the two buses. Every CLI subcommand maps to
//! one method here; the `spending` path walks the full pipeline: session →
//! orchestrated fetch → account-list seeding → staggered prefetch.

use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncBufReadExt;

use crate::api::types::{
  Account, ConnectionStatus, SaveConnectionRequest, SavingsOpportunities, SignupRequest,
  SpendingAnalysis, TrendAnalysis, User,
};
use crate::api::{ApiError, QuoClient};
use crate::auth::AuthService;
use crate::cache::{AccountScope, AnalysisCache, AnalysisCacheLayer, AnalysisKey, Period};
use crate::config::Config;
use crate::events::{SelectionBus, SessionBus};
use crate::prefetch::{PrefetchConfig, Prefetcher};
use crate::session::SessionStore;

pub struct App {
  config: Config,
  client: QuoClient,
  auth: AuthService,
  sessions: SessionStore,
  session_bus: SessionBus,
  analysis: Arc<AnalysisCacheLayer<SpendingAnalysis>>,
  prefetcher: Arc<Prefetcher<SpendingAnalysis>>,
  selection: SelectionBus,
  // Linked-account list, fetched at most once per process to seed prefetch.
  known_accounts: Arc<Mutex<Option<Vec<Account>>>>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    Self::with_sessions(config, SessionStore::open()?)
  }

  fn with_sessions(config: Config, sessions: SessionStore) -> Result<Self> {
    let session_bus = SessionBus::new();
    let auth = AuthService::new(sessions.clone(), session_bus.clone());

    let store = Arc::new(AnalysisCache::new().with_ttl(config.cache_ttl()));
    let analysis = Arc::new(AnalysisCacheLayer::new(store));
    let prefetcher = Arc::new(Prefetcher::new(
      Arc::clone(&analysis),
      PrefetchConfig::from(&config.prefetch),
    ));

    let client = QuoClient::new(&config.backend.url)?;

    let selection = SelectionBus::new();
    if let Some(session) = sessions.load() {
      selection.select(session.selected_account.clone());
      session_bus.set_user(Some(session.user.id.clone()));
    }

    Ok(Self {
      config,
      client,
      auth,
      sessions,
      session_bus,
      analysis,
      prefetcher,
      selection,
      known_accounts: Arc::new(Mutex::new(None)),
    })
  }

  fn require_session(&self) -> Result<crate::session::Session> {
    self
      .auth
      .current()
      .ok_or_else(|| eyre!("Not signed in. Run `quo login` first."))
  }

  fn authed_client(&self) -> Result<QuoClient> {
    let token = self
      .auth
      .token()
      .ok_or_else(|| eyre!("Not signed in. Run `quo login` first."))?;
    Ok(self.client.clone().with_token(Some(token)))
  }

  /// Pass an operation result through, dropping the session first when the
  /// backend rejected our credentials.
  fn surface<T>(&self, result: Result<T>) -> Result<T> {
    if let Err(report) = &result {
      let rejected = report
        .downcast_ref::<ApiError>()
        .is_some_and(|e| e.is_auth());
      if rejected {
        if let Ok(Some(user_id)) = self.auth.logout() {
          let _ = self.analysis.store().invalidate_user(&user_id);
        }
        self.selection.reset();
      }
    }
    result
  }

  // ---- auth ----

  pub async fn login(&self, email: &str, password: &str) -> Result<User> {
    let previous = self.auth.current().map(|s| s.user.id);
    let user = self.auth.login(&self.client, email, password).await?;

    if previous.as_deref() != Some(user.id.as_str()) {
      self.on_user_changed(previous.as_deref())?;
    }
    Ok(user)
  }

  pub async fn signup(
    &self,
    email: &str,
    password: &str,
    first_name: &str,
    last_name: &str,
  ) -> Result<User> {
    let previous = self.auth.current().map(|s| s.user.id);
    let request = SignupRequest {
      email,
      password,
      first_name,
      last_name,
    };
    let user = self.auth.signup(&self.client, &request).await?;
    self.on_user_changed(previous.as_deref())?;
    Ok(user)
  }

  /// Verify the stored token; `None` means signed out (and the session was
  /// cleared if the token had gone stale).
  pub async fn whoami(&self) -> Result<Option<User>> {
    self.auth.verify(&self.client).await
  }

  pub fn logout(&self) -> Result<()> {
    self.prefetcher.reset()?;
    if let Some(user_id) = self.auth.logout()? {
      self.analysis.store().invalidate_user(&user_id)?;
    }
    self.selection.reset();
    Ok(())
  }

  /// User identity changed: the selection and everything warmed for the
  /// previous user is void.
  fn on_user_changed(&self, previous: Option<&str>) -> Result<()> {
    if let Some(prev) = previous {
      self.analysis.store().invalidate_user(prev)?;
    }
    self.prefetcher.reset()?;
    self.selection.reset();
    Ok(())
  }

  // ---- accounts & selection ----

  pub async fn accounts(&self) -> Result<Vec<Account>> {
    let session = self.require_session()?;
    let client = self.authed_client()?;
    let accounts = self.surface(
      client
        .accounts(&session.user.id)
        .await
        .map_err(Into::into),
    )?;

    if let Ok(mut known) = self.known_accounts.lock() {
      *known = Some(accounts.clone());
    }
    Ok(accounts)
  }

  /// Change the active account (`None` = all accounts). Persisted with the
  /// session and broadcast on the selection bus; a no-op when unchanged.
  pub fn select_account(&self, account_id: Option<String>) -> Result<bool> {
    let mut session = self.require_session()?;
    let changed = self.selection.select(account_id.clone());
    session.selected_account = account_id;
    self.sessions.save(&session)?;
    Ok(changed)
  }

  pub fn selected_account(&self) -> Option<String> {
    self.selection.current()
  }

  // ---- analysis ----

  fn effective_scope(&self, override_scope: Option<AccountScope>) -> AccountScope {
    override_scope
      .unwrap_or_else(|| AccountScope::from_selection(self.selection.current().as_deref()))
  }

  /// Resolve the spending analysis for the given period and scope,
  /// cache-first, then opportunistically warm sibling views.
  pub async fn spending(
    &self,
    period: Period,
    override_scope: Option<AccountScope>,
    force_refresh: bool,
  ) -> Result<SpendingAnalysis> {
    let session = self.require_session()?;
    let user_id = session.user.id.clone();
    let scope = self.effective_scope(override_scope);
    let key = AnalysisKey::new(&user_id, period, scope.clone());
    let client = self.authed_client()?;

    let result = {
      let client = client.clone();
      let fetch_scope = scope.clone();
      let fetch_user = user_id.clone();
      self
        .analysis
        .fetch(&key, force_refresh, move || async move {
          client
            .grouped_spending(&fetch_user, period, &fetch_scope)
            .await
            .map_err(Into::into)
        })
        .await
    };
    let analysis = self.surface(result)?;

    if self.config.prefetch.enabled {
      tokio::spawn(Self::seed_prefetch(
        Arc::clone(&self.prefetcher),
        Arc::clone(&self.known_accounts),
        client,
        user_id,
        period,
        scope,
      ));
    }

    Ok(analysis)
  }

  /// Warm the cache for the views adjacent to the one just served. Runs as a
  /// detached task; the foreground path never waits on it, and any failure
  /// is logged and forgotten.
  async fn seed_prefetch(
    prefetcher: Arc<Prefetcher<SpendingAnalysis>>,
    known_accounts: Arc<Mutex<Option<Vec<Account>>>>,
    client: QuoClient,
    user_id: String,
    period: Period,
    scope: AccountScope,
  ) {
    let cached = match known_accounts.lock() {
      Ok(known) => known.clone(),
      Err(_) => return,
    };

    let accounts = match cached {
      Some(list) => list,
      None => match client.accounts(&user_id).await {
        Ok(list) => {
          if let Ok(mut known) = known_accounts.lock() {
            *known = Some(list.clone());
          }
          list
        }
        Err(e) => {
          tracing::warn!(error = %e, "could not fetch accounts for prefetch");
          return;
        }
      },
    };

    let ids: Vec<String> = accounts.iter().map(|a| a.id.clone()).collect();
    let fetch = move |key: AnalysisKey| {
      let client = client.clone();
      async move {
        client
          .grouped_spending(&key.user_id, key.period, &key.scope)
          .await
          .map_err(Into::into)
      }
    };

    if let Err(e) = prefetcher.schedule(&user_id, period, &ids, &scope, fetch) {
      tracing::warn!(error = %e, "prefetch scheduling failed");
    }
  }

  /// Trend/forecast view. Small and volatile, so never cached.
  pub async fn trends(
    &self,
    months: u32,
    override_scope: Option<AccountScope>,
  ) -> Result<TrendAnalysis> {
    let session = self.require_session()?;
    let scope = self.effective_scope(override_scope);
    let client = self.authed_client()?;
    self.surface(
      client
        .trends(&session.user.id, months, &scope)
        .await
        .map_err(Into::into),
    )
  }

  /// Savings-opportunity view. Never cached, same as trends.
  pub async fn savings(
    &self,
    override_scope: Option<AccountScope>,
  ) -> Result<SavingsOpportunities> {
    let session = self.require_session()?;
    let scope = self.effective_scope(override_scope);
    let client = self.authed_client()?;
    self.surface(
      client
        .savings_opportunities(&session.user.id, &scope)
        .await
        .map_err(Into::into),
    )
  }

  // ---- bank link ----

  pub async fn link_status(&self) -> Result<ConnectionStatus> {
    let session = self.require_session()?;
    self.surface(
      self
        .client
        .check_connection(&session.user.id)
        .await
        .map_err(Into::into),
    )
  }

  pub async fn save_link(
    &self,
    basiq_user_id: &str,
    institution_name: &str,
    account_ids: &[String],
  ) -> Result<()> {
    let session = self.require_session()?;
    let client = self.authed_client()?;
    let request = SaveConnectionRequest {
      user_id: &session.user.id,
      basiq_user_id,
      institution_name,
      account_ids,
    };
    self.surface(client.save_connection(&request).await.map_err(Into::into))
  }

  // ---- dashboard ----

  /// Interactive mode: a resident process where the cache and prefetcher
  /// actually pay off across view switches. Selection changes flow through
  /// the bus, so an `account` command re-renders via the same path any
  /// other subscriber would use.
  pub async fn dashboard(&self) -> Result<()> {
    let session = self.require_session()?;
    println!(
      "Quo dashboard - signed in as {} {} ({})",
      session.user.first_name, session.user.last_name, session.user.email
    );
    println!("Commands: account <id|all> | period <month|year|all> | refresh | status | quit");

    let mut watcher = self.selection.subscribe();
    watcher.current();
    let mut session_rx = self.session_bus.subscribe();
    session_rx.borrow_and_update();
    let mut period = Period::Month;

    self.render_spending(period, false).await;

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
      print!("> ");
      let _ = std::io::stdout().flush();

      tokio::select! {
        line = lines.next_line() => {
          let Some(line) = line? else { break };
          let mut parts = line.split_whitespace();
          match (parts.next(), parts.next()) {
            (Some("quit") | Some("q"), _) => break,
            (Some("refresh"), _) => self.render_spending(period, true).await,
            (Some("status"), _) => self.render_status()?,
            (Some("period"), Some(p)) => match Period::parse(p) {
              Some(parsed) => {
                period = parsed;
                self.render_spending(period, false).await;
              }
              None => println!("Unknown period '{}'; expected month, year, or all", p),
            },
            (Some("account"), Some(id)) => {
              let target = if id.eq_ignore_ascii_case("all") {
                None
              } else {
                Some(id.to_string())
              };
              if !self.select_account(target)? {
                println!("Account unchanged");
              }
              // The selection watcher re-renders on actual changes.
            }
            (None, _) => {}
            _ => println!("Unknown command"),
          }
        }
        changed = watcher.changed() => {
          let _ = changed?;
          self.render_spending(period, false).await;
        }
        session = session_rx.changed() => {
          if session.is_err() || session_rx.borrow_and_update().is_none() {
            println!("\nSession ended; leaving dashboard. Run `quo login` to sign in again.");
            break;
          }
        }
      }
    }

    Ok(())
  }

  async fn render_spending(&self, period: Period, force_refresh: bool) {
    match self.spending(period, None, force_refresh).await {
      Ok(analysis) => {
        let scope = self.selection.current();
        let account = analysis
          .account_name
          .as_deref()
          .or(analysis.account_id.as_deref())
          .or(scope.as_deref())
          .unwrap_or("all accounts");
        println!("\nSpending ({}, {}): total {:.2}", period, account, analysis.total);
        for category in analysis.categories.iter().take(8) {
          println!("  {:<24} {:>10.2}", category.name, category.amount);
        }
        if let Some(message) = &analysis.message {
          println!("  note: {}", message);
        }
      }
      Err(e) => println!("Error: {}. Type `refresh` to retry.", e),
    }
  }

  fn render_status(&self) -> Result<()> {
    println!(
      "cache entries: {}, pending prefetch timers: {}",
      self.analysis.store().len()?,
      self.prefetcher.pending_timers()?
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{BackendConfig, CacheConfig, PrefetchSettings};
  use crate::session::Session;
  use std::net::SocketAddr;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::{Duration, Instant};
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;

  /// Minimal backend double: instant analysis responses, a configurable
  /// delay on the accounts listing, and a hit counter for account b's
  /// analysis endpoint.
  async fn spawn_backend(accounts_delay: Duration) -> (SocketAddr, Arc<AtomicU32>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let account_b_hits = Arc::new(AtomicU32::new(0));

    let hits = Arc::clone(&account_b_hits);
    tokio::spawn(async move {
      loop {
        let Ok((mut socket, _)) = listener.accept().await else {
          return;
        };
        let hits = Arc::clone(&hits);
        tokio::spawn(async move {
          let mut buf = vec![0u8; 4096];
          let n = socket.read(&mut buf).await.unwrap_or(0);
          let request = String::from_utf8_lossy(&buf[..n]).to_string();

          let body = if request.contains("/api/accounts/") {
            tokio::time::sleep(accounts_delay).await;
            r#"{"accounts":[{"id":"a","name":"A"},{"id":"b","name":"B"}]}"#
          } else if request.contains("account_id=b") {
            hits.fetch_add(1, Ordering::SeqCst);
            r#"{"categories":[],"total":2.0,"account_id":"b"}"#
          } else {
            r#"{"categories":[],"total":1.0}"#
          };
          let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
          );
          let _ = socket.write_all(response.as_bytes()).await;
        });
      }
    });

    (addr, account_b_hits)
  }

  fn signed_in_app(addr: SocketAddr, dir: &std::path::Path, prefetch: PrefetchSettings) -> App {
    let sessions = SessionStore::at(dir.join("session.json"));
    sessions
      .save(&Session {
        token: "tok".into(),
        user: User {
          id: "u1".into(),
          email: "a@b.c".into(),
          first_name: String::new(),
          last_name: String::new(),
        },
        selected_account: None,
      })
      .unwrap();

    let config = Config {
      backend: BackendConfig {
        url: format!("http://{}", addr),
      },
      cache: CacheConfig::default(),
      prefetch,
    };
    App::with_sessions(config, sessions).unwrap()
  }

  #[tokio::test]
  async fn spending_returns_without_waiting_on_background_seeding() {
    let (addr, _) = spawn_backend(Duration::from_millis(500)).await;
    let dir = tempfile::tempdir().unwrap();
    let app = signed_in_app(addr, dir.path(), PrefetchSettings::default());

    let started = Instant::now();
    app.spending(Period::Month, None, false).await.unwrap();
    let elapsed = started.elapsed();

    // The accounts listing that seeds the prefetcher takes 500ms; the
    // analysis the caller asked for must come back well before that.
    assert!(
      elapsed < Duration::from_millis(300),
      "foreground spending waited {:?} on prefetch seeding",
      elapsed
    );
  }

  #[tokio::test]
  async fn switching_to_a_prefetched_account_hits_the_cache() {
    let (addr, account_b_hits) = spawn_backend(Duration::ZERO).await;
    let dir = tempfile::tempdir().unwrap();
    let app = signed_in_app(
      addr,
      dir.path(),
      PrefetchSettings {
        enabled: true,
        delay_ms: 0,
        stagger_ms: 0,
        sibling_periods: false,
      },
    );

    app.select_account(Some("a".into())).unwrap();
    app.spending(Period::Month, None, false).await.unwrap();

    // Background seeding warms account b and the aggregate.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(account_b_hits.load(Ordering::SeqCst), 1);

    app.select_account(Some("b".into())).unwrap();
    let analysis = app.spending(Period::Month, None, false).await.unwrap();

    assert_eq!(analysis.total, 2.0);
    assert_eq!(
      account_b_hits.load(Ordering::SeqCst),
      1,
      "switching to a warmed account should not refetch"
    );
  }
}
