//! Cache keys for spending-analysis queries.
//!
//! An analysis result is addressed by the (user, period, account scope)
//! tuple. Two requests with identical tuples must resolve to the same entry.

use sha2::{Digest, Sha256};
use std::fmt;

/// Reporting period for a spending analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Period {
  Month,
  Year,
  All,
}

impl Period {
  /// Wire value used in query strings.
  pub fn as_str(&self) -> &'static str {
    match self {
      Period::Month => "month",
      Period::Year => "year",
      Period::All => "all",
    }
  }

  /// Parse a user-supplied period name.
  pub fn parse(s: &str) -> Option<Period> {
    match s.trim().to_lowercase().as_str() {
      "month" => Some(Period::Month),
      "year" => Some(Period::Year),
      "all" => Some(Period::All),
      _ => None,
    }
  }

  /// All periods, for sibling-period prefetching.
  pub fn all() -> [Period; 3] {
    [Period::Month, Period::Year, Period::All]
  }
}

impl fmt::Display for Period {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Which linked accounts an analysis covers.
///
/// `All` is the aggregate view across every linked account; the backend
/// treats an absent `account_id` parameter as that aggregate.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AccountScope {
  All,
  Account(String),
}

impl AccountScope {
  /// Build a scope from an optional account id (`None` = aggregate).
  pub fn from_selection(account_id: Option<&str>) -> Self {
    match account_id {
      Some(id) => AccountScope::Account(id.to_string()),
      None => AccountScope::All,
    }
  }

  /// The `account_id` query parameter, if any.
  pub fn account_id(&self) -> Option<&str> {
    match self {
      AccountScope::All => None,
      AccountScope::Account(id) => Some(id),
    }
  }
}

impl fmt::Display for AccountScope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AccountScope::All => f.write_str("all"),
      AccountScope::Account(id) => f.write_str(id),
    }
  }
}

/// Composite key addressing one cached analysis result.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AnalysisKey {
  pub user_id: String,
  pub period: Period,
  pub scope: AccountScope,
}

impl AnalysisKey {
  pub fn new(user_id: impl Into<String>, period: Period, scope: AccountScope) -> Self {
    Self {
      user_id: user_id.into(),
      period,
      scope,
    }
  }

  /// Stable, fixed-length identifier for string-keyed registries
  /// (in-flight locks, prefetch timers) and log lines.
  pub fn cache_hash(&self) -> String {
    let input = format!("spending:{}:{}:{}", self.user_id, self.period, self.scope);

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Human-readable form for log output.
  pub fn description(&self) -> String {
    format!(
      "spending for user {} over {} ({})",
      self.user_id, self.period, self.scope
    )
  }
}
