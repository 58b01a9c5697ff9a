//! Wire types for the Quo backend REST API.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An authenticated Quo user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
  pub id: String,
  pub email: String,
  #[serde(rename = "firstName", default)]
  pub first_name: String,
  #[serde(rename = "lastName", default)]
  pub last_name: String,
}

/// Response to login/signup: user and bearer token on success, `detail`
/// carried via the HTTP error path otherwise.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
  pub user: User,
  pub token: String,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
  pub email: &'a str,
  pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub struct SignupRequest<'a> {
  pub email: &'a str,
  pub password: &'a str,
  #[serde(rename = "firstName")]
  pub first_name: &'a str,
  #[serde(rename = "lastName")]
  pub last_name: &'a str,
}

/// One linked bank account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
  pub id: String,
  #[serde(default)]
  pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountsResponse {
  #[serde(default)]
  pub accounts: Vec<Account>,
}

/// One spending category with its total.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpendingCategory {
  pub name: String,
  pub amount: f64,
}

/// A group of related categories with its share of total spend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupedCategory {
  pub name: String,
  pub total: f64,
  #[serde(default)]
  pub percentage: f64,
  #[serde(default)]
  pub categories: Vec<SpendingCategory>,
}

/// The cached analysis payload for one (user, period, account scope).
///
/// Treated as an immutable value once cached: never patched in place, always
/// replaced wholesale by a fresh fetch. Fields beyond `categories` are
/// whatever the backend computed; `insights` stays schemaless on purpose.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpendingAnalysis {
  #[serde(default)]
  pub categories: Vec<SpendingCategory>,
  #[serde(default)]
  pub grouped_categories: Vec<GroupedCategory>,
  #[serde(default)]
  pub total: f64,
  pub period: Option<String>,
  pub period_label: Option<String>,
  pub average_monthly: Option<f64>,
  pub num_transactions: Option<u64>,
  pub account_id: Option<String>,
  pub account_name: Option<String>,
  #[serde(default)]
  pub monthly_breakdown: BTreeMap<String, f64>,
  pub insights: Option<serde_json::Value>,
  /// Backend note when there is no data for the requested scope.
  pub message: Option<String>,
}

/// One month in a spending trend series.
#[derive(Debug, Clone, Deserialize)]
pub struct TrendMonth {
  pub month: String,
  pub total: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrendInsights {
  pub trend: Option<String>,
  pub average_monthly: Option<f64>,
  pub next_month_prediction: Option<f64>,
  pub volatility: Option<f64>,
  pub volatility_rating: Option<String>,
  pub change_rate: Option<f64>,
  pub months_analyzed: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrendPattern {
  #[serde(rename = "type")]
  pub kind: String,
  pub description: String,
}

/// Trend/forecast payload from `/api/analysis/trends`.
#[derive(Debug, Clone, Deserialize)]
pub struct TrendAnalysis {
  #[serde(default)]
  pub trends: Vec<TrendMonth>,
  pub insights: Option<TrendInsights>,
  #[serde(default)]
  pub patterns: Vec<TrendPattern>,
  #[serde(default)]
  pub top_categories: Vec<(String, f64)>,
}

/// One savings opportunity suggested by the analysis backend.
#[derive(Debug, Clone, Deserialize)]
pub struct Opportunity {
  #[serde(rename = "type")]
  pub kind: String,
  pub category: String,
  pub description: String,
  #[serde(default)]
  pub suggestion: String,
  #[serde(default)]
  pub savings_potential: f64,
  #[serde(default)]
  pub difficulty: String,
}

/// Payload from `/api/analysis/savings-opportunities`.
#[derive(Debug, Clone, Deserialize)]
pub struct SavingsOpportunities {
  #[serde(default)]
  pub opportunities: Vec<Opportunity>,
  pub total_potential_savings: Option<f64>,
}

/// Request to persist a completed bank-link consent.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveConnectionRequest<'a> {
  pub user_id: &'a str,
  pub basiq_user_id: &'a str,
  pub institution_name: &'a str,
  pub account_ids: &'a [String],
}

/// Bank-link status for a user.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionStatus {
  #[serde(default)]
  pub has_connections: bool,
  #[serde(default)]
  pub connection_count: u32,
}
