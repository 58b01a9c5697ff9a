//! HTTP client for the Quo backend REST API.

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use super::error::ApiError;
use super::types::{
  Account, AccountsResponse, AuthResponse, ConnectionStatus, LoginRequest, SaveConnectionRequest,
  SavingsOpportunities, SignupRequest, SpendingAnalysis, TrendAnalysis, User,
};
use crate::cache::{AccountScope, Period};

/// Typed wrapper over the Quo REST endpoints.
///
/// Carries the bearer token for authenticated requests; auth endpoints work
/// without one. All failures map into the [`ApiError`] taxonomy.
#[derive(Clone)]
pub struct QuoClient {
  http: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl QuoClient {
  pub fn new(base_url: &str) -> Result<Self, ApiError> {
    let base_url = Url::parse(base_url)
      .map_err(|e| ApiError::InvalidResponse(format!("Invalid backend URL {}: {}", base_url, e)))?;

    Ok(Self {
      http: reqwest::Client::new(),
      base_url,
      token: None,
    })
  }

  /// Attach a bearer token for authenticated endpoints.
  pub fn with_token(mut self, token: Option<String>) -> Self {
    self.token = token;
    self
  }

  fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
    self
      .base_url
      .join(path)
      .map_err(|e| ApiError::InvalidResponse(format!("Invalid endpoint {}: {}", path, e)))
  }

  fn authed(&self, builder: RequestBuilder) -> Result<RequestBuilder, ApiError> {
    let token = self
      .token
      .as_deref()
      .ok_or_else(|| ApiError::Auth("No authentication token found".into()))?;
    Ok(builder.bearer_auth(token))
  }

  /// Map a non-2xx response into the error taxonomy, picking up the
  /// backend's optional `detail` field.
  async fn handle<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    if !status.is_success() {
      let detail = response
        .json::<Value>()
        .await
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(String::from))
        .unwrap_or_else(|| format!("Failed to fetch from backend ({})", status));

      if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ApiError::Auth(detail));
      }
      return Err(ApiError::Status {
        status: status.as_u16(),
        detail,
      });
    }

    response
      .json::<T>()
      .await
      .map_err(|e| ApiError::InvalidResponse(e.to_string()))
  }

  // ---- auth ----

  pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
    let url = self.endpoint("/api/auth/login")?;
    let response = self
      .http
      .post(url)
      .json(&LoginRequest { email, password })
      .send()
      .await?;
    Self::handle(response).await
  }

  pub async fn signup(&self, request: &SignupRequest<'_>) -> Result<AuthResponse, ApiError> {
    let url = self.endpoint("/api/auth/signup")?;
    let response = self.http.post(url).json(request).send().await?;
    Self::handle(response).await
  }

  /// Verify the stored token. `Ok(None)` means the token was rejected and
  /// the session should be cleared; other failures surface as errors.
  pub async fn verify(&self) -> Result<Option<User>, ApiError> {
    let url = self.endpoint("/api/auth/verify")?;
    let response = self.authed(self.http.get(url))?.send().await?;

    if response.status() == StatusCode::UNAUTHORIZED {
      return Ok(None);
    }

    // The backend has returned the user at the top level, under `user`,
    // and under `data` across versions; accept any of them.
    let value: Value = Self::handle(response).await?;
    for candidate in [&value, &value["user"], &value["data"]] {
      if candidate.get("id").is_some() && candidate.get("email").is_some() {
        return serde_json::from_value::<User>(candidate.clone())
          .map(Some)
          .map_err(|e| ApiError::InvalidResponse(e.to_string()));
      }
    }
    Ok(None)
  }

  // ---- accounts ----

  pub async fn accounts(&self, user_id: &str) -> Result<Vec<Account>, ApiError> {
    let url = self.endpoint(&format!("/api/accounts/{}", user_id))?;
    let response = self.authed(self.http.get(url))?.send().await?;
    let parsed: AccountsResponse = Self::handle(response).await?;
    Ok(parsed.accounts)
  }

  // ---- analysis ----

  pub async fn grouped_spending(
    &self,
    user_id: &str,
    period: Period,
    scope: &AccountScope,
  ) -> Result<SpendingAnalysis, ApiError> {
    let url = self.endpoint(&format!("/api/analysis/groupedSpendingByPeriod/{}", user_id))?;

    let mut request = self
      .http
      .get(url)
      .query(&[("period", period.as_str()), ("group_categories", "true")]);
    if let Some(account_id) = scope.account_id() {
      request = request.query(&[("account_id", account_id)]);
    }

    let response = self.authed(request)?.send().await?;
    let value: Value = Self::handle(response).await?;

    // A payload without a categories array is unusable for every view that
    // consumes it; reject it here rather than caching it.
    if !value.get("categories").is_some_and(Value::is_array) {
      return Err(ApiError::InvalidResponse(
        "categories missing or not an array".into(),
      ));
    }

    serde_json::from_value(value).map_err(|e| ApiError::InvalidResponse(e.to_string()))
  }

  pub async fn trends(
    &self,
    user_id: &str,
    months: u32,
    scope: &AccountScope,
  ) -> Result<TrendAnalysis, ApiError> {
    let url = self.endpoint(&format!("/api/analysis/trends/{}", user_id))?;

    let mut request = self.http.get(url).query(&[("months", months.to_string())]);
    if let Some(account_id) = scope.account_id() {
      request = request.query(&[("account_id", account_id)]);
    }

    let response = self.authed(request)?.send().await?;
    Self::handle(response).await
  }

  pub async fn savings_opportunities(
    &self,
    user_id: &str,
    scope: &AccountScope,
  ) -> Result<SavingsOpportunities, ApiError> {
    let url = self.endpoint(&format!("/api/analysis/savings-opportunities/{}", user_id))?;

    let mut request = self.http.get(url);
    if let Some(account_id) = scope.account_id() {
      request = request.query(&[("account_id", account_id)]);
    }

    let response = self.authed(request)?.send().await?;
    Self::handle(response).await
  }

  // ---- bank link ----

  pub async fn save_connection(
    &self,
    request: &SaveConnectionRequest<'_>,
  ) -> Result<(), ApiError> {
    let url = self.endpoint("/api/basiq/save-connection")?;
    let response = self.authed(self.http.post(url).json(request))?.send().await?;
    let _: Value = Self::handle(response).await?;
    Ok(())
  }

  pub async fn check_connection(&self, user_id: &str) -> Result<ConnectionStatus, ApiError> {
    let url = self.endpoint(&format!("/api/basiq/check-connection/{}", user_id))?;
    let response = self.http.get(url).send().await?;
    Self::handle(response).await
  }
}
