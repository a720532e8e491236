//! HTTP client for the trip-splitting REST API.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{ApiError, Remote};
use crate::config::Config;
use crate::models::{
    Balances, Expense, ExpenseCreate, ExpenseListParams, ExpenseUpdate, InviteLink, Member, MemberAdd,
    MemberBalanceDetail, MemberUpdate, Page, Settlements, Trip, TripCreate, TripListParams, TripUpdate, User,
    UserUpdate,
};

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// API client for the trip-splitting backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    /// Create a new ApiClient with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(ref token) = self.token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ApiError::Network(format!("Invalid bearer token: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: reqwest::Response) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Send a request, backing off and retrying while the server rate-limits.
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&'static str, String)],
        body: Option<&Value>,
    ) -> Result<reqwest::Response, ApiError> {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .headers(self.auth_headers()?)
                .query(query);
            if let Some(body) = body {
                request = request.json(body);
            }
            debug!(method = %method, url = %url, "sending request");
            let response = request.send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::ServerRejected {
                            status: 429,
                            detail: "Rate limited".to_string(),
                        });
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&'static str, String)]) -> Result<T, ApiError> {
        let response = self.send(Method::GET, path, query, None).await?;
        Ok(response.json().await?)
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)?;
        let response = self.send(Method::POST, path, &[], Some(&body)).await?;
        Ok(response.json().await?)
    }

    async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)?;
        let response = self.send(Method::PUT, path, &[], Some(&body)).await?;
        Ok(response.json().await?)
    }

    /// For endpoints answering 204 No Content.
    async fn send_no_content(&self, method: Method, path: &str) -> Result<(), ApiError> {
        self.send(method, path, &[], None).await?;
        Ok(())
    }
}

#[async_trait]
impl Remote for ApiClient {
    // ===== Trips =====

    async fn list_trips(&self, params: &TripListParams) -> Result<Page<Trip>, ApiError> {
        let query = [("page", params.page.to_string()), ("page_size", params.page_size.to_string())];
        self.get("/trips/", &query).await
    }

    async fn get_trip(&self, trip_id: i64) -> Result<Trip, ApiError> {
        self.get(&format!("/trips/{}", trip_id), &[]).await
    }

    async fn create_trip(&self, trip: &TripCreate) -> Result<Trip, ApiError> {
        self.post("/trips/", trip).await
    }

    async fn update_trip(&self, trip_id: i64, patch: &TripUpdate) -> Result<Trip, ApiError> {
        self.put(&format!("/trips/{}", trip_id), patch).await
    }

    async fn delete_trip(&self, trip_id: i64) -> Result<(), ApiError> {
        self.send_no_content(Method::DELETE, &format!("/trips/{}", trip_id)).await
    }

    async fn leave_trip(&self, trip_id: i64) -> Result<(), ApiError> {
        self.send_no_content(Method::POST, &format!("/trips/{}/leave", trip_id)).await
    }

    // ===== Expenses =====

    async fn list_expenses(&self, trip_id: i64, params: &ExpenseListParams) -> Result<Page<Expense>, ApiError> {
        self.get(&format!("/trips/{}/expenses", trip_id), &params.query_pairs()).await
    }

    async fn get_expense(&self, trip_id: i64, expense_id: i64) -> Result<Expense, ApiError> {
        self.get(&format!("/trips/{}/expenses/{}", trip_id, expense_id), &[]).await
    }

    async fn create_expense(&self, trip_id: i64, expense: &ExpenseCreate) -> Result<Expense, ApiError> {
        self.post(&format!("/trips/{}/expenses", trip_id), expense).await
    }

    async fn update_expense(&self, trip_id: i64, expense_id: i64, patch: &ExpenseUpdate) -> Result<Expense, ApiError> {
        self.put(&format!("/trips/{}/expenses/{}", trip_id, expense_id), patch).await
    }

    async fn delete_expense(&self, trip_id: i64, expense_id: i64) -> Result<(), ApiError> {
        self.send_no_content(Method::DELETE, &format!("/trips/{}/expenses/{}", trip_id, expense_id))
            .await
    }

    // ===== Members =====

    async fn list_members(&self, trip_id: i64) -> Result<Vec<Member>, ApiError> {
        self.get(&format!("/trips/{}/members", trip_id), &[]).await
    }

    async fn add_member(&self, trip_id: i64, member: &MemberAdd) -> Result<Member, ApiError> {
        self.post(&format!("/trips/{}/members", trip_id), member).await
    }

    async fn update_member(&self, trip_id: i64, member_id: i64, patch: &MemberUpdate) -> Result<Member, ApiError> {
        self.put(&format!("/trips/{}/members/{}", trip_id, member_id), patch).await
    }

    async fn remove_member(&self, trip_id: i64, member_id: i64) -> Result<(), ApiError> {
        self.send_no_content(Method::DELETE, &format!("/trips/{}/members/{}", trip_id, member_id))
            .await
    }

    // ===== Derived data =====

    async fn balances(&self, trip_id: i64) -> Result<Balances, ApiError> {
        self.get(&format!("/trips/{}/balances", trip_id), &[]).await
    }

    async fn member_balance(&self, trip_id: i64, member_id: i64) -> Result<MemberBalanceDetail, ApiError> {
        self.get(&format!("/trips/{}/members/{}/balance", trip_id, member_id), &[])
            .await
    }

    async fn settlements(&self, trip_id: i64) -> Result<Settlements, ApiError> {
        self.get(&format!("/trips/{}/settlements", trip_id), &[]).await
    }

    // ===== Invites =====

    async fn create_invite(&self, trip_id: i64) -> Result<InviteLink, ApiError> {
        self.post(&format!("/trips/{}/invite", trip_id), &Value::Null).await
    }

    async fn join_trip(&self, trip_id: i64) -> Result<Member, ApiError> {
        self.post(&format!("/trips/{}/join", trip_id), &Value::Null).await
    }

    // ===== Profile =====

    async fn get_me(&self) -> Result<User, ApiError> {
        self.get("/users/me", &[]).await
    }

    async fn update_me(&self, patch: &UserUpdate) -> Result<User, ApiError> {
        self.put("/users/me", patch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            api_base_url: "http://localhost:8000/api/".to_string(),
            token: Some("secret".to_string()),
            ..Config::default()
        }
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        let client = ApiClient::new(&config()).unwrap();
        assert_eq!(client.url("/trips/7"), "http://localhost:8000/api/trips/7");
    }

    #[test]
    fn test_auth_headers() {
        let client = ApiClient::new(&config()).unwrap();
        let headers = client.auth_headers().unwrap();
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer secret");

        let anonymous = ApiClient::new(&Config::default()).unwrap();
        assert!(anonymous.auth_headers().unwrap().get(header::AUTHORIZATION).is_none());

        let rotated = anonymous.with_token("next".to_string());
        assert_eq!(rotated.auth_headers().unwrap().get(header::AUTHORIZATION).unwrap(), "Bearer next");
    }

    #[test]
    fn test_invalid_token_is_rejected_before_sending() {
        let client = ApiClient::new(&config()).unwrap().with_token("bad\ntoken".to_string());
        assert!(matches!(client.auth_headers(), Err(ApiError::Network(_))));
    }
}
