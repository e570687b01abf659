//! Gateway to the remote budget API.
//!
//! Every operation issues exactly one HTTP request. There are no retries and
//! no timeouts beyond what the transport itself imposes; failures are handed
//! straight back to the caller.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::ApiError;
use crate::structs::{
    AdminDashboard, BudgetRequest, City, MonthlyReportRow, NewUser, RequestPayload, SessionUser,
    TreasurerDashboard,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, url: String) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_json(mut self, body: &Value) -> Self {
        self.body = Some(body.to_string());
        self.with_header("Content-Type", "application/json")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApiResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub set_cookies: Vec<String>,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Moves one request over the wire.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, req: ApiRequest) -> Result<ApiResponse, ApiError>;
}

#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, req: ApiRequest) -> Result<ApiResponse, ApiError> {
        let method = match req.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &req.url);
        for (k, v) in &req.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| ApiError::Transport(format!("Could not reach the budget service: {}", e)))?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let set_cookies = resp
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        let body = resp
            .text()
            .await
            .map_err(|e| ApiError::Transport(format!("Failed to read response body: {}", e)))?;

        Ok(ApiResponse {
            status,
            content_type,
            set_cookies,
            body,
        })
    }
}

/// A decoded success body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
}

impl Payload {
    pub fn into_json<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        match self {
            Payload::Json(value) => {
                serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
            }
            Payload::Text(text) => Err(ApiError::Decode(format!(
                "expected JSON, got: {}",
                text.chars().take(120).collect::<String>()
            ))),
        }
    }
}

/// Success bodies become JSON when the content type says so (falling back to
/// text for malformed JSON); anything else is an `ApiError::Status`.
pub fn handle_response(resp: ApiResponse) -> Result<Payload, ApiError> {
    if !resp.is_success() {
        let message = error_message(&resp.body)
            .unwrap_or_else(|| format!("Request failed ({})", resp.status));
        return Err(ApiError::Status {
            status: resp.status,
            body: resp.body,
            message,
        });
    }

    let is_json = resp
        .content_type
        .as_deref()
        .map(|ct| ct.contains("application/json"))
        .unwrap_or(false);
    if is_json {
        match serde_json::from_str(&resp.body) {
            Ok(value) => return Ok(Payload::Json(value)),
            Err(e) => log::debug!("Body labelled JSON did not parse: {}", e),
        }
    }
    Ok(Payload::Text(resp.body))
}

fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["detail", "error", "message"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// Reduces `Set-Cookie` headers to a `Cookie` header value.
pub fn cookie_header(set_cookies: &[String]) -> Option<String> {
    let pairs: Vec<&str> = set_cookies
        .iter()
        .filter_map(|c| c.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('='))
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UserEnvelope {
    Wrapped { user: SessionUser },
    Flat(SessionUser),
}

impl UserEnvelope {
    fn into_user(self) -> SessionUser {
        match self {
            UserEnvelope::Wrapped { user } | UserEnvelope::Flat(user) => user,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RequestList {
    Many(Vec<BudgetRequest>),
    Wrapped { requests: Vec<BudgetRequest> },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RequestEnvelope {
    Wrapped { request: BudgetRequest },
    Flat(BudgetRequest),
}

#[derive(Deserialize)]
struct ReportEnvelope {
    #[serde(default)]
    data: Vec<MonthlyReportRow>,
}

#[derive(Deserialize)]
struct CityEnvelope {
    #[serde(default)]
    cities: Vec<City>,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

/// Identity returned by a successful login plus the API session cookie.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginOutcome {
    pub user: SessionUser,
    pub cookie: Option<String>,
}

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    cookie: Option<String>,
    transport: Arc<dyn Transport>,
}

impl ApiClient {
    pub fn new(base_url: String, cookie: Option<String>, transport: Arc<dyn Transport>) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            base_url,
            cookie,
            transport,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<ApiResponse, ApiError> {
        let mut req =
            ApiRequest::new(method, self.url(path)).with_header("Accept", "application/json");
        if let Some(cookie) = &self.cookie {
            req = req.with_header("Cookie", cookie);
        }
        if let Some(body) = &body {
            req = req.with_json(body);
        }

        log::debug!("{} {}", method.as_str(), path);
        let resp = self.transport.send(req).await.map_err(|e| {
            log::error!("{} {} failed: {}", method.as_str(), path, e);
            e
        })?;
        if !resp.is_success() {
            log::warn!("{} {} returned {}", method.as_str(), path, resp.status);
        }
        Ok(resp)
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Payload, ApiError> {
        handle_response(self.send(method, path, body).await?)
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.call(Method::Get, path, None).await?.into_json()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, ApiError> {
        let body = serde_json::to_value(Credentials { email, password })
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        let resp = self.send(Method::Post, "/api/login/", Some(body)).await?;

        if !resp.is_success() {
            let message = error_message(&resp.body)
                .unwrap_or_else(|| "Invalid email or password".to_string());
            return Err(ApiError::Status {
                status: resp.status,
                body: resp.body,
                message,
            });
        }

        let cookie = cookie_header(&resp.set_cookies);
        let user = handle_response(resp)?
            .into_json::<UserEnvelope>()?
            .into_user();
        Ok(LoginOutcome { user, cookie })
    }

    /// Ends the remote session. `Ok(false)` means the API answered with a
    /// non-success status.
    pub async fn logout(&self) -> Result<bool, ApiError> {
        let resp = self.send(Method::Get, "/logout/", None).await?;
        Ok(resp.is_success())
    }

    pub async fn current_user(&self) -> Result<SessionUser, ApiError> {
        Ok(self
            .fetch::<UserEnvelope>("/api/current-user/")
            .await?
            .into_user())
    }

    pub async fn list_requests(&self) -> Result<Vec<BudgetRequest>, ApiError> {
        Ok(match self.fetch::<RequestList>("/api/budget-requests/").await? {
            RequestList::Many(rows) | RequestList::Wrapped { requests: rows } => rows,
        })
    }

    pub async fn create_request(&self, payload: &RequestPayload) -> Result<Payload, ApiError> {
        let body = serde_json::to_value(payload).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.call(Method::Post, "/api/budget-requests/", Some(body))
            .await
    }

    pub async fn request_detail(&self, id: i64) -> Result<BudgetRequest, ApiError> {
        Ok(
            match self
                .fetch::<RequestEnvelope>(&format!("/api/budget-requests/{}/", id))
                .await?
            {
                RequestEnvelope::Wrapped { request } | RequestEnvelope::Flat(request) => request,
            },
        )
    }

    /// Replaces the request. The API moves a rejected request back to
    /// pending and clears the previous admin comment.
    pub async fn update_request(
        &self,
        id: i64,
        payload: &RequestPayload,
    ) -> Result<Payload, ApiError> {
        let body = serde_json::to_value(payload).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.call(Method::Put, &format!("/api/budget-requests/{}/", id), Some(body))
            .await
    }

    pub async fn approve(&self, id: i64, comment: Option<&str>) -> Result<Payload, ApiError> {
        self.call(
            Method::Post,
            &format!("/api/budget-requests/{}/approve/", id),
            Some(json!({ "comment": comment })),
        )
        .await
    }

    pub async fn reject(&self, id: i64, comment: &str) -> Result<Payload, ApiError> {
        self.call(
            Method::Post,
            &format!("/api/budget-requests/{}/reject/", id),
            Some(json!({ "comment": comment })),
        )
        .await
    }

    pub async fn delete_request(&self, id: i64) -> Result<Payload, ApiError> {
        self.call(Method::Delete, &format!("/api/budget-requests/{}/", id), None)
            .await
    }

    pub async fn admin_dashboard(&self) -> Result<AdminDashboard, ApiError> {
        self.fetch("/api/admin/dashboard/").await
    }

    pub async fn treasurer_dashboard(&self) -> Result<TreasurerDashboard, ApiError> {
        self.fetch("/api/treasurer/dashboard/").await
    }

    pub async fn pending_requests(&self) -> Result<Vec<BudgetRequest>, ApiError> {
        Ok(
            match self.fetch::<RequestList>("/api/admin/pending-requests/").await? {
                RequestList::Many(rows) | RequestList::Wrapped { requests: rows } => rows,
            },
        )
    }

    pub async fn monthly_report(&self) -> Result<Vec<MonthlyReportRow>, ApiError> {
        Ok(self
            .fetch::<ReportEnvelope>("/api/admin/reports/monthly/")
            .await?
            .data)
    }

    pub async fn cities(&self) -> Result<Vec<City>, ApiError> {
        Ok(self.fetch::<CityEnvelope>("/api/cities/").await?.cities)
    }

    pub async fn create_user(&self, user: &NewUser) -> Result<Payload, ApiError> {
        let body = serde_json::to_value(user).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.call(Method::Post, "/api/admin/users/", Some(body))
            .await
    }
}
