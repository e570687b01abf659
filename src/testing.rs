//! In-memory transport that records every call and replays scripted responses.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::api::{ApiRequest, ApiResponse, Method, Transport};
use crate::errors::ApiError;

pub const MOCK_BASE: &str = "http://api.test";

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub url: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RecordedCall {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Value {
        self.body
            .as_deref()
            .and_then(|b| serde_json::from_str(b).ok())
            .unwrap_or(Value::Null)
    }
}

/// Scripted responses for one (method, path). Each queued response is served
/// once, in order; the last one served keeps being replayed.
#[derive(Default)]
struct Script {
    queue: VecDeque<ApiResponse>,
    last: Option<ApiResponse>,
}

impl Script {
    fn next(&mut self) -> Option<ApiResponse> {
        match self.queue.pop_front() {
            Some(resp) => {
                self.last = Some(resp.clone());
                Some(resp)
            }
            None => self.last.clone(),
        }
    }
}

/// Unscripted routes fail like an unreachable host.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), Script>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn json(status: u16, body: Value) -> ApiResponse {
        ApiResponse {
            status,
            content_type: Some("application/json".into()),
            set_cookies: Vec::new(),
            body: body.to_string(),
        }
    }

    pub fn text(status: u16, body: &str) -> ApiResponse {
        ApiResponse {
            status,
            content_type: Some("text/plain".into()),
            set_cookies: Vec::new(),
            body: body.to_string(),
        }
    }

    pub fn respond(&self, method: Method, path: &str, resp: ApiResponse) {
        self.routes
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .queue
            .push_back(resp);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }
}

impl ApiResponse {
    pub fn with_cookie(mut self, cookie: &str) -> Self {
        self.set_cookies.push(cookie.to_string());
        self
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, req: ApiRequest) -> Result<ApiResponse, ApiError> {
        let path = req
            .url
            .strip_prefix(MOCK_BASE)
            .unwrap_or(&req.url)
            .to_string();
        self.calls.lock().unwrap().push(RecordedCall {
            method: req.method,
            url: req.url.clone(),
            path: path.clone(),
            headers: req.headers.clone(),
            body: req.body.clone(),
        });

        let mut routes = self.routes.lock().unwrap();
        let script = routes
            .get_mut(&(req.method, path.clone()))
            .ok_or_else(|| ApiError::Transport(format!("no route scripted for {}", path)))?;
        script
            .next()
            .ok_or_else(|| ApiError::Transport(format!("no response left for {}", path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn status_of(mock: &MockTransport) -> u16 {
        let req = ApiRequest::new(Method::Get, format!("{}/api/cities/", MOCK_BASE));
        mock.send(req).await.unwrap().status
    }

    #[tokio::test]
    async fn responses_are_served_in_order_then_last_one_repeats() {
        let mock = MockTransport::new();
        mock.respond(Method::Get, "/api/cities/", MockTransport::json(200, json!([])));
        mock.respond(Method::Get, "/api/cities/", MockTransport::json(201, json!([])));
        assert_eq!(status_of(&mock).await, 200);
        assert_eq!(status_of(&mock).await, 201);
        assert_eq!(status_of(&mock).await, 201);
    }

    #[tokio::test]
    async fn response_queued_after_a_call_is_served_next() {
        let mock = MockTransport::new();
        mock.respond(Method::Get, "/api/cities/", MockTransport::json(200, json!([])));
        assert_eq!(status_of(&mock).await, 200);

        mock.respond(Method::Get, "/api/cities/", MockTransport::text(404, "gone"));
        assert_eq!(status_of(&mock).await, 404);
        assert_eq!(mock.calls()[1].url, "http://api.test/api/cities/");
    }
}
