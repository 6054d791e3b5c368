//! In-process mock ACME server (C13): a scripted [`HttpClient`] used by
//! unit tests across the crate and by the `tests/` integration scenarios.
//! Grounded in the teacher's own JSON-fixture test style, generalized into
//! a reusable harness the way `houseme-acmex` reaches for `mockito`.

use std::sync::Mutex;

use async_trait::async_trait;
use http_client::{Body, Error as HttpClientError, HttpClient, Request, Response};
use serde_json::Value;

#[derive(Clone)]
enum BodyKind {
    None,
    Json(Value),
    Text(String),
}

/// One canned response, matched against requests in the order they were
/// pushed. Construction is chainable so a test reads top-to-bottom as the
/// sequence of wire exchanges it expects.
#[derive(Clone)]
pub struct ScriptedResponse {
    status: u16,
    body: BodyKind,
    content_type: &'static str,
    headers: Vec<(&'static str, String)>,
}

impl ScriptedResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: BodyKind::Json(body),
            content_type: "application/json",
            headers: Vec::new(),
        }
    }

    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: BodyKind::None,
            content_type: "application/json",
            headers: Vec::new(),
        }
    }

    /// An RFC 7807 `application/problem+json` error document.
    pub fn problem(status: u16, problem_type: &str, detail: &str) -> Self {
        Self {
            status,
            body: BodyKind::Json(serde_json::json!({"type": problem_type, "detail": detail, "status": status})),
            content_type: "application/problem+json",
            headers: Vec::new(),
        }
    }

    /// A raw-text response, e.g. the `application/pem-certificate-chain`
    /// body returned from a certificate download (RFC 8555 §7.4.2), which
    /// isn't JSON and shouldn't be quoted like a JSON string would be.
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: BodyKind::Text(body.into()),
            content_type: "application/pem-certificate-chain",
            headers: Vec::new(),
        }
    }

    pub fn with_nonce(self, nonce: &str) -> Self {
        self.with_header("Replay-Nonce", nonce)
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn into_response(self) -> Response {
        let status = http_client::StatusCode::try_from(self.status)
            .unwrap_or(http_client::StatusCode::InternalServerError);
        let mut resp = Response::new(status);
        for (name, value) in &self.headers {
            resp.insert_header(*name, value.as_str());
        }
        match self.body {
            BodyKind::None => {}
            BodyKind::Json(body) => {
                let mut b = Body::from_json(&body).expect("scripted response body must serialize");
                b.set_mime(self.content_type.parse().expect("valid mime"));
                resp.set_body(b);
            }
            BodyKind::Text(body) => {
                let mut b = Body::from_string(body);
                b.set_mime(self.content_type.parse().expect("valid mime"));
                resp.set_body(b);
            }
        }
        resp
    }
}

/// A fixed, ordered sequence of responses played back one per `send`.
/// Popping past the end of the script panics immediately — in a test
/// harness an unexpected extra request is a bug worth failing loud on.
#[derive(Debug)]
pub struct MockHttpClient {
    script: Mutex<std::collections::VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<String>>,
}

impl std::fmt::Debug for ScriptedResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedResponse")
            .field("status", &self.status)
            .finish()
    }
}

impl MockHttpClient {
    pub fn new(script: Vec<ScriptedResponse>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// URLs of every request sent so far, in order — useful for asserting
    /// a test exercised the expected wire sequence.
    pub fn requested_urls(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn send(&self, req: Request) -> Result<Response, HttpClientError> {
        self.requests.lock().unwrap().push(req.url().to_string());
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("mock ACME server: unscripted request to {}", req.url()));
        Ok(next.into_response())
    }
}
