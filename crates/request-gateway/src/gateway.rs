//! Outgoing API calls with credential attachment and one-shot refresh.
//!
//! Every call reads the bearer token from the [`SessionStore`]. A 401 gets
//! exactly one [`AuthManager::refresh_token`] and exactly one retry; a
//! second 401, or a failed refresh, is `Session expired`.

use crate::error::{RequestError, RequestResult};
use planner_auth::AuthManager;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use session_store::SessionStore;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

/// One field of a multipart form.
#[derive(Debug, Clone)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime: Option<String>,
        data: Vec<u8>,
    },
}

/// Request payload.
///
/// Binary and multipart bodies go out untouched. Only JSON bodies get a
/// JSON content type.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Bytes {
        data: Vec<u8>,
        content_type: Option<String>,
    },
    Multipart(Vec<FormPart>),
}

/// A replayable API request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    /// Token to send instead of the stored one.
    pub bearer_override: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            bearer_override: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn bytes(mut self, data: Vec<u8>, content_type: Option<String>) -> Self {
        self.body = RequestBody::Bytes { data, content_type };
        self
    }

    pub fn multipart(mut self, parts: Vec<FormPart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer_override = Some(token.into());
        self
    }

    /// Anything other than GET/HEAD changes server state.
    pub fn is_mutation(&self) -> bool {
        !matches!(self.method, Method::GET | Method::HEAD)
    }
}

/// Signals other components need to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// A call failed authorization even after refreshing.
    SessionExpired,
}

struct GatewayInner {
    http_client: reqwest::Client,
    base_url: Url,
    store: Arc<SessionStore>,
    auth: AuthManager,
    events: broadcast::Sender<GatewayEvent>,
}

/// Executes API calls against the backend. Clones share the HTTP client.
#[derive(Clone)]
pub struct RequestGateway {
    inner: Arc<GatewayInner>,
}

impl RequestGateway {
    pub fn new(base_url: Url, store: Arc<SessionStore>, auth: AuthManager) -> RequestResult<Self> {
        let http_client = reqwest::Client::builder().cookie_store(true).build()?;
        let (events, _) = broadcast::channel(16);

        Ok(Self {
            inner: Arc::new(GatewayInner {
                http_client,
                base_url,
                store,
                auth,
                events,
            }),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.events.subscribe()
    }

    /// Issue `request` and return the successful response untouched.
    pub async fn send_raw(&self, request: &ApiRequest) -> RequestResult<reqwest::Response> {
        let sent_token = request
            .bearer_override
            .clone()
            .or_else(|| self.inner.store.access_token());

        let response = self.execute(request, sent_token.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::check(response).await;
        }

        debug!(method = %request.method, path = %request.path, "Unauthorized, refreshing once");

        let stored_token = self.inner.store.access_token();
        let refreshed = if request.bearer_override.is_none()
            && stored_token.is_some()
            && stored_token != sent_token
        {
            debug!("Token already rotated by another call");
            true
        } else {
            self.inner.auth.refresh_token().await
        };

        if !refreshed {
            return Err(self.session_expired(request));
        }

        let retry_token = self
            .inner
            .store
            .access_token()
            .or_else(|| request.bearer_override.clone());
        let retry = self.execute(request, retry_token.as_deref()).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            return Err(self.session_expired(request));
        }

        Self::check(retry).await
    }

    /// Issue `request` and parse the JSON response body.
    ///
    /// An empty body parses as JSON `null`.
    pub async fn send_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> RequestResult<T> {
        let response = self.send_raw(request).await?;
        let bytes = response.bytes().await?;
        let body: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
        serde_json::from_slice(body).map_err(|e| RequestError::Decode(e.to_string()))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> RequestResult<T> {
        self.send_json(&ApiRequest::get(path)).await
    }

    async fn execute(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
    ) -> RequestResult<reqwest::Response> {
        let url = self.inner.base_url.join(&request.path)?;
        let mut builder = self
            .inner
            .http_client
            .request(request.method.clone(), url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Bytes { data, content_type } => {
                let builder = builder.body(data.clone());
                match content_type {
                    Some(content_type) => builder.header(reqwest::header::CONTENT_TYPE, content_type),
                    None => builder,
                }
            }
            RequestBody::Multipart(parts) => builder.multipart(build_form(parts)?),
        };

        Ok(builder.send().await?)
    }

    async fn check(response: reqwest::Response) -> RequestResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), body_len = body.len(), "Request failed");
        Err(RequestError::Http {
            status: status.as_u16(),
            body,
        })
    }

    fn session_expired(&self, request: &ApiRequest) -> RequestError {
        warn!(method = %request.method, path = %request.path, "Session expired");
        if self.inner.events.send(GatewayEvent::SessionExpired).is_err() {
            info!("No listeners for session expiry");
        }
        RequestError::session_expired()
    }
}

fn build_form(parts: &[FormPart]) -> RequestResult<reqwest::multipart::Form> {
    let mut form = reqwest::multipart::Form::new();
    for part in parts {
        form = match part {
            FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
            FormPart::File {
                name,
                file_name,
                mime,
                data,
            } => {
                let mut file = reqwest::multipart::Part::bytes(data.clone()).file_name(file_name.clone());
                if let Some(mime) = mime {
                    file = file.mime_str(mime)?;
                }
                form.part(name.clone(), file)
            }
        };
    }
    Ok(form)
}
