//! HTTP client for the dashboard's REST backend.
//!
//! Reads go through the shared [`RequestCache`]; mutations bypass it and then drop
//! every cached read of the touched resource.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::{EntityApi, TeamDirectory};
use crate::cache::RequestCache;
use crate::errors::SyncError;
use crate::models::{EntityKind, Identity, Record, RecordId, TeamMember};

/// Request timeout for every remote call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

struct ClientInner {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    cache: Arc<RequestCache>,
}

/// Shared connection to the remote API.
#[derive(Clone)]
pub struct RemoteClient {
    inner: Arc<ClientInner>,
}

impl RemoteClient {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        cache: Arc<RequestCache>,
    ) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                base_url: base_url.trim_end_matches('/').to_string(),
                token,
                cache,
            }),
        })
    }

    /// Collaborator for one entity kind.
    pub fn entity(&self, kind: EntityKind) -> HttpEntityApi {
        HttpEntityApi {
            client: self.clone(),
            kind,
        }
    }

    /// Profile of the identity the token belongs to.
    pub async fn profile(&self) -> Result<Identity, SyncError> {
        let body = self.send(Method::GET, "/auth/profile", None).await?;
        let user = body
            .get("user")
            .cloned()
            .ok_or_else(|| SyncError::Unauthorized("No profile returned for token".to_string()))?;
        Ok(serde_json::from_value(user)?)
    }

    fn request(&self, method: Method, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.inner.base_url, endpoint);
        let request = self
            .inner
            .http
            .request(method, url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        match &self.inner.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Cached GET.
    async fn get(&self, endpoint: &str) -> Result<Value, SyncError> {
        let key = format!("GET:{}", endpoint);
        let request = self.request(Method::GET, endpoint);
        let label = endpoint.to_string();
        self.inner
            .cache
            .fetch(&key, None, move || execute(request, label))
            .await
    }

    /// Uncached request; non-GET methods invalidate cached reads of the resource.
    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Map<String, Value>>,
    ) -> Result<Value, SyncError> {
        let invalidates = method != Method::GET;
        let mut request = self.request(method, endpoint);
        if let Some(body) = body {
            request = request.json(body);
        }

        let result = execute(request, endpoint.to_string()).await?;

        if invalidates {
            if let Some(resource) = resource_of(endpoint) {
                self.inner
                    .cache
                    .invalidate_prefix(&format!("GET:/{}", resource));
            }
        }

        Ok(result)
    }
}

#[async_trait]
impl TeamDirectory for RemoteClient {
    async fn team_members(&self) -> Result<Vec<TeamMember>, SyncError> {
        let body = self.get("/users").await?;
        take_list(body, &["users"])
    }
}

/// [`EntityApi`] backed by the remote REST routes of one resource.
#[derive(Clone)]
pub struct HttpEntityApi {
    client: RemoteClient,
    kind: EntityKind,
}

#[async_trait]
impl EntityApi for HttpEntityApi {
    async fn get_all(
        &self,
        target_user_id: Option<&str>,
        fetch_all: bool,
    ) -> Result<Vec<Record>, SyncError> {
        let user_id = if fetch_all { None } else { target_user_id };
        let query = build_query(&[("userId", user_id), ("all", fetch_all.then_some("true"))]);
        let endpoint = format!("/{}{}", self.kind.resource(), query);

        let body = self.client.get(&endpoint).await?;
        take_list(body, &[self.kind.list_field(), "records"])
    }

    async fn create(&self, input: &Map<String, Value>) -> Result<Record, SyncError> {
        let endpoint = format!("/{}", self.kind.resource());
        let body = self.client.send(Method::POST, &endpoint, Some(input)).await?;
        take_record(body)
    }

    async fn update(
        &self,
        id: &RecordId,
        patch: &Map<String, Value>,
        owner_id: Option<&str>,
    ) -> Result<Record, SyncError> {
        let endpoint = record_endpoint(self.kind, id, owner_id);
        let body = self.client.send(Method::PUT, &endpoint, Some(patch)).await?;
        take_record(body)
    }

    async fn delete(&self, id: &RecordId, owner_id: Option<&str>) -> Result<(), SyncError> {
        let endpoint = record_endpoint(self.kind, id, owner_id);
        self.client.send(Method::DELETE, &endpoint, None).await?;
        Ok(())
    }
}

fn record_endpoint(kind: EntityKind, id: &RecordId, owner_id: Option<&str>) -> String {
    format!(
        "/{}/{}{}",
        kind.resource(),
        urlencoding::encode(&id.to_string()),
        build_query(&[("userId", owner_id)])
    )
}

/// Build a query string, skipping absent values.
fn build_query(params: &[(&str, Option<&str>)]) -> String {
    let pairs: Vec<String> = params
        .iter()
        .filter_map(|(key, value)| value.map(|v| format!("{}={}", key, urlencoding::encode(v))))
        .collect();
    if pairs.is_empty() {
        String::new()
    } else {
        format!("?{}", pairs.join("&"))
    }
}

/// First path segment of an endpoint.
fn resource_of(endpoint: &str) -> Option<&str> {
    endpoint
        .trim_start_matches('/')
        .split(['/', '?'])
        .next()
        .filter(|segment| !segment.is_empty())
}

async fn execute(request: reqwest::RequestBuilder, endpoint: String) -> Result<Value, SyncError> {
    tracing::debug!(endpoint = %endpoint, "remote request");
    let response = request.send().await?;
    let status = response.status();

    if !status.is_success() {
        let message = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| body.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| {
                format!(
                    "Request failed: {}",
                    status.canonical_reason().unwrap_or("unknown status")
                )
            });
        tracing::warn!(endpoint = %endpoint, status = status.as_u16(), error = %message, "remote request failed");
        return Err(error_for_status(status, message));
    }

    if status == StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}

fn error_for_status(status: StatusCode, message: String) -> SyncError {
    match status {
        StatusCode::UNAUTHORIZED => SyncError::Unauthorized(message),
        StatusCode::FORBIDDEN => SyncError::Forbidden(message),
        StatusCode::NOT_FOUND => SyncError::NotFound(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => SyncError::Validation(message),
        other => SyncError::Remote {
            status: other.as_u16(),
            message,
        },
    }
}

/// Extract a list from a response body; a missing list reads as empty.
fn take_list<T: DeserializeOwned>(mut body: Value, fields: &[&str]) -> Result<Vec<T>, SyncError> {
    for field in fields {
        if let Some(list) = body.get_mut(*field).map(Value::take) {
            if list.is_null() {
                return Ok(Vec::new());
            }
            return Ok(serde_json::from_value(list)?);
        }
    }
    if body.is_array() {
        return Ok(serde_json::from_value(body)?);
    }
    Ok(Vec::new())
}

/// Extract the canonical record from a create/update response.
fn take_record(mut body: Value) -> Result<Record, SyncError> {
    for field in ["record", "strategy"] {
        if let Some(record) = body.get_mut(field).map(Value::take) {
            return Ok(serde_json::from_value(record)?);
        }
    }
    if body.get("id").is_some() {
        return Ok(serde_json::from_value(body)?);
    }
    Err(SyncError::Internal(
        "Remote response did not contain a record".to_string(),
    ))
}
