//! REST-backed object store client.
//!
//! Objects are addressed with Kubernetes-style paths:
//!
//! - core group: `/api/{version}[/namespaces/{namespace}]/{plural}[/{name}]`
//! - named groups: `/apis/{group}/{version}[/namespaces/{namespace}]/{plural}[/{name}]`
//!
//! Calls are issued with `reqwest` and driven to completion on the calling thread, so the
//! client fits the orchestrator's synchronous call model. Cancelling the [`CallContext`]
//! aborts an in-flight request.

use std::{collections::HashMap, env, time::Duration};

use anyhow::{Context, Result, anyhow};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url, header};
use serde_json::Value;
use settle_types::{GroupVersionKind, ListSelector, ObjectKey};
use settle_util::{block_on, preview};
use tracing::debug;

use crate::{context::CallContext, error::StoreError, store::ObjectStore};

/// Environment variable holding the store's base URL.
pub const STORE_URL_ENV: &str = "SETTLE_STORE_URL";
/// Environment variable holding an optional bearer token.
pub const STORE_TOKEN_ENV: &str = "SETTLE_STORE_TOKEN";

const MERGE_PATCH_CONTENT_TYPE: &str = "application/merge-patch+json";
/// Hostnames allowed to use plain HTTP.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1", "[::1]"];
const ERROR_PREVIEW_LIMIT: usize = 200;
/// Characters escaped in path segments; RFC 3986 unreserved characters pass through.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    base_url: Url,
    http: Client,
    plurals: HashMap<String, String>,
}

impl HttpObjectStore {
    /// Build a client for `base_url`, authenticating with `token` when given.
    ///
    /// Non-localhost URLs must use HTTPS.
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let base_url = validate_base_url(base_url)?;

        let mut default_headers = header::HeaderMap::new();
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(token) = token.map(str::trim).filter(|token| !token.is_empty()) {
            let mut value = header::HeaderValue::from_str(&format!("Bearer {token}")).context("invalid store token")?;
            value.set_sensitive(true);
            default_headers.insert(header::AUTHORIZATION, value);
        }

        let http = Client::builder()
            .default_headers(default_headers)
            .user_agent(format!("settle/{}; {}", env!("CARGO_PKG_VERSION"), env::consts::OS))
            .timeout(Duration::from_secs(30))
            .build()
            .context("build http client")?;

        Ok(Self {
            base_url,
            http,
            plurals: HashMap::new(),
        })
    }

    /// Build a client from `SETTLE_STORE_URL` and `SETTLE_STORE_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let base_url = env::var(STORE_URL_ENV).with_context(|| format!("{STORE_URL_ENV} is not set"))?;
        let token = env::var(STORE_TOKEN_ENV).ok();
        Self::new(&base_url, token.as_deref())
    }

    /// Override the plural resource name used in paths for `kind`.
    pub fn with_plural(mut self, kind: impl Into<String>, plural: impl Into<String>) -> Self {
        self.plurals.insert(kind.into(), plural.into());
        self
    }

    fn plural(&self, kind: &str) -> String {
        self.plurals.get(kind).cloned().unwrap_or_else(|| default_plural(kind))
    }

    fn collection_path(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> String {
        let mut path = if gvk.group.is_empty() {
            format!("/api/{}", gvk.version)
        } else {
            format!("/apis/{}/{}", gvk.group, gvk.version)
        };
        if let Some(namespace) = namespace {
            path.push_str("/namespaces/");
            path.push_str(&encode_segment(namespace));
        }
        path.push('/');
        path.push_str(&self.plural(&gvk.kind));
        path
    }

    fn object_path(&self, key: &ObjectKey) -> String {
        format!("{}/{}", self.collection_path(&key.gvk, key.namespace.as_deref()), encode_segment(&key.name))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, StoreError> {
        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|error| StoreError::Invalid(format!("cannot build url for '{path}': {error}")))?;
        debug!(%method, %url, "building store request");
        Ok(self.http.request(method, url))
    }

    /// Send `request`, honoring cancellation, and decode the JSON body.
    fn execute(&self, context: &CallContext, request: RequestBuilder, target: Target<'_>) -> Result<Value, StoreError> {
        context.check()?;
        let token = context.token().clone();
        let exchange = async move {
            tokio::select! {
                _ = token.cancelled() => Err(StoreError::Cancelled),
                outcome = send(request) => outcome,
            }
        };
        let (status, body) = block_on(exchange).map_err(|error| StoreError::Transport(error.to_string()))??;
        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&body).map_err(|error| StoreError::Transport(format!("invalid JSON response: {error}")));
        }
        Err(map_status(status, &body, target))
    }
}

/// What a request was about, for mapping error statuses.
#[derive(Clone, Copy)]
enum Target<'a> {
    Create(&'a ObjectKey),
    Object(&'a ObjectKey),
    Collection,
}

async fn send(request: RequestBuilder) -> Result<(StatusCode, String), StoreError> {
    let response = request.send().await.map_err(|error| StoreError::Transport(error.to_string()))?;
    let status = response.status();
    let body = response.text().await.map_err(|error| StoreError::Transport(error.to_string()))?;
    Ok((status, body))
}

fn map_status(status: StatusCode, body: &str, target: Target<'_>) -> StoreError {
    let message = error_message(body);
    match (status, target) {
        (StatusCode::NOT_FOUND, Target::Object(key)) => StoreError::NotFound { key: key.clone() },
        (StatusCode::CONFLICT, Target::Create(key)) => StoreError::AlreadyExists { key: key.clone() },
        (StatusCode::CONFLICT, Target::Object(key)) => StoreError::Conflict {
            key: key.clone(),
            message,
        },
        (StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY, _) => StoreError::Invalid(message),
        _ => StoreError::Status {
            status: status.as_u16(),
            message,
        },
    }
}

/// Prefer a `message` field in a JSON error body; fall back to a preview of the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| preview(body, ERROR_PREVIEW_LIMIT))
}

impl ObjectStore for HttpObjectStore {
    fn get(&self, context: &CallContext, key: &ObjectKey) -> Result<Value, StoreError> {
        let request = self.request(Method::GET, &self.object_path(key))?;
        self.execute(context, request, Target::Object(key))
    }

    fn create(&self, context: &CallContext, document: &Value) -> Result<Value, StoreError> {
        let key = ObjectKey::from_document(document).map_err(|error| StoreError::Invalid(error.to_string()))?;
        let request = self
            .request(Method::POST, &self.collection_path(&key.gvk, key.namespace.as_deref()))?
            .json(document);
        self.execute(context, request, Target::Create(&key))
    }

    fn update(&self, context: &CallContext, document: &Value) -> Result<Value, StoreError> {
        let key = ObjectKey::from_document(document).map_err(|error| StoreError::Invalid(error.to_string()))?;
        let request = self.request(Method::PUT, &self.object_path(&key))?.json(document);
        self.execute(context, request, Target::Object(&key))
    }

    fn patch(&self, context: &CallContext, key: &ObjectKey, merge_patch: &Value) -> Result<Value, StoreError> {
        let body = serde_json::to_vec(merge_patch).map_err(|error| StoreError::Invalid(error.to_string()))?;
        let request = self
            .request(Method::PATCH, &self.object_path(key))?
            .header(header::CONTENT_TYPE, MERGE_PATCH_CONTENT_TYPE)
            .body(body);
        self.execute(context, request, Target::Object(key))
    }

    fn delete(&self, context: &CallContext, key: &ObjectKey) -> Result<(), StoreError> {
        let request = self.request(Method::DELETE, &self.object_path(key))?;
        self.execute(context, request, Target::Object(key)).map(|_| ())
    }

    fn list(&self, context: &CallContext, selector: &ListSelector) -> Result<Vec<Value>, StoreError> {
        let mut request = self.request(Method::GET, &self.collection_path(&selector.gvk, selector.namespace.as_deref()))?;
        if !selector.labels.is_empty() {
            request = request.query(&[("labelSelector", selector.label_expression())]);
        }
        let response = self.execute(context, request, Target::Collection)?;
        let items = match response {
            Value::Object(mut body) => match body.remove("items") {
                Some(Value::Array(items)) => items,
                Some(Value::Null) | None => Vec::new(),
                Some(_) => return Err(StoreError::Transport("list response 'items' is not an array".into())),
            },
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            _ => return Err(StoreError::Transport("unexpected list response".into())),
        };
        let api_version = selector.gvk.api_version();
        Ok(items
            .into_iter()
            .map(|mut item| {
                // List items commonly omit their type fields.
                if let Value::Object(map) = &mut item {
                    map.entry("apiVersion").or_insert_with(|| Value::String(api_version.clone()));
                    map.entry("kind").or_insert_with(|| Value::String(selector.gvk.kind.clone()));
                }
                item
            })
            .filter(|item| selector.matches(item))
            .collect())
    }
}

/// Validate that a base URL is acceptable for use by the client.
///
/// Rules:
/// - `localhost`, `127.0.0.1` or `[::1]`: any scheme is allowed
/// - otherwise: scheme must be HTTPS
fn validate_base_url(base: &str) -> Result<Url> {
    let mut parsed = Url::parse(base.trim()).map_err(|error| anyhow!("invalid store URL '{}': {}", base, error))?;
    let host_name = parsed.host_str().ok_or_else(|| anyhow!("store URL must include a host"))?;

    let is_local = LOCALHOST_DOMAINS.iter().any(|allowed| host_name.eq_ignore_ascii_case(allowed));
    if !is_local && parsed.scheme() != "https" {
        return Err(anyhow!(
            "store URL must use https for non-localhost hosts; got '{}://'",
            parsed.scheme()
        ));
    }
    // `Url::join` replaces the last segment unless the path ends with a slash.
    if !parsed.path().ends_with('/') {
        let path = format!("{}/", parsed.path());
        parsed.set_path(&path);
    }
    Ok(parsed)
}

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

/// English pluralization of a kind, lowercased: `Pod` → `pods`, `Ingress` → `ingresses`,
/// `NetworkPolicy` → `networkpolicies`.
fn default_plural(kind: &str) -> String {
    let lower = kind.to_ascii_lowercase();
    if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with("ch") || lower.ends_with("sh") {
        return format!("{lower}es");
    }
    if let Some(stem) = lower.strip_suffix('y')
        && !stem.ends_with(['a', 'e', 'i', 'o', 'u'])
    {
        return format!("{stem}ies");
    }
    format!("{lower}s")
}
