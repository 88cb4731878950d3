//! Cloud Firestore backend over the REST API
//!
//! Documents are translated to Firestore's typed value encoding on write and
//! back to plain JSON on read. The REST API has no push channel, so watches
//! poll and diff against the last delivered snapshot.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::document::{split_path, Document, DocumentStore, Subscription};
use crate::config::SignalingConfig;
use crate::error::{AppError, Result};
use crate::utils::LogThrottler;

const FIRESTORE_HOST: &str = "https://firestore.googleapis.com";
const LIST_PAGE_SIZE: u32 = 300;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Credentials file contents
#[derive(Debug, Deserialize)]
struct Credentials {
    project_id: Option<String>,
    access_token: Option<String>,
}

/// Firestore [`DocumentStore`]
#[derive(Clone)]
pub struct FirestoreDocumentStore {
    inner: Arc<Inner>,
}

struct Inner {
    client: reqwest::Client,
    /// `.../projects/<id>/databases/(default)/documents`
    base_url: String,
    token: Option<String>,
    poll_interval: Duration,
}

impl FirestoreDocumentStore {
    /// Requests time out after [`REQUEST_TIMEOUT`]; a timeout surfaces as
    /// `StoreUnavailable` like any other transport error.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                base_url: base_url.into().trim_end_matches('/').to_string(),
                token,
                poll_interval,
            }),
        })
    }

    /// Build from signaling configuration
    ///
    /// The emulator needs no token. Production access reads `access_token`
    /// from the credentials file.
    pub async fn from_config(config: &SignalingConfig) -> Result<Self> {
        let credentials = match &config.credentials_path {
            Some(path) => Some(read_credentials(Path::new(path)).await?),
            None => None,
        };

        let project_id = config
            .project_id
            .clone()
            .or_else(|| credentials.as_ref().and_then(|c| c.project_id.clone()))
            .ok_or_else(|| AppError::Config("Firestore project_id is not configured".into()))?;

        let poll_interval = Duration::from_millis(config.poll_interval_ms.max(50));

        let (host, token) = match &config.emulator_host {
            Some(emulator) => (format!("http://{}", emulator), None),
            None => {
                let token = credentials
                    .and_then(|c| c.access_token)
                    .ok_or_else(|| {
                        AppError::Config("Firestore credentials carry no access_token".into())
                    })?;
                (FIRESTORE_HOST.to_string(), Some(token))
            }
        };

        let base_url = format!(
            "{}/v1/projects/{}/databases/(default)/documents",
            host, project_id
        );
        info!("Firestore signaling store at {}", base_url);

        Self::new(base_url, token, poll_interval)
    }

    fn url(&self, path: &str) -> String {
        let encoded: Vec<_> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/{}", self.inner.base_url, encoded.join("/"))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.inner.client.request(method, url);
        match &self.inner.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn fetch(&self, path: &str) -> Result<Option<Document>> {
        let resp = self.request(Method::GET, &self.url(path)).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: Value = check(resp).await?.json().await?;
        Ok(Some(decode_fields(body.get("fields"))))
    }

    async fn fetch_collection(&self, collection: &str) -> Result<Vec<(String, Document)>> {
        let url = self.url(collection);
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("pageSize", LIST_PAGE_SIZE.to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let resp = self.request(Method::GET, &url).query(&query).send().await?;
            if resp.status() == StatusCode::NOT_FOUND {
                break;
            }
            let body: Value = check(resp).await?.json().await?;

            if let Some(documents) = body.get("documents").and_then(Value::as_array) {
                for document in documents {
                    if let Some(id) = document_id(document) {
                        out.push((id, decode_fields(document.get("fields"))));
                    }
                }
            }

            page_token = body
                .get("nextPageToken")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl DocumentStore for FirestoreDocumentStore {
    fn name(&self) -> &'static str {
        "firestore"
    }

    async fn get(&self, path: &str) -> Result<Option<Document>> {
        self.fetch(path).await
    }

    async fn set(&self, path: &str, doc: Document) -> Result<()> {
        let resp = self
            .request(Method::PATCH, &self.url(path))
            .json(&json!({ "fields": encode_fields(&doc) }))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn update(&self, path: &str, fields: Document) -> Result<()> {
        let mut query: Vec<(&str, String)> = fields
            .keys()
            .map(|k| ("updateMask.fieldPaths", k.clone()))
            .collect();
        query.push(("currentDocument.exists", "true".to_string()));

        let resp = self
            .request(Method::PATCH, &self.url(path))
            .query(&query)
            .json(&json!({ "fields": encode_fields(&fields) }))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(AppError::DocumentNotFound(path.to_string()));
        }
        check(resp).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let resp = self.request(Method::DELETE, &self.url(path)).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(resp).await?;
        Ok(())
    }

    async fn add(&self, collection: &str, doc: Document) -> Result<String> {
        let resp = self
            .request(Method::POST, &self.url(collection))
            .json(&json!({ "fields": encode_fields(&doc) }))
            .send()
            .await?;
        let body: Value = check(resp).await?.json().await?;
        document_id(&body).ok_or_else(|| {
            AppError::StoreUnavailable("Firestore create returned no document name".into())
        })
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Document)>> {
        self.fetch_collection(collection).await
    }

    async fn watch_document(
        &self,
        path: &str,
        capacity: usize,
    ) -> Result<Subscription<Option<Document>>> {
        // The first read happens inline so an unreachable store fails the watch
        let initial = self.fetch(path).await?;

        let (tx, sub) = Subscription::channel(capacity);
        let store = self.clone();
        let path = path.to_string();

        tokio::spawn(async move {
            let throttler = LogThrottler::with_secs(30);
            let mut last = initial.clone();
            if !tx.send(initial).await {
                return;
            }

            let mut ticker = tokio::time::interval(store.inner.poll_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = tx.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match store.fetch(&path).await {
                    Ok(current) => {
                        throttler.clear("poll");
                        if current != last {
                            last = current.clone();
                            if !tx.send(current).await {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        if throttler.should_log("poll") {
                            warn!("Polling document {} failed: {}", path, e);
                        }
                    }
                }
            }
            debug!("Firestore document watch on {} ended", path);
        });

        Ok(sub)
    }

    async fn watch_collection(
        &self,
        collection: &str,
        capacity: usize,
    ) -> Result<Subscription<(String, Document)>> {
        let initial = self.fetch_collection(collection).await?;

        let (tx, sub) = Subscription::channel(capacity);
        let store = self.clone();
        let collection = collection.to_string();

        tokio::spawn(async move {
            let throttler = LogThrottler::with_secs(30);
            let mut seen = HashSet::new();
            let mut ticker = tokio::time::interval(store.inner.poll_interval);
            ticker.tick().await;

            let mut batch = initial;
            loop {
                for (id, doc) in batch {
                    if seen.insert(id.clone()) && !tx.send((id, doc)).await {
                        return;
                    }
                }

                tokio::select! {
                    _ = tx.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                batch = match store.fetch_collection(&collection).await {
                    Ok(docs) => {
                        throttler.clear("poll");
                        docs
                    }
                    Err(e) => {
                        if throttler.should_log("poll") {
                            warn!("Polling collection {} failed: {}", collection, e);
                        }
                        Vec::new()
                    }
                };
            }
            debug!("Firestore collection watch on {} ended", collection);
        });

        Ok(sub)
    }
}

async fn read_credentials(path: &Path) -> Result<Credentials> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        AppError::Config(format!("Cannot read credentials {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&raw)
        .map_err(|e| AppError::Config(format!("Invalid credentials {}: {}", path.display(), e)))
}

/// Map non-success responses to store errors
///
/// Only 5xx is transient. Rejected credentials are a configuration problem,
/// any other 4xx is a request the store will never accept.
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = format!("Firestore returned {}: {}", status, body.trim());
    Err(match status {
        s if s.is_server_error() => AppError::StoreUnavailable(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AppError::Config(message),
        _ => AppError::Internal(message),
    })
}

/// Last path segment of a document's `name`
fn document_id(document: &Value) -> Option<String> {
    let name = document.get("name")?.as_str()?;
    split_path(name).map(|(_, id)| id.to_string())
}

/// Encode a plain JSON map as Firestore `fields`
pub fn encode_fields(doc: &Document) -> Value {
    Value::Object(
        doc.iter()
            .map(|(k, v)| (k.clone(), encode_value(v)))
            .collect(),
    )
}

/// Encode a plain JSON value as a Firestore typed `Value`
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(encode_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

/// Decode Firestore `fields` into a plain JSON map
pub fn decode_fields(fields: Option<&Value>) -> Document {
    fields
        .and_then(Value::as_object)
        .map(|fields| {
            fields
                .iter()
                .map(|(k, v)| (k.clone(), decode_value(v)))
                .collect()
        })
        .unwrap_or_default()
}

/// Decode a Firestore typed `Value` into plain JSON
pub fn decode_value(value: &Value) -> Value {
    let Some((kind, inner)) = value.as_object().and_then(|m| m.iter().next()) else {
        return Value::Null;
    };

    match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => Value::Bool(inner.as_bool().unwrap_or(false)),
        "integerValue" => match inner {
            Value::String(s) => s.parse::<i64>().map(Value::from).unwrap_or(Value::Null),
            other => other.clone(),
        },
        "doubleValue" => inner.clone(),
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(decode_fields(inner.get("fields"))),
        "geoPointValue" => inner.clone(),
        _ => Value::Null,
    }
}
