// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Object-store wire API
//!
//! The remote client is written against the [`ObjectStore`] trait so tests
//! can substitute an in-memory container. The HTTP implementation speaks a
//! Pithos/Swift-style API: JSON container listings, `x-object-hash` content
//! hashes, `if-match`/`if-none-match` preconditions, a MOVE verb, and
//! `application/directory` marking directory objects.

use amphora_core::SyncError;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use url::Url;

/// Content type marking directory objects.
pub const DIRECTORY_CONTENT_TYPE: &str = "application/directory";

/// Listed or probed object metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub name: String,
    /// Content hash exposed as `x-object-hash`.
    pub etag: Option<String>,
    pub content_type: String,
    /// Service timestamp; lexically ordered.
    pub last_modified: String,
}

impl RemoteObject {
    pub fn is_dir(&self) -> bool {
        self.content_type.contains("application/directory")
            || self.content_type.contains("application/folder")
    }
}

/// Guard for conditional writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Write only over the given etag.
    IfMatch(String),
    /// Write only if nothing is there (`if-none-match: *`).
    IfNoneMatchAny,
}

/// Errors from the object-store wire.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("http status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
}

impl HttpError {
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            HttpError::Transport(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_precondition_failed(&self) -> bool {
        self.status() == Some(412)
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => {
                HttpError::Status { status: status.as_u16(), message: err.to_string() }
            }
            None => HttpError::Transport(err.to_string()),
        }
    }
}

impl From<HttpError> for SyncError {
    fn from(err: HttpError) -> Self {
        if err.is_precondition_failed() {
            SyncError::Collision(err.to_string())
        } else {
            SyncError::Sync(err.to_string())
        }
    }
}

/// Capability set of the remote container.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// List every object in the container.
    async fn list_objects(&self) -> Result<Vec<RemoteObject>, HttpError>;

    /// Metadata for one object; `None` when absent.
    async fn object_info(&self, name: &str) -> Result<Option<RemoteObject>, HttpError>;

    /// Download an object into `dest`; `None` when the object is gone.
    async fn download(&self, name: &str, dest: &Path) -> Result<Option<RemoteObject>, HttpError>;

    /// Conditional upload; returns the new etag.
    async fn put_object(
        &self,
        name: &str,
        body: Vec<u8>,
        content_type: &str,
        precondition: Option<Precondition>,
    ) -> Result<String, HttpError>;

    /// Rename within the container, guarded by `if-match`.
    async fn move_object(&self, from: &str, to: &str, if_match: &str) -> Result<(), HttpError>;

    async fn delete_object(&self, name: &str) -> Result<(), HttpError>;

    async fn container_exists(&self) -> Result<bool, HttpError>;

    async fn create_container(&self) -> Result<(), HttpError>;
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    name: String,
    #[serde(default, alias = "hash")]
    x_object_hash: Option<String>,
    #[serde(default)]
    content_type: String,
    #[serde(default)]
    last_modified: String,
}

/// Pithos/Swift-style HTTP implementation.
pub struct HttpObjectStore {
    http: reqwest::Client,
    base: Url,
    container: String,
    retry_limit: u32,
}

impl HttpObjectStore {
    /// `base` is the account endpoint; objects live under
    /// `<base>/<container>/<name>`.
    pub fn new(
        base: Url,
        container: impl Into<String>,
        auth_token: &str,
        retry_limit: u32,
    ) -> Result<Self, HttpError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let token = reqwest::header::HeaderValue::from_str(auth_token)
            .map_err(|e| HttpError::Transport(format!("invalid auth token: {e}")))?;
        headers.insert("x-auth-token", token);
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(HttpError::from)?;
        Ok(Self { http, base, container: container.into(), retry_limit })
    }

    fn container_url(&self) -> Result<Url, HttpError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| HttpError::Transport("endpoint cannot be a base".to_string()))?
            .pop_if_empty()
            .push(&self.container);
        Ok(url)
    }

    fn object_url(&self, name: &str) -> Result<Url, HttpError> {
        let mut url = self.container_url()?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| HttpError::Transport("endpoint cannot be a base".to_string()))?;
            for segment in name.split('/') {
                segments.push(segment);
            }
        }
        Ok(url)
    }

    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, HttpError> {
        let mut attempt = 0;
        loop {
            match build().send().await {
                Ok(response) => return check_status(response).await,
                Err(err) if attempt < self.retry_limit && err.status().is_none() => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %err, "transport error; retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn apply_precondition(
        request: reqwest::RequestBuilder,
        precondition: Option<&Precondition>,
    ) -> reqwest::RequestBuilder {
        match precondition {
            Some(Precondition::IfMatch(etag)) => request.header("if-match", etag),
            Some(Precondition::IfNoneMatchAny) => request.header("if-none-match", "*"),
            None => request,
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, HttpError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(HttpError::Status { status: status.as_u16(), message })
}

fn header(response: &reqwest::Response, name: &str) -> Option<String> {
    response.headers().get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn object_from_headers(name: &str, response: &reqwest::Response) -> RemoteObject {
    RemoteObject {
        name: name.to_string(),
        etag: header(response, "x-object-hash").or_else(|| header(response, "etag")),
        content_type: header(response, "content-type").unwrap_or_default(),
        last_modified: header(response, "last-modified").unwrap_or_default(),
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn list_objects(&self) -> Result<Vec<RemoteObject>, HttpError> {
        let mut url = self.container_url()?;
        url.query_pairs_mut().append_pair("format", "json");
        let response = self.send_with_retry(|| self.http.get(url.clone())).await?;
        let listed: Vec<ListedObject> = response.json().await.map_err(HttpError::from)?;
        Ok(listed
            .into_iter()
            .map(|obj| RemoteObject {
                name: obj.name,
                etag: obj.x_object_hash,
                content_type: obj.content_type,
                last_modified: obj.last_modified,
            })
            .collect())
    }

    async fn object_info(&self, name: &str) -> Result<Option<RemoteObject>, HttpError> {
        let url = self.object_url(name)?;
        match self.send_with_retry(|| self.http.head(url.clone())).await {
            Ok(response) => Ok(Some(object_from_headers(name, &response))),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn download(&self, name: &str, dest: &Path) -> Result<Option<RemoteObject>, HttpError> {
        let url = self.object_url(name)?;
        let response = match self.send_with_retry(|| self.http.get(url.clone())).await {
            Ok(response) => response,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };
        let meta = object_from_headers(name, &response);
        let body = response.bytes().await.map_err(HttpError::from)?;
        tokio::fs::write(dest, &body)
            .await
            .map_err(|e| HttpError::Transport(format!("writing '{}': {e}", dest.display())))?;
        Ok(Some(meta))
    }

    async fn put_object(
        &self,
        name: &str,
        body: Vec<u8>,
        content_type: &str,
        precondition: Option<Precondition>,
    ) -> Result<String, HttpError> {
        let url = self.object_url(name)?;
        let response = self
            .send_with_retry(|| {
                let request = self
                    .http
                    .put(url.clone())
                    .header("content-type", content_type)
                    .body(body.clone());
                Self::apply_precondition(request, precondition.as_ref())
            })
            .await?;
        header(&response, "etag")
            .or_else(|| header(&response, "x-object-hash"))
            .ok_or_else(|| HttpError::Transport("upload response carried no etag".to_string()))
    }

    async fn move_object(&self, from: &str, to: &str, if_match: &str) -> Result<(), HttpError> {
        let url = self.object_url(from)?;
        let method = reqwest::Method::from_bytes(b"MOVE")
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        let destination = format!("/{}/{}", self.container, to);
        self.send_with_retry(|| {
            self.http
                .request(method.clone(), url.clone())
                .header("destination", &destination)
                .header("if-match", if_match)
        })
        .await?;
        Ok(())
    }

    async fn delete_object(&self, name: &str) -> Result<(), HttpError> {
        let url = self.object_url(name)?;
        self.send_with_retry(|| self.http.delete(url.clone())).await?;
        Ok(())
    }

    async fn container_exists(&self) -> Result<bool, HttpError> {
        let url = self.container_url()?;
        match self.send_with_retry(|| self.http.head(url.clone())).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn create_container(&self) -> Result<(), HttpError> {
        let url = self.container_url()?;
        self.send_with_retry(|| self.http.put(url.clone())).await?;
        Ok(())
    }
}
