//! HTTP-backed [`RemoteBackend`] (§6): the concrete remote asset API client
//! used outside of tests. Talks JSON for listings/metadata and a chunked
//! multipart upload for content, per the wire protocol described in §6.
//!
//! Not exercised by this crate's own unit tests (there is no bundled test
//! server); [`crate::testing::MemoryRemote`] stands in for it everywhere
//! else in this codebase's test suite.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method as HttpMethod, StatusCode};
use serde::Deserialize;

use crate::backend::{BoxFuture, EntryMeta, RemoteBackend, UploadChunk};
use crate::error::{Result, RqError};
use crate::queue::Method;

#[derive(Debug, Deserialize)]
struct RemoteEntryJson {
    path: String,
    #[serde(rename = "isDirectory")]
    is_directory: bool,
    size: u64,
    #[serde(rename = "lastModified")]
    last_modified: DateTime<Utc>,
}

impl From<RemoteEntryJson> for EntryMeta {
    fn from(json: RemoteEntryJson) -> Self {
        EntryMeta {
            path: json.path,
            is_directory: json.is_directory,
            size: json.size,
            last_modified: json.last_modified,
        }
    }
}

/// A [`RemoteBackend`] that speaks to a real asset API over HTTP.
pub struct HttpRemote {
    client: Client,
    base_url: String,
}

impl HttpRemote {
    /// Builds a client against `base_url`, applying `timeout` to every request.
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RqError::NetworkError(err.to_string()))?;
        Ok(Self { client, base_url })
    }

    fn url_for(&self, path: &str) -> String {
        let encoded = path
            .trim_start_matches('/')
            .split('/')
            .map(urlencoding::encode)
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}", self.base_url.trim_end_matches('/'), encoded)
    }

    async fn status_error(response: reqwest::Response, path: &str) -> RqError {
        let status = response.status().as_u16();
        log::debug!("[HttpRemote] {path} returned status {status}");
        RqError::RemoteStatus {
            status,
            path: path.to_string(),
        }
    }
}

impl RemoteBackend for HttpRemote {
    fn list(&self, parent: &str) -> BoxFuture<'_, Result<Vec<EntryMeta>>> {
        let parent = parent.to_string();
        Box::pin(async move {
            let response = self
                .client
                .get(self.url_for(&parent))
                .query(&[("op", "list")])
                .send()
                .await
                .map_err(|err| RqError::NetworkError(err.to_string()))?;

            if !response.status().is_success() {
                return Err(Self::status_error(response, &parent).await);
            }
            let entries: Vec<RemoteEntryJson> = response
                .json()
                .await
                .map_err(|err| RqError::ParseError(err.to_string()))?;
            Ok(entries.into_iter().map(EntryMeta::from).collect())
        })
    }

    fn stat(&self, path: &str) -> BoxFuture<'_, Result<Option<EntryMeta>>> {
        let path = path.to_string();
        Box::pin(async move {
            let response = self
                .client
                .get(self.url_for(&path))
                .query(&[("op", "stat")])
                .send()
                .await
                .map_err(|err| RqError::NetworkError(err.to_string()))?;

            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !response.status().is_success() {
                return Err(Self::status_error(response, &path).await);
            }
            let entry: RemoteEntryJson = response
                .json()
                .await
                .map_err(|err| RqError::ParseError(err.to_string()))?;
            Ok(Some(entry.into()))
        })
    }

    fn fetch(&self, path: &str) -> BoxFuture<'_, Result<(EntryMeta, Vec<u8>)>> {
        let path = path.to_string();
        Box::pin(async move {
            let meta = self
                .stat(&path)
                .await?
                .ok_or_else(|| RqError::NotFound(path.clone()))?;

            let response = self
                .client
                .get(self.url_for(&path))
                .send()
                .await
                .map_err(|err| RqError::NetworkError(err.to_string()))?;
            if !response.status().is_success() {
                return Err(Self::status_error(response, &path).await);
            }
            let bytes: Bytes = response
                .bytes()
                .await
                .map_err(|err| RqError::NetworkError(err.to_string()))?;
            Ok((meta, bytes.to_vec()))
        })
    }

    fn create_directory(&self, path: &str) -> BoxFuture<'_, Result<()>> {
        let path = path.to_string();
        Box::pin(async move {
            let response = self
                .client
                .request(HttpMethod::from_bytes(b"MKCOL").unwrap(), self.url_for(&path))
                .send()
                .await
                .map_err(|err| RqError::NetworkError(err.to_string()))?;
            if !response.status().is_success() {
                return Err(Self::status_error(response, &path).await);
            }
            Ok(())
        })
    }

    fn delete(&self, path: &str) -> BoxFuture<'_, Result<()>> {
        let path = path.to_string();
        Box::pin(async move {
            let response = self
                .client
                .delete(self.url_for(&path))
                .send()
                .await
                .map_err(|err| RqError::NetworkError(err.to_string()))?;
            if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
                return Err(Self::status_error(response, &path).await);
            }
            Ok(())
        })
    }

    fn rename(&self, from: &str, to: &str) -> BoxFuture<'_, Result<()>> {
        let (from, to) = (from.to_string(), to.to_string());
        Box::pin(async move {
            let response = self
                .client
                .request(HttpMethod::from_bytes(b"MOVE").unwrap(), self.url_for(&from))
                .header("X-Destination", self.url_for(&to))
                .header("X-Depth", "infinity")
                .header("X-Overwrite", "F")
                .send()
                .await
                .map_err(|err| RqError::NetworkError(err.to_string()))?;
            if !response.status().is_success() {
                return Err(Self::status_error(response, &from).await);
            }
            Ok(())
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        path: &'a str,
        method: Method,
        chunk: UploadChunk<'a>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let http_method = match method {
                // §6: the wire verb is inverted relative to the queue's own
                // Put/Post naming (see DESIGN.md) — Put (never synced) goes out
                // as a create (POST), Post (previously synced) as a replace (PUT).
                Method::Put => HttpMethod::POST,
                Method::Post => HttpMethod::PUT,
                Method::Delete => unreachable!("upload_chunk is never called for a Delete entry"),
            };

            let mut form = reqwest::multipart::Form::new()
                .text("_charset_", "UTF-8")
                .text("file@Offset", chunk.offset.to_string())
                .text("chunk@Length", chunk.data.len().to_string())
                .text("file@Length", chunk.total_size.to_string())
                .text("file@Completed", chunk.is_last.to_string());
            form = form.part(
                "file",
                reqwest::multipart::Part::bytes(chunk.data.to_vec()).file_name("chunk"),
            );

            let mut request = self.client.request(http_method, self.url_for(path));
            if chunk.is_first {
                request = request.header("X-First-Chunk", "true");
            }
            let response = request
                .multipart(form)
                .send()
                .await
                .map_err(|err| RqError::NetworkError(err.to_string()))?;

            match response.status() {
                StatusCode::LOCKED | StatusCode::FORBIDDEN => {
                    Err(RqError::AccessDenied(path.to_string()))
                }
                status if status.is_success() => Ok(()),
                _ => Err(Self::status_error(response, path).await),
            }
        })
    }
}

/// Convenience constructor matching [`crate::config::ShareConfig`]'s fields.
pub fn from_config(config: &crate::config::ShareConfig) -> Result<Arc<HttpRemote>> {
    Ok(Arc::new(HttpRemote::new(
        config.remote_base_url.clone(),
        config.request_timeout(),
    )?))
}
