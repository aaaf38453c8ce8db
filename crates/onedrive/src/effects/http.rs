use std::future::Future;
use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use serde_json::Value;

use crate::error::TransportError;

/// A boxed stream type for request and response bodies.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// HTTP method of an API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
        }
    }
}

/// One fragment PUT against an upload session.
pub struct ChunkUpload {
    /// `bytes {from}-{to}/{size}`
    pub content_range: String,
    pub content_length: u64,
    pub body: BoxStream<'static, io::Result<Bytes>>,
}

/// Status and raw body of a fragment PUT.
///
/// The body is kept as text: a proxy can answer with HTML, and deciding what
/// that means is up to the caller.
#[derive(Debug, Clone)]
pub struct ChunkResponse {
    pub status: u16,
    pub body: String,
}

/// A download whose body has not been read yet.
pub struct StreamResponse {
    pub status: u16,
    pub body: BoxStream<'static, Result<Bytes, TransportError>>,
}

/// Authenticated JSON channel to the drive API.
///
/// Paths are relative to the API base (`drive/root`, `drive/items/{id}`, ...).
/// Error payloads come back as JSON like any other body; only failures to
/// obtain a JSON body at all are [`TransportError`]s.
pub trait DriveApi: Send + Sync {
    fn request(
        &self,
        path: &str,
        body: Option<&Value>,
        verb: Verb,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send;

    /// PUT raw bytes as `application/octet-stream`.
    fn put_content(
        &self,
        path: &str,
        content: Bytes,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send;
}

/// Raw transport for the pre-authenticated URLs handed out by the API:
/// upload session endpoints and download links.
///
/// # Implementations
///
/// - [`ReqwestClient`]: Production implementation using `reqwest`
/// - Mock implementations for testing
pub trait HttpClient: Send + Sync {
    /// GET a URL and parse its body as JSON, whatever the status.
    fn get_json(&self, url: &str) -> impl Future<Output = Result<Value, TransportError>> + Send;

    fn put_chunk(
        &self,
        url: &str,
        chunk: ChunkUpload,
    ) -> impl Future<Output = Result<ChunkResponse, TransportError>> + Send;

    /// Open a streaming GET with custom headers.
    fn stream(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> impl Future<Output = Result<StreamResponse, TransportError>> + Send;

    /// Drop pooled connections so the next request dials again.
    fn reconnect(&self) -> Result<(), TransportError>;
}

/// Parse a response body, mapping an empty body to `null`.
pub(crate) fn parse_json(body: &str) -> Result<Value, TransportError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|_| TransportError::InvalidBody(excerpt(body)))
}

fn excerpt(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}

#[cfg(feature = "reqwest")]
mod reqwest_impl {
    use std::sync::{PoisonError, RwLock};

    use futures_util::StreamExt;
    use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
    use reqwest::{Body, Method};
    use tracing::debug;

    use super::*;
    use crate::data::ClientConfig;

    fn method(verb: Verb) -> Method {
        match verb {
            Verb::Get => Method::GET,
            Verb::Post => Method::POST,
            Verb::Put => Method::PUT,
            Verb::Patch => Method::PATCH,
            Verb::Delete => Method::DELETE,
        }
    }

    fn build_client(config: &ClientConfig) -> Result<reqwest::Client, TransportError> {
        Ok(reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?)
    }

    /// Drive API client authenticated with an OAuth2 bearer token.
    ///
    /// Obtaining and refreshing the token is left to the caller.
    pub struct GraphApi {
        client: reqwest::Client,
        base: String,
        token: String,
    }

    impl GraphApi {
        pub fn new(
            token: impl Into<String>,
            config: &ClientConfig,
        ) -> Result<Self, TransportError> {
            Ok(Self {
                client: build_client(config)?,
                base: config.api_base.clone(),
                token: token.into(),
            })
        }

        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base, path)
        }

        async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, TransportError> {
            let response = request.bearer_auth(&self.token).send().await?;
            let status = response.status();
            let body = response.text().await?;
            debug!(status = status.as_u16(), bytes = body.len(), "api response");
            parse_json(&body)
        }
    }

    impl DriveApi for GraphApi {
        async fn request(
            &self,
            path: &str,
            body: Option<&Value>,
            verb: Verb,
        ) -> Result<Value, TransportError> {
            let mut request = self.client.request(method(verb), self.url(path));
            if let Some(body) = body {
                request = request
                    .header(CONTENT_TYPE, "application/json")
                    .body(body.to_string());
            }
            self.send(request).await
        }

        async fn put_content(&self, path: &str, content: Bytes) -> Result<Value, TransportError> {
            let request = self
                .client
                .put(self.url(path))
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(content);
            self.send(request).await
        }
    }

    /// Production HTTP client implementation using reqwest.
    pub struct ReqwestClient {
        client: RwLock<reqwest::Client>,
        config: ClientConfig,
    }

    impl ReqwestClient {
        pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
            Ok(Self {
                client: RwLock::new(build_client(config)?),
                config: config.clone(),
            })
        }

        fn client(&self) -> reqwest::Client {
            self.client
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl HttpClient for ReqwestClient {
        async fn get_json(&self, url: &str) -> Result<Value, TransportError> {
            let body = self.client().get(url).send().await?.text().await?;
            parse_json(&body)
        }

        async fn put_chunk(
            &self,
            url: &str,
            chunk: ChunkUpload,
        ) -> Result<ChunkResponse, TransportError> {
            let response = self
                .client()
                .put(url)
                .header(CONTENT_RANGE, chunk.content_range)
                .header(CONTENT_LENGTH, chunk.content_length)
                .body(Body::wrap_stream(chunk.body))
                .send()
                .await?;

            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok(ChunkResponse { status, body })
        }

        async fn stream(
            &self,
            url: &str,
            headers: &[(String, String)],
        ) -> Result<StreamResponse, TransportError> {
            let mut request = self.client().get(url);
            for (key, value) in headers {
                request = request.header(key, value);
            }

            let response = request.send().await?;
            let status = response.status().as_u16();
            let body = response
                .bytes_stream()
                .map(|result| result.map_err(TransportError::from));

            Ok(StreamResponse {
                status,
                body: Box::pin(body),
            })
        }

        fn reconnect(&self) -> Result<(), TransportError> {
            let fresh = build_client(&self.config)?;
            *self.client.write().unwrap_or_else(PoisonError::into_inner) = fresh;
            Ok(())
        }
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_impl::{GraphApi, ReqwestClient};
