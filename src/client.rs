use std::pin::Pin;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::Stream;
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response, header};
use url::Url;

use crate::error::{Error, Result};
use crate::observability::{CLIENT_REQUESTS, CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS};
use crate::types::ChatRequest;

/// The default chat endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://binx.cc/api/ai-chat";

/// The default bound on connecting, on receiving response headers, and on
/// each read of the response body.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A boxed stream of raw response body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Client for the streaming chat endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    auth_token: String,
    client: ReqwestClient,
    endpoint: String,
    timeout: Duration,
}

impl ChatClient {
    /// Create a new client for the default endpoint.
    pub fn new(auth_token: impl Into<String>) -> Result<Self> {
        Self::with_options(auth_token, None, None)
    }

    /// Create a new client with custom settings.
    pub fn with_options(
        auth_token: impl Into<String>,
        endpoint: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let auth_token = auth_token.into();
        if auth_token.trim().is_empty() {
            return Err(Error::authentication("auth token is empty"));
        }
        let endpoint = endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Url::parse(&endpoint)?;

        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = ReqwestClient::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            auth_token,
            client,
            endpoint,
            timeout,
        })
    }

    /// The bearer token sent with every request.
    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    /// The endpoint requests are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The per-step timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.auth_token))
            .map_err(|_| Error::authentication("auth token is not a valid header value"))?;
        headers.insert(header::AUTHORIZATION, bearer);
        Ok(headers)
    }

    fn map_send_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout(
                format!("Request timed out: {e}"),
                Some(self.timeout.as_secs_f64()),
            )
        } else if e.is_connect() {
            Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
        } else {
            Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
        }
    }

    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();
        match response.text().await {
            Ok(body) => Error::api(status_code, body),
            Err(e) => Error::http_client(
                format!("Failed to read error response: {e}"),
                Some(Box::new(e)),
            ),
        }
    }

    /// Post `request` and return the response body as a stream of chunks.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if connecting or receiving headers exceeds the timeout.
    /// - [`Error::Connection`] if the endpoint cannot be reached.
    /// - [`Error::Api`] with the status and body text for any non-success status.
    ///
    /// Read failures while consuming the returned stream surface as
    /// [`Error::Streaming`], or [`Error::Timeout`] when a single read stalls
    /// longer than the timeout.
    pub async fn stream_chat(&self, request: &ChatRequest) -> Result<ByteStream> {
        CLIENT_REQUESTS.click();
        let start = Instant::now();
        let result = self.open_stream(request).await;
        CLIENT_REQUEST_DURATION.add(start.elapsed().as_secs_f64());
        if let Err(err) = &result {
            CLIENT_REQUEST_ERRORS.click();
            tracing::warn!(endpoint = %self.endpoint, error = %err, "chat request failed");
        }
        result
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream> {
        let send = self
            .client
            .post(&self.endpoint)
            .headers(self.default_headers()?)
            .json(request)
            .send();

        let response = match tokio::time::timeout(self.timeout, send).await {
            Ok(response) => response.map_err(|e| self.map_send_error(e))?,
            Err(_) => {
                return Err(Error::timeout(
                    "Request timed out waiting for response headers",
                    Some(self.timeout.as_secs_f64()),
                ));
            }
        };

        if !response.status().is_success() {
            return Err(Self::process_error_response(response).await);
        }

        tracing::debug!(
            endpoint = %self.endpoint,
            turns = request.messages.len(),
            "chat stream opened"
        );
        Ok(Box::pin(read_with_timeout(
            response.bytes_stream(),
            self.timeout,
        )))
    }
}

/// Bound every read of `byte_stream` by `timeout`.
fn read_with_timeout<S>(byte_stream: S, timeout: Duration) -> impl Stream<Item = Result<Bytes>>
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static,
{
    let byte_stream = Box::pin(byte_stream);
    stream::unfold(Some(byte_stream), move |state| async move {
        let mut byte_stream = state?;
        match tokio::time::timeout(timeout, byte_stream.next()).await {
            Ok(Some(Ok(bytes))) => Some((Ok(bytes), Some(byte_stream))),
            Ok(Some(Err(e))) => {
                let err = if e.is_timeout() {
                    Error::timeout(
                        format!("Timed out reading stream: {e}"),
                        Some(timeout.as_secs_f64()),
                    )
                } else {
                    Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e)))
                };
                Some((Err(err), None))
            }
            Ok(None) => None,
            Err(_) => Some((
                Err(Error::timeout(
                    "Timed out reading stream",
                    Some(timeout.as_secs_f64()),
                )),
                None,
            )),
        }
    })
}
