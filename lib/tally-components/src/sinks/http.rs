use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use metrics::Counter;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE},
    Client, RequestBuilder, Response, Url,
};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use tally_common::{
    deser::{EmptyStringAsNone, PermissiveBool},
    time::{positive_duration_from_secs, MAX_CONFIGURED_DURATION},
};
use tally_core::{Batch, EncodeError, Sink, TransportError};
use tally_error::{generic_error, ErrorContext as _, GenericError};
use tally_metrics::MetricsBuilder;
use tracing::debug;

use crate::encoders::{gzip, JsonEncoder};

// Error bodies are only logged, so there's no point in carrying around a whole HTML error page.
const MAX_ERROR_BODY_LEN: usize = 512;

const fn default_gzip() -> bool {
    true
}

const fn default_request_timeout_secs() -> f64 {
    10.0
}

/// HTTP push sink configuration.
///
/// Batches are encoded as JSON and sent in the body of a `POST` request to `endpoint`.
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct HttpSinkConfiguration {
    /// URL to send batches to.
    pub endpoint: String,

    /// Additional headers to send with every request.
    #[serde(default)]
    pub headers: IndexMap<String, String>,

    /// Whether to compress request bodies with gzip.
    ///
    /// Defaults to `true`.
    #[serde_as(as = "PermissiveBool")]
    #[serde(default = "default_gzip")]
    pub gzip: bool,

    /// Username for basic authentication.
    #[serde_as(as = "EmptyStringAsNone")]
    #[serde(default)]
    pub username: Option<String>,

    /// Password for basic authentication.
    #[serde_as(as = "EmptyStringAsNone")]
    #[serde(default)]
    pub password: Option<String>,

    /// Bearer token.
    ///
    /// Mutually exclusive with basic authentication.
    #[serde_as(as = "EmptyStringAsNone")]
    #[serde(default)]
    pub token: Option<String>,

    /// Request timeout, in seconds.
    ///
    /// Defaults to 10 seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: f64,
}

impl HttpSinkConfiguration {
    /// Creates a new `HttpSinkConfiguration` for the given endpoint with every other setting at its default.
    pub fn new<S: Into<String>>(endpoint: S) -> Self {
        Self {
            endpoint: endpoint.into(),
            headers: IndexMap::new(),
            gzip: default_gzip(),
            username: None,
            password: None,
            token: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    /// Builds the sink.
    ///
    /// # Errors
    ///
    /// If the endpoint, a header, or the authentication settings are invalid, or the HTTP client cannot be created,
    /// an error is returned.
    pub fn build(&self) -> Result<HttpSink, GenericError> {
        let endpoint = Url::parse(&self.endpoint)
            .with_error_context(|| format!("Invalid HTTP sink endpoint '{}'.", self.endpoint))?;

        let request_timeout = positive_duration_from_secs(self.request_timeout_secs).ok_or_else(|| {
            generic_error!(
                "request_timeout_secs must be greater than zero and at most {} (got {}).",
                MAX_CONFIGURED_DURATION.as_secs(),
                self.request_timeout_secs
            )
        })?;

        let auth = match (&self.username, &self.password, &self.token) {
            (None, None, None) => Auth::None,
            (Some(username), password, None) => Auth::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            (None, None, Some(token)) => Auth::Bearer(token.clone()),
            (None, Some(_), _) => return Err(generic_error!("HTTP sink password set without a username.")),
            (_, _, Some(_)) => {
                return Err(generic_error!(
                    "HTTP sink cannot use both basic authentication and a bearer token."
                ))
            }
        };

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_error_context(|| format!("Invalid HTTP sink header name '{}'.", name))?;
            let value = HeaderValue::from_str(value)
                .with_error_context(|| format!("Invalid value for HTTP sink header '{}'.", name))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .default_headers(headers)
            .build()
            .error_context("Failed to create HTTP client.")?;

        let metrics_builder = MetricsBuilder::default()
            .add_default_tag(("sink", "http"))
            .add_default_tag(("endpoint", endpoint.to_string()));
        let telemetry = Telemetry {
            requests_sent: metrics_builder.register_counter("sink_requests_sent"),
            requests_failed: metrics_builder.register_counter("sink_requests_failed"),
            bytes_sent: metrics_builder.register_counter("sink_bytes_sent"),
        };

        Ok(HttpSink {
            client,
            endpoint,
            gzip: self.gzip,
            auth,
            request_timeout,
            telemetry,
        })
    }
}

#[derive(Clone, Debug)]
enum Auth {
    None,
    Basic { username: String, password: Option<String> },
    Bearer(String),
}

impl Auth {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Self::None => request,
            Self::Basic { username, password } => request.basic_auth(username, password.as_ref()),
            Self::Bearer(token) => request.bearer_auth(token),
        }
    }
}

struct Telemetry {
    requests_sent: Counter,
    requests_failed: Counter,
    bytes_sent: Counter,
}

/// HTTP push sink.
///
/// Sends each batch as a JSON document, optionally gzip-compressed, to a fixed endpoint. Any non-2xx response is
/// reported as [`TransportError::Status`], leaving the decision to retry to the reporter.
pub struct HttpSink {
    client: Client,
    endpoint: Url,
    gzip: bool,
    auth: Auth,
    request_timeout: Duration,
    telemetry: Telemetry,
}

impl HttpSink {
    /// Returns the endpoint batches are sent to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn process_response(&self, response: Response) -> Result<(), TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY_LEN {
            let mut cut = MAX_ERROR_BODY_LEN;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }

        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }

    fn map_request_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                elapsed: self.request_timeout,
            }
        } else {
            TransportError::Io { source: e.into() }
        }
    }
}

#[async_trait]
impl Sink for HttpSink {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn encode(&self, batch: &Batch) -> Result<Bytes, EncodeError> {
        let payload = JsonEncoder.encode(batch)?;
        if !self.gzip {
            return Ok(payload);
        }

        gzip(&payload)
            .await
            .map(Bytes::from)
            .map_err(|source| EncodeError::Compress { source })
    }

    async fn transmit(&self, payload: Bytes) -> Result<(), TransportError> {
        let payload_len = payload.len();

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json");
        if self.gzip {
            request = request.header(CONTENT_ENCODING, "gzip");
        }
        let request = self.auth.apply(request).body(payload);

        self.telemetry.requests_sent.increment(1);
        let result = match request.send().await {
            Ok(response) => self.process_response(response).await,
            Err(e) => Err(self.map_request_error(e)),
        };

        match &result {
            Ok(()) => {
                self.telemetry.bytes_sent.increment(payload_len as u64);
                debug!(endpoint = %self.endpoint, bytes = payload_len, "Sent payload.");
            }
            Err(_) => self.telemetry.requests_failed.increment(1),
        }
        result
    }
}
