//! Email transport capability.
//!
//! The engine treats the outbound provider as an opaque capability:
//! `send(to, subject, html) -> provider message id | error`. Production uses
//! [`HttpApiTransport`], a thin reqwest client for JSON send APIs in the
//! Resend/SendGrid mold. Tests use [`mock::MockTransport`], which records
//! every send and can be scripted to fail per recipient.

use std::{future::Future, pin::Pin, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Boxed future returned by transport operations.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = std::result::Result<T, TransportError>> + Send + 'a>>;

/// One outbound email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    /// Destination address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// HTML body.
    pub html_body: String,
}

/// Provider-assigned identifier for an accepted send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef(pub String);

/// Failures from the outbound provider.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection-level failure reaching the provider.
    #[error("transport network error: {message}")]
    Network {
        /// Description of the connection failure.
        message: String,
    },

    /// The provider did not answer within the configured timeout.
    #[error("transport timeout after {seconds}s")]
    Timeout {
        /// Timeout that was exceeded, in seconds.
        seconds: u64,
    },

    /// The provider answered with a non-success status.
    #[error("transport API error: HTTP {status}")]
    Api {
        /// HTTP status code returned.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The provider's response could not be interpreted.
    #[error("transport protocol error: {message}")]
    Protocol {
        /// Description of the malformed response.
        message: String,
    },
}

impl TransportError {
    /// Whether the queue's retry policy should redeliver after this error.
    ///
    /// Server-side and connectivity problems are retryable; a 4xx other
    /// than 408/429 means the request itself is bad and retrying cannot
    /// help.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            Self::Protocol { .. } => false,
        }
    }
}

/// Outbound email capability consumed by delivery workers.
pub trait EmailTransport: Send + Sync + 'static {
    /// Delivers one email, returning the provider's message id.
    fn send(&self, email: OutboundEmail) -> TransportFuture<'_, MessageRef>;
}

/// Configuration for the HTTP send API transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Send endpoint URL.
    pub api_url: String,
    /// Bearer token for the provider.
    pub api_key: String,
    /// From address stamped on every send.
    pub from_address: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8090/v1/send".to_string(),
            api_key: String::new(),
            from_address: "Maildrip <scheduler@maildrip.dev>".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

/// Transport speaking to a JSON send API over HTTP.
#[derive(Debug, Clone)]
pub struct HttpApiTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl HttpApiTransport {
    /// Creates a transport with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Protocol` if the HTTP client cannot be
    /// built from the configuration.
    pub fn new(config: TransportConfig) -> std::result::Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("maildrip/0.1")
            .build()
            .map_err(|e| TransportError::Protocol {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, config })
    }
}

impl EmailTransport for HttpApiTransport {
    fn send(&self, email: OutboundEmail) -> TransportFuture<'_, MessageRef> {
        Box::pin(async move {
            debug!(to = %email.to, "sending email via HTTP API");

            let request = SendRequest {
                from: &self.config.from_address,
                to: &email.to,
                subject: &email.subject,
                html: &email.html_body,
            };

            let response = self
                .client
                .post(&self.config.api_url)
                .bearer_auth(&self.config.api_key)
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        TransportError::Timeout { seconds: self.config.timeout.as_secs() }
                    } else {
                        TransportError::Network { message: e.to_string() }
                    }
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                warn!(to = %email.to, status = status.as_u16(), "send API rejected the request");
                return Err(TransportError::Api {
                    status: status.as_u16(),
                    body: body.chars().take(512).collect(),
                });
            }

            let parsed: SendResponse = response.json().await.map_err(|e| {
                TransportError::Protocol { message: format!("malformed send response: {e}") }
            })?;

            debug!(to = %email.to, provider_id = %parsed.id, "email accepted by provider");
            Ok(MessageRef(parsed.id))
        })
    }
}

pub mod mock {
    //! Scriptable transport for tests.

    use std::collections::HashMap;

    use tokio::sync::Mutex;

    use super::{EmailTransport, MessageRef, OutboundEmail, TransportError, TransportFuture};

    /// In-memory transport that records sends and fails on demand.
    ///
    /// By default every send succeeds with a synthetic provider id. Failures
    /// can be scripted per recipient: permanently with
    /// [`fail_recipient`](MockTransport::fail_recipient), or for the next N
    /// attempts with [`fail_times`](MockTransport::fail_times).
    #[derive(Debug, Default)]
    pub struct MockTransport {
        sent: Mutex<Vec<OutboundEmail>>,
        failures: Mutex<HashMap<String, Failure>>,
    }

    #[derive(Debug, Clone)]
    struct Failure {
        error: TransportError,
        remaining: Option<u32>,
    }

    impl MockTransport {
        /// Creates a transport where every send succeeds.
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes every send to `recipient` fail with `error`.
        pub async fn fail_recipient(&self, recipient: &str, error: TransportError) {
            self.failures
                .lock()
                .await
                .insert(recipient.to_string(), Failure { error, remaining: None });
        }

        /// Makes the next `times` sends to `recipient` fail, then succeed.
        pub async fn fail_times(&self, recipient: &str, times: u32, error: TransportError) {
            self.failures
                .lock()
                .await
                .insert(recipient.to_string(), Failure { error, remaining: Some(times) });
        }

        /// Everything successfully sent so far.
        pub async fn sent(&self) -> Vec<OutboundEmail> {
            self.sent.lock().await.clone()
        }

        /// Number of successful sends so far.
        pub async fn sent_count(&self) -> usize {
            self.sent.lock().await.len()
        }

        /// Successful sends to one recipient.
        pub async fn sent_to(&self, recipient: &str) -> usize {
            self.sent.lock().await.iter().filter(|e| e.to == recipient).count()
        }
    }

    impl EmailTransport for MockTransport {
        fn send(&self, email: OutboundEmail) -> TransportFuture<'_, MessageRef> {
            Box::pin(async move {
                let mut failures = self.failures.lock().await;
                let scripted = match failures.remove(&email.to) {
                    None => None,
                    Some(Failure { error, remaining: None }) => {
                        // permanent: put the script back
                        failures.insert(
                            email.to.clone(),
                            Failure { error: error.clone(), remaining: None },
                        );
                        Some(error)
                    },
                    Some(Failure { remaining: Some(0), .. }) => None,
                    Some(Failure { error, remaining: Some(n) }) => {
                        if n > 1 {
                            failures.insert(
                                email.to.clone(),
                                Failure { error: error.clone(), remaining: Some(n - 1) },
                            );
                        }
                        Some(error)
                    },
                };
                drop(failures);
                if let Some(error) = scripted {
                    return Err(error);
                }

                let mut sent = self.sent.lock().await;
                sent.push(email);
                Ok(MessageRef(format!("mock-{}", sent.len())))
            })
        }
    }
}
