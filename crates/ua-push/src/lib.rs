//! Web Push delivery for usage analytics.
//!
//! Sends payload-less push messages to browser subscriptions, authenticated
//! with VAPID (RFC 8292). Subscriptions the push service reports as gone are
//! surfaced so the caller can prune them.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use ua_core::notification::PushSubscription;

/// Default request timeout for push services.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// How long the push service may hold an undelivered message (4 weeks).
const DEFAULT_TTL_SECS: u32 = 2_419_200;
/// Lifetime of a VAPID token. RFC 8292 caps this at 24 hours.
const VAPID_TOKEN_LIFETIME_SECS: i64 = 12 * 60 * 60;

/// Push delivery errors.
#[derive(Debug, Error)]
pub enum PushError {
    /// VAPID settings were missing or malformed.
    #[error("invalid VAPID configuration: {reason}")]
    InvalidVapid { reason: String },
    /// Failed to build HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// The subscription endpoint is not an absolute URL.
    #[error("invalid subscription endpoint {endpoint}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },
    /// Failed to sign the VAPID token.
    #[error("failed to sign VAPID token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
    /// HTTP request failed.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The push service refused the message.
    #[error("push service rejected message with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

/// Result of a single push attempt that reached the push service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The push service accepted the message.
    Delivered,
    /// The subscription no longer exists and should be removed.
    Gone,
}

/// Something that can deliver a push message to a subscription.
pub trait PushTransport {
    fn send(
        &self,
        subscription: &PushSubscription,
    ) -> impl Future<Output = Result<DeliveryOutcome, PushError>> + Send;
}

/// VAPID application server identity.
#[derive(Clone)]
pub struct VapidConfig {
    /// Contact URL or `mailto:` address sent as the token subject.
    pub subject: String,
    /// Uncompressed P-256 public key, base64url encoded.
    pub public_key: String,
    /// PKCS#8 PEM encoded P-256 private key.
    pub private_key_pem: String,
}

impl fmt::Debug for VapidConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VapidConfig")
            .field("subject", &self.subject)
            .field("public_key", &self.public_key)
            .field("private_key_pem", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct VapidClaims<'a> {
    aud: &'a str,
    exp: i64,
    sub: &'a str,
}

/// Signs VAPID authorization headers.
struct VapidSigner {
    subject: String,
    public_key: String,
    key: EncodingKey,
}

impl VapidSigner {
    fn new(config: &VapidConfig) -> Result<Self, PushError> {
        let subject = config.subject.trim();
        if subject.is_empty() {
            return Err(PushError::InvalidVapid {
                reason: "subject cannot be empty".to_string(),
            });
        }
        let public_key = config.public_key.trim();
        if public_key.is_empty() {
            return Err(PushError::InvalidVapid {
                reason: "public key cannot be empty".to_string(),
            });
        }
        let key = EncodingKey::from_ec_pem(config.private_key_pem.as_bytes()).map_err(|err| {
            PushError::InvalidVapid {
                reason: format!("private key: {err}"),
            }
        })?;

        Ok(Self {
            subject: subject.to_string(),
            public_key: public_key.to_string(),
            key,
        })
    }

    /// Builds the `Authorization` header value for `endpoint`.
    fn authorization(&self, endpoint: &str) -> Result<String, PushError> {
        let audience = endpoint_origin(endpoint)?;
        let claims = VapidClaims {
            aud: &audience,
            exp: Utc::now().timestamp() + VAPID_TOKEN_LIFETIME_SECS,
            sub: &self.subject,
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::ES256), &claims, &self.key)?;
        Ok(format!("vapid t={token}, k={}", self.public_key))
    }
}

/// Web Push client.
///
/// # Thread Safety
///
/// The client is safe to share across tasks. Requests share the underlying
/// HTTP connection pool.
pub struct WebPushClient {
    http: reqwest::Client,
    signer: VapidSigner,
}

impl fmt::Debug for WebPushClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebPushClient")
            .field("subject", &self.signer.subject)
            .field("private_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl WebPushClient {
    /// Creates a client for the given VAPID identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the subject or public key is blank, the private
    /// key is not a PKCS#8 EC key, or the HTTP client fails to build.
    pub fn new(config: &VapidConfig) -> Result<Self, PushError> {
        let signer = VapidSigner::new(config)?;
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(PushError::ClientBuild)?;
        Ok(Self { http, signer })
    }
}

impl PushTransport for WebPushClient {
    async fn send(&self, subscription: &PushSubscription) -> Result<DeliveryOutcome, PushError> {
        let authorization = self.signer.authorization(&subscription.endpoint)?;
        let response = self
            .http
            .post(&subscription.endpoint)
            .header("TTL", DEFAULT_TTL_SECS.to_string())
            .header(reqwest::header::AUTHORIZATION, authorization)
            .body("")
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(DeliveryOutcome::Delivered);
        }
        if is_gone(status) {
            return Ok(DeliveryOutcome::Gone);
        }
        let body = response.text().await.unwrap_or_default();
        Err(PushError::Rejected { status, body })
    }
}

/// Summary of delivering to all of a user's subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Endpoints of subscriptions that no longer exist.
    pub gone: Vec<String>,
    pub failed: usize,
}

/// Sends one push message to every subscription.
///
/// Failures are logged and counted; they never stop delivery to the
/// remaining subscriptions.
pub async fn deliver<T: PushTransport>(
    transport: &T,
    subscriptions: &[PushSubscription],
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    for subscription in subscriptions {
        match transport.send(subscription).await {
            Ok(DeliveryOutcome::Delivered) => report.delivered += 1,
            Ok(DeliveryOutcome::Gone) => {
                tracing::debug!(endpoint = %subscription.endpoint, "subscription gone");
                report.gone.push(subscription.endpoint.clone());
            }
            Err(err) => {
                tracing::warn!(endpoint = %subscription.endpoint, error = %err, "push delivery failed");
                report.failed += 1;
            }
        }
    }
    report
}

/// Push services answer 404 or 410 for expired or unsubscribed endpoints.
fn is_gone(status: StatusCode) -> bool {
    status == StatusCode::NOT_FOUND || status == StatusCode::GONE
}

fn endpoint_origin(endpoint: &str) -> Result<String, PushError> {
    let url = url::Url::parse(endpoint).map_err(|source| PushError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        source,
    })?;
    Ok(url.origin().ascii_serialization())
}
