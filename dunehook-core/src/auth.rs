//! Webhook authentication.
//!
//! A delivery is admitted when either
//! - the `dune_secret` query parameter equals the configured secret, or
//! - the `x-dune-signature` header carries the hex HMAC-SHA256 of the exact body bytes.
//!
//! The query parameter wins when both are present. While the secret is still the
//! placeholder value, every delivery is admitted, but only if the operator opted in.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::{WebhookConfig, PLACEHOLDER_SECRET};
use crate::error::DunehookError;

type HmacSha256 = Hmac<Sha256>;

/// Query parameter carrying the shared secret.
pub const SECRET_QUERY_PARAM: &str = "dune_secret";

/// Header carrying the hex HMAC signature.
pub const SIGNATURE_HEADER: &str = "x-dune-signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    QueryParam,
    Header,
    Bypass,
    None,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::QueryParam => "query_param",
            AuthMethod::Header => "header",
            AuthMethod::Bypass => "bypass",
            AuthMethod::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthOutcome {
    pub method: AuthMethod,
    pub accepted: bool,
}

#[derive(Clone)]
pub struct Authenticator {
    secret: String,
    bypass: bool,
}

// Keep the secret out of Debug output.
impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("bypass", &self.bypass)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Build from config. A placeholder or empty secret is rejected unless
    /// `allow_placeholder_secret` is set, in which case every delivery is admitted.
    /// The secret is used byte-for-byte; surrounding whitespace is refused.
    pub fn from_config(config: &WebhookConfig) -> Result<Self, DunehookError> {
        let secret = config.secret.as_str();
        if secret != secret.trim() {
            return Err(DunehookError::InvalidConfig(
                "webhook.secret has leading or trailing whitespace".to_string(),
            ));
        }
        let is_placeholder = secret.is_empty() || secret == PLACEHOLDER_SECRET;

        if is_placeholder && !config.allow_placeholder_secret {
            return Err(DunehookError::InvalidConfig(
                "webhook.secret is unset or still the placeholder; set DUNE_WEBHOOK_SECRET \
                 or opt in with webhook.allow_placeholder_secret = true"
                    .to_string(),
            ));
        }

        if is_placeholder {
            tracing::warn!(
                "WEBHOOK AUTHENTICATION DISABLED: secret is the placeholder and \
                 allow_placeholder_secret is set. Every delivery will be accepted."
            );
        }

        Ok(Self {
            secret: secret.to_string(),
            bypass: is_placeholder,
        })
    }

    /// Authenticator with a real secret, no bypass.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            bypass: false,
        }
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    /// Hex HMAC-SHA256 of `body` keyed with the configured secret.
    pub fn sign(&self, body: &[u8]) -> String {
        sign_body(&self.secret, body)
    }

    pub fn authenticate(
        &self,
        body: &[u8],
        query_secret: Option<&str>,
        signature: Option<&str>,
    ) -> AuthOutcome {
        let query_secret = query_secret.filter(|s| !s.is_empty());
        let signature = signature.filter(|s| !s.is_empty());

        if self.bypass {
            return AuthOutcome {
                method: AuthMethod::Bypass,
                accepted: true,
            };
        }

        if let Some(provided) = query_secret {
            return AuthOutcome {
                method: AuthMethod::QueryParam,
                accepted: provided == self.secret,
            };
        }

        if let Some(provided) = signature {
            return AuthOutcome {
                method: AuthMethod::Header,
                accepted: self.verify_signature(body, provided),
            };
        }

        AuthOutcome {
            method: AuthMethod::None,
            accepted: false,
        }
    }

    /// Constant-time comparison of the expected hex signature against `provided`.
    /// Length mismatch is a plain rejection.
    pub fn verify_signature(&self, body: &[u8], provided: &str) -> bool {
        let expected = self.sign(body);
        expected.as_bytes().ct_eq(provided.as_bytes()).into()
    }
}

/// Hex HMAC-SHA256 of `body` keyed with `secret`, as a sender computes it.
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
