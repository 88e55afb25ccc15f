//! Bearer-token verification for the v2 API.
//!
//! Tokens are HMAC-signed JWTs (HS256 or HS384) verified against the
//! 128-byte secret from the `AUTH_TOKEN` (or legacy `DRAND_AUTH_KEY`)
//! environment variable. An unusable secret disables the guard with a
//! warning rather than refusing to start, so a misconfigured relay keeps
//! serving the open routes.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384};
use subtle::ConstantTimeEq;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("malformed token")]
    Malformed,
    #[error("unexpected signing method {0:?}")]
    UnexpectedAlgorithm(String),
    #[error("signature mismatch")]
    BadSignature,
    #[error("token expired")]
    Expired,
}

/// Verifies HMAC-signed bearer tokens against the shared secret.
pub struct AuthVerifier {
    secret: Vec<u8>,
}

impl AuthVerifier {
    /// Reads the secret from `AUTH_TOKEN`, falling back to the legacy
    /// `DRAND_AUTH_KEY`. Returns `None` (with a warning) when the secret
    /// is missing, shorter than 128 hex-encoded bytes, or not hex.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("AUTH_TOKEN")
            .or_else(|_| std::env::var("DRAND_AUTH_KEY"))
            .ok()?;
        if token.len() < 256 {
            tracing::warn!(
                "AUTH_TOKEN not set to a 128 byte hex-encoded secret, disabling authenticated API"
            );
            return None;
        }
        match hex::decode(&token) {
            Ok(secret) => Some(Self { secret }),
            Err(_) => {
                tracing::error!(
                    "unable to parse AUTH_TOKEN as valid hex, disabling authenticated API"
                );
                None
            }
        }
    }

    #[must_use]
    pub fn with_secret(secret: Vec<u8>) -> Self {
        Self { secret }
    }

    /// Verifies a compact JWT: structure, signing method, signature, and
    /// the `exp` claim when present.
    pub fn verify(&self, token: &str, now: i64) -> Result<(), AuthError> {
        let mut parts = token.splitn(3, '.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::Malformed);
        };

        let header = URL_SAFE_NO_PAD.decode(header_b64).map_err(|_| AuthError::Malformed)?;
        let header: serde_json::Value =
            serde_json::from_slice(&header).map_err(|_| AuthError::Malformed)?;
        let alg = header.get("alg").and_then(|v| v.as_str()).unwrap_or_default();

        let signed = &token[..header_b64.len() + 1 + payload_b64.len()];
        let signature =
            URL_SAFE_NO_PAD.decode(signature_b64).map_err(|_| AuthError::Malformed)?;

        let valid = match alg {
            "HS256" => {
                let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret)
                    .map_err(|_| AuthError::BadSignature)?;
                mac.update(signed.as_bytes());
                bool::from(mac.finalize().into_bytes().ct_eq(&signature))
            }
            "HS384" => {
                let mut mac = Hmac::<Sha384>::new_from_slice(&self.secret)
                    .map_err(|_| AuthError::BadSignature)?;
                mac.update(signed.as_bytes());
                bool::from(mac.finalize().into_bytes().ct_eq(&signature))
            }
            other => return Err(AuthError::UnexpectedAlgorithm(other.to_string())),
        };
        if !valid {
            return Err(AuthError::BadSignature);
        }

        let payload = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| AuthError::Malformed)?;
        let payload: serde_json::Value =
            serde_json::from_slice(&payload).map_err(|_| AuthError::Malformed)?;
        if let Some(exp) = payload.get("exp").and_then(serde_json::Value::as_i64) {
            if exp < now {
                return Err(AuthError::Expired);
            }
        }
        Ok(())
    }
}

/// Middleware guarding a route group with bearer-token verification.
pub async fn require_bearer(
    State(verifier): State<Arc<AuthVerifier>>,
    req: Request,
    next: Next,
) -> Response {
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let Some(token) = authorization.strip_prefix("Bearer ") else {
        tracing::error!("received request without a recognizable bearer token");
        return (StatusCode::UNAUTHORIZED, [(header::CACHE_CONTROL, "no-cache")], "Missing JWT")
            .into_response();
    };

    if let Err(e) = verifier.verify(token, relay_core::chain::system_clock()) {
        tracing::error!(error = %e, "received an invalid JWT");
        return (StatusCode::UNAUTHORIZED, [(header::CACHE_CONTROL, "no-cache")], "Invalid JWT")
            .into_response();
    }

    next.run(req).await
}
