//! JWT decoding and signature verification.
//!
//! [`PublicKeySignatureVerifier`] checks signatures against keys published at a
//! certificate URL. [`EmulatorSignatureVerifier`] is used with the Auth emulator,
//! which issues unsigned tokens: it only checks the time claims.

use super::keys::{KeyFetchError, KeyFetcher, UrlKeyFetcher, KEY_FETCH_ERROR_PREFIX};
use crate::core::clock::{Clock, SystemClock};
use crate::core::http::HttpClient;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use x509_cert::der::oid::ObjectIdentifier;
use x509_cert::der::DecodePem;
use x509_cert::Certificate;

const CERTIFICATE_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwtErrorCode {
    InvalidArgument,
    TokenExpired,
    InvalidSignature,
    NoMatchingKid,
}

impl JwtErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            JwtErrorCode::InvalidArgument => "invalid-argument",
            JwtErrorCode::TokenExpired => "token-expired",
            JwtErrorCode::InvalidSignature => "invalid-token",
            JwtErrorCode::NoMatchingKid => "no-matching-kid-error",
        }
    }
}

impl fmt::Display for JwtErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct JwtError {
    pub code: JwtErrorCode,
    pub message: String,
}

impl JwtError {
    pub fn new(code: JwtErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Whether this error came from fetching the public keys rather than from
    /// the token itself.
    pub fn is_key_fetch_failure(&self) -> bool {
        self.code == JwtErrorCode::InvalidArgument
            && self.message.starts_with(KEY_FETCH_ERROR_PREFIX)
    }
}

impl From<KeyFetchError> for JwtError {
    fn from(err: KeyFetchError) -> Self {
        JwtError::new(JwtErrorCode::InvalidArgument, err.to_string())
    }
}

/// Header and payload of a JWT, decoded without verifying anything.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedToken {
    pub header: Map<String, Value>,
    pub payload: Map<String, Value>,
}

/// Decodes a compact JWT without checking its signature or claims.
pub fn decode_jwt(token: &str) -> Result<DecodedToken, JwtError> {
    if token.is_empty() {
        return Err(JwtError::new(
            JwtErrorCode::InvalidArgument,
            "The provided token must be a non-empty string.",
        ));
    }

    let segments: Vec<&str> = token.split('.').collect();
    let (header, payload) = match segments.as_slice() {
        [header, payload, _signature] => (decode_segment(header)?, decode_segment(payload)?),
        _ => return Err(decoding_failed()),
    };
    Ok(DecodedToken { header, payload })
}

fn decode_segment(segment: &str) -> Result<Map<String, Value>, JwtError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|_| decoding_failed())?;
    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(decoding_failed()),
    }
}

fn decoding_failed() -> JwtError {
    JwtError::new(JwtErrorCode::InvalidArgument, "Decoding token failed.")
}

/// Verifies the signature and the `exp`/`nbf` claims of `token` with `key`.
pub fn verify_jwt_signature(
    token: &str,
    key: &DecodingKey,
    algorithm: Algorithm,
) -> Result<(), JwtError> {
    let mut validation = Validation::new(algorithm);
    validation.leeway = 0;
    validation.validate_aud = false;
    validation.validate_nbf = true;
    validation.required_spec_claims = HashSet::new();

    jsonwebtoken::decode::<Value>(token, key, &validation)
        .map(|_| ())
        .map_err(|err| match err.kind() {
            ErrorKind::ExpiredSignature => {
                JwtError::new(JwtErrorCode::TokenExpired, "The provided token has expired.")
            }
            ErrorKind::InvalidSignature => {
                JwtError::new(JwtErrorCode::InvalidSignature, "invalid token signature")
            }
            _ => JwtError::new(JwtErrorCode::InvalidSignature, err.to_string()),
        })
}

#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<(), JwtError>;
}

/// Verifies tokens against public keys supplied by a [`KeyFetcher`].
pub struct PublicKeySignatureVerifier {
    key_fetcher: Arc<dyn KeyFetcher>,
    algorithm: Algorithm,
}

impl PublicKeySignatureVerifier {
    /// `algorithm` is a JWA identifier such as `RS256`.
    pub fn new(key_fetcher: Arc<dyn KeyFetcher>, algorithm: &str) -> Result<Self, JwtError> {
        if algorithm.is_empty() {
            return Err(JwtError::new(
                JwtErrorCode::InvalidArgument,
                "The provided algorithm must be a non-empty string.",
            ));
        }
        let algorithm = Algorithm::from_str(algorithm).map_err(|_| {
            JwtError::new(
                JwtErrorCode::InvalidArgument,
                format!("Unsupported signature algorithm \"{}\".", algorithm),
            )
        })?;
        Ok(Self {
            key_fetcher,
            algorithm,
        })
    }

    /// RS256 verifier backed by a [`UrlKeyFetcher`] for `url`.
    pub fn with_certificate_url(url: &str, client: HttpClient) -> Result<Self, JwtError> {
        let fetcher = UrlKeyFetcher::new(url, client)?;
        Self::new(Arc::new(fetcher), "RS256")
    }

    fn decoding_key(&self, pem: &str) -> Result<DecodingKey, JwtError> {
        let key = match self.algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                Ok(DecodingKey::from_secret(pem.as_bytes()))
            }
            Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem.as_bytes()),
            Algorithm::EdDSA => DecodingKey::from_ed_pem(pem.as_bytes()),
            _ if pem.contains(CERTIFICATE_BEGIN) => {
                let der = rsa_public_key_from_certificate(pem)?;
                Ok(DecodingKey::from_rsa_der(&der))
            }
            _ => DecodingKey::from_rsa_pem(pem.as_bytes()),
        };
        key.map_err(|err| JwtError::new(JwtErrorCode::InvalidSignature, err.to_string()))
    }
}

#[async_trait]
impl SignatureVerifier for PublicKeySignatureVerifier {
    async fn verify(&self, token: &str) -> Result<(), JwtError> {
        if token.is_empty() {
            return Err(JwtError::new(
                JwtErrorCode::InvalidArgument,
                "The provided token must be a non-empty string.",
            ));
        }

        let header = jsonwebtoken::decode_header(token)
            .map_err(|err| JwtError::new(JwtErrorCode::InvalidSignature, err.to_string()))?;
        let kid = header.kid.unwrap_or_default();

        let keys = self.key_fetcher.fetch_public_keys().await?;
        let pem = keys.get(&kid).ok_or_else(|| {
            JwtError::new(
                JwtErrorCode::NoMatchingKid,
                "The provided token has no matching kid.",
            )
        })?;

        let key = self.decoding_key(pem)?;
        verify_jwt_signature(token, &key, self.algorithm)
    }
}

/// Accepts any well formed token whose time claims are valid.
pub struct EmulatorSignatureVerifier {
    clock: Arc<dyn Clock>,
}

impl EmulatorSignatureVerifier {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Default for EmulatorSignatureVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignatureVerifier for EmulatorSignatureVerifier {
    async fn verify(&self, token: &str) -> Result<(), JwtError> {
        let decoded = decode_jwt(token)?;
        let now_secs = self.clock.now_millis() / 1000;

        if let Some(exp) = decoded.payload.get("exp").and_then(Value::as_f64) {
            if now_secs as f64 > exp {
                return Err(JwtError::new(
                    JwtErrorCode::TokenExpired,
                    "The provided token has expired.",
                ));
            }
        }
        if let Some(nbf) = decoded.payload.get("nbf").and_then(Value::as_f64) {
            if nbf > now_secs as f64 {
                return Err(JwtError::new(
                    JwtErrorCode::InvalidSignature,
                    "The provided token is not active yet.",
                ));
            }
        }
        Ok(())
    }
}

/// Reads the PKCS#1 `RSAPublicKey` out of a PEM encoded X.509 certificate.
fn rsa_public_key_from_certificate(pem: &str) -> Result<Vec<u8>, JwtError> {
    let certificate = Certificate::from_pem(pem.trim().as_bytes()).map_err(|err| {
        JwtError::new(
            JwtErrorCode::InvalidSignature,
            format!("Failed to parse the public key certificate: {}", err),
        )
    })?;

    let spki = certificate.tbs_certificate.subject_public_key_info;
    if spki.algorithm.oid != RSA_ENCRYPTION {
        return Err(JwtError::new(
            JwtErrorCode::InvalidSignature,
            format!(
                "The public key certificate holds a non-RSA key ({}).",
                spki.algorithm.oid
            ),
        ));
    }
    spki.subject_public_key
        .as_bytes()
        .map(<[u8]>::to_vec)
        .ok_or_else(|| {
            JwtError::new(
                JwtErrorCode::InvalidSignature,
                "Failed to read the public key from the certificate.",
            )
        })
}
