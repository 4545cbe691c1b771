use super::jwt::{
    decode_jwt, DecodedToken, EmulatorSignatureVerifier, JwtError, JwtErrorCode,
    PublicKeySignatureVerifier, SignatureVerifier,
};
use super::{AuthErrorCode, FirebaseAuthError};
use crate::core::http::HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

pub const CLIENT_CERT_URL: &str =
    "https://www.googleapis.com/robot/v1/metadata/x509/securetoken@system.gserviceaccount.com";

pub const SESSION_COOKIE_CERT_URL: &str =
    "https://www.googleapis.com/identitytoolkit/v3/relyingparty/publicKeys";

const ID_TOKEN_ISSUER_PREFIX: &str = "https://securetoken.google.com/";

const SESSION_COOKIE_ISSUER_PREFIX: &str = "https://session.firebase.google.com/";

const FIREBASE_AUDIENCE: &str =
    "https://identitytoolkit.googleapis.com/google.identity.identitytoolkit.v1.IdentityToolkit";

const ALGORITHM_RS256: &str = "RS256";

const MAX_SUB_LENGTH: usize = 128;

/// Naming and error codes for one kind of verifiable token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenInfo {
    pub url: &'static str,
    pub verify_api_name: &'static str,
    pub jwt_name: &'static str,
    pub short_name: &'static str,
    pub expired_error_code: AuthErrorCode,
}

pub const ID_TOKEN_INFO: TokenInfo = TokenInfo {
    url: "https://firebase.google.com/docs/auth/admin/verify-id-tokens",
    verify_api_name: "verify_id_token()",
    jwt_name: "Firebase ID token",
    short_name: "ID token",
    expired_error_code: AuthErrorCode::IdTokenExpired,
};

pub const SESSION_COOKIE_INFO: TokenInfo = TokenInfo {
    url: "https://firebase.google.com/docs/auth/admin/manage-cookies",
    verify_api_name: "verify_session_cookie()",
    jwt_name: "Firebase session cookie",
    short_name: "session cookie",
    expired_error_code: AuthErrorCode::SessionCookieExpired,
};

/// Claims of a verified ID token or session cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedIdToken {
    pub aud: String,
    pub iss: String,
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(default)]
    pub auth_time: i64,
    #[serde(default)]
    pub firebase: Value,
    /// Every other claim, custom claims included.
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

impl DecodedIdToken {
    pub fn uid(&self) -> &str {
        &self.sub
    }
}

/// Checks the contents and signature of Firebase issued JWTs.
pub struct FirebaseTokenVerifier {
    issuer_prefix: &'static str,
    token_info: TokenInfo,
    signature_verifier: Arc<dyn SignatureVerifier>,
    emulator_verifier: Arc<dyn SignatureVerifier>,
}

impl FirebaseTokenVerifier {
    pub fn new(
        client_cert_url: &str,
        issuer_prefix: &'static str,
        token_info: TokenInfo,
        client: HttpClient,
    ) -> Result<Self, FirebaseAuthError> {
        let signature_verifier =
            PublicKeySignatureVerifier::with_certificate_url(client_cert_url, client).map_err(
                |err| FirebaseAuthError::new(AuthErrorCode::InvalidArgument, err.message),
            )?;
        Ok(Self::with_signature_verifier(
            Arc::new(signature_verifier),
            issuer_prefix,
            token_info,
        ))
    }

    pub fn with_signature_verifier(
        signature_verifier: Arc<dyn SignatureVerifier>,
        issuer_prefix: &'static str,
        token_info: TokenInfo,
    ) -> Self {
        Self {
            issuer_prefix,
            token_info,
            signature_verifier,
            emulator_verifier: Arc::new(EmulatorSignatureVerifier::new()),
        }
    }

    pub fn id_token_verifier(client: HttpClient) -> Result<Self, FirebaseAuthError> {
        Self::new(CLIENT_CERT_URL, ID_TOKEN_ISSUER_PREFIX, ID_TOKEN_INFO, client)
    }

    pub fn session_cookie_verifier(client: HttpClient) -> Result<Self, FirebaseAuthError> {
        Self::new(
            SESSION_COOKIE_CERT_URL,
            SESSION_COOKIE_ISSUER_PREFIX,
            SESSION_COOKIE_INFO,
            client,
        )
    }

    /// Verifies `token` for `project_id`, returning its decoded claims.
    pub async fn verify(
        &self,
        token: &str,
        project_id: &str,
        is_emulator: bool,
    ) -> Result<DecodedIdToken, FirebaseAuthError> {
        if token.is_empty() {
            return Err(FirebaseAuthError::new(
                AuthErrorCode::ArgumentError,
                format!(
                    "First argument to {} must be a non-empty {}.",
                    self.token_info.verify_api_name, self.token_info.jwt_name
                ),
            ));
        }

        let decoded = decode_jwt(token).map_err(|_| {
            FirebaseAuthError::new(
                AuthErrorCode::ArgumentError,
                format!(
                    "Decoding {} failed. Make sure you passed the entire string JWT which \
                     represents {}. {}",
                    self.token_info.jwt_name,
                    self.short_name_with_article(),
                    self.docs_message()
                ),
            )
        })?;

        self.verify_content(&decoded, project_id, is_emulator)?;

        let verifier = if is_emulator {
            &self.emulator_verifier
        } else {
            &self.signature_verifier
        };
        verifier
            .verify(token)
            .await
            .map_err(|err| self.map_jwt_error(err))?;

        serde_json::from_value(Value::Object(decoded.payload)).map_err(|e| {
            FirebaseAuthError::new(
                AuthErrorCode::ArgumentError,
                format!("{} has malformed claims: {}", self.token_info.jwt_name, e),
            )
        })
    }

    fn verify_content(
        &self,
        decoded: &DecodedToken,
        project_id: &str,
        is_emulator: bool,
    ) -> Result<(), FirebaseAuthError> {
        let header = &decoded.header;
        let payload = &decoded.payload;
        let jwt_name = self.token_info.jwt_name;
        let issuer = format!("{}{}", self.issuer_prefix, project_id);

        let alg = header.get("alg").and_then(Value::as_str).unwrap_or_default();
        let aud = payload.get("aud").and_then(Value::as_str).unwrap_or_default();
        let iss = payload.get("iss").and_then(Value::as_str).unwrap_or_default();
        let project_id_hint = format!(
            "Make sure the {} comes from the same Firebase project as the service account \
             used to authenticate this SDK.",
            self.token_info.short_name
        );

        let message = if !is_emulator && !header.contains_key("kid") {
            if aud == FIREBASE_AUDIENCE {
                Some(format!(
                    "{} expects {}, but was given a custom token.",
                    self.token_info.verify_api_name,
                    self.short_name_with_article()
                ))
            } else if is_legacy_custom_token(alg, payload) {
                Some(format!(
                    "{} expects {}, but was given a legacy custom token.",
                    self.token_info.verify_api_name,
                    self.short_name_with_article()
                ))
            } else {
                Some(format!("{} has no \"kid\" claim.", jwt_name))
            }
        } else if !is_emulator && alg != ALGORITHM_RS256 {
            Some(format!(
                "{} has incorrect algorithm. Expected \"{}\" but got \"{}\".",
                jwt_name, ALGORITHM_RS256, alg
            ))
        } else if aud != project_id {
            Some(format!(
                "{} has incorrect \"aud\" (audience) claim. Expected \"{}\" but got \"{}\". {}",
                jwt_name, project_id, aud, project_id_hint
            ))
        } else if iss != issuer {
            Some(format!(
                "{} has incorrect \"iss\" (issuer) claim. Expected \"{}\" but got \"{}\". {}",
                jwt_name, issuer, iss, project_id_hint
            ))
        } else {
            match payload.get("sub") {
                Some(Value::String(sub)) if sub.is_empty() => Some(format!(
                    "{} has an empty string \"sub\" (subject) claim.",
                    jwt_name
                )),
                Some(Value::String(sub)) if sub.chars().count() > MAX_SUB_LENGTH => Some(format!(
                    "{} has \"sub\" (subject) claim longer than {} characters.",
                    jwt_name, MAX_SUB_LENGTH
                )),
                Some(Value::String(_)) => None,
                _ => Some(format!("{} has no \"sub\" (subject) claim.", jwt_name)),
            }
        };

        match message {
            Some(message) => Err(FirebaseAuthError::new(
                AuthErrorCode::ArgumentError,
                format!("{} {}", message, self.docs_message()),
            )),
            None => Ok(()),
        }
    }

    fn map_jwt_error(&self, err: JwtError) -> FirebaseAuthError {
        if err.is_key_fetch_failure() {
            return FirebaseAuthError::new(AuthErrorCode::InternalError, err.message);
        }

        let info = &self.token_info;
        match err.code {
            JwtErrorCode::TokenExpired => FirebaseAuthError::new(
                info.expired_error_code,
                format!(
                    "{} has expired. Get a fresh {} from your client app and try again (auth/{}). {}",
                    info.jwt_name,
                    info.short_name,
                    info.expired_error_code.as_str(),
                    self.docs_message()
                ),
            ),
            JwtErrorCode::InvalidSignature => FirebaseAuthError::new(
                AuthErrorCode::InvalidArgument,
                format!("{} has invalid signature. {}", info.jwt_name, self.docs_message()),
            ),
            JwtErrorCode::NoMatchingKid => FirebaseAuthError::new(
                AuthErrorCode::InvalidArgument,
                format!(
                    "{} has \"kid\" claim which does not correspond to a known public key. \
                     Most likely the {} is expired, so get a fresh token from your client app \
                     and try again.",
                    info.jwt_name, info.short_name
                ),
            ),
            JwtErrorCode::InvalidArgument => {
                FirebaseAuthError::new(AuthErrorCode::InvalidArgument, err.message)
            }
        }
    }

    fn short_name_with_article(&self) -> String {
        let short_name = self.token_info.short_name;
        let article = if short_name.to_lowercase().starts_with(['a', 'e', 'i', 'o', 'u']) {
            "an"
        } else {
            "a"
        };
        format!("{} {}", article, short_name)
    }

    fn docs_message(&self) -> String {
        format!(
            "See {} for details on how to retrieve {}.",
            self.token_info.url,
            self.short_name_with_article()
        )
    }
}

fn is_legacy_custom_token(alg: &str, payload: &Map<String, Value>) -> bool {
    alg == "HS256"
        && payload.get("v").and_then(Value::as_i64) == Some(0)
        && payload
            .get("d")
            .and_then(Value::as_object)
            .is_some_and(|d| d.contains_key("uid"))
}
