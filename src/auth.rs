//! Service-account credential exchange
//!
//! A service account proves its identity by signing a short-lived JWT
//! assertion with its RSA private key. The token endpoint trades that
//! assertion for a bearer token, which [`Authenticator`] caches until it
//! is close to expiry.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{ProxyError, Result};

/// Read/write scope for the spreadsheet API
pub const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// Default OAuth token endpoint (also the assertion audience)
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Lifetime requested for each assertion, in seconds
pub const DEFAULT_TOKEN_TTL: u64 = 3600;

/// Tokens this close to expiry are refreshed, in seconds
pub const REFRESH_MARGIN: i64 = 300;

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Service-account identity with a parsed signing key
#[derive(Clone)]
pub struct ServiceAccount {
    email: String,
    key: PKey<Private>,
}

impl std::fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Claims of the signed assertion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Serialize)]
struct JwtHeader<'a> {
    alg: &'a str,
    typ: &'a str,
}

impl ServiceAccount {
    /// Parse a PEM private key for the given account
    ///
    /// Accepts PKCS#8 (`BEGIN PRIVATE KEY`) and PKCS#1 (`BEGIN RSA PRIVATE KEY`)
    /// keys. Literal `\n` sequences, as found in environment variables, are
    /// turned into newlines first.
    ///
    /// # Errors
    /// * `Config` if the email is empty
    /// * `InvalidKey` if the PEM cannot be parsed or is not an RSA key
    pub fn from_pem(email: &str, pem: &str) -> Result<Self> {
        if email.trim().is_empty() {
            return Err(ProxyError::Config(
                "Service account email is empty".to_string(),
            ));
        }

        let pem = normalize_pem(pem);
        let key = PKey::private_key_from_pem(pem.as_bytes())
            .map_err(|e| ProxyError::InvalidKey(e.to_string()))?;
        if key.rsa().is_err() {
            return Err(ProxyError::InvalidKey(
                "expected an RSA private key".to_string(),
            ));
        }

        Ok(ServiceAccount {
            email: email.trim().to_string(),
            key,
        })
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// Build the claims for an assertion issued at `issued_at`
    pub fn claims(&self, scope: &str, audience: &str, issued_at: i64, ttl: u64) -> Claims {
        Claims {
            iss: self.email.clone(),
            scope: scope.to_string(),
            aud: audience.to_string(),
            iat: issued_at,
            exp: issued_at + ttl as i64,
        }
    }

    /// Sign claims into a compact RS256 JWT
    pub fn sign(&self, claims: &Claims) -> Result<String> {
        let header = serde_json::to_vec(&JwtHeader {
            alg: "RS256",
            typ: "JWT",
        })?;
        let payload = serde_json::to_vec(claims)?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        );

        let signature = self
            .rsa_sha256(signing_input.as_bytes())
            .map_err(|e| ProxyError::InvalidKey(e.to_string()))?;

        Ok(format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    fn rsa_sha256(&self, data: &[u8]) -> std::result::Result<Vec<u8>, openssl::error::ErrorStack> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.key)?;
        signer.update(data)?;
        signer.sign_to_vec()
    }
}

/// Replace escaped newlines and surrounding quotes left by env files
pub fn normalize_pem(pem: &str) -> String {
    pem.trim()
        .trim_matches('"')
        .replace("\\n", "\n")
}

/// Credentials used to reach the spreadsheet API
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Read/write access through a bearer token
    ServiceAccount(ServiceAccount),
    /// Read-only access through an API key
    ApiKey(String),
}

/// Bearer token and the instant it stops being valid
#[derive(Debug, Clone, PartialEq)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Whether the token stays valid for at least the refresh margin
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now > Duration::seconds(REFRESH_MARGIN)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

/// How a single outbound request is authorized
#[derive(Debug, Clone, PartialEq)]
pub enum Authorization {
    Bearer(String),
    ApiKey(String),
}

impl Authorization {
    /// Attach the credential to an outbound request
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Authorization::Bearer(token) => request.bearer_auth(token),
            Authorization::ApiKey(key) => request.query(&[("key", key)]),
        }
    }
}

/// Exchanges credentials for bearer tokens and caches them
pub struct Authenticator {
    http: Client,
    credentials: Credentials,
    token_url: String,
    scope: String,
    ttl: u64,
    cached: Mutex<Option<AccessToken>>,
}

impl Authenticator {
    pub fn new(http: Client, credentials: Credentials) -> Self {
        Authenticator {
            http,
            credentials,
            token_url: DEFAULT_TOKEN_URL.to_string(),
            scope: SPREADSHEETS_SCOPE.to_string(),
            ttl: DEFAULT_TOKEN_TTL,
            cached: Mutex::new(None),
        }
    }

    /// Use a different token endpoint (also used as the assertion audience)
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    /// Set the assertion lifetime in seconds
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.credentials, Credentials::ApiKey(_))
    }

    /// Authorization for the next outbound request
    ///
    /// Service-account tokens are reused until they come within
    /// [`REFRESH_MARGIN`] of expiry. Concurrent callers wait for a single
    /// refresh.
    pub async fn authorize(&self) -> Result<Authorization> {
        let account = match &self.credentials {
            Credentials::ApiKey(key) => return Ok(Authorization::ApiKey(key.clone())),
            Credentials::ServiceAccount(account) => account,
        };

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(Authorization::Bearer(token.value.clone()));
            }
        }

        let token = self.exchange(account).await?;
        log::info!(
            "Obtained access token for {} (expires {})",
            account.email(),
            token.expires_at
        );
        let value = token.value.clone();
        *cached = Some(token);
        Ok(Authorization::Bearer(value))
    }

    /// Drop the cached token so the next call re-authenticates
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn exchange(&self, account: &ServiceAccount) -> Result<AccessToken> {
        let issued_at = Utc::now();
        let claims = account.claims(&self.scope, &self.token_url, issued_at.timestamp(), self.ttl);
        let assertion = account.sign(&claims)?;

        let response = self
            .http
            .post(&self.token_url)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProxyError::TokenExchange {
                status: status.as_u16(),
                message,
            });
        }

        let body: TokenResponse = response.json().await?;
        let value = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ProxyError::MalformedResponse("token response has no access_token".to_string())
            })?;
        let lifetime = body.expires_in.unwrap_or(self.ttl as i64);

        Ok(AccessToken {
            value,
            expires_at: issued_at + Duration::seconds(lifetime),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use openssl::rsa::Rsa;
    use openssl::sign::Verifier;

    pub(crate) fn test_key_pem() -> String {
        let rsa = Rsa::generate(2048).expect("generate RSA key");
        let pkey = PKey::from_rsa(rsa).expect("build pkey");
        String::from_utf8(pkey.private_key_to_pem_pkcs8().expect("pem")).expect("utf8 pem")
    }

    fn decode_segment(segment: &str) -> Vec<u8> {
        URL_SAFE_NO_PAD.decode(segment).expect("base64url segment")
    }

    #[test]
    fn malformed_pem_fails_before_any_request() {
        let err = ServiceAccount::from_pem("svc@example.iam.gserviceaccount.com", "not a key")
            .unwrap_err();
        assert!(matches!(err, ProxyError::InvalidKey(_)));

        let err = ServiceAccount::from_pem("", &test_key_pem()).unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));
    }

    #[test]
    fn escaped_newlines_are_accepted() {
        let pem = test_key_pem().replace('\n', "\\n");
        let quoted = format!("\"{}\"", pem);
        assert!(ServiceAccount::from_pem("svc@example.com", &quoted).is_ok());
    }

    #[test]
    fn assertion_is_a_verifiable_rs256_jwt() {
        let pem = test_key_pem();
        let account = ServiceAccount::from_pem("svc@example.com", &pem).unwrap();
        let claims = account.claims(SPREADSHEETS_SCOPE, DEFAULT_TOKEN_URL, 1_700_000_000, 3300);
        assert_eq!(claims.exp - claims.iat, 3300);

        let jwt = account.sign(&claims).unwrap();
        let parts: Vec<&str> = jwt.split('.').collect();
        assert_eq!(parts.len(), 3);
        assert!(!jwt.contains('='));

        let header: serde_json::Value = serde_json::from_slice(&decode_segment(parts[0])).unwrap();
        assert_eq!(header["alg"], "RS256");
        assert_eq!(header["typ"], "JWT");

        let decoded: Claims = serde_json::from_slice(&decode_segment(parts[1])).unwrap();
        assert_eq!(decoded, claims);
        assert_eq!(decoded.iss, "svc@example.com");

        let key = PKey::private_key_from_pem(pem.as_bytes()).unwrap();
        let mut verifier = Verifier::new(MessageDigest::sha256(), &key).unwrap();
        verifier
            .update(format!("{}.{}", parts[0], parts[1]).as_bytes())
            .unwrap();
        assert!(verifier.verify(&decode_segment(parts[2])).unwrap());
    }

    #[test]
    fn token_freshness_respects_the_refresh_margin() {
        let now = Utc::now();
        let token = AccessToken {
            value: "t".into(),
            expires_at: now + Duration::seconds(3600),
        };
        assert!(token.is_fresh(now));
        assert!(!token.is_fresh(now + Duration::seconds(3301)));
    }

    #[tokio::test]
    async fn api_keys_authorize_without_a_token_exchange() {
        let auth = Authenticator::new(Client::new(), Credentials::ApiKey("k-123".into()))
            .with_token_url("http://127.0.0.1:9/never-called");
        assert!(auth.is_read_only());
        assert_eq!(
            auth.authorize().await.unwrap(),
            Authorization::ApiKey("k-123".into())
        );
    }
}
