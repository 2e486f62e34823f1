// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Token validation (local and remote) and match-token minting.
//!
//! Local validation verifies the JWT signature against configured key
//! material (HS256 shared secret or Ed25519 public key PEM). Remote
//! validation posts the opaque token to the auth service's introspection
//! endpoint and trusts its answer; network failures surface as
//! `Unavailable`, never as a silent accept.

use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use arena_proto::ClusterMatchId;

use crate::error::AuthError;
use crate::principal::{Claims, Principal};

/// Key material for local validation.
pub enum KeyMaterial {
    /// HS256 shared secret.
    HmacSecret(Vec<u8>),
    /// Ed25519 public key in PEM form.
    Ed25519Pem(Vec<u8>),
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key bytes stay out of logs.
        match self {
            Self::HmacSecret(_) => f.write_str("KeyMaterial::HmacSecret(..)"),
            Self::Ed25519Pem(_) => f.write_str("KeyMaterial::Ed25519Pem(..)"),
        }
    }
}

/// How tokens are validated.
#[derive(Debug)]
pub enum ValidationMode {
    /// Verify signatures in-process.
    Local(KeyMaterial),
    /// Ask the auth service.
    Remote {
        /// Introspection endpoint URL.
        url: String,
        /// Per-call timeout.
        timeout: Duration,
    },
}

#[derive(Debug, Serialize)]
struct IntrospectRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct IntrospectResponse {
    active: bool,
    #[serde(flatten)]
    claims: Option<Claims>,
}

enum Inner {
    Local {
        key: DecodingKey,
        validation: Validation,
    },
    Remote {
        client: reqwest::Client,
        url: String,
        timeout: Duration,
    },
}

/// Validates opaque bearer tokens into [`Principal`]s.
pub struct TokenValidator {
    inner: Inner,
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match &self.inner {
            Inner::Local { .. } => "local",
            Inner::Remote { .. } => "remote",
        };
        f.debug_struct("TokenValidator").field("mode", &mode).finish()
    }
}

impl TokenValidator {
    /// Builds a validator for the given mode.
    pub fn new(mode: ValidationMode) -> Result<Self, AuthError> {
        let inner = match mode {
            ValidationMode::Local(material) => {
                let (key, algorithm) = match material {
                    KeyMaterial::HmacSecret(secret) => {
                        (DecodingKey::from_secret(&secret), Algorithm::HS256)
                    }
                    KeyMaterial::Ed25519Pem(pem) => (
                        DecodingKey::from_ed_pem(&pem)
                            .map_err(|e| AuthError::InvalidToken(format!("bad key pem: {e}")))?,
                        Algorithm::EdDSA,
                    ),
                };
                let mut validation = Validation::new(algorithm);
                validation.set_required_spec_claims(&["exp"]);
                Inner::Local { key, validation }
            }
            ValidationMode::Remote { url, timeout } => Inner::Remote {
                client: reqwest::Client::new(),
                url,
                timeout,
            },
        };
        Ok(Self { inner })
    }

    /// Validates a token, returning the principal it proves.
    pub async fn validate(&self, token: &str) -> Result<Principal, AuthError> {
        match &self.inner {
            Inner::Local { key, validation } => {
                let data = decode::<Claims>(token, key, validation)
                    .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
                Principal::from_claims(data.claims)
            }
            Inner::Remote {
                client,
                url,
                timeout,
            } => {
                let response = client
                    .post(url)
                    .timeout(*timeout)
                    .json(&IntrospectRequest { token })
                    .send()
                    .await
                    .map_err(|e| AuthError::RemoteUnavailable(e.to_string()))?
                    .error_for_status()
                    .map_err(|e| AuthError::RemoteUnavailable(e.to_string()))?
                    .json::<IntrospectResponse>()
                    .await
                    .map_err(|e| AuthError::RemoteUnavailable(e.to_string()))?;
                if !response.active {
                    return Err(AuthError::InvalidToken("token is not active".into()));
                }
                let claims = response
                    .claims
                    .ok_or_else(|| AuthError::InvalidToken("introspection omitted claims".into()))?;
                debug!(sub = %claims.sub, "token introspected remotely");
                Principal::from_claims(claims)
            }
        }
    }
}

/// Signing key for minted tokens.
pub enum SigningMaterial {
    /// HS256 shared secret.
    HmacSecret(Vec<u8>),
    /// Ed25519 private key in PEM form.
    Ed25519Pem(Vec<u8>),
}

/// Mints short-lived match tokens (control plane only).
pub struct TokenMinter {
    key: EncodingKey,
    algorithm: Algorithm,
    ttl: Duration,
}

impl std::fmt::Debug for TokenMinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenMinter")
            .field("algorithm", &self.algorithm)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenMinter {
    /// Builds a minter with the given signing material and token TTL.
    pub fn new(material: SigningMaterial, ttl: Duration) -> Result<Self, AuthError> {
        let (key, algorithm) = match material {
            SigningMaterial::HmacSecret(secret) => {
                (EncodingKey::from_secret(&secret), Algorithm::HS256)
            }
            SigningMaterial::Ed25519Pem(pem) => (
                EncodingKey::from_ed_pem(&pem)
                    .map_err(|e| AuthError::InvalidToken(format!("bad signing pem: {e}")))?,
                Algorithm::EdDSA,
            ),
        };
        Ok(Self {
            key,
            algorithm,
            ttl,
        })
    }

    /// Mints a match token bound to `(match_id, player_id)`.
    ///
    /// Returns the encoded token and its expiry in unix milliseconds.
    pub fn mint_match_token(
        &self,
        subject: &str,
        match_id: &ClusterMatchId,
        player_id: &str,
        now_unix_secs: u64,
    ) -> Result<(String, u64), AuthError> {
        let exp = now_unix_secs + self.ttl.as_secs();
        let claims = Claims {
            sub: subject.to_owned(),
            exp,
            scopes: vec![crate::scopes::STREAMS.to_owned()],
            jti: None,
            match_id: Some(match_id.to_string()),
            player_id: Some(player_id.to_owned()),
        };
        let token = encode(&Header::new(self.algorithm), &claims, &self.key)
            .map_err(|e| AuthError::InvalidToken(format!("mint failed: {e}")))?;
        Ok((token, exp * 1000))
    }
}
