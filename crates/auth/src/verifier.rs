//! Signature and claim verification of provider-issued tokens.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Validation, decode, decode_header};

use crate::claims::{ClaimPolicy, Claims, RawClaims, validate_claims};
use crate::error::AuthError;
use crate::key_cache::SigningKeyCache;
use crate::key_material::is_rsa_algorithm;

pub struct TokenVerifier {
    keys: Arc<SigningKeyCache>,
    policy: ClaimPolicy,
}

impl TokenVerifier {
    pub fn new(keys: Arc<SigningKeyCache>, policy: ClaimPolicy) -> Self {
        Self { keys, policy }
    }

    pub fn policy(&self) -> &ClaimPolicy {
        &self.policy
    }

    pub fn keys(&self) -> &Arc<SigningKeyCache> {
        &self.keys
    }

    /// Verify `token` and return its validated claims.
    ///
    /// The algorithm allow-list and `kid` presence are checked before any key
    /// lookup, so forged headers never trigger a key fetch.
    pub async fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let header = decode_header(token)
            .map_err(|e| AuthError::unauthenticated(format!("malformed token: {e}")))?;

        if !is_rsa_algorithm(header.alg) {
            return Err(AuthError::SignatureInvalid(format!(
                "algorithm {:?} not accepted",
                header.alg
            )));
        }

        let kid = header
            .kid
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| AuthError::unauthenticated("token header has no kid"))?;

        let key = self.keys.get_key(&kid).await?;

        if let Some(pinned) = key.algorithm() {
            if pinned != header.alg {
                return Err(AuthError::SignatureInvalid(format!(
                    "key {kid} is pinned to {pinned:?}, token uses {:?}",
                    header.alg
                )));
            }
        }

        let mut validation = Validation::new(header.alg);
        // Time and audience checks run in validate_claims against the injected clock.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<RawClaims>(token, key.decoding_key(), &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidRsaKey(_)
                | ErrorKind::InvalidKeyFormat => AuthError::SignatureInvalid(e.to_string()),
                _ => AuthError::unauthenticated(format!("undecodable token: {e}")),
            }
        })?;

        let claims = validate_claims(data.claims, &self.policy, now)?;
        tracing::debug!(
            kid = %kid,
            token_use = claims.token_use().as_str(),
            "token verified"
        );
        Ok(claims)
    }
}
