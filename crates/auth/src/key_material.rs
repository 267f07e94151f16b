//! Reconstruction of verifiable RSA public keys from JWK descriptors.
//!
//! Pure functions: no IO, no logging. The signing-key cache decides what to do
//! with a rejected descriptor.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey};
use thiserror::Error;

use crate::jwks::JwkDescriptor;

/// Smallest accepted RSA modulus.
pub const MIN_RSA_MODULUS_BITS: usize = 2048;

/// Accepted public exponent range (inclusive).
pub const MIN_RSA_EXPONENT: u64 = 3;
pub const MAX_RSA_EXPONENT: u64 = 65537;

/// Signature algorithms a reconstructed key may be used with.
pub const RSA_ALGORITHMS: [Algorithm; 6] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];

pub fn is_rsa_algorithm(alg: Algorithm) -> bool {
    RSA_ALGORITHMS.contains(&alg)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyMaterialError {
    #[error("key has no kid")]
    MissingKeyId,

    #[error("unsupported key type '{0}'")]
    UnsupportedKeyType(String),

    #[error("key use '{0}' is not 'sig'")]
    NotASigningKey(String),

    #[error("unsupported algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("missing {0}")]
    MissingComponent(&'static str),

    #[error("{0} is not valid base64url")]
    Encoding(&'static str),

    #[error("modulus is {bits} bits, at least {MIN_RSA_MODULUS_BITS} required")]
    WeakModulus { bits: usize },

    #[error("exponent {0} is not an odd value in {MIN_RSA_EXPONENT}..={MAX_RSA_EXPONENT}")]
    InvalidExponent(String),
}

/// A verified-usable RSA public key.
#[derive(Clone)]
pub struct PublicKey {
    kid: String,
    algorithm: Option<Algorithm>,
    modulus_bits: usize,
    exponent: u64,
    decoding_key: DecodingKey,
}

impl PublicKey {
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Algorithm pinned by the descriptor, if it declared one.
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    pub fn modulus_bits(&self) -> usize {
        self.modulus_bits
    }

    pub fn exponent(&self) -> u64 {
        self.exponent
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl core::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PublicKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("modulus_bits", &self.modulus_bits)
            .field("exponent", &self.exponent)
            .finish_non_exhaustive()
    }
}

/// Turn a wire-format descriptor into a [`PublicKey`], or explain why not.
pub fn reconstruct(descriptor: &JwkDescriptor) -> Result<PublicKey, KeyMaterialError> {
    let kid = descriptor
        .kid
        .as_deref()
        .filter(|k| !k.is_empty())
        .ok_or(KeyMaterialError::MissingKeyId)?;

    if descriptor.kty != "RSA" {
        return Err(KeyMaterialError::UnsupportedKeyType(descriptor.kty.clone()));
    }

    if let Some(key_use) = descriptor.key_use.as_deref() {
        if key_use != "sig" {
            return Err(KeyMaterialError::NotASigningKey(key_use.to_string()));
        }
    }

    let algorithm = match descriptor.alg.as_deref() {
        None => None,
        Some(alg) => Some(parse_rsa_algorithm(alg)?),
    };

    let n = descriptor
        .n
        .as_deref()
        .ok_or(KeyMaterialError::MissingComponent("modulus"))?;
    let e = descriptor
        .e
        .as_deref()
        .ok_or(KeyMaterialError::MissingComponent("exponent"))?;

    rsa_public_key(kid, n, e, algorithm)
}

/// Build a key from base64url modulus/exponent components.
pub fn rsa_public_key(
    kid: &str,
    n: &str,
    e: &str,
    algorithm: Option<Algorithm>,
) -> Result<PublicKey, KeyMaterialError> {
    let modulus = decode_component(n, "modulus")?;
    let exponent = decode_component(e, "exponent")?;

    let modulus = strip_leading_zeros(&modulus);
    let modulus_bits = bit_length(modulus);
    if modulus_bits < MIN_RSA_MODULUS_BITS {
        return Err(KeyMaterialError::WeakModulus { bits: modulus_bits });
    }

    let exponent = strip_leading_zeros(&exponent);
    let exponent_value = exponent_value(exponent)?;

    Ok(PublicKey {
        kid: kid.to_string(),
        algorithm,
        modulus_bits,
        exponent: exponent_value,
        decoding_key: DecodingKey::from_rsa_raw_components(modulus, exponent),
    })
}

fn parse_rsa_algorithm(alg: &str) -> Result<Algorithm, KeyMaterialError> {
    alg.parse::<Algorithm>()
        .ok()
        .filter(|a| is_rsa_algorithm(*a))
        .ok_or_else(|| KeyMaterialError::UnsupportedAlgorithm(alg.to_string()))
}

fn decode_component(value: &str, component: &'static str) -> Result<Vec<u8>, KeyMaterialError> {
    // Some providers pad their base64url; the unpadded engine rejects '='.
    let trimmed = value.trim_end_matches('=');
    if trimmed.is_empty() {
        return Err(KeyMaterialError::MissingComponent(component));
    }
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .map_err(|_| KeyMaterialError::Encoding(component))
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

/// Bit length of a big-endian unsigned integer without leading zero bytes.
fn bit_length(bytes: &[u8]) -> usize {
    match bytes.first() {
        Some(top) => (bytes.len() - 1) * 8 + (8 - top.leading_zeros() as usize),
        None => 0,
    }
}

fn exponent_value(bytes: &[u8]) -> Result<u64, KeyMaterialError> {
    if bytes.len() > 8 {
        return Err(KeyMaterialError::InvalidExponent(format!(
            "of {} bytes",
            bytes.len()
        )));
    }
    let value = bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    if !(MIN_RSA_EXPONENT..=MAX_RSA_EXPONENT).contains(&value) || value % 2 == 0 {
        return Err(KeyMaterialError::InvalidExponent(value.to_string()));
    }
    Ok(value)
}
