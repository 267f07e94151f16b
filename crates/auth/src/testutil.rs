//! Test helpers: RSA signers, a scriptable key source, and fault-injecting stores.
//!
//! Feature-gated behind `testutil` so none of this reaches production builds.
//!
//! ```toml
//! [dev-dependencies]
//! crewdesk-auth = { path = "../auth", features = ["testutil"] }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::RsaPrivateKey;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use serde_json::{Value, json};

use crewdesk_core::UserId;

use crate::authorize::PermissionStore;
use crate::error::StoreError;
use crate::jwks::{JwkDescriptor, JwkSet, KeySource, KeySourceError};
use crate::permissions::{PermissionGrant, PermissionKey, Scope};
use crate::principal::{UserRecord, UserStore};
use crate::roles::Role;

pub const TEST_ISSUER: &str = "https://idp.test/pool-1";
pub const TEST_CLIENT_ID: &str = "crewdesk-web";

// ─────────────────────────────────────────────────────────────────────────────
// Signers
// ─────────────────────────────────────────────────────────────────────────────

/// Key generation is slow in debug builds; most tests only need *a* key.
fn shared_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("rsa keygen"))
}

/// An RSA private key plus the `kid` it is published under.
#[derive(Clone)]
pub struct TestSigner {
    kid: String,
    key: RsaPrivateKey,
}

impl TestSigner {
    /// Signer backed by a process-wide shared key.
    pub fn generate(kid: &str) -> Self {
        Self {
            kid: kid.to_string(),
            key: shared_key().clone(),
        }
    }

    /// Signer with its own freshly generated key.
    pub fn generate_distinct(kid: &str) -> Self {
        Self {
            kid: kid.to_string(),
            key: RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("rsa keygen"),
        }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Public half as published on the key endpoint.
    pub fn jwk(&self) -> JwkDescriptor {
        JwkDescriptor {
            kty: "RSA".into(),
            kid: Some(self.kid.clone()),
            key_use: Some("sig".into()),
            alg: Some("RS256".into()),
            n: Some(URL_SAFE_NO_PAD.encode(self.key.n().to_bytes_be())),
            e: Some(URL_SAFE_NO_PAD.encode(self.key.e().to_bytes_be())),
        }
    }

    pub fn jwk_set(signers: &[&TestSigner]) -> JwkSet {
        JwkSet {
            keys: signers.iter().map(|s| s.jwk()).collect(),
        }
    }

    /// RS256 token with this signer's `kid`.
    pub fn sign(&self, claims: &Value) -> String {
        self.sign_with(Algorithm::RS256, Some(&self.kid), claims)
    }

    pub fn sign_with(&self, alg: Algorithm, kid: Option<&str>, claims: &Value) -> String {
        let mut header = Header::new(alg);
        header.kid = kid.map(str::to_string);
        let pem = self.key.to_pkcs1_pem(Default::default()).expect("pem");
        let key = EncodingKey::from_rsa_pem(pem.as_bytes()).expect("encoding key");
        jsonwebtoken::encode(&header, claims, &key).expect("encode jwt")
    }
}

/// Assemble a token from raw parts, for algorithm-confusion and tamper tests.
pub fn raw_token(header: &Value, claims: &Value, signature: &[u8]) -> String {
    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string()),
        URL_SAFE_NO_PAD.encode(signature)
    )
}

/// Flip one bit of the decoded signature, keeping the encoding valid.
pub fn tamper_signature(token: &str) -> String {
    let (signed, signature) = token.rsplit_once('.').expect("three segments");
    let mut bytes = URL_SAFE_NO_PAD.decode(signature).expect("signature base64");
    bytes[0] ^= 0x01;
    format!("{signed}.{}", URL_SAFE_NO_PAD.encode(bytes))
}

pub fn id_token_claims(sub: &str, email: Option<&str>, expires_at: DateTime<Utc>) -> Value {
    let mut claims = json!({
        "sub": sub,
        "iss": TEST_ISSUER,
        "aud": TEST_CLIENT_ID,
        "token_use": "id",
        "iat": expires_at.timestamp() - 3600,
        "exp": expires_at.timestamp(),
    });
    if let Some(email) = email {
        claims["email"] = json!(email);
    }
    claims
}

pub fn access_token_claims(sub: &str, expires_at: DateTime<Utc>) -> Value {
    json!({
        "sub": sub,
        "iss": TEST_ISSUER,
        "client_id": TEST_CLIENT_ID,
        "token_use": "access",
        "scope": "openid profile",
        "exp": expires_at.timestamp(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Key source
// ─────────────────────────────────────────────────────────────────────────────

/// In-process key source that counts fetches and can be made to fail or stall.
#[derive(Debug)]
pub struct FakeKeySource {
    response: Mutex<Result<JwkSet, KeySourceError>>,
    delay: Option<Duration>,
    fetches: AtomicU64,
}

impl FakeKeySource {
    pub fn serving(keys: Vec<JwkDescriptor>) -> Self {
        Self {
            response: Mutex::new(Ok(JwkSet { keys })),
            delay: None,
            fetches: AtomicU64::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn serve(&self, keys: Vec<JwkDescriptor>) {
        *self.response.lock().expect("fake source lock") = Ok(JwkSet { keys });
    }

    pub fn fail_with(&self, err: KeySourceError) {
        *self.response.lock().expect("fake source lock") = Err(err);
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySource for FakeKeySource {
    async fn fetch(&self) -> Result<JwkSet, KeySourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.response.lock().expect("fake source lock").clone()
    }

    fn describe(&self) -> String {
        "fake key source".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stores
// ─────────────────────────────────────────────────────────────────────────────

pub fn user(email: &str, subject: Option<&str>, role: Role) -> UserRecord {
    UserRecord {
        id: UserId::new(),
        external_subject: subject.map(str::to_string),
        email: email.to_string(),
        display_name: email.split('@').next().unwrap_or(email).to_string(),
        role,
        active: true,
    }
}

/// User store with switchable faults and call counters.
#[derive(Debug, Default)]
pub struct ScriptedUserStore {
    users: Mutex<HashMap<UserId, UserRecord>>,
    fail_lookups: Mutex<Option<StoreError>>,
    fail_rebind: Mutex<Option<StoreError>>,
    delay: Mutex<Option<Duration>>,
    rebind_delay: Mutex<Option<Duration>>,
    rebinds: AtomicU64,
}

impl ScriptedUserStore {
    pub fn with_users(users: impl IntoIterator<Item = UserRecord>) -> Self {
        let store = Self::default();
        {
            let mut map = store.users.lock().expect("users lock");
            for user in users {
                map.insert(user.id, user);
            }
        }
        store
    }

    pub fn fail_lookups(&self, err: StoreError) {
        *self.fail_lookups.lock().expect("lock") = Some(err);
    }

    pub fn fail_rebind(&self, err: StoreError) {
        *self.fail_rebind.lock().expect("lock") = Some(err);
    }

    pub fn stall_for(&self, delay: Duration) {
        *self.delay.lock().expect("lock") = Some(delay);
    }

    pub fn stall_rebind_for(&self, delay: Duration) {
        *self.rebind_delay.lock().expect("lock") = Some(delay);
    }

    pub fn rebinds(&self) -> u64 {
        self.rebinds.load(Ordering::SeqCst)
    }

    pub fn get(&self, id: UserId) -> Option<UserRecord> {
        self.users.lock().expect("users lock").get(&id).cloned()
    }

    async fn before_lookup(&self) -> Result<(), StoreError> {
        let delay = *self.delay.lock().expect("lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.fail_lookups.lock().expect("lock").clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl UserStore for ScriptedUserStore {
    async fn get_by_subject(&self, subject: &str) -> Result<Option<UserRecord>, StoreError> {
        self.before_lookup().await?;
        let users = self.users.lock().expect("users lock");
        Ok(users
            .values()
            .find(|u| u.external_subject.as_deref() == Some(subject))
            .cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        self.before_lookup().await?;
        let users = self.users.lock().expect("users lock");
        Ok(users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn rebind_subject(&self, user_id: UserId, subject: &str) -> Result<(), StoreError> {
        self.rebinds.fetch_add(1, Ordering::SeqCst);
        let delay = *self.rebind_delay.lock().expect("lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.fail_rebind.lock().expect("lock").clone() {
            return Err(err);
        }
        let mut users = self.users.lock().expect("users lock");
        if let Some(user) = users.get_mut(&user_id) {
            user.external_subject = Some(subject.to_string());
        }
        Ok(())
    }
}

/// Permission store backed by a fixed grant list.
#[derive(Debug, Default)]
pub struct StaticGrants {
    grants: Vec<PermissionGrant>,
    fail: Option<StoreError>,
    lookups: AtomicU64,
}

impl StaticGrants {
    pub fn new<'a>(grants: impl IntoIterator<Item = (Role, &'a str, Scope)>) -> Self {
        Self {
            grants: grants
                .into_iter()
                .map(|(role, key, scope)| PermissionGrant {
                    role,
                    key: key.parse().expect("permission key"),
                    scope,
                })
                .collect(),
            fail: None,
            lookups: AtomicU64::new(0),
        }
    }

    pub fn failing(err: StoreError) -> Self {
        Self {
            fail: Some(err),
            ..Self::default()
        }
    }

    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionStore for StaticGrants {
    async fn find_grant(
        &self,
        role: Role,
        key: &PermissionKey,
    ) -> Result<Option<PermissionGrant>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.fail {
            return Err(err.clone());
        }
        Ok(self
            .grants
            .iter()
            .find(|g| g.role == role && &g.key == key)
            .cloned())
    }
}

/// Convenience for building an `Arc<dyn KeySource>` from signers.
pub fn key_source_for(signers: &[&TestSigner]) -> Arc<FakeKeySource> {
    Arc::new(FakeKeySource::serving(
        signers.iter().map(|s| s.jwk()).collect(),
    ))
}
