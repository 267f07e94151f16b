use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Claims exactly as decoded from a signature-verified token, before any
/// semantic checks. Every field is optional so that a missing claim becomes a
/// [`AuthError::ClaimInvalid`] instead of a decode failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<Audience>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default, alias = "purpose")]
    pub token_use: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub nbf: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    /// Space-separated OAuth scopes (access tokens).
    #[serde(default)]
    pub scope: Option<String>,
}

/// `aud` may be a single string or an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::One(aud) => aud == value,
            Self::Many(auds) => auds.iter().any(|a| a == value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenUse {
    Id,
    Access,
}

impl TokenUse {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Access => "access",
        }
    }
}

/// Deployment-level expectations every token must meet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimPolicy {
    pub issuer: String,
    pub client_id: String,
}

/// Fields shared by both token purposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommonClaims {
    pub subject: String,
    pub issuer: String,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub expires_at: DateTime<Utc>,
    pub not_before: Option<DateTime<Utc>>,
    pub issued_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdTokenClaims {
    #[serde(flatten)]
    pub common: CommonClaims,
    pub audience: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessTokenClaims {
    #[serde(flatten)]
    pub common: CommonClaims,
    pub client_id: Option<String>,
    pub scopes: Vec<String>,
}

/// Validated claims, tagged by token purpose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "token_use", rename_all = "snake_case")]
pub enum Claims {
    Id(IdTokenClaims),
    Access(AccessTokenClaims),
}

impl Claims {
    pub fn common(&self) -> &CommonClaims {
        match self {
            Self::Id(c) => &c.common,
            Self::Access(c) => &c.common,
        }
    }

    pub fn subject(&self) -> &str {
        &self.common().subject
    }

    pub fn issuer(&self) -> &str {
        &self.common().issuer
    }

    pub fn email(&self) -> Option<&str> {
        self.common().email.as_deref()
    }

    /// `false` only when the provider explicitly says the email is unverified.
    pub fn email_trusted(&self) -> bool {
        self.common().email_verified != Some(false)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.common().expires_at
    }

    pub fn token_use(&self) -> TokenUse {
        match self {
            Self::Id(_) => TokenUse::Id,
            Self::Access(_) => TokenUse::Access,
        }
    }
}

/// Deterministically validate decoded claims against `policy` at `now`.
///
/// Signature verification happens before this; this only checks semantics.
pub fn validate_claims(
    raw: RawClaims,
    policy: &ClaimPolicy,
    now: DateTime<Utc>,
) -> Result<Claims, AuthError> {
    let issuer = raw
        .iss
        .filter(|iss| *iss == policy.issuer)
        .ok_or_else(|| AuthError::claim("issuer mismatch"))?;

    let token_use = match raw.token_use.as_deref() {
        Some("id") => TokenUse::Id,
        Some("access") => TokenUse::Access,
        Some(other) => return Err(AuthError::claim(format!("unknown token_use '{other}'"))),
        None => return Err(AuthError::claim("missing token_use")),
    };

    let audience = match token_use {
        TokenUse::Id => {
            let matches = raw
                .aud
                .as_ref()
                .is_some_and(|aud| aud.contains(&policy.client_id));
            if !matches {
                return Err(AuthError::claim("audience mismatch"));
            }
            Some(policy.client_id.clone())
        }
        TokenUse::Access => None,
    };

    let expires_at = raw
        .exp
        .ok_or_else(|| AuthError::claim("missing exp"))
        .and_then(|exp| timestamp(exp, "exp"))?;
    if expires_at <= now {
        return Err(AuthError::Expired);
    }

    let not_before = raw.nbf.map(|nbf| timestamp(nbf, "nbf")).transpose()?;
    if let Some(nbf) = not_before {
        if now < nbf {
            return Err(AuthError::claim("token not yet valid"));
        }
    }

    let issued_at = raw.iat.map(|iat| timestamp(iat, "iat")).transpose()?;

    let subject = raw
        .sub
        .filter(|sub| !sub.trim().is_empty())
        .ok_or_else(|| AuthError::claim("missing subject"))?;

    let common = CommonClaims {
        subject,
        issuer,
        email: raw.email.filter(|e| !e.is_empty()),
        email_verified: raw.email_verified,
        expires_at,
        not_before,
        issued_at,
    };

    Ok(match (token_use, audience) {
        (TokenUse::Id, Some(audience)) => Claims::Id(IdTokenClaims { common, audience }),
        _ => Claims::Access(AccessTokenClaims {
            common,
            client_id: raw.client_id,
            scopes: raw
                .scope
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        }),
    })
}

fn timestamp(secs: i64, claim: &str) -> Result<DateTime<Utc>, AuthError> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| AuthError::claim(format!("{claim} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn policy() -> ClaimPolicy {
        ClaimPolicy {
            issuer: "https://idp.test/pool".into(),
            client_id: "web".into(),
        }
    }

    fn id_raw(now: DateTime<Utc>) -> RawClaims {
        RawClaims {
            sub: Some("sub-1".into()),
            iss: Some("https://idp.test/pool".into()),
            aud: Some(Audience::One("web".into())),
            token_use: Some("id".into()),
            exp: Some((now + Duration::minutes(5)).timestamp()),
            email: Some("a@example.com".into()),
            ..Default::default()
        }
    }

    #[test]
    fn valid_id_token() {
        let now = Utc::now();
        let claims = validate_claims(id_raw(now), &policy(), now).unwrap();
        assert_eq!(claims.token_use(), TokenUse::Id);
        assert_eq!(claims.subject(), "sub-1");
        assert_eq!(claims.email(), Some("a@example.com"));
    }

    #[test]
    fn access_tokens_skip_audience() {
        let now = Utc::now();
        let mut raw = id_raw(now);
        raw.token_use = Some("access".into());
        raw.aud = None;
        raw.client_id = Some("web".into());
        raw.scope = Some("openid profile".into());
        match validate_claims(raw, &policy(), now).unwrap() {
            Claims::Access(access) => assert_eq!(access.scopes, vec!["openid", "profile"]),
            other => panic!("expected access claims, got {other:?}"),
        }
    }

    #[test]
    fn purpose_is_accepted_as_an_alias() {
        let raw: RawClaims = serde_json::from_str(r#"{"purpose":"access"}"#).unwrap();
        assert_eq!(raw.token_use.as_deref(), Some("access"));
    }

    #[test]
    fn audience_may_be_an_array() {
        let now = Utc::now();
        let mut raw = id_raw(now);
        raw.aud = Some(Audience::Many(vec!["other".into(), "web".into()]));
        assert!(validate_claims(raw, &policy(), now).is_ok());
    }

    #[test]
    fn wrong_issuer_audience_or_purpose_is_claim_invalid() {
        let now = Utc::now();

        let mut raw = id_raw(now);
        raw.iss = Some("https://evil.test".into());
        assert!(matches!(validate_claims(raw, &policy(), now), Err(AuthError::ClaimInvalid(_))));

        let mut raw = id_raw(now);
        raw.aud = Some(Audience::One("someone-else".into()));
        assert!(matches!(validate_claims(raw, &policy(), now), Err(AuthError::ClaimInvalid(_))));

        let mut raw = id_raw(now);
        raw.token_use = Some("refresh".into());
        assert!(matches!(validate_claims(raw, &policy(), now), Err(AuthError::ClaimInvalid(_))));
    }

    #[test]
    fn expiry_is_exclusive() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut raw = id_raw(now);
        raw.exp = Some(now.timestamp());
        assert_eq!(validate_claims(raw, &policy(), now), Err(AuthError::Expired));
    }

    #[test]
    fn not_before_in_the_future_is_rejected() {
        let now = Utc::now();
        let mut raw = id_raw(now);
        raw.nbf = Some((now + Duration::minutes(1)).timestamp());
        assert!(matches!(validate_claims(raw, &policy(), now), Err(AuthError::ClaimInvalid(_))));
    }

    #[test]
    fn blank_subject_is_rejected() {
        let now = Utc::now();
        let mut raw = id_raw(now);
        raw.sub = Some("  ".into());
        assert!(matches!(validate_claims(raw, &policy(), now), Err(AuthError::ClaimInvalid(_))));
    }

    #[test]
    fn unverified_email_is_not_trusted() {
        let now = Utc::now();
        let mut raw = id_raw(now);
        raw.email_verified = Some(false);
        let claims = validate_claims(raw, &policy(), now).unwrap();
        assert!(!claims.email_trusted());
    }

    proptest! {
        #[test]
        fn any_past_expiry_is_expired(age in 0i64..10_000_000) {
            let now = DateTime::from_timestamp(1_800_000_000, 0).unwrap();
            let mut raw = id_raw(now);
            raw.exp = Some(now.timestamp() - age);
            prop_assert_eq!(validate_claims(raw, &policy(), now), Err(AuthError::Expired));
        }
    }
}
