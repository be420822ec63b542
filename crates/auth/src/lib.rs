//! Signed identity assertions.
//!
//! Compact HS256 tokens in the JWT shape: the routing pipeline mints one per
//! resolved identity and forwards it to the conversational backend, which
//! verifies it with the shared secret. No third-party claims are accepted,
//! so the full JOSE surface stays out of scope.

use {
    base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine},
    hmac::{Hmac, Mac},
    serde::{de::DeserializeOwned, Deserialize, Serialize},
    sha2::Sha256,
};

use hermod_common::unix_now;

type HmacSha256 = Hmac<Sha256>;

/// Default lifetime of a minted assertion.
pub const DEFAULT_ASSERTION_TTL_SECS: i64 = 300;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("signing secret is required")]
    MissingSecret,

    #[error("assertion claim is missing: {field}")]
    MissingClaim { field: &'static str },

    #[error("assertion ttl must be positive")]
    InvalidTtl,

    #[error("malformed assertion")]
    Malformed,

    #[error("assertion signature mismatch")]
    SignatureMismatch,

    #[error("assertion expired")]
    Expired,
}

/// A minted token plus its expiry, so callers can cache until then.
#[derive(Debug, Clone)]
pub struct Assertion {
    pub token: String,
    pub expires_at: i64,
}

/// Claims asserting a resolved user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    pub sub: String,
    pub user_id: String,
    pub iat: i64,
    pub exp: i64,
}

/// Claims asserting a channel session's resolved identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Always `"channel_session"`.
    pub typ: String,
    pub bot_id: String,
    pub platform: String,
    pub reply_target: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Identity of one channel session, as input to [`mint_session_assertion`].
#[derive(Debug, Clone, Default)]
pub struct SessionIdentity {
    pub bot_id: String,
    pub platform: String,
    pub reply_target: String,
    pub session_id: String,
    pub contact_id: Option<String>,
}

/// Mint an assertion for a resolved user account.
pub fn mint_user_assertion(secret: &str, user_id: &str, ttl_secs: i64) -> Result<Assertion> {
    let user_id = require(user_id, "user_id")?;
    let (iat, exp) = lifetime(ttl_secs)?;
    let claims = UserClaims {
        sub: user_id.to_string(),
        user_id: user_id.to_string(),
        iat,
        exp,
    };
    Ok(Assertion {
        token: sign(secret, &claims)?,
        expires_at: exp,
    })
}

/// Mint an assertion naming a channel session and the contact resolved
/// for it.
pub fn mint_session_assertion(
    secret: &str,
    identity: &SessionIdentity,
    ttl_secs: i64,
) -> Result<Assertion> {
    let (iat, exp) = lifetime(ttl_secs)?;
    let claims = SessionClaims {
        typ: "channel_session".to_string(),
        bot_id: require(&identity.bot_id, "bot_id")?.to_string(),
        platform: require(&identity.platform, "platform")?.to_string(),
        reply_target: require(&identity.reply_target, "reply_target")?.to_string(),
        session_id: require(&identity.session_id, "session_id")?.to_string(),
        contact_id: identity.contact_id.clone(),
        iat,
        exp,
    };
    Ok(Assertion {
        token: sign(secret, &claims)?,
        expires_at: exp,
    })
}

/// Verify a token's signature and expiry and decode its claims.
pub fn verify<T: DeserializeOwned>(secret: &str, token: &str) -> Result<T> {
    let mut parts = token.split('.');
    let (header, claims, signature) = match (parts.next(), parts.next(), parts.next(), parts.next())
    {
        (Some(h), Some(c), Some(s), None) => (h, c, s),
        _ => return Err(Error::Malformed),
    };

    let mut mac = keyed_mac(secret)?;
    mac.update(format!("{header}.{claims}").as_bytes());
    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| Error::Malformed)?;
    mac.verify_slice(&signature)
        .map_err(|_| Error::SignatureMismatch)?;

    let claims = URL_SAFE_NO_PAD
        .decode(claims)
        .map_err(|_| Error::Malformed)?;
    let decoded: serde_json::Value =
        serde_json::from_slice(&claims).map_err(|_| Error::Malformed)?;
    if let Some(exp) = decoded.get("exp").and_then(serde_json::Value::as_i64) {
        if unix_now() >= exp {
            return Err(Error::Expired);
        }
    }
    serde_json::from_value(decoded).map_err(|_| Error::Malformed)
}

fn sign<T: Serialize>(secret: &str, claims: &T) -> Result<String> {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = serde_json::to_vec(claims).map_err(|_| Error::Malformed)?;
    let body = URL_SAFE_NO_PAD.encode(body);
    let mut mac = keyed_mac(secret)?;
    mac.update(format!("{header}.{body}").as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    Ok(format!("{header}.{body}.{signature}"))
}

fn keyed_mac(secret: &str) -> Result<HmacSha256> {
    if secret.trim().is_empty() {
        return Err(Error::MissingSecret);
    }
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| Error::MissingSecret)
}

fn lifetime(ttl_secs: i64) -> Result<(i64, i64)> {
    if ttl_secs <= 0 {
        return Err(Error::InvalidTtl);
    }
    let iat = unix_now();
    Ok((iat, iat + ttl_secs))
}

fn require<'a>(value: &'a str, field: &'static str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::MissingClaim { field });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn identity() -> SessionIdentity {
        SessionIdentity {
            bot_id: "bot-1".into(),
            platform: "telegram".into(),
            reply_target: "c1".into(),
            session_id: "telegram:bot-1:c1".into(),
            contact_id: Some("contact-1".into()),
        }
    }

    #[test]
    fn session_assertion_round_trips() {
        let assertion = mint_session_assertion(SECRET, &identity(), 60).unwrap();
        let claims: SessionClaims = verify(SECRET, &assertion.token).unwrap();
        assert_eq!(claims.typ, "channel_session");
        assert_eq!(claims.bot_id, "bot-1");
        assert_eq!(claims.session_id, "telegram:bot-1:c1");
        assert_eq!(claims.contact_id.as_deref(), Some("contact-1"));
        assert_eq!(claims.exp, assertion.expires_at);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn user_assertion_round_trips() {
        let assertion = mint_user_assertion(SECRET, "u1", 60).unwrap();
        let claims: UserClaims = verify(SECRET, &assertion.token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.user_id, "u1");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let assertion = mint_user_assertion(SECRET, "u1", 60).unwrap();
        let err = verify::<UserClaims>("other-secret", &assertion.token).unwrap_err();
        assert!(matches!(err, Error::SignatureMismatch));
    }

    #[test]
    fn tampered_claims_are_rejected() {
        let assertion = mint_user_assertion(SECRET, "u1", 60).unwrap();
        let mut parts: Vec<&str> = assertion.token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"sub":"u2","user_id":"u2","iat":0,"exp":9999999999}"#);
        parts[1] = &forged;
        let token = parts.join(".");
        let err = verify::<UserClaims>(SECRET, &token).unwrap_err();
        assert!(matches!(err, Error::SignatureMismatch));
    }

    #[test]
    fn expired_assertions_are_rejected() {
        // Sign directly with an exp in the past; minting forbids it.
        let claims = UserClaims {
            sub: "u1".into(),
            user_id: "u1".into(),
            iat: 0,
            exp: 1,
        };
        let token = sign(SECRET, &claims).unwrap();
        let err = verify::<UserClaims>(SECRET, &token).unwrap_err();
        assert!(matches!(err, Error::Expired));
    }

    #[test]
    fn validation_catches_blank_inputs() {
        assert!(matches!(
            mint_user_assertion("", "u1", 60),
            Err(Error::MissingSecret)
        ));
        assert!(matches!(
            mint_user_assertion(SECRET, "  ", 60),
            Err(Error::MissingClaim { field: "user_id" })
        ));
        assert!(matches!(
            mint_user_assertion(SECRET, "u1", 0),
            Err(Error::InvalidTtl)
        ));
        let mut incomplete = identity();
        incomplete.reply_target = String::new();
        assert!(matches!(
            mint_session_assertion(SECRET, &incomplete, 60),
            Err(Error::MissingClaim {
                field: "reply_target"
            })
        ));
    }
}
