use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use super::claims::{HandshakeClaims, Identity, SessionClaims, TokenKind};
use crate::config::JwtConfig;

/// Signing and verification keys plus the token lifetimes, built once from
/// [`JwtConfig`] at startup.
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    handshake_ttl: Duration,
    session_ttl: Duration,
    remember_me_ttl: Duration,
}

impl TokenKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            handshake_ttl: Duration::seconds(cfg.handshake_ttl_secs),
            session_ttl: Duration::seconds(cfg.session_ttl_secs),
            remember_me_ttl: Duration::seconds(cfg.remember_me_ttl_secs),
        }
    }

    pub fn handshake_ttl(&self) -> Duration {
        self.handshake_ttl
    }

    pub fn session_ttl_for(&self, remember_me: bool) -> Duration {
        if remember_me {
            self.remember_me_ttl
        } else {
            self.session_ttl
        }
    }

    pub fn create_handshake_token(
        &self,
        identity: &Identity,
        remember_me: bool,
        ttl: Duration,
    ) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let claims = HandshakeClaims {
            identity: identity.clone(),
            remember_me,
            iat: now.unix_timestamp(),
            exp: (now + ttl).unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind: TokenKind::Handshake,
        };
        self.sign(&claims, TokenKind::Handshake, &identity.user_id)
    }

    /// `None` on any failure: bad signature, expiry, wrong issuer or audience,
    /// or a token of another kind.
    pub fn verify_handshake(&self, token: &str) -> Option<HandshakeClaims> {
        let claims: HandshakeClaims = self.decode(token)?;
        (claims.kind == TokenKind::Handshake).then_some(claims)
    }

    /// Mints a session token whose lifetime follows `remember_me`.
    pub fn create_session_token(
        &self,
        identity: &Identity,
        remember_me: bool,
    ) -> anyhow::Result<(String, SessionClaims)> {
        let now = OffsetDateTime::now_utc();
        let expires = now + self.session_ttl_for(remember_me);
        let claims = SessionClaims {
            identity: identity.clone(),
            expires_at: (expires.unix_timestamp_nanos() / 1_000_000) as i64,
            remember_me,
            iat: now.unix_timestamp(),
            exp: expires.unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind: TokenKind::Session,
        };
        let token = self.sign(&claims, TokenKind::Session, &identity.user_id)?;
        Ok((token, claims))
    }

    pub fn verify_session(&self, token: &str) -> Option<SessionClaims> {
        let claims: SessionClaims = self.decode(token)?;
        (claims.kind == TokenKind::Session).then_some(claims)
    }

    fn sign<T: Serialize>(&self, claims: &T, kind: TokenKind, user_id: &str) -> anyhow::Result<String> {
        let token = encode(&Header::new(Algorithm::HS256), claims, &self.encoding)?;
        debug!(user_id, %kind, "token signed");
        Ok(token)
    }

    fn decode<T: DeserializeOwned>(&self, token: &str) -> Option<T> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        match decode::<T>(token, &self.decoding, &validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                debug!(error = %e, "token rejected");
                None
            }
        }
    }
}
