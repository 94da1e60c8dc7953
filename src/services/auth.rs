// src/services/auth.rs
//
// Dual-mode token verification. Offline tokens are locally-minted HS256 JWTs
// carrying their issuance time and expire 24 hours after it. Opaque tokens
// are verified by the upstream auth endpoint; when that endpoint is
// unreachable the token is accepted as-is (degrade open) so the dashboard
// keeps working through upstream outages. An explicit upstream rejection is
// final.
use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::Config;
use crate::BoxError;

pub const OFFLINE_TOKEN_LIFETIME_HOURS: i64 = 24;

/// Tolerated clock skew for tokens minted on another machine.
const MAX_CLOCK_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    Expired,
    Invalid(String),
    Rejected(u16),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthError::Expired => write!(f, "offline token expired"),
            AuthError::Invalid(message) => write!(f, "invalid token: {}", message),
            AuthError::Rejected(status) => {
                write!(f, "upstream rejected token with status {}", status)
            }
        }
    }
}

impl std::error::Error for AuthError {}

#[derive(Debug, Serialize, Deserialize)]
struct OfflineClaims {
    #[serde(default)]
    sub: String,
    iat: i64,
}

pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    http: reqwest::Client,
    verify_url: String,
}

impl TokenVerifier {
    pub fn new(config: &Config) -> Result<Self, BoxError> {
        let secret = match BASE64.decode(&config.auth_secret) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    "AUTH_SECRET is not valid base64 ({}), using raw bytes",
                    err
                );
                config.auth_secret.as_bytes().to_vec()
            }
        };
        let http = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .build()?;
        Ok(Self {
            encoding: EncodingKey::from_secret(&secret),
            decoding: DecodingKey::from_secret(&secret),
            http,
            verify_url: format!(
                "{}/auth/verify",
                config.upstream_base_url.trim_end_matches('/')
            ),
        })
    }

    /// Mint an offline token carrying its issuance time.
    pub fn mint_offline_token(
        &self,
        subject: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<String> {
        let claims = OfflineClaims {
            sub: subject.to_string(),
            iat: now.timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding).context("failed to sign offline token")
    }

    /// Verify either token kind. Tokens with JWT structure take the offline
    /// path; everything else is treated as an upstream-issued opaque token.
    pub async fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<(), AuthError> {
        if token.bytes().filter(|b| *b == b'.').count() == 2 {
            self.verify_offline(token, now)
        } else {
            self.verify_upstream(token).await
        }
    }

    fn verify_offline(&self, token: &str, now: DateTime<Utc>) -> Result<(), AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = decode::<OfflineClaims>(token, &self.decoding, &validation)
            .map_err(|err| AuthError::Invalid(err.to_string()))?;

        let age_secs = now.timestamp() - data.claims.iat;
        if age_secs < -MAX_CLOCK_SKEW_SECS {
            return Err(AuthError::Invalid("token issued in the future".to_string()));
        }
        if age_secs >= Duration::hours(OFFLINE_TOKEN_LIFETIME_HOURS).num_seconds() {
            return Err(AuthError::Expired);
        }
        Ok(())
    }

    async fn verify_upstream(&self, token: &str) -> Result<(), AuthError> {
        match self.http.get(&self.verify_url).bearer_auth(token).send().await {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => Err(AuthError::Rejected(response.status().as_u16())),
            Err(err) if err.is_timeout() || err.is_connect() => {
                info!(
                    "Auth upstream unreachable ({}), accepting opaque token unverified",
                    err
                );
                Ok(())
            }
            Err(err) => Err(AuthError::Invalid(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;
    use std::time::Duration as StdDuration;

    fn test_config(upstream_base_url: &str) -> Config {
        Config {
            port: 0,
            upstream_base_url: upstream_base_url.to_string(),
            upstream_timeout: StdDuration::from_millis(500),
            dashboard_tz: "UTC".parse::<Tz>().unwrap(),
            stale_time: StdDuration::from_secs(30),
            cache_time: StdDuration::from_secs(300),
            refetch_interval: StdDuration::from_secs(60),
            auth_secret: "c2VjcmV0LWZvci10ZXN0cw==".to_string(),
        }
    }

    fn verifier() -> TokenVerifier {
        TokenVerifier::new(&test_config("http://127.0.0.1:9/api")).unwrap()
    }

    #[tokio::test]
    async fn fresh_offline_token_is_accepted() {
        let verifier = verifier();
        let now = Utc::now();
        let token = verifier.mint_offline_token("ops", now).unwrap();
        assert_eq!(verifier.verify(&token, now).await, Ok(()));
        assert_eq!(
            verifier
                .verify(&token, now + Duration::hours(23))
                .await,
            Ok(())
        );
    }

    #[tokio::test]
    async fn offline_token_expires_after_24_hours() {
        let verifier = verifier();
        let now = Utc::now();
        let token = verifier.mint_offline_token("ops", now).unwrap();
        assert_eq!(
            verifier.verify(&token, now + Duration::hours(25)).await,
            Err(AuthError::Expired)
        );
    }

    #[tokio::test]
    async fn tampered_offline_token_is_invalid() {
        let verifier = verifier();
        let now = Utc::now();
        let token = verifier.mint_offline_token("ops", now).unwrap();
        let mut tampered = token.clone();
        tampered.push('x');
        assert!(matches!(
            verifier.verify(&tampered, now).await,
            Err(AuthError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn opaque_token_degrades_open_when_upstream_unreachable() {
        // Port 9 (discard) refuses connections, so the upstream verdict is
        // unavailable and the opaque token must pass.
        let verifier = verifier();
        assert_eq!(verifier.verify("opaque-session-token", Utc::now()).await, Ok(()));
    }

    #[tokio::test]
    async fn opaque_token_rejected_by_reachable_upstream() {
        use warp::Filter;

        let reject = warp::any().map(|| {
            warp::reply::with_status("denied", warp::http::StatusCode::UNAUTHORIZED)
        });
        let (addr, server) = warp::serve(reject).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let verifier =
            TokenVerifier::new(&test_config(&format!("http://{}/api", addr))).unwrap();
        assert_eq!(
            verifier.verify("opaque-session-token", Utc::now()).await,
            Err(AuthError::Rejected(401))
        );
    }
}
