use crate::error::{TestkitError, TestkitResult};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Signing secret used by test tokens. Never use outside tests.
pub const TEST_JWT_SECRET: &str = "test-jwt-secret-that-is-32-chars-long";

pub const ACCESS_TOKEN_MINUTES: i64 = 15;
pub const REFRESH_TOKEN_HOURS: i64 = 24;

/// Allowed drift when checking `exp`
const CLOCK_SKEW_SECONDS: i64 = 120;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenType::Access => write!(f, "access"),
            TokenType::Refresh => write!(f, "refresh"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // User ID
    pub uid: Uuid,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Issues and validates HS256 tokens for tests.
#[derive(Clone)]
pub struct TestTokenIssuer {
    secret: String,
    access_lifetime: Duration,
    refresh_lifetime: Duration,
    clock: Clock,
}

impl std::fmt::Debug for TestTokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestTokenIssuer")
            .field("access_lifetime", &self.access_lifetime)
            .field("refresh_lifetime", &self.refresh_lifetime)
            .finish_non_exhaustive()
    }
}

impl Default for TestTokenIssuer {
    fn default() -> Self {
        Self {
            secret: TEST_JWT_SECRET.to_string(),
            access_lifetime: Duration::minutes(ACCESS_TOKEN_MINUTES),
            refresh_lifetime: Duration::hours(REFRESH_TOKEN_HOURS),
            clock: Arc::new(Utc::now),
        }
    }
}

impl TestTokenIssuer {
    /// Empty secrets and non-positive lifetimes fall back to the defaults
    pub fn new(secret: impl Into<String>, access_lifetime: Duration, refresh_lifetime: Duration) -> Self {
        let defaults = Self::default();
        let secret = secret.into();

        Self {
            secret: if secret.is_empty() { defaults.secret } else { secret },
            access_lifetime: if access_lifetime > Duration::zero() {
                access_lifetime
            } else {
                defaults.access_lifetime
            },
            refresh_lifetime: if refresh_lifetime > Duration::zero() {
                refresh_lifetime
            } else {
                defaults.refresh_lifetime
            },
            clock: defaults.clock,
        }
    }

    /// Replace the clock used for `iat`/`exp` and expiry checks
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Generate an access token for a user
    pub fn generate_token(&self, user_id: Uuid) -> TestkitResult<String> {
        self.sign(user_id, TokenType::Access, self.access_lifetime)
    }

    pub fn generate_refresh_token(&self, user_id: Uuid) -> TestkitResult<String> {
        self.sign(user_id, TokenType::Refresh, self.refresh_lifetime)
    }

    /// An access token that expired an hour ago
    pub fn generate_expired_token(&self, user_id: Uuid) -> TestkitResult<String> {
        self.sign(user_id, TokenType::Access, Duration::hours(-1))
    }

    /// Validate an access token and extract claims
    pub fn validate_token(&self, token: &str) -> TestkitResult<Claims> {
        self.validate(token, TokenType::Access)
    }

    pub fn validate_refresh_token(&self, token: &str) -> TestkitResult<Claims> {
        self.validate(token, TokenType::Refresh)
    }

    /// Extract user ID from an access token
    pub fn extract_user_id(&self, token: &str) -> TestkitResult<Uuid> {
        let claims = self.validate_token(token)?;
        Uuid::parse_str(&claims.sub)
            .map_err(|_| TestkitError::Unauthorized("Invalid user ID in token".to_string()))
    }

    /// `Authorization` header value carrying a fresh access token
    pub fn bearer_header(&self, user_id: Uuid) -> TestkitResult<String> {
        Ok(format!("Bearer {}", self.generate_token(user_id)?))
    }

    fn sign(&self, user_id: Uuid, token_type: TokenType, lifetime: Duration) -> TestkitResult<String> {
        let now = (self.clock)();
        let claims = Claims {
            sub: user_id.to_string(),
            uid: user_id,
            token_type,
            iat: now.timestamp(),
            exp: (now + lifetime).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?)
    }

    fn validate(&self, token: &str, expected: TokenType) -> TestkitResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        // expiry is checked against the issuer's clock below
        validation.validate_exp = false;

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )?
        .claims;

        let now = (self.clock)().timestamp();
        if claims.exp + CLOCK_SKEW_SECONDS < now {
            tracing::debug!(token_id = %claims.jti, "Token expired");
            return Err(TestkitError::Unauthorized("Token expired".to_string()));
        }

        if claims.token_type != expected {
            return Err(TestkitError::Unauthorized(format!(
                "Wrong token type: expected {}, got {}",
                expected, claims.token_type
            )));
        }

        Ok(claims)
    }
}
