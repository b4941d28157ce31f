//! Authentication Service
//!
//! Session manager for cookie-based authentication. Access tokens are
//! short-lived HS256 JWTs that need no storage to validate. Refresh tokens
//! are opaque 256-bit random values; only their SHA-256 digest is stored,
//! and every use rotates them.

use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::JwtSettings;
use crate::domain::{RefreshToken, RefreshTokenRepository, User, UserRepository};
use crate::shared::error::AppError;

/// Authentication service trait for dependency injection
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Create an account. Credentials are issued separately by `login`.
    async fn signup(&self, username: &str, email: &str, password: &str) -> Result<User, AuthError>;

    /// Verify credentials and issue a fresh token pair.
    async fn login(&self, email: &str, password: &str) -> Result<(User, AuthTokens), AuthError>;

    /// Resolve the identity behind a request's credentials.
    ///
    /// A valid access token wins. Otherwise an active refresh token is
    /// rotated and the new pair is returned in `Authenticated::refreshed`
    /// so the caller can hand it back to the client.
    async fn authenticate(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<Authenticated, AuthError>;

    /// Exchange a refresh token for a new pair, revoking the old token.
    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, AuthError>;

    /// Revoke a refresh token. Unknown or already revoked tokens are ignored.
    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError>;

    /// Validate an access token and return its subject.
    fn validate_access_token(&self, access_token: &str) -> Result<Uuid, AuthError>;

    async fn find_user(&self, user_id: Uuid) -> Result<User, AuthError>;
}

/// A freshly issued credential pair.
#[derive(Debug, Clone)]
pub struct AuthTokens {
    pub user_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
}

/// Outcome of a successful `authenticate` call.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub user_id: Uuid,
    pub refreshed: Option<AuthTokens>,
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Issuer
    pub iss: String,
    /// Issued at time (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// Authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The stored hash could not be parsed; distinct from a wrong password.
    #[error("Stored password hash is corrupt")]
    CorruptPasswordHash,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Refresh token is unknown, revoked or expired")]
    InvalidRefreshToken,

    #[error("No credentials presented")]
    MissingCredentials,

    #[error("User not found")]
    UserNotFound,

    #[error("Email or username already registered")]
    AlreadyRegistered,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Whether the caller should be sent back to the login page.
    pub fn is_unauthenticated(&self) -> bool {
        !matches!(
            self,
            AuthError::CorruptPasswordHash | AuthError::Internal(_) | AuthError::AlreadyRegistered
        )
    }
}

impl From<AppError> for AuthError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Conflict(_) => AuthError::AlreadyRegistered,
            other => AuthError::Internal(other.to_string()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::AlreadyRegistered => AppError::Conflict(err.to_string()),
            AuthError::CorruptPasswordHash | AuthError::Internal(_) => {
                AppError::Internal(err.to_string())
            }
            _ => AppError::Unauthorized(err.to_string()),
        }
    }
}

/// AuthService implementation
pub struct AuthServiceImpl<U, R>
where
    U: UserRepository,
    R: RefreshTokenRepository,
{
    user_repo: Arc<U>,
    token_repo: Arc<R>,
    jwt_settings: JwtSettings,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl<U, R> AuthServiceImpl<U, R>
where
    U: UserRepository,
    R: RefreshTokenRepository,
{
    pub fn new(user_repo: Arc<U>, token_repo: Arc<R>, jwt_settings: JwtSettings) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[jwt_settings.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.leeway = 0;

        Self {
            user_repo,
            token_repo,
            encoding_key: EncodingKey::from_secret(jwt_settings.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_settings.secret.as_bytes()),
            validation,
            jwt_settings,
        }
    }

    /// Hash a password using Argon2id
    fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);

        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Internal(format!("Password hashing failed: {}", e)))
    }

    /// Verify a password against its hash
    fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let parsed_hash = PasswordHash::new(hash).map_err(|_| AuthError::CorruptPasswordHash)?;

        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }

    fn mint_access_token(&self, user_id: Uuid) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iss: self.jwt_settings.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(self.jwt_settings.access_token_expiry_minutes))
                .timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Mint an access token and store a new refresh token for `user_id`.
    async fn issue_tokens(&self, user_id: Uuid) -> Result<AuthTokens, AuthError> {
        let access_token = self.mint_access_token(user_id)?;
        let refresh_token = generate_refresh_token();

        let record = RefreshToken::new(
            hash_refresh_token(&refresh_token),
            user_id,
            Utc::now() + Duration::days(self.jwt_settings.refresh_token_expiry_days),
        );
        self.token_repo.create(&record).await?;

        Ok(AuthTokens {
            user_id,
            access_token,
            refresh_token,
        })
    }
}

/// 32 random bytes, hex encoded.
fn generate_refresh_token() -> String {
    let bytes: [u8; 32] = rand::random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Hash refresh token for storage
pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[async_trait]
impl<U, R> AuthService for AuthServiceImpl<U, R>
where
    U: UserRepository + 'static,
    R: RefreshTokenRepository + 'static,
{
    async fn signup(&self, username: &str, email: &str, password: &str) -> Result<User, AuthError> {
        let password_hash = self.hash_password(password)?;
        let user = User::new(username.to_string(), email.to_string(), password_hash);

        let created = self.user_repo.create(&user).await?;
        info!(user_id = %created.id, username = %created.username, "Account created");

        Ok(created)
    }

    async fn login(&self, email: &str, password: &str) -> Result<(User, AuthTokens), AuthError> {
        let user = self
            .user_repo
            .find_by_email(email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !self.verify_password(password, &user.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }

        let tokens = self.issue_tokens(user.id).await?;
        info!(user_id = %user.id, "User logged in");

        Ok((user, tokens))
    }

    async fn authenticate(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<Authenticated, AuthError> {
        if let Some(token) = access_token {
            match self.validate_access_token(token) {
                Ok(user_id) => {
                    return Ok(Authenticated {
                        user_id,
                        refreshed: None,
                    })
                }
                Err(e) => debug!(error = %e, "Access token rejected, trying refresh token"),
            }
        }

        let refresh_token = refresh_token.ok_or(AuthError::MissingCredentials)?;
        let tokens = self.refresh(refresh_token).await?;

        Ok(Authenticated {
            user_id: tokens.user_id,
            refreshed: Some(tokens),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, AuthError> {
        let token_hash = hash_refresh_token(refresh_token);

        // Compare-and-revoke; a concurrent caller with the same token gets None
        let consumed = self.token_repo.consume(&token_hash).await?.ok_or_else(|| {
            warn!("Refresh token rejected");
            AuthError::InvalidRefreshToken
        })?;

        let tokens = self.issue_tokens(consumed.user_id).await?;
        debug!(user_id = %consumed.user_id, "Refresh token rotated");

        Ok(tokens)
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        self.token_repo
            .revoke(&hash_refresh_token(refresh_token))
            .await?;
        Ok(())
    }

    fn validate_access_token(&self, access_token: &str) -> Result<Uuid, AuthError> {
        let token_data = decode::<Claims>(access_token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            })?;

        token_data
            .claims
            .sub
            .parse::<Uuid>()
            .map_err(|_| AuthError::InvalidToken)
    }

    async fn find_user(&self, user_id: Uuid) -> Result<User, AuthError> {
        self.user_repo
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }
}
