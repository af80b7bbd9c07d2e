use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use axum_extra::extract::cookie::CookieJar;
use jsonwebtoken::{DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    access::AccessContext,
    config::{AppConfig, Env},
    error::AccessError,
    models::User,
    preview::DraftMode,
    repository::RepositoryState,
    roles::Role,
};

/// Cookie the CMS admin stores its session token in.
pub const SESSION_COOKIE: &str = "payload-token";

/// Claims
///
/// Payload of a session JWT, signed with `PAYLOAD_SECRET`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// The user's id; role is always re-read from storage.
    pub sub: Uuid,
    pub exp: usize,
    pub iat: usize,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("malformed authorization header")]
    MalformedHeader,
    #[error("user lookup failed: {0}")]
    Lookup(String),
}

/// Authenticator
///
/// The identity collaborator: turns request credentials into a user.
/// `Ok(None)` means the request carried no usable identity; `Err` means the
/// credentials were present but could not be verified.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<User>, AuthError>;
}

pub type AuthState = Arc<dyn Authenticator>;

/// JwtAuthenticator
///
/// Verifies HS256 session tokens and resolves the subject against the repository,
/// so deleted users and role changes take effect immediately.
pub struct JwtAuthenticator {
    repo: RepositoryState,
    config: AppConfig,
}

impl JwtAuthenticator {
    pub fn new(repo: RepositoryState, config: AppConfig) -> Self {
        Self { repo, config }
    }

    async fn lookup(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        self.repo
            .get_user(id)
            .await
            .map_err(|e| AuthError::Lookup(e.to_string()))
    }

    /// Local development bypass: `x-user-id: <uuid>` of an existing user.
    async fn local_bypass(&self, headers: &HeaderMap) -> Result<Option<User>, AuthError> {
        let Some(id) = headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
        else {
            return Ok(None);
        };
        self.lookup(id).await
    }
}

/// Pulls the raw token out of `Authorization: Bearer|JWT <token>` or the session cookie.
fn session_token(headers: &HeaderMap) -> Result<Option<String>, AuthError> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let value = value.to_str().map_err(|_| AuthError::MalformedHeader)?;
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("JWT "))
            .ok_or(AuthError::MalformedHeader)?;
        return Ok(Some(token.trim().to_string()));
    }
    let jar = CookieJar::from_headers(headers);
    Ok(jar.get(SESSION_COOKIE).map(|c| c.value().to_string()))
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<User>, AuthError> {
        if self.config.env == Env::Local {
            if let Some(user) = self.local_bypass(headers).await? {
                return Ok(Some(user));
            }
        }

        let Some(token) = session_token(headers)? else {
            return Ok(None);
        };

        let decoding_key = DecodingKey::from_secret(self.config.payload_secret.as_bytes());
        let mut validation = Validation::default();
        validation.validate_exp = true;

        let claims = decode::<Claims>(&token, &decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            })?
            .claims;

        // A valid token for a user that no longer exists is no identity at all.
        self.lookup(claims.sub).await
    }
}

/// AuthUser
///
/// The resolved identity of a request that must be authenticated.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Option<Role>,
}

/// Rejects with 401 unless the `Authenticator` yields a user. An identity already
/// resolved by the auth layer is taken from the request extensions.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AccessError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let auth = AuthState::from_ref(state);
        match auth.authenticate(&parts.headers).await {
            Ok(Some(user)) => Ok(AuthUser {
                id: user.id,
                role: user.role,
            }),
            Ok(None) => Err(AccessError::Unauthorized("authentication required".to_string())),
            Err(e) => {
                tracing::debug!("authentication failed: {}", e);
                Err(AccessError::Unauthorized("authentication required".to_string()))
            }
        }
    }
}

/// Builds the per-request access context. Never rejects: failed authentication
/// degrades to an anonymous caller, and only a verifiable draft cookie counts.
impl<S> FromRequestParts<S> for AccessContext
where
    S: Send + Sync,
    AuthState: FromRef<S>,
    AppConfig: FromRef<S>,
    RepositoryState: FromRef<S>,
{
    type Rejection = AccessError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = AppConfig::from_ref(state);
        let repo = RepositoryState::from_ref(state);

        let ctx = match parts.extensions.get::<AuthUser>() {
            Some(user) => AccessContext::for_user(user.id, user.role),
            None => match AuthState::from_ref(state).authenticate(&parts.headers).await {
                Ok(Some(user)) => AccessContext::for_user(user.id, user.role),
                Ok(None) => AccessContext::anonymous(),
                Err(e) => {
                    tracing::debug!("treating request as anonymous: {}", e);
                    AccessContext::anonymous()
                }
            },
        };

        let jar = CookieJar::from_headers(&parts.headers);
        let draft = DraftMode::from_jar(&jar, &config, repo.as_ref()).await;
        Ok(ctx.with_draft(draft))
    }
}
