use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::{
    AppState,
    auth::Authenticator,
    collections::CollectionSlug,
    config::{AppConfig, Env},
    error::AccessError,
    models::User,
    repository::Repository,
};

/// Cookie carrying the signed draft-session token.
pub const DRAFT_COOKIE: &str = "draft_mode";
const DRAFT_AUDIENCE: &str = "draft-mode";

const NOT_ALLOWED: &str = "You are not allowed to preview this page";

/// DraftMode
///
/// Whether the current request may see unpublished content. Lives on the request,
/// derived from its cookie; there is no process-wide flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DraftMode {
    #[default]
    Disabled,
    Enabled,
}

impl DraftMode {
    pub fn is_enabled(&self) -> bool {
        matches!(self, DraftMode::Enabled)
    }

    /// Enabled only for a draft cookie signed by this server, not yet expired, and
    /// issued to a user who still exists.
    pub async fn from_jar(jar: &CookieJar, config: &AppConfig, repo: &dyn Repository) -> Self {
        let Some(cookie) = jar.get(DRAFT_COOKIE) else {
            return DraftMode::Disabled;
        };
        let claims = match verify_draft_token(cookie.value(), &config.payload_secret) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!("ignoring draft cookie: {}", e);
                return DraftMode::Disabled;
            }
        };
        match repo.get_user(claims.sub).await {
            Ok(Some(_)) => DraftMode::Enabled,
            Ok(None) => {
                tracing::debug!(user_id = %claims.sub, "ignoring draft cookie of a removed user");
                DraftMode::Disabled
            }
            Err(e) => {
                tracing::warn!("draft owner lookup failed: {}", e);
                DraftMode::Disabled
            }
        }
    }
}

/// DraftClaims
///
/// Draft tokens carry their own audience so a session JWT can never be replayed as
/// a draft token, nor the reverse.
#[derive(Debug, Serialize, Deserialize)]
pub struct DraftClaims {
    pub sub: Uuid,
    pub aud: String,
    pub exp: usize,
    pub iat: usize,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn issue_draft_token(
    user_id: Uuid,
    secret: &str,
    ttl_secs: u64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = now_secs();
    let claims = DraftClaims {
        sub: user_id,
        aud: DRAFT_AUDIENCE.to_string(),
        iat: now as usize,
        exp: now.saturating_add(ttl_secs) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

pub fn verify_draft_token(
    token: &str,
    secret: &str,
) -> Result<DraftClaims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::default();
    validation.validate_exp = true;
    validation.set_audience(&[DRAFT_AUDIENCE]);
    decode::<DraftClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
}

fn enable_draft(jar: CookieJar, token: String, config: &AppConfig) -> CookieJar {
    jar.add(
        Cookie::build((DRAFT_COOKIE, token))
            .path("/")
            .http_only(true)
            .secure(config.env == Env::Production)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(
                i64::try_from(config.draft_ttl_secs).unwrap_or(i64::MAX),
            ))
            .build(),
    )
}

fn disable_draft(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(DRAFT_COOKIE).path("/"))
}

/// PreviewParams
///
/// Query string of `GET /preview/init`. Everything is optional at the parsing stage so
/// that each missing piece maps to the right status.
#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct PreviewParams {
    pub path: Option<String>,
    pub collection: Option<String>,
    pub slug: Option<String>,
    #[serde(rename = "previewSecret")]
    pub preview_secret: Option<String>,
}

/// PreviewGrant
///
/// A request that passed every check: draft mode may be enabled for `user`.
#[derive(Debug, Clone)]
pub struct PreviewGrant {
    pub user: User,
    pub path: String,
}

/// PreviewDenial
///
/// Why preview init stopped. `disable_draft` is set once the request got as far as
/// authentication, so a failed attempt never leaves a stale draft session behind.
#[derive(Debug)]
pub struct PreviewDenial {
    pub error: AccessError,
    pub disable_draft: bool,
}

impl PreviewDenial {
    fn before_auth(error: AccessError) -> Self {
        Self {
            error,
            disable_draft: false,
        }
    }

    fn unauthorized() -> Self {
        Self {
            error: AccessError::Unauthorized(NOT_ALLOWED.to_string()),
            disable_draft: true,
        }
    }
}

/// An unset or empty secret never matches.
fn secret_matches(provided: Option<&str>, configured: &str) -> bool {
    match provided {
        Some(provided) if !configured.is_empty() => {
            provided.as_bytes().ct_eq(configured.as_bytes()).into()
        }
        _ => false,
    }
}

/// Only same-origin paths: must start with `/`, and `//host` or `/\host` would be
/// read by browsers as another origin.
fn is_relative_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.starts_with("/\\")
}

/// authorize_preview
///
/// The ordered checks of preview init: secret, parameters, path, then exactly one
/// authentication attempt. Fails fast at the first broken rule.
pub async fn authorize_preview(
    params: PreviewParams,
    configured_secret: &str,
    authenticator: &dyn Authenticator,
    headers: &HeaderMap,
) -> Result<PreviewGrant, PreviewDenial> {
    if !secret_matches(params.preview_secret.as_deref(), configured_secret) {
        tracing::warn!("invalid preview secret provided");
        return Err(PreviewDenial::before_auth(AccessError::Forbidden(
            NOT_ALLOWED.to_string(),
        )));
    }

    let present = |value: Option<String>| value.filter(|v| !v.is_empty());
    let (Some(path), Some(collection), Some(slug)) = (
        present(params.path),
        present(params.collection),
        present(params.slug),
    ) else {
        tracing::warn!("insufficient preview params");
        return Err(PreviewDenial::before_auth(AccessError::BadRequest(
            "Insufficient search params".to_string(),
        )));
    };
    tracing::debug!(%path, %collection, %slug, "parsed preview params");

    if !is_relative_path(&path) {
        tracing::warn!(%path, "invalid path provided for preview");
        return Err(PreviewDenial::before_auth(AccessError::BadRequest(
            "This endpoint can only be used for relative previews".to_string(),
        )));
    }

    match authenticator.authenticate(headers).await {
        Ok(Some(user)) => {
            tracing::info!(user_id = %user.id, "user authenticated for preview");
            Ok(PreviewGrant { user, path })
        }
        Ok(None) => {
            tracing::warn!("preview requested without a session");
            Err(PreviewDenial::unauthorized())
        }
        Err(e) => {
            tracing::error!("error verifying token for preview: {}", e);
            Err(PreviewDenial::unauthorized())
        }
    }
}

/// preview_init
///
/// `GET /preview/init`: validates the request, enables draft mode and redirects (303)
/// to the relative `path`.
#[utoipa::path(
    get,
    path = "/preview/init",
    params(PreviewParams),
    responses(
        (status = 303, description = "Draft mode enabled, redirecting to path"),
        (status = 400, description = "Missing params or non-relative path"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Bad preview secret")
    )
)]
pub async fn preview_init(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Query(params): Query<PreviewParams>,
) -> Response {
    tracing::info!("received a preview request");

    match authorize_preview(
        params,
        &state.config.preview_secret,
        state.auth.as_ref(),
        &headers,
    )
    .await
    {
        Ok(grant) => {
            let token = match issue_draft_token(
                grant.user.id,
                &state.config.payload_secret,
                state.config.draft_ttl_secs,
            ) {
                Ok(token) => token,
                Err(e) => {
                    return AccessError::Internal(format!("signing draft token: {e}"))
                        .into_response();
                }
            };
            tracing::info!(path = %grant.path, "enabling draft mode and redirecting");
            (
                enable_draft(jar, token, &state.config),
                Redirect::to(&grant.path),
            )
                .into_response()
        }
        Err(PreviewDenial {
            error,
            disable_draft: true,
        }) => (disable_draft(jar), error).into_response(),
        Err(PreviewDenial { error, .. }) => error.into_response(),
    }
}

/// preview_exit
///
/// `GET /preview/exit`: always leaves draft mode, no authentication needed.
#[utoipa::path(
    get,
    path = "/preview/exit",
    responses((status = 200, description = "Draft mode is disabled"))
)]
pub async fn preview_exit(jar: CookieJar) -> (StatusCode, CookieJar, &'static str) {
    (StatusCode::OK, disable_draft(jar), "Draft mode is disabled")
}

/// preview_path
///
/// The relative preview link for a document, or `None` for collections that are not
/// rendered as pages.
pub fn preview_path(collection: CollectionSlug, slug: &str, secret: &str) -> Option<String> {
    let prefix = collection.preview_prefix()?;
    let path = format!("{prefix}/{slug}");
    Some(format!(
        "/preview/init?slug={}&collection={}&path={}&previewSecret={}",
        urlencoding::encode(slug),
        urlencoding::encode(collection.as_str()),
        urlencoding::encode(&path),
        urlencoding::encode(secret),
    ))
}
