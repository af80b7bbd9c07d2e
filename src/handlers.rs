use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    AppState,
    access::{AccessContext, AccessDecision, FieldOperation, Permission},
    auth::AuthUser,
    collections::{CollectionSlug, GlobalSlug, Operation},
    error::AccessError,
    models::{
        CreateMediaRequest, CreatePageRequest, CreateUserRequest, Media, Page, UpdateMediaRequest,
        UpdatePageRequest, UpdateUserRequest, User,
    },
    preview::preview_path,
    query::Where,
};

const NOT_PERMITTED: &str = "You are not allowed to perform this action.";

// --- Access helpers ---

fn decide(
    state: &AppState,
    collection: CollectionSlug,
    operation: Operation,
    ctx: &AccessContext,
) -> AccessDecision {
    collection
        .access()
        .decide(operation, ctx, &state.roles)
}

/// Turns a decision into the scope a repository call must respect.
/// `Ok(None)` means unrestricted.
fn scope_of(decision: AccessDecision) -> Result<Option<Where>, AccessError> {
    match decision {
        AccessDecision::Allow => Ok(None),
        AccessDecision::Filter(filter) => Ok(Some(filter)),
        AccessDecision::Deny => Err(AccessError::Forbidden(NOT_PERMITTED.to_string())),
    }
}

/// Creation has no existing document to filter against, so only an unconditional
/// allow lets it through.
fn require_allow(decision: AccessDecision) -> Result<(), AccessError> {
    match decision {
        AccessDecision::Allow => Ok(()),
        _ => Err(AccessError::Forbidden(NOT_PERMITTED.to_string())),
    }
}

/// ANDs the caller's own query with the access scope.
fn narrow(query: Option<Where>, scope: Option<Where>) -> Option<Where> {
    match (query, scope) {
        (Some(query), Some(scope)) => Some(query.and(scope)),
        (query, None) => query,
        (None, scope) => scope,
    }
}

fn check_fields(
    state: &AppState,
    collection: CollectionSlug,
    operation: FieldOperation,
    touched: &[&str],
    ctx: &AccessContext,
) -> Result<(), AccessError> {
    match collection
        .access()
        .denied_field(operation, touched.iter().copied(), ctx, &state.roles)
    {
        Some(field) => {
            tracing::warn!(%collection, field, "field write denied");
            Err(AccessError::Forbidden(format!(
                "You are not allowed to set the {field} field."
            )))
        }
        None => Ok(()),
    }
}

fn by_id(id: Uuid) -> Where {
    Where::equals("id", id.to_string())
}

// --- Pages ---

/// PageQuery
///
/// Optional filters for `GET /pages`.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct PageQuery {
    pub slug: Option<String>,
}

/// list_pages
///
/// [Public Route] Lists pages. Anonymous callers only receive published pages (and
/// legacy pages without a status) unless the request carries a draft session.
#[utoipa::path(
    get,
    path = "/pages",
    params(PageQuery),
    responses((status = 200, description = "Visible pages", body = [Page]))
)]
pub async fn list_pages(
    ctx: AccessContext,
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<Page>>, AccessError> {
    let scope = scope_of(decide(&state, CollectionSlug::Pages, Operation::Read, &ctx))?;
    let query = query.slug.map(|slug| Where::equals("slug", slug));
    let pages = state.repo.find_pages(narrow(query, scope).as_ref()).await?;
    Ok(Json(pages))
}

/// get_page_by_slug
///
/// [Public Route] Fetches the single page rendered at `/{slug}`.
#[utoipa::path(
    get,
    path = "/pages/{slug}",
    params(("slug" = String, Path, description = "Page slug")),
    responses(
        (status = 200, description = "Found", body = Page),
        (status = 404, description = "Not found or not visible")
    )
)]
pub async fn get_page_by_slug(
    ctx: AccessContext,
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Page>, AccessError> {
    let scope = scope_of(decide(&state, CollectionSlug::Pages, Operation::Read, &ctx))?;
    let filter = narrow(Some(Where::equals("slug", slug)), scope);
    let page = state
        .repo
        .find_pages(filter.as_ref())
        .await?
        .into_iter()
        .next()
        .ok_or(AccessError::NotFound)?;
    Ok(Json(page))
}

/// create_page
///
/// [Authenticated Route] Contributors and above. Slug is formatted (or derived from the
/// title) and publishing stamps `published_at`.
#[utoipa::path(
    post,
    path = "/pages",
    request_body = CreatePageRequest,
    responses(
        (status = 201, description = "Created", body = Page),
        (status = 403, description = "Not permitted")
    )
)]
pub async fn create_page(
    ctx: AccessContext,
    State(state): State<AppState>,
    Json(payload): Json<CreatePageRequest>,
) -> Result<(StatusCode, Json<Page>), AccessError> {
    require_allow(decide(&state, CollectionSlug::Pages, Operation::Create, &ctx))?;
    let new_page = payload.into_new_page(Utc::now());
    if new_page.slug.is_empty() {
        return Err(AccessError::BadRequest("A page needs a slug or a title".to_string()));
    }
    let page = state.repo.create_page(new_page).await?;
    tracing::info!(page_id = %page.id, slug = %page.slug, "page created");
    Ok((StatusCode::CREATED, Json(page)))
}

/// update_page
///
/// [Authenticated Route] Partial update; contributors and above.
#[utoipa::path(
    patch,
    path = "/pages/{id}",
    params(("id" = Uuid, Path, description = "Page ID")),
    request_body = UpdatePageRequest,
    responses(
        (status = 200, description = "Updated", body = Page),
        (status = 403, description = "Not permitted"),
        (status = 404, description = "Not found")
    )
)]
pub async fn update_page(
    ctx: AccessContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePageRequest>,
) -> Result<Json<Page>, AccessError> {
    let scope = scope_of(decide(&state, CollectionSlug::Pages, Operation::Update, &ctx))?;
    let patch = payload.into_patch(Utc::now());
    if patch.slug.as_deref() == Some("") {
        return Err(AccessError::BadRequest("Slug must not be empty".to_string()));
    }
    state
        .repo
        .update_page(id, patch, scope.as_ref())
        .await?
        .map(Json)
        .ok_or(AccessError::NotFound)
}

/// delete_page
///
/// [Authenticated Route] Editors and above.
#[utoipa::path(
    delete,
    path = "/pages/{id}",
    params(("id" = Uuid, Path, description = "Page ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not permitted"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_page(
    ctx: AccessContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AccessError> {
    let scope = scope_of(decide(&state, CollectionSlug::Pages, Operation::Delete, &ctx))?;
    if state.repo.delete_page(id, scope.as_ref()).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AccessError::NotFound)
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PreviewUrlResponse {
    /// Absolute link that enters draft mode and lands on the page.
    pub url: String,
}

/// get_page_preview_url
///
/// [Authenticated Route] The preview link editors open from the admin panel. Only
/// callers who may update the page get a link carrying the preview secret.
#[utoipa::path(
    get,
    path = "/pages/{id}/preview-url",
    params(("id" = Uuid, Path, description = "Page ID")),
    responses(
        (status = 200, description = "Preview link", body = PreviewUrlResponse),
        (status = 403, description = "Not permitted"),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_page_preview_url(
    ctx: AccessContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PreviewUrlResponse>, AccessError> {
    let scope = scope_of(decide(&state, CollectionSlug::Pages, Operation::Update, &ctx))?;
    let page = state
        .repo
        .find_pages(narrow(Some(by_id(id)), scope).as_ref())
        .await?
        .into_iter()
        .next()
        .ok_or(AccessError::NotFound)?;
    let path = preview_path(CollectionSlug::Pages, &page.slug, &state.config.preview_secret)
        .ok_or_else(|| AccessError::Internal("pages have no preview prefix".to_string()))?;
    Ok(Json(PreviewUrlResponse {
        url: format!("{}{}", state.config.server_url.trim_end_matches('/'), path),
    }))
}

// --- Users ---

/// list_users
///
/// [Authenticated Route] Admins see every account, everyone else only their own.
#[utoipa::path(
    get,
    path = "/users",
    responses((status = 200, description = "Visible users", body = [User]))
)]
pub async fn list_users(
    ctx: AccessContext,
    State(state): State<AppState>,
) -> Result<Json<Vec<User>>, AccessError> {
    let scope = scope_of(decide(&state, CollectionSlug::Users, Operation::Read, &ctx))?;
    Ok(Json(state.repo.find_users(scope.as_ref()).await?))
}

/// get_me
///
/// [Authenticated Route] The caller's own account.
#[utoipa::path(
    get,
    path = "/users/me",
    responses(
        (status = 200, description = "Profile", body = User),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn get_me(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<User>, AccessError> {
    state
        .repo
        .get_user(id)
        .await?
        .map(Json)
        .ok_or(AccessError::NotFound)
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Found", body = User),
        (status = 404, description = "Not found or not visible")
    )
)]
pub async fn get_user(
    ctx: AccessContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<User>, AccessError> {
    let scope = scope_of(decide(&state, CollectionSlug::Users, Operation::Read, &ctx))?;
    state
        .repo
        .find_users(narrow(Some(by_id(id)), scope).as_ref())
        .await?
        .into_iter()
        .next()
        .map(Json)
        .ok_or(AccessError::NotFound)
}

/// create_user
///
/// [Authenticated Route] Admin only, including the initial role.
#[utoipa::path(
    post,
    path = "/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Created", body = User),
        (status = 403, description = "Not permitted"),
        (status = 409, description = "Email taken")
    )
)]
pub async fn create_user(
    ctx: AccessContext,
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), AccessError> {
    require_allow(decide(&state, CollectionSlug::Users, Operation::Create, &ctx))?;
    if payload.role.is_some() {
        check_fields(&state, CollectionSlug::Users, FieldOperation::Create, &["role"], &ctx)?;
    }
    let user = state.repo.create_user(payload).await?;
    tracing::info!(user_id = %user.id, "user created");
    Ok((StatusCode::CREATED, Json(user)))
}

/// update_user
///
/// [Authenticated Route] Users may edit their own account; only admins may touch `role`.
#[utoipa::path(
    patch,
    path = "/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated", body = User),
        (status = 403, description = "Not permitted"),
        (status = 404, description = "Not found or not yours")
    )
)]
pub async fn update_user(
    ctx: AccessContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<User>, AccessError> {
    let scope = scope_of(decide(&state, CollectionSlug::Users, Operation::Update, &ctx))?;
    check_fields(
        &state,
        CollectionSlug::Users,
        FieldOperation::Update,
        &payload.touched_fields(),
        &ctx,
    )?;
    state
        .repo
        .update_user(id, payload, scope.as_ref())
        .await?
        .map(Json)
        .ok_or(AccessError::NotFound)
}

#[utoipa::path(
    delete,
    path = "/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not permitted"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_user(
    ctx: AccessContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AccessError> {
    let scope = scope_of(decide(&state, CollectionSlug::Users, Operation::Delete, &ctx))?;
    if state.repo.delete_user(id, scope.as_ref()).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AccessError::NotFound)
    }
}

// --- Media ---

#[utoipa::path(
    get,
    path = "/media",
    responses((status = 200, description = "All media", body = [Media]))
)]
pub async fn list_media(
    ctx: AccessContext,
    State(state): State<AppState>,
) -> Result<Json<Vec<Media>>, AccessError> {
    let scope = scope_of(decide(&state, CollectionSlug::Media, Operation::Read, &ctx))?;
    Ok(Json(state.repo.find_media(scope.as_ref()).await?))
}

#[utoipa::path(
    post,
    path = "/media",
    request_body = CreateMediaRequest,
    responses(
        (status = 201, description = "Created", body = Media),
        (status = 403, description = "Not permitted")
    )
)]
pub async fn create_media(
    ctx: AccessContext,
    State(state): State<AppState>,
    Json(payload): Json<CreateMediaRequest>,
) -> Result<(StatusCode, Json<Media>), AccessError> {
    require_allow(decide(&state, CollectionSlug::Media, Operation::Create, &ctx))?;
    let media = state.repo.create_media(payload).await?;
    Ok((StatusCode::CREATED, Json(media)))
}

#[utoipa::path(
    patch,
    path = "/media/{id}",
    params(("id" = Uuid, Path, description = "Media ID")),
    request_body = UpdateMediaRequest,
    responses(
        (status = 200, description = "Updated", body = Media),
        (status = 403, description = "Not permitted"),
        (status = 404, description = "Not found")
    )
)]
pub async fn update_media(
    ctx: AccessContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateMediaRequest>,
) -> Result<Json<Media>, AccessError> {
    let scope = scope_of(decide(&state, CollectionSlug::Media, Operation::Update, &ctx))?;
    state
        .repo
        .update_media(id, payload, scope.as_ref())
        .await?
        .map(Json)
        .ok_or(AccessError::NotFound)
}

#[utoipa::path(
    delete,
    path = "/media/{id}",
    params(("id" = Uuid, Path, description = "Media ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not permitted"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_media(
    ctx: AccessContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AccessError> {
    let scope = scope_of(decide(&state, CollectionSlug::Media, Operation::Delete, &ctx))?;
    if state.repo.delete_media(id, scope.as_ref()).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AccessError::NotFound)
    }
}

// --- Access report ---

/// get_access
///
/// [Public Route] What the caller may do, per collection and operation. Filtered
/// permissions include the `where` clause that will be applied.
#[utoipa::path(
    get,
    path = "/access",
    responses((status = 200, description = "Permissions of the current caller"))
)]
pub async fn get_access(ctx: AccessContext, State(state): State<AppState>) -> Json<Value> {
    let operations = [
        ("create", Operation::Create),
        ("read", Operation::Read),
        ("update", Operation::Update),
        ("delete", Operation::Delete),
    ];

    let mut collections = Map::new();
    for collection in CollectionSlug::ALL {
        let mut ops = Map::new();
        for (name, operation) in operations {
            let permission = Permission::from(decide(&state, collection, operation, &ctx));
            ops.insert(name.to_string(), permission_value(permission));
        }
        collections.insert(collection.as_str().to_string(), Value::Object(ops));
    }

    let mut globals = Map::new();
    for global in GlobalSlug::ALL {
        let access = global.access();
        let mut ops = Map::new();
        for (name, operation) in operations {
            if let Some(decision) = access.decide(operation, &ctx, &state.roles) {
                ops.insert(name.to_string(), permission_value(Permission::from(decision)));
            }
        }
        globals.insert(global.as_str().to_string(), Value::Object(ops));
    }

    Json(serde_json::json!({
        "canAccessAdmin": ctx.user.is_some(),
        "collections": collections,
        "globals": globals,
    }))
}

fn permission_value(permission: Permission) -> Value {
    serde_json::to_value(permission).unwrap_or(Value::Null)
}
