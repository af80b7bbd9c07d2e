use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sqlx::{PgPool, Postgres, query_builder::QueryBuilder};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    models::{
        CreateMediaRequest, CreateUserRequest, Media, NewPage, Page, PagePatch, PageRow,
        UpdateMediaRequest, UpdateUserRequest, User, UserRow,
    },
    query::{Condition, QueryError, Where},
    roles::RoleError,
};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepoError::Conflict(db.message().to_string())
            }
            _ => RepoError::Database(err.to_string()),
        }
    }
}

impl From<RoleError> for RepoError {
    fn from(err: RoleError) -> Self {
        RepoError::Database(format!("stored user has an invalid role: {err}"))
    }
}

/// Repository Trait
///
/// Persistence for the protected collections. Every read and write that is subject to
/// access control takes an optional filter (`scope`); the implementation ANDs it into
/// the statement, so a filtered decision can never reach a document outside it.
///
/// `update_*` returns `None` and `delete_*` returns `false` when no document matches
/// both the id and the scope.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepoError>;
    async fn find_users(&self, filter: Option<&Where>) -> Result<Vec<User>, RepoError>;
    async fn create_user(&self, req: CreateUserRequest) -> Result<User, RepoError>;
    async fn update_user(
        &self,
        id: Uuid,
        req: UpdateUserRequest,
        scope: Option<&Where>,
    ) -> Result<Option<User>, RepoError>;
    async fn delete_user(&self, id: Uuid, scope: Option<&Where>) -> Result<bool, RepoError>;

    // --- Pages ---
    async fn find_pages(&self, filter: Option<&Where>) -> Result<Vec<Page>, RepoError>;
    async fn create_page(&self, page: NewPage) -> Result<Page, RepoError>;
    async fn update_page(
        &self,
        id: Uuid,
        patch: PagePatch,
        scope: Option<&Where>,
    ) -> Result<Option<Page>, RepoError>;
    async fn delete_page(&self, id: Uuid, scope: Option<&Where>) -> Result<bool, RepoError>;

    // --- Media ---
    async fn find_media(&self, filter: Option<&Where>) -> Result<Vec<Media>, RepoError>;
    async fn create_media(&self, req: CreateMediaRequest) -> Result<Media, RepoError>;
    async fn update_media(
        &self,
        id: Uuid,
        req: UpdateMediaRequest,
        scope: Option<&Where>,
    ) -> Result<Option<Media>, RepoError>;
    async fn delete_media(&self, id: Uuid, scope: Option<&Where>) -> Result<bool, RepoError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

// --- Filter → SQL ---

type ColumnMap = fn(&str) -> Option<&'static str>;

fn user_column(field: &str) -> Option<&'static str> {
    match field {
        "id" => Some("id"),
        "email" => Some("email"),
        "name" => Some("name"),
        "role" => Some("role"),
        _ => None,
    }
}

fn page_column(field: &str) -> Option<&'static str> {
    match field {
        "id" => Some("id"),
        "title" => Some("title"),
        "slug" => Some("slug"),
        "_status" => Some("status"),
        _ => None,
    }
}

fn media_column(field: &str) -> Option<&'static str> {
    match field {
        "id" => Some("id"),
        "alt" => Some("alt"),
        _ => None,
    }
}

/// Appends ` WHERE <filter>` when a filter is present.
fn push_filter(
    builder: &mut QueryBuilder<'_, Postgres>,
    filter: Option<&Where>,
    columns: ColumnMap,
) -> Result<(), QueryError> {
    if let Some(filter) = filter {
        builder.push(" WHERE ");
        push_where(builder, filter, columns)?;
    }
    Ok(())
}

/// Appends ` AND (<scope>)` when a scope is present.
fn push_scope(
    builder: &mut QueryBuilder<'_, Postgres>,
    scope: Option<&Where>,
    columns: ColumnMap,
) -> Result<(), QueryError> {
    if let Some(scope) = scope {
        builder.push(" AND ");
        push_where(builder, scope, columns)?;
    }
    Ok(())
}

/// Translates a filter into a parenthesised SQL predicate. Field names only ever come
/// from the column whitelist; every value is bound.
fn push_where(
    builder: &mut QueryBuilder<'_, Postgres>,
    filter: &Where,
    columns: ColumnMap,
) -> Result<(), QueryError> {
    match filter {
        Where::And { and } => push_group(builder, and, " AND ", "TRUE", columns),
        Where::Or { or } => push_group(builder, or, " OR ", "FALSE", columns),
        Where::Fields(fields) => {
            if fields.is_empty() {
                builder.push("TRUE");
                return Ok(());
            }
            builder.push("(");
            for (i, (name, condition)) in fields.iter().enumerate() {
                if i > 0 {
                    builder.push(" AND ");
                }
                let column = columns(name).ok_or_else(|| QueryError::UnknownField(name.clone()))?;
                match condition {
                    Condition::Equals(Value::Null) | Condition::Exists(false) => {
                        builder.push(format!("{column} IS NULL"));
                    }
                    Condition::Exists(true) => {
                        builder.push(format!("{column} IS NOT NULL"));
                    }
                    Condition::Equals(value) => {
                        builder.push(format!("CAST({column} AS TEXT) = "));
                        builder.push_bind(scalar_text(name, value)?);
                    }
                }
            }
            builder.push(")");
            Ok(())
        }
    }
}

fn push_group(
    builder: &mut QueryBuilder<'_, Postgres>,
    clauses: &[Where],
    separator: &str,
    empty: &str,
    columns: ColumnMap,
) -> Result<(), QueryError> {
    if clauses.is_empty() {
        builder.push(empty);
        return Ok(());
    }
    builder.push("(");
    for (i, clause) in clauses.iter().enumerate() {
        if i > 0 {
            builder.push(separator);
        }
        push_where(builder, clause, columns)?;
    }
    builder.push(")");
    Ok(())
}

fn scalar_text(field: &str, value: &Value) -> Result<String, QueryError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(QueryError::UnsupportedValue {
            field: field.to_string(),
            value: other.to_string(),
        }),
    }
}

// --- Postgres ---

const USER_COLUMNS: &str = "id, email, name, role, created_at, updated_at";
const PAGE_COLUMNS: &str = "id, title, slug, status, published_at, created_at, updated_at";
const MEDIA_COLUMNS: &str = "id, alt, created_at, updated_at";

/// PostgresRepository
///
/// Expects the tables `users (id uuid pk, email text unique, name text, role text null)`,
/// `pages (id uuid pk, title text, slug text unique, status text null, published_at timestamptz null)`
/// and `media (id uuid pk, alt text)`, each with `created_at`/`updated_at` timestamptz.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::try_from).transpose()?)
    }

    async fn find_users(&self, filter: Option<&Where>) -> Result<Vec<User>, RepoError> {
        let mut builder = QueryBuilder::new(format!("SELECT {USER_COLUMNS} FROM users"));
        push_filter(&mut builder, filter, user_column)?;
        builder.push(" ORDER BY created_at ASC");
        let rows = builder
            .build_query_as::<UserRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| User::try_from(row).map_err(RepoError::from))
            .collect()
    }

    async fn create_user(&self, req: CreateUserRequest) -> Result<User, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (id, email, name, role, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, NOW(), NOW()) RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(req.email)
        .bind(req.name)
        .bind(req.role.map(|r| r.as_str()))
        .fetch_one(&self.pool)
        .await?;
        Ok(User::try_from(row)?)
    }

    async fn update_user(
        &self,
        id: Uuid,
        req: UpdateUserRequest,
        scope: Option<&Where>,
    ) -> Result<Option<User>, RepoError> {
        let mut builder = QueryBuilder::new("UPDATE users SET email = COALESCE(");
        builder.push_bind(req.email);
        builder.push(", email), name = COALESCE(");
        builder.push_bind(req.name);
        builder.push(", name), role = COALESCE(");
        builder.push_bind(req.role.map(|r| r.as_str()));
        builder.push(", role), updated_at = NOW() WHERE id = ");
        builder.push_bind(id);
        push_scope(&mut builder, scope, user_column)?;
        builder.push(format!(" RETURNING {USER_COLUMNS}"));
        let row = builder
            .build_query_as::<UserRow>()
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::try_from).transpose()?)
    }

    async fn delete_user(&self, id: Uuid, scope: Option<&Where>) -> Result<bool, RepoError> {
        let mut builder = QueryBuilder::new("DELETE FROM users WHERE id = ");
        builder.push_bind(id);
        push_scope(&mut builder, scope, user_column)?;
        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_pages(&self, filter: Option<&Where>) -> Result<Vec<Page>, RepoError> {
        let mut builder = QueryBuilder::new(format!("SELECT {PAGE_COLUMNS} FROM pages"));
        push_filter(&mut builder, filter, page_column)?;
        builder.push(" ORDER BY updated_at DESC");
        let rows = builder
            .build_query_as::<PageRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Page::from).collect())
    }

    async fn create_page(&self, page: NewPage) -> Result<Page, RepoError> {
        let row = sqlx::query_as::<_, PageRow>(&format!(
            "INSERT INTO pages (id, title, slug, status, published_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, NOW(), NOW()) RETURNING {PAGE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(page.title)
        .bind(page.slug)
        .bind(page.status.map(|s| s.as_str()))
        .bind(page.published_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(Page::from(row))
    }

    async fn update_page(
        &self,
        id: Uuid,
        patch: PagePatch,
        scope: Option<&Where>,
    ) -> Result<Option<Page>, RepoError> {
        let mut builder = QueryBuilder::new("UPDATE pages SET title = COALESCE(");
        builder.push_bind(patch.title);
        builder.push(", title), slug = COALESCE(");
        builder.push_bind(patch.slug);
        builder.push(", slug), status = COALESCE(");
        builder.push_bind(patch.status.map(|s| s.as_str()));
        builder.push(", status), published_at = COALESCE(");
        builder.push_bind(patch.published_at);
        builder.push(", published_at), updated_at = NOW() WHERE id = ");
        builder.push_bind(id);
        push_scope(&mut builder, scope, page_column)?;
        builder.push(format!(" RETURNING {PAGE_COLUMNS}"));
        let row = builder
            .build_query_as::<PageRow>()
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Page::from))
    }

    async fn delete_page(&self, id: Uuid, scope: Option<&Where>) -> Result<bool, RepoError> {
        let mut builder = QueryBuilder::new("DELETE FROM pages WHERE id = ");
        builder.push_bind(id);
        push_scope(&mut builder, scope, page_column)?;
        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_media(&self, filter: Option<&Where>) -> Result<Vec<Media>, RepoError> {
        let mut builder = QueryBuilder::new(format!("SELECT {MEDIA_COLUMNS} FROM media"));
        push_filter(&mut builder, filter, media_column)?;
        builder.push(" ORDER BY created_at DESC");
        Ok(builder
            .build_query_as::<Media>()
            .fetch_all(&self.pool)
            .await?)
    }

    async fn create_media(&self, req: CreateMediaRequest) -> Result<Media, RepoError> {
        Ok(sqlx::query_as::<_, Media>(&format!(
            "INSERT INTO media (id, alt, created_at, updated_at) \
             VALUES ($1, $2, NOW(), NOW()) RETURNING {MEDIA_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(req.alt)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn update_media(
        &self,
        id: Uuid,
        req: UpdateMediaRequest,
        scope: Option<&Where>,
    ) -> Result<Option<Media>, RepoError> {
        let mut builder = QueryBuilder::new("UPDATE media SET alt = COALESCE(");
        builder.push_bind(req.alt);
        builder.push(", alt), updated_at = NOW() WHERE id = ");
        builder.push_bind(id);
        push_scope(&mut builder, scope, media_column)?;
        builder.push(format!(" RETURNING {MEDIA_COLUMNS}"));
        Ok(builder
            .build_query_as::<Media>()
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete_media(&self, id: Uuid, scope: Option<&Where>) -> Result<bool, RepoError> {
        let mut builder = QueryBuilder::new("DELETE FROM media WHERE id = ");
        builder.push_bind(id);
        push_scope(&mut builder, scope, media_column)?;
        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

// --- In-memory ---

/// InMemoryRepository
///
/// A process-local implementation evaluating filters with `Where::matches` against the
/// serialized documents. Used by the test suite and for running without a database.
#[derive(Default)]
pub struct InMemoryRepository {
    users: RwLock<Vec<User>>,
    pages: RwLock<Vec<Page>>,
    media: RwLock<Vec<Media>>,
}

fn passes<T: Serialize>(document: &T, filter: Option<&Where>) -> bool {
    match filter {
        None => true,
        Some(filter) => serde_json::to_value(document)
            .map(|value| filter.matches(&value))
            .unwrap_or(false),
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a user as-is, bypassing hooks.
    pub async fn seed_user(&self, user: User) {
        self.users.write().await.push(user);
    }

    /// Inserts a page as-is, e.g. a legacy page without `_status`.
    pub async fn seed_page(&self, page: Page) {
        self.pages.write().await.push(page);
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepoError> {
        Ok(self.users.read().await.iter().find(|u| u.id == id).cloned())
    }

    async fn find_users(&self, filter: Option<&Where>) -> Result<Vec<User>, RepoError> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .filter(|u| passes(*u, filter))
            .cloned()
            .collect())
    }

    async fn create_user(&self, req: CreateUserRequest) -> Result<User, RepoError> {
        let mut users = self.users.write().await;
        if users.iter().any(|u| u.email == req.email) {
            return Err(RepoError::Conflict(format!("email {} is taken", req.email)));
        }
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: req.email,
            name: req.name,
            role: req.role,
            created_at: now,
            updated_at: now,
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn update_user(
        &self,
        id: Uuid,
        req: UpdateUserRequest,
        scope: Option<&Where>,
    ) -> Result<Option<User>, RepoError> {
        let mut users = self.users.write().await;
        let Some(user) = users
            .iter_mut()
            .find(|u| u.id == id && passes(&**u, scope))
        else {
            return Ok(None);
        };
        if let Some(email) = req.email {
            user.email = email;
        }
        if let Some(name) = req.name {
            user.name = name;
        }
        if let Some(role) = req.role {
            user.role = Some(role);
        }
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn delete_user(&self, id: Uuid, scope: Option<&Where>) -> Result<bool, RepoError> {
        let mut users = self.users.write().await;
        let before = users.len();
        users.retain(|u| !(u.id == id && passes(u, scope)));
        Ok(users.len() < before)
    }

    async fn find_pages(&self, filter: Option<&Where>) -> Result<Vec<Page>, RepoError> {
        Ok(self
            .pages
            .read()
            .await
            .iter()
            .filter(|p| passes(*p, filter))
            .cloned()
            .collect())
    }

    async fn create_page(&self, page: NewPage) -> Result<Page, RepoError> {
        let mut pages = self.pages.write().await;
        if pages.iter().any(|p| p.slug == page.slug) {
            return Err(RepoError::Conflict(format!("slug {} is taken", page.slug)));
        }
        let now = Utc::now();
        let page = Page {
            id: Uuid::new_v4(),
            title: page.title,
            slug: page.slug,
            status: page.status,
            published_at: page.published_at,
            created_at: now,
            updated_at: now,
        };
        pages.push(page.clone());
        Ok(page)
    }

    async fn update_page(
        &self,
        id: Uuid,
        patch: PagePatch,
        scope: Option<&Where>,
    ) -> Result<Option<Page>, RepoError> {
        let mut pages = self.pages.write().await;
        if let Some(slug) = &patch.slug {
            if pages.iter().any(|p| p.id != id && &p.slug == slug) {
                return Err(RepoError::Conflict(format!("slug {slug} is taken")));
            }
        }
        let Some(page) = pages
            .iter_mut()
            .find(|p| p.id == id && passes(&**p, scope))
        else {
            return Ok(None);
        };
        if let Some(title) = patch.title {
            page.title = title;
        }
        if let Some(slug) = patch.slug {
            page.slug = slug;
        }
        if let Some(status) = patch.status {
            page.status = Some(status);
        }
        if let Some(published_at) = patch.published_at {
            page.published_at = Some(published_at);
        }
        page.updated_at = Utc::now();
        Ok(Some(page.clone()))
    }

    async fn delete_page(&self, id: Uuid, scope: Option<&Where>) -> Result<bool, RepoError> {
        let mut pages = self.pages.write().await;
        let before = pages.len();
        pages.retain(|p| !(p.id == id && passes(p, scope)));
        Ok(pages.len() < before)
    }

    async fn find_media(&self, filter: Option<&Where>) -> Result<Vec<Media>, RepoError> {
        Ok(self
            .media
            .read()
            .await
            .iter()
            .filter(|m| passes(*m, filter))
            .cloned()
            .collect())
    }

    async fn create_media(&self, req: CreateMediaRequest) -> Result<Media, RepoError> {
        let now = Utc::now();
        let media = Media {
            id: Uuid::new_v4(),
            alt: req.alt,
            created_at: now,
            updated_at: now,
        };
        self.media.write().await.push(media.clone());
        Ok(media)
    }

    async fn update_media(
        &self,
        id: Uuid,
        req: UpdateMediaRequest,
        scope: Option<&Where>,
    ) -> Result<Option<Media>, RepoError> {
        let mut media = self.media.write().await;
        let Some(item) = media
            .iter_mut()
            .find(|m| m.id == id && passes(&**m, scope))
        else {
            return Ok(None);
        };
        if let Some(alt) = req.alt {
            item.alt = alt;
        }
        item.updated_at = Utc::now();
        Ok(Some(item.clone()))
    }

    async fn delete_media(&self, id: Uuid, scope: Option<&Where>) -> Result<bool, RepoError> {
        let mut media = self.media.write().await;
        let before = media.len();
        media.retain(|m| !(m.id == id && passes(m, scope)));
        Ok(media.len() < before)
    }
}
