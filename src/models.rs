use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::roles::{Role, RoleError};

// --- Core Schemas ---

/// User
///
/// An account in the `users` collection. The access layer only reads `id` and `role`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    /// Absent means no elevated privilege.
    pub role: Option<Role>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// Raw `users` row. The role column is free text in the database, so it is parsed
/// (and rejected if unknown) before a `User` exists.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = RoleError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = row.role.as_deref().map(str::parse::<Role>).transpose()?;
        Ok(User {
            id: row.id,
            email: row.email,
            name: row.name,
            role,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum PageStatus {
    Draft,
    Published,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageStatus::Draft => "draft",
            PageStatus::Published => "published",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(PageStatus::Draft),
            "published" => Some(PageStatus::Published),
            _ => None,
        }
    }
}

/// Page
///
/// A document in the `pages` collection. `_status` is missing on pages created before
/// drafts were enabled; those are treated as public.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Page {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    #[serde(rename = "_status", skip_serializing_if = "Option::is_none", default)]
    pub status: Option<PageStatus>,
    #[ts(type = "string | null")]
    pub published_at: Option<DateTime<Utc>>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PageRow {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub status: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PageRow> for Page {
    fn from(row: PageRow) -> Self {
        Page {
            id: row.id,
            title: row.title,
            slug: row.slug,
            // An unrecognised status is not "published", so it must not become public.
            status: row.status.as_deref().map(|s| {
                PageStatus::parse(s).unwrap_or(PageStatus::Draft)
            }),
            published_at: row.published_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Media
///
/// Metadata for an uploaded asset. The binary itself lives in external storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct Media {
    pub id: Uuid,
    pub alt: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

// --- Request Payloads ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateUserRequest {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl UpdateUserRequest {
    /// Names of the fields this payload writes, for field-level access checks.
    pub fn touched_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.email.is_some() {
            fields.push("email");
        }
        if self.name.is_some() {
            fields.push("name");
        }
        if self.role.is_some() {
            fields.push("role");
        }
        fields
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreatePageRequest {
    pub title: String,
    /// Generated from the title when omitted.
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(rename = "_status", default)]
    pub status: Option<PageStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdatePageRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(rename = "_status", skip_serializing_if = "Option::is_none", default)]
    pub status: Option<PageStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateMediaRequest {
    pub alt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateMediaRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

// --- Write Models (after hooks) ---

/// A page ready to insert: slug formatted, `published_at` stamped.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPage {
    pub title: String,
    pub slug: String,
    pub status: Option<PageStatus>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PagePatch {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub status: Option<PageStatus>,
    pub published_at: Option<DateTime<Utc>>,
}

impl CreatePageRequest {
    pub fn into_new_page(self, now: DateTime<Utc>) -> NewPage {
        let slug = match self.slug {
            Some(slug) => format_slug(&slug),
            None => format_slug(&self.title),
        };
        NewPage {
            published_at: stamp_published_at(self.status, now),
            title: self.title,
            slug,
            status: self.status,
        }
    }
}

impl UpdatePageRequest {
    pub fn into_patch(self, now: DateTime<Utc>) -> PagePatch {
        PagePatch {
            published_at: stamp_published_at(self.status, now),
            title: self.title,
            slug: self.slug.as_deref().map(format_slug),
            status: self.status,
        }
    }
}

/// Publishing (on create or update) records the time it happened.
fn stamp_published_at(status: Option<PageStatus>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    (status == Some(PageStatus::Published)).then_some(now)
}

/// Symbols that slugs spell out instead of dropping.
fn symbol_word(ch: char) -> Option<&'static str> {
    Some(match ch {
        '&' => "and",
        '|' => "or",
        '<' => "less",
        '>' => "greater",
        '$' => "dollar",
        '%' => "percent",
        '€' => "euro",
        '£' => "pound",
        '¥' => "yen",
        '¢' => "cent",
        '©' => "c",
        '®' => "r",
        '™' => "tm",
        '♥' => "love",
        '∞' => "infinity",
        _ => return None,
    })
}

/// format_slug
///
/// Spells out a few symbols, transliterates everything else to ASCII, lowercases and
/// joins the words with `-`: `"Café & Bar!"` becomes `"cafe-and-bar"`.
pub fn format_slug(input: &str) -> String {
    let mut spelled = String::with_capacity(input.len());
    for ch in input.chars() {
        match symbol_word(ch) {
            Some(word) => spelled.push_str(word),
            None => spelled.push(ch),
        }
    }
    slug::slugify(spelled)
}
