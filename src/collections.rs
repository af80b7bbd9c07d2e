use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    access::{AccessContext, AccessDecision, FieldOperation, FieldPredicate, Predicate},
    roles::{Role, RoleHierarchy},
};

/// CollectionSlug
///
/// The protected collections the site exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionSlug {
    Users,
    Pages,
    Media,
}

impl CollectionSlug {
    pub const ALL: [CollectionSlug; 3] =
        [CollectionSlug::Users, CollectionSlug::Pages, CollectionSlug::Media];

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionSlug::Users => "users",
            CollectionSlug::Pages => "pages",
            CollectionSlug::Media => "media",
        }
    }

    pub fn parse(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == slug)
    }

    /// URL prefix a document of this collection is rendered under, if it is previewable.
    pub fn preview_prefix(&self) -> Option<&'static str> {
        match self {
            CollectionSlug::Pages => Some(""),
            _ => None,
        }
    }

    pub fn access(&self) -> CollectionAccess {
        match self {
            CollectionSlug::Users => CollectionAccess {
                create: Predicate::RequireRole(Role::Admin),
                read: Predicate::RequireSelfOrRole(Role::Admin),
                update: Predicate::RequireSelfOrRole(Role::Admin),
                delete: Predicate::RequireRole(Role::Admin),
                fields: vec![FieldRule {
                    field: "role",
                    create: FieldPredicate::RequireRole(Role::Admin),
                    update: FieldPredicate::RequireRole(Role::Admin),
                }],
            },
            CollectionSlug::Pages => CollectionAccess {
                create: Predicate::RequireRole(Role::Contributor),
                read: Predicate::PublishedOrLoggedIn,
                update: Predicate::RequireRole(Role::Contributor),
                delete: Predicate::RequireRole(Role::Editor),
                fields: vec![],
            },
            CollectionSlug::Media => CollectionAccess {
                create: Predicate::LoggedIn,
                read: Predicate::AllowAll,
                update: Predicate::LoggedIn,
                delete: Predicate::RequireRole(Role::Editor),
                fields: vec![],
            },
        }
    }
}

impl fmt::Display for CollectionSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

/// FieldRule
///
/// Write guard on one named field of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRule {
    pub field: &'static str,
    pub create: FieldPredicate,
    pub update: FieldPredicate,
}

/// CollectionAccess
///
/// The predicate registered for each operation of a collection, plus its field rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionAccess {
    pub create: Predicate,
    pub read: Predicate,
    pub update: Predicate,
    pub delete: Predicate,
    pub fields: Vec<FieldRule>,
}

impl CollectionAccess {
    pub fn predicate(&self, operation: Operation) -> Predicate {
        match operation {
            Operation::Create => self.create,
            Operation::Read => self.read,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
        }
    }

    pub fn decide(
        &self,
        operation: Operation,
        ctx: &AccessContext,
        hierarchy: &RoleHierarchy,
    ) -> AccessDecision {
        self.predicate(operation).evaluate(ctx, hierarchy)
    }

    /// Returns the first field in `touched` the caller may not write, if any.
    pub fn denied_field<'a>(
        &self,
        operation: FieldOperation,
        touched: impl IntoIterator<Item = &'a str>,
        ctx: &AccessContext,
        hierarchy: &RoleHierarchy,
    ) -> Option<&'static str> {
        let touched: Vec<&str> = touched.into_iter().collect();
        self.fields
            .iter()
            .filter(|rule| touched.contains(&rule.field))
            .find(|rule| {
                let predicate = match operation {
                    FieldOperation::Create => rule.create,
                    FieldOperation::Update => rule.update,
                };
                !predicate.evaluate(ctx, hierarchy)
            })
            .map(|rule| rule.field)
    }
}

/// GlobalSlug
///
/// Site-wide singleton documents rendered in every page layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlobalSlug {
    Header,
    Footer,
}

impl GlobalSlug {
    pub const ALL: [GlobalSlug; 2] = [GlobalSlug::Header, GlobalSlug::Footer];

    pub fn as_str(&self) -> &'static str {
        match self {
            GlobalSlug::Header => "header",
            GlobalSlug::Footer => "footer",
        }
    }

    pub fn access(&self) -> GlobalAccess {
        match self {
            GlobalSlug::Header | GlobalSlug::Footer => GlobalAccess {
                read: Predicate::AllowAll,
                update: Predicate::RequireRole(Role::Editor),
            },
        }
    }
}

impl fmt::Display for GlobalSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// GlobalAccess
///
/// A global is never created or deleted, so only read and update carry a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalAccess {
    pub read: Predicate,
    pub update: Predicate,
}

impl GlobalAccess {
    pub fn predicate(&self, operation: Operation) -> Option<Predicate> {
        match operation {
            Operation::Read => Some(self.read),
            Operation::Update => Some(self.update),
            Operation::Create | Operation::Delete => None,
        }
    }

    /// `None` for operations a global does not support.
    pub fn decide(
        &self,
        operation: Operation,
        ctx: &AccessContext,
        hierarchy: &RoleHierarchy,
    ) -> Option<AccessDecision> {
        self.predicate(operation)
            .map(|predicate| predicate.evaluate(ctx, hierarchy))
    }
}
