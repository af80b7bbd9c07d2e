use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    preview::DraftMode,
    query::Where,
    roles::{Role, RoleHierarchy},
};

/// AccessUser
///
/// The only part of an identity the access layer looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUser {
    pub id: Uuid,
    /// `None` means no elevated privilege at all.
    pub role: Option<Role>,
}

/// AccessContext
///
/// Per-request input to every predicate: who is calling, and whether this request
/// carries an active draft session. Built fresh for each request, never shared.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccessContext {
    pub user: Option<AccessUser>,
    pub draft: DraftMode,
}

impl AccessContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_user(id: Uuid, role: Option<Role>) -> Self {
        Self {
            user: Some(AccessUser { id, role }),
            draft: DraftMode::Disabled,
        }
    }

    pub fn with_draft(mut self, draft: DraftMode) -> Self {
        self.draft = draft;
        self
    }

    fn has_role_or_above(&self, required: Role, hierarchy: &RoleHierarchy) -> bool {
        self.user
            .as_ref()
            .and_then(|user| user.role)
            .is_some_and(|role| hierarchy.has_role_or_above(role, required))
    }
}

/// AccessDecision
///
/// Either an unconditional answer or a filter the caller must AND into its query.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessDecision {
    Allow,
    Deny,
    Filter(Where),
}

impl AccessDecision {
    /// Whether a concrete, serialized document passes this decision.
    pub fn permits(&self, document: &Value) -> bool {
        match self {
            AccessDecision::Allow => true,
            AccessDecision::Deny => false,
            AccessDecision::Filter(filter) => filter.matches(document),
        }
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, AccessDecision::Deny)
    }
}

/// Predicate
///
/// The closed set of authorization rules a collection operation can be guarded by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    /// Public: no user required.
    AllowAll,
    DenyAll,
    /// Any authenticated user, role-agnostic.
    LoggedIn,
    RequireRole(Role),
    /// Users meeting the role act on anything, everyone else only on the record
    /// whose `id` is their own.
    RequireSelfOrRole(Role),
    /// Authenticated callers and draft sessions see everything; anonymous callers
    /// only see published documents or documents without a status.
    PublishedOrLoggedIn,
}

impl Predicate {
    pub fn evaluate(&self, ctx: &AccessContext, hierarchy: &RoleHierarchy) -> AccessDecision {
        match self {
            Predicate::AllowAll => AccessDecision::Allow,
            Predicate::DenyAll => AccessDecision::Deny,
            Predicate::LoggedIn => allow_if(ctx.user.is_some()),
            Predicate::RequireRole(required) => {
                allow_if(ctx.has_role_or_above(*required, hierarchy))
            }
            Predicate::RequireSelfOrRole(required) => match &ctx.user {
                None => AccessDecision::Deny,
                Some(_) if ctx.has_role_or_above(*required, hierarchy) => AccessDecision::Allow,
                Some(user) => AccessDecision::Filter(Where::equals("id", user.id.to_string())),
            },
            Predicate::PublishedOrLoggedIn => {
                if ctx.user.is_some() || ctx.draft.is_enabled() {
                    AccessDecision::Allow
                } else {
                    AccessDecision::Filter(published_or_unversioned())
                }
            }
        }
    }
}

/// `_status == "published" OR _status is absent`. Documents created before drafts
/// were enabled have no status and stay public.
pub fn published_or_unversioned() -> Where {
    Where::any(vec![
        Where::equals("_status", "published"),
        Where::exists("_status", false),
    ])
}

fn allow_if(condition: bool) -> AccessDecision {
    if condition {
        AccessDecision::Allow
    } else {
        AccessDecision::Deny
    }
}

/// FieldOperation
///
/// Field-level rules only guard writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOperation {
    Create,
    Update,
}

/// FieldPredicate
///
/// Restricts who may set a single sensitive field, independent of document access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPredicate {
    RequireRole(Role),
}

impl FieldPredicate {
    pub fn evaluate(&self, ctx: &AccessContext, hierarchy: &RoleHierarchy) -> bool {
        match self {
            FieldPredicate::RequireRole(required) => ctx.has_role_or_above(*required, hierarchy),
        }
    }
}

/// Permission
///
/// Wire form of an `AccessDecision`, as reported by the access endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Permission {
    pub permission: bool,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub filter: Option<Where>,
}

impl From<AccessDecision> for Permission {
    fn from(decision: AccessDecision) -> Self {
        match decision {
            AccessDecision::Allow => Permission {
                permission: true,
                filter: None,
            },
            AccessDecision::Deny => Permission {
                permission: false,
                filter: None,
            },
            AccessDecision::Filter(filter) => Permission {
                permission: true,
                filter: Some(filter),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(role: Option<Role>) -> AccessContext {
        AccessContext::for_user(Uuid::from_u128(1), role)
    }

    #[test]
    fn require_role_respects_the_hierarchy() {
        let h = RoleHierarchy::default();
        let editor = Predicate::RequireRole(Role::Editor);
        assert_eq!(editor.evaluate(&user(Some(Role::Contributor)), &h), AccessDecision::Deny);
        assert_eq!(editor.evaluate(&user(Some(Role::Admin)), &h), AccessDecision::Allow);
        assert_eq!(editor.evaluate(&user(Some(Role::Editor)), &h), AccessDecision::Allow);
        assert_eq!(editor.evaluate(&AccessContext::anonymous(), &h), AccessDecision::Deny);
        assert_eq!(editor.evaluate(&user(None), &h), AccessDecision::Deny);
    }

    #[test]
    fn logged_in_ignores_role() {
        let h = RoleHierarchy::default();
        assert_eq!(Predicate::LoggedIn.evaluate(&user(None), &h), AccessDecision::Allow);
        assert_eq!(
            Predicate::LoggedIn.evaluate(&AccessContext::anonymous(), &h),
            AccessDecision::Deny
        );
        assert_eq!(
            Predicate::AllowAll.evaluate(&AccessContext::anonymous(), &h),
            AccessDecision::Allow
        );
    }

    #[test]
    fn anonymous_readers_only_see_published_or_unversioned_documents() {
        let h = RoleHierarchy::default();
        let decision = Predicate::PublishedOrLoggedIn.evaluate(&AccessContext::anonymous(), &h);
        assert!(!decision.permits(&json!({"id": "p1", "_status": "draft"})));
        assert!(decision.permits(&json!({"id": "p1", "_status": "published"})));
        assert!(decision.permits(&json!({"id": "p1"})));
    }

    #[test]
    fn any_authenticated_user_sees_drafts() {
        let h = RoleHierarchy::default();
        for role in [None, Some(Role::Reader), Some(Role::Admin)] {
            assert_eq!(
                Predicate::PublishedOrLoggedIn.evaluate(&user(role), &h),
                AccessDecision::Allow
            );
        }
    }

    #[test]
    fn draft_session_bypasses_the_publication_gate() {
        let h = RoleHierarchy::default();
        let ctx = AccessContext::anonymous().with_draft(DraftMode::Enabled);
        assert_eq!(
            Predicate::PublishedOrLoggedIn.evaluate(&ctx, &h),
            AccessDecision::Allow
        );
    }

    #[test]
    fn self_or_admin_filters_non_admins_to_their_own_record() {
        let h = RoleHierarchy::default();
        let u1 = Uuid::from_u128(1);
        let u2 = Uuid::from_u128(2);
        let predicate = Predicate::RequireSelfOrRole(Role::Admin);

        let reader = predicate.evaluate(&AccessContext::for_user(u1, Some(Role::Reader)), &h);
        assert!(reader.permits(&json!({"id": u1.to_string()})));
        assert!(!reader.permits(&json!({"id": u2.to_string()})));

        let admin = predicate.evaluate(&AccessContext::for_user(u1, Some(Role::Admin)), &h);
        assert_eq!(admin, AccessDecision::Allow);

        assert!(predicate.evaluate(&AccessContext::anonymous(), &h).is_denied());
    }

    #[test]
    fn field_rule_requires_role() {
        let h = RoleHierarchy::default();
        let admin_only = FieldPredicate::RequireRole(Role::Admin);
        assert!(admin_only.evaluate(&user(Some(Role::Admin)), &h));
        assert!(!admin_only.evaluate(&user(Some(Role::Editor)), &h));
        assert!(!admin_only.evaluate(&AccessContext::anonymous(), &h));
    }

    #[test]
    fn permission_wire_shape() {
        let filtered = Permission::from(AccessDecision::Filter(Where::equals("id", "u1")));
        assert_eq!(
            serde_json::to_value(filtered).unwrap(),
            json!({"permission": true, "where": {"id": {"equals": "u1"}}})
        );
        assert_eq!(
            serde_json::to_value(Permission::from(AccessDecision::Deny)).unwrap(),
            json!({"permission": false})
        );
    }
}
