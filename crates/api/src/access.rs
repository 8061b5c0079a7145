//! Access decisions
//!
//! Pure functions deciding who may register, which observation sessions a
//! user can see, and where a user's organization comes from. Handlers run the
//! queries; these functions only decide.

use mcd_shared::Role;

use crate::error::ApiError;
use crate::models::{InviteRow, UserRow};

pub const INVITE_REQUIRED: &str =
    "Registration requires an invite. Please contact a Coach Developer.";

/// Role granted to a new account
///
/// The very first account becomes a coach developer; everyone after that
/// needs an unused invite and takes its role.
pub fn registration_grant(user_count: i64, invite: Option<&InviteRow>) -> Result<Role, ApiError> {
    if user_count == 0 {
        return Ok(Role::CoachDeveloper);
    }
    match invite {
        Some(invite) if !invite.used => Ok(invite.role()),
        _ => Err(ApiError::Forbidden(INVITE_REQUIRED.to_string())),
    }
}

/// Which observation sessions a user may see
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionScope {
    /// Sessions about this coach profile
    ByCoach(String),
    /// Sessions this user observed
    ByObserver(String),
}

impl SessionScope {
    pub fn column(&self) -> &'static str {
        match self {
            SessionScope::ByCoach(_) => "coach_id",
            SessionScope::ByObserver(_) => "observer_id",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            SessionScope::ByCoach(id) | SessionScope::ByObserver(id) => id,
        }
    }
}

pub fn session_scope(user: &UserRow) -> Result<SessionScope, ApiError> {
    match user.role() {
        Role::Coach => user
            .linked_coach_id
            .clone()
            .map(SessionScope::ByCoach)
            .ok_or_else(|| ApiError::Forbidden("No coach profile linked".to_string())),
        Role::CoachDeveloper | Role::Admin => Ok(SessionScope::ByObserver(user.user_id.clone())),
    }
}

/// Staff can view any coach profile; coaches only their own
pub fn can_view_coach(user: &UserRow, coach_id: &str) -> bool {
    user.role().is_staff() || user.linked_coach_id.as_deref() == Some(coach_id)
}

/// One way of finding a user's organization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrgLookup {
    /// `users.organization_id`
    Direct(String),
    /// Organization owned by the user, created when missing
    Owned(String),
    /// `organization_id` on the linked coach profile, then the org owned by
    /// the profile's creator
    ViaCoachProfile(String),
}

/// Strategies for `GET /organization`, tried in order until one finds an org
pub fn organization_lookup_order(user: &UserRow) -> Vec<OrgLookup> {
    let mut order = Vec::with_capacity(3);
    if let Some(org_id) = &user.organization_id {
        order.push(OrgLookup::Direct(org_id.clone()));
    }
    if user.role() == Role::CoachDeveloper {
        order.push(OrgLookup::Owned(user.user_id.clone()));
    }
    if let Some(coach_id) = &user.linked_coach_id {
        order.push(OrgLookup::ViaCoachProfile(coach_id.clone()));
    }
    order
}

/// Where an invited account's organization comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviterOrg {
    /// Known organization id
    Org(String),
    /// Whatever organization the inviter owns
    OwnedBy(String),
    None,
}

/// Admin inviters place the account in the invite's organization (if any);
/// others share their own organization or the one they own.
pub fn inviter_organization(inviter: Option<&UserRow>, invite: &InviteRow) -> InviterOrg {
    let Some(inviter) = inviter else {
        return invite
            .organization_id
            .clone()
            .map(InviterOrg::Org)
            .unwrap_or(InviterOrg::None);
    };

    if inviter.role() == Role::Admin {
        return invite
            .organization_id
            .clone()
            .map(InviterOrg::Org)
            .unwrap_or(InviterOrg::None);
    }

    match &inviter.organization_id {
        Some(org_id) => InviterOrg::Org(org_id.clone()),
        None => InviterOrg::OwnedBy(inviter.user_id.clone()),
    }
}

/// Roles a coach developer may hand out through `PUT /users/{id}/role`
pub fn assignable_role(new_role: &str) -> Result<Role, ApiError> {
    match new_role.parse::<Role>() {
        Ok(role @ (Role::CoachDeveloper | Role::Coach)) => Ok(role),
        _ => Err(ApiError::BadRequest("Invalid role".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn user(role: Role) -> UserRow {
        UserRow {
            user_id: "user_a".to_string(),
            email: "a@example.com".to_string(),
            name: "A".to_string(),
            picture: None,
            role: role.as_str().to_string(),
            linked_coach_id: None,
            organization_id: None,
            password_hash: None,
            auth_provider: "email".to_string(),
            marketing_opt_in: false,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn invite(role: Role, org: Option<&str>) -> InviteRow {
        InviteRow {
            invite_id: "inv_1".to_string(),
            email: "b@example.com".to_string(),
            role: role.as_str().to_string(),
            coach_id: None,
            organization_id: org.map(String::from),
            invited_by: "user_a".to_string(),
            used: false,
            used_at: None,
            email_sent: None,
            email_error: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn test_first_user_is_coach_developer() {
        assert_eq!(registration_grant(0, None).unwrap(), Role::CoachDeveloper);
        let coach_invite = invite(Role::Coach, None);
        assert_eq!(
            registration_grant(0, Some(&coach_invite)).unwrap(),
            Role::CoachDeveloper
        );
    }

    #[test]
    fn test_invite_grants_its_role() {
        let inv = invite(Role::Coach, None);
        assert_eq!(registration_grant(3, Some(&inv)).unwrap(), Role::Coach);
    }

    #[test]
    fn test_registration_without_invite_forbidden() {
        let err = registration_grant(3, None).unwrap_err();
        assert_eq!(err.to_string(), INVITE_REQUIRED);

        let mut used = invite(Role::Coach, None);
        used.used = true;
        assert!(registration_grant(3, Some(&used)).is_err());
    }

    #[test]
    fn test_session_scope() {
        let staff = user(Role::CoachDeveloper);
        assert_eq!(
            session_scope(&staff).unwrap(),
            SessionScope::ByObserver("user_a".to_string())
        );

        let mut coach = user(Role::Coach);
        assert_eq!(
            session_scope(&coach).unwrap_err().to_string(),
            "No coach profile linked"
        );
        coach.linked_coach_id = Some("coach_1".to_string());
        let scope = session_scope(&coach).unwrap();
        assert_eq!(scope.column(), "coach_id");
        assert_eq!(scope.value(), "coach_1");
    }

    #[test]
    fn test_can_view_coach() {
        assert!(can_view_coach(&user(Role::Admin), "coach_x"));
        let mut coach = user(Role::Coach);
        coach.linked_coach_id = Some("coach_1".to_string());
        assert!(can_view_coach(&coach, "coach_1"));
        assert!(!can_view_coach(&coach, "coach_2"));
    }

    #[test]
    fn test_lookup_order_for_coach_developer() {
        let mut dev = user(Role::CoachDeveloper);
        dev.organization_id = Some("org_1".to_string());
        assert_eq!(
            organization_lookup_order(&dev),
            vec![
                OrgLookup::Direct("org_1".to_string()),
                OrgLookup::Owned("user_a".to_string())
            ]
        );
    }

    #[test]
    fn test_lookup_order_for_coach() {
        let mut coach = user(Role::Coach);
        coach.linked_coach_id = Some("coach_1".to_string());
        assert_eq!(
            organization_lookup_order(&coach),
            vec![OrgLookup::ViaCoachProfile("coach_1".to_string())]
        );
        assert!(organization_lookup_order(&user(Role::Admin)).is_empty());
    }

    #[test]
    fn test_inviter_organization() {
        let inv = invite(Role::Coach, Some("org_invite"));

        let admin = user(Role::Admin);
        assert_eq!(
            inviter_organization(Some(&admin), &inv),
            InviterOrg::Org("org_invite".to_string())
        );

        let mut dev = user(Role::CoachDeveloper);
        assert_eq!(
            inviter_organization(Some(&dev), &inv),
            InviterOrg::OwnedBy("user_a".to_string())
        );
        dev.organization_id = Some("org_dev".to_string());
        assert_eq!(
            inviter_organization(Some(&dev), &inv),
            InviterOrg::Org("org_dev".to_string())
        );

        assert_eq!(
            inviter_organization(None, &invite(Role::Coach, None)),
            InviterOrg::None
        );
    }

    #[test]
    fn test_assignable_role() {
        assert_eq!(assignable_role("coach").unwrap(), Role::Coach);
        assert_eq!(
            assignable_role("coach_developer").unwrap(),
            Role::CoachDeveloper
        );
        assert!(assignable_role("admin").is_err());
        assert!(assignable_role("owner").is_err());
    }
}
