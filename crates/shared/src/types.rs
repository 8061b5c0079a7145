//! Domain vocabulary shared across crates

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SharedError;

/// Account role. Stored as a lowercase string in `users.role` and `invites.role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    CoachDeveloper,
    #[default]
    Coach,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::CoachDeveloper => "coach_developer",
            Role::Coach => "coach",
        }
    }

    /// Admins and coach developers manage coaches and observations
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::CoachDeveloper)
    }

    /// Label used in invite emails
    pub fn display_name(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::CoachDeveloper => "Coach Developer",
            Role::Coach => "Coach",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "coach_developer" => Ok(Role::CoachDeveloper),
            "coach" => Ok(Role::Coach),
            other => Err(SharedError::UnknownRole(other.to_string())),
        }
    }
}

/// Seat limits attached to a subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanLimits {
    pub coaches: i64,
    pub admins: i64,
}

/// Limits reported for organizations on the bootstrap allow-list
pub const UNLIMITED_LIMITS: PlanLimits = PlanLimits {
    coaches: 999,
    admins: 999,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    #[default]
    Individual,
    Club,
    Academy,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Individual => "individual",
            SubscriptionTier::Club => "club",
            SubscriptionTier::Academy => "academy",
        }
    }

    pub fn limits(&self) -> PlanLimits {
        match self {
            SubscriptionTier::Individual => PlanLimits {
                coaches: 5,
                admins: 1,
            },
            SubscriptionTier::Club => PlanLimits {
                coaches: 50,
                admins: 10,
            },
            SubscriptionTier::Academy => UNLIMITED_LIMITS,
        }
    }

    /// Whether a higher paid tier exists
    pub fn can_upgrade(&self) -> bool {
        !matches!(self, SubscriptionTier::Academy)
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "individual" => Ok(SubscriptionTier::Individual),
            "club" => Ok(SubscriptionTier::Club),
            "academy" => Ok(SubscriptionTier::Academy),
            other => Err(SharedError::UnknownTier(other.to_string())),
        }
    }
}

/// Lifecycle of an observation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Draft,
    Planned,
    Active,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Draft => "draft",
            SessionStatus::Planned => "planned",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(SessionStatus::Draft),
            "planned" => Ok(SessionStatus::Planned),
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(SharedError::UnknownStatus(other.to_string())),
        }
    }
}

/// Audience of a reflection template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateRole {
    CoachEducator,
    Coach,
}

impl TemplateRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateRole::CoachEducator => "coach_educator",
            TemplateRole::Coach => "coach",
        }
    }
}

impl FromStr for TemplateRole {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coach_educator" => Ok(TemplateRole::CoachEducator),
            "coach" => Ok(TemplateRole::Coach),
            other => Err(SharedError::Validation(format!(
                "target_role must be 'coach_educator' or 'coach', got '{}'",
                other
            ))),
        }
    }
}

/// Built-in session parts, seeded by the initial migration
pub const DEFAULT_SESSION_PARTS: &[(&str, &str)] = &[
    ("default_technique", "Develop The Technique"),
    ("default_game_model", "Develop The Game Model"),
    ("default_performance", "Develop Performance"),
    ("default_mentality", "Develop Mentality"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_str() {
        for role in [Role::Admin, Role::CoachDeveloper, Role::Coach] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn test_unknown_role_rejected() {
        assert!("owner".parse::<Role>().is_err());
        assert!("".parse::<Role>().is_err());
    }

    #[test]
    fn test_staff_roles() {
        assert!(Role::Admin.is_staff());
        assert!(Role::CoachDeveloper.is_staff());
        assert!(!Role::Coach.is_staff());
    }

    #[test]
    fn test_role_serde_uses_snake_case() {
        let json = serde_json::to_string(&Role::CoachDeveloper).unwrap();
        assert_eq!(json, "\"coach_developer\"");
    }

    #[test]
    fn test_individual_tier_limits() {
        let limits = SubscriptionTier::Individual.limits();
        assert_eq!(limits.coaches, 5);
        assert_eq!(limits.admins, 1);
    }

    #[test]
    fn test_academy_cannot_upgrade() {
        assert!(SubscriptionTier::Individual.can_upgrade());
        assert!(SubscriptionTier::Club.can_upgrade());
        assert!(!SubscriptionTier::Academy.can_upgrade());
    }

    #[test]
    fn test_default_session_parts() {
        assert_eq!(DEFAULT_SESSION_PARTS.len(), 4);
        assert!(DEFAULT_SESSION_PARTS
            .iter()
            .all(|(id, _)| id.starts_with("default_")));
    }

    #[test]
    fn test_template_role_error_message() {
        let err = "player".parse::<TemplateRole>().unwrap_err();
        assert!(err.to_string().contains("coach_educator"));
    }
}
