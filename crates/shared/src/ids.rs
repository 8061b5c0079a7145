//! Prefixed record identifiers
//!
//! Records are keyed by short opaque strings such as `user_1a2b3c4d5e6f`.
//! The prefix tells operators which table an id belongs to when it shows up
//! in logs or support tickets.

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPrefix {
    User,
    Coach,
    Invite,
    Organization,
    Template,
    SessionPart,
    Schedule,
    Reflection,
    File,
}

impl IdPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdPrefix::User => "user",
            IdPrefix::Coach => "coach",
            IdPrefix::Invite => "inv",
            IdPrefix::Organization => "org",
            IdPrefix::Template => "tmpl",
            IdPrefix::SessionPart => "part",
            IdPrefix::Schedule => "sched",
            IdPrefix::Reflection => "refl",
            IdPrefix::File => "file",
        }
    }
}

/// Generate a new id: prefix, underscore, 12 lowercase hex chars
pub fn new_id(prefix: IdPrefix) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix.as_str(), &hex[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id_shape() {
        let id = new_id(IdPrefix::Coach);
        let (prefix, rest) = id.split_once('_').unwrap();
        assert_eq!(prefix, "coach");
        assert_eq!(rest.len(), 12);
        assert!(rest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_new_id_is_unique() {
        assert_ne!(new_id(IdPrefix::User), new_id(IdPrefix::User));
    }

    #[test]
    fn test_invite_prefix() {
        assert!(new_id(IdPrefix::Invite).starts_with("inv_"));
    }
}
