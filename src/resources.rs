//! Resource Keys
//!
//! Well-known cache keys and the ttl each resource is cached for.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Page size used when a notifications key is built without one.
pub const DEFAULT_NOTIFICATION_LIMIT: u32 = 20;

/// Role a user holds in a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Student,
    Teacher,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Student => "student",
            MemberRole::Teacher => "teacher",
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    UserClasses { user_id: String, role: MemberRole },
    ClassActivities { class_id: String },
    ActivityDetails { activity_id: String },
    UserPermissions { user_id: String },
    Notifications { user_id: String, limit: u32 },
}

impl ResourceKey {
    pub fn user_classes(user_id: impl Into<String>, role: MemberRole) -> Self {
        ResourceKey::UserClasses {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn class_activities(class_id: impl Into<String>) -> Self {
        ResourceKey::ClassActivities {
            class_id: class_id.into(),
        }
    }

    pub fn activity_details(activity_id: impl Into<String>) -> Self {
        ResourceKey::ActivityDetails {
            activity_id: activity_id.into(),
        }
    }

    pub fn user_permissions(user_id: impl Into<String>) -> Self {
        ResourceKey::UserPermissions {
            user_id: user_id.into(),
        }
    }

    /// Latest notifications for a user, [`DEFAULT_NOTIFICATION_LIMIT`] of them.
    pub fn notifications(user_id: impl Into<String>) -> Self {
        Self::notifications_page(user_id, DEFAULT_NOTIFICATION_LIMIT)
    }

    /// Latest `limit` notifications for a user. Each limit is cached apart.
    pub fn notifications_page(user_id: impl Into<String>, limit: u32) -> Self {
        ResourceKey::Notifications {
            user_id: user_id.into(),
            limit,
        }
    }

    /// The store key.
    pub fn cache_key(&self) -> String {
        self.to_string()
    }

    /// Seconds this resource stays servable.
    pub fn default_ttl(&self) -> u64 {
        match self {
            ResourceKey::UserClasses { .. } => 600,
            ResourceKey::ClassActivities { .. } => 300,
            ResourceKey::ActivityDetails { .. } => 900,
            ResourceKey::UserPermissions { .. } => 3600,
            ResourceKey::Notifications { .. } => 300,
        }
    }

    /// Glob matching every role's class list for `user_id`.
    pub fn all_user_classes(user_id: &str) -> String {
        format!("user:classes:{}:*", user_id)
    }

    /// Glob matching every cached notifications page for `user_id`.
    pub fn all_notifications(user_id: &str) -> String {
        format!("notifications:{}:*", user_id)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::UserClasses { user_id, role } => {
                write!(f, "user:classes:{}:{}", user_id, role)
            }
            ResourceKey::ClassActivities { class_id } => write!(f, "class:activities:{}", class_id),
            ResourceKey::ActivityDetails { activity_id } => {
                write!(f, "activity:details:{}", activity_id)
            }
            ResourceKey::UserPermissions { user_id } => write!(f, "user_permissions:{}", user_id),
            ResourceKey::Notifications { user_id, limit } => {
                write!(f, "notifications:{}:{}", user_id, limit)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::glob_to_regex;

    #[test]
    fn test_key_formats() {
        assert_eq!(
            ResourceKey::user_classes("42", MemberRole::Teacher).cache_key(),
            "user:classes:42:teacher"
        );
        assert_eq!(ResourceKey::class_activities("7").cache_key(), "class:activities:7");
        assert_eq!(ResourceKey::activity_details("a1").cache_key(), "activity:details:a1");
        assert_eq!(ResourceKey::user_permissions("42").cache_key(), "user_permissions:42");
        assert_eq!(ResourceKey::notifications("42").cache_key(), "notifications:42:20");
        assert_eq!(
            ResourceKey::notifications_page("42", 50).cache_key(),
            "notifications:42:50"
        );
    }

    #[test]
    fn test_default_ttls() {
        assert_eq!(ResourceKey::user_classes("1", MemberRole::Student).default_ttl(), 600);
        assert_eq!(ResourceKey::class_activities("1").default_ttl(), 300);
        assert_eq!(ResourceKey::activity_details("1").default_ttl(), 900);
        assert_eq!(ResourceKey::user_permissions("1").default_ttl(), 3600);
        assert_eq!(ResourceKey::notifications("1").default_ttl(), 300);
    }

    #[test]
    fn test_user_classes_glob() {
        let re = glob_to_regex(&ResourceKey::all_user_classes("42")).unwrap();
        assert!(re.is_match(&ResourceKey::user_classes("42", MemberRole::Student).cache_key()));
        assert!(re.is_match(&ResourceKey::user_classes("42", MemberRole::Teacher).cache_key()));
        assert!(!re.is_match(&ResourceKey::user_classes("420", MemberRole::Student).cache_key()));
    }

    #[test]
    fn test_notifications_glob_covers_every_page() {
        let re = glob_to_regex(&ResourceKey::all_notifications("42")).unwrap();
        assert!(re.is_match(&ResourceKey::notifications("42").cache_key()));
        assert!(re.is_match(&ResourceKey::notifications_page("42", 5).cache_key()));
        assert!(!re.is_match(&ResourceKey::notifications("7").cache_key()));
    }

    #[test]
    fn test_role_serde() {
        assert_eq!(serde_json::to_string(&MemberRole::Student).unwrap(), "\"student\"");
        let role: MemberRole = serde_json::from_str("\"teacher\"").unwrap();
        assert_eq!(role, MemberRole::Teacher);
    }
}
