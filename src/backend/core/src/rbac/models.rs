//! RBAC data models: subjects, permissions, policy rules and role edges.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{AuthzError, Result};

/// Reserved value matching any resource or action.
pub const WILDCARD: &str = "*";

/// Tag prefix of a user subject, e.g. `u:42`.
pub const USER_TAG: &str = "u:";

/// Tag prefix of a role subject, e.g. `r:admin`.
pub const ROLE_TAG: &str = "r:";

/// Name of the role whose members bypass per-resource checks.
pub const ADMIN_ROLE: &str = "admin";

// ═══════════════════════════════════════════════════════════════════════════════
// Subject
// ═══════════════════════════════════════════════════════════════════════════════

/// The entity whose permissions are evaluated: a user or a role.
///
/// Persisted and exchanged as a tagged string (`u:42`, `r:content_manager`);
/// the tag decides the variant, never the content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subject {
    User(u64),
    Role(String),
}

impl Subject {
    pub fn user(id: u64) -> Self {
        Self::User(id)
    }

    /// Create a role subject. The name is checked by [`Subject::validate`]
    /// when the subject enters the engine.
    pub fn role(name: impl Into<String>) -> Self {
        Self::Role(name.into())
    }

    pub fn admin() -> Self {
        Self::Role(ADMIN_ROLE.to_string())
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User(_))
    }

    /// Role name, if this is a role subject.
    pub fn role_name(&self) -> Option<&str> {
        match self {
            Self::Role(name) => Some(name),
            Self::User(_) => None,
        }
    }

    /// Check the subject is well formed.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::User(_) => Ok(()),
            Self::Role(name) => validate_role_name(name),
        }
    }

    /// Parse a tagged subject string. The tag is required.
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(id) = s.strip_prefix(USER_TAG) {
            let id = id.parse::<u64>().map_err(|_| {
                AuthzError::invalid_subject(format!("User subject must be numeric: {}", s))
            })?;
            Ok(Self::User(id))
        } else if let Some(name) = s.strip_prefix(ROLE_TAG) {
            validate_role_name(name)?;
            Ok(Self::Role(name.to_string()))
        } else {
            Err(AuthzError::invalid_subject(format!(
                "Subject must start with '{}' or '{}': {}",
                USER_TAG, ROLE_TAG, s
            )))
        }
    }

    /// Compatibility helper for callers that hold bare identifiers.
    ///
    /// A present tag is honoured; otherwise an all-digit value is a user id
    /// and anything else is a role name.
    pub fn infer(s: &str) -> Result<Self> {
        if s.starts_with(USER_TAG) || s.starts_with(ROLE_TAG) {
            return Self::parse(s);
        }
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            let id = s
                .parse::<u64>()
                .map_err(|_| AuthzError::invalid_subject(format!("User id out of range: {}", s)))?;
            return Ok(Self::User(id));
        }
        validate_role_name(s)?;
        Ok(Self::Role(s.to_string()))
    }
}

fn validate_role_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AuthzError::invalid_subject("Role name must not be empty"));
    }
    if name == WILDCARD || name.chars().any(|c| c.is_whitespace() || c == ':') {
        return Err(AuthzError::invalid_subject(format!(
            "Invalid role name: {:?}",
            name
        )));
    }
    Ok(())
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "{}{}", USER_TAG, id),
            Self::Role(name) => write!(f, "{}{}", ROLE_TAG, name),
        }
    }
}

impl FromStr for Subject {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Subject {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Subject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Subject::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Permission
// ═══════════════════════════════════════════════════════════════════════════════

/// An action on a resource, e.g. `course:read`.
///
/// Either side may be [`WILDCARD`] when the permission is granted by a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Permission {
    pub resource: String,
    pub action: String,
}

impl Permission {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// Parse a permission from a colon-separated string like `"course:read"`.
    pub fn parse(s: &str) -> Option<Self> {
        let (resource, action) = s.split_once(':')?;
        if resource.is_empty() || action.is_empty() {
            return None;
        }
        Some(Self::new(resource, action))
    }

    pub fn validate(&self) -> Result<()> {
        if self.resource.is_empty() || self.action.is_empty() {
            return Err(AuthzError::invalid_policy(format!(
                "Resource and action must be non-empty: {:?}",
                self
            )));
        }
        Ok(())
    }

    /// Whether this granted permission covers a concrete request.
    ///
    /// Only the granted side honours the wildcard.
    pub fn grants(&self, resource: &str, action: &str) -> bool {
        let resource_match = self.resource == WILDCARD || self.resource == resource;
        let action_match = self.action == WILDCARD || self.action == action;
        resource_match && action_match
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Policy rule and role edge
// ═══════════════════════════════════════════════════════════════════════════════

/// A granted `(subject, resource, action)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyRule {
    pub subject: Subject,
    pub resource: String,
    pub action: String,
}

impl PolicyRule {
    pub fn new(subject: Subject, resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            subject,
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// Build a rule from its three string fields, parsing the tagged subject.
    pub fn parse(subject: &str, resource: &str, action: &str) -> Result<Self> {
        let rule = Self::new(Subject::parse(subject)?, resource, action);
        rule.validate()?;
        Ok(rule)
    }

    pub fn permission(&self) -> Permission {
        Permission::new(&self.resource, &self.action)
    }

    pub fn validate(&self) -> Result<()> {
        self.subject.validate()?;
        self.permission().validate()
    }

    /// The rule as the `[subject, resource, action]` string triple.
    pub fn to_triple(&self) -> [String; 3] {
        [
            self.subject.to_string(),
            self.resource.clone(),
            self.action.clone(),
        ]
    }
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.subject, self.resource, self.action)
    }
}

/// `child` inherits every permission granted to `parent`.
///
/// With a user child this is a role assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleEdge {
    pub child: Subject,
    pub parent: Subject,
}

impl RoleEdge {
    pub fn new(child: Subject, parent: Subject) -> Self {
        Self { child, parent }
    }

    pub fn assignment(user_id: u64, role: impl Into<String>) -> Self {
        Self::new(Subject::User(user_id), Subject::Role(role.into()))
    }

    pub fn is_assignment(&self) -> bool {
        self.child.is_user()
    }

    pub fn validate(&self) -> Result<()> {
        self.child.validate()?;
        self.parent.validate()?;
        if self.parent.is_user() {
            return Err(AuthzError::invalid_policy(format!(
                "Cannot inherit from a user subject: {}",
                self.parent
            )));
        }
        if self.child == self.parent {
            return Err(AuthzError::invalid_policy(format!(
                "A subject cannot inherit from itself: {}",
                self.child
            )));
        }
        Ok(())
    }
}

impl fmt::Display for RoleEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.child, self.parent)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_subject_parse_and_display() {
        assert_eq!(Subject::parse("u:42").unwrap(), Subject::User(42));
        assert_eq!(
            Subject::parse("r:content_manager").unwrap(),
            Subject::role("content_manager")
        );
        assert_eq!(Subject::User(7).to_string(), "u:7");
        assert_eq!(Subject::admin().to_string(), "r:admin");
    }

    #[test]
    fn test_subject_parse_rejects_untagged_and_malformed() {
        for raw in ["42", "admin", "u:abc", "u:", "r:", "r:a b", "x:1", ""] {
            let err = Subject::parse(raw).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidSubject, "{raw}");
        }
    }

    #[test]
    fn test_subject_tag_is_authoritative() {
        // A numeric role name is still a role.
        assert_eq!(Subject::parse("r:123").unwrap(), Subject::role("123"));
    }

    #[test]
    fn test_subject_kind_accessors() {
        let user = Subject::User(3);
        let role = Subject::role("user");
        assert!(user.is_user() && user.role_name().is_none());
        assert!(!role.is_user());
        assert_eq!(role.role_name(), Some("user"));
    }

    #[test]
    fn test_subject_infer() {
        assert_eq!(Subject::infer("42").unwrap(), Subject::User(42));
        assert_eq!(Subject::infer("teacher").unwrap(), Subject::role("teacher"));
        assert_eq!(Subject::infer("r:7").unwrap(), Subject::role("7"));
        assert!(Subject::infer("").is_err());
    }

    #[test]
    fn test_subject_serde_uses_tagged_form() {
        let json = serde_json::to_string(&Subject::User(3)).unwrap();
        assert_eq!(json, "\"u:3\"");
        let back: Subject = serde_json::from_str("\"r:user\"").unwrap();
        assert_eq!(back, Subject::role("user"));
        assert!(serde_json::from_str::<Subject>("\"user\"").is_err());
    }

    #[test]
    fn test_permission_parse() {
        let perm = Permission::parse("course:read").unwrap();
        assert_eq!(perm.resource, "course");
        assert_eq!(perm.action, "read");
        assert_eq!(perm.to_string(), "course:read");

        assert!(Permission::parse("invalid").is_none());
        assert!(Permission::parse(":read").is_none());
    }

    #[test]
    fn test_permission_grants_wildcards() {
        assert!(Permission::new("*", "read").grants("anything", "read"));
        assert!(!Permission::new("*", "read").grants("anything", "write"));
        assert!(Permission::new("course", "*").grants("course", "delete"));
        assert!(!Permission::new("course", "*").grants("word", "delete"));
        assert!(Permission::new("*", "*").grants("x", "y"));
    }

    #[test]
    fn test_permission_request_wildcard_is_literal() {
        // A request for "*" is only matched by a rule that grants "*".
        assert!(!Permission::new("course", "read").grants("*", "read"));
    }

    #[test]
    fn test_policy_rule_validation() {
        assert!(PolicyRule::parse("r:user", "course", "read").is_ok());
        let err = PolicyRule::parse("r:user", "", "read").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidPolicy);
        assert!(PolicyRule::parse("user", "course", "read").is_err());
    }

    #[test]
    fn test_role_edge_validation() {
        assert!(RoleEdge::assignment(1, "user").validate().is_ok());
        assert!(RoleEdge::new(Subject::role("a"), Subject::role("a"))
            .validate()
            .is_err());
        assert!(RoleEdge::new(Subject::role("a"), Subject::User(1))
            .validate()
            .is_err());
        assert!(RoleEdge::assignment(9, "admin").is_assignment());
    }
}
