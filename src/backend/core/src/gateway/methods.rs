//! Operation → permission table and whitelist.
//!
//! Operation identifiers are gRPC paths (`/wordhoard.v1.CourseService/GetCourse`).
//! An entry ending in `/*` covers every method of a service; exact entries
//! take precedence over it.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::Result;
use crate::rbac::Permission;

/// What the gateway must do for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodRequirement<'a> {
    /// Exempt from all checks.
    Whitelisted,
    /// Caller needs this permission.
    Requires(&'a Permission),
    /// Neither whitelisted nor mapped.
    Unmapped,
}

/// Static mapping from operation identifier to required permission.
///
/// Filled once at startup, then shared read-only.
#[derive(Debug, Clone, Default)]
pub struct MethodPermissionMap {
    methods: HashMap<String, Permission>,
    whitelist: HashSet<String>,
}

impl MethodPermissionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The wordhoard RPC surface.
    pub fn with_defaults() -> Result<Self> {
        let mut map = Self::new();
        for operation in DEFAULT_WHITELIST {
            map.add_to_whitelist(*operation);
        }
        for (operation, resource, action) in DEFAULT_METHODS {
            map.register_method_permission(*operation, *resource, *action)?;
        }
        Ok(map)
    }

    /// Require `resource:action` for `operation`. Re-registering replaces.
    pub fn register_method_permission(
        &mut self,
        operation: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Result<()> {
        let operation = operation.into();
        let permission = Permission::new(resource, action);
        permission.validate()?;

        debug!(operation = %operation, permission = %permission, "Registered method permission");
        self.methods.insert(operation, permission);
        Ok(())
    }

    pub fn add_to_whitelist(&mut self, operation: impl Into<String>) {
        self.whitelist.insert(operation.into());
    }

    pub fn is_whitelisted(&self, operation: &str) -> bool {
        self.whitelist.contains(operation)
            || service_wildcard(operation).is_some_and(|w| self.whitelist.contains(&w))
    }

    pub fn lookup(&self, operation: &str) -> MethodRequirement<'_> {
        if self.is_whitelisted(operation) {
            return MethodRequirement::Whitelisted;
        }
        if let Some(permission) = self.methods.get(operation) {
            return MethodRequirement::Requires(permission);
        }
        if let Some(permission) = service_wildcard(operation).and_then(|w| self.methods.get(&w)) {
            return MethodRequirement::Requires(permission);
        }
        MethodRequirement::Unmapped
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn whitelist_len(&self) -> usize {
        self.whitelist.len()
    }
}

/// `/pkg.Service/Method` → `/pkg.Service/*`
fn service_wildcard(operation: &str) -> Option<String> {
    let (service, method) = operation.rsplit_once('/')?;
    if service.is_empty() || method.is_empty() || method == "*" {
        return None;
    }
    Some(format!("{}/*", service))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Default catalog
// ═══════════════════════════════════════════════════════════════════════════════

const DEFAULT_WHITELIST: &[&str] = &[
    "/grpc.health.v1.Health/Check",
    "/grpc.health.v1.Health/Watch",
    "/wordhoard.v1.AuthService/*",
];

const DEFAULT_METHODS: &[(&str, &str, &str)] = &[
    ("/wordhoard.v1.CourseService/ListCourses", "course", "read"),
    ("/wordhoard.v1.CourseService/GetCourse", "course", "read"),
    ("/wordhoard.v1.CourseService/CreateCourse", "course", "create"),
    ("/wordhoard.v1.CourseService/UpdateCourse", "course", "update"),
    ("/wordhoard.v1.CourseService/DeleteCourse", "course", "delete"),
    ("/wordhoard.v1.WordService/ListWords", "word", "read"),
    ("/wordhoard.v1.WordService/GetWord", "word", "read"),
    ("/wordhoard.v1.WordService/CreateWord", "word", "create"),
    ("/wordhoard.v1.WordService/UpdateWord", "word", "update"),
    ("/wordhoard.v1.WordService/DeleteWord", "word", "delete"),
    ("/wordhoard.v1.QuestionService/ListQuestions", "question", "read"),
    ("/wordhoard.v1.QuestionService/GetQuestion", "question", "read"),
    ("/wordhoard.v1.QuestionService/CreateQuestion", "question", "create"),
    ("/wordhoard.v1.QuestionService/UpdateQuestion", "question", "update"),
    ("/wordhoard.v1.QuestionService/DeleteQuestion", "question", "delete"),
    ("/wordhoard.v1.QuestionService/SubmitAnswer", "question", "answer"),
    ("/wordhoard.v1.UserService/GetProfile", "profile", "read"),
    ("/wordhoard.v1.UserService/UpdateProfile", "profile", "update"),
    ("/wordhoard.v1.UserService/GetProgress", "progress", "read"),
    ("/wordhoard.v1.UserService/UpdateProgress", "progress", "update"),
    ("/wordhoard.v1.UserService/ListUsers", "user", "read"),
    ("/wordhoard.v1.UserService/DeleteUser", "user", "delete"),
    ("/wordhoard.v1.PolicyAdmin/*", "policy", "manage"),
    ("/wordhoard.v1.PolicyAdmin/Check", "policy", "read"),
    ("/wordhoard.v1.PolicyAdmin/ListPolicies", "policy", "read"),
    ("/wordhoard.v1.PolicyAdmin/ListRoles", "policy", "read"),
    ("/wordhoard.v1.PolicyAdmin/WatchPolicyChanges", "policy", "read"),
    ("/wordhoard.v1.PolicyAdmin/Persist", "policy", "manage"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_exact_and_service_wildcard() {
        let map = MethodPermissionMap::with_defaults().unwrap();

        assert_eq!(
            map.lookup("/wordhoard.v1.CourseService/GetCourse"),
            MethodRequirement::Requires(&Permission::new("course", "read"))
        );
        // Exact entry wins over the service wildcard.
        assert_eq!(
            map.lookup("/wordhoard.v1.PolicyAdmin/ListRoles"),
            MethodRequirement::Requires(&Permission::new("policy", "read"))
        );
        assert_eq!(
            map.lookup("/wordhoard.v1.PolicyAdmin/AssignRole"),
            MethodRequirement::Requires(&Permission::new("policy", "manage"))
        );
    }

    #[test]
    fn test_persist_needs_manage() {
        let map = MethodPermissionMap::with_defaults().unwrap();
        assert_eq!(
            map.lookup("/wordhoard.v1.PolicyAdmin/Persist"),
            MethodRequirement::Requires(&Permission::new("policy", "manage"))
        );
    }

    #[test]
    fn test_whitelist() {
        let map = MethodPermissionMap::with_defaults().unwrap();
        assert_eq!(
            map.lookup("/grpc.health.v1.Health/Check"),
            MethodRequirement::Whitelisted
        );
        assert!(map.is_whitelisted("/wordhoard.v1.AuthService/Login"));
        assert!(!map.is_whitelisted("/wordhoard.v1.CourseService/ListCourses"));
    }

    #[test]
    fn test_unmapped() {
        let map = MethodPermissionMap::with_defaults().unwrap();
        assert_eq!(
            map.lookup("/wordhoard.v1.CourseService/ArchiveCourse"),
            MethodRequirement::Unmapped
        );
        assert_eq!(map.lookup("not-a-path"), MethodRequirement::Unmapped);
    }

    #[test]
    fn test_registration() {
        let mut map = MethodPermissionMap::new();
        assert!(map.is_empty());
        map.register_method_permission("/x.S/M", "thing", "read").unwrap();
        map.add_to_whitelist("/x.S/Ping");

        assert_eq!(map.len(), 1);
        assert_eq!(map.whitelist_len(), 1);
        assert!(map.register_method_permission("/x.S/N", "", "read").is_err());
    }
}
