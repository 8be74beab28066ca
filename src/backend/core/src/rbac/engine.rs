//! Enforcement engine: the in-memory policy and role graph, and the
//! decision function over them.
//!
//! All state sits behind one reader/writer lock. Checks share the read lock
//! for the whole traversal; mutations hold the write lock across the store
//! save, so a change is visible in memory only once it is about to be (or
//! already is) durable.

use metrics::{counter, histogram};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use super::models::{Permission, PolicyRule, RoleEdge, Subject, ADMIN_ROLE};
use super::store::{PolicySnapshot, PolicyStore};
use crate::config::EngineConfig;
use crate::observability::metrics::{CHECK_DURATION, DECISIONS, MUTATIONS, PERSIST_FAILURES};
use crate::error::{AuthzError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Change events
// ═══════════════════════════════════════════════════════════════════════════════

/// A change applied to the in-memory policy state.
///
/// Emitted after the store save was attempted, whether or not it succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyEvent {
    PolicyAdded { rule: PolicyRule, persisted: bool },
    PolicyRemoved { rule: PolicyRule, persisted: bool },
    RoleEdgeAdded { edge: RoleEdge, persisted: bool },
    RoleEdgeRemoved { edge: RoleEdge, persisted: bool },
    Reloaded { rules: usize, role_edges: usize },
}

impl PolicyEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PolicyAdded { .. } => "policy_added",
            Self::PolicyRemoved { .. } => "policy_removed",
            Self::RoleEdgeAdded { .. } => "role_edge_added",
            Self::RoleEdgeRemoved { .. } => "role_edge_removed",
            Self::Reloaded { .. } => "reloaded",
        }
    }
}

/// A pending mutation, applied under the write lock.
enum Mutation {
    AddPolicy(PolicyRule),
    RemovePolicy(PolicyRule),
    AddEdge(RoleEdge),
    RemoveEdge(RoleEdge),
}

impl Mutation {
    fn apply(&self, state: &mut PolicyState) -> bool {
        match self {
            Self::AddPolicy(rule) => state.insert_rule(rule),
            Self::RemovePolicy(rule) => state.remove_rule(rule),
            Self::AddEdge(edge) => state.insert_edge(edge),
            Self::RemoveEdge(edge) => state.remove_edge(edge),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::AddPolicy(rule) | Self::RemovePolicy(rule) => rule.to_string(),
            Self::AddEdge(edge) | Self::RemoveEdge(edge) => edge.to_string(),
        }
    }

    fn into_event(self, persisted: bool) -> PolicyEvent {
        match self {
            Self::AddPolicy(rule) => PolicyEvent::PolicyAdded { rule, persisted },
            Self::RemovePolicy(rule) => PolicyEvent::PolicyRemoved { rule, persisted },
            Self::AddEdge(edge) => PolicyEvent::RoleEdgeAdded { edge, persisted },
            Self::RemoveEdge(edge) => PolicyEvent::RoleEdgeRemoved { edge, persisted },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// State
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct PolicyState {
    /// subject -> subjects it inherits from
    parents: HashMap<Subject, BTreeSet<Subject>>,
    /// subject -> directly granted permissions
    grants: HashMap<Subject, BTreeSet<Permission>>,
}

impl PolicyState {
    fn from_snapshot(snapshot: PolicySnapshot) -> Result<Self> {
        let mut state = Self::default();
        for edge in &snapshot.role_edges {
            edge.validate()?;
            state.insert_edge(edge);
        }
        for rule in &snapshot.rules {
            rule.validate()?;
            state.insert_rule(rule);
        }
        Ok(state)
    }

    /// Deterministic snapshot: subjects and entries in sorted order.
    fn to_snapshot(&self) -> PolicySnapshot {
        PolicySnapshot {
            role_edges: self.edges(),
            rules: self.rules(),
        }
    }

    fn edges(&self) -> Vec<RoleEdge> {
        let mut edges: Vec<RoleEdge> = self
            .parents
            .iter()
            .flat_map(|(child, parents)| {
                parents
                    .iter()
                    .map(move |parent| RoleEdge::new(child.clone(), parent.clone()))
            })
            .collect();
        edges.sort();
        edges
    }

    fn rules(&self) -> Vec<PolicyRule> {
        let mut rules: Vec<PolicyRule> = self
            .grants
            .iter()
            .flat_map(|(subject, perms)| perms.iter().map(move |p| rule_for(subject, p)))
            .collect();
        rules.sort();
        rules
    }

    fn insert_rule(&mut self, rule: &PolicyRule) -> bool {
        self.grants
            .entry(rule.subject.clone())
            .or_default()
            .insert(rule.permission())
    }

    fn remove_rule(&mut self, rule: &PolicyRule) -> bool {
        let Some(perms) = self.grants.get_mut(&rule.subject) else {
            return false;
        };
        let removed = perms.remove(&rule.permission());
        if perms.is_empty() {
            self.grants.remove(&rule.subject);
        }
        removed
    }

    fn insert_edge(&mut self, edge: &RoleEdge) -> bool {
        self.parents
            .entry(edge.child.clone())
            .or_default()
            .insert(edge.parent.clone())
    }

    fn remove_edge(&mut self, edge: &RoleEdge) -> bool {
        let Some(parents) = self.parents.get_mut(&edge.child) else {
            return false;
        };
        let removed = parents.remove(&edge.parent);
        if parents.is_empty() {
            self.parents.remove(&edge.child);
        }
        removed
    }

    /// Breadth-first walk over everything `start` inherits from, nearest
    /// first. Stops as soon as `visit` returns true and reports whether it
    /// did. Each subject is visited once, so cycles terminate; reaching a
    /// subject further than `max_depth` edges away is an error.
    fn walk_ancestors(
        &self,
        start: &Subject,
        max_depth: usize,
        mut visit: impl FnMut(&Subject) -> bool,
    ) -> Result<bool> {
        let mut seen: HashSet<&Subject> = HashSet::from([start]);
        let mut frontier: Vec<&Subject> = vec![start];
        let mut depth = 0;

        while !frontier.is_empty() {
            depth += 1;
            let mut next = Vec::new();
            for node in frontier {
                let Some(parents) = self.parents.get(node) else {
                    continue;
                };
                for parent in parents {
                    if !seen.insert(parent) {
                        continue;
                    }
                    if depth > max_depth {
                        return Err(AuthzError::hierarchy_too_deep(start, max_depth));
                    }
                    if visit(parent) {
                        return Ok(true);
                    }
                    next.push(parent);
                }
            }
            frontier = next;
        }

        Ok(false)
    }

    fn ancestors(&self, start: &Subject, max_depth: usize) -> Result<Vec<Subject>> {
        let mut found = Vec::new();
        self.walk_ancestors(start, max_depth, |s| {
            found.push(s.clone());
            false
        })?;
        Ok(found)
    }

    fn grants_directly(&self, subject: &Subject, resource: &str, action: &str) -> bool {
        self.grants
            .get(subject)
            .is_some_and(|perms| perms.iter().any(|p| p.grants(resource, action)))
    }
}

fn rule_for(subject: &Subject, permission: &Permission) -> PolicyRule {
    PolicyRule::new(subject.clone(), &permission.resource, &permission.action)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Policy Engine
// ═══════════════════════════════════════════════════════════════════════════════

/// The authoritative in-process copy of the policy state.
///
/// Constructed explicitly from a store and shared behind an `Arc`; there is
/// no global instance.
pub struct PolicyEngine {
    state: RwLock<PolicyState>,
    store: Arc<dyn PolicyStore>,
    max_depth: usize,
    events: broadcast::Sender<PolicyEvent>,
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("store", &self.store.backend())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

impl PolicyEngine {
    /// Build the engine from the store's current contents.
    pub async fn load(store: Arc<dyn PolicyStore>, config: &EngineConfig) -> Result<Self> {
        let snapshot = store.load().await?;
        let (rules, edges) = (snapshot.rules.len(), snapshot.role_edges.len());
        let state = PolicyState::from_snapshot(snapshot)?;
        let (events, _) = broadcast::channel(config.event_buffer.max(1));

        info!(
            backend = store.backend(),
            rules,
            role_edges = edges,
            max_depth = config.max_hierarchy_depth,
            "Policy engine loaded"
        );

        Ok(Self {
            state: RwLock::new(state),
            store,
            max_depth: config.max_hierarchy_depth,
            events,
        })
    }

    /// Receive every subsequent change to the policy state.
    pub fn subscribe(&self) -> broadcast::Receiver<PolicyEvent> {
        self.events.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Decision
    // ─────────────────────────────────────────────────────────────────────────

    /// Decide whether `subject` may perform `action` on `resource`.
    ///
    /// `Ok(false)` is a denial. Errors are reserved for malformed input and
    /// traversal failures.
    pub async fn check(&self, subject: &Subject, resource: &str, action: &str) -> Result<bool> {
        let started = Instant::now();
        let outcome = self.evaluate(subject, resource, action).await;

        let label = match &outcome {
            Ok(Decision::Admin) => "admin",
            Ok(Decision::Allow) => "allow",
            Ok(Decision::Deny) => "deny",
            Err(_) => "error",
        };
        counter!(DECISIONS, "outcome" => label).increment(1);
        histogram!(CHECK_DURATION)
            .record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(Decision::Admin) => {
                info!(%subject, resource, action, "Admin short-circuit");
                Ok(true)
            }
            Ok(Decision::Allow) => {
                debug!(%subject, resource, action, "Access allowed");
                Ok(true)
            }
            Ok(Decision::Deny) => {
                warn!(%subject, resource, action, "Access denied");
                Ok(false)
            }
            Err(e) => {
                e.log();
                Err(e)
            }
        }
    }

    async fn evaluate(&self, subject: &Subject, resource: &str, action: &str) -> Result<Decision> {
        subject.validate()?;
        Permission::new(resource, action).validate()?;

        let state = self.state.read().await;

        if subject.is_user() {
            let admin = Subject::admin();
            if state.walk_ancestors(subject, self.max_depth, |s| *s == admin)? {
                return Ok(Decision::Admin);
            }
        }

        if state.grants_directly(subject, resource, action)
            || state.walk_ancestors(subject, self.max_depth, |s| {
                state.grants_directly(s, resource, action)
            })?
        {
            return Ok(Decision::Allow);
        }

        Ok(Decision::Deny)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Grant a permission. `Ok(false)` if the tuple already existed.
    pub async fn add_policy(&self, rule: PolicyRule) -> Result<bool> {
        rule.validate()?;
        self.commit("add_policy", Mutation::AddPolicy(rule)).await
    }

    /// Revoke a permission. `Ok(false)` if the tuple did not exist.
    pub async fn remove_policy(&self, rule: PolicyRule) -> Result<bool> {
        rule.validate()?;
        self.commit("remove_policy", Mutation::RemovePolicy(rule)).await
    }

    /// Make `child` inherit everything granted to `parent`.
    pub async fn add_role_edge(&self, child: Subject, parent: Subject) -> Result<bool> {
        let edge = RoleEdge::new(child, parent);
        edge.validate()?;
        self.commit("add_role_edge", Mutation::AddEdge(edge)).await
    }

    pub async fn remove_role_edge(&self, child: Subject, parent: Subject) -> Result<bool> {
        let edge = RoleEdge::new(child, parent);
        edge.validate()?;
        self.commit("remove_role_edge", Mutation::RemoveEdge(edge)).await
    }

    /// Assign `role` to a user.
    pub async fn assign_role(&self, user_id: u64, role: &str) -> Result<bool> {
        let edge = RoleEdge::assignment(user_id, role);
        edge.validate()?;
        self.commit("assign_role", Mutation::AddEdge(edge)).await
    }

    pub async fn revoke_role(&self, user_id: u64, role: &str) -> Result<bool> {
        let edge = RoleEdge::assignment(user_id, role);
        edge.validate()?;
        self.commit("revoke_role", Mutation::RemoveEdge(edge)).await
    }

    /// Apply a mutation and persist the resulting state.
    ///
    /// A failed save after an applied change yields `PersistUnconfirmed`
    /// carrying `applied = true`; the in-memory change stays in place.
    async fn commit(&self, kind: &'static str, mutation: Mutation) -> Result<bool> {
        let mut state = self.state.write().await;
        let changed = mutation.apply(&mut state);

        counter!(
            MUTATIONS,
            "kind" => kind,
            "changed" => if changed { "true" } else { "false" },
        )
        .increment(1);

        if !changed {
            debug!(kind, "Mutation was a no-op");
            return Ok(false);
        }

        let saved = self.store.save(&state.to_snapshot()).await;
        // Publish under the write guard so watchers see commit order.
        let result = match saved {
            Ok(()) => {
                info!(kind, change = %mutation.describe(), "Policy change persisted");
                self.publish(mutation.into_event(true));
                Ok(true)
            }
            Err(e) => {
                counter!(PERSIST_FAILURES).increment(1);
                error!(
                    kind,
                    change = %mutation.describe(),
                    error = %e,
                    "Policy change applied in memory but not persisted"
                );
                self.publish(mutation.into_event(false));
                Err(AuthzError::persist_unconfirmed(true, e))
            }
        };
        drop(state);
        result
    }

    fn publish(&self, event: PolicyEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Save the current state again, e.g. after a `PersistUnconfirmed`.
    pub async fn persist(&self) -> Result<()> {
        let state = self.state.write().await;
        match self.store.save(&state.to_snapshot()).await {
            Ok(()) => {
                info!(backend = self.store.backend(), "Policy state persisted");
                Ok(())
            }
            Err(e) => {
                counter!(PERSIST_FAILURES).increment(1);
                error!(error = %e, "Policy state persist retry failed");
                Err(e)
            }
        }
    }

    /// Replace the in-memory state with the store's contents.
    pub async fn reload(&self) -> Result<()> {
        let snapshot = self.store.load().await?;
        let (rules, role_edges) = (snapshot.rules.len(), snapshot.role_edges.len());
        let fresh = PolicyState::from_snapshot(snapshot)?;

        *self.state.write().await = fresh;
        info!(rules, role_edges, "Policy state reloaded from store");
        self.publish(PolicyEvent::Reloaded { rules, role_edges });
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Direct parents of `subject`.
    pub async fn roles_of(&self, subject: &Subject) -> Result<Vec<Subject>> {
        subject.validate()?;
        let state = self.state.read().await;
        Ok(state
            .parents
            .get(subject)
            .map(|p| p.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Subjects with a direct edge to `role`.
    pub async fn subjects_of(&self, role: &Subject) -> Result<Vec<Subject>> {
        role.validate()?;
        let state = self.state.read().await;
        let mut children: Vec<Subject> = state
            .parents
            .iter()
            .filter(|(_, parents)| parents.contains(role))
            .map(|(child, _)| child.clone())
            .collect();
        children.sort();
        Ok(children)
    }

    /// Users directly assigned `role`.
    pub async fn users_with_role(&self, role: &str) -> Result<Vec<u64>> {
        let users = self
            .subjects_of(&Subject::role(role))
            .await?
            .into_iter()
            .filter_map(|s| match s {
                Subject::User(id) => Some(id),
                Subject::Role(_) => None,
            })
            .collect();
        Ok(users)
    }

    /// Whether `subject` reaches `role` through the role graph.
    pub async fn has_role(&self, subject: &Subject, role: &Subject) -> Result<bool> {
        subject.validate()?;
        role.validate()?;
        let state = self.state.read().await;
        state.walk_ancestors(subject, self.max_depth, |s| s == role)
    }

    /// Everything `subject` inherits from, nearest first.
    pub async fn implicit_roles_of(&self, subject: &Subject) -> Result<Vec<Subject>> {
        subject.validate()?;
        let state = self.state.read().await;
        state.ancestors(subject, self.max_depth)
    }

    /// Tuples attached directly to `subject`.
    pub async fn permissions_of(&self, subject: &Subject) -> Result<Vec<PolicyRule>> {
        subject.validate()?;
        let state = self.state.read().await;
        Ok(state
            .grants
            .get(subject)
            .map(|perms| perms.iter().map(|p| rule_for(subject, p)).collect())
            .unwrap_or_default())
    }

    /// Tuples of `subject` and of everything it inherits from.
    pub async fn implicit_permissions_of(&self, subject: &Subject) -> Result<Vec<PolicyRule>> {
        subject.validate()?;
        let state = self.state.read().await;
        let mut rules = Vec::new();
        for holder in std::iter::once(subject.clone()).chain(state.ancestors(subject, self.max_depth)?) {
            if let Some(perms) = state.grants.get(&holder) {
                rules.extend(perms.iter().map(|p| rule_for(&holder, p)));
            }
        }
        Ok(rules)
    }

    /// All policy tuples, sorted.
    pub async fn policies(&self) -> Vec<PolicyRule> {
        self.state.read().await.rules()
    }

    /// All role graph edges, sorted.
    pub async fn role_edges(&self) -> Vec<RoleEdge> {
        self.state.read().await.edges()
    }

    /// Every role name mentioned by an edge or a tuple.
    pub async fn roles(&self) -> Vec<String> {
        let state = self.state.read().await;
        let names: BTreeSet<String> = state
            .parents
            .iter()
            .flat_map(|(child, parents)| std::iter::once(child).chain(parents.iter()))
            .chain(state.grants.keys())
            .filter_map(|s| s.role_name().map(str::to_string))
            .collect();
        names.into_iter().collect()
    }

    /// Whether the admin role is present at all.
    pub async fn admin_role_known(&self) -> bool {
        self.roles().await.iter().any(|r| r == ADMIN_ROLE)
    }
}

enum Decision {
    Admin,
    Allow,
    Deny,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::rbac::store::MemoryStore;

    async fn engine_with(store: Arc<MemoryStore>) -> PolicyEngine {
        PolicyEngine::load(store, &EngineConfig::default()).await.unwrap()
    }

    async fn engine() -> PolicyEngine {
        engine_with(Arc::new(MemoryStore::new())).await
    }

    fn rule(subject: &str, resource: &str, action: &str) -> PolicyRule {
        PolicyRule::parse(subject, resource, action).unwrap()
    }

    fn role(name: &str) -> Subject {
        Subject::role(name)
    }

    #[tokio::test]
    async fn test_deny_by_default() {
        let engine = engine().await;
        assert!(!engine.check(&Subject::User(1), "course", "read").await.unwrap());
        assert!(!engine.check(&role("user"), "course", "read").await.unwrap());
    }

    #[tokio::test]
    async fn test_admin_short_circuit_is_transitive() {
        let engine = engine().await;
        engine.add_role_edge(role("root"), role("admin")).await.unwrap();
        engine.assign_role(7, "root").await.unwrap();

        // No tuple grants anything; admin reachability alone allows.
        assert!(engine.check(&Subject::User(7), "word", "delete").await.unwrap());
        assert!(engine.check(&Subject::User(7), "anything", "at-all").await.unwrap());
    }

    #[tokio::test]
    async fn test_admin_short_circuit_only_for_users() {
        let engine = engine().await;
        engine.add_role_edge(role("root"), role("admin")).await.unwrap();
        assert!(!engine.check(&role("root"), "word", "delete").await.unwrap());
    }

    #[tokio::test]
    async fn test_wildcard_matching() {
        let engine = engine().await;
        engine.add_policy(rule("r:reader", "*", "read")).await.unwrap();
        engine.add_policy(rule("r:editor", "course", "*")).await.unwrap();

        assert!(engine.check(&role("reader"), "anything", "read").await.unwrap());
        assert!(!engine.check(&role("reader"), "anything", "write").await.unwrap());
        assert!(engine.check(&role("editor"), "course", "delete").await.unwrap());
        assert!(!engine.check(&role("editor"), "word", "delete").await.unwrap());
    }

    #[tokio::test]
    async fn test_idempotent_add_policy() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone()).await;

        assert!(engine.add_policy(rule("r:user", "course", "read")).await.unwrap());
        assert!(!engine.add_policy(rule("r:user", "course", "read")).await.unwrap());

        let perms = engine.permissions_of(&role("user")).await.unwrap();
        assert_eq!(perms, vec![rule("r:user", "course", "read")]);
        // The no-op did not hit the store.
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_policy_is_idempotent() {
        let engine = engine().await;
        engine.add_policy(rule("r:user", "course", "read")).await.unwrap();

        assert!(engine.remove_policy(rule("r:user", "course", "read")).await.unwrap());
        assert!(!engine.remove_policy(rule("r:user", "course", "read")).await.unwrap());
        assert!(engine.policies().await.is_empty());
    }

    #[tokio::test]
    async fn test_inheritance_is_transitive() {
        let engine = engine().await;
        engine.add_role_edge(role("a"), role("b")).await.unwrap();
        engine.add_role_edge(role("b"), role("c")).await.unwrap();

        assert!(engine.has_role(&role("a"), &role("c")).await.unwrap());
        assert!(!engine.has_role(&role("c"), &role("a")).await.unwrap());
        assert_eq!(engine.roles_of(&role("a")).await.unwrap(), vec![role("b")]);
        assert_eq!(
            engine.implicit_roles_of(&role("a")).await.unwrap(),
            vec![role("b"), role("c")]
        );

        engine.add_policy(rule("r:c", "word", "read")).await.unwrap();
        assert!(engine.check(&role("a"), "word", "read").await.unwrap());
        assert_eq!(
            engine.implicit_permissions_of(&role("a")).await.unwrap(),
            vec![rule("r:c", "word", "read")]
        );
    }

    #[tokio::test]
    async fn test_cycles_terminate() {
        let engine = engine().await;
        engine.add_role_edge(role("a"), role("b")).await.unwrap();
        engine.add_role_edge(role("b"), role("a")).await.unwrap();
        engine.assign_role(1, "a").await.unwrap();

        assert!(!engine.check(&Subject::User(1), "x", "y").await.unwrap());
        assert!(!engine.has_role(&role("a"), &role("z")).await.unwrap());
        assert_eq!(
            engine.implicit_roles_of(&Subject::User(1)).await.unwrap(),
            vec![role("a"), role("b")]
        );
    }

    #[tokio::test]
    async fn test_depth_limit_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let config = EngineConfig {
            max_hierarchy_depth: 2,
            ..EngineConfig::default()
        };
        let engine = PolicyEngine::load(store, &config).await.unwrap();

        engine.add_role_edge(role("r0"), role("r1")).await.unwrap();
        engine.add_role_edge(role("r1"), role("r2")).await.unwrap();
        assert!(engine.has_role(&role("r0"), &role("r2")).await.unwrap());

        engine.add_role_edge(role("r2"), role("r3")).await.unwrap();
        let err = engine.check(&role("r0"), "x", "y").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::HierarchyTooDeep);
    }

    #[tokio::test]
    async fn test_rejects_invalid_edges_and_rules() {
        let engine = engine().await;
        let err = engine.add_role_edge(role("a"), role("a")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidPolicy);

        let err = engine
            .add_role_edge(role("a"), Subject::User(3))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidPolicy);

        let bad = PolicyRule::new(role("a"), "", "read");
        assert_eq!(
            engine.add_policy(bad).await.unwrap_err().code(),
            ErrorCode::InvalidPolicy
        );
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_memory_change() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone()).await;
        store.set_fail_saves(true);

        let err = engine
            .add_policy(rule("r:user", "course", "read"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::PersistUnconfirmed);
        assert_eq!(err.applied(), Some(true));
        assert!(err.is_retryable());

        // Applied in memory, absent from the store.
        assert!(engine.check(&role("user"), "course", "read").await.unwrap());
        assert!(store.snapshot().rules.is_empty());

        store.set_fail_saves(false);
        engine.persist().await.unwrap();
        assert_eq!(store.snapshot().rules, vec![rule("r:user", "course", "read")]);
    }

    #[tokio::test]
    async fn test_load_and_reload_from_store() {
        let store = Arc::new(MemoryStore::with_snapshot(PolicySnapshot {
            role_edges: vec![RoleEdge::assignment(5, "user")],
            rules: vec![rule("r:user", "course", "read")],
        }));
        let engine = engine_with(store.clone()).await;
        assert!(engine.check(&Subject::User(5), "course", "read").await.unwrap());

        let mut events = engine.subscribe();
        store
            .save(&PolicySnapshot::default())
            .await
            .unwrap();
        engine.reload().await.unwrap();

        assert!(!engine.check(&Subject::User(5), "course", "read").await.unwrap());
        assert_eq!(
            events.recv().await.unwrap(),
            PolicyEvent::Reloaded { rules: 0, role_edges: 0 }
        );
    }

    #[tokio::test]
    async fn test_introspection_queries() {
        let engine = engine().await;
        engine.assign_role(1, "user").await.unwrap();
        engine.assign_role(2, "user").await.unwrap();
        engine
            .add_role_edge(role("content_manager"), role("user"))
            .await
            .unwrap();

        assert_eq!(engine.users_with_role("user").await.unwrap(), vec![1, 2]);
        assert_eq!(
            engine.subjects_of(&role("user")).await.unwrap(),
            vec![Subject::User(1), Subject::User(2), role("content_manager")]
        );
        assert_eq!(engine.roles().await, vec!["content_manager", "user"]);
        assert!(!engine.admin_role_known().await);

        assert!(engine.revoke_role(1, "user").await.unwrap());
        assert!(!engine.revoke_role(1, "user").await.unwrap());
        assert_eq!(engine.users_with_role("user").await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let engine = engine().await;
        let mut events = engine.subscribe();

        engine.add_policy(rule("r:user", "course", "read")).await.unwrap();
        engine.add_policy(rule("r:user", "course", "read")).await.unwrap();
        engine.assign_role(9, "user").await.unwrap();

        let first = events.recv().await.unwrap();
        assert_eq!(first.kind(), "policy_added");
        // The no-op produced nothing.
        assert_eq!(
            events.recv().await.unwrap(),
            PolicyEvent::RoleEdgeAdded {
                edge: RoleEdge::assignment(9, "user"),
                persisted: true
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_events_follow_commit_order() {
        let engine = Arc::new(engine().await);
        let mut events = engine.subscribe();

        // Every effective toggle flips the rule, so the feed must alternate.
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                let mut changed = 0;
                for _ in 0..4 {
                    let r = rule("r:user", "word", "edit");
                    changed += engine.add_policy(r.clone()).await.unwrap() as usize;
                    changed += engine.remove_policy(r).await.unwrap() as usize;
                }
                changed
            }));
        }
        let mut changed = 0;
        for task in tasks {
            changed += task.await.unwrap();
        }

        let mut expect_added = true;
        for _ in 0..changed {
            let kind = events.recv().await.unwrap().kind();
            assert_eq!(kind, if expect_added { "policy_added" } else { "policy_removed" });
            expect_added = !expect_added;
        }
        assert!(events.try_recv().is_err());
        assert_eq!(engine.policies().await.is_empty(), expect_added);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checks_and_writes() {
        let engine = Arc::new(engine().await);
        engine.add_policy(rule("r:user", "course", "read")).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..32u64 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                engine.assign_role(i, "user").await.unwrap();
                engine.check(&Subject::User(i), "course", "read").await.unwrap()
            }));
        }

        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert_eq!(engine.users_with_role("user").await.unwrap().len(), 32);
    }
}
