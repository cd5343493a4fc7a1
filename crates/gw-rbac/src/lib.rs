//! C6 — access control: role-to-permission DAG resolution and the
//! per-verb permission check. The concrete catalog of roles and
//! permissions a deployment uses is an external collaborator (loaded at
//! startup, or populated by an admin tool); this crate only resolves it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use gw_error::{ClassifiedError, Result};
use parking_lot::RwLock;

/// A role: a set of permission ids it grants directly, plus the ids of
/// roles it inherits from.
#[derive(Debug, Clone, Default)]
pub struct Role {
    pub id: String,
    pub permissions: HashSet<String>,
    pub parents: Vec<String>,
}

impl Role {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), permissions: HashSet::new(), parents: Vec::new() }
    }

    #[must_use]
    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parents.push(parent.into());
        self
    }
}

/// An immutable, published view of the role graph. Readers clone the
/// `Arc` behind [`RbacEngine`]'s lock and then work against this struct
/// without holding any lock, so concurrent permission checks never
/// contend with each other or with a writer.
#[derive(Debug, Default)]
struct Snapshot {
    roles: HashMap<String, Role>,
    /// User id -> assigned role ids.
    assignments: HashMap<String, Vec<String>>,
}

/// Role-to-permission resolution engine. Mutations (`grant`,
/// `assign_role`, ...) take the write lock and publish a freshly built
/// snapshot; permission checks only ever read the current snapshot
/// pointer.
pub struct RbacEngine {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl Default for RbacEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RbacEngine {
    pub fn new() -> Self {
        Self { snapshot: RwLock::new(Arc::new(Snapshot::default())) }
    }

    fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Register or replace a role definition. Rejects the change if it
    /// would introduce a cycle in the parent graph.
    pub fn upsert_role(&self, role: Role) -> Result<()> {
        let mut guard = self.snapshot.write();
        let mut roles = guard.roles.clone();
        roles.insert(role.id.clone(), role);
        detect_cycle(&roles)?;
        let assignments = guard.assignments.clone();
        *guard = Arc::new(Snapshot { roles, assignments });
        Ok(())
    }

    /// Assign a role id to a user id. The role need not exist yet at
    /// assignment time — resolution simply yields no permissions from an
    /// unregistered role.
    pub fn assign_role(&self, user_id: &str, role_id: &str) {
        let mut guard = self.snapshot.write();
        let mut assignments = guard.assignments.clone();
        let entry = assignments.entry(user_id.to_string()).or_default();
        if !entry.iter().any(|r| r == role_id) {
            entry.push(role_id.to_string());
        }
        let roles = guard.roles.clone();
        *guard = Arc::new(Snapshot { roles, assignments });
    }

    /// Transitive union of permissions over a user's assigned roles and
    /// their ancestors. Traversal is bounded by the number of roles in
    /// the graph, so a defensive cap backstops `upsert_role`'s cycle
    /// rejection even if the graph was otherwise constructed.
    pub fn resolve_permissions(&self, user_id: &str) -> HashSet<String> {
        let snapshot = self.current();
        let mut result = HashSet::new();
        let Some(assigned) = snapshot.assignments.get(user_id) else {
            return result;
        };

        let max_steps = snapshot.roles.len().max(1);
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier: Vec<String> = assigned.clone();

        for _ in 0..=max_steps {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for role_id in frontier.drain(..) {
                if !visited.insert(role_id.clone()) {
                    continue;
                }
                if let Some(role) = snapshot.roles.get(&role_id) {
                    result.extend(role.permissions.iter().cloned());
                    next.extend(role.parents.iter().cloned());
                }
            }
            frontier = next;
        }

        result
    }

    /// Check whether `user_id` holds `permission`, returning
    /// `AccessDenied` when it does not.
    pub fn check(&self, user_id: &str, permission: &str) -> Result<()> {
        let permissions = self.resolve_permissions(user_id);
        if permissions.contains(permission) {
            Ok(())
        } else {
            Err(ClassifiedError::new(
                gw_error::ErrorCategory::AccessDenied,
                gw_error::Severity::Medium,
                format!("user '{user_id}' lacks permission '{permission}'"),
            )
            .with_context("user_id", user_id)
            .with_context("permission", permission))
        }
    }

    /// Map a SQL verb onto the permission id a deployment is expected to
    /// have granted for it (`select` -> `"query:select"`, etc). Callers
    /// that want a different naming scheme can skip this and call
    /// [`Self::check`] directly with their own permission id.
    pub fn check_verb(&self, user_id: &str, verb: &str) -> Result<()> {
        let permission = format!("query:{}", verb.to_ascii_lowercase());
        self.check(user_id, &permission)
    }
}

/// DFS cycle detection over the parent edges. `roles` maps id -> Role,
/// where `Role::parents` are the outgoing edges.
fn detect_cycle(roles: &HashMap<String, Role>) -> Result<()> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        InProgress,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();

    fn visit<'a>(
        id: &'a str,
        roles: &'a HashMap<String, Role>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> Result<()> {
        match marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                return Err(ClassifiedError::new(
                    gw_error::ErrorCategory::ValidationError,
                    gw_error::Severity::High,
                    format!("role graph contains a cycle through '{id}'"),
                ));
            }
            None => {}
        }
        marks.insert(id, Mark::InProgress);
        if let Some(role) = roles.get(id) {
            for parent in &role.parents {
                visit(parent, roles, marks)?;
            }
        }
        marks.insert(id, Mark::Done);
        Ok(())
    }

    for id in roles.keys() {
        visit(id, roles, &mut marks)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_permission_resolves() {
        let engine = RbacEngine::new();
        engine.upsert_role(Role::new("viewer").with_permission("query:select")).unwrap();
        engine.assign_role("alice", "viewer");
        assert!(engine.check("alice", "query:select").is_ok());
        assert!(engine.check("alice", "query:delete").is_err());
    }

    #[test]
    fn inheritance_is_transitive_over_multiple_levels() {
        let engine = RbacEngine::new();
        engine.upsert_role(Role::new("base").with_permission("query:select")).unwrap();
        engine
            .upsert_role(Role::new("writer").with_permission("query:insert").with_parent("base"))
            .unwrap();
        engine
            .upsert_role(Role::new("admin").with_permission("query:delete").with_parent("writer"))
            .unwrap();
        engine.assign_role("bob", "admin");

        let perms = engine.resolve_permissions("bob");
        assert!(perms.contains("query:select"));
        assert!(perms.contains("query:insert"));
        assert!(perms.contains("query:delete"));
    }

    #[test]
    fn diamond_inheritance_deduplicates_without_infinite_loop() {
        let engine = RbacEngine::new();
        engine.upsert_role(Role::new("root").with_permission("p:root")).unwrap();
        engine.upsert_role(Role::new("left").with_parent("root")).unwrap();
        engine.upsert_role(Role::new("right").with_parent("root")).unwrap();
        engine
            .upsert_role(Role::new("bottom").with_parent("left").with_parent("right"))
            .unwrap();
        engine.assign_role("carol", "bottom");
        let perms = engine.resolve_permissions("carol");
        assert_eq!(perms.len(), 1);
        assert!(perms.contains("p:root"));
    }

    #[test]
    fn direct_self_cycle_is_rejected() {
        let engine = RbacEngine::new();
        let err = engine.upsert_role(Role::new("loopy").with_parent("loopy"));
        assert!(err.is_err());
    }

    #[test]
    fn indirect_cycle_is_rejected() {
        let engine = RbacEngine::new();
        engine.upsert_role(Role::new("a").with_parent("b")).unwrap();
        let err = engine.upsert_role(Role::new("b").with_parent("a"));
        assert!(err.is_err());
    }

    #[test]
    fn unassigned_user_has_no_permissions() {
        let engine = RbacEngine::new();
        engine.upsert_role(Role::new("viewer").with_permission("query:select")).unwrap();
        assert!(engine.resolve_permissions("nobody").is_empty());
    }

    #[test]
    fn multiple_roles_union_their_permissions() {
        let engine = RbacEngine::new();
        engine.upsert_role(Role::new("reader").with_permission("query:select")).unwrap();
        engine.upsert_role(Role::new("exporter").with_permission("task:export")).unwrap();
        engine.assign_role("dana", "reader");
        engine.assign_role("dana", "exporter");
        let perms = engine.resolve_permissions("dana");
        assert!(perms.contains("query:select"));
        assert!(perms.contains("task:export"));
    }

    #[test]
    fn check_verb_maps_lowercase_sql_verb_to_permission_id() {
        let engine = RbacEngine::new();
        engine.upsert_role(Role::new("reader").with_permission("query:select")).unwrap();
        engine.assign_role("erin", "reader");
        assert!(engine.check_verb("erin", "SELECT").is_ok());
        assert!(engine.check_verb("erin", "DELETE").is_err());
    }
}
