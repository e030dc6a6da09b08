//! Access policy applied after workspace containment.
//!
//! Containment answers "is this path inside the workspace at all"; the
//! policy answers "may a tool perform this operation on it". Rules are glob
//! patterns over the workspace-relative path (forward slashes, no leading
//! slash; the root itself is the empty string).

use std::fmt;
use std::sync::Arc;

/// The type of workspace operation being performed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Reading file contents
    Read,
    /// Writing or replacing file contents
    Write,
    /// Removing files
    Delete,
    /// Listing directory contents
    List,
    /// Running a program that reads the given file
    Execute,
}

impl Operation {
    const READS: [Operation; 3] = [Operation::Read, Operation::List, Operation::Execute];
    const WRITES: [Operation; 2] = [Operation::Write, Operation::Delete];

    /// Returns true if this operation leaves the workspace unchanged.
    pub fn is_read_only(&self) -> bool {
        Self::READS.contains(self)
    }

    /// Returns true if this operation mutates the workspace.
    pub fn is_write(&self) -> bool {
        !self.is_read_only()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Delete => "delete",
            Operation::List => "list",
            Operation::Execute => "execute",
        };
        f.write_str(name)
    }
}

/// The result of a policy check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyDecision {
    /// The operation is allowed.
    Allow,
    /// The operation is denied with a reason.
    Deny(String),
}

impl PolicyDecision {
    /// Returns true if the operation is allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allow)
    }

    /// Returns the denial reason if denied, None if allowed.
    pub fn denial_reason(&self) -> Option<&str> {
        match self {
            PolicyDecision::Allow => None,
            PolicyDecision::Deny(reason) => Some(reason),
        }
    }
}

/// Trait for policy handlers that check workspace access.
///
/// Checks run on every gateway operation, so implementations should be
/// cheap and must not block.
pub trait PolicyHandler: Send + Sync + fmt::Debug {
    /// Check if `operation` on the workspace-relative `path` is allowed.
    fn check_access(&self, path: &str, operation: Operation) -> PolicyDecision;
}

impl PolicyHandler for Arc<dyn PolicyHandler> {
    fn check_access(&self, path: &str, operation: Operation) -> PolicyDecision {
        (**self).check_access(path, operation)
    }
}

#[derive(Clone, Debug)]
struct PolicyRule {
    pattern: glob::Pattern,
    operations: Option<Vec<Operation>>,
    allow: bool,
}

impl PolicyRule {
    fn matches(&self, path: &str, operation: Operation) -> bool {
        if !self.pattern.matches(path) {
            return false;
        }

        match &self.operations {
            Some(ops) => ops.contains(&operation),
            None => true,
        }
    }
}

/// A configurable policy built from rules.
///
/// Rules are evaluated in order; the first matching rule decides. If no
/// rule matches, the default decision applies.
#[derive(Clone, Debug)]
pub struct Policy {
    rules: Vec<PolicyRule>,
    default_decision: PolicyDecision,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default_decision: PolicyDecision::Deny("no matching policy rule".to_string()),
        }
    }
}

impl Policy {
    /// Create a new empty policy with deny-by-default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a policy that allows everything inside the workspace.
    pub fn allow_all() -> Self {
        Self {
            rules: Vec::new(),
            default_decision: PolicyDecision::Allow,
        }
    }
}

impl PolicyHandler for Policy {
    fn check_access(&self, path: &str, operation: Operation) -> PolicyDecision {
        for rule in &self.rules {
            if rule.matches(path, operation) {
                return if rule.allow {
                    PolicyDecision::Allow
                } else {
                    PolicyDecision::Deny(format!(
                        "{operation} access to '{path}' denied by workspace policy"
                    ))
                };
            }
        }

        self.default_decision.clone()
    }
}

/// Builder for creating policies with a fluent API.
///
/// ```rust
/// use agentom::workspace::{Operation, PolicyBuilder, PolicyHandler};
///
/// let policy = PolicyBuilder::allow_by_default()
///     .deny("logs/**")
///     .deny_write("inputs/**")
///     .build();
///
/// assert!(!policy.check_access("logs/run.log", Operation::Read).is_allowed());
/// assert!(policy.check_access("inputs/Fe.cif", Operation::Read).is_allowed());
/// assert!(!policy.check_access("inputs/Fe.cif", Operation::Write).is_allowed());
/// ```
#[derive(Clone, Debug, Default)]
pub struct PolicyBuilder {
    rules: Vec<PolicyRule>,
    default_allow: bool,
}

impl PolicyBuilder {
    /// Create a new policy builder with deny-by-default.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default_allow: false,
        }
    }

    /// Create a new policy builder with allow-by-default.
    pub fn allow_by_default() -> Self {
        Self {
            rules: Vec::new(),
            default_allow: true,
        }
    }

    /// Allow read, list and execute operations matching the pattern.
    pub fn allow_read(self, pattern: &str) -> Self {
        self.rule(pattern, Some(Operation::READS.to_vec()), true)
    }

    /// Allow write and delete operations matching the pattern.
    pub fn allow_write(self, pattern: &str) -> Self {
        self.rule(pattern, Some(Operation::WRITES.to_vec()), true)
    }

    /// Allow every operation matching the pattern.
    pub fn allow(self, pattern: &str) -> Self {
        self.rule(pattern, None, true)
    }

    /// Deny write and delete operations matching the pattern.
    pub fn deny_write(self, pattern: &str) -> Self {
        self.rule(pattern, Some(Operation::WRITES.to_vec()), false)
    }

    /// Deny every operation matching the pattern.
    pub fn deny(self, pattern: &str) -> Self {
        self.rule(pattern, None, false)
    }

    /// Push a rule. A pattern ending in `/**` also covers the base
    /// directory itself, so `logs/**` governs listing `logs` too.
    fn rule(mut self, pattern: &str, operations: Option<Vec<Operation>>, allow: bool) -> Self {
        if let Some(base) = pattern.strip_suffix("/**")
            && let Ok(p) = glob::Pattern::new(base)
        {
            self.rules.push(PolicyRule {
                pattern: p,
                operations: operations.clone(),
                allow,
            });
        }

        match glob::Pattern::new(pattern) {
            Ok(p) => self.rules.push(PolicyRule {
                pattern: p,
                operations,
                allow,
            }),
            Err(e) => tracing::warn!(pattern, error = %e, "ignoring invalid policy pattern"),
        }
        self
    }

    /// Build the policy.
    pub fn build(self) -> Policy {
        Policy {
            rules: self.rules,
            default_decision: if self.default_allow {
                PolicyDecision::Allow
            } else {
                PolicyDecision::Deny("no matching policy rule".to_string())
            },
        }
    }
}

/// Standard policy for agent workspaces.
///
/// - `logs/**` is invisible to tools (no read, list, write)
/// - every `read_only` pattern may be read but not written
/// - everything else inside the workspace is allowed
pub fn workspace_policy<S: AsRef<str>>(read_only: &[S]) -> Policy {
    let mut builder = PolicyBuilder::allow_by_default().deny("logs/**");
    for pattern in read_only {
        builder = builder.deny_write(pattern.as_ref());
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all_policy() {
        let policy = Policy::allow_all();
        assert!(policy.check_access("any/path", Operation::Read).is_allowed());
        assert!(policy.check_access("any/path", Operation::Write).is_allowed());
    }

    #[test]
    fn test_empty_policy_denies() {
        let policy = Policy::new();
        let decision = policy.check_access("outputs/a.cif", Operation::Read);
        assert_eq!(decision.denial_reason(), Some("no matching policy rule"));
    }

    #[test]
    fn test_policy_builder_allow_read() {
        let policy = PolicyBuilder::new().allow_read("outputs/**").build();

        assert!(policy.check_access("outputs/NaCl.cif", Operation::Read).is_allowed());
        assert!(policy.check_access("outputs", Operation::List).is_allowed());
        assert!(!policy.check_access("inputs/x.cif", Operation::Read).is_allowed());
        assert!(!policy.check_access("outputs/NaCl.cif", Operation::Write).is_allowed());
    }

    #[test]
    fn test_policy_rule_order() {
        let policy = PolicyBuilder::new()
            .deny("outputs/secret.json")
            .allow("outputs/**")
            .build();

        assert!(!policy.check_access("outputs/secret.json", Operation::Read).is_allowed());
        assert!(policy.check_access("outputs/other.json", Operation::Write).is_allowed());
    }

    #[test]
    fn test_workspace_policy_hides_logs() {
        let policy = workspace_policy::<&str>(&[]);

        assert!(!policy.check_access("logs", Operation::List).is_allowed());
        assert!(!policy.check_access("logs/agent.log", Operation::Read).is_allowed());
        assert!(!policy.check_access("logs/agent.log", Operation::Write).is_allowed());
        assert!(policy.check_access("outputs/NaCl.cif", Operation::Write).is_allowed());
        assert!(policy.check_access("", Operation::List).is_allowed());
    }

    #[test]
    fn test_workspace_policy_read_only_patterns() {
        let policy = workspace_policy(&["inputs/**"]);

        assert!(policy.check_access("inputs/Fe.cif", Operation::Read).is_allowed());
        assert!(policy.check_access("inputs/Fe.cif", Operation::Execute).is_allowed());
        let decision = policy.check_access("inputs/Fe.cif", Operation::Write);
        assert!(!decision.is_allowed());
        assert!(decision.denial_reason().unwrap_or_default().contains("write"));
    }

    #[test]
    fn test_operation_classification() {
        assert!(Operation::Read.is_read_only());
        assert!(Operation::List.is_read_only());
        assert!(Operation::Execute.is_read_only());
        assert!(Operation::Write.is_write());
        assert!(Operation::Delete.is_write());
    }
}
