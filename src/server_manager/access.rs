//! Tool access control: per-tool allow/deny rules over a default policy.
//!
//! Checked by `ServerConnectionManager::call_tool` before routing. Routing
//! itself (`select_server_for_tool`) is not filtered.

use std::collections::HashMap;

// ─── Types ──────────────────────────────────────────────────────────────────

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// An explicit rule matched.
    Rule(bool),
    /// No rule; the default policy applied.
    Default(bool),
}

impl AccessDecision {
    pub fn allowed(self) -> bool {
        match self {
            Self::Rule(allow) | Self::Default(allow) => allow,
        }
    }
}

/// Allow/deny list for tool names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolAccessControl {
    default_allow: bool,
    rules: HashMap<String, bool>,
}

impl Default for ToolAccessControl {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ToolAccessControl {
    pub fn new(default_allow: bool) -> Self {
        Self {
            default_allow,
            rules: HashMap::new(),
        }
    }

    /// Build from explicit lists. A tool on both lists is denied.
    pub fn from_lists(default_allow: bool, allowed: &[String], disallowed: &[String]) -> Self {
        let mut access = Self::new(default_allow);
        for tool in allowed {
            access.set(tool, true);
        }
        for tool in disallowed {
            access.set(tool, false);
        }
        access
    }

    /// Add or replace the rule for one tool.
    pub fn set(&mut self, tool: &str, allow: bool) {
        self.rules.insert(tool.to_string(), allow);
    }

    pub fn default_allow(&self) -> bool {
        self.default_allow
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn check(&self, tool: &str) -> AccessDecision {
        match self.rules.get(tool) {
            Some(&allow) => AccessDecision::Rule(allow),
            None => AccessDecision::Default(self.default_allow),
        }
    }

    pub fn is_allowed(&self, tool: &str) -> bool {
        self.check(tool).allowed()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
