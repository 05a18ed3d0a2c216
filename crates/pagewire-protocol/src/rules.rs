//! Exact-or-pattern method matching, shared by allow-lists on both sides
//! and by the gateway's mutation classifier.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Verbs that mark a method name as mutating when they start a name segment.
pub const MUTATION_VERBS: [&str; 14] = [
    "create", "update", "delete", "remove", "set", "add", "insert", "pay", "submit", "approve",
    "cancel", "rename", "write", "mutate",
];

/// One allow-list entry: an exact name or a regular expression.
///
/// In JSON an exact rule is a bare string; a pattern is `{"pattern": "..."}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MethodRule {
    /// Matches one qualified method name exactly.
    Exact(String),
    /// Matches any name the regex finds a match in.
    Pattern {
        /// Regex source.
        pattern: String,
    },
}

impl MethodRule {
    /// Shorthand for a pattern rule.
    pub fn pattern(source: impl Into<String>) -> Self {
        Self::Pattern {
            pattern: source.into(),
        }
    }
}

impl From<&str> for MethodRule {
    fn from(value: &str) -> Self {
        Self::Exact(value.to_owned())
    }
}

/// A compiled set of [`MethodRule`]s.
#[derive(Clone, Debug, Default)]
pub struct MethodMatcher {
    exact: Vec<String>,
    patterns: Vec<Regex>,
}

impl MethodMatcher {
    /// Compile rules; fails on the first invalid regex.
    pub fn compile(rules: &[MethodRule]) -> Result<Self, regex::Error> {
        let mut matcher = Self::default();
        for rule in rules {
            match rule {
                MethodRule::Exact(name) => matcher.exact.push(name.clone()),
                MethodRule::Pattern { pattern } => matcher.patterns.push(Regex::new(pattern)?),
            }
        }
        Ok(matcher)
    }

    /// Compile bare regex sources, as used by mutation pattern lists.
    pub fn from_patterns<S: AsRef<str>>(sources: &[S]) -> Result<Self, regex::Error> {
        let patterns = sources
            .iter()
            .map(|s| Regex::new(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            exact: Vec::new(),
            patterns,
        })
    }

    /// Whether any rule matches `method`.
    pub fn matches(&self, method: &str) -> bool {
        self.exact.iter().any(|name| name == method)
            || self.patterns.iter().any(|re| re.is_match(method))
    }

    /// True when no rules were compiled.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.patterns.is_empty()
    }

    /// Empty matchers allow everything; otherwise a rule must match.
    pub fn allows(&self, method: &str) -> bool {
        self.is_empty() || self.matches(method)
    }
}

/// Default mutation pattern sources: each verb, case-insensitive, at the
/// start of the name or right after a `.`.
pub fn default_mutation_patterns() -> Vec<String> {
    MUTATION_VERBS
        .iter()
        .map(|verb| format!("(?i)(^|\\.){verb}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rules_deserialize_from_strings_and_objects() {
        let rules: Vec<MethodRule> =
            serde_json::from_value(json!(["user.getById", {"pattern": "^cart\\."}])).unwrap();
        assert_eq!(rules[0], MethodRule::from("user.getById"));
        assert_eq!(rules[1], MethodRule::pattern("^cart\\."));
    }

    #[test]
    fn empty_matcher_allows_all() {
        let m = MethodMatcher::compile(&[]).unwrap();
        assert!(m.is_empty());
        assert!(m.allows("anything"));
        assert!(!m.matches("anything"));
    }

    #[test]
    fn exact_and_pattern_matching() {
        let m = MethodMatcher::compile(&["user.getById".into(), MethodRule::pattern("^cart\\.")])
            .unwrap();
        assert!(m.allows("user.getById"));
        assert!(!m.allows("user.getByIdX"));
        assert!(m.allows("cart.addItem"));
        assert!(!m.allows("order.cart"));
    }

    #[test]
    fn invalid_pattern_fails_compile() {
        assert!(MethodMatcher::compile(&[MethodRule::pattern("(")]).is_err());
    }

    #[test]
    fn mutation_defaults_classify_verbs() {
        let m = MethodMatcher::from_patterns(&default_mutation_patterns()).unwrap();
        assert!(m.matches("cart.addItem"));
        assert!(m.matches("Account.DeleteUser"));
        assert!(m.matches("submitOrder"));
        assert!(m.matches("user.setName"));
        assert!(!m.matches("user.getById"));
        assert!(!m.matches("cart.listItems"));
        assert!(!m.matches("user.resetView"));
    }
}
