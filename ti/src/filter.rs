//! Path inclusion filter
//!
//! Rules are folder prefixes, exact file paths or glob patterns. In
//! blacklist mode a matching rule excludes the path; in whitelist mode only
//! matching paths are included. Each rule applies to inline tasks, file-level
//! tasks, or both.

use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::source::{FilterScope, InclusionFilter};

/// How rules are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Whitelist,
    #[default]
    Blacklist,
}

/// One filter rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    /// Folder, file path or glob pattern (`*`, `?`, `[..]`)
    pub pattern: String,
    #[serde(default = "default_rule_scope")]
    pub scope: FilterScope,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_rule_scope() -> FilterScope {
    FilterScope::Both
}

fn default_true() -> bool {
    true
}

/// Filter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,
    pub mode: FilterMode,
    pub rules: Vec<FilterRule>,
    pub inline_tasks_enabled: bool,
    pub file_tasks_enabled: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: FilterMode::default(),
            rules: Vec::new(),
            inline_tasks_enabled: true,
            file_tasks_enabled: true,
        }
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Glob(Pattern),
    Prefix(String),
}

impl Matcher {
    fn matches(&self, path: &str) -> bool {
        match self {
            Self::Glob(pattern) => pattern.matches(path),
            Self::Prefix(prefix) => {
                path == prefix || path.strip_prefix(prefix.as_str()).is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    matcher: Matcher,
    scope: FilterScope,
}

/// Compiled [`FilterConfig`]
#[derive(Debug, Clone)]
pub struct PathFilter {
    config: FilterConfig,
    rules: Vec<CompiledRule>,
}

impl PathFilter {
    pub fn new(config: &FilterConfig) -> Result<Self, glob::PatternError> {
        debug!(rules = config.rules.len(), enabled = config.enabled, "PathFilter::new: called");
        let mut rules = Vec::new();
        for rule in config.rules.iter().filter(|r| r.enabled) {
            let pattern = rule.pattern.trim().trim_matches('/');
            if pattern.is_empty() {
                continue;
            }
            let matcher = if pattern.contains(['*', '?', '[']) {
                Matcher::Glob(Pattern::new(pattern)?)
            } else {
                Matcher::Prefix(pattern.to_string())
            };
            rules.push(CompiledRule {
                matcher,
                scope: rule.scope,
            });
        }
        Ok(Self {
            config: config.clone(),
            rules,
        })
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    fn scope_enabled(&self, scope: FilterScope) -> bool {
        match scope {
            FilterScope::Inline => self.config.inline_tasks_enabled,
            FilterScope::File => self.config.file_tasks_enabled,
            FilterScope::Both => self.config.inline_tasks_enabled || self.config.file_tasks_enabled,
        }
    }
}

impl InclusionFilter for PathFilter {
    fn should_include(&self, path: &str, scope: FilterScope) -> bool {
        if !self.scope_enabled(scope) {
            return false;
        }
        if !self.config.enabled {
            return true;
        }

        let matched = self
            .rules
            .iter()
            .filter(|r| r.scope == FilterScope::Both || scope == FilterScope::Both || r.scope == scope)
            .any(|r| r.matcher.matches(path));

        match self.config.mode {
            FilterMode::Whitelist => matched,
            FilterMode::Blacklist => !matched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str, scope: FilterScope) -> FilterRule {
        FilterRule {
            pattern: pattern.to_string(),
            scope,
            enabled: true,
        }
    }

    fn filter(mode: FilterMode, rules: Vec<FilterRule>) -> PathFilter {
        PathFilter::new(&FilterConfig {
            enabled: true,
            mode,
            rules,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_disabled_filter_includes_everything() {
        let f = PathFilter::new(&FilterConfig::default()).unwrap();
        assert!(f.should_include("any/path.md", FilterScope::Inline));
    }

    #[test]
    fn test_blacklist_folder_prefix() {
        let f = filter(FilterMode::Blacklist, vec![rule("archive/", FilterScope::Both)]);
        assert!(!f.should_include("archive/old.md", FilterScope::Inline));
        assert!(!f.should_include("archive", FilterScope::Inline));
        assert!(f.should_include("archived.md", FilterScope::Inline));
        assert!(f.should_include("notes/a.md", FilterScope::File));
    }

    #[test]
    fn test_whitelist_glob() {
        let f = filter(FilterMode::Whitelist, vec![rule("projects/**/*.md", FilterScope::Both)]);
        assert!(f.should_include("projects/alpha/plan.md", FilterScope::Inline));
        assert!(!f.should_include("inbox.md", FilterScope::Inline));
    }

    #[test]
    fn test_rule_scope() {
        let f = filter(FilterMode::Blacklist, vec![rule("journal", FilterScope::Inline)]);
        assert!(!f.should_include("journal/day.md", FilterScope::Inline));
        assert!(f.should_include("journal/day.md", FilterScope::File));
    }

    #[test]
    fn test_scope_controls() {
        let f = PathFilter::new(&FilterConfig {
            file_tasks_enabled: false,
            ..Default::default()
        })
        .unwrap();
        assert!(f.should_include("a.md", FilterScope::Inline));
        assert!(!f.should_include("a.md", FilterScope::File));
        assert!(f.should_include("a.md", FilterScope::Both));
    }

    #[test]
    fn test_invalid_glob_is_error() {
        let result = PathFilter::new(&FilterConfig {
            enabled: true,
            rules: vec![rule("[unclosed", FilterScope::Both)],
            ..Default::default()
        });
        assert!(result.is_err());
    }
}
