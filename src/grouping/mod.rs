use std::collections::{BTreeMap, BTreeSet};

use crate::core::{Issue, IssueKey, Severity};

pub type GroupedIssues = BTreeMap<Severity, Vec<Issue>>;

/// Buckets issues by severity, keeping arrival order inside each bucket.
pub fn group_by_severity(issues: &[Issue]) -> GroupedIssues {
    let mut grouped = GroupedIssues::new();
    for issue in issues {
        grouped
            .entry(issue.severity)
            .or_default()
            .push(issue.clone());
    }
    grouped
}

/// Critical, then Moderate, then Low. This is the only index space UI cursors
/// and numbered selections may use.
pub fn flatten(grouped: &GroupedIssues) -> Vec<Issue> {
    let mut flat = Vec::new();
    for severity in Severity::ALL {
        if let Some(bucket) = grouped.get(&severity) {
            flat.extend(bucket.iter().cloned());
        }
    }
    flat
}

pub fn ordered(issues: &[Issue]) -> Vec<Issue> {
    flatten(&group_by_severity(issues))
}

/// Caller-owned set of selected issues. Only fixable issues can be selected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueSelection {
    keys: BTreeSet<IssueKey>,
}

impl IssueSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, issue: &Issue) -> bool {
        if !issue.is_fixable() {
            return false;
        }
        self.keys.insert(issue.key());
        true
    }

    /// Returns whether the issue is selected afterwards.
    pub fn toggle(&mut self, issue: &Issue) -> bool {
        let key = issue.key();
        if self.keys.remove(&key) {
            return false;
        }
        self.select(issue)
    }

    pub fn select_all_fixable(&mut self, issues: &[Issue]) {
        for issue in issues {
            self.select(issue);
        }
    }

    pub fn contains(&self, issue: &Issue) -> bool {
        self.keys.contains(&issue.key())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    /// Selected issues in display order. Keys no longer present in `issues`
    /// are dropped.
    pub fn resolve(&self, issues: &[Issue]) -> Vec<Issue> {
        ordered(issues)
            .into_iter()
            .filter(|issue| self.keys.contains(&issue.key()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Fixability;

    fn issue(source: &str, name: &str, severity: Severity, fixable: Fixability) -> Issue {
        Issue {
            name: name.to_string(),
            description: String::new(),
            severity,
            fix_command: "true".to_string(),
            fixable,
            source: source.to_string(),
            requires_reboot: false,
        }
    }

    fn sample() -> Vec<Issue> {
        vec![
            issue("a", "low-1", Severity::Low, Fixability::Auto),
            issue("a", "crit-1", Severity::Critical, Fixability::AutoSudo),
            issue("b", "mod-1", Severity::Moderate, Fixability::Manual),
            issue("b", "crit-2", Severity::Critical, Fixability::Auto),
            issue("c", "low-2", Severity::Low, Fixability::Auto),
        ]
    }

    fn names(issues: &[Issue]) -> Vec<&str> {
        issues.iter().map(|i| i.name.as_str()).collect()
    }

    #[test]
    fn flatten_orders_by_severity_and_keeps_arrival_order() {
        let flat = flatten(&group_by_severity(&sample()));
        assert_eq!(
            names(&flat),
            vec!["crit-1", "crit-2", "mod-1", "low-1", "low-2"]
        );
    }

    #[test]
    fn flatten_is_stable_across_calls() {
        let grouped = group_by_severity(&sample());
        assert_eq!(flatten(&grouped), flatten(&grouped));
    }

    #[test]
    fn empty_buckets_are_absent() {
        let grouped = group_by_severity(&sample()[..1]);
        assert_eq!(grouped.len(), 1);
        assert!(grouped.get(&Severity::Critical).is_none());
    }

    #[test]
    fn selection_refuses_non_fixable_issues() {
        let issues = sample();
        let mut sel = IssueSelection::new();
        assert!(!sel.select(&issues[2]));
        assert!(sel.is_empty());

        sel.select_all_fixable(&issues);
        assert_eq!(sel.len(), 4);
        assert!(!sel.contains(&issues[2]));
    }

    #[test]
    fn selection_toggles_and_resolves_in_display_order() {
        let issues = sample();
        let mut sel = IssueSelection::new();
        assert!(sel.toggle(&issues[4]));
        assert!(sel.toggle(&issues[1]));
        assert!(sel.toggle(&issues[0]));
        assert!(!sel.toggle(&issues[0]));

        assert_eq!(names(&sel.resolve(&issues)), vec!["crit-1", "low-2"]);
    }

    #[test]
    fn same_name_from_different_sources_is_distinct() {
        let a = issue("a", "dup", Severity::Low, Fixability::Auto);
        let b = issue("b", "dup", Severity::Low, Fixability::Auto);
        let mut sel = IssueSelection::new();
        sel.select(&a);
        assert!(sel.contains(&a));
        assert!(!sel.contains(&b));
    }
}
