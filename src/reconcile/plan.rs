// SPDX-License-Identifier: GPL-3.0-only
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use crate::extension::{DeclaredSet, ExtensionRecord};

/// Outcome of diffing the declared set against an installed snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    /// Declared but not installed
    pub to_install: Vec<ExtensionRecord>,

    /// Declared and installed; `(declared, installed)` pairs checked for updates
    pub to_update: Vec<(ExtensionRecord, ExtensionRecord)>,

    /// Installed but not declared, eligible for removal
    pub to_remove: Vec<ExtensionRecord>,

    /// Not declared, but installed after the last settings update
    pub protected: Vec<ExtensionRecord>,

    /// Not declared, but this is the reconciler itself
    pub self_protected: Vec<ExtensionRecord>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.to_install.is_empty() && self.to_remove.is_empty()
    }
}

/// Diff `declared` against `installed` by identifier.
///
/// An empty declared set yields an empty plan so that a missing or corrupt
/// settings file never uninstalls everything.
pub fn plan(
    declared: &DeclaredSet,
    installed: &[ExtensionRecord],
    settings_updated_at: Option<DateTime<Utc>>,
    self_name: &str,
) -> SyncPlan {
    let mut plan = SyncPlan::default();
    if declared.is_empty() {
        return plan;
    }

    let installed_by_id: HashMap<&str, &ExtensionRecord> = installed
        .iter()
        .map(|record| (record.identifier.as_str(), record))
        .collect();

    for record in declared.iter().filter(|r| r.is_valid()) {
        match installed_by_id.get(record.identifier.as_str()) {
            Some(current) => plan.to_update.push((record.clone(), (*current).clone())),
            None => plan.to_install.push(record.clone()),
        }
    }

    for record in installed.iter().filter(|r| !declared.contains(r)) {
        if is_self(record, self_name) {
            plan.self_protected.push(record.clone());
        } else if installed_after(record, settings_updated_at) {
            plan.protected.push(record.clone());
        } else {
            plan.to_remove.push(record.clone());
        }
    }

    plan
}

fn is_self(record: &ExtensionRecord, self_name: &str) -> bool {
    record.name.eq_ignore_ascii_case(self_name)
}

fn installed_after(record: &ExtensionRecord, boundary: Option<DateTime<Utc>>) -> bool {
    match (record.installed_at, boundary) {
        (Some(installed_at), Some(boundary)) => installed_at > boundary,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use semver::Version;

    const SELF_NAME: &str = "ExtensionSync";

    fn rec(name: &str, id: &str) -> ExtensionRecord {
        ExtensionRecord::new(name, id)
    }

    fn ids(records: &[ExtensionRecord]) -> Vec<&str> {
        records.iter().map(|r| r.identifier.as_str()).collect()
    }

    #[test]
    fn test_diff_is_set_difference_by_identity() {
        let declared = DeclaredSet::from_records(vec![rec("A", "a"), rec("B", "b"), rec("C", "c")]);
        let installed = vec![
            rec("B", "b").with_version(Version::new(1, 0, 0)),
            rec("C", "c"),
            rec("D", "d"),
        ];

        let plan = plan(&declared, &installed, None, SELF_NAME);
        assert_eq!(ids(&plan.to_install), ["a"]);
        assert_eq!(ids(&plan.to_remove), ["d"]);
        let updates: Vec<&str> = plan.to_update.iter().map(|(d, _)| d.identifier.as_str()).collect();
        assert_eq!(updates, ["b", "c"]);
        assert_eq!(plan.to_update[0].1.version, Some(Version::new(1, 0, 0)));
    }

    #[test]
    fn test_empty_declared_set_is_a_no_op() {
        let installed = vec![rec("A", "a"), rec("B", "b")];

        let plan = plan(&DeclaredSet::default(), &installed, None, SELF_NAME);
        assert_eq!(plan, SyncPlan::default());
        assert!(plan.is_empty());
    }

    #[test]
    fn test_identical_sets_produce_empty_plan() {
        let records = vec![rec("A", "a"), rec("B", "b")];
        let declared = DeclaredSet::from_records(records.clone());

        let plan = plan(&declared, &records, None, SELF_NAME);
        assert!(plan.is_empty());
        assert_eq!(plan.to_update.len(), 2);
    }

    #[test]
    fn test_grace_window_protects_recent_installs() {
        let settings_saved = Utc::now() - Duration::hours(1);
        let declared = DeclaredSet::from_records(vec![rec("A", "a")]);
        let installed = vec![
            rec("A", "a"),
            rec("Fresh", "fresh").with_installed_at(Utc::now()),
            rec("Stale", "stale").with_installed_at(settings_saved - Duration::days(2)),
            rec("Undated", "undated"),
        ];

        let plan = plan(&declared, &installed, Some(settings_saved), SELF_NAME);
        assert_eq!(ids(&plan.protected), ["fresh"]);
        assert_eq!(ids(&plan.to_remove), ["stale", "undated"]);
    }

    #[test]
    fn test_reconciler_never_removes_itself() {
        let declared = DeclaredSet::from_records(vec![rec("A", "a")]);
        let installed = vec![rec("A", "a"), rec("extensionsync", "ExtensionSync.vsix")];

        let plan = plan(&declared, &installed, None, SELF_NAME);
        assert!(plan.to_remove.is_empty());
        assert_eq!(ids(&plan.self_protected), ["ExtensionSync.vsix"]);
    }

    #[test]
    fn test_declared_records_without_identifier_are_ignored() {
        let declared = DeclaredSet::from_records(vec![rec("Nameless", ""), rec("A", "a")]);

        let plan = plan(&declared, &[], None, SELF_NAME);
        assert_eq!(ids(&plan.to_install), ["a"]);
    }
}
