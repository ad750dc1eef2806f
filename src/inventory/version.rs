// SPDX-License-Identifier: GPL-3.0-only
use semver::Version;
use std::cmp::Ordering;
use crate::extension::ExtensionRecord;
use crate::inventory::events::InstallOutcome;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Same version installed, version unknown, or updates disabled
    AlreadyInstalled,
    /// Never downgrade
    NewerInstalled { installed: Version, offered: Version },
}

impl From<SkipReason> for InstallOutcome {
    fn from(reason: SkipReason) -> Self {
        match reason {
            SkipReason::AlreadyInstalled => InstallOutcome::AlreadyInstalled,
            SkipReason::NewerInstalled { installed, offered } => {
                InstallOutcome::NewerInstalled { installed, offered }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallDecision {
    Install,
    /// Uninstall the installed copy first, then install the offered package
    Update { from: Option<Version> },
    Skip(SkipReason),
}

/// Decide what to do with an offered package given the installed copy (if any).
///
/// Versions compare by major.minor.patch only; pre-release and build metadata
/// are ignored.
pub fn decide(
    installed: Option<&ExtensionRecord>,
    offered: Option<&Version>,
    allow_update: bool,
) -> InstallDecision {
    let Some(installed) = installed else {
        return InstallDecision::Install;
    };

    if !allow_update {
        return InstallDecision::Skip(SkipReason::AlreadyInstalled);
    }

    let (Some(current), Some(offered)) = (installed.version.as_ref(), offered) else {
        return InstallDecision::Skip(SkipReason::AlreadyInstalled);
    };

    match compare(current, offered) {
        Ordering::Less => InstallDecision::Update {
            from: Some(current.clone()),
        },
        Ordering::Equal => InstallDecision::Skip(SkipReason::AlreadyInstalled),
        Ordering::Greater => InstallDecision::Skip(SkipReason::NewerInstalled {
            installed: current.clone(),
            offered: offered.clone(),
        }),
    }
}

fn compare(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch).cmp(&(b.major, b.minor, b.patch))
}
