// SPDX-License-Identifier: GPL-3.0-only
use chrono::{DateTime, Utc};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use crate::config::Config;
use crate::extension::{DeclaredSet, ExtensionRecord};
use crate::logging::ActivityLog;

pub const SETTINGS_FILE_NAME: &str = "ExtensionSync.json";

/// Directory name under the per-user data directory
const FALLBACK_DIR_NAME: &str = "ExtensionSync";

/// Persisted declared extension list.
///
/// Reads never fail the caller: a missing, unreadable or malformed file loads
/// as an empty set and the problem is reported through the activity log.
pub struct SettingsStore {
    path: PathBuf,
    log: ActivityLog,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>, log: ActivityLog) -> Self {
        Self {
            path: path.into(),
            log,
        }
    }

    /// Store for the settings file inside `dir`
    pub fn in_dir(dir: &Path, log: ActivityLog) -> Self {
        Self::new(dir.join(SETTINGS_FILE_NAME), log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> DeclaredSet {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.log.emit(format!(
                    "Settings file {} does not exist yet; no extensions declared",
                    self.path.display()
                ));
                return DeclaredSet::default();
            }
            Err(e) => {
                self.log.emit(format!(
                    "Could not read settings file {}: {}",
                    self.path.display(),
                    e
                ));
                return DeclaredSet::default();
            }
        };

        let records: Vec<ExtensionRecord> = match serde_json::from_str(&contents) {
            Ok(records) => records,
            Err(e) => {
                self.log.emit(format!(
                    "Could not parse settings file {}: {}",
                    self.path.display(),
                    e
                ));
                return DeclaredSet::default();
            }
        };

        let (valid, invalid): (Vec<_>, Vec<_>) = records.into_iter().partition(|r| r.is_valid());
        for record in &invalid {
            self.log.emit(format!(
                "Ignoring declared extension '{}' without an identifier",
                record.name
            ));
        }

        let declared = DeclaredSet::from_records(valid);
        debug!(path = %self.path.display(), count = declared.len(), "Loaded declared extensions");
        declared
    }

    /// Overwrite the settings file with `records`. Returns `false` (after
    /// logging) if nothing was written; the previous file is left untouched.
    pub fn save(&self, records: &[ExtensionRecord]) -> bool {
        match self.write_atomically(records) {
            Ok(()) => {
                debug!(path = %self.path.display(), count = records.len(), "Saved extension list");
                true
            }
            Err(e) => {
                self.log.emit(format!(
                    "Could not save settings file {}: {:#}",
                    self.path.display(),
                    e
                ));
                false
            }
        }
    }

    fn write_atomically(&self, records: &[ExtensionRecord]) -> anyhow::Result<()> {
        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => dir.to_path_buf(),
            None => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let temp = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            serde_json::to_writer_pretty(&mut writer, records)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Last-modified time of the settings file, the grace-window boundary
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .map(DateTime::<Utc>::from)
            .ok()
    }
}

/// Per-user fallback settings directory
pub fn default_settings_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(FALLBACK_DIR_NAME)
}

/// Settings directory from `config`, falling back to [`default_settings_dir`]
/// when it is empty or does not exist. The fallback is written back into the
/// configuration and saved to `config_path`.
pub fn resolve_settings_dir(config: &mut Config, config_path: &Path, log: &ActivityLog) -> PathBuf {
    resolve_settings_dir_with(config, config_path, default_settings_dir(), log)
}

fn resolve_settings_dir_with(
    config: &mut Config,
    config_path: &Path,
    fallback: PathBuf,
    log: &ActivityLog,
) -> PathBuf {
    let configured = config.settings_dir.clone();
    if !configured.as_os_str().is_empty() && configured.is_dir() {
        return configured;
    }

    if let Err(e) = fs::create_dir_all(&fallback) {
        warn!(error = %e, path = %fallback.display(), "Failed to create fallback settings directory");
    }
    if configured.as_os_str().is_empty() {
        log.emit(format!(
            "No settings directory configured; using {}",
            fallback.display()
        ));
    } else {
        log.emit(format!(
            "Settings directory {} does not exist; using {}",
            configured.display(),
            fallback.display()
        ));
    }

    config.settings_dir = fallback.clone();
    if let Err(e) = config.save(config_path) {
        warn!(error = %e, path = %config_path.display(), "Failed to persist settings directory");
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{create_temp_dir, recording_log};
    use semver::Version;

    #[test]
    fn test_missing_file_loads_empty_set() {
        let dir = create_temp_dir();
        let (log, lines) = recording_log();
        let store = SettingsStore::in_dir(dir.path(), log);

        assert!(store.load().is_empty());
        assert!(store.last_modified().is_none());
        assert!(lines.contains("does not exist yet"));
    }

    #[test]
    fn test_truncated_file_loads_empty_set() {
        let dir = create_temp_dir();
        let (log, lines) = recording_log();
        let store = SettingsStore::in_dir(dir.path(), log);
        fs::write(store.path(), r#"[{"name": "Web Essentials", "identif"#).unwrap();

        assert!(store.load().is_empty());
        assert!(lines.contains("Could not parse settings file"));
    }

    #[test]
    fn test_save_then_load_keeps_name_and_identifier_only() {
        let dir = create_temp_dir();
        let store = SettingsStore::in_dir(dir.path(), ActivityLog::discard());
        let records = vec![
            ExtensionRecord::new("Web Essentials", "web.essentials").with_version(Version::new(2, 1, 0)),
            ExtensionRecord::new("Markdown Editor", "markdown.editor"),
        ];

        assert!(store.save(&records));
        let written = fs::read_to_string(store.path()).unwrap();
        assert!(!written.contains("2.1.0"));

        let loaded = store.load();
        assert_eq!(loaded.len(), 2);
        let web = loaded.get("web.essentials").unwrap();
        assert_eq!(web.name, "Web Essentials");
        assert_eq!(web.version, None);
        assert!(store.last_modified().is_some());
    }

    #[test]
    fn test_save_overwrites_wholesale() {
        let dir = create_temp_dir();
        let store = SettingsStore::in_dir(dir.path(), ActivityLog::discard());

        assert!(store.save(&[ExtensionRecord::new("A", "a"), ExtensionRecord::new("B", "b")]));
        assert!(store.save(&[ExtensionRecord::new("C", "c")]));

        let ids: Vec<String> = store.load().into_records().into_iter().map(|r| r.identifier).collect();
        assert_eq!(ids, ["c"]);
    }

    #[test]
    fn test_failed_save_leaves_previous_file() {
        let dir = create_temp_dir();
        let (log, lines) = recording_log();
        // A directory where the file should be makes the final rename fail
        let path = dir.path().join(SETTINGS_FILE_NAME);
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), "x").unwrap();
        let store = SettingsStore::new(&path, log);

        assert!(!store.save(&[ExtensionRecord::new("A", "a")]));
        assert!(path.join("keep").exists());
        assert!(lines.contains("Could not save settings file"));
    }

    #[test]
    fn test_records_without_identifier_are_dropped() {
        let dir = create_temp_dir();
        let (log, lines) = recording_log();
        let store = SettingsStore::in_dir(dir.path(), log);
        fs::write(
            store.path(),
            r#"[{"name": "Orphan"}, {"name": "A", "identifier": "a"}, {"name": "A again", "identifier": "a"}]"#,
        )
        .unwrap();

        let declared = store.load();
        assert_eq!(declared.len(), 1);
        assert_eq!(declared.get("a").unwrap().name, "A");
        assert!(lines.contains("Ignoring declared extension 'Orphan'"));
    }

    #[test]
    fn test_existing_settings_dir_is_kept() {
        let dir = create_temp_dir();
        let mut config = Config {
            settings_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let config_path = dir.path().join("config.toml");

        let resolved = resolve_settings_dir_with(&mut config, &config_path, dir.path().join("fallback"), &ActivityLog::discard());
        assert_eq!(resolved, dir.path());
        assert!(!config_path.exists());
    }

    #[test]
    fn test_missing_settings_dir_falls_back_and_persists() {
        let dir = create_temp_dir();
        let (log, lines) = recording_log();
        let mut config = Config {
            settings_dir: dir.path().join("gone"),
            ..Config::default()
        };
        let config_path = dir.path().join("config.toml");
        let fallback = dir.path().join("fallback");

        let resolved = resolve_settings_dir_with(&mut config, &config_path, fallback.clone(), &log);

        assert_eq!(resolved, fallback);
        assert!(fallback.is_dir());
        assert_eq!(config.settings_dir, fallback);
        assert_eq!(Config::load_from(&config_path).unwrap().settings_dir, fallback);
        assert!(lines.contains("does not exist; using"));
    }
}
