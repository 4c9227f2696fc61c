//! Backup manager (C5): pre-overwrite copy, and a retention sweep over old backups.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Backup policy for a single `backup_file` call. Distinct from [`crate::config::BackupConfig`]
/// because this module also needs an injectable `now` for deterministic tests.
#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub enabled: bool,
    pub directory: Option<String>,
    pub prefix: String,
    /// Required when `directory` is set.
    pub node: Option<String>,
    pub now: DateTime<Utc>,
}

impl Default for BackupOptions {
    fn default() -> Self {
        BackupOptions {
            enabled: true,
            directory: None,
            prefix: "state".to_string(),
            node: None,
            now: Utc::now(),
        }
    }
}

/// Backs up `original` before it is overwritten. Returns `None` when there was nothing to back
/// up (file absent) or backups are disabled; returns the backup path on success.
///
/// The original is never touched until the *subsequent* atomic rename of
/// the new snapshot: this function only ever reads `original` and writes a new file elsewhere.
pub fn backup_file(original: &Path, opts: &BackupOptions) -> Result<Option<PathBuf>> {
    let metadata = match fs::metadata(original) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io(original, e)),
    };
    if metadata.is_dir() {
        return Err(Error::Precondition(format!(
            "{} is a directory, cannot back up",
            original.display()
        )));
    }

    if !opts.enabled {
        tracing::warn!(path = %original.display(), "backups disabled, proceeding without backup");
        return Ok(None);
    }

    let backup_path = backup_path_for(original, opts)?;
    if let Some(parent) = backup_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        set_mode_0755(parent)?;
    }

    copy_exclusive(original, &backup_path, &metadata)?;
    Ok(Some(backup_path))
}

fn backup_path_for(original: &Path, opts: &BackupOptions) -> Result<PathBuf> {
    let stamp = opts.now.format("%Y-%m-%dT%H:%M:%SZ");
    match &opts.directory {
        Some(dir) => {
            let node = opts.node.as_deref().ok_or_else(|| {
                Error::PolicyViolation(
                    "a node name is required when a backup directory is configured".to_string(),
                )
            })?;
            Ok(Path::new(dir).join(format!("{}-{node}.{stamp}.json", opts.prefix)))
        }
        None => {
            let file_name = original
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let backup_name = format!("{file_name}.backup.{stamp}.json");
            Ok(original
                .parent()
                .map(|p| p.join(&backup_name))
                .unwrap_or_else(|| PathBuf::from(&backup_name)))
        }
    }
}

/// Copies `original` to `backup_path` byte-for-byte, preserving permission bits, failing if
/// `backup_path` already exists (exclusive-create guards against
/// second-granularity timestamp collisions clobbering an earlier backup).
fn copy_exclusive(original: &Path, backup_path: &Path, metadata: &fs::Metadata) -> Result<()> {
    let mut src = File::open(original).map_err(|e| Error::io(original, e))?;
    let mut contents = Vec::new();
    src.read_to_end(&mut contents)
        .map_err(|e| Error::io(original, e))?;

    let mut dst = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(backup_path)
        .map_err(|e| Error::io(backup_path, e))?;
    dst.write_all(&contents)
        .map_err(|e| Error::io(backup_path, e))?;
    dst.sync_all().map_err(|e| Error::io(backup_path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(
            backup_path,
            fs::Permissions::from_mode(metadata.permissions().mode()),
        )
        .map_err(|e| Error::io(backup_path, e))?;
    }
    #[cfg(not(unix))]
    {
        let _ = metadata;
    }

    Ok(())
}

#[cfg(unix)]
fn set_mode_0755(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|e| Error::io(path, e))
}

#[cfg(not(unix))]
fn set_mode_0755(_path: &Path) -> Result<()> {
    Ok(())
}

/// One backup candidate found during a retention sweep.
#[derive(Debug, Clone)]
pub struct RetentionCandidate {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Walks `dir` for files matching the backup naming convention (`*.backup.*.json` or
/// `<prefix>-<node>.*.json`) and deletes those whose mtime is older than `cutoff`. In `dry_run`
/// mode, returns the candidates that *would* be deleted without touching the filesystem.
///
/// This heuristic is filename-convention only and is deliberately not
/// widened to a content marker.
pub fn sweep_retention(
    dir: &Path,
    prefix: &str,
    cutoff: SystemTime,
    dry_run: bool,
) -> Result<Vec<RetentionCandidate>> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io(dir, e)),
    };

    let mut removed = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable directory entry during retention sweep");
                continue;
            }
        };
        let path = entry.path();
        let name = path.file_name().map(|n| n.to_string_lossy().to_string());
        let Some(name) = name else { continue };
        if !looks_like_backup(&name, prefix) {
            continue;
        }

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "retention sweep: cannot read mtime, skipping");
                continue;
            }
        };
        if modified >= cutoff {
            continue;
        }

        if !dry_run {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "retention sweep: failed to delete backup");
                continue;
            }
        }
        removed.push(RetentionCandidate { path, modified });
    }
    Ok(removed)
}

fn looks_like_backup(name: &str, prefix: &str) -> bool {
    name.contains(".backup.") || (name.starts_with(&format!("{prefix}-")) && name.ends_with(".json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[test]
    fn backup_on_overwrite_preserves_bytes_and_original() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("s.json");
        fs::write(&original, b"B0-original-bytes").unwrap();

        let opts = BackupOptions {
            enabled: true,
            directory: None,
            prefix: "state".to_string(),
            node: Some("w-01".to_string()),
            now: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        };
        let backup_path = backup_file(&original, &opts).unwrap().unwrap();
        assert_eq!(
            backup_path.file_name().unwrap().to_string_lossy(),
            "s.json.backup.2024-01-01T12:00:00Z.json"
        );
        assert_eq!(fs::read(&backup_path).unwrap(), b"B0-original-bytes");
        assert_eq!(fs::read(&original).unwrap(), b"B0-original-bytes");
    }

    #[test]
    fn absent_original_backs_up_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("missing.json");
        assert!(backup_file(&original, &BackupOptions::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn disabled_backup_proceeds_without_one() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("s.json");
        fs::write(&original, b"data").unwrap();
        let opts = BackupOptions {
            enabled: false,
            ..BackupOptions::default()
        };
        assert!(backup_file(&original, &opts).unwrap().is_none());
    }

    #[test]
    fn directory_target_requires_a_node_name() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("s.json");
        fs::write(&original, b"data").unwrap();
        let opts = BackupOptions {
            directory: Some(dir.path().join("backups").to_string_lossy().to_string()),
            node: None,
            ..BackupOptions::default()
        };
        assert!(backup_file(&original, &opts).is_err());
    }

    #[test]
    fn retention_sweep_dry_run_reports_without_deleting() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("s.json.backup.2020-01-01T00:00:00Z.json");
        fs::write(&old, b"old").unwrap();

        let cutoff = SystemTime::now();
        let candidates = sweep_retention(dir.path(), "state", cutoff, true).unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(old.exists());
    }

    #[test]
    fn retention_sweep_deletes_only_old_backups() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("s.json.backup.2020-01-01T00:00:00Z.json");
        fs::write(&old, b"old").unwrap();
        let not_a_backup = dir.path().join("notes.txt");
        fs::write(&not_a_backup, b"keep me").unwrap();

        let cutoff = SystemTime::now() + Duration::from_secs(1);
        sweep_retention(dir.path(), "state", cutoff, false).unwrap();
        assert!(!old.exists());
        assert!(not_a_backup.exists());
    }
}
