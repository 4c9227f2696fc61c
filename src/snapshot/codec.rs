//! Snapshot codec (C2): parse, validate, normalize, atomic write.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::snapshot::model::{ResourceEntry, Snapshot, SNAPSHOT_VERSION};

/// Mirror of [`Snapshot`] with every field optional, used only to tell "absent" from "present
/// but wrong" during parse validation (tagged-option, not sentinel zero values).
#[derive(Debug, Deserialize)]
struct RawSnapshot {
    version: Option<String>,
    node: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "operatorReplicas")]
    operator_replicas: Option<i64>,
    resources: Option<Vec<RawResourceEntry>>,
}

#[derive(Debug, Deserialize)]
struct RawResourceEntry {
    kind: Option<String>,
    namespace: Option<String>,
    name: Option<String>,
    replicas: Option<i64>,
}

/// Parses `input` as a snapshot document. `path` is used only to annotate errors; this function
/// performs no I/O itself (`parse_file` is the I/O-performing wrapper).
pub fn parse(path: &Path, input: &str) -> Result<Snapshot> {
    if input.trim().is_empty() {
        return Err(Error::parse(path, "empty state file"));
    }

    let mut de = serde_json::Deserializer::from_str(input);
    let raw: RawSnapshot = serde::de::Deserialize::deserialize(&mut de)
        .map_err(|e| Error::parse(path, e.to_string()))?;
    de.end()
        .map_err(|_| Error::parse(path, "unexpected trailing data"))?;

    validate_raw(path, raw)
}

fn validate_raw(path: &Path, raw: RawSnapshot) -> Result<Snapshot> {
    let version = raw.version.unwrap_or_default();
    if version != SNAPSHOT_VERSION {
        return Err(Error::validation(
            path,
            "version",
            format!("unsupported value {version:?}, expected \"{SNAPSHOT_VERSION}\""),
        ));
    }

    let node = raw.node.unwrap_or_default();
    if node.trim().is_empty() {
        return Err(Error::validation(path, "node", "missing or blank"));
    }

    let timestamp = raw
        .timestamp
        .ok_or_else(|| Error::validation(path, "timestamp", "missing"))?;

    let operator_replicas = match raw.operator_replicas {
        None => 1,
        Some(n) if n < 0 => {
            return Err(Error::validation(
                path,
                "operatorReplicas",
                format!("must be >= 0, got {n}"),
            ));
        }
        Some(n) => n as u32,
    };

    let raw_resources = raw
        .resources
        .ok_or_else(|| Error::validation(path, "resources", "missing"))?;

    let mut resources = Vec::with_capacity(raw_resources.len());
    for (i, entry) in raw_resources.into_iter().enumerate() {
        resources.push(validate_raw_resource(path, i, entry)?);
    }

    Ok(Snapshot {
        version,
        node,
        timestamp,
        operator_replicas,
        resources,
    })
}

fn validate_raw_resource(path: &Path, index: usize, raw: RawResourceEntry) -> Result<ResourceEntry> {
    let field = |name: &str| format!("resources[{index}].{name}");

    let kind = raw.kind.unwrap_or_default();
    if kind.trim().is_empty() {
        return Err(Error::validation(path, field("kind"), "missing or blank"));
    }
    let namespace = raw.namespace.unwrap_or_default();
    if namespace.trim().is_empty() {
        return Err(Error::validation(
            path,
            field("namespace"),
            "missing or blank",
        ));
    }
    let name = raw.name.unwrap_or_default();
    if name.trim().is_empty() {
        return Err(Error::validation(path, field("name"), "missing or blank"));
    }
    let replicas = match raw.replicas {
        None => return Err(Error::validation(path, field("replicas"), "missing")),
        Some(n) if n < 0 => {
            return Err(Error::validation(
                path,
                field("replicas"),
                format!("must be >= 0, got {n}"),
            ));
        }
        Some(n) => n as u32,
    };

    Ok(ResourceEntry {
        kind,
        namespace,
        name,
        replicas,
    })
}

/// Reads and parses the snapshot at `path`.
pub fn parse_file(path: &Path) -> Result<Snapshot> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    let input = String::from_utf8_lossy(&bytes);
    parse(path, &input)
}

/// Fills in write-time defaults: `version` becomes `"v1"` when empty, `timestamp` becomes "now"
/// when at its zero value, and `resources` is sorted deterministically.
pub fn normalize(mut snapshot: Snapshot) -> Snapshot {
    if snapshot.version.is_empty() {
        snapshot.version = SNAPSHOT_VERSION.to_string();
    }
    if snapshot.timestamp == DateTime::<Utc>::default() {
        snapshot.timestamp = Utc::now();
    }
    snapshot.sorted()
}

/// Validates that a (possibly normalized) in-memory snapshot satisfies the invariants a
/// round-trip through `parse` would also enforce. Used by `write_file` before serializing.
fn validate_for_write(path: &Path, snapshot: &Snapshot) -> Result<()> {
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(Error::validation(
            path,
            "version",
            format!(
                "unsupported value {:?}, expected \"{SNAPSHOT_VERSION}\"",
                snapshot.version
            ),
        ));
    }
    if snapshot.node.trim().is_empty() {
        return Err(Error::validation(path, "node", "missing or blank"));
    }
    for (i, r) in snapshot.resources.iter().enumerate() {
        let field = |name: &str| format!("resources[{i}].{name}");
        if r.kind.trim().is_empty() {
            return Err(Error::validation(path, field("kind"), "missing or blank"));
        }
        if r.namespace.trim().is_empty() {
            return Err(Error::validation(
                path,
                field("namespace"),
                "missing or blank",
            ));
        }
        if r.name.trim().is_empty() {
            return Err(Error::validation(path, field("name"), "missing or blank"));
        }
    }
    Ok(())
}

/// Serializes `snapshot` as pretty JSON with a two-space indent and a trailing newline.
fn serialize(snapshot: &Snapshot) -> Result<Vec<u8>> {
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"  ");
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    serde::Serialize::serialize(snapshot, &mut ser)
        .map_err(|e| Error::parse(Path::new("<memory>"), e.to_string()))?;
    buf.push(b'\n');
    Ok(buf)
}

/// Writes `snapshot` to `path` atomically: normalize, validate, serialize, write to a temp file
/// in the destination's own directory, flush to stable storage, set mode 0644, then rename over
/// the destination. No observer can read a half-written file.
pub fn write_file(path: &Path, snapshot: Snapshot) -> Result<()> {
    let snapshot = normalize(snapshot);
    validate_for_write(path, &snapshot)?;
    let bytes = serialize(&snapshot)?;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

    let suffix: u64 = rand::thread_rng().gen();
    let tmp_name = format!(
        ".{}.tmp-{:x}",
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "state".to_string()),
        suffix
    );
    let tmp_path = dir.join(tmp_name);

    let write_result = (|| -> Result<()> {
        let mut file = File::create(&tmp_path).map_err(|e| Error::io(&tmp_path, e))?;
        file.write_all(&bytes)
            .map_err(|e| Error::io(&tmp_path, e))?;
        file.sync_all().map_err(|e| Error::io(&tmp_path, e))?;
        set_mode_0644(&tmp_path)?;
        Ok(())
    })();

    if let Err(e) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        Error::io(path, e)
    })
}

#[cfg(unix)]
fn set_mode_0644(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644)).map_err(|e| Error::io(path, e))
}

#[cfg(not(unix))]
fn set_mode_0644(_path: &Path) -> Result<()> {
    Ok(())
}
