//! Snapshot path resolver (C3): template expansion and parent-directory creation.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const NODE_PLACEHOLDER: &str = "{{.Node}}";

/// Expands `template` by substituting `{{.Node}}` with `node` and a leading `~` with the
/// caller's home directory, then ensures the resulting path's parent directory exists (mode
/// 0755).
///
/// Rejects a blank template, a blank node name, and any placeholder other than `{{.Node}}`.
pub fn resolve_path(template: &str, node: &str) -> Result<PathBuf> {
    if template.trim().is_empty() {
        return Err(Error::PolicyViolation("blank path template".to_string()));
    }
    if node.trim().is_empty() {
        return Err(Error::PolicyViolation("blank node name".to_string()));
    }
    reject_unknown_placeholders(template)?;

    let expanded = template.replace(NODE_PLACEHOLDER, node);
    let expanded = expand_home(&expanded);

    ensure_parent_dir(&expanded)?;
    Ok(expanded)
}

/// Returns `explicit` unchanged when non-empty; otherwise resolves `template`/`node` through
/// [`resolve_path`].
pub fn resolve_path_with_override(
    explicit: Option<&str>,
    template: &str,
    node: &str,
) -> Result<PathBuf> {
    match explicit {
        Some(path) if !path.trim().is_empty() => Ok(PathBuf::from(path)),
        _ => resolve_path(template, node),
    }
}

fn reject_unknown_placeholders(template: &str) -> Result<()> {
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        let after_open = &rest[open + 2..];
        let close = after_open.find("}}").ok_or_else(|| {
            Error::PolicyViolation(format!("unterminated placeholder in template {template:?}"))
        })?;
        let placeholder = &after_open[..close];
        if placeholder != ".Node" {
            return Err(Error::PolicyViolation(format!(
                "unknown template placeholder {{{{.{placeholder}}}}}"
            )));
        }
        rest = &after_open[close + 2..];
    }
    Ok(())
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    set_mode_0755(parent)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_node_and_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let template = format!("{}/state-{{{{.Node}}}}.json", dir.path().join("sub").display());
        let resolved = resolve_path(&template, "w-01").unwrap();
        assert_eq!(resolved.file_name().unwrap(), "state-w-01.json");
        assert!(resolved.parent().unwrap().is_dir());
    }

    #[test]
    fn blank_template_is_rejected() {
        assert!(resolve_path("", "w-01").is_err());
    }

    #[test]
    fn blank_node_is_rejected() {
        assert!(resolve_path("./s-{{.Node}}.json", "").is_err());
    }

    #[test]
    fn unknown_placeholder_is_a_policy_violation() {
        let err = resolve_path("./s-{{.Foo}}.json", "w-01").unwrap_err();
        assert!(matches!(err, Error::PolicyViolation(_)));
    }

    #[test]
    fn explicit_override_wins() {
        let resolved =
            resolve_path_with_override(Some("/explicit/path.json"), "./s-{{.Node}}.json", "w-01")
                .unwrap();
        assert_eq!(resolved, PathBuf::from("/explicit/path.json"));
    }
}
