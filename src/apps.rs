//! `get-installed-apps`: list applications installed on the host.
//!
//! macOS scans `.app` bundles in the standard application directories; other
//! Unix systems scan `.desktop` entries. Both scanners compile everywhere,
//! the platform only decides which directories are consulted.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::mcp::server::ToolHandler;
use crate::mcp::ToolDescriptor;

pub struct InstalledAppsTool;

#[async_trait]
impl ToolHandler for InstalledAppsTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "get-installed-apps".to_string(),
            description: "List applications installed on this machine".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {},
            }),
        }
    }

    async fn call(&self, _arguments: Value) -> Result<String> {
        let names = installed_apps();
        if names.is_empty() {
            return Ok("No applications found.".to_string());
        }
        Ok(names.into_iter().collect::<Vec<_>>().join("\n"))
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Application names from the platform's standard locations, sorted and
/// deduplicated.
pub fn installed_apps() -> BTreeSet<String> {
    let mut names = BTreeSet::new();

    if cfg!(target_os = "macos") {
        for dir in [
            Some(PathBuf::from("/Applications")),
            home_dir().map(|h| h.join("Applications")),
        ]
        .into_iter()
        .flatten()
        {
            names.extend(scan_app_bundles(&dir));
        }
    } else {
        for dir in [
            Some(PathBuf::from("/usr/share/applications")),
            home_dir().map(|h| h.join(".local/share/applications")),
        ]
        .into_iter()
        .flatten()
        {
            names.extend(scan_desktop_entries(&dir));
        }
    }

    names
}

/// Names of `.app` bundles directly inside `dir`.
pub fn scan_app_bundles(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("app") {
                return None;
            }
            path.file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
        })
        .collect()
}

/// Display names of `.desktop` entries directly inside `dir`.
pub fn scan_desktop_entries(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("desktop") {
                return None;
            }
            let fallback = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string);
            match std::fs::read_to_string(&path) {
                Ok(content) => desktop_entry_name(&content).or(fallback),
                Err(_) => fallback,
            }
        })
        .collect()
}

/// Extract the `Name=` value from a `.desktop` file body.
fn desktop_entry_name(content: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("Name="))
        .map(str::to_string)
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn desktop_name_extraction() {
        let content = "[Desktop Entry]\nType=Application\nName=Text Editor\nExec=gedit\n";
        assert_eq!(desktop_entry_name(content), Some("Text Editor".to_string()));
        assert_eq!(desktop_entry_name("[Desktop Entry]\nExec=foo\n"), None);
        assert_eq!(desktop_entry_name("Name=\n"), None);
    }

    #[test]
    fn scans_desktop_entries_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("editor.desktop"),
            "[Desktop Entry]\nName=Editor\n",
        )
        .unwrap();
        fs::write(dir.path().join("noname.desktop"), "[Desktop Entry]\n").unwrap();
        fs::write(dir.path().join("readme.txt"), "not an app").unwrap();

        let mut names = scan_desktop_entries(dir.path());
        names.sort();
        assert_eq!(names, ["Editor", "noname"]);
    }

    #[test]
    fn scans_app_bundles_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("Safari.app")).unwrap();
        fs::create_dir(dir.path().join("Notes.app")).unwrap();
        fs::create_dir(dir.path().join("NotAnApp")).unwrap();

        let mut names = scan_app_bundles(dir.path());
        names.sort();
        assert_eq!(names, ["Notes", "Safari"]);
    }

    #[test]
    fn missing_directory_yields_nothing() {
        assert!(scan_app_bundles(Path::new("/nonexistent/path")).is_empty());
        assert!(scan_desktop_entries(Path::new("/nonexistent/path")).is_empty());
    }
}
