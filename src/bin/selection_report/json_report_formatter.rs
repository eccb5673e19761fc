use std::fs;
use std::path::{Path, PathBuf};

use unitsel::SelectionReport;

pub fn write_report(path: &Path, report: &SelectionReport) -> Result<(), String> {
    let mut json = serde_json::to_string_pretty(report)
        .map_err(|err| format!("Failed to serialize selection report: {err}"))?;
    json.push('\n');
    write_staged(path, &json)
}

/// Writes `contents` beside `path` and renames it into place; a failed run
/// leaves any previous report untouched.
pub fn write_staged(path: &Path, contents: &str) -> Result<(), String> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|err| {
            format!("Failed to create report directory '{}': {err}", dir.display())
        })?;
    }

    let staging = staging_path(path);
    fs::write(&staging, contents)
        .map_err(|err| format!("Failed to write report '{}': {err}", staging.display()))?;
    fs::rename(&staging, path).map_err(|err| {
        let _ = fs::remove_file(&staging);
        format!("Failed to move report into '{}': {err}", path.display())
    })
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "selection-report".into());
    name.push(".partial");
    path.with_file_name(name)
}
