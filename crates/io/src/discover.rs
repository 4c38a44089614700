use std::io;
use std::path::{Path, PathBuf};

/// Scan `folder` (non-recursively) for source workbooks.
///
/// `.xlsx` files are always included; `.xls` only when `include_xls` is
/// set. Office lockfiles (`~$` prefix) are excluded. The result is sorted
/// by path so workers are fed deterministically.
pub fn discover_sources(folder: &Path, include_xls: bool) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(folder)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            continue;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with("~$") {
            continue;
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("xlsx") => files.push(path),
            Some("xls") if include_xls => files.push(path),
            _ => {}
        }
    }

    files.sort();
    Ok(files)
}

/// Contributor identifier for a source file: the base name without
/// extension.
pub fn source_label(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn touch(dir: &Path, name: &str) {
        File::create(dir.join(name)).unwrap();
    }

    #[test]
    fn scan_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.xlsx");
        touch(dir.path(), "a.xlsx");
        touch(dir.path(), "~$a.xlsx");
        touch(dir.path(), "legacy.xls");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "macro.xlsm");
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        touch(&dir.path().join("nested"), "c.xlsx");

        let found = discover_sources(dir.path(), false).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.xlsx", "b.xlsx"]);
    }

    #[test]
    fn xls_only_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "legacy.xls");
        touch(dir.path(), "new.xlsx");

        let without = discover_sources(dir.path(), false).unwrap();
        assert_eq!(without.len(), 1);

        let with = discover_sources(dir.path(), true).unwrap();
        assert_eq!(with.len(), 2);
    }

    #[test]
    fn extension_matching_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "UPPER.XLSX");

        let found = discover_sources(dir.path(), false).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn label_is_file_stem() {
        assert_eq!(source_label(Path::new("/data/region-a.xlsx")), "region-a");
        assert_eq!(source_label(Path::new("report.v2.xlsx")), "report.v2");
    }
}
