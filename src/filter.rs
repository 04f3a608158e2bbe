use std::path::{Path, PathBuf};

use anyhow::Result;
use ignore::WalkBuilder;

use crate::error::ConfigurationError;

/// Workbook extensions the exporter can read
pub const SPREADSHEET_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// Finds and checks the workbooks handed to the monitor.
pub struct SpreadsheetFilter {
    root_path: PathBuf,
}

impl SpreadsheetFilter {
    pub fn new<P: AsRef<Path>>(root_path: P) -> Result<Self> {
        let root_path = root_path.as_ref().to_path_buf();
        if !root_path.is_dir() {
            return Err(ConfigurationError::MissingFolder(root_path).into());
        }
        Ok(Self { root_path })
    }

    pub fn is_spreadsheet<P: AsRef<Path>>(path: P) -> bool {
        let path = path.as_ref();

        // Office lock files share the workbook's extension
        if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
            if name.starts_with("~$") {
                return false;
            }
        }

        path.extension()
            .and_then(|s| s.to_str())
            .map(|ext| {
                SPREADSHEET_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    /// Workbooks directly inside the root folder, sorted by path.
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for result in WalkBuilder::new(&self.root_path)
            .max_depth(Some(1))
            .hidden(true)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .ignore(false)
            .parents(false)
            .build()
        {
            match result {
                Ok(entry) => {
                    let path = entry.path();
                    if path.is_file() && Self::is_spreadsheet(path) {
                        files.push(path.to_path_buf());
                    }
                }
                Err(err) => {
                    tracing::warn!("Error walking directory: {}", err);
                }
            }
        }

        files.sort();
        Ok(files)
    }

    pub fn root(&self) -> &Path {
        &self.root_path
    }
}

/// Explicit files first, then discovered ones; rejects unsupported formats.
pub fn collect_watched_files(
    explicit: &[PathBuf],
    folder: Option<&Path>,
) -> Result<Vec<PathBuf>> {
    let mut files = Vec::with_capacity(explicit.len());
    for path in explicit {
        if !SpreadsheetFilter::is_spreadsheet(path) {
            return Err(ConfigurationError::UnsupportedFile(path.clone()).into());
        }
        files.push(absolute(path));
    }

    if let Some(folder) = folder {
        let filter = SpreadsheetFilter::new(folder)?;
        let discovered = filter.discover()?;
        if discovered.is_empty() {
            tracing::warn!("No workbooks found in {}", filter.root().display());
        }
        files.extend(discovered.iter().map(|p| absolute(p)));
    }

    Ok(files)
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_is_spreadsheet() {
        assert!(SpreadsheetFilter::is_spreadsheet("report.xlsx"));
        assert!(SpreadsheetFilter::is_spreadsheet("REPORT.XLSX"));
        assert!(SpreadsheetFilter::is_spreadsheet("budget.ods"));
        assert!(SpreadsheetFilter::is_spreadsheet("old.xls"));
        assert!(!SpreadsheetFilter::is_spreadsheet("notes.txt"));
        assert!(!SpreadsheetFilter::is_spreadsheet("~$report.xlsx"));
        assert!(!SpreadsheetFilter::is_spreadsheet("Makefile"));
    }

    #[test]
    fn test_discover_is_sorted_and_shallow() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("b.xlsx"), b"").unwrap();
        fs::write(root.join("a.xlsm"), b"").unwrap();
        fs::write(root.join("notes.txt"), b"").unwrap();
        fs::write(root.join("~$b.xlsx"), b"").unwrap();
        fs::create_dir(root.join("nested")).unwrap();
        fs::write(root.join("nested").join("c.xlsx"), b"").unwrap();

        let files = SpreadsheetFilter::new(root).unwrap().discover().unwrap();
        assert_eq!(files, vec![root.join("a.xlsm"), root.join("b.xlsx")]);
    }

    #[test]
    fn test_collect_puts_explicit_files_first() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.xlsx"), b"").unwrap();
        let explicit = root.join("z.xlsx");

        let files = collect_watched_files(&[explicit.clone()], Some(root)).unwrap();
        assert_eq!(files, vec![explicit, root.join("a.xlsx")]);
    }

    #[test]
    fn test_collect_rejects_unsupported_files() {
        let err = collect_watched_files(&[PathBuf::from("/data/report.pdf")], None).unwrap_err();
        assert!(err.to_string().contains("Unsupported spreadsheet format"));
    }

    #[test]
    fn test_missing_folder() {
        assert!(SpreadsheetFilter::new("/definitely/not/a/folder").is_err());
    }
}
