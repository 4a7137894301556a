//! Path helpers: tilde expansion, the runtime's config directory, and document collection.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use dirs_next::{config_dir, home_dir};

/// Directory name used under the platform config directory.
pub const APP_DIR_NAME: &str = "readmes";

/// Expands a leading `~` (Unix or Windows separator) to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let p = path.trim();
    if p == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = p.strip_prefix("~/").or_else(|| p.strip_prefix("~\\")) {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(p)
}

/// `<config_dir>/readmes`, falling back to the working directory when no config dir exists.
pub fn app_config_dir() -> PathBuf {
    config_dir().unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR_NAME)
}

/// Reads every source into a single document.
///
/// Files are read as-is. Directories contribute their `*.md` files (non-recursive) in file
/// name order. Each source is followed by a blank line so declaration blocks from different
/// files never run together.
pub fn read_document_sources(paths: &[PathBuf]) -> io::Result<String> {
    let mut document = String::new();
    for path in paths {
        if path.is_dir() {
            for file in markdown_files_in(path)? {
                append_source(&mut document, &file)?;
            }
        } else {
            append_source(&mut document, path)?;
        }
    }
    Ok(document)
}

fn markdown_files_in(directory: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|extension| extension.eq_ignore_ascii_case("md")) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn append_source(document: &mut String, path: &Path) -> io::Result<()> {
    let content = fs::read_to_string(path).map_err(|error| io::Error::new(error.kind(), format!("{}: {error}", path.display())))?;
    document.push_str(&content);
    document.push_str("\n\n");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn expands_home_prefix() {
        let expanded = expand_tilde("~/notes/state.json");
        assert!(expanded.ends_with("notes/state.json"));
        assert!(!expanded.to_string_lossy().starts_with('~') || home_dir().is_none());
    }

    #[test]
    fn leaves_plain_paths_alone() {
        assert_eq!(expand_tilde(" /tmp/state.json "), PathBuf::from("/tmp/state.json"));
    }

    #[test]
    fn directory_sources_read_markdown_in_name_order() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.md"), "# Second").unwrap();
        fs::write(dir.path().join("a.md"), "# First").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let document = read_document_sources(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(document, "# First\n\n# Second\n\n");
    }

    #[test]
    fn missing_file_error_names_the_path() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.md");
        let error = read_document_sources(&[missing]).unwrap_err();
        assert!(error.to_string().contains("missing.md"));
    }
}
