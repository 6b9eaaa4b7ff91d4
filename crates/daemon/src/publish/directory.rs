use std::path::{Component, Path, PathBuf};

use ignore::overrides::OverrideBuilder;
use walkdir::WalkDir;

use super::PublishError;

/// A file found under a source directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the source directory, `/` separated
    pub relative: String,
}

/// Every regular file under `source` whose relative path matches the
///  gitignore-style `glob`. Blocking.
pub fn collect_files(source: &Path, glob: &str) -> Result<Vec<SourceFile>, PublishError> {
    if !source.is_dir() {
        return Err(PublishError::SourceMissing(source.to_path_buf()));
    }
    let matcher = OverrideBuilder::new(source).add(glob)?.build()?;

    let mut files = Vec::new();
    for entry in WalkDir::new(source).follow_links(true) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        if !matcher.matched(relative, false).is_whitelist() {
            tracing::trace!(path = ?relative, "skipping, does not match glob");
            continue;
        }
        files.push(SourceFile {
            path: entry.path().to_path_buf(),
            relative: to_key_path(relative),
        });
    }
    Ok(files)
}

fn to_key_path(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("css/vendor")).unwrap();
        std::fs::write(temp.path().join("index.html"), "<h1>hi</h1>").unwrap();
        std::fs::write(temp.path().join("css/site.css"), "body {}").unwrap();
        std::fs::write(temp.path().join("css/vendor/reset.css"), "* {}").unwrap();
        temp
    }

    fn relatives(files: Vec<SourceFile>) -> Vec<String> {
        let mut relatives: Vec<String> = files.into_iter().map(|f| f.relative).collect();
        relatives.sort();
        relatives
    }

    #[test]
    fn test_everything_matches_default_glob() {
        let temp = tree();
        let files = collect_files(temp.path(), "**/*").unwrap();
        assert_eq!(
            relatives(files),
            vec!["css/site.css", "css/vendor/reset.css", "index.html"]
        );
    }

    #[test]
    fn test_glob_filters_by_relative_path() {
        let temp = tree();
        let files = collect_files(temp.path(), "**/*.css").unwrap();
        assert_eq!(relatives(files), vec!["css/site.css", "css/vendor/reset.css"]);

        let files = collect_files(temp.path(), "*.html").unwrap();
        assert_eq!(relatives(files), vec!["index.html"]);
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let temp = TempDir::new().unwrap();
        let result = collect_files(&temp.path().join("nope"), "**/*");
        assert!(matches!(result, Err(PublishError::SourceMissing(_))));
    }
}
