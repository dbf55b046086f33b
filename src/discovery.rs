//! Source-set discovery.
//!
//! Expands a resource family's include globs, honoring excludes. Matching
//! zero files is fatal: a family with no sources is a configuration mistake,
//! not an empty deployment.

use glob::Pattern;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::diagnostics::{BuildError, BuildResult, ERR_INVALID_PATTERN, ERR_NO_FILES_MATCHED};

pub fn expand_globs(include: &[String], exclude: &[String]) -> BuildResult<Vec<PathBuf>> {
    let exclude: Vec<Pattern> = exclude
        .iter()
        .map(|raw| {
            Pattern::new(raw).map_err(|e| {
                BuildError::new(
                    ERR_INVALID_PATTERN,
                    format!("Invalid exclude pattern '{}': {}", raw, e),
                )
            })
        })
        .collect::<BuildResult<_>>()?;

    let mut files = Vec::new();
    for raw in include {
        let paths = glob::glob(raw).map_err(|e| {
            BuildError::new(
                ERR_INVALID_PATTERN,
                format!("Invalid include pattern '{}': {}", raw, e),
            )
        })?;
        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable glob entry");
                    continue;
                }
            };
            if path.is_file() && !is_excluded(&path, &exclude) {
                files.push(path);
            }
        }
    }

    files.sort();
    files.dedup();

    if files.is_empty() {
        return Err(BuildError::new(
            ERR_NO_FILES_MATCHED,
            format!("No files matched patterns: {}", include.join(", ")),
        ));
    }
    Ok(files)
}

/// Exclude patterns without a separator match the file name alone; patterns
/// with a separator match the whole path.
fn is_excluded(path: &Path, patterns: &[Pattern]) -> bool {
    patterns.iter().any(|pattern| {
        if pattern.as_str().contains('/') {
            pattern.matches_path(path)
        } else {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| pattern.matches(name))
                .unwrap_or(false)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), "export {};\n").unwrap();
    }

    #[test]
    fn test_include_with_exclude() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "orders.ts");
        touch(dir.path(), "customers.ts");
        touch(dir.path(), "orders.test.ts");

        let include = vec![format!("{}/*.ts", dir.path().display())];
        let exclude = vec!["*.test.ts".to_string()];
        let files = expand_globs(&include, &exclude).unwrap();

        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["customers.ts", "orders.ts"]);
    }

    #[test]
    fn test_zero_matches_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let include = vec![format!("{}/*.ts", dir.path().display())];
        let err = expand_globs(&include, &[]).unwrap_err();
        assert_eq!(err.code, ERR_NO_FILES_MATCHED);
    }

    #[test]
    fn test_malformed_pattern_reported_as_such() {
        let err = expand_globs(&["src/[".to_string()], &[]).unwrap_err();
        assert_eq!(err.code, ERR_INVALID_PATTERN);

        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "jobs.ts");
        let include = vec![format!("{}/*.ts", dir.path().display())];
        let err = expand_globs(&include, &["[".to_string()]).unwrap_err();
        assert_eq!(err.code, ERR_INVALID_PATTERN);
    }

    #[test]
    fn test_duplicate_matches_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "jobs.ts");
        let include = vec![
            format!("{}/*.ts", dir.path().display()),
            format!("{}/jobs.ts", dir.path().display()),
        ];
        let files = expand_globs(&include, &[]).unwrap();
        assert_eq!(files.len(), 1);
    }
}
