//! Build context: the directory of named files COPY can stage.

use std::path::{Component, Path, PathBuf};

use boxfile_core::error::{BuildError, Result};

/// Normalize a COPY source to a context-relative path.
///
/// Returns `None` when the source is absolute or climbs above the
/// context root through `..`. `.` and `./` normalize to the empty path
/// (the context root itself). Trailing slashes are ignored.
pub fn normalize_source(source: &str) -> Option<PathBuf> {
    if source.is_empty() || source.starts_with('/') || source.starts_with('\\') {
        return None;
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(source).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(normalized)
}

/// Read-only set of files available to a build.
#[derive(Debug, Clone)]
pub struct BuildContext {
    root: PathBuf,
}

impl BuildContext {
    /// Open a directory as build context.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let root = root.canonicalize().map_err(|e| {
            BuildError::Config(format!(
                "Invalid build context path '{}': {}",
                root.display(),
                e
            ))
        })?;
        if !root.is_dir() {
            return Err(BuildError::Config(format!(
                "Build context '{}' is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a COPY source to its location on disk.
    ///
    /// Returns `Ok(None)` when the source is absent or resolves outside
    /// the context (for example through a symlink).
    pub fn resolve(&self, source: &str) -> Result<Option<PathBuf>> {
        let relative = normalize_source(source).ok_or_else(|| {
            BuildError::Config(format!("COPY source '{}' escapes the build context", source))
        })?;
        let candidate = self.root.join(&relative);
        if !candidate.exists() {
            return Ok(None);
        }
        let resolved = candidate.canonicalize()?;
        if !resolved.starts_with(&self.root) {
            tracing::warn!(source, resolved = %resolved.display(), "COPY source resolves outside the build context");
            return Ok(None);
        }
        Ok(Some(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_source() {
        assert_eq!(normalize_source("src/"), Some(PathBuf::from("src")));
        assert_eq!(normalize_source("./a/b/../c"), Some(PathBuf::from("a/c")));
        assert_eq!(normalize_source("."), Some(PathBuf::new()));
        assert_eq!(normalize_source("pyproject.toml"), Some(PathBuf::from("pyproject.toml")));
    }

    #[test]
    fn test_normalize_source_escapes() {
        assert_eq!(normalize_source("/etc/passwd"), None);
        assert_eq!(normalize_source("../secrets"), None);
        assert_eq!(normalize_source("a/../../b"), None);
        assert_eq!(normalize_source(""), None);
    }

    #[test]
    fn test_open_requires_directory() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("file.txt");
        fs::write(&file, "x").unwrap();
        assert!(BuildContext::open(&file).is_err());
        assert!(BuildContext::open(tmp.path().join("missing")).is_err());
        assert!(BuildContext::open(tmp.path()).is_ok());
    }

    #[test]
    fn test_resolve_files_and_dirs() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("pyproject.toml"), "[project]").unwrap();
        fs::create_dir(tmp.path().join("src")).unwrap();

        let ctx = BuildContext::open(tmp.path()).unwrap();
        assert!(ctx.resolve("pyproject.toml").unwrap().is_some());
        assert!(ctx.resolve("src/").unwrap().is_some());
        assert!(ctx.resolve("./src").unwrap().is_some());
        assert!(ctx.resolve("README.md").unwrap().is_none());
        assert!(ctx.resolve("../pyproject.toml").is_err());
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let tmp = TempDir::new().unwrap();
        let ctx = BuildContext::open(tmp.path()).unwrap();
        assert!(ctx.resolve("/etc/hosts").is_err());
        assert!(ctx.resolve("missing").unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret"), "x").unwrap();
        let tmp = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret"), tmp.path().join("link")).unwrap();

        let ctx = BuildContext::open(tmp.path()).unwrap();
        assert!(ctx.resolve("link").unwrap().is_none());
    }
}
