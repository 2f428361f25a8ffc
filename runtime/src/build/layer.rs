//! Layer creation utilities for image building.
//!
//! Provides filesystem snapshotting, diffing, and reproducible tar.gz
//! layer creation for the filesystem deltas produced by build steps.

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use boxfile_core::error::{BuildError, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Metadata for a single file in a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    /// Relative path from rootfs root
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Modification time (nanoseconds since epoch)
    pub mtime: i128,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// A snapshot of a directory's file state.
#[derive(Debug, Clone)]
pub struct DirSnapshot {
    /// Map of relative path → file entry
    pub entries: HashMap<PathBuf, FileEntry>,
}

impl DirSnapshot {
    /// Take a snapshot of a directory, recording all files and their metadata.
    pub fn capture(root: &Path) -> Result<Self> {
        let mut entries = HashMap::new();
        walk_dir(root, root, &mut entries)?;
        Ok(DirSnapshot { entries })
    }

    /// Compute the diff between this snapshot (before) and another (after).
    ///
    /// Returns paths of files that were added or modified, sorted.
    pub fn diff(&self, after: &DirSnapshot) -> Vec<PathBuf> {
        let mut changed: Vec<PathBuf> = after
            .entries
            .iter()
            .filter(|(path, after_entry)| match self.entries.get(*path) {
                None => true,
                Some(before_entry) => {
                    !after_entry.is_dir
                        && (before_entry.size != after_entry.size
                            || before_entry.mtime != after_entry.mtime)
                }
            })
            .map(|(path, _)| path.clone())
            .collect();

        changed.sort();
        changed
    }
}

/// Recursively walk a directory and collect file entries.
fn walk_dir(root: &Path, current: &Path, entries: &mut HashMap<PathBuf, FileEntry>) -> Result<()> {
    let read_dir = std::fs::read_dir(current).map_err(|e| {
        BuildError::Layer(format!(
            "Failed to read directory {}: {}",
            current.display(),
            e
        ))
    })?;

    for entry in read_dir {
        let entry = entry
            .map_err(|e| BuildError::Layer(format!("Failed to read directory entry: {}", e)))?;

        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .map_err(|e| {
                BuildError::Layer(format!(
                    "Failed to compute relative path for {}: {}",
                    path.display(),
                    e
                ))
            })?
            .to_path_buf();

        let metadata = std::fs::symlink_metadata(&path).map_err(|e| {
            BuildError::Layer(format!(
                "Failed to read metadata for {}: {}",
                path.display(),
                e
            ))
        })?;

        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as i128)
            .unwrap_or(0);

        entries.insert(
            relative.clone(),
            FileEntry {
                path: relative,
                size: metadata.len(),
                mtime,
                is_dir: metadata.is_dir(),
            },
        );

        if metadata.is_dir() {
            walk_dir(root, &path, entries)?;
        }
    }

    Ok(())
}

/// One path added by a layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeltaEntry {
    /// Absolute path inside the image
    pub path: String,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// A packed layer: compressed tarball plus its digests.
#[derive(Debug, Clone)]
pub struct LayerBlob {
    /// gzip-compressed tar bytes
    pub bytes: Vec<u8>,
    /// SHA256 of the compressed bytes (hex, no prefix)
    pub digest: String,
    /// SHA256 of the uncompressed tar (hex, no prefix)
    pub diff_id: String,
    /// Paths contained in the layer
    pub entries: Vec<DeltaEntry>,
}

impl LayerBlob {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Pack `paths` (relative to `rootfs`) into a reproducible tar.gz layer.
///
/// Parent directories are added for every path. Entries are sorted and
/// written with zeroed timestamps and ownership, so identical trees give
/// identical digests.
pub fn pack_layer(rootfs: &Path, paths: &[PathBuf]) -> Result<LayerBlob> {
    let mut all: BTreeSet<PathBuf> = BTreeSet::new();
    for path in paths {
        let mut ancestor = path.parent();
        while let Some(dir) = ancestor {
            if dir.as_os_str().is_empty() {
                break;
            }
            all.insert(dir.to_path_buf());
            ancestor = dir.parent();
        }
        all.insert(path.clone());
    }

    let mut builder = tar::Builder::new(Vec::new());
    let mut entries = Vec::with_capacity(all.len());

    for relative in &all {
        let full_path = rootfs.join(relative);
        let metadata = match std::fs::symlink_metadata(&full_path) {
            Ok(m) => m,
            // Removed between snapshot and packing
            Err(_) => continue,
        };

        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        if metadata.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            header.set_cksum();
            builder
                .append_data(&mut header, relative, std::io::empty())
                .map_err(|e| {
                    BuildError::Layer(format!(
                        "Failed to add directory {} to layer: {}",
                        relative.display(),
                        e
                    ))
                })?;
            entries.push(DeltaEntry {
                path: image_path(relative),
                size: 0,
                is_dir: true,
            });
        } else if metadata.file_type().is_symlink() {
            let target = std::fs::read_link(&full_path)?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_mode(0o777);
            header.set_size(0);
            builder
                .append_link(&mut header, relative, &target)
                .map_err(|e| {
                    BuildError::Layer(format!(
                        "Failed to add symlink {} to layer: {}",
                        relative.display(),
                        e
                    ))
                })?;
            entries.push(DeltaEntry {
                path: image_path(relative),
                size: 0,
                is_dir: false,
            });
        } else {
            let file = std::fs::File::open(&full_path)?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_mode(file_mode(&metadata));
            header.set_size(metadata.len());
            header.set_cksum();
            builder.append_data(&mut header, relative, file).map_err(|e| {
                BuildError::Layer(format!(
                    "Failed to add file {} to layer: {}",
                    relative.display(),
                    e
                ))
            })?;
            entries.push(DeltaEntry {
                path: image_path(relative),
                size: metadata.len(),
                is_dir: false,
            });
        }
    }

    let tar_bytes = builder
        .into_inner()
        .map_err(|e| BuildError::Layer(format!("Failed to finalize layer: {}", e)))?;
    let diff_id = sha256_bytes(&tar_bytes);

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(&tar_bytes)
        .map_err(|e| BuildError::Layer(format!("Failed to compress layer: {}", e)))?;
    let bytes = encoder
        .finish()
        .map_err(|e| BuildError::Layer(format!("Failed to compress layer: {}", e)))?;
    let digest = sha256_bytes(&bytes);

    Ok(LayerBlob {
        bytes,
        digest,
        diff_id,
        entries,
    })
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    if metadata.permissions().mode() & 0o111 != 0 {
        0o755
    } else {
        0o644
    }
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}

/// Render a rootfs-relative path as an absolute image path.
fn image_path(relative: &Path) -> String {
    let rendered: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!("/{}", rendered.join("/"))
}

/// Compute SHA256 digest of raw bytes.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Read;
    use tempfile::TempDir;

    fn tar_paths(blob: &LayerBlob) -> Vec<String> {
        let decoder = flate2::read::GzDecoder::new(&blob.bytes[..]);
        let mut archive = tar::Archive::new(decoder);
        archive
            .entries()
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path().unwrap().to_string_lossy().trim_end_matches('/').to_string())
            .collect()
    }

    // --- DirSnapshot ---

    #[test]
    fn test_snapshot_empty_dir() {
        let tmp = TempDir::new().unwrap();
        let snap = DirSnapshot::capture(tmp.path()).unwrap();
        assert!(snap.entries.is_empty());
    }

    #[test]
    fn test_snapshot_with_files() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "hello").unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub").join("b.txt"), "world").unwrap();

        let snap = DirSnapshot::capture(tmp.path()).unwrap();
        assert!(snap.entries.contains_key(&PathBuf::from("a.txt")));
        assert!(snap.entries[&PathBuf::from("sub")].is_dir);
        assert!(snap.entries.contains_key(&PathBuf::from("sub/b.txt")));
    }

    #[test]
    fn test_snapshot_diff_new_and_modified() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "hello").unwrap();
        fs::write(tmp.path().join("keep.txt"), "same").unwrap();

        let before = DirSnapshot::capture(tmp.path()).unwrap();

        fs::write(tmp.path().join("a.txt"), "hello world").unwrap();
        fs::write(tmp.path().join("b.txt"), "new").unwrap();

        let after = DirSnapshot::capture(tmp.path()).unwrap();
        assert_eq!(
            before.diff(&after),
            vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]
        );
    }

    #[test]
    fn test_snapshot_diff_no_changes() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "hello").unwrap();

        let before = DirSnapshot::capture(tmp.path()).unwrap();
        let after = DirSnapshot::capture(tmp.path()).unwrap();
        assert!(before.diff(&after).is_empty());
    }

    // --- pack_layer ---

    #[test]
    fn test_pack_layer_adds_parents() {
        let rootfs = TempDir::new().unwrap();
        fs::create_dir_all(rootfs.path().join("app/src")).unwrap();
        fs::write(rootfs.path().join("app/src/main.py"), "print('hi')").unwrap();

        let blob = pack_layer(rootfs.path(), &[PathBuf::from("app/src/main.py")]).unwrap();

        assert_eq!(tar_paths(&blob), vec!["app", "app/src", "app/src/main.py"]);
        let paths: Vec<&str> = blob.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/app", "/app/src", "/app/src/main.py"]);
        assert_eq!(blob.entries[2].size, 11);
        assert_eq!(blob.digest.len(), 64);
        assert_eq!(blob.diff_id.len(), 64);
        assert_ne!(blob.digest, blob.diff_id);
    }

    #[test]
    fn test_pack_layer_reproducible() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        for root in [a.path(), b.path()] {
            fs::create_dir_all(root.join("app")).unwrap();
            fs::write(root.join("app/x.txt"), "same content").unwrap();
        }
        let paths = vec![PathBuf::from("app/x.txt")];
        let first = pack_layer(a.path(), &paths).unwrap();
        let second = pack_layer(b.path(), &paths).unwrap();
        assert_eq!(first.digest, second.digest);
        assert_eq!(first.diff_id, second.diff_id);
    }

    #[test]
    fn test_pack_layer_diff_id_matches_uncompressed() {
        let rootfs = TempDir::new().unwrap();
        fs::write(rootfs.path().join("f"), "data").unwrap();
        let blob = pack_layer(rootfs.path(), &[PathBuf::from("f")]).unwrap();

        let mut raw = Vec::new();
        flate2::read::GzDecoder::new(&blob.bytes[..])
            .read_to_end(&mut raw)
            .unwrap();
        assert_eq!(sha256_bytes(&raw), blob.diff_id);
        assert_eq!(sha256_bytes(&blob.bytes), blob.digest);
    }

    #[test]
    fn test_pack_layer_empty() {
        let rootfs = TempDir::new().unwrap();
        let blob = pack_layer(rootfs.path(), &[]).unwrap();
        assert!(blob.entries.is_empty());
        assert!(blob.size() > 0);
    }

    // --- sha256 ---

    #[test]
    fn test_sha256_bytes() {
        assert_eq!(
            sha256_bytes(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
