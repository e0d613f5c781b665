//! Deterministic tar layer construction from a directory tree.
//!
//! The whole layer is buffered in memory before hashing, which bounds the
//! practical context size by available memory. Entries are written in
//! lexicographic order of their archive path so the same logical input
//! produces byte-identical output regardless of filesystem walk order.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

use crate::error::{BuildError, Result};

/// A single filesystem layer: an uncompressed tar archive held in memory.
///
/// Immutable once created. Digest and diff-id are computed on first access
/// and cached; repeated calls return the same values. Layers are stored as
/// uncompressed tar, so the digest (over the bytes as distributed) and the
/// diff-id (over the uncompressed bytes) coincide.
#[derive(Debug, Clone)]
pub struct Layer {
    data: Vec<u8>,
    digest: OnceLock<String>,
    diff_id: OnceLock<String>,
}

impl Layer {
    /// Wrap raw tar bytes as a layer.
    pub fn from_tar_bytes(data: Vec<u8>) -> Self {
        Layer {
            data,
            digest: OnceLock::new(),
            diff_id: OnceLock::new(),
        }
    }

    /// Layer size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Digest of the layer as distributed, in "sha256:hex" form.
    pub fn digest(&self) -> &str {
        self.digest.get_or_init(|| sha256_digest(&self.data))
    }

    /// Digest of the uncompressed layer content, in "sha256:hex" form.
    pub fn diff_id(&self) -> &str {
        self.diff_id.get_or_init(|| sha256_digest(&self.data))
    }

    /// Raw tar bytes.
    pub fn tar_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Compute a prefixed SHA-256 digest over a byte stream.
pub fn sha256_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Creates layers from directory contents.
///
/// Holds only immutable configuration; independent instances can be used
/// from separate threads without coordination.
#[derive(Debug, Clone)]
pub struct LayerFactory {
    preserve_permissions: bool,
    preserve_timestamps: bool,
}

impl Default for LayerFactory {
    fn default() -> Self {
        LayerFactory {
            preserve_permissions: true,
            // Normalize for reproducible builds
            preserve_timestamps: false,
        }
    }
}

impl LayerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep original file mode bits instead of normalizing to 0755/0644.
    pub fn with_permission_preservation(mut self, preserve: bool) -> Self {
        self.preserve_permissions = preserve;
        self
    }

    /// Keep original modification times instead of forcing the Unix epoch.
    pub fn with_timestamp_preservation(mut self, preserve: bool) -> Self {
        self.preserve_timestamps = preserve;
        self
    }

    /// Build a layer from the contents of `context_dir`.
    ///
    /// The root directory itself is not archived; every other entry appears
    /// with its context-relative path, using forward slashes on every host.
    /// Regular files, directories and symlinks are archived; any other entry
    /// type (device, socket, fifo) is silently omitted.
    pub fn create_layer(&self, context_dir: &Path) -> Result<Layer> {
        if context_dir.as_os_str().is_empty() {
            return Err(BuildError::Validation(
                "context directory cannot be empty".to_string(),
            ));
        }

        // Clean the path for consistent handling
        let context_dir: PathBuf = context_dir.components().collect();

        let mut entries = Vec::new();
        collect_entries(&context_dir, &context_dir, &mut entries)?;
        entries.sort_by(|a, b| a.1.cmp(&b.1));

        tracing::debug!(
            context = %context_dir.display(),
            entries = entries.len(),
            "creating layer"
        );

        let mut builder = tar::Builder::new(Vec::new());
        for (path, tar_path) in &entries {
            self.append_entry(&mut builder, path, tar_path)?;
        }

        let data = builder
            .into_inner()
            .map_err(|e| BuildError::io(&context_dir, e))?;

        Ok(Layer::from_tar_bytes(data))
    }

    /// Append one filesystem entry to the archive.
    fn append_entry(
        &self,
        builder: &mut tar::Builder<Vec<u8>>,
        path: &Path,
        tar_path: &str,
    ) -> Result<()> {
        let meta = fs::symlink_metadata(path).map_err(|e| BuildError::io(path, e))?;
        let file_type = meta.file_type();

        let mut header = tar::Header::new_gnu();
        header.set_mtime(if self.preserve_timestamps {
            mtime_of(&meta)
        } else {
            0
        });

        if file_type.is_file() {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_mode(self.mode_for(&meta, false));
            header.set_size(meta.len());
            let file = fs::File::open(path).map_err(|e| BuildError::io(path, e))?;
            builder
                .append_data(&mut header, tar_path, file)
                .map_err(|e| BuildError::io(path, e))?;
        } else if file_type.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(self.mode_for(&meta, true));
            header.set_size(0);
            builder
                .append_data(&mut header, format!("{}/", tar_path), std::io::empty())
                .map_err(|e| BuildError::io(path, e))?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(path).map_err(|e| BuildError::io(path, e))?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_mode(self.mode_for(&meta, false));
            header.set_size(0);
            builder
                .append_link(&mut header, tar_path, &target)
                .map_err(|e| BuildError::io(path, e))?;
        } else {
            // Devices, sockets and fifos have no place in an image layer.
            tracing::debug!(path = %path.display(), "skipping special file");
        }

        Ok(())
    }

    fn mode_for(&self, meta: &fs::Metadata, is_dir: bool) -> u32 {
        if self.preserve_permissions {
            permission_bits(meta, is_dir)
        } else if is_dir {
            0o755
        } else {
            0o644
        }
    }
}

/// Recursively collect (absolute path, archive path) pairs, excluding the
/// root itself. Symlinked directories are recorded as symlinks, not walked.
fn collect_entries(root: &Path, dir: &Path, out: &mut Vec<(PathBuf, String)>) -> Result<()> {
    let read_dir = fs::read_dir(dir).map_err(|e| BuildError::io(dir, e))?;
    for entry in read_dir {
        let entry = entry.map_err(|e| BuildError::io(dir, e))?;
        let path = entry.path();

        let relative = path
            .strip_prefix(root)
            .map_err(|_| BuildError::Validation(format!(
                "entry {} escapes context directory {}",
                path.display(),
                root.display()
            )))?;
        let tar_path = archive_path(relative);

        let meta = fs::symlink_metadata(&path).map_err(|e| BuildError::io(&path, e))?;
        let is_dir = meta.file_type().is_dir();

        out.push((path.clone(), tar_path));
        if is_dir {
            collect_entries(root, &path, out)?;
        }
    }
    Ok(())
}

/// Convert a relative path to a forward-slash archive path.
fn archive_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn mtime_of(meta: &fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(unix)]
fn permission_bits(meta: &fs::Metadata, _is_dir: bool) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(_meta: &fs::Metadata, is_dir: bool) -> u32 {
    if is_dir {
        0o755
    } else {
        0o644
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::fs::File;
    use std::io::Read;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn archive_listing(layer: &Layer) -> Vec<(String, tar::EntryType)> {
        let mut archive = tar::Archive::new(layer.tar_bytes());
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                (
                    e.path().unwrap().to_string_lossy().into_owned(),
                    e.header().entry_type(),
                )
            })
            .collect()
    }

    fn set_mtime(path: &Path, secs_after_epoch: u64) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(UNIX_EPOCH + Duration::from_secs(secs_after_epoch))
            .unwrap();
    }

    #[test]
    fn test_empty_context_dir_rejected() {
        let err = LayerFactory::new().create_layer(Path::new("")).unwrap_err();
        assert!(err.to_string().contains("context directory cannot be empty"));
    }

    #[test]
    fn test_missing_context_dir_fails_with_path() {
        let err = LayerFactory::new()
            .create_layer(Path::new("/nonexistent/context"))
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/context"));
    }

    #[test]
    fn test_entry_set_matches_tree() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("test.txt"), "test content").unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub").join("inner.txt"), "inner").unwrap();

        let layer = LayerFactory::new().create_layer(tmp.path()).unwrap();
        let paths: BTreeSet<String> = archive_listing(&layer)
            .into_iter()
            .map(|(p, _)| p.trim_end_matches('/').to_string())
            .collect();

        let expected: BTreeSet<String> = ["test.txt", "sub", "sub/inner.txt"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(paths, expected);
    }

    #[test]
    fn test_entries_sorted_lexicographically() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("z.txt"), "z").unwrap();
        fs::write(tmp.path().join("a.txt"), "a").unwrap();
        fs::create_dir(tmp.path().join("m")).unwrap();
        fs::write(tmp.path().join("m").join("n.txt"), "n").unwrap();

        let layer = LayerFactory::new().create_layer(tmp.path()).unwrap();
        let paths: Vec<String> = archive_listing(&layer)
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        assert_eq!(paths, vec!["a.txt", "m/", "m/n.txt", "z.txt"]);
    }

    #[test]
    fn test_directory_entry_has_trailing_slash_and_zero_size() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("web")).unwrap();

        let layer = LayerFactory::new().create_layer(tmp.path()).unwrap();
        let listing = archive_listing(&layer);
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].0, "web/");
        assert_eq!(listing[0].1, tar::EntryType::Directory);
    }

    #[test]
    fn test_file_content_preserved() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("test.txt"), "test content").unwrap();

        let layer = LayerFactory::new().create_layer(tmp.path()).unwrap();
        let mut archive = tar::Archive::new(layer.tar_bytes());
        let mut entry = archive.entries().unwrap().next().unwrap().unwrap();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        assert_eq!(content, "test content");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_carries_target() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("target.txt"), "data").unwrap();
        std::os::unix::fs::symlink("target.txt", tmp.path().join("link")).unwrap();

        let layer = LayerFactory::new().create_layer(tmp.path()).unwrap();
        let mut archive = tar::Archive::new(layer.tar_bytes());
        let link = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap())
            .find(|e| e.header().entry_type() == tar::EntryType::Symlink)
            .expect("symlink entry present");
        assert_eq!(
            link.link_name().unwrap().unwrap().to_string_lossy(),
            "target.txt"
        );
        assert_eq!(link.header().size().unwrap(), 0);
    }

    #[test]
    fn test_reproducible_diff_id_across_mtimes() {
        let tmp_a = TempDir::new().unwrap();
        let tmp_b = TempDir::new().unwrap();
        for tmp in [&tmp_a, &tmp_b] {
            fs::write(tmp.path().join("app.conf"), "key = value").unwrap();
            fs::create_dir(tmp.path().join("data")).unwrap();
            fs::write(tmp.path().join("data").join("seed"), "42").unwrap();
        }
        set_mtime(&tmp_a.path().join("app.conf"), 1_000_000);
        set_mtime(&tmp_b.path().join("app.conf"), 2_000_000);

        let factory = LayerFactory::new();
        let layer_a = factory.create_layer(tmp_a.path()).unwrap();
        let layer_b = factory.create_layer(tmp_b.path()).unwrap();
        assert_eq!(layer_a.diff_id(), layer_b.diff_id());
    }

    #[test]
    fn test_preserved_timestamps_break_reproducibility() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("f"), "x").unwrap();

        let factory = LayerFactory::new().with_timestamp_preservation(true);
        set_mtime(&tmp.path().join("f"), 1_000_000);
        let first = factory.create_layer(tmp.path()).unwrap();
        set_mtime(&tmp.path().join("f"), 2_000_000);
        let second = factory.create_layer(tmp.path()).unwrap();
        assert_ne!(first.diff_id(), second.diff_id());
    }

    #[test]
    fn test_zeroed_mtime_by_default() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("f"), "x").unwrap();
        set_mtime(&tmp.path().join("f"), 1_000_000);

        let layer = LayerFactory::new().create_layer(tmp.path()).unwrap();
        let mut archive = tar::Archive::new(layer.tar_bytes());
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.header().mtime().unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_permission_normalization() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("script.sh");
        fs::write(&file, "#!/bin/sh").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o750)).unwrap();

        let preserved = LayerFactory::new().create_layer(tmp.path()).unwrap();
        let mut archive = tar::Archive::new(preserved.tar_bytes());
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.header().mode().unwrap() & 0o7777, 0o750);

        let normalized = LayerFactory::new()
            .with_permission_preservation(false)
            .create_layer(tmp.path())
            .unwrap();
        let mut archive = tar::Archive::new(normalized.tar_bytes());
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.header().mode().unwrap() & 0o7777, 0o644);
    }

    #[test]
    fn test_digest_stable_and_well_formed() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("f"), "x").unwrap();

        let layer = LayerFactory::new().create_layer(tmp.path()).unwrap();
        assert!(layer.size() > 0);
        let digest = layer.digest().to_string();
        assert!(digest.starts_with("sha256:"));
        assert_eq!(digest.len(), "sha256:".len() + 64);
        assert_eq!(layer.digest(), digest);
        assert_eq!(layer.diff_id(), digest);
    }

    #[test]
    fn test_sha256_digest_known_value() {
        assert_eq!(
            sha256_digest(b"hello"),
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
