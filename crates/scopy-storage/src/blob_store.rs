//! Owns the external blob directory and the thumbnail cache directory
//! (spec §4.3). Grounded on `uc-infra/src/fs/blob_store.rs`'s atomic
//! write-then-rename, adapted to the flat `<uuid>.<ext>` naming this spec
//! wants instead of the teacher's per-blob metadata sidecar directory.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StorageResult;

pub struct BlobStore {
    external_root: PathBuf,
    thumbnail_root: PathBuf,
}

impl BlobStore {
    pub async fn open(external_root: PathBuf, thumbnail_root: PathBuf) -> StorageResult<Self> {
        fs::create_dir_all(&external_root).await?;
        fs::create_dir_all(&thumbnail_root).await?;
        Ok(Self {
            external_root,
            thumbnail_root,
        })
    }

    pub fn external_root(&self) -> &Path {
        &self.external_root
    }

    pub fn thumbnail_root(&self) -> &Path {
        &self.thumbnail_root
    }

    /// Writes `bytes` under the external blob directory as `<id>.<ext>`,
    /// atomically: write to a sibling temp path, then rename. Returns the
    /// absolute path stored as the row's `storage_ref`.
    pub async fn write_external(&self, id: Uuid, ext: &str, bytes: &[u8]) -> StorageResult<String> {
        let final_path = self.external_root.join(format!("{id}.{ext}"));
        let tmp_path = self.external_root.join(format!("{id}.{ext}.tmp"));
        fs::write(&tmp_path, bytes).await?;
        if let Ok(file) = fs::File::open(&tmp_path).await {
            let _ = file.sync_all().await;
        }
        fs::rename(&tmp_path, &final_path).await?;
        Ok(final_path.to_string_lossy().into_owned())
    }

    pub async fn read(&self, storage_ref: &str) -> StorageResult<Vec<u8>> {
        fs::read(storage_ref).await.map_err(Into::into)
    }

    pub async fn remove(&self, storage_ref: &str) {
        if let Err(err) = fs::remove_file(storage_ref).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(storage_ref, error = %err, "failed to remove external blob");
            }
        }
    }

    pub fn thumbnail_path_for_image(&self, content_hash: &str) -> PathBuf {
        self.thumbnail_root.join(format!("{content_hash}.png"))
    }

    pub fn thumbnail_path_for_file(&self, content_hash: &str) -> PathBuf {
        self.thumbnail_root.join(format!("file_{content_hash}.png"))
    }

    /// Atomically writes a thumbnail PNG, replacing any prior one.
    pub async fn write_thumbnail(&self, path: &Path, png_bytes: &[u8]) -> StorageResult<()> {
        let tmp_path = path.with_extension("png.tmp");
        fs::write(&tmp_path, png_bytes).await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    /// Deletes every file under the external blob root whose basename isn't
    /// in `referenced`. Best-effort: read/remove failures are logged, not
    /// surfaced (spec §4.4 orphan sweep).
    pub async fn sweep_orphans(&self, referenced: &std::collections::HashSet<String>) -> usize {
        let mut removed = 0;
        let mut entries = match fs::read_dir(&self.external_root).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, "could not read external blob directory for orphan sweep");
                return 0;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let path_str = path.to_string_lossy().into_owned();
            if path_str.ends_with(".tmp") || referenced.contains(&path_str) {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => {
                    removed += 1;
                    debug!(path = %path.display(), "removed orphaned blob");
                }
                Err(err) => warn!(path = %path.display(), error = %err, "failed to remove orphaned blob"),
            }
        }
        removed
    }
}

/// Validates a `storage_ref` against path traversal and foreign roots
/// (spec §3, §4.3). Never propagated as a hard error to callers: failures
/// are a skip, logged by the caller.
pub fn validate_storage_ref(storage_ref: &str, root: &Path) -> bool {
    let path = Path::new(storage_ref);
    let Some(basename) = path.file_name().and_then(|f| f.to_str()) else {
        return false;
    };
    if basename.contains('/') || storage_ref.contains("..") {
        return false;
    }
    let stem = Path::new(basename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    if Uuid::parse_str(stem).is_err() {
        return false;
    }
    let (Ok(canonical_path), Ok(canonical_root)) = (path.canonicalize(), root.canonicalize()) else {
        return false;
    };
    let mut root_with_sep = canonical_root.into_os_string();
    root_with_sep.push(std::path::MAIN_SEPARATOR.to_string());
    canonical_path.as_os_str().to_string_lossy().starts_with(&*root_with_sep.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_external_then_validate_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let external = dir.path().join("external");
        let thumbs = dir.path().join("thumbnails");
        let store = BlobStore::open(external.clone(), thumbs).await.unwrap();

        let id = Uuid::new_v4();
        let stored = store.write_external(id, "bin", b"hello").await.unwrap();
        assert!(validate_storage_ref(&stored, &external));

        let bytes = store.read(&stored).await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn rejects_traversal_and_foreign_basenames() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!validate_storage_ref("../../etc/passwd", dir.path()));
        assert!(!validate_storage_ref("not-a-uuid.bin", dir.path()));
    }

    #[tokio::test]
    async fn sweep_orphans_removes_unreferenced_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let external = dir.path().join("external");
        let thumbs = dir.path().join("thumbnails");
        let store = BlobStore::open(external.clone(), thumbs).await.unwrap();

        let kept = Uuid::new_v4();
        let orphan = Uuid::new_v4();
        let kept_ref = store.write_external(kept, "bin", b"kept").await.unwrap();
        store.write_external(orphan, "bin", b"orphan").await.unwrap();

        let mut referenced = std::collections::HashSet::new();
        referenced.insert(kept_ref.clone());

        let removed = store.sweep_orphans(&referenced).await;
        assert_eq!(removed, 1);
        assert!(fs::metadata(&kept_ref).await.is_ok());
    }
}
