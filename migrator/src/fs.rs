use chrono::{DateTime, Utc};
use migration::error::{ErrorKind, MigrationResult};
use migration::migrator::ResourceMigrator;
use migration::{bail, migration_error};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// One line of the migration manifest.
#[derive(Debug, Serialize)]
struct ManifestEntry<'a> {
    path: &'a str,
    bytes: u64,
    migrated_at: DateTime<Utc>,
}

/// Migrates files by copying them from a source tree into a target tree.
///
/// Descriptors are paths relative to the source directory. Every copied file is recorded as a
/// JSON line in the manifest, which is flushed and closed when the migrator is released.
#[derive(Debug)]
pub struct FileCopyMigrator {
    source_dir: PathBuf,
    target_dir: PathBuf,
    /// `None` once the migrator has been closed.
    manifest: Mutex<Option<BufWriter<File>>>,
}

impl FileCopyMigrator {
    /// Prepares the target directory and opens the manifest for appending.
    pub async fn open(
        source_dir: impl Into<PathBuf>,
        target_dir: impl Into<PathBuf>,
        manifest_path: &Path,
    ) -> MigrationResult<Self> {
        let source_dir = source_dir.into();
        let target_dir = target_dir.into();

        if !fs::metadata(&source_dir).await?.is_dir() {
            bail!(
                ErrorKind::ResourceNotFound,
                "Source path is not a directory",
                source_dir.display()
            );
        }

        fs::create_dir_all(&target_dir).await?;
        if let Some(parent) = manifest_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let manifest = OpenOptions::new()
            .create(true)
            .append(true)
            .open(manifest_path)
            .await?;

        info!(
            source_dir = %source_dir.display(),
            target_dir = %target_dir.display(),
            manifest = %manifest_path.display(),
            "opened file copy migrator"
        );

        Ok(Self {
            source_dir,
            target_dir,
            manifest: Mutex::new(Some(BufWriter::new(manifest))),
        })
    }

    /// Returns the directory files are copied from.
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }
}

impl ResourceMigrator for FileCopyMigrator {
    type Descriptor = PathBuf;

    fn name() -> &'static str {
        "file_copy"
    }

    async fn migrate(&self, relative_path: &PathBuf) -> MigrationResult<()> {
        if !is_contained(relative_path) {
            bail!(
                ErrorKind::MigrationFailed,
                "Resource path escapes the source directory",
                relative_path.display()
            );
        }

        if self.manifest.lock().await.is_none() {
            bail!(
                ErrorKind::InvalidState,
                "File copy migrator is closed",
                relative_path.display()
            );
        }

        let source = self.source_dir.join(relative_path);
        let target = self.target_dir.join(relative_path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let bytes = fs::copy(&source, &target).await.map_err(|err| {
            migration_error!(
                ErrorKind::MigrationFailed,
                "Failed to copy resource",
                source.display(),
                source: err
            )
        })?;

        let path = relative_path.to_string_lossy();
        let line = manifest_line(&ManifestEntry {
            path: &path,
            bytes,
            migrated_at: Utc::now(),
        })?;

        let mut manifest = self.manifest.lock().await;
        let Some(writer) = manifest.as_mut() else {
            bail!(
                ErrorKind::InvalidState,
                "File copy migrator was closed during the copy",
                relative_path.display()
            );
        };
        writer.write_all(&line).await?;

        debug!(path = %path, bytes, "copied resource");

        Ok(())
    }

    async fn close(&self) -> MigrationResult<()> {
        let Some(mut writer) = self.manifest.lock().await.take() else {
            return Ok(());
        };

        writer.flush().await?;
        writer.get_ref().sync_all().await?;

        info!("closed migration manifest");

        Ok(())
    }
}

/// Renders `entry` as one newline-terminated JSON line.
fn manifest_line<T: Serialize>(entry: &T) -> MigrationResult<Vec<u8>> {
    let mut line = serde_json::to_vec(entry).map_err(|err| {
        migration_error!(
            ErrorKind::SerializationError,
            "Failed to serialize manifest entry",
            detail = err.to_string(),
            source: err
        )
    })?;
    line.push(b'\n');

    Ok(line)
}

/// Returns whether `path` is relative and stays below the directory it is joined to.
fn is_contained(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

/// Lists every regular file below `root` as a path relative to it.
pub async fn list_resources(root: &Path) -> MigrationResult<Vec<PathBuf>> {
    let mut resources = Vec::new();
    let mut directories = vec![PathBuf::new()];

    while let Some(relative_dir) = directories.pop() {
        let mut entries = fs::read_dir(root.join(&relative_dir)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let relative_path = relative_dir.join(entry.file_name());
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                directories.push(relative_path);
            } else if file_type.is_file() {
                resources.push(relative_path);
            }
        }
    }

    resources.sort();

    Ok(resources)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScratchDir(PathBuf);

    impl ScratchDir {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!("migrator-{}", uuid::Uuid::new_v4()));
            std::fs::create_dir_all(&path).unwrap();
            Self(path)
        }
    }

    impl Drop for ScratchDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    async fn migrator(scratch: &ScratchDir) -> FileCopyMigrator {
        let source = scratch.0.join("source");
        std::fs::create_dir_all(source.join("nested")).unwrap();
        std::fs::write(source.join("a.txt"), b"alpha").unwrap();
        std::fs::write(source.join("nested/b.txt"), b"bravo!").unwrap();

        FileCopyMigrator::open(
            source,
            scratch.0.join("target"),
            &scratch.0.join("target/manifest.jsonl"),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn copies_files_and_records_them_in_the_manifest() {
        let scratch = ScratchDir::new();
        let migrator = migrator(&scratch).await;

        migrator.migrate(&PathBuf::from("a.txt")).await.unwrap();
        migrator
            .migrate(&PathBuf::from("nested/b.txt"))
            .await
            .unwrap();
        migrator.close().await.unwrap();

        assert_eq!(
            std::fs::read(scratch.0.join("target/nested/b.txt")).unwrap(),
            b"bravo!"
        );

        let manifest = std::fs::read_to_string(scratch.0.join("target/manifest.jsonl")).unwrap();
        let entries: Vec<serde_json::Value> = manifest
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["path"], "a.txt");
        assert_eq!(entries[0]["bytes"], 5);
        assert_eq!(entries[1]["bytes"], 6);
    }

    #[tokio::test]
    async fn missing_source_file_fails_the_unit() {
        let scratch = ScratchDir::new();
        let migrator = migrator(&scratch).await;

        let err = migrator
            .migrate(&PathBuf::from("missing.txt"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MigrationFailed);
    }

    #[tokio::test]
    async fn paths_escaping_the_source_are_rejected() {
        let scratch = ScratchDir::new();
        let migrator = migrator(&scratch).await;

        for path in ["../outside.txt", "/etc/passwd", ""] {
            let err = migrator.migrate(&PathBuf::from(path)).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MigrationFailed, "{path}");
        }
    }

    #[tokio::test]
    async fn migrations_after_close_are_refused() {
        let scratch = ScratchDir::new();
        let migrator = migrator(&scratch).await;

        migrator.close().await.unwrap();
        migrator.close().await.unwrap();

        let err = migrator
            .migrate(&PathBuf::from("a.txt"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn manifest_lines_are_newline_terminated_json() {
        let line = manifest_line(&ManifestEntry {
            path: "a.txt",
            bytes: 5,
            migrated_at: Utc::now(),
        })
        .unwrap();

        assert_eq!(line.last(), Some(&b'\n'));
        let entry: serde_json::Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(entry["path"], "a.txt");
    }

    #[test]
    fn unserializable_manifest_entry_is_a_serialization_error() {
        // JSON object keys must be strings.
        let entry = std::collections::BTreeMap::from([(vec![1u8], 1u8)]);

        let err = manifest_line(&entry).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SerializationError);
    }

    #[tokio::test]
    async fn lists_files_recursively_relative_to_the_root() {
        let scratch = ScratchDir::new();
        let migrator = migrator(&scratch).await;

        let resources = list_resources(migrator.source_dir()).await.unwrap();

        assert_eq!(
            resources,
            vec![PathBuf::from("a.txt"), PathBuf::from("nested/b.txt")]
        );
    }
}
