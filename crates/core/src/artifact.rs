// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Artifact store: deterministic path derivation and atomic file placement.
//!
//! Layout: `<base>/<system alias>/<talkgroup>/<YYYY-MM-DD>/<HH-MM-SS>.<ext>` (UTC).
//!
//! Placement never overwrites. The payload is hard-linked into its final name, which fails
//! atomically when the name is taken, and the staging name is unlinked afterwards. When two
//! calls collide on the same second the later one gets a `_1`, `_2`, ... suffix.
//!
//! If linking is impossible (source and destination on different filesystems, or a
//! filesystem without hard links) placement falls back to copying into a freshly created
//! destination and deleting the source. During that copy a partially written file is visible
//! under the final name.

use bytes::Bytes;
use std::borrow::Cow;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;

use crate::error::StorageFailure;
use crate::types::{AudioCodec, CallRecord};

/// Maximum number of suffixed names tried before giving up on a collision.
pub const MAX_PLACEMENT_ATTEMPTS: u32 = 1000;

const STAGING_DIR: &str = ".incoming";
const DEFAULT_PUBLIC_PREFIX: &str = "/uploads";

/// Where an artifact's bytes come from.
#[derive(Debug)]
pub enum ArtifactSource {
    /// A file already on disk (an upload streamed to staging). Moved, not copied.
    TempFile(PathBuf),
    /// An in-memory payload (datagram or peer-link frame).
    Bytes(Bytes),
}

/// Result of a successful placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedArtifact {
    /// Absolute (or base-relative) filesystem path of the stored file.
    pub path: PathBuf,
    /// Public URL under which the file is served read-only.
    pub url: String,
}

/// Stores call audio below a base directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    base_dir: PathBuf,
    public_prefix: String,
}

impl ArtifactStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into(), public_prefix: DEFAULT_PUBLIC_PREFIX.to_string() }
    }

    /// Sets the URL prefix the base directory is served under (default `/uploads`).
    #[must_use]
    pub fn with_public_prefix(mut self, prefix: &str) -> Self {
        let trimmed = prefix.trim().trim_end_matches('/');
        self.public_prefix = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn public_prefix(&self) -> &str {
        &self.public_prefix
    }

    /// Directory holding payloads that are not yet placed. Lives under the base directory so
    /// that placement stays on one filesystem.
    pub fn staging_dir(&self) -> PathBuf {
        self.base_dir.join(STAGING_DIR)
    }

    /// Creates a new, uniquely named staging file.
    ///
    /// # Errors
    ///
    /// Returns [`StorageFailure::Stage`] if the staging directory or file cannot be created.
    pub async fn create_staging_file(&self) -> Result<(PathBuf, tokio::fs::File), StorageFailure> {
        let dir = self.staging_dir();
        ensure_dir(&dir)
            .await
            .map_err(|source| StorageFailure::Stage { path: dir.clone(), source })?;

        let path = dir.join(format!("{}.part", uuid::Uuid::new_v4()));
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|source| StorageFailure::Stage { path: path.clone(), source })?;
        Ok((path, file))
    }

    /// Target path for `record` (before any collision suffix).
    pub fn artifact_path(&self, record: &CallRecord, codec: AudioCodec) -> PathBuf {
        artifact_path(
            &self.base_dir,
            record.system_alias(),
            record.talkgroup_id(),
            record.timestamp(),
            codec,
        )
    }

    /// Public URL of a file below the base directory.
    pub fn public_url(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.base_dir).unwrap_or(path);
        let joined = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{joined}", self.public_prefix)
    }

    /// Moves `source` into the artifact location for `record`.
    ///
    /// The source is consumed: a staged file is removed whether placement succeeds or not.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageFailure`] if directories cannot be created, the payload cannot be
    /// staged or placed, or every suffixed name is already taken.
    pub async fn place(
        &self,
        record: &CallRecord,
        source: ArtifactSource,
        codec: AudioCodec,
    ) -> Result<PlacedArtifact, StorageFailure> {
        let target = self.artifact_path(record, codec);
        let dir = target.parent().map_or_else(|| self.base_dir.clone(), Path::to_path_buf);

        let staged = match source {
            ArtifactSource::TempFile(path) => path,
            ArtifactSource::Bytes(bytes) => self.stage_bytes(&bytes).await?,
        };

        let placed = match ensure_dir(&dir).await {
            Ok(()) => link_into_place(&staged, &target).await,
            Err(source) => Err(StorageFailure::CreateDir { path: dir, source }),
        };

        if let Err(e) = tokio::fs::remove_file(&staged).await {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %staged.display(), error = %e, "Failed to remove staged artifact");
            }
        }

        let path = placed?;
        let url = self.public_url(&path);
        tracing::debug!(path = %path.display(), %url, "Artifact placed");
        Ok(PlacedArtifact { path, url })
    }

    async fn stage_bytes(&self, bytes: &[u8]) -> Result<PathBuf, StorageFailure> {
        let (path, mut file) = self.create_staging_file().await?;
        let written = async {
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;

        if let Err(source) = written {
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(StorageFailure::Stage { path, source });
        }
        Ok(path)
    }
}

/// Pure path derivation: `<base>/<alias>/<talkgroup>/<YYYY-MM-DD>/<HH-MM-SS>.<ext>` in UTC.
pub fn artifact_path(
    base_dir: &Path,
    system_alias: &str,
    talkgroup_id: &str,
    timestamp: i64,
    codec: AudioCodec,
) -> PathBuf {
    let (date, time) = date_time_components(timestamp);
    base_dir
        .join(sanitize_component(system_alias).as_ref())
        .join(sanitize_component(talkgroup_id).as_ref())
        .join(date)
        .join(format!("{time}.{}", codec.extension()))
}

/// `("YYYY-MM-DD", "HH-MM-SS")` for an epoch-seconds timestamp, in UTC.
pub fn date_time_components(timestamp: i64) -> (String, String) {
    let dt = OffsetDateTime::from_unix_timestamp(timestamp).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    (
        format!("{:04}-{:02}-{:02}", dt.year(), u8::from(dt.month()), dt.day()),
        format!("{:02}-{:02}-{:02}", dt.hour(), dt.minute(), dt.second()),
    )
}

/// Makes an untrusted value safe to use as a single path component.
pub fn sanitize_component(raw: &str) -> Cow<'_, str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return Cow::Borrowed("_");
    }
    let unsafe_char = |c: char| matches!(c, '/' | '\\' | '\0') || c.is_control();
    if trimmed.contains(unsafe_char) || trimmed.contains("..") {
        Cow::Owned(trimmed.replace("..", "_").replace(unsafe_char, "_"))
    } else {
        Cow::Borrowed(trimmed)
    }
}

/// `create_dir_all` that treats a concurrent creator winning the race as success.
async fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::create_dir_all(dir).await {
        Err(e) if e.kind() == ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        other => other,
    }
}

fn candidate_path(target: &Path, attempt: u32) -> PathBuf {
    if attempt == 0 {
        return target.to_path_buf();
    }
    let stem = target.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let name = match target.extension() {
        Some(ext) => format!("{stem}_{attempt}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{attempt}"),
    };
    target.with_file_name(name)
}

const fn link_unsupported(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::CrossesDevices | ErrorKind::Unsupported | ErrorKind::PermissionDenied)
}

async fn link_into_place(staged: &Path, target: &Path) -> Result<PathBuf, StorageFailure> {
    for attempt in 0..MAX_PLACEMENT_ATTEMPTS {
        let candidate = candidate_path(target, attempt);
        match tokio::fs::hard_link(staged, &candidate).await {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {},
            Err(e) if link_unsupported(e.kind()) => {
                tracing::debug!(error = %e, "Hard link unavailable, copying artifact into place");
                return copy_into_place(staged, target).await;
            },
            Err(source) => return Err(StorageFailure::Place { path: candidate, source }),
        }
    }
    Err(StorageFailure::Exhausted { path: target.to_path_buf(), attempts: MAX_PLACEMENT_ATTEMPTS })
}

async fn copy_into_place(staged: &Path, target: &Path) -> Result<PathBuf, StorageFailure> {
    for attempt in 0..MAX_PLACEMENT_ATTEMPTS {
        let candidate = candidate_path(target, attempt);
        let mut dest = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(source) => return Err(StorageFailure::Place { path: candidate, source }),
        };

        let copied = async {
            let mut src = tokio::fs::File::open(staged).await?;
            tokio::io::copy(&mut src, &mut dest).await?;
            dest.flush().await?;
            dest.sync_all().await
        }
        .await;

        return match copied {
            Ok(()) => Ok(candidate),
            Err(source) => {
                drop(dest);
                let _ = tokio::fs::remove_file(&candidate).await;
                Err(StorageFailure::Place { path: candidate, source })
            },
        };
    }
    Err(StorageFailure::Exhausted { path: target.to_path_buf(), attempts: MAX_PLACEMENT_ATTEMPTS })
}
