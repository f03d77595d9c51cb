// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Listing of stored call artifacts (`GET /api/recordings`).
//!
//! The upload directory is laid out as `system/talkgroup/date/file`. Filters name a path prefix
//! (`system`, then `talkgroup`, then `date`) and exactly one directory is read: the one they
//! select. Without filters that is the list of systems; with all three it is the day's calls.

use callrelay_api::RecordingEntry;
use callrelay_core::ArtifactStore;
use serde::Deserialize;
use std::io::ErrorKind;
use thiserror::Error;

/// Directory levels below the base: system, talkgroup, date.
const DIR_LEVELS: usize = 3;
const LEVEL_NAMES: [&str; DIR_LEVELS] = ["system", "talkgroup", "date"];

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RecordingsQuery {
    pub system: Option<String>,
    pub talkgroup: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Error)]
pub enum RecordingsError {
    #[error("invalid {0} filter")]
    InvalidFilter(&'static str),

    #[error("the {0} filter requires the {1} filter")]
    MissingFilter(&'static str, &'static str),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A filter value must name exactly one directory entry.
fn validate_filter(name: &'static str, value: Option<&str>) -> Result<Option<String>, RecordingsError> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if value.starts_with('.') || value.contains(['/', '\\', '\0']) {
        return Err(RecordingsError::InvalidFilter(name));
    }
    Ok(Some(value.to_string()))
}

/// The filters as a contiguous path prefix.
fn selected_levels(query: &RecordingsQuery) -> Result<Vec<String>, RecordingsError> {
    let filters = [
        validate_filter(LEVEL_NAMES[0], query.system.as_deref())?,
        validate_filter(LEVEL_NAMES[1], query.talkgroup.as_deref())?,
        validate_filter(LEVEL_NAMES[2], query.date.as_deref())?,
    ];

    let mut levels = Vec::with_capacity(DIR_LEVELS);
    for (depth, filter) in filters.into_iter().enumerate() {
        match filter {
            Some(name) if levels.len() == depth => levels.push(name),
            Some(_) => return Err(RecordingsError::MissingFilter(LEVEL_NAMES[depth], LEVEL_NAMES[levels.len()])),
            None => {},
        }
    }
    Ok(levels)
}

/// Lists the directory selected by `query`, sorted by name. Entries above the date level are
/// directories; inside a date directory they are files. A missing directory yields an empty
/// list.
///
/// # Errors
///
/// Returns [`RecordingsError::InvalidFilter`] for filters that are not plain names,
/// [`RecordingsError::MissingFilter`] when a filter is given without the levels above it, and
/// [`RecordingsError::Io`] if the directory exists but cannot be read.
pub async fn list_recordings(
    store: &ArtifactStore,
    query: &RecordingsQuery,
) -> Result<Vec<RecordingEntry>, RecordingsError> {
    let levels = selected_levels(query)?;
    let depth = levels.len();
    let dir = levels.iter().fold(store.base_dir().to_path_buf(), |dir, level| dir.join(level));

    let mut read_dir = match tokio::fs::read_dir(&dir).await {
        Ok(read_dir) => read_dir,
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
            return Ok(Vec::new())
        },
        Err(source) => return Err(RecordingsError::Io { path: dir, source }),
    };

    let mut entries = Vec::new();
    loop {
        let entry = match read_dir.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(source) => return Err(RecordingsError::Io { path: dir.clone(), source }),
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        // Staging area and other hidden entries.
        if name.starts_with('.') {
            continue;
        }
        let Ok(file_type) = entry.file_type().await else {
            continue;
        };
        let directory = depth < DIR_LEVELS;
        if (directory && !file_type.is_dir()) || (!directory && !file_type.is_file()) {
            continue;
        }

        let mut names = levels.clone();
        if directory {
            names.push(name.clone());
        }
        names.resize(DIR_LEVELS, String::new());
        let [system, talkgroup, date]: [String; DIR_LEVELS] =
            names.try_into().unwrap_or_default();

        entries.push(RecordingEntry {
            path: store.public_url(&entry.path()),
            filename: name,
            system,
            talkgroup,
            date,
            directory,
        });
    }

    entries.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn touch(base: &Path, relative: &str) {
        let path = base.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"audio").unwrap();
    }

    fn seeded() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "county/100/2023-11-14/22-13-20.mp3");
        touch(dir.path(), "county/100/2023-11-14/22-13-20_1.mp3");
        touch(dir.path(), "county/200/2023-11-15/01-00-00.mp3");
        touch(dir.path(), "metro/100/2023-11-14/08-00-00.wav");
        touch(dir.path(), ".incoming/abc.part");
        touch(dir.path(), "stray.txt");
        let store = ArtifactStore::new(dir.path());
        (dir, store)
    }

    fn query(system: Option<&str>, talkgroup: Option<&str>, date: Option<&str>) -> RecordingsQuery {
        RecordingsQuery {
            system: system.map(str::to_string),
            talkgroup: talkgroup.map(str::to_string),
            date: date.map(str::to_string),
        }
    }

    fn names(entries: &[RecordingEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.filename.as_str()).collect()
    }

    #[tokio::test]
    async fn unfiltered_lists_only_systems() {
        let (_dir, store) = seeded();
        let entries = list_recordings(&store, &RecordingsQuery::default()).await.unwrap();
        assert_eq!(names(&entries), ["county", "metro"]);
        assert!(entries.iter().all(|e| e.directory));
        assert_eq!(entries[0].path, "/uploads/county");
        assert_eq!(entries[0].system, "county");
        assert_eq!(entries[0].talkgroup, "");
    }

    #[tokio::test]
    async fn system_filter_lists_talkgroups() {
        let (_dir, store) = seeded();
        let entries = list_recordings(&store, &query(Some("county"), None, None)).await.unwrap();
        assert_eq!(names(&entries), ["100", "200"]);
        assert_eq!(entries[1].system, "county");
        assert_eq!(entries[1].talkgroup, "200");
        assert_eq!(entries[1].path, "/uploads/county/200");
        assert!(entries.iter().all(|e| e.directory));
    }

    #[tokio::test]
    async fn full_filter_lists_the_days_files() {
        let (_dir, store) = seeded();
        let entries =
            list_recordings(&store, &query(Some("county"), Some("100"), Some("2023-11-14"))).await.unwrap();
        assert_eq!(names(&entries), ["22-13-20.mp3", "22-13-20_1.mp3"]);
        let first = &entries[0];
        assert!(!first.directory);
        assert_eq!(first.path, "/uploads/county/100/2023-11-14/22-13-20.mp3");
        assert_eq!((first.system.as_str(), first.talkgroup.as_str(), first.date.as_str()), ("county", "100", "2023-11-14"));
    }

    #[tokio::test]
    async fn filters_must_form_a_prefix() {
        let (_dir, store) = seeded();
        let err = list_recordings(&store, &query(None, Some("100"), None)).await.unwrap_err();
        assert!(matches!(err, RecordingsError::MissingFilter("talkgroup", "system")));
        let err = list_recordings(&store, &query(Some("county"), None, Some("2023-11-14"))).await.unwrap_err();
        assert!(matches!(err, RecordingsError::MissingFilter("date", "talkgroup")));
    }

    #[tokio::test]
    async fn missing_directories_are_empty() {
        let (_dir, store) = seeded();
        assert!(list_recordings(&store, &query(Some("nowhere"), None, None)).await.unwrap().is_empty());
        assert!(list_recordings(&store, &query(Some("stray.txt"), None, None)).await.unwrap().is_empty());

        let store = ArtifactStore::new("/nonexistent/callrelay/uploads");
        assert!(list_recordings(&store, &RecordingsQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let (_dir, store) = seeded();
        for bad in ["..", "../etc", "a/b", ".incoming", "a\\b"] {
            let err = list_recordings(&store, &query(Some(bad), None, None)).await.unwrap_err();
            assert!(matches!(err, RecordingsError::InvalidFilter("system")), "{bad}");
        }
        let err =
            list_recordings(&store, &query(Some("county"), Some("100"), Some("../../x"))).await.unwrap_err();
        assert!(matches!(err, RecordingsError::InvalidFilter("date")));
    }
}
