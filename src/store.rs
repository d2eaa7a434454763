//! Collaborator interfaces
//!
//! The splitter talks to two external services: a document store holding
//! book records (including the persisted structure) and an object store
//! serving EPUB files by URL. Both are async traits so that any backend can
//! be plugged in. Filesystem-backed implementations are provided for local
//! deployments and tests.

use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{error::EpubError, types::BookStructure};

/// A book record as kept by the document store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRecord {
    pub book_id: String,

    #[serde(default)]
    pub title: String,

    /// Location of the EPUB file in the object store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epub_url: Option<String>,

    /// The persisted structure, once a parse has completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<BookStructure>,
}

/// Source of raw EPUB bytes
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Downloads the object at `url`
    ///
    /// Failures are reported as [EpubError::DownloadFailure].
    async fn download(&self, url: &str) -> Result<Vec<u8>, EpubError>;
}

/// Store of book records
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetches the record of a book, `None` when there is no such book
    async fn get(&self, book_id: &str) -> Result<Option<BookRecord>, EpubError>;

    /// Replaces the persisted structure of a book
    async fn put(&self, book_id: &str, structure: &BookStructure) -> Result<(), EpubError>;
}

/// Distinguishes the temporary files of concurrent writes
static NEXT_WRITE: AtomicU64 = AtomicU64::new(0);

/// Document store keeping one `<book_id>.json` file per book in a directory
#[derive(Debug, Clone)]
pub struct JsonDirectoryStore {
    root: PathBuf,
}

impl JsonDirectoryStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes a complete record, creating the directory when needed
    pub async fn insert(&self, record: &BookRecord) -> Result<(), EpubError> {
        let path = self.record_path(&record.book_id)?;
        let data = serde_json::to_vec_pretty(record)?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(storage_failure)?;

        // write then rename, so readers never see a half-written record
        let temp_path = path.with_extension(format!(
            "json.{}-{}.tmp",
            std::process::id(),
            NEXT_WRITE.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&temp_path, data)
            .await
            .map_err(storage_failure)?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(storage_failure)?;

        debug!("Stored record \"{}\" at {}.", record.book_id, path.display());
        Ok(())
    }

    fn record_path(&self, book_id: &str) -> Result<PathBuf, EpubError> {
        let is_plain_name = !book_id.is_empty()
            && !book_id.contains(['/', '\\'])
            && book_id != "."
            && book_id != "..";

        if !is_plain_name {
            return Err(EpubError::StorageFailure {
                reason: format!("\"{}\" is not a valid book id", book_id),
            });
        }
        Ok(self.root.join(format!("{}.json", book_id)))
    }
}

#[async_trait]
impl DocumentStore for JsonDirectoryStore {
    async fn get(&self, book_id: &str) -> Result<Option<BookRecord>, EpubError> {
        let path = self.record_path(book_id)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(storage_failure(err)),
        };

        Ok(Some(serde_json::from_slice(&data)?))
    }

    async fn put(&self, book_id: &str, structure: &BookStructure) -> Result<(), EpubError> {
        let mut record = self.get(book_id).await?.unwrap_or_else(|| BookRecord {
            book_id: book_id.to_string(),
            title: structure.metadata.title.clone(),
            ..Default::default()
        });
        record.structure = Some(structure.clone());

        self.insert(&record).await
    }
}

fn storage_failure(err: std::io::Error) -> EpubError {
    EpubError::StorageFailure {
        reason: err.to_string(),
    }
}

/// Object store reading EPUB files from the local filesystem
///
/// `file://` URLs are read from their absolute path; any other URL is taken
/// as a path relative to the store root and may not leave it.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, url: &str) -> Option<PathBuf> {
        if let Some(path) = url.strip_prefix("file://") {
            let decoded = urlencoding::decode(path).ok()?;
            return Some(PathBuf::from(decoded.into_owned()));
        }

        let relative = Path::new(url);
        let stays_inside = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));

        stays_inside.then(|| self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn download(&self, url: &str) -> Result<Vec<u8>, EpubError> {
        let path = self.resolve(url).ok_or_else(|| EpubError::DownloadFailure {
            url: url.to_string(),
            reason: "the location is outside the store".to_string(),
        })?;

        tokio::fs::read(&path)
            .await
            .map_err(|err| EpubError::DownloadFailure {
                url: url.to_string(),
                reason: err.to_string(),
            })
    }
}
